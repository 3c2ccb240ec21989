use super::constraint::Constraint;
use crate::subject::SubjectRef;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{info, warn};

/// Subjects an apply request targets
#[derive(Clone)]
pub enum Target {
    One(SubjectRef),
    Many(Vec<SubjectRef>),
}

/// An apply request captured while processing was disabled
#[derive(Clone)]
pub struct Deferred {
    pub constraint: Arc<Constraint>,
    pub target: Target,
    pub check_dependencies: bool,
}

#[derive(Default)]
struct GateState {
    disabled: usize,
    pending: Vec<Deferred>,
}

/// Reentrant switch that holds back every membership mutation
///
/// Each `disable` must be matched by an `enable`. While at least one is
/// outstanding, apply requests are queued instead of run; lifting the last
/// one hands the queue back in submission order.
#[derive(Default)]
pub struct ProcessingGate {
    state: Mutex<GateState>,
}

impl ProcessingGate {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn disable(&self) {
        let mut state = self.lock();
        state.disabled += 1;
        if state.disabled == 1 {
            info!("constraint processing paused");
        }
    }

    /// Lift one `disable`, returning the queued requests once none remain
    pub fn enable(&self) -> Vec<Deferred> {
        let mut state = self.lock();
        if state.disabled == 0 {
            warn!("constraint processing enabled without matching disable");
            return Vec::new();
        }
        state.disabled -= 1;
        if state.disabled > 0 {
            return Vec::new();
        }
        let pending = std::mem::take(&mut state.pending);
        info!(queued = pending.len(), "constraint processing resumed");
        pending
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.lock().disabled == 0
    }

    #[must_use]
    pub fn pending(&self) -> usize {
        self.lock().pending.len()
    }

    /// `true` when the request may run now, otherwise it is queued
    pub(crate) fn admit(&self, request: impl FnOnce() -> Deferred) -> bool {
        let mut state = self.lock();
        if state.disabled == 0 {
            true
        } else {
            state.pending.push(request());
            false
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
