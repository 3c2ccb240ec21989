use crate::registry::Constraint;
use crate::subject::{SubjectId, SubjectRef};
use crossbeam_channel::{Sender, TrySendError, bounded, select};
use std::collections::BTreeMap;
use std::io;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::debug;

/// Subjects with the constraints to re-run against each
pub(crate) type Batch = Vec<(SubjectRef, Vec<Arc<Constraint>>)>;

type Staged = BTreeMap<SubjectId, (SubjectRef, Vec<Arc<Constraint>>)>;

/// Frequency-limited dispatch of staged state changes
///
/// Staging a subject replaces whatever was staged for it before. The first
/// stage after a quiet period is delivered straight away; anything staged
/// while the spacing runs waits for the next drain.
pub(crate) struct Dispatcher {
    staged: Arc<Mutex<Staged>>,
    poke: Sender<()>,
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Dispatcher {
    pub(crate) fn start(
        spacing: Duration,
        deliver: impl Fn(Batch) -> bool + Send + 'static,
    ) -> io::Result<Self> {
        let staged: Arc<Mutex<Staged>> = Arc::default();
        let (poke, poked) = bounded::<()>(1);
        let (stop, stopped) = bounded::<()>(0);

        let pending = Arc::clone(&staged);
        let handle = thread::Builder::new()
            .name("autotag-dispatch".to_string())
            .spawn(move || {
                loop {
                    select! {
                        recv(poked) -> msg => {
                            if msg.is_err() {
                                break;
                            }
                        }
                        recv(stopped) -> _ => break,
                    }

                    let batch = take(&pending);
                    if !batch.is_empty() {
                        debug!(subjects = batch.len(), "dispatching staged state changes");
                        if !deliver(batch) {
                            break;
                        }
                    }

                    select! {
                        recv(stopped) -> _ => break,
                        default(spacing) => {}
                    }
                }
                debug!("state change dispatcher stopped");
            })?;

        Ok(Self {
            staged,
            poke,
            stop: Some(stop),
            handle: Some(handle),
        })
    }

    pub(crate) fn stage(&self, subject: SubjectRef, constraints: Vec<Arc<Constraint>>) {
        lock(&self.staged).insert(subject.id(), (subject, constraints));
        match self.poke.try_send(()) {
            Ok(()) | Err(TrySendError::Full(())) => {}
            Err(TrySendError::Disconnected(())) => debug!("dispatcher gone, change stays staged"),
        }
    }

    /// Empty the staging area now, bypassing the spacing
    pub(crate) fn take(&self) -> Batch {
        take(&self.staged)
    }

    pub(crate) fn forget(&self, subject: SubjectId) {
        lock(&self.staged).remove(&subject);
    }

    pub(crate) fn len(&self) -> usize {
        lock(&self.staged).len()
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        drop(self.stop.take());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn lock(staged: &Mutex<Staged>) -> std::sync::MutexGuard<'_, Staged> {
    staged.lock().unwrap_or_else(PoisonError::into_inner)
}

fn take(staged: &Mutex<Staged>) -> Batch {
    std::mem::take(&mut *lock(staged)).into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subject::{MemorySubject, MemoryTagStore, SubjectRecord, TagId};
    use crossbeam_channel::unbounded;

    fn constraint(tag: u32) -> Arc<Constraint> {
        let store = MemoryTagStore::new();
        Arc::new(Constraint::new(
            TagId(tag),
            "isPaused()",
            "",
            true,
            &store,
            Duration::from_secs(60),
        ))
    }

    fn subject(id: u64) -> SubjectRef {
        MemorySubject::new(SubjectRecord::new(id, "s"))
    }

    #[test]
    fn test_first_stage_is_delivered_promptly() {
        let (tx, rx) = unbounded();
        let dispatcher = Dispatcher::start(Duration::from_secs(60), move |batch| {
            tx.send(batch).is_ok()
        })
        .unwrap();

        dispatcher.stage(subject(1), vec![constraint(1)]);
        let batch = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].0.id(), SubjectId(1));
    }

    #[test]
    fn test_restaging_replaces_previous_entry() {
        let dispatcher = Dispatcher::start(Duration::from_secs(60), |_| true).unwrap();
        dispatcher.stage(subject(1), vec![constraint(1)]);
        std::thread::sleep(Duration::from_millis(50));

        dispatcher.stage(subject(2), vec![constraint(1)]);
        dispatcher.stage(subject(2), vec![constraint(1), constraint(2)]);
        assert_eq!(dispatcher.len(), 1);

        let batch = dispatcher.take();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].1.len(), 2);
        assert_eq!(dispatcher.len(), 0);
    }

    #[test]
    fn test_forget_drops_staged_subject() {
        let dispatcher = Dispatcher::start(Duration::from_secs(60), |_| true).unwrap();
        dispatcher.stage(subject(1), vec![constraint(1)]);
        std::thread::sleep(Duration::from_millis(50));

        dispatcher.stage(subject(3), vec![constraint(1)]);
        dispatcher.forget(SubjectId(3));
        assert!(dispatcher.take().is_empty());
    }
}
