//! Application scheduler
//!
//! `Engine` ties a `Registry` to the subject population and to the events
//! that should re-run constraints. Every pass (the initial bulk pass,
//! per-event passes, the periodic re-scan and state-change batches) runs on
//! one worker thread, so membership mutation is never observed from two
//! passes at once. Callers only enqueue work and never block on it.
//!
//! The engine is **Idle** while no constraint is registered and **Active**
//! otherwise. Only an active engine runs the periodic re-scan and reacts to
//! subject events.

mod dispatch;
mod ticker;

use crate::config::EngineConfig;
use crate::constraint::{Services, SettingsCache};
use crate::registry::{Constraint, Registry, Touched};
use crate::subject::{
    ConfigSource, ScriptHook, SubjectId, SubjectRef, SubjectSource, TagId, TagStore,
};
use crossbeam_channel::{Receiver, Sender, bounded, unbounded};
use dispatch::{Batch, Dispatcher};
use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use ticker::Ticker;
use tracing::{debug, info, warn};

/// Re-runs allowed per subject while following up one job's membership changes
const MAX_FOLLOW_UPS: usize = 8;

enum Job {
    Initialise,
    ApplyOne(SubjectRef),
    ApplyConstraint(Arc<Constraint>),
    Reapply,
    Staged(Batch),
    SetProcessing(bool),
    Flush(Sender<()>),
    Shutdown,
}

/// Assembles an `Engine`
pub struct EngineBuilder {
    subjects: Arc<dyn SubjectSource>,
    tags: Arc<dyn TagStore>,
    config: EngineConfig,
    config_source: Option<Arc<dyn ConfigSource>>,
    script: Option<Arc<dyn ScriptHook>>,
}

impl EngineBuilder {
    #[must_use]
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Store read by `getConfig`
    #[must_use]
    pub fn config_source(mut self, source: Arc<dyn ConfigSource>) -> Self {
        self.config_source = Some(source);
        self
    }

    /// Hook evaluating `javascript(...)`
    #[must_use]
    pub fn script(mut self, hook: Arc<dyn ScriptHook>) -> Self {
        self.script = Some(hook);
        self
    }

    /// Start the engine's threads
    ///
    /// # Errors
    ///
    /// Returns an error if a thread cannot be spawned.
    pub fn build(self) -> io::Result<Engine> {
        let settings = SettingsCache::new(self.config_source, self.config.config_cache_ttl());
        let services = Arc::new(Services::new(self.tags, self.script, Arc::new(settings)));
        let shared = Arc::new(Shared {
            registry: Registry::new(services, self.config.registry()),
            subjects: self.subjects,
        });

        let (jobs, queue) = unbounded();
        let worker = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name("autotag-worker".to_string())
                .spawn(move || shared.work(&queue))?
        };

        let dispatcher = {
            let jobs = jobs.clone();
            Dispatcher::start(self.config.state_change_spacing(), move |batch| {
                jobs.send(Job::Staged(batch)).is_ok()
            })?
        };

        Ok(Engine {
            shared,
            config: self.config,
            jobs,
            worker: Some(worker),
            dispatcher,
            timer: Mutex::new(None),
            initialised: AtomicBool::new(false),
        })
    }
}

struct Shared {
    registry: Registry,
    subjects: Arc<dyn SubjectSource>,
}

impl Shared {
    fn work(&self, queue: &Receiver<Job>) {
        for job in queue {
            let touched = match job {
                Job::Initialise => {
                    let subjects = self.subjects.subjects();
                    self.registry.apply_to_many(&subjects, true);
                    continue;
                }
                Job::ApplyOne(subject) => self.registry.apply_to_one(&subject),
                Job::ApplyConstraint(constraint) => {
                    if self.is_current(&constraint) {
                        let subjects = self.subjects.subjects();
                        self.registry.apply_constraint(&constraint, &subjects)
                    } else {
                        Vec::new()
                    }
                }
                Job::Reapply => {
                    self.registry.clear_history();
                    let subjects = self.subjects.subjects();
                    debug!(subjects = subjects.len(), "periodic re-scan");
                    self.registry.reapply_all(&subjects)
                }
                Job::Staged(batch) => {
                    let mut touched = Vec::new();
                    for (subject, constraints) in batch {
                        for constraint in constraints.iter().filter(|c| self.is_current(c)) {
                            touched.extend(
                                self.registry
                                    .apply_constraint(constraint, std::slice::from_ref(&subject)),
                            );
                        }
                    }
                    touched
                }
                Job::SetProcessing(enabled) => self.registry.set_processing_enabled(enabled),
                Job::Flush(done) => {
                    let _ = done.send(());
                    continue;
                }
                Job::Shutdown => break,
            };
            self.follow_up(touched);
        }
        debug!("constraint worker stopped");
    }

    /// Whether `constraint` is still the one registered for its tag
    fn is_current(&self, constraint: &Arc<Constraint>) -> bool {
        self.registry.is_registered(constraint)
    }

    /// Re-run every constraint for subjects whose membership just changed
    fn follow_up(&self, touched: Touched) {
        if touched.is_empty() || !self.registry.initial_assignment_complete() {
            return;
        }

        let mut queue: VecDeque<SubjectRef> = VecDeque::new();
        enqueue(&mut queue, touched);
        let mut runs: HashMap<SubjectId, usize> = HashMap::new();

        while let Some(subject) = queue.pop_front() {
            if self.registry.is_stopping() {
                return;
            }
            let count = runs.entry(subject.id()).or_default();
            *count += 1;
            if *count > MAX_FOLLOW_UPS {
                warn!(subject = %subject.id(), "membership keeps changing, dropping follow-up");
                continue;
            }
            let more = self.registry.apply_to_one(&subject);
            enqueue(&mut queue, more);
        }
    }
}

fn enqueue(queue: &mut VecDeque<SubjectRef>, subjects: Touched) {
    for subject in subjects {
        if !queue.iter().any(|s| s.id() == subject.id()) {
            queue.push_back(subject);
        }
    }
}

/// Constraint engine bound to a subject population and a tag store
pub struct Engine {
    shared: Arc<Shared>,
    config: EngineConfig,
    jobs: Sender<Job>,
    worker: Option<JoinHandle<()>>,
    dispatcher: Dispatcher,
    timer: Mutex<Option<Ticker>>,
    initialised: AtomicBool,
}

impl Engine {
    #[must_use]
    pub fn builder(subjects: Arc<dyn SubjectSource>, tags: Arc<dyn TagStore>) -> EngineBuilder {
        EngineBuilder {
            subjects,
            tags,
            config: EngineConfig::default(),
            config_source: None,
            script: None,
        }
    }

    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.shared.registry
    }

    #[must_use]
    pub fn services(&self) -> &Services {
        self.shared.registry.services()
    }

    /// Run the initial bulk pass; until then subject events are ignored
    pub fn initialise(&self) {
        if self.initialised.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(constraints = self.registry().len(), "starting initial assignment");
        self.send(Job::Initialise);
    }

    #[must_use]
    pub fn is_initialised(&self) -> bool {
        self.initialised.load(Ordering::SeqCst)
    }

    /// Whether at least one constraint is registered and the re-scan timer runs
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.timer().is_some()
    }

    /// Install, replace or drop (with empty text) the constraint of a tag.
    ///
    /// Once initialised, a newly installed constraint is applied to every
    /// subject.
    pub fn set_constraint(
        &self,
        tag: TagId,
        text: &str,
        options: &str,
        enabled: bool,
    ) -> Option<Arc<Constraint>> {
        let installed = self.registry().set_constraint(tag, text, options, enabled);
        if let Some(constraint) = &installed
            && self.is_initialised()
        {
            self.send(Job::ApplyConstraint(Arc::clone(constraint)));
        }
        self.check_timer();
        installed
    }

    pub fn remove_constraint(&self, tag: TagId) -> bool {
        let removed = self.registry().remove_constraint(tag);
        self.check_timer();
        removed
    }

    /// A tag was deleted
    pub fn tag_removed(&self, tag: TagId) {
        self.remove_constraint(tag);
    }

    /// A tag's descriptor (actions, membership limit) changed
    pub fn tag_metadata_changed(&self, tag: TagId) {
        self.registry().tag_metadata_changed(tag);
    }

    /// Configuration values changed; cached `getConfig` reads are dropped
    pub fn config_changed(&self) {
        self.services().settings.invalidate();
    }

    pub fn subject_created(&self, subject: SubjectRef) {
        if self.accepts_events() {
            self.send(Job::ApplyOne(subject));
        }
    }

    /// Stage the state-dependent constraints for a subject whose run state changed
    pub fn subject_state_changed(&self, subject: SubjectRef) {
        if !self.accepts_events() {
            return;
        }
        let constraints = self.registry().state_dependent();
        if !constraints.is_empty() {
            self.dispatcher.stage(subject, constraints);
        }
    }

    /// Drop everything cached for a subject
    pub fn subject_destroyed(&self, subject: SubjectId) {
        self.dispatcher.forget(subject);
        self.services().forget_subject(subject);
        for constraint in self.registry().snapshot() {
            if let Some(expr) = constraint.expr() {
                expr.forget(subject);
            }
        }
    }

    /// A subject joined or left a tag outside the engine
    pub fn membership_changed(&self, subject: SubjectRef) {
        if self.registry().initial_assignment_complete() && self.is_active() {
            self.send(Job::ApplyOne(subject));
        }
    }

    /// Pause (`false`) or resume (`true`) membership mutation; pauses nest
    pub fn set_processing_enabled(&self, enabled: bool) {
        self.send(Job::SetProcessing(enabled));
    }

    #[must_use]
    pub fn status(&self, tag: TagId, verbose: bool) -> Option<String> {
        self.registry().status(tag, verbose)
    }

    #[must_use]
    pub fn depends_on_tags(&self, tag: TagId) -> Vec<TagId> {
        self.registry().depends_on_tags(tag)
    }

    /// State changes staged and not yet dispatched
    #[must_use]
    pub fn pending_state_changes(&self) -> usize {
        self.dispatcher.len()
    }

    /// Refuse every further membership mutation
    pub fn stop(&self) {
        info!("constraint engine stopping");
        self.registry().stop();
        *self.timer() = None;
    }

    /// Wait until all work enqueued so far has run, including staged state
    /// changes that are still waiting for the dispatch spacing
    pub fn flush(&self) {
        let batch = self.dispatcher.take();
        if !batch.is_empty() {
            self.send(Job::Staged(batch));
        }
        let (done, wait) = bounded(1);
        self.send(Job::Flush(done));
        let _ = wait.recv();
    }

    fn accepts_events(&self) -> bool {
        self.is_initialised() && self.is_active() && !self.registry().is_stopping()
    }

    /// Move between Idle and Active as constraints come and go
    fn check_timer(&self) {
        let wanted = !self.registry().is_empty() && !self.registry().is_stopping();
        let mut timer = self.timer();

        match (wanted, timer.is_some()) {
            (true, false) => {
                let jobs = self.jobs.clone();
                match Ticker::start("autotag-timer", self.config.reapply_interval(), move || {
                    jobs.send(Job::Reapply).is_ok()
                }) {
                    Ok(ticker) => {
                        *timer = Some(ticker);
                        info!(
                            interval_secs = self.config.reapply_interval_secs,
                            "constraint engine active"
                        );
                    }
                    Err(e) => warn!(error = %e, "failed to start re-scan timer"),
                }
            }
            (false, true) => {
                *timer = None;
                self.registry().clear_history();
                info!("constraint engine idle");
            }
            _ => {}
        }
    }

    fn send(&self, job: Job) {
        if self.jobs.send(job).is_err() {
            warn!("constraint worker is gone, job dropped");
        }
    }

    fn timer(&self) -> std::sync::MutexGuard<'_, Option<Ticker>> {
        self.timer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        *self.timer() = None;
        let _ = self.jobs.send(Job::Shutdown);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}
