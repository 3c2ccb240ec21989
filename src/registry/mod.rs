//! Constraint registry and dependency resolver
//!
//! Holds one constraint per tag and applies them to subjects: a subject
//! that satisfies a constraint is added to its tag (unless that was done
//! too recently), one that no longer does is removed.
//!
//! When a constraint's tag has side effects (actions on assignment, or a
//! membership limit) and its expression tests membership of other
//! constrained tags, those constraints are resolved first for the same
//! subject so the decision sees up-to-date membership. A visited set scoped
//! to the top-level call guards against mutual references.
//!
//! Every apply function returns the subjects whose membership it changed,
//! so the caller can feed them back in as membership-change events.

mod activity;
mod constraint;
mod gate;

pub use activity::ActivityAverage;
pub use constraint::{Constraint, Options};
pub use gate::{Deferred, ProcessingGate, Target};

use crate::constraint::{Evaluator, Services};
use crate::subject::{Subject, SubjectId, SubjectRef, TagId};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Tunables of a registry
#[derive(Debug, Clone, Copy)]
pub struct RegistryConfig {
    /// Minimum time between two automatic adds of a subject to one tag
    pub add_cooldown: Duration,
    /// Window of each constraint's activity average
    pub activity_window: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            add_cooldown: Duration::from_millis(1000),
            activity_window: Duration::from_secs(60),
        }
    }
}

/// Subjects whose membership changed
pub type Touched = Vec<SubjectRef>;

pub struct Registry {
    services: Arc<Services>,
    config: RegistryConfig,
    constraints: RwLock<BTreeMap<TagId, Arc<Constraint>>>,
    history: Mutex<HashMap<TagId, HashMap<SubjectId, Instant>>>,
    gate: ProcessingGate,
    initial_complete: AtomicBool,
    stopping: AtomicBool,
}

impl Registry {
    #[must_use]
    pub fn new(services: Arc<Services>, config: RegistryConfig) -> Self {
        Self {
            services,
            config,
            constraints: RwLock::new(BTreeMap::new()),
            history: Mutex::new(HashMap::new()),
            gate: ProcessingGate::new(),
            initial_complete: AtomicBool::new(false),
            stopping: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn services(&self) -> &Services {
        &self.services
    }

    /// Install, replace or drop the constraint of a tag.
    ///
    /// Empty text drops it. Returns the new constraint when one was
    /// installed; re-submitting an unchanged definition installs nothing.
    pub fn set_constraint(
        &self,
        tag: TagId,
        text: &str,
        options: &str,
        enabled: bool,
    ) -> Option<Arc<Constraint>> {
        let text = text.trim();
        let options = options.trim();

        if text.is_empty() {
            self.remove_constraint(tag);
            return None;
        }

        if self
            .constraint(tag)
            .is_some_and(|c| c.same_definition(text, options, enabled))
        {
            return None;
        }

        let constraint = Arc::new(Constraint::new(
            tag,
            text,
            options,
            enabled,
            self.services.tags.as_ref(),
            self.config.activity_window,
        ));
        info!(%tag, expr = text, "constraint set");
        self.write().insert(tag, Arc::clone(&constraint));
        Some(constraint)
    }

    /// Returns whether a constraint was registered
    pub fn remove_constraint(&self, tag: TagId) -> bool {
        let removed = self.write().remove(&tag).is_some();
        if removed {
            info!(%tag, "constraint removed");
        }
        removed
    }

    #[must_use]
    pub fn constraint(&self, tag: TagId) -> Option<Arc<Constraint>> {
        self.read().get(&tag).cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Copy of the constraint set, each constraint after those it depends on
    #[must_use]
    pub fn snapshot(&self) -> Vec<Arc<Constraint>> {
        let map = self.read().clone();
        let mut ordered = Vec::with_capacity(map.len());
        let mut seen = HashSet::new();

        fn visit(
            tag: TagId,
            map: &BTreeMap<TagId, Arc<Constraint>>,
            seen: &mut HashSet<TagId>,
            ordered: &mut Vec<Arc<Constraint>>,
        ) {
            let Some(constraint) = map.get(&tag) else {
                return;
            };
            if !seen.insert(tag) {
                return;
            }
            for dep in constraint.depends_on_tags() {
                visit(*dep, map, seen, ordered);
            }
            ordered.push(Arc::clone(constraint));
        }

        for tag in map.keys() {
            visit(*tag, &map, &mut seen, &mut ordered);
        }
        ordered
    }

    /// Constraints whose outcome can change with a subject's run state
    #[must_use]
    pub fn state_dependent(&self) -> Vec<Arc<Constraint>> {
        self.snapshot()
            .into_iter()
            .filter(|c| c.depends_on_state())
            .collect()
    }

    /// Activity summary of a tag's constraint
    #[must_use]
    pub fn status(&self, tag: TagId, verbose: bool) -> Option<String> {
        self.constraint(tag).map(|c| c.status(verbose))
    }

    /// Tags a tag's constraint depends on
    #[must_use]
    pub fn depends_on_tags(&self, tag: TagId) -> Vec<TagId> {
        self.constraint(tag)
            .map(|c| c.depends_on_tags().to_vec())
            .unwrap_or_default()
    }

    /// A tag's descriptor changed
    pub fn tag_metadata_changed(&self, tag: TagId) {
        if let Some(c) = self.constraint(tag) {
            c.refresh(self.services.tags.as_ref());
        }
    }

    #[must_use]
    pub fn initial_assignment_complete(&self) -> bool {
        self.initial_complete.load(Ordering::SeqCst)
    }

    /// Refuse every further mutation
    pub fn stop(&self) {
        self.stopping.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    pub fn clear_history(&self) {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    #[must_use]
    pub const fn gate(&self) -> &ProcessingGate {
        &self.gate
    }

    /// Pause or resume mutation; resuming the last pause replays what was held back
    pub fn set_processing_enabled(&self, enabled: bool) -> Touched {
        if !enabled {
            self.gate.disable();
            return Vec::new();
        }

        let mut touched = Vec::new();
        for deferred in self.gate.enable() {
            // Removed, disabled or replaced while paused
            if !self.is_registered(&deferred.constraint) {
                debug!(tag = %deferred.constraint.tag(), "dropping deferred request");
                continue;
            }
            self.run(&deferred.constraint, &deferred.target, deferred.check_dependencies, &mut touched);
        }
        touched
    }

    /// Whether `constraint` is still the one installed for its tag
    #[must_use]
    pub fn is_registered(&self, constraint: &Arc<Constraint>) -> bool {
        self.constraint(constraint.tag())
            .is_some_and(|c| Arc::ptr_eq(&c, constraint))
    }

    /// Apply every constraint to one subject
    pub fn apply_to_one(&self, subject: &SubjectRef) -> Touched {
        let mut touched = Vec::new();
        for constraint in self.snapshot() {
            self.apply(&constraint, Target::One(Arc::clone(subject)), true, &mut touched);
        }
        touched
    }

    /// Apply every constraint to a set of subjects.
    ///
    /// The initial bulk pass sweeps twice: a baseline without dependency
    /// resolution, then again once initial assignment is marked complete.
    pub fn apply_to_many(&self, subjects: &[SubjectRef], initial: bool) -> Touched {
        let constraints = self.snapshot();
        let mut touched = Vec::new();

        for constraint in &constraints {
            self.apply(constraint, Target::Many(subjects.to_vec()), !initial, &mut touched);
        }

        if initial {
            self.initial_complete.store(true, Ordering::SeqCst);
            info!(
                subjects = subjects.len(),
                constraints = constraints.len(),
                "initial assignment complete"
            );
            for constraint in &constraints {
                self.apply(constraint, Target::Many(subjects.to_vec()), true, &mut touched);
            }
        }
        touched
    }

    /// Apply one constraint to a set of subjects
    pub fn apply_constraint(&self, constraint: &Arc<Constraint>, subjects: &[SubjectRef]) -> Touched {
        let mut touched = Vec::new();
        self.apply(constraint, Target::Many(subjects.to_vec()), true, &mut touched);
        touched
    }

    /// Periodic full pass
    pub fn reapply_all(&self, subjects: &[SubjectRef]) -> Touched {
        self.apply_to_many(subjects, false)
    }

    fn apply(
        &self,
        constraint: &Arc<Constraint>,
        target: Target,
        check_dependencies: bool,
        touched: &mut Touched,
    ) {
        if constraint.expr().is_none() || !constraint.is_enabled() || self.is_stopping() {
            return;
        }

        let admitted = self.gate.admit(|| Deferred {
            constraint: Arc::clone(constraint),
            target: target.clone(),
            check_dependencies,
        });
        if admitted {
            self.run(constraint, &target, check_dependencies, touched);
        }
    }

    fn run(
        &self,
        constraint: &Arc<Constraint>,
        target: &Target,
        check_dependencies: bool,
        touched: &mut Touched,
    ) {
        let subjects = match target {
            Target::One(subject) => std::slice::from_ref(subject),
            Target::Many(subjects) => subjects.as_slice(),
        };

        for subject in subjects {
            if self.is_stopping() {
                return;
            }
            if subject.is_destroyed() {
                continue;
            }
            let mut visited = HashSet::new();
            self.resolve(constraint, subject, check_dependencies, &mut visited, touched);
        }
    }

    /// Decide one (constraint, subject) pair, resolving dependencies first
    /// when the constraint's tag has side effects
    fn resolve(
        &self,
        constraint: &Arc<Constraint>,
        subject: &SubjectRef,
        check_dependencies: bool,
        visited: &mut HashSet<TagId>,
        touched: &mut Touched,
    ) {
        let tag = constraint.tag();
        let id = subject.id();
        let tags = &self.services.tags;

        if check_dependencies && visited.contains(&tag) {
            return;
        }

        if !self.test(constraint, subject.as_ref()) {
            let options = constraint.options();
            if options.auto_remove && tags.is_tagged(tag, id) && !self.is_stopping() {
                debug!(%tag, subject = %id, "constraint no longer satisfied, removing");
                tags.remove(tag, id);
                touched.push(Arc::clone(subject));
            }
            return;
        }

        if !constraint.options().auto_add || tags.is_tagged(tag, id) {
            return;
        }

        if check_dependencies && constraint.must_check_dependencies() {
            let deps: Vec<Arc<Constraint>> = constraint
                .depends_on_tags()
                .iter()
                .filter_map(|t| self.constraint(*t))
                .filter(|c| c.expr().is_some() && c.is_enabled())
                .collect();

            if !deps.is_empty() {
                visited.insert(tag);
                for dep in &deps {
                    self.resolve(dep, subject, true, visited, touched);
                }
                self.resolve(constraint, subject, false, visited, touched);
                return;
            }
        }

        if self.is_stopping() {
            return;
        }

        if self.cooled_down(tag, id) {
            debug!(%tag, subject = %id, "constraint satisfied, adding");
            tags.add(tag, id);
            touched.push(Arc::clone(subject));
        }
    }

    fn test(&self, constraint: &Constraint, subject: &dyn Subject) -> bool {
        let Some(expr) = constraint.expr() else {
            return false;
        };
        constraint.record_activity();

        let tags = self.services.tags.tags_of(subject.id());
        Evaluator::new(&self.services, constraint.tag(), subject, &tags).condition(expr)
    }

    /// Record an add unless the same one happened within the cooldown
    fn cooled_down(&self, tag: TagId, subject: SubjectId) -> bool {
        let now = Instant::now();
        let mut history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
        let recent = history.entry(tag).or_default();

        if let Some(last) = recent.get(&subject)
            && now.duration_since(*last) < self.config.add_cooldown
        {
            debug!(%tag, %subject, "not applying constraint as too recently actioned");
            return false;
        }

        recent.insert(subject, now);
        true
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<TagId, Arc<Constraint>>> {
        self.constraints.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<TagId, Arc<Constraint>>> {
        self.constraints.write().unwrap_or_else(PoisonError::into_inner)
    }
}
