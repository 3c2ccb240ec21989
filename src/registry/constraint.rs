use super::activity::ActivityAverage;
use crate::constraint::{CompileError, Compiled, Compiler, DependencyLevel, Node};
use crate::subject::{TagId, TagStore};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

/// Add/remove switches parsed from a constraint's options text
///
/// `am=1;` disables removal, `am=2;` disables addition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Options {
    pub auto_add: bool,
    pub auto_remove: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            auto_add: true,
            auto_remove: true,
        }
    }
}

impl Options {
    #[must_use]
    pub fn parse(text: &str) -> Self {
        Self {
            auto_add: !text.contains("am=2;"),
            auto_remove: !text.contains("am=1;"),
        }
    }
}

impl fmt::Display for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match (self.auto_add, self.auto_remove) {
            (true, false) => "am=1;",
            (false, true) => "am=2;",
            _ => "am=0;",
        };
        f.write_str(text)
    }
}

/// A compiled constraint bound to its tag
pub struct Constraint {
    tag: TagId,
    text: String,
    options_text: String,
    options: Options,
    enabled: bool,
    compiled: Result<Compiled, CompileError>,
    must_check_dependencies: AtomicBool,
    activity: ActivityAverage,
}

impl Constraint {
    /// Compile `text` for `tag`.
    ///
    /// The tag's diagnostic is cleared first, then set again if compilation
    /// fails or reports a problem.
    pub fn new(
        tag: TagId,
        text: &str,
        options: &str,
        enabled: bool,
        store: &dyn TagStore,
        activity_window: Duration,
    ) -> Self {
        store.set_constraint_error(tag, None);

        let compiled = Compiler::new().with_tags(store).compile(text);
        match &compiled {
            Ok(c) => {
                debug!(%tag, expr = %c.expr, level = %c.level, "compiled constraint");
                if let Some(warning) = c.warnings.last() {
                    warn!(%tag, "{warning}");
                    store.set_constraint_error(tag, Some(warning.clone()));
                }
            }
            Err(e) => {
                let message = format!("Invalid constraint: {e}");
                warn!(%tag, expr = text, "{message}");
                store.set_constraint_error(tag, Some(message));
            }
        }

        let must_check = store.tag(tag).is_some_and(|t| t.has_side_effects());

        Self {
            tag,
            text: text.to_string(),
            options_text: options.to_string(),
            options: Options::parse(options),
            enabled,
            compiled,
            must_check_dependencies: AtomicBool::new(must_check),
            activity: ActivityAverage::new(activity_window),
        }
    }

    #[must_use]
    pub const fn tag(&self) -> TagId {
        self.tag
    }

    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    #[must_use]
    pub const fn options(&self) -> Options {
        self.options
    }

    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Whether this constraint was built from the same definition
    #[must_use]
    pub fn same_definition(&self, text: &str, options: &str, enabled: bool) -> bool {
        self.text == text && self.options_text == options && self.enabled == enabled
    }

    /// Compiled expression; `None` when compilation failed
    #[must_use]
    pub fn expr(&self) -> Option<&Node> {
        self.compiled.as_ref().ok().map(|c| &c.expr)
    }

    #[must_use]
    pub fn compile_error(&self) -> Option<&CompileError> {
        self.compiled.as_ref().err()
    }

    #[must_use]
    pub fn level(&self) -> DependencyLevel {
        self.compiled.as_ref().map_or(DependencyLevel::Static, |c| c.level)
    }

    /// Whether the outcome can change with the subject's run state
    #[must_use]
    pub fn depends_on_state(&self) -> bool {
        self.compiled
            .as_ref()
            .is_ok_and(|c| c.depends_on_state || c.level >= DependencyLevel::RunningState)
    }

    /// Constrainable tags this constraint's expression tests membership of
    #[must_use]
    pub fn depends_on_tags(&self) -> &[TagId] {
        match &self.compiled {
            Ok(c) => &c.depends_on_tags,
            Err(_) => &[],
        }
    }

    #[must_use]
    pub fn must_check_dependencies(&self) -> bool {
        self.must_check_dependencies.load(Ordering::Relaxed)
    }

    /// Re-derive dependency checking from the tag's current descriptor
    pub fn refresh(&self, store: &dyn TagStore) {
        let must_check = store.tag(self.tag).is_some_and(|t| t.has_side_effects());
        self.must_check_dependencies.store(must_check, Ordering::Relaxed);
    }

    pub(crate) fn record_activity(&self) {
        self.activity.record();
    }

    /// Evaluation rate, optionally followed by the dependency summary
    #[must_use]
    pub fn status(&self, verbose: bool) -> String {
        let mut status = format!("{:.1}/sec", self.activity.average());
        if verbose {
            status.push_str(&format!(
                ", DS={}, DL={}",
                self.depends_on_state(),
                self.level()
            ));
        }
        status
    }
}

impl fmt::Debug for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Constraint")
            .field("tag", &self.tag)
            .field("text", &self.text)
            .field("options", &self.options)
            .field("enabled", &self.enabled)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subject::{MemoryTagStore, TagInfo};

    fn store_with(info: TagInfo) -> MemoryTagStore {
        let store = MemoryTagStore::new();
        store.insert_tag(info);
        store
    }

    fn build(store: &MemoryTagStore, text: &str, options: &str) -> Constraint {
        Constraint::new(TagId(1), text, options, true, store, Duration::from_secs(60))
    }

    #[test]
    fn test_options() {
        assert_eq!(Options::parse(""), Options::default());
        assert_eq!(
            Options::parse("am=1;"),
            Options { auto_add: true, auto_remove: false }
        );
        assert_eq!(
            Options::parse("am=2;"),
            Options { auto_add: false, auto_remove: true }
        );
        assert_eq!(Options::parse("am=2;").to_string(), "am=2;");
        assert_eq!(Options::default().to_string(), "am=0;");
    }

    #[test]
    fn test_compile_error_is_reported_on_tag() {
        let store = store_with(TagInfo::new(TagId(1), "T"));
        let constraint = build(&store, "isBogus()", "");

        assert!(constraint.expr().is_none());
        assert!(matches!(
            constraint.compile_error(),
            Some(CompileError::UnknownFunction(_))
        ));
        assert_eq!(
            store.constraint_error(TagId(1)).as_deref(),
            Some("Invalid constraint: Unsupported function 'isBogus'")
        );

        let fixed = build(&store, "isPaused()", "");
        assert!(fixed.expr().is_some());
        assert_eq!(store.constraint_error(TagId(1)), None);
    }

    #[test]
    fn test_state_dependence() {
        let store = store_with(TagInfo::new(TagId(1), "T"));
        assert!(build(&store, "isPaused()", "").depends_on_state());
        assert!(build(&store, "percent > 50", "").depends_on_state());
        assert!(build(&store, "age > 5", "").depends_on_state());
        assert!(!build(&store, "size > 5", "").depends_on_state());
        assert!(!build(&store, "isBogus()", "").depends_on_state());
    }

    #[test]
    fn test_must_check_follows_tag_metadata() {
        let store = store_with(TagInfo::new(TagId(1), "T"));
        let constraint = build(&store, "true", "");
        assert!(!constraint.must_check_dependencies());

        store.update_tag(TagId(1), |t| t.max_members = 10);
        constraint.refresh(&store);
        assert!(constraint.must_check_dependencies());
    }

    #[test]
    fn test_status() {
        let store = store_with(TagInfo::new(TagId(1), "T"));
        let constraint = build(&store, "percent > 50", "");
        assert_eq!(constraint.status(false), "0.0/sec");
        assert_eq!(constraint.status(true), "0.0/sec, DS=true, DL=running-state");
    }

    #[test]
    fn test_same_definition() {
        let store = store_with(TagInfo::new(TagId(1), "T"));
        let constraint = build(&store, "true", "am=1;");
        assert!(constraint.same_definition("true", "am=1;", true));
        assert!(!constraint.same_definition("true", "", true));
        assert!(!constraint.same_definition("true", "am=1;", false));
    }
}
