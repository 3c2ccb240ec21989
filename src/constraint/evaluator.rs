//! Expression evaluation against one subject
//!
//! Evaluation never fails. Anything that cannot be resolved is reported as a
//! diagnostic on the owning tag and replaced by `false` (conditions) or `0`
//! (numbers), so one bad constraint or subject cannot abort a pass.

use super::ast::{Expr, FunctionCall, MatchMemo, Operand, Value};
use super::functions::Function;
use super::keywords::Keyword;
use super::settings::SettingsCache;
use crate::subject::{
    ScriptHook, Subject, SubjectFlag, SubjectId, SubjectState, TagId, TagInfo, TagStore,
};
use chrono::{DateTime, Datelike, Local, Timelike, Utc};
use moka::sync::Cache;
use std::sync::Arc;
use tracing::warn;

const FILE_NAME_CACHE_CAPACITY: u64 = 10_000;

/// Collaborators and caches shared by every evaluation of an engine
pub struct Services {
    pub tags: Arc<dyn TagStore>,
    pub script: Option<Arc<dyn ScriptHook>>,
    pub settings: Arc<SettingsCache>,
    file_names: Cache<SubjectId, Arc<[String]>>,
}

impl Services {
    #[must_use]
    pub fn new(
        tags: Arc<dyn TagStore>,
        script: Option<Arc<dyn ScriptHook>>,
        settings: Arc<SettingsCache>,
    ) -> Self {
        Self {
            tags,
            script,
            settings,
            file_names: Cache::new(FILE_NAME_CACHE_CAPACITY),
        }
    }

    /// File names of a subject, computed once and reused
    pub fn file_names(&self, subject: &dyn Subject) -> Arc<[String]> {
        self.file_names
            .get_with(subject.id(), || Arc::from(subject.file_names()))
    }

    /// Drop everything cached for a subject
    pub fn forget_subject(&self, subject: SubjectId) {
        self.file_names.invalidate(&subject);
    }
}

/// Evaluates expressions for one (tag, subject) pair
pub struct Evaluator<'a> {
    services: &'a Services,
    owner: TagId,
    subject: &'a dyn Subject,
    tags: &'a [TagInfo],
    now: DateTime<Utc>,
    diagnostics: Vec<String>,
}

impl<'a> Evaluator<'a> {
    /// `tags` is the subject's current tag list
    #[must_use]
    pub fn new(
        services: &'a Services,
        owner: TagId,
        subject: &'a dyn Subject,
        tags: &'a [TagInfo],
    ) -> Self {
        Self {
            services,
            owner,
            subject,
            tags,
            now: Utc::now(),
            diagnostics: Vec::new(),
        }
    }

    /// Evaluate as of a fixed instant
    #[must_use]
    pub const fn at(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    /// Problems reported so far
    #[must_use]
    pub fn diagnostics(&self) -> &[String] {
        &self.diagnostics
    }

    /// Evaluate a node that must yield a boolean
    pub fn condition(&mut self, expr: &Expr) -> bool {
        match self.value(expr) {
            Value::Bool(b) => b,
            Value::Number(_) => {
                self.report(format!("'{expr}' does not yield a boolean"));
                false
            }
        }
    }

    pub fn value(&mut self, expr: &Expr) -> Value {
        match expr {
            Expr::Literal(v) => v.clone(),
            Expr::Not(e) => Value::Bool(!self.condition(e)),
            Expr::Or(es) => Value::Bool(es.iter().any(|e| self.condition(e))),
            Expr::And(es) => Value::Bool(es.iter().all(|e| self.condition(e))),
            Expr::Xor(es) => {
                if es.len() < 2 {
                    self.report("Two or more arguments required for ^".to_string());
                    return Value::Bool(false);
                }
                let mut result = false;
                for e in es {
                    result ^= self.condition(e);
                }
                Value::Bool(result)
            }
            Expr::Call(call) => self.call(call),
        }
    }

    fn call(&mut self, call: &FunctionCall) -> Value {
        let subject = self.subject;
        let text = |i: usize| call.text_arg(i).unwrap_or_default();

        let result = match call.function {
            Function::HasTag => self.tags.iter().any(|t| t.name == text(0)),
            Function::HasTagGroup => self
                .tags
                .iter()
                .any(|t| t.group.as_deref() == Some(text(0))),
            Function::CountTag => {
                let name = text(0);
                return Value::Number(match self.services.tags.tags_by_name(name).first() {
                    Some(tag) => self.services.tags.member_count(tag.id) as f64,
                    None => {
                        self.report(format!("Tag '{name}' not found"));
                        0.0
                    }
                });
            }
            Function::HasNet => subject.networks().iter().any(|n| n == text(0)),
            Function::IsPrivate => subject.is_private(),
            Function::IsForceStart => subject.is_force_start(),
            Function::IsChecking => match subject.state() {
                SubjectState::Checking => true,
                SubjectState::Seeding => subject.is_rechecking(),
                _ => false,
            },
            Function::IsComplete => subject.is_complete(),
            Function::IsStopped => subject.state() == SubjectState::Stopped && !subject.is_paused(),
            Function::IsError => subject.state() == SubjectState::Error,
            Function::IsMagnet => subject.has_flag(SubjectFlag::Magnet),
            Function::IsLowNoise => subject.has_flag(SubjectFlag::LowNoise),
            Function::IsPaused => subject.is_paused(),
            Function::CanArchive => subject.can_archive(),
            Function::IsGe
            | Function::IsGt
            | Function::IsLe
            | Function::IsLt
            | Function::IsEq
            | Function::IsNeq => {
                let (Some(lhs), Some(rhs)) = (call.args.first(), call.args.get(1)) else {
                    return Value::Bool(false);
                };
                let a = self.number(lhs);
                let b = self.number(rhs);
                compare(call.function, a, b)
            }
            Function::Contains => {
                let (Some(haystack), Some(needle)) = (call.args.first(), call.args.get(1)) else {
                    return Value::Bool(false);
                };
                let values = self.strings(haystack);
                let needle = self.string(needle);
                values.iter().any(|v| v.contains(needle.as_str()))
            }
            Function::Matches => self.matches(call),
            Function::Javascript => self.script(text(0)),
            Function::HoursToSeconds | Function::DaysToSeconds | Function::WeeksToSeconds => {
                let quantity = call.args.first().map_or(0.0, |a| self.number(a));
                let unit = call.function.seconds_per_unit().unwrap_or_default();
                return Value::Number((quantity * unit).trunc());
            }
            Function::GetConfig => {
                return Value::Number(match self.services.settings.get(text(0)) {
                    Ok(v) => v,
                    Err(message) => {
                        self.report(message);
                        0.0
                    }
                });
            }
        };

        Value::Bool(result)
    }

    fn matches(&mut self, call: &FunctionCall) -> bool {
        let Some(pattern) = call.pattern.as_ref() else {
            return false;
        };
        let Some(arg) = call.args.first() else {
            return false;
        };

        let values = self.strings(arg);
        let id = self.subject.id();

        if let Some(memo) = call.memo(id)
            && Arc::ptr_eq(&memo.values, &values)
        {
            return memo.matched;
        }

        let matched = values.iter().any(|v| pattern.is_match(v));
        call.remember(id, MatchMemo { values, matched });
        matched
    }

    fn script(&mut self, source: &str) -> bool {
        let Some(hook) = self.services.script.as_ref() else {
            self.report("Script evaluation is not available".to_string());
            return false;
        };

        let call = format!("javascript( {source})");
        match hook.eval(self.owner, &call, self.subject, "inTag") {
            Ok(serde_json::Value::Bool(b)) => b,
            Ok(_) => false,
            Err(message) => {
                self.report(message);
                false
            }
        }
    }

    /// Numeric value of an operand
    pub fn number(&mut self, operand: &Operand) -> f64 {
        match operand {
            Operand::Number(n) => *n,
            Operand::Expr(e) => match self.value(e) {
                Value::Number(n) => n,
                Value::Bool(_) => {
                    self.report(format!("Invalid constraint numeric: {e}"));
                    0.0
                }
            },
            Operand::Keyword(kw) if kw.is_textual() => {
                self.report(format!("Invalid constraint numeric: {kw}"));
                0.0
            }
            Operand::Keyword(kw) => self.keyword(*kw),
            Operand::Bare(word) => {
                self.report(format!("Invalid constraint keyword: {word}"));
                0.0
            }
            Operand::Text(s) => {
                self.report(format!("Invalid constraint numeric: \"{s}\""));
                0.0
            }
        }
    }

    fn keyword(&self, kw: Keyword) -> f64 {
        let subject = self.subject;
        let since = |t: Option<DateTime<Utc>>| {
            t.map_or(0.0, |t| (self.now - t).num_seconds() as f64)
        };
        let idle = |secs: Option<u64>| secs.map_or(f64::INFINITY, |s| s as f64);
        let local = self.now.with_timezone(&Local);

        match kw {
            Keyword::ShareRatio => subject.stats().share_ratio.unwrap_or(f64::INFINITY),
            Keyword::Percent => subject.stats().percent_done,
            Keyword::Age => since(subject.timeline().added),
            Keyword::CompletedAge => since(subject.timeline().completed),
            Keyword::DownloadingFor => subject.stats().seconds_downloading as f64,
            Keyword::SeedingFor => subject.stats().seconds_seeding as f64,
            Keyword::SwarmMergeBytes => subject.stats().swarm_merged_bytes as f64,
            Keyword::LastActive => subject
                .timeline()
                .last_active
                .map_or(f64::INFINITY, |t| (self.now - t).num_seconds() as f64),
            Keyword::ResumeIn => match subject.timeline().resume_at {
                Some(at) if at > self.now => (at - self.now).num_seconds() as f64,
                _ => 0.0,
            },
            Keyword::MinOfHour => f64::from(local.minute()),
            Keyword::HourOfDay => f64::from(local.hour()),
            Keyword::DayOfWeek => f64::from(local.weekday().number_from_sunday()),
            Keyword::SeedCount => subject.swarm().seeds() as f64,
            Keyword::PeerCount => subject.swarm().peers() as f64,
            Keyword::SeedPeerRatio => {
                let swarm = subject.swarm();
                match (swarm.seeds(), swarm.peers()) {
                    (0, 0) => 0.0,
                    (_, 0) => f64::INFINITY,
                    (seeds, peers) => seeds as f64 / peers as f64,
                }
            }
            Keyword::TagAge => self
                .services
                .tags
                .added_time(self.owner, subject.id())
                .map_or(0.0, |t| (self.now - t).num_seconds().max(0) as f64),
            Keyword::PeerMaxCompletion => subject.swarm().peer_max_completion.unwrap_or(0.0),
            Keyword::LeecherMaxCompletion => subject.swarm().leecher_max_completion.unwrap_or(0.0),
            Keyword::PeerAverageCompletion => {
                subject.swarm().peer_average_completion.unwrap_or(0.0)
            }
            Keyword::Size => subject.size() as f64,
            Keyword::SizeMb => (subject.size() / (1024 * 1024)) as f64,
            Keyword::SizeGb => (subject.size() / (1024 * 1024 * 1024)) as f64,
            Keyword::FileCount => subject.file_count() as f64,
            Keyword::Availability => subject.swarm().availability.unwrap_or(-1.0),
            Keyword::UpIdle => idle(subject.stats().upload_idle_secs),
            Keyword::DownIdle => idle(subject.stats().download_idle_secs),
            Keyword::Downloaded => subject.stats().bytes_downloaded as f64,
            Keyword::Uploaded => subject.stats().bytes_uploaded as f64,
            Keyword::Name | Keyword::FileNames => 0.0,
        }
    }

    /// Every string an operand stands for
    fn strings(&mut self, operand: &Operand) -> Arc<[String]> {
        match operand {
            Operand::Keyword(Keyword::FileNames) => self.services.file_names(self.subject),
            other => Arc::from(vec![self.string(other)]),
        }
    }

    /// Single string value of an operand
    fn string(&mut self, operand: &Operand) -> String {
        match operand {
            Operand::Text(s) => s.clone(),
            Operand::Keyword(Keyword::Name) => self.subject.display_name(),
            other => {
                self.report(format!("Invalid constraint string: {other}"));
                String::new()
            }
        }
    }

    fn report(&mut self, message: String) {
        warn!(tag = %self.owner, subject = %self.subject.id(), "{message}");
        self.services
            .tags
            .set_constraint_error(self.owner, Some(message.clone()));
        self.diagnostics.push(message);
    }
}

fn compare(function: Function, a: f64, b: f64) -> bool {
    match function {
        Function::IsGe => a >= b,
        Function::IsGt => a > b,
        Function::IsLe => a <= b,
        Function::IsLt => a < b,
        Function::IsEq => a == b,
        Function::IsNeq => a != b,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraint::parser::{Compiler, compile};
    use crate::subject::{ConfigSource, MemoryConfig, MemorySubject, MemoryTagStore, SubjectRecord};
    use crate::testing::{Fixture, at_hours_ago};
    use chrono::Duration as ChronoDuration;
    use std::time::Duration;

    fn eval_with(fixture: &Fixture, text: &str, record: SubjectRecord) -> (bool, Vec<String>) {
        let subject = MemorySubject::new(record);
        let tags = fixture.store.tags_of(subject.id());
        let compiled = Compiler::new()
            .with_tags(fixture.store.as_ref())
            .compile(text)
            .unwrap();
        let mut evaluator = Evaluator::new(&fixture.services, TagId(0), subject.as_ref(), &tags);
        let result = evaluator.condition(&compiled.expr);
        (result, evaluator.diagnostics().to_vec())
    }

    fn eval(text: &str, record: SubjectRecord) -> bool {
        eval_with(&Fixture::new(), text, record).0
    }

    #[test]
    fn test_true_matches_everything() {
        assert!(eval("true", SubjectRecord::new(1, "a")));
        assert!(!eval("false", SubjectRecord::new(1, "a")));
    }

    #[test]
    fn test_negated_conjunction_example() {
        let fixture = Fixture::with_tags(&["A", "B", "C"]);
        let text = r#"!(hasTag("A") && hasTag("B")) || hasTag("C")"#;

        fixture.tag(1, "C");
        assert!(eval_with(&fixture, text, SubjectRecord::new(1, "only c")).0);

        fixture.tag(2, "A");
        fixture.tag(2, "B");
        assert!(!eval_with(&fixture, text, SubjectRecord::new(2, "a and b")).0);
    }

    #[test]
    fn test_unbounded_share_ratio() {
        let mut record = SubjectRecord::new(1, "a");
        record.stats.share_ratio = None;
        assert!(eval("shareratio >= 2.0", record.clone()));
        assert!(eval("shareratio >= 1000000", record));
    }

    #[test]
    fn test_age_in_days() {
        let mut old = SubjectRecord::new(1, "old");
        old.timeline.added = Some(at_hours_ago(8 * 24));
        assert!(eval("age > daysToSeconds(7)", old));

        let mut new = SubjectRecord::new(2, "new");
        new.timeline.added = Some(at_hours_ago(1));
        assert!(!eval("age > daysToSeconds(7)", new));
    }

    #[test]
    fn test_seed_peer_ratio() {
        let mut record = SubjectRecord::new(1, "a");
        assert!(eval("seedpeerratio == 0", record.clone()));

        record.swarm.connected_seeds = 3;
        assert!(eval("seedpeerratio == ∞", record.clone()));

        record.swarm.connected_peers = 2;
        assert!(eval("seedpeerratio == 1.5", record));
    }

    #[test]
    fn test_peer_count_uses_peers() {
        let mut record = SubjectRecord::new(1, "a");
        record.swarm.connected_seeds = 10;
        record.swarm.connected_peers = 2;
        assert!(eval("peercount == 2", record.clone()));
        assert!(eval("seedcount == 10", record));
    }

    #[test]
    fn test_idle_never_is_unbounded() {
        let record = SubjectRecord::new(1, "a");
        assert!(eval("upidle > weeksToSeconds(1000)", record.clone()));
        assert!(eval("lastactive > weeksToSeconds(1000)", record.clone()));
        assert!(eval("availability < 0", record));
    }

    #[test]
    fn test_state_predicates() {
        let mut record = SubjectRecord::new(1, "a");
        record.state = SubjectState::Seeding;
        record.rechecking = true;
        assert!(eval("isChecking()", record.clone()));

        record.state = SubjectState::Stopped;
        record.paused = true;
        assert!(!eval("isStopped()", record.clone()));
        assert!(eval("isPaused()", record));
    }

    #[test]
    fn test_name_and_file_matching() {
        let mut record = SubjectRecord::new(1, "Ubuntu 24.04 Desktop");
        record.files = vec!["dir/sample.mkv".into(), "dir/movie.mkv".into()];

        assert!(eval(r#"matches(name, "ubuntu.*desktop")"#, record.clone()));
        assert!(eval(r#"contains(file_names, "sample")"#, record.clone()));
        assert!(!eval(r#"contains(name, "sample")"#, record.clone()));
        assert!(eval(r#"matches(filenames, "^movie\.mkv$")"#, record));
    }

    #[test]
    fn test_matches_memo_reuses_file_names() {
        let fixture = Fixture::new();
        let mut record = SubjectRecord::new(7, "a");
        record.files = vec!["x.iso".into()];
        let subject = MemorySubject::new(record);
        let compiled = compile(r#"matches(file_names, "\.iso$")"#).unwrap();

        for _ in 0..2 {
            let mut evaluator = Evaluator::new(&fixture.services, TagId(0), subject.as_ref(), &[]);
            assert!(evaluator.condition(&compiled.expr));
        }

        let Expr::Call(call) = &*compiled.expr else {
            panic!("expected a call");
        };
        let memo = call.memo(SubjectId(7)).unwrap();
        assert!(Arc::ptr_eq(&memo.values, &fixture.services.file_names(subject.as_ref())));
    }

    #[test]
    fn test_invalid_pattern_is_false() {
        assert!(!eval(r#"matches(name, "([")"#, SubjectRecord::new(1, "(")));
    }

    #[test]
    fn test_unknown_keyword_reports_and_yields_zero() {
        let fixture = Fixture::new();
        let (result, diagnostics) = eval_with(&fixture, "bogus == 0", SubjectRecord::new(1, "a"));
        assert!(result);
        assert_eq!(diagnostics, vec!["Invalid constraint keyword: bogus".to_string()]);
        assert_eq!(
            fixture.store.constraint_error(TagId(0)).as_deref(),
            Some("Invalid constraint keyword: bogus")
        );
    }

    #[test]
    fn test_count_tag() {
        let fixture = Fixture::with_tags(&["Big"]);
        fixture.tag(1, "Big");
        fixture.tag(2, "Big");
        assert!(eval_with(&fixture, r#"countTag("Big") == 2"#, SubjectRecord::new(3, "c")).0);
    }

    #[test]
    fn test_get_config_reads_source() {
        let config = Arc::new(MemoryConfig::new());
        config.set_float("Stop Ratio", 1.5);
        let store: Arc<MemoryTagStore> = Arc::new(MemoryTagStore::new());
        let services = Services::new(
            store,
            None,
            Arc::new(SettingsCache::new(
                Some(config as Arc<dyn ConfigSource>),
                Duration::from_secs(60),
            )),
        );
        let compiled =
            compile(r#"shareratio > getConfig("queue.seeding.ignore.share.ratio")"#).unwrap();

        let mut record = SubjectRecord::new(1, "a");
        record.stats.share_ratio = Some(2.0);
        let subject = MemorySubject::new(record);
        let mut evaluator = Evaluator::new(&services, TagId(0), subject.as_ref(), &[]);
        assert!(evaluator.condition(&compiled.expr));
    }

    #[test]
    fn test_time_of_day_keywords() {
        let fixture = Fixture::new();
        let subject = MemorySubject::new(SubjectRecord::new(1, "a"));
        let now = Utc::now();
        let local = now.with_timezone(&Local);
        let text = format!(
            "hourofday == {} && minofhour == {} && dayofweek == {}",
            local.hour(),
            local.minute(),
            local.weekday().number_from_sunday()
        );
        let compiled = compile(&text).unwrap();
        let mut evaluator = Evaluator::new(&fixture.services, TagId(0), subject.as_ref(), &[]).at(now);
        assert!(evaluator.condition(&compiled.expr));
    }

    #[test]
    fn test_flag_predicates() {
        let set: [(&str, fn(&mut SubjectRecord)); 4] = [
            ("isForceStart()", |r| r.force_start = true),
            ("isLowNoise()", |r| r.low_noise = true),
            ("canArchive()", |r| r.can_archive = true),
            ("isMagnet()", |r| r.magnet = true),
        ];
        for (text, flag) in set {
            let mut record = SubjectRecord::new(1, "a");
            assert!(!eval(text, record.clone()), "{text} on a plain subject");
            flag(&mut record);
            assert!(eval(text, record), "{text} with its flag set");
        }
    }

    #[test]
    fn test_has_tag_group() {
        let fixture = Fixture::with_tags(&["Movies", "Loose"]);
        fixture
            .store
            .update_tag(fixture.id("Movies"), |t| t.group = Some("Media".to_string()));
        fixture.tag(1, "Movies");
        fixture.tag(2, "Loose");

        let text = r#"hasTagGroup("Media")"#;
        assert!(eval_with(&fixture, text, SubjectRecord::new(1, "grouped")).0);
        assert!(!eval_with(&fixture, text, SubjectRecord::new(2, "ungrouped")).0);
        assert!(!eval_with(&fixture, r#"hasTagGroup("Other")"#, SubjectRecord::new(1, "grouped")).0);
    }

    #[test]
    fn test_size_in_gigabytes() {
        let mut record = SubjectRecord::new(1, "a");
        record.size = 5 * 1024 * 1024 * 1024 + 1;
        assert!(eval("sizegb == 5", record.clone()));

        record.size = 1024 * 1024 * 1024 - 1;
        assert!(eval("sizegb == 0", record));
    }

    #[test]
    fn test_completed_age() {
        let mut record = SubjectRecord::new(1, "a");
        assert!(eval("completedage == 0", record.clone()));

        record.timeline.completed = Some(at_hours_ago(3));
        assert!(eval("completedage > h2s(2) && completedage < h2s(4)", record));
    }

    #[test]
    fn test_tag_age_of_owning_tag() {
        let fixture = Fixture::with_tags(&["Old"]);
        let old = fixture.id("Old");
        let subject = MemorySubject::new(SubjectRecord::new(1, "a"));
        let compiled = compile("tagage > h2s(2)").unwrap();

        let check = |owner: TagId| {
            let later = Utc::now() + ChronoDuration::hours(3);
            let mut evaluator =
                Evaluator::new(&fixture.services, owner, subject.as_ref(), &[]).at(later);
            evaluator.condition(&compiled.expr)
        };

        assert!(!check(old));
        fixture.tag(1, "Old");
        assert!(check(old));
        assert!(!check(TagId(0)));
    }

    #[test]
    fn test_resume_in_counts_down() {
        let mut record = SubjectRecord::new(1, "a");
        record.timeline.resume_at = Some(Utc::now() + ChronoDuration::hours(2));
        assert!(eval("resumein > h2s(1) && resumein <= h2s(2)", record.clone()));

        record.timeline.resume_at = Some(at_hours_ago(1));
        assert!(eval("resumein == 0", record));
    }

    #[test]
    fn test_script_hook_results() {
        use crate::testing::ScriptedHook;

        let fixture = Fixture::new().with_script(ScriptedHook::default());
        let subject = MemorySubject::new(SubjectRecord::new(1, "a"));

        let check = |text: &str| {
            let compiled = compile(text).unwrap();
            let mut evaluator = Evaluator::new(&fixture.services, TagId(0), subject.as_ref(), &[]);
            let result = evaluator.condition(&compiled.expr);
            (result, evaluator.diagnostics().to_vec())
        };

        assert_eq!(check(r#"javascript("true")"#), (true, vec![]));
        assert_eq!(check(r#"javascript("42")"#), (false, vec![]));
        let (result, diagnostics) = check(r#"javascript("throw")"#);
        assert!(!result);
        assert_eq!(diagnostics.len(), 1);
    }
}
