//! Integration tests for autotag
//!
//! These tests drive the engine through its public API with the in-memory
//! collaborators, and run rule files end to end.

use autotag::batch;
use autotag::config::{EngineConfig, RuleSet};
use autotag::subject::{
    MemorySubject, MemorySubjects, MemoryTagStore, Mutation, SubjectId, SubjectRecord,
    SubjectRef, SubjectSource, TagId, TagInfo, TagStore, Timeline,
};
use autotag::Engine;
use chrono::{Duration as ChronoDuration, Utc};
use std::io::Write;
use std::sync::Arc;

struct Harness {
    store: Arc<MemoryTagStore>,
    subjects: Arc<MemorySubjects>,
    engine: Engine,
}

impl Harness {
    fn new(tags: &[&str]) -> Self {
        let store = Arc::new(MemoryTagStore::new());
        for (i, name) in tags.iter().enumerate() {
            store.insert_tag(TagInfo::new(TagId(i as u32 + 1), *name));
        }
        let subjects = Arc::new(MemorySubjects::new());
        let engine = Engine::builder(
            Arc::clone(&subjects) as Arc<dyn SubjectSource>,
            Arc::clone(&store) as Arc<dyn TagStore>,
        )
        .build()
        .unwrap();
        Self {
            store,
            subjects,
            engine,
        }
    }

    fn tag(&self, name: &str) -> TagId {
        self.store.id_of(name).unwrap()
    }

    fn add_subject(&self, record: SubjectRecord) -> Arc<MemorySubject> {
        let subject = MemorySubject::new(record);
        self.subjects.insert(Arc::clone(&subject));
        subject
    }

    fn tags_of(&self, id: u64) -> Vec<String> {
        let mut names: Vec<String> = self
            .store
            .tags_of(SubjectId(id))
            .into_iter()
            .map(|t| t.name)
            .collect();
        names.sort();
        names
    }
}

fn sized(id: u64, size: u64) -> SubjectRecord {
    let mut record = SubjectRecord::new(id, format!("subject {id}"));
    record.size = size;
    record
}

fn toml_file(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn test_true_matches_every_subject() {
    let h = Harness::new(&["All"]);
    for id in 1..=3 {
        h.add_subject(sized(id, 0));
    }
    h.engine.set_constraint(h.tag("All"), "true", "", true);
    h.engine.initialise();
    h.engine.flush();

    assert_eq!(h.store.member_count(h.tag("All")), 3);
}

#[test]
fn test_negated_tag_logic() {
    let h = Harness::new(&["A", "B", "C", "Rule"]);
    h.add_subject(sized(1, 0));
    h.add_subject(sized(2, 0));
    h.store.add(h.tag("C"), SubjectId(1));
    h.store.add(h.tag("A"), SubjectId(2));
    h.store.add(h.tag("B"), SubjectId(2));

    h.engine.set_constraint(
        h.tag("Rule"),
        r#"!(hasTag("A") && hasTag("B")) || hasTag("C")"#,
        "",
        true,
    );
    h.engine.initialise();
    h.engine.flush();

    assert!(h.store.is_tagged(h.tag("Rule"), SubjectId(1)));
    assert!(!h.store.is_tagged(h.tag("Rule"), SubjectId(2)));
}

#[test]
fn test_age_in_days() {
    let h = Harness::new(&["Old"]);
    let mut old = sized(1, 0);
    old.timeline = Timeline {
        added: Some(Utc::now() - ChronoDuration::days(8)),
        ..Timeline::default()
    };
    let mut fresh = sized(2, 0);
    fresh.timeline = Timeline {
        added: Some(Utc::now() - ChronoDuration::hours(1)),
        ..Timeline::default()
    };
    h.add_subject(old);
    h.add_subject(fresh);

    h.engine.set_constraint(h.tag("Old"), "age > daysToSeconds(7)", "", true);
    h.engine.initialise();
    h.engine.flush();

    assert_eq!(h.tags_of(1), vec!["Old".to_string()]);
    assert!(h.tags_of(2).is_empty());
}

#[test]
fn test_dependent_tags_resolve_in_one_pass() {
    let h = Harness::new(&["Foo", "Bar"]);
    h.store.update_tag(h.tag("Foo"), |t| t.has_actions = true);
    h.engine.set_constraint(h.tag("Foo"), r#"hasTag("Bar")"#, "", true);
    h.engine.set_constraint(h.tag("Bar"), "size > 1000", "", true);
    h.engine.initialise();
    h.engine.flush();

    let subject = h.add_subject(sized(1, 2000));
    h.engine.subject_created(subject as SubjectRef);
    h.engine.flush();

    assert_eq!(h.tags_of(1), vec!["Bar".to_string(), "Foo".to_string()]);
    assert_eq!(h.engine.depends_on_tags(h.tag("Foo")), vec![h.tag("Bar")]);
}

#[test]
fn test_mutually_referencing_tags_terminate() {
    let h = Harness::new(&["Foo", "Bar"]);
    h.store.update_tag(h.tag("Foo"), |t| t.max_members = 10);
    h.store.update_tag(h.tag("Bar"), |t| t.max_members = 10);
    h.engine.set_constraint(h.tag("Foo"), r#"hasTag("Bar") || size > 10"#, "", true);
    h.engine.set_constraint(h.tag("Bar"), r#"hasTag("Foo")"#, "", true);
    h.engine.initialise();

    let subject = h.add_subject(sized(1, 20));
    h.engine.subject_created(subject as SubjectRef);
    h.engine.flush();

    assert_eq!(h.tags_of(1), vec!["Bar".to_string(), "Foo".to_string()]);
}

#[test]
fn test_cooldown_suppresses_quick_re_add() {
    let h = Harness::new(&["Big"]);
    let big = h.tag("Big");
    let subject = h.add_subject(sized(1, 50));
    h.engine.set_constraint(big, "size > 10", "", true);
    h.engine.initialise();
    h.engine.flush();
    assert!(h.store.is_tagged(big, SubjectId(1)));

    h.store.remove(big, SubjectId(1));
    h.engine.subject_created(Arc::clone(&subject) as SubjectRef);
    h.engine.flush();
    assert!(!h.store.is_tagged(big, SubjectId(1)));

    std::thread::sleep(std::time::Duration::from_millis(1100));
    h.engine.subject_created(subject as SubjectRef);
    h.engine.flush();
    assert!(h.store.is_tagged(big, SubjectId(1)));
}

#[test]
fn test_engine_activates_only_with_constraints() {
    let h = Harness::new(&["Big"]);
    h.add_subject(sized(1, 50));
    h.engine.initialise();
    h.engine.flush();
    assert!(!h.engine.is_active());

    h.engine.set_constraint(h.tag("Big"), "size > 10", "", true);
    assert!(h.engine.is_active());
    h.engine.flush();
    assert!(h.store.is_tagged(h.tag("Big"), SubjectId(1)));

    h.engine.remove_constraint(h.tag("Big"));
    assert!(!h.engine.is_active());
}

#[test]
fn test_pause_defers_then_replays_five_requests() {
    let h = Harness::new(&["All"]);
    let all = h.tag("All");
    h.engine.set_constraint(all, "true", "", true);
    h.engine.initialise();
    h.engine.flush();

    h.engine.set_processing_enabled(false);
    for id in 1..=5 {
        let subject = h.add_subject(sized(id, 0));
        h.engine.subject_created(subject as SubjectRef);
    }
    h.engine.flush();
    assert!(h.store.mutations().is_empty());

    h.engine.set_processing_enabled(true);
    h.engine.flush();
    assert_eq!(
        h.store.mutations(),
        (1..=5)
            .map(|id| Mutation::Added(all, SubjectId(id)))
            .collect::<Vec<_>>()
    );
}

#[test]
fn test_compile_error_reaches_tag_and_clears_on_fix() {
    let h = Harness::new(&["T"]);
    let t = h.tag("T");

    h.engine.set_constraint(t, "isGT(size", "", true);
    assert!(h.store.constraint_error(t).unwrap().starts_with("Invalid constraint"));

    h.engine.set_constraint(t, "isGT(size, 1)", "", true);
    assert_eq!(h.store.constraint_error(t), None);
}

#[test]
fn test_status_reports_activity() {
    let h = Harness::new(&["Seeding"]);
    let seeding = h.tag("Seeding");
    h.engine.set_constraint(seeding, "isComplete()", "", true);

    let status = h.engine.status(seeding, true).unwrap();
    assert!(status.ends_with("/sec, DS=true, DL=static"));
    assert_eq!(h.engine.status(TagId(42), false), None);
}

#[test]
fn test_rules_file_end_to_end() {
    let rules = toml_file(
        r#"
[[tag]]
name = "Large"
constraint = "sizemb >= 100"

[[tag]]
name = "Tor"
constraint = "hasNet(\"tor\")"

[[tag]]
name = "LargeTor"
actions = true
constraint = "hasTag(\"Large\") && hasTag(\"Tor\")"
"#,
    );
    let subjects = r#"[
        {"id": 1, "name": "small", "size": 1024},
        {"id": 2, "name": "big", "size": 209715200, "networks": ["Tor"]},
        {"id": 3, "name": "big public", "size": 209715200}
    ]"#;

    let rules = RuleSet::load(rules.path()).unwrap();
    let records = batch::parse_subjects(subjects).unwrap();
    let report = batch::apply_rules(&rules, records, EngineConfig::default()).unwrap();

    let tags: Vec<(&str, Vec<String>)> = report
        .subjects
        .iter()
        .map(|s| (s.name.as_str(), s.tags.clone()))
        .collect();
    assert_eq!(
        tags,
        vec![
            ("small", vec![]),
            (
                "big",
                vec!["Large".to_string(), "LargeTor".to_string(), "Tor".to_string()]
            ),
            ("big public", vec!["Large".to_string()]),
        ]
    );
    assert!(report.diagnostics.is_empty());
}
