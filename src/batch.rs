//! One-shot rule application
//!
//! Loads a rule set and a subject snapshot into the in-memory collaborators,
//! runs the engine's initial pass to completion and reports where every
//! subject ended up.

use crate::AutotagError;
use crate::config::{EngineConfig, RuleSet};
use crate::scheduler::Engine;
use crate::subject::{
    MemorySubject, MemorySubjects, MemoryTagStore, SubjectId, SubjectRecord, SubjectSource,
    TagId, TagInfo, TagStore,
};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::info;

/// Tags a subject carries after the pass
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SubjectTags {
    pub id: u64,
    pub name: String,
    pub tags: Vec<String>,
}

/// A tag whose constraint reported a problem
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Diagnostic {
    pub tag: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct Report {
    pub subjects: Vec<SubjectTags>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Parse a JSON array of subjects
///
/// # Errors
///
/// Returns `AutotagError::Json` if the text is not a valid subject list.
pub fn parse_subjects(json: &str) -> Result<Vec<SubjectRecord>, AutotagError> {
    Ok(serde_json::from_str(json)?)
}

/// Run `rules` over `records` and report the resulting membership
///
/// # Errors
///
/// Returns `AutotagError::InvalidInput` if two subjects share an id or a
/// subject starts out with a tag the rules do not declare, and
/// `AutotagError::Io` if the engine cannot start.
pub fn apply_rules(
    rules: &RuleSet,
    records: Vec<SubjectRecord>,
    config: EngineConfig,
) -> Result<Report, AutotagError> {
    let store = Arc::new(MemoryTagStore::new());
    for (i, rule) in rules.tags.iter().enumerate() {
        let mut info = TagInfo::new(tag_id(i), rule.name.clone());
        info.group.clone_from(&rule.group);
        info.has_actions = rule.actions;
        info.max_members = rule.max_members;
        store.insert_tag(info);
    }

    let subjects = Arc::new(MemorySubjects::new());
    let mut seen = HashSet::new();
    for record in records {
        if !seen.insert(record.id) {
            return Err(AutotagError::InvalidInput(format!(
                "Subject id {} appears more than once",
                record.id
            )));
        }
        for name in &record.tags {
            let tag = store.id_of(name).ok_or_else(|| {
                AutotagError::InvalidInput(format!(
                    "Subject '{}' carries undeclared tag '{name}'",
                    record.name
                ))
            })?;
            store.add(tag, SubjectId(record.id));
        }
        subjects.insert(MemorySubject::new(record));
    }

    let engine = Engine::builder(
        Arc::clone(&subjects) as Arc<dyn SubjectSource>,
        Arc::clone(&store) as Arc<dyn TagStore>,
    )
    .config(config)
    .build()?;

    for (i, rule) in rules.tags.iter().enumerate() {
        if let Some(text) = &rule.constraint {
            engine.set_constraint(tag_id(i), text, &rule.options, rule.enabled);
        }
    }
    engine.initialise();
    engine.flush();
    engine.stop();
    drop(engine);

    let report = Report {
        subjects: subjects
            .subjects()
            .iter()
            .map(|subject| {
                let mut tags: Vec<String> = store
                    .tags_of(subject.id())
                    .into_iter()
                    .map(|t| t.name)
                    .collect();
                tags.sort();
                SubjectTags {
                    id: subject.id().0,
                    name: subject.display_name(),
                    tags,
                }
            })
            .collect(),
        diagnostics: store
            .all_tags()
            .into_iter()
            .filter_map(|t| {
                store.constraint_error(t.id).map(|message| Diagnostic {
                    tag: t.name,
                    message,
                })
            })
            .collect(),
    };
    info!(
        subjects = report.subjects.len(),
        diagnostics = report.diagnostics.len(),
        "rules applied"
    );
    Ok(report)
}

fn tag_id(index: usize) -> TagId {
    TagId(u32::try_from(index + 1).unwrap_or(u32::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TagRule;

    fn rule(name: &str, constraint: Option<&str>) -> TagRule {
        TagRule {
            name: name.to_string(),
            group: None,
            actions: false,
            max_members: 0,
            constraint: constraint.map(str::to_string),
            options: String::new(),
            enabled: true,
        }
    }

    #[test]
    fn test_parse_subjects() {
        let records = parse_subjects(r#"[{"id": 1, "name": "a", "size": 5}, {"id": 2}]"#).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].size, 5);
        assert!(parse_subjects("{").is_err());
    }

    #[test]
    fn test_apply_rules() {
        let rules = RuleSet {
            tags: vec![
                rule("Big", Some("size > 100")),
                rule("Broken", Some("isBogus()")),
                rule("Manual", None),
            ],
        };
        let mut big = SubjectRecord::new(1, "big");
        big.size = 500;
        let mut small = SubjectRecord::new(2, "small");
        small.tags = vec!["Manual".to_string(), "Big".to_string()];

        let report = apply_rules(&rules, vec![big, small], EngineConfig::default()).unwrap();

        assert_eq!(report.subjects[0].tags, vec!["Big".to_string()]);
        assert_eq!(report.subjects[1].tags, vec!["Manual".to_string()]);
        assert_eq!(report.diagnostics.len(), 1);
        assert_eq!(report.diagnostics[0].tag, "Broken");
    }

    #[test]
    fn test_undeclared_initial_tag_is_rejected() {
        let rules = RuleSet::default();
        let mut record = SubjectRecord::new(1, "a");
        record.tags = vec!["Nope".to_string()];
        assert!(matches!(
            apply_rules(&rules, vec![record], EngineConfig::default()),
            Err(AutotagError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_duplicate_subject_ids_are_rejected() {
        let records = vec![SubjectRecord::new(1, "a"), SubjectRecord::new(1, "b")];
        assert!(apply_rules(&RuleSet::default(), records, EngineConfig::default()).is_err());
    }
}
