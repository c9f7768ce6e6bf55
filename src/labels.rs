//! Label mapping for type and priority.
//!
//! On pull, any configured alias is recognised. On push, only the canonical
//! alias (the first one listed) is ever written, and the diff is minimal:
//! labels outside the type/priority tables are never removed.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::config::LabelsConfig;
use crate::task::Task;

/// Type, priority and remaining tags read from a remote label set
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelClassification {
    pub task_type: Option<String>,
    pub priority: Option<String>,
    pub tags: BTreeSet<String>,
}

/// Labels to add and remove on the remote item
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LabelDiff {
    pub add: BTreeSet<String>,
    pub remove: BTreeSet<String>,
}

impl LabelDiff {
    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.remove.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct LabelDiffer<'a> {
    config: &'a LabelsConfig,
}

/// Key in `table` whose aliases include `label`
fn key_for<'t>(table: &'t BTreeMap<String, Vec<String>>, label: &str) -> Option<&'t str> {
    table
        .iter()
        .find(|(_, aliases)| aliases.iter().any(|alias| alias.eq_ignore_ascii_case(label)))
        .map(|(key, _)| key.as_str())
}

fn contains_ignore_case(labels: &[String], wanted: &str) -> bool {
    labels.iter().any(|label| label.eq_ignore_ascii_case(wanted))
}

impl<'a> LabelDiffer<'a> {
    pub fn new(config: &'a LabelsConfig) -> Self {
        Self { config }
    }

    /// Every canonical label, for remote validation
    pub fn canonical_labels(&self) -> Vec<&'a str> {
        self.config
            .types
            .values()
            .chain(self.config.priorities.values())
            .filter_map(|aliases| aliases.first().map(String::as_str))
            .collect()
    }

    /// Split remote labels into type, priority and plain tags.
    ///
    /// With several matching aliases the first key in table order wins.
    pub fn classify(&self, labels: &[String]) -> LabelClassification {
        let mut result = LabelClassification::default();
        let mut type_keys = BTreeSet::new();
        let mut priority_keys = BTreeSet::new();

        for label in labels {
            if let Some(key) = key_for(&self.config.types, label) {
                type_keys.insert(key);
            } else if let Some(key) = key_for(&self.config.priorities, label) {
                priority_keys.insert(key);
            } else {
                result.tags.insert(label.clone());
            }
        }

        result.task_type = type_keys.first().map(|key| key.to_string());
        result.priority = priority_keys
            .first()
            .map(|key| key.to_string())
            .or_else(|| self.config.default_priority.clone());
        result
    }

    /// Labels a newly created issue should carry
    pub fn labels_for(&self, task: &Task) -> BTreeSet<String> {
        self.diff(&[], task).add
    }

    /// Minimal change from `current` remote labels to match `task`.
    ///
    /// An alias of the wanted key already on the item is kept as is.
    /// Aliases of other keys in the same table are removed. Tags missing
    /// remotely are added; nothing outside the alias tables is removed.
    pub fn diff(&self, current: &[String], task: &Task) -> LabelDiff {
        let mut diff = LabelDiff::default();
        diff_category(
            &self.config.types,
            task.task_type.as_deref(),
            current,
            &mut diff,
        );
        diff_category(
            &self.config.priorities,
            task.priority.as_deref(),
            current,
            &mut diff,
        );

        for tag in &task.tags {
            let is_alias = key_for(&self.config.types, tag).is_some()
                || key_for(&self.config.priorities, tag).is_some();
            if !is_alias && !contains_ignore_case(current, tag) {
                diff.add.insert(tag.clone());
            }
        }
        diff
    }
}

fn canonical<'t>(table: &'t BTreeMap<String, Vec<String>>, key: &str) -> Option<&'t str> {
    table
        .iter()
        .find(|(candidate, _)| candidate.eq_ignore_ascii_case(key))
        .and_then(|(_, aliases)| aliases.first())
        .map(String::as_str)
}

fn diff_category(
    table: &BTreeMap<String, Vec<String>>,
    wanted: Option<&str>,
    current: &[String],
    diff: &mut LabelDiff,
) {
    let wanted_key = wanted.and_then(|value| {
        table
            .keys()
            .find(|key| key.eq_ignore_ascii_case(value))
            .map(String::as_str)
    });

    if wanted.is_some() && wanted_key.is_none() {
        tracing::warn!(value = wanted, "no label mapping configured; leaving labels as is");
        return;
    }

    let mut satisfied = false;
    for label in current {
        match key_for(table, label) {
            Some(key) if Some(key) == wanted_key => satisfied = true,
            Some(_) => {
                diff.remove.insert(label.clone());
            }
            None => {}
        }
    }

    if !satisfied {
        if let Some(canonical) = wanted_key.and_then(|key| canonical(table, key)) {
            diff.add.insert(canonical.to_string());
        }
    }
}
