//! Column ordering, persisted apart from task content.
//!
//! `.boardsync/order.json` maps a column id to the file names shown in that
//! column, top to bottom. Entries are keyed by file name, so a rename must
//! rewrite them.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardOrder {
    #[serde(default)]
    pub columns: BTreeMap<String, Vec<String>>,
}

impl BoardOrder {
    /// Replace every entry named `old` with `new`. Returns true if any changed.
    pub fn rename_entry(&mut self, old: &str, new: &str) -> bool {
        let mut changed = false;
        for names in self.columns.values_mut() {
            for name in names.iter_mut().filter(|name| name.as_str() == old) {
                *name = new.to_string();
                changed = true;
            }
        }
        changed
    }

    /// Drop `name` from every column. Returns true if it was present.
    pub fn remove_entry(&mut self, name: &str) -> bool {
        let mut changed = false;
        for names in self.columns.values_mut() {
            let before = names.len();
            names.retain(|entry| entry != name);
            changed |= names.len() != before;
        }
        self.columns.retain(|_, names| !names.is_empty());
        changed
    }

    /// Ensure `name` is listed under `column`, appending it when it is new
    /// there and removing it from any other column. Returns true if changed.
    pub fn place(&mut self, column: &str, name: &str) -> bool {
        if self.position(column, name).is_some() {
            return false;
        }
        self.remove_entry(name);
        self.columns
            .entry(column.to_string())
            .or_default()
            .push(name.to_string());
        true
    }

    pub fn position(&self, column: &str, name: &str) -> Option<usize> {
        self.columns
            .get(column)
            .and_then(|names| names.iter().position(|entry| entry == name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rename_keeps_position() {
        let mut order = BoardOrder::default();
        order.place("todo", "a.md");
        order.place("todo", "fix-login.md");
        order.place("todo", "c.md");

        assert!(order.rename_entry("fix-login.md", "owner-repo#42-fix-login.md"));
        assert_eq!(order.position("todo", "owner-repo#42-fix-login.md"), Some(1));
        assert_eq!(order.position("todo", "fix-login.md"), None);
        assert!(!order.rename_entry("missing.md", "other.md"));
    }

    #[test]
    fn place_moves_between_columns() {
        let mut order = BoardOrder::default();
        order.place("todo", "a.md");
        assert!(!order.place("todo", "a.md"));
        assert!(order.place("done", "a.md"));
        assert_eq!(order.position("done", "a.md"), Some(0));
        assert!(!order.columns.contains_key("todo"));
    }
}
