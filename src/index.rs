//! Tracking index of remote items seen on earlier passes.
//!
//! Sync records live in task frontmatter, so once a file is deleted its
//! record is gone with it. The index keeps the last known file name and
//! record per remote id so a deletion can still be detected, and so the
//! `close_on_github` flag set before the deletion is honoured.
//!
//! It also holds issues whose create only partly succeeded. Their files stay
//! unlinked until a pull finds the issue on the board and adopts it.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::storage::Storage;
use crate::task::SyncRecord;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub file_name: String,
    pub record: SyncRecord,
}

/// An issue that exists remotely but whose create did not finish
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unreconciled {
    /// Local file the issue was created from
    pub file_name: String,
    pub repository: String,
    pub issue_number: u64,
    pub step: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingIndex {
    #[serde(default)]
    pub entries: BTreeMap<String, IndexEntry>,
    /// Keyed by issue node id
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub unreconciled: BTreeMap<String, Unreconciled>,
}

impl TrackingIndex {
    pub fn load(storage: &Storage) -> Result<Self> {
        storage.read_json_or_default(&storage.index_file())
    }

    pub fn save(&self, storage: &Storage) -> Result<()> {
        storage.write_json(&storage.index_file(), self)
    }

    /// Record (or refresh) the entry for a tracked file
    pub fn track(&mut self, file_name: impl Into<String>, record: &SyncRecord) {
        self.entries.insert(
            record.remote.remote_id().to_string(),
            IndexEntry {
                file_name: file_name.into(),
                record: record.clone(),
            },
        );
    }

    pub fn untrack(&mut self, remote_id: &str) -> Option<IndexEntry> {
        self.entries.remove(remote_id)
    }

    pub fn get(&self, remote_id: &str) -> Option<&IndexEntry> {
        self.entries.get(remote_id)
    }

    /// Remember a partial create so the file is not created again
    pub fn hold(&mut self, issue_node_id: impl Into<String>, held: Unreconciled) {
        self.unreconciled.insert(issue_node_id.into(), held);
    }

    /// Partial create recorded for a local file, with the issue node id
    pub fn held_for_file(&self, file_name: &str) -> Option<(&str, &Unreconciled)> {
        self.unreconciled
            .iter()
            .find(|(_, held)| held.file_name == file_name)
            .map(|(node_id, held)| (node_id.as_str(), held))
    }

    /// Take the partial create for an issue that has shown up on the board
    pub fn adopt(&mut self, issue_node_id: &str) -> Option<Unreconciled> {
        self.unreconciled.remove(issue_node_id)
    }
}
