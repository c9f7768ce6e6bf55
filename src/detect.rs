//! Change detection.
//!
//! Partitions the local board into new, modified, deleted, conflicting and
//! unchanged tasks. Classification is a pure function of the scanned files,
//! a snapshot of remote `updated` timestamps and the tracking index, so it is
//! recomputed from scratch on every pass.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

use crate::conflict::{self, Conflict, Winner};
use crate::error::{Error, Result};
use crate::index::TrackingIndex;
use crate::local::{self, LocalFileStore};
use crate::task::{SyncRecord, Task};

/// A parsed task file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalEntry {
    pub path: PathBuf,
    pub file_name: String,
    pub task: Task,
    pub record: Option<SyncRecord>,
}

impl LocalEntry {
    pub fn remote_id(&self) -> Option<&str> {
        self.record.as_ref().map(|record| record.remote.remote_id())
    }
}

/// A file left out of the pass, with the reason
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub message: String,
}

/// A tracked remote item whose file is gone
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletedEntry {
    pub remote_id: String,
    pub file_name: String,
    pub record: SyncRecord,
}

/// A file changed on both sides, and how it resolves
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictEntry {
    pub entry: LocalEntry,
    pub conflict: Conflict,
}

/// Disjoint classification of one pass. Each scanned file lands in exactly
/// one of the file lists or in `skipped`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    /// Never pushed
    pub new_files: Vec<LocalEntry>,
    /// Changed locally since the last sync; remote unchanged
    pub modified_files: Vec<LocalEntry>,
    /// Tracked, but the file is gone
    pub deleted_files: Vec<DeletedEntry>,
    /// Changed on both sides
    pub conflicts: Vec<ConflictEntry>,
    /// Changed remotely only; a pull will refresh it
    pub remote_changed: Vec<LocalEntry>,
    pub unchanged: Vec<LocalEntry>,
    pub skipped: Vec<SkippedFile>,
}

/// Read every task file, skipping the unreadable ones.
///
/// A second file carrying a remote id already claimed by an earlier file
/// (in scan order) is skipped too.
pub fn load_entries(store: &LocalFileStore) -> Result<(Vec<LocalEntry>, Vec<SkippedFile>)> {
    let mut entries = Vec::new();
    let mut skipped = Vec::new();
    let mut claimed: HashMap<String, String> = HashMap::new();

    for path in store.scan()? {
        let file_name = local::file_name_of(&path);
        let (task, record) = match store.read(&path) {
            Ok(parsed) => parsed,
            Err(Error::TaskNotFound(_)) => continue,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "skipping task file");
                let message = match err {
                    Error::Validation { message, .. } => message,
                    other => other.to_string(),
                };
                skipped.push(SkippedFile { path, message });
                continue;
            }
        };

        if let Some(remote_id) = record.as_ref().map(|r| r.remote.remote_id().to_string()) {
            if let Some(first) = claimed.get(&remote_id) {
                warn!(path = %path.display(), first = %first, "duplicate remote id");
                skipped.push(SkippedFile {
                    message: format!("tracks the same remote item as {first}"),
                    path,
                });
                continue;
            }
            claimed.insert(remote_id, file_name.clone());
        }

        entries.push(LocalEntry {
            path,
            file_name,
            task,
            record,
        });
    }

    Ok((entries, skipped))
}

/// Classify `entries`.
///
/// `remote_updated` maps remote ids to their current `updated` timestamp.
/// An id missing from it counts as unchanged remotely.
pub fn detect(
    entries: Vec<LocalEntry>,
    skipped: Vec<SkippedFile>,
    remote_updated: &HashMap<String, DateTime<Utc>>,
    index: &TrackingIndex,
) -> ChangeSet {
    let mut changes = ChangeSet::default();
    let mut present: HashSet<String> = HashSet::new();

    for entry in entries {
        let Some(record) = entry.record.clone() else {
            changes.new_files.push(entry);
            continue;
        };
        let remote_id = record.remote.remote_id().to_string();
        present.insert(remote_id.clone());

        let local_updated = entry.task.updated;
        let remote_updated = remote_updated
            .get(&remote_id)
            .copied()
            .unwrap_or(record.last_synced);

        let winner = conflict::resolve(
            local_updated,
            remote_updated,
            record.last_synced,
            record.push_changes,
        );

        if conflict::is_conflict(local_updated, remote_updated, record.last_synced) {
            if let Some(resolution) = winner.resolution() {
                let conflict = Conflict {
                    file: entry.file_name.clone(),
                    task_id: entry.task.id.clone(),
                    local_updated,
                    remote_updated,
                    last_synced: record.last_synced,
                    resolution,
                };
                changes.conflicts.push(ConflictEntry { entry, conflict });
                continue;
            }
        }

        match winner {
            Winner::Local => changes.modified_files.push(entry),
            Winner::Remote => changes.remote_changed.push(entry),
            Winner::None => changes.unchanged.push(entry),
        }
    }

    // A malformed file still exists on disk; it is not a deletion.
    let unreadable: HashSet<String> = skipped
        .iter()
        .map(|file| local::file_name_of(&file.path))
        .collect();

    for (remote_id, tracked) in &index.entries {
        if present.contains(remote_id) || unreadable.contains(&tracked.file_name) {
            continue;
        }
        changes.deleted_files.push(DeletedEntry {
            remote_id: remote_id.clone(),
            file_name: tracked.file_name.clone(),
            record: tracked.record.clone(),
        });
    }

    changes.skipped = skipped;
    changes
}
