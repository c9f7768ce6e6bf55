//! Conflict resolution between local and remote edits.
//!
//! A conflict exists iff both sides changed after `last_synced`. The winner
//! is decided by a pure function of the three timestamps and the user's
//! `push_changes` flag; it never looks at content.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Which side's content survives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Winner {
    /// Both sides unchanged since the last sync
    None,
    Local,
    Remote,
}

/// Recorded outcome of a conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    RemoteWins,
    LocalWins,
}

/// A task changed on both sides since its last sync.
///
/// Both timestamps are kept so the decision can be audited after the
/// losing side has been overwritten.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Conflict {
    /// Task file name
    pub file: String,
    pub task_id: String,
    pub local_updated: DateTime<Utc>,
    pub remote_updated: DateTime<Utc>,
    pub last_synced: DateTime<Utc>,
    pub resolution: Resolution,
}

/// True iff both sides changed after `last_synced`
pub fn is_conflict(
    local_updated: DateTime<Utc>,
    remote_updated: DateTime<Utc>,
    last_synced: DateTime<Utc>,
) -> bool {
    local_updated > last_synced && remote_updated > last_synced
}

/// Pick the winner for one task.
///
/// | local changed | remote changed | push_changes | winner |
/// |---|---|---|---|
/// | no  | no  | any   | none   |
/// | yes | no  | any   | local  |
/// | no  | yes | any   | remote |
/// | yes | yes | false | remote |
/// | yes | yes | true  | local  |
pub fn resolve(
    local_updated: DateTime<Utc>,
    remote_updated: DateTime<Utc>,
    last_synced: DateTime<Utc>,
    push_changes: bool,
) -> Winner {
    let local_changed = local_updated > last_synced;
    let remote_changed = remote_updated > last_synced;

    match (local_changed, remote_changed) {
        (false, false) => Winner::None,
        (true, false) => Winner::Local,
        (false, true) => Winner::Remote,
        (true, true) if push_changes => Winner::Local,
        (true, true) => Winner::Remote,
    }
}

impl Winner {
    /// Resolution to record when this winner settles a conflict
    pub fn resolution(self) -> Option<Resolution> {
        match self {
            Winner::Local => Some(Resolution::LocalWins),
            Winner::Remote => Some(Resolution::RemoteWins),
            Winner::None => None,
        }
    }
}
