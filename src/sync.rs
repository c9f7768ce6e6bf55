//! Pull and push orchestration.
//!
//! One engine owns one board directory. A pass holds the board lock for its
//! whole duration (dry runs take no lock and write nothing), works item by
//! item, and collects per-item failures into its result instead of stopping.
//! Only fatal errors (auth, store validation) end a pass early.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::conflict::{self, Conflict, Resolution, Winner};
use crate::detect::{self, ChangeSet, LocalEntry, SkippedFile};
use crate::error::{exit_codes, Error, Result};
use crate::index::{TrackingIndex, Unreconciled};
use crate::labels::LabelDiffer;
use crate::local::LocalFileStore;
use crate::lock::FileLock;
use crate::remote::{Filter, IssueDraft, IssueUpdate, RemoteIssue, RemoteIssueStore};
use crate::storage::Storage;
use crate::task::{self, ProviderMetadata, SyncRecord, Task};

/// Set to stop a pass between items
pub type CancelFlag = Arc<AtomicBool>;

#[derive(Debug, Clone, Default)]
pub struct PullOptions {
    /// OR'd; empty means every item on the board
    pub filters: Vec<Filter>,
    pub dry_run: bool,
    /// Remote wins every difference, and tracked files deleted locally are
    /// written again
    pub force: bool,
}

#[derive(Debug, Clone, Default)]
pub struct PushOptions {
    /// Only these files; `None` pushes the whole board
    pub files: Option<Vec<PathBuf>>,
    pub dry_run: bool,
    /// Close remote issues whose files were deleted with `close_on_github`
    pub allow_close: bool,
}

/// A file and the remote issue it maps to
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemRef {
    pub file: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Renamed {
    pub from: String,
    pub to: String,
}

/// One failed item
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemError {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote: Option<String>,
    pub kind: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ItemError {
    fn new(file: Option<&str>, remote: Option<String>, err: &Error) -> Self {
        Self {
            file: file.map(str::to_string),
            remote,
            kind: err.kind(),
            message: err.to_string(),
            details: err.details(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncResult {
    pub created: Vec<ItemRef>,
    pub updated: Vec<ItemRef>,
    /// Both sides changed; the recorded resolution was applied
    pub conflicts: Vec<Conflict>,
    /// Local side won; run `push` to send it
    pub pending_push: Vec<String>,
    /// Tracked items whose files were deleted locally; left alone
    pub missing_locally: Vec<String>,
    pub errors: Vec<ItemError>,
    pub skipped: Vec<SkippedFile>,
    pub dry_run: bool,
    pub cancelled: bool,
    pub aborted: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PushResult {
    pub created: Vec<ItemRef>,
    pub updated: Vec<ItemRef>,
    pub renamed: Vec<Renamed>,
    pub closed: Vec<ItemRef>,
    pub conflicts: Vec<Conflict>,
    /// Changed locally but `push_changes` is not set
    pub held: Vec<String>,
    /// Deleted with `close_on_github`, waiting for confirmation
    pub pending_close: Vec<String>,
    /// Deleted without `close_on_github`; nothing is closed
    pub ignored_deletions: Vec<String>,
    pub errors: Vec<ItemError>,
    pub skipped: Vec<SkippedFile>,
    pub dry_run: bool,
    pub cancelled: bool,
    pub aborted: bool,
}

/// Shared by both pass results
pub trait PassOutcome {
    fn errors(&self) -> &[ItemError];
    fn cancelled(&self) -> bool;
    fn aborted(&self) -> bool;

    /// No failed item and the pass ran to the end
    fn is_clean(&self) -> bool {
        self.errors().is_empty() && !self.cancelled() && !self.aborted()
    }

    fn exit_code(&self) -> i32 {
        if self.cancelled() {
            exit_codes::BLOCKED
        } else if self.aborted() || !self.errors().is_empty() {
            exit_codes::OPERATION_FAILED
        } else {
            exit_codes::SUCCESS
        }
    }
}

macro_rules! pass_outcome {
    ($ty:ty) => {
        impl PassOutcome for $ty {
            fn errors(&self) -> &[ItemError] {
                &self.errors
            }
            fn cancelled(&self) -> bool {
                self.cancelled
            }
            fn aborted(&self) -> bool {
                self.aborted
            }
        }
    };
}

pass_outcome!(SyncResult);
pass_outcome!(PushResult);

/// Change summary without writing anything
#[derive(Debug, Clone, Default, Serialize)]
pub struct StatusReport {
    pub new_files: Vec<String>,
    pub modified_files: Vec<StatusEntry>,
    pub conflicts: Vec<Conflict>,
    pub deleted_files: Vec<StatusEntry>,
    pub remote_changed: Vec<String>,
    pub unchanged: usize,
    pub skipped: Vec<SkippedFile>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusEntry {
    pub file: String,
    pub remote: String,
    /// `push_changes` for modified files, `close_on_github` for deletions
    pub flagged: bool,
}

impl StatusReport {
    fn from_changes(changes: &ChangeSet) -> Self {
        Self {
            new_files: changes.new_files.iter().map(|e| e.file_name.clone()).collect(),
            modified_files: changes
                .modified_files
                .iter()
                .filter_map(|entry| {
                    entry.record.as_ref().map(|record| StatusEntry {
                        file: entry.file_name.clone(),
                        remote: record.remote.display_ref(),
                        flagged: record.push_changes,
                    })
                })
                .collect(),
            conflicts: changes.conflicts.iter().map(|c| c.conflict.clone()).collect(),
            deleted_files: changes
                .deleted_files
                .iter()
                .map(|deleted| StatusEntry {
                    file: deleted.file_name.clone(),
                    remote: deleted.record.remote.display_ref(),
                    flagged: deleted.record.close_on_github,
                })
                .collect(),
            remote_changed: changes
                .remote_changed
                .iter()
                .map(|e| e.file_name.clone())
                .collect(),
            unchanged: changes.unchanged.len(),
            skipped: changes.skipped.clone(),
        }
    }
}

/// Sync engine for one board
pub struct SyncEngine<S> {
    remote: S,
    local: LocalFileStore,
    config: Config,
    cancel: CancelFlag,
}

impl<S: RemoteIssueStore> SyncEngine<S> {
    pub fn new(remote: S, local: LocalFileStore, config: Config) -> Self {
        Self {
            remote,
            local,
            config,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Engine for the board at `storage`, laid out per `config`
    pub fn for_board(remote: S, storage: Storage, config: Config) -> Self {
        let local = LocalFileStore::new(storage, config.board.default_column.clone());
        Self::new(remote, local, config)
    }

    pub fn remote(&self) -> &S {
        &self.remote
    }

    pub fn local(&self) -> &LocalFileStore {
        &self.local
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Handle for stopping a running pass after its current item
    pub fn cancel_flag(&self) -> CancelFlag {
        Arc::clone(&self.cancel)
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    fn labels(&self) -> LabelDiffer<'_> {
        LabelDiffer::new(&self.config.labels)
    }

    fn storage(&self) -> &Storage {
        self.local.storage()
    }

    /// Lock the board and clear staging files of an interrupted pass
    fn begin_pass(&self, dry_run: bool) -> Result<Option<FileLock>> {
        if dry_run {
            return Ok(None);
        }
        let lock = self.storage().lock(self.config.board.lock_timeout_ms)?;
        for path in self.local.sweep_temp_files()? {
            warn!(path = %path.display(), "removed staging file of an interrupted write");
        }
        Ok(Some(lock))
    }

    async fn load_local(&self) -> Result<(Vec<LocalEntry>, Vec<SkippedFile>)> {
        let local = self.local.clone();
        tokio::task::spawn_blocking(move || detect::load_entries(&local))
            .await
            .map_err(|err| Error::OperationFailed(format!("local scan failed: {err}")))?
    }

    /// Build the local task for a remote issue. `existing` keeps its id
    /// and creation time.
    fn task_from_remote(&self, issue: &RemoteIssue, existing: Option<&Task>) -> Task {
        let board = &self.config.board;
        let state = match issue.status.as_deref() {
            Some(status) => match board.column_for_status(status) {
                Some(column) => column.to_string(),
                None => {
                    warn!(status, issue = issue.remote.issue_number, "status not mapped to a column");
                    self.fallback_column(issue)
                }
            },
            None => self.fallback_column(issue),
        };

        let labels = self.labels().classify(&issue.labels);
        let mut task = Task::new(issue.title.clone(), state, issue.created);
        if let Some(existing) = existing {
            task.id = existing.id.clone();
            task.created = existing.created;
        }
        task.body = issue.body.clone();
        task.priority = labels.priority;
        task.task_type = labels.task_type;
        task.tags = labels.tags;
        task.updated = issue.updated;
        task.provider = ProviderMetadata::GitHub(issue.remote.clone());
        task
    }

    fn fallback_column(&self, issue: &RemoteIssue) -> String {
        if issue.closed {
            self.config.board.closed_column.clone()
        } else {
            self.config.board.default_column.clone()
        }
    }

    // =========================================================================
    // Pull
    // =========================================================================

    /// Bring remote items into the local board
    pub async fn pull(&self, options: &PullOptions) -> Result<SyncResult> {
        let _lock = self.begin_pass(options.dry_run)?;
        let (items, (entries, skipped)) =
            tokio::try_join!(self.remote.fetch_filtered(&options.filters), self.load_local())?;

        let mut index = TrackingIndex::load(self.storage())?;
        let mut result = SyncResult {
            dry_run: options.dry_run,
            skipped,
            ..SyncResult::default()
        };

        let mut by_remote: HashMap<String, LocalEntry> = HashMap::new();
        let mut drafts: HashMap<String, LocalEntry> = HashMap::new();
        for entry in entries {
            match entry.remote_id() {
                Some(remote_id) => {
                    by_remote.insert(remote_id.to_string(), entry);
                }
                None => {
                    drafts.insert(entry.file_name.clone(), entry);
                }
            }
        }

        for issue in items {
            if self.is_cancelled() {
                result.cancelled = true;
                break;
            }

            let outcome = match by_remote.remove(issue.remote_id()) {
                Some(entry) => self.pull_existing(&issue, entry, options, &mut index, &mut result),
                None => match index.adopt(&issue.remote.issue_node_id) {
                    Some(held) => match drafts.remove(&held.file_name) {
                        Some(draft) => self.adopt_draft(&issue, draft, options, &mut index, &mut result),
                        None => {
                            warn!(file = %held.file_name, "file of a partial create is gone");
                            self.pull_new(&issue, options, &mut index, &mut result)
                        }
                    },
                    None => self.pull_new(&issue, options, &mut index, &mut result),
                },
            };

            if let Err(err) = outcome {
                let fatal = err.is_fatal();
                warn!(issue = %issue.remote.display_ref(), error = %err, "pull item failed");
                result
                    .errors
                    .push(ItemError::new(None, Some(issue.remote.display_ref()), &err));
                if fatal {
                    result.aborted = true;
                    break;
                }
            }
        }

        // Files outside the fetched set stay tracked as they are.
        for entry in by_remote.values() {
            if let Some(record) = &entry.record {
                index.track(entry.file_name.clone(), record);
            }
        }

        if !options.dry_run {
            index.save(self.storage())?;
        }

        info!(
            created = result.created.len(),
            updated = result.updated.len(),
            conflicts = result.conflicts.len(),
            errors = result.errors.len(),
            dry_run = options.dry_run,
            "pull finished"
        );
        Ok(result)
    }

    fn pull_new(
        &self,
        issue: &RemoteIssue,
        options: &PullOptions,
        index: &mut TrackingIndex,
        result: &mut SyncResult,
    ) -> Result<()> {
        if let Some(tracked) = index.get(issue.remote_id()) {
            if self.local.path_for(&tracked.file_name).exists() {
                // Unreadable this pass; already reported as skipped.
                return Ok(());
            }
            if !options.force {
                debug!(file = %tracked.file_name, "tracked file deleted locally; not recreating");
                result.missing_locally.push(tracked.file_name.clone());
                return Ok(());
            }
        }

        let file_name = issue.remote.file_name(&task::slugify(&issue.title));
        let path = self.local.path_for(&file_name);
        if path.exists() {
            return Err(Error::FileExists(path));
        }

        let task = self.task_from_remote(issue, None);
        let record = SyncRecord::new(issue.remote.clone(), issue.updated);

        if !options.dry_run {
            self.local.write(&path, &task, Some(&record))?;
            self.local.place_in_column(&task.state, &file_name)?;
            index.track(file_name.clone(), &record);
        }

        debug!(file = %file_name, "pulled new item");
        result.created.push(ItemRef {
            file: file_name,
            remote: Some(issue.remote.display_ref()),
        });
        Ok(())
    }

    /// Link a file whose create only partly succeeded to its issue, now
    /// that the issue is on the board
    fn adopt_draft(
        &self,
        issue: &RemoteIssue,
        draft: LocalEntry,
        options: &PullOptions,
        index: &mut TrackingIndex,
        result: &mut SyncResult,
    ) -> Result<()> {
        let task = self.task_from_remote(issue, Some(&draft.task));
        let record = SyncRecord::new(issue.remote.clone(), issue.updated);
        let new_name = issue
            .remote
            .file_name(&task::slug_from_file_name(&draft.file_name));

        if !options.dry_run {
            self.local.write(&draft.path, &task, Some(&record))?;
            index.track(draft.file_name.clone(), &record);
            self.local.rename(&draft.file_name, &new_name)?;
            self.local.place_in_column(&task.state, &new_name)?;
            index.track(new_name.clone(), &record);
        }

        info!(from = %draft.file_name, to = %new_name, "adopted partially created issue");
        result.created.push(ItemRef {
            file: new_name,
            remote: Some(issue.remote.display_ref()),
        });
        Ok(())
    }

    fn pull_existing(
        &self,
        issue: &RemoteIssue,
        entry: LocalEntry,
        options: &PullOptions,
        index: &mut TrackingIndex,
        result: &mut SyncResult,
    ) -> Result<()> {
        let Some(mut record) = entry.record.clone() else {
            return Ok(());
        };
        let local_updated = entry.task.updated;
        let last_synced = record.last_synced;

        let mut winner = conflict::resolve(local_updated, issue.updated, last_synced, record.push_changes);
        if options.force && winner == Winner::Local {
            winner = Winner::Remote;
        }

        if conflict::is_conflict(local_updated, issue.updated, last_synced) {
            if let Some(resolution) = winner.resolution() {
                result.conflicts.push(Conflict {
                    file: entry.file_name.clone(),
                    task_id: entry.task.id.clone(),
                    local_updated,
                    remote_updated: issue.updated,
                    last_synced,
                    resolution,
                });
            }
        }

        match winner {
            Winner::None => {
                index.track(entry.file_name, &record);
            }
            Winner::Local => {
                result.pending_push.push(entry.file_name.clone());
                index.track(entry.file_name, &record);
            }
            Winner::Remote => {
                let task = self.task_from_remote(issue, Some(&entry.task));
                record.push_changes = false;
                record.advance(issue.updated);

                if !options.dry_run {
                    self.local.write(&entry.path, &task, Some(&record))?;
                    if task.state != entry.task.state {
                        self.local.place_in_column(&task.state, &entry.file_name)?;
                    }
                    index.track(entry.file_name.clone(), &record);
                }

                debug!(file = %entry.file_name, "refreshed from remote");
                result.updated.push(ItemRef {
                    file: entry.file_name,
                    remote: Some(issue.remote.display_ref()),
                });
            }
        }
        Ok(())
    }

    // =========================================================================
    // Push
    // =========================================================================

    /// Send local changes to the remote
    pub async fn push(&self, options: &PushOptions) -> Result<PushResult> {
        let _lock = self.begin_pass(options.dry_run)?;
        if !options.dry_run {
            self.remote.validate().await?;
        }

        let (items, (entries, skipped)) =
            tokio::try_join!(self.remote.fetch_filtered(&[]), self.load_local())?;
        let snapshot: HashMap<String, RemoteIssue> = items
            .map(|issue| (issue.remote_id().to_string(), issue))
            .collect();
        let remote_updated: HashMap<String, DateTime<Utc>> = snapshot
            .iter()
            .map(|(id, issue)| (id.clone(), issue.updated))
            .collect();

        let mut index = TrackingIndex::load(self.storage())?;
        let changes = detect::detect(entries, skipped, &remote_updated, &index);

        let mut result = PushResult {
            dry_run: options.dry_run,
            skipped: changes.skipped.clone(),
            ..PushResult::default()
        };

        let selection = options.files.as_ref().map(|files| {
            files
                .iter()
                .map(|path| crate::local::file_name_of(path))
                .collect::<BTreeSet<String>>()
        });
        let selected = |name: &str| selection.as_ref().map_or(true, |set| set.contains(name));
        if let Some(names) = &selection {
            self.report_unknown_files(names, &changes, &mut result);
        }

        // Tracked files not touched below keep their current record.
        for entry in changes
            .unchanged
            .iter()
            .chain(&changes.remote_changed)
            .chain(&changes.modified_files)
            .chain(changes.conflicts.iter().map(|c| &c.entry))
        {
            if let Some(record) = &entry.record {
                index.track(entry.file_name.clone(), record);
            }
        }

        'pass: {
            for entry in changes.new_files.iter().filter(|e| selected(&e.file_name)) {
                if self.stop(&mut result.cancelled) {
                    break 'pass;
                }
                if let Err(err) = self.push_new(entry, options, &mut index, &mut result).await {
                    if self.record_failure(&mut result, Some(&entry.file_name), None, err) {
                        break 'pass;
                    }
                }
            }

            let mut updates: Vec<&LocalEntry> = Vec::new();
            for entry in changes.modified_files.iter().filter(|e| selected(&e.file_name)) {
                match &entry.record {
                    Some(record) if record.push_changes => updates.push(entry),
                    _ => result.held.push(entry.file_name.clone()),
                }
            }
            for conflict in changes.conflicts.iter().filter(|c| selected(&c.entry.file_name)) {
                result.conflicts.push(conflict.conflict.clone());
                if conflict.conflict.resolution == Resolution::LocalWins {
                    updates.push(&conflict.entry);
                }
            }
            updates.sort_by(|a, b| a.file_name.cmp(&b.file_name));

            for entry in updates {
                if self.stop(&mut result.cancelled) {
                    break 'pass;
                }
                let remote = entry.record.as_ref().map(|r| r.remote.display_ref());
                if let Err(err) = self
                    .push_update(entry, &snapshot, options, &mut index, &mut result)
                    .await
                {
                    if self.record_failure(&mut result, Some(&entry.file_name), remote, err) {
                        break 'pass;
                    }
                }
            }

            for deleted in changes.deleted_files.iter().filter(|d| selected(&d.file_name)) {
                if !deleted.record.close_on_github {
                    result.ignored_deletions.push(deleted.file_name.clone());
                    continue;
                }
                if !options.allow_close {
                    result.pending_close.push(deleted.file_name.clone());
                    continue;
                }
                if self.stop(&mut result.cancelled) {
                    break 'pass;
                }

                let item = ItemRef {
                    file: deleted.file_name.clone(),
                    remote: Some(deleted.record.remote.display_ref()),
                };
                if options.dry_run {
                    result.closed.push(item);
                    continue;
                }
                match self.remote.close(&deleted.record.remote).await {
                    Ok(()) => {
                        index.untrack(&deleted.remote_id);
                        info!(file = %deleted.file_name, "closed remote issue");
                        result.closed.push(item);
                    }
                    Err(err) => {
                        if self.record_failure(&mut result, Some(&deleted.file_name), item.remote, err) {
                            break 'pass;
                        }
                    }
                }
            }
        }

        if !options.dry_run {
            index.save(self.storage())?;
        }

        info!(
            created = result.created.len(),
            updated = result.updated.len(),
            closed = result.closed.len(),
            errors = result.errors.len(),
            dry_run = options.dry_run,
            "push finished"
        );
        Ok(result)
    }

    fn stop(&self, cancelled: &mut bool) -> bool {
        if self.is_cancelled() {
            *cancelled = true;
        }
        *cancelled
    }

    /// Record a failed item. Returns true if the pass must stop.
    fn record_failure(
        &self,
        result: &mut PushResult,
        file: Option<&str>,
        remote: Option<String>,
        err: Error,
    ) -> bool {
        warn!(file, error = %err, "push item failed");
        result.errors.push(ItemError::new(file, remote, &err));
        if err.is_fatal() {
            result.aborted = true;
        }
        result.aborted
    }

    fn report_unknown_files(&self, names: &BTreeSet<String>, changes: &ChangeSet, result: &mut PushResult) {
        let mut known: HashSet<&str> = HashSet::new();
        for entry in changes
            .new_files
            .iter()
            .chain(&changes.modified_files)
            .chain(&changes.remote_changed)
            .chain(&changes.unchanged)
            .chain(changes.conflicts.iter().map(|c| &c.entry))
        {
            known.insert(entry.file_name.as_str());
        }
        known.extend(changes.deleted_files.iter().map(|d| d.file_name.as_str()));

        let skipped: HashSet<String> = changes
            .skipped
            .iter()
            .map(|s| crate::local::file_name_of(&s.path))
            .collect();

        for name in names {
            if !known.contains(name.as_str()) && !skipped.contains(name) {
                let err = Error::TaskNotFound(self.local.path_for(name));
                result.errors.push(ItemError::new(Some(name), None, &err));
            }
        }
    }

    async fn push_new(
        &self,
        entry: &LocalEntry,
        options: &PushOptions,
        index: &mut TrackingIndex,
        result: &mut PushResult,
    ) -> Result<()> {
        if let Some((node_id, held)) = index.held_for_file(&entry.file_name) {
            return Err(Error::PartialCreate {
                repository: held.repository.clone(),
                issue_number: held.issue_number,
                issue_node_id: node_id.to_string(),
                step: held.step.clone(),
                message: "awaiting reconciliation; run sync once the issue is on the board".to_string(),
            });
        }
        if options.dry_run {
            result.created.push(ItemRef {
                file: entry.file_name.clone(),
                remote: None,
            });
            return Ok(());
        }

        let task = &entry.task;
        let status = self.config.board.status_for_column(&task.state);
        if status.is_none() {
            warn!(file = %entry.file_name, state = %task.state, "state is not a configured column");
        }
        let draft = IssueDraft {
            title: task.title.clone(),
            body: task.body.clone(),
            labels: self.labels().labels_for(task),
            status: status.map(str::to_string),
        };

        let created = match self.remote.create(&draft).await {
            Ok(created) => created,
            Err(err) => {
                hold_partial(index, &entry.file_name, &err);
                return Err(err);
            }
        };
        let record = SyncRecord::new(created.remote.clone(), created.created_at);
        let mut synced = task.clone();
        synced.provider = ProviderMetadata::GitHub(created.remote.clone());

        // The record goes into the file before the rename, so an
        // interrupted pass leaves a tracked file rather than a second
        // create on retry.
        if let Err(err) = self.local.write(&entry.path, &synced, Some(&record)) {
            let err = Error::PartialCreate {
                repository: created.remote.repository.clone(),
                issue_number: created.remote.issue_number,
                issue_node_id: created.remote.issue_node_id.clone(),
                step: "record sync state".to_string(),
                message: err.to_string(),
            };
            hold_partial(index, &entry.file_name, &err);
            return Err(err);
        }
        index.track(entry.file_name.clone(), &record);

        let new_name = created
            .remote
            .file_name(&task::slug_from_file_name(&entry.file_name));
        let item = ItemRef {
            file: new_name.clone(),
            remote: Some(created.remote.display_ref()),
        };

        match self.local.rename(&entry.file_name, &new_name) {
            Ok(_) => {
                index.track(new_name.clone(), &record);
                result.renamed.push(Renamed {
                    from: entry.file_name.clone(),
                    to: new_name,
                });
                result.created.push(item);
            }
            Err(err) => {
                // The issue exists and the file records it; only the name
                // is off.
                result.created.push(ItemRef {
                    file: entry.file_name.clone(),
                    remote: item.remote.clone(),
                });
                result
                    .errors
                    .push(ItemError::new(Some(&entry.file_name), item.remote, &err));
            }
        }

        info!(file = %entry.file_name, issue = created.remote.issue_number, "created remote issue");
        Ok(())
    }

    /// Minimal remote update bringing `issue` in line with `task`
    fn plan_update(&self, task: &Task, issue: &RemoteIssue) -> IssueUpdate {
        let mut update = IssueUpdate::default();
        if task.title.trim() != issue.title.trim() {
            update.title = Some(task.title.clone());
        }
        if task.body.trim() != issue.body.trim() {
            update.body = Some(task.body.clone());
        }

        let labels = self.labels().diff(&issue.labels, task);
        update.labels_add = labels.add;
        update.labels_remove = labels.remove;

        if let Some(status) = self.config.board.status_for_column(&task.state) {
            let unchanged = issue
                .status
                .as_deref()
                .map(|current| current.eq_ignore_ascii_case(status))
                .unwrap_or(false);
            if !unchanged {
                update.status = Some(status.to_string());
            }
        }
        update
    }

    async fn push_update(
        &self,
        entry: &LocalEntry,
        snapshot: &HashMap<String, RemoteIssue>,
        options: &PushOptions,
        index: &mut TrackingIndex,
        result: &mut PushResult,
    ) -> Result<()> {
        let Some(record) = &entry.record else {
            return Ok(());
        };
        let issue = snapshot
            .get(record.remote.remote_id())
            .ok_or_else(|| Error::RemoteNotFound(record.remote.display_ref()))?;

        let update = self.plan_update(&entry.task, issue);
        let item = ItemRef {
            file: entry.file_name.clone(),
            remote: Some(record.remote.display_ref()),
        };
        if options.dry_run {
            result.updated.push(item);
            return Ok(());
        }

        let mut synced_at = entry.task.updated.max(issue.updated);
        if !update.is_empty() {
            let remote_updated = self.remote.update(&record.remote, &update).await?;
            synced_at = synced_at.max(remote_updated);
        }

        let mut record = record.clone();
        record.push_changes = false;
        record.advance(synced_at);
        self.local.write(&entry.path, &entry.task, Some(&record))?;
        index.track(entry.file_name.clone(), &record);

        debug!(file = %entry.file_name, "pushed update");
        result.updated.push(item);
        Ok(())
    }

    // =========================================================================
    // Status and validation
    // =========================================================================

    /// Classify the board against the remote without changing either
    pub async fn status(&self) -> Result<StatusReport> {
        let (items, (entries, skipped)) =
            tokio::try_join!(self.remote.fetch_filtered(&[]), self.load_local())?;
        let remote_updated: HashMap<String, DateTime<Utc>> = items
            .map(|issue| (issue.remote_id().to_string(), issue.updated))
            .collect();
        let index = TrackingIndex::load(self.storage())?;
        let changes = detect::detect(entries, skipped, &remote_updated, &index);
        Ok(StatusReport::from_changes(&changes))
    }

    /// Check config and the remote's field configuration
    pub async fn validate(&self) -> Result<()> {
        self.config.validate()?;
        self.remote.validate().await
    }
}

/// Remember a partial create against the file it came from
fn hold_partial(index: &mut TrackingIndex, file_name: &str, err: &Error) {
    if let Error::PartialCreate {
        repository,
        issue_number,
        issue_node_id,
        step,
        ..
    } = err
    {
        index.hold(
            issue_node_id.clone(),
            Unreconciled {
                file_name: file_name.to_string(),
                repository: repository.clone(),
                issue_number: *issue_number,
                step: step.clone(),
            },
        );
    }
}
