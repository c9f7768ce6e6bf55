//! In-memory remote store.
//!
//! Behaves like the GitHub store as far as the engine can tell: paged
//! listing, three-step create, partial updates, idempotent close. Every
//! mutation is logged and any call can be made to fail, which is what the
//! engine tests are built on.

use std::collections::BTreeSet;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::remote::{
    self, CreateStep, CreatedIssue, Filter, IssueDraft, IssueUpdate, RemoteIssue, RemoteIssueStore,
    RemoteItems,
};
use crate::task::GitHubRef;

/// Where an injected failure fires
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailPoint {
    Fetch,
    Create { title: String },
    AddToProject { title: String },
    SetStatus { title: String },
    Update { issue_number: u64 },
    Close { issue_number: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailKind {
    Network,
    Auth,
}

impl FailKind {
    fn error(self, point: &FailPoint) -> Error {
        match self {
            FailKind::Network => Error::Network(format!("injected failure at {point:?}")),
            FailKind::Auth => Error::Auth("injected: bad credentials".to_string()),
        }
    }
}

/// A remote mutation that took effect
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    Created { issue_number: u64, title: String },
    AddedToProject { issue_number: u64 },
    StatusSet { issue_number: u64, status: String },
    Updated { issue_number: u64, update: IssueUpdate },
    Closed { issue_number: u64 },
}

impl Mutation {
    pub fn issue_number(&self) -> u64 {
        match self {
            Mutation::Created { issue_number, .. }
            | Mutation::AddedToProject { issue_number }
            | Mutation::StatusSet { issue_number, .. }
            | Mutation::Updated { issue_number, .. }
            | Mutation::Closed { issue_number } => *issue_number,
        }
    }
}

/// Issue to place on the board before a test runs
#[derive(Debug, Clone)]
pub struct SeedIssue {
    pub title: String,
    pub body: String,
    pub status: Option<String>,
    pub labels: Vec<String>,
    pub closed: bool,
    pub updated: DateTime<Utc>,
}

impl SeedIssue {
    pub fn new(title: impl Into<String>, updated: DateTime<Utc>) -> Self {
        Self {
            title: title.into(),
            body: String::new(),
            status: None,
            labels: Vec::new(),
            closed: false,
            updated,
        }
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    pub fn status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    pub fn labels(mut self, labels: &[&str]) -> Self {
        self.labels = labels.iter().map(|label| label.to_string()).collect();
        self
    }

    pub fn closed(mut self) -> Self {
        self.closed = true;
        self
    }
}

#[derive(Debug, Clone)]
struct MemoryItem {
    issue: RemoteIssue,
    on_board: bool,
}

#[derive(Debug, Default)]
struct MemoryState {
    items: Vec<MemoryItem>,
    next_number: u64,
    clock: Option<DateTime<Utc>>,
    status_options: Vec<String>,
    required_statuses: Vec<String>,
    failures: Vec<(FailPoint, FailKind)>,
    mutations: Vec<Mutation>,
    fetch_calls: usize,
    pages_served: usize,
}

impl MemoryState {
    fn now(&self) -> DateTime<Utc> {
        self.clock.unwrap_or_else(Utc::now)
    }

    fn check(&self, point: &FailPoint) -> Result<()> {
        match self.failures.iter().find(|(candidate, _)| candidate == point) {
            Some((point, kind)) => Err(kind.error(point)),
            None => Ok(()),
        }
    }

    fn item_mut(&mut self, remote: &GitHubRef) -> Result<&mut MemoryItem> {
        self.items
            .iter_mut()
            .find(|item| item.issue.remote_id() == remote.remote_id())
            .ok_or_else(|| Error::RemoteNotFound(remote.display_ref()))
    }

    fn status_exists(&self, status: &str) -> bool {
        self.status_options
            .iter()
            .any(|option| option.eq_ignore_ascii_case(status))
    }
}

/// Remote store backed by a `Vec`, safe to share across tasks
#[derive(Debug)]
pub struct MemoryStore {
    repository: String,
    page_size: usize,
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new(repository: impl Into<String>) -> Self {
        Self {
            repository: repository.into(),
            page_size: 100,
            state: Mutex::new(MemoryState {
                next_number: 1,
                ..MemoryState::default()
            }),
        }
    }

    /// A store shaped like the configured project: every column has a
    /// status option, and validation requires all of them.
    pub fn for_config(config: &Config) -> Self {
        let store = Self::new(config.remote.repository()).with_page_size(config.remote.page_size);
        {
            let mut state = store.state();
            state.status_options = config
                .board
                .columns
                .iter()
                .map(|column| column.status.clone())
                .collect();
            state.required_statuses = state.status_options.clone();
        }
        store
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Pin the clock used for created/updated timestamps
    pub fn set_now(&self, now: DateTime<Utc>) {
        self.state().clock = Some(now);
    }

    /// Number given to the next seeded or created issue
    pub fn set_next_number(&self, number: u64) {
        self.state().next_number = number;
    }

    pub fn remove_status_option(&self, status: &str) {
        self.state()
            .status_options
            .retain(|option| !option.eq_ignore_ascii_case(status));
    }

    pub fn fail_on(&self, point: FailPoint, kind: FailKind) {
        self.state().failures.push((point, kind));
    }

    pub fn clear_failures(&self) {
        self.state().failures.clear();
    }

    /// Put an issue on the board without logging a mutation
    pub fn seed(&self, seed: SeedIssue) -> GitHubRef {
        let mut state = self.state();
        let number = state.next_number;
        state.next_number += 1;

        let remote = self.remote_ref(number);
        state.items.push(MemoryItem {
            issue: RemoteIssue {
                remote: remote.clone(),
                title: seed.title,
                body: seed.body,
                status: seed.status,
                labels: seed.labels,
                closed: seed.closed,
                created: seed.updated,
                updated: seed.updated,
            },
            on_board: true,
        });
        remote
    }

    /// Edit an issue as another client would, stamping `updated = at`
    pub fn edit(&self, issue_number: u64, at: DateTime<Utc>, edit: impl FnOnce(&mut RemoteIssue)) {
        let mut state = self.state();
        if let Some(item) = state
            .items
            .iter_mut()
            .find(|item| item.issue.remote.issue_number == issue_number)
        {
            edit(&mut item.issue);
            item.issue.updated = at;
        }
    }

    pub fn issue(&self, issue_number: u64) -> Option<RemoteIssue> {
        self.state()
            .items
            .iter()
            .find(|item| item.issue.remote.issue_number == issue_number)
            .map(|item| item.issue.clone())
    }

    pub fn mutations(&self) -> Vec<Mutation> {
        self.state().mutations.clone()
    }

    pub fn mutations_for(&self, issue_number: u64) -> Vec<Mutation> {
        self.state()
            .mutations
            .iter()
            .filter(|mutation| mutation.issue_number() == issue_number)
            .cloned()
            .collect()
    }

    pub fn fetch_calls(&self) -> usize {
        self.state().fetch_calls
    }

    pub fn pages_served(&self) -> usize {
        self.state().pages_served
    }

    fn remote_ref(&self, number: u64) -> GitHubRef {
        GitHubRef {
            repository: self.repository.clone(),
            issue_number: number,
            issue_node_id: format!("I_{number}"),
            project_item_id: format!("PVTI_{number}"),
        }
    }
}

#[async_trait]
impl RemoteIssueStore for MemoryStore {
    async fn fetch_filtered(&self, filters: &[Filter]) -> Result<RemoteItems> {
        let mut state = self.state();
        state.fetch_calls += 1;
        state.check(&FailPoint::Fetch)?;

        // One listing per filter, the way a server-side search would run;
        // overlaps are left for `RemoteItems` to fold.
        let queries: Vec<Filter> = if filters.is_empty() {
            vec![Filter::All]
        } else {
            filters.to_vec()
        };

        let board: Vec<RemoteIssue> = state
            .items
            .iter()
            .filter(|item| item.on_board)
            .map(|item| item.issue.clone())
            .collect();

        let mut raw = Vec::new();
        for query in &queries {
            for page in board.chunks(self.page_size) {
                state.pages_served += 1;
                raw.extend(page.iter().filter(|issue| query.matches(issue)).cloned());
            }
        }

        debug!(filters = queries.len(), items = raw.len(), "memory fetch");
        Ok(RemoteItems::from_pages(raw))
    }

    async fn create(&self, draft: &IssueDraft) -> Result<CreatedIssue> {
        let mut state = self.state();
        state.check(&FailPoint::Create {
            title: draft.title.clone(),
        })?;

        let number = state.next_number;
        state.next_number += 1;
        let now = state.now();
        let remote = self.remote_ref(number);

        state.items.push(MemoryItem {
            issue: RemoteIssue {
                remote: remote.clone(),
                title: draft.title.clone(),
                body: draft.body.clone(),
                status: None,
                labels: draft.labels.iter().cloned().collect(),
                closed: false,
                created: now,
                updated: now,
            },
            on_board: false,
        });
        state.mutations.push(Mutation::Created {
            issue_number: number,
            title: draft.title.clone(),
        });

        let partial = |step, err| {
            remote::partial_create(&remote.repository, number, &remote.issue_node_id, step, err)
        };

        if let Err(err) = state.check(&FailPoint::AddToProject {
            title: draft.title.clone(),
        }) {
            return Err(partial(CreateStep::AddToProject, err));
        }
        state.item_mut(&remote)?.on_board = true;
        state.mutations.push(Mutation::AddedToProject {
            issue_number: number,
        });

        if let Some(status) = &draft.status {
            let checked = state
                .check(&FailPoint::SetStatus {
                    title: draft.title.clone(),
                })
                .and_then(|()| {
                    if state.status_exists(status) {
                        Ok(())
                    } else {
                        Err(Error::Remote(format!("unknown status option '{status}'")))
                    }
                });
            if let Err(err) = checked {
                return Err(partial(CreateStep::SetStatus, err));
            }
            state.item_mut(&remote)?.issue.status = Some(status.clone());
            state.mutations.push(Mutation::StatusSet {
                issue_number: number,
                status: status.clone(),
            });
        }

        Ok(CreatedIssue {
            remote,
            created_at: now,
        })
    }

    async fn update(&self, remote: &GitHubRef, update: &IssueUpdate) -> Result<DateTime<Utc>> {
        let mut state = self.state();
        state.check(&FailPoint::Update {
            issue_number: remote.issue_number,
        })?;
        if let Some(status) = &update.status {
            if !state.status_exists(status) {
                return Err(Error::Remote(format!("unknown status option '{status}'")));
            }
        }

        let now = state.now();
        let item = state.item_mut(remote)?;
        let issue = &mut item.issue;
        if let Some(title) = &update.title {
            issue.title = title.clone();
        }
        if let Some(body) = &update.body {
            issue.body = body.clone();
        }
        issue.labels.retain(|label| {
            !update
                .labels_remove
                .iter()
                .any(|removed| removed.eq_ignore_ascii_case(label))
        });
        for label in &update.labels_add {
            if !issue.has_label(label) {
                issue.labels.push(label.clone());
            }
        }
        if let Some(status) = &update.status {
            issue.status = Some(status.clone());
        }
        issue.updated = now;

        state.mutations.push(Mutation::Updated {
            issue_number: remote.issue_number,
            update: update.clone(),
        });
        Ok(now)
    }

    async fn close(&self, remote: &GitHubRef) -> Result<()> {
        let mut state = self.state();
        state.check(&FailPoint::Close {
            issue_number: remote.issue_number,
        })?;

        let now = state.now();
        let item = state.item_mut(remote)?;
        if item.issue.closed {
            return Ok(());
        }
        item.issue.closed = true;
        item.issue.updated = now;
        state.mutations.push(Mutation::Closed {
            issue_number: remote.issue_number,
        });
        Ok(())
    }

    async fn validate(&self) -> Result<()> {
        let state = self.state();
        state.check(&FailPoint::Fetch)?;

        let missing: BTreeSet<&str> = state
            .required_statuses
            .iter()
            .filter(|status| !state.status_exists(status))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            let missing: Vec<&str> = missing.into_iter().collect();
            return Err(Error::StoreInvalid(format!(
                "status options not found: {}",
                missing.join(", ")
            )));
        }
        Ok(())
    }
}
