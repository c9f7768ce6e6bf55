//! Remote issue store abstraction.
//!
//! The engine only needs fetch/create/update/close plus a preflight
//! `validate()`. Query construction, paging cursors and the ID cache stay
//! inside each implementation.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{Error, Result};
use crate::task::GitHubRef;

/// One issue as it sits on the remote board
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteIssue {
    pub remote: GitHubRef,
    pub title: String,
    pub body: String,
    /// Option name of the board status field, if set
    pub status: Option<String>,
    pub labels: Vec<String>,
    pub closed: bool,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

impl RemoteIssue {
    pub fn remote_id(&self) -> &str {
        self.remote.remote_id()
    }

    pub fn has_label(&self, name: &str) -> bool {
        self.labels.iter().any(|label| label.eq_ignore_ascii_case(name))
    }
}

/// Content of an issue to create
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IssueDraft {
    pub title: String,
    pub body: String,
    pub labels: BTreeSet<String>,
    /// Status option to set once the issue is on the board
    pub status: Option<String>,
}

/// Partial update; `None` fields are left untouched
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IssueUpdate {
    pub title: Option<String>,
    pub body: Option<String>,
    pub labels_add: BTreeSet<String>,
    pub labels_remove: BTreeSet<String>,
    pub status: Option<String>,
}

impl IssueUpdate {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.body.is_none()
            && self.labels_add.is_empty()
            && self.labels_remove.is_empty()
            && self.status.is_none()
    }
}

/// Identifiers and creation time of a newly created issue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedIssue {
    pub remote: GitHubRef,
    pub created_at: DateTime<Utc>,
}

/// Steps of a create, in order. A failure after `CreateIssue` is a
/// partial create.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateStep {
    CreateIssue,
    AddToProject,
    SetStatus,
}

impl CreateStep {
    pub fn as_str(self) -> &'static str {
        match self {
            CreateStep::CreateIssue => "create issue",
            CreateStep::AddToProject => "add to project",
            CreateStep::SetStatus => "set status",
        }
    }
}

/// Wrap a failure of a follow-up create step.
///
/// Always a partial create, even for auth failures, so the caller keeps
/// the identifiers of the issue that already exists.
pub fn partial_create(
    repository: &str,
    issue_number: u64,
    issue_node_id: &str,
    step: CreateStep,
    err: Error,
) -> Error {
    tracing::warn!(
        repository,
        issue_number,
        step = step.as_str(),
        error = %err,
        "issue created but follow-up step failed"
    );
    Error::PartialCreate {
        repository: repository.to_string(),
        issue_number,
        issue_node_id: issue_node_id.to_string(),
        step: step.as_str().to_string(),
        message: err.to_string(),
    }
}

/// Fetch filter. A list of filters is OR'd.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    /// `*`
    All,
    /// `is:open`
    Open,
    /// `is:closed`
    Closed,
    /// `label:<name>`
    Label(String),
    /// `status:<name>`
    Status(String),
}

impl Filter {
    pub fn matches(&self, issue: &RemoteIssue) -> bool {
        match self {
            Filter::All => true,
            Filter::Open => !issue.closed,
            Filter::Closed => issue.closed,
            Filter::Label(name) => issue.has_label(name),
            Filter::Status(name) => issue
                .status
                .as_deref()
                .map(|status| status.eq_ignore_ascii_case(name))
                .unwrap_or(false),
        }
    }
}

impl FromStr for Filter {
    type Err = Error;

    fn from_str(raw: &str) -> Result<Self> {
        let value = raw.trim();
        if value == "*" {
            return Ok(Filter::All);
        }

        let (key, arg) = value
            .split_once(':')
            .ok_or_else(|| Error::InvalidFilter(raw.to_string()))?;
        let arg = arg.trim();

        match (key.trim().to_ascii_lowercase().as_str(), arg) {
            ("is", arg) if arg.eq_ignore_ascii_case("open") => Ok(Filter::Open),
            ("is", arg) if arg.eq_ignore_ascii_case("closed") => Ok(Filter::Closed),
            ("label", arg) if !arg.is_empty() => Ok(Filter::Label(arg.to_string())),
            ("status", arg) if !arg.is_empty() => Ok(Filter::Status(arg.to_string())),
            _ => Err(Error::InvalidFilter(raw.to_string())),
        }
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::All => write!(f, "*"),
            Filter::Open => write!(f, "is:open"),
            Filter::Closed => write!(f, "is:closed"),
            Filter::Label(name) => write!(f, "label:{name}"),
            Filter::Status(name) => write!(f, "status:{name}"),
        }
    }
}

/// Parse a filter list. An empty list means all items.
pub fn parse_filters<S: AsRef<str>>(raw: &[S]) -> Result<Vec<Filter>> {
    raw.iter().map(|value| value.as_ref().parse()).collect()
}

/// True if any filter matches; an empty list matches everything
pub fn matches_any(filters: &[Filter], issue: &RemoteIssue) -> bool {
    filters.is_empty() || filters.iter().any(|filter| filter.matches(issue))
}

/// Fetched items: finite, deduplicated by remote id, consumed once.
#[derive(Debug)]
pub struct RemoteItems {
    inner: std::vec::IntoIter<RemoteIssue>,
}

impl RemoteItems {
    /// Build from raw pages. A remote id seen twice keeps the copy with the
    /// newest `updated`; first-seen order is preserved.
    pub fn from_pages(pages: impl IntoIterator<Item = RemoteIssue>) -> Self {
        let mut items: Vec<RemoteIssue> = Vec::new();
        let mut positions: HashMap<String, usize> = HashMap::new();

        for issue in pages {
            match positions.get(issue.remote_id()) {
                Some(&pos) => {
                    if issue.updated > items[pos].updated {
                        items[pos] = issue;
                    }
                }
                None => {
                    positions.insert(issue.remote_id().to_string(), items.len());
                    items.push(issue);
                }
            }
        }

        Self {
            inner: items.into_iter(),
        }
    }
}

impl Iterator for RemoteItems {
    type Item = RemoteIssue;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for RemoteItems {}

/// A remote issue tracker holding the board
#[async_trait]
pub trait RemoteIssueStore: Send + Sync {
    /// Items matching any of `filters`. Paging happens inside.
    async fn fetch_filtered(&self, filters: &[Filter]) -> Result<RemoteItems>;

    /// Create an issue, add it to the board and set its status.
    ///
    /// A failure after the issue exists is returned as
    /// `Error::PartialCreate`, never retried as a fresh create.
    async fn create(&self, draft: &IssueDraft) -> Result<CreatedIssue>;

    /// Apply a partial update. Labels not named in the update are kept.
    ///
    /// Returns the item's `updated` timestamp as the remote reports it
    /// afterwards.
    async fn update(&self, remote: &GitHubRef, update: &IssueUpdate) -> Result<DateTime<Utc>>;

    /// Close an issue. Closing a closed issue succeeds.
    async fn close(&self, remote: &GitHubRef) -> Result<()>;

    /// Check auth, connectivity and that configured columns and labels
    /// exist on the remote.
    async fn validate(&self) -> Result<()>;
}
