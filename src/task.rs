//! Task model and markdown frontmatter encoding.
//!
//! A task file is YAML frontmatter between `---` fences followed by a
//! markdown body:
//!
//! ```text
//! ---
//! id: 7d1f...
//! title: Fix login
//! state: todo
//! priority: high
//! type: bug
//! tags: [auth]
//! created: 2025-01-15T10:00:00Z
//! updated: 2025-01-15T10:00:00Z
//! github:
//!   synced: true
//!   issue_number: 42
//!   repository: owner/repo
//!   project_item_id: PVTI_...
//!   issue_node_id: I_...
//!   last_synced: 2025-01-15T10:00:05Z
//!   push_changes: false
//!   close_on_github: false
//! ---
//!
//! Body text.
//! ```
//!
//! The `github` block is the sync record. Its absence is the only marker of a
//! task that has never been pushed.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

const FENCE: &str = "---";
const MAX_SLUG_LEN: usize = 50;
const EMPTY_SLUG: &str = "untitled";

/// Identifiers addressing one item on a GitHub project board
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GitHubRef {
    /// `owner/repo` holding the issue
    pub repository: String,
    pub issue_number: u64,
    /// Issue node id (used for issue mutations)
    pub issue_node_id: String,
    /// Project item id (the remote id of a board entry)
    pub project_item_id: String,
}

impl GitHubRef {
    /// Stable key used to match remote items against local records
    pub fn remote_id(&self) -> &str {
        &self.project_item_id
    }

    pub fn owner(&self) -> &str {
        self.repository
            .split_once('/')
            .map(|(owner, _)| owner)
            .unwrap_or(&self.repository)
    }

    pub fn repo(&self) -> &str {
        self.repository
            .split_once('/')
            .map(|(_, repo)| repo)
            .unwrap_or("")
    }

    /// `owner-repo#42-<slug>.md`
    pub fn file_name(&self, slug: &str) -> String {
        format!(
            "{}-{}#{}-{}.md",
            self.owner(),
            self.repo(),
            self.issue_number,
            slug
        )
    }

    /// `owner/repo#42`, for messages
    pub fn display_ref(&self) -> String {
        format!("{}#{}", self.repository, self.issue_number)
    }
}

/// Provider-specific metadata, keyed by provider
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "provider", rename_all = "snake_case")]
pub enum ProviderMetadata {
    /// Local-only task, never pushed
    #[default]
    None,
    #[serde(rename = "github")]
    GitHub(GitHubRef),
}

/// Per-task bookkeeping of the last successful reconciliation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRecord {
    pub remote: GitHubRef,
    pub last_synced: DateTime<Utc>,
    /// User opt-in: local edits should be pushed (and win conflicts)
    pub push_changes: bool,
    /// User opt-in: deleting the file closes the remote issue
    pub close_on_github: bool,
}

impl SyncRecord {
    pub fn new(remote: GitHubRef, last_synced: DateTime<Utc>) -> Self {
        Self {
            remote,
            last_synced,
            push_changes: false,
            close_on_github: false,
        }
    }

    /// Move `last_synced` to `at`; never moves it backwards.
    pub fn advance(&mut self, at: DateTime<Utc>) {
        if at > self.last_synced {
            self.last_synced = at;
        }
    }
}

/// A task as stored locally
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    pub body: String,
    /// Column id
    pub state: String,
    pub priority: Option<String>,
    #[serde(rename = "type")]
    pub task_type: Option<String>,
    pub tags: BTreeSet<String>,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    pub provider: ProviderMetadata,
}

impl Task {
    /// A fresh local-only task
    pub fn new(title: impl Into<String>, state: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            title: title.into(),
            body: String::new(),
            state: state.into(),
            priority: None,
            task_type: None,
            tags: BTreeSet::new(),
            created: now,
            updated: now,
            provider: ProviderMetadata::None,
        }
    }
}

/// Values used when a file omits optional frontmatter fields
#[derive(Debug, Clone)]
pub struct DecodeDefaults<'a> {
    /// Used as the id when the file has none (usually the file stem)
    pub id: &'a str,
    /// Used for missing `created`/`updated` (usually the file mtime)
    pub timestamp: DateTime<Utc>,
    pub state: &'a str,
}

#[derive(Debug, Serialize, Deserialize)]
struct Frontmatter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(default)]
    title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    priority: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    task_type: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    tags: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    created: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    updated: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    github: Option<GitHubBlock>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GitHubBlock {
    #[serde(default = "default_synced")]
    synced: bool,
    issue_number: u64,
    repository: String,
    project_item_id: String,
    issue_node_id: String,
    last_synced: DateTime<Utc>,
    #[serde(default)]
    push_changes: bool,
    #[serde(default)]
    close_on_github: bool,
}

fn default_synced() -> bool {
    true
}

impl From<&SyncRecord> for GitHubBlock {
    fn from(record: &SyncRecord) -> Self {
        Self {
            synced: true,
            issue_number: record.remote.issue_number,
            repository: record.remote.repository.clone(),
            project_item_id: record.remote.project_item_id.clone(),
            issue_node_id: record.remote.issue_node_id.clone(),
            last_synced: record.last_synced,
            push_changes: record.push_changes,
            close_on_github: record.close_on_github,
        }
    }
}

impl From<GitHubBlock> for SyncRecord {
    fn from(block: GitHubBlock) -> Self {
        Self {
            remote: GitHubRef {
                repository: block.repository,
                issue_number: block.issue_number,
                issue_node_id: block.issue_node_id,
                project_item_id: block.project_item_id,
            },
            last_synced: block.last_synced,
            push_changes: block.push_changes,
            close_on_github: block.close_on_github,
        }
    }
}

/// Split a document into (frontmatter, body)
fn split_frontmatter(content: &str) -> std::result::Result<(&str, &str), String> {
    let content = content.strip_prefix('\u{feff}').unwrap_or(content);
    let rest = content
        .strip_prefix(FENCE)
        .and_then(|rest| rest.strip_prefix("\r\n").or_else(|| rest.strip_prefix('\n')))
        .ok_or_else(|| "missing opening '---' frontmatter fence".to_string())?;

    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end() == FENCE {
            let yaml = &rest[..offset];
            let body = &rest[offset + line.len()..];
            return Ok((yaml, body));
        }
        offset += line.len();
    }
    Err("missing closing '---' frontmatter fence".to_string())
}

/// Parse a task document.
///
/// Errors are human-readable messages; the caller attaches the path.
pub fn decode(
    content: &str,
    defaults: &DecodeDefaults<'_>,
) -> std::result::Result<(Task, Option<SyncRecord>), String> {
    let (yaml, body) = split_frontmatter(content)?;
    if yaml.trim().is_empty() {
        return Err("empty frontmatter".to_string());
    }
    let front: Frontmatter =
        serde_yaml::from_str(yaml).map_err(|err| format!("invalid frontmatter: {err}"))?;

    let title = front.title.trim().to_string();
    if title.is_empty() {
        return Err("missing title".to_string());
    }

    let record = front.github.map(SyncRecord::from);
    let provider = match &record {
        Some(record) => ProviderMetadata::GitHub(record.remote.clone()),
        None => ProviderMetadata::None,
    };

    let created = front.created.unwrap_or(defaults.timestamp);
    let task = Task {
        id: front
            .id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| defaults.id.to_string()),
        title,
        body: normalize_body(body),
        state: front
            .state
            .filter(|state| !state.trim().is_empty())
            .unwrap_or_else(|| defaults.state.to_string()),
        priority: front.priority.filter(|p| !p.trim().is_empty()),
        task_type: front.task_type.filter(|t| !t.trim().is_empty()),
        tags: front.tags,
        created,
        updated: front.updated.unwrap_or(created),
        provider,
    };

    Ok((task, record))
}

/// Render a task document. The `github` block is written from `record`.
pub fn encode(task: &Task, record: Option<&SyncRecord>) -> Result<String> {
    let front = Frontmatter {
        id: Some(task.id.clone()),
        title: task.title.clone(),
        state: Some(task.state.clone()),
        priority: task.priority.clone(),
        task_type: task.task_type.clone(),
        tags: task.tags.clone(),
        created: Some(task.created),
        updated: Some(task.updated),
        github: record.map(GitHubBlock::from),
    };

    let yaml = serde_yaml::to_string(&front)?;
    let mut out = String::with_capacity(yaml.len() + task.body.len() + 16);
    out.push_str(FENCE);
    out.push('\n');
    out.push_str(&yaml);
    if !yaml.ends_with('\n') {
        out.push('\n');
    }
    out.push_str(FENCE);
    out.push('\n');

    let body = normalize_body(&task.body);
    if !body.is_empty() {
        out.push('\n');
        out.push_str(&body);
        out.push('\n');
    }
    Ok(out)
}

fn normalize_body(body: &str) -> String {
    body.trim_start_matches(['\r', '\n']).trim_end().to_string()
}

/// Lowercase ASCII slug: alphanumerics joined by single dashes
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut pending_dash = false;

    for ch in title.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(ch.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
        if slug.len() >= MAX_SLUG_LEN {
            break;
        }
    }

    slug.truncate(MAX_SLUG_LEN);
    let slug = slug.trim_end_matches('-').to_string();
    if slug.is_empty() {
        EMPTY_SLUG.to_string()
    } else {
        slug
    }
}

/// Slug part of a file name.
///
/// `owner-repo#42-fix-login.md` gives `fix-login`, `fix-login.md` gives
/// `fix-login`.
pub fn slug_from_file_name(file_name: &str) -> String {
    let stem = file_name.strip_suffix(".md").unwrap_or(file_name);
    let slug = match stem.split_once('#') {
        Some((_, rest)) => rest
            .split_once('-')
            .map(|(_, slug)| slug)
            .unwrap_or(""),
        None => stem,
    };
    if slug.is_empty() {
        EMPTY_SLUG.to_string()
    } else {
        slug.to_string()
    }
}
