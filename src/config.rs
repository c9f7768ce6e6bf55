//! Configuration loading and management
//!
//! Handles parsing of `.boardsync.toml` at the board root.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Config file name, looked up in the board root
pub const CONFIG_FILE: &str = ".boardsync.toml";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Remote project configuration
    #[serde(default)]
    pub remote: RemoteConfig,

    /// Local board layout
    #[serde(default)]
    pub board: BoardConfig,

    /// Label aliases for type and priority
    #[serde(default)]
    pub labels: LabelsConfig,

    /// Sync defaults
    #[serde(default)]
    pub sync: SyncConfig,
}

/// Remote project configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Repository owner (user or organization)
    #[serde(default)]
    pub owner: String,

    /// Repository name; new issues are created here
    #[serde(default)]
    pub repo: String,

    /// Project number (as shown in the project URL)
    #[serde(default)]
    pub project_number: u64,

    /// Owner of the project if it differs from the repository owner
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_owner: Option<String>,

    /// GraphQL endpoint
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Environment variable holding the token
    #[serde(default = "default_token_env")]
    pub token_env: String,

    /// Name of the single-select field mapped to board columns
    #[serde(default = "default_status_field")]
    pub status_field: String,

    /// Items fetched per page
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Retries for transient failures
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base delay for exponential backoff
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,

    /// Longest wait honoured for a rate-limit reset before giving up
    #[serde(default = "default_max_rate_limit_wait_secs")]
    pub max_rate_limit_wait_secs: u64,
}

fn default_api_url() -> String {
    "https://api.github.com/graphql".to_string()
}

fn default_token_env() -> String {
    "GITHUB_TOKEN".to_string()
}

fn default_status_field() -> String {
    "Status".to_string()
}

fn default_page_size() -> usize {
    100
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_base_ms() -> u64 {
    500
}

fn default_max_rate_limit_wait_secs() -> u64 {
    60
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            owner: String::new(),
            repo: String::new(),
            project_number: 0,
            project_owner: None,
            api_url: default_api_url(),
            token_env: default_token_env(),
            status_field: default_status_field(),
            page_size: default_page_size(),
            max_retries: default_max_retries(),
            retry_base_ms: default_retry_base_ms(),
            max_rate_limit_wait_secs: default_max_rate_limit_wait_secs(),
        }
    }
}

impl RemoteConfig {
    /// `owner/repo`, the form stored in task frontmatter
    pub fn repository(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }

    pub fn project_owner(&self) -> &str {
        self.project_owner.as_deref().unwrap_or(&self.owner)
    }

    /// Checks needed before talking to the remote at all
    pub fn validate_for_connect(&self) -> Result<()> {
        if self.owner.trim().is_empty() {
            return Err(Error::InvalidConfig("remote.owner cannot be empty".to_string()));
        }
        if self.repo.trim().is_empty() {
            return Err(Error::InvalidConfig("remote.repo cannot be empty".to_string()));
        }
        if self.project_number == 0 {
            return Err(Error::InvalidConfig(
                "remote.project_number must be set".to_string(),
            ));
        }
        Ok(())
    }
}

/// One board column and the remote status option it maps to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnConfig {
    /// Column id written to the task `state` field
    pub id: String,
    /// Option name of the remote status field
    pub status: String,
}

impl ColumnConfig {
    fn new(id: &str, status: &str) -> Self {
        Self {
            id: id.to_string(),
            status: status.to_string(),
        }
    }
}

/// Local board layout
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoardConfig {
    /// Directory holding task files, relative to the board root
    #[serde(default = "default_tasks_dir")]
    pub tasks_dir: PathBuf,

    /// Columns in display order
    #[serde(default = "default_columns")]
    pub columns: Vec<ColumnConfig>,

    /// Column for items without a status
    #[serde(default = "default_column")]
    pub default_column: String,

    /// Column for closed items without a status
    #[serde(default = "default_closed_column")]
    pub closed_column: String,

    /// How long a pass waits for the board lock
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
}

fn default_tasks_dir() -> PathBuf {
    PathBuf::from("tasks")
}

fn default_columns() -> Vec<ColumnConfig> {
    vec![
        ColumnConfig::new("todo", "Todo"),
        ColumnConfig::new("in-progress", "In Progress"),
        ColumnConfig::new("done", "Done"),
    ]
}

fn default_column() -> String {
    "todo".to_string()
}

fn default_closed_column() -> String {
    "done".to_string()
}

fn default_lock_timeout_ms() -> u64 {
    crate::lock::DEFAULT_LOCK_TIMEOUT_MS
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            tasks_dir: default_tasks_dir(),
            columns: default_columns(),
            default_column: default_column(),
            closed_column: default_closed_column(),
            lock_timeout_ms: default_lock_timeout_ms(),
        }
    }
}

impl BoardConfig {
    /// Column id for a remote status option name (case-insensitive)
    pub fn column_for_status(&self, status: &str) -> Option<&str> {
        let status = status.trim();
        self.columns
            .iter()
            .find(|column| column.status.eq_ignore_ascii_case(status))
            .map(|column| column.id.as_str())
    }

    /// Remote status option name for a column id
    pub fn status_for_column(&self, column: &str) -> Option<&str> {
        let column = column.trim();
        self.columns
            .iter()
            .find(|entry| entry.id.eq_ignore_ascii_case(column))
            .map(|entry| entry.status.as_str())
    }

    fn validate(&self) -> Result<()> {
        if self.columns.is_empty() {
            return Err(Error::InvalidConfig(
                "board.columns cannot be empty".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for column in &self.columns {
            let id = column.id.trim();
            if id.is_empty() || column.status.trim().is_empty() {
                return Err(Error::InvalidConfig(
                    "board.columns entries need a non-empty id and status".to_string(),
                ));
            }
            if !seen.insert(id.to_ascii_lowercase()) {
                return Err(Error::InvalidConfig(format!(
                    "board.columns has duplicate id '{id}'"
                )));
            }
        }

        for (field, value) in [
            ("board.default_column", &self.default_column),
            ("board.closed_column", &self.closed_column),
        ] {
            if self.status_for_column(value).is_none() {
                return Err(Error::InvalidConfig(format!(
                    "{field} '{value}' not in board.columns"
                )));
            }
        }

        if self.tasks_dir.as_os_str().is_empty() {
            return Err(Error::InvalidConfig(
                "board.tasks_dir cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Label aliases. The first alias of each entry is canonical: it is the
/// label written on push. Every alias is accepted on pull.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelsConfig {
    #[serde(default = "default_type_labels")]
    pub types: BTreeMap<String, Vec<String>>,

    #[serde(default = "default_priority_labels")]
    pub priorities: BTreeMap<String, Vec<String>>,

    /// Priority assigned to pulled items carrying no priority label
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_priority: Option<String>,
}

fn aliases(entries: &[(&str, &[&str])]) -> BTreeMap<String, Vec<String>> {
    entries
        .iter()
        .map(|(key, labels)| {
            (
                key.to_string(),
                labels.iter().map(|label| label.to_string()).collect(),
            )
        })
        .collect()
}

fn default_type_labels() -> BTreeMap<String, Vec<String>> {
    aliases(&[
        ("bug", &["bug", "type:bug"]),
        ("feature", &["enhancement", "feature", "type:feature"]),
        ("task", &["task", "type:task"]),
    ])
}

fn default_priority_labels() -> BTreeMap<String, Vec<String>> {
    aliases(&[
        ("critical", &["priority:critical", "p0"]),
        ("high", &["priority:high", "p1"]),
        ("medium", &["priority:medium", "p2"]),
        ("low", &["priority:low", "p3"]),
    ])
}

impl Default for LabelsConfig {
    fn default() -> Self {
        Self {
            types: default_type_labels(),
            priorities: default_priority_labels(),
            default_priority: None,
        }
    }
}

impl LabelsConfig {
    fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for (section, table) in [("labels.types", &self.types), ("labels.priorities", &self.priorities)] {
            for (key, labels) in table {
                if labels.is_empty() {
                    return Err(Error::InvalidConfig(format!(
                        "{section}.{key} needs at least one label"
                    )));
                }
                for label in labels {
                    let normalized = label.trim().to_ascii_lowercase();
                    if normalized.is_empty() {
                        return Err(Error::InvalidConfig(format!(
                            "{section}.{key} cannot include empty labels"
                        )));
                    }
                    if !seen.insert(normalized) {
                        return Err(Error::InvalidConfig(format!(
                            "label '{label}' is mapped more than once"
                        )));
                    }
                }
            }
        }

        if let Some(priority) = &self.default_priority {
            if !self.priorities.contains_key(priority) {
                return Err(Error::InvalidConfig(format!(
                    "labels.default_priority '{priority}' not in labels.priorities"
                )));
            }
        }
        Ok(())
    }
}

/// Sync defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Filters used by `sync` when none are given on the command line
    #[serde(default = "default_filters")]
    pub filters: Vec<String>,
}

fn default_filters() -> Vec<String> {
    vec!["*".to_string()]
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            filters: default_filters(),
        }
    }
}

impl Config {
    /// Load configuration from a `.boardsync.toml` file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from the board root, or return defaults when the
    /// file is missing. An invalid file is an error.
    pub fn load_from_root(root: &Path) -> Result<Self> {
        let config_path = root.join(CONFIG_FILE);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        crate::lock::write_atomic_str(path, &content)
    }

    pub fn validate(&self) -> Result<()> {
        self.board.validate()?;
        self.labels.validate()?;
        if self.remote.page_size == 0 || self.remote.page_size > 100 {
            return Err(Error::InvalidConfig(
                "remote.page_size must be between 1 and 100".to_string(),
            ));
        }
        Ok(())
    }
}
