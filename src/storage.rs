//! Storage layer for boardsync
//!
//! Manages the on-disk layout of a board:
//!
//! ```text
//! <root>/
//!   .boardsync.toml             # Board configuration
//!   .boardsync/                 # Sync state (not task content)
//!     sync.lock                 # Advisory lock held for the duration of a pass
//!     index.json                # Tracked remote ids -> last known file + record
//!     order.json                # Column ordering, keyed by file name
//!   tasks/                      # One markdown file per task
//!     owner-repo#42-fix-login.md
//!     draft-idea.md
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Serialize};

use crate::config::CONFIG_FILE;
use crate::error::Result;
use crate::lock::{self, FileLock};

/// Name of the sync state directory
pub const STATE_DIR: &str = ".boardsync";

/// Storage manager for a board directory
#[derive(Debug, Clone)]
pub struct Storage {
    /// Board root (where `.boardsync.toml` lives)
    root: PathBuf,
    /// Directory holding task files
    tasks_dir: PathBuf,
}

impl Storage {
    /// Create a storage manager rooted at `root`
    ///
    /// `tasks_dir` is resolved against `root` when relative.
    pub fn new(root: PathBuf, tasks_dir: &Path) -> Self {
        let tasks_dir = if tasks_dir.is_absolute() {
            tasks_dir.to_path_buf()
        } else {
            root.join(tasks_dir)
        };
        Self { root, tasks_dir }
    }

    // =========================================================================
    // Path accessors
    // =========================================================================

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding task files
    pub fn tasks_dir(&self) -> &Path {
        &self.tasks_dir
    }

    pub fn config_file(&self) -> PathBuf {
        self.root.join(CONFIG_FILE)
    }

    /// Path to the `.boardsync/` state directory
    pub fn state_dir(&self) -> PathBuf {
        self.root.join(STATE_DIR)
    }

    /// Lock file guarding a whole pull/push pass
    pub fn lock_file(&self) -> PathBuf {
        self.state_dir().join("sync.lock")
    }

    /// Tracking index of remote ids seen on previous passes
    pub fn index_file(&self) -> PathBuf {
        self.state_dir().join("index.json")
    }

    /// Column ordering, persisted apart from task content
    pub fn order_file(&self) -> PathBuf {
        self.state_dir().join("order.json")
    }

    // =========================================================================
    // Directory initialization
    // =========================================================================

    /// Create the state and tasks directories
    pub fn init_all(&self) -> Result<()> {
        fs::create_dir_all(self.state_dir())?;
        fs::create_dir_all(&self.tasks_dir)?;
        Ok(())
    }

    /// Check if the board has been initialized
    pub fn is_initialized(&self) -> bool {
        self.config_file().exists()
    }

    /// Take the board-wide exclusive lock
    pub fn lock(&self, timeout_ms: u64) -> Result<FileLock> {
        FileLock::acquire(self.lock_file(), timeout_ms)
    }

    // =========================================================================
    // File I/O helpers (atomic writes for safety)
    // =========================================================================

    /// Write JSON data atomically (write to temp, then rename)
    pub fn write_json<T: Serialize>(&self, path: &Path, data: &T) -> Result<()> {
        let json = serde_json::to_string_pretty(data)?;
        lock::write_atomic(path, json.as_bytes())
    }

    /// Read JSON data from a file
    pub fn read_json<T: DeserializeOwned>(&self, path: &Path) -> Result<T> {
        let content = fs::read_to_string(path)?;
        let data: T = serde_json::from_str(&content)?;
        Ok(data)
    }

    /// Read JSON data, falling back to `T::default()` when the file is missing
    pub fn read_json_or_default<T: DeserializeOwned + Default>(&self, path: &Path) -> Result<T> {
        if !path.exists() {
            return Ok(T::default());
        }
        self.read_json(path)
    }
}
