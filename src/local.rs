//! Local task files.
//!
//! Every write goes through `lock::write_atomic`, so a crash or a concurrent
//! reader never observes a half-written task. Only `*.md` files are tasks;
//! `*.md.tmp` staging files are invisible to `scan()`.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::error::{Error, Result};
use crate::lock;
use crate::order::BoardOrder;
use crate::storage::Storage;
use crate::task::{self, DecodeDefaults, SyncRecord, Task};

const TASK_EXTENSION: &str = "md";

/// Reads and writes task files under the board's tasks directory
#[derive(Debug, Clone)]
pub struct LocalFileStore {
    storage: Storage,
    default_state: String,
}

impl LocalFileStore {
    pub fn new(storage: Storage, default_state: impl Into<String>) -> Self {
        Self {
            storage,
            default_state: default_state.into(),
        }
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Absolute path for a task file name
    pub fn path_for(&self, file_name: &str) -> PathBuf {
        self.storage.tasks_dir().join(file_name)
    }

    /// Task files, sorted lexicographically by file name.
    ///
    /// A missing tasks directory is an empty board.
    pub fn scan(&self) -> Result<Vec<PathBuf>> {
        let dir = self.storage.tasks_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut paths = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if !entry.file_type()?.is_file() {
                continue;
            }
            let is_task = path
                .extension()
                .map(|ext| ext == TASK_EXTENSION)
                .unwrap_or(false);
            if is_task {
                paths.push(path);
            }
        }

        paths.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
        Ok(paths)
    }

    /// Parse one task file. Each call returns freshly decoded values.
    pub fn read(&self, path: &Path) -> Result<(Task, Option<SyncRecord>)> {
        let content = fs::read_to_string(path).map_err(|err| match err.kind() {
            std::io::ErrorKind::NotFound => Error::TaskNotFound(path.to_path_buf()),
            _ => Error::Io(err),
        })?;

        let modified = fs::metadata(path)
            .and_then(|meta| meta.modified())
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());
        let stem = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();

        let defaults = DecodeDefaults {
            id: &stem,
            timestamp: modified,
            state: &self.default_state,
        };
        task::decode(&content, &defaults).map_err(|message| Error::Validation {
            path: path.to_path_buf(),
            message,
        })
    }

    /// Write a task file atomically
    pub fn write(&self, path: &Path, task: &Task, record: Option<&SyncRecord>) -> Result<()> {
        let content = task::encode(task, record)?;
        lock::write_atomic_str(path, &content)?;
        debug!(path = %path.display(), id = %task.id, "wrote task");
        Ok(())
    }

    /// Rename a task file and the ordering entry keyed by its old name.
    ///
    /// The target must not exist. If the ordering update fails the file
    /// rename is rolled back.
    pub fn rename(&self, old_name: &str, new_name: &str) -> Result<PathBuf> {
        let old_path = self.path_for(old_name);
        let new_path = self.path_for(new_name);
        if old_name == new_name {
            return Ok(new_path);
        }
        if new_path.exists() {
            return Err(Error::FileExists(new_path));
        }

        fs::rename(&old_path, &new_path)?;

        let renamed_order = self.update_order(|order| order.rename_entry(old_name, new_name));
        if let Err(err) = renamed_order {
            let _ = fs::rename(&new_path, &old_path);
            return Err(err);
        }

        debug!(from = old_name, to = new_name, "renamed task");
        Ok(new_path)
    }

    /// Record `file_name` under `column` in the ordering file
    pub fn place_in_column(&self, column: &str, file_name: &str) -> Result<()> {
        self.update_order(|order| order.place(column, file_name))
    }

    pub fn load_order(&self) -> Result<BoardOrder> {
        self.storage
            .read_json_or_default(&self.storage.order_file())
    }

    fn update_order(&self, mutate: impl FnOnce(&mut BoardOrder) -> bool) -> Result<()> {
        let mut order = self.load_order()?;
        if mutate(&mut order) {
            self.storage.write_json(&self.storage.order_file(), &order)?;
        }
        Ok(())
    }

    /// Remove `*.md.tmp` staging files left by an interrupted task write
    pub fn sweep_temp_files(&self) -> Result<Vec<PathBuf>> {
        lock::sweep_temp_files(self.storage.tasks_dir(), TASK_EXTENSION)
    }
}

/// File name component of a path as an owned string
pub fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}
