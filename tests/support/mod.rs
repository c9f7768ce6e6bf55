#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use boardsync::config::{Config, CONFIG_FILE};
use boardsync::index::TrackingIndex;
use boardsync::local::LocalFileStore;
use boardsync::memory::MemoryStore;
use boardsync::storage::Storage;
use boardsync::sync::SyncEngine;
use boardsync::task::{SyncRecord, Task};
use chrono::{DateTime, TimeZone, Utc};
use tempfile::TempDir;

/// 2025-01-15 at `hour:minute` UTC
pub fn ts(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 15, hour, minute, 0)
        .single()
        .expect("valid timestamp")
}

pub fn test_config() -> Config {
    let mut config = Config::default();
    config.remote.owner = "owner".to_string();
    config.remote.repo = "repo".to_string();
    config.remote.project_number = 1;
    config
}

/// A board directory wired to an in-memory remote
pub struct TestBoard {
    dir: TempDir,
    pub engine: SyncEngine<MemoryStore>,
}

impl TestBoard {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: Config) -> Self {
        let dir = tempfile::tempdir().expect("failed to create tempdir");
        config
            .save(&dir.path().join(CONFIG_FILE))
            .expect("write config");
        let storage = Storage::new(dir.path().to_path_buf(), &config.board.tasks_dir);
        storage.init_all().expect("init board dirs");

        let store = MemoryStore::for_config(&config);
        let engine = SyncEngine::for_board(store, storage, config);
        Self { dir, engine }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn remote(&self) -> &MemoryStore {
        self.engine.remote()
    }

    pub fn local(&self) -> &LocalFileStore {
        self.engine.local()
    }

    pub fn storage(&self) -> &Storage {
        self.engine.local().storage()
    }

    pub fn tasks_dir(&self) -> PathBuf {
        self.storage().tasks_dir().to_path_buf()
    }

    pub fn path(&self, file_name: &str) -> PathBuf {
        self.local().path_for(file_name)
    }

    pub fn exists(&self, file_name: &str) -> bool {
        self.path(file_name).exists()
    }

    /// Raw file contents, for byte-for-byte comparisons
    pub fn contents(&self, file_name: &str) -> String {
        fs::read_to_string(self.path(file_name)).expect("read task file")
    }

    pub fn write_raw(&self, file_name: &str, contents: &str) -> PathBuf {
        let path = self.path(file_name);
        fs::write(&path, contents).expect("write task file");
        path
    }

    /// Write a task through the store, as a previous pass would have
    pub fn write_task(&self, file_name: &str, task: &Task, record: Option<&SyncRecord>) -> PathBuf {
        let path = self.path(file_name);
        self.local()
            .write(&path, task, record)
            .expect("write task file");
        path
    }

    pub fn read_task(&self, file_name: &str) -> (Task, Option<SyncRecord>) {
        self.local().read(&self.path(file_name)).expect("read task")
    }

    pub fn index(&self) -> TrackingIndex {
        TrackingIndex::load(self.storage()).expect("load index")
    }

    /// Sorted task file names
    pub fn file_names(&self) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(self.tasks_dir())
            .expect("read tasks dir")
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .collect();
        names.sort();
        names
    }

    /// Every file under the board root with its contents, for asserting
    /// that nothing was written
    pub fn snapshot(&self) -> Vec<(PathBuf, Vec<u8>)> {
        let mut files = Vec::new();
        collect_files(self.root(), &mut files);
        files.sort();
        files
    }
}

fn collect_files(dir: &Path, out: &mut Vec<(PathBuf, Vec<u8>)>) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.filter_map(|entry| entry.ok()) {
        let path = entry.path();
        if path.is_dir() {
            collect_files(&path, out);
        } else if let Ok(bytes) = fs::read(&path) {
            out.push((path, bytes));
        }
    }
}
