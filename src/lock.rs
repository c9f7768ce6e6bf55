//! Board lock and atomic writes.
//!
//! A pass holds an exclusive advisory lock (fs2/flock) on
//! `.boardsync/sync.lock` for its whole duration. Every file the tool
//! writes is staged as `<name>.tmp` next to its target and renamed into
//! place, so a reader sees the old content or the new one and an
//! interrupted pass leaves at most a staging file behind.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use fs2::FileExt;
use tracing::debug;

use crate::error::{Error, Result};

/// How long a pass waits for a running one to finish
pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 5000;

/// Extension of staging files
pub const TEMP_SUFFIX: &str = "tmp";

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Held board lock; released on drop
#[derive(Debug)]
pub struct FileLock {
    file: File,
    path: PathBuf,
}

impl FileLock {
    /// Lock `path`, polling until `timeout_ms` runs out.
    ///
    /// The file is created if needed and records the holder's pid.
    pub fn acquire(path: impl AsRef<Path>, timeout_ms: u64) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => break,
                Err(err) if contended(&err) => {
                    if Instant::now() >= deadline {
                        return Err(Error::LockFailed(path.to_path_buf()));
                    }
                    std::thread::sleep(POLL_INTERVAL);
                }
                Err(err) => return Err(Error::Io(err)),
            }
        }

        let mut lock = Self {
            file,
            path: path.to_path_buf(),
        };
        lock.record_holder()?;
        debug!(path = %lock.path.display(), "board locked");
        Ok(lock)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn record_holder(&mut self) -> Result<()> {
        self.file.set_len(0)?;
        self.file.seek(SeekFrom::Start(0))?;
        writeln!(self.file, "{}", std::process::id())?;
        Ok(())
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

fn contended(err: &io::Error) -> bool {
    if err.kind() == io::ErrorKind::WouldBlock {
        return true;
    }
    // Sharing and lock violations on Windows.
    cfg!(windows) && matches!(err.raw_os_error(), Some(32) | Some(33))
}

/// Staging path for `path`: `fix-login.md` becomes `fix-login.md.tmp`
pub fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".");
    name.push(TEMP_SUFFIX);
    path.with_file_name(name)
}

/// Write `data` to a staging sibling, fsync it, then rename over `path`
pub fn write_atomic(path: impl AsRef<Path>, data: &[u8]) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let staging = temp_path_for(path);
    {
        let mut file = File::create(&staging)?;
        file.write_all(data)?;
        file.sync_all()?;
    }
    fs::rename(&staging, path)?;
    Ok(())
}

pub fn write_atomic_str(path: impl AsRef<Path>, data: &str) -> Result<()> {
    write_atomic(path, data.as_bytes())
}

/// Delete staging files left in `dir` by an interrupted write of a
/// `*.{extension}` file. Other `*.tmp` files are left alone.
///
/// Returns what was removed, sorted. A missing directory has none.
pub fn sweep_temp_files(dir: impl AsRef<Path>, extension: &str) -> Result<Vec<PathBuf>> {
    let dir = dir.as_ref();
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let suffix = format!(".{extension}.{TEMP_SUFFIX}");
    let mut removed = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let staged = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.len() > suffix.len() && name.ends_with(&suffix));
        if staged && path.is_file() {
            fs::remove_file(&path)?;
            removed.push(path);
        }
    }
    removed.sort();
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier};
    use std::thread;
    use tempfile::TempDir;

    #[test]
    fn second_pass_waits_then_gives_up() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".boardsync/sync.lock");

        let held = FileLock::acquire(&path, 1000).unwrap();
        assert_eq!(held.path(), path.as_path());
        let pid = fs::read_to_string(&path).unwrap();
        assert_eq!(pid.trim(), std::process::id().to_string());

        let started = Instant::now();
        let err = FileLock::acquire(&path, 100).unwrap_err();
        assert!(matches!(err, Error::LockFailed(_)));
        assert!(started.elapsed() >= Duration::from_millis(100));

        drop(held);
        FileLock::acquire(&path, 100).unwrap();
    }

    #[test]
    fn passes_never_overlap() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sync.lock");
        let workers = 6;
        let barrier = Arc::new(Barrier::new(workers));
        let inside = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..workers)
            .map(|_| {
                let (barrier, inside, peak, path) =
                    (barrier.clone(), inside.clone(), peak.clone(), path.clone());
                thread::spawn(move || {
                    barrier.wait();
                    let _lock = FileLock::acquire(&path, 5000).unwrap();
                    let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(5));
                    inside.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn atomic_write_replaces_content_and_leaves_no_staging_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tasks/fix-login.md");

        write_atomic_str(&path, "first").unwrap();
        write_atomic_str(&path, "second").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "second");
        assert!(!temp_path_for(&path).exists());
    }

    #[test]
    fn staging_name_keeps_task_extension_inside() {
        let staged = temp_path_for(Path::new("/board/tasks/owner-repo#42-fix-login.md"));
        assert_eq!(
            staged,
            PathBuf::from("/board/tasks/owner-repo#42-fix-login.md.tmp")
        );
        assert_ne!(staged.extension().unwrap(), "md");
    }

    #[test]
    fn sweep_removes_only_staging_files() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("keep.md"), "x").unwrap();
        fs::write(dir.path().join("crashed.md.tmp"), "partial").unwrap();
        fs::write(dir.path().join("notes.tmp"), "scratch").unwrap();
        fs::write(dir.path().join("export.csv.tmp"), "a,b").unwrap();
        fs::write(dir.path().join(".md.tmp"), "").unwrap();

        let removed = sweep_temp_files(dir.path(), "md").unwrap();
        assert_eq!(removed, vec![dir.path().join("crashed.md.tmp")]);
        assert!(dir.path().join("keep.md").exists());
        assert!(dir.path().join("notes.tmp").exists());
        assert!(dir.path().join("export.csv.tmp").exists());
        assert!(dir.path().join(".md.tmp").exists());
        assert!(sweep_temp_files(dir.path().join("missing"), "md")
            .unwrap()
            .is_empty());
    }
}
