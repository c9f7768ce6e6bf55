//! boardsync init command implementation
//!
//! Creates the initial config, the state directory and the tasks directory.

use std::path::{Path, PathBuf};

use crate::config::{Config, CONFIG_FILE};
use crate::error::{exit_codes, Error, Result};
use crate::output::{emit_success, HumanOutput, OutputOptions};
use crate::storage::{Storage, STATE_DIR};

/// Options for the init command
pub struct InitOptions {
    pub root: Option<PathBuf>,
    pub owner: Option<String>,
    pub repo: Option<String>,
    pub project: Option<u64>,
    pub output: OutputOptions,
}

#[derive(serde::Serialize)]
struct InitReport {
    root: PathBuf,
    created: InitCreated,
    updated: InitUpdated,
}

#[derive(serde::Serialize)]
struct InitCreated {
    config: bool,
    state_dir: bool,
    tasks_dir: bool,
}

#[derive(serde::Serialize)]
struct InitUpdated {
    gitignore: bool,
}

pub fn run(options: InitOptions) -> Result<i32> {
    let root = super::resolve_root(options.root)?;
    std::fs::create_dir_all(&root)?;

    let (config, created_config) = ensure_config(&root, options.owner, options.repo, options.project)?;
    let storage = Storage::new(root.clone(), &config.board.tasks_dir);
    let created_state_dir = ensure_dir(&storage.state_dir())?;
    let created_tasks_dir = ensure_dir(storage.tasks_dir())?;
    let updated_gitignore = ensure_gitignore(&root)?;

    let report = InitReport {
        root: root.clone(),
        created: InitCreated {
            config: created_config,
            state_dir: created_state_dir,
            tasks_dir: created_tasks_dir,
        },
        updated: InitUpdated {
            gitignore: updated_gitignore,
        },
    };

    let mut created_items = Vec::new();
    if created_config {
        created_items.push(CONFIG_FILE.to_string());
    }
    if created_state_dir {
        created_items.push(format!("{STATE_DIR}/"));
    }
    if created_tasks_dir {
        created_items.push(format!("{}/", config.board.tasks_dir.display()));
    }

    let header = if created_items.is_empty() && !updated_gitignore {
        "boardsync init: nothing to do"
    } else {
        "boardsync init: initialized board"
    };

    let mut human = HumanOutput::new(header);
    human.push_summary("root", root.display().to_string());
    human.push_summary(
        "created",
        if created_items.is_empty() {
            "none".to_string()
        } else {
            created_items.join(", ")
        },
    );
    if updated_gitignore {
        human.push_summary("updated", ".gitignore");
    }
    if config.remote.validate_for_connect().is_err() {
        human.push_next_step(format!("set remote.owner, remote.repo and remote.project_number in {CONFIG_FILE}"));
    }
    human.push_next_step(format!("export {}=<token>", config.remote.token_env));
    human.push_next_step("boardsync validate");

    emit_success(options.output, "init", &report, Some(&human))?;
    Ok(exit_codes::SUCCESS)
}

/// Write a default config unless one exists. Flags only apply to a new file.
fn ensure_config(
    root: &Path,
    owner: Option<String>,
    repo: Option<String>,
    project: Option<u64>,
) -> Result<(Config, bool)> {
    let config_path = root.join(CONFIG_FILE);
    if config_path.exists() {
        if !config_path.is_file() {
            return Err(Error::OperationFailed(format!(
                "{CONFIG_FILE} exists but is not a file: {}",
                config_path.display()
            )));
        }
        return Ok((Config::load(&config_path)?, false));
    }

    let mut config = Config::default();
    if let Some(owner) = owner {
        config.remote.owner = owner;
    }
    if let Some(repo) = repo {
        config.remote.repo = repo;
    }
    if let Some(project) = project {
        config.remote.project_number = project;
    }
    config.save(&config_path)?;
    Ok((config, true))
}

/// Keep sync state out of version control when the board lives in a repo
fn ensure_gitignore(root: &Path) -> Result<bool> {
    let path = root.join(".gitignore");
    if !path.exists() && !root.join(".git").exists() {
        return Ok(false);
    }
    if path.exists() && !path.is_file() {
        return Err(Error::OperationFailed(format!(
            ".gitignore exists but is not a file: {}",
            path.display()
        )));
    }

    let existing = if path.exists() {
        std::fs::read_to_string(&path)?
    } else {
        String::new()
    };

    if has_state_ignore(&existing) {
        return Ok(false);
    }

    let mut updated = existing;
    if !updated.is_empty() && !updated.ends_with('\n') {
        updated.push('\n');
    }
    updated.push_str(&format!("{STATE_DIR}/\n"));
    std::fs::write(&path, updated)?;
    Ok(true)
}

fn has_state_ignore(contents: &str) -> bool {
    contents.lines().any(|line| {
        let trimmed = line.trim().trim_start_matches('/');
        if trimmed.is_empty() || trimmed.starts_with('#') {
            return false;
        }
        trimmed == STATE_DIR || trimmed.starts_with(&format!("{STATE_DIR}/"))
    })
}

fn ensure_dir(path: &Path) -> Result<bool> {
    if path.exists() {
        if !path.is_dir() {
            return Err(Error::OperationFailed(format!(
                "Expected directory at {}",
                path.display()
            )));
        }
        return Ok(false);
    }

    std::fs::create_dir_all(path)?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_existing_ignore_entries() {
        assert!(has_state_ignore("target/\n.boardsync/\n"));
        assert!(has_state_ignore("/.boardsync"));
        assert!(!has_state_ignore("# .boardsync/\n.boardsync.toml\n"));
    }

    #[test]
    fn existing_config_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        let (_, created) = ensure_config(dir.path(), Some("acme".into()), Some("web".into()), Some(3)).unwrap();
        assert!(created);

        let (config, created) = ensure_config(dir.path(), Some("other".into()), None, None).unwrap();
        assert!(!created);
        assert_eq!(config.remote.owner, "acme");
        assert_eq!(config.remote.project_number, 3);
    }
}
