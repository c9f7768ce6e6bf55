//! boardsync sync command implementation
//!
//! Pulls remote board items into local task files.

use std::path::PathBuf;

use crate::error::Result;
use crate::output::{emit_report, HumanOutput, OutputOptions, Status};
use crate::remote::parse_filters;
use crate::sync::{PassOutcome, PullOptions, SyncResult};

/// Options for the sync command
pub struct SyncOptions {
    pub root: Option<PathBuf>,
    pub filters: Vec<String>,
    pub dry_run: bool,
    pub force: bool,
    pub output: OutputOptions,
}

pub fn run(options: SyncOptions) -> Result<i32> {
    let engine = super::github_engine(options.root)?;

    let raw = if options.filters.is_empty() {
        engine.config().sync.filters.clone()
    } else {
        options.filters
    };
    let pull = PullOptions {
        filters: parse_filters(&raw)?,
        dry_run: options.dry_run,
        force: options.force,
    };

    let result = super::run_pass(&engine, || engine.pull(&pull))?;

    let human = render(&result, &raw);
    let status = if result.is_clean() {
        Status::Success
    } else {
        Status::Partial
    };
    emit_report(options.output, "sync", status, &result, Some(&human))?;
    Ok(result.exit_code())
}

fn render(result: &SyncResult, filters: &[String]) -> HumanOutput {
    let header = match (result.dry_run, result.created.len() + result.updated.len()) {
        (true, _) => "boardsync sync: dry run, nothing written",
        (false, 0) => "boardsync sync: up to date",
        (false, _) => "boardsync sync: pulled",
    };

    let mut human = HumanOutput::new(header);
    human.push_summary("filters", filters.join(" "));
    human.push_summary("created", result.created.len().to_string());
    human.push_summary("updated", result.updated.len().to_string());
    if !result.conflicts.is_empty() {
        human.push_summary("conflicts", result.conflicts.len().to_string());
    }

    for item in &result.created {
        human.push_detail(format!("created {}", item.file));
    }
    for item in &result.updated {
        human.push_detail(format!("updated {}", item.file));
    }
    for conflict in &result.conflicts {
        human.push_warning(format!(
            "conflict in {}: local {} / remote {} since {}, {}",
            conflict.file,
            conflict.local_updated.to_rfc3339(),
            conflict.remote_updated.to_rfc3339(),
            conflict.last_synced.to_rfc3339(),
            match conflict.resolution {
                crate::conflict::Resolution::RemoteWins => "remote kept",
                crate::conflict::Resolution::LocalWins => "local kept",
            }
        ));
    }
    for file in &result.missing_locally {
        human.push_warning(format!("{file} was deleted locally; not recreated"));
    }
    for skipped in &result.skipped {
        human.push_warning(format!("skipped {}: {}", skipped.path.display(), skipped.message));
    }
    for error in &result.errors {
        let target = error
            .remote
            .as_deref()
            .or(error.file.as_deref())
            .unwrap_or("item");
        human.push_warning(format!("{target}: {}", error.message));
    }

    if result.cancelled {
        human.push_warning("interrupted; remaining items were not pulled");
    }
    if result.aborted {
        human.push_warning("stopped early on a fatal error");
    }
    if !result.pending_push.is_empty() {
        human.push_next_step(format!(
            "boardsync push  # {} local change(s) waiting",
            result.pending_push.len()
        ));
    }
    if !result.missing_locally.is_empty() {
        human.push_next_step("boardsync sync --force  # restore deleted files");
    }
    human
}
