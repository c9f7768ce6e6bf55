//! boardsync push command implementation
//!
//! Sends new and changed task files to the remote board and, when
//! confirmed, closes issues whose files were deleted.

use std::path::PathBuf;

use crate::error::Result;
use crate::output::{emit_report, HumanOutput, OutputOptions, Status};
use crate::sync::{PassOutcome, PushOptions as PassOptions, PushResult};

/// Options for the push command
pub struct PushOptions {
    pub root: Option<PathBuf>,
    pub files: Vec<PathBuf>,
    pub dry_run: bool,
    pub yes: bool,
    pub output: OutputOptions,
}

pub fn run(options: PushOptions) -> Result<i32> {
    let engine = super::github_engine(options.root)?;

    let pass = PassOptions {
        files: if options.files.is_empty() {
            None
        } else {
            Some(options.files)
        },
        dry_run: options.dry_run,
        allow_close: options.yes,
    };

    let result = super::run_pass(&engine, || engine.push(&pass))?;

    let human = render(&result);
    let status = if result.is_clean() {
        Status::Success
    } else {
        Status::Partial
    };
    emit_report(options.output, "push", status, &result, Some(&human))?;
    Ok(result.exit_code())
}

fn render(result: &PushResult) -> HumanOutput {
    let changed = result.created.len() + result.updated.len() + result.closed.len();
    let header = match (result.dry_run, changed) {
        (true, _) => "boardsync push: dry run, nothing sent",
        (false, 0) => "boardsync push: nothing to push",
        (false, _) => "boardsync push: pushed",
    };

    let mut human = HumanOutput::new(header);
    human.push_summary("created", result.created.len().to_string());
    human.push_summary("updated", result.updated.len().to_string());
    human.push_summary("closed", result.closed.len().to_string());
    if !result.conflicts.is_empty() {
        human.push_summary("conflicts", result.conflicts.len().to_string());
    }

    for renamed in &result.renamed {
        human.push_detail(format!("{} -> {}", renamed.from, renamed.to));
    }
    for item in result.created.iter().filter(|item| {
        !result.renamed.iter().any(|renamed| renamed.to == item.file)
    }) {
        human.push_detail(format!("created {}", item.file));
    }
    for item in &result.updated {
        human.push_detail(format!("updated {}", item.file));
    }
    for item in &result.closed {
        human.push_detail(format!(
            "closed {}",
            item.remote.as_deref().unwrap_or(&item.file)
        ));
    }

    for conflict in &result.conflicts {
        human.push_warning(format!(
            "{} changed on both sides; {}",
            conflict.file,
            match conflict.resolution {
                crate::conflict::Resolution::LocalWins => "local version pushed",
                crate::conflict::Resolution::RemoteWins => "remote version kept, run boardsync sync",
            }
        ));
    }
    for file in &result.held {
        human.push_warning(format!("{file} changed locally; set push_changes: true to send it"));
    }
    for file in &result.ignored_deletions {
        human.push_warning(format!("{file} was deleted; its issue stays open"));
    }
    for skipped in &result.skipped {
        human.push_warning(format!("skipped {}: {}", skipped.path.display(), skipped.message));
    }
    for error in &result.errors {
        let target = error
            .file
            .as_deref()
            .or(error.remote.as_deref())
            .unwrap_or("item");
        human.push_warning(format!("{target}: {}", error.message));
    }
    if result.cancelled {
        human.push_warning("interrupted; remaining files were not pushed");
    }
    if result.aborted {
        human.push_warning("stopped early on a fatal error");
    }

    if !result.pending_close.is_empty() {
        human.push_next_step(format!(
            "boardsync push --yes  # close {} issue(s): {}",
            result.pending_close.len(),
            result.pending_close.join(", ")
        ));
    }
    human
}
