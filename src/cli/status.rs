//! boardsync status command implementation
//!
//! Provides a single-pane summary of what a sync or push would do.

use std::path::PathBuf;

use crate::error::{exit_codes, Result};
use crate::output::{emit_success, HumanOutput, OutputOptions};
use crate::sync::StatusReport;

pub fn run(root: Option<PathBuf>, output: OutputOptions) -> Result<i32> {
    let engine = super::github_engine(root)?;
    let report = super::run_pass(&engine, || engine.status())?;

    emit_success(output, "status", &report, Some(&render(&report)))?;
    Ok(exit_codes::SUCCESS)
}

fn render(report: &StatusReport) -> HumanOutput {
    let mut human = HumanOutput::new("boardsync status");
    human.push_summary("new", report.new_files.len().to_string());
    human.push_summary("modified", report.modified_files.len().to_string());
    human.push_summary("conflicts", report.conflicts.len().to_string());
    human.push_summary("deleted", report.deleted_files.len().to_string());
    human.push_summary("remote changed", report.remote_changed.len().to_string());
    human.push_summary("unchanged", report.unchanged.to_string());

    for file in &report.new_files {
        human.push_detail(format!("new      {file}"));
    }
    for entry in &report.modified_files {
        let flag = if entry.flagged { "" } else { " (push_changes not set)" };
        human.push_detail(format!("modified {}{flag}", entry.file));
    }
    for conflict in &report.conflicts {
        human.push_detail(format!("conflict {}", conflict.file));
    }
    for entry in &report.deleted_files {
        let flag = if entry.flagged { " (will close)" } else { "" };
        human.push_detail(format!("deleted  {} {}{flag}", entry.file, entry.remote));
    }
    for file in &report.remote_changed {
        human.push_detail(format!("remote   {file}"));
    }
    for skipped in &report.skipped {
        human.push_warning(format!("skipped {}: {}", skipped.path.display(), skipped.message));
    }

    if !report.remote_changed.is_empty() || !report.conflicts.is_empty() {
        human.push_next_step("boardsync sync");
    }
    if !report.new_files.is_empty() || report.modified_files.iter().any(|e| e.flagged) {
        human.push_next_step("boardsync push");
    }
    human
}
