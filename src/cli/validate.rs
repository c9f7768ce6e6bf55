//! boardsync validate command implementation

use std::path::PathBuf;

use serde::Serialize;

use crate::error::{exit_codes, Result};
use crate::output::{emit_success, HumanOutput, OutputOptions};

#[derive(Serialize)]
struct ValidateReport {
    repository: String,
    project_owner: String,
    project_number: u64,
    columns: Vec<String>,
}

pub fn run(root: Option<PathBuf>, output: OutputOptions) -> Result<i32> {
    let engine = super::github_engine(root)?;
    super::run_pass(&engine, || engine.validate())?;

    let config = engine.config();
    let report = ValidateReport {
        repository: config.remote.repository(),
        project_owner: config.remote.project_owner().to_string(),
        project_number: config.remote.project_number,
        columns: config
            .board
            .columns
            .iter()
            .map(|column| column.status.clone())
            .collect(),
    };

    let mut human = HumanOutput::new("boardsync validate: ok");
    human.push_summary("repository", report.repository.clone());
    human.push_summary(
        "project",
        format!("{} #{}", report.project_owner, report.project_number),
    );
    human.push_summary("statuses", report.columns.join(", "));
    human.push_next_step("boardsync sync");

    emit_success(output, "validate", &report, Some(&human))?;
    Ok(exit_codes::SUCCESS)
}
