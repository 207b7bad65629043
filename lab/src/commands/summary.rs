//! Per-stage summary table printed at the end of every run.

use colored::Colorize;
use tabled::settings::Style;
use tabled::{Table, Tabled};

use lab_core::{lab_error, lab_println};
use lab_orchestrator::{ChangeKind, StageOutcome, StageStatus};

#[derive(Tabled)]
struct StageRow {
    #[tabled(rename = "Stage")]
    stage: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Time")]
    time: String,
    #[tabled(rename = "Details")]
    details: String,
}

fn status_label(status: StageStatus) -> String {
    let label = status.to_string();
    match status {
        StageStatus::Passed => label.green().bold().to_string(),
        StageStatus::Failed => label.red().bold().to_string(),
        StageStatus::Skipped => label.yellow().to_string(),
    }
}

fn row(outcome: &StageOutcome) -> StageRow {
    StageRow {
        stage: outcome.stage.to_string(),
        status: status_label(outcome.status()),
        time: outcome
            .elapsed_secs()
            .map(|s| format!("{s}s"))
            .unwrap_or_else(|| "-".to_string()),
        details: outcome.summary(),
    }
}

pub fn render(stages: &[StageOutcome]) -> String {
    let mut table = Table::new(stages.iter().map(row));
    table.with(Style::rounded());
    table.to_string()
}

/// Print the table followed by every per-item failure.
pub fn print(stages: &[StageOutcome]) {
    lab_println!();
    lab_println!("{}", render(stages));

    for outcome in stages {
        for change in outcome.failures() {
            match &change.detail {
                Some(detail) => lab_error!("{}: {} ({})", outcome.stage, change.resource, detail),
                None => lab_error!("{}: {}", outcome.stage, change.resource),
            }
        }
    }
}

/// Count of resources the run actually changed.
pub fn mutation_count(stages: &[StageOutcome]) -> usize {
    stages
        .iter()
        .flat_map(|s| s.changes.iter())
        .filter(|c| !c.kind.is_noop() && c.kind != ChangeKind::Failed && c.kind != ChangeKind::Skipped)
        .count()
}
