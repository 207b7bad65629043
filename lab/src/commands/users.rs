use std::path::PathBuf;

use anyhow::{anyhow, bail, Context, Result};
use tabled::settings::Style;
use tabled::{Table, Tabled};

use super::summary;
use lab_core::{lab_header, lab_info, lab_println, lab_success};
use lab_orchestrator::{read_roster, MemberRow, Orchestrator, StageStatus};

#[derive(Tabled)]
struct MemberLine {
    #[tabled(rename = "Email")]
    email: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Cluster")]
    cluster: String,
    #[tabled(rename = "State")]
    state: String,
}

impl From<MemberRow> for MemberLine {
    fn from(row: MemberRow) -> Self {
        Self {
            email: row.email,
            name: row.display_name.unwrap_or_default(),
            cluster: row.cluster_name,
            state: row
                .cluster_state
                .map(|s| s.to_string())
                .unwrap_or_else(|| "missing".to_string()),
        }
    }
}

/// `-f` wins over `USERS_CSV`.
fn roster(orchestrator: &Orchestrator, file: Option<PathBuf>) -> Result<Vec<String>> {
    let path = file
        .or_else(|| orchestrator.config().users_csv.clone())
        .ok_or_else(|| anyhow!("No roster given; pass --file or set USERS_CSV"))?;
    let emails = read_roster(&path).with_context(|| format!("Failed to read {}", path.display()))?;
    lab_info!("{} participants in {}", emails.len(), path.display());
    Ok(emails)
}

pub async fn handle_add(orchestrator: Orchestrator, file: Option<PathBuf>) -> Result<()> {
    let emails = roster(&orchestrator, file)?;
    lab_header!("Adding participants to '{}'", orchestrator.config().access.group_name);

    let outcome = orchestrator.add_members(&emails).await;
    summary::print(std::slice::from_ref(&outcome));
    if outcome.status() == StageStatus::Failed {
        bail!("Some participants could not be added");
    }
    lab_success!("All participants are in the workshop group");
    Ok(())
}

pub async fn handle_remove(orchestrator: Orchestrator, file: Option<PathBuf>) -> Result<()> {
    let emails = roster(&orchestrator, file)?;
    lab_header!("Removing participants from '{}'", orchestrator.config().access.group_name);

    let outcome = orchestrator.remove_members(&emails).await;
    summary::print(std::slice::from_ref(&outcome));
    if outcome.status() == StageStatus::Failed {
        bail!("Some participants could not be removed");
    }
    lab_success!("Participants removed");
    Ok(())
}

pub async fn handle_list(orchestrator: Orchestrator) -> Result<()> {
    let rows = orchestrator.list_members().await?;
    if rows.is_empty() {
        lab_info!("No members in '{}'", orchestrator.config().access.group_name);
        return Ok(());
    }

    let count = rows.len();
    let mut table = Table::new(rows.into_iter().map(MemberLine::from));
    table.with(Style::rounded());
    lab_println!("{}", table);
    lab_println!("{} members", count);
    Ok(())
}
