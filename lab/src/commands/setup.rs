use anyhow::{bail, Result};
use tracing::info;

use super::summary;
use lab_core::{lab_header, lab_println, lab_success};
use lab_orchestrator::{Orchestrator, SetupMode};

pub fn mode_from_flags(cluster_only: bool, tables_only: bool) -> SetupMode {
    match (cluster_only, tables_only) {
        (true, _) => SetupMode::ClusterOnly,
        (false, true) => SetupMode::TablesOnly,
        (false, false) => SetupMode::Full,
    }
}

pub async fn handle_setup(orchestrator: Orchestrator, mode: SetupMode) -> Result<()> {
    let config = orchestrator.config();
    lab_header!("Workshop setup");
    lab_println!("  Volume:    {}", config.volume.full_name());
    lab_println!("  Lakehouse: {}", config.volume.lakehouse_full_name());
    lab_println!("  Cluster:   {}", config.cluster.name);
    lab_println!("  Warehouse: {}", config.warehouse.name);

    let run = orchestrator.setup(mode).await;
    summary::print(&run.stages);

    let changed = summary::mutation_count(&run.stages);
    info!(changed, success = run.success(), "setup complete");
    if !run.success() {
        bail!("Setup finished with failed stages; re-run to resume");
    }

    if let Some(cluster_id) = &run.cluster_id {
        lab_println!("  Cluster ID: {}", cluster_id);
    }
    if changed == 0 {
        lab_success!("Environment already up to date");
    } else {
        lab_success!("Setup complete ({} changes)", changed);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_select_the_track() {
        assert_eq!(mode_from_flags(false, false), SetupMode::Full);
        assert_eq!(mode_from_flags(true, false), SetupMode::ClusterOnly);
        assert_eq!(mode_from_flags(false, true), SetupMode::TablesOnly);
    }
}
