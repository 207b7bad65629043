use anyhow::{bail, Context, Result};
use dialoguer::Confirm;

use super::{connect, summary};
use lab_config::LabConfig;
use lab_core::{lab_header, lab_info, lab_println, lab_success};

pub async fn handle_cleanup(config: LabConfig, yes: bool) -> Result<()> {
    lab_header!("Workshop cleanup");
    lab_println!("This will permanently delete:");
    lab_println!("  Group:     {}", config.access.group_name);
    lab_println!("  Lakehouse: {}", config.volume.lakehouse_full_name());
    lab_println!("  Volume:    {}", config.volume.full_name());
    lab_println!("  Schema:    {}", config.volume.schema_full_name());
    lab_println!("  Catalog:   {}", config.volume.catalog);
    lab_println!();
    lab_println!(
        "The Personal Compute policy is opened to '{}' again.",
        config.access.population_group
    );
    lab_println!(
        "The cluster '{}' and user entitlements are left as they are.",
        config.cluster.name
    );

    if !yes {
        let confirmed = Confirm::new()
            .with_prompt("Continue with cleanup?")
            .default(false)
            .interact()
            .context("Confirmation prompt failed; pass --yes to run non-interactively")?;
        if !confirmed {
            lab_info!("Cleanup cancelled");
            return Ok(());
        }
    }

    let orchestrator = connect(config)?;
    let run = orchestrator.teardown().await;
    summary::print(&run.stages);

    if !run.success() {
        bail!("Cleanup stopped at a failed step; later steps were skipped");
    }
    lab_success!("Cleanup complete");
    Ok(())
}
