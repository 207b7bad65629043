use anyhow::{bail, Context, Result};
use dialoguer::Confirm;
use tracing::warn;

use super::{connect, summary};
use lab_config::LabConfig;
use lab_core::{lab_info, lab_success, lab_warning};

pub async fn handle_restore(config: LabConfig, yes: bool) -> Result<()> {
    let population = config.access.population_group.clone();
    lab_warning!(
        "This gives every member of '{}' the right to create clusters and instance pools again",
        population
    );

    if !yes {
        let confirmed = Confirm::new()
            .with_prompt("Restore creation entitlements?")
            .default(false)
            .interact()
            .context("Confirmation prompt failed; pass --yes to run non-interactively")?;
        if !confirmed {
            lab_info!("Entitlements left unchanged");
            return Ok(());
        }
    }

    warn!(population = %population, "entitlement restore confirmed");
    let outcome = connect(config)?.restore_entitlements().await;
    summary::print(std::slice::from_ref(&outcome));

    if outcome.error.is_some() {
        bail!("Entitlements were not restored");
    }
    lab_success!("Creation entitlements restored for '{}'", population);
    Ok(())
}
