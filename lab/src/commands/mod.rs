// Command handlers for the lab tool

use anyhow::{Context, Result};
use tracing::debug;

use crate::cli::{Args, Command, EntitlementsSubcommand, UsersSubcommand};
use lab_config::{LabConfig, VolumeTarget};
use lab_orchestrator::Orchestrator;

// Individual command modules
pub mod cleanup;
pub mod entitlements;
pub mod setup;
pub mod summary;
pub mod users;

/// Main command dispatcher
#[must_use = "command execution results should be handled"]
pub async fn execute_command(args: Args) -> Result<()> {
    let volume = match &args.command {
        Command::Setup { volume, .. } | Command::Cleanup { volume, .. } => volume.as_deref(),
        _ => None,
    };
    let config = load_config(&args, volume)?;

    match args.command {
        Command::Setup {
            cluster_only,
            tables_only,
            ..
        } => {
            debug!(cluster_only, tables_only, "Handling setup command");
            let mode = setup::mode_from_flags(cluster_only, tables_only);
            setup::handle_setup(connect(config)?, mode).await
        }
        Command::Cleanup { yes, .. } => {
            debug!(yes, "Handling cleanup command");
            cleanup::handle_cleanup(config, yes).await
        }
        Command::Users { command } => match command {
            UsersSubcommand::Add { file } => {
                debug!("Handling users add command");
                users::handle_add(connect(config)?, file).await
            }
            UsersSubcommand::Remove { file } => {
                debug!("Handling users remove command");
                users::handle_remove(connect(config)?, file).await
            }
            UsersSubcommand::List => {
                debug!("Handling users list command");
                users::handle_list(connect(config)?).await
            }
        },
        Command::Entitlements { command } => match command {
            EntitlementsSubcommand::Restore { yes } => {
                debug!(yes, "Handling entitlements restore command");
                entitlements::handle_restore(config, yes).await
            }
        },
    }
}

/// Env file and environment first, then the command-line overrides.
fn load_config(args: &Args, volume: Option<&str>) -> Result<LabConfig> {
    let target = volume
        .map(VolumeTarget::parse)
        .transpose()
        .context("Invalid volume argument")?;

    let config = LabConfig::load(Some(&args.env_file))
        .with_context(|| format!("Failed to load {}", args.env_file.display()))?
        .with_volume_target(target.as_ref())
        .with_profile(args.profile.clone());
    debug!(?config, "resolved configuration");
    Ok(config)
}

fn connect(config: LabConfig) -> Result<Orchestrator> {
    let client = lab_provider::connect(config.profile.as_deref())
        .context("Failed to connect to the workspace")?;
    Ok(Orchestrator::new(client, config))
}
