// CLI argument parsing and definitions

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Clone, Parser)]
#[command(name = "lab")]
#[command(about = "Provision and tear down the aircraft workshop lab environment")]
#[command(version)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Flat KEY=value file with lab settings (missing file means defaults)
    #[arg(long, global = true, default_value = ".env")]
    pub env_file: PathBuf,

    /// Credential profile from ~/.databrickscfg
    #[arg(short, long, global = true)]
    pub profile: Option<String>,

    /// Also write a plaintext run log into this directory
    #[arg(long, global = true)]
    pub log_dir: Option<PathBuf>,

    /// Enable debug output
    #[arg(short, long, global = true)]
    pub debug: bool,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Create the shared cluster, load the data and lock down access
    Setup {
        /// Target volume as catalog.schema.volume
        volume: Option<String>,
        /// Only create the cluster and install libraries
        #[arg(long, conflicts_with = "tables_only")]
        cluster_only: bool,
        /// Only upload the data and create the lakehouse tables
        #[arg(long)]
        tables_only: bool,
    },
    /// Remove the group, grants, tables, volume, schema and catalog
    Cleanup {
        /// Target volume as catalog.schema.volume
        volume: Option<String>,
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
    /// Manage workshop participants
    Users {
        #[command(subcommand)]
        command: UsersSubcommand,
    },
    /// Manage the default population's creation entitlements
    Entitlements {
        #[command(subcommand)]
        command: EntitlementsSubcommand,
    },
}

#[derive(Debug, Clone, Subcommand)]
pub enum UsersSubcommand {
    /// Add every roster entry to the workshop group with a personal cluster
    Add {
        /// Roster CSV with an `email` column (defaults to USERS_CSV)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
    /// Remove roster entries from the group and delete their clusters
    Remove {
        /// Roster CSV with an `email` column (defaults to USERS_CSV)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
    /// Show current group members and their clusters
    List,
}

#[derive(Debug, Clone, Subcommand)]
pub enum EntitlementsSubcommand {
    /// Give cluster and pool creation rights back to every user
    Restore {
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Setup { .. } => "setup",
            Command::Cleanup { .. } => "cleanup",
            Command::Users { .. } => "users",
            Command::Entitlements { .. } => "entitlements",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setup_modes_conflict() {
        let err = Args::try_parse_from(["lab", "setup", "--cluster-only", "--tables-only"])
            .unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn global_flags_follow_subcommands() {
        let args = Args::try_parse_from([
            "lab",
            "cleanup",
            "cat.schema.vol",
            "-y",
            "-p",
            "workshop",
            "--debug",
        ])
        .unwrap();

        assert!(args.debug);
        assert_eq!(args.profile.as_deref(), Some("workshop"));
        assert_eq!(args.env_file, PathBuf::from(".env"));
        match args.command {
            Command::Cleanup { volume, yes } => {
                assert_eq!(volume.as_deref(), Some("cat.schema.vol"));
                assert!(yes);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn users_take_a_roster_file() {
        let args = Args::try_parse_from(["lab", "users", "add", "-f", "roster.csv"]).unwrap();
        match args.command {
            Command::Users {
                command: UsersSubcommand::Add { file },
            } => assert_eq!(file, Some(PathBuf::from("roster.csv"))),
            other => panic!("unexpected command {other:?}"),
        }
    }
}
