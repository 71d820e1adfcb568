use std::path::PathBuf;

use clap::{Parser, Subcommand};
use log::LevelFilter;

pub const DEVICECTL_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser, Debug)]
#[clap(version = DEVICECTL_VERSION)]
pub struct Cli {
    /// Logging verbosity [OFF, ERROR, WARN, INFO, DEBUG, TRACE]
    #[arg(global = true, short, long, default_value_t = LevelFilter::Info)]
    pub verbosity: LevelFilter,

    /// Path to the daemon configuration file
    #[arg(global = true, long)]
    pub config: Option<PathBuf>,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Seed the device from a labelled (or legacy singleton) seed directory
    Seed {
        /// Seed system label; omit for the legacy singleton seed
        label: Option<String>,
    },

    /// Remodel the device from its current model assertion to a new one
    Remodel {
        /// Path to the current model assertion (YAML)
        #[clap(long)]
        from: PathBuf,

        /// Path to the proposed model assertion (YAML)
        to: PathBuf,

        /// Plan and validate only; do not run the resulting change
        #[clap(long)]
        dry_run: bool,
    },

    /// Create a recovery system for the device's current model
    CreateRecoverySystem {
        /// Label for the new recovery system
        label: String,
    },

    /// Remove a previously created recovery system
    RemoveRecoverySystem {
        /// Label of the recovery system to remove
        label: String,
    },

    /// Run the registration state machine to completion
    Register,

    /// Query the current state of the device
    Get {
        #[clap(default_value = "status")]
        kind: GetKind,
    },
}

#[derive(clap::ValueEnum, Clone, Debug, Eq, PartialEq)]
pub enum GetKind {
    Status,
    Config,
}
