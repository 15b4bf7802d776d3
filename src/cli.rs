//! Command line interface.
//!
//! [`Cli`] carries the global flags (--config, --vendor, --verbose) and one
//! [`Command`]: invoke, poll or classify.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::vendor::Vendor;

/// Polls a vendor role-onboarding workflow once and reports whether it is done.
#[derive(Debug, Parser)]
#[command(name = "rolepoll", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Configuration file. Defaults to ./rolepoll.toml when present.
    #[arg(long, short, global = true)]
    pub config: Option<PathBuf>,

    /// Overrides the vendor set in the configuration.
    #[arg(long, global = true)]
    pub vendor: Option<Vendor>,

    /// Debug-level logging.
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Runs one invocation from an orchestrator event.
    Invoke {
        /// Event JSON file, or `-` for stdin.
        #[arg(long, default_value = "-")]
        event: String,
    },

    /// Runs one invocation for an explicit task result id.
    Poll {
        task_id: String,

        /// Behave as if the vendor feature flag were off.
        #[arg(long)]
        disabled: bool,
    },

    /// Classifies a saved payload offline and prints the result.
    Classify {
        payload: PathBuf,
    },
}

impl Command {
    /// A poll run with the vendor flag off needs neither config nor network.
    pub fn is_bypassed(&self) -> bool {
        matches!(self, Command::Poll { disabled: true, .. })
    }
}
