//! Command-line interface

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand};
use commands::{PlanCommand, ProvisionCommand, TeardownCommand, ValidateCommand};
use std::ffi::OsString;

/// Multi-hop relay chain provisioning over SSH
#[derive(Debug, Parser, Clone)]
#[command(name = "relaychain")]
#[command(version)]
#[command(about = "Provision and tear down multi-hop relay chains over SSH", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to orchestrator configuration file
    #[arg(short, long, global = true)]
    pub config: Option<String>,
}

/// Available commands
#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Provision a relay chain
    Provision(ProvisionCommand),

    /// Reset nodes to their pre-provisioning state
    Teardown(TeardownCommand),

    /// Validate a request without touching any node
    Validate(ValidateCommand),

    /// Show the roles and next hops a request resolves to
    Plan(PlanCommand),
}

impl Cli {
    /// Parse CLI arguments from environment
    pub fn from_args() -> Self {
        Self::parse()
    }

    /// Parse CLI arguments from a slice
    pub fn try_parse_from<I, T>(itr: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        <Self as Parser>::try_parse_from(itr)
    }
}
