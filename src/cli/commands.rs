//! CLI command definitions

use crate::execution::SchedulingStrategy;
use clap::Args;

/// Provision a relay chain
#[derive(Debug, Args, Clone)]
pub struct ProvisionCommand {
    /// Path to the JSON request (`-` for stdin)
    #[arg(short, long)]
    pub request: String,

    /// Scheduling strategy (overrides the configuration)
    #[arg(long, value_enum)]
    pub strategy: Option<SchedulingStrategyArg>,

    /// Treat skipped nodes as errors
    #[arg(long)]
    pub strict: bool,

    /// Cancel the run after this many seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Print the response document as JSON
    #[arg(long)]
    pub json: bool,
}

/// Reset nodes to their pre-provisioning state
#[derive(Debug, Args, Clone)]
pub struct TeardownCommand {
    /// Path to the JSON request (`-` for stdin)
    #[arg(short, long)]
    pub request: String,

    /// Scheduling strategy (overrides the configuration)
    #[arg(long, value_enum)]
    pub strategy: Option<SchedulingStrategyArg>,

    /// Treat skipped nodes as errors
    #[arg(long)]
    pub strict: bool,

    /// Print the response document as JSON
    #[arg(long)]
    pub json: bool,
}

/// Validate a request
#[derive(Debug, Args, Clone)]
pub struct ValidateCommand {
    /// Path to the JSON request (`-` for stdin)
    #[arg(short, long)]
    pub request: String,

    /// Validate as a teardown request instead of a provision request
    #[arg(long)]
    pub teardown: bool,
}

/// Show the resolved chain
#[derive(Debug, Args, Clone)]
pub struct PlanCommand {
    /// Path to the JSON provision request (`-` for stdin)
    #[arg(short, long)]
    pub request: String,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Scheduling strategy argument
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum SchedulingStrategyArg {
    Sequential,
    Parallel,
}

impl From<SchedulingStrategyArg> for SchedulingStrategy {
    fn from(arg: SchedulingStrategyArg) -> Self {
        match arg {
            SchedulingStrategyArg::Sequential => SchedulingStrategy::Sequential,
            SchedulingStrategyArg::Parallel => SchedulingStrategy::Parallel,
        }
    }
}
