//! relaychain - provision and tear down multi-hop relay chains over SSH

pub mod cli;
pub mod core;
pub mod execution;
pub mod remote;

// Re-export commonly used types
pub use core::{
    Node, OrchestratorConfig, PipelineResult, ProvisionRequest, ProvisionResponse, RelayConfig,
    TeardownRequest, TeardownResponse, ValidationError,
};
pub use execution::{Cancellation, ExecutionEvent, Orchestrator, RetryPolicy, Scheduler, SchedulingStrategy};
pub use remote::{RemoteBackend, RemoteCommand, RemoteSession, SshBackend};
