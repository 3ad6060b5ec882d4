//! Relay chain execution engine

pub mod cancellation;
pub mod connection;
pub mod context;
pub mod engine;
pub mod events;
pub mod executor;
pub mod installer;
pub mod provision;
pub mod retry;
pub mod scheduler;
pub mod teardown;

pub use cancellation::Cancellation;
pub use connection::{Connection, ConnectionManager};
pub use context::PipelineContext;
pub use engine::Orchestrator;
pub use events::{EventHandler, EventSink, ExecutionEvent, Operation};
pub use executor::{CommandExecutor, StepRunner};
pub use installer::{InstallError, InstallOutcome, PackageInstaller};
pub use provision::ProvisioningPipeline;
pub use retry::{Backoff, RetryPolicy};
pub use scheduler::{Scheduler, SchedulingStrategy, TokioScheduler};
pub use teardown::TeardownPipeline;
