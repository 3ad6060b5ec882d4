//! Shared services handed to every per-node pipeline

use crate::core::{NodeResult, OrchestratorConfig};
use crate::execution::{
    Cancellation, CommandExecutor, Connection, ConnectionManager, EventSink, PackageInstaller,
    Scheduler, StepRunner,
};
use crate::remote::RemoteBackend;
use std::sync::Arc;

/// Everything a node pipeline needs; cheap to clone into tasks
#[derive(Clone)]
pub struct PipelineContext {
    pub config: Arc<OrchestratorConfig>,
    pub connections: ConnectionManager,
    pub executor: CommandExecutor,
    pub installer: PackageInstaller,
    pub events: EventSink,
    pub cancellation: Cancellation,
}

impl PipelineContext {
    pub fn new(
        backend: Arc<dyn RemoteBackend>,
        scheduler: Arc<dyn Scheduler>,
        config: Arc<OrchestratorConfig>,
        events: EventSink,
        cancellation: Cancellation,
    ) -> Self {
        let executor = CommandExecutor::new();
        let connections = ConnectionManager::new(
            backend,
            scheduler.clone(),
            events.clone(),
            config.ssh.clone(),
            config.reachability_probe,
        );
        let installer = PackageInstaller::new(
            executor.clone(),
            scheduler,
            config.install.max_attempts,
            config.install.lock_interval(),
        )
        .with_cancellation(cancellation.clone());

        Self {
            config,
            connections,
            executor,
            installer,
            events,
            cancellation,
        }
    }

    /// Step runner recording into `result`
    pub fn steps<'a>(&'a self, connection: &'a Connection, result: &'a mut NodeResult) -> StepRunner<'a> {
        StepRunner::new(&self.executor, &self.events, connection, result)
    }
}
