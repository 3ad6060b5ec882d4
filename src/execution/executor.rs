//! Command executor - runs remote commands and records step outcomes

use crate::core::{NodeResult, StepOutcome};
use crate::execution::{Connection, EventSink, ExecutionEvent};
use crate::remote::{CommandError, RemoteCommand};
use tracing::{debug, warn};

/// Runs commands on an open connection
#[derive(Debug, Clone, Default)]
pub struct CommandExecutor;

impl CommandExecutor {
    pub fn new() -> Self {
        Self
    }

    /// Run a command and return its stdout.
    ///
    /// # Errors
    /// Returns `CommandError` with the remote exit code and stderr when the
    /// command exits non-zero, or exit code -1 when the transport failed.
    pub async fn execute(
        &self,
        connection: &Connection,
        command: &RemoteCommand,
    ) -> Result<String, CommandError> {
        debug!("Executing {} on {}", command.name(), connection.address());

        let output = connection.run(command).await.map_err(|e| {
            warn!("Transport failure running {} on {}: {}", command.name(), connection.address(), e);
            CommandError::from(e)
        })?;

        if !output.is_success() {
            let stderr = output.stderr.trim();
            let stderr = if stderr.is_empty() { output.stdout.trim() } else { stderr };
            return Err(CommandError::new(output.exit_code, stderr));
        }

        Ok(output.stdout)
    }
}

/// Runs described steps for one node and records each outcome
pub struct StepRunner<'a> {
    executor: &'a CommandExecutor,
    events: &'a EventSink,
    connection: &'a Connection,
    result: &'a mut NodeResult,
}

impl<'a> StepRunner<'a> {
    pub fn new(
        executor: &'a CommandExecutor,
        events: &'a EventSink,
        connection: &'a Connection,
        result: &'a mut NodeResult,
    ) -> Self {
        Self {
            executor,
            events,
            connection,
            result,
        }
    }

    pub fn connection(&self) -> &'a Connection {
        self.connection
    }

    pub fn address(&self) -> &'a str {
        self.connection.address()
    }

    pub fn result(&mut self) -> &mut NodeResult {
        &mut *self.result
    }

    /// Run a command without recording a step
    pub async fn query(&self, command: &RemoteCommand) -> Result<String, CommandError> {
        self.executor.execute(self.connection, command).await
    }

    /// Run a step whose failure is recorded but tolerated
    pub async fn run(&mut self, description: &str, command: RemoteCommand) -> Option<String> {
        self.try_run(description, command).await.ok()
    }

    /// Run a step and hand its failure back to the caller
    pub async fn try_run(
        &mut self,
        description: &str,
        command: RemoteCommand,
    ) -> Result<String, CommandError> {
        match self.executor.execute(self.connection, &command).await {
            Ok(output) => {
                self.record(StepOutcome::ok(description, output.clone()));
                Ok(output)
            }
            Err(e) => {
                warn!("{} on {} failed: {}", description, self.connection.address(), e);
                self.record(StepOutcome::failed(description, e.to_string()));
                Err(e)
            }
        }
    }

    /// Record an outcome produced outside a single command
    pub fn record(&mut self, outcome: StepOutcome) {
        let address = self.connection.address().to_string();
        let event = if outcome.is_ok() {
            ExecutionEvent::StepCompleted {
                address,
                description: outcome.description.clone(),
            }
        } else {
            ExecutionEvent::StepFailed {
                address,
                description: outcome.description.clone(),
                error: outcome.error.clone().unwrap_or_default(),
            }
        };
        self.events.emit(event);
        self.result.push(outcome);
    }
}
