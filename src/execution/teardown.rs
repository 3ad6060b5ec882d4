//! Teardown pipeline - reverts everything provisioning installed

use crate::core::{Hop, NodeResult, StepOutcome};
use crate::execution::{ExecutionEvent, PipelineContext, StepRunner};
use crate::remote::{ConnectionError, RemoteCommand};
use tracing::{info, warn};

/// Resets nodes to their pre-provisioning state
#[derive(Clone)]
pub struct TeardownPipeline {
    ctx: PipelineContext,
}

impl TeardownPipeline {
    pub fn new(ctx: PipelineContext) -> Self {
        Self { ctx }
    }

    /// Tear down one node. Every step runs regardless of earlier failures.
    pub async fn teardown_node(&self, hop: &Hop) -> NodeResult {
        info!("Tearing down {}", hop.node.address);
        self.ctx.events.emit(ExecutionEvent::NodeStarted {
            address: hop.node.address.clone(),
            role: hop.role,
        });

        let result = self.teardown(hop).await;

        info!("{} teardown finished with status {}", result.address, result.status);
        self.ctx.events.emit(ExecutionEvent::NodeFinished {
            address: result.address.clone(),
            status: result.status,
        });
        result
    }

    async fn teardown(&self, hop: &Hop) -> NodeResult {
        let mut result = NodeResult::new(hop.node.address.clone(), hop.role);

        let connection = match self
            .ctx
            .connections
            .establish(&hop.node, &self.ctx.config.teardown_connect, &self.ctx.cancellation)
            .await
        {
            Ok(connection) => connection,
            Err(e) => {
                let reason = match e {
                    ConnectionError::Cancelled { .. } => "cancelled".to_string(),
                    other => {
                        result.push(StepOutcome::failed("connect", other.to_string()));
                        other.to_string()
                    }
                };
                warn!("Skipping teardown of {}: {}", hop.node.address, reason);
                self.ctx.events.emit(ExecutionEvent::NodeSkipped {
                    address: hop.node.address.clone(),
                    reason: reason.clone(),
                });
                result.mark_skipped(reason);
                return result;
            }
        };
        result.push(StepOutcome::ok(
            "connect",
            format!("connected after {} attempt(s)", connection.attempts()),
        ));

        {
            let mut steps = self.ctx.steps(&connection, &mut result);
            self.reset(&mut steps).await;
        }
        connection.close().await;

        if result.has_failed_steps() {
            let failed: Vec<_> = result
                .failed_steps()
                .map(|s| s.description.clone())
                .collect();
            result.mark_error(format!("failed steps: {}", failed.join(", ")));
        }
        result
    }

    async fn reset(&self, steps: &mut StepRunner<'_>) {
        let config = &self.ctx.config;
        let egress = &config.egress;
        let relay = &config.relay;
        let hosts = &config.hosts;

        let plan = vec![
            (
                "stop egress service",
                RemoteCommand::ServiceStop { unit: egress.unit() },
            ),
            (
                "stop packaged egress service",
                RemoteCommand::ServiceStop {
                    unit: egress.default_unit.clone(),
                },
            ),
            (
                "stop relay container",
                RemoteCommand::ComposeDown {
                    file: relay.compose_file(),
                },
            ),
            (
                "remove relay files",
                RemoteCommand::RemovePath {
                    path: relay.compose_dir.clone(),
                },
            ),
            (
                "remove egress config",
                RemoteCommand::RemovePath {
                    path: egress.config_file(),
                },
            ),
            (
                "remove egress unit",
                RemoteCommand::RemovePath {
                    path: egress.unit_file(),
                },
            ),
            ("reload units", RemoteCommand::ReloadUnits),
            (
                "purge egress package",
                RemoteCommand::PackagePurge {
                    package: egress.package.clone(),
                },
            ),
            ("reset firewall", RemoteCommand::ResetFirewall),
            ("persist empty firewall", RemoteCommand::PersistFirewall),
            ("disable IP forwarding", RemoteCommand::DisableIpForwarding),
            (
                "restore hosts file",
                RemoteCommand::RestoreHosts {
                    path: hosts.path.clone(),
                    backup: hosts.backup_path.clone(),
                    tag: hosts.tag.clone(),
                },
            ),
            ("clear shell history", RemoteCommand::ClearShellHistory),
            ("clear temp and log files", RemoteCommand::ClearTraces),
        ];

        for (description, command) in plan {
            steps.run(description, command).await;
        }
    }
}
