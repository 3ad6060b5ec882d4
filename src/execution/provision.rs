//! Provisioning pipeline - per-node state machine plus the finalization pass

use crate::core::{
    Hop, NodeResult, NodeState, NodeStatus, ProvisionJob, ResultCollector, Role, StepOutcome,
};
use crate::execution::{ExecutionEvent, PipelineContext, StepRunner};
use crate::remote::templates::{egress_unit_file, relay_compose_file, EgressServiceConfig};
use crate::remote::{is_listening, ConnectionError, RemoteCommand};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Provisions nodes of one job
#[derive(Clone)]
pub struct ProvisioningPipeline {
    ctx: PipelineContext,
    job: Arc<ProvisionJob>,
}

impl ProvisioningPipeline {
    pub fn new(ctx: PipelineContext, job: ProvisionJob) -> Self {
        Self {
            ctx,
            job: Arc::new(job),
        }
    }

    pub fn job(&self) -> &ProvisionJob {
        &self.job
    }

    /// Drive one node from `PendingConnect` to a terminal state
    pub async fn provision_node(&self, hop: &Hop) -> NodeResult {
        info!("Provisioning {} as {}", hop.node.address, hop.role);
        self.ctx.events.emit(ExecutionEvent::NodeStarted {
            address: hop.node.address.clone(),
            role: hop.role,
        });

        let result = self.provision(hop).await;

        info!("{} finished with status {}", result.address, result.status);
        self.ctx.events.emit(ExecutionEvent::NodeFinished {
            address: result.address.clone(),
            status: result.status,
        });
        result
    }

    async fn provision(&self, hop: &Hop) -> NodeResult {
        let mut result = NodeResult::new(hop.node.address.clone(), hop.role);

        if self.ctx.cancellation.is_cancelled() {
            self.skip(&mut result, "cancelled");
            return result;
        }

        let connection = match self
            .ctx
            .connections
            .establish(&hop.node, &self.ctx.config.connect, &self.ctx.cancellation)
            .await
        {
            Ok(connection) => connection,
            Err(ConnectionError::Cancelled { .. }) => {
                self.skip(&mut result, "cancelled");
                return result;
            }
            Err(e) => {
                result.push(StepOutcome::failed("connect", e.to_string()));
                self.skip(&mut result, e.to_string());
                return result;
            }
        };
        result.push(StepOutcome::ok(
            "connect",
            format!("connected after {} attempt(s)", connection.attempts()),
        ));

        {
            let mut steps = self.ctx.steps(&connection, &mut result);
            self.run_states(hop, &mut steps).await;
        }

        connection.close().await;
        result
    }

    async fn run_states(&self, hop: &Hop, steps: &mut StepRunner<'_>) {
        if let Err(e) = steps.try_run("query OS release", RemoteCommand::OsRelease).await {
            steps.result().mark_error(format!("session unusable: {}", e));
            self.transition(hop, NodeState::Failed);
            return;
        }

        let mut state = NodeState::Connected;
        self.transition(hop, state);

        while let Some(next) = state.advance() {
            if self.ctx.cancellation.is_cancelled() {
                let reason = "cancelled".to_string();
                self.ctx.events.emit(ExecutionEvent::NodeSkipped {
                    address: hop.node.address.clone(),
                    reason: reason.clone(),
                });
                warn!("{} cancelled before {}", hop.node.address, next);
                steps.result().mark_skipped(reason);
                return;
            }

            self.enter(next, hop, steps).await;
            state = next;
            self.transition(hop, state);
        }
    }

    fn transition(&self, hop: &Hop, state: NodeState) {
        debug!("{} -> {}", hop.node.address, state);
        self.ctx.events.emit(ExecutionEvent::NodeStateChanged {
            address: hop.node.address.clone(),
            state,
        });
    }

    fn skip(&self, result: &mut NodeResult, reason: impl Into<String>) {
        let reason = reason.into();
        warn!("Skipping {}: {}", result.address, reason);
        self.ctx.events.emit(ExecutionEvent::NodeSkipped {
            address: result.address.clone(),
            reason: reason.clone(),
        });
        result.mark_skipped(reason);
    }

    /// Perform the work that leads into `state`
    async fn enter(&self, state: NodeState, hop: &Hop, steps: &mut StepRunner<'_>) {
        match state {
            NodeState::NetworkConfigured => self.configure_network(steps).await,
            NodeState::RoleConfigured => match hop.role {
                Role::Intermediate => self.configure_relay(hop, steps).await,
                Role::Terminal => self.configure_egress(steps).await,
            },
            NodeState::HostsPatched => self.patch_hosts(hop, steps).await,
            NodeState::Verified => self.verify(hop, steps).await,
            NodeState::Done => self.scrub(steps).await,
            _ => {}
        }
    }

    async fn configure_network(&self, steps: &mut StepRunner<'_>) {
        let port = self.job.relay.port;
        steps.run("enable IP forwarding", RemoteCommand::EnableIpForwarding).await;
        steps.run("disable host firewall", RemoteCommand::DisableHostFirewall).await;
        steps
            .run(&format!("open relay port {}", port), RemoteCommand::AllowPort { port })
            .await;
        steps.run("add NAT masquerade", RemoteCommand::Masquerade).await;
    }

    async fn install(&self, steps: &mut StepRunner<'_>, package: &str, service: Option<&str>) {
        let description = format!("install {}", package);
        let outcome = self
            .ctx
            .installer
            .ensure_installed(steps.connection(), package, service)
            .await;
        match outcome {
            Ok(outcome) => steps.record(StepOutcome::ok(description, outcome.to_string())),
            Err(e) => steps.record(StepOutcome::failed(description, e.to_string())),
        }
    }

    async fn configure_relay(&self, hop: &Hop, steps: &mut StepRunner<'_>) {
        let settings = &self.ctx.config.relay;
        self.install(steps, &settings.runtime_package, Some(&settings.runtime_service))
            .await;

        let Some(next_hop) = hop.next_hop.as_deref() else {
            steps.record(StepOutcome::failed("write relay compose file", "no next hop"));
            return;
        };
        let compose = match relay_compose_file(settings, &self.job.relay, next_hop) {
            Ok(compose) => compose,
            Err(e) => {
                steps.record(StepOutcome::failed("write relay compose file", e.to_string()));
                return;
            }
        };

        steps
            .run(
                "create relay directory",
                RemoteCommand::MakeDir {
                    path: settings.compose_dir.clone(),
                },
            )
            .await;
        steps
            .run(
                "write relay compose file",
                RemoteCommand::WriteFile {
                    path: settings.compose_file(),
                    contents: compose,
                    mode: 0o600,
                },
            )
            .await;
        steps
            .run(
                &format!("start relay forwarding to {}", next_hop),
                RemoteCommand::ComposeUp {
                    file: settings.compose_file(),
                },
            )
            .await;
    }

    async fn configure_egress(&self, steps: &mut StepRunner<'_>) {
        let settings = &self.ctx.config.egress;
        let unit = settings.unit();
        self.install(steps, &settings.package, Some(&unit)).await;

        steps
            .run(
                "disable packaged egress unit",
                RemoteCommand::ServiceStop {
                    unit: settings.default_unit.clone(),
                },
            )
            .await;

        match EgressServiceConfig::new(settings, &self.job.relay).to_json() {
            Ok(config) => {
                steps
                    .run(
                        "create egress config directory",
                        RemoteCommand::MakeDir {
                            path: settings.config_dir.clone(),
                        },
                    )
                    .await;
                steps
                    .run(
                        "write egress config",
                        RemoteCommand::WriteFile {
                            path: settings.config_file(),
                            contents: config,
                            mode: 0o600,
                        },
                    )
                    .await;
            }
            Err(e) => steps.record(StepOutcome::failed("write egress config", e.to_string())),
        }

        steps
            .run(
                "write egress unit",
                RemoteCommand::WriteFile {
                    path: settings.unit_file(),
                    contents: egress_unit_file(settings),
                    mode: 0o644,
                },
            )
            .await;
        steps.run("reload units", RemoteCommand::ReloadUnits).await;
        steps
            .run(
                "enable egress service",
                RemoteCommand::ServiceEnable { unit: unit.clone() },
            )
            .await;

        let port = self.job.relay.port;
        steps
            .run(&format!("open service port {}", port), RemoteCommand::AllowPort { port })
            .await;
    }

    async fn patch_hosts(&self, hop: &Hop, steps: &mut StepRunner<'_>) {
        let hosts = &self.ctx.config.hosts;
        steps
            .run(
                "back up hosts file",
                RemoteCommand::BackupHosts {
                    path: hosts.path.clone(),
                    backup: hosts.backup_path.clone(),
                },
            )
            .await;

        let mut entries = self.job.static_hosts.clone();
        if hop.is_terminal() {
            for upstream in &self.job.upstream {
                entries.extend(upstream.entries());
            }
        }
        if entries.is_empty() {
            return;
        }

        steps
            .run(
                &format!("append {} hosts entries", entries.len()),
                RemoteCommand::AppendHosts {
                    path: hosts.path.clone(),
                    entries,
                    tag: hosts.tag.clone(),
                },
            )
            .await;
    }

    /// Check the port, restart once if needed, re-check once.
    ///
    /// A port still down after the restart is only recorded as a failed
    /// step; the node carries on to `Done`.
    async fn verify(&self, hop: &Hop, steps: &mut StepRunner<'_>) {
        let port = self.job.relay.port;
        if self.check_port(steps, &format!("check port {}", port)).await {
            return;
        }

        let restart = match hop.role {
            Role::Intermediate => RemoteCommand::ComposeRestart {
                file: self.ctx.config.relay.compose_file(),
            },
            Role::Terminal => RemoteCommand::ServiceRestart {
                unit: self.ctx.config.egress.unit(),
            },
        };
        steps.run("restart relay service", restart).await;

        if !self.check_port(steps, &format!("re-check port {}", port)).await {
            warn!("Port {} on {} is still not listening after restart", port, hop.node.address);
        }
    }

    async fn check_port(&self, steps: &mut StepRunner<'_>, description: &str) -> bool {
        let port = self.job.relay.port;
        match steps.query(&RemoteCommand::ListeningSockets).await {
            Ok(output) if is_listening(&output, port) => {
                steps.record(StepOutcome::ok(description, "listening"));
                true
            }
            Ok(_) => {
                steps.record(StepOutcome::failed(description, format!("nothing listening on {}", port)));
                false
            }
            Err(e) => {
                steps.record(StepOutcome::failed(description, e.to_string()));
                false
            }
        }
    }

    async fn scrub(&self, steps: &mut StepRunner<'_>) {
        if !self.ctx.config.scrub_traces_after_provision {
            return;
        }
        steps.run("clear shell history", RemoteCommand::ClearShellHistory).await;
        steps.run("clear temp and log files", RemoteCommand::ClearTraces).await;
    }

    /// Second pass over nodes that finished phase one successfully.
    ///
    /// Withheld entirely when any node ended in error. Runs in chain order;
    /// outcomes are appended to each node's steps and never change its status.
    pub async fn finalize(&self, hops: &[Hop], collector: &ResultCollector) {
        let results = collector.snapshot().await;
        if let Some(failed) = results.iter().find(|r| r.status == NodeStatus::Error) {
            let reason = format!("{} ended in error", failed.address);
            warn!("Finalization withheld: {}", reason);
            self.ctx
                .events
                .emit(ExecutionEvent::FinalizationWithheld { reason });
            return;
        }
        if !results.iter().any(|r| r.status == NodeStatus::Success) {
            self.ctx.events.emit(ExecutionEvent::FinalizationWithheld {
                reason: "no node was provisioned".to_string(),
            });
            return;
        }

        info!("Starting finalization pass");
        self.ctx.events.emit(ExecutionEvent::FinalizationStarted);

        for hop in hops {
            let provisioned = collector
                .get(hop.index)
                .await
                .is_some_and(|r| r.status == NodeStatus::Success);
            if !provisioned {
                continue;
            }
            if self.ctx.cancellation.is_cancelled() {
                warn!("Finalization cancelled before {}", hop.node.address);
                break;
            }

            let mut scratch = NodeResult::new(hop.node.address.clone(), hop.role);
            match self
                .ctx
                .connections
                .establish(&hop.node, &self.ctx.config.connect, &self.ctx.cancellation)
                .await
            {
                Ok(connection) => {
                    {
                        let mut steps = self.ctx.steps(&connection, &mut scratch);
                        match hop.role {
                            Role::Intermediate => self.finalize_intermediate(hop, &mut steps).await,
                            Role::Terminal => self.finalize_terminal(&mut steps).await,
                        }
                    }
                    connection.close().await;
                }
                Err(e) => {
                    warn!("Finalization could not reach {}: {}", hop.node.address, e);
                    scratch.push(StepOutcome::failed("finalize: reconnect", e.to_string()));
                }
            }

            collector
                .update(hop.index, |result| result.steps.extend(scratch.steps))
                .await;
        }
    }

    async fn finalize_intermediate(&self, hop: &Hop, steps: &mut StepRunner<'_>) {
        let Some(next_hop) = hop.next_hop.clone() else {
            return;
        };
        let port = self.job.relay.port;
        steps
            .run(
                &format!("finalize: forward port {} to {}", port, next_hop),
                RemoteCommand::ForwardPort {
                    port,
                    destination: next_hop,
                },
            )
            .await;
        steps
            .run("finalize: re-apply NAT masquerade", RemoteCommand::Masquerade)
            .await;
    }

    async fn finalize_terminal(&self, steps: &mut StepRunner<'_>) {
        let ports = vec![self.ctx.config.ssh.port, self.job.relay.port];
        steps
            .run(
                "finalize: lock down inbound firewall",
                RemoteCommand::LockDownFirewall { ports },
            )
            .await;
        steps
            .run("finalize: persist firewall rules", RemoteCommand::PersistFirewall)
            .await;
        steps
            .run(
                "finalize: restart egress service",
                RemoteCommand::ServiceRestart {
                    unit: self.ctx.config.egress.unit(),
                },
            )
            .await;
    }
}
