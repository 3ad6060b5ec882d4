//! Main orchestrator - validates requests and runs them across the chain

use crate::core::{
    resolve, Hop, Node, NodeResult, OrchestratorConfig, PipelineResult, ProvisionJob,
    ProvisionRequest, ProvisionResponse, ResultCollector, TeardownRequest, TeardownResponse,
    ValidationError,
};
use crate::execution::{
    Cancellation, EventSink, ExecutionEvent, Operation, PipelineContext, ProvisioningPipeline,
    Scheduler, SchedulingStrategy, TeardownPipeline, TokioScheduler,
};
use crate::remote::RemoteBackend;
use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{error, info};
use uuid::Uuid;

/// Entry point for provisioning and teardown runs
pub struct Orchestrator {
    backend: Arc<dyn RemoteBackend>,
    scheduler: Arc<dyn Scheduler>,
    config: Arc<OrchestratorConfig>,
    events: EventSink,
    cancellation: Cancellation,
}

impl Orchestrator {
    pub fn new(backend: Arc<dyn RemoteBackend>, config: OrchestratorConfig) -> Self {
        Self {
            backend,
            scheduler: Arc::new(TokioScheduler),
            config: Arc::new(config),
            events: EventSink::new(),
            cancellation: Cancellation::new(),
        }
    }

    /// Replace the source of retry and lock waits
    pub fn with_scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = scheduler;
        self
    }

    pub fn with_cancellation(mut self, cancellation: Cancellation) -> Self {
        self.cancellation = cancellation;
        self
    }

    /// Handle that cancels runs of this orchestrator
    pub fn cancellation(&self) -> Cancellation {
        self.cancellation.clone()
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Add an event handler
    pub fn add_event_handler<F>(&mut self, handler: F)
    where
        F: Fn(&ExecutionEvent) + Send + Sync + 'static,
    {
        self.events.add_handler(handler);
    }

    /// Validate and run a provisioning request.
    ///
    /// # Errors
    /// Returns `ValidationError` for a malformed request; nothing remote
    /// happens in that case. Node failures are reported in the response.
    pub async fn provision(&self, request: ProvisionRequest) -> Result<ProvisionResponse, ValidationError> {
        let job = request.validate()?;
        let relay = job.relay.clone();
        let result = self.provision_job(job).await;
        Ok(ProvisionResponse::from_result(&result, &relay))
    }

    /// Validate and run a teardown request
    pub async fn teardown(&self, request: TeardownRequest) -> Result<TeardownResponse, ValidationError> {
        let nodes = request.validate()?;
        let result = self.teardown_nodes(nodes).await;
        Ok(TeardownResponse::from_result(&result))
    }

    /// Provision every node of a validated job, then run finalization
    pub async fn provision_job(&self, job: ProvisionJob) -> PipelineResult {
        let execution_id = Uuid::new_v4();
        let started_at = Utc::now();
        let hops = resolve(&job.nodes);

        info!("Starting provisioning run {} over {} node(s)", execution_id, hops.len());
        self.events.emit(ExecutionEvent::RunStarted {
            execution_id,
            operation: Operation::Provision,
            node_count: hops.len(),
        });

        let pipeline = ProvisioningPipeline::new(self.context(), job);
        let collector = Arc::new(ResultCollector::new());

        let runner = pipeline.clone();
        self.run_nodes(&hops, &collector, move |hop| {
            let pipeline = runner.clone();
            async move { pipeline.provision_node(&hop).await }
        })
        .await;

        pipeline.finalize(&hops, &collector).await;

        self.finish(execution_id, started_at, collector).await
    }

    /// Tear down the given nodes
    pub async fn teardown_nodes(&self, nodes: Vec<Node>) -> PipelineResult {
        let execution_id = Uuid::new_v4();
        let started_at = Utc::now();
        let hops = resolve(&nodes);

        info!("Starting teardown run {} over {} node(s)", execution_id, hops.len());
        self.events.emit(ExecutionEvent::RunStarted {
            execution_id,
            operation: Operation::Teardown,
            node_count: hops.len(),
        });

        let pipeline = TeardownPipeline::new(self.context());
        let collector = Arc::new(ResultCollector::new());

        self.run_nodes(&hops, &collector, move |hop| {
            let pipeline = pipeline.clone();
            async move { pipeline.teardown_node(&hop).await }
        })
        .await;

        self.finish(execution_id, started_at, collector).await
    }

    fn context(&self) -> PipelineContext {
        PipelineContext::new(
            self.backend.clone(),
            self.scheduler.clone(),
            self.config.clone(),
            self.events.clone(),
            self.cancellation.clone(),
        )
    }

    /// Run `run` for every hop according to the configured strategy.
    ///
    /// Parallel runs gather every task; a task that panics is recorded as an
    /// error for its node and never affects the others.
    async fn run_nodes<F, Fut>(&self, hops: &[Hop], collector: &Arc<ResultCollector>, run: F)
    where
        F: Fn(Hop) -> Fut,
        Fut: Future<Output = NodeResult> + Send + 'static,
    {
        match self.config.strategy {
            SchedulingStrategy::Sequential => {
                for hop in hops {
                    let result = run(hop.clone()).await;
                    collector.insert(hop.index, result).await;
                }
            }
            SchedulingStrategy::Parallel => {
                let mut tasks = JoinSet::new();
                for hop in hops {
                    let node_run = run(hop.clone());
                    let collector = collector.clone();
                    let index = hop.index;
                    tasks.spawn(async move {
                        let result = node_run.await;
                        collector.insert(index, result).await;
                    });
                }

                while let Some(joined) = tasks.join_next().await {
                    if let Err(e) = joined {
                        error!("Node task failed: {}", e);
                    }
                }

                for hop in hops {
                    if collector.get(hop.index).await.is_none() {
                        let mut result = NodeResult::new(hop.node.address.clone(), hop.role);
                        result.mark_error("node task aborted");
                        collector.insert(hop.index, result).await;
                    }
                }
            }
        }
    }

    async fn finish(
        &self,
        execution_id: Uuid,
        started_at: chrono::DateTime<Utc>,
        collector: Arc<ResultCollector>,
    ) -> PipelineResult {
        let results = match Arc::try_unwrap(collector) {
            Ok(collector) => collector.into_results().await,
            Err(shared) => shared.snapshot().await,
        };
        let result =
            PipelineResult::aggregate(execution_id, started_at, results, self.config.skip_policy());

        info!(
            "Run {} finished with status {:?}",
            execution_id, result.overall_status
        );
        self.events.emit(ExecutionEvent::RunFinished {
            execution_id,
            status: result.overall_status,
        });
        result
    }
}
