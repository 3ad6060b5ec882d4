//! Step, node and pipeline results, plus their aggregation

use crate::core::{NodeStatus, OverallStatus, Role, StepStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Outcome of a single remote step on one node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepOutcome {
    pub description: String,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StepOutcome {
    pub fn ok(description: impl Into<String>, output: impl Into<String>) -> Self {
        let output = output.into();
        Self {
            description: description.into(),
            status: StepStatus::Ok,
            output: (!output.trim().is_empty()).then(|| output.trim().to_string()),
            error: None,
        }
    }

    pub fn failed(description: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            status: StepStatus::Failed,
            output: None,
            error: Some(error.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == StepStatus::Ok
    }
}

/// Per-node result with its ordered step outcomes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeResult {
    pub address: String,
    pub role: Role,
    pub status: NodeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub steps: Vec<StepOutcome>,
}

impl NodeResult {
    pub fn new(address: impl Into<String>, role: Role) -> Self {
        Self {
            address: address.into(),
            role,
            status: NodeStatus::Success,
            message: None,
            steps: Vec::new(),
        }
    }

    /// Record a step outcome
    pub fn push(&mut self, step: StepOutcome) {
        self.steps.push(step);
    }

    pub fn mark_error(&mut self, message: impl Into<String>) {
        self.status = NodeStatus::Error;
        self.message = Some(message.into());
    }

    pub fn mark_skipped(&mut self, reason: impl Into<String>) {
        self.status = NodeStatus::Skipped;
        self.message = Some(reason.into());
    }

    pub fn failed_steps(&self) -> impl Iterator<Item = &StepOutcome> {
        self.steps.iter().filter(|s| !s.is_ok())
    }

    pub fn has_failed_steps(&self) -> bool {
        self.failed_steps().next().is_some()
    }
}

/// How skipped nodes affect the overall status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SkipPolicy {
    /// Skipped nodes are reported but do not fail the run
    #[default]
    Lenient,
    /// Any skipped node fails the run
    Strict,
}

/// Aggregated result of a provisioning or teardown run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineResult {
    pub execution_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub overall_status: OverallStatus,
    /// Ordered by input position
    pub node_results: Vec<NodeResult>,
}

impl PipelineResult {
    /// Aggregate node results into one run result
    pub fn aggregate(
        execution_id: Uuid,
        started_at: DateTime<Utc>,
        node_results: Vec<NodeResult>,
        policy: SkipPolicy,
    ) -> Self {
        let overall_status = overall_status(&node_results, policy);
        Self {
            execution_id,
            started_at,
            finished_at: Utc::now(),
            overall_status,
            node_results,
        }
    }

    pub fn is_success(&self) -> bool {
        self.overall_status == OverallStatus::Success
    }

    pub fn node(&self, address: &str) -> Option<&NodeResult> {
        self.node_results.iter().find(|n| n.address == address)
    }

    pub fn count(&self, status: NodeStatus) -> usize {
        self.node_results.iter().filter(|n| n.status == status).count()
    }
}

/// Error iff any node errored (or, in strict mode, was skipped)
pub fn overall_status(node_results: &[NodeResult], policy: SkipPolicy) -> OverallStatus {
    let failing = node_results.iter().any(|n| match n.status {
        NodeStatus::Error => true,
        NodeStatus::Skipped => policy == SkipPolicy::Strict,
        NodeStatus::Success => false,
    });
    if failing {
        OverallStatus::Error
    } else {
        OverallStatus::Success
    }
}

/// Collects node results by input position; safe for concurrent insertion
#[derive(Debug, Default)]
pub struct ResultCollector {
    results: Mutex<BTreeMap<usize, NodeResult>>,
}

impl ResultCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, index: usize, result: NodeResult) {
        self.results.lock().await.insert(index, result);
    }

    pub async fn get(&self, index: usize) -> Option<NodeResult> {
        self.results.lock().await.get(&index).cloned()
    }

    /// Apply `f` to the result stored at `index`, if any
    pub async fn update<F>(&self, index: usize, f: F)
    where
        F: FnOnce(&mut NodeResult),
    {
        if let Some(result) = self.results.lock().await.get_mut(&index) {
            f(result);
        }
    }

    /// Results in input order
    pub async fn snapshot(&self) -> Vec<NodeResult> {
        self.results.lock().await.values().cloned().collect()
    }

    pub async fn into_results(self) -> Vec<NodeResult> {
        self.results.into_inner().into_values().collect()
    }
}
