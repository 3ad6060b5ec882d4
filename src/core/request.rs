//! Provision and teardown request/response documents

use crate::core::node::{is_valid_address, is_valid_user};
use crate::core::{
    Node, NodeResult, NodeStatus, OverallStatus, PipelineResult, RelayConfig, Role,
    StaticHostEntry, StepOutcome, UpstreamAllowList,
};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashSet;
use thiserror::Error;
use uuid::Uuid;

/// Malformed request, surfaced before any remote action
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("node list is empty")]
    EmptyNodeList,

    #[error("node {index} has an empty address")]
    EmptyAddress { index: usize },

    #[error("node {index} has an invalid address '{address}'")]
    InvalidAddress { index: usize, address: String },

    #[error("node {index} has an invalid login user '{user}'")]
    InvalidUser { index: usize, user: String },

    #[error("duplicate node address: {0}")]
    DuplicateAddress(String),

    #[error("nodeCount is {declared} but {actual} nodes were given")]
    NodeCountMismatch { declared: usize, actual: usize },

    #[error("relay port must be between 1 and 65535")]
    InvalidPort,

    #[error("relay secret is empty")]
    EmptySecret,

    #[error("invalid static host entry '{entry}': {reason}")]
    InvalidHostEntry { entry: String, reason: String },

    #[error("upstream allow-list for '{0}' has no addresses")]
    EmptyAllowList(String),

    #[error("malformed request: {0}")]
    Malformed(String),
}

/// Incoming provisioning request
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionRequest {
    #[serde(default, alias = "server_count")]
    pub node_count: Option<usize>,

    #[serde(alias = "servers")]
    pub nodes: Vec<Node>,

    #[serde(alias = "shadowsocks")]
    pub relay: RelayConfig,

    #[serde(default, alias = "hosts")]
    pub static_hosts: Vec<String>,

    /// One allow-list object or an array of them
    #[serde(default, alias = "upstreams", deserialize_with = "one_or_many")]
    pub upstream: Vec<UpstreamAllowList>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

fn one_or_many<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(match Option::<OneOrMany<T>>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(OneOrMany::One(item)) => vec![item],
        Some(OneOrMany::Many(items)) => items,
    })
}

/// A validated provisioning job
#[derive(Debug, Clone)]
pub struct ProvisionJob {
    pub nodes: Vec<Node>,
    pub relay: RelayConfig,
    pub static_hosts: Vec<StaticHostEntry>,
    pub upstream: Vec<UpstreamAllowList>,
}

impl ProvisionRequest {
    /// Parse a request from JSON
    pub fn from_json(json: &str) -> Result<Self, ValidationError> {
        serde_json::from_str(json).map_err(|e| ValidationError::Malformed(e.to_string()))
    }

    /// Validate the request and turn it into a job
    pub fn validate(mut self) -> Result<ProvisionJob, ValidationError> {
        validate_nodes(&mut self.nodes)?;

        if let Some(declared) = self.node_count {
            if declared != self.nodes.len() {
                return Err(ValidationError::NodeCountMismatch {
                    declared,
                    actual: self.nodes.len(),
                });
            }
        }
        if self.relay.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        if self.relay.secret.is_empty() {
            return Err(ValidationError::EmptySecret);
        }

        let static_hosts = self
            .static_hosts
            .iter()
            .map(|entry| StaticHostEntry::parse(entry))
            .collect::<Result<Vec<_>, _>>()?;

        for upstream in &self.upstream {
            if upstream.addresses.is_empty() {
                return Err(ValidationError::EmptyAllowList(upstream.domain.clone()));
            }
            for entry in upstream.entries() {
                StaticHostEntry::parse(&format!("{}:{}", entry.hostname, entry.address))?;
            }
        }

        Ok(ProvisionJob {
            nodes: self.nodes,
            relay: self.relay,
            static_hosts,
            upstream: self.upstream,
        })
    }
}

/// Incoming teardown request: `{ "nodes": [...] }` or a bare array
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TeardownRequest {
    Wrapped {
        #[serde(alias = "servers")]
        nodes: Vec<Node>,
    },
    Bare(Vec<Node>),
}

impl TeardownRequest {
    pub fn from_json(json: &str) -> Result<Self, ValidationError> {
        serde_json::from_str(json).map_err(|_| {
            ValidationError::Malformed(
                "expected an object { \"nodes\": [...] } or an array of nodes".to_string(),
            )
        })
    }

    /// Validate and return the node list
    pub fn validate(self) -> Result<Vec<Node>, ValidationError> {
        let mut nodes = match self {
            TeardownRequest::Wrapped { nodes } | TeardownRequest::Bare(nodes) => nodes,
        };
        validate_nodes(&mut nodes)?;
        Ok(nodes)
    }
}

/// Check addresses and users, storing them trimmed. Both end up on the ssh
/// command line, so anything but a plain address or login name is rejected.
fn validate_nodes(nodes: &mut [Node]) -> Result<(), ValidationError> {
    if nodes.is_empty() {
        return Err(ValidationError::EmptyNodeList);
    }
    let mut seen = HashSet::new();
    for (index, node) in nodes.iter_mut().enumerate() {
        let address = node.address.trim().to_string();
        if address.is_empty() {
            return Err(ValidationError::EmptyAddress { index });
        }
        if !is_valid_address(&address) {
            return Err(ValidationError::InvalidAddress { index, address });
        }
        if !seen.insert(address.clone()) {
            return Err(ValidationError::DuplicateAddress(address));
        }
        node.address = address;

        if let Some(user) = node.user.take() {
            let user = user.trim().to_string();
            if !user.is_empty() {
                if !is_valid_user(&user) {
                    return Err(ValidationError::InvalidUser { index, user });
                }
                node.user = Some(user);
            }
        }
    }
    Ok(())
}

/// Where clients reach the egress service
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelayEndpoint {
    pub address: String,
    pub port: u16,
    pub secret: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionNodeResponse {
    pub address: String,
    pub role: Role,
    pub status: NodeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub steps: Vec<StepOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relay_endpoint: Option<RelayEndpoint>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionResponse {
    pub execution_id: Uuid,
    pub status: OverallStatus,
    pub nodes: Vec<ProvisionNodeResponse>,
}

impl ProvisionResponse {
    pub fn from_result(result: &PipelineResult, relay: &RelayConfig) -> Self {
        let nodes = result
            .node_results
            .iter()
            .map(|node| {
                let relay_endpoint = (node.role == Role::Terminal
                    && node.status == NodeStatus::Success)
                    .then(|| RelayEndpoint {
                        address: node.address.clone(),
                        port: relay.port,
                        secret: relay.secret.clone(),
                    });
                ProvisionNodeResponse {
                    address: node.address.clone(),
                    role: node.role,
                    status: node.status,
                    message: node.message.clone(),
                    steps: node.steps.clone(),
                    relay_endpoint,
                }
            })
            .collect();

        Self {
            execution_id: result.execution_id,
            status: result.overall_status,
            nodes,
        }
    }
}

/// Teardown status as reported to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TeardownStatus {
    ResetComplete,
    Error,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TeardownNodeResponse {
    pub address: String,
    pub status: NodeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub steps: Vec<StepOutcome>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TeardownResponse {
    pub execution_id: Uuid,
    pub status: TeardownStatus,
    pub results: Vec<TeardownNodeResponse>,
}

impl TeardownResponse {
    pub fn from_result(result: &PipelineResult) -> Self {
        let status = match result.overall_status {
            OverallStatus::Success => TeardownStatus::ResetComplete,
            OverallStatus::Error => TeardownStatus::Error,
        };
        Self {
            execution_id: result.execution_id,
            status,
            results: result.node_results.iter().map(teardown_node).collect(),
        }
    }
}

fn teardown_node(node: &NodeResult) -> TeardownNodeResponse {
    TeardownNodeResponse {
        address: node.address.clone(),
        status: node.status,
        message: node.message.clone(),
        steps: node.steps.clone(),
    }
}
