//! Execution state models

use serde::{Deserialize, Serialize};
use std::fmt;

/// Provisioning state of a single node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeState {
    /// Waiting for a session
    PendingConnect,
    /// Session open and OS identified
    Connected,
    /// Forwarding, firewall and NAT basics applied
    NetworkConfigured,
    /// Relay (intermediate) or egress service (terminal) set up
    RoleConfigured,
    /// Hosts file backed up and patched
    HostsPatched,
    /// Relay port checked
    Verified,
    /// Node finished phase one
    Done,
    /// Initial session step failed
    Failed,
    /// Node never reached a usable session
    Skipped,
}

impl NodeState {
    /// Next state on the happy path, `None` once terminal
    pub fn advance(self) -> Option<NodeState> {
        match self {
            NodeState::PendingConnect => Some(NodeState::Connected),
            NodeState::Connected => Some(NodeState::NetworkConfigured),
            NodeState::NetworkConfigured => Some(NodeState::RoleConfigured),
            NodeState::RoleConfigured => Some(NodeState::HostsPatched),
            NodeState::HostsPatched => Some(NodeState::Verified),
            NodeState::Verified => Some(NodeState::Done),
            NodeState::Done | NodeState::Failed | NodeState::Skipped => None,
        }
    }

    /// Check whether `next` is a legal transition from this state
    pub fn can_transition_to(self, next: NodeState) -> bool {
        match next {
            NodeState::Failed | NodeState::Skipped => self == NodeState::PendingConnect,
            _ => self.advance() == Some(next),
        }
    }

    /// Check if the node is in a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, NodeState::Done | NodeState::Failed | NodeState::Skipped)
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeState::PendingConnect => "pending-connect",
            NodeState::Connected => "connected",
            NodeState::NetworkConfigured => "network-configured",
            NodeState::RoleConfigured => "role-configured",
            NodeState::HostsPatched => "hosts-patched",
            NodeState::Verified => "verified",
            NodeState::Done => "done",
            NodeState::Failed => "failed",
            NodeState::Skipped => "skipped",
        };
        f.write_str(name)
    }
}

/// Outcome of one remote step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Ok,
    Failed,
}

/// Outcome of one node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Success,
    Error,
    Skipped,
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeStatus::Success => write!(f, "success"),
            NodeStatus::Error => write!(f, "error"),
            NodeStatus::Skipped => write!(f, "skipped"),
        }
    }
}

/// Outcome of a whole provisioning or teardown run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverallStatus {
    Success,
    Error,
}
