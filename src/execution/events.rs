//! Execution events and their fan-out to handlers

use crate::core::{NodeState, NodeStatus, OverallStatus, Role};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Which kind of run is executing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Provision,
    Teardown,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Provision => write!(f, "provision"),
            Operation::Teardown => write!(f, "teardown"),
        }
    }
}

/// Events that can occur during a run
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionEvent {
    RunStarted {
        execution_id: Uuid,
        operation: Operation,
        node_count: usize,
    },
    NodeStarted {
        address: String,
        role: Role,
    },
    ConnectAttemptFailed {
        address: String,
        attempt: u32,
        max_attempts: u32,
        error: String,
    },
    Connected {
        address: String,
        attempts: u32,
    },
    NodeStateChanged {
        address: String,
        state: NodeState,
    },
    StepCompleted {
        address: String,
        description: String,
    },
    StepFailed {
        address: String,
        description: String,
        error: String,
    },
    NodeSkipped {
        address: String,
        reason: String,
    },
    NodeFinished {
        address: String,
        status: NodeStatus,
    },
    FinalizationStarted,
    FinalizationWithheld {
        reason: String,
    },
    RunFinished {
        execution_id: Uuid,
        status: OverallStatus,
    },
}

/// Type for event handlers
pub type EventHandler = Arc<dyn Fn(&ExecutionEvent) + Send + Sync>;

/// Cloneable set of handlers every event is delivered to
#[derive(Clone, Default)]
pub struct EventSink {
    handlers: Vec<EventHandler>,
}

impl EventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_handler<F>(&mut self, handler: F)
    where
        F: Fn(&ExecutionEvent) + Send + Sync + 'static,
    {
        self.handlers.push(Arc::new(handler));
    }

    pub fn emit(&self, event: ExecutionEvent) {
        for handler in &self.handlers {
            handler(&event);
        }
    }
}

impl fmt::Debug for EventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSink")
            .field("handlers", &self.handlers.len())
            .finish()
    }
}
