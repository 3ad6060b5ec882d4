//! Session acquisition with probe and bounded retry

use crate::core::{Node, SshSettings};
use crate::execution::{Cancellation, EventSink, ExecutionEvent, RetryPolicy, Scheduler};
use crate::remote::{
    CommandOutput, ConnectionError, RemoteBackend, RemoteCommand, RemoteError, RemoteSession,
    SessionTarget,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// An open session to one node; release it with [`Connection::close`].
///
/// A connection dropped without `close` (a panicking or aborted node task)
/// still releases its session through [`RemoteSession::release`].
pub struct Connection {
    address: String,
    attempts: u32,
    session: Box<dyn RemoteSession>,
    closed: bool,
}

impl Connection {
    /// Wrap an already open session
    pub fn new(address: impl Into<String>, session: Box<dyn RemoteSession>) -> Self {
        Self {
            address: address.into(),
            attempts: 1,
            session,
            closed: false,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Attempts it took to open the session
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub async fn run(&self, command: &RemoteCommand) -> Result<CommandOutput, RemoteError> {
        self.session.run(command).await
    }

    /// Release the session; failures are logged, never surfaced
    pub async fn close(mut self) {
        self.closed = true;
        if let Err(e) = self.session.close().await {
            warn!("Failed to close session to {}: {}", self.address, e);
        } else {
            debug!("Closed session to {}", self.address);
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if !self.closed {
            warn!("Session to {} dropped without close, releasing", self.address);
            self.session.release();
        }
    }
}

/// Opens sessions to nodes
#[derive(Clone)]
pub struct ConnectionManager {
    backend: Arc<dyn RemoteBackend>,
    scheduler: Arc<dyn Scheduler>,
    events: EventSink,
    ssh: SshSettings,
    probe_first: bool,
}

impl ConnectionManager {
    pub fn new(
        backend: Arc<dyn RemoteBackend>,
        scheduler: Arc<dyn Scheduler>,
        events: EventSink,
        ssh: SshSettings,
        probe_first: bool,
    ) -> Self {
        Self {
            backend,
            scheduler,
            events,
            ssh,
            probe_first,
        }
    }

    /// Session target for a node using the configured defaults
    pub fn target(&self, node: &Node) -> SessionTarget {
        SessionTarget {
            address: node.address.clone(),
            port: self.ssh.port,
            user: node.login_user(&self.ssh.user).to_string(),
            credential: node.credential.clone(),
        }
    }

    /// Probe (if enabled) and then connect with retry
    pub async fn establish(
        &self,
        node: &Node,
        policy: &RetryPolicy,
        cancel: &Cancellation,
    ) -> Result<Connection, ConnectionError> {
        if self.probe_first && !self.backend.probe(&node.address).await {
            warn!("{} did not answer the reachability probe", node.address);
            return Err(ConnectionError::Unreachable {
                address: node.address.clone(),
            });
        }
        self.connect(&self.target(node), policy, cancel).await
    }

    /// Open a session, retrying on failure.
    ///
    /// Makes at most `policy.max_attempts` attempts and waits between them
    /// through the scheduler, never after the last one.
    pub async fn connect(
        &self,
        target: &SessionTarget,
        policy: &RetryPolicy,
        cancel: &Cancellation,
    ) -> Result<Connection, ConnectionError> {
        let max_attempts = policy.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            if cancel.is_cancelled() {
                return Err(ConnectionError::Cancelled {
                    address: target.address.clone(),
                });
            }

            debug!("Connecting to {} (attempt {}/{})", target.address, attempt, max_attempts);
            match self.backend.open(target).await {
                Ok(session) => {
                    info!("Connected to {} after {} attempt(s)", target.address, attempt);
                    self.events.emit(ExecutionEvent::Connected {
                        address: target.address.clone(),
                        attempts: attempt,
                    });
                    return Ok(Connection {
                        address: target.address.clone(),
                        attempts: attempt,
                        session,
                        closed: false,
                    });
                }
                Err(e) => {
                    warn!(
                        "Connection attempt {}/{} to {} failed: {}",
                        attempt, max_attempts, target.address, e
                    );
                    last_error = e.to_string();
                    self.events.emit(ExecutionEvent::ConnectAttemptFailed {
                        address: target.address.clone(),
                        attempt,
                        max_attempts,
                        error: last_error.clone(),
                    });
                }
            }

            if let Some(delay) = policy.delay_after(attempt) {
                self.scheduler.sleep(cancel.clamp(delay)).await;
            }
        }

        Err(ConnectionError::Exhausted {
            address: target.address.clone(),
            attempts: max_attempts,
            last_error,
        })
    }
}
