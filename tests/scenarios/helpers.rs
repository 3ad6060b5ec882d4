//! Test utilities: scripted backend, recording scheduler, request builders

use async_trait::async_trait;
use relaychain::core::{OrchestratorConfig, ProvisionRequest, TeardownRequest};
use relaychain::execution::{ExecutionEvent, Orchestrator, RetryPolicy, Scheduler};
use relaychain::remote::{
    CommandOutput, RemoteBackend, RemoteCommand, RemoteError, RemoteSession, SessionTarget,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const RELAY_PORT: u16 = 8388;

#[derive(Default)]
struct MockState {
    unreachable: HashSet<String>,
    refuse_login: HashSet<String>,
    installed: HashSet<String>,
    not_listening: HashSet<String>,
    listening_after_restart: HashSet<String>,
    panic_on: HashSet<String>,
    failures: HashMap<(String, &'static str), CommandOutput>,
    log: Mutex<Vec<(String, RemoteCommand)>>,
    login_attempts: AtomicUsize,
    opened: AtomicUsize,
    closed: AtomicUsize,
}

/// Backend answering every command from a script keyed by node address
#[derive(Clone, Default)]
pub struct MockBackend {
    state: Arc<MockState>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn configure(&mut self) -> &mut MockState {
        Arc::get_mut(&mut self.state).expect("configure the backend before sharing it")
    }

    /// Fail the reachability probe
    pub fn unreachable(mut self, address: &str) -> Self {
        self.configure().unreachable.insert(address.to_string());
        self
    }

    /// Answer the probe but reject every login
    pub fn refuse_login(mut self, address: &str) -> Self {
        self.configure().refuse_login.insert(address.to_string());
        self
    }

    /// Report every package as installed
    pub fn installed(mut self, address: &str) -> Self {
        self.configure().installed.insert(address.to_string());
        self
    }

    /// Never show the relay port as listening
    pub fn not_listening(mut self, address: &str) -> Self {
        self.configure().not_listening.insert(address.to_string());
        self
    }

    /// Show the relay port only once the relay compose project was restarted
    pub fn listening_after_restart(mut self, address: &str) -> Self {
        self.configure().listening_after_restart.insert(address.to_string());
        self
    }

    /// Panic inside the session when the OS release is queried
    pub fn panic_on(mut self, address: &str) -> Self {
        self.configure().panic_on.insert(address.to_string());
        self
    }

    /// Fail the named command on one node
    pub fn fail(mut self, address: &str, command: &'static str, exit_code: i32, stderr: &str) -> Self {
        self.configure().failures.insert(
            (address.to_string(), command),
            CommandOutput::failure(exit_code, stderr),
        );
        self
    }

    pub fn commands_for(&self, address: &str) -> Vec<RemoteCommand> {
        self.state
            .log
            .lock()
            .unwrap()
            .iter()
            .filter(|(a, _)| a == address)
            .map(|(_, c)| c.clone())
            .collect()
    }

    pub fn names_for(&self, address: &str) -> Vec<&'static str> {
        self.commands_for(address).iter().map(|c| c.name()).collect()
    }

    pub fn count(&self, address: &str, command: &str) -> usize {
        self.names_for(address).iter().filter(|n| **n == command).count()
    }

    pub fn login_attempts(&self) -> usize {
        self.state.login_attempts.load(Ordering::SeqCst)
    }

    pub fn opened(&self) -> usize {
        self.state.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.state.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteBackend for MockBackend {
    async fn open(&self, target: &SessionTarget) -> Result<Box<dyn RemoteSession>, RemoteError> {
        self.state.login_attempts.fetch_add(1, Ordering::SeqCst);
        if self.state.unreachable.contains(&target.address) {
            return Err(RemoteError::Connect("no route to host".to_string()));
        }
        if self.state.refuse_login.contains(&target.address) {
            return Err(RemoteError::Connect("Permission denied".to_string()));
        }
        self.state.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockSession {
            address: target.address.clone(),
            state: self.state.clone(),
        }))
    }

    async fn probe(&self, address: &str) -> bool {
        !self.state.unreachable.contains(address)
    }
}

struct MockSession {
    address: String,
    state: Arc<MockState>,
}

impl MockSession {
    fn restarted(&self) -> bool {
        self.state
            .log
            .lock()
            .unwrap()
            .iter()
            .any(|(a, c)| a == &self.address && matches!(c, RemoteCommand::ComposeRestart { .. }))
    }

    fn listening(&self) -> bool {
        if self.state.not_listening.contains(&self.address) {
            return false;
        }
        if self.state.listening_after_restart.contains(&self.address) {
            return self.restarted();
        }
        true
    }
}

#[async_trait]
impl RemoteSession for MockSession {
    async fn run(&self, command: &RemoteCommand) -> Result<CommandOutput, RemoteError> {
        if self.state.panic_on.contains(&self.address) && *command == RemoteCommand::OsRelease {
            panic!("session to {} blew up", self.address);
        }

        let output = if let Some(failure) = self
            .state
            .failures
            .get(&(self.address.clone(), command.name()))
        {
            failure.clone()
        } else {
            match command {
                RemoteCommand::OsRelease => CommandOutput::success("22.04\n"),
                RemoteCommand::PackageLockStatus => CommandOutput::success("free\n"),
                RemoteCommand::PackageStatus { .. } if self.state.installed.contains(&self.address) => {
                    CommandOutput::success("install ok installed")
                }
                RemoteCommand::ListeningSockets if self.listening() => CommandOutput::success(format!(
                    "Netid State  Recv-Q Send-Q Local Address:Port Peer Address:Port\n\
                     tcp   LISTEN 0      4096   0.0.0.0:{} 0.0.0.0:*\n",
                    RELAY_PORT
                )),
                _ => CommandOutput::success(""),
            }
        };

        self.state
            .log
            .lock()
            .unwrap()
            .push((self.address.clone(), command.clone()));
        Ok(output)
    }

    fn release(&self) {
        self.state.closed.fetch_add(1, Ordering::SeqCst);
    }

    async fn close(&self) -> Result<(), RemoteError> {
        self.state.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Scheduler that records waits and returns immediately
#[derive(Default)]
pub struct RecordingScheduler {
    waits: Mutex<Vec<Duration>>,
}

impl RecordingScheduler {
    pub fn waits(&self) -> Vec<Duration> {
        self.waits.lock().unwrap().clone()
    }
}

#[async_trait]
impl Scheduler for RecordingScheduler {
    async fn sleep(&self, duration: Duration) {
        self.waits.lock().unwrap().push(duration);
    }
}

/// Config with short, deterministic retry policies
pub fn test_config() -> OrchestratorConfig {
    let mut config = OrchestratorConfig::default();
    config.connect = RetryPolicy::fixed(3, Duration::from_secs(2));
    config.teardown_connect = RetryPolicy::fixed(2, Duration::from_secs(1));
    config.install.max_attempts = 3;
    config
}

/// Build an orchestrator over `backend` with a recording scheduler
pub fn orchestrator(backend: &MockBackend, config: OrchestratorConfig) -> (Orchestrator, Arc<RecordingScheduler>) {
    let scheduler = Arc::new(RecordingScheduler::default());
    let orchestrator = Orchestrator::new(Arc::new(backend.clone()), config).with_scheduler(scheduler.clone());
    (orchestrator, scheduler)
}

/// Capture every event the orchestrator emits
pub fn record_events(orchestrator: &mut Orchestrator) -> Arc<Mutex<Vec<ExecutionEvent>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    orchestrator.add_event_handler(move |event| sink.lock().unwrap().push(event.clone()));
    events
}

pub fn provision_request(addresses: &[&str]) -> ProvisionRequest {
    let nodes: Vec<_> = addresses
        .iter()
        .map(|a| serde_json::json!({ "address": a, "credential": "pw" }))
        .collect();
    let json = serde_json::json!({
        "nodeCount": addresses.len(),
        "nodes": nodes,
        "relay": { "secret": "s3cr3t", "port": RELAY_PORT },
        "staticHosts": ["api.example.com:203.0.113.7"],
        "upstream": { "domain": "api.exchange.example", "addresses": ["198.51.100.1", "198.51.100.2"] }
    });
    ProvisionRequest::from_json(&json.to_string()).unwrap()
}

pub fn teardown_request(addresses: &[&str]) -> TeardownRequest {
    let nodes: Vec<_> = addresses
        .iter()
        .map(|a| serde_json::json!({ "address": a, "credential": "pw" }))
        .collect();
    TeardownRequest::from_json(&serde_json::json!({ "nodes": nodes }).to_string()).unwrap()
}
