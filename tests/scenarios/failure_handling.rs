use crate::helpers::*;
use relaychain::core::{
    NodeState, NodeStatus, OverallStatus, ProvisionRequest, StepStatus, ValidationError,
};
use relaychain::execution::ExecutionEvent;
use std::time::Duration;

/// An unreachable node is skipped and the rest of the chain carries on
#[tokio::test]
async fn test_unreachable_node_is_skipped() {
    let backend = MockBackend::new().unreachable("10.0.0.1");
    let (orchestrator, scheduler) = orchestrator(&backend, test_config());

    let response = orchestrator
        .provision(provision_request(&["10.0.0.1", "10.0.0.2"]))
        .await
        .unwrap();

    assert_eq!(response.nodes[0].status, NodeStatus::Skipped);
    assert!(response.nodes[0]
        .message
        .as_deref()
        .unwrap()
        .contains("reachability probe"));
    assert_eq!(response.nodes[0].steps.len(), 1);
    assert_eq!(response.nodes[0].steps[0].description, "connect");
    assert_eq!(response.nodes[0].steps[0].status, StepStatus::Failed);

    // The probe failed, so no login was attempted and nothing was waited for
    assert!(backend.names_for("10.0.0.1").is_empty());
    assert!(scheduler.waits().is_empty());

    assert_eq!(response.nodes[1].status, NodeStatus::Success);
    assert!(response.nodes[1].relay_endpoint.is_some());
    assert_eq!(response.status, OverallStatus::Success);
}

/// Strict mode counts a skipped node as a failed run
#[tokio::test]
async fn test_strict_mode_fails_on_skipped_node() {
    let backend = MockBackend::new().unreachable("10.0.0.1");
    let mut config = test_config();
    config.strict = true;
    let (orchestrator, _) = orchestrator(&backend, config);

    let response = orchestrator
        .provision(provision_request(&["10.0.0.1", "10.0.0.2"]))
        .await
        .unwrap();

    assert_eq!(response.nodes[0].status, NodeStatus::Skipped);
    assert_eq!(response.nodes[1].status, NodeStatus::Success);
    assert_eq!(response.status, OverallStatus::Error);
}

/// A node refusing logins is retried per policy, waiting only between attempts
#[tokio::test]
async fn test_login_retries_are_bounded() {
    let backend = MockBackend::new().refuse_login("10.0.0.1");
    let (mut orchestrator, scheduler) = orchestrator(&backend, test_config());
    let events = record_events(&mut orchestrator);

    let response = orchestrator
        .provision(provision_request(&["10.0.0.1"]))
        .await
        .unwrap();

    assert_eq!(backend.login_attempts(), 3);
    assert_eq!(scheduler.waits(), vec![Duration::from_secs(2), Duration::from_secs(2)]);

    let node = &response.nodes[0];
    assert_eq!(node.status, NodeStatus::Skipped);
    assert!(node.message.as_deref().unwrap().contains("after 3 attempts"));

    let failed_attempts = events
        .lock()
        .unwrap()
        .iter()
        .filter(|e| matches!(e, ExecutionEvent::ConnectAttemptFailed { .. }))
        .count();
    assert_eq!(failed_attempts, 3);
}

/// A session that cannot report its OS release fails the node and blocks finalization
#[tokio::test]
async fn test_unusable_session_withholds_finalization() {
    let backend = MockBackend::new().fail("10.0.0.1", "os-release", 127, "sh: not found");
    let (mut orchestrator, _) = orchestrator(&backend, test_config());
    let events = record_events(&mut orchestrator);

    let response = orchestrator
        .provision(provision_request(&["10.0.0.1", "10.0.0.2"]))
        .await
        .unwrap();

    let failed = &response.nodes[0];
    assert_eq!(failed.status, NodeStatus::Error);
    assert!(failed.message.as_deref().unwrap().starts_with("session unusable"));
    assert_eq!(backend.names_for("10.0.0.1"), vec!["os-release"]);

    assert_eq!(response.nodes[1].status, NodeStatus::Success);
    assert!(!response.nodes[1]
        .steps
        .iter()
        .any(|s| s.description.starts_with("finalize:")));
    assert_eq!(response.status, OverallStatus::Error);

    let events = events.lock().unwrap();
    assert!(events.contains(&ExecutionEvent::FinalizationWithheld {
        reason: "10.0.0.1 ended in error".to_string(),
    }));
    assert!(!events.contains(&ExecutionEvent::FinalizationStarted));

    // The failed node's session is still released
    assert_eq!(backend.closed(), backend.opened());
}

/// A port still down after one restart is recorded and the node carries on
#[tokio::test]
async fn test_port_not_listening_after_restart() {
    let backend = MockBackend::new().not_listening("10.0.0.2");
    let (orchestrator, _) = orchestrator(&backend, test_config());

    let response = orchestrator
        .provision(provision_request(&["10.0.0.1", "10.0.0.2"]))
        .await
        .unwrap();

    let terminal = &response.nodes[1];
    assert_eq!(terminal.status, NodeStatus::Success);
    assert!(terminal.message.is_none());
    assert_eq!(backend.count("10.0.0.2", "listening-sockets"), 2);
    // One restart from verification, one from finalization
    assert_eq!(backend.count("10.0.0.2", "service-restart"), 2);
    let checks: Vec<_> = terminal
        .steps
        .iter()
        .filter(|s| s.description.contains("check port"))
        .map(|s| (s.description.as_str(), s.status))
        .collect();
    assert_eq!(
        checks,
        vec![
            ("check port 8388", StepStatus::Failed),
            ("re-check port 8388", StepStatus::Failed),
        ]
    );

    assert_eq!(response.status, OverallStatus::Success);
    assert!(terminal.relay_endpoint.is_some());
    // Finalization is not withheld
    assert_eq!(backend.count("10.0.0.1", "forward-port"), 1);
    assert_eq!(backend.count("10.0.0.2", "lock-down-firewall"), 1);
}

/// A relay that comes up after one restart passes verification
#[tokio::test]
async fn test_port_recovers_after_restart() {
    let backend = MockBackend::new().listening_after_restart("10.0.0.1");
    let (orchestrator, _) = orchestrator(&backend, test_config());

    let response = orchestrator
        .provision(provision_request(&["10.0.0.1", "10.0.0.2"]))
        .await
        .unwrap();

    let relay = &response.nodes[0];
    assert_eq!(relay.status, NodeStatus::Success);
    assert_eq!(backend.count("10.0.0.1", "compose-restart"), 1);

    let checks: Vec<_> = relay
        .steps
        .iter()
        .filter(|s| s.description.contains("check port"))
        .map(|s| (s.description.as_str(), s.status))
        .collect();
    assert_eq!(
        checks,
        vec![
            ("check port 8388", StepStatus::Failed),
            ("re-check port 8388", StepStatus::Ok),
        ]
    );
    assert_eq!(response.status, OverallStatus::Success);
}

/// Ordinary step failures are recorded without failing the node
#[tokio::test]
async fn test_step_failures_are_tolerated() {
    let backend = MockBackend::new().fail("10.0.0.1", "masquerade", 1, "iptables: No chain/target/match by that name.");
    let (mut orchestrator, _) = orchestrator(&backend, test_config());
    let events = record_events(&mut orchestrator);

    let response = orchestrator
        .provision(provision_request(&["10.0.0.1", "10.0.0.2"]))
        .await
        .unwrap();

    let node = &response.nodes[0];
    assert_eq!(node.status, NodeStatus::Success);
    let step = node
        .steps
        .iter()
        .find(|s| s.description == "add NAT masquerade")
        .unwrap();
    assert_eq!(step.status, StepStatus::Failed);
    assert!(step.error.as_deref().unwrap().contains("No chain"));
    assert_eq!(response.status, OverallStatus::Success);

    assert!(events.lock().unwrap().iter().any(|e| matches!(
        e,
        ExecutionEvent::StepFailed { address, description, .. }
            if address == "10.0.0.1" && description == "add NAT masquerade"
    )));
}

/// A package that never installs exhausts its attempts and is reported as a failed step
#[tokio::test]
async fn test_install_failure_is_a_failed_step() {
    let backend = MockBackend::new().fail("10.0.0.2", "package-install", 100, "E: Unable to locate package");
    let (orchestrator, scheduler) = orchestrator(&backend, test_config());

    let response = orchestrator
        .provision(provision_request(&["10.0.0.1", "10.0.0.2"]))
        .await
        .unwrap();

    assert_eq!(backend.count("10.0.0.2", "package-install"), 3);
    // Waits happen between install attempts only
    assert_eq!(scheduler.waits().len(), 2);

    let terminal = &response.nodes[1];
    let install = terminal
        .steps
        .iter()
        .find(|s| s.description.starts_with("install "))
        .unwrap();
    assert_eq!(install.status, StepStatus::Failed);
    assert!(install.error.as_deref().unwrap().contains("Unable to locate package"));
}

/// Cancelling before the run starts touches no node
#[tokio::test]
async fn test_cancelled_before_start() {
    let backend = MockBackend::new();
    let (mut orchestrator, _) = orchestrator(&backend, test_config());
    let events = record_events(&mut orchestrator);
    orchestrator.cancellation().cancel();

    let response = orchestrator
        .provision(provision_request(&["10.0.0.1", "10.0.0.2"]))
        .await
        .unwrap();

    assert_eq!(backend.login_attempts(), 0);
    for node in &response.nodes {
        assert_eq!(node.status, NodeStatus::Skipped);
        assert_eq!(node.message.as_deref(), Some("cancelled"));
    }
    assert!(events.lock().unwrap().contains(&ExecutionEvent::FinalizationWithheld {
        reason: "no node was provisioned".to_string(),
    }));
}

/// Cancelling mid-run skips the nodes that have not started yet
#[tokio::test]
async fn test_cancelled_mid_run() {
    let backend = MockBackend::new();
    let (mut orchestrator, _) = orchestrator(&backend, test_config());
    let cancellation = orchestrator.cancellation();
    orchestrator.add_event_handler(move |event| {
        if let ExecutionEvent::NodeFinished { address, .. } = event {
            if address == "10.0.0.1" {
                cancellation.cancel();
            }
        }
    });

    let response = orchestrator
        .provision(provision_request(&["10.0.0.1", "10.0.0.2", "10.0.0.3"]))
        .await
        .unwrap();

    assert_eq!(response.nodes[0].status, NodeStatus::Success);
    assert_eq!(response.nodes[1].status, NodeStatus::Skipped);
    assert_eq!(response.nodes[2].status, NodeStatus::Skipped);
    assert_eq!(response.nodes[2].message.as_deref(), Some("cancelled"));
    assert!(backend.names_for("10.0.0.2").is_empty());

    // Finalization stops before touching the surviving node
    assert!(!response.nodes[0]
        .steps
        .iter()
        .any(|s| s.description.starts_with("finalize:")));
    assert_eq!(backend.closed(), backend.opened());
}

/// Cancelling right after a node connects skips it and still closes its session
#[tokio::test]
async fn test_cancelled_after_connect() {
    let backend = MockBackend::new();
    let (mut orchestrator, _) = orchestrator(&backend, test_config());
    let cancellation = orchestrator.cancellation();
    orchestrator.add_event_handler(move |event| {
        if let ExecutionEvent::NodeStateChanged {
            address,
            state: NodeState::Connected,
        } = event
        {
            if address == "10.0.0.1" {
                cancellation.cancel();
            }
        }
    });

    let response = orchestrator
        .provision(provision_request(&["10.0.0.1", "10.0.0.2"]))
        .await
        .unwrap();

    let first = &response.nodes[0];
    assert_eq!(first.status, NodeStatus::Skipped);
    assert_eq!(first.message.as_deref(), Some("cancelled"));
    // Only the session check ran before the cancellation was seen
    assert_eq!(backend.names_for("10.0.0.1"), vec!["os-release"]);

    assert_eq!(response.nodes[1].status, NodeStatus::Skipped);
    assert!(backend.names_for("10.0.0.2").is_empty());
    assert_eq!(backend.opened(), 1);
    assert_eq!(backend.closed(), backend.opened());
}

/// Addresses and users that would be read as ssh options are rejected up front
#[tokio::test]
async fn test_option_like_node_fields_make_no_remote_calls() {
    let backend = MockBackend::new();
    let (orchestrator, _) = orchestrator(&backend, test_config());

    let request = ProvisionRequest::from_json(
        r#"{
            "nodes": [{"address": "10.0.0.1", "user": "-oProxyCommand=touch /tmp/pwned"}],
            "relay": {"secret": "s3cr3t", "port": 8388}
        }"#,
    )
    .unwrap();
    let err = orchestrator.provision(request).await.unwrap_err();

    assert!(matches!(err, ValidationError::InvalidUser { index: 0, .. }));
    assert_eq!(backend.login_attempts(), 0);
}

/// Malformed requests are rejected before any remote action
#[tokio::test]
async fn test_invalid_request_makes_no_remote_calls() {
    let backend = MockBackend::new();
    let (mut orchestrator, _) = orchestrator(&backend, test_config());
    let events = record_events(&mut orchestrator);

    let err = orchestrator
        .provision(provision_request(&["10.0.0.1", "10.0.0.1"]))
        .await
        .unwrap_err();

    assert_eq!(err, ValidationError::DuplicateAddress("10.0.0.1".to_string()));
    assert_eq!(backend.login_attempts(), 0);
    assert!(events.lock().unwrap().is_empty());
}
