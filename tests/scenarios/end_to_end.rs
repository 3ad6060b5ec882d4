use crate::helpers::*;
use relaychain::core::{NodeStatus, OverallStatus, ProvisionRequest, Role, StepStatus};
use relaychain::execution::{ExecutionEvent, SchedulingStrategy};
use relaychain::remote::RemoteCommand;

/// Two-node chain: intermediate relays to the terminal, which exposes the endpoint
#[tokio::test]
async fn test_two_node_chain_provisions_and_finalizes() {
    let backend = MockBackend::new();
    let (mut orchestrator, scheduler) = orchestrator(&backend, test_config());
    let events = record_events(&mut orchestrator);

    let response = orchestrator
        .provision(provision_request(&["10.0.0.1", "10.0.0.2"]))
        .await
        .unwrap();

    assert_eq!(response.status, OverallStatus::Success);
    assert_eq!(response.nodes.len(), 2);
    assert_eq!(response.nodes[0].address, "10.0.0.1");
    assert_eq!(response.nodes[0].role, Role::Intermediate);
    assert_eq!(response.nodes[0].status, NodeStatus::Success);
    assert!(response.nodes[0].relay_endpoint.is_none());

    let endpoint = response.nodes[1].relay_endpoint.as_ref().expect("terminal endpoint");
    assert_eq!(endpoint.address, "10.0.0.2");
    assert_eq!(endpoint.port, RELAY_PORT);
    assert_eq!(endpoint.secret, "s3cr3t");

    // No connect retries and no lock waits
    assert!(scheduler.waits().is_empty());

    // Finalization appended its steps after phase one
    let last = response.nodes[0].steps.last().unwrap();
    assert_eq!(last.description, "finalize: re-apply NAT masquerade");
    assert!(response.nodes[0]
        .steps
        .iter()
        .any(|s| s.description == "finalize: forward port 8388 to 10.0.0.2"));
    assert!(response.nodes[1]
        .steps
        .iter()
        .any(|s| s.description == "finalize: lock down inbound firewall"));
    assert!(response
        .nodes
        .iter()
        .flat_map(|n| n.steps.iter())
        .all(|s| s.status == StepStatus::Ok));

    let events = events.lock().unwrap();
    assert!(matches!(events.first(), Some(ExecutionEvent::RunStarted { node_count: 2, .. })));
    assert!(events.contains(&ExecutionEvent::FinalizationStarted));
    assert!(matches!(
        events.last(),
        Some(ExecutionEvent::RunFinished {
            status: OverallStatus::Success,
            ..
        })
    ));
}

/// The intermediate runs the relay container, the terminal runs the egress service
#[tokio::test]
async fn test_roles_receive_their_own_configuration() {
    let backend = MockBackend::new();
    let (orchestrator, _) = orchestrator(&backend, test_config());

    orchestrator
        .provision(provision_request(&["10.0.0.1", "10.0.0.2"]))
        .await
        .unwrap();

    let intermediate = backend.names_for("10.0.0.1");
    assert!(intermediate.contains(&"compose-up"));
    assert!(intermediate.contains(&"forward-port"));
    assert!(!intermediate.contains(&"service-enable"));
    assert!(!intermediate.contains(&"lock-down-firewall"));

    let terminal = backend.names_for("10.0.0.2");
    assert!(terminal.contains(&"service-enable"));
    assert!(terminal.contains(&"lock-down-firewall"));
    assert!(!terminal.contains(&"compose-up"));
    assert!(!terminal.contains(&"forward-port"));

    let compose = backend
        .commands_for("10.0.0.1")
        .into_iter()
        .find_map(|c| match c {
            RemoteCommand::WriteFile { path, contents, .. } if path.ends_with(".yml") || path.ends_with(".yaml") => {
                Some(contents)
            }
            _ => None,
        })
        .expect("compose file written");
    assert!(compose.contains("10.0.0.2:8388"));

    let lock_down = backend
        .commands_for("10.0.0.2")
        .into_iter()
        .find(|c| matches!(c, RemoteCommand::LockDownFirewall { .. }));
    assert_eq!(
        lock_down,
        Some(RemoteCommand::LockDownFirewall { ports: vec![22, RELAY_PORT] })
    );
}

/// Upstream pins go to the terminal only; static entries go everywhere
#[tokio::test]
async fn test_hosts_entries_per_role() {
    let backend = MockBackend::new();
    let (orchestrator, _) = orchestrator(&backend, test_config());

    orchestrator
        .provision(provision_request(&["10.0.0.1", "10.0.0.2"]))
        .await
        .unwrap();

    let appended = |address: &str| {
        backend
            .commands_for(address)
            .into_iter()
            .find_map(|c| match c {
                RemoteCommand::AppendHosts { entries, .. } => Some(entries),
                _ => None,
            })
            .expect("hosts entries appended")
    };

    let intermediate = appended("10.0.0.1");
    assert_eq!(intermediate.len(), 1);
    assert_eq!(intermediate[0].hostname, "api.example.com");

    let terminal = appended("10.0.0.2");
    assert_eq!(terminal.len(), 3);
    assert!(terminal
        .iter()
        .any(|e| e.hostname == "api.exchange.example" && e.address == "198.51.100.2"));
}

/// Every upstream allow-list is pinned on the terminal
#[tokio::test]
async fn test_multiple_upstream_allow_lists() {
    let backend = MockBackend::new();
    let (orchestrator, _) = orchestrator(&backend, test_config());

    let request = ProvisionRequest::from_json(
        r#"{
            "nodes": [{"address": "10.0.0.1", "credential": "pw"}],
            "relay": {"secret": "s3cr3t", "port": 8388},
            "upstream": [
                {"domain": "api.exchange.example", "addresses": ["198.51.100.1"]},
                {"domain": "stream.exchange.example", "addresses": ["198.51.100.9"]}
            ]
        }"#,
    )
    .unwrap();
    orchestrator.provision(request).await.unwrap();

    let entries = backend
        .commands_for("10.0.0.1")
        .into_iter()
        .find_map(|c| match c {
            RemoteCommand::AppendHosts { entries, .. } => Some(entries),
            _ => None,
        })
        .expect("hosts entries appended");
    let pinned: Vec<_> = entries
        .iter()
        .map(|e| (e.hostname.as_str(), e.address.as_str()))
        .collect();
    assert_eq!(
        pinned,
        vec![
            ("api.exchange.example", "198.51.100.1"),
            ("stream.exchange.example", "198.51.100.9"),
        ]
    );
}

/// A single node is its own terminal
#[tokio::test]
async fn test_single_node_chain() {
    let backend = MockBackend::new();
    let (orchestrator, _) = orchestrator(&backend, test_config());

    let response = orchestrator
        .provision(provision_request(&["10.0.0.9"]))
        .await
        .unwrap();

    assert_eq!(response.status, OverallStatus::Success);
    assert_eq!(response.nodes[0].role, Role::Terminal);
    assert!(response.nodes[0].relay_endpoint.is_some());
    assert_eq!(backend.count("10.0.0.9", "compose-up"), 0);
}

/// Already-installed packages are not reinstalled
#[tokio::test]
async fn test_installed_packages_are_reused() {
    let backend = MockBackend::new().installed("10.0.0.1");
    let (orchestrator, _) = orchestrator(&backend, test_config());

    let response = orchestrator
        .provision(provision_request(&["10.0.0.1", "10.0.0.2"]))
        .await
        .unwrap();

    assert_eq!(response.status, OverallStatus::Success);
    assert_eq!(backend.count("10.0.0.1", "package-install"), 0);
    assert_eq!(backend.count("10.0.0.2", "package-install"), 1);

    let step = response.nodes[0]
        .steps
        .iter()
        .find(|s| s.description.starts_with("install "))
        .unwrap();
    assert_eq!(step.status, StepStatus::Ok);
}

/// Every opened session is closed, including the finalization sessions
#[tokio::test]
async fn test_every_session_is_closed() {
    let backend = MockBackend::new();
    let (orchestrator, _) = orchestrator(&backend, test_config());

    orchestrator
        .provision(provision_request(&["10.0.0.1", "10.0.0.2", "10.0.0.3"]))
        .await
        .unwrap();

    // One session per node for phase one and one for finalization
    assert_eq!(backend.opened(), 6);
    assert_eq!(backend.closed(), backend.opened());
}

/// Results keep request order under parallel scheduling
#[tokio::test]
async fn test_parallel_run_keeps_chain_order() {
    let backend = MockBackend::new();
    let mut config = test_config();
    config.strategy = SchedulingStrategy::Parallel;
    let (orchestrator, _) = orchestrator(&backend, config);

    let addresses = ["10.0.0.1", "10.0.0.2", "10.0.0.3", "10.0.0.4"];
    let response = orchestrator.provision(provision_request(&addresses)).await.unwrap();

    assert_eq!(response.status, OverallStatus::Success);
    let order: Vec<_> = response.nodes.iter().map(|n| n.address.as_str()).collect();
    assert_eq!(order, addresses);
    assert_eq!(response.nodes[3].role, Role::Terminal);
}

/// The response document uses camelCase keys and omits absent endpoints
#[tokio::test]
async fn test_response_serialization() {
    let backend = MockBackend::new();
    let (orchestrator, _) = orchestrator(&backend, test_config());

    let response = orchestrator
        .provision(provision_request(&["10.0.0.1", "10.0.0.2"]))
        .await
        .unwrap();
    let json = serde_json::to_value(&response).unwrap();

    assert!(json.get("executionId").is_some());
    assert!(json["nodes"][0].get("relayEndpoint").is_none());
    assert_eq!(json["nodes"][1]["relayEndpoint"]["address"], "10.0.0.2");
    assert_eq!(json["nodes"][1]["relayEndpoint"]["port"], 8388);
}
