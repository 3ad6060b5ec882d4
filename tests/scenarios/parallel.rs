use crate::helpers::*;
use relaychain::core::{NodeStatus, OverallStatus, TeardownStatus};
use relaychain::execution::SchedulingStrategy;

fn parallel_config() -> relaychain::OrchestratorConfig {
    let mut config = test_config();
    config.strategy = SchedulingStrategy::Parallel;
    config
}

/// A node task that panics is reported as an error; its siblings finish normally
#[tokio::test]
async fn test_panicking_node_is_isolated() {
    let backend = MockBackend::new().panic_on("10.0.0.2");
    let (orchestrator, _) = orchestrator(&backend, parallel_config());

    let response = orchestrator
        .provision(provision_request(&["10.0.0.1", "10.0.0.2", "10.0.0.3"]))
        .await
        .unwrap();

    assert_eq!(response.nodes.len(), 3);
    assert_eq!(response.nodes[0].status, NodeStatus::Success);
    assert_eq!(response.nodes[1].address, "10.0.0.2");
    assert_eq!(response.nodes[1].status, NodeStatus::Error);
    assert_eq!(response.nodes[1].message.as_deref(), Some("node task aborted"));
    assert_eq!(response.nodes[2].status, NodeStatus::Success);

    assert_eq!(response.status, OverallStatus::Error);
    // The error withholds finalization everywhere
    assert_eq!(backend.count("10.0.0.1", "forward-port"), 0);
    assert_eq!(backend.count("10.0.0.3", "lock-down-firewall"), 0);
    // The panicked task still gives its session back
    assert_eq!(backend.closed(), backend.opened());
}

/// One failing node does not affect the others under parallel scheduling
#[tokio::test]
async fn test_parallel_failure_is_isolated() {
    let backend = MockBackend::new()
        .unreachable("10.0.0.1")
        .fail("10.0.0.3", "os-release", 127, "sh: not found");
    let (orchestrator, _) = orchestrator(&backend, parallel_config());

    let response = orchestrator
        .provision(provision_request(&["10.0.0.1", "10.0.0.2", "10.0.0.3"]))
        .await
        .unwrap();

    let statuses: Vec<_> = response.nodes.iter().map(|n| n.status).collect();
    assert_eq!(
        statuses,
        vec![NodeStatus::Skipped, NodeStatus::Success, NodeStatus::Error]
    );
    assert_eq!(response.status, OverallStatus::Error);
    assert_eq!(backend.closed(), backend.opened());
}

/// Parallel teardown resets every reachable node
#[tokio::test]
async fn test_parallel_teardown() {
    let backend = MockBackend::new().unreachable("10.0.0.4");
    let (orchestrator, _) = orchestrator(&backend, parallel_config());

    let response = orchestrator
        .teardown(teardown_request(&["10.0.0.1", "10.0.0.2", "10.0.0.3", "10.0.0.4"]))
        .await
        .unwrap();

    let order: Vec<_> = response.results.iter().map(|n| n.address.as_str()).collect();
    assert_eq!(order, ["10.0.0.1", "10.0.0.2", "10.0.0.3", "10.0.0.4"]);
    assert_eq!(response.results[3].status, NodeStatus::Skipped);
    assert_eq!(response.status, TeardownStatus::ResetComplete);
    for address in ["10.0.0.1", "10.0.0.2", "10.0.0.3"] {
        assert_eq!(backend.count(address, "clear-traces"), 1);
    }
}
