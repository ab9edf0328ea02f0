//! End-to-end controller flows: validation, usage guard, inspection.

use std::time::Duration;

use vortex_net::link::DatapathType;
use vortex_net::test_util::{LinkOp, MemoryFabric};
use vortex_net::{
    FabricError, Network, NetworkController, NetworkType, Node, ValidationError, WorkloadPhase,
    WorkloadRef, check_in_use,
};

fn network() -> Network {
    Network::new("tenant-a", NetworkType::Kernelspace, "br-tenant")
        .with_node(Node::new("node-1"))
        .with_node(Node::new("node-2"))
        .with_vlan_tags(vec![10, 20])
}

fn workload(name: &str, phase: WorkloadPhase, networks: &[&str]) -> WorkloadRef {
    WorkloadRef {
        name: name.to_string(),
        namespace: "default".to_string(),
        phase,
        networks: networks.iter().map(|n| n.to_string()).collect(),
    }
}

#[tokio::test]
async fn test_create_inspect_delete() {
    let fabric = MemoryFabric::with_nodes(&["node-1", "node-2"]);
    let controller = NetworkController::new(fabric.cluster(vec![]));
    let network = network();

    controller.create(&network).await.unwrap();

    let reports = controller.inspect(&network).await.unwrap();
    assert_eq!(reports.len(), 2);
    for report in &reports {
        assert!(report.is_present(), "{} missing bridge", report.node);
        let info = report.bridge.as_ref().unwrap().as_ref().unwrap();
        assert_eq!(info.datapath_type, Some(DatapathType::System));
        assert_eq!(info.trunks, vec![10, 20]);
    }

    controller.delete(&network).await.unwrap();
    let reports = controller.inspect(&network).await.unwrap();
    assert!(reports.iter().all(|r| matches!(r.bridge, Ok(None))));
}

#[tokio::test]
async fn test_inspect_reports_unreachable_nodes() {
    let fabric = MemoryFabric::with_nodes(&["node-1"]);
    let controller = NetworkController::new(fabric.cluster(vec![]));

    let reports = controller.inspect(&network()).await.unwrap();
    assert_eq!(reports[0].node, "node-1");
    assert!(matches!(reports[0].bridge, Ok(None)));
    assert_eq!(reports[1].node, "node-2");
    assert!(reports[1].bridge.as_ref().unwrap_err().contains("not registered"));
}

#[tokio::test]
async fn test_delete_blocked_by_running_workload() {
    let fabric = MemoryFabric::with_nodes(&["node-1", "node-2"]);
    let workloads = vec![
        workload("vm-1", WorkloadPhase::Running, &["tenant-a"]),
        workload("vm-2", WorkloadPhase::Running, &["other"]),
    ];
    let controller = NetworkController::new(fabric.cluster(workloads));

    let err = controller.delete(&network()).await.unwrap_err();

    assert!(err.is_in_use());
    match err {
        FabricError::InUse { network, workloads } => {
            assert_eq!(network, "tenant-a");
            assert_eq!(workloads, vec!["default/vm-1"]);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(fabric.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_guard_holds_for_concurrent_deletes() {
    let fabric = MemoryFabric::with_nodes(&["node-1", "node-2"]);
    let net_a = network();
    let mut net_b = network();
    net_b.name = "tenant-b".to_string();
    net_b.bridge_name = "br-b".to_string();

    let controller = NetworkController::new(
        fabric.cluster(vec![workload("vm-1", WorkloadPhase::Running, &["tenant-a"])]),
    );
    controller.create(&net_a).await.unwrap();
    controller.create(&net_b).await.unwrap();

    fabric.clear_calls();
    fabric.set_delay("node-1", Duration::from_millis(50));
    fabric.set_delay("node-2", Duration::from_millis(50));

    let (a, b) = tokio::join!(controller.delete(&net_a), controller.delete(&net_b));

    assert!(a.unwrap_err().is_in_use());
    b.unwrap();
    assert_eq!(fabric.nodes_with_bridge("br-tenant"), vec!["node-1", "node-2"]);
    assert!(fabric.nodes_with_bridge("br-b").is_empty());
    assert!(fabric.calls_for_bridge(LinkOp::DeleteBridge, "br-tenant").is_empty());
    assert_eq!(
        fabric.calls_for_bridge(LinkOp::DeleteBridge, "br-b"),
        vec!["node-1", "node-2"]
    );
    assert_eq!(fabric.calls_to(LinkOp::DeleteBridge).len(), 2);
}

#[tokio::test]
async fn test_finished_workloads_do_not_block_delete() {
    let fabric = MemoryFabric::with_nodes(&["node-1", "node-2"]);
    let workloads = vec![
        workload("vm-1", WorkloadPhase::Succeeded, &["tenant-a"]),
        workload("vm-2", WorkloadPhase::Pending, &["tenant-a"]),
    ];
    let controller = NetworkController::new(fabric.cluster(workloads));

    controller.delete(&network()).await.unwrap();
    assert_eq!(fabric.calls_to(LinkOp::DeleteBridge).len(), 2);
}

#[tokio::test]
async fn test_guard_and_status_agree() {
    let fabric = MemoryFabric::with_nodes(&["node-1"]);
    let cluster = fabric.cluster(vec![
        workload("vm-1", WorkloadPhase::Running, &["tenant-a"]),
        workload("vm-2", WorkloadPhase::Failed, &["tenant-a"]),
    ]);
    let network = network();

    assert!(check_in_use(&network, &cluster).await.unwrap_err().is_in_use());

    let controller = NetworkController::new(cluster);
    assert_eq!(controller.status(&network).await.unwrap(), vec!["default/vm-1"]);
}

#[tokio::test]
async fn test_invalid_network_touches_nothing() {
    let fabric = MemoryFabric::with_nodes(&["node-1", "node-2"]);
    let controller = NetworkController::new(fabric.cluster(vec![]));

    let err = controller
        .create(&network().with_vlan_tags(vec![4096]))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        FabricError::Validation(ValidationError::VlanTagOutOfRange(4096))
    ));
    assert!(err.is_client_error());

    let mut no_nodes = network();
    no_nodes.nodes.clear();
    let err = controller.delete(&no_nodes).await.unwrap_err();
    assert!(matches!(
        err,
        FabricError::Validation(ValidationError::NodesRequired)
    ));

    let unknown = Network::new("n", NetworkType::from("vxlan"), "br0").with_node(Node::new("node-1"));
    let err = controller.create(&unknown).await.unwrap_err();
    assert!(matches!(
        err,
        FabricError::Validation(ValidationError::UnknownNetworkType(ref t)) if t == "vxlan"
    ));

    assert!(fabric.calls().is_empty());
}

#[tokio::test]
async fn test_fake_network_through_controller() {
    let fabric = MemoryFabric::new();
    let controller = NetworkController::new(fabric.cluster(vec![]));
    let network = Network::new("fake-net", NetworkType::Fake, "br-fake")
        .with_node(Node::new("node-1"))
        .with_dpdk_port(true);

    controller.create(&network).await.unwrap();
    controller.delete(&network).await.unwrap();
    assert!(fabric.calls().is_empty());
}

#[tokio::test]
async fn test_network_document_round_trip_through_controller() {
    let doc = r#"{
        "name": "tenant-b",
        "type": "system",
        "bridgeName": "br-b",
        "vlanTags": [0, 2048, 4095],
        "nodes": [{"name": "node-1", "physicalInterfaces": [{"name": "eth1"}]}]
    }"#;
    let network: Network = serde_json::from_str(doc).unwrap();
    let fabric = MemoryFabric::with_nodes(&["node-1"]);
    let controller = NetworkController::new(fabric.cluster(vec![]));

    controller.create(&network).await.unwrap();
    let bridge = fabric.bridge("node-1", "br-b").unwrap();
    assert_eq!(bridge.ports, vec!["eth1"]);
    assert_eq!(bridge.trunks, vec![0, 2048, 4095]);
}
