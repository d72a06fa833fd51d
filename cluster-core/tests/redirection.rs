use std::sync::Arc;
use std::time::Duration;

use cluster_core::{ClusterError, CommandOutcome, NodeAddr, Registry, RetryParams, SlotRange, TopologyCheckParams};
use cluster_core_test::MockCluster;

fn fast_retry() -> RetryParams {
    RetryParams {
        request_ttl: 3,
        retry_delay: Duration::from_millis(1),
    }
}

fn no_periodic_check() -> TopologyCheckParams {
    // Long enough that it never fires during a short-lived test.
    TopologyCheckParams {
        interval: Duration::from_secs(3600),
        jitter: Duration::from_secs(0),
    }
}

fn whole_keyspace(node: &NodeAddr) -> Vec<SlotRange> {
    vec![SlotRange {
        lo: 0,
        hi: cluster_core::SLOT_COUNT - 1,
        primary: node.clone(),
    }]
}

#[tokio::test]
async fn simple_get_succeeds_on_first_try() {
    let node = NodeAddr::new("127.0.0.1", 7000);
    let mock = MockCluster::new();
    mock.set_topology(whole_keyspace(&node)).await;
    mock.queue_reply(&node, CommandOutcome::Ok(b"bar".to_vec())).await;

    let registry: Registry<_, _> = Registry::new();
    registry
        .start(
            "c",
            vec![node.clone()],
            mock.transport(),
            mock.topology_discovery(),
            fast_retry(),
            no_periodic_check(),
        )
        .await
        .unwrap();

    let reply = registry
        .q("c", vec![b"GET".to_vec(), b"foo".to_vec()])
        .await
        .unwrap();
    assert_eq!(reply, b"bar");
}

#[tokio::test]
async fn moved_redirects_to_the_new_owner() {
    let a = NodeAddr::new("127.0.0.1", 7000);
    let b = NodeAddr::new("127.0.0.1", 7001);
    let mock = MockCluster::new();
    mock.set_topology(whole_keyspace(&a)).await;
    let slot = cluster_core::slot_of(b"foo");
    mock.queue_reply(&a, CommandOutcome::ServerError(format!("MOVED {} {}", slot, b)))
        .await;
    mock.queue_reply(&b, CommandOutcome::Ok(b"bar".to_vec())).await;

    let registry: Registry<_, _> = Registry::new();
    registry
        .start("c", vec![a.clone()], mock.transport(), mock.topology_discovery(), fast_retry(), no_periodic_check())
        .await
        .unwrap();

    let reply = registry
        .q("c", vec![b"GET".to_vec(), b"foo".to_vec()])
        .await
        .unwrap();
    assert_eq!(reply, b"bar");
    assert_eq!(mock.send_call_count(&b).await, 1);

    // The MOVED reply should have nudged a background slot-map refresh.
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(mock.discover_call_count().await >= 1);
}

#[tokio::test]
async fn ask_redirect_sends_asking_and_strips_its_reply() {
    let a = NodeAddr::new("127.0.0.1", 7000);
    let b = NodeAddr::new("127.0.0.1", 7001);
    let mock = MockCluster::new();
    mock.set_topology(whole_keyspace(&a)).await;
    let slot = cluster_core::slot_of(b"foo");
    mock.queue_reply(&a, CommandOutcome::ServerError(format!("ASK {} {}", slot, b)))
        .await;
    // Two replies queued for b: the synthetic ASKING ack, then the real one.
    mock.queue_reply(&b, CommandOutcome::Ok(b"OK".to_vec())).await;
    mock.queue_reply(&b, CommandOutcome::Ok(b"bar".to_vec())).await;

    let registry: Registry<_, _> = Registry::new();
    registry
        .start("c", vec![a.clone()], mock.transport(), mock.topology_discovery(), fast_retry(), no_periodic_check())
        .await
        .unwrap();

    let reply = registry
        .q("c", vec![b"GET".to_vec(), b"foo".to_vec()])
        .await
        .unwrap();
    assert_eq!(reply, b"bar");

    // ASK never implies the topology actually changed: no refresh requested.
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(mock.discover_call_count().await, 0);
}

#[tokio::test]
async fn pipeline_reassembles_in_original_order_after_a_partial_redirect() {
    let a = NodeAddr::new("127.0.0.1", 7000);
    let b = NodeAddr::new("127.0.0.1", 7001);
    let mock = MockCluster::new();
    mock.set_topology(whole_keyspace(&a)).await;
    let slot_y = cluster_core::slot_of(b"y");
    mock.queue_reply(&a, CommandOutcome::Ok(b"x-value".to_vec())).await;
    mock.queue_reply(&a, CommandOutcome::ServerError(format!("MOVED {} {}", slot_y, b)))
        .await;
    mock.queue_reply(&b, CommandOutcome::Ok(b"y-value".to_vec())).await;

    let registry: Registry<_, _> = Registry::new();
    registry
        .start("c", vec![a.clone()], mock.transport(), mock.topology_discovery(), fast_retry(), no_periodic_check())
        .await
        .unwrap();

    let results = registry
        .qp(
            "c",
            vec![
                vec![b"GET".to_vec(), b"x".to_vec()],
                vec![b"GET".to_vec(), b"y".to_vec()],
            ],
        )
        .await
        .unwrap();

    assert_eq!(results[0].as_ref().unwrap(), b"x-value");
    assert_eq!(results[1].as_ref().unwrap(), b"y-value");
}

#[tokio::test]
async fn pipeline_with_shared_hash_tag_uses_a_single_dispatch() {
    let a = NodeAddr::new("127.0.0.1", 7000);
    let mock = MockCluster::new();
    mock.set_topology(whole_keyspace(&a)).await;
    mock.queue_reply(&a, CommandOutcome::Ok(b"a-value".to_vec())).await;
    mock.queue_reply(&a, CommandOutcome::Ok(b"b-value".to_vec())).await;
    mock.queue_reply(&a, CommandOutcome::Ok(b"c-value".to_vec())).await;

    let registry: Registry<_, _> = Registry::new();
    registry
        .start("c", vec![a.clone()], mock.transport(), mock.topology_discovery(), fast_retry(), no_periodic_check())
        .await
        .unwrap();

    // All three keys share the `{t}` hash tag, so they hash to one slot and
    // the whole pipeline goes out as a single round trip.
    let results = registry
        .qp(
            "c",
            vec![
                vec![b"GET".to_vec(), b"{t}.a".to_vec()],
                vec![b"GET".to_vec(), b"{t}.b".to_vec()],
                vec![b"GET".to_vec(), b"{t}.c".to_vec()],
            ],
        )
        .await
        .unwrap();

    assert_eq!(results[0].as_ref().unwrap(), b"a-value");
    assert_eq!(results[1].as_ref().unwrap(), b"b-value");
    assert_eq!(results[2].as_ref().unwrap(), b"c-value");
    assert_eq!(mock.pipeline_call_count(&a).await, 1);
}

#[tokio::test]
async fn unmapped_slot_exhausts_retries_as_no_connection() {
    let a = NodeAddr::new("127.0.0.1", 7000);
    let mock = MockCluster::new();
    // No topology is ever published, so every slot (including "k"'s) has no
    // mapped connection and stays that way for the whole retry budget.

    let registry: Registry<_, _> = Registry::new();
    registry
        .start("c", vec![a.clone()], mock.transport(), mock.topology_discovery(), fast_retry(), no_periodic_check())
        .await
        .unwrap();

    let err = registry
        .q("c", vec![b"GET".to_vec(), b"k".to_vec()])
        .await
        .unwrap_err();
    match err {
        ClusterError::TtlExhausted(inner) => assert!(matches!(*inner, ClusterError::NoConnection)),
        other => panic!("expected ttl exhaustion, got {other}"),
    }
}

#[tokio::test]
async fn concurrent_moved_redirects_coalesce_onto_one_refresh() {
    let a = NodeAddr::new("127.0.0.1", 7000);
    let b = NodeAddr::new("127.0.0.1", 7001);
    let mock = MockCluster::new();
    mock.set_topology(whole_keyspace(&a)).await;

    const N: usize = 5;
    let keys: Vec<Vec<u8>> = (0..N).map(|i| format!("key{i}").into_bytes()).collect();
    for key in &keys {
        let slot = cluster_core::slot_of(key);
        mock.queue_reply(&a, CommandOutcome::ServerError(format!("MOVED {} {}", slot, b)))
            .await;
    }
    for _ in 0..N {
        mock.queue_reply(&b, CommandOutcome::Ok(b"ok".to_vec())).await;
    }

    let registry: Arc<Registry<_, _>> = Arc::new(Registry::new());
    registry
        .start("c", vec![a.clone()], mock.transport(), mock.topology_discovery(), fast_retry(), no_periodic_check())
        .await
        .unwrap();

    // Bootstrap's own inline refresh has already run once.
    let before = mock.discover_call_count().await;
    assert_eq!(before, 1);

    // All N queries hit MOVED while observing the same slot-map version, so
    // however they race `request_refresh`, only one of them should win the
    // coalescing gate and actually issue `CLUSTER SLOTS` again.
    let mut handles = Vec::new();
    for key in keys {
        let registry = registry.clone();
        handles.push(tokio::spawn(
            async move { registry.q("c", vec![b"GET".to_vec(), key]).await },
        ));
    }
    for handle in handles {
        assert!(handle.await.unwrap().is_ok());
    }

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(mock.discover_call_count().await, before + 1);
}

#[tokio::test]
async fn persistent_transient_errors_exhaust_the_retry_budget() {
    let a = NodeAddr::new("127.0.0.1", 7000);
    let mock = MockCluster::new();
    mock.set_topology(whole_keyspace(&a)).await;
    let params = fast_retry();
    for _ in 0..params.request_ttl {
        mock.queue_reply(&a, CommandOutcome::ServerError("TRYAGAIN".to_string())).await;
    }

    let registry: Registry<_, _> = Registry::new();
    registry
        .start("c", vec![a.clone()], mock.transport(), mock.topology_discovery(), params, no_periodic_check())
        .await
        .unwrap();

    let err = registry
        .q("c", vec![b"GET".to_vec(), b"foo".to_vec()])
        .await
        .unwrap_err();
    match err {
        ClusterError::TtlExhausted(inner) => match *inner {
            ClusterError::TransientServerError(msg) => assert_eq!(msg, "TRYAGAIN"),
            other => panic!("unexpected inner error: {other}"),
        },
        other => panic!("expected ttl exhaustion, got {other}"),
    }
}

#[tokio::test]
async fn moved_to_an_unreachable_node_is_terminal() {
    let a = NodeAddr::new("127.0.0.1", 7000);
    let unreachable = NodeAddr::new("127.0.0.1", 9999);
    let mock = MockCluster::new();
    mock.set_topology(whole_keyspace(&a)).await;
    mock.mark_unreachable(unreachable.clone()).await;
    let slot = cluster_core::slot_of(b"foo");
    mock.queue_reply(
        &a,
        CommandOutcome::ServerError(format!("MOVED {} {}", slot, unreachable)),
    )
    .await;

    let registry: Registry<_, _> = Registry::new();
    registry
        .start("c", vec![a.clone()], mock.transport(), mock.topology_discovery(), fast_retry(), no_periodic_check())
        .await
        .unwrap();

    let err = registry
        .q("c", vec![b"GET".to_vec(), b"foo".to_vec()])
        .await
        .unwrap_err();
    match err {
        ClusterError::Moved { node, .. } => assert_eq!(node, unreachable),
        other => panic!("expected a terminal Moved error, got {other}"),
    }
}

#[tokio::test]
async fn empty_pipeline_is_rejected() {
    let a = NodeAddr::new("127.0.0.1", 7000);
    let mock = MockCluster::new();
    mock.set_topology(whole_keyspace(&a)).await;

    let registry: Registry<_, _> = Registry::new();
    registry
        .start("c", vec![a.clone()], mock.transport(), mock.topology_discovery(), fast_retry(), no_periodic_check())
        .await
        .unwrap();

    let err = registry.qp("c", vec![]).await.unwrap_err();
    assert!(matches!(err, ClusterError::EmptyPipeline));
}

#[tokio::test]
async fn unknown_cluster_name_is_rejected() {
    let registry: Registry<cluster_core_test::MockTransport, cluster_core_test::MockTopology> = Registry::new();
    let err = registry.q("nope", vec![b"PING".to_vec()]).await.unwrap_err();
    assert!(matches!(err, ClusterError::UnknownCluster(name) if name == "nope"));
}
