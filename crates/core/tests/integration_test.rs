//! Integration tests for whole networks.
//!
//! These tests build topologies, run every node on its own thread, and
//! verify end-to-end behavior: send -> fragment -> link -> route ->
//! re-fragment -> link -> reassemble -> deliver.

use netfrag_core::{
    host::Delivery,
    link::LinkConfig,
    node::{self, StopSignal},
    packet::HeaderLayout,
    router::RoutingTable,
    topology::{Network, NetworkBuilder, NodeRef},
    Host,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

const WAIT: Duration = Duration::from_secs(5);

const MSG_ONE: &str = "Sample data: 1xyz";
const MSG_TWO: &str = "Sample data: 1xyz 2xyz 3xyz 4xyz 5xyz 6xyz 7xyz 8xyz 9xyz";
const MSG_THREE: &str = "Sample data: 1xyz 2xyz 3xyz 4xyz 5xyz 6xyz 7xyz 8xyz 9xyz \
                         10xyz 11xyz 12xyz 13xyz 14xyz 15xyz 16xyz";

fn init_tracing() {
    let _ = tracing_subscriber::fmt::try_init();
}

/// Client 1 -> router A -> server 2, with the given MTUs per hop.
fn single_router(first_mtu: usize, second_mtu: usize, config: LinkConfig) -> Network {
    NetworkBuilder::new(HeaderLayout::default())
        .link_config(config)
        .host(1)
        .host(2)
        .router("A", 1, 0, RoutingTable::new().with_route(2, 0))
        .link(NodeRef::Host(1), 0, NodeRef::router("A"), 0, first_mtu)
        .link(NodeRef::router("A"), 0, NodeRef::Host(2), 0, second_mtu)
        .build()
        .expect("failed to build network")
}

/// Collect `count` deliveries from `host`, failing the test on timeout.
fn collect(host: &Host, count: usize) -> Vec<Delivery> {
    let deliveries = host.deliveries();
    (0..count)
        .map(|i| {
            deliveries
                .recv_timeout(WAIT)
                .unwrap_or_else(|_| panic!("timed out waiting for delivery {i}"))
        })
        .collect()
}

/// A short message crosses one router without being fragmented.
#[test]
fn test_single_hop_no_fragmentation() {
    init_tracing();

    let mut network = single_router(50, 50, LinkConfig::perfect(1));
    network.start().expect("failed to start");

    let report = network.host(1).unwrap().send(2, b"hello").unwrap();
    assert_eq!(report.fragments, 1);

    let delivered = collect(network.host(2).unwrap(), 1);
    assert_eq!(delivered[0].message, b"hello");
    assert_eq!(delivered[0].id, report.id);

    network.shutdown();

    let metrics = network.metrics();
    assert_eq!(metrics.messages_sent, 1);
    assert_eq!(metrics.messages_delivered, 1);
    assert_eq!(metrics.fragments_created, 0);
}

/// The sender splits a message that does not fit its outbound MTU.
#[test]
fn test_sender_fragmentation() {
    init_tracing();

    let mut network = single_router(50, 50, LinkConfig::perfect(2));
    network.start().expect("failed to start");

    let client = network.host(1).unwrap();
    for _ in 0..3 {
        let report = client.send(2, MSG_THREE.as_bytes()).unwrap();
        assert!(report.fragments > 1);
        assert!(report.fully_enqueued());
    }

    let delivered = collect(network.host(2).unwrap(), 3);
    for d in &delivered {
        assert_eq!(d.message, MSG_THREE.as_bytes());
    }
    let ids: HashSet<u32> = delivered.iter().map(|d| d.id).collect();
    assert_eq!(ids.len(), 3);

    network.shutdown();
}

/// A router re-fragments for a next hop with a smaller MTU.
#[test]
fn test_router_refragmentation() {
    init_tracing();

    let mut network = single_router(50, 30, LinkConfig::perfect(3));
    network.start().expect("failed to start");

    let message: Vec<u8> = (0..100u8).map(|i| b'a' + i % 26).collect();
    network.host(1).unwrap().send(2, &message).unwrap();

    let delivered = collect(network.host(2).unwrap(), 1);
    assert_eq!(delivered[0].message, message);

    network.shutdown();

    // Both the client and the router had to split
    let client = network.host(1).unwrap().metrics();
    let router = network.router("A").unwrap().metrics();
    assert!(client.fragments_created > 0);
    assert!(router.fragments_created > 0);
    assert_eq!(router.mtu_errors, 0);
    assert_eq!(network.link_stats().dropped_mtu, 0);
}

/// Two clients, four routers, two servers, two disjoint paths.
#[test]
fn test_mesh_routing() {
    init_tracing();

    let mut network = NetworkBuilder::new(HeaderLayout::default())
        .host(1)
        .host_with_first_id(2, 50)
        .host(3)
        .host(4)
        .router("A", 2, 0, [(3, 0), (4, 1)].into_iter().collect())
        .router("B", 1, 0, [(3, 0), (4, 0)].into_iter().collect())
        .router("C", 1, 0, [(3, 0), (4, 0)].into_iter().collect())
        .router("D", 2, 0, [(3, 0), (4, 1)].into_iter().collect())
        .link(NodeRef::Host(1), 0, NodeRef::router("A"), 0, 50)
        .link(NodeRef::Host(2), 0, NodeRef::router("A"), 0, 50)
        .link(NodeRef::router("D"), 0, NodeRef::Host(3), 0, 50)
        .link(NodeRef::router("D"), 1, NodeRef::Host(4), 0, 50)
        .link(NodeRef::router("A"), 0, NodeRef::router("B"), 0, 50)
        .link(NodeRef::router("A"), 1, NodeRef::router("C"), 0, 50)
        .link(NodeRef::router("B"), 0, NodeRef::router("D"), 0, 50)
        .link(NodeRef::router("C"), 0, NodeRef::router("D"), 0, 50)
        .build()
        .expect("failed to build network");

    network.start().expect("failed to start");

    let client1 = network.host(1).unwrap();
    let client2 = network.host(2).unwrap();
    client1.send(3, MSG_ONE.as_bytes()).unwrap();
    client1.send(3, MSG_TWO.as_bytes()).unwrap();
    client2.send(4, MSG_TWO.as_bytes()).unwrap();
    client2.send(4, MSG_THREE.as_bytes()).unwrap();

    let to_three: HashSet<Vec<u8>> = collect(network.host(3).unwrap(), 2)
        .into_iter()
        .map(|d| d.message)
        .collect();
    let to_four: HashSet<Vec<u8>> = collect(network.host(4).unwrap(), 2)
        .into_iter()
        .map(|d| d.message)
        .collect();

    assert!(to_three.contains(MSG_ONE.as_bytes()));
    assert!(to_three.contains(MSG_TWO.as_bytes()));
    assert!(to_four.contains(MSG_TWO.as_bytes()));
    assert!(to_four.contains(MSG_THREE.as_bytes()));

    network.shutdown();

    // Traffic for 3 went through B only, traffic for 4 through C only
    assert!(network.router("B").unwrap().metrics().packets_received > 0);
    assert!(network.router("C").unwrap().metrics().packets_received > 0);
    assert_eq!(network.metrics().routing_misses, 0);
}

/// Lost fragments never produce a wrong or partial message.
#[test]
fn test_lossy_links_deliver_only_whole_messages() {
    init_tracing();

    let config = LinkConfig {
        loss_rate: 0.2,
        ..LinkConfig::perfect(7)
    };
    let mut network = single_router(50, 30, config);
    network.start().expect("failed to start");

    let sent: Vec<Vec<u8>> = (0..20)
        .map(|i| format!("message {i}: {}", "x".repeat(i * 3)).into_bytes())
        .collect();
    for msg in &sent {
        network.host(1).unwrap().send(2, msg).unwrap();
    }

    // Wait until the links have drained
    let deadline = Instant::now() + WAIT;
    while network.link_stats().in_flight > 0 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }
    std::thread::sleep(Duration::from_millis(300));
    network.shutdown();

    let server = network.host(2).unwrap();
    let delivered: Vec<Delivery> = server.deliveries().try_iter().collect();
    for d in &delivered {
        assert!(sent.contains(&d.message), "unexpected message {:?}", d.message);
    }
    assert!(delivered.len() < sent.len());
    assert!(network.link_stats().dropped_loss > 0);
}

/// Bounded router queues drop under load without stopping the router.
#[test]
fn test_bounded_router_queue_survives_overflow() {
    init_tracing();

    let config = LinkConfig {
        backpressure: false,
        ..LinkConfig::perfect(11)
    };
    let mut network = NetworkBuilder::new(HeaderLayout::default())
        .link_config(config)
        .host(1)
        .host(2)
        .router("A", 1, 2, RoutingTable::new().with_route(2, 0))
        .link(NodeRef::Host(1), 0, NodeRef::router("A"), 0, 50)
        .link(NodeRef::router("A"), 0, NodeRef::Host(2), 0, 50)
        .build()
        .expect("failed to build network");

    // Queue everything before any thread runs
    for i in 0..30 {
        network
            .host(1)
            .unwrap()
            .send(2, format!("burst {i}").as_bytes())
            .unwrap();
    }
    network.start().expect("failed to start");

    // The router keeps forwarding after overflow
    let first = collect(network.host(2).unwrap(), 1);
    assert!(first[0].message.starts_with(b"burst"));

    // Let the burst drain so the next message meets empty queues
    let deadline = Instant::now() + WAIT;
    while network.link_stats().in_flight > 0 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }
    std::thread::sleep(Duration::from_millis(200));

    let late = network.host(1).unwrap().send(2, b"after the burst").unwrap();
    let deliveries = network.host(2).unwrap().deliveries();
    let deadline = Instant::now() + WAIT;
    let mut seen_late = false;
    while Instant::now() < deadline && !seen_late {
        if let Ok(d) = deliveries.recv_timeout(Duration::from_millis(50)) {
            seen_late = d.id == late.id;
        }
    }
    assert!(seen_late, "message sent after the burst was not delivered");

    network.shutdown();
}

/// Setting the stop signal ends a node's loop promptly.
#[test]
fn test_stop_signal_ends_node_thread() {
    init_tracing();

    let host = Arc::new(Host::new(1, HeaderLayout::default()));
    let stop = StopSignal::new();
    let handle = node::spawn(host, stop.clone()).expect("failed to spawn");

    std::thread::sleep(Duration::from_millis(20));
    let start = Instant::now();
    stop.stop();
    handle.join().expect("node thread panicked");
    assert!(start.elapsed() < Duration::from_secs(1));
}

/// Dropping a running network joins its threads.
#[test]
fn test_drop_joins_threads() {
    init_tracing();

    let mut network = single_router(50, 50, LinkConfig::perfect(5));
    network.start().expect("failed to start");
    assert!(network.is_running());
    drop(network);
}
