//! The three simulated networks and the traffic each one carries.

use crate::config::{Config, Scenario};
use crate::input_gen::{generate_messages, max_words_for, sample_message};
use crossbeam_channel::RecvTimeoutError;
use netfrag_core::host::Delivery;
use netfrag_core::link::LinkStats;
use netfrag_core::metrics::MetricsSnapshot;
use netfrag_core::topology::{Network, NetworkBuilder, NodeRef};
use netfrag_core::{Error, Result, RoutingTable};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// One message to send once the network is running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Traffic {
    pub from: u32,
    pub to: u32,
    pub message: String,
}

/// What happened during a run.
#[derive(Debug)]
pub struct Outcome {
    /// Messages handed to a sender
    pub expected: usize,

    /// Deliveries per destination host
    pub delivered: BTreeMap<u32, Vec<Delivery>>,

    pub elapsed: Duration,
    pub metrics: MetricsSnapshot,
    pub links: LinkStats,
}

impl Outcome {
    pub fn delivered_count(&self) -> usize {
        self.delivered.values().map(Vec::len).sum()
    }

    pub fn is_complete(&self) -> bool {
        self.delivered_count() == self.expected
    }
}

/// Build the network for `config.scenario` and the messages to send on it.
///
/// # Errors
/// `Error::Config` when `single-hop` runs with an MTU too small for even a
/// one-word message to travel unfragmented. Topology errors pass through.
pub fn build(config: &Config) -> Result<(Network, Vec<Traffic>)> {
    let header_len = config.layout.header_len();
    let seed = config.link.seed;

    let builder = NetworkBuilder::new(config.layout).link_config(config.link);

    match config.scenario {
        Scenario::SingleHop => {
            let network = builder
                .host(1)
                .host(2)
                .router("A", 1, config.queue_size, RoutingTable::new().with_route(2, 0))
                .link(NodeRef::Host(1), 0, NodeRef::router("A"), 0, config.mtu)
                .link(NodeRef::router("A"), 0, NodeRef::Host(2), 0, config.mtu)
                .build()?;

            let words = max_words_for(config.mtu, header_len);
            if words == 0 {
                return Err(Error::Config(format!(
                    "single-hop needs an mtu of at least {} to send unfragmented messages",
                    header_len + sample_message(1).len()
                )));
            }
            let sends = to_sends(1, 2, generate_messages(seed, config.messages, 1, words));
            Ok((network, sends))
        }

        Scenario::Fragmenting => {
            // The second hop is narrower, so the router splits again
            let second_mtu = (config.mtu * 3 / 5).max(header_len + 1);
            let network = builder
                .host(1)
                .host(2)
                .router("A", 1, config.queue_size, RoutingTable::new().with_route(2, 0))
                .link(NodeRef::Host(1), 0, NodeRef::router("A"), 0, config.mtu)
                .link(NodeRef::router("A"), 0, NodeRef::Host(2), 0, second_mtu)
                .build()?;

            let sends = to_sends(1, 2, generate_messages(seed, config.messages, 9, 16));
            Ok((network, sends))
        }

        Scenario::Mesh => {
            let q = config.queue_size;
            let mtu = config.mtu;
            let second_client_ids = (config.layout.max_id() + 1) / 2;
            let network = builder
                .host(1)
                .host_with_first_id(2, second_client_ids)
                .host(3)
                .host(4)
                .router("A", 2, q, [(3, 0), (4, 1)].into_iter().collect())
                .router("B", 1, q, [(3, 0), (4, 0)].into_iter().collect())
                .router("C", 1, q, [(3, 0), (4, 0)].into_iter().collect())
                .router("D", 2, q, [(3, 0), (4, 1)].into_iter().collect())
                .link(NodeRef::Host(1), 0, NodeRef::router("A"), 0, mtu)
                .link(NodeRef::Host(2), 0, NodeRef::router("A"), 0, mtu)
                .link(NodeRef::router("D"), 0, NodeRef::Host(3), 0, mtu)
                .link(NodeRef::router("D"), 1, NodeRef::Host(4), 0, mtu)
                .link(NodeRef::router("A"), 0, NodeRef::router("B"), 0, mtu)
                .link(NodeRef::router("A"), 1, NodeRef::router("C"), 0, mtu)
                .link(NodeRef::router("B"), 0, NodeRef::router("D"), 0, mtu)
                .link(NodeRef::router("C"), 0, NodeRef::router("D"), 0, mtu)
                .build()?;

            let mut sends = to_sends(1, 3, generate_messages(seed, config.messages, 1, 16));
            sends.extend(to_sends(
                2,
                4,
                generate_messages(seed.wrapping_add(1), config.messages, 1, 16),
            ));
            Ok((network, sends))
        }
    }
}

fn to_sends(from: u32, to: u32, messages: Vec<String>) -> Vec<Traffic> {
    messages
        .into_iter()
        .map(|message| Traffic { from, to, message })
        .collect()
}

/// Start the network, send all traffic, wait for deliveries, shut down.
///
/// Waiting stops when every message has arrived or after
/// `config.duration_ms`, whichever comes first. Lost fragments are never
/// retransmitted, so on lossy links the time limit is the normal exit.
pub fn run(config: &Config) -> anyhow::Result<Outcome> {
    let (mut network, sends) = build(config)?;
    network.start()?;
    let started = Instant::now();

    let mut expected: BTreeMap<u32, usize> = BTreeMap::new();
    for send in &sends {
        let Some(host) = network.host(send.from) else {
            anyhow::bail!("scenario sends from unknown host {}", send.from);
        };
        let report = host.send(send.to, send.message.as_bytes())?;
        if !report.fully_enqueued() {
            warn!(
                from = send.from,
                id = report.id,
                dropped = report.dropped,
                "message partially dropped at the sender"
            );
        }
        *expected.entry(send.to).or_default() += 1;
    }

    let deadline = started + Duration::from_millis(config.duration_ms);
    let mut delivered = BTreeMap::new();
    for (&addr, &count) in &expected {
        let Some(host) = network.host(addr) else {
            anyhow::bail!("scenario sends to unknown host {addr}");
        };
        let deliveries = host.deliveries();
        let mut got = Vec::with_capacity(count);
        while got.len() < count {
            match deliveries.recv_deadline(deadline) {
                Ok(d) => got.push(d),
                Err(RecvTimeoutError::Timeout) => break,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        delivered.insert(addr, got);
    }

    network.shutdown();
    let elapsed = started.elapsed();

    let outcome = Outcome {
        expected: sends.len(),
        delivered,
        elapsed,
        metrics: network.metrics(),
        links: network.link_stats(),
    };
    info!(
        delivered = outcome.delivered_count(),
        expected = outcome.expected,
        elapsed_ms = elapsed.as_millis() as u64,
        "simulation finished"
    );

    Ok(outcome)
}
