//! Link layer: moves encoded packets between nodes.
//!
//! A [`Link`] joins one node's outbound interface to another node's inbound
//! interface and fixes the MTU on both. The [`LinkLayer`] owns every link and
//! runs as its own node, carrying at most one packet per link per poll.
//!
//! # Simulated Effects
//!
//! - **Latency**: constant per link, so packets on one hop stay in order
//! - **Loss**: Bernoulli drop with a seeded ChaCha8 RNG
//! - **MTU**: packets longer than the link MTU are dropped, not split
//!
//! # Determinism
//!
//! Link `i` draws from `ChaCha8Rng::seed_from_u64(seed + i)`. Given the same
//! seed and the same packet sequence per link, the same packets are lost.

use crate::interface::Interface;
use crate::node::Node;
use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Configuration for link simulation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinkConfig {
    /// One-way latency in milliseconds
    pub latency_ms: u64,

    /// Packet loss probability [0.0, 1.0]
    pub loss_rate: f64,

    /// Random seed for determinism
    pub seed: u64,

    /// Hold packets while the receiving queue is full instead of dropping
    pub backpressure: bool,
}

impl LinkConfig {
    /// Create a configuration with no impairments (perfect links).
    pub fn perfect(seed: u64) -> Self {
        Self {
            latency_ms: 0,
            loss_rate: 0.0,
            seed,
            backpressure: true,
        }
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self::perfect(0)
    }
}

/// A point-to-point link between two interfaces.
#[derive(Debug, Clone)]
pub struct Link {
    name: String,
    from: Arc<Interface>,
    to: Arc<Interface>,
    mtu: usize,
}

impl Link {
    /// Join `from` (an outbound interface) to `to` (an inbound interface).
    ///
    /// Sets the MTU of both interfaces to `mtu`.
    pub fn new(
        name: impl Into<String>,
        from: Arc<Interface>,
        to: Arc<Interface>,
        mtu: usize,
    ) -> Self {
        from.set_mtu(mtu);
        to.set_mtu(mtu);

        Self {
            name: name.into(),
            from,
            to,
            mtu,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mtu(&self) -> usize {
        self.mtu
    }
}

/// A packet on the wire with scheduled delivery time.
#[derive(Debug)]
struct InFlight {
    bytes: Vec<u8>,
    deliver_at: Instant,
}

#[derive(Debug)]
struct LinkState {
    link: Link,
    rng: ChaCha8Rng,
    wire: VecDeque<InFlight>,
    stats: LinkStats,
}

/// Statistics about link behavior.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkStats {
    /// Packets delivered to the receiving interface
    pub carried: u64,

    /// Packets lost to simulated loss
    pub dropped_loss: u64,

    /// Packets longer than the link MTU
    pub dropped_mtu: u64,

    /// Packets dropped because the receiving queue was full
    pub dropped_full: u64,

    /// Packets currently on the wire
    pub in_flight: usize,
}

impl LinkStats {
    fn merge(&self, other: &LinkStats) -> LinkStats {
        LinkStats {
            carried: self.carried + other.carried,
            dropped_loss: self.dropped_loss + other.dropped_loss,
            dropped_mtu: self.dropped_mtu + other.dropped_mtu,
            dropped_full: self.dropped_full + other.dropped_full,
            in_flight: self.in_flight + other.in_flight,
        }
    }
}

/// All links of a network, driven by one thread.
#[derive(Debug)]
pub struct LinkLayer {
    name: String,
    config: LinkConfig,
    latency: Duration,
    links: Mutex<Vec<LinkState>>,
}

impl LinkLayer {
    pub fn new(config: LinkConfig) -> Self {
        Self {
            name: "Network".to_string(),
            config,
            latency: Duration::from_millis(config.latency_ms),
            links: Mutex::new(Vec::new()),
        }
    }

    pub fn add_link(&self, link: Link) {
        let mut links = self.links.lock();
        let seed = self.config.seed.wrapping_add(links.len() as u64);
        links.push(LinkState {
            link,
            rng: ChaCha8Rng::seed_from_u64(seed),
            wire: VecDeque::new(),
            stats: LinkStats::default(),
        });
    }

    pub fn link_count(&self) -> usize {
        self.links.lock().len()
    }

    /// Move packets: at most one pickup and one delivery per link.
    ///
    /// Returns the number of packets picked up or delivered.
    pub fn transfer(&self) -> usize {
        let now = Instant::now();
        let mut moved = 0;

        for state in self.links.lock().iter_mut() {
            if let Some(bytes) = state.link.from.get() {
                moved += 1;
                self.pick_up(state, bytes, now);
            }
            if self.deliver(state, now) {
                moved += 1;
            }
        }

        moved
    }

    fn pick_up(&self, state: &mut LinkState, bytes: Vec<u8>, now: Instant) {
        if bytes.len() > state.link.mtu {
            warn!(
                link = %state.link.name,
                len = bytes.len(),
                mtu = state.link.mtu,
                "packet longer than link MTU"
            );
            state.stats.dropped_mtu += 1;
            return;
        }

        if self.config.loss_rate > 0.0 {
            let roll: f64 = state.rng.gen();
            if roll < self.config.loss_rate {
                debug!(link = %state.link.name, "packet lost on the wire");
                state.stats.dropped_loss += 1;
                return;
            }
        }

        state.wire.push_back(InFlight {
            bytes,
            deliver_at: now + self.latency,
        });
    }

    /// Hand the oldest due packet to the receiving interface.
    ///
    /// With backpressure a full receiver leaves the packet on the wire for
    /// the next poll instead of blocking, so the stop flag stays responsive.
    /// This thread is the only producer for inbound interfaces, so the
    /// fullness check cannot go stale before the put.
    fn deliver(&self, state: &mut LinkState, now: Instant) -> bool {
        let due = state.wire.front().is_some_and(|p| p.deliver_at <= now);
        if !due || (self.config.backpressure && state.link.to.is_full()) {
            return false;
        }
        let Some(packet) = state.wire.pop_front() else {
            return false;
        };

        match state.link.to.put(packet.bytes, false) {
            Ok(()) => state.stats.carried += 1,
            Err(e) => {
                warn!(link = %state.link.name, error = %e, "packet dropped at receiver");
                state.stats.dropped_full += 1;
            }
        }
        true
    }

    /// Counters summed over every link.
    pub fn stats(&self) -> LinkStats {
        self.links.lock().iter().fold(LinkStats::default(), |acc, s| {
            acc.merge(&LinkStats {
                in_flight: s.wire.len(),
                ..s.stats
            })
        })
    }

    /// Counters for one link, by insertion order.
    pub fn link_stats(&self, index: usize) -> Option<LinkStats> {
        self.links.lock().get(index).map(|s| LinkStats {
            in_flight: s.wire.len(),
            ..s.stats
        })
    }
}

impl Node for LinkLayer {
    fn name(&self) -> &str {
        &self.name
    }

    fn poll(&self) -> usize {
        self.transfer()
    }
}
