//! Per-node counters.
//!
//! Every host and router owns a [`Metrics`] that its own thread updates and
//! any other thread may read. Counters are relaxed atomics: each one is
//! exact, but a snapshot taken while the node is running is not a single
//! consistent cut across counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters for one node.
#[derive(Debug, Default)]
pub struct Metrics {
    packets_sent: AtomicU64,
    packets_dropped: AtomicU64,
    packets_received: AtomicU64,
    packets_malformed: AtomicU64,
    fragments_created: AtomicU64,
    routing_misses: AtomicU64,
    mtu_errors: AtomicU64,
    reassembly_errors: AtomicU64,
    messages_sent: AtomicU64,
    messages_delivered: AtomicU64,
}

macro_rules! counter {
    ($($name:ident => $field:ident),* $(,)?) => {
        $(
            pub fn $name(&self, n: u64) {
                self.$field.fetch_add(n, Ordering::Relaxed);
            }
        )*
    };
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    counter! {
        add_sent => packets_sent,
        add_dropped => packets_dropped,
        add_received => packets_received,
        add_malformed => packets_malformed,
        add_fragments => fragments_created,
        add_routing_misses => routing_misses,
        add_mtu_errors => mtu_errors,
        add_reassembly_errors => reassembly_errors,
        add_messages_sent => messages_sent,
        add_messages_delivered => messages_delivered,
    }

    /// Copy the current counter values.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);

        MetricsSnapshot {
            packets_sent: get(&self.packets_sent),
            packets_dropped: get(&self.packets_dropped),
            packets_received: get(&self.packets_received),
            packets_malformed: get(&self.packets_malformed),
            fragments_created: get(&self.fragments_created),
            routing_misses: get(&self.routing_misses),
            mtu_errors: get(&self.mtu_errors),
            reassembly_errors: get(&self.reassembly_errors),
            messages_sent: get(&self.messages_sent),
            messages_delivered: get(&self.messages_delivered),
        }
    }
}

/// Point-in-time copy of a node's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Packets successfully enqueued on an outbound interface
    pub packets_sent: u64,

    /// Packets dropped because an outbound interface was full
    pub packets_dropped: u64,

    /// Packets taken from inbound interfaces
    pub packets_received: u64,

    /// Packets that failed to decode or encode
    pub packets_malformed: u64,

    /// Extra packets produced by splitting (fragments beyond the first)
    pub fragments_created: u64,

    /// Packets dropped for lack of a route
    pub routing_misses: u64,

    /// Packets dropped because the next hop's MTU cannot carry payload
    pub mtu_errors: u64,

    /// Fragments rejected by the reassembler
    pub reassembly_errors: u64,

    /// Messages handed to the network by a host
    pub messages_sent: u64,

    /// Messages reassembled and delivered by a host
    pub messages_delivered: u64,
}

impl MetricsSnapshot {
    /// Sum two snapshots (e.g. across all nodes).
    pub fn merge(&self, other: &MetricsSnapshot) -> MetricsSnapshot {
        MetricsSnapshot {
            packets_sent: self.packets_sent + other.packets_sent,
            packets_dropped: self.packets_dropped + other.packets_dropped,
            packets_received: self.packets_received + other.packets_received,
            packets_malformed: self.packets_malformed + other.packets_malformed,
            fragments_created: self.fragments_created + other.fragments_created,
            routing_misses: self.routing_misses + other.routing_misses,
            mtu_errors: self.mtu_errors + other.mtu_errors,
            reassembly_errors: self.reassembly_errors + other.reassembly_errors,
            messages_sent: self.messages_sent + other.messages_sent,
            messages_delivered: self.messages_delivered + other.messages_delivered,
        }
    }

    /// Compute queue loss rate (dropped / attempted).
    pub fn loss_rate(&self) -> f64 {
        let attempted = self.packets_sent + self.packets_dropped;
        if attempted == 0 {
            0.0
        } else {
            self.packets_dropped as f64 / attempted as f64
        }
    }

    /// Compute delivery rate (delivered / sent messages).
    pub fn delivery_rate(&self) -> f64 {
        if self.messages_sent == 0 {
            0.0
        } else {
            self.messages_delivered as f64 / self.messages_sent as f64
        }
    }

    /// Print a human-readable summary to stdout.
    pub fn print_summary(&self) {
        println!("\n=== Network Summary ===");
        println!("Messages sent: {}", self.messages_sent);
        println!(
            "Messages delivered: {} ({:.1}%)",
            self.messages_delivered,
            self.delivery_rate() * 100.0
        );
        println!();
        println!("=== Packets ===");
        println!("Enqueued: {}", self.packets_sent);
        println!("Received: {}", self.packets_received);
        println!("Extra fragments: {}", self.fragments_created);
        println!(
            "Dropped (queue full): {} ({:.2}%)",
            self.packets_dropped,
            self.loss_rate() * 100.0
        );
        println!("Malformed: {}", self.packets_malformed);
        println!("Routing misses: {}", self.routing_misses);
        println!("MTU errors: {}", self.mtu_errors);
        println!("Reassembly errors: {}", self.reassembly_errors);
        println!();
    }

    /// Export as `key=value` lines (for parsing/testing).
    pub fn export_text(&self) -> String {
        format!(
            "messages_sent={}\n\
             messages_delivered={}\n\
             packets_sent={}\n\
             packets_received={}\n\
             packets_dropped={}\n\
             loss_rate={:.4}\n\
             fragments_created={}\n\
             packets_malformed={}\n\
             routing_misses={}\n\
             mtu_errors={}\n\
             reassembly_errors={}\n",
            self.messages_sent,
            self.messages_delivered,
            self.packets_sent,
            self.packets_received,
            self.packets_dropped,
            self.loss_rate(),
            self.fragments_created,
            self.packets_malformed,
            self.routing_misses,
            self.mtu_errors,
            self.reassembly_errors,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let metrics = Metrics::new();
        metrics.add_sent(3);
        metrics.add_sent(2);
        metrics.add_dropped(1);

        let snap = metrics.snapshot();
        assert_eq!(snap.packets_sent, 5);
        assert_eq!(snap.packets_dropped, 1);
        assert_eq!(snap.packets_received, 0);
    }

    #[test]
    fn test_loss_rate() {
        let snap = MetricsSnapshot {
            packets_sent: 95,
            packets_dropped: 5,
            ..Default::default()
        };
        assert_eq!(snap.loss_rate(), 0.05);
        assert_eq!(MetricsSnapshot::default().loss_rate(), 0.0);
    }

    #[test]
    fn test_merge() {
        let a = MetricsSnapshot {
            messages_sent: 2,
            packets_sent: 4,
            ..Default::default()
        };
        let b = MetricsSnapshot {
            messages_delivered: 2,
            packets_sent: 6,
            ..Default::default()
        };

        let merged = a.merge(&b);
        assert_eq!(merged.packets_sent, 10);
        assert_eq!(merged.delivery_rate(), 1.0);
    }

    #[test]
    fn test_export_text() {
        let metrics = Metrics::new();
        metrics.add_messages_sent(3);
        metrics.add_routing_misses(1);

        let text = metrics.snapshot().export_text();
        assert!(text.contains("messages_sent=3"));
        assert!(text.contains("routing_misses=1"));
        assert!(text.contains("loss_rate=0.0000"));
    }
}
