//! Multi-port routers with per-hop re-fragmentation.
//!
//! A router owns N inbound and N outbound interfaces and a static routing
//! table. Each `forward` call visits every inbound interface once, in index
//! order, and moves at most one packet from each; a busy interface cannot
//! starve the others.
//!
//! For every packet taken:
//! 1. decode it (malformed → drop and report)
//! 2. look up the outbound interface (no route → drop and report)
//! 3. if it fits the outbound MTU, re-encode it unchanged; otherwise split
//!    it with [`refragment`]
//! 4. non-blocking put of each piece; a full queue drops that piece only

use crate::error::{Error, Result, RoutingError};
use crate::fragment::refragment;
use crate::interface::Interface;
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::node::Node;
use crate::packet::{HeaderLayout, Packet};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Static map from destination address to outbound interface index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoutingTable {
    routes: HashMap<u32, usize>,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the route for `destination`.
    pub fn with_route(mut self, destination: u32, interface: usize) -> Self {
        self.routes.insert(destination, interface);
        self
    }

    /// Outbound interface for `destination`.
    pub fn lookup(&self, destination: u32) -> std::result::Result<usize, RoutingError> {
        self.routes
            .get(&destination)
            .copied()
            .ok_or(RoutingError::TableMiss { destination })
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    fn validate(&self, intf_count: usize) -> std::result::Result<(), RoutingError> {
        match self.routes.values().find(|&&index| index >= intf_count) {
            Some(&index) => Err(RoutingError::NoSuchInterface {
                index,
                count: intf_count,
            }),
            None => Ok(()),
        }
    }
}

impl FromIterator<(u32, usize)> for RoutingTable {
    fn from_iter<I: IntoIterator<Item = (u32, usize)>>(iter: I) -> Self {
        Self {
            routes: iter.into_iter().collect(),
        }
    }
}

/// A multi-interface router.
#[derive(Debug)]
pub struct Router {
    name: String,
    layout: HeaderLayout,
    in_intfs: Vec<Arc<Interface>>,
    out_intfs: Vec<Arc<Interface>>,
    table: RoutingTable,
    metrics: Metrics,
}

impl Router {
    /// Create a router with `intf_count` inbound and outbound interfaces.
    ///
    /// # Errors
    /// `Error::Topology` if `intf_count` is 0 or a route points past the
    /// last interface.
    pub fn new(
        name: &str,
        intf_count: usize,
        queue_capacity: usize,
        table: RoutingTable,
        layout: HeaderLayout,
    ) -> Result<Self> {
        if intf_count == 0 {
            return Err(Error::Topology(format!("router {name} has no interfaces")));
        }
        table
            .validate(intf_count)
            .map_err(|e| Error::Topology(format!("router {name}: {e}")))?;

        let make = || {
            (0..intf_count)
                .map(|_| Arc::new(Interface::new(queue_capacity)))
                .collect::<Vec<_>>()
        };

        Ok(Self {
            name: format!("Router_{name}"),
            layout,
            in_intfs: make(),
            out_intfs: make(),
            table,
            metrics: Metrics::new(),
        })
    }

    pub fn in_intfs(&self) -> &[Arc<Interface>] {
        &self.in_intfs
    }

    pub fn out_intfs(&self) -> &[Arc<Interface>] {
        &self.out_intfs
    }

    pub fn routing_table(&self) -> &RoutingTable {
        &self.table
    }

    /// One round-robin pass over the inbound interfaces.
    ///
    /// Returns how many packets were taken off inbound queues.
    pub fn forward(&self) -> usize {
        let mut taken = 0;

        for (i, in_intf) in self.in_intfs.iter().enumerate() {
            let Some(bytes) = in_intf.get() else {
                continue;
            };
            taken += 1;
            self.metrics.add_received(1);

            if let Err(e) = self.forward_one(i, &bytes) {
                self.report(i, &e);
            }
        }

        taken
    }

    fn forward_one(&self, src: usize, bytes: &[u8]) -> Result<()> {
        let packet = Packet::decode(bytes, &self.layout)?;
        let dst = self.table.lookup(packet.destination)?;
        let out = &self.out_intfs[dst];
        let mtu = out.mtu();

        if packet.encoded_len(&self.layout) <= mtu {
            let encoded = packet.encode(&self.layout)?;
            self.put(out, src, dst, &packet, encoded);
            return Ok(());
        }

        let pieces = refragment(&packet, mtu, &self.layout)?;
        debug!(
            router = %self.name,
            id = packet.id,
            from = src,
            to = dst,
            pieces = pieces.len(),
            mtu,
            "re-fragmenting packet"
        );
        self.metrics.add_fragments(pieces.len() as u64 - 1);

        // A failed piece must not stop the rest of the batch.
        for piece in &pieces {
            match piece.encode(&self.layout) {
                Ok(encoded) => self.put(out, src, dst, piece, encoded),
                Err(e) => self.report(src, &e),
            }
        }

        Ok(())
    }

    fn put(&self, out: &Interface, src: usize, dst: usize, packet: &Packet, encoded: Vec<u8>) {
        match out.put(encoded, false) {
            Ok(()) => {
                debug!(
                    router = %self.name,
                    id = packet.id,
                    offset = packet.offset,
                    more = packet.more_fragments,
                    from = src,
                    to = dst,
                    mtu = out.mtu(),
                    "forwarding packet"
                );
                self.metrics.add_sent(1);
            }
            Err(e) => {
                warn!(
                    router = %self.name,
                    id = packet.id,
                    offset = packet.offset,
                    to = dst,
                    error = %e,
                    "packet lost"
                );
                self.metrics.add_dropped(1);
            }
        }
    }

    fn report(&self, intf: usize, e: &Error) {
        match e {
            Error::Packet(_) => self.metrics.add_malformed(1),
            Error::Routing(_) => self.metrics.add_routing_misses(1),
            Error::Fragment(_) => self.metrics.add_mtu_errors(1),
            _ => {}
        }
        error!(router = %self.name, intf, error = %e, "dropping packet");
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }
}

impl Node for Router {
    fn name(&self) -> &str {
        &self.name
    }

    fn poll(&self) -> usize {
        self.forward()
    }
}
