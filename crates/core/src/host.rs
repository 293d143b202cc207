//! End hosts: fragment on send, reassemble on receive.
//!
//! A host has exactly one inbound and one outbound interface. `send` is
//! called by the driver's thread while the host's own thread loops on
//! `poll_receive`, so the id counter and the reassembler each sit behind
//! their own mutex.
//!
//! Completed messages go to exactly one place. A direct `poll_receive`
//! caller gets them as return values; the host's own thread, running the
//! [`Node`] loop, publishes them on the [`deliveries`](Host::deliveries)
//! channel instead.

use crate::error::Result;
use crate::fragment::fragment;
use crate::interface::Interface;
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::node::Node;
use crate::packet::{HeaderLayout, Packet};
use crate::reassembly::{Reassembler, ReassemblerStats};
use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// A message handed up to the application layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub id: u32,
    pub message: Vec<u8>,
}

/// Outcome of one `send` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendReport {
    /// Id assigned to the message
    pub id: u32,

    /// Fragments the message was split into
    pub fragments: usize,

    /// Fragments lost to a full outbound queue
    pub dropped: usize,
}

impl SendReport {
    pub fn fully_enqueued(&self) -> bool {
        self.dropped == 0
    }
}

/// A network host.
#[derive(Debug)]
pub struct Host {
    addr: u32,
    name: String,
    layout: HeaderLayout,
    in_intf: Arc<Interface>,
    out_intf: Arc<Interface>,
    next_id: Mutex<u32>,
    reassembler: Mutex<Reassembler>,
    delivered_tx: Sender<Delivery>,
    delivered_rx: Receiver<Delivery>,
    metrics: Metrics,
}

impl Host {
    /// Create a host with unbounded interfaces and ids starting at 0.
    pub fn new(addr: u32, layout: HeaderLayout) -> Self {
        Self::with_first_id(addr, layout, 0)
    }

    /// Create a host whose first message id is `first_id`.
    ///
    /// Receivers key reassembly by id alone, so hosts sending to a common
    /// destination should start from disjoint ids.
    pub fn with_first_id(addr: u32, layout: HeaderLayout, first_id: u32) -> Self {
        let (delivered_tx, delivered_rx) = crossbeam_channel::unbounded();

        Self {
            addr,
            name: format!("Host_{addr}"),
            layout,
            in_intf: Arc::new(Interface::new(0)),
            out_intf: Arc::new(Interface::new(0)),
            next_id: Mutex::new(first_id % (layout.max_id() + 1)),
            reassembler: Mutex::new(Reassembler::new()),
            delivered_tx,
            delivered_rx,
            metrics: Metrics::new(),
        }
    }

    pub fn addr(&self) -> u32 {
        self.addr
    }

    pub fn in_intf(&self) -> &Arc<Interface> {
        &self.in_intf
    }

    pub fn out_intf(&self) -> &Arc<Interface> {
        &self.out_intf
    }

    /// Fragment `message` for the outbound MTU and enqueue every fragment.
    ///
    /// All fragments are encoded before any is enqueued, so an encode
    /// failure sends nothing. A fragment that meets a full queue is dropped
    /// and counted in the report; the remaining fragments are still tried.
    ///
    /// # Errors
    /// - `FragmentError::MtuTooSmall` if the outbound MTU cannot carry payload
    /// - `PacketError::FieldOverflow` if the message is too long for the
    ///   offset field or the destination too wide for its field
    pub fn send(&self, destination: u32, message: &[u8]) -> Result<SendReport> {
        let id = self.take_id();
        let mtu = self.out_intf.mtu();

        let packets = fragment(destination, id, message, mtu, &self.layout)?;
        let encoded = packets
            .iter()
            .map(|p| p.encode(&self.layout))
            .collect::<Result<Vec<_>>>()?;

        if encoded.len() > 1 {
            debug!(
                host = %self.name,
                id,
                len = message.len(),
                fragments = encoded.len(),
                mtu,
                "segmenting message"
            );
            self.metrics.add_fragments(encoded.len() as u64 - 1);
        }

        let mut dropped = 0;
        for (packet, bytes) in packets.iter().zip(encoded) {
            match self.out_intf.put(bytes, false) {
                Ok(()) => {
                    debug!(
                        host = %self.name,
                        id,
                        offset = packet.offset,
                        more = packet.more_fragments,
                        mtu,
                        "sending packet"
                    );
                    self.metrics.add_sent(1);
                }
                Err(e) => {
                    warn!(host = %self.name, id, offset = packet.offset, error = %e, "packet lost");
                    self.metrics.add_dropped(1);
                    dropped += 1;
                }
            }
        }

        self.metrics.add_messages_sent(1);

        Ok(SendReport {
            id,
            fragments: packets.len(),
            dropped,
        })
    }

    /// Take one packet from the inbound interface and feed it to reassembly.
    ///
    /// Returns the delivered message when this packet completed one; it is
    /// not published on the deliveries channel. Malformed and duplicate
    /// packets are logged and discarded.
    pub fn poll_receive(&self) -> Option<Delivery> {
        let bytes = self.in_intf.get()?;
        self.handle_packet(&bytes)
    }

    fn handle_packet(&self, bytes: &[u8]) -> Option<Delivery> {
        self.metrics.add_received(1);

        let packet = match Packet::decode(bytes, &self.layout) {
            Ok(packet) => packet,
            Err(e) => {
                error!(host = %self.name, error = %e, "discarding malformed packet");
                self.metrics.add_malformed(1);
                return None;
            }
        };

        let id = packet.id;
        if packet.destination != self.addr {
            warn!(
                host = %self.name,
                id,
                destination = packet.destination,
                "packet addressed to another host"
            );
        }

        let completed = self.reassembler.lock().receive(packet);
        match completed {
            Ok(Some(message)) => {
                info!(
                    host = %self.name,
                    id,
                    message = %String::from_utf8_lossy(&message),
                    "received message"
                );
                self.metrics.add_messages_delivered(1);

                Some(Delivery { id, message })
            }
            Ok(None) => {
                debug!(host = %self.name, id, "received packet segment");
                None
            }
            Err(e) => {
                error!(host = %self.name, id, error = %e, "fragment rejected");
                self.metrics.add_reassembly_errors(1);
                None
            }
        }
    }

    /// Channel of messages delivered by the host's own poll loop.
    pub fn deliveries(&self) -> Receiver<Delivery> {
        self.delivered_rx.clone()
    }

    pub fn reassembly_stats(&self) -> ReassemblerStats {
        self.reassembler.lock().stats()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Next id, wrapping within the id field's range.
    fn take_id(&self) -> u32 {
        let mut next = self.next_id.lock();
        let id = *next;
        *next = if id >= self.layout.max_id() { 0 } else { id + 1 };
        id
    }
}

impl Node for Host {
    fn name(&self) -> &str {
        &self.name
    }

    fn poll(&self) -> usize {
        let Some(bytes) = self.in_intf.get() else {
            return 0;
        };

        if let Some(delivery) = self.handle_packet(&bytes) {
            // The receiver lives in `self`, so this cannot disconnect
            let _ = self.delivered_tx.send(delivery);
        }
        1
    }
}
