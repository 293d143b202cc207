//! Queue interfaces: one side of a simulated link.
//!
//! An interface is a FIFO of encoded packets. The node that owns it and the
//! link layer share it through an `Arc`; the channel underneath makes every
//! put and get atomic with respect to the others.
//!
//! Capacity 0 means unbounded. The MTU is written once when a link is
//! attached and read on every send.

use crate::error::QueueError;
use crossbeam_channel::{
    Receiver, RecvTimeoutError, SendTimeoutError, Sender, TryRecvError, TrySendError,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// A bounded (or unbounded) FIFO slot with an MTU.
#[derive(Debug)]
pub struct Interface {
    tx: Sender<Vec<u8>>,
    rx: Receiver<Vec<u8>>,
    capacity: usize,
    mtu: AtomicUsize,
}

impl Interface {
    /// Create an interface with MTU 0; a link sets the real value.
    pub fn new(capacity: usize) -> Self {
        Self::with_mtu(capacity, 0)
    }

    pub fn with_mtu(capacity: usize, mtu: usize) -> Self {
        let (tx, rx) = if capacity == 0 {
            crossbeam_channel::unbounded()
        } else {
            crossbeam_channel::bounded(capacity)
        };

        Self {
            tx,
            rx,
            capacity,
            mtu: AtomicUsize::new(mtu),
        }
    }

    /// Take the next packet, or `None` if the queue is empty. Never blocks.
    pub fn get(&self) -> Option<Vec<u8>> {
        match self.rx.try_recv() {
            Ok(pkt) => Some(pkt),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Wait up to `timeout` for the next packet.
    pub fn get_timeout(&self, timeout: Duration) -> Option<Vec<u8>> {
        match self.rx.recv_timeout(timeout) {
            Ok(pkt) => Some(pkt),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Enqueue a packet.
    ///
    /// With `block = false` a full queue fails immediately with
    /// `QueueError::Full` and the queue is left as it was; the caller decides
    /// whether to drop. With `block = true` the call waits for room.
    pub fn put(&self, pkt: Vec<u8>, block: bool) -> Result<(), QueueError> {
        if block {
            return self.tx.send(pkt).map_err(|_| QueueError::Disconnected);
        }

        match self.tx.try_send(pkt) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(QueueError::Full {
                capacity: self.capacity,
            }),
            Err(TrySendError::Disconnected(_)) => Err(QueueError::Disconnected),
        }
    }

    /// Enqueue, waiting at most `timeout` for room.
    pub fn put_timeout(&self, pkt: Vec<u8>, timeout: Duration) -> Result<(), QueueError> {
        self.tx.send_timeout(pkt, timeout).map_err(|e| match e {
            SendTimeoutError::Timeout(_) => QueueError::Full {
                capacity: self.capacity,
            },
            SendTimeoutError::Disconnected(_) => QueueError::Disconnected,
        })
    }

    pub fn mtu(&self) -> usize {
        self.mtu.load(Ordering::Acquire)
    }

    pub fn set_mtu(&self, mtu: usize) {
        self.mtu.store(mtu, Ordering::Release);
    }

    /// Configured capacity (0 = unbounded).
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Packets currently queued.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// True if a non-blocking put would fail right now.
    pub fn is_full(&self) -> bool {
        self.capacity > 0 && self.rx.len() >= self.capacity
    }
}
