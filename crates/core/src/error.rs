//! Error types for the netfrag simulator.
//!
//! Every operation returns a structured error instead of panicking, so a
//! bad packet never takes down the thread that was handling it.

use thiserror::Error;

/// Top-level error type for all operations in the system.
///
/// Each variant corresponds to a specific failure domain:
/// - Packet: bytes that do not parse, or fields too wide to encode
/// - Queue: a full or disconnected interface queue
/// - Routing: no route for a destination
/// - Fragment: an MTU with no room left for payload
/// - Reassembly: fragments that conflict with what is already buffered
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed packet (decode failure or field overflow on encode)
    #[error("malformed packet: {0}")]
    Packet(#[from] PacketError),

    /// Interface queue error
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    /// Routing table lookup failed
    #[error("routing error: {0}")]
    Routing(#[from] RoutingError),

    /// Fragmentation could not proceed
    #[error("fragmentation error: {0}")]
    Fragment(#[from] FragmentError),

    /// Reassembly rejected a fragment
    #[error("reassembly error: {0}")]
    Reassembly(#[from] ReassemblyError),

    /// Invalid configuration value
    #[error("configuration error: {0}")]
    Config(String),

    /// Topology construction or thread management failed
    #[error("topology error: {0}")]
    Topology(String),
}

impl Error {
    /// True for a non-blocking put that found the queue full.
    pub fn is_queue_full(&self) -> bool {
        matches!(self, Error::Queue(QueueError::Full { .. }))
    }
}

/// Packet codec errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PacketError {
    /// Byte string is shorter than the fixed header
    #[error("packet too short: need at least {required} bytes, got {actual}")]
    TooShort { required: usize, actual: usize },

    /// A numeric header field contains something other than ASCII digits
    #[error("invalid {field} field: {raw:?}")]
    InvalidField { field: &'static str, raw: String },

    /// The more-fragments flag is not "0" or "1"
    #[error("invalid more-fragments flag: {0:#04x}")]
    InvalidFlag(u8),

    /// A value does not fit in its declared field width
    #[error("{field} value {value} does not fit in {width} digits")]
    FieldOverflow {
        field: &'static str,
        value: u64,
        width: usize,
    },
}

/// Interface queue errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    /// Non-blocking put on a full queue
    #[error("queue full (capacity {capacity})")]
    Full { capacity: usize },

    /// The other side of the queue is gone
    #[error("queue disconnected")]
    Disconnected,
}

/// Routing errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RoutingError {
    /// Destination address absent from the routing table
    #[error("no route to destination {destination}")]
    TableMiss { destination: u32 },

    /// Interface index outside the node's interface list
    #[error("interface {index} out of range ({count} interfaces)")]
    NoSuchInterface { index: usize, count: usize },
}

/// Fragmentation errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FragmentError {
    /// MTU leaves no room for payload after the header
    #[error("MTU {mtu} too small for header of {header_len} bytes")]
    MtuTooSmall { mtu: usize, header_len: usize },
}

/// Reassembly errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReassemblyError {
    /// Same fragment received twice
    #[error("duplicate fragment: id {id}, offset {offset}")]
    DuplicateFragment { id: u32, offset: usize },

    /// Fragment overlaps bytes already buffered, or disagrees on the end
    #[error("overlapping fragment: id {id}, offset {offset}, len {len}")]
    OverlappingFragment { id: u32, offset: usize, len: usize },

    /// Too many messages in flight
    #[error("reassembly window full: max {max} messages in flight")]
    WindowFull { max: usize },
}

/// Type alias for Result with our Error type
pub type Result<T> = std::result::Result<T, Error>;
