//! netfrag-core: a threaded simulator of IP-style fragmentation and routing
//!
//! This library provides the core components of a small internetwork where:
//! - Hosts split messages into MTU-sized packets and reassemble them by offset
//! - Routers forward packets by a static table, re-fragmenting for smaller MTUs
//! - Bounded queues stand in for the interfaces at each end of a link
//! - A link layer carries packets between nodes with optional latency and loss
//!
//! # Architecture
//!
//! The system is designed around clear module boundaries:
//! - `packet`: Header layout and the ASCII wire format
//! - `interface`: Bounded FIFO queues with an MTU
//! - `fragment`: Splitting messages and packets to fit an MTU
//! - `reassembly`: Offset-aware reassembly of fragments
//! - `host`: End hosts (send and receive)
//! - `router`: Table-driven forwarding with re-fragmentation
//! - `link`: Links between interfaces and the thread that drives them
//! - `node`: The poll loop every simulated thread runs
//! - `topology`: Building, starting and stopping a network
//! - `metrics`: Observable system behavior
//!
//! # Design Principles
//!
//! - **No panics**: Malformed input, full queues and routing misses are
//!   counted and logged; no worker thread stops because of them
//! - **Bounded memory**: Router queues can be bounded; a full queue drops
//! - **Deterministic**: Seeded randomness makes lossy runs reproducible
//! - **Observable**: Per-node counters and structured logging

pub mod error;
pub mod fragment;
pub mod host;
pub mod interface;
pub mod link;
pub mod metrics;
pub mod node;
pub mod packet;
pub mod reassembly;
pub mod router;
pub mod topology;

// Re-export commonly used types
pub use error::{Error, Result};
pub use host::{Delivery, Host};
pub use packet::{HeaderLayout, Packet};
pub use router::{Router, RoutingTable};
pub use topology::{Network, NetworkBuilder, NodeRef};
