//! Building and running a whole network.
//!
//! [`NetworkBuilder`] collects hosts, routers and links, then builds a
//! [`Network`]: every node plus one [`LinkLayer`] carrying all the links.
//! `start` gives each of them its own thread; `shutdown` raises the shared
//! stop signal and joins them.
//!
//! ```no_run
//! use netfrag_core::packet::HeaderLayout;
//! use netfrag_core::router::RoutingTable;
//! use netfrag_core::topology::{NetworkBuilder, NodeRef};
//!
//! let mut network = NetworkBuilder::new(HeaderLayout::default())
//!     .host(1)
//!     .host(2)
//!     .router("A", 1, 0, RoutingTable::new().with_route(2, 0))
//!     .link(NodeRef::Host(1), 0, NodeRef::router("A"), 0, 50)
//!     .link(NodeRef::router("A"), 0, NodeRef::Host(2), 0, 50)
//!     .build()
//!     .unwrap();
//!
//! network.start().unwrap();
//! network.host(1).unwrap().send(2, b"hello").unwrap();
//! network.shutdown();
//! ```

use crate::error::{Error, Result, RoutingError};
use crate::host::Host;
use crate::interface::Interface;
use crate::link::{Link, LinkConfig, LinkLayer, LinkStats};
use crate::metrics::MetricsSnapshot;
use crate::node::{self, Node, StopSignal};
use crate::packet::HeaderLayout;
use crate::router::{Router, RoutingTable};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{error, info};

/// Names one endpoint of a link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeRef {
    Host(u32),
    Router(String),
}

impl NodeRef {
    pub fn router(name: &str) -> Self {
        NodeRef::Router(name.to_string())
    }
}

impl fmt::Display for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeRef::Host(addr) => write!(f, "Host_{addr}"),
            NodeRef::Router(name) => write!(f, "Router_{name}"),
        }
    }
}

#[derive(Debug)]
struct RouterDef {
    name: String,
    intf_count: usize,
    queue_capacity: usize,
    table: RoutingTable,
}

#[derive(Debug)]
struct LinkDef {
    from: NodeRef,
    from_intf: usize,
    to: NodeRef,
    to_intf: usize,
    mtu: usize,
}

/// Collects the topology of a network before anything is created.
#[derive(Debug)]
pub struct NetworkBuilder {
    layout: HeaderLayout,
    link_config: LinkConfig,
    hosts: Vec<(u32, u32)>,
    routers: Vec<RouterDef>,
    links: Vec<LinkDef>,
}

impl NetworkBuilder {
    pub fn new(layout: HeaderLayout) -> Self {
        Self {
            layout,
            link_config: LinkConfig::default(),
            hosts: Vec::new(),
            routers: Vec::new(),
            links: Vec::new(),
        }
    }

    pub fn link_config(mut self, config: LinkConfig) -> Self {
        self.link_config = config;
        self
    }

    /// Add a host whose message ids start at 0.
    pub fn host(self, addr: u32) -> Self {
        self.host_with_first_id(addr, 0)
    }

    pub fn host_with_first_id(mut self, addr: u32, first_id: u32) -> Self {
        self.hosts.push((addr, first_id));
        self
    }

    /// Add a router. `queue_capacity` 0 means unbounded queues.
    pub fn router(
        mut self,
        name: &str,
        intf_count: usize,
        queue_capacity: usize,
        table: RoutingTable,
    ) -> Self {
        self.routers.push(RouterDef {
            name: name.to_string(),
            intf_count,
            queue_capacity,
            table,
        });
        self
    }

    /// Connect outbound interface `from_intf` of `from` to inbound
    /// interface `to_intf` of `to`.
    pub fn link(
        mut self,
        from: NodeRef,
        from_intf: usize,
        to: NodeRef,
        to_intf: usize,
        mtu: usize,
    ) -> Self {
        self.links.push(LinkDef {
            from,
            from_intf,
            to,
            to_intf,
            mtu,
        });
        self
    }

    /// Create every node and link.
    ///
    /// # Errors
    /// `Error::Topology` for duplicate names, links to unknown nodes or
    /// interfaces, and invalid routing tables.
    pub fn build(self) -> Result<Network> {
        let mut hosts = BTreeMap::new();
        for (addr, first_id) in self.hosts {
            if addr > self.layout.max_destination() {
                return Err(Error::Topology(format!(
                    "host address {addr} does not fit the destination field"
                )));
            }
            let host = Host::with_first_id(addr, self.layout, first_id);
            if hosts.insert(addr, Arc::new(host)).is_some() {
                return Err(Error::Topology(format!("duplicate host {addr}")));
            }
        }

        let mut routers = BTreeMap::new();
        for def in self.routers {
            let router = Router::new(
                &def.name,
                def.intf_count,
                def.queue_capacity,
                def.table,
                self.layout,
            )?;
            if routers.insert(def.name.clone(), Arc::new(router)).is_some() {
                return Err(Error::Topology(format!("duplicate router {}", def.name)));
            }
        }

        let network = Network {
            hosts,
            routers,
            links: Arc::new(LinkLayer::new(self.link_config)),
            stop: StopSignal::new(),
            threads: Vec::new(),
        };

        for def in self.links {
            let from = network.interface(&def.from, def.from_intf, Direction::Out)?;
            let to = network.interface(&def.to, def.to_intf, Direction::In)?;
            let name = format!(
                "{}[{}]->{}[{}]",
                def.from, def.from_intf, def.to, def.to_intf
            );
            network.links.add_link(Link::new(name, from, to, def.mtu));
        }

        Ok(network)
    }
}

#[derive(Debug, Clone, Copy)]
enum Direction {
    In,
    Out,
}

/// A built network: nodes, links, and the threads running them.
#[derive(Debug)]
pub struct Network {
    hosts: BTreeMap<u32, Arc<Host>>,
    routers: BTreeMap<String, Arc<Router>>,
    links: Arc<LinkLayer>,
    stop: StopSignal,
    threads: Vec<JoinHandle<()>>,
}

impl Network {
    /// Spawn one thread per host, per router, and one for the link layer.
    pub fn start(&mut self) -> Result<()> {
        if !self.threads.is_empty() {
            return Err(Error::Topology("network already started".to_string()));
        }
        if self.stop.is_stopped() {
            return Err(Error::Topology("network was shut down".to_string()));
        }

        let nodes: Vec<Arc<dyn Node>> = self
            .hosts
            .values()
            .map(|h| Arc::clone(h) as Arc<dyn Node>)
            .chain(self.routers.values().map(|r| Arc::clone(r) as Arc<dyn Node>))
            .chain(std::iter::once(Arc::clone(&self.links) as Arc<dyn Node>))
            .collect();

        for node in nodes {
            let handle = node::spawn(node, self.stop.clone())
                .map_err(|e| Error::Topology(format!("failed to spawn thread: {e}")))?;
            self.threads.push(handle);
        }

        info!(threads = self.threads.len(), "network started");
        Ok(())
    }

    /// Signal every thread to stop and wait for all of them.
    pub fn shutdown(&mut self) {
        self.stop.stop();

        for handle in self.threads.drain(..) {
            let name = handle.thread().name().unwrap_or("<unnamed>").to_string();
            if handle.join().is_err() {
                error!(thread = %name, "thread panicked");
            }
        }

        info!("all simulation threads joined");
    }

    pub fn is_running(&self) -> bool {
        !self.threads.is_empty()
    }

    pub fn host(&self, addr: u32) -> Option<&Arc<Host>> {
        self.hosts.get(&addr)
    }

    pub fn router(&self, name: &str) -> Option<&Arc<Router>> {
        self.routers.get(name)
    }

    pub fn hosts(&self) -> impl Iterator<Item = &Arc<Host>> {
        self.hosts.values()
    }

    pub fn routers(&self) -> impl Iterator<Item = &Arc<Router>> {
        self.routers.values()
    }

    pub fn link_layer(&self) -> &Arc<LinkLayer> {
        &self.links
    }

    /// Counters summed over every host and router.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.hosts
            .values()
            .map(|h| h.metrics())
            .chain(self.routers.values().map(|r| r.metrics()))
            .fold(MetricsSnapshot::default(), |acc, m| acc.merge(&m))
    }

    pub fn link_stats(&self) -> LinkStats {
        self.links.stats()
    }

    fn interface(&self, node: &NodeRef, index: usize, dir: Direction) -> Result<Arc<Interface>> {
        let intfs: Vec<&Arc<Interface>> = match node {
            NodeRef::Host(addr) => {
                let host = self
                    .hosts
                    .get(addr)
                    .ok_or_else(|| Error::Topology(format!("unknown host {addr}")))?;
                match dir {
                    Direction::In => vec![host.in_intf()],
                    Direction::Out => vec![host.out_intf()],
                }
            }
            NodeRef::Router(name) => {
                let router = self
                    .routers
                    .get(name)
                    .ok_or_else(|| Error::Topology(format!("unknown router {name}")))?;
                match dir {
                    Direction::In => router.in_intfs().iter().collect(),
                    Direction::Out => router.out_intfs().iter().collect(),
                }
            }
        };

        intfs.get(index).map(|&i| Arc::clone(i)).ok_or_else(|| {
            let e = RoutingError::NoSuchInterface {
                index,
                count: intfs.len(),
            };
            Error::Topology(format!("{node}: {e}"))
        })
    }
}

impl Drop for Network {
    fn drop(&mut self) {
        if self.is_running() {
            self.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_hosts_one_router() -> NetworkBuilder {
        NetworkBuilder::new(HeaderLayout::default())
            .host(1)
            .host(2)
            .router("A", 1, 0, RoutingTable::new().with_route(2, 0))
            .link(NodeRef::Host(1), 0, NodeRef::router("A"), 0, 50)
            .link(NodeRef::router("A"), 0, NodeRef::Host(2), 0, 30)
    }

    #[test]
    fn test_build_sets_mtus() {
        let network = two_hosts_one_router().build().unwrap();

        assert_eq!(network.host(1).unwrap().out_intf().mtu(), 50);
        assert_eq!(network.router("A").unwrap().in_intfs()[0].mtu(), 50);
        assert_eq!(network.router("A").unwrap().out_intfs()[0].mtu(), 30);
        assert_eq!(network.host(2).unwrap().in_intf().mtu(), 30);
        assert_eq!(network.link_layer().link_count(), 2);
    }

    #[test]
    fn test_unknown_endpoint() {
        let result = two_hosts_one_router()
            .link(NodeRef::Host(9), 0, NodeRef::router("A"), 0, 50)
            .build();
        assert!(matches!(result, Err(Error::Topology(_))));

        let result = two_hosts_one_router()
            .link(NodeRef::Host(1), 0, NodeRef::router("A"), 3, 50)
            .build();
        assert!(matches!(result, Err(Error::Topology(_))));
    }

    #[test]
    fn test_duplicate_nodes() {
        assert!(two_hosts_one_router().host(1).build().is_err());
        assert!(two_hosts_one_router()
            .router("A", 1, 0, RoutingTable::new())
            .build()
            .is_err());
    }

    #[test]
    fn test_start_and_shutdown() {
        let mut network = two_hosts_one_router().build().unwrap();
        network.start().unwrap();
        assert!(network.is_running());
        assert!(network.start().is_err());

        network.shutdown();
        assert!(!network.is_running());
        assert!(network.start().is_err());
    }
}
