//! The network: every router and interface of a topology, wired together.
//!
//! Each node gets a router and a network interface joined by a pair of
//! links, and each topology edge becomes two links, one per direction.
//! [`Network::cycle`] then advances all components through one clock cycle
//! in a fixed global order:
//!
//! 1. every interface transmits pending flits,
//! 2. every router runs phase 1, then every router runs phase 2, and so on
//!    through phase 4,
//! 3. every interface handles arriving flits.
//!
//! Within a step components only touch their own state and their ends of
//! the links, so with the `parallel` feature each step is spread across the
//! rayon thread pool. The barrier between steps is what keeps the result
//! identical to a sequential run.

use std::collections::HashMap;

use crate::buffer::Buffer;
use crate::channel::{Connection, Endpoint, Link};
use crate::config::SimConfig;
use crate::error::{FlowControlError, SimResult, TopologyError};
use crate::interface::NetworkInterface;
use crate::packet::Packet;
use crate::port::{InputPort, OutputPort};
use crate::probe::Probe;
use crate::router::Router;
use crate::topology::Topology;
use crate::types::{Cycle, Priority};

/// Runs `f` on every item, stopping at the first error.
#[cfg(feature = "parallel")]
fn for_each_node<T, F>(items: &mut [T], f: F) -> Result<(), FlowControlError>
where
    T: Send,
    F: Fn(&mut T) -> Result<(), FlowControlError> + Send + Sync,
{
    use rayon::prelude::*;
    items.par_iter_mut().try_for_each(f)
}

/// Runs `f` on every item, stopping at the first error.
#[cfg(not(feature = "parallel"))]
fn for_each_node<T, F>(items: &mut [T], f: F) -> Result<(), FlowControlError>
where
    F: Fn(&mut T) -> Result<(), FlowControlError>,
{
    items.iter_mut().try_for_each(f)
}

/// All routers, interfaces and links of a simulated network.
#[derive(Debug)]
pub struct Network {
    routers: Vec<Router>,
    interfaces: Vec<NetworkInterface>,
    /// Node label -> index into `routers` and `interfaces`
    index: HashMap<String, usize>,
    links: Vec<Link>,
    max_priority: Priority,
    vc_capacity: usize,
}

impl Network {
    /// Builds the network for a topology.
    ///
    /// Input ports are registered on each router in a fixed order: the port
    /// from the local interface first, then one port per neighbour in edge
    /// order. That order is the arbitration order within a priority.
    pub fn new(topology: &Topology, config: &SimConfig) -> Result<Self, FlowControlError> {
        if config.flit_size == 0 || config.link_bandwidth == 0 || config.processing_delay == 0 {
            return Err(FlowControlError::InvalidParameter(
                "flit size, link bandwidth and processing delay must be at least 1".into(),
            ));
        }
        // Rejects an uneven split before any port is built.
        let vc_capacity = Buffer::new(config.buffer_size, config.max_priority)?.vc_capacity();
        if config.link_bandwidth > vc_capacity {
            return Err(FlowControlError::InvalidParameter(format!(
                "link bandwidth {} exceeds virtual channel capacity {}",
                config.link_bandwidth, vc_capacity
            )));
        }

        let mut links = Vec::new();
        let mut connect = |src: Endpoint, dst: Endpoint| -> Link {
            let link = Connection::new(
                src,
                dst,
                config.link_bandwidth,
                vc_capacity,
                config.max_priority,
            )
            .into_link();
            links.push(link.clone());
            link
        };
        let input = |link: Link| {
            InputPort::new(link, Buffer::new(config.buffer_size, config.max_priority)?)
        };

        let mut routers = Vec::with_capacity(topology.len());
        let mut interfaces = Vec::with_capacity(topology.len());
        let mut index = HashMap::with_capacity(topology.len());

        for node in topology.nodes() {
            let label = node.label.clone();
            let ni_to_router = connect(
                Endpoint::Interface(label.clone()),
                Endpoint::Router(label.clone()),
            );
            let router_to_ni = connect(
                Endpoint::Router(label.clone()),
                Endpoint::Interface(label.clone()),
            );

            let mut router = Router::new(
                node.clone(),
                config.max_priority,
                config.link_bandwidth,
                config.processing_delay,
            );
            router.add_input_port(input(ni_to_router.clone())?);
            router.add_output_port(OutputPort::new(router_to_ni.clone()));

            interfaces.push(NetworkInterface::new(
                node.clone(),
                config.flit_size,
                config.max_priority,
                OutputPort::new(ni_to_router),
                input(router_to_ni)?,
            ));
            index.insert(label, routers.len());
            routers.push(router);
        }

        for edge in topology.edges() {
            let (a, b) = (index[&edge.a], index[&edge.b]);
            for (src, dst) in [(a, b), (b, a)] {
                let link = connect(
                    Endpoint::Router(routers[src].label().to_string()),
                    Endpoint::Router(routers[dst].label().to_string()),
                );
                routers[dst].add_input_port(input(link.clone())?);
                routers[src].add_output_port(OutputPort::new(link));
            }
        }

        tracing::debug!(
            routers = routers.len(),
            links = links.len(),
            vc_capacity,
            "network built"
        );

        Ok(Self {
            routers,
            interfaces,
            index,
            links,
            max_priority: config.max_priority,
            vc_capacity,
        })
    }

    pub fn routers(&self) -> &[Router] {
        &self.routers
    }

    pub fn interfaces(&self) -> &[NetworkInterface] {
        &self.interfaces
    }

    pub fn links(&self) -> &[Link] {
        &self.links
    }

    /// Router of a node.
    pub fn router(&self, label: &str) -> Option<&Router> {
        self.index.get(label).map(|&i| &self.routers[i])
    }

    /// Network interface of a node.
    pub fn interface(&self, label: &str) -> Option<&NetworkInterface> {
        self.index.get(label).map(|&i| &self.interfaces[i])
    }

    /// Hands a packet to the interface of its source node.
    pub fn inject(&mut self, packet: &Packet) -> SimResult<()> {
        let source = packet.source().ok_or(TopologyError::EmptyRoute)?;
        let &i = self
            .index
            .get(&source.label)
            .ok_or_else(|| TopologyError::UnknownNode(source.label.clone()))?;
        self.interfaces[i].route_packet(packet)?;
        Ok(())
    }

    /// Advances every component by one cycle.
    pub fn cycle(&mut self, cycle: Cycle, probe: &dyn Probe) -> Result<(), FlowControlError> {
        for_each_node(&mut self.interfaces, |ni| {
            ni.transmit_pending_packets(cycle, probe)
        })?;

        for_each_node(&mut self.routers, |r| {
            r.update_output_map();
            Ok(())
        })?;
        for_each_node(&mut self.routers, |r| {
            r.update_output_ports_credit();
            Ok(())
        })?;
        for_each_node(&mut self.routers, |r| r.route_buffered_flits(cycle, probe))?;
        for_each_node(&mut self.routers, |r| r.read_from_input_ports())?;

        for_each_node(&mut self.interfaces, |ni| {
            ni.handle_arriving_flits(cycle, probe)
        })
    }

    /// Takes the packets completed at every interface, in node order.
    pub fn pop_arrived_packets(&mut self) -> Vec<Packet> {
        self.interfaces
            .iter_mut()
            .flat_map(|ni| ni.pop_arrived_packets())
            .collect()
    }

    /// Flits anywhere in the network: queued for injection, on a link or in
    /// a buffer.
    pub fn flits_in_network(&self) -> usize {
        let queued: usize = self.interfaces.iter().map(|ni| ni.pending_flits()).sum();
        let buffered: usize = self
            .routers
            .iter()
            .map(Router::buffered_flits)
            .chain(self.interfaces.iter().map(|ni| ni.input().buffer().total_len()))
            .sum();
        let on_links: usize = self.links.iter().map(|l| l.lock().len()).sum();
        queued + buffered + on_links
    }

    /// Checks credit conservation on every link and priority.
    ///
    /// Credits held by the sender, credits on their way back, flits on the
    /// link and flits in the receiver's buffer must always add up to the
    /// virtual channel capacity.
    pub fn audit_credits(&self) -> Result<(), FlowControlError> {
        let mut senders: HashMap<(Endpoint, Endpoint), &OutputPort> = HashMap::new();
        let mut receivers: HashMap<(Endpoint, Endpoint), &InputPort> = HashMap::new();

        let outputs = self
            .routers
            .iter()
            .flat_map(Router::outputs)
            .chain(self.interfaces.iter().map(NetworkInterface::output));
        for port in outputs {
            let conn = port.link().lock();
            senders.insert((conn.src().clone(), conn.dst().clone()), port);
        }
        let inputs = self
            .routers
            .iter()
            .flat_map(Router::inputs)
            .chain(self.interfaces.iter().map(NetworkInterface::input));
        for port in inputs {
            let conn = port.link().lock();
            receivers.insert((conn.src().clone(), conn.dst().clone()), port);
        }

        for link in &self.links {
            let conn = link.lock();
            let key = (conn.src().clone(), conn.dst().clone());
            for priority in 1..=self.max_priority {
                let held = senders.get(&key).map_or(0, |p| p.credit(priority));
                let buffered = receivers
                    .get(&key)
                    .map_or(0, |p| p.buffer().len(priority));
                let accounted = held
                    + conn.pending_credits(priority)
                    + conn.flits_in_flight(priority)
                    + buffered;
                if accounted != self.vc_capacity {
                    return Err(FlowControlError::CreditLeak {
                        src: key.0.clone(),
                        dst: key.1.clone(),
                        priority,
                        accounted,
                        capacity: self.vc_capacity,
                    });
                }
            }
        }
        Ok(())
    }

    /// Exports router, interface and link counters as JSON.
    pub fn export_stats(&self) -> serde_json::Value {
        let routers: serde_json::Map<String, serde_json::Value> = self
            .routers
            .iter()
            .map(|r| (r.label().to_string(), r.export_stats()))
            .collect();
        let interfaces: serde_json::Map<String, serde_json::Value> = self
            .interfaces
            .iter()
            .map(|ni| (ni.label().to_string(), ni.export_stats()))
            .collect();
        let links: Vec<serde_json::Value> =
            self.links.iter().map(|l| l.lock().export_stats()).collect();

        serde_json::json!({
            "network": {
                "nodes": self.routers.len(),
                "links": self.links.len(),
                "max_priority": self.max_priority,
                "vc_capacity": self.vc_capacity,
                "flits_in_network": self.flits_in_network(),
            },
            "routers": routers,
            "interfaces": interfaces,
            "links": links,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::PacketId;
    use crate::probe::NullProbe;
    use crate::topology::NodeId;

    fn config() -> SimConfig {
        SimConfig {
            max_priority: 1,
            buffer_size: 2,
            flit_size: 1,
            link_bandwidth: 1,
            processing_delay: 3,
            ..SimConfig::default()
        }
    }

    #[test]
    fn test_wiring() {
        let network = Network::new(&Topology::mesh(2, 2), &config()).unwrap();
        // 2 local links per node + 2 per edge.
        assert_eq!(network.links().len(), 2 * 4 + 2 * 4);

        let n0 = network.router("n0").unwrap();
        assert_eq!(n0.inputs().len(), 3);
        assert_eq!(n0.outputs().len(), 3);
        assert_eq!(n0.inputs()[0].src(), Endpoint::Interface("n0".into()));
        assert_eq!(n0.inputs()[1].src(), Endpoint::Router("n1".into()));
        assert_eq!(n0.inputs()[2].src(), Endpoint::Router("n2".into()));
        assert!(network.interface("n3").is_some());
        network.audit_credits().unwrap();
    }

    #[test]
    fn test_rejects_bad_parameters() {
        let uneven = SimConfig {
            buffer_size: 3,
            max_priority: 2,
            ..config()
        };
        assert!(Network::new(&Topology::line(2), &uneven).is_err());

        let too_wide = SimConfig {
            link_bandwidth: 3,
            ..config()
        };
        assert!(Network::new(&Topology::line(2), &too_wide).is_err());
    }

    #[test]
    fn test_single_packet_crosses_line() {
        let topology = Topology::line(3);
        let mut network = Network::new(&topology, &config()).unwrap();
        let route = topology.route_from_labels(&["n0", "n1", "n2"]).unwrap();
        let packet = Packet {
            id: PacketId::new("t0", 0),
            priority: 1,
            deadline: 50,
            route: route.into(),
            body_size: 2,
        };
        network.inject(&packet).unwrap();
        assert_eq!(network.flits_in_network(), 4);

        let mut arrived = Vec::new();
        for cycle in 0..20 {
            network.cycle(cycle, &NullProbe).unwrap();
            network.audit_credits().unwrap();
            for p in network.pop_arrived_packets() {
                arrived.push((cycle, p));
            }
        }

        assert_eq!(arrived.len(), 1);
        assert_eq!(arrived[0].0, 12);
        assert_eq!(arrived[0].1, packet);
        assert_eq!(network.flits_in_network(), 0);

        let stats = network.export_stats();
        assert_eq!(stats["routers"]["n1"]["flits_forwarded"], 4);
        assert_eq!(stats["routers"]["n1"]["headers_routed"], 1);
        assert_eq!(stats["interfaces"]["n2"]["packets_received"], 1);
    }

    #[test]
    fn test_inject_unknown_source() {
        let mut network = Network::new(&Topology::line(2), &config()).unwrap();
        let packet = Packet {
            id: PacketId::new("t0", 0),
            priority: 1,
            deadline: 10,
            route: vec![NodeId::new("zz", 9, 9)].into(),
            body_size: 0,
        };
        assert!(network.inject(&packet).is_err());
    }
}
