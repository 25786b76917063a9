//! Wormhole router with credit-based flow control and strict-priority
//! arbitration.
//!
//! A router owns one input port per incoming link and one output port per
//! outgoing link. Every cycle the network drives it through four phases, in
//! this order, with a global barrier between phases:
//!
//! 1. [`Router::update_output_map`] builds the next-hop lookup once.
//! 2. [`Router::update_output_ports_credit`] collects returned credits.
//! 3. [`Router::route_buffered_flits`] arbitrates and forwards flits.
//! 4. [`Router::read_from_input_ports`] moves arrived flits into buffers.
//!
//! Flits read in phase 4 only become visible to arbitration in the next
//! cycle, which gives every hop a latency of at least one cycle.
//!
//! # Header processing
//!
//! A header flit at the head of its virtual channel is counted once per
//! cycle. When its count reaches the processing delay the router looks
//! itself up in the route carried by the header, picks the output port
//! towards the next node (or towards the local interface on the last hop),
//! caches that choice for the packet and tries to forward the header in the
//! same step. Body and tail flits reuse the cached output. The tail clears
//! the cache.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::channel::Endpoint;
use crate::error::FlowControlError;
use crate::packet::{Flit, FlitKind, PacketId};
use crate::port::{InputPort, OutputPort};
use crate::probe::{Probe, SimEvent};
use crate::topology::NodeId;
use crate::types::{Cycle, Priority};

/// Counters kept by a router.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterStats {
    /// Flits sent to an output port
    pub flits_forwarded: u64,
    /// Headers whose route was resolved
    pub headers_routed: u64,
    /// Forwarding attempts refused for lack of credit or bandwidth
    pub stalled_attempts: u64,
    /// Flits read from input links
    pub flits_received: u64,
}

/// Router of a single node.
#[derive(Debug)]
pub struct Router {
    node: NodeId,
    max_priority: Priority,
    link_bandwidth: usize,
    processing_delay: u64,
    /// Input ports in registration order
    inputs: Vec<InputPort>,
    /// Output ports in registration order
    outputs: Vec<OutputPort>,
    /// Next hop -> index into `outputs`
    output_map: HashMap<Endpoint, usize>,
    output_map_ready: bool,
    /// Output chosen for each packet whose header has been processed
    next_hops: HashMap<PacketId, usize>,
    /// Processing cycles spent so far by each waiting header
    header_counters: HashMap<PacketId, u64>,
    /// Headers already counted in the current cycle
    processed: HashSet<PacketId>,
    stats: RouterStats,
}

impl Router {
    /// Creates a router with no ports.
    pub fn new(
        node: NodeId,
        max_priority: Priority,
        link_bandwidth: usize,
        processing_delay: u64,
    ) -> Self {
        Self {
            node,
            max_priority,
            link_bandwidth,
            processing_delay,
            inputs: Vec::new(),
            outputs: Vec::new(),
            output_map: HashMap::new(),
            output_map_ready: false,
            next_hops: HashMap::new(),
            header_counters: HashMap::new(),
            processed: HashSet::new(),
            stats: RouterStats::default(),
        }
    }

    /// Registers an input port. Registration order is arbitration order.
    pub fn add_input_port(&mut self, port: InputPort) {
        self.inputs.push(port);
    }

    /// Registers an output port.
    pub fn add_output_port(&mut self, port: OutputPort) {
        self.outputs.push(port);
        self.output_map_ready = false;
    }

    pub fn node(&self) -> &NodeId {
        &self.node
    }

    pub fn label(&self) -> &str {
        &self.node.label
    }

    pub fn inputs(&self) -> &[InputPort] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[OutputPort] {
        &self.outputs
    }

    pub fn stats(&self) -> &RouterStats {
        &self.stats
    }

    /// Number of flits held in this router's input buffers.
    pub fn buffered_flits(&self) -> usize {
        self.inputs.iter().map(|p| p.buffer().total_len()).sum()
    }

    /// Number of packets currently holding a resolved next hop.
    pub fn packets_in_flight(&self) -> usize {
        self.next_hops.len()
    }

    /// Phase 1: builds the next-hop lookup from the destinations of the
    /// output ports. Does nothing once built.
    pub fn update_output_map(&mut self) {
        if self.output_map_ready {
            return;
        }
        self.output_map = self
            .outputs
            .iter()
            .enumerate()
            .map(|(index, port)| (port.dst(), index))
            .collect();
        self.output_map_ready = true;
    }

    /// Phase 2: collects credits returned on every output link.
    pub fn update_output_ports_credit(&mut self) {
        for port in &mut self.outputs {
            port.update_credits();
        }
    }

    /// Phase 3: strict-priority arbitration over the input buffers.
    ///
    /// Priorities are served from 1 upwards. Each priority gets
    /// `link_bandwidth` rounds, and each round visits every input port once
    /// in registration order.
    pub fn route_buffered_flits(
        &mut self,
        cycle: Cycle,
        probe: &dyn Probe,
    ) -> Result<(), FlowControlError> {
        self.processed.clear();
        for priority in 1..=self.max_priority {
            for _ in 0..self.link_bandwidth {
                for input in 0..self.inputs.len() {
                    self.arbitrate(input, priority, cycle, probe)?;
                }
            }
        }
        Ok(())
    }

    /// Phase 4: reads every input link into its buffer.
    pub fn read_from_input_ports(&mut self) -> Result<(), FlowControlError> {
        for port in &mut self.inputs {
            self.stats.flits_received += port.read_into_buffer()? as u64;
        }
        Ok(())
    }

    fn arbitrate(
        &mut self,
        input: usize,
        priority: Priority,
        cycle: Cycle,
        probe: &dyn Probe,
    ) -> Result<(), FlowControlError> {
        let (packet, kind, route) = match self.inputs[input].peek(priority) {
            None => return Ok(()),
            Some(Flit::Header { packet, route, .. }) => {
                (packet.clone(), FlitKind::Header, Some(Arc::clone(route)))
            }
            Some(flit) => (flit.packet().clone(), flit.kind(), None),
        };

        let output = match (self.next_hops.get(&packet), route) {
            (Some(&output), _) => output,
            (None, Some(route)) => {
                if !self.processed.insert(packet.clone()) {
                    return Ok(());
                }
                let count = self.header_counters.entry(packet.clone()).or_insert(0);
                *count += 1;
                if *count < self.processing_delay {
                    return Ok(());
                }
                self.header_counters.remove(&packet);

                let output = self.resolve(&route, &packet)?;
                self.next_hops.insert(packet.clone(), output);
                self.stats.headers_routed += 1;
                probe.emit(&SimEvent::HeaderRouted {
                    cycle,
                    router: self.node.label.clone(),
                    packet: packet.clone(),
                    next_hop: self.outputs[output].dst(),
                });
                output
            }
            (None, None) => {
                return Err(FlowControlError::MisorderedPacket {
                    router: self.node.label.clone(),
                    packet,
                    kind,
                });
            }
        };

        if !self.outputs[output].allowed_to_send(priority) {
            self.stats.stalled_attempts += 1;
            probe.emit(&SimEvent::FlitStalled {
                cycle,
                router: self.node.label.clone(),
                packet,
                kind,
            });
            return Ok(());
        }

        let Some(flit) = self.inputs[input].read_out_of_buffer(priority)? else {
            return Ok(());
        };
        self.outputs[output].send_flit(flit)?;
        self.stats.flits_forwarded += 1;
        probe.emit(&SimEvent::FlitForwarded {
            cycle,
            router: self.node.label.clone(),
            packet: packet.clone(),
            kind,
            next_hop: self.outputs[output].dst(),
        });

        if kind == FlitKind::Tail {
            self.next_hops.remove(&packet);
        }
        Ok(())
    }

    /// Picks the output port for a packet from the route in its header.
    fn resolve(&self, route: &[NodeId], packet: &PacketId) -> Result<usize, FlowControlError> {
        let position = route
            .iter()
            .position(|node| node.label == self.node.label)
            .ok_or_else(|| FlowControlError::NotOnRoute {
                router: self.node.label.clone(),
                packet: packet.clone(),
            })?;

        let next_hop = match route.get(position + 1) {
            Some(next) => Endpoint::Router(next.label.clone()),
            None => Endpoint::Interface(self.node.label.clone()),
        };

        self.output_map
            .get(&next_hop)
            .copied()
            .ok_or_else(|| FlowControlError::NoPort {
                router: self.node.label.clone(),
                next_hop,
            })
    }

    /// Exports router counters as JSON.
    pub fn export_stats(&self) -> serde_json::Value {
        serde_json::json!({
            "node": self.node.label,
            "input_ports": self.inputs.len(),
            "output_ports": self.outputs.len(),
            "buffered_flits": self.buffered_flits(),
            "flits_forwarded": self.stats.flits_forwarded,
            "headers_routed": self.stats.headers_routed,
            "stalled_attempts": self.stats.stalled_attempts,
            "flits_received": self.stats.flits_received,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::Buffer;
    use crate::channel::{Connection, Link};
    use crate::packet::Packet;
    use crate::probe::{NullProbe, RecordingProbe};

    /// A single router `n1` with one upstream link from router `n0` and
    /// outputs towards router `n2` and the local interface.
    struct Bench {
        router: Router,
        upstream: OutputPort,
        to_n2: Link,
        to_ni: Link,
    }

    fn link(src: Endpoint, dst: Endpoint, bandwidth: usize, vc_capacity: usize) -> Link {
        Connection::new(src, dst, bandwidth, vc_capacity, 1).into_link()
    }

    fn bench(processing_delay: u64, downstream_credits: usize) -> Bench {
        bench_with_bandwidth(processing_delay, downstream_credits, 1)
    }

    fn bench_with_bandwidth(
        processing_delay: u64,
        downstream_credits: usize,
        bandwidth: usize,
    ) -> Bench {
        let mut router = Router::new(NodeId::new("n1", 1, 0), 1, bandwidth, processing_delay);

        let from_n0 = link(
            Endpoint::Router("n0".into()),
            Endpoint::Router("n1".into()),
            bandwidth,
            2,
        );
        router.add_input_port(InputPort::new(from_n0.clone(), Buffer::new(2, 1).unwrap()).unwrap());
        let mut upstream = OutputPort::new(from_n0);
        upstream.update_credits();

        let to_n2 = link(
            Endpoint::Router("n1".into()),
            Endpoint::Router("n2".into()),
            bandwidth,
            2,
        );
        let to_ni = link(
            Endpoint::Router("n1".into()),
            Endpoint::Interface("n1".into()),
            bandwidth,
            2,
        );
        to_n2.lock().return_credits(1, downstream_credits).unwrap();
        to_ni.lock().return_credits(1, 2).unwrap();
        router.add_output_port(OutputPort::new(to_n2.clone()));
        router.add_output_port(OutputPort::new(to_ni.clone()));

        Bench {
            router,
            upstream,
            to_n2,
            to_ni,
        }
    }

    fn packet(route: &[&str]) -> Packet {
        Packet {
            id: PacketId::new("t0", 0),
            priority: 1,
            deadline: 100,
            route: route
                .iter()
                .enumerate()
                .map(|(i, l)| NodeId::new(*l, i as i64, 0))
                .collect::<Vec<_>>()
                .into(),
            body_size: 0,
        }
    }

    fn step(bench: &mut Bench, cycle: Cycle, probe: &dyn Probe) {
        bench.router.update_output_map();
        bench.router.update_output_ports_credit();
        bench.router.route_buffered_flits(cycle, probe).unwrap();
        bench.router.read_from_input_ports().unwrap();
    }

    #[test]
    fn test_header_waits_processing_delay() {
        let mut bench = bench(3, 2);
        let flits = packet(&["n0", "n1", "n2"]).flits(1);
        bench.upstream.send_flit(flits[0].clone()).unwrap();

        let probe = RecordingProbe::new();
        step(&mut bench, 0, &probe);
        step(&mut bench, 1, &probe);
        step(&mut bench, 2, &probe);
        assert!(bench.to_n2.lock().is_empty());

        step(&mut bench, 3, &probe);
        assert_eq!(bench.to_n2.lock().len(), 1);
        assert_eq!(bench.router.stats().headers_routed, 1);
        assert_eq!(
            probe.count(|e| matches!(e, SimEvent::HeaderRouted { cycle: 3, .. })),
            1
        );
    }

    #[test]
    fn test_last_hop_targets_interface() {
        let mut bench = bench(1, 2);
        let flits = packet(&["n0", "n1"]).flits(1);
        bench.upstream.send_flit(flits[0].clone()).unwrap();

        step(&mut bench, 0, &NullProbe);
        step(&mut bench, 1, &NullProbe);
        assert_eq!(bench.to_ni.lock().len(), 1);
        assert!(bench.to_n2.lock().is_empty());
    }

    #[test]
    fn test_stalls_without_credit_and_keeps_flit() {
        let mut bench = bench(1, 0);
        let flits = packet(&["n0", "n1", "n2"]).flits(1);
        bench.upstream.send_flit(flits[0].clone()).unwrap();

        step(&mut bench, 0, &NullProbe);
        step(&mut bench, 1, &NullProbe);
        step(&mut bench, 2, &NullProbe);
        assert!(bench.to_n2.lock().is_empty());
        assert_eq!(bench.router.buffered_flits(), 1);
        assert_eq!(bench.router.stats().stalled_attempts, 2);

        bench.to_n2.lock().return_credit(1).unwrap();
        step(&mut bench, 3, &NullProbe);
        assert_eq!(bench.to_n2.lock().len(), 1);
        assert_eq!(bench.router.buffered_flits(), 0);
        // Header was routed once, not re-processed while stalled.
        assert_eq!(bench.router.stats().headers_routed, 1);
    }

    #[test]
    fn test_flit_before_header_is_misordered() {
        let mut bench = bench(1, 2);
        let flits = packet(&["n0", "n1", "n2"]).flits(1);
        bench.upstream.send_flit(flits[1].clone()).unwrap();
        bench.router.read_from_input_ports().unwrap();

        bench.router.update_output_map();
        let err = bench.router.route_buffered_flits(1, &NullProbe).unwrap_err();
        assert!(matches!(
            err,
            FlowControlError::MisorderedPacket {
                kind: FlitKind::Tail,
                ..
            }
        ));
    }

    #[test]
    fn test_missing_port_reported() {
        let mut bench = bench(1, 2);
        let flits = packet(&["n0", "n1", "n5"]).flits(1);
        bench.upstream.send_flit(flits[0].clone()).unwrap();
        bench.router.read_from_input_ports().unwrap();

        bench.router.update_output_map();
        let err = bench.router.route_buffered_flits(1, &NullProbe).unwrap_err();
        assert_eq!(
            err,
            FlowControlError::NoPort {
                router: "n1".into(),
                next_hop: Endpoint::Router("n5".into()),
            }
        );
    }

    #[test]
    fn test_router_not_on_route() {
        let mut bench = bench(1, 2);
        let flits = packet(&["n0", "n2"]).flits(1);
        bench.upstream.send_flit(flits[0].clone()).unwrap();
        bench.router.read_from_input_ports().unwrap();

        bench.router.update_output_map();
        assert!(matches!(
            bench.router.route_buffered_flits(1, &NullProbe),
            Err(FlowControlError::NotOnRoute { .. })
        ));
    }

    #[test]
    fn test_tail_clears_next_hop() {
        let mut bench = bench(1, 2);
        let flits = packet(&["n0", "n1", "n2"]).flits(1);
        bench.upstream.send_flit(flits[0].clone()).unwrap();

        step(&mut bench, 0, &NullProbe);
        bench.upstream.update_credits();
        bench.upstream.send_flit(flits[1].clone()).unwrap();
        step(&mut bench, 1, &NullProbe);
        assert_eq!(bench.router.packets_in_flight(), 1);

        bench.to_n2.lock().drain_flits();
        step(&mut bench, 2, &NullProbe);
        assert_eq!(bench.router.packets_in_flight(), 0);
        assert_eq!(bench.router.stats().flits_forwarded, 2);

        let stats = bench.router.export_stats();
        assert_eq!(stats["flits_forwarded"], 2);
        assert_eq!(stats["node"], "n1");
    }

    #[test]
    fn test_header_and_body_leave_together_with_bandwidth_two() {
        let mut bench = bench_with_bandwidth(1, 2, 2);
        let mut packet = packet(&["n0", "n1", "n2"]);
        packet.body_size = 1;
        let flits = packet.flits(1);
        bench.upstream.send_flit(flits[0].clone()).unwrap();
        bench.upstream.send_flit(flits[1].clone()).unwrap();

        let probe = RecordingProbe::new();
        step(&mut bench, 0, &probe);
        assert_eq!(bench.router.buffered_flits(), 2);

        step(&mut bench, 1, &probe);
        assert_eq!(bench.to_n2.lock().len(), 2);
        assert_eq!(bench.router.buffered_flits(), 0);
        assert_eq!(bench.router.stats().headers_routed, 1);
        assert_eq!(
            probe.count(|e| matches!(e, SimEvent::FlitForwarded { cycle: 1, .. })),
            2
        );
    }

    #[test]
    fn test_bandwidth_one_forwards_single_flit() {
        let mut bench = bench(1, 2);
        let mut packet = packet(&["n0", "n1", "n2"]);
        packet.body_size = 1;
        let flits = packet.flits(1);
        bench.upstream.send_flit(flits[0].clone()).unwrap();
        bench.router.read_from_input_ports().unwrap();
        bench.upstream.update_credits();
        bench.upstream.send_flit(flits[1].clone()).unwrap();
        bench.router.read_from_input_ports().unwrap();
        assert_eq!(bench.router.buffered_flits(), 2);

        step(&mut bench, 1, &NullProbe);
        assert_eq!(bench.to_n2.lock().len(), 1);
        assert_eq!(bench.router.buffered_flits(), 1);
    }
}
