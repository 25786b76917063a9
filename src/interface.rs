//! Network interface: where packets enter and leave the network.
//!
//! The interface of a node owns the output port feeding its router and the
//! input port fed by it. Outgoing packets are split into flits as soon as
//! they are handed over and wait in one FIFO per priority. Incoming flits are
//! reassembled per packet and completed packets are queued for the caller.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

use crate::error::FlowControlError;
use crate::packet::{Flit, Packet, PacketId, Reconstructor};
use crate::port::{InputPort, OutputPort};
use crate::probe::{Probe, SimEvent};
use crate::topology::NodeId;
use crate::types::{vc_index, Cycle, Priority};

/// Counters kept by a network interface.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceStats {
    pub packets_injected: u64,
    pub flits_injected: u64,
    pub flits_received: u64,
    pub packets_received: u64,
}

/// Network interface of a single node.
#[derive(Debug)]
pub struct NetworkInterface {
    node: NodeId,
    flit_size: u64,
    max_priority: Priority,
    /// Link towards the local router
    output: OutputPort,
    /// Link from the local router
    input: InputPort,
    /// Flits waiting for injection, one FIFO per priority
    flits_in_transit: Vec<VecDeque<Flit>>,
    /// Partially received packets
    reconstructors: HashMap<PacketId, Reconstructor>,
    arrived: Vec<Packet>,
    stats: InterfaceStats,
}

impl NetworkInterface {
    pub fn new(
        node: NodeId,
        flit_size: u64,
        max_priority: Priority,
        output: OutputPort,
        input: InputPort,
    ) -> Self {
        Self {
            node,
            flit_size,
            max_priority,
            output,
            input,
            flits_in_transit: (0..max_priority).map(|_| VecDeque::new()).collect(),
            reconstructors: HashMap::new(),
            arrived: Vec::new(),
            stats: InterfaceStats::default(),
        }
    }

    pub fn node(&self) -> &NodeId {
        &self.node
    }

    pub fn label(&self) -> &str {
        &self.node.label
    }

    pub fn output(&self) -> &OutputPort {
        &self.output
    }

    pub fn input(&self) -> &InputPort {
        &self.input
    }

    pub fn stats(&self) -> &InterfaceStats {
        &self.stats
    }

    /// Flits queued for injection.
    pub fn pending_flits(&self) -> usize {
        self.flits_in_transit.iter().map(VecDeque::len).sum()
    }

    /// Packets of which some but not all flits have arrived.
    pub fn partial_packets(&self) -> usize {
        self.reconstructors.len()
    }

    /// Splits a packet into flits and queues them for injection.
    pub fn route_packet(&mut self, packet: &Packet) -> Result<(), FlowControlError> {
        let index = vc_index(packet.priority, self.max_priority).ok_or(
            FlowControlError::InvalidPriority {
                priority: packet.priority,
                max_priority: self.max_priority,
            },
        )?;
        self.flits_in_transit[index].extend(packet.flits(self.flit_size));
        self.stats.packets_injected += 1;
        Ok(())
    }

    /// Collects credits, then sends queued flits in priority order for as
    /// long as credit and link bandwidth allow.
    pub fn transmit_pending_packets(
        &mut self,
        cycle: Cycle,
        probe: &dyn Probe,
    ) -> Result<(), FlowControlError> {
        self.output.update_credits();

        for (index, queue) in self.flits_in_transit.iter_mut().enumerate() {
            let priority = index as Priority + 1;
            while !queue.is_empty() && self.output.allowed_to_send(priority) {
                let Some(flit) = queue.pop_front() else {
                    break;
                };
                probe.emit(&SimEvent::FlitInjected {
                    cycle,
                    node: self.node.label.clone(),
                    packet: flit.packet().clone(),
                    kind: flit.kind(),
                });
                self.output.send_flit(flit)?;
                self.stats.flits_injected += 1;
            }
        }
        Ok(())
    }

    /// Reads the link from the router and reassembles packets.
    ///
    /// Buffered flits are drained in sweeps over all priorities until a
    /// sweep makes no progress.
    pub fn handle_arriving_flits(
        &mut self,
        cycle: Cycle,
        probe: &dyn Probe,
    ) -> Result<(), FlowControlError> {
        self.input.read_into_buffer()?;

        loop {
            let mut progress = false;
            for priority in 1..=self.max_priority {
                if let Some(flit) = self.input.read_out_of_buffer(priority)? {
                    self.stats.flits_received += 1;
                    self.accept(flit, cycle, probe)?;
                    progress = true;
                }
            }
            if !progress {
                break;
            }
        }
        Ok(())
    }

    fn accept(&mut self, flit: Flit, cycle: Cycle, probe: &dyn Probe) -> Result<(), FlowControlError> {
        let id = flit.packet().clone();
        self.reconstructors
            .entry(id.clone())
            .or_insert_with(|| Reconstructor::new(id.clone()))
            .accept(&flit)?;

        if !flit.is_tail() {
            return Ok(());
        }

        let Some(reconstructor) = self.reconstructors.remove(&id) else {
            return Ok(());
        };
        let packet = reconstructor.reconstruct()?;
        if packet.destination().map(|n| n.label.as_str()) != Some(self.node.label.as_str()) {
            return Err(FlowControlError::NotOnRoute {
                router: self.node.label.clone(),
                packet: id,
            });
        }

        probe.emit(&SimEvent::PacketArrived {
            cycle,
            node: self.node.label.clone(),
            packet: id,
        });
        self.stats.packets_received += 1;
        self.arrived.push(packet);
        Ok(())
    }

    /// Takes all packets completed since the last call.
    pub fn pop_arrived_packets(&mut self) -> Vec<Packet> {
        std::mem::take(&mut self.arrived)
    }

    /// Exports interface counters as JSON.
    pub fn export_stats(&self) -> serde_json::Value {
        serde_json::json!({
            "node": self.node.label,
            "pending_flits": self.pending_flits(),
            "partial_packets": self.partial_packets(),
            "packets_injected": self.stats.packets_injected,
            "flits_injected": self.stats.flits_injected,
            "flits_received": self.stats.flits_received,
            "packets_received": self.stats.packets_received,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::Buffer;
    use crate::channel::{Connection, Endpoint, Link};
    use crate::probe::{NullProbe, RecordingProbe};
    use std::sync::Arc;

    /// An interface at `n0` whose router side is driven by hand.
    struct Loopback {
        ni: NetworkInterface,
        to_router: Link,
        router_in: InputPort,
        router_out: OutputPort,
    }

    fn loopback(buffer: usize, max_priority: Priority, bandwidth: usize) -> Loopback {
        let vc = buffer / max_priority as usize;
        let to_router = Connection::new(
            Endpoint::Interface("n0".into()),
            Endpoint::Router("n0".into()),
            bandwidth,
            vc,
            max_priority,
        )
        .into_link();
        let from_router = Connection::new(
            Endpoint::Router("n0".into()),
            Endpoint::Interface("n0".into()),
            bandwidth,
            vc,
            max_priority,
        )
        .into_link();

        let router_in =
            InputPort::new(to_router.clone(), Buffer::new(buffer, max_priority).unwrap()).unwrap();
        let ni_in =
            InputPort::new(from_router.clone(), Buffer::new(buffer, max_priority).unwrap()).unwrap();
        let mut router_out = OutputPort::new(from_router);
        router_out.update_credits();

        Loopback {
            ni: NetworkInterface::new(
                NodeId::new("n0", 0, 0),
                1,
                max_priority,
                OutputPort::new(to_router.clone()),
                ni_in,
            ),
            to_router,
            router_in,
            router_out,
        }
    }

    fn packet(index: u64, priority: Priority, body_size: u64) -> Packet {
        Packet {
            id: PacketId::new("t0", index),
            priority,
            deadline: 50,
            route: Arc::from(vec![NodeId::new("n0", 0, 0)]),
            body_size,
        }
    }

    #[test]
    fn test_transmit_respects_credit() {
        let mut lb = loopback(2, 1, 1);
        lb.ni.route_packet(&packet(0, 1, 2)).unwrap();
        assert_eq!(lb.ni.pending_flits(), 4);

        let probe = RecordingProbe::new();
        lb.ni.transmit_pending_packets(0, &probe).unwrap();
        assert_eq!(lb.to_router.lock().len(), 1);
        lb.router_in.read_into_buffer().unwrap();

        lb.ni.transmit_pending_packets(1, &probe).unwrap();
        lb.router_in.read_into_buffer().unwrap();

        // Both credits spent, nothing moves until the router frees a slot.
        lb.ni.transmit_pending_packets(2, &probe).unwrap();
        assert!(lb.to_router.lock().is_empty());
        assert_eq!(lb.ni.pending_flits(), 2);

        lb.router_in.read_out_of_buffer(1).unwrap();
        lb.ni.transmit_pending_packets(3, &probe).unwrap();
        assert_eq!(lb.to_router.lock().len(), 1);
        assert_eq!(probe.len(), 3);
    }

    #[test]
    fn test_higher_priority_injected_first() {
        let mut lb = loopback(4, 2, 1);
        lb.ni.route_packet(&packet(0, 2, 0)).unwrap();
        lb.ni.route_packet(&packet(1, 1, 0)).unwrap();

        lb.ni.transmit_pending_packets(0, &NullProbe).unwrap();
        let flits = lb.to_router.lock().drain_flits();
        assert_eq!(flits.len(), 1);
        assert_eq!(flits[0].priority(), 1);
    }

    #[test]
    fn test_invalid_priority_rejected() {
        let mut lb = loopback(2, 1, 1);
        assert!(matches!(
            lb.ni.route_packet(&packet(0, 2, 0)),
            Err(FlowControlError::InvalidPriority { .. })
        ));
    }

    #[test]
    fn test_reassembles_arriving_packet() {
        let mut lb = loopback(4, 1, 2);
        let original = packet(7, 1, 3);
        let flits = original.flits(1);
        assert_eq!(flits.len(), 5);

        let probe = RecordingProbe::new();
        for (cycle, pair) in flits.chunks(2).enumerate() {
            lb.router_out.update_credits();
            for flit in pair {
                lb.router_out.send_flit(flit.clone()).unwrap();
            }
            lb.ni.handle_arriving_flits(cycle as Cycle, &probe).unwrap();
            if cycle < 2 {
                assert!(lb.ni.pop_arrived_packets().is_empty());
                assert_eq!(lb.ni.partial_packets(), 1);
            }
        }

        let arrived = lb.ni.pop_arrived_packets();
        assert_eq!(arrived, vec![original]);
        assert_eq!(lb.ni.partial_packets(), 0);
        assert_eq!(
            probe.count(|e| matches!(e, SimEvent::PacketArrived { cycle: 2, .. })),
            1
        );
        assert!(lb.ni.pop_arrived_packets().is_empty());
    }
}
