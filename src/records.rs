//! Bookkeeping of transmitted and arrived packets.
//!
//! Every released packet is recorded as transmitted. When its tail reaches
//! the destination interface the record moves, exactly once, to the arrived
//! map and gains a received cycle. Whatever is still transmitted when the run
//! ends was lost in the network.

use serde::Serialize;
use std::collections::BTreeMap;

use crate::error::{SimError, SimResult};
use crate::packet::Packet;
use crate::types::{Cycle, FlowId, PacketIndex};

/// Life of one packet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PacketRecord {
    pub packet: Packet,
    /// Start of the period the packet belongs to
    pub generation_cycle: Cycle,
    /// Cycle the packet was handed to its source interface
    pub transmission_cycle: Cycle,
    /// Cycle the tail reached the destination interface
    pub received_cycle: Option<Cycle>,
}

impl PacketRecord {
    /// End-to-end latency, counting both the generation and the receive
    /// cycle.
    pub fn latency(&self) -> Option<Cycle> {
        self.received_cycle
            .map(|received| received.saturating_sub(self.generation_cycle) + 1)
    }

    /// Deadline relative to the generation cycle.
    pub fn relative_deadline(&self) -> Cycle {
        self.packet.deadline.saturating_sub(self.generation_cycle)
    }

    /// True if the packet arrived later than its deadline allows.
    pub fn exceeded_deadline(&self) -> bool {
        self.latency()
            .is_some_and(|latency| latency > self.relative_deadline())
    }
}

/// Outcome of matching an arrived packet against its record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Arrival {
    pub latency: Cycle,
    /// Description of the differences, if the arrived packet does not match
    /// the transmitted one
    pub mismatch: Option<String>,
}

/// Per-flow maps of transmitted and arrived packets.
#[derive(Clone, Debug, Default)]
pub struct Records {
    transmitted: BTreeMap<FlowId, BTreeMap<PacketIndex, PacketRecord>>,
    arrived: BTreeMap<FlowId, BTreeMap<PacketIndex, PacketRecord>>,
}

/// Per-cycle snapshot of record counts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RecordCounts {
    pub transmitted: usize,
    pub arrived: usize,
}

impl Records {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a released packet.
    pub fn transmit(&mut self, packet: Packet, generation_cycle: Cycle, transmission_cycle: Cycle) {
        let id = packet.id.clone();
        self.transmitted.entry(id.flow).or_default().insert(
            id.index,
            PacketRecord {
                packet,
                generation_cycle,
                transmission_cycle,
                received_cycle: None,
            },
        );
    }

    /// Moves the record of an arrived packet to the arrived map.
    ///
    /// Fails if the packet was never transmitted or has already arrived.
    pub fn arrive(&mut self, packet: Packet, received_cycle: Cycle) -> SimResult<Arrival> {
        let mut record = self
            .transmitted
            .get_mut(&packet.id.flow)
            .and_then(|flow| flow.remove(&packet.id.index))
            .ok_or_else(|| SimError::UnknownPacket(packet.id.clone()))?;

        let mismatch = describe_mismatch(&record.packet, &packet);
        record.received_cycle = Some(received_cycle);
        let latency = record.latency().unwrap_or_default();

        self.arrived
            .entry(packet.id.flow.clone())
            .or_default()
            .insert(packet.id.index, record);

        Ok(Arrival { latency, mismatch })
    }

    /// Packets transmitted but not (yet) arrived.
    pub fn transmitted(&self) -> &BTreeMap<FlowId, BTreeMap<PacketIndex, PacketRecord>> {
        &self.transmitted
    }

    /// Packets that arrived.
    pub fn arrived(&self) -> &BTreeMap<FlowId, BTreeMap<PacketIndex, PacketRecord>> {
        &self.arrived
    }

    /// Outstanding records of one flow.
    pub fn transmitted_for(&self, flow: &str) -> impl Iterator<Item = &PacketRecord> {
        self.transmitted.get(flow).into_iter().flat_map(|m| m.values())
    }

    /// Arrived records of one flow.
    pub fn arrived_for(&self, flow: &str) -> impl Iterator<Item = &PacketRecord> {
        self.arrived.get(flow).into_iter().flat_map(|m| m.values())
    }

    /// Looks up the arrived record of a packet.
    pub fn arrived_packet(&self, flow: &str, index: PacketIndex) -> Option<&PacketRecord> {
        self.arrived.get(flow).and_then(|m| m.get(&index))
    }

    pub fn counts(&self) -> RecordCounts {
        RecordCounts {
            transmitted: self.transmitted.values().map(BTreeMap::len).sum(),
            arrived: self.arrived.values().map(BTreeMap::len).sum(),
        }
    }
}

fn describe_mismatch(sent: &Packet, received: &Packet) -> Option<String> {
    let mut diffs = Vec::new();
    if sent.priority != received.priority {
        diffs.push(format!("priority {} != {}", sent.priority, received.priority));
    }
    if sent.deadline != received.deadline {
        diffs.push(format!("deadline {} != {}", sent.deadline, received.deadline));
    }
    if sent.route != received.route {
        diffs.push("route differs".to_string());
    }
    if sent.body_size != received.body_size {
        diffs.push(format!(
            "body size {} != {}",
            sent.body_size, received.body_size
        ));
    }
    (!diffs.is_empty()).then(|| diffs.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::PacketId;
    use crate::topology::NodeId;

    fn packet(flow: &str, index: PacketIndex, deadline: Cycle) -> Packet {
        Packet {
            id: PacketId::new(flow, index),
            priority: 1,
            deadline,
            route: vec![NodeId::new("n0", 0, 0)].into(),
            body_size: 2,
        }
    }

    #[test]
    fn test_transmit_then_arrive() {
        let mut records = Records::new();
        records.transmit(packet("t0", 0, 50), 0, 0);
        assert_eq!(records.counts(), RecordCounts { transmitted: 1, arrived: 0 });

        let arrival = records.arrive(packet("t0", 0, 50), 12).unwrap();
        assert_eq!(arrival.latency, 13);
        assert!(arrival.mismatch.is_none());
        assert_eq!(records.counts(), RecordCounts { transmitted: 0, arrived: 1 });

        let record = records.arrived_packet("t0", 0).unwrap();
        assert_eq!(record.received_cycle, Some(12));
        assert!(!record.exceeded_deadline());
    }

    #[test]
    fn test_arrive_twice_is_unknown() {
        let mut records = Records::new();
        records.transmit(packet("t0", 0, 50), 0, 0);
        records.arrive(packet("t0", 0, 50), 5).unwrap();
        assert!(matches!(
            records.arrive(packet("t0", 0, 50), 6),
            Err(SimError::UnknownPacket(_))
        ));
        assert!(records.arrive(packet("zz", 0, 50), 6).is_err());
    }

    #[test]
    fn test_mismatch_reported() {
        let mut records = Records::new();
        records.transmit(packet("t0", 0, 50), 0, 0);
        let mut changed = packet("t0", 0, 60);
        changed.body_size = 3;
        let arrival = records.arrive(changed, 9).unwrap();
        assert_eq!(
            arrival.mismatch.as_deref(),
            Some("deadline 50 != 60, body size 2 != 3")
        );
    }

    #[test]
    fn test_deadline_exceeded() {
        let mut records = Records::new();
        // Generated at 100 with relative deadline 10.
        records.transmit(packet("t0", 4, 110), 100, 103);
        records.arrive(packet("t0", 4, 110), 110).unwrap();
        let record = records.arrived_packet("t0", 4).unwrap();
        assert_eq!(record.latency(), Some(11));
        assert_eq!(record.relative_deadline(), 10);
        assert!(record.exceeded_deadline());
    }
}
