//! Periodic traffic flows with release jitter.
//!
//! A flow releases one packet per period. At every period boundary
//! (`cycle % period == 0`) it draws a fresh jitter uniformly from
//! `0..=jitter`, and the packet is released exactly `jitter` cycles after the
//! boundary. Draws come from a per-flow generator seeded from the scenario
//! seed, so a run is reproducible.

use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use std::sync::Arc;

use crate::config::TrafficFlowConfig;
use crate::packet::{Packet, PacketId};
use crate::topology::NodeId;
use crate::types::{Cycle, FlowId, PacketIndex, Priority};

/// Runtime state of a traffic flow.
#[derive(Debug)]
pub struct TrafficFlow {
    id: FlowId,
    priority: Priority,
    period: Cycle,
    deadline: Cycle,
    jitter: Cycle,
    packet_size: u64,
    route: Arc<[NodeId]>,
    rng: Xoshiro256PlusPlus,
    /// Start of the current period
    period_start: Cycle,
    /// Jitter drawn for the current period
    jitter_draw: Cycle,
    next_index: PacketIndex,
}

impl TrafficFlow {
    /// Creates a flow over a resolved route.
    ///
    /// `index` is the position of the flow in the scenario and decorrelates
    /// the jitter streams of flows sharing a seed.
    pub fn new(config: &TrafficFlowConfig, route: Vec<NodeId>, seed: u64, index: usize) -> Self {
        Self {
            id: config.id.clone(),
            priority: config.priority,
            period: config.period,
            deadline: config.deadline,
            jitter: config.jitter,
            packet_size: config.packet_size,
            route: route.into(),
            rng: Xoshiro256PlusPlus::seed_from_u64(seed ^ index as u64),
            period_start: 0,
            jitter_draw: 0,
            next_index: 0,
        }
    }

    pub fn id(&self) -> &FlowId {
        &self.id
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn period(&self) -> Cycle {
        self.period
    }

    /// Relative deadline.
    pub fn deadline(&self) -> Cycle {
        self.deadline
    }

    pub fn jitter(&self) -> Cycle {
        self.jitter
    }

    pub fn packet_size(&self) -> u64 {
        self.packet_size
    }

    pub fn route(&self) -> &[NodeId] {
        &self.route
    }

    /// Start cycle of the current period.
    pub fn period_start(&self) -> Cycle {
        self.period_start
    }

    /// Jitter drawn for the current period.
    pub fn jitter_draw(&self) -> Cycle {
        self.jitter_draw
    }

    /// Number of packets released so far.
    pub fn released(&self) -> PacketIndex {
        self.next_index
    }

    /// Advances the flow to `cycle` and returns the packet released in it,
    /// if any.
    ///
    /// Must be called for every cycle in order, since period boundaries are
    /// only noticed in the cycle they occur.
    ///
    /// `packet_size` is the body size alone: the header and tail flits come
    /// on top of it, matching the `packet_size + 2 * flit_size` term of the
    /// basic latency bound.
    pub fn release(&mut self, cycle: Cycle) -> Option<Packet> {
        if cycle % self.period == 0 {
            self.period_start = cycle;
            self.jitter_draw = if self.jitter > 0 {
                self.rng.gen_range(0..=self.jitter)
            } else {
                0
            };
        }

        if cycle != self.period_start + self.jitter_draw {
            return None;
        }

        let packet = Packet {
            id: PacketId::new(self.id.clone(), self.next_index),
            priority: self.priority,
            deadline: self.period_start + self.deadline,
            route: Arc::clone(&self.route),
            body_size: self.packet_size,
        };
        self.next_index += 1;
        Some(packet)
    }
}
