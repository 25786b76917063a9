//! Structured simulation events.
//!
//! Components never write per-flit diagnostics to a global logger. They emit
//! [`SimEvent`]s into the [`Probe`] handed to them for the current cycle, and
//! the caller decides what happens to them: drop them ([`NullProbe`]), log
//! them through `tracing` ([`TracingProbe`]) or keep them for inspection
//! ([`RecordingProbe`]).

use parking_lot::Mutex;
use serde::Serialize;

use crate::channel::Endpoint;
use crate::packet::{FlitKind, PacketId};
use crate::types::Cycle;

/// Something observable that happened during a cycle.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SimEvent {
    /// A flow released a packet at its source interface.
    PacketReleased {
        cycle: Cycle,
        packet: PacketId,
        source: String,
    },
    /// An interface put a flit onto its router link.
    FlitInjected {
        cycle: Cycle,
        node: String,
        packet: PacketId,
        kind: FlitKind,
    },
    /// A router finished processing a header and chose its output.
    HeaderRouted {
        cycle: Cycle,
        router: String,
        packet: PacketId,
        next_hop: Endpoint,
    },
    /// A router moved a flit to an output port.
    FlitForwarded {
        cycle: Cycle,
        router: String,
        packet: PacketId,
        kind: FlitKind,
        next_hop: Endpoint,
    },
    /// A routed flit was held back for lack of credit or bandwidth.
    FlitStalled {
        cycle: Cycle,
        router: String,
        packet: PacketId,
        kind: FlitKind,
    },
    /// The destination interface rebuilt a packet from its flits.
    PacketArrived {
        cycle: Cycle,
        node: String,
        packet: PacketId,
    },
    /// An arrived packet was matched to its transmitted record.
    PacketRecorded {
        cycle: Cycle,
        packet: PacketId,
        latency: Cycle,
    },
    /// An arrived packet differed from what was transmitted.
    ConsistencyMismatch {
        cycle: Cycle,
        packet: PacketId,
        detail: String,
    },
}

impl SimEvent {
    /// Cycle in which the event happened.
    pub fn cycle(&self) -> Cycle {
        match self {
            SimEvent::PacketReleased { cycle, .. }
            | SimEvent::FlitInjected { cycle, .. }
            | SimEvent::HeaderRouted { cycle, .. }
            | SimEvent::FlitForwarded { cycle, .. }
            | SimEvent::FlitStalled { cycle, .. }
            | SimEvent::PacketArrived { cycle, .. }
            | SimEvent::PacketRecorded { cycle, .. }
            | SimEvent::ConsistencyMismatch { cycle, .. } => *cycle,
        }
    }

    /// Packet the event refers to.
    pub fn packet(&self) -> &PacketId {
        match self {
            SimEvent::PacketReleased { packet, .. }
            | SimEvent::FlitInjected { packet, .. }
            | SimEvent::HeaderRouted { packet, .. }
            | SimEvent::FlitForwarded { packet, .. }
            | SimEvent::FlitStalled { packet, .. }
            | SimEvent::PacketArrived { packet, .. }
            | SimEvent::PacketRecorded { packet, .. }
            | SimEvent::ConsistencyMismatch { packet, .. } => packet,
        }
    }
}

/// Sink for simulation events.
///
/// Routers may run in parallel within a phase, so probes must be shareable
/// across threads.
pub trait Probe: Send + Sync {
    fn emit(&self, event: &SimEvent);
}

/// Discards every event.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullProbe;

impl Probe for NullProbe {
    #[inline]
    fn emit(&self, _event: &SimEvent) {}
}

/// Forwards events to `tracing`.
///
/// Flit-level events are logged at TRACE, packet-level events at DEBUG and
/// consistency mismatches at WARN.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingProbe;

impl Probe for TracingProbe {
    fn emit(&self, event: &SimEvent) {
        match event {
            SimEvent::FlitInjected {
                cycle,
                node,
                packet,
                kind,
            } => tracing::trace!(cycle, %node, %packet, %kind, "flit injected"),
            SimEvent::HeaderRouted {
                cycle,
                router,
                packet,
                next_hop,
            } => tracing::trace!(cycle, %router, %packet, %next_hop, "header routed"),
            SimEvent::FlitForwarded {
                cycle,
                router,
                packet,
                kind,
                next_hop,
            } => tracing::trace!(cycle, %router, %packet, %kind, %next_hop, "flit forwarded"),
            SimEvent::FlitStalled {
                cycle,
                router,
                packet,
                kind,
            } => tracing::trace!(cycle, %router, %packet, %kind, "flit stalled"),
            SimEvent::PacketReleased {
                cycle,
                packet,
                source,
            } => tracing::debug!(cycle, %packet, %source, "packet released"),
            SimEvent::PacketArrived {
                cycle,
                node,
                packet,
            } => tracing::debug!(cycle, %node, %packet, "packet arrived"),
            SimEvent::PacketRecorded {
                cycle,
                packet,
                latency,
            } => tracing::debug!(cycle, %packet, latency, "packet recorded"),
            SimEvent::ConsistencyMismatch {
                cycle,
                packet,
                detail,
            } => tracing::warn!(cycle, %packet, %detail, "consistency mismatch"),
        }
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct RecordingProbe {
    events: Mutex<Vec<SimEvent>>,
}

impl RecordingProbe {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the events recorded so far.
    pub fn events(&self) -> Vec<SimEvent> {
        self.events.lock().clone()
    }

    /// Takes the recorded events, leaving the probe empty.
    pub fn take(&self) -> Vec<SimEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    /// Number of recorded events matching a predicate.
    pub fn count(&self, predicate: impl Fn(&SimEvent) -> bool) -> usize {
        self.events.lock().iter().filter(|e| predicate(e)).count()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

impl Probe for RecordingProbe {
    fn emit(&self, event: &SimEvent) {
        self.events.lock().push(event.clone());
    }
}
