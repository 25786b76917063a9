//! Packets and the flits they are carried in.
//!
//! A [`Packet`] exists only at the edges of the network: the source interface
//! splits it into flits with [`Packet::flits`] and the destination interface
//! rebuilds it with a [`Reconstructor`]. Everything in between moves
//! [`Flit`]s.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::error::FlowControlError;
use crate::topology::NodeId;
use crate::types::{Cycle, FlowId, PacketIndex, Priority};

/// Identity of a packet: owning flow plus per-flow index.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PacketId {
    pub flow: FlowId,
    pub index: PacketIndex,
}

impl PacketId {
    /// Creates a new packet identity.
    pub fn new(flow: impl Into<FlowId>, index: PacketIndex) -> Self {
        Self {
            flow: flow.into(),
            index,
        }
    }
}

impl fmt::Display for PacketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.flow, self.index)
    }
}

/// A logical message travelling from the first to the last node of its
/// route.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Packet {
    pub id: PacketId,
    pub priority: Priority,
    /// Absolute deadline cycle
    pub deadline: Cycle,
    pub route: Arc<[NodeId]>,
    /// Number of payload units carried by body flits
    pub body_size: u64,
}

/// Discriminant of a [`Flit`], used in error reports.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FlitKind {
    Header,
    Body,
    Tail,
}

impl fmt::Display for FlitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FlitKind::Header => "header",
            FlitKind::Body => "body",
            FlitKind::Tail => "tail",
        };
        f.write_str(name)
    }
}

/// Flow-control digit: the unit moved across a link.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Flit {
    /// Opens a packet and carries everything a router needs to route it.
    Header {
        packet: PacketId,
        priority: Priority,
        deadline: Cycle,
        route: Arc<[NodeId]>,
    },
    /// Carries `data_size` payload units.
    Body {
        packet: PacketId,
        priority: Priority,
        data_size: u64,
    },
    /// Closes a packet.
    Tail { packet: PacketId, priority: Priority },
}

impl Flit {
    /// Returns the identity of the packet this flit belongs to.
    pub fn packet(&self) -> &PacketId {
        match self {
            Flit::Header { packet, .. } | Flit::Body { packet, .. } | Flit::Tail { packet, .. } => {
                packet
            }
        }
    }

    /// Returns the priority, i.e. the virtual channel, of this flit.
    pub fn priority(&self) -> Priority {
        match self {
            Flit::Header { priority, .. }
            | Flit::Body { priority, .. }
            | Flit::Tail { priority, .. } => *priority,
        }
    }

    /// Returns the kind of this flit.
    pub fn kind(&self) -> FlitKind {
        match self {
            Flit::Header { .. } => FlitKind::Header,
            Flit::Body { .. } => FlitKind::Body,
            Flit::Tail { .. } => FlitKind::Tail,
        }
    }

    pub fn is_header(&self) -> bool {
        matches!(self, Flit::Header { .. })
    }

    pub fn is_tail(&self) -> bool {
        matches!(self, Flit::Tail { .. })
    }
}

impl Packet {
    /// Returns the source node of the packet.
    pub fn source(&self) -> Option<&NodeId> {
        self.route.first()
    }

    /// Returns the destination node of the packet.
    pub fn destination(&self) -> Option<&NodeId> {
        self.route.last()
    }

    /// Number of body flits this packet splits into at `flit_size`.
    pub fn body_flit_count(&self, flit_size: u64) -> u64 {
        assert!(flit_size > 0, "flit size must be positive");
        self.body_size.div_ceil(flit_size)
    }

    /// Splits the packet into a header, `ceil(body_size / flit_size)` body
    /// flits and a tail.
    ///
    /// Every body flit but the last carries `flit_size` units; the last
    /// carries the remainder.
    ///
    /// # Panics
    ///
    /// Panics if `flit_size` is zero. Configuration validation rejects such
    /// values before a packet is ever built.
    pub fn flits(&self, flit_size: u64) -> Vec<Flit> {
        let count = self.body_flit_count(flit_size);
        let mut flits = Vec::with_capacity(count as usize + 2);

        flits.push(Flit::Header {
            packet: self.id.clone(),
            priority: self.priority,
            deadline: self.deadline,
            route: Arc::clone(&self.route),
        });

        let mut remaining = self.body_size;
        for _ in 0..count {
            let data_size = remaining.min(flit_size);
            remaining -= data_size;
            flits.push(Flit::Body {
                packet: self.id.clone(),
                priority: self.priority,
                data_size,
            });
        }

        flits.push(Flit::Tail {
            packet: self.id.clone(),
            priority: self.priority,
        });
        flits
    }
}

/// Header fields retained by a [`Reconstructor`].
#[derive(Clone, Debug)]
struct HeaderInfo {
    priority: Priority,
    deadline: Cycle,
    route: Arc<[NodeId]>,
}

/// Accumulates the flits of one packet at its destination.
#[derive(Clone, Debug)]
pub struct Reconstructor {
    packet: PacketId,
    header: Option<HeaderInfo>,
    body_size: u64,
    body_flits: u64,
    tail: bool,
}

impl Reconstructor {
    /// Creates an empty reconstructor for `packet`.
    pub fn new(packet: PacketId) -> Self {
        Self {
            packet,
            header: None,
            body_size: 0,
            body_flits: 0,
            tail: false,
        }
    }

    fn unexpected(&self, expected: FlitKind, flit: &Flit) -> FlowControlError {
        FlowControlError::UnexpectedFlit {
            packet: self.packet.clone(),
            expected,
            found: flit.kind(),
        }
    }

    /// Records the header flit.
    pub fn set_header(&mut self, flit: &Flit) -> Result<(), FlowControlError> {
        let Flit::Header {
            priority,
            deadline,
            route,
            ..
        } = flit
        else {
            return Err(self.unexpected(FlitKind::Header, flit));
        };
        if self.header.is_some() {
            return Err(FlowControlError::FlitAlreadySet {
                packet: self.packet.clone(),
                kind: FlitKind::Header,
            });
        }
        self.header = Some(HeaderInfo {
            priority: *priority,
            deadline: *deadline,
            route: Arc::clone(route),
        });
        Ok(())
    }

    /// Adds the payload of a body flit.
    pub fn add_body(&mut self, flit: &Flit) -> Result<(), FlowControlError> {
        let Flit::Body { data_size, .. } = flit else {
            return Err(self.unexpected(FlitKind::Body, flit));
        };
        self.body_size += data_size;
        self.body_flits += 1;
        Ok(())
    }

    /// Records the tail flit.
    pub fn set_tail(&mut self, flit: &Flit) -> Result<(), FlowControlError> {
        if !flit.is_tail() {
            return Err(self.unexpected(FlitKind::Tail, flit));
        }
        if self.tail {
            return Err(FlowControlError::FlitAlreadySet {
                packet: self.packet.clone(),
                kind: FlitKind::Tail,
            });
        }
        self.tail = true;
        Ok(())
    }

    /// Dispatches a flit to the matching setter.
    pub fn accept(&mut self, flit: &Flit) -> Result<(), FlowControlError> {
        match flit.kind() {
            FlitKind::Header => self.set_header(flit),
            FlitKind::Body => self.add_body(flit),
            FlitKind::Tail => self.set_tail(flit),
        }
    }

    /// Returns true once both the header and the tail have been seen.
    pub fn is_complete(&self) -> bool {
        self.header.is_some() && self.tail
    }

    /// Number of body flits received so far.
    pub fn body_flits(&self) -> u64 {
        self.body_flits
    }

    /// Rebuilds the packet from the collected flits.
    pub fn reconstruct(&self) -> Result<Packet, FlowControlError> {
        let header = self.header.as_ref().ok_or_else(|| FlowControlError::FlitUnset {
            packet: self.packet.clone(),
            kind: FlitKind::Header,
        })?;
        if !self.tail {
            return Err(FlowControlError::FlitUnset {
                packet: self.packet.clone(),
                kind: FlitKind::Tail,
            });
        }
        Ok(Packet {
            id: self.packet.clone(),
            priority: header.priority,
            deadline: header.deadline,
            route: Arc::clone(&header.route),
            body_size: self.body_size,
        })
    }
}
