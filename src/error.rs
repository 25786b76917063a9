//! Error types for topology construction, flow control and simulation runs.
//!
//! Configuration errors live next to the configuration loader in
//! [`crate::config::ConfigError`]; everything raised by the engine itself is
//! defined here.

use thiserror::Error;

use crate::channel::Endpoint;
use crate::config::ConfigError;
use crate::packet::{FlitKind, PacketId};
use crate::types::{Cycle, Priority};

/// Errors raised while building a topology or resolving routes on it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TopologyError {
    #[error("unknown node: {0}")]
    UnknownNode(String),

    #[error("duplicate node id: {0}")]
    DuplicateNode(String),

    #[error("nodes {first} and {second} share position ({x}, {y})")]
    DuplicatePosition {
        first: String,
        second: String,
        x: i64,
        y: i64,
    },

    #[error("no router at position ({x}, {y})")]
    MissingRouter { x: i64, y: i64 },

    #[error("no edge between {0} and {1}")]
    MissingEdge(String, String),

    #[error("route is empty")]
    EmptyRoute,

    #[error("route visits {0} more than once")]
    RepeatedNode(String),
}

/// Protocol invariant violations inside the flow-control machinery.
///
/// Any of these indicates a bug in credit accounting or arbitration rather
/// than bad input, and aborts the run.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FlowControlError {
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("priority {priority} outside 1..={max_priority}")]
    InvalidPriority {
        priority: Priority,
        max_priority: Priority,
    },

    #[error("buffer has no capacity for priority {priority}")]
    BufferNoCapacity { priority: Priority },

    #[error("port has no credit for priority {priority}")]
    PortNoCredit { priority: Priority },

    #[error("link {src} -> {dst} already carries its bandwidth of flits this cycle")]
    ChannelFull { src: Endpoint, dst: Endpoint },

    #[error("credit return for priority {priority} exceeds capacity {capacity}")]
    CreditOverflow { priority: Priority, capacity: usize },

    #[error("router {router} has no output port towards {next_hop}")]
    NoPort { router: String, next_hop: Endpoint },

    #[error("router {router} received a {kind} flit of {packet} before its header")]
    MisorderedPacket {
        router: String,
        packet: PacketId,
        kind: FlitKind,
    },

    #[error("{kind} flit of {packet} set twice")]
    FlitAlreadySet { packet: PacketId, kind: FlitKind },

    #[error("{kind} flit of {packet} missing at reconstruction")]
    FlitUnset { packet: PacketId, kind: FlitKind },

    #[error("expected a {expected} flit, got {found} of {packet}")]
    UnexpectedFlit {
        packet: PacketId,
        expected: FlitKind,
        found: FlitKind,
    },

    #[error("router {router} is not on the route of {packet}")]
    NotOnRoute { router: String, packet: PacketId },

    #[error(
        "credit leak on {src} -> {dst} priority {priority}: accounted {accounted}, capacity {capacity}"
    )]
    CreditLeak {
        src: Endpoint,
        dst: Endpoint,
        priority: Priority,
        accounted: usize,
        capacity: usize,
    },
}

/// Top-level error of a simulation run.
#[derive(Error, Debug)]
pub enum SimError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("topology error: {0}")]
    Topology(#[from] TopologyError),

    #[error("flow control error: {0}")]
    FlowControl(#[from] FlowControlError),

    #[error("arrived packet {packet} does not match its transmitted record: {detail}")]
    Consistency { packet: PacketId, detail: String },

    #[error("packet {0} arrived without a transmitted record")]
    UnknownPacket(PacketId),

    #[error("simulation cancelled at cycle {cycle}")]
    Cancelled { cycle: Cycle },
}

/// Result type for simulation operations.
pub type SimResult<T> = Result<T, SimError>;
