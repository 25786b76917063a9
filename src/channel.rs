//! Unidirectional links between routers and network interfaces.
//!
//! A [`Connection`] carries flits from its source endpoint to its destination
//! endpoint, at most `bandwidth` flits per cycle, and carries credits back in
//! the opposite direction, one counter per priority. Both directions are
//! plain bounded queues: exceeding a bound is an error, never a wait.
//!
//! Each side of a connection is owned by a different component, so the
//! connection itself is shared through a [`Link`] handle.
//!
//! # Example
//!
//! ```
//! use nocsim::channel::{Connection, Endpoint};
//! use nocsim::packet::{Flit, PacketId};
//!
//! let mut conn = Connection::new(
//!     Endpoint::Router("n0".into()),
//!     Endpoint::Router("n1".into()),
//!     1, // bandwidth
//!     2, // credits per priority
//!     1, // max priority
//! );
//!
//! let flit = Flit::Tail { packet: PacketId::new("t0", 0), priority: 1 };
//! conn.send(flit.clone()).unwrap();
//! assert!(!conn.has_space());
//! assert!(conn.send(flit).is_err());
//! assert_eq!(conn.drain_flits().len(), 1);
//! ```

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use crate::error::FlowControlError;
use crate::packet::Flit;
use crate::types::{vc_index, Priority};

/// One end of a connection.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Endpoint {
    /// The router of the named node
    Router(String),
    /// The network interface of the named node
    Interface(String),
}

impl Endpoint {
    /// Label of the node this endpoint belongs to.
    pub fn node(&self) -> &str {
        match self {
            Endpoint::Router(node) | Endpoint::Interface(node) => node,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Router(node) => write!(f, "router:{}", node),
            Endpoint::Interface(node) => write!(f, "ni:{}", node),
        }
    }
}

/// Counters kept by a connection over its lifetime.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionStats {
    /// Flits accepted by `send`
    pub flits_sent: u64,
    /// Credits accepted by `return_credit`
    pub credits_returned: u64,
    /// Largest number of flits in flight at once
    pub peak_flits: usize,
}

/// A unidirectional flit link with a reverse credit path.
#[derive(Debug)]
pub struct Connection {
    src: Endpoint,
    dst: Endpoint,
    bandwidth: usize,
    vc_capacity: usize,
    max_priority: Priority,
    /// Flits sent this cycle, not yet read by the receiver
    flits: VecDeque<Flit>,
    /// Credits returned by the receiver, not yet collected by the sender
    credits: Vec<usize>,
    stats: ConnectionStats,
}

/// Shared handle to a connection.
pub type Link = Arc<Mutex<Connection>>;

impl Connection {
    /// Creates a connection from `src` to `dst`.
    ///
    /// # Arguments
    /// * `bandwidth` - Maximum number of flits in flight per cycle
    /// * `vc_capacity` - Receiver buffer slots per priority; bounds the
    ///   credits that may be pending for each priority
    /// * `max_priority` - Number of priorities (virtual channels)
    pub fn new(
        src: Endpoint,
        dst: Endpoint,
        bandwidth: usize,
        vc_capacity: usize,
        max_priority: Priority,
    ) -> Self {
        Self {
            src,
            dst,
            bandwidth,
            vc_capacity,
            max_priority,
            flits: VecDeque::with_capacity(bandwidth),
            credits: vec![0; max_priority as usize],
            stats: ConnectionStats::default(),
        }
    }

    /// Wraps the connection in a shared [`Link`] handle.
    pub fn into_link(self) -> Link {
        Arc::new(Mutex::new(self))
    }

    fn index(&self, priority: Priority) -> Result<usize, FlowControlError> {
        vc_index(priority, self.max_priority).ok_or(FlowControlError::InvalidPriority {
            priority,
            max_priority: self.max_priority,
        })
    }

    pub fn src(&self) -> &Endpoint {
        &self.src
    }

    pub fn dst(&self) -> &Endpoint {
        &self.dst
    }

    pub fn bandwidth(&self) -> usize {
        self.bandwidth
    }

    pub fn vc_capacity(&self) -> usize {
        self.vc_capacity
    }

    pub fn max_priority(&self) -> Priority {
        self.max_priority
    }

    /// Returns true if another flit fits in this cycle's bandwidth.
    pub fn has_space(&self) -> bool {
        self.flits.len() < self.bandwidth
    }

    /// Puts a flit on the link.
    pub fn send(&mut self, flit: Flit) -> Result<(), FlowControlError> {
        if !self.has_space() {
            return Err(FlowControlError::ChannelFull {
                src: self.src.clone(),
                dst: self.dst.clone(),
            });
        }
        self.flits.push_back(flit);
        self.stats.flits_sent += 1;
        self.stats.peak_flits = self.stats.peak_flits.max(self.flits.len());
        Ok(())
    }

    /// Removes all flits currently on the link, in send order.
    pub fn drain_flits(&mut self) -> Vec<Flit> {
        self.flits.drain(..).collect()
    }

    /// Number of flits of a priority currently on the link.
    pub fn flits_in_flight(&self, priority: Priority) -> usize {
        self.flits
            .iter()
            .filter(|f| f.priority() == priority)
            .count()
    }

    /// Total number of flits currently on the link.
    pub fn len(&self) -> usize {
        self.flits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flits.is_empty()
    }

    /// Returns one credit for a priority to the sender.
    pub fn return_credit(&mut self, priority: Priority) -> Result<(), FlowControlError> {
        self.return_credits(priority, 1)
    }

    /// Returns `count` credits for a priority to the sender.
    pub fn return_credits(
        &mut self,
        priority: Priority,
        count: usize,
    ) -> Result<(), FlowControlError> {
        let index = self.index(priority)?;
        if self.credits[index] + count > self.vc_capacity {
            return Err(FlowControlError::CreditOverflow {
                priority,
                capacity: self.vc_capacity,
            });
        }
        self.credits[index] += count;
        self.stats.credits_returned += count as u64;
        Ok(())
    }

    /// Collects all pending credits of a priority.
    pub fn take_credits(&mut self, priority: Priority) -> usize {
        match vc_index(priority, self.max_priority) {
            Some(index) => std::mem::take(&mut self.credits[index]),
            None => 0,
        }
    }

    /// Number of credits of a priority waiting to be collected.
    pub fn pending_credits(&self, priority: Priority) -> usize {
        vc_index(priority, self.max_priority)
            .map(|i| self.credits[i])
            .unwrap_or(0)
    }

    pub fn stats(&self) -> &ConnectionStats {
        &self.stats
    }

    /// Exports connection state as JSON.
    pub fn export_stats(&self) -> serde_json::Value {
        serde_json::json!({
            "src": self.src.to_string(),
            "dst": self.dst.to_string(),
            "flits_sent": self.stats.flits_sent,
            "credits_returned": self.stats.credits_returned,
            "peak_flits": self.stats.peak_flits,
        })
    }
}
