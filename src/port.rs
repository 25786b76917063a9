//! Input and output ports: the two ends of a [`Link`].
//!
//! The receiving side of a link is an [`InputPort`]. It buffers arriving
//! flits and hands a credit back for every buffer slot it frees. The sending
//! side is an [`OutputPort`], which counts the credits it holds and refuses to
//! send without one.

use crate::buffer::Buffer;
use crate::channel::{Endpoint, Link};
use crate::error::FlowControlError;
use crate::packet::Flit;
use crate::types::{vc_index, Priority};

/// Receiving end of a link.
#[derive(Debug)]
pub struct InputPort {
    link: Link,
    buffer: Buffer,
}

impl InputPort {
    /// Creates an input port and primes the upstream sender with one credit
    /// per buffer slot of every priority.
    pub fn new(link: Link, buffer: Buffer) -> Result<Self, FlowControlError> {
        {
            let mut conn = link.lock();
            for priority in 1..=buffer.max_priority() {
                conn.return_credits(priority, buffer.vc_capacity())?;
            }
        }
        Ok(Self { link, buffer })
    }

    /// Moves every flit waiting on the link into the buffer.
    ///
    /// Returns the number of flits read.
    pub fn read_into_buffer(&mut self) -> Result<usize, FlowControlError> {
        let flits = self.link.lock().drain_flits();
        let count = flits.len();
        for flit in flits {
            self.buffer.add_flit(flit)?;
        }
        Ok(count)
    }

    /// Returns the head-of-line flit of a priority.
    pub fn peek(&self, priority: Priority) -> Option<&Flit> {
        self.buffer.peek_flit(priority)
    }

    /// Pops the head-of-line flit of a priority and returns its credit
    /// upstream.
    pub fn read_out_of_buffer(
        &mut self,
        priority: Priority,
    ) -> Result<Option<Flit>, FlowControlError> {
        let Some(flit) = self.buffer.pop_flit(priority) else {
            return Ok(None);
        };
        self.link.lock().return_credit(priority)?;
        Ok(Some(flit))
    }

    pub fn buffer(&self) -> &Buffer {
        &self.buffer
    }

    pub fn link(&self) -> &Link {
        &self.link
    }

    /// Endpoint feeding this port.
    pub fn src(&self) -> Endpoint {
        self.link.lock().src().clone()
    }
}

/// Sending end of a link.
#[derive(Debug)]
pub struct OutputPort {
    link: Link,
    max_priority: Priority,
    credits: Vec<usize>,
}

impl OutputPort {
    /// Creates an output port holding no credit.
    pub fn new(link: Link) -> Self {
        let max_priority = link.lock().max_priority();
        Self {
            link,
            max_priority,
            credits: vec![0; max_priority as usize],
        }
    }

    /// Collects credits returned by the receiver.
    pub fn update_credits(&mut self) {
        let mut conn = self.link.lock();
        for (index, credit) in self.credits.iter_mut().enumerate() {
            *credit += conn.take_credits(index as Priority + 1);
        }
    }

    /// Credits currently held for a priority.
    pub fn credit(&self, priority: Priority) -> usize {
        vc_index(priority, self.max_priority)
            .map(|i| self.credits[i])
            .unwrap_or(0)
    }

    /// True if a flit of `priority` may be sent this cycle.
    pub fn allowed_to_send(&self, priority: Priority) -> bool {
        self.credit(priority) > 0 && self.link.lock().has_space()
    }

    /// Sends a flit, spending one credit of its priority.
    pub fn send_flit(&mut self, flit: Flit) -> Result<(), FlowControlError> {
        let priority = flit.priority();
        if !self.allowed_to_send(priority) {
            return Err(FlowControlError::PortNoCredit { priority });
        }
        self.link.lock().send(flit)?;
        if let Some(index) = vc_index(priority, self.max_priority) {
            self.credits[index] -= 1;
        }
        Ok(())
    }

    pub fn link(&self) -> &Link {
        &self.link
    }

    /// Endpoint this port sends to.
    pub fn dst(&self) -> Endpoint {
        self.link.lock().dst().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::Connection;
    use crate::packet::PacketId;

    fn link(bandwidth: usize, vc_capacity: usize, max_priority: Priority) -> Link {
        Connection::new(
            Endpoint::Router("a".into()),
            Endpoint::Router("b".into()),
            bandwidth,
            vc_capacity,
            max_priority,
        )
        .into_link()
    }

    fn tail(index: u64, priority: Priority) -> Flit {
        Flit::Tail {
            packet: PacketId::new("t", index),
            priority,
        }
    }

    #[test]
    fn test_input_port_primes_credits() {
        let link = link(1, 2, 2);
        let _input = InputPort::new(link.clone(), Buffer::new(4, 2).unwrap()).unwrap();
        let mut output = OutputPort::new(link);

        assert_eq!(output.credit(1), 0);
        output.update_credits();
        assert_eq!(output.credit(1), 2);
        assert_eq!(output.credit(2), 2);
    }

    #[test]
    fn test_send_without_credit_fails() {
        let mut output = OutputPort::new(link(1, 2, 1));
        assert!(!output.allowed_to_send(1));
        assert_eq!(
            output.send_flit(tail(0, 1)),
            Err(FlowControlError::PortNoCredit { priority: 1 })
        );
    }

    #[test]
    fn test_credit_cycle() {
        let link = link(1, 1, 1);
        let mut input = InputPort::new(link.clone(), Buffer::new(1, 1).unwrap()).unwrap();
        let mut output = OutputPort::new(link);
        output.update_credits();

        output.send_flit(tail(0, 1)).unwrap();
        assert_eq!(output.credit(1), 0);
        assert!(!output.allowed_to_send(1));

        assert_eq!(input.read_into_buffer().unwrap(), 1);
        assert_eq!(input.peek(1).unwrap().packet().index, 0);

        let flit = input.read_out_of_buffer(1).unwrap().unwrap();
        assert_eq!(flit.packet().index, 0);
        assert!(input.read_out_of_buffer(1).unwrap().is_none());

        output.update_credits();
        assert_eq!(output.credit(1), 1);
    }

    #[test]
    fn test_bandwidth_gates_sending() {
        let link = link(1, 2, 1);
        let _input = InputPort::new(link.clone(), Buffer::new(2, 1).unwrap()).unwrap();
        let mut output = OutputPort::new(link);
        output.update_credits();

        output.send_flit(tail(0, 1)).unwrap();
        assert_eq!(output.credit(1), 1);
        assert!(!output.allowed_to_send(1));
    }
}
