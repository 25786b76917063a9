//! Priority-partitioned flit buffer.
//!
//! Each input port owns one [`Buffer`], split into one FIFO virtual channel
//! per priority. A virtual channel never holds more flits than the credits
//! its port advertised upstream, so an insert into a full channel is a
//! protocol violation and is reported instead of blocking or dropping.

use std::collections::VecDeque;

use crate::error::FlowControlError;
use crate::packet::Flit;
use crate::types::{vc_index, Priority};

/// Fixed-capacity flit buffer with one FIFO per priority.
#[derive(Clone, Debug)]
pub struct Buffer {
    capacity: usize,
    max_priority: Priority,
    vc_capacity: usize,
    queues: Vec<VecDeque<Flit>>,
}

impl Buffer {
    /// Creates a buffer of `capacity` flits shared evenly by `max_priority`
    /// virtual channels.
    pub fn new(capacity: usize, max_priority: Priority) -> Result<Self, FlowControlError> {
        if capacity == 0 {
            return Err(FlowControlError::InvalidParameter(
                "buffer capacity must be at least 1".into(),
            ));
        }
        if max_priority == 0 {
            return Err(FlowControlError::InvalidParameter(
                "max priority must be at least 1".into(),
            ));
        }
        if capacity % max_priority as usize != 0 {
            return Err(FlowControlError::InvalidParameter(format!(
                "buffer capacity {} is not divisible by max priority {}",
                capacity, max_priority
            )));
        }

        let vc_capacity = capacity / max_priority as usize;
        Ok(Self {
            capacity,
            max_priority,
            vc_capacity,
            queues: (0..max_priority)
                .map(|_| VecDeque::with_capacity(vc_capacity))
                .collect(),
        })
    }

    fn index(&self, priority: Priority) -> Result<usize, FlowControlError> {
        vc_index(priority, self.max_priority).ok_or(FlowControlError::InvalidPriority {
            priority,
            max_priority: self.max_priority,
        })
    }

    /// Appends a flit to the virtual channel of its priority.
    pub fn add_flit(&mut self, flit: Flit) -> Result<(), FlowControlError> {
        let priority = flit.priority();
        let index = self.index(priority)?;
        let queue = &mut self.queues[index];
        if queue.len() >= self.vc_capacity {
            return Err(FlowControlError::BufferNoCapacity { priority });
        }
        queue.push_back(flit);
        Ok(())
    }

    /// Returns the head-of-line flit of a priority, if any.
    pub fn peek_flit(&self, priority: Priority) -> Option<&Flit> {
        let index = vc_index(priority, self.max_priority)?;
        self.queues[index].front()
    }

    /// Removes and returns the head-of-line flit of a priority, if any.
    pub fn pop_flit(&mut self, priority: Priority) -> Option<Flit> {
        let index = vc_index(priority, self.max_priority)?;
        self.queues[index].pop_front()
    }

    /// Number of flits buffered for a priority.
    pub fn len(&self, priority: Priority) -> usize {
        vc_index(priority, self.max_priority)
            .map(|i| self.queues[i].len())
            .unwrap_or(0)
    }

    /// Total number of buffered flits across all priorities.
    pub fn total_len(&self) -> usize {
        self.queues.iter().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.queues.iter().all(VecDeque::is_empty)
    }

    /// Total capacity across all priorities.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Capacity of each virtual channel.
    pub fn vc_capacity(&self) -> usize {
        self.vc_capacity
    }

    pub fn max_priority(&self) -> Priority {
        self.max_priority
    }
}
