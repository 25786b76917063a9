//! Core type definitions for the network simulator.
//!
//! This module defines the scalar types shared by every component of the
//! simulated network.

/// Simulation time in clock cycles.
///
/// All components advance in lock-step, one cycle at a time, so a single
/// cycle counter is the only notion of time in the simulator.
pub type Cycle = u64;

/// Priority class of a flow.
///
/// Priorities start at 1. A lower number means a higher precedence in
/// arbitration, and each priority owns one virtual channel per buffer.
pub type Priority = u32;

/// Identifier of a traffic flow, as given in the scenario configuration.
pub type FlowId = String;

/// Monotonically increasing index of a packet within its flow.
pub type PacketIndex = u64;

/// Converts a priority into the index of its virtual channel.
///
/// Returns `None` for priority 0 or priorities above `max_priority`.
#[inline]
pub fn vc_index(priority: Priority, max_priority: Priority) -> Option<usize> {
    if priority == 0 || priority > max_priority {
        None
    } else {
        Some((priority - 1) as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_aliases() {
        let cycle: Cycle = 1000;
        let priority: Priority = 2;
        let flow: FlowId = "t0".to_string();
        let index: PacketIndex = 7;

        assert_eq!(cycle, 1000);
        assert_eq!(priority, 2);
        assert_eq!(flow, "t0");
        assert_eq!(index, 7);
    }

    #[test]
    fn test_vc_index() {
        assert_eq!(vc_index(1, 4), Some(0));
        assert_eq!(vc_index(4, 4), Some(3));
        assert_eq!(vc_index(0, 4), None);
        assert_eq!(vc_index(5, 4), None);
    }
}
