//! # nocsim
//!
//! A cycle-accurate simulator of a priority-aware, credit-based,
//! wormhole-routed Network-on-Chip.
//!
//! Routers, links, virtual channels and network interfaces exchange flits
//! one clock cycle at a time while periodic traffic flows are replayed over
//! a mesh, a line or a hand-placed topology. Every packet is tracked from
//! release to arrival so that per-flow latency and deadline misses can be
//! reported. A closed-form latency bound and the Shi & Burns response-time
//! analysis are available for comparison.
//!
//! ## Design Principles
//!
//! - **Strictly phased cycles**: within a cycle all interfaces transmit, then
//!   all routers run each of their four phases with a barrier in between,
//!   then all interfaces receive. A flit therefore spends at least one cycle
//!   per hop.
//! - **Credit-based flow control**: a flit is only sent when the receiving
//!   virtual channel has space for it, so buffers never overflow. Any
//!   violation of the protocol is reported as a [`FlowControlError`].
//! - **Strict priorities**: lower priority numbers always win arbitration.
//! - **Structured events**: components report what they do as [`SimEvent`]s
//!   through a [`Probe`] instead of writing to a global logger.
//!
//! ## Features
//!
//! - `parallel` - Run each router phase across routers using rayon
//!
//! ## Quick Start
//!
//! ```rust
//! use nocsim::{ScenarioBuilder, Simulator, TrafficFlowConfig};
//!
//! let scenario = ScenarioBuilder::new()
//!     .cycle_limit(200)
//!     .max_priority(1)
//!     .buffer_size(2)
//!     .processing_delay(3)
//!     .mesh(3, 3)
//!     .flow(TrafficFlowConfig::xy("t0", 1, 50, 50, 0, 4, "n0", "n8"))
//!     .build()
//!     .unwrap();
//!
//! let mut sim = Simulator::new(&scenario).unwrap();
//! let results = sim.run().unwrap();
//! assert!(results.schedulable());
//! println!("{}", results.summary());
//! ```
//!
//! ## Configuration-Driven Setup
//!
//! ```rust,ignore
//! use nocsim::{ScenarioConfig, Simulator};
//!
//! let scenario = ScenarioConfig::from_file("scenario.yaml")?;
//! let mut sim = Simulator::new(&scenario)?;
//! let results = sim.run()?;
//! let analysis = sim.analyse();
//! ```

pub mod types;
pub mod error;
pub mod topology;
pub mod packet;
pub mod buffer;
pub mod channel;
pub mod port;
pub mod router;
pub mod interface;
pub mod network;
pub mod flow;
pub mod records;
pub mod stats;
pub mod analysis;
pub mod probe;
pub mod simulator;
pub mod config;

// Re-export commonly used types
pub use types::{Cycle, FlowId, PacketIndex, Priority};
pub use error::{FlowControlError, SimError, SimResult, TopologyError};
pub use topology::{Edge, NodeId, Position, Route, Topology};
pub use packet::{Flit, FlitKind, Packet, PacketId, Reconstructor};
pub use buffer::Buffer;
pub use channel::{Connection, Endpoint, Link};
pub use port::{InputPort, OutputPort};
pub use router::{Router, RouterStats};
pub use interface::{InterfaceStats, NetworkInterface};
pub use network::Network;
pub use flow::TrafficFlow;
pub use records::{PacketRecord, Records};
pub use stats::{SimResults, StatSet, Timer};
pub use analysis::{basic_latency, AnalysisOutcome, AnalysisResult, AnalysisResults, Analyzer};
pub use probe::{NullProbe, Probe, RecordingProbe, SimEvent, TracingProbe};
pub use simulator::{CancelToken, Simulator};
pub use config::{
    flows_from_csv, ConfigError, ScenarioBuilder, ScenarioConfig, SimConfig, TopologyConfig,
    TrafficFlowConfig,
};

/// Initialize the tracing subscriber for logging.
///
/// Call this at the start of your program to enable logging. `RUST_LOG`
/// takes precedence over `level`.
///
/// # Example
///
/// ```rust,ignore
/// nocsim::init_logging("info");
/// ```
pub fn init_logging(level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}
