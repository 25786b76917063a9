//! The cycle loop.
//!
//! A [`Simulator`] owns the network, the traffic flows and the packet
//! records of one scenario. Each call to [`Simulator::step`] simulates one
//! cycle:
//!
//! 1. every flow that releases in this cycle hands a packet to its source
//!    interface, and the packet is recorded as transmitted,
//! 2. the network advances by one cycle,
//! 3. packets completed at their destination are matched against their
//!    transmitted records.
//!
//! [`Simulator::run`] repeats this up to the configured cycle limit and
//! turns the records into [`SimResults`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::analysis::{AnalysisFlow, AnalysisResults, Analyzer};
use crate::config::{RouteSource, ScenarioConfig};
use crate::error::{SimError, SimResult};
use crate::flow::TrafficFlow;
use crate::network::Network;
use crate::probe::{Probe, SimEvent, TracingProbe};
use crate::records::Records;
use crate::stats::{SimResults, Timer};
use crate::topology::{NodeId, Topology};
use crate::types::Cycle;

/// Cooperative cancellation flag, checked between cycles.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. The run stops before its next cycle.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Simulation of one scenario.
pub struct Simulator {
    config: ScenarioConfig,
    topology: Topology,
    network: Network,
    flows: Vec<TrafficFlow>,
    records: Records,
    probe: Arc<dyn Probe>,
    /// Next cycle to simulate
    cycle: Cycle,
}

impl std::fmt::Debug for Simulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Simulator")
            .field("cycle", &self.cycle)
            .field("nodes", &self.topology.len())
            .field("flows", &self.flows.len())
            .field("records", &self.records.counts())
            .finish()
    }
}

impl Simulator {
    /// Validates a scenario and builds its topology, routes and network.
    pub fn new(config: &ScenarioConfig) -> SimResult<Self> {
        config.validate()?;
        let sim = &config.simulation;

        let topology = Topology::from_config(&config.topology)?;
        let mut flows = Vec::with_capacity(config.flows.len());
        for (index, flow) in config.flows.iter().enumerate() {
            let route = resolve_route(&topology, flow.route_source()?)?;
            topology.validate_route(&route)?;
            flows.push(TrafficFlow::new(flow, route, sim.seed, index));
        }
        let network = Network::new(&topology, sim)?;

        tracing::debug!(
            nodes = topology.len(),
            edges = topology.edges().len(),
            flows = flows.len(),
            "simulator built"
        );

        Ok(Self {
            config: config.clone(),
            topology,
            network,
            flows,
            records: Records::new(),
            probe: Arc::new(TracingProbe),
            cycle: 0,
        })
    }

    /// Replaces the event sink. Events go to `tracing` by default.
    pub fn with_probe(mut self, probe: Arc<dyn Probe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn config(&self) -> &ScenarioConfig {
        &self.config
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn network(&self) -> &Network {
        &self.network
    }

    pub fn flows(&self) -> &[TrafficFlow] {
        &self.flows
    }

    pub fn records(&self) -> &Records {
        &self.records
    }

    /// Next cycle to be simulated, which is also the number of cycles done.
    pub fn cycle(&self) -> Cycle {
        self.cycle
    }

    /// Simulates one cycle.
    pub fn step(&mut self) -> SimResult<()> {
        let cycle = self.cycle;
        self.release_packets(cycle)?;
        self.network.cycle(cycle, self.probe.as_ref())?;
        self.record_arrivals(cycle)?;
        self.cycle += 1;
        Ok(())
    }

    fn release_packets(&mut self, cycle: Cycle) -> SimResult<()> {
        for flow in &mut self.flows {
            let Some(packet) = flow.release(cycle) else {
                continue;
            };
            self.probe.emit(&SimEvent::PacketReleased {
                cycle,
                packet: packet.id.clone(),
                source: flow.route()[0].label.clone(),
            });
            self.network.inject(&packet)?;
            self.records.transmit(packet, flow.period_start(), cycle);
        }
        Ok(())
    }

    fn record_arrivals(&mut self, cycle: Cycle) -> SimResult<()> {
        for packet in self.network.pop_arrived_packets() {
            let id = packet.id.clone();
            let arrival = self.records.arrive(packet, cycle)?;

            if let Some(detail) = arrival.mismatch {
                self.probe.emit(&SimEvent::ConsistencyMismatch {
                    cycle,
                    packet: id.clone(),
                    detail: detail.clone(),
                });
                if self.config.simulation.strict_consistency {
                    return Err(SimError::Consistency { packet: id, detail });
                }
                tracing::error!(cycle, packet = %id, %detail, "arrived packet differs from its record");
            }

            self.probe.emit(&SimEvent::PacketRecorded {
                cycle,
                packet: id,
                latency: arrival.latency,
            });
        }
        Ok(())
    }

    /// Runs up to the configured cycle limit.
    pub fn run(&mut self) -> SimResult<SimResults> {
        self.run_with_cancel(&CancelToken::new())
    }

    /// Runs up to the configured cycle limit, stopping with
    /// [`SimError::Cancelled`] if `cancel` is set between two cycles.
    pub fn run_with_cancel(&mut self, cancel: &CancelToken) -> SimResult<SimResults> {
        let limit = self.config.simulation.cycle_limit;
        tracing::info!(
            cycles = limit,
            flows = self.flows.len(),
            nodes = self.topology.len(),
            "starting simulation"
        );

        let timer = Timer::start();
        while self.cycle < limit {
            if cancel.is_cancelled() {
                tracing::warn!(cycle = self.cycle, "simulation cancelled");
                return Err(SimError::Cancelled { cycle: self.cycle });
            }
            self.step()?;
        }

        let results = SimResults::from_records(
            &self.records,
            self.flows.iter().map(TrafficFlow::id),
            self.cycle,
            timer.elapsed(),
        );
        tracing::info!(
            cycles = self.cycle,
            elapsed_ms = timer.elapsed_ms(),
            routed = results.overall.packets_routed,
            arrived = results.overall.packets_arrived,
            missed = results.overall.packets_exceeded_deadline,
            "simulation finished"
        );
        Ok(results)
    }

    /// Flows in the form the analysis works on, with their resolved routes.
    pub fn analysis_flows(&self) -> Vec<AnalysisFlow> {
        self.config
            .flows
            .iter()
            .zip(&self.flows)
            .map(|(config, flow)| AnalysisFlow::from_config(config, flow.route()))
            .collect()
    }

    /// Runs the latency analysis over the scenario's flows.
    pub fn analyse(&self) -> AnalysisResults {
        Analyzer::new(&self.config.simulation, self.analysis_flows()).run()
    }
}

fn resolve_route(topology: &Topology, source: RouteSource) -> SimResult<Vec<NodeId>> {
    let route = match source {
        RouteSource::Explicit(labels) => topology.route_from_labels(&labels)?,
        RouteSource::Xy { src, dst } => topology.xy_route(&src, &dst)?,
    };
    Ok(route)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ScenarioBuilder, TrafficFlowConfig};
    use crate::error::TopologyError;
    use crate::probe::{NullProbe, RecordingProbe};

    fn line_scenario(cycles: Cycle) -> ScenarioConfig {
        ScenarioBuilder::new()
            .cycle_limit(cycles)
            .max_priority(1)
            .buffer_size(2)
            .flit_size(1)
            .link_bandwidth(1)
            .processing_delay(3)
            .line(3)
            .flow(TrafficFlowConfig::new("t0", 1, 50, 50, 0, 2, &["n0", "n1", "n2"]))
            .build()
            .unwrap()
    }

    #[test]
    fn test_single_packet_latency() {
        let mut sim = Simulator::new(&line_scenario(50))
            .unwrap()
            .with_probe(Arc::new(NullProbe));
        let results = sim.run().unwrap();

        assert_eq!(results.cycles, 50);
        assert_eq!(results.overall.packets_routed, 1);
        assert_eq!(results.overall.packets_arrived, 1);
        assert_eq!(results.overall.worst_latency, Some(13));

        let record = sim.records().arrived_packet("t0", 0).unwrap();
        assert_eq!(record.generation_cycle, 0);
        assert_eq!(record.transmission_cycle, 0);
        assert_eq!(record.received_cycle, Some(12));
    }

    #[test]
    fn test_step_by_step() {
        let mut sim = Simulator::new(&line_scenario(50))
            .unwrap()
            .with_probe(Arc::new(NullProbe));
        for _ in 0..12 {
            sim.step().unwrap();
        }
        assert_eq!(sim.cycle(), 12);
        assert_eq!(sim.records().counts().arrived, 0);
        sim.step().unwrap();
        assert_eq!(sim.records().counts().arrived, 1);
    }

    #[test]
    fn test_events_recorded() {
        let probe = Arc::new(RecordingProbe::new());
        let mut sim = Simulator::new(&line_scenario(20))
            .unwrap()
            .with_probe(probe.clone());
        sim.run().unwrap();

        assert_eq!(
            probe.count(|e| matches!(e, SimEvent::PacketReleased { .. })),
            1
        );
        assert_eq!(
            probe.count(|e| matches!(e, SimEvent::FlitInjected { .. })),
            4
        );
        assert_eq!(
            probe.count(|e| matches!(e, SimEvent::PacketRecorded { latency: 13, .. })),
            1
        );
    }

    #[test]
    fn test_cancel_before_start() {
        let mut sim = Simulator::new(&line_scenario(20))
            .unwrap()
            .with_probe(Arc::new(NullProbe));
        let token = CancelToken::new();
        token.clone().cancel();
        assert!(token.is_cancelled());
        assert!(matches!(
            sim.run_with_cancel(&token),
            Err(SimError::Cancelled { cycle: 0 })
        ));
    }

    #[test]
    fn test_route_errors() {
        let broken = ScenarioBuilder::new()
            .line(3)
            .flow(TrafficFlowConfig::new("t0", 1, 50, 50, 0, 2, &["n0", "n2"]))
            .build()
            .unwrap();
        assert!(matches!(
            Simulator::new(&broken),
            Err(SimError::Topology(_))
        ));

        let unknown = ScenarioBuilder::new()
            .line(3)
            .flow(TrafficFlowConfig::xy("t0", 1, 50, 50, 0, 2, "n0", "n9"))
            .build()
            .unwrap();
        assert!(Simulator::new(&unknown).is_err());

        let looping = ScenarioBuilder::new()
            .line(3)
            .flow(TrafficFlowConfig::new(
                "t0",
                1,
                1000,
                1000,
                0,
                2,
                &["n0", "n1", "n2", "n1", "n0"],
            ))
            .build()
            .unwrap();
        assert!(matches!(
            Simulator::new(&looping),
            Err(SimError::Topology(TopologyError::RepeatedNode(node))) if node == "n1"
        ));
    }

    #[test]
    fn test_analysis_matches_basic_bound() {
        let sim = Simulator::new(&line_scenario(50)).unwrap();
        let flows = sim.analysis_flows();
        assert_eq!(flows[0].route, ["n0", "n1", "n2"]);

        let results = sim.analyse();
        let t0 = results.get("t0").unwrap();
        assert_eq!(t0.basic_latency, 13);
        assert_eq!(t0.shi_and_burns_latency, 13);
        assert!(results.schedulable());
    }
}
