//! Analytic worst-case latency bounds.
//!
//! Two bounds are computed per flow:
//!
//! - the *basic latency*, the time a packet needs to cross its route with
//!   no contention at all:
//!   `ceil((packet_size + 2 * flit_size) / flit_size) * ceil(flit_size / link_bandwidth)
//!   + hops * processing_delay`, where `hops` is the number of routers on the
//!   route;
//! - the *Shi & Burns* response time, the smallest fixed point of
//!   `R = C_i + sum_j ceil((R + J_j + JI_j) / T_j) * C_j` over the flows `j`
//!   directly interfering with flow `i`. `C` is the basic latency, `J` the
//!   release jitter, `T` the period and `JI_j = R_j - C_j` the interference
//!   jitter of `j`.
//!
//! Flow `j` directly interferes with flow `i` if its priority is the same or
//! more urgent and the two routes share a directed link, a source node or a
//! destination node. Indirect interferers are the direct interferers of
//! direct interferers that do not themselves interfere directly.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::io::Write;
use std::path::Path;

use crate::config::{SimConfig, TrafficFlowConfig};
use crate::topology::NodeId;
use crate::types::{Cycle, FlowId, Priority};

/// Default bound on Shi & Burns iterations per flow.
pub const DEFAULT_MAX_ITERATIONS: usize = 10_000;

/// Basic (contention-free) latency bound of a packet.
pub fn basic_latency(
    packet_size: u64,
    flit_size: u64,
    link_bandwidth: u64,
    processing_delay: u64,
    hops: u64,
) -> Cycle {
    let flits = (packet_size + 2 * flit_size).div_ceil(flit_size);
    let cycles_per_flit = flit_size.div_ceil(link_bandwidth);
    flits * cycles_per_flit + hops * processing_delay
}

/// Flow parameters used by the analysis.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisFlow {
    pub id: FlowId,
    pub priority: Priority,
    pub period: Cycle,
    pub deadline: Cycle,
    pub jitter: Cycle,
    pub packet_size: u64,
    /// Node labels, source first
    pub route: Vec<String>,
}

impl AnalysisFlow {
    /// Combines a flow configuration with its resolved route.
    pub fn from_config(config: &TrafficFlowConfig, route: &[NodeId]) -> Self {
        Self {
            id: config.id.clone(),
            priority: config.priority,
            period: config.period,
            deadline: config.deadline,
            jitter: config.jitter,
            packet_size: config.packet_size,
            route: route.iter().map(|n| n.label.clone()).collect(),
        }
    }

    /// Directed links traversed by the route.
    fn links(&self) -> HashSet<(&str, &str)> {
        self.route
            .windows(2)
            .map(|w| (w[0].as_str(), w[1].as_str()))
            .collect()
    }

    /// True if the two routes compete for a link or an endpoint.
    fn shares_resource(&self, other: &AnalysisFlow) -> bool {
        if self.route.first() == other.route.first() || self.route.last() == other.route.last() {
            return true;
        }
        let links = self.links();
        other
            .route
            .windows(2)
            .any(|w| links.contains(&(w[0].as_str(), w[1].as_str())))
    }
}

/// How the Shi & Burns iteration for a flow ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisOutcome {
    /// A fixed point was reached
    Converged,
    /// The response time grew beyond the deadline
    DeadlineExceeded,
    /// The iteration bound was hit first
    Inconclusive,
}

/// Analysis result of one flow.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub basic_latency: Cycle,
    pub shi_and_burns_latency: Cycle,
    pub direct_interference_count: usize,
    pub indirect_interference_count: usize,
    pub outcome: AnalysisOutcome,
    pub jitter: Cycle,
    pub deadline: Cycle,
}

impl AnalysisResult {
    /// True if the bound converged and jitter plus response time stays
    /// below the deadline.
    pub fn schedulable(&self) -> bool {
        self.outcome == AnalysisOutcome::Converged
            && self.jitter + self.shi_and_burns_latency < self.deadline
    }
}

/// Analysis results keyed by flow id.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisResults {
    pub flows: BTreeMap<FlowId, AnalysisResult>,
}

impl AnalysisResults {
    pub fn get(&self, flow: &str) -> Option<&AnalysisResult> {
        self.flows.get(flow)
    }

    /// True if every flow is schedulable.
    pub fn schedulable(&self) -> bool {
        self.flows.values().all(AnalysisResult::schedulable)
    }

    /// Exports per-flow results to CSV.
    pub fn to_csv(&self) -> String {
        let mut csv = String::new();
        csv.push_str("flow,basic_latency,shi_and_burns_latency,direct_interference,indirect_interference,outcome,schedulable\n");
        for (id, r) in &self.flows {
            csv.push_str(&format!(
                "{},{},{},{},{},{:?},{}\n",
                id,
                r.basic_latency,
                r.shi_and_burns_latency,
                r.direct_interference_count,
                r.indirect_interference_count,
                r.outcome,
                r.schedulable(),
            ));
        }
        csv
    }

    /// Exports per-flow results to a CSV file.
    pub fn to_csv_file<P: AsRef<Path>>(&self, path: P) -> std::io::Result<()> {
        std::fs::write(path, self.to_csv())
    }

    /// Writes a human-readable summary to a writer.
    pub fn write_summary<W: Write>(&self, mut w: W) -> std::io::Result<()> {
        writeln!(w, "=== Latency Analysis ===")?;
        for (id, r) in &self.flows {
            writeln!(
                w,
                "Flow {}: basic {}, Shi & Burns {} ({:?}), interference {} direct / {} indirect, {}",
                id,
                r.basic_latency,
                r.shi_and_burns_latency,
                r.outcome,
                r.direct_interference_count,
                r.indirect_interference_count,
                if r.schedulable() { "schedulable" } else { "NOT schedulable" },
            )?;
        }
        Ok(())
    }

    /// Returns a summary string.
    pub fn summary(&self) -> String {
        let mut buf = Vec::new();
        let _ = self.write_summary(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    }
}

/// Memoised state of one flow during the analysis.
#[derive(Clone, Copy, Debug)]
enum Slot {
    Pending,
    InProgress,
    Done(Cycle, AnalysisOutcome),
}

/// Batch latency analysis over a set of flows.
#[derive(Clone, Debug)]
pub struct Analyzer {
    flit_size: u64,
    link_bandwidth: u64,
    processing_delay: u64,
    max_iterations: usize,
    flows: Vec<AnalysisFlow>,
    direct: Vec<Vec<usize>>,
}

impl Analyzer {
    /// Prepares the analysis, computing the direct interference sets.
    pub fn new(sim: &SimConfig, flows: Vec<AnalysisFlow>) -> Self {
        let direct = (0..flows.len())
            .map(|i| {
                (0..flows.len())
                    .filter(|&j| {
                        j != i
                            && flows[j].priority <= flows[i].priority
                            && flows[i].shares_resource(&flows[j])
                    })
                    .collect()
            })
            .collect();

        Self {
            flit_size: sim.flit_size,
            link_bandwidth: sim.link_bandwidth as u64,
            processing_delay: sim.processing_delay,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            flows,
            direct,
        }
    }

    /// Sets the iteration bound per flow.
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn flows(&self) -> &[AnalysisFlow] {
        &self.flows
    }

    fn index(&self, id: &str) -> Option<usize> {
        self.flows.iter().position(|f| f.id == id)
    }

    /// Basic latency of flow `i`.
    fn basic(&self, i: usize) -> Cycle {
        let flow = &self.flows[i];
        basic_latency(
            flow.packet_size,
            self.flit_size,
            self.link_bandwidth,
            self.processing_delay,
            flow.route.len() as u64,
        )
    }

    /// Ids of the flows directly interfering with `flow`.
    pub fn direct_interference(&self, flow: &str) -> Vec<&str> {
        self.index(flow)
            .map(|i| self.direct[i].iter().map(|&j| self.flows[j].id.as_str()).collect())
            .unwrap_or_default()
    }

    /// Ids of the flows indirectly interfering with `flow`.
    pub fn indirect_interference(&self, flow: &str) -> Vec<&str> {
        self.index(flow)
            .map(|i| {
                self.indirect(i)
                    .into_iter()
                    .map(|j| self.flows[j].id.as_str())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn indirect(&self, i: usize) -> Vec<usize> {
        let direct: HashSet<usize> = self.direct[i].iter().copied().collect();
        let mut indirect: Vec<usize> = self.direct[i]
            .iter()
            .flat_map(|&j| self.direct[j].iter().copied())
            .filter(|&k| k != i && !direct.contains(&k))
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        indirect.sort_unstable();
        indirect
    }

    /// Runs the analysis for every flow.
    pub fn run(&self) -> AnalysisResults {
        let mut slots = vec![Slot::Pending; self.flows.len()];
        let mut results = AnalysisResults::default();

        for i in 0..self.flows.len() {
            let (latency, outcome) = self.response_time(i, &mut slots);
            let flow = &self.flows[i];
            tracing::debug!(flow = %flow.id, latency, ?outcome, "shi & burns");
            results.flows.insert(
                flow.id.clone(),
                AnalysisResult {
                    basic_latency: self.basic(i),
                    shi_and_burns_latency: latency,
                    direct_interference_count: self.direct[i].len(),
                    indirect_interference_count: self.indirect(i).len(),
                    outcome,
                    jitter: flow.jitter,
                    deadline: flow.deadline,
                },
            );
        }
        results
    }

    /// Shi & Burns response time of flow `i`, memoised in `slots`.
    ///
    /// A flow whose analysis is still on the call stack contributes no
    /// interference jitter, which breaks cycles between flows of equal
    /// priority.
    fn response_time(&self, i: usize, slots: &mut [Slot]) -> (Cycle, AnalysisOutcome) {
        if let Slot::Done(latency, outcome) = slots[i] {
            return (latency, outcome);
        }
        slots[i] = Slot::InProgress;

        let interferers: Vec<(Cycle, Cycle, Cycle, Cycle)> = self.direct[i]
            .iter()
            .map(|&j| {
                let basic = self.basic(j);
                let interference_jitter = match slots[j] {
                    Slot::InProgress => 0,
                    _ => self.response_time(j, slots).0.saturating_sub(basic),
                };
                let flow = &self.flows[j];
                (basic, flow.jitter, interference_jitter, flow.period)
            })
            .collect();

        let basic = self.basic(i);
        let deadline = self.flows[i].deadline;
        let mut latency = basic;
        let mut outcome = AnalysisOutcome::Inconclusive;

        for _ in 0..self.max_iterations {
            let next = basic
                + interferers
                    .iter()
                    .map(|&(c, j, ji, t)| (latency + j + ji).div_ceil(t) * c)
                    .sum::<Cycle>();
            if next == latency {
                outcome = AnalysisOutcome::Converged;
                break;
            }
            latency = next;
            if latency > deadline {
                outcome = AnalysisOutcome::DeadlineExceeded;
                break;
            }
        }

        slots[i] = Slot::Done(latency, outcome);
        (latency, outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sim() -> SimConfig {
        SimConfig {
            flit_size: 4,
            link_bandwidth: 4,
            processing_delay: 6,
            buffer_size: 4,
            ..SimConfig::default()
        }
    }

    fn flow(id: &str, priority: Priority, period: Cycle, route: &[&str]) -> AnalysisFlow {
        AnalysisFlow {
            id: id.into(),
            priority,
            period,
            deadline: period,
            jitter: 0,
            packet_size: 4,
            route: route.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_basic_latency_formula() {
        assert_eq!(basic_latency(4, 4, 4, 6, 3), 21);
        // 3-node line used by the end-to-end scenario.
        assert_eq!(basic_latency(2, 1, 1, 3, 3), 13);
        // Narrow links need several cycles per flit.
        assert_eq!(basic_latency(8, 4, 2, 1, 2), 4 * 2 + 2);
    }

    #[test]
    fn test_single_flow_converges_to_basic() {
        let results = Analyzer::new(&sim(), vec![flow("a", 1, 100, &["n0", "n1", "n2"])]).run();
        let a = results.get("a").unwrap();
        assert_eq!(a.basic_latency, 21);
        assert_eq!(a.shi_and_burns_latency, 21);
        assert_eq!(a.outcome, AnalysisOutcome::Converged);
        assert!(results.schedulable());
    }

    #[test]
    fn test_direct_and_indirect_interference() {
        let analyzer = Analyzer::new(
            &sim(),
            vec![
                flow("a", 1, 50, &["n0", "n1"]),
                flow("b", 2, 100, &["n0", "n1", "n2"]),
                flow("c", 3, 200, &["n1", "n2", "n3"]),
            ],
        );
        assert!(analyzer.direct_interference("a").is_empty());
        assert_eq!(analyzer.direct_interference("b"), ["a"]);
        assert_eq!(analyzer.direct_interference("c"), ["b"]);
        assert_eq!(analyzer.indirect_interference("c"), ["a"]);

        let results = analyzer.run();
        // a: alone, 3 flits + 2 hops * 6.
        assert_eq!(results.get("a").unwrap().shi_and_burns_latency, 15);
        // b: 21 + ceil(36 / 50) * 15.
        assert_eq!(results.get("b").unwrap().shi_and_burns_latency, 36);
        // c: 21 + ceil((42 + 15) / 100) * 21, with b's interference jitter 15.
        let c = results.get("c").unwrap();
        assert_eq!(c.shi_and_burns_latency, 42);
        assert_eq!(c.direct_interference_count, 1);
        assert_eq!(c.indirect_interference_count, 1);
        assert!(results.schedulable());
    }

    #[test]
    fn test_lower_priority_does_not_interfere() {
        let analyzer = Analyzer::new(
            &sim(),
            vec![
                flow("hi", 1, 100, &["n0", "n1", "n2"]),
                flow("lo", 2, 200, &["n1", "n2"]),
            ],
        );
        assert!(analyzer.direct_interference("hi").is_empty());
        let results = analyzer.run();
        assert_eq!(results.get("hi").unwrap().shi_and_burns_latency, 21);
        assert_eq!(results.get("lo").unwrap().shi_and_burns_latency, 15 + 21);
    }

    #[test]
    fn test_opposite_directions_do_not_share_links() {
        let analyzer = Analyzer::new(
            &sim(),
            vec![
                flow("east", 1, 100, &["n0", "n1", "n2"]),
                flow("west", 1, 100, &["n2", "n1", "n0"]),
            ],
        );
        assert!(analyzer.direct_interference("east").is_empty());
        assert!(analyzer.direct_interference("west").is_empty());
    }

    #[test]
    fn test_deadline_exceeded() {
        let mut victim = flow("y", 2, 100, &["n0", "n1", "n2"]);
        victim.deadline = 30;
        let results = Analyzer::new(&sim(), vec![flow("x", 1, 16, &["n0", "n1"]), victim]).run();

        let y = results.get("y").unwrap();
        assert_eq!(y.outcome, AnalysisOutcome::DeadlineExceeded);
        // 21 + ceil(21 / 16) * 15
        assert_eq!(y.shi_and_burns_latency, 51);
        assert!(!y.schedulable());
        assert!(!results.schedulable());
    }

    #[test]
    fn test_iteration_bound_is_inconclusive() {
        let results = Analyzer::new(
            &sim(),
            vec![
                flow("a", 1, 50, &["n0", "n1"]),
                flow("b", 2, 100, &["n0", "n1", "n2"]),
            ],
        )
        .with_max_iterations(1)
        .run();
        assert_eq!(results.get("a").unwrap().outcome, AnalysisOutcome::Converged);
        assert_eq!(results.get("b").unwrap().outcome, AnalysisOutcome::Inconclusive);
    }

    #[test]
    fn test_equal_priority_cycle_terminates() {
        let results = Analyzer::new(
            &sim(),
            vec![
                flow("p", 1, 100, &["n0", "n1", "n2"]),
                flow("q", 1, 100, &["n0", "n1", "n2"]),
            ],
        )
        .run();
        // q sees p with no interference jitter while p is in progress.
        assert_eq!(results.get("q").unwrap().shi_and_burns_latency, 42);
        // p sees q's finished response time: JI = 42 - 21.
        assert_eq!(results.get("p").unwrap().shi_and_burns_latency, 42);
        assert_eq!(results.get("p").unwrap().direct_interference_count, 1);
    }

    #[test]
    fn test_csv_and_summary() {
        let results = Analyzer::new(&sim(), vec![flow("a", 1, 100, &["n0", "n1", "n2"])]).run();
        assert!(results.to_csv().contains("a,21,21,0,0,Converged,true"));
        assert!(results.summary().contains("Flow a: basic 21"));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("analysis.csv");
        results.to_csv_file(&path).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), results.to_csv());
    }
}
