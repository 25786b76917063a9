//! Simulation results and their export formats.
//!
//! Results are computed once from the packet [`Records`] at the end of a run
//! and can be exported as JSON, CSV or a human-readable summary.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;
use std::time::Duration;

use crate::records::{PacketRecord, Records};
use crate::types::{Cycle, FlowId};

/// Packet counts and latency figures for a set of packets.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StatSet {
    /// Packets released into the network
    pub packets_routed: u64,
    /// Packets whose tail reached the destination
    pub packets_arrived: u64,
    /// Packets still in the network when the run ended
    pub packets_lost: u64,
    /// Arrived packets whose latency exceeded their deadline
    pub packets_exceeded_deadline: u64,
    pub best_latency: Option<Cycle>,
    pub mean_latency: Option<f64>,
    pub worst_latency: Option<Cycle>,
}

impl StatSet {
    /// Computes statistics from arrived and outstanding records.
    pub fn from_records<'a, A, T>(arrived: A, transmitted: T) -> Self
    where
        A: IntoIterator<Item = &'a PacketRecord>,
        T: IntoIterator<Item = &'a PacketRecord>,
    {
        let mut stats = StatSet::default();
        let mut total: u128 = 0;

        for record in arrived {
            let Some(latency) = record.latency() else {
                continue;
            };
            stats.packets_arrived += 1;
            total += latency as u128;
            if record.exceeded_deadline() {
                stats.packets_exceeded_deadline += 1;
            }
            stats.best_latency = Some(stats.best_latency.map_or(latency, |b| b.min(latency)));
            stats.worst_latency = Some(stats.worst_latency.map_or(latency, |w| w.max(latency)));
        }

        stats.packets_lost = transmitted.into_iter().count() as u64;
        stats.packets_routed = stats.packets_arrived + stats.packets_lost;
        if stats.packets_arrived > 0 {
            stats.mean_latency = Some(total as f64 / stats.packets_arrived as f64);
        }
        stats
    }

    /// True if no packet missed its deadline.
    pub fn schedulable(&self) -> bool {
        self.packets_exceeded_deadline == 0
    }
}

fn fmt_opt<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn fmt_mean(value: Option<f64>) -> String {
    value.map(|v| format!("{:.2}", v)).unwrap_or_default()
}

/// Results of a simulation run.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SimResults {
    /// Number of simulated cycles
    pub cycles: Cycle,
    /// Wall-clock duration of the run
    pub duration: Duration,
    /// Statistics over all flows
    pub overall: StatSet,
    /// Statistics per flow
    pub flows: BTreeMap<FlowId, StatSet>,
}

impl SimResults {
    /// Builds results for the given flows from the final records.
    pub fn from_records<'a, I>(records: &Records, flow_ids: I, cycles: Cycle, duration: Duration) -> Self
    where
        I: IntoIterator<Item = &'a FlowId>,
    {
        let flows = flow_ids
            .into_iter()
            .map(|id| {
                let stats = StatSet::from_records(records.arrived_for(id), records.transmitted_for(id));
                (id.clone(), stats)
            })
            .collect();

        let overall = StatSet::from_records(
            records.arrived().values().flat_map(|m| m.values()),
            records.transmitted().values().flat_map(|m| m.values()),
        );

        Self {
            cycles,
            duration,
            overall,
            flows,
        }
    }

    /// True if no packet of any flow missed its deadline.
    pub fn schedulable(&self) -> bool {
        self.overall.schedulable() && self.flows.values().all(StatSet::schedulable)
    }

    /// Exports results to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Exports results to a JSON file.
    pub fn to_json_file<P: AsRef<Path>>(&self, path: P) -> std::io::Result<()> {
        let json = self
            .to_json()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, json)
    }

    /// Exports overall metrics to CSV.
    pub fn to_csv(&self) -> String {
        let mut csv = String::new();
        let o = &self.overall;

        csv.push_str("metric,value\n");
        csv.push_str(&format!("cycles,{}\n", self.cycles));
        csv.push_str(&format!("wall_time_ms,{:.2}\n", self.duration.as_secs_f64() * 1000.0));
        csv.push_str(&format!("packets_routed,{}\n", o.packets_routed));
        csv.push_str(&format!("packets_arrived,{}\n", o.packets_arrived));
        csv.push_str(&format!("packets_lost,{}\n", o.packets_lost));
        csv.push_str(&format!("packets_exceeded_deadline,{}\n", o.packets_exceeded_deadline));
        csv.push_str(&format!("best_latency,{}\n", fmt_opt(o.best_latency)));
        csv.push_str(&format!("mean_latency,{}\n", fmt_mean(o.mean_latency)));
        csv.push_str(&format!("worst_latency,{}\n", fmt_opt(o.worst_latency)));
        csv.push_str(&format!("schedulable,{}\n", self.schedulable()));

        csv
    }

    /// Exports overall metrics to a CSV file.
    pub fn to_csv_file<P: AsRef<Path>>(&self, path: P) -> std::io::Result<()> {
        std::fs::write(path, self.to_csv())
    }

    /// Exports per-flow statistics to CSV.
    pub fn flows_to_csv(&self) -> String {
        let mut csv = String::new();

        csv.push_str("flow,packets_routed,packets_arrived,packets_lost,packets_exceeded_deadline,best_latency,mean_latency,worst_latency,schedulable\n");

        for (id, stats) in &self.flows {
            csv.push_str(&format!(
                "{},{},{},{},{},{},{},{},{}\n",
                id,
                stats.packets_routed,
                stats.packets_arrived,
                stats.packets_lost,
                stats.packets_exceeded_deadline,
                fmt_opt(stats.best_latency),
                fmt_mean(stats.mean_latency),
                fmt_opt(stats.worst_latency),
                stats.schedulable(),
            ));
        }

        csv
    }

    /// Exports per-flow statistics to a CSV file.
    pub fn flows_to_csv_file<P: AsRef<Path>>(&self, path: P) -> std::io::Result<()> {
        std::fs::write(path, self.flows_to_csv())
    }

    /// Writes a human-readable summary to a writer.
    pub fn write_summary<W: Write>(&self, mut w: W) -> std::io::Result<()> {
        let o = &self.overall;

        writeln!(w, "=== Simulation Results ===")?;
        writeln!(w)?;
        writeln!(w, "Cycles: {}", self.cycles)?;
        writeln!(w, "Wall time: {:.2} ms", self.duration.as_secs_f64() * 1000.0)?;
        writeln!(w)?;

        writeln!(w, "--- Overall ---")?;
        writeln!(w, "Packets routed: {}", o.packets_routed)?;
        writeln!(w, "Packets arrived: {}", o.packets_arrived)?;
        writeln!(w, "Packets lost: {}", o.packets_lost)?;
        writeln!(w, "Deadline misses: {}", o.packets_exceeded_deadline)?;
        if let (Some(best), Some(mean), Some(worst)) = (o.best_latency, o.mean_latency, o.worst_latency) {
            writeln!(w, "Latency best/mean/worst: {} / {:.2} / {}", best, mean, worst)?;
        }
        writeln!(w, "Schedulable: {}", self.schedulable())?;
        writeln!(w)?;

        writeln!(w, "--- Flows ---")?;
        for (id, stats) in &self.flows {
            writeln!(
                w,
                "Flow {}: {} routed, {} arrived, {} lost, {} missed",
                id,
                stats.packets_routed,
                stats.packets_arrived,
                stats.packets_lost,
                stats.packets_exceeded_deadline
            )?;
            if let Some(worst) = stats.worst_latency {
                writeln!(w, "  Worst latency: {}", worst)?;
            }
        }

        Ok(())
    }

    /// Returns a summary string.
    pub fn summary(&self) -> String {
        let mut buf = Vec::new();
        // Writing into a Vec cannot fail.
        let _ = self.write_summary(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    }
}

/// A simple timer for measuring wall-clock time.
#[derive(Debug)]
pub struct Timer {
    start: std::time::Instant,
}

impl Timer {
    /// Starts a new timer.
    pub fn start() -> Self {
        Self {
            start: std::time::Instant::now(),
        }
    }

    /// Returns the elapsed time.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Returns elapsed time in milliseconds.
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::start()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{Packet, PacketId};
    use crate::topology::NodeId;

    fn packet(flow: &str, index: u64, deadline: Cycle) -> Packet {
        Packet {
            id: PacketId::new(flow, index),
            priority: 1,
            deadline,
            route: vec![NodeId::new("n0", 0, 0)].into(),
            body_size: 1,
        }
    }

    /// t0: latencies 5 and 13 (deadline 10, one miss); t1: one lost packet.
    fn records() -> Records {
        let mut records = Records::new();
        records.transmit(packet("t0", 0, 10), 0, 0);
        records.transmit(packet("t0", 1, 30), 20, 20);
        records.transmit(packet("t1", 0, 40), 0, 2);
        records.arrive(packet("t0", 0, 10), 4).unwrap();
        records.arrive(packet("t0", 1, 30), 32).unwrap();
        records
    }

    fn results() -> SimResults {
        let ids: Vec<FlowId> = vec!["t0".into(), "t1".into(), "t2".into()];
        SimResults::from_records(&records(), &ids, 40, Duration::from_millis(3))
    }

    #[test]
    fn test_stat_set() {
        let results = results();
        let t0 = &results.flows["t0"];
        assert_eq!(t0.packets_routed, 2);
        assert_eq!(t0.packets_arrived, 2);
        assert_eq!(t0.packets_exceeded_deadline, 1);
        assert_eq!(t0.best_latency, Some(5));
        assert_eq!(t0.worst_latency, Some(13));
        assert_eq!(t0.mean_latency, Some(9.0));
        assert!(!t0.schedulable());

        let t1 = &results.flows["t1"];
        assert_eq!(t1.packets_lost, 1);
        assert_eq!(t1.best_latency, None);
        assert!(t1.schedulable());

        // Configured flows without traffic still get an entry.
        assert_eq!(results.flows["t2"], StatSet::default());

        let o = &results.overall;
        assert_eq!(o.packets_routed, o.packets_arrived + o.packets_lost);
        assert_eq!(o.packets_routed, 3);
        assert!(!results.schedulable());
    }

    #[test]
    fn test_csv_export() {
        let results = results();
        let csv = results.to_csv();
        assert!(csv.contains("cycles,40"));
        assert!(csv.contains("packets_lost,1"));
        assert!(csv.contains("mean_latency,9.00"));

        let flows = results.flows_to_csv();
        assert!(flows.contains("t0,2,2,0,1,5,9.00,13,false"));
        assert!(flows.contains("t1,1,0,1,0,,,,true"));
    }

    #[test]
    fn test_json_export() {
        let json = results().to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["cycles"], 40);
        assert_eq!(value["flows"]["t0"]["packets_exceeded_deadline"], 1);
    }

    #[test]
    fn test_summary_output() {
        let summary = results().summary();
        assert!(summary.contains("Cycles: 40"));
        assert!(summary.contains("Flow t1: 1 routed, 0 arrived, 1 lost, 0 missed"));
        assert!(summary.contains("Schedulable: false"));
    }

    #[test]
    fn test_timer() {
        let timer = Timer::start();
        std::thread::sleep(Duration::from_millis(5));
        assert!(timer.elapsed_ms() >= 5.0);
    }
}
