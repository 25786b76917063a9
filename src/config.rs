//! Scenario configuration: network parameters, topology and traffic flows.
//!
//! Scenarios are described declaratively in YAML or JSON and validated when
//! loaded, before any cycle is simulated.
//!
//! # Configuration File Structure
//!
//! ```yaml
//! simulation:
//!   cycle_limit: 1000
//!   max_priority: 2
//!   buffer_size: 4
//!   flit_size: 1
//!   link_bandwidth: 1
//!   processing_delay: 3
//!   seed: 7
//!
//! topology:
//!   kind: mesh
//!   width: 3
//!   height: 3
//!
//! flows:
//!   - id: t0
//!     priority: 1
//!     period: 100
//!     deadline: 80
//!     jitter: 10
//!     packet_size: 4
//!     route: "n0, n1, n2"
//!   - id: t1
//!     priority: 2
//!     period: 150
//!     deadline: 150
//!     packet_size: 8
//!     src: n0
//!     dst: n8
//! ```
//!
//! Traffic can also be loaded from CSV with [`flows_from_csv`].

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;

use crate::types::{Cycle, Priority};

/// Errors that can occur during configuration loading.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unknown file format: {0}")]
    UnknownFormat(String),

    #[error("Malformed route: {0:?}")]
    MalformedRoute(String),

    #[error("CSV error on line {line}: {message}")]
    Csv { line: usize, message: String },
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Network and run parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SimConfig {
    /// Number of cycles to simulate
    pub cycle_limit: Cycle,

    /// Number of priorities, and of virtual channels per buffer
    pub max_priority: Priority,

    /// Flits per input buffer, shared evenly by the virtual channels
    pub buffer_size: usize,

    /// Payload units per body flit
    pub flit_size: u64,

    /// Flits per link per cycle
    pub link_bandwidth: usize,

    /// Cycles a header spends in each router before it is forwarded
    pub processing_delay: u64,

    /// Seed for jitter draws
    #[serde(default)]
    pub seed: u64,

    /// Fail the run when an arrived packet differs from what was sent
    #[serde(default = "default_strict_consistency")]
    pub strict_consistency: bool,

    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_strict_consistency() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            cycle_limit: 1000,
            max_priority: 1,
            buffer_size: 2,
            flit_size: 1,
            link_bandwidth: 1,
            processing_delay: 1,
            seed: 0,
            strict_consistency: default_strict_consistency(),
            log_level: default_log_level(),
        }
    }
}

impl SimConfig {
    /// Buffer slots per priority.
    pub fn vc_capacity(&self) -> usize {
        self.buffer_size / self.max_priority.max(1) as usize
    }

    /// Validates parameter ranges and their relationships.
    pub fn validate(&self) -> ConfigResult<()> {
        let positive = [
            ("cycle_limit", self.cycle_limit),
            ("max_priority", self.max_priority as u64),
            ("buffer_size", self.buffer_size as u64),
            ("flit_size", self.flit_size),
            ("link_bandwidth", self.link_bandwidth as u64),
            ("processing_delay", self.processing_delay),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(ConfigError::Validation(format!(
                    "{} must be at least 1",
                    name
                )));
            }
        }

        if self.buffer_size % self.max_priority as usize != 0 {
            return Err(ConfigError::Validation(format!(
                "buffer_size {} is not divisible by max_priority {}",
                self.buffer_size, self.max_priority
            )));
        }

        if self.link_bandwidth > self.vc_capacity() {
            return Err(ConfigError::Validation(format!(
                "link_bandwidth {} exceeds virtual channel capacity {}",
                self.link_bandwidth,
                self.vc_capacity()
            )));
        }

        Ok(())
    }
}

/// A route as written in configuration: a list of node ids or a string.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RouteSpec {
    List(Vec<String>),
    Text(String),
}

impl RouteSpec {
    /// Returns the node ids of the route, in order.
    pub fn labels(&self) -> ConfigResult<Vec<String>> {
        match self {
            RouteSpec::List(labels) => {
                if labels.is_empty() || labels.iter().any(|l| l.trim().is_empty()) {
                    return Err(ConfigError::MalformedRoute(format!("{:?}", labels)));
                }
                Ok(labels.iter().map(|l| l.trim().to_string()).collect())
            }
            RouteSpec::Text(text) => parse_route(text),
        }
    }
}

/// Parses a route string such as `"n0, n1, n2"` or `"[n0, n1]"`.
pub fn parse_route(text: &str) -> ConfigResult<Vec<String>> {
    let trimmed = text.trim();
    let inner = match (trimmed.strip_prefix('['), trimmed.strip_suffix(']')) {
        (Some(_), Some(_)) => &trimmed[1..trimmed.len() - 1],
        (None, None) => trimmed,
        _ => return Err(ConfigError::MalformedRoute(text.to_string())),
    };

    let labels: Vec<String> = inner.split(',').map(|s| s.trim().to_string()).collect();
    if labels.iter().any(String::is_empty) {
        return Err(ConfigError::MalformedRoute(text.to_string()));
    }
    Ok(labels)
}

/// One periodic traffic flow.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrafficFlowConfig {
    /// Unique flow identifier
    pub id: String,

    /// Priority, 1 is the most urgent
    pub priority: Priority,

    /// Release period in cycles
    pub period: Cycle,

    /// Relative deadline in cycles
    pub deadline: Cycle,

    /// Maximum release jitter in cycles
    #[serde(default)]
    pub jitter: Cycle,

    /// Payload units per packet
    pub packet_size: u64,

    /// Explicit route, source first
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route: Option<RouteSpec>,

    /// Source node, when the route is computed with XY routing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src: Option<String>,

    /// Destination node, when the route is computed with XY routing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dst: Option<String>,
}

/// How a flow's route is obtained.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RouteSource {
    /// Explicit node ids
    Explicit(Vec<String>),
    /// XY route between two nodes
    Xy { src: String, dst: String },
}

impl TrafficFlowConfig {
    /// Creates a flow over an explicit route.
    pub fn new(
        id: impl Into<String>,
        priority: Priority,
        period: Cycle,
        deadline: Cycle,
        jitter: Cycle,
        packet_size: u64,
        route: &[&str],
    ) -> Self {
        Self {
            id: id.into(),
            priority,
            period,
            deadline,
            jitter,
            packet_size,
            route: Some(RouteSpec::List(
                route.iter().map(|s| s.to_string()).collect(),
            )),
            src: None,
            dst: None,
        }
    }

    /// Creates a flow routed with XY routing from `src` to `dst`.
    pub fn xy(
        id: impl Into<String>,
        priority: Priority,
        period: Cycle,
        deadline: Cycle,
        jitter: Cycle,
        packet_size: u64,
        src: impl Into<String>,
        dst: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            priority,
            period,
            deadline,
            jitter,
            packet_size,
            route: None,
            src: Some(src.into()),
            dst: Some(dst.into()),
        }
    }

    /// Returns where the route of this flow comes from.
    pub fn route_source(&self) -> ConfigResult<RouteSource> {
        match (&self.route, &self.src, &self.dst) {
            (Some(route), None, None) => Ok(RouteSource::Explicit(route.labels()?)),
            (None, Some(src), Some(dst)) => Ok(RouteSource::Xy {
                src: src.clone(),
                dst: dst.clone(),
            }),
            _ => Err(ConfigError::Validation(format!(
                "Flow {} needs either a route or both src and dst",
                self.id
            ))),
        }
    }

    /// Validates the flow against the network parameters.
    pub fn validate(&self, sim: &SimConfig) -> ConfigResult<()> {
        if self.id.trim().is_empty() {
            return Err(ConfigError::Validation("Flow id is empty".into()));
        }
        if self.priority == 0 || self.priority > sim.max_priority {
            return Err(ConfigError::Validation(format!(
                "Flow {} priority {} outside 1..={}",
                self.id, self.priority, sim.max_priority
            )));
        }
        if self.period == 0 {
            return Err(ConfigError::Validation(format!(
                "Flow {} period must be at least 1",
                self.id
            )));
        }
        if self.deadline == 0 {
            return Err(ConfigError::Validation(format!(
                "Flow {} deadline must be at least 1",
                self.id
            )));
        }
        if self.jitter >= self.period || self.deadline > self.period - self.jitter {
            return Err(ConfigError::Validation(format!(
                "Flow {} deadline {} exceeds period {} minus jitter {}",
                self.id, self.deadline, self.period, self.jitter
            )));
        }
        self.route_source()?;
        Ok(())
    }
}

/// Node entry of an explicit topology.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    pub id: String,
    pub x: i64,
    pub y: i64,
}

/// Topology description.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TopologyConfig {
    /// `width` x `height` grid, node `n{y*width+x}` at `(x, y)`
    Mesh { width: usize, height: usize },
    /// Horizontal line, node `n{i}` at `(i, 0)`
    Line { length: usize },
    /// Hand-placed nodes and edges
    Explicit {
        nodes: Vec<NodeConfig>,
        #[serde(default)]
        edges: Vec<[String; 2]>,
    },
}

impl TopologyConfig {
    /// Validates the topology description.
    pub fn validate(&self) -> ConfigResult<()> {
        let empty = match self {
            TopologyConfig::Mesh { width, height } => *width == 0 || *height == 0,
            TopologyConfig::Line { length } => *length == 0,
            TopologyConfig::Explicit { nodes, .. } => nodes.is_empty(),
        };
        if empty {
            return Err(ConfigError::Validation("Topology has no nodes".into()));
        }
        Ok(())
    }
}

/// Complete scenario: parameters, topology and traffic.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScenarioConfig {
    /// Network and run parameters
    pub simulation: SimConfig,

    /// Topology description
    pub topology: TopologyConfig,

    /// Traffic flows
    #[serde(default)]
    pub flows: Vec<TrafficFlowConfig>,
}

impl ScenarioConfig {
    /// Loads configuration from a YAML file.
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Loads configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> ConfigResult<Self> {
        let config: ScenarioConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a JSON file.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Loads configuration from a JSON string.
    pub fn from_json(json: &str) -> ConfigResult<Self> {
        let config: ScenarioConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a file, auto-detecting format.
    pub fn from_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let path = path.as_ref();
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("");

        match ext.to_lowercase().as_str() {
            "yaml" | "yml" => Self::from_yaml_file(path),
            "json" => Self::from_json_file(path),
            _ => Err(ConfigError::UnknownFormat(ext.to_string())),
        }
    }

    /// Validates the entire configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        self.simulation.validate()?;
        self.topology.validate()?;

        let mut ids = HashSet::new();
        for flow in &self.flows {
            flow.validate(&self.simulation)?;
            if !ids.insert(flow.id.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "Duplicate flow ID: {}",
                    flow.id
                )));
            }
        }
        Ok(())
    }

    /// Saves configuration to a YAML file.
    pub fn to_yaml_file<P: AsRef<Path>>(&self, path: P) -> ConfigResult<()> {
        std::fs::write(path, self.to_yaml()?)?;
        Ok(())
    }

    /// Saves configuration to a JSON file.
    pub fn to_json_file<P: AsRef<Path>>(&self, path: P) -> ConfigResult<()> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }

    /// Converts to YAML string.
    pub fn to_yaml(&self) -> ConfigResult<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Converts to JSON string.
    pub fn to_json(&self) -> ConfigResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Finds a flow by ID.
    pub fn find_flow(&self, id: &str) -> Option<&TrafficFlowConfig> {
        self.flows.iter().find(|f| f.id == id)
    }
}

/// Builder for creating a [`ScenarioConfig`] programmatically.
#[derive(Default)]
pub struct ScenarioBuilder {
    simulation: SimConfig,
    topology: Option<TopologyConfig>,
    flows: Vec<TrafficFlowConfig>,
}

impl ScenarioBuilder {
    /// Creates a new builder with default parameters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces all network parameters.
    pub fn simulation(mut self, simulation: SimConfig) -> Self {
        self.simulation = simulation;
        self
    }

    pub fn cycle_limit(mut self, cycles: Cycle) -> Self {
        self.simulation.cycle_limit = cycles;
        self
    }

    pub fn max_priority(mut self, max_priority: Priority) -> Self {
        self.simulation.max_priority = max_priority;
        self
    }

    pub fn buffer_size(mut self, size: usize) -> Self {
        self.simulation.buffer_size = size;
        self
    }

    pub fn flit_size(mut self, size: u64) -> Self {
        self.simulation.flit_size = size;
        self
    }

    pub fn link_bandwidth(mut self, bandwidth: usize) -> Self {
        self.simulation.link_bandwidth = bandwidth;
        self
    }

    pub fn processing_delay(mut self, delay: u64) -> Self {
        self.simulation.processing_delay = delay;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.simulation.seed = seed;
        self
    }

    pub fn strict_consistency(mut self, strict: bool) -> Self {
        self.simulation.strict_consistency = strict;
        self
    }

    /// Uses a `width` x `height` mesh.
    pub fn mesh(mut self, width: usize, height: usize) -> Self {
        self.topology = Some(TopologyConfig::Mesh { width, height });
        self
    }

    /// Uses a line of `length` nodes.
    pub fn line(mut self, length: usize) -> Self {
        self.topology = Some(TopologyConfig::Line { length });
        self
    }

    /// Uses an arbitrary topology description.
    pub fn topology(mut self, topology: TopologyConfig) -> Self {
        self.topology = Some(topology);
        self
    }

    /// Adds a traffic flow.
    pub fn flow(mut self, flow: TrafficFlowConfig) -> Self {
        self.flows.push(flow);
        self
    }

    /// Builds and validates the configuration.
    pub fn build(self) -> ConfigResult<ScenarioConfig> {
        let topology = self
            .topology
            .ok_or_else(|| ConfigError::Validation("No topology given".into()))?;
        let config = ScenarioConfig {
            simulation: self.simulation,
            topology,
            flows: self.flows,
        };
        config.validate()?;
        Ok(config)
    }
}

/// Column layout of a traffic CSV file.
struct CsvColumns {
    id: usize,
    priority: usize,
    period: usize,
    deadline: usize,
    jitter: Option<usize>,
    packet_size: usize,
    route: Option<usize>,
    src: Option<usize>,
    dst: Option<usize>,
}

impl CsvColumns {
    fn from_header(header: &str) -> ConfigResult<Self> {
        let names: Vec<String> = header
            .split(',')
            .map(|s| s.trim().to_lowercase())
            .collect();
        let find = |name: &str| names.iter().position(|n| n == name);
        let require = |name: &str| {
            find(name).ok_or_else(|| ConfigError::Csv {
                line: 1,
                message: format!("missing column {}", name),
            })
        };

        let columns = Self {
            id: require("id")?,
            priority: require("priority")?,
            period: require("period")?,
            deadline: require("deadline")?,
            jitter: find("jitter"),
            packet_size: require("packet_size")?,
            route: find("route"),
            src: find("src"),
            dst: find("dst"),
        };
        if columns.route.is_none() && (columns.src.is_none() || columns.dst.is_none()) {
            return Err(ConfigError::Csv {
                line: 1,
                message: "need a route column or src and dst columns".into(),
            });
        }
        Ok(columns)
    }
}

/// Parses traffic flows from CSV text.
///
/// The first non-empty line is a header naming the columns `id`, `priority`,
/// `period`, `deadline`, `jitter` (optional, default 0), `packet_size`, and
/// either `route` or `src` and `dst`. Route cells list node ids separated by
/// `;` or whitespace. Lines starting with `#` are ignored.
pub fn flows_from_csv(text: &str) -> ConfigResult<Vec<TrafficFlowConfig>> {
    let mut lines = text
        .lines()
        .enumerate()
        .map(|(i, l)| (i + 1, l.trim()))
        .filter(|(_, l)| !l.is_empty() && !l.starts_with('#'));

    let Some((_, header)) = lines.next() else {
        return Ok(Vec::new());
    };
    let columns = CsvColumns::from_header(header)?;

    let mut flows = Vec::new();
    for (line, row) in lines {
        let cells: Vec<&str> = row.split(',').map(str::trim).collect();
        let cell = |index: usize| {
            cells.get(index).copied().ok_or_else(|| ConfigError::Csv {
                line,
                message: format!("missing cell {}", index + 1),
            })
        };
        let number = |index: usize| -> ConfigResult<u64> {
            let value = cell(index)?;
            value.parse().map_err(|_| ConfigError::Csv {
                line,
                message: format!("{:?} is not a number", value),
            })
        };

        let route = match columns.route {
            Some(index) => {
                let labels: Vec<String> = cell(index)?
                    .split(|c: char| c == ';' || c.is_whitespace())
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect();
                if labels.is_empty() {
                    return Err(ConfigError::MalformedRoute(cell(index)?.to_string()));
                }
                Some(RouteSpec::List(labels))
            }
            None => None,
        };
        let endpoint = |index: Option<usize>| -> ConfigResult<Option<String>> {
            match (route.is_some(), index) {
                (false, Some(index)) => Ok(Some(cell(index)?.to_string())),
                _ => Ok(None),
            }
        };

        flows.push(TrafficFlowConfig {
            id: cell(columns.id)?.to_string(),
            priority: number(columns.priority)? as Priority,
            period: number(columns.period)?,
            deadline: number(columns.deadline)?,
            jitter: match columns.jitter {
                Some(index) => number(index)?,
                None => 0,
            },
            packet_size: number(columns.packet_size)?,
            src: endpoint(columns.src)?,
            dst: endpoint(columns.dst)?,
            route,
        });
    }
    Ok(flows)
}

/// Reads traffic flows from a CSV file.
pub fn flows_from_csv_file<P: AsRef<Path>>(path: P) -> ConfigResult<Vec<TrafficFlowConfig>> {
    let content = std::fs::read_to_string(path)?;
    flows_from_csv(&content)
}
