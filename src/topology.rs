//! Static network topology and dimension-order (XY) routing.
//!
//! A [`Topology`] is an immutable graph of nodes placed on a 2D grid and
//! joined by bidirectional edges. It is built once from configuration and
//! then only queried: by the network builder to wire routers together, and
//! by traffic flows to compute XY routes.
//!
//! # Example
//!
//! ```
//! use nocsim::topology::Topology;
//!
//! let mesh = Topology::mesh(3, 3);
//! let route = mesh.xy_route("n0", "n8").unwrap();
//! let labels: Vec<&str> = route.iter().map(|n| n.label.as_str()).collect();
//! assert_eq!(labels, ["n0", "n1", "n2", "n5", "n8"]);
//! ```

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;

use crate::config::TopologyConfig;
use crate::error::TopologyError;

/// Position of a node on the 2D grid.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Position {
    pub x: i64,
    pub y: i64,
}

impl Position {
    /// Creates a new position.
    pub fn new(x: i64, y: i64) -> Self {
        Self { x, y }
    }

    /// Manhattan distance to another position.
    pub fn manhattan(&self, other: &Position) -> u64 {
        self.x.abs_diff(other.x) + self.y.abs_diff(other.y)
    }
}

/// Identity of a node: its label plus its grid position.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId {
    /// Unique label of the node (e.g. "n4")
    pub label: String,
    /// Grid position, unique within a topology
    pub position: Position,
}

impl NodeId {
    /// Creates a new node identity.
    pub fn new(label: impl Into<String>, x: i64, y: i64) -> Self {
        Self {
            label: label.into(),
            position: Position::new(x, y),
        }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({},{})", self.label, self.position.x, self.position.y)
    }
}

/// A bidirectional edge between two nodes, stored by label.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Edge {
    pub a: String,
    pub b: String,
}

impl Edge {
    /// Returns true if this edge joins `x` and `y` in either direction.
    pub fn joins(&self, x: &str, y: &str) -> bool {
        (self.a == x && self.b == y) || (self.a == y && self.b == x)
    }
}

/// An ordered sequence of nodes from source to destination, inclusive.
pub type Route = Vec<NodeId>;

/// Immutable network topology.
#[derive(Clone, Debug, Default)]
pub struct Topology {
    /// Nodes in registration order
    nodes: Vec<NodeId>,
    /// Label -> index into `nodes`
    by_label: HashMap<String, usize>,
    /// Position -> index into `nodes`
    by_position: HashMap<Position, usize>,
    /// Edges in registration order
    edges: Vec<Edge>,
    /// Normalised (min, max) label pair -> index into `edges`
    edge_lookup: HashMap<(String, String), usize>,
}

fn edge_key(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

impl Topology {
    /// Builds a topology from nodes and label pairs.
    ///
    /// Fails if a label or position is used twice, or if an edge references
    /// a node that does not exist. Duplicate edges are collapsed.
    pub fn new<I, A, B>(nodes: Vec<NodeId>, edges: I) -> Result<Self, TopologyError>
    where
        I: IntoIterator<Item = (A, B)>,
        A: Into<String>,
        B: Into<String>,
    {
        let mut topology = Topology::default();

        for node in nodes {
            if topology.by_label.contains_key(&node.label) {
                return Err(TopologyError::DuplicateNode(node.label));
            }
            if let Some(&other) = topology.by_position.get(&node.position) {
                return Err(TopologyError::DuplicatePosition {
                    first: topology.nodes[other].label.clone(),
                    second: node.label,
                    x: node.position.x,
                    y: node.position.y,
                });
            }
            let index = topology.nodes.len();
            topology.by_label.insert(node.label.clone(), index);
            topology.by_position.insert(node.position, index);
            topology.nodes.push(node);
        }

        for (a, b) in edges {
            let (a, b) = (a.into(), b.into());
            for label in [&a, &b] {
                if !topology.by_label.contains_key(label) {
                    return Err(TopologyError::UnknownNode(label.clone()));
                }
            }
            topology.push_edge(a, b);
        }

        Ok(topology)
    }

    /// Registers an edge between two known nodes; duplicates are ignored.
    fn push_edge(&mut self, a: String, b: String) {
        let key = edge_key(&a, &b);
        if self.edge_lookup.contains_key(&key) {
            return;
        }
        self.edge_lookup.insert(key, self.edges.len());
        self.edges.push(Edge { a, b });
    }

    /// Builds a `width` x `height` mesh.
    ///
    /// Node `n{y * width + x}` sits at `(x, y)` and is joined to its east
    /// and north neighbours.
    pub fn mesh(width: usize, height: usize) -> Self {
        let label = |x: usize, y: usize| format!("n{}", y * width + x);

        // Labels and positions are unique by construction, so the lookups
        // are filled directly rather than through `new`.
        let mut topology = Topology::default();
        for y in 0..height {
            for x in 0..width {
                let node = NodeId::new(label(x, y), x as i64, y as i64);
                let index = topology.nodes.len();
                topology.by_label.insert(node.label.clone(), index);
                topology.by_position.insert(node.position, index);
                topology.nodes.push(node);
            }
        }
        for y in 0..height {
            for x in 0..width {
                if x + 1 < width {
                    topology.push_edge(label(x, y), label(x + 1, y));
                }
                if y + 1 < height {
                    topology.push_edge(label(x, y), label(x, y + 1));
                }
            }
        }
        topology
    }

    /// Builds a horizontal line of `length` nodes, `n{i}` at `(i, 0)`.
    pub fn line(length: usize) -> Self {
        Self::mesh(length, 1)
    }

    /// Builds a topology from its configuration description.
    pub fn from_config(config: &TopologyConfig) -> Result<Self, TopologyError> {
        match config {
            TopologyConfig::Mesh { width, height } => Ok(Self::mesh(*width, *height)),
            TopologyConfig::Line { length } => Ok(Self::line(*length)),
            TopologyConfig::Explicit { nodes, edges } => Self::new(
                nodes
                    .iter()
                    .map(|n| NodeId::new(n.id.clone(), n.x, n.y))
                    .collect(),
                edges.iter().map(|[a, b]| (a.clone(), b.clone())),
            ),
        }
    }

    /// Returns all nodes in registration order.
    pub fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    /// Looks up a node by label.
    pub fn node(&self, label: &str) -> Option<&NodeId> {
        self.by_label.get(label).map(|&i| &self.nodes[i])
    }

    /// Looks up a node by position.
    pub fn node_at(&self, position: Position) -> Option<&NodeId> {
        self.by_position.get(&position).map(|&i| &self.nodes[i])
    }

    /// Returns all edges in registration order.
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Looks up the edge joining two nodes, in either direction.
    pub fn edge(&self, a: &str, b: &str) -> Option<&Edge> {
        self.edge_lookup
            .get(&edge_key(a, b))
            .map(|&i| &self.edges[i])
    }

    /// Returns the number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if the topology has no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Resolves a list of labels into a route.
    pub fn route_from_labels<S: AsRef<str>>(&self, labels: &[S]) -> Result<Route, TopologyError> {
        labels
            .iter()
            .map(|label| {
                self.node(label.as_ref())
                    .cloned()
                    .ok_or_else(|| TopologyError::UnknownNode(label.as_ref().to_string()))
            })
            .collect()
    }

    /// Checks that a route is non-empty, visits each node at most once and
    /// that every hop follows an edge.
    ///
    /// Routers locate themselves on a route by position, so a node that
    /// appears twice would always be resolved to its first visit.
    pub fn validate_route(&self, route: &[NodeId]) -> Result<(), TopologyError> {
        if route.is_empty() {
            return Err(TopologyError::EmptyRoute);
        }
        let mut seen = HashSet::with_capacity(route.len());
        for node in route {
            if self.node(&node.label) != Some(node) {
                return Err(TopologyError::UnknownNode(node.label.clone()));
            }
            if !seen.insert(node.position) {
                return Err(TopologyError::RepeatedNode(node.label.clone()));
            }
        }
        for hop in route.windows(2) {
            if self.edge(&hop[0].label, &hop[1].label).is_none() {
                return Err(TopologyError::MissingEdge(
                    hop[0].label.clone(),
                    hop[1].label.clone(),
                ));
            }
        }
        Ok(())
    }

    /// Computes the dimension-order route from `src` to `dst`.
    ///
    /// All X movement is resolved before any Y movement. Each step moves one
    /// grid unit towards the destination and requires a node at the
    /// resulting position, otherwise [`TopologyError::MissingRouter`] is
    /// returned. The result includes both endpoints.
    pub fn xy_route(&self, src: &str, dst: &str) -> Result<Route, TopologyError> {
        let src = self
            .node(src)
            .ok_or_else(|| TopologyError::UnknownNode(src.to_string()))?;
        let dst = self
            .node(dst)
            .ok_or_else(|| TopologyError::UnknownNode(dst.to_string()))?;

        let target = dst.position;
        let mut current = src.position;
        let mut route = vec![src.clone()];

        while current != target {
            if current.x != target.x {
                current.x += (target.x - current.x).signum();
            } else {
                current.y += (target.y - current.y).signum();
            }
            let node = self.node_at(current).ok_or(TopologyError::MissingRouter {
                x: current.x,
                y: current.y,
            })?;
            route.push(node.clone());
        }

        Ok(route)
    }
}
