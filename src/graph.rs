//! The directed road network under the camera overlay.
//!
//! Nodes are intersections, edges are road segments. Each edge carries a
//! bearing (degrees clockwise from north, direction of travel from source to
//! destination) and a length in meters; a bidirectional road is two edges.
//! The graph is immutable once built. All mutable camera state lives in
//! side tables (`placement` module), never on graph elements.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::geo::{haversine_m, initial_bearing, point_segment_distance_m, Point};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u64);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Directed edge identity: source node, destination node, and a key
/// disambiguating parallel edges between the same pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EdgeId {
    pub u: NodeId,
    pub v: NodeId,
    pub key: u32,
}

impl std::fmt::Display for EdgeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}->{}:{})", self.u, self.v, self.key)
    }
}

#[derive(Clone, Debug)]
pub struct Node {
    pub id: NodeId,
    pub position: Point,
}

#[derive(Clone, Debug)]
pub struct Edge {
    pub id: EdgeId,
    /// Compass heading of travel from `u` to `v`.
    pub bearing: f64,
    pub length_m: f64,
}

pub struct RoadGraph {
    nodes: HashMap<NodeId, Node>,
    edges: HashMap<EdgeId, Edge>,
    out: HashMap<NodeId, Vec<EdgeId>>,
    // insertion order, for deterministic geometric tie-breaks
    node_order: Vec<NodeId>,
    edge_order: Vec<EdgeId>,
}

impl RoadGraph {
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn edge(&self, id: EdgeId) -> Option<&Edge> {
        self.edges.get(&id)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Outgoing edges of `node` in insertion order. Unknown nodes have none.
    pub fn out_edges(&self, node: NodeId) -> &[EdgeId] {
        self.out.get(&node).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Nearest intersection to `point` and its great-circle distance in
    /// meters. Ties keep the earliest-loaded node.
    pub fn nearest_node(&self, point: Point) -> Result<(NodeId, f64)> {
        let mut best: Option<(NodeId, f64)> = None;
        for id in &self.node_order {
            let node = &self.nodes[id];
            let d = haversine_m(point, node.position);
            if best.map_or(true, |(_, bd)| d < bd) {
                best = Some((*id, d));
            }
        }
        best.ok_or_else(|| anyhow!("road graph has no nodes"))
    }

    /// Nearest road segment to `point` and the perpendicular distance in
    /// meters. Ties keep the earliest-loaded edge.
    pub fn nearest_edge(&self, point: Point) -> Result<(EdgeId, f64)> {
        let mut best: Option<(EdgeId, f64)> = None;
        for id in &self.edge_order {
            let (a, b) = self.endpoints(*id)?;
            let d = point_segment_distance_m(point, a, b);
            if best.map_or(true, |(_, bd)| d < bd) {
                best = Some((*id, d));
            }
        }
        best.ok_or_else(|| anyhow!("road graph has no edges"))
    }

    /// Positions of an edge's source and destination nodes.
    pub fn endpoints(&self, edge: EdgeId) -> Result<(Point, Point)> {
        let u = self
            .nodes
            .get(&edge.u)
            .ok_or_else(|| anyhow!("edge {} references unknown node {}", edge, edge.u))?;
        let v = self
            .nodes
            .get(&edge.v)
            .ok_or_else(|| anyhow!("edge {} references unknown node {}", edge, edge.v))?;
        Ok((u.position, v.position))
    }

    pub fn from_document(doc: &GraphDocument) -> Result<Self> {
        let mut builder = RoadGraphBuilder::new();
        for n in &doc.nodes {
            builder.add_node(NodeId(n.id), Point::new(n.lat, n.lon));
        }
        for e in &doc.edges {
            builder.add_edge_full(
                NodeId(e.u),
                NodeId(e.v),
                e.key.unwrap_or(0),
                e.bearing,
                e.length_m,
            );
        }
        builder.build()
    }

    pub fn to_document(&self) -> GraphDocument {
        GraphDocument {
            nodes: self
                .node_order
                .iter()
                .map(|id| {
                    let n = &self.nodes[id];
                    NodeRecord {
                        id: n.id.0,
                        lat: n.position.lat,
                        lon: n.position.lon,
                    }
                })
                .collect(),
            edges: self
                .edge_order
                .iter()
                .map(|id| {
                    let e = &self.edges[id];
                    EdgeRecord {
                        u: e.id.u.0,
                        v: e.id.v.0,
                        key: Some(e.id.key),
                        bearing: Some(e.bearing),
                        length_m: Some(e.length_m),
                    }
                })
                .collect(),
        }
    }
}

// -------------------- Graph Document --------------------

/// Serialized road graph as exported by the map-provider collaborator for a
/// configured center point and radius. Bearings and lengths may be omitted;
/// they are then recomputed from node coordinates at load time.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct GraphDocument {
    pub nodes: Vec<NodeRecord>,
    pub edges: Vec<EdgeRecord>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: u64,
    pub lat: f64,
    pub lon: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EdgeRecord {
    pub u: u64,
    pub v: u64,
    pub key: Option<u32>,
    pub bearing: Option<f64>,
    pub length_m: Option<f64>,
}

impl GraphDocument {
    pub fn from_path(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow!("failed to read graph document {}: {}", path.display(), e))?;
        let doc = serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid graph document {}: {}", path.display(), e))?;
        Ok(doc)
    }
}

// -------------------- Builder --------------------

struct PendingEdge {
    id: EdgeId,
    bearing: Option<f64>,
    length_m: Option<f64>,
}

/// Programmatic graph construction (fixtures, tests, document import).
/// Missing bearings and lengths are backfilled from endpoint coordinates.
pub struct RoadGraphBuilder {
    nodes: Vec<Node>,
    edges: Vec<PendingEdge>,
}

impl RoadGraphBuilder {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            edges: Vec::new(),
        }
    }

    pub fn add_node(&mut self, id: NodeId, position: Point) -> &mut Self {
        self.nodes.push(Node { id, position });
        self
    }

    /// Add a directed edge `u -> v` with parallel key 0.
    pub fn add_edge(&mut self, u: NodeId, v: NodeId) -> &mut Self {
        self.add_edge_full(u, v, 0, None, None)
    }

    /// Add both directions of a bidirectional road.
    pub fn add_two_way(&mut self, u: NodeId, v: NodeId) -> &mut Self {
        self.add_edge(u, v);
        self.add_edge(v, u)
    }

    pub fn add_edge_full(
        &mut self,
        u: NodeId,
        v: NodeId,
        key: u32,
        bearing: Option<f64>,
        length_m: Option<f64>,
    ) -> &mut Self {
        self.edges.push(PendingEdge {
            id: EdgeId { u, v, key },
            bearing,
            length_m,
        });
        self
    }

    pub fn build(&self) -> Result<RoadGraph> {
        let mut nodes = HashMap::new();
        let mut node_order = Vec::new();
        for n in &self.nodes {
            if nodes.insert(n.id, n.clone()).is_some() {
                return Err(anyhow!("duplicate node id {}", n.id));
            }
            node_order.push(n.id);
        }

        let mut edges = HashMap::new();
        let mut out: HashMap<NodeId, Vec<EdgeId>> = HashMap::new();
        let mut edge_order = Vec::new();
        for pending in &self.edges {
            let id = pending.id;
            let a = nodes
                .get(&id.u)
                .ok_or_else(|| anyhow!("edge {} references unknown node {}", id, id.u))?
                .position;
            let b = nodes
                .get(&id.v)
                .ok_or_else(|| anyhow!("edge {} references unknown node {}", id, id.v))?
                .position;
            let bearing = pending.bearing.unwrap_or_else(|| initial_bearing(a, b));
            let length_m = pending.length_m.unwrap_or_else(|| haversine_m(a, b));
            let edge = Edge { id, bearing, length_m };
            if edges.insert(id, edge).is_some() {
                return Err(anyhow!("duplicate edge {}", id));
            }
            out.entry(id.u).or_default().push(id);
            edge_order.push(id);
        }

        Ok(RoadGraph {
            nodes,
            edges,
            out,
            node_order,
            edge_order,
        })
    }
}

impl Default for RoadGraphBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_node_graph() -> RoadGraph {
        let mut b = RoadGraphBuilder::new();
        b.add_node(NodeId(1), Point::new(33.0000, -84.0000));
        b.add_node(NodeId(2), Point::new(33.0000, -83.9900));
        b.add_two_way(NodeId(1), NodeId(2));
        b.build().expect("graph")
    }

    #[test]
    fn builder_backfills_bearing_and_length() {
        let g = two_node_graph();
        let east = g
            .edge(EdgeId {
                u: NodeId(1),
                v: NodeId(2),
                key: 0,
            })
            .expect("edge");
        assert!((east.bearing - 90.0).abs() < 1.0, "got {}", east.bearing);
        assert!((east.length_m - 930.0).abs() < 10.0, "got {}", east.length_m);

        let west = g
            .edge(EdgeId {
                u: NodeId(2),
                v: NodeId(1),
                key: 0,
            })
            .expect("edge");
        assert!((west.bearing - 270.0).abs() < 1.0, "got {}", west.bearing);
    }

    #[test]
    fn nearest_node_returns_closest_with_distance() {
        let g = two_node_graph();
        let (id, d) = g.nearest_node(Point::new(33.0001, -83.9901)).expect("node");
        assert_eq!(id, NodeId(2));
        assert!(d > 0.0 && d < 20.0, "got {}", d);
    }

    #[test]
    fn nearest_edge_measures_perpendicular_distance() {
        let g = two_node_graph();
        // ~11 m north of the segment midpoint, far from both nodes
        let (id, d) = g.nearest_edge(Point::new(33.0001, -83.9950)).expect("edge");
        assert_eq!(id.key, 0);
        assert!((d - 11.1).abs() < 0.5, "got {}", d);
    }

    #[test]
    fn build_rejects_edge_with_unknown_endpoint() {
        let mut b = RoadGraphBuilder::new();
        b.add_node(NodeId(1), Point::new(33.0, -84.0));
        b.add_edge(NodeId(1), NodeId(9));
        assert!(b.build().is_err());
    }

    #[test]
    fn document_roundtrip_preserves_topology() {
        let g = two_node_graph();
        let doc = g.to_document();
        let json = serde_json::to_string(&doc).expect("serialize");
        let parsed: GraphDocument = serde_json::from_str(&json).expect("parse");
        let g2 = RoadGraph::from_document(&parsed).expect("rebuild");
        assert_eq!(g2.node_count(), 2);
        assert_eq!(g2.edge_count(), 2);
        assert_eq!(g2.out_edges(NodeId(1)).len(), 1);
    }

    #[test]
    fn empty_graph_rejects_geometric_queries() {
        let g = RoadGraphBuilder::new().build().expect("empty graph");
        assert!(g.nearest_node(Point::new(0.0, 0.0)).is_err());
        assert!(g.nearest_edge(Point::new(0.0, 0.0)).is_err());
    }
}
