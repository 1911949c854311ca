//! Downstream-camera search.
//!
//! Answers "which active cameras could a vehicle reach next after leaving
//! this camera's field of view", optionally constrained by the vehicle's
//! heading. The search is a depth-bounded DFS over outgoing road edges; a
//! branch stops at the first active camera it meets, because that camera is
//! itself responsible for its own further downstream queries.
//!
//! Inactive cameras are transparent: the search continues past them as if
//! they were not installed.

use std::collections::{HashMap, HashSet};

use anyhow::Result;

use crate::geo::{bearing_deviation, reverse_bearing};
use crate::graph::{EdgeId, NodeId, RoadGraph};
use crate::liveness::LivenessTracker;
use crate::placement::{CameraPlacementIndex, Placement};
use crate::TopologyError;

#[derive(Clone, Copy, Debug)]
pub struct SearchParams {
    /// Maximum hop depth of the node-rooted traversal.
    pub max_dfs: u32,
    /// Maximum angular deviation (degrees) between a queried travel
    /// direction and a candidate edge's bearing.
    pub max_bearing: f64,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            max_dfs: 5,
            max_bearing: 90.0,
        }
    }
}

/// DFS stack with an O(1) membership test alongside it.
struct DfsStack {
    stack: Vec<(NodeId, u32)>,
    members: HashSet<NodeId>,
}

impl DfsStack {
    fn new() -> Self {
        Self {
            stack: Vec::new(),
            members: HashSet::new(),
        }
    }

    fn contains(&self, node: NodeId) -> bool {
        self.members.contains(&node)
    }

    fn push(&mut self, node: NodeId, depth: u32) {
        debug_assert!(!self.members.contains(&node), "{} already on stack", node);
        self.stack.push((node, depth));
        self.members.insert(node);
    }

    fn pop(&mut self) -> Option<(NodeId, u32)> {
        let entry = self.stack.pop()?;
        self.members.remove(&entry.0);
        Some(entry)
    }
}

/// Result of a node-rooted search. Holds the predecessor map populated
/// during the traversal so routes to the discovered cameras can be
/// reconstructed as an optional post-pass.
pub struct NodeSearch {
    pub cameras: Vec<String>,
    root: NodeId,
    dest_nodes: Vec<NodeId>,
    predecessors: HashMap<NodeId, NodeId>,
}

impl NodeSearch {
    fn empty(root: NodeId) -> Self {
        Self {
            cameras: Vec::new(),
            root,
            dest_nodes: Vec::new(),
            predecessors: HashMap::new(),
        }
    }

    /// Node routes from the search root to each camera hit, for debugging
    /// and route plotting. Never needed for the camera result itself.
    pub fn routes(&self) -> Vec<Vec<NodeId>> {
        let mut out = Vec::with_capacity(self.dest_nodes.len());
        for &dest in &self.dest_nodes {
            let mut route = vec![dest];
            let mut current = dest;
            while current != self.root {
                match self.predecessors.get(&current) {
                    Some(&prev) => {
                        route.push(prev);
                        current = prev;
                    }
                    None => break,
                }
            }
            route.reverse();
            out.push(route);
        }
        out
    }
}

pub struct DownstreamSearch<'a> {
    graph: &'a RoadGraph,
    placements: &'a CameraPlacementIndex,
    liveness: &'a LivenessTracker,
    params: SearchParams,
}

impl<'a> DownstreamSearch<'a> {
    pub fn new(
        graph: &'a RoadGraph,
        placements: &'a CameraPlacementIndex,
        liveness: &'a LivenessTracker,
        params: SearchParams,
    ) -> Self {
        Self {
            graph,
            placements,
            liveness,
            params,
        }
    }

    /// Downstream cameras of `camera`, deduplicated, excluding the camera
    /// itself. An unplaced camera has no downstream set.
    pub fn from_camera(&self, camera: &str, direction: Option<f64>) -> Result<Vec<String>> {
        let direction = valid_direction(direction);
        let mut result = match self.placements.placement_of(camera) {
            None => Vec::new(),
            Some(Placement::Node(node)) => self.from_node(node, direction)?.cameras,
            Some(Placement::Edge(edge)) => self.from_edge_camera(camera, edge, direction)?,
        };
        result.retain(|c| c != camera);
        dedup_preserving_order(&mut result);
        Ok(result)
    }

    /// Depth-bounded DFS over outgoing edges rooted at `node`.
    ///
    /// With a direction given, only the root's outgoing edge whose bearing
    /// is closest to it is explored (and only if that bearing deviates by at
    /// most `max_bearing`); past the first hop the heading no longer
    /// constrains the traversal.
    pub fn from_node(&self, root: NodeId, direction: Option<f64>) -> Result<NodeSearch> {
        let direction = valid_direction(direction);
        let mut search = NodeSearch::empty(root);
        let mut visited: HashSet<NodeId> = HashSet::new();
        let mut stack = DfsStack::new();
        stack.push(root, 0);
        let mut first_hop = direction;

        while let Some((node, depth)) = stack.pop() {
            visited.insert(node);

            let outgoing: Vec<EdgeId> = if let Some(dir) = first_hop.take() {
                match self.closest_out_edge(node, dir)? {
                    Some(edge) => vec![edge],
                    None => return Ok(NodeSearch::empty(root)),
                }
            } else {
                self.graph.out_edges(node).to_vec()
            };

            for edge in outgoing {
                // An edge camera sees the vehicle before it reaches the far
                // node; report the first active one and stop this branch.
                if let Some(camera) = self.first_active_on_edge(edge)? {
                    search.cameras.push(camera);
                    search.dest_nodes.push(node);
                    continue;
                }

                let next = edge.v;
                if visited.contains(&next) {
                    continue;
                }

                let active_here: Vec<String> = self
                    .placements
                    .cameras_at_node(next)
                    .filter(|c| self.liveness.is_active(c))
                    .map(str::to_string)
                    .collect();
                if !active_here.is_empty() {
                    search.predecessors.insert(next, node);
                    search.cameras.extend(active_here);
                    search.dest_nodes.push(next);
                    visited.insert(next);
                } else if depth + 1 <= self.params.max_dfs && !stack.contains(next) {
                    search.predecessors.insert(next, node);
                    stack.push(next, depth + 1);
                }
            }
        }

        dedup_preserving_order(&mut search.cameras);
        Ok(search)
    }

    /// The root's outgoing edge with the smallest bearing deviation from
    /// `direction`, if that deviation is within `max_bearing`. Exact ties
    /// keep the earliest-loaded edge.
    fn closest_out_edge(&self, node: NodeId, direction: f64) -> Result<Option<EdgeId>> {
        let mut best: Option<(EdgeId, f64)> = None;
        for &id in self.graph.out_edges(node) {
            let edge = self.graph.edge(id).ok_or_else(|| {
                TopologyError::InconsistentPlacement {
                    detail: format!("adjacency references unknown edge {}", id),
                }
            })?;
            let dev = bearing_deviation(edge.bearing, direction);
            if best.map_or(true, |(_, bd)| dev < bd) {
                best = Some((id, dev));
            }
        }
        match best {
            Some((id, dev)) if dev <= self.params.max_bearing => Ok(Some(id)),
            _ => Ok(None),
        }
    }

    /// First active camera on `edge` counted from the edge's source node.
    fn first_active_on_edge(&self, edge: EdgeId) -> Result<Option<String>> {
        if !self.placements.edge_has_cameras(edge) {
            return Ok(None);
        }
        let ordered = self.placements.cameras_on_edge(edge)?;
        Ok(ordered.into_iter().find(|c| self.liveness.is_active(c)))
    }

    /// Entry point for a camera placed along an edge.
    ///
    /// The ordered on-edge sequence makes the immediate neighbors known
    /// without traversal; node-rooted searches are only needed when the
    /// camera is first or last among the active occupants of its edge.
    fn from_edge_camera(
        &self,
        camera: &str,
        edge: EdgeId,
        direction: Option<f64>,
    ) -> Result<Vec<String>> {
        // Inactive peers are invisible; the camera itself always takes part
        // so its position in the sequence is well defined.
        let seq: Vec<String> = self
            .placements
            .cameras_on_edge(edge)?
            .into_iter()
            .filter(|c| c == camera || self.liveness.is_active(c))
            .collect();
        let idx = seq.iter().position(|c| c == camera).ok_or_else(|| {
            TopologyError::InconsistentPlacement {
                detail: format!("camera {} mapped to edge {} but absent from it", camera, edge),
            }
        })?;
        let last = seq.len() - 1;

        let Some(direction) = direction else {
            if idx > 0 && idx < last {
                return Ok(vec![seq[idx - 1].clone(), seq[idx + 1].clone()]);
            }
            if seq.len() == 1 {
                // sole occupant: a vehicle may enter or leave from either end
                let mut result = self.from_node(edge.u, None)?.cameras;
                result.extend(self.from_node(edge.v, None)?.cameras);
                return Ok(result);
            }
            if idx == 0 {
                // the search from u stops at this camera's own edge, so the
                // forward neighbor is appended from the sequence directly
                let mut result = self.from_node(edge.u, None)?.cameras;
                result.push(seq[1].clone());
                return Ok(result);
            }
            let mut result = self.from_node(edge.v, None)?.cameras;
            result.push(seq[last - 1].clone());
            return Ok(result);
        };

        let bearing = self
            .graph
            .edge(edge)
            .ok_or_else(|| TopologyError::InconsistentPlacement {
                detail: format!("camera {} placed on unknown edge {}", camera, edge),
            })?
            .bearing;

        if bearing_deviation(bearing, direction) < self.params.max_bearing {
            // travelling source -> destination
            if idx == last {
                Ok(self.from_node(edge.v, None)?.cameras)
            } else {
                Ok(vec![seq[idx + 1].clone()])
            }
        } else if bearing_deviation(reverse_bearing(bearing), direction) < self.params.max_bearing {
            // travelling destination -> source
            if idx == 0 {
                Ok(self.from_node(edge.u, None)?.cameras)
            } else {
                Ok(vec![seq[idx - 1].clone()])
            }
        } else {
            // no traffic flow across this camera in the queried direction
            Ok(Vec::new())
        }
    }
}

/// Directions outside [0, 360] mean "all directions", matching the wire
/// contract where a negative bearing disables the constraint.
fn valid_direction(direction: Option<f64>) -> Option<f64> {
    direction.filter(|d| (0.0..=360.0).contains(d))
}

fn dedup_preserving_order(cameras: &mut Vec<String>) {
    let mut seen = HashSet::new();
    cameras.retain(|c| seen.insert(c.clone()));
}
