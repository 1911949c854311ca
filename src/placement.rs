//! Camera placement bookkeeping.
//!
//! Maps each registered camera to either an intersection (node placement) or
//! a position along a road segment (edge placement). The graph itself stays
//! immutable; this index owns all mutable association state as side tables.
//!
//! Invariants:
//! - a camera appears in at most one of the two placement tables;
//! - cameras on the same edge are kept sorted ascending by distance from the
//!   edge's source node, so "next camera on this edge" is an index lookup.

use std::collections::{BTreeSet, HashMap};

use anyhow::Result;

use crate::geo::{haversine_m, Point};
use crate::graph::{EdgeId, NodeId, RoadGraph};
use crate::TopologyError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Placement {
    Node(NodeId),
    Edge(EdgeId),
}

#[derive(Clone, Debug)]
struct EdgeSlot {
    camera: String,
    dist_from_source_m: f64,
}

#[derive(Clone, Debug)]
struct EdgeCameraList {
    /// The node the ordering is measured from. Must match the edge's source.
    from: NodeId,
    slots: Vec<EdgeSlot>,
}

#[derive(Default)]
pub struct CameraPlacementIndex {
    camera_to_node: HashMap<String, NodeId>,
    camera_to_edge: HashMap<String, EdgeId>,
    node_cameras: HashMap<NodeId, BTreeSet<String>>,
    edge_cameras: HashMap<EdgeId, EdgeCameraList>,
}

impl CameraPlacementIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify `point` against the graph and record the placement.
    ///
    /// Nearest node strictly under `node_threshold_m` wins; otherwise the
    /// nearest edge strictly under `edge_threshold_m`; otherwise the camera
    /// is rejected. Any stale placement for the same camera is removed
    /// first, so re-registration never leaves duplicate entries.
    pub fn place(
        &mut self,
        graph: &RoadGraph,
        camera: &str,
        point: Point,
        node_threshold_m: f64,
        edge_threshold_m: f64,
    ) -> Result<Placement> {
        self.remove(camera);

        let (node, node_dist) = graph.nearest_node(point)?;
        if node_dist < node_threshold_m {
            self.camera_to_node.insert(camera.to_string(), node);
            self.node_cameras
                .entry(node)
                .or_default()
                .insert(camera.to_string());
            return Ok(Placement::Node(node));
        }

        let (edge, edge_dist) = graph.nearest_edge(point)?;
        if edge_dist < edge_threshold_m {
            self.attach_to_edge(graph, camera, edge, point)?;
            return Ok(Placement::Edge(edge));
        }

        Err(TopologyError::PlacementRejected {
            camera: camera.to_string(),
            node_dist_m: node_dist,
            edge_dist_m: edge_dist,
        }
        .into())
    }

    fn attach_to_edge(
        &mut self,
        graph: &RoadGraph,
        camera: &str,
        edge: EdgeId,
        point: Point,
    ) -> Result<()> {
        // Both directions of a road share one ordered list; if the sibling
        // edge already holds it, attach there.
        let (canonical, from) = match self.list_for(edge) {
            Some((list, id)) => (id, list.from),
            None => (edge, edge.u),
        };
        if from != canonical.u && from != canonical.v {
            return Err(TopologyError::InconsistentPlacement {
                detail: format!("edge {} ordered from foreign node {}", canonical, from),
            }
            .into());
        }
        let from_position = graph
            .node(from)
            .ok_or_else(|| TopologyError::InconsistentPlacement {
                detail: format!("edge {} ordered from unknown node {}", canonical, from),
            })?
            .position;
        let dist = haversine_m(from_position, point);

        let list = self
            .edge_cameras
            .entry(canonical)
            .or_insert_with(|| EdgeCameraList {
                from,
                slots: Vec::new(),
            });
        let slot = EdgeSlot {
            camera: camera.to_string(),
            dist_from_source_m: dist,
        };
        let at = list
            .slots
            .iter()
            .position(|s| dist < s.dist_from_source_m)
            .unwrap_or(list.slots.len());
        list.slots.insert(at, slot);
        self.camera_to_edge.insert(camera.to_string(), canonical);
        Ok(())
    }

    /// The ordered list covering `edge`, stored under either the edge itself
    /// or its reverse sibling.
    fn list_for(&self, edge: EdgeId) -> Option<(&EdgeCameraList, EdgeId)> {
        if let Some(list) = self.edge_cameras.get(&edge) {
            return Some((list, edge));
        }
        let sibling = EdgeId {
            u: edge.v,
            v: edge.u,
            key: edge.key,
        };
        self.edge_cameras.get(&sibling).map(|list| (list, sibling))
    }

    /// Remove a camera from whichever placement it has. Edge sequences are
    /// spliced, preserving the order of the remaining cameras.
    pub fn remove(&mut self, camera: &str) -> Option<Placement> {
        if let Some(node) = self.camera_to_node.remove(camera) {
            if let Some(set) = self.node_cameras.get_mut(&node) {
                set.remove(camera);
                if set.is_empty() {
                    self.node_cameras.remove(&node);
                }
            }
            return Some(Placement::Node(node));
        }
        if let Some(edge) = self.camera_to_edge.remove(camera) {
            if let Some(list) = self.edge_cameras.get_mut(&edge) {
                list.slots.retain(|s| s.camera != camera);
                if list.slots.is_empty() {
                    self.edge_cameras.remove(&edge);
                }
            }
            return Some(Placement::Edge(edge));
        }
        None
    }

    pub fn placement_of(&self, camera: &str) -> Option<Placement> {
        if let Some(node) = self.camera_to_node.get(camera) {
            return Some(Placement::Node(*node));
        }
        self.camera_to_edge
            .get(camera)
            .map(|edge| Placement::Edge(*edge))
    }

    pub fn cameras_at_node(&self, node: NodeId) -> impl Iterator<Item = &str> {
        self.node_cameras
            .get(&node)
            .into_iter()
            .flat_map(|set| set.iter().map(String::as_str))
    }

    pub fn node_has_cameras(&self, node: NodeId) -> bool {
        self.node_cameras
            .get(&node)
            .is_some_and(|set| !set.is_empty())
    }

    pub fn edge_has_cameras(&self, edge: EdgeId) -> bool {
        self.list_for(edge)
            .is_some_and(|(list, _)| !list.slots.is_empty())
    }

    /// Cameras on `edge`, index 0 nearest the edge's source node. Queried
    /// against the reverse direction of the recorded list, the sequence
    /// comes back reversed.
    ///
    /// Fails with `InconsistentPlacement` if the recorded ordering node is
    /// not one of the edge's endpoints; that indicates an internal bug and
    /// must abort the operation rather than return a misordered sequence.
    pub fn cameras_on_edge(&self, edge: EdgeId) -> Result<Vec<String>> {
        let Some((list, _)) = self.list_for(edge) else {
            return Ok(Vec::new());
        };
        if list.from == edge.u {
            Ok(list.slots.iter().map(|s| s.camera.clone()).collect())
        } else if list.from == edge.v {
            Ok(list.slots.iter().rev().map(|s| s.camera.clone()).collect())
        } else {
            Err(TopologyError::InconsistentPlacement {
                detail: format!(
                    "edge {} ordered from node {} which is not an endpoint",
                    edge, list.from
                ),
            }
            .into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::RoadGraphBuilder;

    // One long east-west road with a node at each end.
    fn road() -> RoadGraph {
        let mut b = RoadGraphBuilder::new();
        b.add_node(NodeId(1), Point::new(33.0000, -84.0000));
        b.add_node(NodeId(2), Point::new(33.0000, -83.9900));
        b.add_two_way(NodeId(1), NodeId(2));
        b.build().expect("graph")
    }

    fn edge_1_2() -> EdgeId {
        EdgeId {
            u: NodeId(1),
            v: NodeId(2),
            key: 0,
        }
    }

    #[test]
    fn classifies_node_and_edge_cameras() {
        let g = road();
        let mut idx = CameraPlacementIndex::new();

        let p = idx
            .place(&g, "corner", Point::new(33.0000, -84.0000), 5.0, 5.0)
            .expect("node camera");
        assert_eq!(p, Placement::Node(NodeId(1)));

        // mid-segment, ~2 m off the centerline
        let p = idx
            .place(&g, "mid", Point::new(33.00002, -83.9950), 5.0, 5.0)
            .expect("edge camera");
        assert_eq!(p, Placement::Edge(edge_1_2()));
        assert_eq!(idx.cameras_on_edge(edge_1_2()).unwrap(), vec!["mid"]);
    }

    #[test]
    fn rejects_points_far_from_any_road_feature() {
        let g = road();
        let mut idx = CameraPlacementIndex::new();
        let err = idx
            .place(&g, "lost", Point::new(33.0100, -83.9950), 5.0, 5.0)
            .expect_err("must reject");
        let err = err
            .downcast_ref::<TopologyError>()
            .expect("topology error");
        assert!(matches!(err, TopologyError::PlacementRejected { .. }));
        assert!(idx.placement_of("lost").is_none());
    }

    #[test]
    fn threshold_boundary_is_strict() {
        let g = road();
        let mut idx = CameraPlacementIndex::new();
        let point = Point::new(33.00003, -84.0000);
        let (_, node_dist) = g.nearest_node(point).expect("distance");

        // exactly at the threshold: rejected
        assert!(idx.place(&g, "cam", point, node_dist, 0.0).is_err());
        // just inside: accepted
        idx.place(&g, "cam", point, node_dist + 1e-6, 0.0)
            .expect("inside threshold");
    }

    #[test]
    fn edge_sequence_stays_sorted_by_distance_from_source() {
        let g = road();
        let mut idx = CameraPlacementIndex::new();
        // insert out of order; all ~2 m off the centerline
        idx.place(&g, "far", Point::new(33.00002, -83.9920), 5.0, 5.0)
            .expect("far");
        idx.place(&g, "near", Point::new(33.00002, -83.9980), 5.0, 5.0)
            .expect("near");
        idx.place(&g, "middle", Point::new(33.00002, -83.9950), 5.0, 5.0)
            .expect("middle");

        assert_eq!(
            idx.cameras_on_edge(edge_1_2()).unwrap(),
            vec!["near", "middle", "far"]
        );

        // reverse orientation is the caller's reversal of the same list
        idx.remove("middle");
        assert_eq!(idx.cameras_on_edge(edge_1_2()).unwrap(), vec!["near", "far"]);
    }

    #[test]
    fn reverse_direction_query_reverses_the_sequence() {
        let g = road();
        let mut idx = CameraPlacementIndex::new();
        idx.place(&g, "near", Point::new(33.00002, -83.9980), 5.0, 5.0)
            .expect("near");
        idx.place(&g, "far", Point::new(33.00002, -83.9920), 5.0, 5.0)
            .expect("far");

        let reverse = EdgeId {
            u: NodeId(2),
            v: NodeId(1),
            key: 0,
        };
        assert_eq!(idx.cameras_on_edge(edge_1_2()).unwrap(), vec!["near", "far"]);
        assert_eq!(idx.cameras_on_edge(reverse).unwrap(), vec!["far", "near"]);
        assert!(idx.edge_has_cameras(reverse));
    }

    #[test]
    fn re_placing_removes_stale_placement() {
        let g = road();
        let mut idx = CameraPlacementIndex::new();
        idx.place(&g, "cam", Point::new(33.0000, -84.0000), 5.0, 5.0)
            .expect("node placement");
        assert_eq!(idx.placement_of("cam"), Some(Placement::Node(NodeId(1))));

        idx.place(&g, "cam", Point::new(33.00002, -83.9950), 5.0, 5.0)
            .expect("edge placement");
        assert_eq!(idx.placement_of("cam"), Some(Placement::Edge(edge_1_2())));
        assert!(!idx.node_has_cameras(NodeId(1)));
        assert_eq!(idx.cameras_on_edge(edge_1_2()).unwrap().len(), 1);
    }

    #[test]
    fn inconsistent_ordering_node_aborts_queries() {
        let g = road();
        let mut idx = CameraPlacementIndex::new();
        idx.place(&g, "cam", Point::new(33.00002, -83.9950), 5.0, 5.0)
            .expect("edge placement");

        // simulate corruption: ordering node that is not an endpoint
        idx.edge_cameras.get_mut(&edge_1_2()).unwrap().from = NodeId(99);
        let err = idx.cameras_on_edge(edge_1_2()).expect_err("must fail");
        assert!(matches!(
            err.downcast_ref::<TopologyError>(),
            Some(TopologyError::InconsistentPlacement { .. })
        ));
    }
}
