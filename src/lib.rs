//! Road-network-aware camera topology engine.
//!
//! Tracks which intersections and road segments of a directed road graph
//! carry a registered camera, keeps each camera's liveness current via
//! heartbeats, and answers downstream queries: the set of active cameras a
//! vehicle could next reach after leaving a given camera's field of view,
//! optionally filtered by the vehicle's heading.
//!
//! # Module Structure
//!
//! - `graph`: immutable directed road network and geometric queries
//! - `placement`: camera-to-node / camera-to-edge side tables
//! - `liveness`: heartbeat tracking and the periodic sweep
//! - `search`: bearing-aware bounded downstream search (the core)
//! - `service`: the dispatcher binding the above into the engine operations
//! - `api`: HTTP transport for the service
//! - `config`: daemon configuration
//!
//! Object detection, re-identification, video storage and map acquisition
//! are external collaborators; this crate only consumes the road graph they
//! produce and the camera registrations they send.

use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Result;
use serde::{Deserialize, Serialize};

pub mod api;
pub mod config;
pub mod geo;
pub mod graph;
pub mod liveness;
pub mod placement;
pub mod search;
pub mod service;

pub use geo::Point;
pub use graph::{EdgeId, GraphDocument, NodeId, RoadGraph, RoadGraphBuilder};
pub use liveness::LivenessTracker;
pub use placement::{CameraPlacementIndex, Placement};
pub use search::{DownstreamSearch, SearchParams};
pub use service::{
    DownstreamCamera, JoinRequest, PlacementInfo, RegisterAck, ServiceConfig, SweeperHandle,
    TopologyService,
};

/// Seconds since the Unix epoch.
pub fn now_s() -> Result<u64> {
    Ok(SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs())
}

// -------------------- Camera Records --------------------

/// Registered camera state. Created on registration, refreshed on heartbeat
/// and by the liveness sweep, removed only on explicit removal. An inactive
/// camera stays registered, it is merely invisible to downstream search.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CameraRecord {
    pub id: String,
    pub position: Point,
    /// Where collaborators subscribe for this camera's detections. Opaque
    /// to the engine.
    pub pubsub_addr: String,
    pub active: bool,
    pub last_heartbeat_s: u64,
}

// -------------------- Error Kinds --------------------

/// Classifiable failures of the topology engine. Carried through `anyhow`
/// so transport layers can downcast and pick a status.
#[derive(Debug)]
pub enum TopologyError {
    /// Registration point is farther than both thresholds from any road
    /// feature.
    PlacementRejected {
        camera: String,
        node_dist_m: f64,
        edge_dist_m: f64,
    },
    /// Operation references a camera id that was never registered.
    UnknownCamera { camera: String },
    /// Internal invariant violation; indicates a bug, aborts the operation.
    InconsistentPlacement { detail: String },
}

impl std::fmt::Display for TopologyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TopologyError::PlacementRejected {
                camera,
                node_dist_m,
                edge_dist_m,
            } => write!(
                f,
                "camera {} too far from any road feature ({:.1} m to nearest node, {:.1} m to nearest edge)",
                camera, node_dist_m, edge_dist_m
            ),
            TopologyError::UnknownCamera { camera } => {
                write!(f, "unknown camera {}", camera)
            }
            TopologyError::InconsistentPlacement { detail } => {
                write!(f, "inconsistent placement state: {}", detail)
            }
        }
    }
}

impl std::error::Error for TopologyError {}
