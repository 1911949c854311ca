//! The topology service: camera registry plus request dispatch.
//!
//! Owns the road graph (read-only after load) and a single lock around all
//! mutable camera state: records, placements, liveness. The request path
//! and the background sweep both go through that lock; no operation blocks
//! on I/O while holding it, so hold times are bounded by graph size.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::geo::Point;
use crate::graph::{EdgeId, NodeId, RoadGraph};
use crate::liveness::LivenessTracker;
use crate::placement::{CameraPlacementIndex, Placement};
use crate::search::{DownstreamSearch, SearchParams};
use crate::{now_s, CameraRecord, TopologyError};

#[derive(Clone, Debug)]
pub struct ServiceConfig {
    pub node_threshold_m: f64,
    pub edge_threshold_m: f64,
    pub heartbeat_timeout: Duration,
    pub sweep_interval: Duration,
    pub search: SearchParams,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            node_threshold_m: 5.0,
            edge_threshold_m: 5.0,
            heartbeat_timeout: Duration::from_secs(10),
            sweep_interval: Duration::from_secs(5),
            search: SearchParams::default(),
        }
    }
}

// -------------------- Wire Shapes --------------------

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JoinRequest {
    pub id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub pubsub_addr: String,
}

/// Placement surfaced to callers, identifying where on the road network a
/// camera landed.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlacementInfo {
    Node { node: u64 },
    Edge { u: u64, v: u64, key: u32 },
}

impl From<Placement> for PlacementInfo {
    fn from(p: Placement) -> Self {
        match p {
            Placement::Node(NodeId(node)) => PlacementInfo::Node { node },
            Placement::Edge(EdgeId { u, v, key }) => PlacementInfo::Edge {
                u: u.0,
                v: v.0,
                key,
            },
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RegisterAck {
    pub id: String,
    pub placement: PlacementInfo,
    pub already_registered: bool,
    /// Always true on success. Computing a genuine topology delta would
    /// need the previous placement remembered across re-registration, and
    /// no consumer asks for it yet.
    pub topology_changed: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownstreamCamera {
    pub placement: PlacementInfo,
    pub pubsub_addr: String,
}

// -------------------- Registry --------------------

struct CameraRegistry {
    records: HashMap<String, CameraRecord>,
    placements: CameraPlacementIndex,
    liveness: LivenessTracker,
}

impl CameraRegistry {
    fn new() -> Self {
        Self {
            records: HashMap::new(),
            placements: CameraPlacementIndex::new(),
            liveness: LivenessTracker::new(),
        }
    }
}

// -------------------- Service --------------------

#[derive(Clone)]
pub struct TopologyService {
    graph: Arc<RoadGraph>,
    registry: Arc<Mutex<CameraRegistry>>,
    cfg: ServiceConfig,
}

impl TopologyService {
    pub fn new(graph: Arc<RoadGraph>, cfg: ServiceConfig) -> Self {
        Self {
            graph,
            registry: Arc::new(Mutex::new(CameraRegistry::new())),
            cfg,
        }
    }

    pub fn graph(&self) -> &RoadGraph {
        &self.graph
    }

    fn lock_registry(&self) -> Result<std::sync::MutexGuard<'_, CameraRegistry>> {
        self.registry
            .lock()
            .map_err(|_| anyhow!("camera registry lock poisoned"))
    }

    /// Register a camera (or move it, on re-registration). The point is
    /// classified against the road graph; a camera farther than both
    /// thresholds from any road feature is rejected and nothing is stored.
    /// A rejected re-registration removes the existing camera outright.
    pub fn register(&self, req: &JoinRequest) -> Result<RegisterAck> {
        let mut reg = self.lock_registry()?;
        let already_registered = reg.records.contains_key(&req.id);
        let position = Point::new(req.latitude, req.longitude);

        let placement = match reg.placements.place(
            &self.graph,
            &req.id,
            position,
            self.cfg.node_threshold_m,
            self.cfg.edge_threshold_m,
        ) {
            Ok(placement) => placement,
            Err(err) => {
                // a rejected re-registration removes the camera entirely; it
                // must not keep answering heartbeats with no placement
                if reg.records.remove(&req.id).is_some() {
                    reg.liveness.remove(&req.id);
                    log::warn!("camera {} rejected on re-registration, removed", req.id);
                }
                return Err(err);
            }
        };

        let now = now_s()?;
        reg.liveness.touch(&req.id, now);
        reg.records.insert(
            req.id.clone(),
            CameraRecord {
                id: req.id.clone(),
                position,
                pubsub_addr: req.pubsub_addr.clone(),
                active: true,
                last_heartbeat_s: now,
            },
        );

        log::info!(
            "camera {} registered at ({:.6}, {:.6}): {:?}{}",
            req.id,
            req.latitude,
            req.longitude,
            placement,
            if already_registered { " (moved)" } else { "" }
        );

        Ok(RegisterAck {
            id: req.id.clone(),
            placement: placement.into(),
            already_registered,
            topology_changed: true,
        })
    }

    /// Record a heartbeat and echo the camera's current record.
    pub fn heartbeat(&self, camera: &str) -> Result<CameraRecord> {
        let mut reg = self.lock_registry()?;
        if !reg.records.contains_key(camera) {
            return Err(TopologyError::UnknownCamera {
                camera: camera.to_string(),
            }
            .into());
        }
        let now = now_s()?;
        reg.liveness.touch(camera, now);
        let record = reg
            .records
            .get_mut(camera)
            .ok_or_else(|| anyhow!("record vanished under lock"))?;
        record.last_heartbeat_s = now;
        record.active = true;
        Ok(record.clone())
    }

    /// Active cameras a vehicle could next reach from `camera`, keyed by
    /// camera id. Unknown or unreachable cameras yield an empty map.
    pub fn downstream(
        &self,
        camera: &str,
        direction: Option<f64>,
    ) -> Result<BTreeMap<String, DownstreamCamera>> {
        let reg = self.lock_registry()?;
        let search = DownstreamSearch::new(
            &self.graph,
            &reg.placements,
            &reg.liveness,
            self.cfg.search,
        );
        let cameras = search.from_camera(camera, direction)?;

        let mut result = BTreeMap::new();
        for id in cameras {
            let Some(record) = reg.records.get(&id) else {
                // placed but never registered would be a bug; skip rather
                // than fail the whole query
                log::warn!("search returned camera {} with no record", id);
                continue;
            };
            let Some(placement) = reg.placements.placement_of(&id) else {
                continue;
            };
            result.insert(
                id,
                DownstreamCamera {
                    placement: placement.into(),
                    pubsub_addr: record.pubsub_addr.clone(),
                },
            );
        }
        Ok(result)
    }

    /// Explicitly remove a camera from the topology. Returns whether it was
    /// registered. The liveness sweep never calls this.
    pub fn remove(&self, camera: &str) -> Result<bool> {
        let mut reg = self.lock_registry()?;
        reg.placements.remove(camera);
        reg.liveness.remove(camera);
        let existed = reg.records.remove(camera).is_some();
        if existed {
            log::info!("camera {} removed from topology", camera);
        }
        Ok(existed)
    }

    /// One liveness sweep at `now_s`, toggling active flags on records.
    pub fn sweep_once(&self, now_s: u64) -> Result<()> {
        let mut reg = self.lock_registry()?;
        let timeout = self.cfg.heartbeat_timeout;
        reg.liveness.sweep(now_s, timeout);
        let CameraRegistry {
            records, liveness, ..
        } = &mut *reg;
        for (id, record) in records.iter_mut() {
            record.active = liveness.is_active(id);
        }
        Ok(())
    }

    /// Spawn the periodic liveness sweep. The thread re-evaluates every
    /// camera each interval until the handle is stopped.
    pub fn spawn_sweeper(&self) -> SweeperHandle {
        let service = self.clone();
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let interval = self.cfg.sweep_interval;
        let join = std::thread::spawn(move || {
            let mut elapsed = Duration::ZERO;
            loop {
                if shutdown_thread.load(Ordering::SeqCst) {
                    break;
                }
                if elapsed >= interval {
                    elapsed = Duration::ZERO;
                    match now_s() {
                        Ok(now) => {
                            if let Err(err) = service.sweep_once(now) {
                                log::error!("liveness sweep failed: {}", err);
                            }
                        }
                        Err(err) => log::error!("liveness sweep skipped: {}", err),
                    }
                }
                let step = Duration::from_millis(50);
                std::thread::sleep(step);
                elapsed += step;
            }
        });
        SweeperHandle {
            shutdown,
            join: Some(join),
        }
    }
}

/// Stop handle for the background sweep: signal, then join.
pub struct SweeperHandle {
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl SweeperHandle {
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("liveness sweeper thread panicked"))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::RoadGraphBuilder;

    fn service() -> TopologyService {
        let mut b = RoadGraphBuilder::new();
        b.add_node(NodeId(1), Point::new(33.0000, -84.0000));
        b.add_node(NodeId(2), Point::new(33.0000, -83.9900));
        b.add_two_way(NodeId(1), NodeId(2));
        let graph = b.build().expect("graph");
        TopologyService::new(Arc::new(graph), ServiceConfig::default())
    }

    fn join(id: &str, lat: f64, lon: f64) -> JoinRequest {
        JoinRequest {
            id: id.to_string(),
            latitude: lat,
            longitude: lon,
            pubsub_addr: format!("tcp://{}:5556", id),
        }
    }

    #[test]
    fn register_acknowledges_placement() {
        let svc = service();
        let ack = svc
            .register(&join("cam-1", 33.0000, -84.0000))
            .expect("register");
        assert_eq!(ack.placement, PlacementInfo::Node { node: 1 });
        assert!(!ack.already_registered);
        assert!(ack.topology_changed);

        // re-registration at a new valid point moves the single placement
        let ack = svc
            .register(&join("cam-1", 33.0000, -83.9900))
            .expect("re-register");
        assert_eq!(ack.placement, PlacementInfo::Node { node: 2 });
        assert!(ack.already_registered);
    }

    #[test]
    fn register_rejects_offroad_cameras() {
        let svc = service();
        let err = svc
            .register(&join("cam-lost", 33.0500, -84.0000))
            .expect_err("must reject");
        assert!(matches!(
            err.downcast_ref::<TopologyError>(),
            Some(TopologyError::PlacementRejected { .. })
        ));
        // nothing was stored for the rejected camera
        assert!(svc.heartbeat("cam-lost").is_err());
    }

    #[test]
    fn rejected_re_registration_removes_the_camera_entirely() {
        let svc = service();
        svc.register(&join("cam-1", 33.0000, -84.0000))
            .expect("register");
        svc.register(&join("cam-2", 33.0000, -83.9900))
            .expect("register");

        // moving cam-1 to an off-road point is rejected
        let err = svc
            .register(&join("cam-1", 33.0500, -84.0000))
            .expect_err("must reject");
        assert!(matches!(
            err.downcast_ref::<TopologyError>(),
            Some(TopologyError::PlacementRejected { .. })
        ));

        // the camera is fully gone, not half-removed: no record answering
        // heartbeats while absent from the topology
        let err = svc.heartbeat("cam-1").expect_err("no longer registered");
        assert!(matches!(
            err.downcast_ref::<TopologyError>(),
            Some(TopologyError::UnknownCamera { .. })
        ));
        assert!(svc.downstream("cam-2", None).expect("query").is_empty());
    }

    #[test]
    fn heartbeat_requires_registration() {
        let svc = service();
        let err = svc.heartbeat("ghost").expect_err("unknown camera");
        assert!(matches!(
            err.downcast_ref::<TopologyError>(),
            Some(TopologyError::UnknownCamera { .. })
        ));

        svc.register(&join("cam-1", 33.0000, -84.0000))
            .expect("register");
        let record = svc.heartbeat("cam-1").expect("heartbeat");
        assert!(record.active);
        assert_eq!(record.id, "cam-1");
    }

    #[test]
    fn downstream_of_unknown_camera_is_empty() {
        let svc = service();
        let result = svc.downstream("ghost", None).expect("query");
        assert!(result.is_empty());
    }

    #[test]
    fn downstream_carries_pubsub_addresses() {
        let svc = service();
        svc.register(&join("cam-1", 33.0000, -84.0000))
            .expect("register");
        svc.register(&join("cam-2", 33.0000, -83.9900))
            .expect("register");

        let result = svc.downstream("cam-1", None).expect("query");
        let neighbor = result.get("cam-2").expect("cam-2 downstream");
        assert_eq!(neighbor.pubsub_addr, "tcp://cam-2:5556");
        assert_eq!(neighbor.placement, PlacementInfo::Node { node: 2 });
    }

    #[test]
    fn sweep_hides_silent_cameras_until_next_heartbeat() {
        let svc = service();
        svc.register(&join("cam-1", 33.0000, -84.0000))
            .expect("register");
        svc.register(&join("cam-2", 33.0000, -83.9900))
            .expect("register");

        // far future: everyone is silent
        let future = now_s().expect("clock") + 3_600;
        svc.sweep_once(future).expect("sweep");
        assert!(svc.downstream("cam-1", None).expect("query").is_empty());

        // a heartbeat brings cam-2 straight back
        svc.heartbeat("cam-2").expect("heartbeat");
        let result = svc.downstream("cam-1", None).expect("query");
        assert!(result.contains_key("cam-2"));
    }

    #[test]
    fn removal_takes_the_camera_out_of_every_table() {
        let svc = service();
        svc.register(&join("cam-1", 33.0000, -84.0000))
            .expect("register");
        assert!(svc.remove("cam-1").expect("remove"));
        assert!(!svc.remove("cam-1").expect("second remove"));
        assert!(svc.heartbeat("cam-1").is_err());
    }

    #[test]
    fn sweeper_stops_cleanly() {
        let svc = service();
        let handle = svc.spawn_sweeper();
        std::thread::sleep(Duration::from_millis(120));
        handle.stop().expect("stop sweeper");
    }
}
