use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::search::SearchParams;
use crate::service::ServiceConfig;

const DEFAULT_API_ADDR: &str = "127.0.0.1:8790";
const DEFAULT_GRAPH_PATH: &str = "road_graph.json";
const DEFAULT_NODE_THRESHOLD_M: f64 = 5.0;
const DEFAULT_EDGE_THRESHOLD_M: f64 = 5.0;
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 5;
const DEFAULT_HEARTBEAT_TIMEOUT_SECS: u64 = 10;
const DEFAULT_MAX_DFS: u32 = 5;
const DEFAULT_MAX_BEARING: f64 = 90.0;

#[derive(Debug, Deserialize, Default)]
struct TopologydConfigFile {
    api: Option<ApiConfigFile>,
    map: Option<MapConfigFile>,
    placement: Option<PlacementConfigFile>,
    liveness: Option<LivenessConfigFile>,
    search: Option<SearchConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct ApiConfigFile {
    addr: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct MapConfigFile {
    graph_path: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct PlacementConfigFile {
    node_threshold_m: Option<f64>,
    edge_threshold_m: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
struct LivenessConfigFile {
    sweep_interval_secs: Option<u64>,
    heartbeat_timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct SearchConfigFile {
    max_dfs: Option<u32>,
    max_bearing: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct TopologydConfig {
    pub api_addr: String,
    pub graph_path: String,
    pub node_threshold_m: f64,
    pub edge_threshold_m: f64,
    pub sweep_interval: Duration,
    pub heartbeat_timeout: Duration,
    pub max_dfs: u32,
    pub max_bearing: f64,
}

impl TopologydConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("TOPOLOGY_CONFIG").ok();
        Self::load_with_file(config_path.as_deref().map(Path::new))
    }

    /// Like `load`, but with an explicit config file path taking precedence
    /// over `TOPOLOGY_CONFIG`.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        Self::load_with_file(Some(path))
    }

    fn load_with_file(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: TopologydConfigFile) -> Self {
        let api_addr = file
            .api
            .and_then(|api| api.addr)
            .unwrap_or_else(|| DEFAULT_API_ADDR.to_string());
        let graph_path = file
            .map
            .and_then(|map| map.graph_path)
            .unwrap_or_else(|| DEFAULT_GRAPH_PATH.to_string());
        let node_threshold_m = file
            .placement
            .as_ref()
            .and_then(|placement| placement.node_threshold_m)
            .unwrap_or(DEFAULT_NODE_THRESHOLD_M);
        let edge_threshold_m = file
            .placement
            .as_ref()
            .and_then(|placement| placement.edge_threshold_m)
            .unwrap_or(DEFAULT_EDGE_THRESHOLD_M);
        let sweep_interval = Duration::from_secs(
            file.liveness
                .as_ref()
                .and_then(|liveness| liveness.sweep_interval_secs)
                .unwrap_or(DEFAULT_SWEEP_INTERVAL_SECS),
        );
        let heartbeat_timeout = Duration::from_secs(
            file.liveness
                .and_then(|liveness| liveness.heartbeat_timeout_secs)
                .unwrap_or(DEFAULT_HEARTBEAT_TIMEOUT_SECS),
        );
        let max_dfs = file
            .search
            .as_ref()
            .and_then(|search| search.max_dfs)
            .unwrap_or(DEFAULT_MAX_DFS);
        let max_bearing = file
            .search
            .and_then(|search| search.max_bearing)
            .unwrap_or(DEFAULT_MAX_BEARING);
        Self {
            api_addr,
            graph_path,
            node_threshold_m,
            edge_threshold_m,
            sweep_interval,
            heartbeat_timeout,
            max_dfs,
            max_bearing,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(addr) = std::env::var("TOPOLOGY_API_ADDR") {
            if !addr.trim().is_empty() {
                self.api_addr = addr;
            }
        }
        if let Ok(path) = std::env::var("TOPOLOGY_GRAPH_PATH") {
            if !path.trim().is_empty() {
                self.graph_path = path;
            }
        }
        if let Ok(value) = std::env::var("TOPOLOGY_NODE_THRESHOLD_M") {
            self.node_threshold_m = value
                .parse()
                .map_err(|_| anyhow!("TOPOLOGY_NODE_THRESHOLD_M must be a number of meters"))?;
        }
        if let Ok(value) = std::env::var("TOPOLOGY_EDGE_THRESHOLD_M") {
            self.edge_threshold_m = value
                .parse()
                .map_err(|_| anyhow!("TOPOLOGY_EDGE_THRESHOLD_M must be a number of meters"))?;
        }
        if let Ok(value) = std::env::var("TOPOLOGY_SWEEP_INTERVAL_SECS") {
            let seconds: u64 = value.parse().map_err(|_| {
                anyhow!("TOPOLOGY_SWEEP_INTERVAL_SECS must be an integer number of seconds")
            })?;
            self.sweep_interval = Duration::from_secs(seconds);
        }
        if let Ok(value) = std::env::var("TOPOLOGY_HEARTBEAT_TIMEOUT_SECS") {
            let seconds: u64 = value.parse().map_err(|_| {
                anyhow!("TOPOLOGY_HEARTBEAT_TIMEOUT_SECS must be an integer number of seconds")
            })?;
            self.heartbeat_timeout = Duration::from_secs(seconds);
        }
        if let Ok(value) = std::env::var("TOPOLOGY_MAX_DFS") {
            self.max_dfs = value
                .parse()
                .map_err(|_| anyhow!("TOPOLOGY_MAX_DFS must be an integer edge count"))?;
        }
        if let Ok(value) = std::env::var("TOPOLOGY_MAX_BEARING") {
            self.max_bearing = value
                .parse()
                .map_err(|_| anyhow!("TOPOLOGY_MAX_BEARING must be a number of degrees"))?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.node_threshold_m <= 0.0 || self.edge_threshold_m <= 0.0 {
            return Err(anyhow!("placement thresholds must be greater than zero"));
        }
        if self.sweep_interval.as_secs() == 0 {
            return Err(anyhow!("sweep interval must be greater than zero"));
        }
        if self.heartbeat_timeout.as_secs() == 0 {
            return Err(anyhow!("heartbeat timeout must be greater than zero"));
        }
        if self.max_dfs == 0 {
            return Err(anyhow!("max_dfs must be greater than zero"));
        }
        if !(0.0..=180.0).contains(&self.max_bearing) {
            return Err(anyhow!("max_bearing must be between 0 and 180 degrees"));
        }
        Ok(())
    }

    pub fn service_config(&self) -> ServiceConfig {
        ServiceConfig {
            node_threshold_m: self.node_threshold_m,
            edge_threshold_m: self.edge_threshold_m,
            heartbeat_timeout: self.heartbeat_timeout,
            sweep_interval: self.sweep_interval,
            search: SearchParams {
                max_dfs: self.max_dfs,
                max_bearing: self.max_bearing,
            },
        }
    }
}

fn read_config_file(path: &Path) -> Result<TopologydConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}
