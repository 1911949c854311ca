use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use camnet_topology::config::TopologydConfig;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "TOPOLOGY_CONFIG",
        "TOPOLOGY_API_ADDR",
        "TOPOLOGY_GRAPH_PATH",
        "TOPOLOGY_NODE_THRESHOLD_M",
        "TOPOLOGY_EDGE_THRESHOLD_M",
        "TOPOLOGY_SWEEP_INTERVAL_SECS",
        "TOPOLOGY_HEARTBEAT_TIMEOUT_SECS",
        "TOPOLOGY_MAX_DFS",
        "TOPOLOGY_MAX_BEARING",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn defaults_apply_without_file_or_env() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = TopologydConfig::load().expect("load config");

    assert_eq!(cfg.api_addr, "127.0.0.1:8790");
    assert_eq!(cfg.graph_path, "road_graph.json");
    assert_eq!(cfg.node_threshold_m, 5.0);
    assert_eq!(cfg.edge_threshold_m, 5.0);
    assert_eq!(cfg.sweep_interval, Duration::from_secs(5));
    assert_eq!(cfg.heartbeat_timeout, Duration::from_secs(10));
    assert_eq!(cfg.max_dfs, 5);
    assert_eq!(cfg.max_bearing, 90.0);

    clear_env();
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "api": {
            "addr": "0.0.0.0:9100"
        },
        "map": {
            "graph_path": "campus_graph.json"
        },
        "placement": {
            "node_threshold_m": 8.0,
            "edge_threshold_m": 3.5
        },
        "liveness": {
            "sweep_interval_secs": 2,
            "heartbeat_timeout_secs": 30
        },
        "search": {
            "max_dfs": 8,
            "max_bearing": 45.0
        }
    }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("TOPOLOGY_CONFIG", file.path());
    std::env::set_var("TOPOLOGY_API_ADDR", "127.0.0.1:9200");
    std::env::set_var("TOPOLOGY_HEARTBEAT_TIMEOUT_SECS", "60");

    let cfg = TopologydConfig::load().expect("load config");

    assert_eq!(cfg.api_addr, "127.0.0.1:9200");
    assert_eq!(cfg.graph_path, "campus_graph.json");
    assert_eq!(cfg.node_threshold_m, 8.0);
    assert_eq!(cfg.edge_threshold_m, 3.5);
    assert_eq!(cfg.sweep_interval, Duration::from_secs(2));
    assert_eq!(cfg.heartbeat_timeout, Duration::from_secs(60));
    assert_eq!(cfg.max_dfs, 8);
    assert_eq!(cfg.max_bearing, 45.0);

    clear_env();
}

#[test]
fn rejects_invalid_values() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("TOPOLOGY_MAX_DFS", "0");
    assert!(TopologydConfig::load().is_err());

    std::env::set_var("TOPOLOGY_MAX_DFS", "5");
    std::env::set_var("TOPOLOGY_MAX_BEARING", "270");
    assert!(TopologydConfig::load().is_err());

    clear_env();
}
