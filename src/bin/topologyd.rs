//! topologyd - camera topology daemon
//!
//! This daemon:
//! 1. Loads the road graph document
//! 2. Serves camera registration, heartbeat and downstream queries over HTTP
//! 3. Runs the periodic liveness sweep in the background

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::Arc;

use camnet_topology::api::{ApiConfig, ApiServer};
use camnet_topology::config::TopologydConfig;
use camnet_topology::graph::{GraphDocument, RoadGraph};
use camnet_topology::service::TopologyService;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Config file path (JSON). Overrides TOPOLOGY_CONFIG.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Road graph document path. Overrides the config file.
    #[arg(long)]
    graph: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => TopologydConfig::load_from_path(path)?,
        None => TopologydConfig::load()?,
    };
    if let Some(graph) = &args.graph {
        config.graph_path = graph.display().to_string();
    }

    let document = GraphDocument::from_path(config.graph_path.as_ref())?;
    let graph = Arc::new(RoadGraph::from_document(&document)?);
    log::info!(
        "road graph loaded from {}: {} nodes, {} edges",
        config.graph_path,
        graph.node_count(),
        graph.edge_count()
    );

    let service = TopologyService::new(graph, config.service_config());
    let sweeper_handle = service.spawn_sweeper();

    let api_config = ApiConfig {
        addr: config.api_addr.clone(),
    };
    let api_handle = ApiServer::new(api_config, service).spawn()?;
    log::info!("topology api listening on {}", api_handle.addr);

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .expect("error setting Ctrl-C handler");

    log::info!("topologyd waiting for shutdown signal (Ctrl-C)...");
    let _ = rx.recv();
    log::info!("shutdown signal received, stopping...");
    api_handle.stop()?;
    sweeper_handle.stop()?;

    Ok(())
}
