use anyhow::Result;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use distributed_mapstore::cluster::{self, ClusterHandle};
use distributed_mapstore::config::ConfigLoader;
use distributed_mapstore::logging;
use distributed_mapstore::persistence::domain::MemoryDomainClient;
use distributed_mapstore::persistence::table::MemoryTableClient;
use distributed_mapstore::persistence::{
    DelegatingStoreFactory, HttpConnector, MapStoreFactory, MemoryConnector, StoreConnector,
};

/// Cluster node serving distributed maps backed by external stores.
#[derive(Debug, Parser)]
#[command(name = "mapstore-node", version, about)]
struct Args {
    /// TOML configuration file
    #[arg(short, long, env = "MAPSTORE_CONFIG")]
    config: Option<PathBuf>,

    /// Gossip bind address, overrides the configuration
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// Seed node gossip address, repeatable
    #[arg(long = "seed")]
    seeds: Vec<SocketAddr>,

    /// Serve every store from in-process tables and domains
    #[arg(long)]
    memory_backend: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = ConfigLoader::load(args.config.as_deref())?;
    if let Some(bind) = args.bind {
        config.bind = bind;
    }
    if !args.seeds.is_empty() {
        config.seeds = args.seeds;
    }
    logging::init(&config.logging)?;

    let connector: Arc<dyn StoreConnector> = if args.memory_backend {
        tracing::warn!("Using in-memory backends, nothing outlives this process");
        Arc::new(MemoryConnector::new(
            MemoryTableClient::new(),
            MemoryDomainClient::new(),
            true,
        ))
    } else {
        Arc::new(HttpConnector)
    };
    let factory: Arc<dyn MapStoreFactory> = DelegatingStoreFactory::new(connector);
    cluster::install_persistence(&mut config, Some(factory));

    let handle = Arc::new(cluster::start(config).await?);
    tracing::info!(
        "Node [{}] gossiping on {}, serving maps on {}",
        handle.name(),
        handle.gossip_addr(),
        handle.http_addr()
    );
    let reporter = tokio::spawn(report_stats(handle.clone()));

    tracing::info!("Press Ctrl+C to shutdown");
    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown requested");

    reporter.abort();
    cluster::stop(Some(&handle)).await;
    Ok(())
}

async fn report_stats(handle: Arc<ClusterHandle>) {
    let mut interval = tokio::time::interval(Duration::from_secs(30));
    loop {
        interval.tick().await;
        let members = handle.members();
        tracing::info!("Cluster stats: {} alive nodes", members.len());
        for member in &members {
            tracing::debug!("  - {}", member);
        }
    }
}
