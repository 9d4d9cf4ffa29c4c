use anyhow::{Context, Result};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::config::ClusterConfig;
use crate::membership::service::MembershipService;
use crate::membership::types::Node;
use crate::persistence::MapStoreFactory;
use crate::storage::handlers;
use crate::storage::partitioner::PartitionManager;
use crate::storage::registry::{MapRegistry, StringMap};

/// Values held by the maps of a node started through `start`.
pub type Document = Value;

/// Binds `factory` to every declared map store. Without a factory the
/// configuration is left untouched.
pub fn install_persistence(config: &mut ClusterConfig, factory: Option<Arc<dyn MapStoreFactory>>) {
    let Some(factory) = factory else {
        tracing::info!("No store factory supplied, maps run without persistence");
        return;
    };

    for (name, map) in config.maps.iter_mut() {
        if let Some(store) = map.store.as_mut() {
            tracing::info!(
                "Installing store factory for map [{}] ({:?}, enabled: {})",
                name,
                store.engine,
                store.enabled
            );
            store.factory.bind(factory.clone());
        }
    }
}

struct Server {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// A running node.
pub struct ClusterHandle {
    name: String,
    membership: Arc<MembershipService>,
    maps: Arc<MapRegistry<Document>>,
    http_addr: SocketAddr,
    server: Mutex<Option<Server>>,
    stopped: AtomicBool,
}

impl ClusterHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn http_addr(&self) -> SocketAddr {
        self.http_addr
    }

    pub fn gossip_addr(&self) -> SocketAddr {
        self.membership.local_node.gossip_addr
    }

    pub fn local_member(&self) -> &Node {
        &self.membership.local_node
    }

    /// Alive members, this node included.
    pub fn members(&self) -> Vec<Node> {
        let mut members = self.membership.get_alive_members();
        members.sort_by(|a, b| a.id.0.cmp(&b.id.0));
        members
    }

    pub fn membership(&self) -> &Arc<MembershipService> {
        &self.membership
    }

    pub async fn map(&self, name: &str) -> Result<Arc<StringMap<Document>>> {
        self.maps.get_map(name).await
    }

    pub fn is_running(&self) -> bool {
        !self.stopped.load(Ordering::Acquire)
    }

    /// Stops serving, flushes and tears down persistence, then leaves the cluster.
    /// Only the first call does anything.
    ///
    /// HTTP goes first so that no write is acknowledged once the adapters
    /// can no longer persist it.
    pub async fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::info!("Stopping node [{}]", self.name);

        let server = match self.server.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(server) = server {
            let _ = server.shutdown.send(());
            if let Err(e) = server.task.await {
                tracing::warn!("HTTP server task ended abnormally: {}", e);
            }
        }

        self.maps.shutdown().await;
        for factory in self.maps.factories() {
            factory.shutdown().await;
        }

        self.membership.shutdown();
        tracing::info!("Node [{}] stopped", self.name);
    }
}

fn describe_members(members: &[Node]) -> String {
    members
        .iter()
        .map(|m| format!("{}@{}", m.id, m.gossip_addr))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Starts a node and waits until it is part of a cluster.
///
/// Fails when the node cannot join within the configured timeout or when a map
/// that loads eagerly cannot initialize its persistence.
pub async fn start(config: ClusterConfig) -> Result<ClusterHandle> {
    tracing::info!("----------------------------------------");
    tracing::info!("Starting node [{}] on {}", config.name, config.bind);
    if config.seeds.is_empty() {
        tracing::info!("Starting as seed node (founder)");
    } else {
        tracing::info!("Seed nodes: {:?}", config.seeds);
    }

    let listener = TcpListener::bind(config.http_addr())
        .await
        .with_context(|| format!("Failed to bind HTTP listener on {}", config.http_addr()))?;
    let http_addr = listener.local_addr()?;

    let membership = MembershipService::new(config.bind, http_addr, config.seeds.clone())
        .await
        .with_context(|| format!("Failed to bind gossip socket on {}", config.bind))?;
    membership.clone().start().await;

    if let Err(e) = membership.wait_for_join(config.join_timeout()).await {
        membership.shutdown();
        return Err(e);
    }

    let partitioner = Arc::new(PartitionManager::new(membership.clone()));
    let maps = Arc::new(MapRegistry::<Document>::new(
        membership.clone(),
        partitioner,
        config.maps.clone(),
    ));

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let app = handlers::router(maps.clone());
    let task = tokio::spawn(async move {
        let served = axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await;
        if let Err(e) = served {
            tracing::error!("HTTP server failed: {}", e);
        }
    });
    tracing::info!("HTTP server listening on {}", http_addr);

    let handle = ClusterHandle {
        name: config.name.clone(),
        membership,
        maps,
        http_addr,
        server: Mutex::new(Some(Server {
            shutdown: shutdown_tx,
            task,
        })),
        stopped: AtomicBool::new(false),
    };

    if let Err(e) = handle.maps.open_eager_maps().await {
        handle.shutdown().await;
        return Err(e);
    }

    let members = handle.members();
    if members.is_empty() {
        tracing::info!("No members identified.");
    } else {
        tracing::info!(
            "Node [{}] joined the cluster. Members: {}",
            handle.local_member().id,
            describe_members(&members)
        );
    }
    tracing::info!("----------------------------------------");
    Ok(handle)
}

/// Stops `handle`. A missing handle is a no-op.
pub async fn stop(handle: Option<&ClusterHandle>) {
    match handle {
        Some(handle) => handle.shutdown().await,
        None => tracing::info!("No running node to stop"),
    }
}
