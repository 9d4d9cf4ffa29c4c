use anyhow::{Result, bail};
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::{Notify, RwLock};
use tokio::task::JoinHandle;
use tracing::info;

use super::types::{GossipMessage, Node, NodeId, NodeState};

const GOSSIP_INTERVAL: Duration = Duration::from_millis(500);
const FAILURE_DETECTION_INTERVAL: Duration = Duration::from_secs(2);
const SUSPECT_TIMEOUT: Duration = Duration::from_secs(5);
const DEAD_TIMEOUT: Duration = Duration::from_secs(10);

pub struct MembershipService {
    pub local_node: Node,
    pub members: Arc<DashMap<NodeId, Node>>,
    socket: Arc<UdpSocket>,
    incarnation: Arc<RwLock<u64>>,
    seeds: Vec<SocketAddr>,
    changed: Notify,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl MembershipService {
    /// Binds the gossip socket and announces this node to every seed.
    ///
    /// `http_addr` is advertised to peers as the address of this node's data endpoints.
    pub async fn new(
        bind_addr: SocketAddr,
        http_addr: SocketAddr,
        seed_nodes: Vec<SocketAddr>,
    ) -> Result<Arc<Self>> {
        let socket = UdpSocket::bind(bind_addr).await?;
        let gossip_addr = socket.local_addr()?;

        let local_node = Node {
            id: NodeId::new(),
            gossip_addr,
            http_addr,
            state: NodeState::Alive,
            incarnation: 1,
            last_seen: Some(Instant::now()),
        };
        let members = Arc::new(DashMap::new());
        members.insert(local_node.id.clone(), local_node.clone());

        let service = Arc::new(Self {
            local_node,
            members,
            socket: Arc::new(socket),
            incarnation: Arc::new(RwLock::new(1)),
            seeds: seed_nodes,
            changed: Notify::new(),
            tasks: Mutex::new(Vec::new()),
        });

        if !service.seeds.is_empty() {
            info!("Joining cluster via {} seed node(s)", service.seeds.len());
            service.send_join().await?;
        }
        Ok(service)
    }

    async fn send_join(&self) -> Result<()> {
        let encoded = bincode::serialize(&GossipMessage::Join {
            node: self.local_node.clone(),
        })?;
        for seed in &self.seeds {
            self.socket.send_to(&encoded, seed).await?;
            tracing::debug!("Sent join request to {}", seed);
        }
        Ok(())
    }

    pub async fn start(self: Arc<Self>) {
        tracing::info!("Starting membership service on {}", self.local_node.gossip_addr);

        let handles = vec![
            tokio::spawn(self.clone().gossip_loop()),
            tokio::spawn(self.clone().receive_loop()),
            tokio::spawn(self.clone().failure_detection_loop()),
        ];
        match self.tasks.lock() {
            Ok(mut tasks) => tasks.extend(handles),
            Err(poisoned) => poisoned.into_inner().extend(handles),
        }

        tracing::info!("All background tasks started");
    }

    /// Stops every background loop. Safe to call more than once.
    pub fn shutdown(&self) {
        let handles: Vec<JoinHandle<()>> = match self.tasks.lock() {
            Ok(mut tasks) => tasks.drain(..).collect(),
            Err(poisoned) => poisoned.into_inner().drain(..).collect(),
        };
        if handles.is_empty() {
            return;
        }
        for handle in handles {
            handle.abort();
        }
        tracing::info!("Membership service for {} stopped", self.local_node.id);
    }

    /// Resolves once this node is part of a cluster.
    ///
    /// A node without seeds forms its own cluster immediately. Otherwise the join
    /// request is repeated every gossip interval until another member is known.
    pub async fn wait_for_join(&self, timeout: Duration) -> Result<()> {
        if self.seeds.is_empty() {
            return Ok(());
        }
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let notified = self.changed.notified();
            if self.has_peers() {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                bail!(
                    "Node {} failed to join the cluster via {:?} within {:?}",
                    self.local_node.id,
                    self.seeds,
                    timeout
                );
            }

            let wake = std::cmp::min(deadline, tokio::time::Instant::now() + GOSSIP_INTERVAL);
            if tokio::time::timeout_at(wake, notified).await.is_err()
                && !self.has_peers()
                && let Err(e) = self.send_join().await
            {
                tracing::warn!("Failed to resend join request: {}", e);
            }
        }
    }

    fn has_peers(&self) -> bool {
        self.members
            .iter()
            .any(|entry| {
                entry.key() != &self.local_node.id && entry.value().state == NodeState::Alive
            })
    }

    pub fn get_member(&self, id: &NodeId) -> Option<Node> {
        self.members.get(id).map(|entry| entry.value().clone())
    }

    pub fn get_alive_members(&self) -> Vec<Node> {
        self.members
            .iter()
            .filter(|entry| entry.value().state == NodeState::Alive)
            .map(|entry| entry.value().clone())
            .collect()
    }

    async fn gossip_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(GOSSIP_INTERVAL);

        loop {
            interval.tick().await;

            let peers: Vec<Node> = self
                .members
                .iter()
                .filter(|entry| {
                    entry.value().id != self.local_node.id
                        && entry.value().state == NodeState::Alive
                })
                .map(|entry| entry.value().clone())
                .collect();

            if peers.is_empty() {
                continue;
            }

            let target = {
                use rand::Rng;
                &peers[rand::thread_rng().gen_range(0..peers.len())]
            };

            let msg = GossipMessage::Ping {
                from: self.local_node.id.clone(),
                http_addr: self.local_node.http_addr,
                incarnation: *self.incarnation.read().await,
            };

            match bincode::serialize(&msg) {
                Ok(encoded) => {
                    if let Err(e) = self.socket.send_to(&encoded, target.gossip_addr).await {
                        tracing::warn!("Failed to send ping to {}: {}", target.id, e);
                    }
                }
                Err(e) => tracing::error!("Failed to serialize ping: {}", e),
            }
        }
    }

    async fn receive_loop(self: Arc<Self>) {
        let mut buf = vec![0u8; 65536];

        loop {
            match self.socket.recv_from(&mut buf).await {
                Ok((len, src)) => match bincode::deserialize::<GossipMessage>(&buf[..len]) {
                    Ok(msg) => {
                        if let Err(e) = self.handle_message(msg, src).await {
                            tracing::error!("Error handling message from {}: {}", src, e);
                        }
                    }
                    Err(e) => {
                        tracing::warn!("Failed to deserialize message from {}: {}", src, e);
                    }
                },
                Err(e) => {
                    tracing::error!("Failed to receive UDP packet: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }

    async fn handle_message(&self, msg: GossipMessage, src: SocketAddr) -> Result<()> {
        match msg {
            GossipMessage::Ping {
                from,
                http_addr,
                incarnation,
            } => self.handle_ping(from, http_addr, incarnation, src).await,
            GossipMessage::Ack {
                from,
                incarnation,
                members,
            } => {
                self.handle_ack(from, incarnation, members);
                Ok(())
            }
            GossipMessage::Join { node } => self.handle_join(node, src).await,
            GossipMessage::Suspect {
                node_id,
                incarnation,
            } => {
                self.handle_suspect(node_id, incarnation).await;
                Ok(())
            }
            GossipMessage::Alive {
                node_id,
                incarnation,
            } => {
                self.handle_alive(node_id, incarnation);
                Ok(())
            }
        }
    }

    async fn send_ack(&self, to: SocketAddr) -> Result<()> {
        let members: Vec<Node> = self
            .members
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        let reply = GossipMessage::Ack {
            from: self.local_node.id.clone(),
            incarnation: *self.incarnation.read().await,
            members,
        };
        self.socket.send_to(&bincode::serialize(&reply)?, to).await?;
        Ok(())
    }

    async fn handle_ping(
        &self,
        from: NodeId,
        http_addr: SocketAddr,
        incarnation: u64,
        src: SocketAddr,
    ) -> Result<()> {
        tracing::debug!("Received ping from {}", from);

        let discovered = match self.members.get_mut(&from) {
            Some(mut member) => {
                member.last_seen = Some(Instant::now());
                if incarnation > member.incarnation {
                    member.incarnation = incarnation;
                }
                false
            }
            None => {
                self.members.insert(
                    from.clone(),
                    Node {
                        id: from.clone(),
                        gossip_addr: src,
                        http_addr,
                        state: NodeState::Alive,
                        incarnation,
                        last_seen: Some(Instant::now()),
                    },
                );
                true
            }
        };
        if discovered {
            tracing::info!("Discovered new member via ping: {} at {}", from, src);
            self.changed.notify_waiters();
        }

        self.send_ack(src).await
    }

    fn handle_ack(&self, from: NodeId, incarnation: u64, members: Vec<Node>) {
        tracing::debug!(
            "Received ack from {} (inc={}) with {} members",
            from,
            incarnation,
            members.len()
        );

        if let Some(mut member) = self.members.get_mut(&from) {
            member.last_seen = Some(Instant::now());
            if incarnation > member.incarnation {
                member.incarnation = incarnation;
            }
        }

        for member in members {
            if member.id != self.local_node.id {
                self.merge_member(member);
            }
        }
    }

    fn merge_member(&self, incoming: Node) {
        let inserted = match self.members.get_mut(&incoming.id) {
            Some(mut existing) => {
                if incoming.incarnation > existing.incarnation {
                    tracing::debug!(
                        "Updating {}: inc {} -> {}",
                        incoming.id,
                        existing.incarnation,
                        incoming.incarnation,
                    );
                    existing.state = incoming.state;
                    existing.incarnation = incoming.incarnation;
                    existing.last_seen = Some(Instant::now());
                } else if incoming.incarnation == existing.incarnation
                    && incoming.state == NodeState::Alive
                    && existing.state == NodeState::Suspect
                {
                    tracing::info!("{} refuted suspicion", incoming.id);
                    existing.state = NodeState::Alive;
                    existing.last_seen = Some(Instant::now());
                }
                false
            }
            None => true,
        };

        if inserted && incoming.state != NodeState::Dead {
            tracing::info!("Discovered new member: {}", incoming);
            let mut member = incoming;
            member.last_seen = Some(Instant::now());
            self.members.insert(member.id.clone(), member);
            self.changed.notify_waiters();
        }
    }

    async fn handle_suspect(&self, node_id: NodeId, incarnation: u64) {
        if node_id == self.local_node.id {
            let current = *self.incarnation.read().await;
            if incarnation < current {
                return;
            }
            let refuted = {
                let mut inc = self.incarnation.write().await;
                *inc = incarnation + 1;
                *inc
            };
            info!("Refuting suspicion of local node with incarnation {}", refuted);
            if let Some(mut local) = self.members.get_mut(&node_id) {
                local.incarnation = refuted;
                local.state = NodeState::Alive;
            }
            self.broadcast_message(GossipMessage::Alive {
                node_id,
                incarnation: refuted,
            })
            .await;
            return;
        }

        match self.members.get_mut(&node_id) {
            Some(mut existing) if incarnation >= existing.incarnation => {
                if existing.state == NodeState::Alive {
                    tracing::info!("Node {} suspected", *existing);
                    existing.state = NodeState::Suspect;
                }
                existing.incarnation = incarnation;
            }
            Some(_) => {}
            None => tracing::debug!("Suspected node {} doesn't exist", node_id),
        }
    }

    fn handle_alive(&self, node_id: NodeId, incarnation: u64) {
        match self.members.get_mut(&node_id) {
            Some(mut existing) => {
                let newer = incarnation > existing.incarnation;
                let refutes =
                    incarnation == existing.incarnation && existing.state == NodeState::Suspect;
                if newer || refutes {
                    tracing::info!("Node {} is Alive (inc={})", *existing, incarnation);
                    existing.state = NodeState::Alive;
                    existing.incarnation = incarnation;
                    existing.last_seen = Some(Instant::now());
                }
            }
            None => tracing::debug!("Alive message for unknown node {}", node_id),
        }
    }

    async fn handle_join(&self, mut node: Node, src: SocketAddr) -> Result<()> {
        if node.id == self.local_node.id {
            return Ok(());
        }
        tracing::info!("Node {} joining cluster", node);

        node.last_seen = Some(Instant::now());
        node.state = NodeState::Alive;
        self.members.insert(node.id.clone(), node);
        self.changed.notify_waiters();

        tracing::info!("Cluster size now: {}", self.get_alive_members().len());
        self.send_ack(src).await
    }

    async fn failure_detection_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(FAILURE_DETECTION_INTERVAL);

        loop {
            interval.tick().await;
            let now = Instant::now();
            let mut suspicions = Vec::new();

            for mut entry in self.members.iter_mut() {
                let member = entry.value_mut();
                if member.id == self.local_node.id {
                    continue;
                }
                let Some(last_seen) = member.last_seen else {
                    member.last_seen = Some(now);
                    continue;
                };
                let elapsed = now.duration_since(last_seen);

                match member.state {
                    NodeState::Alive if elapsed > SUSPECT_TIMEOUT => {
                        tracing::warn!("Node {} suspected (no contact for {:?})", member.id, elapsed);
                        member.state = NodeState::Suspect;
                        suspicions.push(GossipMessage::Suspect {
                            node_id: member.id.clone(),
                            incarnation: member.incarnation,
                        });
                    }
                    NodeState::Suspect if elapsed > DEAD_TIMEOUT => {
                        tracing::warn!("Node {} declared dead (no contact for {:?})", member.id, elapsed);
                        member.state = NodeState::Dead;
                    }
                    _ => {}
                }
            }

            for msg in suspicions {
                self.broadcast_message(msg).await;
            }
        }
    }

    async fn broadcast_message(&self, msg: GossipMessage) {
        let encoded = match bincode::serialize(&msg) {
            Ok(encoded) => encoded,
            Err(e) => {
                tracing::error!("Failed to serialize broadcast: {}", e);
                return;
            }
        };
        let targets: Vec<(NodeId, SocketAddr)> = self
            .members
            .iter()
            .filter(|entry| {
                entry.value().id != self.local_node.id && entry.value().state == NodeState::Alive
            })
            .map(|entry| (entry.value().id.clone(), entry.value().gossip_addr))
            .collect();

        for (id, addr) in targets {
            if let Err(e) = self.socket.send_to(&encoded, addr).await {
                tracing::warn!("Failed to broadcast to {}: {}", id, e);
            }
        }
    }
}
