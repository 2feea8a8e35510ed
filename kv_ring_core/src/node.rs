//! Ring node process aggregate
//!
//! A [`RingNode`] owns the node's [`RingView`] behind one coarse lock and
//! wires the membership, replication and quorum coordinators to it. It is
//! also the [`RpcHandler`] registered with the transport, so inbound RPCs and
//! local client calls go through the same code paths.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock, Semaphore};

use crate::config::{QuorumConfig, RingConfig, RpcConfig};
use crate::error::{RemoteError, Result, RingError};
use crate::membership::{LeaveOutcome, MembershipCoordinator};
use crate::quorum::QuorumClient;
use crate::replication::ReplicationCoordinator;
use crate::ring::{Item, Key, NodeId, NodeState, Peer, RingView};
use crate::rpc::{PeerClient, RpcHandler, RpcRequest, RpcResponse, Transport};
use crate::store::{NodeStore, RecordKind};

/// Per-node settings derived from [`RingConfig`]
#[derive(Debug, Clone)]
pub struct NodeSettings {
    pub id: NodeId,
    pub address: String,
    pub replication_factor: usize,
    pub write_quorum: usize,
    pub read_quorum: usize,
    pub timeout: Duration,
    pub worker_pool_size: usize,
}

impl NodeSettings {
    pub fn new(id: NodeId, address: impl Into<String>) -> Self {
        let quorum = QuorumConfig::default();
        Self {
            id,
            address: address.into(),
            replication_factor: quorum.replication_factor,
            write_quorum: quorum.write_quorum,
            read_quorum: quorum.read_quorum,
            timeout: quorum.timeout.as_duration(),
            worker_pool_size: RpcConfig::default().worker_pool_size,
        }
    }

    pub fn from_config(config: &RingConfig) -> Self {
        Self {
            id: config.node.id,
            address: config.node.address.clone(),
            replication_factor: config.quorum.replication_factor,
            write_quorum: config.quorum.write_quorum,
            read_quorum: config.quorum.read_quorum,
            timeout: config.timeout_duration(),
            worker_pool_size: config.rpc.worker_pool_size,
        }
    }

    pub fn with_quorum(mut self, replication_factor: usize, write_quorum: usize, read_quorum: usize) -> Self {
        self.replication_factor = replication_factor;
        self.write_quorum = write_quorum;
        self.read_quorum = read_quorum;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// State shared by the coordinators of one node
pub(crate) struct NodeContext {
    pub settings: NodeSettings,
    pub view: RwLock<RingView>,
    pub state: RwLock<NodeState>,
    /// Serializes join and leave on this node
    pub membership_lock: Mutex<()>,
    /// Peers whose last RPC failed
    pub crashed: RwLock<BTreeSet<NodeId>>,
    pub joined_at: RwLock<Option<DateTime<Utc>>>,
    pub client: PeerClient,
    pub transport: Arc<dyn Transport>,
    pub store: Arc<dyn NodeStore>,
    pub workers: Arc<Semaphore>,
}

impl NodeContext {
    pub fn id(&self) -> NodeId {
        self.settings.id
    }

    pub fn address(&self) -> &str {
        &self.settings.address
    }

    pub async fn state(&self) -> NodeState {
        *self.state.read().await
    }

    pub async fn set_state(&self, state: NodeState) {
        let mut current = self.state.write().await;
        let previous = *current;
        if previous != state {
            tracing::debug!(node_id = self.id(), from = %previous, to = %state, "Node state changed");
            *current = state;
        }
    }

    pub async fn require_joined(&self) -> Result<()> {
        match self.state().await {
            NodeState::Joined => Ok(()),
            _ => Err(RingError::NotJoined),
        }
    }

    /// Write one of the view's maps through to the node store
    pub async fn persist(&self, view: &RingView, kind: RecordKind) -> Result<()> {
        let items: Vec<Item> = match kind {
            RecordKind::Owned => view.owned_items.values().cloned().collect(),
            RecordKind::Replica => view.held_replicas.values().cloned().collect(),
        };
        self.store.persist_all(self.id(), kind, &items).await
    }

    /// Persist `kinds` in order. On failure `view` is reset to `before` and
    /// the record files already rewritten are written back from it, so memory
    /// and store never keep a change the caller reports as failed.
    pub async fn persist_or_rollback(&self, view: &mut RingView, before: RingView, kinds: &[RecordKind]) -> Result<()> {
        for (written, kind) in kinds.iter().enumerate() {
            if let Err(e) = self.persist(view, *kind).await {
                *view = before;
                for restored in &kinds[..written] {
                    if let Err(restore_err) = self.persist(view, *restored).await {
                        tracing::error!(
                            node_id = self.id(),
                            kind = ?restored,
                            error = %restore_err,
                            "Failed to restore record file"
                        );
                    }
                }
                tracing::warn!(node_id = self.id(), kind = ?kind, error = %e, "Persist failed, change rolled back");
                return Err(e);
            }
        }
        Ok(())
    }

    /// Departed peers are not tracked
    pub async fn mark_crashed(&self, id: NodeId) {
        let view = self.view.read().await;
        if !view.peers.contains_key(&id) {
            return;
        }
        if self.crashed.write().await.insert(id) {
            tracing::warn!(node_id = self.id(), peer_id = id, "Peer presumed crashed");
        }
    }

    pub async fn mark_alive(&self, id: NodeId) {
        self.crashed.write().await.remove(&id);
    }
}

/// Snapshot of a node for operators
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeStatus {
    pub id: NodeId,
    pub address: String,
    pub state: NodeState,
    pub peers: BTreeMap<NodeId, String>,
    pub owned_items: usize,
    pub held_replicas: usize,
    pub presumed_crashed: Vec<NodeId>,
    pub joined_at: Option<DateTime<Utc>>,
}

impl NodeStatus {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| RingError::Remote(e.to_string()))
    }
}

pub struct RingNode {
    ctx: Arc<NodeContext>,
    membership: MembershipCoordinator,
    replication: ReplicationCoordinator,
    quorum: QuorumClient,
}

impl RingNode {
    pub fn new(settings: NodeSettings, transport: Arc<dyn Transport>, store: Arc<dyn NodeStore>) -> Arc<Self> {
        let client = PeerClient::new(Arc::clone(&transport), settings.timeout);
        let workers = Arc::new(Semaphore::new(settings.worker_pool_size.max(1)));
        let ctx = Arc::new(NodeContext {
            settings,
            view: RwLock::new(RingView::default()),
            state: RwLock::new(NodeState::Left),
            membership_lock: Mutex::new(()),
            crashed: RwLock::new(BTreeSet::new()),
            joined_at: RwLock::new(None),
            client,
            transport,
            store,
            workers,
        });

        let replication = ReplicationCoordinator::new(Arc::clone(&ctx));
        let membership = MembershipCoordinator::new(Arc::clone(&ctx), replication.clone());
        let quorum = QuorumClient::new(Arc::clone(&ctx), replication.clone());

        Arc::new(Self {
            ctx,
            membership,
            replication,
            quorum,
        })
    }

    pub fn id(&self) -> NodeId {
        self.ctx.id()
    }

    pub fn address(&self) -> &str {
        self.ctx.address()
    }

    pub async fn state(&self) -> NodeState {
        self.ctx.state().await
    }

    /// Copy of the node's current view
    pub async fn view(&self) -> RingView {
        self.ctx.view.read().await.clone()
    }

    pub fn membership(&self) -> &MembershipCoordinator {
        &self.membership
    }

    pub fn replication(&self) -> &ReplicationCoordinator {
        &self.replication
    }

    pub fn quorum(&self) -> &QuorumClient {
        &self.quorum
    }

    /// Start a new ring with this node as its only member
    pub async fn join_first(self: &Arc<Self>) -> Result<()> {
        let handler: Arc<dyn RpcHandler> = Arc::clone(self) as Arc<dyn RpcHandler>;
        self.membership.join_first(handler).await
    }

    /// Join the ring that `contact` belongs to
    pub async fn join(self: &Arc<Self>, contact: &str) -> Result<()> {
        let handler: Arc<dyn RpcHandler> = Arc::clone(self) as Arc<dyn RpcHandler>;
        self.membership.join(handler, contact).await
    }

    pub async fn leave(&self) -> Result<LeaveOutcome> {
        self.membership.leave().await
    }

    /// Client read: value of the highest version among a read quorum
    pub async fn get(&self, key: Key) -> Result<Option<String>> {
        self.ctx.require_joined().await?;
        Ok(self.quorum.get(key).await?.map(|item| item.value))
    }

    /// Client write; returns the item committed by the owner
    pub async fn put(&self, key: Key, value: String) -> Result<Item> {
        self.ctx.require_joined().await?;
        self.quorum.update(key, value).await
    }

    /// Client delete; `false` when the owner had no such key
    pub async fn delete(&self, key: Key) -> Result<bool> {
        self.ctx.require_joined().await?;
        Ok(self.quorum.remove(key).await?.is_some())
    }

    pub async fn status(&self) -> NodeStatus {
        let view = self.ctx.view.read().await;
        NodeStatus {
            id: self.id(),
            address: self.address().to_string(),
            state: self.ctx.state().await,
            peers: view.peers.clone(),
            owned_items: view.owned_items.len(),
            held_replicas: view.held_replicas.len(),
            presumed_crashed: self.ctx.crashed.read().await.iter().copied().collect(),
            joined_at: *self.ctx.joined_at.read().await,
        }
    }

    async fn dispatch(&self, request: RpcRequest) -> Result<RpcResponse> {
        let response = match request {
            RpcRequest::GetNode => RpcResponse::Node(Peer {
                id: self.id(),
                address: self.address().to_string(),
            }),
            RpcRequest::GetPeers => RpcResponse::Peers(self.ctx.view.read().await.peers.clone()),
            RpcRequest::AddPeer { id, address } => {
                self.membership.on_add_peer(id, address).await;
                RpcResponse::Ack
            }
            RpcRequest::RemovePeer { id } => {
                self.membership.on_remove_peer(id).await;
                RpcResponse::Ack
            }
            RpcRequest::PushItems { items } => {
                self.membership.on_push_items(items).await?;
                RpcResponse::Ack
            }
            RpcRequest::RemoveItems { items } => {
                self.membership.on_remove_items(items).await?;
                RpcResponse::Ack
            }
            RpcRequest::PushReplicas { items } => {
                self.replication.on_replica_push(items).await?;
                RpcResponse::Ack
            }
            RpcRequest::RemoveReplicas { items } => {
                self.replication.on_replica_remove(items).await?;
                RpcResponse::Ack
            }
            RpcRequest::GetReplica { key } => {
                RpcResponse::Item(self.ctx.view.read().await.held_replicas.get(&key).cloned())
            }
            RpcRequest::GetItem { key } => {
                RpcResponse::Item(self.ctx.view.read().await.owned_items.get(&key).cloned())
            }
            RpcRequest::UpdateItem { key, value } => {
                RpcResponse::Item(Some(self.replication.commit_write(key, value).await?))
            }
            RpcRequest::RemoveItem { key } => RpcResponse::Item(self.replication.commit_remove(key).await?),
            RpcRequest::RequestHandOff { new_owner } => {
                RpcResponse::Items(self.membership.on_hand_off(new_owner).await?)
            }
            RpcRequest::ClientGet { key } => RpcResponse::Value(self.get(key).await?),
            RpcRequest::ClientPut { key, value } => RpcResponse::Item(Some(self.put(key, value).await?)),
            RpcRequest::ClientDelete { key } => RpcResponse::Removed(self.delete(key).await?),
        };
        Ok(response)
    }
}

#[async_trait]
impl RpcHandler for RingNode {
    async fn handle(&self, request: RpcRequest) -> RpcResponse {
        let name = request.name();
        match self.dispatch(request).await {
            Ok(response) => response,
            Err(e) => {
                tracing::debug!(node_id = self.id(), request = name, error = %e, "RPC failed");
                RpcResponse::Error(RemoteError::from(&e))
            }
        }
    }
}
