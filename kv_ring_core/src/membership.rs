//! Membership coordinator: join, leave and the hand-off of owned items
//!
//! A joining node learns the ring from a contact, announces itself to every
//! peer its successor knows and then takes over the keys it now owns from
//! that successor. A leaving node pushes everything it owns to its successor
//! before announcing its removal. Either attempt fails as a whole when a
//! required peer cannot be reached.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;

use crate::error::{Result, RingError};
use crate::log::log_cluster_operation;
use crate::node::NodeContext;
use crate::replication::ReplicationCoordinator;
use crate::ring::{nth_successor, Item, NodeId, NodeState, RingView};
use crate::rpc::RpcHandler;
use crate::store::RecordKind;

/// Result of a leave request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaveOutcome {
    /// The node was not a ring member
    AlreadyLeft,
    /// The node is the only ring member; nothing changed
    Solitary,
    /// Items were handed to `successor` and the node is gone
    Departed {
        successor: NodeId,
        handed_off: usize,
        /// Peers that could not be told about the departure
        unreachable: Vec<NodeId>,
    },
}

#[derive(Clone)]
pub struct MembershipCoordinator {
    ctx: Arc<NodeContext>,
    replication: ReplicationCoordinator,
}

impl MembershipCoordinator {
    pub(crate) fn new(ctx: Arc<NodeContext>, replication: ReplicationCoordinator) -> Self {
        Self { ctx, replication }
    }

    /// Become the sole member of a new ring, restoring persisted records
    pub async fn join_first(&self, handler: Arc<dyn RpcHandler>) -> Result<()> {
        let _membership = self.ctx.membership_lock.lock().await;
        let start = Instant::now();
        let (id, address) = (self.ctx.id(), self.ctx.address().to_string());

        let state = self.ctx.state().await;
        if state != NodeState::Left {
            return Err(RingError::Join(format!("node {id} is already {state}")));
        }

        self.ctx
            .transport
            .serve(&address, handler)
            .await
            .map_err(|e| RingError::Join(format!("cannot serve {address}: {e}")))?;

        let restored = match self.load_records().await {
            Ok(records) => records,
            Err(e) => {
                return Err(self
                    .abort_join(start, format!("cannot load records: {e}"), &[])
                    .await)
            }
        };

        let restored_count = {
            let mut view = self.ctx.view.write().await;
            *view = RingView::solitary(id, &address);
            let (owned, replicas) = restored;
            let count = owned.len() + replicas.len();
            view.absorb_owned(owned);
            for replica in replicas {
                view.merge_replica(replica);
            }
            count
        };

        self.mark_joined().await;
        log_cluster_operation(
            "join_first",
            id,
            true,
            start.elapsed(),
            &format!("restored {restored_count} records"),
        );
        Ok(())
    }

    /// Join the ring `contact` belongs to
    pub async fn join(&self, handler: Arc<dyn RpcHandler>, contact: &str) -> Result<()> {
        let _membership = self.ctx.membership_lock.lock().await;
        let start = Instant::now();
        let (id, address) = (self.ctx.id(), self.ctx.address().to_string());

        let state = self.ctx.state().await;
        if state != NodeState::Left {
            return Err(RingError::Join(format!("node {id} is already {state}")));
        }

        self.ctx.set_state(NodeState::Joining).await;
        if let Err(e) = self.ctx.transport.serve(&address, handler).await {
            self.ctx.set_state(NodeState::Left).await;
            return Err(RingError::Join(format!("cannot serve {address}: {e}")));
        }

        let peers = match self.ctx.client.get_peers(contact).await {
            Ok(peers) => peers,
            Err(e) => {
                return Err(self
                    .abort_join(start, format!("contact {contact} unreachable: {e}"), &[])
                    .await)
            }
        };
        if peers.contains_key(&id) {
            return Err(self
                .abort_join(start, format!("node id {id} is already in use"), &[])
                .await);
        }

        // Successor is computed before this node registers itself
        let ids: Vec<NodeId> = peers.keys().copied().collect();
        let successor = nth_successor(id, &ids, 1);
        let Some(successor_address) = peers.get(&successor).cloned() else {
            return Err(self
                .abort_join(start, format!("contact {contact} returned an empty ring"), &[])
                .await);
        };

        {
            let mut view = self.ctx.view.write().await;
            *view = RingView::solitary(id, &address);
            view.peers.extend(peers);
        }

        let successor_peers = match self.ctx.client.get_peers(&successor_address).await {
            Ok(peers) => peers,
            Err(e) => {
                return Err(self
                    .abort_join(start, format!("successor {successor} unreachable: {e}"), &[])
                    .await)
            }
        };

        let mut announced: Vec<(NodeId, String)> = Vec::new();
        for (peer_id, peer_address) in &successor_peers {
            if *peer_id == id {
                continue;
            }
            if let Err(e) = self.ctx.client.add_peer(peer_address, id, &address).await {
                return Err(self
                    .abort_join(start, format!("announcement to node {peer_id} failed: {e}"), &announced)
                    .await);
            }
            announced.push((*peer_id, peer_address.clone()));
        }

        self.ctx.view.write().await.peers.extend(successor_peers);

        let items = match self.ctx.client.request_hand_off(&successor_address, id).await {
            Ok(items) => items,
            Err(e) => {
                return Err(self
                    .abort_join(start, format!("hand-off from node {successor} failed: {e}"), &announced)
                    .await)
            }
        };

        let persisted = {
            let mut view = self.ctx.view.write().await;
            let before = view.clone();
            view.absorb_owned(items.clone());
            self.ctx
                .persist_or_rollback(&mut view, before, &[RecordKind::Owned, RecordKind::Replica])
                .await
        };
        if let Err(e) = persisted {
            // The successor already released the items; give them back before retracting
            if let Err(push_err) = self.ctx.client.push_items(&successor_address, items).await {
                tracing::error!(
                    node_id = id,
                    successor = successor,
                    error = %push_err,
                    "Failed to return handed-off items"
                );
            }
            return Err(self
                .abort_join(start, format!("cannot persist handed-off items: {e}"), &announced)
                .await);
        }

        self.mark_joined().await;
        log_cluster_operation(
            "join",
            id,
            true,
            start.elapsed(),
            &format!("successor {successor}, {} items handed off", items.len()),
        );
        self.replication.on_local_write(items).await;
        Ok(())
    }

    /// Hand every owned item to the successor and leave the ring
    pub async fn leave(&self) -> Result<LeaveOutcome> {
        let _membership = self.ctx.membership_lock.lock().await;
        let start = Instant::now();
        let id = self.ctx.id();

        match self.ctx.state().await {
            NodeState::Left => {
                tracing::info!(node_id = id, "Leave requested but node is not a ring member");
                return Ok(LeaveOutcome::AlreadyLeft);
            }
            NodeState::Joined => {}
            other => return Err(RingError::Leave(format!("node {id} is {other}"))),
        }

        let (ids, peers) = {
            let view = self.ctx.view.read().await;
            (view.peer_ids(), view.peers.clone())
        };
        let successor = nth_successor(id, &ids, 1);
        if successor == id {
            tracing::info!(node_id = id, "Leave requested but node is the only ring member");
            return Ok(LeaveOutcome::Solitary);
        }

        self.ctx.set_state(NodeState::Leaving).await;
        let owned: Vec<Item> = self.ctx.view.read().await.owned_items.values().cloned().collect();
        let handed_off = owned.len();

        if let Some(successor_address) = peers.get(&successor) {
            if !owned.is_empty() {
                if let Err(e) = self.ctx.client.push_items(successor_address, owned).await {
                    self.ctx.set_state(NodeState::Joined).await;
                    let reason = format!("hand-off to node {successor} failed: {e}");
                    log_cluster_operation("leave", id, false, start.elapsed(), &reason);
                    return Err(RingError::Leave(reason));
                }
            }
        }

        let mut unreachable = Vec::new();
        for (peer_id, peer_address) in &peers {
            if *peer_id == id {
                continue;
            }
            if let Err(e) = self.ctx.client.remove_peer(peer_address, id).await {
                tracing::warn!(node_id = id, peer_id = *peer_id, error = %e, "Failed to announce departure");
                self.ctx.mark_crashed(*peer_id).await;
                unreachable.push(*peer_id);
            }
        }

        self.ctx.transport.unserve(self.ctx.address()).await;
        *self.ctx.view.write().await = RingView::default();
        if let Err(e) = self.ctx.store.delete_store(id).await {
            tracing::warn!(node_id = id, error = %e, "Failed to delete node store");
        }
        self.ctx.crashed.write().await.clear();
        *self.ctx.joined_at.write().await = None;
        self.ctx.set_state(NodeState::Left).await;

        log_cluster_operation(
            "leave",
            id,
            true,
            start.elapsed(),
            &format!("successor {successor}, {handed_off} items handed off"),
        );
        Ok(LeaveOutcome::Departed {
            successor,
            handed_off,
            unreachable,
        })
    }

    pub async fn on_add_peer(&self, id: NodeId, address: String) {
        if id == self.ctx.id() {
            return;
        }
        self.ctx.view.write().await.peers.insert(id, address);
        self.ctx.mark_alive(id).await;
        tracing::info!(node_id = self.ctx.id(), peer_id = id, "Peer added");
    }

    pub async fn on_remove_peer(&self, id: NodeId) {
        if id == self.ctx.id() {
            return;
        }
        self.ctx.view.write().await.peers.remove(&id);
        self.ctx.mark_alive(id).await;
        tracing::info!(node_id = self.ctx.id(), peer_id = id, "Peer removed");
    }

    /// Give up the owned items `new_owner` is now responsible for.
    ///
    /// With a replication factor of two or more this node is the new owner's
    /// first successor, so it keeps the items as replicas.
    pub async fn on_hand_off(&self, new_owner: NodeId) -> Result<Vec<Item>> {
        let start = Instant::now();
        let mut view = self.ctx.view.write().await;
        if !view.peers.contains_key(&new_owner) {
            return Err(RingError::Join(format!("node {new_owner} is not a known peer")));
        }

        let before = view.clone();
        let items = view.take_hand_off(new_owner);
        let keep_replicas = self.ctx.settings.replication_factor >= 2;
        let kinds: &[RecordKind] = if keep_replicas {
            for item in &items {
                view.held_replicas.insert(item.key, item.clone());
            }
            &[RecordKind::Owned, RecordKind::Replica]
        } else {
            &[RecordKind::Owned]
        };

        if let Err(e) = self.ctx.persist_or_rollback(&mut view, before, kinds).await {
            log_cluster_operation("hand_off", new_owner, false, start.elapsed(), &e.to_string());
            return Err(e);
        }

        log_cluster_operation(
            "hand_off",
            new_owner,
            true,
            start.elapsed(),
            &format!("{} items released", items.len()),
        );
        Ok(items)
    }

    /// Take ownership of items pushed by a leaving predecessor
    pub async fn on_push_items(&self, items: Vec<Item>) -> Result<()> {
        if self.ctx.state().await == NodeState::Left {
            return Err(RingError::NotJoined);
        }

        {
            let mut view = self.ctx.view.write().await;
            let before = view.clone();
            view.absorb_owned(items.clone());
            self.ctx
                .persist_or_rollback(&mut view, before, &[RecordKind::Owned, RecordKind::Replica])
                .await?;
        }

        tracing::info!(node_id = self.ctx.id(), items = items.len(), "Took ownership of pushed items");
        self.replication.on_local_write(items).await;
        Ok(())
    }

    /// Give up ownership of `items` unless a newer version was written here
    pub async fn on_remove_items(&self, items: Vec<Item>) -> Result<usize> {
        let mut view = self.ctx.view.write().await;
        let before = view.clone();
        let mut removed = 0;
        for item in &items {
            match view.owned_items.get(&item.key) {
                Some(current) if current.version <= item.version => {
                    view.owned_items.remove(&item.key);
                    removed += 1;
                }
                _ => {}
            }
        }

        if removed > 0 {
            self.ctx
                .persist_or_rollback(&mut view, before, &[RecordKind::Owned])
                .await?;
        }
        Ok(removed)
    }

    async fn load_records(&self) -> Result<(Vec<Item>, Vec<Item>)> {
        let id = self.ctx.id();
        let owned = self.ctx.store.load_all(id, RecordKind::Owned).await?;
        let replicas = self.ctx.store.load_all(id, RecordKind::Replica).await?;
        Ok((owned, replicas))
    }

    async fn mark_joined(&self) {
        *self.ctx.joined_at.write().await = Some(Utc::now());
        self.ctx.set_state(NodeState::Joined).await;
    }

    /// Undo a partial join: retract announcements, stop serving, forget the
    /// fetched peers and return to `Left`
    async fn abort_join(&self, start: Instant, reason: String, announced: &[(NodeId, String)]) -> RingError {
        let id = self.ctx.id();
        for (peer_id, peer_address) in announced {
            if let Err(e) = self.ctx.client.remove_peer(peer_address, id).await {
                tracing::warn!(node_id = id, peer_id = *peer_id, error = %e, "Failed to retract join announcement");
            }
        }

        self.ctx.transport.unserve(self.ctx.address()).await;
        *self.ctx.view.write().await = RingView::default();
        self.ctx.set_state(NodeState::Left).await;

        log_cluster_operation("join", id, false, start.elapsed(), &reason);
        RingError::Join(reason)
    }
}
