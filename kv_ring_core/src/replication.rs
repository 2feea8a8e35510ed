//! Replication coordinator
//!
//! The owner of a key commits writes locally and then pushes the new version
//! to its N-1 successors. Pushes run on the node's bounded worker pool and
//! are fire-and-forget: a failed push is logged and the replica stays stale
//! until the next write of the key.

use std::sync::Arc;

use crate::error::{Result, RingError};
use crate::log::log_replication_operation;
use crate::node::NodeContext;
use crate::ring::{owner_of, replica_set, Item, Key, NodeId, ReplicaMerge, RingView};
use crate::store::RecordKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PushKind {
    Update,
    Remove,
}

impl PushKind {
    fn name(self) -> &'static str {
        match self {
            PushKind::Update => "push_replicas",
            PushKind::Remove => "remove_replicas",
        }
    }
}

#[derive(Clone)]
pub struct ReplicationCoordinator {
    ctx: Arc<NodeContext>,
}

impl ReplicationCoordinator {
    pub(crate) fn new(ctx: Arc<NodeContext>) -> Self {
        Self { ctx }
    }

    /// Successors of this node that hold its replicas, with their addresses
    pub async fn replica_targets(&self) -> Vec<(NodeId, String)> {
        let view = self.ctx.view.read().await;
        let ids = view.peer_ids();
        replica_set(self.ctx.id(), &ids, self.ctx.settings.replication_factor)
            .into_iter()
            .skip(1)
            .filter_map(|id| view.address_of(id).map(|address| (id, address.to_string())))
            .collect()
    }

    /// Owner-local write: bump the version, persist, then replicate.
    ///
    /// Membership and ownership are checked under the view lock so a write
    /// either lands before a leave snapshots the owned items or is refused.
    pub async fn commit_write(&self, key: Key, value: String) -> Result<Item> {
        let item = {
            let mut view = self.ctx.view.write().await;
            self.ctx.require_joined().await?;
            self.require_owner(&view, key)?;

            let before = view.clone();
            let promoted = view.held_replicas.contains_key(&key);
            let item = view.apply_write(key, value);
            let kinds: &[RecordKind] = if promoted {
                &[RecordKind::Owned, RecordKind::Replica]
            } else {
                &[RecordKind::Owned]
            };
            self.ctx.persist_or_rollback(&mut view, before, kinds).await?;
            item
        };

        tracing::debug!(node_id = self.ctx.id(), key = key, version = item.version, "Committed write");
        self.on_local_write(vec![item.clone()]).await;
        Ok(item)
    }

    /// Owner-local delete: remove, persist, then drop the replicas
    pub async fn commit_remove(&self, key: Key) -> Result<Option<Item>> {
        let removed = {
            let mut view = self.ctx.view.write().await;
            self.ctx.require_joined().await?;
            self.require_owner(&view, key)?;

            let before = view.clone();
            let Some(removed) = view.remove_owned(key) else {
                return Ok(None);
            };
            self.ctx
                .persist_or_rollback(&mut view, before, &[RecordKind::Owned])
                .await?;
            removed
        };

        tracing::debug!(node_id = self.ctx.id(), key = key, version = removed.version, "Committed delete");
        self.on_local_remove(vec![removed.clone()]).await;
        Ok(Some(removed))
    }

    fn require_owner(&self, view: &RingView, key: Key) -> Result<()> {
        let owner = owner_of(key, &view.peer_ids())?;
        if owner != self.ctx.id() {
            return Err(RingError::NotOwner { key, owner });
        }
        Ok(())
    }

    /// Push freshly committed items to every successor in the replica set
    pub async fn on_local_write(&self, items: Vec<Item>) {
        self.fan_out(items, PushKind::Update).await;
    }

    /// Ask every successor in the replica set to drop its copies of `items`
    pub async fn on_local_remove(&self, items: Vec<Item>) {
        self.fan_out(items, PushKind::Remove).await;
    }

    async fn fan_out(&self, items: Vec<Item>, kind: PushKind) {
        if items.is_empty() {
            return;
        }

        for (target, address) in self.replica_targets().await {
            let ctx = Arc::clone(&self.ctx);
            let items = items.clone();
            let workers = Arc::clone(&self.ctx.workers);

            tokio::spawn(async move {
                let Ok(_permit) = workers.acquire_owned().await else {
                    return;
                };
                let count = items.len();
                let result = match kind {
                    PushKind::Update => ctx.client.push_replicas(&address, items).await,
                    PushKind::Remove => ctx.client.remove_replicas(&address, items).await,
                };

                match result {
                    Ok(()) => {
                        ctx.mark_alive(target).await;
                        log_replication_operation(kind.name(), target, count, true, None);
                    }
                    Err(e) => {
                        ctx.mark_crashed(target).await;
                        log_replication_operation(kind.name(), target, count, false, Some(&e.to_string()));
                    }
                }
            });
        }
    }

    /// Receiver side of a replica push; returns how many items were applied
    pub async fn on_replica_push(&self, items: Vec<Item>) -> Result<usize> {
        let mut view = self.ctx.view.write().await;
        let before = view.clone();
        let mut applied = 0;

        for item in items {
            let (key, version) = (item.key, item.version);
            match view.merge_replica(item) {
                ReplicaMerge::Applied => applied += 1,
                ReplicaMerge::StaleIgnored => {
                    tracing::debug!(node_id = self.ctx.id(), key = key, version = version, "Ignored stale replica");
                }
                ReplicaMerge::OwnedLocally => {
                    tracing::debug!(node_id = self.ctx.id(), key = key, "Ignored replica of an owned key");
                }
            }
        }

        if applied > 0 {
            self.ctx
                .persist_or_rollback(&mut view, before, &[RecordKind::Replica])
                .await?;
        }
        Ok(applied)
    }

    /// Receiver side of a replica removal; returns how many replicas were dropped
    pub async fn on_replica_remove(&self, items: Vec<Item>) -> Result<usize> {
        let mut view = self.ctx.view.write().await;
        let before = view.clone();
        let removed = items.iter().filter(|item| view.remove_replica(item)).count();

        if removed > 0 {
            self.ctx
                .persist_or_rollback(&mut view, before, &[RecordKind::Replica])
                .await?;
        }
        Ok(removed)
    }
}
