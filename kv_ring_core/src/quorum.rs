//! Quorum client
//!
//! Whichever node receives a client request coordinates it. Reads fan out to
//! the owner's primary copy and to the replicas held by the owner's
//! successors, one task per target on the node's worker pool, and drain the
//! results from a channel against a single deadline. The first failed or
//! expired target aborts the whole read; outstanding tasks are left to
//! finish and their results are dropped.
//!
//! Writes and deletes are committed by the owner alone. Replicas are brought
//! up to date asynchronously by the owner's replication coordinator; the
//! write quorum is not counted.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;

use crate::error::{Result, RingError, TransportError};
use crate::log::log_quorum_operation;
use crate::node::NodeContext;
use crate::replication::ReplicationCoordinator;
use crate::ring::{owner_of, replica_set, Item, Key, NodeId};

/// Outcome of a successful quorum read
#[derive(Debug, Clone, PartialEq)]
pub struct QuorumRead {
    pub key: Key,
    pub owner: NodeId,
    pub required: usize,
    /// One entry per responding target, `None` when it had no copy
    pub observations: Vec<(NodeId, Option<Item>)>,
}

impl QuorumRead {
    /// The observed copy with the highest version
    pub fn latest(&self) -> Option<&Item> {
        self.observations
            .iter()
            .filter_map(|(_, item)| item.as_ref())
            .max_by_key(|item| item.version)
    }

    pub fn into_latest(self) -> Option<Item> {
        self.observations
            .into_iter()
            .filter_map(|(_, item)| item)
            .max_by_key(|item| item.version)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lookup {
    Primary,
    Replica,
}

#[derive(Clone)]
pub struct QuorumClient {
    ctx: Arc<NodeContext>,
    replication: ReplicationCoordinator,
}

impl QuorumClient {
    pub(crate) fn new(ctx: Arc<NodeContext>, replication: ReplicationCoordinator) -> Self {
        Self { ctx, replication }
    }

    async fn routing_snapshot(&self) -> (Vec<NodeId>, BTreeMap<NodeId, String>) {
        let view = self.ctx.view.read().await;
        (view.peer_ids(), view.peers.clone())
    }

    /// Highest-versioned copy among a read quorum
    pub async fn get(&self, key: Key) -> Result<Option<Item>> {
        Ok(self.read(key).await?.into_latest())
    }

    pub async fn read(&self, key: Key) -> Result<QuorumRead> {
        let start = Instant::now();
        let (ids, peers) = self.routing_snapshot().await;
        let owner = owner_of(key, &ids)?;
        let targets = replica_set(owner, &ids, self.ctx.settings.replication_factor);
        let required = self.ctx.settings.read_quorum.min(targets.len());

        let (tx, mut rx) = mpsc::channel(targets.len());
        for (index, target) in targets.iter().copied().enumerate() {
            let lookup = if index == 0 { Lookup::Primary } else { Lookup::Replica };
            let address = peers.get(&target).cloned();
            let ctx = Arc::clone(&self.ctx);
            let workers = Arc::clone(&self.ctx.workers);
            let tx = tx.clone();

            tokio::spawn(async move {
                let Ok(_permit) = workers.acquire_owned().await else {
                    return;
                };
                let result = read_target(&ctx, target, address, lookup, key).await;
                // The coordinator may already have stopped listening
                let _ = tx.send((target, result)).await;
            });
        }
        drop(tx);

        let deadline = tokio::time::Instant::now() + self.ctx.settings.timeout;
        let mut observations: Vec<(NodeId, Option<Item>)> = Vec::with_capacity(required);

        while observations.len() < required {
            let failure = match tokio::time::timeout_at(deadline, rx.recv()).await {
                Ok(Some((target, Ok(item)))) => {
                    self.ctx.mark_alive(target).await;
                    observations.push((target, item));
                    continue;
                }
                Ok(Some((target, Err(e)))) => {
                    if matches!(e, RingError::Transport(_)) {
                        self.ctx.mark_crashed(target).await;
                    }
                    format!("node {target}: {e}")
                }
                Ok(None) => "all targets answered without reaching the quorum".to_string(),
                Err(_) => "read deadline expired".to_string(),
            };

            tracing::warn!(
                node_id = self.ctx.id(),
                key = key,
                reason = %failure,
                "Aborting quorum read"
            );
            log_quorum_operation("get", key, required, observations.len(), false, start.elapsed());
            return Err(RingError::QuorumNotReached {
                required,
                received: observations.len(),
                partial: observations.into_iter().filter_map(|(_, item)| item).collect(),
            });
        }

        log_quorum_operation("get", key, required, observations.len(), true, start.elapsed());
        Ok(QuorumRead {
            key,
            owner,
            required,
            observations,
        })
    }

    /// Route a write to the owner; returns the item the owner committed
    pub async fn update(&self, key: Key, value: String) -> Result<Item> {
        let start = Instant::now();
        let (ids, peers) = self.routing_snapshot().await;
        let owner = owner_of(key, &ids)?;

        let result = if owner == self.ctx.id() {
            self.replication.commit_write(key, value).await
        } else {
            match peers.get(&owner) {
                Some(address) => self.ctx.client.update_item(address, key, value).await,
                None => Err(TransportError::Unreachable(format!("node {owner}")).into()),
            }
        };

        self.finish_owner_operation("put", key, owner, start, result).await
    }

    /// Route a delete to the owner; returns the removed item
    pub async fn remove(&self, key: Key) -> Result<Option<Item>> {
        let start = Instant::now();
        let (ids, peers) = self.routing_snapshot().await;
        let owner = owner_of(key, &ids)?;

        let result = if owner == self.ctx.id() {
            self.replication.commit_remove(key).await
        } else {
            match peers.get(&owner) {
                Some(address) => self.ctx.client.remove_item(address, key).await,
                None => Err(TransportError::Unreachable(format!("node {owner}")).into()),
            }
        };

        self.finish_owner_operation("delete", key, owner, start, result).await
    }

    /// The owner's commit is the single required acknowledgement; a
    /// transport failure reaching it becomes a quorum failure
    async fn finish_owner_operation<T>(
        &self,
        operation: &str,
        key: Key,
        owner: NodeId,
        start: Instant,
        result: Result<T>,
    ) -> Result<T> {
        match result {
            Ok(value) => {
                log_quorum_operation(operation, key, 1, 1, true, start.elapsed());
                Ok(value)
            }
            Err(RingError::Transport(e)) => {
                self.ctx.mark_crashed(owner).await;
                tracing::warn!(node_id = self.ctx.id(), owner = owner, error = %e, "Owner unreachable");
                log_quorum_operation(operation, key, 1, 0, false, start.elapsed());
                Err(RingError::QuorumNotReached {
                    required: 1,
                    received: 0,
                    partial: Vec::new(),
                })
            }
            Err(e) => {
                log_quorum_operation(operation, key, 1, 0, false, start.elapsed());
                Err(e)
            }
        }
    }
}

async fn read_target(
    ctx: &NodeContext,
    target: NodeId,
    address: Option<String>,
    lookup: Lookup,
    key: Key,
) -> Result<Option<Item>> {
    if target == ctx.id() {
        let view = ctx.view.read().await;
        let copy = match lookup {
            Lookup::Primary => view.owned_items.get(&key),
            Lookup::Replica => view.held_replicas.get(&key),
        };
        return Ok(copy.cloned());
    }

    let address = address.ok_or_else(|| TransportError::Unreachable(format!("node {target}")))?;
    match lookup {
        Lookup::Primary => ctx.client.get_item(&address, key).await,
        Lookup::Replica => ctx.client.get_replica(&address, key).await,
    }
}
