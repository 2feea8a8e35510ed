#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kv_ring_core::{
    Item, Key, LocalNetwork, MemoryNodeStore, NodeId, NodeSettings, NodeStore, RecordKind, RingError, RingNode,
    RingView,
};

pub const TIMEOUT: Duration = Duration::from_millis(300);

pub fn address(id: NodeId) -> String {
    format!("node-{id}")
}

pub fn settings(id: NodeId, n: usize, w: usize, r: usize) -> NodeSettings {
    NodeSettings::new(id, address(id))
        .with_quorum(n, w, r)
        .with_timeout(TIMEOUT)
}

pub fn node(network: &Arc<LocalNetwork>, id: NodeId, n: usize, w: usize, r: usize) -> Arc<RingNode> {
    RingNode::new(
        settings(id, n, w, r),
        network.clone(),
        Arc::new(MemoryNodeStore::new()),
    )
}

/// Start a ring on the first id and join the others through it, in order
pub async fn ring(network: &Arc<LocalNetwork>, ids: &[NodeId], n: usize, w: usize, r: usize) -> Vec<Arc<RingNode>> {
    let mut nodes = Vec::new();
    for (index, id) in ids.iter().enumerate() {
        let node = node(network, *id, n, w, r);
        if index == 0 {
            node.join_first().await.unwrap();
        } else {
            node.join(&address(ids[0])).await.unwrap();
        }
        nodes.push(node);
    }
    nodes
}

/// Poll the node's view until `check` holds or two seconds pass
pub async fn wait_for_view<F>(node: &RingNode, check: F) -> bool
where
    F: Fn(&RingView) -> bool,
{
    for _ in 0..100 {
        if check(&node.view().await) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

/// Version of the replica of `key` the node holds, if any
pub fn replica_version(view: &RingView, key: u64) -> Option<u64> {
    view.held_replicas.get(&key).map(|item| item.version)
}

/// Memory store whose writes can be made to fail per record kind
#[derive(Default)]
pub struct FlakyStore {
    pub inner: MemoryNodeStore,
    fail_owned: AtomicBool,
    fail_replica: AtomicBool,
}

impl FlakyStore {
    pub fn fail(&self, kind: RecordKind, failing: bool) {
        match kind {
            RecordKind::Owned => self.fail_owned.store(failing, Ordering::SeqCst),
            RecordKind::Replica => self.fail_replica.store(failing, Ordering::SeqCst),
        }
    }

    fn failing(&self, kind: RecordKind) -> bool {
        match kind {
            RecordKind::Owned => self.fail_owned.load(Ordering::SeqCst),
            RecordKind::Replica => self.fail_replica.load(Ordering::SeqCst),
        }
    }
}

#[async_trait]
impl NodeStore for FlakyStore {
    async fn persist_all(&self, node_id: NodeId, kind: RecordKind, items: &[Item]) -> kv_ring_core::Result<()> {
        if self.failing(kind) {
            return Err(RingError::Store("disk full".to_string()));
        }
        self.inner.persist_all(node_id, kind, items).await
    }

    async fn read_one(&self, node_id: NodeId, kind: RecordKind, key: Key) -> kv_ring_core::Result<Option<Item>> {
        self.inner.read_one(node_id, kind, key).await
    }

    async fn load_all(&self, node_id: NodeId, kind: RecordKind) -> kv_ring_core::Result<Vec<Item>> {
        self.inner.load_all(node_id, kind).await
    }

    async fn delete_store(&self, node_id: NodeId) -> kv_ring_core::Result<()> {
        self.inner.delete_store(node_id).await
    }
}

pub fn flaky_node(
    network: &Arc<LocalNetwork>,
    id: NodeId,
    n: usize,
    w: usize,
    r: usize,
) -> (Arc<RingNode>, Arc<FlakyStore>) {
    let store = Arc::new(FlakyStore::default());
    let node = RingNode::new(settings(id, n, w, r), network.clone(), store.clone());
    (node, store)
}
