//! Consistent-hash placement over integer node ids
//!
//! Keys and node ids share one integer domain. A key is owned by the
//! smallest node id greater than or equal to it, wrapping to the smallest id
//! of the ring. All functions are pure so that concurrent requests routed
//! against the same peer snapshot always agree on the owner.

use crate::error::{Result, RingError};
use crate::ring::{Key, NodeId};

/// Node responsible for `key`
pub fn owner_of(key: Key, peer_ids: &[NodeId]) -> Result<NodeId> {
    let smallest = peer_ids.iter().copied().min().ok_or(RingError::EmptyRing)?;

    Ok(peer_ids
        .iter()
        .copied()
        .filter(|id| *id >= key)
        .min()
        .unwrap_or(smallest))
}

/// The `n`th node clockwise after `node_id`.
///
/// `node_id` need not be part of `peer_ids` (a joining node computes its
/// successor before registering). When the ring has fewer than `n + 1`
/// distinct nodes the walk wraps back to `node_id`, which callers read as
/// "no distinct successor".
pub fn nth_successor(node_id: NodeId, peer_ids: &[NodeId], n: usize) -> NodeId {
    let mut others: Vec<NodeId> = peer_ids
        .iter()
        .copied()
        .filter(|id| *id != node_id)
        .collect();
    others.sort_unstable();
    others.dedup();

    if n == 0 || others.len() < n {
        return node_id;
    }

    let start = others
        .iter()
        .position(|id| *id > node_id)
        .unwrap_or(0);
    others[(start + n - 1) % others.len()]
}

/// The owner followed by up to `replication_factor - 1` distinct successors
pub fn replica_set(owner: NodeId, peer_ids: &[NodeId], replication_factor: usize) -> Vec<NodeId> {
    let mut nodes = vec![owner];
    for i in 1..replication_factor {
        let successor = nth_successor(owner, peer_ids, i);
        if successor == owner {
            break;
        }
        nodes.push(successor);
    }
    nodes
}
