//! Ring model: node identity, items and a node's view of the ring
//!
//! A [`RingView`] is owned by exactly one node process and is only ever
//! shared with other nodes as RPC copies. Its mutators keep the invariant
//! that a key is never both owned and held as a replica on the same node.

pub mod partitioner;

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

pub use partitioner::{nth_successor, owner_of, replica_set};

/// Ring position of a node; ascending order defines the ring
pub type NodeId = u64;

/// Item keys live in the same integer domain as node ids
pub type Key = u64;

/// A ring member as announced to other nodes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peer {
    pub id: NodeId,
    pub address: String,
}

/// A versioned value; the higher version of a key is authoritative
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub key: Key,
    pub value: String,
    pub version: u64,
}

impl Item {
    /// First version of a key
    pub fn new(key: Key, value: String) -> Self {
        Self {
            key,
            value,
            version: 1,
        }
    }

    pub fn with_version(key: Key, value: String, version: u64) -> Self {
        Self {
            key,
            value,
            version,
        }
    }

    /// True if `self` should replace `other` as the copy of the same key
    pub fn supersedes(&self, other: &Item) -> bool {
        self.version > other.version
    }
}

/// Membership state of a node process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeState {
    Left,
    Joining,
    Joined,
    Leaving,
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeState::Left => "left",
            NodeState::Joining => "joining",
            NodeState::Joined => "joined",
            NodeState::Leaving => "leaving",
        };
        f.write_str(name)
    }
}

/// Outcome of merging a pushed replica into a node's view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicaMerge {
    /// The replica was stored or replaced an older version
    Applied,
    /// Version was not strictly greater than the held replica
    StaleIgnored,
    /// The key is owned here; ownership wins over a replica
    OwnedLocally,
}

/// A node's view of itself, its items and its peers
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RingView {
    pub owned_items: BTreeMap<Key, Item>,
    pub held_replicas: BTreeMap<Key, Item>,
    pub peers: BTreeMap<NodeId, String>,
}

impl RingView {
    /// View of a node that only knows itself
    pub fn solitary(id: NodeId, address: &str) -> Self {
        let mut peers = BTreeMap::new();
        peers.insert(id, address.to_string());
        Self {
            owned_items: BTreeMap::new(),
            held_replicas: BTreeMap::new(),
            peers,
        }
    }

    /// Peer ids in ring order
    pub fn peer_ids(&self) -> Vec<NodeId> {
        self.peers.keys().copied().collect()
    }

    pub fn address_of(&self, id: NodeId) -> Option<&str> {
        self.peers.get(&id).map(String::as_str)
    }

    /// Apply an owner-local write, returning the new version of the item.
    ///
    /// A key still held as a replica is promoted so its version keeps
    /// increasing across the change of role.
    pub fn apply_write(&mut self, key: Key, value: String) -> Item {
        let previous = self
            .owned_items
            .get(&key)
            .map(|item| item.version)
            .or_else(|| self.held_replicas.remove(&key).map(|item| item.version));

        let item = Item::with_version(key, value, previous.map_or(1, |v| v + 1));
        self.owned_items.insert(key, item.clone());
        item
    }

    pub fn remove_owned(&mut self, key: Key) -> Option<Item> {
        self.owned_items.remove(&key)
    }

    /// Merge a replica pushed by a predecessor
    pub fn merge_replica(&mut self, item: Item) -> ReplicaMerge {
        if self.owned_items.contains_key(&item.key) {
            return ReplicaMerge::OwnedLocally;
        }
        match self.held_replicas.get(&item.key) {
            Some(held) if !item.supersedes(held) => ReplicaMerge::StaleIgnored,
            _ => {
                self.held_replicas.insert(item.key, item);
                ReplicaMerge::Applied
            }
        }
    }

    /// Drop a held replica unless the held copy is newer than `item`
    pub fn remove_replica(&mut self, item: &Item) -> bool {
        match self.held_replicas.get(&item.key) {
            Some(held) if held.version <= item.version => {
                self.held_replicas.remove(&item.key);
                true
            }
            _ => false,
        }
    }

    /// Take ownership of handed-off items, keeping the newer copy on conflict
    pub fn absorb_owned(&mut self, items: Vec<Item>) {
        for item in items {
            self.held_replicas.remove(&item.key);
            match self.owned_items.get(&item.key) {
                Some(current) if !item.supersedes(current) => {}
                _ => {
                    self.owned_items.insert(item.key, item);
                }
            }
        }
    }

    /// Remove and return the owned items that `new_owner` is now responsible
    /// for. `new_owner` must already be part of `peers`.
    pub fn take_hand_off(&mut self, new_owner: NodeId) -> Vec<Item> {
        let ids = self.peer_ids();
        let moving: Vec<Key> = self
            .owned_items
            .keys()
            .copied()
            .filter(|key| owner_of(*key, &ids).map_or(false, |owner| owner == new_owner))
            .collect();

        moving
            .into_iter()
            .filter_map(|key| self.owned_items.remove(&key))
            .collect()
    }

    /// A key must never be owned and held on the same node
    pub fn is_consistent(&self) -> bool {
        self.owned_items
            .keys()
            .all(|key| !self.held_replicas.contains_key(key))
    }
}
