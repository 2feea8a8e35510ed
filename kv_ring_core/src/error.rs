//! Error types for the ring store
//!
//! Membership, routing and quorum failures are surfaced as [`RingError`];
//! every failed remote call is folded into a [`TransportError`] first.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ring::{Item, Key, NodeId};

/// Result type alias for ring operations
pub type Result<T> = std::result::Result<T, RingError>;

/// Errors raised by the membership, replication and quorum components
#[derive(Debug, Error)]
pub enum RingError {
    /// Routing was attempted with no known peers
    #[error("ring has no known peers")]
    EmptyRing,

    /// Join attempt failed; no peer set was committed
    #[error("join failed: {0}")]
    Join(String),

    /// Leave attempt failed; the node is still a ring member
    #[error("leave failed: {0}")]
    Leave(String),

    /// Fewer than the required responses were collected before abort
    #[error("quorum not reached: required {required}, received {received}")]
    QuorumNotReached {
        required: usize,
        received: usize,
        partial: Vec<Item>,
    },

    /// Operation needs a joined node
    #[error("node is not a ring member")]
    NotJoined,

    /// An owner-local operation reached a node that does not own the key
    #[error("key {key} is owned by node {owner}")]
    NotOwner { key: Key, owner: NodeId },

    /// Any remote call failure
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Node store failure
    #[error("store error: {0}")]
    Store(String),

    /// Failure reported by the remote node while serving the request
    #[error("remote error: {0}")]
    Remote(String),
}

/// Remote-call failures; the core treats every variant like a timeout
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TransportError {
    #[error("node at {0} is unreachable")]
    Unreachable(String),

    #[error("request to {0} timed out")]
    Timeout(String),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),

    #[error("io error: {0}")]
    Io(String),
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        TransportError::Io(err.to_string())
    }
}

impl From<bincode::Error> for TransportError {
    fn from(err: bincode::Error) -> Self {
        TransportError::Codec(err.to_string())
    }
}

/// Error carried inside an RPC response so a coordinator's failure reaches
/// the calling client without losing its kind
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum RemoteError {
    EmptyRing,
    NotJoined,
    NotOwner {
        key: Key,
        owner: NodeId,
    },
    QuorumNotReached {
        required: usize,
        received: usize,
        partial: Vec<Item>,
    },
    Failed(String),
}

impl From<&RingError> for RemoteError {
    fn from(err: &RingError) -> Self {
        match err {
            RingError::EmptyRing => RemoteError::EmptyRing,
            RingError::NotJoined => RemoteError::NotJoined,
            RingError::NotOwner { key, owner } => RemoteError::NotOwner {
                key: *key,
                owner: *owner,
            },
            RingError::QuorumNotReached {
                required,
                received,
                partial,
            } => RemoteError::QuorumNotReached {
                required: *required,
                received: *received,
                partial: partial.clone(),
            },
            other => RemoteError::Failed(other.to_string()),
        }
    }
}

impl From<RemoteError> for RingError {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::EmptyRing => RingError::EmptyRing,
            RemoteError::NotJoined => RingError::NotJoined,
            RemoteError::NotOwner { key, owner } => RingError::NotOwner { key, owner },
            RemoteError::QuorumNotReached {
                required,
                received,
                partial,
            } => RingError::QuorumNotReached {
                required,
                received,
                partial,
            },
            RemoteError::Failed(message) => RingError::Remote(message),
        }
    }
}
