//! Inter-node RPC contract
//!
//! Every node exposes the same request/response surface. The transport that
//! carries it is pluggable: [`tcp::TcpTransport`] for real processes and
//! [`local::LocalNetwork`] for in-process rings.

pub mod client;
pub mod local;
pub mod tcp;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{RemoteError, TransportError};
use crate::ring::{Item, Key, NodeId, Peer};

pub use client::PeerClient;
pub use local::LocalNetwork;
pub use tcp::TcpTransport;

/// Requests understood by every ring node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RpcRequest {
    GetNode,
    GetPeers,
    AddPeer { id: NodeId, address: String },
    RemovePeer { id: NodeId },
    /// Ownership transfer to the receiver
    PushItems { items: Vec<Item> },
    RemoveItems { items: Vec<Item> },
    PushReplicas { items: Vec<Item> },
    RemoveReplicas { items: Vec<Item> },
    GetReplica { key: Key },
    /// Owner-local read
    GetItem { key: Key },
    /// Owner-local write
    UpdateItem { key: Key, value: String },
    /// Owner-local delete
    RemoveItem { key: Key },
    /// Ask the receiver to give up the items `new_owner` is now responsible for
    RequestHandOff { new_owner: NodeId },
    /// Client requests; the receiving node coordinates the quorum
    ClientGet { key: Key },
    ClientPut { key: Key, value: String },
    ClientDelete { key: Key },
}

/// Responses to [`RpcRequest`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RpcResponse {
    Node(Peer),
    Peers(BTreeMap<NodeId, String>),
    Ack,
    Item(Option<Item>),
    Items(Vec<Item>),
    Value(Option<String>),
    Removed(bool),
    Error(RemoteError),
}

impl RpcRequest {
    /// Operation name used in logs
    pub fn name(&self) -> &'static str {
        match self {
            RpcRequest::GetNode => "get_node",
            RpcRequest::GetPeers => "get_peers",
            RpcRequest::AddPeer { .. } => "add_peer",
            RpcRequest::RemovePeer { .. } => "remove_peer",
            RpcRequest::PushItems { .. } => "push_items",
            RpcRequest::RemoveItems { .. } => "remove_items",
            RpcRequest::PushReplicas { .. } => "push_replicas",
            RpcRequest::RemoveReplicas { .. } => "remove_replicas",
            RpcRequest::GetReplica { .. } => "get_replica",
            RpcRequest::GetItem { .. } => "get_item",
            RpcRequest::UpdateItem { .. } => "update_item",
            RpcRequest::RemoveItem { .. } => "remove_item",
            RpcRequest::RequestHandOff { .. } => "request_hand_off",
            RpcRequest::ClientGet { .. } => "client_get",
            RpcRequest::ClientPut { .. } => "client_put",
            RpcRequest::ClientDelete { .. } => "client_delete",
        }
    }
}

/// Server side of the contract
#[async_trait]
pub trait RpcHandler: Send + Sync {
    async fn handle(&self, request: RpcRequest) -> RpcResponse;
}

/// Carries requests to named nodes and exposes local handlers
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one request to the node serving `address`
    async fn call(&self, address: &str, request: RpcRequest) -> Result<RpcResponse, TransportError>;

    /// Start serving `handler` at `address`
    async fn serve(&self, address: &str, handler: Arc<dyn RpcHandler>) -> Result<(), TransportError>;

    /// Stop serving `address`; unknown addresses are ignored
    async fn unserve(&self, address: &str);
}
