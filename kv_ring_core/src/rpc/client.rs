//! Typed client for the inter-node RPC contract
//!
//! Every call is bounded by the node's shared timeout; an expired call is
//! reported as [`TransportError::Timeout`] and treated like any other
//! transport failure.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Result, RingError, TransportError};
use crate::rpc::{RpcRequest, RpcResponse, Transport};
use crate::ring::{Item, Key, NodeId, Peer};

#[derive(Clone)]
pub struct PeerClient {
    transport: Arc<dyn Transport>,
    timeout: Duration,
}

fn unexpected(request: &str, response: RpcResponse) -> RingError {
    match response {
        RpcResponse::Error(remote) => remote.into(),
        other => TransportError::UnexpectedResponse(format!("{request} answered with {other:?}")).into(),
    }
}

impl PeerClient {
    pub fn new(transport: Arc<dyn Transport>, timeout: Duration) -> Self {
        Self { transport, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Send a raw request with the shared timeout applied
    pub async fn call(&self, address: &str, request: RpcRequest) -> std::result::Result<RpcResponse, TransportError> {
        match tokio::time::timeout(self.timeout, self.transport.call(address, request)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(address.to_string())),
        }
    }

    pub async fn get_node(&self, address: &str) -> Result<Peer> {
        match self.call(address, RpcRequest::GetNode).await? {
            RpcResponse::Node(peer) => Ok(peer),
            other => Err(unexpected("get_node", other)),
        }
    }

    pub async fn get_peers(&self, address: &str) -> Result<BTreeMap<NodeId, String>> {
        match self.call(address, RpcRequest::GetPeers).await? {
            RpcResponse::Peers(peers) => Ok(peers),
            other => Err(unexpected("get_peers", other)),
        }
    }

    pub async fn add_peer(&self, address: &str, id: NodeId, peer_address: &str) -> Result<()> {
        let request = RpcRequest::AddPeer {
            id,
            address: peer_address.to_string(),
        };
        self.expect_ack("add_peer", address, request).await
    }

    pub async fn remove_peer(&self, address: &str, id: NodeId) -> Result<()> {
        self.expect_ack("remove_peer", address, RpcRequest::RemovePeer { id })
            .await
    }

    pub async fn push_items(&self, address: &str, items: Vec<Item>) -> Result<()> {
        self.expect_ack("push_items", address, RpcRequest::PushItems { items })
            .await
    }

    pub async fn remove_items(&self, address: &str, items: Vec<Item>) -> Result<()> {
        self.expect_ack("remove_items", address, RpcRequest::RemoveItems { items })
            .await
    }

    pub async fn push_replicas(&self, address: &str, items: Vec<Item>) -> Result<()> {
        self.expect_ack("push_replicas", address, RpcRequest::PushReplicas { items })
            .await
    }

    pub async fn remove_replicas(&self, address: &str, items: Vec<Item>) -> Result<()> {
        self.expect_ack("remove_replicas", address, RpcRequest::RemoveReplicas { items })
            .await
    }

    pub async fn get_replica(&self, address: &str, key: Key) -> Result<Option<Item>> {
        match self.call(address, RpcRequest::GetReplica { key }).await? {
            RpcResponse::Item(item) => Ok(item),
            other => Err(unexpected("get_replica", other)),
        }
    }

    pub async fn get_item(&self, address: &str, key: Key) -> Result<Option<Item>> {
        match self.call(address, RpcRequest::GetItem { key }).await? {
            RpcResponse::Item(item) => Ok(item),
            other => Err(unexpected("get_item", other)),
        }
    }

    /// Owner-local write; returns the item as committed by the owner
    pub async fn update_item(&self, address: &str, key: Key, value: String) -> Result<Item> {
        match self.call(address, RpcRequest::UpdateItem { key, value }).await? {
            RpcResponse::Item(Some(item)) => Ok(item),
            other => Err(unexpected("update_item", other)),
        }
    }

    pub async fn remove_item(&self, address: &str, key: Key) -> Result<Option<Item>> {
        match self.call(address, RpcRequest::RemoveItem { key }).await? {
            RpcResponse::Item(item) => Ok(item),
            other => Err(unexpected("remove_item", other)),
        }
    }

    pub async fn request_hand_off(&self, address: &str, new_owner: NodeId) -> Result<Vec<Item>> {
        match self.call(address, RpcRequest::RequestHandOff { new_owner }).await? {
            RpcResponse::Items(items) => Ok(items),
            other => Err(unexpected("request_hand_off", other)),
        }
    }

    pub async fn client_get(&self, address: &str, key: Key) -> Result<Option<String>> {
        match self.call(address, RpcRequest::ClientGet { key }).await? {
            RpcResponse::Value(value) => Ok(value),
            other => Err(unexpected("client_get", other)),
        }
    }

    pub async fn client_put(&self, address: &str, key: Key, value: String) -> Result<Item> {
        match self.call(address, RpcRequest::ClientPut { key, value }).await? {
            RpcResponse::Item(Some(item)) => Ok(item),
            other => Err(unexpected("client_put", other)),
        }
    }

    pub async fn client_delete(&self, address: &str, key: Key) -> Result<bool> {
        match self.call(address, RpcRequest::ClientDelete { key }).await? {
            RpcResponse::Removed(removed) => Ok(removed),
            other => Err(unexpected("client_delete", other)),
        }
    }

    async fn expect_ack(&self, name: &str, address: &str, request: RpcRequest) -> Result<()> {
        match self.call(address, request).await? {
            RpcResponse::Ack => Ok(()),
            other => Err(unexpected(name, other)),
        }
    }
}
