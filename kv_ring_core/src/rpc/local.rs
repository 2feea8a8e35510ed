//! In-process transport
//!
//! Nodes register their handlers under an address string. Requests and
//! responses go through the same bincode encoding as the TCP transport, so
//! anything that cannot cross a real wire fails here too. Addresses can be
//! made unreachable or slow to exercise failure paths.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::TransportError;
use crate::rpc::{RpcHandler, RpcRequest, RpcResponse, Transport};

#[derive(Default)]
pub struct LocalNetwork {
    handlers: RwLock<HashMap<String, Arc<dyn RpcHandler>>>,
    unreachable: RwLock<HashSet<String>>,
    delays: RwLock<HashMap<String, Duration>>,
    calls: AtomicU64,
}

impl LocalNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every request addressed to `address` while set
    pub async fn set_unreachable(&self, address: &str, unreachable: bool) {
        let mut set = self.unreachable.write().await;
        if unreachable {
            set.insert(address.to_string());
        } else {
            set.remove(address);
        }
    }

    /// Delay every request addressed to `address`; `None` clears the delay
    pub async fn set_delay(&self, address: &str, delay: Option<Duration>) {
        let mut delays = self.delays.write().await;
        match delay {
            Some(delay) => {
                delays.insert(address.to_string(), delay);
            }
            None => {
                delays.remove(address);
            }
        }
    }

    pub async fn is_serving(&self, address: &str) -> bool {
        self.handlers.read().await.contains_key(address)
    }

    /// Requests attempted so far, including failed ones
    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Transport for LocalNetwork {
    async fn call(&self, address: &str, request: RpcRequest) -> Result<RpcResponse, TransportError> {
        self.calls.fetch_add(1, Ordering::Relaxed);

        if self.unreachable.read().await.contains(address) {
            return Err(TransportError::Unreachable(address.to_string()));
        }
        let handler = self
            .handlers
            .read()
            .await
            .get(address)
            .cloned()
            .ok_or_else(|| TransportError::Unreachable(address.to_string()))?;
        let delay = self.delays.read().await.get(address).copied();

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let request: RpcRequest = bincode::deserialize(&bincode::serialize(&request)?)?;
        let response = handler.handle(request).await;
        Ok(bincode::deserialize(&bincode::serialize(&response)?)?)
    }

    async fn serve(&self, address: &str, handler: Arc<dyn RpcHandler>) -> Result<(), TransportError> {
        let mut handlers = self.handlers.write().await;
        if handlers.contains_key(address) {
            return Err(TransportError::Io(format!("address {address} already in use")));
        }
        handlers.insert(address.to_string(), handler);
        Ok(())
    }

    async fn unserve(&self, address: &str) {
        self.handlers.write().await.remove(address);
    }
}
