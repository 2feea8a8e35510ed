//! TCP transport: length-delimited bincode frames
//!
//! A connection carries request/response pairs in order. The client side
//! opens one connection per call.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use crate::error::TransportError;
use crate::rpc::{RpcHandler, RpcRequest, RpcResponse, Transport};

#[derive(Default)]
pub struct TcpTransport {
    listeners: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl TcpTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

async fn handle_connection(stream: TcpStream, handler: Arc<dyn RpcHandler>) -> Result<(), TransportError> {
    let mut framed = Framed::new(stream, LengthDelimitedCodec::new());

    while let Some(frame) = framed.next().await {
        let request: RpcRequest = bincode::deserialize(&frame?)?;
        tracing::trace!(request = request.name(), "Serving RPC");
        let response = handler.handle(request).await;
        framed.send(Bytes::from(bincode::serialize(&response)?)).await?;
    }
    Ok(())
}

#[async_trait]
impl Transport for TcpTransport {
    async fn call(&self, address: &str, request: RpcRequest) -> Result<RpcResponse, TransportError> {
        let stream = TcpStream::connect(address)
            .await
            .map_err(|e| TransportError::Unreachable(format!("{address}: {e}")))?;
        let mut framed = Framed::new(stream, LengthDelimitedCodec::new());

        framed.send(Bytes::from(bincode::serialize(&request)?)).await?;
        match framed.next().await {
            Some(frame) => Ok(bincode::deserialize(&frame?)?),
            None => Err(TransportError::Io(format!("{address} closed the connection"))),
        }
    }

    async fn serve(&self, address: &str, handler: Arc<dyn RpcHandler>) -> Result<(), TransportError> {
        let listener = TcpListener::bind(address).await?;
        tracing::info!(address = address, "RPC endpoint listening");

        // Connection tasks live in the accept loop's JoinSet, so aborting the
        // loop also drops every open connection
        let task = tokio::spawn(async move {
            let mut connections = JoinSet::new();
            loop {
                tokio::select! {
                    accepted = listener.accept() => {
                        let (stream, peer) = match accepted {
                            Ok(accepted) => accepted,
                            Err(e) => {
                                tracing::warn!(error = %e, "Failed to accept RPC connection");
                                continue;
                            }
                        };
                        let handler = Arc::clone(&handler);
                        connections.spawn(async move {
                            if let Err(e) = handle_connection(stream, handler).await {
                                tracing::debug!(peer = %peer, error = %e, "RPC connection closed with error");
                            }
                        });
                    }
                    Some(_) = connections.join_next(), if !connections.is_empty() => {}
                }
            }
        });

        if let Some(previous) = self.listeners.lock().await.insert(address.to_string(), task) {
            previous.abort();
        }
        Ok(())
    }

    async fn unserve(&self, address: &str) {
        let task = self.listeners.lock().await.remove(address);
        if let Some(task) = task {
            task.abort();
            // Wait for the loop to be dropped so its connections are aborted too
            let _ = task.await;
            tracing::info!(address = address, "RPC endpoint stopped");
        }
    }
}
