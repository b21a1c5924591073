//! Per-connection request loop.

use crate::error::{CommandError, ServerError};
use crate::executor::Executor;
use crate::server::ServerStats;
use bytes::Bytes;
use callwire_protocol::{encode_message, Framing, MessageDecoder, Request, Response};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use uuid::Uuid;

/// Longest buffered line accepted in line framing, as a multiple of the read
/// buffer size.
pub const MAX_LINE_FACTOR: usize = 16;

/// One accepted peer.
pub struct Connection {
    id: Uuid,
    stream: TcpStream,
    addr: SocketAddr,
    executor: Executor,
    framing: Framing,
    read_buffer_size: usize,
    stats: Arc<ServerStats>,
}

impl Connection {
    pub fn new(
        stream: TcpStream,
        addr: SocketAddr,
        executor: Executor,
        framing: Framing,
        read_buffer_size: usize,
        stats: Arc<ServerStats>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            stream,
            addr,
            executor,
            framing,
            read_buffer_size,
            stats,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Serves requests until the peer closes the socket.
    ///
    /// A bad message never ends the loop; it gets an error response.
    pub async fn run(mut self) -> Result<(), ServerError> {
        tracing::info!("Client connected: {} (conn={})", self.addr, self.id);

        let mut buf = vec![0u8; self.read_buffer_size];
        let mut decoder =
            MessageDecoder::new(self.framing, self.read_buffer_size * MAX_LINE_FACTOR);

        loop {
            let n = match self.stream.read(&mut buf).await {
                Ok(0) => {
                    tracing::debug!("[{}] Connection closed by client", self.addr);
                    return Ok(());
                }
                Ok(n) => n,
                Err(e) => {
                    tracing::debug!("[{}] Read error: {}", self.addr, e);
                    return Err(ServerError::Io(e));
                }
            };

            tracing::debug!("[{}] Received {} bytes", self.addr, n);
            decoder.extend(&buf[..n]);

            loop {
                let response = match decoder.next_message() {
                    Ok(Some(message)) => {
                        tracing::trace!("[{}] <- {}", self.addr, String::from_utf8_lossy(&message));
                        self.stats.requests_total.fetch_add(1, Ordering::Relaxed);
                        dispatch(&self.executor, message).await
                    }
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!("[{}] Dropping message: {}", self.addr, e);
                        Response::error(Value::Null, e.to_string())
                    }
                };

                if response.is_error() {
                    self.stats.errors_total.fetch_add(1, Ordering::Relaxed);
                }

                let bytes = encode_message(&response, self.framing)?;
                self.stream.write_all(&bytes).await?;
                tracing::debug!("[{}] Sent {} bytes", self.addr, bytes.len());
            }
        }
    }
}

/// Turns one raw message into one response.
///
/// The command runs on the blocking pool so a slow handler only stalls the
/// connection that issued it.
pub async fn dispatch(executor: &Executor, message: Bytes) -> Response {
    let request = match Request::parse(&message) {
        Ok(request) => request,
        Err(invalid) => {
            tracing::warn!("Invalid request: {}", invalid.error);
            return invalid.into();
        }
    };

    let Request { id, method, params } = request;
    tracing::info!("Request: {} (id={})", method, id);

    let executor = executor.clone();
    let name = method.clone();
    let outcome = tokio::task::spawn_blocking(move || executor.call(&name, &params))
        .await
        .unwrap_or_else(|e| {
            tracing::error!("Command {} did not complete: {}", method, e);
            Err(CommandError::Panicked(method.clone()))
        });

    match outcome {
        Ok(result) => Response::ok(id, result),
        Err(e) => {
            tracing::warn!("Command {} failed: {}", method, e);
            Response::error(id, e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{Registry, Signature};
    use serde_json::json;

    fn test_executor() -> Executor {
        let registry = Registry::new();
        registry.register_fn("echo", Signature::new().variadic("args"), |args| {
            Ok(Value::Array(args.to_vec()))
        });
        registry.register_fn("explode", Signature::new(), |_| panic!("kaboom"));
        Executor::new(registry)
    }

    async fn dispatch_json(executor: &Executor, value: Value) -> Response {
        dispatch(executor, Bytes::from(serde_json::to_vec(&value).unwrap())).await
    }

    #[tokio::test]
    async fn test_dispatch_success_echoes_id() {
        let executor = test_executor();
        let response =
            dispatch_json(&executor, json!({"id": 11, "method": "echo", "params": [1, "a"]}))
                .await;
        assert_eq!(response.id, json!(11));
        assert_eq!(response.result, json!([1, "a"]));
        assert!(response.error.is_none());
    }

    #[tokio::test]
    async fn test_dispatch_unknown_method() {
        let executor = test_executor();
        let response =
            dispatch_json(&executor, json!({"id": 2, "method": "nope", "params": []})).await;
        assert_eq!(response.id, json!(2));
        assert_eq!(response.result, Value::Null);
        let error = response.error.unwrap();
        assert!(error.contains("nope"));
        assert!(error.contains("not found"));
    }

    #[tokio::test]
    async fn test_dispatch_missing_method() {
        let executor = test_executor();
        let response = dispatch_json(&executor, json!({"id": 4, "params": []})).await;
        assert!(response.error.unwrap().contains("method"));
        assert_eq!(response.result, Value::Null);
    }

    #[tokio::test]
    async fn test_dispatch_missing_id_yields_null_id() {
        let executor = test_executor();
        let response = dispatch_json(&executor, json!({"method": "echo", "params": []})).await;
        assert_eq!(response.id, Value::Null);
        assert_eq!(response.error.as_deref(), Some("'id' is required"));
    }

    #[tokio::test]
    async fn test_dispatch_params_object() {
        let executor = test_executor();
        let response =
            dispatch_json(&executor, json!({"id": 3, "method": "echo", "params": {"a": 1}}))
                .await;
        assert!(response.is_error());
        assert_eq!(response.result, Value::Null);
    }

    #[tokio::test]
    async fn test_dispatch_garbage() {
        let executor = test_executor();
        let response = dispatch(&executor, Bytes::from_static(b"\xff\x00garbage")).await;
        assert_eq!(response.id, Value::Null);
        assert!(response.is_error());
    }

    #[tokio::test]
    async fn test_dispatch_panicking_handler() {
        let executor = test_executor();
        let response =
            dispatch_json(&executor, json!({"id": 5, "method": "explode", "params": []})).await;
        assert_eq!(response.id, json!(5));
        assert_eq!(response.error.as_deref(), Some("command explode panicked"));
    }
}
