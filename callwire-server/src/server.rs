//! TCP server implementation.

use crate::config::Config;
use crate::connection::Connection;
use crate::error::ServerError;
use crate::executor::Executor;
use crate::registry::{Registry, Signature};
use callwire_protocol::{Framing, DEFAULT_BUFFER_SIZE, DEFAULT_PORT};
use parking_lot::Mutex;
use serde_json::Value;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// How long the accept loop waits before re-checking the stop flag.
    pub poll_interval: Duration,
    /// Capacity of a single socket read.
    pub read_buffer_size: usize,
    /// Message framing.
    pub framing: Framing,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_PORT)),
            poll_interval: Duration::from_secs(1),
            read_buffer_size: DEFAULT_BUFFER_SIZE,
            framing: Framing::default(),
        }
    }
}

impl ServerConfig {
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            ..Default::default()
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size;
        self
    }

    pub fn with_framing(mut self, framing: Framing) -> Self {
        self.framing = framing;
        self
    }
}

impl From<&Config> for ServerConfig {
    fn from(config: &Config) -> Self {
        Self {
            bind_addr: config.network.bind_addr,
            poll_interval: config.network.poll_interval(),
            read_buffer_size: config.network.read_buffer_size,
            framing: config.network.framing,
        }
    }
}

/// Server lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Constructed,
    Listening,
    Running,
    Stopping,
    Stopped,
}

/// Server statistics.
#[derive(Debug, Default)]
pub struct ServerStats {
    pub connections_total: AtomicU64,
    pub connections_active: AtomicU64,
    pub requests_total: AtomicU64,
    pub errors_total: AtomicU64,
}

/// Requests a cooperative stop of the accept loop.
///
/// The loop notices within one poll interval; open connections are left to
/// finish on their own.
#[derive(Debug, Clone, Default)]
pub struct ShutdownHandle {
    stop_requested: Arc<AtomicBool>,
}

impl ShutdownHandle {
    pub fn stop(&self) {
        if !self.stop_requested.swap(true, Ordering::SeqCst) {
            tracing::info!("Stopping server");
        }
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }
}

/// TCP server for callwire.
pub struct Server {
    config: ServerConfig,
    registry: Arc<Registry>,
    shutdown: ShutdownHandle,
    state: Mutex<ServerState>,
    listener: Mutex<Option<TcpListener>>,
    connections: Mutex<Vec<JoinHandle<()>>>,
    stats: Arc<ServerStats>,
}

impl Server {
    /// Creates a server with only the built-in commands.
    pub fn new(config: ServerConfig) -> Self {
        Self::with_registry(config, Registry::new())
    }

    /// Creates a server around a prepared registry and adds the `shutdown`
    /// command to it.
    pub fn with_registry(config: ServerConfig, registry: Arc<Registry>) -> Self {
        let shutdown = ShutdownHandle::default();

        let handle = shutdown.clone();
        registry.register_fn("shutdown", Signature::new(), move |_| {
            handle.stop();
            Ok(Value::Null)
        });

        Self {
            config,
            registry,
            shutdown,
            state: Mutex::new(ServerState::Constructed),
            listener: Mutex::new(None),
            connections: Mutex::new(Vec::new()),
            stats: Arc::new(ServerStats::default()),
        }
    }

    /// Binds the listening socket.
    ///
    /// Returns the bound address, which differs from the configured one when
    /// port 0 was requested. A bind failure is final: the server moves to
    /// [`ServerState::Stopped`].
    pub async fn listen(&self) -> Result<SocketAddr, ServerError> {
        self.expect_state(ServerState::Constructed)?;

        let listener = match TcpListener::bind(self.config.bind_addr).await {
            Ok(listener) => listener,
            Err(source) => {
                tracing::error!(
                    "Server startup failed on {} ({})",
                    self.config.bind_addr,
                    source
                );
                *self.state.lock() = ServerState::Stopped;
                return Err(ServerError::Bind {
                    addr: self.config.bind_addr,
                    source,
                });
            }
        };

        let local_addr = listener.local_addr()?;
        *self.listener.lock() = Some(listener);
        *self.state.lock() = ServerState::Listening;
        Ok(local_addr)
    }

    /// Accepts connections until a stop is requested, then waits for every
    /// open connection to end.
    pub async fn serve(&self) -> Result<(), ServerError> {
        self.expect_state(ServerState::Listening)?;
        let listener = self
            .listener
            .lock()
            .take()
            .ok_or(ServerError::InvalidState {
                expected: ServerState::Listening,
                found: ServerState::Constructed,
            })?;

        *self.state.lock() = ServerState::Running;
        tracing::info!(
            "Server listening on {} ({})",
            listener.local_addr()?,
            self.config.framing
        );

        while !self.shutdown.is_stop_requested() {
            match tokio::time::timeout(self.config.poll_interval, listener.accept()).await {
                Err(_) => continue,
                Ok(Ok((stream, addr))) => self.spawn_connection(stream, addr),
                Ok(Err(e)) => tracing::error!("Accept error: {}", e),
            }
        }

        *self.state.lock() = ServerState::Stopping;
        tracing::info!("Closing connections...");

        let connections = std::mem::take(&mut *self.connections.lock());
        for handle in connections {
            if let Err(e) = handle.await {
                tracing::error!("Connection task failed: {}", e);
            }
        }
        tracing::info!("Connections closed");

        drop(listener);
        *self.state.lock() = ServerState::Stopped;
        tracing::info!("Server shutdown");
        Ok(())
    }

    /// Binds and serves until stopped.
    pub async fn run(&self) -> Result<(), ServerError> {
        self.listen().await?;
        self.serve().await
    }

    fn spawn_connection(&self, stream: TcpStream, addr: SocketAddr) {
        self.stats.connections_total.fetch_add(1, Ordering::Relaxed);
        self.stats.connections_active.fetch_add(1, Ordering::Relaxed);

        let connection = Connection::new(
            stream,
            addr,
            Executor::new(self.registry.clone()),
            self.config.framing,
            self.config.read_buffer_size,
            self.stats.clone(),
        );
        let conn_id = connection.id();
        let stats = self.stats.clone();

        let handle = tokio::spawn(async move {
            if let Err(e) = connection.run().await {
                tracing::debug!("Connection {} error: {}", addr, e);
                stats.errors_total.fetch_add(1, Ordering::Relaxed);
            }
            stats.connections_active.fetch_sub(1, Ordering::Relaxed);
            tracing::info!("Client disconnected: {} (conn={})", addr, conn_id);
        });

        let mut connections = self.connections.lock();
        connections.retain(|h| !h.is_finished());
        connections.push(handle);
    }

    fn expect_state(&self, expected: ServerState) -> Result<(), ServerError> {
        let found = *self.state.lock();
        if found == expected {
            Ok(())
        } else {
            Err(ServerError::InvalidState { expected, found })
        }
    }

    /// Initiates server shutdown.
    pub fn shutdown(&self) {
        self.shutdown.stop();
    }

    /// Returns a handle that can stop the server from elsewhere.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    pub fn state(&self) -> ServerState {
        *self.state.lock()
    }

    /// Returns whether the server is running.
    pub fn is_running(&self) -> bool {
        self.state() == ServerState::Running
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Returns server statistics.
    pub fn stats(&self) -> &ServerStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn test_config() -> ServerConfig {
        ServerConfig::new("127.0.0.1:0".parse().unwrap())
            .with_poll_interval(Duration::from_millis(50))
    }

    async fn start(server: Server) -> (Arc<Server>, SocketAddr, JoinHandle<()>) {
        let server = Arc::new(server);
        let addr = server.listen().await.unwrap();
        let runner = server.clone();
        let task = tokio::spawn(async move {
            runner.serve().await.unwrap();
        });
        (server, addr, task)
    }

    async fn roundtrip(stream: &mut TcpStream, request: Value) -> Value {
        stream
            .write_all(&serde_json::to_vec(&request).unwrap())
            .await
            .unwrap();
        let mut buf = vec![0u8; DEFAULT_BUFFER_SIZE];
        let n = stream.read(&mut buf).await.unwrap();
        serde_json::from_slice(&buf[..n]).unwrap()
    }

    #[tokio::test]
    async fn test_server_basic() {
        let server = Server::new(test_config());
        assert!(!server.is_running());
        assert_eq!(server.state(), ServerState::Constructed);
        assert!(server.registry().exists("shutdown"));
    }

    #[tokio::test]
    async fn test_serve_requires_listen() {
        let server = Server::new(test_config());
        let err = server.serve().await.unwrap_err();
        assert!(matches!(err, ServerError::InvalidState { .. }));
    }

    #[tokio::test]
    async fn test_bind_failure_is_fatal() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = taken.local_addr().unwrap();

        let server = Server::new(ServerConfig::new(addr));
        let err = server.run().await.unwrap_err();
        assert!(matches!(err, ServerError::Bind { .. }));
        assert_eq!(server.state(), ServerState::Stopped);
    }

    #[tokio::test]
    async fn test_help_scenario() {
        let (server, addr, task) = start(Server::new(test_config())).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        let response = roundtrip(&mut stream, json!({"id": 1, "method": "help", "params": []})).await;
        assert_eq!(response["id"], json!(1));
        assert_eq!(response["error"], Value::Null);
        let listing = response["result"].as_str().unwrap();
        assert!(listing.contains("help"));
        assert!(listing.contains("shutdown"));

        drop(stream);
        server.shutdown();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_method_scenario() {
        let (server, addr, task) = start(Server::new(test_config())).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        let response = roundtrip(&mut stream, json!({"id": 2, "method": "nope", "params": []})).await;
        assert_eq!(response["id"], json!(2));
        assert_eq!(response["result"], Value::Null);
        let error = response["error"].as_str().unwrap();
        assert!(error.contains("nope"));
        assert!(error.contains("not found"));

        drop(stream);
        server.shutdown();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_bad_message_keeps_connection_open() {
        let (server, addr, task) = start(Server::new(test_config())).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        let response = roundtrip(
            &mut stream,
            json!({"id": 3, "method": "help", "params": {"not": "an array"}}),
        )
        .await;
        assert!(response["error"].is_string());
        assert_eq!(response["result"], Value::Null);

        let response = roundtrip(&mut stream, json!({"id": 4, "method": "help", "params": []})).await;
        assert_eq!(response["id"], json!(4));
        assert_eq!(response["error"], Value::Null);

        drop(stream);
        server.shutdown();
        task.await.unwrap();
        assert_eq!(server.stats().requests_total.load(Ordering::Relaxed), 2);
        assert_eq!(server.stats().errors_total.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_sequential_calls_preserve_order() {
        let registry = Registry::new();
        registry.register_fn("echo", Signature::new().param("value"), |args| {
            Ok(args[0].clone())
        });
        let (server, addr, task) = start(Server::with_registry(test_config(), registry)).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        for id in 1..=2 {
            let response =
                roundtrip(&mut stream, json!({"id": id, "method": "echo", "params": [id * 10]}))
                    .await;
            assert_eq!(response["id"], json!(id));
            assert_eq!(response["result"], json!(id * 10));
        }

        drop(stream);
        server.shutdown();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_line_framing() {
        let config = test_config().with_framing(Framing::Lines);
        let (server, addr, task) = start(Server::new(config)).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        // Two requests in one write are answered in order.
        stream
            .write_all(
                b"{\"id\":1,\"method\":\"help\",\"params\":[]}\n{\"id\":2,\"method\":\"nope\",\"params\":[]}\n",
            )
            .await
            .unwrap();

        let lines = read_lines(&mut stream, 2).await;
        assert_eq!(lines[0]["id"], json!(1));
        assert_eq!(lines[1]["id"], json!(2));
        assert!(lines[1]["error"].is_string());

        drop(stream);
        server.shutdown();
        task.await.unwrap();
    }

    async fn read_lines(stream: &mut TcpStream, count: usize) -> Vec<Value> {
        let mut received = Vec::new();
        let mut buf = [0u8; 1024];
        while received.iter().filter(|&&b| b == b'\n').count() < count {
            let n = stream.read(&mut buf).await.unwrap();
            assert!(n > 0);
            received.extend_from_slice(&buf[..n]);
        }
        received
            .split(|&b| b == b'\n')
            .filter(|line| !line.is_empty())
            .map(|line| serde_json::from_slice(line).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_line_framing_oversized_request_gets_one_response() {
        let config = test_config()
            .with_framing(Framing::Lines)
            .with_read_buffer_size(512);
        let (server, addr, task) = start(Server::new(config)).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        let big = "x".repeat(10_000);
        let mut payload =
            serde_json::to_vec(&json!({"id": 1, "method": "echo", "params": [big]})).unwrap();
        payload.push(b'\n');
        payload.extend_from_slice(b"{\"id\":2,\"method\":\"help\",\"params\":[]}\n");
        stream.write_all(&payload).await.unwrap();

        let lines = read_lines(&mut stream, 2).await;
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["id"], Value::Null);
        assert!(lines[0]["error"]
            .as_str()
            .unwrap()
            .starts_with("message too large"));
        assert_eq!(lines[1]["id"], json!(2));
        assert_eq!(lines[1]["error"], Value::Null);

        // Nothing else is coming for the rest of the oversized line.
        let mut buf = [0u8; 64];
        let extra = tokio::time::timeout(Duration::from_millis(200), stream.read(&mut buf)).await;
        assert!(extra.is_err());

        drop(stream);
        server.shutdown();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_slow_command_only_stalls_its_connection() {
        let registry = Registry::new();
        registry.register_fn("slow", Signature::new(), |_| {
            std::thread::sleep(Duration::from_millis(500));
            Ok(json!("done"))
        });
        let (server, addr, task) = start(Server::with_registry(test_config(), registry)).await;

        let mut slow = TcpStream::connect(addr).await.unwrap();
        let mut fast = TcpStream::connect(addr).await.unwrap();

        let started = std::time::Instant::now();
        slow.write_all(&serde_json::to_vec(&json!({"id": 1, "method": "slow", "params": []})).unwrap())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let response = roundtrip(&mut fast, json!({"id": 7, "method": "help", "params": []})).await;
        assert_eq!(response["id"], json!(7));
        assert!(started.elapsed() < Duration::from_millis(400));

        let mut buf = vec![0u8; DEFAULT_BUFFER_SIZE];
        let n = slow.read(&mut buf).await.unwrap();
        let response: Value = serde_json::from_slice(&buf[..n]).unwrap();
        assert_eq!(response["result"], json!("done"));
        assert!(started.elapsed() >= Duration::from_millis(500));

        drop(slow);
        drop(fast);
        server.shutdown();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_command_waits_for_connections() {
        let (server, addr, task) = start(Server::new(test_config())).await;

        let mut first = TcpStream::connect(addr).await.unwrap();
        let mut second = TcpStream::connect(addr).await.unwrap();

        let response =
            roundtrip(&mut first, json!({"id": 3, "method": "shutdown", "params": []})).await;
        assert_eq!(response["id"], json!(3));
        assert_eq!(response["error"], Value::Null);

        // The other connection is still served while the server drains.
        let response = roundtrip(&mut second, json!({"id": 1, "method": "help", "params": []})).await;
        assert_eq!(response["id"], json!(1));

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(server.state(), ServerState::Stopping);
        assert!(!task.is_finished());

        drop(first);
        drop(second);
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(server.state(), ServerState::Stopped);

        // No longer accepting.
        assert!(TcpStream::connect(addr).await.is_err());
    }

    #[tokio::test]
    async fn test_stop_before_serve() {
        let server = Server::new(test_config());
        server.listen().await.unwrap();
        server.shutdown_handle().stop();
        server.serve().await.unwrap();
        assert_eq!(server.state(), ServerState::Stopped);
    }
}
