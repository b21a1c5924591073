//! Connection management.

use crate::error::ClientError;
use bytes::Bytes;
use callwire_protocol::{Framing, MessageDecoder, DEFAULT_BUFFER_SIZE, DEFAULT_PORT};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Minimum read buffer size (512 B).
pub const MIN_READ_BUFFER_SIZE: usize = 512;

/// Maximum read buffer size (1 MiB).
pub const MAX_READ_BUFFER_SIZE: usize = 1024 * 1024;

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server host name or address.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Read buffer size for socket reads.
    pub read_buffer_size: usize,
    /// How long to wait for a response; `None` waits forever.
    pub request_timeout: Option<Duration>,
    /// Message framing, must match the server.
    pub framing: Framing,
}

impl ClientConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            read_buffer_size: DEFAULT_BUFFER_SIZE,
            request_timeout: None,
            framing: Framing::default(),
        }
    }

    /// Targets `host` on the default port.
    pub fn with_default_port(host: impl Into<String>) -> Self {
        Self::new(host, DEFAULT_PORT)
    }

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.clamp(MIN_READ_BUFFER_SIZE, MAX_READ_BUFFER_SIZE);
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn with_framing(mut self, framing: Framing) -> Self {
        self.framing = framing;
        self
    }

    /// Returns `host:port` for logging.
    pub fn target(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// An open socket to a callwire server.
pub struct Connection {
    stream: TcpStream,
    decoder: MessageDecoder,
    buf: Vec<u8>,
}

impl Connection {
    /// Opens a TCP connection.
    pub async fn open(config: &ClientConfig) -> Result<Self, ClientError> {
        let stream = TcpStream::connect((config.host.as_str(), config.port)).await?;
        stream.set_nodelay(true).ok();

        Ok(Self {
            stream,
            decoder: MessageDecoder::new(config.framing, config.read_buffer_size * 16),
            buf: vec![0u8; config.read_buffer_size],
        })
    }

    /// Writes one encoded message.
    pub async fn send(&mut self, message: &[u8]) -> Result<(), ClientError> {
        self.stream.write_all(message).await?;
        tracing::debug!("Sent {} bytes", message.len());
        Ok(())
    }

    /// Reads until one complete message is available.
    pub async fn receive(&mut self) -> Result<Bytes, ClientError> {
        loop {
            if let Some(message) = self.decoder.next_message()? {
                return Ok(message);
            }

            let n = self.stream.read(&mut self.buf).await?;
            if n == 0 {
                tracing::debug!("Connection closed (0 bytes)");
                return Err(ClientError::ConnectionClosed);
            }
            tracing::debug!("Received {} bytes", n);
            self.decoder.extend(&self.buf[..n]);
        }
    }

    /// Shuts down the write half; the server sees end of stream.
    pub async fn close(mut self) {
        if let Err(e) = self.stream.shutdown().await {
            tracing::debug!("Socket shutdown failed: {}", e);
        }
    }
}
