//! High-level client API.

use crate::connection::{ClientConfig, Connection};
use crate::error::ClientError;
use callwire_protocol::{encode_message, ProtocolError, Request, Response};
use serde_json::Value;
use std::time::Duration;

/// Client for a callwire server.
///
/// Calls take `&mut self`, so only one request is ever outstanding on a
/// connection and a response is always matched against the last id sent.
pub struct Client {
    config: ClientConfig,
    conn: Option<Connection>,
    last_id: Option<u64>,
}

impl Client {
    /// Creates a new client with the given configuration.
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            conn: None,
            last_id: None,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Connects to the server. Does nothing if already connected.
    ///
    /// A failure leaves the client disconnected and can be retried.
    pub async fn connect(&mut self) -> Result<(), ClientError> {
        let target = self.config.target();
        if self.conn.is_some() {
            tracing::warn!("Already connected to {}", target);
            return Ok(());
        }

        tracing::info!("Connecting to {}...", target);
        match Connection::open(&self.config).await {
            Ok(conn) => {
                self.conn = Some(conn);
                self.last_id = Some(0);
                tracing::info!("Connected");
                Ok(())
            }
            Err(e) => {
                tracing::warn!("Cannot connect to {} ({})", target, e);
                Err(e)
            }
        }
    }

    /// Polls [`Client::connect`] with a fixed delay until it succeeds.
    ///
    /// With `max_attempts` set, gives up after that many failures and
    /// returns the last error.
    pub async fn connect_with_retry(
        &mut self,
        delay: Duration,
        max_attempts: Option<u32>,
    ) -> Result<(), ClientError> {
        let mut attempts = 0;
        loop {
            match self.connect().await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    attempts += 1;
                    if max_attempts.is_some_and(|max| attempts >= max) {
                        return Err(e);
                    }
                }
            }
            tokio::time::sleep(delay).await;
        }
    }

    /// Closes the connection. Does nothing if not connected.
    pub async fn disconnect(&mut self) {
        match self.conn.take() {
            Some(conn) => {
                conn.close().await;
                self.last_id = None;
                tracing::info!("Disconnected");
            }
            None => tracing::warn!("Not connected"),
        }
    }

    /// Returns whether the client is connected.
    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    /// Id of the most recent request, `Some(0)` right after connecting and
    /// `None` while disconnected.
    pub fn last_id(&self) -> Option<u64> {
        self.last_id
    }

    /// Sends `method(params…)` and waits for the matching response.
    ///
    /// `params` must be a JSON array. A response whose id does not match the
    /// request is discarded and reported as [`ClientError::IdMismatch`].
    /// Server-side failures come back as a response with `error` set.
    pub async fn call(&mut self, method: &str, params: Value) -> Result<Response, ClientError> {
        if self.conn.is_none() {
            return Err(ClientError::NotConnected);
        }
        if method.is_empty() {
            return Err(ProtocolError::MissingField("method").into());
        }
        let params = match params {
            Value::Array(params) => params,
            _ => {
                return Err(ProtocolError::InvalidType {
                    field: "params",
                    expected: "an array",
                }
                .into())
            }
        };

        let id = self.last_id.unwrap_or(0) + 1;
        self.last_id = Some(id);

        let request = Request::new(id, method).with_params(params);
        let message = encode_message(&request, self.config.framing)?;

        let reply = match self.exchange(&message).await {
            Ok(reply) => reply,
            Err(e) => {
                if e.is_retryable() {
                    tracing::warn!("Dropping connection to {}: {}", self.config.target(), e);
                    self.conn = None;
                    self.last_id = None;
                }
                return Err(e);
            }
        };

        let response = Response::parse(&reply)?;
        if response.id != Value::from(id) {
            tracing::error!("Wrong response: expected id {}, got {}", id, response.id);
            return Err(ClientError::IdMismatch {
                expected: id,
                got: response.id,
            });
        }

        if let Some(ref error) = response.error {
            tracing::error!("{}", error);
        } else if !response.result.is_null() {
            tracing::info!("{}", response.result);
        }

        Ok(response)
    }

    /// Like [`Client::call`], but returns the result payload and turns an
    /// error response into [`ClientError::Remote`].
    pub async fn call_value(&mut self, method: &str, params: Value) -> Result<Value, ClientError> {
        let response = self.call(method, params).await?;
        match response.error {
            Some(message) => Err(ClientError::Remote(message)),
            None => Ok(response.result),
        }
    }

    async fn exchange(&mut self, message: &[u8]) -> Result<bytes::Bytes, ClientError> {
        let timeout = self.config.request_timeout;
        let conn = self.conn.as_mut().ok_or(ClientError::NotConnected)?;

        conn.send(message).await?;
        match timeout {
            Some(limit) => tokio::time::timeout(limit, conn.receive())
                .await
                .map_err(|_| ClientError::Timeout)?,
            None => conn.receive().await,
        }
    }
}
