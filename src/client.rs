//! Async TLS client for the frame protocol.
//!
//! Used by `titan-cli` and the integration tests.

use std::sync::Arc;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use rustls::pki_types::ServerName;
use rustls::ClientConfig;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::io::{ReadHalf, WriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tokio_util::codec::{FramedRead, FramedWrite};

use crate::net::codec::{FrameCodec, FrameError};
use crate::net::connection::{CLOSE, PING};
use crate::protocol::{Message, ResError};

/// Client-side errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid server name: {0}")]
    ServerName(String),

    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("invalid message: {0}")]
    Json(#[from] serde_json::Error),

    #[error("connection closed by server")]
    Closed,

    #[error("server error {}: {}", .0.code, .0.message)]
    Remote(ResError),
}

/// A connected client.
pub struct Client {
    reader: FramedRead<ReadHalf<TlsStream<TcpStream>>, FrameCodec>,
    writer: FramedWrite<WriteHalf<TlsStream<TcpStream>>, FrameCodec>,
    next_id: u64,
}

impl Client {
    /// Connect to `addr` and verify the server certificate for `server_name`.
    pub async fn connect(
        addr: impl ToSocketAddrs,
        server_name: &str,
        tls: Arc<ClientConfig>,
    ) -> Result<Self, ClientError> {
        let name = ServerName::try_from(server_name.to_string())
            .map_err(|_| ClientError::ServerName(server_name.to_string()))?;
        let tcp = TcpStream::connect(addr).await?;
        let stream = TlsConnector::from(tls).connect(name, tcp).await?;

        let (read_half, write_half) = tokio::io::split(stream);
        Ok(Self {
            reader: FramedRead::new(read_half, FrameCodec::default()),
            writer: FramedWrite::new(write_half, FrameCodec::default()),
            next_id: 1,
        })
    }

    /// Send one frame with an arbitrary payload.
    pub async fn send_raw(&mut self, payload: impl Into<Bytes>) -> Result<(), ClientError> {
        self.writer.send(payload.into()).await?;
        Ok(())
    }

    pub async fn send(&mut self, message: &Message) -> Result<(), ClientError> {
        self.send_raw(message.to_vec()?).await
    }

    /// Next frame, or `None` once the server closed the stream.
    pub async fn read_frame(&mut self) -> Result<Option<Bytes>, ClientError> {
        self.reader.next().await.transpose().map_err(ClientError::from)
    }

    /// Next message. End of stream is `ClientError::Closed`.
    pub async fn read_message(&mut self) -> Result<Message, ClientError> {
        let frame = self.read_frame().await?.ok_or(ClientError::Closed)?;
        Ok(Message::from_slice(&frame)?)
    }

    /// Send a request and wait for the reply carrying its id.
    ///
    /// Messages with other ids are skipped. An error reply is returned as a
    /// message; use [`Client::call`] to get it as `ClientError::Remote`.
    pub async fn request(&mut self, method: &str, params: Option<Value>) -> Result<Message, ClientError> {
        let id = self.next_id.to_string();
        self.next_id += 1;
        self.send(&Message::request(id.clone(), method, params)).await?;

        loop {
            let message = self.read_message().await?;
            if message.id.as_deref() == Some(id.as_str()) {
                return Ok(message);
            }
            tracing::debug!(id = ?message.id, method = ?message.method, "Skipping unrelated message");
        }
    }

    /// Call `method` and return its result.
    pub async fn call(&mut self, method: &str, params: Option<Value>) -> Result<Value, ClientError> {
        let reply = self.request(method, params).await?;
        if let Some(error) = reply.error {
            return Err(ClientError::Remote(error));
        }
        Ok(reply.result.unwrap_or(Value::Null))
    }

    pub async fn ping(&mut self) -> Result<(), ClientError> {
        self.send_raw(Bytes::from_static(PING)).await
    }

    /// Send the `close` control frame and shut the write side.
    pub async fn close(mut self) -> Result<(), ClientError> {
        self.send_raw(Bytes::from_static(CLOSE)).await?;
        self.writer.close().await?;
        Ok(())
    }

    /// Authenticate with a bearer token.
    pub async fn auth_token(&mut self, token: &str) -> Result<Value, ClientError> {
        self.call("auth.token", Some(json!({ "token": token }))).await
    }

    /// Authenticate with the client certificate presented during the handshake.
    pub async fn auth_cert(&mut self) -> Result<Value, ClientError> {
        self.call("auth.cert", None).await
    }

    /// Log in with a Google token. Returns the issued bearer token.
    pub async fn auth_google(&mut self, token: &str) -> Result<String, ClientError> {
        let result = self.call("auth.google", Some(json!({ "token": token }))).await?;
        result
            .get("token")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ClientError::Remote(ResError {
                code: 0,
                message: "reply carried no token".to_string(),
            }))
    }
}
