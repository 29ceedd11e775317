//! Gateway server: accept loop and frame dispatch.
//!
//! # Responsibilities
//! - Accept TLS connections, one task per connection
//! - Pair every connection with a fresh `Session`
//! - Send unauthenticated frames through the `AuthGate`, authenticated ones
//!   through the routing pipeline
//! - Close live connections and drain on shutdown
//!
//! # Design Decisions
//! - The TLS handshake runs on the connection task, never on the accept loop
//! - A session is only ever borrowed by its own connection task

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use rustls::ServerConfig;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::auth::{AuthGate, AuthOutcome, Session, TokenService};
use crate::config::TitanConfig;
use crate::identity::{IdentityProvider, ProviderError};
use crate::net::connection::{
    self, Connection, ConnectionEvents, ConnectionOptions, ConnectionTracker, Disposition, FrameHandler,
    LogEvents,
};
use crate::net::listener::{ConnectionPermit, Handshaker, Listener, ListenerError};
use crate::net::tls::TlsError;
use crate::observability::metrics;
use crate::protocol::Message;
use crate::routing::pipeline::TraceStage;
use crate::routing::{Flow, MethodRouter, Pipeline, RequestContext};
use crate::store::{StoreError, UserStore};

/// Server setup and runtime errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("TLS setup failed: {0}")]
    Tls(#[from] TlsError),

    #[error("listener error: {0}")]
    Listener(#[from] ListenerError),

    #[error("identity provider setup failed: {0}")]
    Provider(#[from] ProviderError),

    #[error("user store error: {0}")]
    Store(#[from] StoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Routes frames of one connection to the gate or the pipeline.
pub struct Dispatcher {
    gate: AuthGate,
    pipeline: Pipeline,
}

impl Dispatcher {
    pub fn new(gate: AuthGate, pipeline: Pipeline) -> Self {
        Self { gate, pipeline }
    }

    async fn unauthenticated(&self, conn: &Connection, session: &mut Session, message: Message) -> Disposition {
        match self.gate.authenticate(&message, conn).await {
            AuthOutcome::Allow {
                user_id,
                method,
                result,
            } => {
                session.promote(user_id, method);
                match conn.send_message(&Message::reply(message.id, result)).await {
                    Ok(()) => Disposition::Continue,
                    Err(_) => Disposition::Close,
                }
            }
            AuthOutcome::Reject { code, message: text } => {
                if let Err(e) = conn
                    .send_message(&Message::error_reply(message.id, code, text))
                    .await
                {
                    tracing::debug!(connection_id = %conn.id(), error = %e, "Failed to send rejection");
                }
                Disposition::Close
            }
            AuthOutcome::ProtocolViolation(reason) => {
                metrics::record_protocol_violation(reason);
                Disposition::Close
            }
            AuthOutcome::Abandoned => Disposition::Close,
        }
    }

    async fn authenticated(&self, conn: &Connection, session: &Session, message: Message) -> Disposition {
        let mut ctx = RequestContext::new(conn, session, message);
        match self.pipeline.run(&mut ctx).await {
            Flow::Next => Disposition::Continue,
            Flow::Reply(reply) => match conn.send_message(&reply).await {
                Ok(()) => Disposition::Continue,
                Err(_) => Disposition::Close,
            },
            Flow::Close => Disposition::Close,
        }
    }
}

#[async_trait]
impl FrameHandler for Dispatcher {
    async fn handle_frame(&self, conn: &Connection, session: &mut Session, payload: Bytes) -> Disposition {
        let message = match Message::from_slice(&payload) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(
                    connection_id = %conn.id(),
                    authenticated = session.is_authenticated(),
                    error = %e,
                    "Undecodable message"
                );
                metrics::record_protocol_violation("malformed_envelope");
                return Disposition::Close;
            }
        };

        if session.is_authenticated() {
            self.authenticated(conn, session, message).await
        } else {
            self.unauthenticated(conn, session, message).await
        }
    }
}

/// TLS gateway server.
pub struct TitanServer {
    listener: Listener,
    gate: AuthGate,
    pipeline: Pipeline,
    events: Arc<dyn ConnectionEvents>,
    options: ConnectionOptions,
    tracker: ConnectionTracker,
    drain_timeout: Duration,
}

impl TitanServer {
    /// Bind the listener and wire the default pipeline.
    pub async fn bind(
        config: &TitanConfig,
        tls: Arc<ServerConfig>,
        store: Arc<dyn UserStore>,
        provider: Arc<dyn IdentityProvider>,
    ) -> Result<Self, ServerError> {
        let tokens = TokenService::new(
            config.auth.token_secret.as_bytes(),
            config.auth.token_ttl_secs.map(Duration::from_secs),
        );
        let listener = Listener::bind(&config.listener, tls).await?;

        Ok(Self {
            listener,
            gate: AuthGate::new(store, provider, tokens),
            pipeline: default_pipeline(),
            events: Arc::new(LogEvents),
            options: config.protocol.connection_options(),
            tracker: ConnectionTracker::new(),
            drain_timeout: Duration::from_secs(config.shutdown.drain_timeout_secs),
        })
    }

    /// Replace the connection lifecycle callbacks.
    pub fn with_events(mut self, events: Arc<dyn ConnectionEvents>) -> Self {
        self.events = events;
        self
    }

    /// Replace the pipeline authenticated requests run through.
    pub fn with_pipeline(mut self, pipeline: Pipeline) -> Self {
        self.pipeline = pipeline;
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Registry of live connections.
    pub fn tracker(&self) -> ConnectionTracker {
        self.tracker.clone()
    }

    /// Accept connections until `shutdown` fires, then close and drain.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) -> Result<(), ServerError> {
        let dispatcher: Arc<dyn FrameHandler> = Arc::new(Dispatcher::new(self.gate.clone(), self.pipeline.clone()));
        let stopping = CancellationToken::new();

        tracing::info!(address = %self.listener.local_addr()?, "Server accepting connections");

        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer_addr, permit)) => self.spawn_connection(
                        stream,
                        peer_addr,
                        permit,
                        Arc::clone(&dispatcher),
                        stopping.clone(),
                    ),
                    Err(e) => {
                        tracing::warn!(error = %e, "Accept failed");
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                },
            }
        }

        stopping.cancel();
        tracing::info!(active = self.tracker.active_count(), "Shutting down, closing connections");
        self.tracker.close_all();
        if self.tracker.wait_for_drain(self.drain_timeout).await {
            tracing::info!("All connections drained");
        } else {
            tracing::warn!(
                remaining = self.tracker.active_count(),
                "Drain timeout reached with connections still open"
            );
        }
        Ok(())
    }

    fn spawn_connection(
        &self,
        stream: TcpStream,
        peer_addr: SocketAddr,
        permit: ConnectionPermit,
        dispatcher: Arc<dyn FrameHandler>,
        stopping: CancellationToken,
    ) {
        let handshaker: Handshaker = self.listener.handshaker();
        let events = Arc::clone(&self.events);
        let options = self.options.clone();
        let tracker = self.tracker.clone();

        tokio::spawn(async move {
            let _permit = permit;
            let (tls, peer_certificates) = match handshaker.handshake(stream).await {
                Ok(secured) => secured,
                Err(e) => {
                    tracing::debug!(peer_addr = %peer_addr, error = %e, "TLS handshake failed");
                    return;
                }
            };

            let (conn, reader) = Connection::new(tls, peer_addr, peer_certificates, options);
            let _guard = tracker.track(Arc::clone(&conn));
            if stopping.is_cancelled() {
                conn.close();
            }
            connection::drive(conn, reader, Session::new(), dispatcher, events).await;
        });
    }
}

/// Pipeline used unless replaced: request tracing, then the built-in methods.
pub fn default_pipeline() -> Pipeline {
    Pipeline::new()
        .with_stage(Arc::new(TraceStage))
        .with_stage(Arc::new(MethodRouter::with_builtins()))
}
