//! Ordered request pipeline.

use std::sync::Arc;

use async_trait::async_trait;

use crate::auth::Session;
use crate::net::connection::Connection;
use crate::protocol::Message;

/// What a stage decided.
#[derive(Debug, Clone, PartialEq)]
pub enum Flow {
    /// Hand the request to the next stage.
    Next,
    /// Stop and send this reply.
    Reply(Message),
    /// Stop and close the connection without replying.
    Close,
}

/// One authenticated request flowing through the pipeline.
pub struct RequestContext<'a> {
    pub conn: &'a Connection,
    pub session: &'a Session,
    pub message: Message,
}

impl<'a> RequestContext<'a> {
    pub fn new(conn: &'a Connection, session: &'a Session, message: Message) -> Self {
        Self { conn, session, message }
    }

    /// Id of the authenticated user. Empty only if a stage runs unauthenticated.
    pub fn user_id(&self) -> &str {
        self.session.user_id().unwrap_or_default()
    }

    /// Reply to the current request with `result`.
    pub fn reply(&self, result: serde_json::Value) -> Flow {
        Flow::Reply(Message::reply(self.message.id.clone(), result))
    }

    /// Error reply to the current request.
    pub fn error(&self, code: i32, message: impl Into<String>) -> Flow {
        Flow::Reply(Message::error_reply(self.message.id.clone(), code, message))
    }
}

/// A step of the pipeline.
#[async_trait]
pub trait Stage: Send + Sync {
    async fn process(&self, ctx: &mut RequestContext<'_>) -> Flow;
}

/// Stages run in order until one returns something other than `Next`.
#[derive(Clone, Default)]
pub struct Pipeline {
    stages: Vec<Arc<dyn Stage>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a stage.
    pub fn with_stage(mut self, stage: Arc<dyn Stage>) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Run all stages. Returns `Flow::Next` if every stage passed.
    pub async fn run(&self, ctx: &mut RequestContext<'_>) -> Flow {
        for stage in &self.stages {
            match stage.process(ctx).await {
                Flow::Next => continue,
                flow => return flow,
            }
        }
        Flow::Next
    }
}

/// Logs each request at debug level.
#[derive(Debug, Default)]
pub struct TraceStage;

#[async_trait]
impl Stage for TraceStage {
    async fn process(&self, ctx: &mut RequestContext<'_>) -> Flow {
        tracing::debug!(
            connection_id = %ctx.conn.id(),
            user_id = ctx.user_id(),
            method = ctx.message.method().unwrap_or("-"),
            "Request"
        );
        Flow::Next
    }
}
