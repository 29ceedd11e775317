//! Method lookup and dispatch.
//!
//! # Responsibilities
//! - Map method names to handlers
//! - Turn handler results into replies carrying the request id
//! - Answer unknown methods with `METHOD_NOT_FOUND_CODE`
//!
//! # Design Decisions
//! - Immutable after construction (shared without locks)
//! - Messages without a method (replies to server pushes) pass through

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::protocol::{ResError, METHOD_NOT_FOUND_CODE};
use crate::routing::pipeline::{Flow, RequestContext, Stage};

/// Handles one method for authenticated sessions.
#[async_trait]
pub trait MethodHandler: Send + Sync {
    async fn call(&self, ctx: &RequestContext<'_>, params: Option<Value>) -> Result<Value, ResError>;
}

/// Final pipeline stage: dispatch by method name.
#[derive(Clone, Default)]
pub struct MethodRouter {
    handlers: HashMap<String, Arc<dyn MethodHandler>>,
}

impl MethodRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `method`, replacing any earlier one.
    pub fn route(mut self, method: impl Into<String>, handler: Arc<dyn MethodHandler>) -> Self {
        self.handlers.insert(method.into(), handler);
        self
    }

    /// Router with the built-in methods: `echo` and `whoami`.
    pub fn with_builtins() -> Self {
        Self::new()
            .route("echo", Arc::new(EchoHandler))
            .route("whoami", Arc::new(WhoAmIHandler))
    }
}

#[async_trait]
impl Stage for MethodRouter {
    async fn process(&self, ctx: &mut RequestContext<'_>) -> Flow {
        let Some(method) = ctx.message.method() else {
            return Flow::Next;
        };
        let Some(handler) = self.handlers.get(method) else {
            tracing::debug!(connection_id = %ctx.conn.id(), method, "Method not found");
            return ctx.error(METHOD_NOT_FOUND_CODE, format!("Method not found: {}", method));
        };

        let params = ctx.message.params.take();
        match handler.call(ctx, params).await {
            Ok(result) => ctx.reply(result),
            Err(e) => ctx.error(e.code, e.message),
        }
    }
}

/// Returns its params unchanged.
#[derive(Debug, Default)]
pub struct EchoHandler;

#[async_trait]
impl MethodHandler for EchoHandler {
    async fn call(&self, _ctx: &RequestContext<'_>, params: Option<Value>) -> Result<Value, ResError> {
        Ok(params.unwrap_or(Value::Null))
    }
}

/// Returns the caller's user id and how they authenticated.
#[derive(Debug, Default)]
pub struct WhoAmIHandler;

#[async_trait]
impl MethodHandler for WhoAmIHandler {
    async fn call(&self, ctx: &RequestContext<'_>, _params: Option<Value>) -> Result<Value, ResError> {
        Ok(json!({
            "userid": ctx.user_id(),
            "method": ctx.session.auth_method().map(|m| m.as_str()),
        }))
    }
}
