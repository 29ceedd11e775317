//! Routing subsystem for authenticated traffic.
//!
//! # Data Flow
//! ```text
//! Authenticated message
//!     → pipeline.rs (ordered stages, each returns Flow)
//!     → router.rs (method lookup, final stage)
//!     → Flow::Reply / Flow::Close / Flow::Next (no reply)
//! ```
//!
//! # Design Decisions
//! - Stages are fixed at startup and shared via Arc
//! - A stage short-circuits by returning Reply or Close; Next hands over
//! - Unknown methods get an explicit error reply rather than silence

pub mod pipeline;
pub mod router;

pub use pipeline::{Flow, Pipeline, RequestContext, Stage};
pub use router::{EchoHandler, MethodHandler, MethodRouter, WhoAmIHandler};
