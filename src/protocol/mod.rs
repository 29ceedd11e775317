//! Application-level protocol carried inside frames.
//!
//! # Data Flow
//! ```text
//! frame payload
//!     → control sentinel? (`ping`, `close`) handled by net::connection
//!     → message.rs (JSON envelope: id, method, params, result, error)
//!     → auth gate (unauthenticated) or router (authenticated)
//! ```

pub mod message;

pub use message::{Message, ResError, AUTH_FAILURE_CODE, METHOD_NOT_FOUND_CODE};
