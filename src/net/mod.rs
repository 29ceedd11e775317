//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, connection limits)
//!     → tls.rs (server config, optional client certificate verification)
//!     → listener.rs Handshaker (TLS handshake on the connection task)
//!     → connection.rs (frame read loop, control frames, writes)
//!     → codec.rs (length-prefixed framing)
//!     → hand off to auth gate or routing pipeline
//! ```
//!
//! # Design Decisions
//! - Bounded accept via semaphore prevents resource exhaustion
//! - Each connection tracked for graceful shutdown
//! - TLS is mandatory; client certificates are evidence, not authentication

pub mod codec;
pub mod connection;
pub mod listener;
pub mod tls;
