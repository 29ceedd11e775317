//! titan: a TLS gateway speaking a length-prefixed frame protocol, with a
//! per-connection authentication gate (client certificate, bearer token or
//! Google login) in front of a method-routing pipeline.

// Core subsystems
pub mod config;
pub mod net;
pub mod protocol;
pub mod routing;
pub mod server;

// Identity
pub mod auth;
pub mod identity;
pub mod store;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;

pub mod client;

pub use client::Client;
pub use config::TitanConfig;
pub use lifecycle::Shutdown;
pub use server::TitanServer;
