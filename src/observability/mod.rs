//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! net, auth, server
//!     → logging.rs (tracing subscriber, pretty or JSON)
//!     → metrics.rs (counters and gauges, Prometheus scrape endpoint)
//! ```

pub mod logging;
pub mod metrics;
