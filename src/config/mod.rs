//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → TitanConfig (validated, immutable)
//!     → handed to listener, auth, store and observability setup
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require a restart
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{
    AuthConfig, ClientAuthMode, GoogleConfig, GoogleTokenKind, ListenerConfig, LogFormat, ObservabilityConfig,
    ProtocolConfig, ShutdownConfig, StoreConfig, TitanConfig, TlsConfig,
};
pub use validation::{validate_config, validate_log_level, ValidationError};
