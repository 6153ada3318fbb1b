//! Core error, configuration, and retry plumbing shared by the whole crate.

pub mod config;
pub mod error;
pub mod retry;

// Re-export commonly used types
pub use config::{CollectorConfig, ConfigBuilder, TransportConfig};
pub use error::{Result, TallyError};
pub use retry::{retry_with_config, RetryConfig};
