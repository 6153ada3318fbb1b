//! Error types shared by the whole crate.

use thiserror::Error;

/// All errors produced by instruments, the collector, and the transport.
#[derive(Error, Debug)]
pub enum TallyError {
    /// Metric name contains characters outside the allowed charset
    #[error("invalid metric name '{0}': only alphanumeric and '-_./' are allowed")]
    InvalidName(String),

    /// Tag key or value is empty or outside the allowed charset
    #[error("invalid tag '{key}': {reason}")]
    InvalidTag {
        /// Offending tag key
        key: String,
        /// Human-readable reason
        reason: String,
    },

    /// An instrument with the same name and tags is already attached
    #[error("metric '{0}' is already attached with the same tags")]
    DuplicateMetric(String),

    /// Recording into an instrument no collector owns
    #[error("metric '{0}' is not attached to a collector")]
    NotAttached(String),

    /// Attaching an instrument twice
    #[error("metric '{0}' is already attached")]
    AlreadyAttached(String),

    /// Two aggregation modes resolved to the same reporting suffix
    #[error("duplicate aggregator suffix '{0}'")]
    DuplicateSuffix(String),

    /// Percentile outside `[0, 1]`
    #[error("percentile must be between 0.0 and 1.0, got {0}")]
    InvalidPercentile(f64),

    /// Gauge strategy built with no modes at all
    #[error("aggregation strategy requires at least one mode")]
    NoAggregationModes,

    /// Invalid configuration value
    #[error("configuration error: {0}")]
    Config(String),

    /// Snapshot serialization failed
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Bounded transport queue rejected a batch under the throw policy
    #[error("transport queue for {payload} is full ({capacity} batches)")]
    QueueFull {
        /// Payload kind of the rejected batch
        payload: &'static str,
        /// Configured queue capacity in batches
        capacity: usize,
    },

    /// A single send attempt failed; retried when recoverable
    #[error("send to endpoint '{endpoint}' failed: {message}")]
    Send {
        /// Endpoint name
        endpoint: String,
        /// Underlying failure
        message: String,
    },

    /// Retries exhausted; the batch was discarded
    #[error("batch dropped for endpoint '{endpoint}' after {attempts} attempts: {message}")]
    BatchDropped {
        /// Endpoint name
        endpoint: String,
        /// Attempts made before giving up
        attempts: u32,
        /// Last failure
        message: String,
    },

    /// An operation exceeded its time budget
    #[error("operation took longer than {timeout_ms}ms")]
    Timeout {
        /// Budget that was exceeded, in milliseconds
        timeout_ms: u64,
    },

    /// Transport accessed after shutdown
    #[error("channel closed")]
    ChannelClosed,

    /// IO failure
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encode/decode failure
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for tally operations
pub type Result<T> = std::result::Result<T, TallyError>;

impl TallyError {
    /// Creates a new configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// Creates a new serialization error
    pub fn serialization<S: Into<String>>(msg: S) -> Self {
        Self::Serialization(msg.into())
    }

    /// Creates a new send error
    pub fn send<E: Into<String>, S: Into<String>>(endpoint: E, msg: S) -> Self {
        Self::Send {
            endpoint: endpoint.into(),
            message: msg.into(),
        }
    }

    /// Returns true if this error is transient and worth retrying
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Send { .. } | Self::Timeout { .. } | Self::Io(_))
    }

    /// Returns the error category for logging and callback consumers
    pub fn category(&self) -> &'static str {
        match self {
            Self::InvalidName(_)
            | Self::InvalidTag { .. }
            | Self::DuplicateSuffix(_)
            | Self::InvalidPercentile(_)
            | Self::NoAggregationModes
            | Self::Config(_) => "config",
            Self::DuplicateMetric(_) | Self::NotAttached(_) | Self::AlreadyAttached(_) => "usage",
            Self::Serialization(_) | Self::Json(_) => "serialization",
            Self::QueueFull { .. } | Self::BatchDropped { .. } => "backpressure",
            Self::Send { .. } | Self::Io(_) => "network",
            Self::Timeout { .. } => "timeout",
            Self::ChannelClosed => "channel",
        }
    }
}
