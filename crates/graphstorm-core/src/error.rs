//! Error types for graphstorm.

use thiserror::Error;

/// Graphstorm error type.
///
/// Configuration errors are raised while resolving feature sizes or building
/// layers; usage errors are raised at call time when a batch does not match
/// what a layer or model was built for. Neither is recovered locally.
#[derive(Debug, Error)]
pub enum Error {
    /// Candle tensor error.
    #[error("tensor error: {0}")]
    Tensor(#[from] candle_core::Error),

    /// Invalid configuration (detected at construction/resolve time).
    #[error("invalid config: {0}")]
    Config(String),

    /// Caller passed inputs that do not match the callee's construction.
    #[error("usage error: {0}")]
    Usage(String),

    /// Dimension mismatch.
    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    /// Failure reported by the graph store.
    #[error("graph store error: {0}")]
    Store(String),

    /// JSON error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Build a [`Error::Config`].
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Build a [`Error::Usage`].
    pub fn usage(msg: impl Into<String>) -> Self {
        Self::Usage(msg.into())
    }

    /// Returns `true` for configuration errors.
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }

    /// Returns `true` for call-time usage errors.
    pub fn is_usage(&self) -> bool {
        matches!(self, Self::Usage(_) | Self::DimensionMismatch { .. })
    }
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
