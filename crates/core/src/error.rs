//! Error types shared across the workspace

use thiserror::Error;

/// Result alias used throughout the pipeline crates
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type
#[derive(Debug, Error)]
pub enum Error {
    /// Pipeline-level failure (traversal, stage wiring)
    #[error("pipeline error: {0}")]
    Pipeline(String),

    /// A stage failed while processing a frame
    #[error("stage '{stage}' failed: {message}")]
    Stage { stage: &'static str, message: String },

    /// Speech model backend failure
    #[error("model error: {0}")]
    Model(String),

    /// Transport failure
    #[error("transport error: {0}")]
    Transport(String),

    /// A structural contract was broken (e.g. conversation turn ordering)
    #[error("contract violation: {0}")]
    ContractViolation(String),

    /// Frame queued or injected after the pipeline terminated
    #[error("pipeline closed")]
    PipelineClosed,

    /// Configuration problem surfaced at runtime
    #[error("configuration error: {0}")]
    Config(String),

    /// Serialization failure at an external boundary
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Build a stage error with an owned message
    pub fn stage(stage: &'static str, message: impl Into<String>) -> Self {
        Self::Stage {
            stage,
            message: message.into(),
        }
    }

    /// Whether the pipeline can keep running after this error
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Stage { .. } | Self::Serialization(_))
    }
}
