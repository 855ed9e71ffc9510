//! Error taxonomy for the analysis pipeline.
//!
//! `ToolFailure` is recoverable and never escapes a step. Everything wrapped by
//! [`FlowError`] is fatal for the operation that produced it.

use std::time::Duration;

/// A data tool could not produce its output.
///
/// Steps fold this into the report they produce; it never aborts a run.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
#[error("tool {tool} failed: {reason}")]
pub struct ToolFailure {
    pub tool: String,
    pub reason: String,
}

impl ToolFailure {
    pub fn new(tool: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            reason: reason.into(),
        }
    }
}

/// The reasoning service failed to answer a prompt.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ReasoningFailure {
    #[error("reasoning service unavailable: {0}")]
    Unavailable(String),

    #[error("reasoning service rejected the request: {0}")]
    Rejected(String),

    #[error("reasoning service rate limited")]
    RateLimited,

    #[error("malformed reasoning output: {0}")]
    MalformedOutput(String),
}

impl ReasoningFailure {
    /// Whether a retry has a chance of succeeding.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::RateLimited)
    }
}

/// The embedding service or memory persistence failed.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum MemoryBackendFailure {
    #[error("embedding service failed: {0}")]
    Embedding(String),

    #[error("memory persistence failed: {0}")]
    Persistence(String),

    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

impl MemoryBackendFailure {
    /// Whether a retry has a chance of succeeding.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Embedding(_))
    }
}

/// The workflow could not be assembled from the requested configuration.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum GraphConfigurationError {
    #[error("unknown role: {0}")]
    UnknownRole(String),

    #[error("role selected more than once: {0}")]
    DuplicateRole(String),

    #[error("no step registered for node {0}")]
    MissingStep(String),
}

/// Errors produced by the pipeline.
#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    #[error("reasoning failure: {0}")]
    Reasoning(#[from] ReasoningFailure),

    #[error("graph configuration error: {0}")]
    GraphConfiguration(#[from] GraphConfigurationError),

    #[error("memory backend failure: {0}")]
    MemoryBackend(#[from] MemoryBackendFailure),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("field {field} is write-once and was already set")]
    WriteOnceViolation { field: String },

    #[error("node {node} produced an update it does not own: {update}")]
    PartitionViolation { node: String, update: String },

    #[error("node {node} exceeded its deadline of {limit:?}")]
    NodeTimeout { node: String, limit: Duration },

    #[error("run cancelled")]
    Cancelled,

    #[error("step task did not complete: {0}")]
    TaskJoin(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, FlowError>;
