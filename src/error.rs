use std::collections::HashMap;

use thiserror::Error;

/// Error taxonomy for the agent kit.
///
/// Variants carry a short kind tag plus a free-form detail string; rendering
/// for humans is left to the caller.
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("upstream failure: {0}")]
    Upstream(String),

    #[error("internal: {0}")]
    Internal(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A chain step failed part-way through. The outputs of the steps that
    /// completed before the failure ride along for observability.
    #[error("chain step {step} failed: {message}")]
    ChainStep {
        step: String,
        message: String,
        partial: HashMap<String, serde_json::Value>,
    },
}

impl AgentError {
    /// Wraps an error from an external collaborator (model, embedder, store,
    /// tool protocol) as an upstream failure.
    pub fn upstream(err: impl std::fmt::Display) -> Self {
        AgentError::Upstream(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AgentError>;
