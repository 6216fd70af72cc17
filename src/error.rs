//! Error types shared across the hub

use thiserror::Error;

use crate::device::Owner;

/// Errors surfaced by the arbiter, the sample source, the DSP path and the
/// decoder pipelines
#[derive(Error, Debug)]
pub enum HubError {
    /// A required external decoder executable is not installed
    #[error("{tool} not found. {hint}")]
    ToolNotFound { tool: String, hint: String },

    /// Hardware open/read failure
    #[error("Device unavailable: {0}")]
    DeviceUnavailable(String),

    /// The receiver is held by another consumer
    #[error("Receiver busy: requested by {requested}, held by {holder}")]
    OwnershipDenied { requested: Owner, holder: Owner },

    /// A single decoder record could not be parsed
    #[error("Malformed decoder output: {0}")]
    MalformedOutput(String),

    /// A decoder process terminated on its own
    #[error("{tool} exited unexpectedly: {status}")]
    ProcessExited { tool: String, status: String },

    /// Unknown demodulation or decoder mode
    #[error("Unsupported mode: {0}")]
    UnsupportedMode(String),

    /// Bad start parameters
    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl HubError {
    pub fn tool_not_found(tool: &str, hint: &str) -> Self {
        Self::ToolNotFound {
            tool: tool.to_string(),
            hint: hint.to_string(),
        }
    }
}

/// Convenience Result type using HubError
pub type Result<T> = std::result::Result<T, HubError>;
