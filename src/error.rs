//! Error types for simulator synchronization.
//!
//! Ordinary network weather (no beacon, REST refused, WebSocket dropped) is
//! handled inside the connection monitor and surfaced through the connection
//! state watch, never as an error from the facade. The variants here reach
//! callers only from explicit operations (value reads/writes, instruction
//! execution) or from programming errors such as malformed dataref paths,
//! which fail fast.

use std::time::Duration;
use thiserror::Error;

/// Result type alias for synchronization operations.
pub type Result<T, E = XplinkError> = std::result::Result<T, E>;

/// Main error type for the X-Plane link.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum XplinkError {
    #[error("beacon discovery failed: {reason}")]
    Beacon { reason: String },

    #[error("simulator version not supported: {details}")]
    VersionUnsupported { details: String },

    #[error("REST API error in {context}: HTTP {status}")]
    Api { context: String, status: u16 },

    #[error("transport failure: {reason}")]
    Transport {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("protocol error in {context}: {details}")]
    Protocol { context: String, details: String },

    #[error("operation timed out after {duration:?}")]
    Timeout { duration: Duration },

    #[error("dataref '{name}' not found in the current metadata generation")]
    DatarefNotFound { name: String },

    #[error("command '{name}' not found in the current metadata generation")]
    CommandNotFound { name: String },

    #[error("dataref '{name}' is not writable")]
    NotWritable { name: String },

    #[error("not connected to the simulator")]
    NotConnected,

    #[error("invalid dataref path '{path}': {details}")]
    InvalidPath { path: String, details: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl XplinkError {
    /// Whether retrying the operation later can plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            XplinkError::Beacon { .. } => true,
            XplinkError::Api { .. } => true,
            XplinkError::Transport { .. } => true,
            XplinkError::Timeout { .. } => true,
            XplinkError::NotConnected => true,
            // stale names resolve again after the next metadata reload
            XplinkError::DatarefNotFound { .. } => true,
            XplinkError::CommandNotFound { .. } => true,
            XplinkError::VersionUnsupported { .. } => false,
            XplinkError::Protocol { .. } => false,
            XplinkError::NotWritable { .. } => false,
            XplinkError::InvalidPath { .. } => false,
            XplinkError::Json(_) => false,
            XplinkError::Io(_) => false,
        }
    }

    pub fn beacon(reason: impl Into<String>) -> Self {
        XplinkError::Beacon { reason: reason.into() }
    }

    pub fn api(context: impl Into<String>, status: u16) -> Self {
        XplinkError::Api { context: context.into(), status }
    }

    pub fn transport(reason: impl Into<String>) -> Self {
        XplinkError::Transport { reason: reason.into(), source: None }
    }

    pub fn transport_with_source(
        reason: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        XplinkError::Transport { reason: reason.into(), source: Some(source) }
    }

    pub fn protocol(context: impl Into<String>, details: impl Into<String>) -> Self {
        XplinkError::Protocol { context: context.into(), details: details.into() }
    }
}
