//! Error types for the Claim Provisioner
//!
//! Provides structured error types for the claim controller, the claim
//! resolver, plugin discovery and the volume plugin protocol client.

use crate::plugin::protocol::NOT_FOUND;
use std::time::Duration;
use thiserror::Error;

/// Unified error type for the provisioner
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Kubernetes Errors
    // =========================================================================
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Resource not found: {kind}/{name}")]
    ResourceNotFound { kind: String, name: String },

    // =========================================================================
    // Claim Errors
    // =========================================================================
    #[error("Unable to decode persistent volume claim: {0}")]
    ClaimDecode(String),

    #[error("Unable to get storage class {name}: {reason}")]
    ClassLookup { name: String, reason: String },

    #[error("Claim {namespace}/{name} not found after waiting for {waited_secs} seconds")]
    ClaimNotFound {
        namespace: String,
        name: String,
        waited_secs: u64,
    },

    #[error("Capacity parse error: {0}")]
    CapacityParse(String),

    // =========================================================================
    // Volume Plugin Errors
    // =========================================================================
    /// Populated error field of a plugin response, carried verbatim
    #[error("{0}")]
    Plugin(String),

    #[error("Request validation failed: {0}")]
    Validation(String),

    #[error("Plugin transport error on {path}: {reason}")]
    Transport { path: String, reason: String },

    #[error("Plugin request {path} timed out after {timeout:?}")]
    Timeout { path: String, timeout: Duration },

    #[error("Unable to find V2 plugin named {name}")]
    PluginNotFound { name: String },

    #[error("Found V2 plugin named {name} at {socket_path}, but it is disabled")]
    PluginDisabled { name: String, socket_path: String },

    #[error("Plugin discovery failed: {0}")]
    Discovery(String),

    // =========================================================================
    // HTTP Errors
    // =========================================================================
    #[error("HTTP error: {0}")]
    Hyper(#[from] hyper::Error),

    #[error("HTTP request build error: {0}")]
    Http(#[from] hyper::http::Error),

    // =========================================================================
    // Metrics Errors
    // =========================================================================
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    // =========================================================================
    // Parse Errors
    // =========================================================================
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    // =========================================================================
    // IO Errors
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Check whether this error describes an absent resource.
    ///
    /// Plugin errors qualify when their text begins with the protocol's
    /// not-found marker.
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::Plugin(message) => message.starts_with(NOT_FOUND),
            Error::ResourceNotFound { .. }
            | Error::ClaimNotFound { .. }
            | Error::PluginNotFound { .. } => true,
            Error::Kube(kube::Error::Api(response)) => response.code == 404,
            _ => false,
        }
    }

    /// Check whether the cluster rejected a create because the object exists
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Kube(kube::Error::Api(response)) if response.code == 409)
    }

    /// Check if this error is transient
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Kube(_)
                | Error::Transport { .. }
                | Error::Timeout { .. }
                | Error::Hyper(_)
                | Error::Io(_)
        )
    }
}

/// Result type alias for the provisioner
pub type Result<T> = std::result::Result<T, Error>;
