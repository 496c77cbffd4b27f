//! Error types for the SDN controller.
//!
//! [`InfraError`] covers failures of the infrastructure API, [`SwitchError`]
//! failures of the virtual-switch control channel, and [`ControllerError`]
//! everything the controller itself reports.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for controller operations.
pub type ControllerResult<T> = Result<T, ControllerError>;

/// Errors returned by an infrastructure API implementation.
#[derive(Debug, Clone, Error)]
pub enum InfraError {
    /// Remote procedure call returned an error.
    #[error("Infrastructure call '{method}' failed: {message}")]
    Call {
        /// The RPC method (e.g. "tunnel.create").
        method: String,
        /// Error message from the remote side.
        message: String,
    },

    /// A referenced object does not exist in the pool.
    #[error("Object '{opaque_ref}' not found")]
    ObjectNotFound {
        /// The pool-local reference that could not be resolved.
        opaque_ref: String,
    },

    /// The pool connection is gone.
    #[error("Pool '{pool}' is disconnected")]
    Disconnected {
        /// The pool identity.
        pool: String,
    },

    /// The call did not complete within the caller's deadline.
    #[error("Infrastructure call '{method}' timed out")]
    Timeout {
        /// The RPC method.
        method: String,
    },
}

impl InfraError {
    /// Creates an RPC failure.
    pub fn call(method: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Call {
            method: method.into(),
            message: message.into(),
        }
    }

    /// Creates an object-not-found error.
    pub fn object_not_found(opaque_ref: impl Into<String>) -> Self {
        Self::ObjectNotFound {
            opaque_ref: opaque_ref.into(),
        }
    }
}

/// Errors from the virtual-switch control channel.
#[derive(Debug, Clone, Error)]
pub enum SwitchError {
    /// Could not reach the host's switch daemon.
    #[error("Cannot connect to switch on host {host}: {message}")]
    Connection { host: String, message: String },

    /// The switch rejected a transaction.
    #[error("Switch on host {host} rejected request: {message}")]
    Rejected { host: String, message: String },

    /// Client credentials could not be turned into a TLS configuration.
    #[error("Invalid control-channel credentials: {0}")]
    Tls(String),

    /// No protocol client was configured for this controller.
    #[error("No switch protocol client configured")]
    NotConfigured,
}

/// Errors that can occur in controller operations.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Impossible local state (e.g. a partial certificate bundle).
    #[error("Invariant violation: {message}")]
    InvariantViolation { message: String },

    /// Infrastructure API failure.
    #[error(transparent)]
    Infra(#[from] InfraError),

    /// Unknown object in an administrative request.
    #[error("No such {kind}: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Administrative request failed validation.
    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    /// Certificate generation or parsing failed.
    #[error("Certificate error: {message}")]
    Certificate { message: String },

    /// File-system failure.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// TLS configuration failure.
    #[error("TLS error: {message}")]
    Tls { message: String },

    /// Virtual-switch control channel failure.
    #[error(transparent)]
    Switch(#[from] SwitchError),

    /// Invalid configuration.
    #[error("Invalid configuration for {field}: {message}")]
    Config { field: String, message: String },
}

impl ControllerError {
    /// Creates an invariant violation.
    pub fn invariant(message: impl Into<String>) -> Self {
        Self::InvariantViolation {
            message: message.into(),
        }
    }

    /// Creates a not-found error.
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Creates a request validation error.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Creates a certificate error.
    pub fn certificate(message: impl Into<String>) -> Self {
        Self::Certificate {
            message: message.into(),
        }
    }

    /// Creates an I/O error bound to a path.
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates a configuration error.
    pub fn config(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Config {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Returns true if reconciliation paths should log this error and wait
    /// for the next relevant event instead of surfacing it.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, ControllerError::Infra(_) | ControllerError::Switch(_))
    }
}
