//! Centralized error types for the Cliparino core library.
//!
//! Each protocol module defines its own error enum close to the transport
//! (`HelixError`, `ObsError`, `IrcError`, ...). This module provides:
//! - The [`ErrorCode`] trait for machine-readable error codes
//! - The crate-wide [`CliparinoError`] that subsystem boundaries convert into

use serde::Serialize;
use thiserror::Error;

use crate::obs::protocol::ObsError;
use crate::twitch::helix::HelixError;

/// Trait for error types that provide machine-readable error codes.
///
/// Implement this trait to provide consistent error codes across different
/// error conversion paths (logs, health reports, tray notifications).
pub trait ErrorCode {
    /// Returns a machine-readable error code.
    fn code(&self) -> &'static str;
}

impl ErrorCode for HelixError {
    fn code(&self) -> &'static str {
        match self {
            HelixError::Http(_) => "http_request_failed",
            HelixError::Status(_, _) => "http_error_status",
            HelixError::AuthRequired(_) => "authentication_required",
            HelixError::Malformed(_) => "malformed_input",
            HelixError::NotFound(_) => "not_found",
            HelixError::Decode(_) => "decode_error",
        }
    }
}

impl ErrorCode for ObsError {
    fn code(&self) -> &'static str {
        match self {
            ObsError::NotConnected => "obs_not_connected",
            ObsError::Socket(_) => "obs_socket_error",
            ObsError::Auth(_) => "obs_auth_failed",
            ObsError::Request { .. } => "obs_request_failed",
            ObsError::Protocol(_) => "obs_protocol_error",
            ObsError::Timeout => "obs_request_timeout",
        }
    }
}

/// Application-wide error type for the Cliparino core.
#[derive(Debug, Error, Serialize)]
#[serde(tag = "type", content = "details")]
pub enum CliparinoError {
    /// An obs-websocket call failed (socket, protocol, or auth).
    #[error("OBS error: {0}")]
    Obs(String),

    /// A Twitch API or transport call failed.
    #[error("Twitch error: {0}")]
    Twitch(String),

    /// Twitch credentials are missing or could not be refreshed.
    ///
    /// The core stops issuing Helix calls until the token provider signals
    /// a successful refresh (re-auth happens in the out-of-scope UI).
    #[error("Authentication required: {0}")]
    AuthRequired(String),

    /// Client/user input was malformed (bad clip URL, unknown command payload).
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Configuration error (missing or inconsistent settings).
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CliparinoError {
    /// Returns a machine-readable error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Obs(_) => "obs_error",
            Self::Twitch(_) => "twitch_error",
            Self::AuthRequired(_) => "authentication_required",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Configuration(_) => "configuration_error",
            Self::Internal(_) => "internal_error",
        }
    }
}

/// Convenient Result alias for application-wide operations.
pub type CliparinoResult<T> = Result<T, CliparinoError>;

impl From<ObsError> for CliparinoError {
    fn from(err: ObsError) -> Self {
        Self::Obs(err.to_string())
    }
}

impl From<HelixError> for CliparinoError {
    fn from(err: HelixError) -> Self {
        match err {
            HelixError::AuthRequired(msg) => Self::AuthRequired(msg),
            HelixError::Malformed(msg) => Self::InvalidRequest(msg),
            other => Self::Twitch(other.to_string()),
        }
    }
}
