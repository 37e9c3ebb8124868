//! Error types surfaced to lookup callers.

use crate::transport::TransportError;
use thiserror::Error;

/// Errors returned by [`ThreatQClient`](crate::client::ThreatQClient) operations.
///
/// Session expiry is handled internally and never appears here directly; an
/// expiry that survives the single retry becomes [`LookupError::AuthenticationFailed`].
#[derive(Error, Debug)]
pub enum LookupError {
    /// No HTTP response was received; `source` is the transport failure.
    #[error("Unable to connect to ThreatQ server: {source}")]
    Connectivity {
        #[source]
        source: TransportError,
    },

    #[error("Session could not be established after re-authenticating")]
    AuthenticationFailed,

    #[error("Invalid username or password")]
    InvalidCredentials { body: String },

    #[error("Login rejected by ThreatQ server (HTTP 401), check username, password and client id")]
    LoginRejected,

    #[error("Malformed response from ThreatQ server: {message}")]
    MalformedResponse { message: String },

    #[error("ThreatQ request failed with HTTP {status} {status_text}")]
    RemoteServer {
        status: u16,
        status_text: String,
        body: String,
    },
}

impl LookupError {
    /// Stable machine-readable code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Connectivity { .. } => "TQ_CONNECTIVITY",
            Self::AuthenticationFailed => "TQ_AUTHENTICATION_FAILED",
            Self::InvalidCredentials { .. } => "TQ_INVALID_CREDENTIALS",
            Self::LoginRejected => "TQ_LOGIN_REJECTED",
            Self::MalformedResponse { .. } => "TQ_MALFORMED_RESPONSE",
            Self::RemoteServer { .. } => "TQ_REMOTE_SERVER",
        }
    }

    /// HTTP status reported by the server, if the error came from one.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::RemoteServer { status, .. } => Some(*status),
            Self::InvalidCredentials { .. } => Some(400),
            Self::LoginRejected => Some(401),
            _ => None,
        }
    }
}
