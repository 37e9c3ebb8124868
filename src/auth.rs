//! Exchange of username/password for a ThreatQ bearer token.

use crate::classify::{classify, Outcome, READ_SUCCESS};
use crate::error::LookupError;
use crate::transport::{HttpRequest, HttpTransport, TransportError};
use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Kind of login failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthErrorKind {
    InvalidCredentials,
    Unreachable,
    MalformedResponse,
    SessionExpired,
    Server,
}

/// Login failure.
#[derive(Error, Debug)]
pub enum AuthError {
    /// HTTP 400 from the token endpoint.
    #[error("invalid credentials")]
    InvalidCredentials { body: String },

    #[error("token endpoint unreachable: {source}")]
    Unreachable {
        #[source]
        source: TransportError,
    },

    #[error("token response malformed: {message}")]
    MalformedResponse { message: String },

    /// HTTP 401 from the token endpoint.
    #[error("token endpoint answered with session expiry")]
    SessionExpired,

    #[error("token endpoint returned HTTP {status} {status_text}")]
    Server {
        status: u16,
        status_text: String,
        body: String,
    },
}

impl AuthError {
    pub fn kind(&self) -> AuthErrorKind {
        match self {
            Self::InvalidCredentials { .. } => AuthErrorKind::InvalidCredentials,
            Self::Unreachable { .. } => AuthErrorKind::Unreachable,
            Self::MalformedResponse { .. } => AuthErrorKind::MalformedResponse,
            Self::SessionExpired => AuthErrorKind::SessionExpired,
            Self::Server { .. } => AuthErrorKind::Server,
        }
    }
}

impl From<AuthError> for LookupError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::InvalidCredentials { body } => LookupError::InvalidCredentials { body },
            AuthError::Unreachable { source } => LookupError::Connectivity { source },
            AuthError::MalformedResponse { message } => LookupError::MalformedResponse { message },
            AuthError::SessionExpired => LookupError::LoginRejected,
            AuthError::Server {
                status,
                status_text,
                body,
            } => LookupError::RemoteServer {
                status,
                status_text,
                body,
            },
        }
    }
}

/// Obtains bearer tokens from `POST {server}/api/token`.
///
/// Stateless apart from the network call; callers own caching.
pub struct Authenticator {
    transport: Arc<dyn HttpTransport>,
}

impl Authenticator {
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self { transport }
    }

    /// Log in and return the access token verbatim.
    pub async fn login(
        &self,
        username: &str,
        password: &SecretString,
        server_url: &str,
        client_id: &str,
        timeout: Option<Duration>,
    ) -> Result<String, AuthError> {
        let request = HttpRequest::post(format!("{}/api/token", server_url))
            .with_json(json!({
                "email": username,
                "password": password.expose_secret(),
                "grant_type": "password",
                "client_id": client_id,
            }))
            .with_timeout(timeout);

        debug!(client_id = %client_id, "Authenticating with ThreatQ");

        let result = self.transport.send(request).await;
        let response = match classify(result, READ_SUCCESS) {
            Outcome::Success(response) => response,
            Outcome::SessionExpired => {
                warn!("ThreatQ login answered with HTTP 401");
                return Err(AuthError::SessionExpired);
            }
            Outcome::Failure(LookupError::Connectivity { source }) => {
                warn!(error = %source, "ThreatQ token endpoint unreachable");
                return Err(AuthError::Unreachable { source });
            }
            Outcome::Failure(LookupError::RemoteServer { status: 400, body, .. }) => {
                warn!("ThreatQ rejected credentials");
                return Err(AuthError::InvalidCredentials { body });
            }
            Outcome::Failure(LookupError::RemoteServer {
                status,
                status_text,
                body,
            }) => {
                warn!(status = status, "ThreatQ login failed");
                return Err(AuthError::Server {
                    status,
                    status_text,
                    body,
                });
            }
            Outcome::Failure(other) => {
                return Err(AuthError::MalformedResponse {
                    message: other.to_string(),
                })
            }
        };

        extract_access_token(&response.body)
    }
}

fn extract_access_token(body: &str) -> Result<String, AuthError> {
    let value: serde_json::Value =
        serde_json::from_str(body).map_err(|e| AuthError::MalformedResponse {
            message: format!("token response is not JSON: {}", e),
        })?;

    match value.get("access_token") {
        Some(serde_json::Value::String(token)) => Ok(token.clone()),
        Some(_) => Err(AuthError::MalformedResponse {
            message: "access_token is not a string".to_string(),
        }),
        None => Err(AuthError::MalformedResponse {
            message: "access_token missing from token response".to_string(),
        }),
    }
}
