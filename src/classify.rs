//! Classification of raw HTTP outcomes.

use crate::error::LookupError;
use crate::transport::{HttpResponse, TransportError};
use tracing::debug;

/// Statuses accepted for read calls.
pub const READ_SUCCESS: &[u16] = &[200];

/// Statuses accepted for calls that create something on the server.
pub const WRITE_SUCCESS: &[u16] = &[200, 201];

/// What a ThreatQ response means to the caller.
#[derive(Debug)]
pub enum Outcome {
    /// The call succeeded; the response carries the body.
    Success(HttpResponse),
    /// HTTP 401: the bearer session is missing, expired or was refused.
    SessionExpired,
    /// Anything else.
    Failure(LookupError),
}

/// Classify a transport result against the accepted success statuses.
///
/// 401 is always [`Outcome::SessionExpired`], whatever the body says. The
/// server uses it both for stale sessions and for some rejected logins, so
/// callers decide what it means in context.
pub fn classify(result: Result<HttpResponse, TransportError>, success: &[u16]) -> Outcome {
    let response = match result {
        Ok(response) => response,
        Err(source) => return Outcome::Failure(LookupError::Connectivity { source }),
    };

    if response.status == 401 {
        debug!(body = %response.body, "Received HTTP 401");
        return Outcome::SessionExpired;
    }

    if success.contains(&response.status) {
        return Outcome::Success(response);
    }

    Outcome::Failure(LookupError::RemoteServer {
        status: response.status,
        status_text: response.status_text,
        body: response.body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(status: u16, body: &str) -> Result<HttpResponse, TransportError> {
        Ok(HttpResponse {
            status,
            status_text: String::new(),
            body: body.to_string(),
        })
    }

    #[test]
    fn test_transport_error_is_connectivity_failure() {
        let outcome = classify(
            Err(TransportError::Connect("connection refused".to_string())),
            READ_SUCCESS,
        );
        match outcome {
            Outcome::Failure(LookupError::Connectivity { source }) => {
                assert!(matches!(source, TransportError::Connect(ref m) if m == "connection refused"));
            }
            other => panic!("expected connectivity failure, got {:?}", other),
        }
    }

    #[test]
    fn test_401_always_session_expired() {
        for body in ["", "{}", r#"{"error":"invalid_credentials"}"#, "<html>"] {
            assert!(matches!(
                classify(response(401, body), READ_SUCCESS),
                Outcome::SessionExpired
            ));
            assert!(matches!(
                classify(response(401, body), WRITE_SUCCESS),
                Outcome::SessionExpired
            ));
        }
    }

    #[test]
    fn test_success_statuses() {
        match classify(response(200, r#"{"data":[]}"#), READ_SUCCESS) {
            Outcome::Success(r) => assert_eq!(r.body, r#"{"data":[]}"#),
            other => panic!("expected success, got {:?}", other),
        }

        assert!(matches!(
            classify(response(201, "{}"), WRITE_SUCCESS),
            Outcome::Success(_)
        ));
    }

    #[test]
    fn test_201_is_failure_for_reads() {
        assert!(matches!(
            classify(response(201, "{}"), READ_SUCCESS),
            Outcome::Failure(LookupError::RemoteServer { status: 201, .. })
        ));
    }

    #[test]
    fn test_other_status_carries_diagnostics() {
        let outcome = classify(
            Ok(HttpResponse {
                status: 500,
                status_text: "Internal Server Error".to_string(),
                body: "boom".to_string(),
            }),
            READ_SUCCESS,
        );

        match outcome {
            Outcome::Failure(LookupError::RemoteServer {
                status,
                status_text,
                body,
            }) => {
                assert_eq!(status, 500);
                assert_eq!(status_text, "Internal Server Error");
                assert_eq!(body, "boom");
            }
            other => panic!("expected remote server failure, got {:?}", other),
        }
    }
}
