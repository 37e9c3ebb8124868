//! HTTP transport used for ThreatQ requests.
//!
//! The client only talks to the server through [`HttpTransport`], so tests and
//! embedders can inject their own implementation. [`ReqwestTransport`] is the
//! default, built once from an immutable [`RequestConfig`].

use crate::config::RequestConfig;
use async_trait::async_trait;
use reqwest::{Certificate, Client, Identity, Proxy};
use std::time::Duration;
use thiserror::Error;

/// HTTP method.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

/// A request to the ThreatQ server.
#[derive(Clone, Debug)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    /// Query parameters, in order. Keys may repeat.
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    /// JSON body.
    pub json: Option<serde_json::Value>,
    /// Per-request deadline; falls back to the transport default.
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Post, url)
    }

    fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            query: Vec::new(),
            headers: Vec::new(),
            json: None,
            timeout: None,
        }
    }

    pub fn with_query(mut self, key: &str, value: impl Into<String>) -> Self {
        self.query.push((key.to_string(), value.into()));
        self
    }

    pub fn with_header(mut self, key: &str, value: impl Into<String>) -> Self {
        self.headers.push((key.to_string(), value.into()));
        self
    }

    pub fn with_bearer(self, token: &str) -> Self {
        self.with_header("Authorization", format!("Bearer {}", token))
    }

    pub fn with_json(mut self, body: serde_json::Value) -> Self {
        self.json = Some(body);
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

/// A response from the ThreatQ server, any status.
#[derive(Clone, Debug)]
pub struct HttpResponse {
    pub status: u16,
    pub status_text: String,
    pub body: String,
}

/// The request never produced an HTTP response.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request timed out")]
    Timeout,

    #[error("request failed: {0}")]
    Request(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            TransportError::Timeout
        } else if e.is_connect() {
            TransportError::Connect(e.to_string())
        } else {
            TransportError::Request(e.to_string())
        }
    }
}

/// Sends requests to the ThreatQ server.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// reqwest-backed transport.
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// Build the client from transport configuration.
    pub fn new(config: &RequestConfig) -> anyhow::Result<Self> {
        let mut builder = Client::builder()
            .timeout(config.timeout())
            .danger_accept_invalid_certs(!config.reject_unauthorized);

        if let (Some(cert), Some(key)) = (&config.cert, &config.key) {
            let mut pem = std::fs::read(cert)?;
            pem.extend(std::fs::read(key)?);
            builder = builder.identity(Identity::from_pem(&pem)?);
        }

        if let Some(ref ca) = config.ca {
            let pem = std::fs::read(ca)?;
            builder = builder.add_root_certificate(Certificate::from_pem(&pem)?);
        }

        if let Some(ref proxy) = config.proxy {
            builder = builder.proxy(Proxy::all(proxy.as_str())?);
        }

        Ok(Self {
            client: builder.build()?,
        })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let mut builder = match request.method {
            HttpMethod::Get => self.client.get(&request.url),
            HttpMethod::Post => self.client.post(&request.url),
        };

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }

        for (key, value) in &request.headers {
            builder = builder.header(key, value);
        }

        if let Some(ref body) = request.json {
            builder = builder.json(body);
        }

        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }

        let response = builder.send().await?;
        let status = response.status();
        let body = response.text().await?;

        Ok(HttpResponse {
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or("").to_string(),
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builders() {
        let request = HttpRequest::get("https://tq.example.com/api/indicators/search")
            .with_query("limit", "10")
            .with_query("value", "8.8.8.8")
            .with_bearer("tok1")
            .with_timeout(Some(Duration::from_secs(5)));

        assert_eq!(request.method, HttpMethod::Get);
        assert_eq!(request.query.len(), 2);
        assert_eq!(
            request.headers,
            vec![("Authorization".to_string(), "Bearer tok1".to_string())]
        );
        assert_eq!(request.timeout, Some(Duration::from_secs(5)));
        assert!(request.json.is_none());
    }

    #[test]
    fn test_transport_from_default_config() {
        assert!(ReqwestTransport::new(&RequestConfig::default()).is_ok());
    }

    #[test]
    fn test_transport_rejects_bad_proxy() {
        let config = RequestConfig {
            proxy: Some("http://[::1".to_string()),
            ..RequestConfig::default()
        };
        assert!(ReqwestTransport::new(&config).is_err());
    }

    #[test]
    fn test_transport_missing_ca_file() {
        let config = RequestConfig {
            ca: Some("/nonexistent/ca.pem".into()),
            ..RequestConfig::default()
        };
        assert!(ReqwestTransport::new(&config).is_err());
    }

    #[tokio::test]
    async fn test_connection_refused() {
        let transport = ReqwestTransport::new(&RequestConfig::default()).unwrap();
        let request = HttpRequest::get("http://127.0.0.1:9/api/token")
            .with_timeout(Some(Duration::from_secs(2)));

        assert!(transport.send(request).await.is_err());
    }
}
