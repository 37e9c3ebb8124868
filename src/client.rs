//! ThreatQ lookup client.
//!
//! Owns the session store and drives the login / query / retry cycle:
//!
//! 1. Reuse the cached token for the credential pair, or log in and cache one.
//! 2. Issue the request(s) with that token.
//! 3. On HTTP 401, drop the token and go back to 1, at most
//!    [`MAX_SESSION_RETRIES`] times per call. A further 401 is a hard failure.

use crate::auth::Authenticator;
use crate::classify::{classify, Outcome, READ_SUCCESS, WRITE_SUCCESS};
use crate::config::{Config, Settings};
use crate::entity::{Entity, EntityFilter, Partition, MAX_ENTITIES_PER_LOOKUP};
use crate::error::LookupError;
use crate::session::{CredentialKey, SessionStore};
use crate::transport::{HttpRequest, HttpTransport, ReqwestTransport};
use futures::stream::{self, StreamExt};
use regex::Regex;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Re-authentications allowed per call after the server reports an expired session.
pub const MAX_SESSION_RETRIES: u32 = 1;

const SEARCH_LIMIT: &str = "10";
const SEARCH_WITH: &str = "tags,score,sources";

/// Per-call account and behavior options.
#[derive(Debug, Clone)]
pub struct LookupOptions {
    /// Server URL without trailing slash.
    pub url: String,
    pub username: String,
    pub password: SecretString,
    pub client_id: String,
    pub ignore_private_ips: bool,
    /// Deadline applied to every request of the call.
    pub timeout: Option<Duration>,
}

impl LookupOptions {
    /// Session cache key for these credentials.
    pub fn credential_key(&self) -> CredentialKey {
        CredentialKey::derive(&self.username, self.password.expose_secret())
    }
}

/// Result for one looked-up entity. `data` is `None` when the server has no
/// matching indicator.
#[derive(Debug, Clone, Serialize)]
pub struct LookupResult {
    pub entity: Entity,
    pub data: Option<IndicatorData>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IndicatorData {
    pub summary: Vec<String>,
    pub details: IndicatorDetails,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndicatorDetails {
    /// Every record returned by the search.
    pub all_data: Vec<Value>,
    /// Base URL of indicator pages on the server.
    pub url: String,
}

/// Confirmation of a posted comment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommentReceipt {
    pub data: String,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    data: Vec<Value>,
}

/// Result of one pass with a given token.
enum Attempt<T> {
    Complete(T),
    SessionExpired,
    Failed(LookupError),
}

/// Client for indicator lookups and comments.
pub struct ThreatQClient {
    transport: Arc<dyn HttpTransport>,
    authenticator: Authenticator,
    sessions: Arc<SessionStore>,
    max_concurrent_lookups: usize,
    ignore_patterns: Vec<Regex>,
}

impl ThreatQClient {
    /// Build the transport and session store from configuration.
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let transport: Arc<dyn HttpTransport> = Arc::new(ReqwestTransport::new(&config.request)?);
        let client = Self::with_transport(transport, Arc::new(SessionStore::new()), &config.settings)?;

        info!(
            server = %config.server.url,
            reject_unauthorized = config.request.reject_unauthorized,
            proxy = config.request.proxy.is_some(),
            max_concurrent_lookups = client.max_concurrent_lookups,
            "ThreatQ client initialized"
        );

        Ok(client)
    }

    /// Build a client over an existing transport and session store.
    pub fn with_transport(
        transport: Arc<dyn HttpTransport>,
        sessions: Arc<SessionStore>,
        settings: &Settings,
    ) -> Result<Self, regex::Error> {
        Ok(Self {
            authenticator: Authenticator::new(transport.clone()),
            transport,
            sessions,
            max_concurrent_lookups: settings.max_concurrent_lookups.max(1),
            ignore_patterns: settings.compile_ignore_patterns()?,
        })
    }

    /// Shared session store.
    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    /// Look up entities, one result per entity that passes the filter, in
    /// input order. Repeated values are queried once and share the result.
    ///
    /// Fails on the first unrecoverable error; no partial results are returned.
    pub async fn lookup(
        &self,
        entities: &[Entity],
        options: &LookupOptions,
    ) -> Result<Vec<LookupResult>, LookupError> {
        let filter = EntityFilter::new(options.ignore_private_ips, self.ignore_patterns.clone());
        let partition = Partition::build(entities, &filter, MAX_ENTITIES_PER_LOOKUP);

        if partition.is_empty() {
            debug!(entities = entities.len(), "No entities left to look up");
            return Ok(Vec::new());
        }

        debug!(groups = partition.groups.len(), "Looking up entity groups");

        let partition = &partition;
        let results = self
            .with_session(options, move |token| {
                self.query_groups(partition, token, options)
            })
            .await?;

        debug!(results = results.len(), "Lookup complete");
        Ok(results)
    }

    /// Add a comment to an indicator.
    pub async fn post_comment(
        &self,
        indicator_id: u64,
        text: &str,
        options: &LookupOptions,
    ) -> Result<CommentReceipt, LookupError> {
        let url = format!("{}/api/indicators/{}/comments", options.url, indicator_id);
        let url = url.as_str();

        self.with_session(options, move |token| {
            self.send_comment(url, text, token, options)
        })
        .await
    }

    /// Run `attempt` with a session token, re-authenticating once on expiry.
    async fn with_session<T, F, Fut>(
        &self,
        options: &LookupOptions,
        mut attempt: F,
    ) -> Result<T, LookupError>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Attempt<T>>,
    {
        let key = options.credential_key();
        let mut retries_left = MAX_SESSION_RETRIES;

        loop {
            let token = self.session_token(&key, options).await?;

            match attempt(token.clone()).await {
                Attempt::Complete(value) => return Ok(value),
                Attempt::Failed(e) => {
                    error!(code = e.code(), error = %e, "ThreatQ request failed");
                    return Err(e);
                }
                Attempt::SessionExpired if retries_left > 0 => {
                    retries_left -= 1;
                    debug!(key = ?key, "Session expired, clearing session and retrying");
                    self.sessions.invalidate_if(&key, &token);
                }
                Attempt::SessionExpired => {
                    warn!(key = ?key, "Session expired again after re-authenticating");
                    self.sessions.invalidate_if(&key, &token);
                    return Err(LookupError::AuthenticationFailed);
                }
            }
        }
    }

    /// Cached token for `key`, or a fresh one from the token endpoint.
    async fn session_token(
        &self,
        key: &CredentialKey,
        options: &LookupOptions,
    ) -> Result<String, LookupError> {
        if let Some(entry) = self.sessions.entry(key) {
            debug!(
                sessions = self.sessions.count(),
                age_secs = entry.created_at.elapsed().as_secs(),
                "Session already exists"
            );
            return Ok(entry.token);
        }

        debug!(key = ?key, "Session does not exist, creating session");

        let token = self
            .authenticator
            .login(
                &options.username,
                &options.password,
                &options.url,
                &options.client_id,
                options.timeout,
            )
            .await
            .map_err(|e| {
                error!(kind = ?e.kind(), error = %e, "Error logging in to ThreatQ");
                LookupError::from(e)
            })?;

        self.sessions.set(key.clone(), token.clone());
        debug!(sessions = self.sessions.count(), "Created new session");
        Ok(token)
    }

    async fn query_groups(
        &self,
        partition: &Partition,
        token: String,
        options: &LookupOptions,
    ) -> Attempt<Vec<LookupResult>> {
        let indicator_url = format!("{}/indicators/", options.url);
        let token = token.as_str();

        // Dropping the stream on an early return cancels queries still in flight.
        let mut pending = stream::iter(partition.groups.iter())
            .map(move |group| async move {
                let request = self.search_request(partition, group, token, options);
                (group, classify(self.transport.send(request).await, READ_SUCCESS))
            })
            .buffer_unordered(self.max_concurrent_lookups);

        let mut found: HashMap<&str, Option<IndicatorData>> =
            HashMap::with_capacity(partition.lookup.len());

        while let Some((group, outcome)) = pending.next().await {
            let response = match outcome {
                Outcome::Success(response) => response,
                Outcome::SessionExpired => {
                    debug!(group = ?group, "Session expired during search");
                    return Attempt::SessionExpired;
                }
                Outcome::Failure(e) => return Attempt::Failed(e),
            };

            let records = match serde_json::from_str::<SearchResponse>(&response.body) {
                Ok(search) => search.data,
                Err(e) => {
                    return Attempt::Failed(LookupError::MalformedResponse {
                        message: format!("indicator search response: {}", e),
                    })
                }
            };

            debug!(group = ?group, records = records.len(), "Indicator search results");
            found.extend(assemble(partition, group, &records, &indicator_url));
        }

        Attempt::Complete(expand(partition, &found))
    }

    fn search_request(
        &self,
        partition: &Partition,
        group: &[String],
        token: &str,
        options: &LookupOptions,
    ) -> HttpRequest {
        let mut request = HttpRequest::get(format!("{}/api/indicators/search", options.url))
            .with_query("limit", SEARCH_LIMIT);

        for entity in partition.entities(group) {
            request = request.with_query("value", entity.value.as_str());
        }

        request
            .with_query("with", SEARCH_WITH)
            .with_bearer(token)
            .with_timeout(options.timeout)
    }

    async fn send_comment(
        &self,
        url: &str,
        text: &str,
        token: String,
        options: &LookupOptions,
    ) -> Attempt<CommentReceipt> {
        let request = HttpRequest::post(url)
            .with_json(json!({ "value": text }))
            .with_bearer(&token)
            .with_timeout(options.timeout);

        match classify(self.transport.send(request).await, WRITE_SUCCESS) {
            Outcome::Success(_) => {
                debug!(url = %url, "Comment added");
                Attempt::Complete(CommentReceipt {
                    data: "Success".to_string(),
                })
            }
            Outcome::SessionExpired => Attempt::SessionExpired,
            Outcome::Failure(e) => Attempt::Failed(e),
        }
    }
}

/// Map search records back to the lookup keys of a group.
///
/// A single-entity group owns every record; otherwise records are matched on
/// their `value` field, case-insensitively.
fn assemble<'a>(
    partition: &Partition,
    group: &'a [String],
    records: &[Value],
    indicator_url: &str,
) -> Vec<(&'a str, Option<IndicatorData>)> {
    group
        .iter()
        .filter_map(|key| partition.lookup.get(key).map(|entity| (key, entity)))
        .map(|(key, entity)| {
            let matched: Vec<Value> = if group.len() == 1 {
                records.to_vec()
            } else {
                records
                    .iter()
                    .filter(|record| {
                        record
                            .get("value")
                            .and_then(Value::as_str)
                            .is_some_and(|v| v.eq_ignore_ascii_case(&entity.value))
                    })
                    .cloned()
                    .collect()
            };

            let data = matched.first().map(|first| IndicatorData {
                summary: vec![summarize(first)],
                details: IndicatorDetails {
                    all_data: matched.clone(),
                    url: indicator_url.to_string(),
                },
            });

            (key.as_str(), data)
        })
        .collect()
}

/// One result per accepted entity, sharing the data found for its key.
fn expand(
    partition: &Partition,
    found: &HashMap<&str, Option<IndicatorData>>,
) -> Vec<LookupResult> {
    partition
        .accepted
        .iter()
        .map(|entity| LookupResult {
            entity: entity.clone(),
            data: found
                .get(entity.lookup_key().as_str())
                .cloned()
                .flatten(),
        })
        .collect()
}

/// One-line summary from a record's class and status.
fn summarize(record: &Value) -> String {
    let class = record.get("class").and_then(Value::as_str).unwrap_or("N/A");
    let status = record
        .pointer("/status/name")
        .and_then(Value::as_str)
        .unwrap_or("N/A");
    format!("Class: {} Status: {}", class, status)
}
