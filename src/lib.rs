//! ThreatQ indicator lookup client.
//!
//! Looks up IPs, domains, hashes and CIDR ranges against a ThreatQ server,
//! authenticating with a username and password that are exchanged for a
//! short-lived bearer token.
//!
//! # Features
//!
//! - **Session Cache** - Bearer tokens cached per credential pair and reused across calls
//! - **Expiry Retry** - HTTP 401 drops the cached token, logs in again and replays the request once
//! - **Entity Filtering** - Skip private, malformed, or pattern-matched entities before any network call
//! - **Bounded Concurrency** - Indicator searches run in parallel up to a configured limit
//! - **Comments** - Post free-text comments to indicators with the same session handling
//! - **TLS/Proxy** - Client certificates, custom CA, proxy and certificate validation toggle
//!
//! # Example Configuration
//!
//! ```yaml
//! settings:
//!   ignore_private_ips: true
//!   max_concurrent_lookups: 10
//!
//! server:
//!   url: "https://threatq.example.com"
//!   username: "analyst@example.com"
//!   password: "${THREATQ_PASSWORD}"
//!   client_id: "${THREATQ_CLIENT_ID}"
//! ```

pub mod auth;
pub mod classify;
pub mod client;
pub mod config;
pub mod entity;
pub mod error;
pub mod session;
pub mod transport;

pub use client::{LookupOptions, LookupResult, ThreatQClient};
pub use config::Config;
pub use entity::{Entity, EntityType};
pub use error::LookupError;
pub use session::{CredentialKey, SessionStore};
