//! Credential-keyed session token store.

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;
use std::time::Instant;

/// Cache key derived from a username/password pair.
///
/// The raw credentials are never kept; only a SHA-256 digest over the
/// length-prefixed fields, so `("ab", "c")` and `("a", "bc")` differ.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct CredentialKey(String);

impl CredentialKey {
    /// Derive the key for a credential pair.
    pub fn derive(username: &str, password: &str) -> Self {
        let mut hasher = Sha256::new();
        for field in [username, password] {
            hasher.update((field.len() as u64).to_be_bytes());
            hasher.update(field.as_bytes());
        }
        Self(format!("{:x}", hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for CredentialKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short prefix is enough to correlate log lines.
        write!(f, "CredentialKey({}…)", &self.0[..8])
    }
}

/// A cached bearer token.
#[derive(Debug, Clone)]
pub struct SessionEntry {
    pub token: String,
    /// When the token was obtained.
    pub created_at: Instant,
}

/// Thread-safe map of credential key to session token.
///
/// Every operation takes the lock once, so `get`, `set` and `invalidate` are
/// atomic with respect to each other.
#[derive(Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<CredentialKey, SessionEntry>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the token cached for a key.
    pub fn get(&self, key: &CredentialKey) -> Option<String> {
        let sessions = self.sessions.read().ok()?;
        sessions.get(key).map(|entry| entry.token.clone())
    }

    /// Get the full entry cached for a key.
    pub fn entry(&self, key: &CredentialKey) -> Option<SessionEntry> {
        let sessions = self.sessions.read().ok()?;
        sessions.get(key).cloned()
    }

    /// Store a token, replacing any previous one for the same key.
    pub fn set(&self, key: CredentialKey, token: impl Into<String>) {
        let entry = SessionEntry {
            token: token.into(),
            created_at: Instant::now(),
        };

        if let Ok(mut sessions) = self.sessions.write() {
            sessions.insert(key, entry);
        }
    }

    /// Drop the session for a key. Absent keys are ignored.
    pub fn invalidate(&self, key: &CredentialKey) {
        if let Ok(mut sessions) = self.sessions.write() {
            sessions.remove(key);
        }
    }

    /// Drop the session only if it still holds `stale_token`.
    ///
    /// Returns true when an entry was removed. A token written by a concurrent
    /// login after `stale_token` was read is left in place.
    pub fn invalidate_if(&self, key: &CredentialKey, stale_token: &str) -> bool {
        let Ok(mut sessions) = self.sessions.write() else {
            return false;
        };

        match sessions.get(key) {
            Some(entry) if entry.token == stale_token => {
                sessions.remove(key);
                true
            }
            _ => false,
        }
    }

    /// Number of live sessions.
    pub fn count(&self) -> usize {
        self.sessions.read().map(|s| s.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_derive_key_deterministic() {
        let a = CredentialKey::derive("analyst@example.com", "hunter2");
        let b = CredentialKey::derive("analyst@example.com", "hunter2");
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
    }

    #[test]
    fn test_derive_key_distinct_pairs() {
        let pairs = [
            ("alice", "secret"),
            ("alice", "secret2"),
            ("bob", "secret"),
            ("ab", "c"),
            ("a", "bc"),
            ("", "abc"),
            ("abc", ""),
        ];

        let mut keys: Vec<String> = pairs
            .iter()
            .map(|(u, p)| CredentialKey::derive(u, p).as_str().to_string())
            .collect();
        keys.sort();
        keys.dedup();
        assert_eq!(keys.len(), pairs.len());
    }

    #[test]
    fn test_debug_does_not_leak_full_key() {
        let key = CredentialKey::derive("alice", "secret");
        let rendered = format!("{:?}", key);
        assert!(!rendered.contains(key.as_str()));
        assert!(rendered.starts_with("CredentialKey("));
    }

    #[test]
    fn test_set_and_get() {
        let store = SessionStore::new();
        let key = CredentialKey::derive("alice", "secret");

        assert!(store.get(&key).is_none());
        store.set(key.clone(), "tok1");
        assert_eq!(store.get(&key).as_deref(), Some("tok1"));
        assert_eq!(store.count(), 1);
    }

    #[test]
    fn test_set_overwrites() {
        let store = SessionStore::new();
        let key = CredentialKey::derive("alice", "secret");

        store.set(key.clone(), "tok1");
        store.set(key.clone(), "tok2");

        assert_eq!(store.get(&key).as_deref(), Some("tok2"));
        assert_eq!(store.count(), 1);
    }

    #[test]
    fn test_untouched_key_absent() {
        let store = SessionStore::new();
        store.set(CredentialKey::derive("alice", "secret"), "tok1");
        assert!(store.get(&CredentialKey::derive("bob", "secret")).is_none());
    }

    #[test]
    fn test_invalidate_idempotent() {
        let store = SessionStore::new();
        let key = CredentialKey::derive("alice", "secret");
        let other = CredentialKey::derive("bob", "secret");

        store.set(key.clone(), "tok1");
        store.set(other.clone(), "tok2");

        store.invalidate(&key);
        assert!(store.get(&key).is_none());
        assert_eq!(store.count(), 1);

        store.invalidate(&key);
        assert!(store.get(&key).is_none());
        assert_eq!(store.count(), 1);
        assert_eq!(store.get(&other).as_deref(), Some("tok2"));
    }

    #[test]
    fn test_invalidate_if_keeps_fresh_token() {
        let store = SessionStore::new();
        let key = CredentialKey::derive("alice", "secret");

        store.set(key.clone(), "fresh");
        assert!(!store.invalidate_if(&key, "stale"));
        assert_eq!(store.get(&key).as_deref(), Some("fresh"));

        assert!(store.invalidate_if(&key, "fresh"));
        assert!(store.get(&key).is_none());
    }

    #[test]
    fn test_entry_records_creation_time() {
        let store = SessionStore::new();
        let key = CredentialKey::derive("alice", "secret");
        let before = Instant::now();

        store.set(key.clone(), "tok1");

        let entry = store.entry(&key).unwrap();
        assert_eq!(entry.token, "tok1");
        assert!(entry.created_at >= before);
    }

    #[test]
    fn test_concurrent_access() {
        let store = Arc::new(SessionStore::new());

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                thread::spawn(move || {
                    let key = CredentialKey::derive(&format!("user{}", i % 4), "pw");
                    for n in 0..100 {
                        store.set(key.clone(), format!("tok{}", n));
                        let _ = store.get(&key);
                        if n % 10 == 0 {
                            store.invalidate(&key);
                        }
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert!(store.count() <= 4);
    }
}
