//! Pending authorization state storage for Hestia
//!
//! The OAuth handshake completes out of process; between redirect and
//! callback the PKCE verifier and redirect target are held here, keyed by
//! the random state token. Entries are time-bounded and evicted on access.
//! The store is injected rather than module-global so tests can drive
//! expiry deterministically.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// State held between authorization redirect and callback
#[derive(Debug, Clone)]
pub struct PendingAuth {
    /// PKCE code verifier generated at redirect time
    pub code_verifier: String,

    /// Where to send the user after the exchange completes
    pub redirect_to: Option<String>,
}

struct Entry {
    value: PendingAuth,
    inserted_at: Instant,
}

/// In-memory store for pending authorizations with TTL eviction
pub struct PendingAuthStore {
    entries: HashMap<String, Entry>,
    ttl: Duration,
}

impl PendingAuthStore {
    /// Create a store whose entries expire after `ttl`
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            ttl,
        }
    }

    /// Insert pending state under a state token
    pub fn insert(&mut self, state_token: String, value: PendingAuth) {
        self.evict_expired();
        self.entries.insert(
            state_token,
            Entry {
                value,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Take the state for a token, if present and not expired. Single-use:
    /// the entry is removed either way.
    pub fn take(&mut self, state_token: &str) -> Option<PendingAuth> {
        self.evict_expired();
        self.entries.remove(state_token).map(|e| e.value)
    }

    /// Number of live entries
    pub fn len(&mut self) -> usize {
        self.evict_expired();
        self.entries.len()
    }

    pub fn is_empty(&mut self) -> bool {
        self.len() == 0
    }

    fn evict_expired(&mut self) {
        let ttl = self.ttl;
        self.entries.retain(|_, e| e.inserted_at.elapsed() < ttl);
    }
}

impl Default for PendingAuthStore {
    fn default() -> Self {
        // Handshakes abandoned for ten minutes are stale
        Self::new(Duration::from_secs(600))
    }
}
