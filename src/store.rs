//! In-memory keyed storage with a time-to-live.
//!
//! Conversions and correction sessions are kept only as long as the
//! configured retention ("auto-delete uploads after 1h / 24h / 7d / never").
//! The single contract downstream code relies on: [`TtlStore::get`] fails
//! with [`HandTexError::NotFound`] once an entry has expired, whether or not
//! the background purge has removed it yet.

use crate::error::HandTexError;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

struct Entry<V> {
    value: V,
    expires_at: Option<Instant>,
}

impl<V> Entry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|t| now >= t)
    }
}

/// Values keyed by [`Uuid`]; `ttl = None` keeps entries forever.
///
/// Cloning shares the underlying map.
pub struct TtlStore<V> {
    kind: &'static str,
    ttl: Option<Duration>,
    entries: Arc<RwLock<HashMap<Uuid, Entry<V>>>>,
}

impl<V> Clone for TtlStore<V> {
    fn clone(&self) -> Self {
        Self {
            kind: self.kind,
            ttl: self.ttl,
            entries: Arc::clone(&self.entries),
        }
    }
}

impl<V: Clone> TtlStore<V> {
    /// `kind` names the stored values in `NotFound` errors.
    pub fn new(kind: &'static str, ttl: Option<Duration>) -> Self {
        Self {
            kind,
            ttl,
            entries: Arc::new(RwLock::new(HashMap::with_capacity(64))),
        }
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    pub async fn insert(&self, id: Uuid, value: V) {
        let expires_at = self.ttl.map(|ttl| Instant::now() + ttl);
        self.entries
            .write()
            .await
            .insert(id, Entry { value, expires_at });
    }

    /// Fetch a live entry.
    pub async fn get(&self, id: Uuid) -> Result<V, HandTexError> {
        let now = Instant::now();
        {
            let entries = self.entries.read().await;
            match entries.get(&id) {
                Some(entry) if !entry.is_expired(now) => return Ok(entry.value.clone()),
                Some(_) => {}
                None => return Err(self.not_found(id)),
            }
        }
        self.entries.write().await.remove(&id);
        debug!(kind = self.kind, %id, "Expired entry dropped on access");
        Err(self.not_found(id))
    }

    pub async fn remove(&self, id: Uuid) -> Option<V> {
        self.entries.write().await.remove(&id).map(|e| e.value)
    }

    /// Drop every expired entry and return how many went.
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, e| !e.is_expired(now));
        let purged = before - entries.len();
        if purged > 0 {
            debug!(kind = self.kind, purged, "Purged expired entries");
        }
        purged
    }

    /// Entries currently held, expired or not.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn not_found(&self, id: Uuid) -> HandTexError {
        HandTexError::NotFound {
            kind: self.kind,
            id: id.to_string(),
        }
    }
}

impl<V: Clone + Send + Sync + 'static> TtlStore<V> {
    /// Purge expired entries every `interval` until the runtime shuts down.
    /// A store without a TTL never needs purging and spawns nothing.
    pub fn spawn_purger(&self, interval: Duration) -> Option<tokio::task::JoinHandle<()>> {
        self.ttl?;
        let store = self.clone();
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                store.purge_expired().await;
            }
        }))
    }
}

/// Parse a retention setting: seconds, or `never`/`0` for no expiry.
pub fn parse_ttl(value: &str) -> Result<Option<Duration>, HandTexError> {
    let value = value.trim();
    if value.eq_ignore_ascii_case("never") {
        return Ok(None);
    }
    match value.parse::<u64>() {
        Ok(0) => Ok(None),
        Ok(secs) => Ok(Some(Duration::from_secs(secs))),
        Err(_) => Err(HandTexError::InvalidConfig(format!(
            "retention must be a number of seconds or 'never', got '{value}'"
        ))),
    }
}
