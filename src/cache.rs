use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::models::{Insight, PerformanceDataPoint, Subject};

/// Insights computed for one fingerprint, stamped with their creation time.
#[derive(Clone)]
struct CacheEntry {
    insights: Vec<Insight>,
    created_at: Instant,
}

/// In-memory TTL cache of successfully generated insight sets.
///
/// Expiry is checked on read (lazy) and enforced physically by `sweep()`,
/// which a background job calls once per TTL to bound memory. Process
/// lifetime only; nothing is persisted.
#[derive(Clone)]
pub struct InsightCache {
    entries: Arc<DashMap<String, CacheEntry>>,
    ttl: Duration,
}

impl InsightCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Hit only while `now - created_at < ttl`. Expired entries stay in the
    /// map until the next sweep.
    pub fn get(&self, key: &str) -> Option<Vec<Insight>> {
        let entry = self.entries.get(key)?;
        if entry.created_at.elapsed() < self.ttl {
            Some(entry.insights.clone())
        } else {
            None
        }
    }

    /// Last writer wins. Empty sets are never stored: only a fully parsed
    /// result may occupy a key.
    pub fn put(&self, key: &str, insights: Vec<Insight>) {
        if insights.is_empty() {
            tracing::debug!(key = key, "skipping cache write for empty insight set");
            return;
        }
        self.entries.insert(
            key.to_string(),
            CacheEntry {
                insights,
                created_at: Instant::now(),
            },
        );
    }

    /// Remove every entry whose age has reached the TTL.
    pub fn sweep(&self) -> usize {
        let ttl = self.ttl;
        let mut evicted = 0;
        // Writers may insert while this runs; only count what retain drops.
        self.entries.retain(|_, entry| {
            let live = entry.created_at.elapsed() < ttl;
            if !live {
                evicted += 1;
            }
            live
        });
        evicted
    }

    /// Physical entry count, expired ones included (for metrics / debugging).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }
}

/// Deterministic cache key for a `(subject, dataset, model)` triple.
///
/// The dataset is hashed through its JSON form; metric maps are ordered, so
/// identical inputs always produce identical bytes.
pub fn fingerprint(subject: &Subject, dataset: &[PerformanceDataPoint], model: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(subject.id().as_bytes());
    hasher.update(b":");
    match serde_json::to_vec(dataset) {
        Ok(bytes) => hasher.update(&bytes),
        // Only non-finite floats fail here; hash their debug form instead.
        Err(_) => hasher.update(format!("{:?}", dataset).as_bytes()),
    }
    hasher.update(b":");
    hasher.update(model.as_bytes());
    format!("insights:{}", hex::encode(hasher.finalize()))
}

// ── Tests ───────────────────────────────────────────────────────
