//! Background job: evict expired insight sets from the in-memory cache.
//!
//! Runs once per cache TTL so memory stays bounded even when nobody reads
//! the expired keys again.

use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::cache::InsightCache;

/// Spawn the sweeper. Call this once at startup; cancel `shutdown` to stop it.
pub fn spawn(cache: InsightCache, shutdown: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let period = cache.ttl();
        let mut interval = time::interval_at(time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::debug!("cache sweeper stopped");
                    return;
                }
                _ = interval.tick() => {
                    let evicted = cache.sweep();
                    if evicted > 0 {
                        tracing::info!(
                            evicted = evicted,
                            remaining = cache.len(),
                            "swept expired insight cache entries"
                        );
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Insight;
    use std::time::Duration;

    fn one_insight() -> Vec<Insight> {
        vec![Insight {
            area: "Recovery".into(),
            trend: "Stable".into(),
            recommendation: "Maintain".into(),
            confidence: 0.7,
            supporting_data: None,
        }]
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_evicts_after_one_period() {
        let cache = InsightCache::new(Duration::from_secs(300));
        cache.put("k", one_insight());
        let shutdown = CancellationToken::new();
        let handle = spawn(cache.clone(), shutdown.clone());

        tokio::time::sleep(Duration::from_secs(299)).await;
        assert!(cache.contains("k"));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(!cache.contains("k"));

        shutdown.cancel();
        handle.await.unwrap();
    }
}
