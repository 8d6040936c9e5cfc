//! Request orchestration for insight generation.
//!
//! Flow per call:
//!
//! ```text
//! cache check ─hit──────────────────────────────────────────────► Cached
//!     │miss
//! register (join identical in-flight / cancel superseded one)
//!     │
//! debounce ─► rate check ─► prompt ─► model call ─► parse ─► commit ─► Generated
//!                 │                      │            │        │
//!                 ▼                      ▼            ▼        ▼
//!            RateLimited          Fallback (timeout/error/empty)  Superseded
//! ```
//!
//! `generate_insights` is infallible: every branch resolves to a non-empty
//! insight list. Only the commit step writes the cache, and it does so while
//! holding the in-flight table entry, so a request superseded at any point
//! before that can never publish its result.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{fallback, parser, prompt};
use crate::cache::{fingerprint, InsightCache};
use crate::config::InsightConfig;
use crate::errors::AppError;
use crate::llm::CompletionClient;
use crate::metrics::InsightMetrics;
use crate::models::{Insight, InsightResponse, InsightSource, PerformanceDataPoint, Subject};
use crate::rate_limit::RateLimiter;

const UNAVAILABLE_NOTICE: &str =
    "AI insights are temporarily unavailable; showing guidance derived from your recent data.";

/// At most one request per `(subject, model)` is current.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RequestSlot {
    subject_id: String,
    model: String,
}

/// Bookkeeping for the current request of a slot.
struct InFlight {
    generation: u64,
    fingerprint: String,
    token: CancellationToken,
    result: watch::Receiver<Option<InsightResponse>>,
}

type InFlightTable = Arc<DashMap<RequestSlot, InFlight>>;

/// Held by the request that owns a slot. Dropping it releases the slot if
/// nothing newer has taken it.
struct RequestHandle {
    slot: RequestSlot,
    generation: u64,
    token: CancellationToken,
    result: watch::Sender<Option<InsightResponse>>,
    table: InFlightTable,
}

impl RequestHandle {
    fn is_superseded(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Hand the outcome to any callers that joined this request.
    fn publish(&self, response: &InsightResponse) {
        self.result.send_replace(Some(response.clone()));
    }
}

impl Drop for RequestHandle {
    fn drop(&mut self) {
        let generation = self.generation;
        self.table
            .remove_if(&self.slot, |_, current| current.generation == generation);
    }
}

enum Registration {
    Leader(RequestHandle),
    /// An identical request is already in flight; wait for its result.
    Follower {
        generation: u64,
        result: watch::Receiver<Option<InsightResponse>>,
    },
    /// A newer request took the slot after the one this caller joined.
    Stale,
}

pub struct InsightService {
    client: Arc<dyn CompletionClient>,
    cache: InsightCache,
    limiter: Arc<RateLimiter>,
    metrics: Arc<InsightMetrics>,
    config: InsightConfig,
    in_flight: InFlightTable,
    generations: AtomicU64,
}

impl InsightService {
    pub fn new(
        client: Arc<dyn CompletionClient>,
        cache: InsightCache,
        limiter: Arc<RateLimiter>,
        metrics: Arc<InsightMetrics>,
        config: InsightConfig,
    ) -> Self {
        Self {
            client,
            cache,
            limiter,
            metrics,
            config,
            in_flight: Arc::new(DashMap::new()),
            generations: AtomicU64::new(0),
        }
    }

    /// Build a service with its own cache, limiter and metrics from `config`.
    pub fn from_config(
        client: Arc<dyn CompletionClient>,
        config: InsightConfig,
    ) -> prometheus::Result<Self> {
        Ok(Self::new(
            client,
            InsightCache::new(config.cache_ttl),
            Arc::new(RateLimiter::from_config(&config)),
            Arc::new(InsightMetrics::new()?),
            config,
        ))
    }

    pub fn cache(&self) -> &InsightCache {
        &self.cache
    }

    pub fn metrics(&self) -> &InsightMetrics {
        &self.metrics
    }

    /// Requests currently holding a slot.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Generate insights for `subject`. Never fails and never returns an
    /// empty list; degraded outcomes are marked by `source` and `notice`.
    pub async fn generate_insights(
        &self,
        subject: &Subject,
        dataset: &[PerformanceDataPoint],
        model: &str,
    ) -> InsightResponse {
        let started = Instant::now();
        let response = self.run(subject, dataset, model).await;
        if response.source.is_degraded() {
            debug!(subject = %subject.id(), source = response.source.as_str(), "serving degraded insights");
        }
        self.metrics.record_response(response.source, started.elapsed());
        self.metrics.set_cache_entries(self.cache.len());
        response
    }

    async fn run(
        &self,
        subject: &Subject,
        dataset: &[PerformanceDataPoint],
        model: &str,
    ) -> InsightResponse {
        let slot = RequestSlot {
            subject_id: subject.id(),
            model: model.to_string(),
        };
        let key = fingerprint(subject, dataset, model);

        if dataset.is_empty() {
            self.supersede_stale(&slot, &key);
            return InsightResponse::new(fallback::generate(dataset), InsightSource::Fallback)
                .with_notice("No performance data recorded yet; showing general guidance.");
        }

        if let Some(insights) = self.cache.get(&key) {
            debug!(subject = %slot.subject_id, model = model, "insight cache hit");
            self.supersede_stale(&slot, &key);
            return InsightResponse::new(insights, InsightSource::Cached);
        }

        let mut joined = None;
        let handle = loop {
            match self.register(slot.clone(), &key, joined) {
                Registration::Leader(handle) => break handle,
                Registration::Follower { generation, result } => {
                    debug!(subject = %slot.subject_id, "joining identical in-flight insight request");
                    if let Some(response) = await_leader(result).await {
                        return response;
                    }
                    // The leader's caller went away before it finished.
                    if let Some(insights) = self.cache.get(&key) {
                        return InsightResponse::new(insights, InsightSource::Cached);
                    }
                    debug!(subject = %slot.subject_id, abandoned = generation, "taking over abandoned insight request");
                    joined = Some(generation);
                }
                Registration::Stale => {
                    return InsightResponse::new(fallback::generate(dataset), InsightSource::Superseded);
                }
            }
        };

        let response = match self.pipeline(&handle, &key, dataset, model).await {
            Ok(insights) => InsightResponse::new(insights, InsightSource::Generated),
            Err(e) => self.degrade(e, &handle.slot, dataset),
        };
        handle.publish(&response);
        response
    }

    /// Claim the slot, cancelling a different in-flight request or joining
    /// an identical one.
    ///
    /// `joined` is the generation this caller previously followed. A
    /// different request registered after it is newer and wins the slot.
    fn register(&self, slot: RequestSlot, key: &str, joined: Option<u64>) -> Registration {
        let generation = self.generations.fetch_add(1, Ordering::Relaxed) + 1;
        let token = CancellationToken::new();
        let (tx, rx) = watch::channel(None);
        let in_flight = InFlight {
            generation,
            fingerprint: key.to_string(),
            token: token.clone(),
            result: rx,
        };

        match self.in_flight.entry(slot.clone()) {
            Entry::Occupied(mut current) => {
                if current.get().fingerprint == key && !current.get().token.is_cancelled() {
                    return Registration::Follower {
                        generation: current.get().generation,
                        result: current.get().result.clone(),
                    };
                }
                if joined.is_some_and(|g| current.get().generation > g) {
                    return Registration::Stale;
                }
                debug!(
                    subject = %slot.subject_id,
                    superseded = current.get().generation,
                    by = generation,
                    "cancelling superseded insight request"
                );
                current.get().token.cancel();
                current.insert(in_flight);
            }
            Entry::Vacant(vacant) => {
                vacant.insert(in_flight);
            }
        }

        Registration::Leader(RequestHandle {
            slot,
            generation,
            token,
            result: tx,
            table: Arc::clone(&self.in_flight),
        })
    }

    /// A request that needs no upstream call still invalidates a different
    /// in-flight request for the same slot.
    fn supersede_stale(&self, slot: &RequestSlot, key: &str) {
        if let Some((_, stale)) = self
            .in_flight
            .remove_if(slot, |_, current| current.fingerprint != key)
        {
            debug!(subject = %slot.subject_id, superseded = stale.generation, "cancelling stale insight request");
            stale.token.cancel();
        }
    }

    async fn pipeline(
        &self,
        handle: &RequestHandle,
        key: &str,
        dataset: &[PerformanceDataPoint],
        model: &str,
    ) -> Result<Vec<Insight>, AppError> {
        if !self.config.debounce.is_zero() {
            tokio::select! {
                biased;
                _ = handle.token.cancelled() => return Err(AppError::Superseded),
                _ = tokio::time::sleep(self.config.debounce) => {}
            }
        }
        if handle.is_superseded() {
            return Err(AppError::Superseded);
        }

        self.limiter.check_rate_limit()?;

        let prompt = prompt::build_prompt(dataset);
        self.metrics.record_upstream_call();
        debug!(subject = %handle.slot.subject_id, model = model, "requesting insights from model");

        let raw = tokio::select! {
            biased;
            _ = handle.token.cancelled() => return Err(AppError::Superseded),
            res = tokio::time::timeout(
                self.config.request_timeout,
                self.client.complete(&prompt, model),
            ) => res.map_err(|_| AppError::Timeout)??,
        };

        let insights = parser::parse_insights(&raw, dataset)?;
        self.commit(handle, key, &insights)?;
        Ok(insights)
    }

    /// Write-through to the cache, only if this request is still current.
    ///
    /// The slot entry stays locked across check and write; cancellation goes
    /// through the same entry, so it cannot slip in between.
    fn commit(&self, handle: &RequestHandle, key: &str, insights: &[Insight]) -> Result<(), AppError> {
        match self.in_flight.get(&handle.slot) {
            Some(current) if current.generation == handle.generation && !handle.is_superseded() => {
                self.cache.put(key, insights.to_vec());
                Ok(())
            }
            _ => Err(AppError::Superseded),
        }
    }

    fn degrade(
        &self,
        error: AppError,
        slot: &RequestSlot,
        dataset: &[PerformanceDataPoint],
    ) -> InsightResponse {
        let insights = fallback::generate(dataset);
        match error {
            AppError::RateLimitExceeded { retry_after_secs } => {
                info!(
                    subject = %slot.subject_id,
                    retry_after_secs = retry_after_secs,
                    "insight request rate limited"
                );
                let mut response = InsightResponse::new(insights, InsightSource::RateLimited)
                    .with_notice(format!(
                        "Insight generation is busy; please wait {} second{} before requesting fresh insights.",
                        retry_after_secs,
                        if retry_after_secs == 1 { "" } else { "s" }
                    ));
                response.retry_after_secs = Some(retry_after_secs);
                response
            }
            AppError::Superseded => {
                debug!(subject = %slot.subject_id, "discarding superseded insight result");
                InsightResponse::new(insights, InsightSource::Superseded)
            }
            e if e.is_degradable() => {
                warn!(
                    subject = %slot.subject_id,
                    model = %slot.model,
                    error = %e,
                    "insight generation failed, serving fallback"
                );
                InsightResponse::new(insights, InsightSource::Fallback).with_notice(UNAVAILABLE_NOTICE)
            }
            other => {
                error!(
                    subject = %slot.subject_id,
                    model = %slot.model,
                    error = %other,
                    "unexpected insight pipeline error, serving fallback"
                );
                InsightResponse::new(insights, InsightSource::Fallback).with_notice(UNAVAILABLE_NOTICE)
            }
        }
    }
}

/// Wait for the owning request's outcome. `None` means it was dropped
/// without publishing.
async fn await_leader(mut rx: watch::Receiver<Option<InsightResponse>>) -> Option<InsightResponse> {
    loop {
        if let Some(response) = rx.borrow_and_update().clone() {
            return Some(response);
        }
        if rx.changed().await.is_err() {
            return rx.borrow().clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::Prompt;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    const REPLY: &str = "Training Load|Improving|Keep going\nRecovery|Stable|Maintain\nSpeed|Flat|Add intervals";

    /// Answers after `delay` with `reply`, counting calls.
    struct ScriptedClient {
        calls: AtomicUsize,
        delay: Duration,
        reply: Result<String, String>,
    }

    impl ScriptedClient {
        fn ok(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                delay,
                reply: Ok(REPLY.to_string()),
            })
        }

        fn replying(text: &str) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                delay: Duration::ZERO,
                reply: Ok(text.to_string()),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                delay: Duration::ZERO,
                reply: Err("upstream returned 503".to_string()),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CompletionClient for ScriptedClient {
        async fn complete(&self, _prompt: &Prompt, _model: &str) -> Result<String, AppError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.reply.clone().map_err(AppError::Upstream)
        }
    }

    fn open_config() -> InsightConfig {
        InsightConfig {
            min_interval: Duration::ZERO,
            max_requests: 100,
            window: Duration::from_secs(60),
            cache_ttl: Duration::from_secs(300),
            debounce: Duration::from_millis(100),
            request_timeout: Duration::from_secs(10),
        }
    }

    fn service(client: Arc<ScriptedClient>, config: InsightConfig) -> InsightService {
        InsightService::from_config(client, config).unwrap()
    }

    fn dataset(load: f64) -> Vec<PerformanceDataPoint> {
        let d = |n| NaiveDate::from_ymd_opt(2024, 7, n).unwrap();
        vec![
            PerformanceDataPoint::new(d(1)).with_metric("training_load", load),
            PerformanceDataPoint::new(d(2)).with_metric("training_load", load + 10.0),
        ]
    }

    #[tokio::test(start_paused = true)]
    async fn test_generated_then_cached() {
        let client = ScriptedClient::ok(Duration::from_millis(500));
        let svc = service(client.clone(), open_config());
        let subject = Subject::athlete("a1");

        let first = svc.generate_insights(&subject, &dataset(100.0), "m").await;
        assert_eq!(first.source, InsightSource::Generated);
        assert_eq!(first.insights.len(), 3);
        // "Training Load" names the training_load metric.
        assert!(first.insights[0].supporting_data.is_some());

        let second = svc.generate_insights(&subject, &dataset(100.0), "m").await;
        assert_eq!(second.source, InsightSource::Cached);
        assert_eq!(second.insights, first.insights);
        assert_eq!(client.calls(), 1);
        assert_eq!(svc.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_identical_concurrent_requests_share_one_call() {
        let client = ScriptedClient::ok(Duration::from_secs(1));
        let svc = service(client.clone(), open_config());
        let subject = Subject::athlete("a1");
        let data = dataset(100.0);

        let (a, b) = tokio::join!(
            svc.generate_insights(&subject, &data, "m"),
            svc.generate_insights(&subject, &data, "m"),
        );
        assert_eq!(a.source, InsightSource::Generated);
        assert_eq!(a, b);
        assert_eq!(client.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounce_collapses_burst_into_last_request() {
        let client = ScriptedClient::ok(Duration::from_millis(200));
        let svc = service(client.clone(), open_config());
        let subject = Subject::athlete("a1");
        let (d1, d2, d3) = (dataset(1.0), dataset(2.0), dataset(3.0));

        let (r1, r2, r3) = tokio::join!(
            svc.generate_insights(&subject, &d1, "m"),
            async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                svc.generate_insights(&subject, &d2, "m").await
            },
            async {
                tokio::time::sleep(Duration::from_millis(40)).await;
                svc.generate_insights(&subject, &d3, "m").await
            },
        );

        assert_eq!(r1.source, InsightSource::Superseded);
        assert_eq!(r2.source, InsightSource::Superseded);
        assert_eq!(r3.source, InsightSource::Generated);
        assert_eq!(client.calls(), 1);
        assert_eq!(svc.cache().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_upstream_error_falls_back_without_caching() {
        let client = ScriptedClient::failing();
        let svc = service(client.clone(), open_config());
        let data = dataset(5.0);

        let resp = svc.generate_insights(&Subject::team("t1"), &data, "m").await;
        assert_eq!(resp.source, InsightSource::Fallback);
        assert_eq!(resp.insights, fallback::generate(&data));
        assert!(resp.notice.is_some());
        assert!(svc.cache().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unparseable_reply_falls_back() {
        let client = ScriptedClient::replying("\n   \n");
        let svc = service(client.clone(), open_config());
        let data = dataset(5.0);

        let resp = svc.generate_insights(&Subject::athlete("a1"), &data, "m").await;
        assert_eq!(resp.source, InsightSource::Fallback);
        assert_eq!(resp.insights, fallback::generate(&data));
        assert!(svc.cache().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_dataset_skips_upstream() {
        let client = ScriptedClient::ok(Duration::ZERO);
        let svc = service(client.clone(), open_config());

        let resp = svc.generate_insights(&Subject::athlete("a1"), &[], "m").await;
        assert_eq!(resp.source, InsightSource::Fallback);
        assert!(!resp.insights.is_empty());
        assert_eq!(client.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_request_never_reaches_upstream() {
        let client = ScriptedClient::ok(Duration::ZERO);
        let mut config = open_config();
        config.min_interval = Duration::from_secs(5);
        let svc = service(client.clone(), config);

        let first = svc.generate_insights(&Subject::athlete("a1"), &dataset(1.0), "m").await;
        assert_eq!(first.source, InsightSource::Generated);

        let second = svc.generate_insights(&Subject::athlete("a2"), &dataset(1.0), "m").await;
        assert_eq!(second.source, InsightSource::RateLimited);
        assert_eq!(second.retry_after_secs, Some(5));
        assert!(second.notice.as_deref().unwrap().contains("please wait 5 seconds"));
        assert_eq!(client.calls(), 1);
        assert_eq!(svc.metrics().upstream_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_hit_supersedes_stale_in_flight_request() {
        let client = ScriptedClient::ok(Duration::from_secs(2));
        let svc = service(client.clone(), open_config());
        let subject = Subject::athlete("a1");
        let (old, current) = (dataset(1.0), dataset(2.0));

        let current_key = fingerprint(&subject, &current, "m");
        let stale_key = fingerprint(&subject, &old, "m");
        svc.cache().put(&current_key, fallback::generate(&current));

        let (stale, fresh) = tokio::join!(
            svc.generate_insights(&subject, &old, "m"),
            async {
                tokio::time::sleep(Duration::from_millis(500)).await;
                svc.generate_insights(&subject, &current, "m").await
            },
        );

        assert_eq!(fresh.source, InsightSource::Cached);
        assert_eq!(stale.source, InsightSource::Superseded);
        assert!(!svc.cache().contains(&stale_key));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_leader_releases_slot() {
        let client = ScriptedClient::ok(Duration::from_secs(5));
        let svc = service(client.clone(), open_config());
        let subject = Subject::athlete("a1");
        let data = dataset(1.0);

        let abandoned = tokio::time::timeout(
            Duration::from_secs(1),
            svc.generate_insights(&subject, &data, "m"),
        )
        .await;
        assert!(abandoned.is_err());
        assert_eq!(svc.in_flight(), 0);

        let resp = svc.generate_insights(&subject, &data, "m").await;
        assert_eq!(resp.source, InsightSource::Generated);
    }

    #[tokio::test(start_paused = true)]
    async fn test_follower_takes_over_when_leader_is_dropped() {
        let client = ScriptedClient::ok(Duration::from_secs(5));
        let svc = service(client.clone(), open_config());
        let subject = Subject::athlete("a1");
        let data = dataset(1.0);

        let (abandoned, follower) = tokio::join!(
            tokio::time::timeout(Duration::from_secs(1), svc.generate_insights(&subject, &data, "m")),
            async {
                tokio::time::sleep(Duration::from_millis(500)).await;
                svc.generate_insights(&subject, &data, "m").await
            },
        );

        assert!(abandoned.is_err());
        assert_eq!(follower.source, InsightSource::Generated);
        assert_eq!(client.calls(), 2);
        assert!(svc.cache().contains(&fingerprint(&subject, &data, "m")));
        assert_eq!(svc.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_follower_that_took_over_can_still_be_superseded() {
        let client = ScriptedClient::ok(Duration::from_secs(5));
        let svc = service(client.clone(), open_config());
        let subject = Subject::athlete("a1");
        let (old, newer) = (dataset(1.0), dataset(2.0));

        let (abandoned, follower, latest) = tokio::join!(
            tokio::time::timeout(Duration::from_secs(1), svc.generate_insights(&subject, &old, "m")),
            async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                svc.generate_insights(&subject, &old, "m").await
            },
            async {
                tokio::time::sleep(Duration::from_millis(1500)).await;
                svc.generate_insights(&subject, &newer, "m").await
            },
        );

        assert!(abandoned.is_err());
        // The follower took over at 1s and was then replaced at 1.5s.
        assert_eq!(follower.source, InsightSource::Superseded);
        assert_eq!(latest.source, InsightSource::Generated);
        assert!(!svc.cache().contains(&fingerprint(&subject, &old, "m")));
    }
}
