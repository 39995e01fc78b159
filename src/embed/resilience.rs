//! Resilient embedding layer
//!
//! Composes, in order: content-keyed LRU cache with per-entry expiration,
//! circuit breaker, per-call timeout, and bounded retry with exponential
//! backoff and jitter. On open-circuit or upstream failure the cache is
//! consulted as a fallback before the error surfaces.
//!
//! Applied once at the embedder adapter; call sites never re-implement
//! retry or breaking.

use super::{EmbedError, EmbedResult, Embedder};
use crate::cancel::CancellationToken;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use lru::LruCache;
use std::collections::VecDeque;
use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Configuration for the resilience layer.
#[derive(Debug, Clone)]
pub struct EmbeddingPolicy {
    /// Toggles the cache; retry, breaker and timeout always apply.
    pub enabled: bool,
    pub max_cached_items: usize,
    pub expiration_hours: i64,
    /// Number of retries after the initial attempt.
    pub max_retry_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub use_jitter: bool,
    pub circuit_failure_ratio: f64,
    pub circuit_min_throughput: u32,
    pub circuit_sampling_sec: u64,
    pub circuit_break_sec: u64,
    pub timeout_sec: u64,
}

impl Default for EmbeddingPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            max_cached_items: 4096,
            expiration_hours: 24,
            max_retry_attempts: 3,
            initial_delay_ms: 200,
            max_delay_ms: 5000,
            backoff_multiplier: 2.0,
            use_jitter: true,
            circuit_failure_ratio: 0.5,
            circuit_min_throughput: 10,
            circuit_sampling_sec: 30,
            circuit_break_sec: 30,
            timeout_sec: 60,
        }
    }
}

/// Rolling-window circuit breaker.
///
/// Opens when the sampling window holds at least `min_throughput` outcomes
/// and the failure ratio reaches the threshold; stays open for the break
/// duration, then half-opens and admits exactly one probe call.
struct CircuitBreaker {
    failure_ratio: f64,
    min_throughput: usize,
    sampling: Duration,
    break_duration: Duration,
    state: Mutex<BreakerState>,
}

#[derive(Default)]
struct BreakerState {
    window: VecDeque<(Instant, bool)>,
    opened_at: Option<Instant>,
    /// When the half-open probe was admitted; cleared when it reports back.
    probe_started_at: Option<Instant>,
}

impl CircuitBreaker {
    fn new(policy: &EmbeddingPolicy) -> Self {
        Self::with_durations(
            policy.circuit_failure_ratio,
            policy.circuit_min_throughput as usize,
            Duration::from_secs(policy.circuit_sampling_sec),
            Duration::from_secs(policy.circuit_break_sec),
        )
    }

    fn with_durations(
        failure_ratio: f64,
        min_throughput: usize,
        sampling: Duration,
        break_duration: Duration,
    ) -> Self {
        Self {
            failure_ratio,
            min_throughput,
            sampling,
            break_duration,
            state: Mutex::new(BreakerState::default()),
        }
    }

    /// Gate check. Past the break duration this admits a single probe call
    /// (the caller that observed `false` first); everyone else keeps seeing
    /// the circuit as open until the probe reports back via `record`. A
    /// probe that never reports (cancelled mid-flight) expires after
    /// another break interval so the circuit cannot wedge open.
    fn is_open(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        let Some(opened) = state.opened_at else {
            return false;
        };
        if opened.elapsed() < self.break_duration {
            return true;
        }
        match state.probe_started_at {
            Some(started) if started.elapsed() < self.break_duration => true,
            _ => {
                state.probe_started_at = Some(Instant::now());
                false
            }
        }
    }

    fn record(&self, success: bool) {
        let mut state = self.state.lock().unwrap();
        let now = Instant::now();

        if state.opened_at.is_some() {
            state.probe_started_at = None;
            if success {
                state.opened_at = None;
                state.window.clear();
            } else {
                state.opened_at = Some(now);
            }
            return;
        }

        state.window.push_back((now, success));
        while let Some((at, _)) = state.window.front() {
            if now.duration_since(*at) > self.sampling {
                state.window.pop_front();
            } else {
                break;
            }
        }

        let total = state.window.len();
        if total >= self.min_throughput {
            let failures = state.window.iter().filter(|(_, ok)| !ok).count();
            if failures as f64 / total as f64 >= self.failure_ratio {
                state.opened_at = Some(now);
            }
        }
    }
}

struct CacheEntry {
    vector: Vec<f32>,
    inserted_at: DateTime<Utc>,
}

/// Embedder wrapper adding cache, breaker, timeout and retry.
pub struct ResilientEmbedder {
    inner: Arc<dyn Embedder>,
    policy: EmbeddingPolicy,
    cache: Mutex<LruCache<String, CacheEntry>>,
    breaker: CircuitBreaker,
}

impl ResilientEmbedder {
    pub fn new(inner: Arc<dyn Embedder>, policy: EmbeddingPolicy) -> Self {
        let capacity = NonZeroUsize::new(policy.max_cached_items.max(1)).unwrap();
        let breaker = CircuitBreaker::new(&policy);
        Self {
            inner,
            policy,
            cache: Mutex::new(LruCache::new(capacity)),
            breaker,
        }
    }

    fn cache_get(&self, text: &str) -> Option<Vec<f32>> {
        if !self.policy.enabled {
            return None;
        }
        let mut cache = self.cache.lock().unwrap();
        if let Some(entry) = cache.get(text) {
            let age = Utc::now() - entry.inserted_at;
            if age < ChronoDuration::hours(self.policy.expiration_hours) {
                return Some(entry.vector.clone());
            }
        }
        // Expired entries are evicted on read.
        cache.pop(text);
        None
    }

    fn cache_put(&self, text: &str, vector: &[f32]) {
        if !self.policy.enabled {
            return;
        }
        self.cache.lock().unwrap().put(
            text.to_string(),
            CacheEntry {
                vector: vector.to_vec(),
                inserted_at: Utc::now(),
            },
        );
    }

    fn fallback(&self, text: &str, reason: &str) -> EmbedResult<Vec<f32>> {
        if let Some(vector) = self.cache_get(text) {
            tracing::debug!(reason, "embedding served from cache fallback");
            return Ok(vector);
        }
        Err(EmbedError::Unavailable(format!(
            "embedding upstream unavailable ({}) and no cached vector for this text",
            reason
        )))
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = self.policy.initial_delay_ms as f64
            * self.policy.backoff_multiplier.powi(attempt as i32);
        let capped = base.min(self.policy.max_delay_ms as f64);
        let jittered = if self.policy.use_jitter {
            capped * jitter_factor()
        } else {
            capped
        };
        Duration::from_millis(jittered as u64)
    }

    async fn with_retry<T, F, Fut>(
        &self,
        cancel: &CancellationToken,
        mut op: F,
    ) -> EmbedResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = EmbedResult<T>>,
    {
        let timeout = Duration::from_secs(self.policy.timeout_sec);
        let mut attempt: u32 = 0;
        loop {
            if cancel.is_cancelled() {
                return Err(EmbedError::Cancelled);
            }
            let outcome = match tokio::time::timeout(timeout, op()).await {
                Ok(result) => result,
                Err(_) => Err(EmbedError::Transient(format!(
                    "timed out after {}s",
                    self.policy.timeout_sec
                ))),
            };
            match outcome {
                Err(EmbedError::Transient(reason)) if attempt < self.policy.max_retry_attempts => {
                    let delay = self.backoff_delay(attempt);
                    tracing::debug!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        %reason,
                        "retrying embedding call"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    fn check_output(&self, vector: &[f32]) -> EmbedResult<()> {
        let expected = self.inner.dimensions();
        if vector.len() != expected {
            return Err(EmbedError::DimensionMismatch {
                expected,
                actual: vector.len(),
            });
        }
        Ok(())
    }
}

/// Uniform jitter factor in `[0.5, 1.0]`.
fn jitter_factor() -> f64 {
    let mut buf = [0u8; 8];
    match getrandom::getrandom(&mut buf) {
        Ok(()) => 0.5 + 0.5 * (u64::from_le_bytes(buf) as f64 / u64::MAX as f64),
        Err(_) => 1.0,
    }
}

#[async_trait]
impl Embedder for ResilientEmbedder {
    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }

    async fn embed(&self, text: &str, cancel: &CancellationToken) -> EmbedResult<Vec<f32>> {
        if cancel.is_cancelled() {
            return Err(EmbedError::Cancelled);
        }
        if let Some(vector) = self.cache_get(text) {
            return Ok(vector);
        }
        if self.breaker.is_open() {
            return self.fallback(text, "circuit breaker open");
        }

        match self
            .with_retry(cancel, || self.inner.embed(text, cancel))
            .await
        {
            Ok(vector) => {
                self.check_output(&vector)?;
                self.breaker.record(true);
                self.cache_put(text, &vector);
                Ok(vector)
            }
            Err(EmbedError::Cancelled) => Err(EmbedError::Cancelled),
            Err(err @ EmbedError::DimensionMismatch { .. }) => Err(err),
            Err(EmbedError::Unavailable(reason)) | Err(EmbedError::Transient(reason)) => {
                self.breaker.record(false);
                self.fallback(text, &reason)
            }
        }
    }

    async fn embed_batch(
        &self,
        texts: &[String],
        cancel: &CancellationToken,
    ) -> EmbedResult<Vec<Vec<f32>>> {
        if cancel.is_cancelled() {
            return Err(EmbedError::Cancelled);
        }

        let mut results: Vec<Option<Vec<f32>>> = texts.iter().map(|t| self.cache_get(t)).collect();
        let misses: Vec<usize> = results
            .iter()
            .enumerate()
            .filter_map(|(i, r)| r.is_none().then_some(i))
            .collect();

        if !misses.is_empty() {
            if self.breaker.is_open() {
                return Err(EmbedError::Unavailable(
                    "embedding upstream unavailable (circuit breaker open) and not all \
                     texts are cached"
                        .to_string(),
                ));
            }

            let miss_texts: Vec<String> = misses.iter().map(|&i| texts[i].clone()).collect();
            let vectors = match self
                .with_retry(cancel, || self.inner.embed_batch(&miss_texts, cancel))
                .await
            {
                Ok(vectors) => {
                    self.breaker.record(true);
                    vectors
                }
                Err(EmbedError::Cancelled) => return Err(EmbedError::Cancelled),
                Err(err @ EmbedError::DimensionMismatch { .. }) => return Err(err),
                Err(EmbedError::Unavailable(reason)) | Err(EmbedError::Transient(reason)) => {
                    self.breaker.record(false);
                    return Err(EmbedError::Unavailable(format!(
                        "embedding upstream unavailable ({}) during batch",
                        reason
                    )));
                }
            };
            if vectors.len() != misses.len() {
                return Err(EmbedError::Unavailable(format!(
                    "embedding upstream returned {} vectors for {} inputs",
                    vectors.len(),
                    misses.len()
                )));
            }
            for (&i, vector) in misses.iter().zip(vectors.into_iter()) {
                self.check_output(&vector)?;
                self.cache_put(&texts[i], &vector);
                results[i] = Some(vector);
            }
        }

        Ok(results.into_iter().map(|r| r.unwrap()).collect())
    }
}
