//! Cached, rate-limited origin classification.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::ReputationConfig;
use crate::error::{MixError, Result};
use crate::identity::IdentityStore;
use crate::types::OriginVerdict;

/// External classification of one origin. Implementations must treat
/// rate-limit responses as transient errors, never as verdicts.
#[async_trait]
pub trait ReputationLookup: Send + Sync {
    async fn classify(&self, origin: &str) -> Result<OriginVerdict>;
}

/// HTTP lookup against a proxy-detection service. The service requires a
/// contact address with every query.
pub struct HttpReputationLookup {
    client: reqwest::Client,
    check_url: String,
    contact: String,
}

#[derive(serde::Deserialize)]
struct ClassifyResponse {
    status: String,
    result: String,
}

impl HttpReputationLookup {
    pub fn new(config: &ReputationConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            check_url: config.check_url.clone(),
            contact: config.contact.clone(),
        })
    }
}

#[async_trait]
impl ReputationLookup for HttpReputationLookup {
    async fn classify(&self, origin: &str) -> Result<OriginVerdict> {
        let mut url = Url::parse(&self.check_url)
            .map_err(|error| MixError::External(format!("bad check url: {error}")))?;
        url.query_pairs_mut()
            .append_pair("ip", origin)
            .append_pair("contact", &self.contact)
            .append_pair("flags", "m")
            .append_pair("format", "json");

        let response = self.client.get(url).send().await?;
        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(MixError::External("lookup service rate limit".to_string()));
        }
        if !response.status().is_success() {
            return Err(MixError::External(format!(
                "lookup returned {}",
                response.status()
            )));
        }

        let body: ClassifyResponse = response.json().await?;
        if body.status != "success" {
            return Err(MixError::External(format!(
                "lookup status {}",
                body.status
            )));
        }
        let score: i32 = body
            .result
            .parse()
            .map_err(|_| MixError::External(format!("unparseable result {}", body.result)))?;
        // result 1 means the origin is a known proxy exit
        Ok(if score == 1 {
            OriginVerdict::Suppressed
        } else {
            OriginVerdict::Trusted
        })
    }
}

/// Fixed-verdict lookup for tests and offline operation.
pub struct StaticLookup {
    verdict: OriginVerdict,
}

impl StaticLookup {
    pub fn new(verdict: OriginVerdict) -> Self {
        Self { verdict }
    }
}

#[async_trait]
impl ReputationLookup for StaticLookup {
    async fn classify(&self, _origin: &str) -> Result<OriginVerdict> {
        Ok(self.verdict)
    }
}

pub struct ReputationChecker {
    store: Arc<dyn IdentityStore>,
    lookup: Arc<dyn ReputationLookup>,
    ttl: Duration,
    max_in_flight: usize,
    in_flight: AtomicUsize,
    backlog: Mutex<VecDeque<String>>,
    resolutions: mpsc::Sender<(String, OriginVerdict)>,
}

impl ReputationChecker {
    /// Returns the checker plus the receiver for verdicts resolved out of
    /// band (backlog drain); feed it to the reconciler's resolution pump.
    pub fn new(
        store: Arc<dyn IdentityStore>,
        lookup: Arc<dyn ReputationLookup>,
        config: &ReputationConfig,
    ) -> (Self, mpsc::Receiver<(String, OriginVerdict)>) {
        let (tx, rx) = mpsc::channel(64);
        let checker = Self {
            store,
            lookup,
            ttl: Duration::from_secs(config.check_ttl_secs),
            max_in_flight: config.max_in_flight,
            in_flight: AtomicUsize::new(0),
            backlog: Mutex::new(VecDeque::new()),
            resolutions: tx,
        };
        (checker, rx)
    }

    #[cfg(test)]
    pub fn for_tests(store: Arc<dyn IdentityStore>, lookup: Arc<dyn ReputationLookup>) -> Self {
        let (checker, _rx) = Self::new(store, lookup, &ReputationConfig::default());
        checker
    }

    /// Cached verdict only; never triggers an external request.
    pub async fn cached(&self, origin: &str) -> Result<OriginVerdict> {
        self.store.load_origin_check(origin, self.ttl).await
    }

    /// Full check: cache, then one external lookup if the concurrency
    /// budget allows, otherwise the origin joins the backlog. External
    /// failures leave the verdict unknown and are retried on next access.
    pub async fn check(&self, origin: &str) -> Result<OriginVerdict> {
        let cached = self.cached(origin).await?;
        if cached.is_resolved() {
            return Ok(cached);
        }

        if !self.try_acquire_slot() {
            self.enqueue(origin);
            return Ok(OriginVerdict::Unknown);
        }

        let outcome = self.lookup.classify(origin).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match outcome {
            Ok(verdict) => {
                if verdict.is_resolved() {
                    self.store.save_origin_check(origin, verdict).await?;
                    info!(%origin, ?verdict, "origin classified");
                }
                Ok(verdict)
            }
            Err(error) => {
                // Transient by contract: not cached, retried on next access.
                warn!(%origin, %error, "origin lookup failed");
                Ok(OriginVerdict::Unknown)
            }
        }
    }

    /// Periodically re-run queued checks as capacity frees up.
    pub fn spawn_backlog_drain(self: &Arc<Self>, interval: Duration) {
        let checker = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                checker.drain_backlog().await;
            }
        });
    }

    /// One drain pass: pops queued origins while budget remains and
    /// publishes any verdicts on the resolution channel.
    pub async fn drain_backlog(&self) {
        loop {
            if self.in_flight.load(Ordering::SeqCst) >= self.max_in_flight {
                return;
            }
            let Some(origin) = self.backlog.lock().unwrap().pop_front() else {
                return;
            };
            debug!(%origin, "processing backlogged origin check");
            match self.check(&origin).await {
                Ok(verdict) if verdict.is_resolved() => {
                    let _ = self.resolutions.send((origin, verdict)).await;
                }
                Ok(_) => {}
                Err(error) => warn!(%origin, %error, "backlogged origin check failed"),
            }
        }
    }

    pub fn backlog_len(&self) -> usize {
        self.backlog.lock().unwrap().len()
    }

    fn try_acquire_slot(&self) -> bool {
        self.in_flight
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                (current < self.max_in_flight).then_some(current + 1)
            })
            .is_ok()
    }

    fn enqueue(&self, origin: &str) {
        let mut backlog = self.backlog.lock().unwrap();
        if !backlog.iter().any(|queued| queued == origin) {
            backlog.push_back(origin.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::MemoryIdentityStore;
    use tokio::sync::Semaphore;

    /// Lookup that blocks until a permit is released, to pin the
    /// concurrency budget.
    struct GatedLookup {
        gate: Semaphore,
        verdict: OriginVerdict,
        calls: AtomicUsize,
    }

    impl GatedLookup {
        fn new(verdict: OriginVerdict) -> Arc<Self> {
            Arc::new(Self {
                gate: Semaphore::new(0),
                verdict,
                calls: AtomicUsize::new(0),
            })
        }

        fn release(&self, permits: usize) {
            self.gate.add_permits(permits);
        }
    }

    #[async_trait]
    impl ReputationLookup for GatedLookup {
        async fn classify(&self, _origin: &str) -> Result<OriginVerdict> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let permit = self.gate.acquire().await.expect("gate closed");
            permit.forget();
            Ok(self.verdict)
        }
    }

    /// Lookup that always fails transiently.
    struct FailingLookup {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ReputationLookup for FailingLookup {
        async fn classify(&self, _origin: &str) -> Result<OriginVerdict> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(MixError::External("boom".to_string()))
        }
    }

    fn config(max_in_flight: usize) -> ReputationConfig {
        ReputationConfig {
            max_in_flight,
            ..ReputationConfig::default()
        }
    }

    #[tokio::test]
    async fn test_resolved_verdict_is_cached() {
        let store = Arc::new(MemoryIdentityStore::new());
        let lookup = Arc::new(StaticLookup::new(OriginVerdict::Suppressed));
        let (checker, _rx) = ReputationChecker::new(store.clone(), lookup, &config(4));

        assert_eq!(checker.check("1.2.3.4").await.unwrap(), OriginVerdict::Suppressed);
        // Second check is served from the cache.
        assert_eq!(checker.cached("1.2.3.4").await.unwrap(), OriginVerdict::Suppressed);
    }

    #[tokio::test]
    async fn test_failure_not_cached_and_retried() {
        let store = Arc::new(MemoryIdentityStore::new());
        let lookup = Arc::new(FailingLookup {
            calls: AtomicUsize::new(0),
        });
        let (checker, _rx) = ReputationChecker::new(store.clone(), lookup.clone(), &config(4));

        assert_eq!(checker.check("1.2.3.4").await.unwrap(), OriginVerdict::Unknown);
        assert_eq!(checker.check("1.2.3.4").await.unwrap(), OriginVerdict::Unknown);
        // Each access retried the external lookup.
        assert_eq!(lookup.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_overflow_goes_to_backlog_fifo() {
        let store = Arc::new(MemoryIdentityStore::new());
        let lookup = GatedLookup::new(OriginVerdict::Trusted);
        let (checker, mut rx) = ReputationChecker::new(store.clone(), lookup.clone(), &config(1));
        let checker = Arc::new(checker);

        // First check occupies the single slot.
        let busy = {
            let checker = checker.clone();
            tokio::spawn(async move { checker.check("10.0.0.1").await })
        };
        tokio::task::yield_now().await;
        assert_eq!(lookup.calls.load(Ordering::SeqCst), 1);

        // Budget exhausted: these queue instead of firing.
        assert_eq!(checker.check("10.0.0.2").await.unwrap(), OriginVerdict::Unknown);
        assert_eq!(checker.check("10.0.0.3").await.unwrap(), OriginVerdict::Unknown);
        assert_eq!(checker.check("10.0.0.2").await.unwrap(), OriginVerdict::Unknown);
        assert_eq!(checker.backlog_len(), 2);

        // Release the in-flight request, then drain.
        lookup.release(1);
        busy.await.unwrap().unwrap();
        lookup.release(2);
        checker.drain_backlog().await;

        assert_eq!(checker.backlog_len(), 0);
        let (first, _) = rx.recv().await.unwrap();
        let (second, _) = rx.recv().await.unwrap();
        assert_eq!(first, "10.0.0.2");
        assert_eq!(second, "10.0.0.3");
    }
}
