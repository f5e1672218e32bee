//! Keyed, time-stamped cache over the server-derived chat resources.
//!
//! Each key holds at most one entry and at most one in-flight fetch.
//! Concurrent reads of a key that is being fetched subscribe to the
//! in-flight fetch instead of issuing their own request. Invalidation marks
//! an entry stale but keeps its value, so views can keep rendering it until
//! the refetch lands.

use crate::error::Result;
use crate::models::{HealthStatus, History, UserStats};
use crate::services::api_client::ChatBackend;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheKey {
    History,
    Stats,
    Health,
}

impl CacheKey {
    pub const ALL: [CacheKey; 3] = [CacheKey::History, CacheKey::Stats, CacheKey::Health];

    pub fn as_str(&self) -> &'static str {
        match self {
            CacheKey::History => "history",
            CacheKey::Stats => "stats",
            CacheKey::Health => "health",
        }
    }

    pub fn policy(&self) -> CachePolicy {
        match self {
            CacheKey::History => CachePolicy {
                stale_after: Duration::from_secs(5 * 60),
                refetch_on_focus: false,
                refetch_interval: None,
            },
            CacheKey::Stats => CachePolicy {
                stale_after: Duration::from_secs(2 * 60),
                refetch_on_focus: false,
                refetch_interval: None,
            },
            CacheKey::Health => CachePolicy {
                stale_after: Duration::from_secs(5 * 60),
                refetch_on_focus: true,
                refetch_interval: Some(Duration::from_secs(5 * 60)),
            },
        }
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePolicy {
    pub stale_after: Duration,
    pub refetch_on_focus: bool,
    pub refetch_interval: Option<Duration>,
}

/// Notifications for cache observers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheEvent {
    Updated(CacheKey),
    Invalidated(CacheKey),
    FetchFailed(CacheKey),
}

/// Any cached resource, for callers that work with keys generically
#[derive(Debug, Clone, PartialEq)]
pub enum CachedValue {
    History(History),
    Stats(UserStats),
    Health(HealthStatus),
}

// ============================================================================
// CLOCK
// ============================================================================

pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    base: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut offset = self.offset.lock().unwrap_or_else(PoisonError::into_inner);
        *offset += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + *self.offset.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ============================================================================
// ENTRIES
// ============================================================================

#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    pub key: CacheKey,
    pub value: T,
    pub fetched_at: Instant,
    pub stale_after: Duration,
    invalidated: bool,
}

impl<T> CacheEntry<T> {
    pub fn is_fresh(&self, now: Instant) -> bool {
        !self.invalidated && now < self.fetched_at + self.stale_after
    }

    pub fn is_invalidated(&self) -> bool {
        self.invalidated
    }
}

struct Slot<T> {
    entry: Option<CacheEntry<T>>,
    in_flight: Option<broadcast::Sender<Result<T>>>,
    /// Bumped on every invalidation; a fetch that started under an older
    /// generation lands as stale.
    generation: u64,
}

enum Claim<T> {
    Fresh(T),
    Wait(broadcast::Receiver<Result<T>>),
    Lead(u64),
}

struct Resource<T> {
    key: CacheKey,
    policy: CachePolicy,
    slot: Mutex<Slot<T>>,
}

/// Clears the in-flight marker if the leading fetch is dropped before it
/// completes, so waiters retry instead of hanging.
struct InFlightGuard<'a, T> {
    resource: &'a Resource<T>,
    armed: bool,
}

impl<T> Drop for InFlightGuard<'_, T> {
    fn drop(&mut self) {
        if self.armed {
            tracing::debug!(key = %self.resource.key, "Abandoned in-flight fetch");
            self.resource.lock().in_flight = None;
        }
    }
}

impl<T> Resource<T> {
    fn new(key: CacheKey) -> Self {
        Self {
            key,
            policy: key.policy(),
            slot: Mutex::new(Slot {
                entry: None,
                in_flight: None,
                generation: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slot<T>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn invalidate(&self) {
        let mut slot = self.lock();
        slot.generation += 1;
        if let Some(entry) = slot.entry.as_mut() {
            entry.invalidated = true;
        }
    }

    fn is_fresh(&self, now: Instant) -> bool {
        self.lock().entry.as_ref().is_some_and(|e| e.is_fresh(now))
    }

    fn is_in_flight(&self) -> bool {
        self.lock().in_flight.is_some()
    }
}

impl<T: Clone + Send + 'static> Resource<T> {
    fn peek(&self) -> Option<T> {
        self.lock().entry.as_ref().map(|e| e.value.clone())
    }

    fn entry(&self) -> Option<CacheEntry<T>> {
        self.lock().entry.clone()
    }

    fn claim(&self, now: Instant) -> Claim<T> {
        let mut slot = self.lock();

        if let Some(entry) = slot.entry.as_ref() {
            if entry.is_fresh(now) {
                return Claim::Fresh(entry.value.clone());
            }
        }

        if let Some(sender) = slot.in_flight.as_ref() {
            return Claim::Wait(sender.subscribe());
        }

        let (sender, _) = broadcast::channel(1);
        slot.in_flight = Some(sender);
        Claim::Lead(slot.generation)
    }

    async fn read<F, Fut>(
        &self,
        clock: &dyn Clock,
        events: &broadcast::Sender<CacheEvent>,
        fetch: F,
    ) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        loop {
            match self.claim(clock.now()) {
                Claim::Fresh(value) => return Ok(value),
                Claim::Wait(mut receiver) => match receiver.recv().await {
                    Ok(result) => return result,
                    // Leader went away without a result
                    Err(_) => continue,
                },
                Claim::Lead(generation) => {
                    let mut guard = InFlightGuard {
                        resource: self,
                        armed: true,
                    };
                    tracing::debug!(key = %self.key, "Fetching");
                    let result = fetch().await;
                    guard.armed = false;

                    let event = self.complete(generation, &result, clock.now());
                    let _ = events.send(event);
                    return result;
                }
            }
        }
    }

    fn complete(&self, generation: u64, result: &Result<T>, now: Instant) -> CacheEvent {
        let mut slot = self.lock();

        let event = match result {
            Ok(value) => {
                let invalidated = slot.generation != generation;
                if invalidated {
                    tracing::debug!(key = %self.key, "Invalidated while fetching, storing as stale");
                }
                slot.entry = Some(CacheEntry {
                    key: self.key,
                    value: value.clone(),
                    fetched_at: now,
                    stale_after: self.policy.stale_after,
                    invalidated,
                });
                CacheEvent::Updated(self.key)
            }
            Err(e) => {
                tracing::warn!(key = %self.key, error = %e, "Fetch failed");
                CacheEvent::FetchFailed(self.key)
            }
        };

        if let Some(sender) = slot.in_flight.take() {
            // No receivers is fine
            let _ = sender.send(result.clone());
        }

        event
    }
}

// ============================================================================
// SYNC CACHE
// ============================================================================

pub struct SyncCache {
    backend: Arc<dyn ChatBackend>,
    clock: Arc<dyn Clock>,
    history: Resource<History>,
    stats: Resource<UserStats>,
    health: Resource<HealthStatus>,
    events: broadcast::Sender<CacheEvent>,
}

impl SyncCache {
    pub fn new(backend: Arc<dyn ChatBackend>) -> Self {
        Self::with_clock(backend, Arc::new(SystemClock))
    }

    pub fn with_clock(backend: Arc<dyn ChatBackend>, clock: Arc<dyn Clock>) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            backend,
            clock,
            history: Resource::new(CacheKey::History),
            stats: Resource::new(CacheKey::Stats),
            health: Resource::new(CacheKey::Health),
            events,
        }
    }

    pub fn backend(&self) -> &Arc<dyn ChatBackend> {
        &self.backend
    }

    pub async fn read_history(&self) -> Result<History> {
        let backend = &self.backend;
        self.history
            .read(self.clock.as_ref(), &self.events, || backend.get_history())
            .await
    }

    pub async fn read_stats(&self) -> Result<UserStats> {
        let backend = &self.backend;
        self.stats
            .read(self.clock.as_ref(), &self.events, || backend.get_stats())
            .await
    }

    pub async fn read_health(&self) -> Result<HealthStatus> {
        let backend = &self.backend;
        self.health
            .read(self.clock.as_ref(), &self.events, || backend.health_check())
            .await
    }

    pub async fn read(&self, key: CacheKey) -> Result<CachedValue> {
        Ok(match key {
            CacheKey::History => CachedValue::History(self.read_history().await?),
            CacheKey::Stats => CachedValue::Stats(self.read_stats().await?),
            CacheKey::Health => CachedValue::Health(self.read_health().await?),
        })
    }

    /// Mark `key` stale. The last value stays readable through `peek_*`.
    pub fn invalidate(&self, key: CacheKey) {
        match key {
            CacheKey::History => self.history.invalidate(),
            CacheKey::Stats => self.stats.invalidate(),
            CacheKey::Health => self.health.invalidate(),
        }
        tracing::debug!(key = %key, "Invalidated");
        let _ = self.events.send(CacheEvent::Invalidated(key));
    }

    /// Invalidate every key whose policy asks for a refetch on focus.
    /// Returns the keys that were invalidated.
    pub fn on_focus_regained(&self) -> Vec<CacheKey> {
        let keys: Vec<CacheKey> = CacheKey::ALL
            .into_iter()
            .filter(|key| key.policy().refetch_on_focus)
            .collect();
        for key in &keys {
            self.invalidate(*key);
        }
        keys
    }

    pub fn peek_history(&self) -> Option<History> {
        self.history.peek()
    }

    pub fn peek_stats(&self) -> Option<UserStats> {
        self.stats.peek()
    }

    pub fn peek_health(&self) -> Option<HealthStatus> {
        self.health.peek()
    }

    pub fn history_entry(&self) -> Option<CacheEntry<History>> {
        self.history.entry()
    }

    pub fn stats_entry(&self) -> Option<CacheEntry<UserStats>> {
        self.stats.entry()
    }

    pub fn is_fresh(&self, key: CacheKey) -> bool {
        let now = self.clock.now();
        match key {
            CacheKey::History => self.history.is_fresh(now),
            CacheKey::Stats => self.stats.is_fresh(now),
            CacheKey::Health => self.health.is_fresh(now),
        }
    }

    pub fn is_fetching(&self, key: CacheKey) -> bool {
        match key {
            CacheKey::History => self.history.is_in_flight(),
            CacheKey::Stats => self.stats.is_in_flight(),
            CacheKey::Health => self.health.is_in_flight(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.events.subscribe()
    }
}

/// Re-verify health on its own schedule, whether or not anyone is reading it.
/// The first check runs immediately.
pub fn spawn_health_monitor(cache: Arc<SyncCache>) -> JoinHandle<()> {
    let every = CacheKey::Health
        .policy()
        .refetch_interval
        .unwrap_or(Duration::from_secs(5 * 60));

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            cache.invalidate(CacheKey::Health);
            match cache.read_health().await {
                Ok(health) if health.is_ok() => {
                    tracing::debug!(service = %health.service, "Health check passed");
                }
                Ok(health) => {
                    tracing::warn!(status = %health.status, service = %health.service, "Service unhealthy");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Health check failed");
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ChatError;
    use crate::models::{ChatRequest, ChatResponse};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingBackend {
        history_calls: AtomicUsize,
        stats_calls: AtomicUsize,
        health_calls: AtomicUsize,
        fail_stats: std::sync::atomic::AtomicBool,
        delay: Duration,
    }

    #[async_trait]
    impl ChatBackend for CountingBackend {
        async fn send_message(&self, _request: &ChatRequest) -> Result<ChatResponse> {
            unreachable!("cache never sends")
        }

        async fn get_history(&self) -> Result<History> {
            self.history_calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(History::Empty)
        }

        async fn get_stats(&self) -> Result<UserStats> {
            let n = self.stats_calls.fetch_add(1, Ordering::SeqCst) as u32;
            tokio::time::sleep(self.delay).await;
            if self.fail_stats.load(Ordering::SeqCst) {
                return Err(ChatError::Transport {
                    status: Some(500),
                    message: "Failed to get stats".into(),
                });
            }
            Ok(UserStats::new(None, n, 50))
        }

        async fn health_check(&self) -> Result<HealthStatus> {
            self.health_calls.fetch_add(1, Ordering::SeqCst);
            Ok(HealthStatus {
                status: "ok".into(),
                service: "telegram-api".into(),
            })
        }
    }

    fn cache_with(backend: CountingBackend) -> (Arc<CountingBackend>, Arc<ManualClock>, SyncCache) {
        let backend = Arc::new(backend);
        let clock = Arc::new(ManualClock::new());
        let cache = SyncCache::with_clock(backend.clone(), clock.clone());
        (backend, clock, cache)
    }

    #[tokio::test]
    async fn test_concurrent_reads_share_one_fetch() {
        let (backend, _, cache) = cache_with(CountingBackend {
            delay: Duration::from_millis(50),
            ..Default::default()
        });

        let reads = (0..8).map(|_| cache.read_history());
        let results = futures::future::join_all(reads).await;

        assert!(results.iter().all(|r| r.as_ref() == Ok(&History::Empty)));
        assert_eq!(backend.history_calls.load(Ordering::SeqCst), 1);
        assert!(!cache.is_fetching(CacheKey::History));
    }

    #[tokio::test]
    async fn test_stats_fresh_window() {
        let (backend, clock, cache) = cache_with(CountingBackend::default());

        let first = cache.read_stats().await.unwrap();
        clock.advance(Duration::from_secs(60));
        let second = cache.read_stats().await.unwrap();
        assert_eq!(first, second);
        assert_eq!(backend.stats_calls.load(Ordering::SeqCst), 1);

        clock.advance(Duration::from_secs(61));
        cache.read_stats().await.unwrap();
        cache.read_stats().await.unwrap();
        assert_eq!(backend.stats_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_history_fresh_window_is_five_minutes() {
        let (backend, clock, cache) = cache_with(CountingBackend::default());

        cache.read_history().await.unwrap();
        clock.advance(Duration::from_secs(4 * 60 + 59));
        cache.read_history().await.unwrap();
        assert_eq!(backend.history_calls.load(Ordering::SeqCst), 1);

        clock.advance(Duration::from_secs(1));
        cache.read_history().await.unwrap();
        assert_eq!(backend.history_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_invalidate_keeps_value_and_forces_refetch() {
        let (backend, _, cache) = cache_with(CountingBackend::default());

        let before = cache.read_stats().await.unwrap();
        assert!(cache.is_fresh(CacheKey::Stats));

        cache.invalidate(CacheKey::Stats);
        assert!(!cache.is_fresh(CacheKey::Stats));
        assert_eq!(cache.peek_stats(), Some(before));
        assert!(cache.stats_entry().unwrap().is_invalidated());

        let after = cache.read_stats().await.unwrap();
        assert_eq!(backend.stats_calls.load(Ordering::SeqCst), 2);
        assert_eq!(after.messages_today, 1);
        assert!(cache.is_fresh(CacheKey::Stats));
    }

    #[tokio::test]
    async fn test_invalidate_is_idempotent() {
        let (backend, _, cache) = cache_with(CountingBackend::default());

        // Nothing cached yet
        cache.invalidate(CacheKey::History);
        cache.invalidate(CacheKey::History);
        assert_eq!(cache.peek_history(), None);

        cache.read_history().await.unwrap();
        cache.invalidate(CacheKey::History);
        cache.invalidate(CacheKey::History);
        cache.read_history().await.unwrap();
        assert_eq!(backend.history_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_invalidate_during_fetch_lands_stale() {
        let (backend, _, cache) = cache_with(CountingBackend {
            delay: Duration::from_millis(50),
            ..Default::default()
        });

        let (first, _) = tokio::join!(cache.read_stats(), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            cache.invalidate(CacheKey::Stats);
        });
        first.unwrap();

        assert!(!cache.is_fresh(CacheKey::Stats));
        cache.read_stats().await.unwrap();
        assert_eq!(backend.stats_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failed_fetch_keeps_previous_value() {
        let (backend, _, cache) = cache_with(CountingBackend::default());

        let cached = cache.read_stats().await.unwrap();
        cache.invalidate(CacheKey::Stats);
        backend.fail_stats.store(true, Ordering::SeqCst);

        let err = cache.read_stats().await.unwrap_err();
        assert_eq!(err.status(), Some(500));
        assert_eq!(cache.peek_stats(), Some(cached));
        assert!(!cache.is_fetching(CacheKey::Stats));
    }

    #[tokio::test]
    async fn test_failure_reaches_every_waiter() {
        let backend = CountingBackend {
            delay: Duration::from_millis(30),
            ..Default::default()
        };
        backend.fail_stats.store(true, Ordering::SeqCst);
        let (backend, _, cache) = cache_with(backend);

        let (a, b) = tokio::join!(cache.read_stats(), cache.read_stats());
        assert!(a.is_err());
        assert_eq!(a, b);
        assert_eq!(backend.stats_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_abandoned_leader_releases_waiters() {
        let (backend, _, cache) = cache_with(CountingBackend {
            delay: Duration::from_millis(50),
            ..Default::default()
        });

        let abandoned =
            tokio::time::timeout(Duration::from_millis(10), cache.read_history()).await;
        assert!(abandoned.is_err());
        assert!(!cache.is_fetching(CacheKey::History));

        cache.read_history().await.unwrap();
        assert_eq!(backend.history_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_events_are_published() {
        let (_, _, cache) = cache_with(CountingBackend::default());
        let mut events = cache.subscribe();

        cache.read_history().await.unwrap();
        cache.invalidate(CacheKey::History);

        assert_eq!(events.recv().await.unwrap(), CacheEvent::Updated(CacheKey::History));
        assert_eq!(events.recv().await.unwrap(), CacheEvent::Invalidated(CacheKey::History));
    }

    #[tokio::test]
    async fn test_failed_read_publishes_fetch_failed() {
        let backend = CountingBackend::default();
        backend.fail_stats.store(true, Ordering::SeqCst);
        let (_, _, cache) = cache_with(backend);
        let mut events = cache.subscribe();

        assert!(cache.read_stats().await.is_err());

        assert_eq!(events.recv().await.unwrap(), CacheEvent::FetchFailed(CacheKey::Stats));
        assert!(events.try_recv().is_err());
        assert_eq!(cache.peek_stats(), None);
    }

    #[tokio::test]
    async fn test_health_fresh_window_is_five_minutes() {
        let (backend, clock, cache) = cache_with(CountingBackend::default());

        cache.read_health().await.unwrap();
        clock.advance(Duration::from_secs(4 * 60 + 59));
        cache.read_health().await.unwrap();
        assert!(cache.is_fresh(CacheKey::Health));
        assert_eq!(backend.health_calls.load(Ordering::SeqCst), 1);

        clock.advance(Duration::from_secs(1));
        assert!(!cache.is_fresh(CacheKey::Health));
        cache.read_health().await.unwrap();
        assert_eq!(backend.health_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_focus_only_refetches_health() {
        let (backend, _, cache) = cache_with(CountingBackend::default());

        cache.read_history().await.unwrap();
        cache.read_stats().await.unwrap();
        cache.read_health().await.unwrap();

        assert_eq!(cache.on_focus_regained(), vec![CacheKey::Health]);
        assert!(cache.is_fresh(CacheKey::History));
        assert!(cache.is_fresh(CacheKey::Stats));
        assert!(!cache.is_fresh(CacheKey::Health));

        cache.read(CacheKey::Health).await.unwrap();
        assert_eq!(backend.health_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_health_monitor_checks_on_schedule() {
        let backend = Arc::new(CountingBackend::default());
        let cache = Arc::new(SyncCache::new(backend.clone()));

        let monitor = spawn_health_monitor(cache.clone());
        tokio::time::sleep(Duration::from_secs(10 * 60 + 1)).await;
        monitor.abort();

        // Immediately, at 5 minutes and at 10 minutes
        assert_eq!(backend.health_calls.load(Ordering::SeqCst), 3);
        assert!(cache.peek_health().unwrap().is_ok());
    }
}
