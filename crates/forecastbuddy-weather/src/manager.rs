//! Forecast cache manager.
//!
//! Serves a stored forecast while it is fresh and otherwise refills it from
//! the weather provider, with one fetch per coordinate shared by every
//! concurrent caller. Each fetch runs on its own task under a deadline; the
//! deadline timer and the fetch race to resolve the tracker entry.

use chrono::{DateTime, FixedOffset, Local, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::freshness::{is_stale, RefreshPolicy};
use crate::hourly::assign_day_buckets;
use crate::provider::WeatherFetcher;
use crate::store::ForecastStore;
use crate::tracker::{Episode, PendingRequestTracker};
use crate::types::{Coordinate, FetchError, ForecastError, ForecastRecord, StoreError};

/// Upper bound on a single fetch deadline.
pub const MAX_FETCH_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

/// Wall-clock source used to stamp and age records.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Where a coordinate is in its refresh cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    Absent,
    Fetching,
    Fresh,
    Stale,
}

struct Inner<F> {
    store: Arc<dyn ForecastStore>,
    fetcher: F,
    tracker: PendingRequestTracker,
    clock: Arc<dyn Clock>,
    policy: RefreshPolicy,
    /// `None` follows the system timezone, DST changes included
    timezone: Option<FixedOffset>,
}

/// Builder for [`ForecastCacheManager`].
pub struct ForecastCacheManagerBuilder<F> {
    store: Arc<dyn ForecastStore>,
    fetcher: F,
    clock: Arc<dyn Clock>,
    policy: RefreshPolicy,
    timezone: Option<FixedOffset>,
}

impl<F: WeatherFetcher> ForecastCacheManagerBuilder<F> {
    pub fn policy(mut self, policy: RefreshPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Fixed timezone whose calendar days define hourly day buckets.
    /// Without one, the system timezone is consulted on every refresh.
    pub fn timezone(mut self, timezone: FixedOffset) -> Self {
        self.timezone = Some(timezone);
        self
    }

    pub fn build(self) -> ForecastCacheManager<F> {
        ForecastCacheManager {
            inner: Arc::new(Inner {
                store: self.store,
                fetcher: self.fetcher,
                tracker: PendingRequestTracker::new(),
                clock: self.clock,
                policy: self.policy,
                timezone: self.timezone,
            }),
        }
    }
}

/// Shared handle to the forecast cache. Cloning is cheap.
pub struct ForecastCacheManager<F> {
    inner: Arc<Inner<F>>,
}

impl<F> Clone for ForecastCacheManager<F> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<F: WeatherFetcher> ForecastCacheManager<F> {
    pub fn builder(store: Arc<dyn ForecastStore>, fetcher: F) -> ForecastCacheManagerBuilder<F> {
        ForecastCacheManagerBuilder {
            store,
            fetcher,
            clock: Arc::new(SystemClock),
            policy: RefreshPolicy::default(),
            timezone: None,
        }
    }

    pub fn new(store: Arc<dyn ForecastStore>, fetcher: F, policy: RefreshPolicy) -> Self {
        Self::builder(store, fetcher).policy(policy).build()
    }

    pub fn policy(&self) -> RefreshPolicy {
        self.inner.policy
    }

    pub fn tracker(&self) -> &PendingRequestTracker {
        &self.inner.tracker
    }

    /// [`get_or_refresh`](Self::get_or_refresh) with the configured policy.
    pub async fn get(&self, coordinate: Coordinate) -> Result<ForecastRecord, ForecastError> {
        let policy = self.inner.policy;
        self.get_or_refresh(coordinate, policy.ttl, policy.timeout)
            .await
    }

    /// Return the stored forecast if younger than `ttl`, otherwise fetch it.
    ///
    /// Concurrent calls for a coordinate share one fetch. A failed fetch
    /// leaves any stored record untouched. When the fetch succeeds but the
    /// store write fails, the caller that started the fetch receives
    /// [`ForecastError::StoreWriteFailed`] carrying the new record, while
    /// joined callers receive the record itself. A `timeout` longer than
    /// [`MAX_FETCH_TIMEOUT`] is clamped to it.
    pub async fn get_or_refresh(
        &self,
        coordinate: Coordinate,
        ttl: Duration,
        timeout: Duration,
    ) -> Result<ForecastRecord, ForecastError> {
        let now = self.inner.clock.now();
        match load(&self.inner.store, coordinate).await {
            Ok(Some(record)) if !is_stale(&record, now, ttl) => {
                tracing::debug!(%coordinate, "Serving fresh forecast from store");
                return Ok(record);
            }
            Ok(Some(_)) => tracing::debug!(%coordinate, "Stored forecast is stale"),
            Ok(None) => tracing::debug!(%coordinate, "No stored forecast"),
            Err(e) => tracing::warn!(%coordinate, "Forecast store read failed, refetching: {}", e),
        }

        let deadline = Instant::now() + timeout.min(MAX_FETCH_TIMEOUT);
        let ticket = self.inner.tracker.begin(coordinate, deadline);
        if !ticket.is_new {
            return ticket.waiter.wait().await;
        }

        let episode = ticket.episode;
        let timer = {
            let inner = Arc::clone(&self.inner);
            let episode_id = episode.id;
            tokio::spawn(async move {
                tokio::time::sleep_until(deadline).await;
                inner.tracker.expire_episode(&coordinate, episode_id);
            })
        };
        self.inner
            .tracker
            .attach_timer(&coordinate, episode.id, timer.abort_handle());

        // An earlier fetch may have stored a record between our read and `begin`
        if let Ok(Some(record)) = load(&self.inner.store, coordinate).await {
            if !is_stale(&record, self.inner.clock.now(), ttl) {
                tracing::debug!(%coordinate, "Forecast already refreshed by an earlier fetch");
                self.inner
                    .tracker
                    .resolve_episode(&coordinate, episode.id, Ok(record));
                return ticket.waiter.wait().await;
            }
        }

        let fetch = tokio::spawn(refresh(Arc::clone(&self.inner), coordinate, episode));

        let record = ticket.waiter.wait().await?;
        match fetch.await {
            Ok(Some(store_error)) => Err(ForecastError::StoreWriteFailed {
                reason: store_error.to_string(),
                record: Box::new(record),
            }),
            Ok(None) => Ok(record),
            Err(e) => {
                tracing::error!(%coordinate, "Forecast fetch task failed: {}", e);
                Ok(record)
            }
        }
    }

    /// Stop the in-flight fetch for `coordinate`, if any. Its waiters receive
    /// [`ForecastError::Cancelled`].
    pub fn cancel(&self, coordinate: &Coordinate) -> bool {
        self.inner.tracker.cancel(coordinate)
    }

    /// Stop every in-flight fetch, e.g. when the owning view goes away.
    pub fn cancel_all(&self) -> usize {
        self.inner.tracker.cancel_all()
    }

    /// Drop pins: cancel their fetches and delete their stored forecasts.
    pub async fn remove_pins(&self, coordinates: &[Coordinate]) -> Result<(), StoreError> {
        for coordinate in coordinates {
            self.inner.tracker.cancel(coordinate);
        }

        let store = Arc::clone(&self.inner.store);
        let coordinates = coordinates.to_vec();
        let count = coordinates.len();
        tokio::task::spawn_blocking(move || store.delete(&coordinates))
            .await
            .map_err(|e| StoreError::WriteFailed(e.to_string()))??;

        tracing::info!("Removed {} pins", count);
        Ok(())
    }

    /// Stored forecast regardless of age.
    pub async fn cached(&self, coordinate: Coordinate) -> Result<Option<ForecastRecord>, StoreError> {
        load(&self.inner.store, coordinate).await
    }

    /// Every stored forecast regardless of age.
    pub async fn cached_all(&self) -> Result<Vec<ForecastRecord>, StoreError> {
        let store = Arc::clone(&self.inner.store);
        tokio::task::spawn_blocking(move || store.list())
            .await
            .map_err(|e| StoreError::ReadFailed(e.to_string()))?
    }

    /// Current state of `coordinate` under the configured TTL.
    pub async fn state(&self, coordinate: Coordinate) -> Result<EntryState, StoreError> {
        if self.inner.tracker.is_pending(&coordinate) {
            return Ok(EntryState::Fetching);
        }

        let now = self.inner.clock.now();
        Ok(match load(&self.inner.store, coordinate).await? {
            None => EntryState::Absent,
            Some(record) if is_stale(&record, now, self.inner.policy.ttl) => EntryState::Stale,
            Some(_) => EntryState::Fresh,
        })
    }
}

async fn load(
    store: &Arc<dyn ForecastStore>,
    coordinate: Coordinate,
) -> Result<Option<ForecastRecord>, StoreError> {
    let store = Arc::clone(store);
    tokio::task::spawn_blocking(move || store.get(&coordinate))
        .await
        .map_err(|e| StoreError::ReadFailed(e.to_string()))?
}

/// Fetch, persist and resolve one episode. Returns the store error, if any,
/// for the caller that started the fetch.
async fn refresh<F: WeatherFetcher>(
    inner: Arc<Inner<F>>,
    coordinate: Coordinate,
    episode: Episode,
) -> Option<StoreError> {
    tracing::info!(%coordinate, episode = episode.id, "Fetching forecast");

    let current = inner
        .fetcher
        .fetch_current(coordinate, episode.cancel.clone());
    let five_day = async {
        Ok::<_, FetchError>(
            inner
                .fetcher
                .fetch_five_day(coordinate, episode.cancel.clone())
                .await,
        )
    };

    let (current, five_day) = match tokio::try_join!(current, five_day) {
        Ok(results) => results,
        Err(e) => {
            tracing::info!(%coordinate, "Forecast fetch failed: {}", e);
            inner
                .tracker
                .resolve_episode(&coordinate, episode.id, Err(e.into()));
            return None;
        }
    };

    let hourly = match five_day {
        Ok(entries) => Some(match inner.timezone {
            Some(tz) => assign_day_buckets(entries, &tz),
            None => assign_day_buckets(entries, &Local),
        }),
        Err(FetchError::Cancelled) => {
            inner
                .tracker
                .resolve_episode(&coordinate, episode.id, Err(FetchError::Cancelled.into()));
            return None;
        }
        Err(e) => {
            tracing::warn!(%coordinate, "Five-day forecast unavailable, keeping current only: {}", e);
            None
        }
    };

    // Expired or cancelled while the response was in flight
    if episode.cancel.is_cancelled() {
        return None;
    }

    let record = ForecastRecord {
        coordinate,
        fetched_at: inner.clock.now(),
        current_condition_icon: current.icon,
        current_condition_temp_kelvin: current.temp_kelvin,
        hourly,
    };

    let store = Arc::clone(&inner.store);
    let to_store = record.clone();
    let store_error = match tokio::task::spawn_blocking(move || store.put(&to_store)).await {
        Ok(Ok(())) => None,
        Ok(Err(e)) => Some(e),
        Err(e) => Some(StoreError::WriteFailed(e.to_string())),
    };
    if let Some(e) = &store_error {
        tracing::warn!(%coordinate, "Failed to persist forecast: {}", e);
    }

    if inner
        .tracker
        .resolve_episode(&coordinate, episode.id, Ok(record))
    {
        tracing::info!(%coordinate, episode = episode.id, "Forecast refreshed");
    }
    store_error
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryForecastStore;
    use crate::types::{CurrentConditions, ProviderHourly};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio_util::sync::CancellationToken;

    /// Fetcher that answers after `delay` and counts current-condition calls.
    /// An empty `hours` makes the five-day call fail.
    struct CountingFetcher {
        calls: Arc<AtomicUsize>,
        delay: Duration,
        hours: Vec<ProviderHourly>,
    }

    impl WeatherFetcher for CountingFetcher {
        async fn fetch_current(
            &self,
            _coordinate: Coordinate,
            cancel: CancellationToken,
        ) -> Result<CurrentConditions, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            crate::provider::cancellable(&cancel, async {
                tokio::time::sleep(self.delay).await;
                Ok(CurrentConditions {
                    icon: "01d".into(),
                    temp_kelvin: 290.0,
                })
            })
            .await
        }

        async fn fetch_five_day(
            &self,
            _coordinate: Coordinate,
            _cancel: CancellationToken,
        ) -> Result<Vec<ProviderHourly>, FetchError> {
            if self.hours.is_empty() {
                return Err(FetchError::InvalidResponse("no forecast".into()));
            }
            Ok(self.hours.clone())
        }
    }

    fn manager(delay: Duration) -> (ForecastCacheManager<CountingFetcher>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let fetcher = CountingFetcher {
            calls: Arc::clone(&calls),
            delay,
            hours: Vec::new(),
        };
        let manager = ForecastCacheManager::builder(Arc::new(MemoryForecastStore::new()), fetcher)
            .timezone(FixedOffset::east_opt(0).unwrap())
            .build();
        (manager, calls)
    }

    #[tokio::test(start_paused = true)]
    async fn test_five_day_failure_keeps_current_conditions() {
        let (manager, calls) = manager(Duration::from_millis(10));
        let chico = Coordinate::new(39.73, -121.84);

        let record = manager.get(chico).await.unwrap();
        assert_eq!(record.current_condition_icon, "01d");
        assert!(record.hourly.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(manager.state(chico).await.unwrap(), EntryState::Fresh);
    }

    #[tokio::test(start_paused = true)]
    async fn test_state_while_fetching() {
        let (manager, _) = manager(Duration::from_secs(2));
        let chico = Coordinate::new(39.73, -121.84);
        assert_eq!(manager.state(chico).await.unwrap(), EntryState::Absent);

        let background = manager.clone();
        let handle = tokio::spawn(async move { background.get(chico).await });
        tokio::time::sleep(Duration::from_millis(500)).await;

        assert_eq!(manager.state(chico).await.unwrap(), EntryState::Fetching);
        assert!(handle.await.unwrap().is_ok());
        assert!(manager.tracker().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_timeout_is_clamped() {
        let (manager, calls) = manager(Duration::from_millis(10));
        let chico = Coordinate::new(39.73, -121.84);

        let record = manager
            .get_or_refresh(chico, Duration::from_secs(60), Duration::from_secs(u64::MAX))
            .await
            .unwrap();
        assert_eq!(record.current_condition_icon, "01d");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_timeout_deadline() {
        let (manager, _) = manager(Duration::from_secs(5));
        let chico = Coordinate::new(39.73, -121.84);
        let started = Instant::now();

        let background = manager.clone();
        let handle = tokio::spawn(async move {
            background
                .get_or_refresh(chico, Duration::ZERO, Duration::MAX)
                .await
        });
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(
            manager.tracker().deadline(&chico),
            Some(started + MAX_FETCH_TIMEOUT)
        );
        assert!(handle.await.unwrap().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_timezone_follows_system_clock() {
        let calls = Arc::new(AtomicUsize::new(0));
        let start = Utc::now();
        let hours: Vec<ProviderHourly> = (0..16)
            .map(|i| ProviderHourly {
                timestamp: start + chrono::Duration::hours(3 * i),
                icon: "04d".into(),
                temp_kelvin: 283.0,
                description: "broken clouds".into(),
            })
            .collect();
        let fetcher = CountingFetcher {
            calls,
            delay: Duration::from_millis(10),
            hours: hours.clone(),
        };
        let manager =
            ForecastCacheManager::builder(Arc::new(MemoryForecastStore::new()), fetcher).build();
        assert!(manager.inner.timezone.is_none());

        let record = manager.get(Coordinate::new(39.73, -121.84)).await.unwrap();
        assert_eq!(record.hourly, Some(assign_day_buckets(hours, &Local)));
    }
}
