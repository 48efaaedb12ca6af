//! In-flight fetch bookkeeping.
//!
//! At most one fetch runs per coordinate. Later callers join it as waiters and
//! all of them receive the same result, delivered exactly once by whichever of
//! completion, deadline expiry or cancellation reaches the entry first. The
//! others find the entry gone and do nothing.

use parking_lot::Mutex;
use std::collections::HashMap;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::types::{Coordinate, ForecastError, ForecastRecord};

pub type ForecastResult = Result<ForecastRecord, ForecastError>;

/// Identity of one fetch for one coordinate.
#[derive(Debug, Clone)]
pub struct Episode {
    pub id: u64,
    /// Passed to the fetch client; cancelled on expiry or explicit cancel.
    pub cancel: CancellationToken,
    pub deadline: Instant,
}

/// Receives the result of a pending fetch.
#[derive(Debug)]
pub struct Waiter {
    rx: oneshot::Receiver<ForecastResult>,
}

impl Waiter {
    /// Wait for the fetch to be resolved. A tracker dropped without resolving
    /// counts as cancellation.
    pub async fn wait(self) -> ForecastResult {
        self.rx.await.unwrap_or(Err(ForecastError::Cancelled))
    }
}

/// Outcome of [`PendingRequestTracker::begin`].
#[derive(Debug)]
pub struct Ticket {
    /// True when the caller created the entry and must start the fetch.
    pub is_new: bool,
    pub waiter: Waiter,
    pub episode: Episode,
}

#[derive(Debug)]
struct PendingRequest {
    started_at: Instant,
    episode: Episode,
    waiters: Vec<oneshot::Sender<ForecastResult>>,
    timer: Option<AbortHandle>,
}

#[derive(Debug, Default)]
struct TrackerState {
    pending: HashMap<Coordinate, PendingRequest>,
    next_episode: u64,
}

/// How an entry is being finished.
enum Finish {
    Resolve(ForecastResult),
    Expire,
    Cancel,
}

/// Tracks in-flight fetches per coordinate.
#[derive(Debug, Default)]
pub struct PendingRequestTracker {
    state: Mutex<TrackerState>,
}

impl PendingRequestTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start or join the fetch for `coordinate`.
    ///
    /// Only the caller that receives `is_new == true` may issue a fetch; the
    /// deadline of a joined fetch is the one set by its creator.
    pub fn begin(&self, coordinate: Coordinate, deadline: Instant) -> Ticket {
        let (tx, rx) = oneshot::channel();
        let mut state = self.state.lock();

        if let Some(pending) = state.pending.get_mut(&coordinate) {
            pending.waiters.push(tx);
            tracing::debug!(
                %coordinate,
                episode = pending.episode.id,
                waiters = pending.waiters.len(),
                "Joined in-flight forecast fetch"
            );
            return Ticket {
                is_new: false,
                waiter: Waiter { rx },
                episode: pending.episode.clone(),
            };
        }

        state.next_episode += 1;
        let episode = Episode {
            id: state.next_episode,
            cancel: CancellationToken::new(),
            deadline,
        };
        state.pending.insert(
            coordinate,
            PendingRequest {
                started_at: Instant::now(),
                episode: episode.clone(),
                waiters: vec![tx],
                timer: None,
            },
        );

        Ticket {
            is_new: true,
            waiter: Waiter { rx },
            episode,
        }
    }

    /// Remember the deadline timer so it is stopped once the entry resolves.
    /// If the episode already finished the timer is aborted right away.
    pub fn attach_timer(&self, coordinate: &Coordinate, episode_id: u64, timer: AbortHandle) {
        let mut state = self.state.lock();
        match state.pending.get_mut(coordinate) {
            Some(pending) if pending.episode.id == episode_id => pending.timer = Some(timer),
            _ => timer.abort(),
        }
    }

    /// Deliver `result` to every waiter and remove the entry.
    /// Returns false if there was nothing to resolve.
    pub fn resolve(&self, coordinate: &Coordinate, result: ForecastResult) -> bool {
        self.finish(coordinate, None, Finish::Resolve(result))
    }

    /// Like [`resolve`](Self::resolve), but only if the entry still belongs to `episode_id`.
    pub fn resolve_episode(
        &self,
        coordinate: &Coordinate,
        episode_id: u64,
        result: ForecastResult,
    ) -> bool {
        self.finish(coordinate, Some(episode_id), Finish::Resolve(result))
    }

    /// Deadline passed: cancel the fetch and fail every waiter with `Timeout`.
    pub fn expire(&self, coordinate: &Coordinate) -> bool {
        self.finish(coordinate, None, Finish::Expire)
    }

    /// Like [`expire`](Self::expire), but only if the entry still belongs to `episode_id`.
    pub fn expire_episode(&self, coordinate: &Coordinate, episode_id: u64) -> bool {
        self.finish(coordinate, Some(episode_id), Finish::Expire)
    }

    /// Caller gave up on the coordinate: cancel the fetch and fail every
    /// waiter with `Cancelled`.
    pub fn cancel(&self, coordinate: &Coordinate) -> bool {
        self.finish(coordinate, None, Finish::Cancel)
    }

    /// Cancel every pending fetch. Returns how many entries were cleared.
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<(Coordinate, PendingRequest)> =
            self.state.lock().pending.drain().collect();
        let count = drained.len();

        for (coordinate, pending) in drained {
            Self::deliver(&coordinate, pending, Finish::Cancel);
        }

        if count > 0 {
            tracing::info!("Cancelled {} pending forecast fetches", count);
        }
        count
    }

    pub fn is_pending(&self, coordinate: &Coordinate) -> bool {
        self.state.lock().pending.contains_key(coordinate)
    }

    pub fn len(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().pending.is_empty()
    }

    pub fn deadline(&self, coordinate: &Coordinate) -> Option<Instant> {
        self.state
            .lock()
            .pending
            .get(coordinate)
            .map(|p| p.episode.deadline)
    }

    pub fn waiter_count(&self, coordinate: &Coordinate) -> usize {
        self.state
            .lock()
            .pending
            .get(coordinate)
            .map_or(0, |p| p.waiters.len())
    }

    fn finish(&self, coordinate: &Coordinate, episode_id: Option<u64>, how: Finish) -> bool {
        let pending = {
            let mut state = self.state.lock();
            let owned = state
                .pending
                .get(coordinate)
                .is_some_and(|p| episode_id.map_or(true, |id| id == p.episode.id));
            if owned {
                state.pending.remove(coordinate)
            } else {
                None
            }
        };

        match pending {
            Some(pending) => {
                Self::deliver(coordinate, pending, how);
                true
            }
            None => false,
        }
    }

    /// Runs outside the lock so waking waiters never contends with `begin`.
    fn deliver(coordinate: &Coordinate, pending: PendingRequest, how: Finish) {
        if let Some(timer) = &pending.timer {
            timer.abort();
        }

        let elapsed = pending.started_at.elapsed();
        let result = match how {
            Finish::Resolve(result) => {
                tracing::debug!(
                    %coordinate,
                    episode = pending.episode.id,
                    ok = result.is_ok(),
                    ?elapsed,
                    "Resolved forecast fetch"
                );
                result
            }
            Finish::Expire => {
                pending.episode.cancel.cancel();
                tracing::warn!(
                    %coordinate,
                    episode = pending.episode.id,
                    ?elapsed,
                    "Forecast fetch timed out"
                );
                Err(ForecastError::Timeout)
            }
            Finish::Cancel => {
                pending.episode.cancel.cancel();
                tracing::info!(%coordinate, episode = pending.episode.id, "Forecast fetch cancelled");
                Err(ForecastError::Cancelled)
            }
        };

        for tx in pending.waiters {
            // receiver dropped: that caller stopped waiting
            let _ = tx.send(result.clone());
        }
    }
}
