//! Tile load coordination.
//!
//! The loader sits between consumers and the decoder. It turns cache misses
//! into decodes, making sure each tile is decoded at most once at a time no
//! matter how many consumers ask for it.
//!
//! # Request flow
//!
//! ```text
//! request(coord)
//!   │
//!   ├─ outside geometry ─────────────▶ Err(InvalidLayer | TileOutOfBounds)
//!   ├─ cache hit ────────────────────▶ Ready(buffer)
//!   ├─ decode in flight ─────────────▶ Pending(attach to it)
//!   ├─ recently failed ──────────────▶ Err(BackedOff)
//!   ├─ not admitted ─────────────────▶ Rejected
//!   └─ schedule decode ──────────────▶ Pending(new)
//!                │
//!                ▼ (worker task, bounded by a semaphore)
//!         decoder.decode(coord)
//!                │
//!                ├─ Ok  → insert into cache, notify, resolve pending handles
//!                └─ Err → record failure, resolve pending handles with error
//! ```
//!
//! `request` never waits: scheduling happens under a short mutex section and
//! the decode runs on the runtime captured at construction. Dropping a
//! [`PendingTile`] does not cancel the decode; the tile still lands in the
//! cache.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::runtime::Handle;
use tokio::sync::{Notify, Semaphore};
use tracing::{debug, warn};

use crate::buffer::{Buffer, SharedBuffer};
use crate::decode::TileDecoder;
use crate::error::{DecodeError, TileError};

use super::backoff::{BackoffPolicy, FailureTracker};
use super::cache::TileCache;
use super::coord::{Extent, TileCoord};
use super::notify::TileNotifier;

/// Fallback worker count when the available parallelism is unknown.
const FALLBACK_DECODE_WORKERS: usize = 4;

// =============================================================================
// Configuration
// =============================================================================

/// Tunables for a [`TileLoader`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoaderConfig {
    /// Maximum decodes running at once
    pub max_concurrent_decodes: usize,

    /// Back-off applied to tiles whose decode failed
    pub backoff: BackoffPolicy,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(FALLBACK_DECODE_WORKERS);
        Self {
            max_concurrent_decodes: workers,
            backoff: BackoffPolicy::default(),
        }
    }
}

impl LoaderConfig {
    pub fn with_max_concurrent_decodes(mut self, workers: usize) -> Self {
        self.max_concurrent_decodes = workers.max(1);
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }
}

// =============================================================================
// Request Outcome
// =============================================================================

/// Result of a non-blocking tile request.
#[derive(Debug, Clone)]
pub enum RequestOutcome {
    /// The tile was cached
    Ready(SharedBuffer),

    /// A decode is running; await the handle or watch the notifier
    Pending(PendingTile),

    /// The tile is too far from the active resolution to be worth decoding
    Rejected,
}

impl RequestOutcome {
    pub fn is_ready(&self) -> bool {
        matches!(self, RequestOutcome::Ready(_))
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, RequestOutcome::Pending(_))
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, RequestOutcome::Rejected)
    }
}

/// State shared between a running decode and everyone waiting on it.
struct InFlightState {
    notify: Notify,
    result: Mutex<Option<Result<SharedBuffer, TileError>>>,
}

impl InFlightState {
    fn new() -> Self {
        Self {
            notify: Notify::new(),
            result: Mutex::new(None),
        }
    }

    /// Store the outcome and wake waiters. Only the first outcome sticks.
    fn resolve(&self, outcome: Result<SharedBuffer, TileError>) {
        {
            let mut result = self.result.lock().unwrap_or_else(PoisonError::into_inner);
            if result.is_none() {
                *result = Some(outcome);
            }
        }
        self.notify.notify_waiters();
    }

    fn outcome(&self) -> Option<Result<SharedBuffer, TileError>> {
        self.result
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Handle on an in-flight decode.
///
/// Cloning is cheap; every clone resolves with the same outcome.
#[derive(Clone)]
pub struct PendingTile {
    coord: TileCoord,
    state: Arc<InFlightState>,
}

impl PendingTile {
    pub fn coord(&self) -> TileCoord {
        self.coord
    }

    /// Whether the decode has finished.
    pub fn is_ready(&self) -> bool {
        self.state.outcome().is_some()
    }

    /// Wait for the decode to finish.
    pub async fn wait(&self) -> Result<SharedBuffer, TileError> {
        loop {
            let notified = self.state.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(outcome) = self.state.outcome() {
                return outcome;
            }
            notified.await;
        }
    }
}

impl fmt::Debug for PendingTile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingTile")
            .field("coord", &self.coord)
            .field("ready", &self.is_ready())
            .finish()
    }
}

// =============================================================================
// Tile Loader
// =============================================================================

/// Deduplicating, concurrency-bounded tile loader.
///
/// Cloning shares the same in-flight set, cache and worker pool.
pub struct TileLoader<D> {
    inner: Arc<LoaderInner<D>>,
}

struct LoaderInner<D> {
    extent: Arc<Extent>,
    cache: Arc<TileCache>,
    decoder: D,
    notifier: Arc<TileNotifier>,

    /// Lock order: `in_flight` before the cache's lock
    in_flight: Mutex<HashMap<TileCoord, Arc<InFlightState>>>,

    workers: Semaphore,
    max_concurrent_decodes: usize,
    failures: FailureTracker,
    runtime: Handle,
    decodes: AtomicU64,
}

impl<D> Clone for TileLoader<D> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<D: TileDecoder> TileLoader<D> {
    /// Create a loader that spawns decodes on `runtime`.
    pub fn new(
        extent: Arc<Extent>,
        cache: Arc<TileCache>,
        decoder: D,
        notifier: Arc<TileNotifier>,
        config: LoaderConfig,
        runtime: Handle,
    ) -> Self {
        let workers = config.max_concurrent_decodes.max(1);
        Self {
            inner: Arc::new(LoaderInner {
                extent,
                cache,
                decoder,
                notifier,
                in_flight: Mutex::new(HashMap::new()),
                workers: Semaphore::new(workers),
                max_concurrent_decodes: workers,
                failures: FailureTracker::new(config.backoff),
                runtime,
                decodes: AtomicU64::new(0),
            }),
        }
    }

    /// Ask for a tile without waiting for it.
    pub fn request(&self, coord: TileCoord) -> Result<RequestOutcome, TileError> {
        let inner = &self.inner;
        inner.extent.check(coord)?;

        // Fast path
        if let Some(buffer) = inner.cache.lookup(coord) {
            return Ok(RequestOutcome::Ready(buffer));
        }

        let mut in_flight = inner.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(state) = in_flight.get(&coord) {
            return Ok(RequestOutcome::Pending(PendingTile {
                coord,
                state: state.clone(),
            }));
        }

        // A decode may have completed between the lookup and taking the lock
        if let Some(buffer) = inner.cache.peek(coord) {
            return Ok(RequestOutcome::Ready(buffer));
        }

        if let Some(backoff) = inner.failures.check(coord) {
            return Err(TileError::BackedOff {
                coord,
                failures: backoff.failures,
                retry_in: backoff.retry_in,
                source: backoff.cause,
            });
        }

        if !inner.cache.admit(coord) {
            debug!(
                tile = %coord,
                active_layer = ?inner.cache.high_resolution_layer(),
                "Tile rejected by admission filter"
            );
            return Ok(RequestOutcome::Rejected);
        }

        let state = Arc::new(InFlightState::new());
        in_flight.insert(coord, state.clone());
        drop(in_flight);

        self.spawn_decode(coord, state.clone());
        Ok(RequestOutcome::Pending(PendingTile { coord, state }))
    }

    /// Request a tile and wait for it.
    ///
    /// Returns `Ok(None)` when the admission filter rejects the tile.
    pub async fn load(&self, coord: TileCoord) -> Result<Option<SharedBuffer>, TileError> {
        match self.request(coord)? {
            RequestOutcome::Ready(buffer) => Ok(Some(buffer)),
            RequestOutcome::Pending(pending) => pending.wait().await.map(Some),
            RequestOutcome::Rejected => Ok(None),
        }
    }

    fn spawn_decode(&self, coord: TileCoord, state: Arc<InFlightState>) {
        // Built outside the task so it also fires if the task is never polled
        let guard = CompletionGuard {
            inner: self.inner.clone(),
            coord,
            state,
            finished: false,
        };
        let inner = self.inner.clone();
        self.inner.runtime.spawn(async move {
            let result = inner.run_decode(coord).await;
            guard.finish(result);
        });
    }

    pub fn extent(&self) -> &Arc<Extent> {
        &self.inner.extent
    }

    pub fn cache(&self) -> &Arc<TileCache> {
        &self.inner.cache
    }

    pub fn notifier(&self) -> &Arc<TileNotifier> {
        &self.inner.notifier
    }

    pub fn decoder(&self) -> &D {
        &self.inner.decoder
    }

    /// Number of tiles currently being decoded or waiting for a worker.
    pub fn in_flight_count(&self) -> usize {
        self.inner
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Decodes started since the loader was created.
    pub fn decode_count(&self) -> u64 {
        self.inner.decodes.load(Ordering::Relaxed)
    }

    pub fn max_concurrent_decodes(&self) -> usize {
        self.inner.max_concurrent_decodes
    }

    /// Number of tiles with a recorded decode failure.
    pub fn failing_tiles(&self) -> usize {
        self.inner.failures.len()
    }
}

impl<D: TileDecoder> LoaderInner<D> {
    async fn run_decode(self: Arc<Self>, coord: TileCoord) -> Result<Buffer, DecodeError> {
        let _permit = self
            .workers
            .acquire()
            .await
            .map_err(|_| DecodeError::Worker("decode pool closed".to_string()))?;
        self.decodes.fetch_add(1, Ordering::Relaxed);
        debug!(tile = %coord, "Decoding tile");

        // Run in its own task so a panicking decoder surfaces as an error
        let inner = Arc::clone(&self);
        let handle = self
            .runtime
            .spawn(async move { inner.decoder.decode(coord, &inner.extent).await });
        match handle.await {
            Ok(result) => result,
            Err(e) => Err(DecodeError::Worker(e.to_string())),
        }
    }

    fn complete(
        &self,
        coord: TileCoord,
        state: &InFlightState,
        result: Result<Buffer, DecodeError>,
    ) {
        let outcome = match result {
            Ok(buffer) => {
                let buffer = buffer.into_shared();
                let evicted = {
                    let mut in_flight =
                        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
                    let evicted = self.cache.insert(coord, buffer.clone());
                    in_flight.remove(&coord);
                    evicted
                };
                self.failures.record_success(coord);

                debug!(
                    tile = %coord,
                    bytes = buffer.size(),
                    evicted = evicted.len(),
                    "Tile cached"
                );
                self.notifier.notify();
                Ok(buffer)
            }
            Err(err) => {
                let source = Arc::new(err);
                let failures = self.failures.record_failure(coord, source.clone());
                self.in_flight
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(&coord);

                warn!(
                    tile = %coord,
                    failures = failures,
                    retry_in = ?self.failures.policy().delay(failures),
                    "Tile decode failed: {}",
                    source
                );
                Err(TileError::DecodeFailure { coord, source })
            }
        };
        state.resolve(outcome);
    }
}

/// Resolves a decode's waiters even if its task is dropped before finishing.
struct CompletionGuard<D: TileDecoder> {
    inner: Arc<LoaderInner<D>>,
    coord: TileCoord,
    state: Arc<InFlightState>,
    finished: bool,
}

impl<D: TileDecoder> CompletionGuard<D> {
    fn finish(mut self, result: Result<Buffer, DecodeError>) {
        self.finished = true;
        self.inner.complete(self.coord, &self.state, result);
    }
}

impl<D: TileDecoder> Drop for CompletionGuard<D> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        {
            let mut in_flight = self
                .inner
                .in_flight
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if in_flight
                .get(&self.coord)
                .is_some_and(|state| Arc::ptr_eq(state, &self.state))
            {
                in_flight.remove(&self.coord);
            }
        }
        warn!(tile = %self.coord, "Tile load abandoned before completion");
        self.state
            .resolve(Err(TileError::Abandoned { coord: self.coord }));
    }
}

// =============================================================================
// Tests
// =============================================================================
