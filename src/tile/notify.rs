//! Broadcast wake-ups for newly cached tiles.

use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::Notify;

/// Broadcast signal fired every time a tile is installed in the cache.
///
/// Wake-ups are not tied to a coordinate: after waking, a consumer must
/// re-check the tiles it is interested in. A generation counter makes waiting
/// race-free: pass the generation observed before checking the cache to
/// [`wait_past`](Self::wait_past), and an insertion that happened in between
/// is not missed.
///
/// ```
/// use wsi_tile_cache::tile::TileNotifier;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let notifier = TileNotifier::new();
/// let seen = notifier.generation();
/// notifier.notify();
/// // Returns immediately: a tile arrived after `seen`
/// assert_eq!(notifier.wait_past(seen).await, seen + 1);
/// # }
/// ```
#[derive(Debug, Default)]
pub struct TileNotifier {
    notify: Notify,
    generation: AtomicU64,
}

impl TileNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of notifications fired so far.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Wake every current waiter.
    pub fn notify(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.notify.notify_waiters();
    }

    /// Wait until the generation moves past `seen`; returns the new generation.
    pub async fn wait_past(&self, seen: u64) -> u64 {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let current = self.generation();
            if current > seen {
                return current;
            }
            notified.await;
        }
    }

    /// Wait for the next notification after now.
    pub async fn notified(&self) -> u64 {
        let seen = self.generation();
        self.wait_past(seen).await
    }
}
