use std::time::Duration;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::info;

/// A randomised pause before the pipeline starts.
///
/// Nodes booting at the same moment would otherwise all query and register
/// with the discovery service at once, each seeing no one else and forming
/// their own cluster.
pub struct StartupDelay {
    max: Duration,
    rng: Mutex<StdRng>,
}

impl StartupDelay {
    /// Creates a new delay of up to `max`, seeded from the OS.
    pub fn new(max: Duration) -> Self {
        Self {
            max,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Creates a new delay with a fixed seed, producing a reproducible sequence.
    pub fn with_seed(max: Duration, seed: u64) -> Self {
        Self {
            max,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    #[inline]
    pub fn max(&self) -> Duration {
        self.max
    }

    /// Picks a duration uniformly from `[0, max]` at millisecond granularity.
    pub fn next_delay(&self) -> Duration {
        let max_ms = self.max.as_millis().min(u64::MAX as u128) as u64;
        if max_ms == 0 {
            return Duration::ZERO;
        }

        Duration::from_millis(self.rng.lock().gen_range(0..=max_ms))
    }

    /// Sleeps for a freshly picked delay, returning how long was slept.
    pub async fn wait(&self) -> Duration {
        let delay = self.next_delay();
        if delay.is_zero() {
            return delay;
        }

        info!(delay = ?delay, max = ?self.max, "Delaying startup.");
        tokio::time::sleep(delay).await;
        delay
    }
}
