//! Clock seam for bounded polling loops
//!
//! The health wait sleeps through this trait so tests can fast-forward
//! instead of sleeping in real time.

use async_trait::async_trait;
use std::time::{Duration, Instant};

/// Time source and sleeper for polling loops
#[async_trait]
pub trait Clock: Send + Sync {
    /// The current instant
    fn now(&self) -> Instant;

    /// Suspend for the given duration
    async fn sleep(&self, duration: Duration);
}

/// Wall-clock implementation
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    /// Create a new system clock
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        async_io::Timer::after(duration).await;
    }
}

/// Manually advanced clock for tests
#[cfg(any(test, feature = "test-utils"))]
pub mod manual {
    use super::Clock;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::{Duration, Instant};

    /// A clock whose `sleep` advances simulated time instantly
    pub struct ManualClock {
        start: Instant,
        elapsed: Mutex<Duration>,
    }

    impl ManualClock {
        /// Create a clock at simulated time zero
        pub fn new() -> Self {
            Self {
                start: Instant::now(),
                elapsed: Mutex::new(Duration::ZERO),
            }
        }

        /// The total simulated time slept so far
        pub fn slept(&self) -> Duration {
            *self.elapsed.lock().unwrap()
        }
    }

    impl Default for ManualClock {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl Clock for ManualClock {
        fn now(&self) -> Instant {
            self.start + *self.elapsed.lock().unwrap()
        }

        async fn sleep(&self, duration: Duration) {
            *self.elapsed.lock().unwrap() += duration;
        }
    }
}

#[cfg(any(test, feature = "test-utils"))]
pub use manual::ManualClock;
