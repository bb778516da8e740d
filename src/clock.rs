//! Monotonic wall-clock abstraction.
//!
//! `Clock::now()` backs both timestamp validation (the ±1h tolerance in
//! `ingest`) and `created_at` stamping. Injecting it keeps both paths
//! testable without sleeping real time.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Source of the current time, in milliseconds since the Unix epoch.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

/// Real wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before unix epoch")
            .as_millis() as i64
    }
}

pub type SharedClock = Arc<dyn Clock>;

/// A hand-advanceable clock for tests. Not behind `#[cfg(test)]` so
/// integration tests under `tests/` (compiled as a separate crate) can
/// use it too.
pub mod test_support {
    use super::Clock;
    use std::sync::atomic::{AtomicI64, Ordering};

    /// A clock the test can advance by hand.
    #[derive(Debug, Default)]
    pub struct FixedClock(AtomicI64);

    impl FixedClock {
        pub fn new(now_ms: i64) -> Self {
            Self(AtomicI64::new(now_ms))
        }

        pub fn set(&self, now_ms: i64) {
            self.0.store(now_ms, Ordering::SeqCst);
        }

        pub fn advance(&self, delta_ms: i64) {
            self.0.fetch_add(delta_ms, Ordering::SeqCst);
        }
    }

    impl Clock for FixedClock {
        fn now_ms(&self) -> i64 {
            self.0.load(Ordering::SeqCst)
        }
    }
}
