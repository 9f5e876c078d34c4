//! Monotonic time source, abstracted behind a trait so tests can control
//! deadlines without real sleeps. Grounded in the teacher's `Timebase`
//! abstraction used by its timer service.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

/// Abstract clock used everywhere a deadline or "now" is needed.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock implementation.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A manually-advanced clock for deterministic tests of timeout and expiry
/// behavior (no real `tokio::time::sleep`, no flakiness from wall-clock
/// scheduling jitter).
#[derive(Debug, Clone)]
pub struct FakeClock {
    inner: Arc<parking_lot::RwLock<DateTime<Utc>>>,
}

impl FakeClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            inner: Arc::new(parking_lot::RwLock::new(start)),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut guard = self.inner.write();
        *guard += chrono::Duration::from_std(by).expect("duration fits in chrono::Duration");
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.inner.write() = to;
    }
}

impl Clock for FakeClock {
    fn now(&self) -> DateTime<Utc> {
        *self.inner.read()
    }
}
