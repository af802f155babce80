// Jaskier Shared Pattern — clock
// Injectable clock/sleeper so tests can advance time deterministically
// instead of waiting on real sleeps (spec §9 Design Notes).

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Abstraction over "what time is it" and "suspend for a while".
/// Production code uses `SystemClock`; tests use `FakeClock`.
#[async_trait::async_trait]
pub trait Clock: Send + Sync {
    /// Monotonic-ish timestamp in seconds, used for cooldown bookkeeping.
    fn now_secs(&self) -> i64;

    /// Wall-clock UTC timestamp, used for persisted timestamps.
    fn now_utc(&self) -> chrono::DateTime<chrono::Utc>;

    async fn sleep(&self, dur: Duration);
}

#[derive(Clone, Default)]
pub struct SystemClock;

#[async_trait::async_trait]
impl Clock for SystemClock {
    fn now_secs(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }

    fn now_utc(&self) -> chrono::DateTime<chrono::Utc> {
        chrono::Utc::now()
    }

    async fn sleep(&self, dur: Duration) {
        tokio::time::sleep(dur).await;
    }
}

/// Deterministic clock for tests. `now_secs` advances only when `advance()`
/// is called or when `sleep()` is awaited (which fast-forwards instead of
/// actually waiting).
#[derive(Clone)]
pub struct FakeClock {
    secs: Arc<AtomicI64>,
    sleeps: Arc<std::sync::Mutex<Vec<Duration>>>,
}

impl FakeClock {
    pub fn new(start_secs: i64) -> Self {
        Self {
            secs: Arc::new(AtomicI64::new(start_secs)),
            sleeps: Arc::new(std::sync::Mutex::new(Vec::new())),
        }
    }

    pub fn advance(&self, dur: Duration) {
        self.secs.fetch_add(dur.as_secs() as i64, Ordering::SeqCst);
    }

    /// Durations passed to `sleep()` so far, in call order.
    pub fn recorded_sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().expect("fake clock mutex poisoned").clone()
    }
}

#[async_trait::async_trait]
impl Clock for FakeClock {
    fn now_secs(&self) -> i64 {
        self.secs.load(Ordering::SeqCst)
    }

    fn now_utc(&self) -> chrono::DateTime<chrono::Utc> {
        chrono::DateTime::from_timestamp(self.now_secs(), 0).unwrap_or_default()
    }

    async fn sleep(&self, dur: Duration) {
        self.sleeps.lock().expect("fake clock mutex poisoned").push(dur);
        self.advance(dur);
        // Yield once so callers relying on task scheduling still observe
        // suspension points without actually stalling the test.
        tokio::task::yield_now().await;
    }
}

pub type SharedClock = Arc<dyn Clock>;
