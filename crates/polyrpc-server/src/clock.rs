//! Injectable time source.
//!
//! All timing in the engine (request start stamps, durations, handler
//! sleeps, log timestamps) goes through [`Clock`] so tests can drive time
//! manually instead of racing the wall clock.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Abstract source of "now", elapsed time, and delays.
#[async_trait]
pub trait Clock: Send + Sync {
    /// Current wall-clock time
    fn now(&self) -> DateTime<Utc>;

    /// Monotonic reading for measuring elapsed time; unaffected by
    /// wall-clock adjustments
    fn instant(&self) -> Instant;

    /// Time elapsed since `earlier`
    fn since(&self, earlier: DateTime<Utc>) -> ChronoDuration;

    /// Suspend the calling task for at least `duration`
    async fn sleep(&self, duration: Duration);

    /// Wait for at least `duration`, then report the time it elapsed at
    async fn after(&self, duration: Duration) -> DateTime<Utc>;
}

/// Production clock backed by the system time and the tokio timer.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn instant(&self) -> Instant {
        Instant::now()
    }

    fn since(&self, earlier: DateTime<Utc>) -> ChronoDuration {
        Utc::now() - earlier
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    async fn after(&self, duration: Duration) -> DateTime<Utc> {
        tokio::time::sleep(duration).await;
        Utc::now()
    }
}

/// Test clock with manually controlled time.
///
/// `sleep` records the requested duration and advances the clock without
/// suspending, so timing-dependent paths run deterministically. The
/// monotonic reading tracks the mock time, so durations measured through
/// `instant` advance with it.
#[derive(Debug)]
pub struct MockClock {
    state: Mutex<MockState>,
}

#[derive(Debug)]
struct MockState {
    origin: DateTime<Utc>,
    current: DateTime<Utc>,
    base: Instant,
    sleeps: Vec<Duration>,
}

impl MockClock {
    pub fn new(initial: DateTime<Utc>) -> Self {
        Self {
            state: Mutex::new(MockState {
                origin: initial,
                current: initial,
                base: Instant::now(),
                sleeps: Vec::new(),
            }),
        }
    }

    /// Advance the clock by `duration`
    pub fn advance(&self, duration: Duration) {
        let mut state = self.state.lock().unwrap();
        state.current += ChronoDuration::from_std(duration).unwrap_or_default();
    }

    /// Set the clock to an absolute time
    pub fn set(&self, time: DateTime<Utc>) {
        self.state.lock().unwrap().current = time;
    }

    /// All durations passed to `sleep`, in call order
    pub fn sleep_calls(&self) -> Vec<Duration> {
        self.state.lock().unwrap().sleeps.clone()
    }
}

#[async_trait]
impl Clock for MockClock {
    fn now(&self) -> DateTime<Utc> {
        self.state.lock().unwrap().current
    }

    fn instant(&self) -> Instant {
        let state = self.state.lock().unwrap();
        let elapsed = (state.current - state.origin).to_std().unwrap_or_default();
        state.base + elapsed
    }

    fn since(&self, earlier: DateTime<Utc>) -> ChronoDuration {
        self.now() - earlier
    }

    async fn sleep(&self, duration: Duration) {
        let mut state = self.state.lock().unwrap();
        state.sleeps.push(duration);
        state.current += ChronoDuration::from_std(duration).unwrap_or_default();
    }

    async fn after(&self, duration: Duration) -> DateTime<Utc> {
        let mut state = self.state.lock().unwrap();
        state.current += ChronoDuration::from_std(duration).unwrap_or_default();
        state.current
    }
}
