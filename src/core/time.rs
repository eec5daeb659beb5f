use std::time::{Duration, Instant};

/// Clock abstraction to enforce deterministic time sourcing in dispatch paths.
pub trait Clock: Clone + Send + Sync + 'static {
    fn now(&self) -> Instant;
    fn sleep(&self, duration: Duration) -> tokio::time::Sleep;

    /// Sleep until `deadline`; returns immediately when it already passed.
    fn sleep_until(&self, deadline: Instant) -> tokio::time::Sleep {
        self.sleep(deadline.saturating_duration_since(self.now()))
    }
}

/// Tokio-backed clock; follows `tokio::time::pause` so retry delays can be driven in tests.
#[derive(Clone, Default, Debug)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        tokio::time::Instant::now().into_std()
    }

    fn sleep(&self, duration: Duration) -> tokio::time::Sleep {
        tokio::time::sleep(duration)
    }
}

/// Milliseconds elapsed between two marks, saturating at zero.
pub fn elapsed_ms(from: Instant, to: Instant) -> u64 {
    to.saturating_duration_since(from).as_millis() as u64
}
