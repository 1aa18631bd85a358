//! Sleep abstraction for testable polling loops
//!
//! Production code uses `TokioSleeper` which delegates to `tokio::time::sleep`.
//! Tests use `MockSleeper` to record sleeps without waiting.

use async_trait::async_trait;
use std::time::Duration;

/// Trait for suspending between polls
///
/// Injected via `Context` so tests do not wait on real timers.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Production sleeper that delegates to `tokio::time::sleep`
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Mock sleeper that returns immediately and records every request
#[cfg(test)]
#[allow(clippy::expect_used)]
#[derive(Default)]
pub struct MockSleeper {
    slept: std::sync::Mutex<Vec<Duration>>,
}

#[cfg(test)]
#[allow(clippy::expect_used)]
impl MockSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.slept.lock().expect("MockSleeper lock poisoned").clone()
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
#[async_trait]
impl Sleeper for MockSleeper {
    async fn sleep(&self, duration: Duration) {
        self.slept
            .lock()
            .expect("MockSleeper lock poisoned")
            .push(duration);
    }
}
