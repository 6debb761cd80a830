//! Shared helpers for the integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Once};
use std::time::Duration;

use meshgate_link::time::SharedClock;
use meshgate_link::MockClock;
use parking_lot::Mutex;

/// Installs a test subscriber once per binary. `RUST_LOG` controls the
/// level; output is captured by the test harness.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("meshgate_link=debug"));
        let _ = tracing_subscriber::fmt().with_env_filter(filter).with_test_writer().try_init();
    });
}

/// A mock clock plus the shared handle components take.
pub fn mock_clock() -> (MockClock, SharedClock) {
    let clock = MockClock::new();
    let shared: SharedClock = Arc::new(clock.clone());
    (clock, shared)
}

/// Payloads handed to a recording sender, in send order.
pub type Sent = Arc<Mutex<Vec<Vec<u8>>>>;

/// Polls `condition` every few milliseconds until it holds or `limit` passes.
pub async fn wait_until<F>(limit: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let poll = async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };
    tokio::time::timeout(limit, poll).await.is_ok()
}
