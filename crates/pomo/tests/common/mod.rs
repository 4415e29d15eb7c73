//! Test utilities shared by the integration tests.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use pomo::SessionOutcome;

/// One recorded callback invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub payload: String,
    pub outcome: SessionOutcome,
}

/// Collects completion callbacks so tests can assert on what fired.
#[derive(Clone, Default)]
pub struct Recorder {
    deliveries: Arc<Mutex<Vec<Delivery>>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// A completion callback that records into this recorder.
    pub fn callback(&self) -> Box<dyn FnOnce(String, SessionOutcome) + Send> {
        let deliveries = Arc::clone(&self.deliveries);
        Box::new(move |payload: String, outcome: SessionOutcome| {
            deliveries.lock().unwrap().push(Delivery { payload, outcome });
        })
    }

    pub fn deliveries(&self) -> Vec<Delivery> {
        self.deliveries.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.deliveries.lock().unwrap().len()
    }

    /// Poll until `expected` callbacks have fired or `limit` elapses.
    pub async fn wait_for(&self, expected: usize, limit: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + limit;
        while tokio::time::Instant::now() < deadline {
            if self.len() >= expected {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        self.len() >= expected
    }
}
