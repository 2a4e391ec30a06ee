//! Configuration changes that must wait until the game server is stopped.
//!
//! Changes run in the order they were queued. A failing change is retried
//! after a fixed delay until it succeeds; the ones behind it wait.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

pub const RETRY_DELAY: Duration = Duration::from_secs(2);

pub type ChangeAction = Box<dyn FnMut() -> anyhow::Result<()> + Send>;

pub struct DeferredChange {
    pub description: String,
    action: ChangeAction,
}

pub struct DeferredChangeQueue {
    queue: Mutex<VecDeque<DeferredChange>>,
    retry_delay: Duration,
}

impl Default for DeferredChangeQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl DeferredChangeQueue {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            retry_delay: RETRY_DELAY,
        }
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<DeferredChange>> {
        // 큐 자체는 항상 일관된 상태라 poison은 무시
        self.queue.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn enqueue<F>(&self, description: impl Into<String>, action: F)
    where
        F: FnMut() -> anyhow::Result<()> + Send + 'static,
    {
        let description = description.into();
        tracing::info!("Queued change: {}", description);
        self.lock().push_back(DeferredChange { description, action: Box::new(action) });
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Apply every queued change, front to back. Returns how many ran.
    pub async fn drain(&self) -> usize {
        let mut applied = 0;
        loop {
            let Some(mut change) = self.lock().pop_front() else { break };
            loop {
                match (change.action)() {
                    Ok(()) => {
                        tracing::info!("Applied change: {}", change.description);
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(
                            "Change '{}' failed: {}. Retrying in {:?}",
                            change.description,
                            e,
                            self.retry_delay
                        );
                        tokio::time::sleep(self.retry_delay).await;
                    }
                }
            }
            applied += 1;
        }
        applied
    }
}
