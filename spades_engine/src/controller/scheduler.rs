//! Keyed single-shot timers.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::AbortHandle;

/// Work run when a timer fires.
pub type ScheduledTask = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Cancellable one-shot callbacks addressed by name. Scheduling a key that is
/// already pending replaces the earlier timer.
pub trait KeyedScheduler: Send + Sync {
    fn schedule(&self, key: &str, delay: Duration, task: ScheduledTask);

    /// Cancel a pending timer. Returns whether one was pending.
    fn cancel(&self, key: &str) -> bool;

    fn is_scheduled(&self, key: &str) -> bool;
}

type TimerMap = HashMap<String, (u64, AbortHandle)>;

/// Timers as tokio tasks; cancellation aborts the sleeping task.
#[derive(Debug, Default)]
pub struct TokioScheduler {
    timers: Arc<Mutex<TimerMap>>,
    next_id: Mutex<u64>,
}

impl TokioScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> usize {
        self.timers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl KeyedScheduler for TokioScheduler {
    fn schedule(&self, key: &str, delay: Duration, task: ScheduledTask) {
        let id = {
            let mut next = self.next_id.lock().unwrap_or_else(PoisonError::into_inner);
            *next += 1;
            *next
        };

        // Hold the map while spawning so the task cannot fire and clean up
        // before its handle is registered.
        let mut timers = self.timers.lock().unwrap_or_else(PoisonError::into_inner);
        let registry = Arc::clone(&self.timers);
        let owned_key = key.to_string();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let mut timers = registry.lock().unwrap_or_else(PoisonError::into_inner);
                match timers.get(&owned_key) {
                    Some((current, _)) if *current == id => {
                        timers.remove(&owned_key);
                    }
                    // replaced or cancelled after we woke up
                    _ => return,
                }
            }
            task.await;
        });

        if let Some((_, previous)) = timers.insert(key.to_string(), (id, handle.abort_handle())) {
            previous.abort();
        }
    }

    fn cancel(&self, key: &str) -> bool {
        match self
            .timers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
        {
            Some((_, handle)) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    fn is_scheduled(&self, key: &str) -> bool {
        self.timers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }
}
