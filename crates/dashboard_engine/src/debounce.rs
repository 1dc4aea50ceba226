use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::sync::lock;

type Action = Box<dyn FnOnce() + Send + 'static>;

struct Pending {
    generation: u64,
    action: Action,
    timer: JoinHandle<()>,
}

struct Timers<K> {
    next_generation: u64,
    pending: HashMap<K, Pending>,
}

/// Delays actions until their key has been quiet for the requested window.
///
/// Whoever removes a pending entry (the timer, `flush_now` or `cancel`) owns
/// its action, so an action runs at most once. Must be used from within a
/// tokio runtime.
pub struct DebounceScheduler<K> {
    timers: Arc<Mutex<Timers<K>>>,
}

impl<K> Default for DebounceScheduler<K> {
    fn default() -> Self {
        Self {
            timers: Arc::new(Mutex::new(Timers {
                next_generation: 0,
                pending: HashMap::new(),
            })),
        }
    }
}

impl<K> DebounceScheduler<K>
where
    K: Eq + Hash + Clone + Send + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces any pending action for `key` and arms a new timer.
    pub fn schedule<F>(&self, key: K, delay: Duration, action: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut timers = lock(&self.timers);
        if let Some(previous) = timers.pending.remove(&key) {
            previous.timer.abort();
        }
        timers.next_generation += 1;
        let generation = timers.next_generation;

        // The lock is held until the entry is inserted, so even a zero delay
        // cannot fire before the entry exists.
        let shared = Arc::clone(&self.timers);
        let timer_key = key.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let due = {
                let mut timers = lock(&shared);
                match timers.pending.get(&timer_key) {
                    Some(pending) if pending.generation == generation => {
                        timers.pending.remove(&timer_key)
                    }
                    _ => None,
                }
            };
            if let Some(pending) = due {
                (pending.action)();
            }
        });

        timers.pending.insert(
            key,
            Pending {
                generation,
                action: Box::new(action),
                timer,
            },
        );
    }

    /// Drops the pending action for `key`. Returns whether one was pending.
    pub fn cancel(&self, key: &K) -> bool {
        let removed = lock(&self.timers).pending.remove(key);
        match removed {
            Some(pending) => {
                pending.timer.abort();
                true
            }
            None => false,
        }
    }

    /// Runs the pending action for `key` now instead of waiting. No-op when
    /// nothing is pending. Returns whether an action ran.
    pub fn flush_now(&self, key: &K) -> bool {
        let removed = lock(&self.timers).pending.remove(key);
        match removed {
            Some(pending) => {
                pending.timer.abort();
                (pending.action)();
                true
            }
            None => false,
        }
    }

    pub fn is_pending(&self, key: &K) -> bool {
        lock(&self.timers).pending.contains_key(key)
    }

    pub fn cancel_all(&self) {
        let drained: Vec<Pending> = lock(&self.timers)
            .pending
            .drain()
            .map(|(_, pending)| pending)
            .collect();
        for pending in drained {
            pending.timer.abort();
        }
    }
}

impl<K> Drop for DebounceScheduler<K> {
    fn drop(&mut self) {
        let mut timers = lock(&self.timers);
        for (_, pending) in timers.pending.drain() {
            pending.timer.abort();
        }
    }
}
