//! Keyed work queue feeding the worker pool.
//!
//! - At most one pending event per object; later events are folded into it
//!   with [`SyncEvent::coalesce`].
//! - An object being processed is never handed to a second worker. Events
//!   that arrive meanwhile are parked and become ready on [`EventQueue::done`].
//! - Failed items are retried with a per-object Fibonacci backoff. A newer
//!   event for the same object cuts the wait short.
//! - [`EventQueue::shut_down`] stops intake; workers drain what is ready and
//!   then receive `None`.

use crate::backoff::FibonacciBackoff;
use crate::event::{ObjectKey, SyncEvent};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::debug;

/// Retry bookkeeping for one object
#[derive(Debug, Clone)]
struct BackoffState {
    backoff: FibonacciBackoff,
    requeues: u32,
}

#[derive(Debug, Default)]
struct QueueState {
    /// Keys whose pending event can be handed out, in arrival order
    ready: VecDeque<ObjectKey>,
    /// Pending events, ready or parked behind an in-flight sync
    pending: HashMap<ObjectKey, SyncEvent>,
    /// Keys currently held by a worker
    processing: HashSet<ObjectKey>,
    /// Failed events waiting out their backoff, tagged with a token
    delayed: HashMap<ObjectKey, (u64, SyncEvent)>,
    next_token: u64,
    backoff: HashMap<ObjectKey, BackoffState>,
    shutting_down: bool,
}

impl QueueState {
    /// Merge `event` into the pending slot. `earlier` means the event
    /// predates whatever is already pending.
    fn merge_pending(&mut self, key: &ObjectKey, event: SyncEvent, earlier: bool) -> bool {
        let merged = match self.pending.remove(key) {
            Some(existing) if earlier => event.coalesce(existing),
            Some(existing) => existing.coalesce(event),
            None => event,
        };
        let newly_pending = !self.ready.contains(key);
        self.pending.insert(key.clone(), merged);
        if newly_pending && !self.processing.contains(key) {
            self.ready.push_back(key.clone());
            return true;
        }
        false
    }
}

/// Work queue of [`SyncEvent`]s
#[derive(Debug)]
pub struct EventQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    retry_base: Duration,
    retry_max: Duration,
}

impl EventQueue {
    /// Create a queue whose retries back off between `retry_base` and `retry_max`
    pub fn new(retry_base: Duration, retry_max: Duration) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            retry_base,
            retry_max,
        })
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enqueue an event. Returns `false` once the queue is shutting down.
    pub fn add(&self, event: SyncEvent) -> bool {
        let key = event.key();
        let wake = {
            let mut state = self.state();
            if state.shutting_down {
                return false;
            }
            // New information for a backed-off object: retry it now
            let event = match state.delayed.remove(&key) {
                Some((_, retry)) => retry.coalesce(event),
                None => event,
            };
            state.merge_pending(&key, event, false)
        };
        if wake {
            self.notify.notify_one();
        }
        true
    }

    /// Wait for the next ready event. Returns `None` after shutdown once
    /// nothing is ready.
    pub async fn get(&self) -> Option<SyncEvent> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut state = self.state();
                while let Some(key) = state.ready.pop_front() {
                    if let Some(event) = state.pending.remove(&key) {
                        state.processing.insert(key);
                        return Some(event);
                    }
                }
                if state.shutting_down {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Release `key` after its sync finished, successfully or not.
    pub fn done(&self, key: &ObjectKey) {
        let wake = {
            let mut state = self.state();
            state.processing.remove(key);
            if state.pending.contains_key(key) && !state.ready.contains(key) {
                state.ready.push_back(key.clone());
                true
            } else {
                false
            }
        };
        if wake {
            self.notify.notify_one();
        }
    }

    /// Schedule a failed event for retry after its backoff delay.
    ///
    /// Call before [`EventQueue::done`] for the same key.
    pub fn add_rate_limited(self: &Arc<Self>, event: SyncEvent) {
        let key = event.key();
        let (token, delay) = {
            let mut state = self.state();
            if state.shutting_down {
                return;
            }
            let (base, max) = (self.retry_base, self.retry_max);
            let entry = state.backoff.entry(key.clone()).or_insert_with(|| BackoffState {
                backoff: FibonacciBackoff::new(base, max),
                requeues: 0,
            });
            entry.requeues += 1;
            let delay = entry.backoff.next_backoff();

            if state.pending.contains_key(&key) {
                // A newer event is already parked; fold the failed one in front
                let wake = state.merge_pending(&key, event, true);
                drop(state);
                if wake {
                    self.notify.notify_one();
                }
                return;
            }
            state.next_token += 1;
            let token = state.next_token;
            state.delayed.insert(key.clone(), (token, event));
            (token, delay)
        };
        debug!("Retrying {} in {:?}", key, delay);

        let queue = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.promote_delayed(&key, token);
        });
    }

    fn promote_delayed(&self, key: &ObjectKey, token: u64) {
        let wake = {
            let mut state = self.state();
            if state.shutting_down {
                return;
            }
            // Superseded by a newer event or another retry
            if !matches!(state.delayed.get(key), Some((t, _)) if *t == token) {
                return;
            }
            let Some((_, event)) = state.delayed.remove(key) else {
                return;
            };
            state.merge_pending(key, event, true)
        };
        if wake {
            self.notify.notify_one();
        }
    }

    /// How often `key` has been retried since it was last forgotten
    pub fn num_requeues(&self, key: &ObjectKey) -> u32 {
        self.state().backoff.get(key).map_or(0, |b| b.requeues)
    }

    /// Clear the retry history of `key`
    pub fn forget(&self, key: &ObjectKey) {
        self.state().backoff.remove(key);
    }

    /// Number of pending events (ready, parked or backed off)
    pub fn len(&self) -> usize {
        let state = self.state();
        state.pending.len() + state.delayed.len()
    }

    /// Whether nothing is pending
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop accepting events and wake every waiting worker
    pub fn shut_down(&self) {
        {
            let mut state = self.state();
            state.shutting_down = true;
            state.delayed.clear();
        }
        self.notify.notify_waiters();
    }

    /// Whether [`EventQueue::shut_down`] has been called
    pub fn is_shutting_down(&self) -> bool {
        self.state().shutting_down
    }
}
