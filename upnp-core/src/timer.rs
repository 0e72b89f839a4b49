//! The SDK timer thread.
//!
//! One dedicated thread owns an ordered queue of scheduled jobs and executes
//! them at their due time, in due-time order with ties broken by submission
//! order. Periodic jobs reschedule at `due + interval` measured from the
//! original due time, not from completion, so load never accumulates drift.
//!
//! Payloads must be short. Long work (sending an advertisement, say) is
//! submitted to a thread pool from inside the payload rather than run on
//! the timer thread; user callbacks are never invoked here directly.

use std::collections::BTreeMap;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::error::{Result, UpnpError};
use crate::handle::Handle;

/// Identifier for a scheduled timer job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

impl std::fmt::Display for TimerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "timer-{}", self.0)
    }
}

/// A timer job body. Must not block the timer thread indefinitely.
pub type TimerPayload = Arc<dyn Fn() + Send + Sync>;

enum Repeat {
    Once,
    Every(Duration),
}

struct TimerEntry {
    id: TimerId,
    /// Cancelled as a group when this handle is freed.
    owner: Option<Handle>,
    repeat: Repeat,
    payload: TimerPayload,
}

struct TimerState {
    /// Due-time ordered queue; the second key component is a submission
    /// sequence number so simultaneous due times keep submission order.
    queue: BTreeMap<(Instant, u64), TimerEntry>,
    next_id: u64,
    next_seq: u64,
    shutting_down: bool,
}

struct TimerInner {
    state: Mutex<TimerState>,
    changed: Condvar,
}

/// The single timer thread and its schedule.
pub struct TimerThread {
    inner: Arc<TimerInner>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl TimerThread {
    /// Start the timer thread.
    pub fn start() -> Result<Self> {
        let inner = Arc::new(TimerInner {
            state: Mutex::new(TimerState {
                queue: BTreeMap::new(),
                next_id: 1,
                next_seq: 0,
                shutting_down: false,
            }),
            changed: Condvar::new(),
        });

        let thread_inner = Arc::clone(&inner);
        let thread = std::thread::Builder::new()
            .name("upnp-timer".to_string())
            .spawn(move || timer_loop(thread_inner))
            .map_err(|e| UpnpError::InitFailed(format!("failed to spawn timer thread: {e}")))?;

        Ok(Self {
            inner,
            thread: Mutex::new(Some(thread)),
        })
    }

    /// Schedule a one-shot job to run after `delay`.
    pub fn schedule(
        &self,
        delay: Duration,
        owner: Option<Handle>,
        payload: TimerPayload,
    ) -> Result<TimerId> {
        self.insert(Instant::now() + delay, Repeat::Once, owner, payload)
    }

    /// Schedule a periodic job: first run after `first_delay`, then every
    /// `interval` measured from each due time.
    pub fn schedule_periodic(
        &self,
        first_delay: Duration,
        interval: Duration,
        owner: Option<Handle>,
        payload: TimerPayload,
    ) -> Result<TimerId> {
        self.insert(
            Instant::now() + first_delay,
            Repeat::Every(interval),
            owner,
            payload,
        )
    }

    /// Cancel a scheduled job.
    ///
    /// Fails with [`UpnpError::NotFound`] if the id is unknown — including a
    /// one-shot job that has already run.
    pub fn cancel(&self, id: TimerId) -> Result<()> {
        let mut state = self
            .inner
            .state
            .lock()
            .map_err(|_| UpnpError::LockPoisoned)?;
        let key = state
            .queue
            .iter()
            .find(|(_, entry)| entry.id == id)
            .map(|(key, _)| *key)
            .ok_or_else(|| UpnpError::NotFound(format!("{id}")))?;
        state.queue.remove(&key);
        drop(state);
        self.inner.changed.notify_one();
        Ok(())
    }

    /// Cancel every job owned by `handle`, returning how many were removed.
    ///
    /// Called before a handle is freed so no job ever runs against a freed
    /// handle.
    pub fn cancel_for_handle(&self, handle: Handle) -> usize {
        let mut state = match self.inner.state.lock() {
            Ok(s) => s,
            Err(_) => return 0,
        };
        let before = state.queue.len();
        state.queue.retain(|_, entry| entry.owner != Some(handle));
        let removed = before - state.queue.len();
        drop(state);
        if removed > 0 {
            tracing::debug!(%handle, removed, "cancelled timer jobs for handle");
            self.inner.changed.notify_one();
        }
        removed
    }

    /// Number of jobs currently scheduled.
    pub fn scheduled_jobs(&self) -> usize {
        self.inner.state.lock().map(|s| s.queue.len()).unwrap_or(0)
    }

    /// Stop the timer thread. Pending jobs are discarded, a job already
    /// executing finishes first. Safe to call more than once.
    pub fn shutdown(&self) {
        if let Ok(mut state) = self.inner.state.lock() {
            state.shutting_down = true;
        }
        self.inner.changed.notify_all();
        if let Ok(mut guard) = self.thread.lock() {
            if let Some(handle) = guard.take() {
                let _ = handle.join();
            }
        }
    }

    fn insert(
        &self,
        due: Instant,
        repeat: Repeat,
        owner: Option<Handle>,
        payload: TimerPayload,
    ) -> Result<TimerId> {
        let mut state = self
            .inner
            .state
            .lock()
            .map_err(|_| UpnpError::LockPoisoned)?;
        if state.shutting_down {
            return Err(UpnpError::ShuttingDown {
                pool: "upnp-timer".to_string(),
            });
        }

        let id = TimerId(state.next_id);
        state.next_id += 1;
        let seq = state.next_seq;
        state.next_seq += 1;

        state.queue.insert(
            (due, seq),
            TimerEntry {
                id,
                owner,
                repeat,
                payload,
            },
        );
        drop(state);
        self.inner.changed.notify_one();
        Ok(id)
    }
}

impl Drop for TimerThread {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn timer_loop(inner: Arc<TimerInner>) {
    let mut state = match inner.state.lock() {
        Ok(s) => s,
        Err(_) => return,
    };

    loop {
        if state.shutting_down {
            return;
        }

        let now = Instant::now();
        match state.queue.keys().next().copied() {
            Some((due, seq)) if due <= now => {
                let entry = state.queue.remove(&(due, seq)).expect("key just observed");

                // Reinsert a periodic job before running it, keyed off the
                // original due time, so cadence is independent of how long
                // the payload takes and cancellation still finds it.
                if let Repeat::Every(interval) = entry.repeat {
                    let next_seq = state.next_seq;
                    state.next_seq += 1;
                    state.queue.insert(
                        (due + interval, next_seq),
                        TimerEntry {
                            id: entry.id,
                            owner: entry.owner,
                            repeat: Repeat::Every(interval),
                            payload: Arc::clone(&entry.payload),
                        },
                    );
                }

                drop(state);
                (entry.payload)();
                state = match inner.state.lock() {
                    Ok(s) => s,
                    Err(_) => return,
                };
            }
            Some((due, _)) => {
                let wait = due - now;
                state = match inner.changed.wait_timeout(state, wait) {
                    Ok((s, _)) => s,
                    Err(_) => return,
                };
            }
            None => {
                state = match inner.changed.wait(state) {
                    Ok(s) => s,
                    Err(_) => return,
                };
            }
        }
    }
}
