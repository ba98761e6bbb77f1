//! Debounce and throttle schedulers.
//!
//! Both hold the most recent call arguments plus one timer task. Timers run on
//! the ambient tokio runtime, so `schedule` must be called from inside one.
//! Cancelling the token passed at construction stops every pending timer and
//! turns later `schedule` calls into no-ops.

use std::{sync::Arc, time::Duration};

use parking_lot::Mutex;
use tokio::{
    task::JoinHandle,
    time::{Instant, sleep, sleep_until},
};
use tokio_util::sync::CancellationToken;

type Callback<T> = Arc<dyn Fn(T) + Send + Sync>;

struct Slot<T> {
    pending: Option<T>,
    timer: Option<JoinHandle<()>>,
    generation: u64,
    window_end: Option<Instant>,
}

impl<T> Default for Slot<T> {
    fn default() -> Self {
        Self {
            pending: None,
            timer: None,
            generation: 0,
            window_end: None,
        }
    }
}

impl<T> Slot<T> {
    fn reset_timer(&mut self) -> u64 {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        self.generation = self.generation.wrapping_add(1);
        self.generation
    }
}

struct Shared<T> {
    wait: Duration,
    callback: Callback<T>,
    cancel: CancellationToken,
    slot: Mutex<Slot<T>>,
}

impl<T> Shared<T> {
    fn new(wait: Duration, cancel: CancellationToken, callback: Callback<T>) -> Arc<Self> {
        Arc::new(Self {
            wait,
            callback,
            cancel,
            slot: Mutex::new(Slot::default()),
        })
    }

    fn cancel_pending(&self) {
        let mut slot = self.slot.lock();
        slot.reset_timer();
        slot.pending = None;
        slot.window_end = None;
    }

    fn is_pending(&self) -> bool {
        self.slot.lock().pending.is_some()
    }
}

/// Collapses bursts of calls and fires the last one once the burst is quiet.
///
/// With `leading`, the first call of a burst also fires immediately.
pub struct Debouncer<T> {
    shared: Arc<Shared<T>>,
    leading: bool,
}

impl<T: Send + 'static> Debouncer<T> {
    pub fn new<F>(wait: Duration, leading: bool, cancel: CancellationToken, callback: F) -> Self
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        Self {
            shared: Shared::new(wait, cancel, Arc::new(callback)),
            leading,
        }
    }

    pub fn schedule(&self, args: T) {
        if self.shared.cancel.is_cancelled() {
            return;
        }

        let fire_now = {
            let mut slot = self.shared.slot.lock();
            let idle = slot.timer.is_none();
            let generation = slot.reset_timer();
            let fire_now = if idle && self.leading {
                Some(args)
            } else {
                slot.pending = Some(args);
                None
            };
            slot.timer = Some(spawn_debounce_timer(Arc::clone(&self.shared), generation));
            fire_now
        };

        if let Some(args) = fire_now {
            (self.shared.callback)(args);
        }
    }

    /// Drop the pending call and stop the timer.
    pub fn cancel(&self) {
        self.shared.cancel_pending();
    }

    pub fn is_pending(&self) -> bool {
        self.shared.is_pending()
    }
}

fn spawn_debounce_timer<T: Send + 'static>(shared: Arc<Shared<T>>, generation: u64) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = shared.cancel.cancelled() => {}
            _ = sleep(shared.wait) => {
                let pending = {
                    let mut slot = shared.slot.lock();
                    if slot.generation != generation {
                        return;
                    }
                    slot.timer = None;
                    slot.pending.take()
                };
                if let Some(args) = pending
                    && !shared.cancel.is_cancelled()
                {
                    (shared.callback)(args);
                }
            }
        }
    })
}

/// Caps the call rate: fires the first call immediately and the last call
/// of a burst at the end of the window.
pub struct Throttler<T> {
    shared: Arc<Shared<T>>,
}

impl<T: Send + 'static> Throttler<T> {
    pub fn new<F>(wait: Duration, cancel: CancellationToken, callback: F) -> Self
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        Self {
            shared: Shared::new(wait, cancel, Arc::new(callback)),
        }
    }

    pub fn schedule(&self, args: T) {
        if self.shared.cancel.is_cancelled() {
            return;
        }

        let fire_now = {
            let mut slot = self.shared.slot.lock();
            let now = Instant::now();
            let window_open = slot.window_end.is_some_and(|end| now < end);
            if slot.timer.is_none() && !window_open {
                slot.window_end = Some(now + self.shared.wait);
                Some(args)
            } else {
                slot.pending = Some(args);
                if slot.timer.is_none() {
                    let deadline = slot.window_end.unwrap_or(now);
                    let generation = slot.reset_timer();
                    slot.timer = Some(spawn_throttle_timer(
                        Arc::clone(&self.shared),
                        generation,
                        deadline,
                    ));
                }
                None
            }
        };

        if let Some(args) = fire_now {
            (self.shared.callback)(args);
        }
    }

    /// Drop the pending trailing call and reopen the window.
    pub fn cancel(&self) {
        self.shared.cancel_pending();
    }

    pub fn is_pending(&self) -> bool {
        self.shared.is_pending()
    }
}

fn spawn_throttle_timer<T: Send + 'static>(
    shared: Arc<Shared<T>>,
    generation: u64,
    deadline: Instant,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = shared.cancel.cancelled() => {}
            _ = sleep_until(deadline) => {
                let pending = {
                    let mut slot = shared.slot.lock();
                    if slot.generation != generation {
                        return;
                    }
                    slot.timer = None;
                    let pending = slot.pending.take();
                    if pending.is_some() {
                        slot.window_end = Some(Instant::now() + shared.wait);
                    }
                    pending
                };
                if let Some(args) = pending
                    && !shared.cancel.is_cancelled()
                {
                    (shared.callback)(args);
                }
            }
        }
    })
}
