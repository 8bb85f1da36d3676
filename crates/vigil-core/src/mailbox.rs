//! Single-slot mailbox: overwrite on write, block on read.
//!
//! Every producer/consumer boundary in vigil goes through one of these.
//! `put` never blocks and never fails; it replaces whatever unread value
//! is sitting in the slot. `take` waits (bounded) for a value and empties
//! the slot. Consumers therefore only ever see the most recent value, which
//! keeps memory bounded and frames fresh at the cost of completeness.
//!
//! `put_wait` is the lossless variant for producers that must not clobber
//! each other: it parks until the slot is empty.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

pub struct Mailbox<T> {
    slot: Mutex<Option<T>>,
    notify: Notify,
    /// Signalled each time a value is taken out.
    space: Notify,
}

impl<T> Mailbox<T> {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            notify: Notify::new(),
            space: Notify::new(),
        }
    }

    fn slot(&self) -> MutexGuard<'_, Option<T>> {
        // The slot holds plain data; a panic elsewhere cannot leave it torn.
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store `value`, dropping any unread one, and wake one waiting taker.
    /// Returns true if an unread value was overwritten.
    pub fn put(&self, value: T) -> bool {
        let dropped = self.slot().replace(value).is_some();
        self.notify.notify_one();
        dropped
    }

    /// Store `value` once the slot is empty. Unlike `put` this never
    /// drops an unread value; waiting producers are served in arrival order.
    pub async fn put_wait(&self, value: T) {
        loop {
            {
                let mut slot = self.slot();
                if slot.is_none() {
                    *slot = Some(value);
                    drop(slot);
                    self.notify.notify_one();
                    return;
                }
            }
            self.space.notified().await;
        }
    }

    /// Take the value if one is available, without waiting.
    pub fn try_take(&self) -> Option<T> {
        let value = self.slot().take();
        if value.is_some() {
            self.space.notify_one();
        }
        value
    }

    /// Wait up to `timeout` for a value. `None` means timed out.
    pub async fn take(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(value) = self.try_take() {
                return Some(value);
            }
            // A permit left over from an already-consumed put wakes us
            // spuriously; the loop re-checks the slot.
            if tokio::time::timeout_at(deadline, self.notify.notified())
                .await
                .is_err()
            {
                return self.try_take();
            }
        }
    }

    pub fn is_available(&self) -> bool {
        self.slot().is_some()
    }
}

impl<T> Default for Mailbox<T> {
    fn default() -> Self {
        Self::new()
    }
}
