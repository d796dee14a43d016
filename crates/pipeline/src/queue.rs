//! Bounded drop-oldest queue with a single async consumer.
//!
//! Producers never block: pushing into a full queue discards the oldest
//! pending item. Used as the one-slot input cell of every job and as the
//! control-message channel of emulation sessions.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;

pub struct DropOldestQueue<T> {
    capacity: usize,
    items: Mutex<VecDeque<T>>,
    notify: Notify,
}

impl<T> DropOldestQueue<T> {
    /// A capacity of zero is treated as one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            notify: Notify::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Enqueue `item`, returning the item that was evicted to make room.
    pub fn push(&self, item: T) -> Option<T> {
        let dropped = {
            let mut items = self.lock();
            let dropped = if items.len() >= self.capacity {
                items.pop_front()
            } else {
                None
            };
            items.push_back(item);
            dropped
        };
        self.notify.notify_one();
        dropped
    }

    pub fn try_pop(&self) -> Option<T> {
        self.lock().pop_front()
    }

    /// Wait for the next item.
    ///
    /// Cancel-safe: dropping the future never loses an item. Combine with
    /// `tokio::select!` to observe cancellation.
    pub async fn pop(&self) -> T {
        loop {
            let notified = self.notify.notified();
            if let Some(item) = self.try_pop() {
                return item;
            }
            notified.await;
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<T>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
