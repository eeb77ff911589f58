//! Cancellation-aware bounded queue (spec.md §4.1.2).
//!
//! Grounded on `original_source/media-proxy/include/mesh/concurrency.h`'s
//! `thread::Channel<T>`: a `VecDeque` behind one mutex with two wait
//! conditions (not-full, not-empty), reimplemented with `tokio::sync::Notify`
//! so it composes with [`crate::cancel::CancellationToken`] via `select!`
//! instead of the original's `condition_variable_any` + `stop_token`.

use crate::cancel::CancellationToken;
use std::collections::VecDeque;
use tokio::sync::{Mutex, Notify};

struct State<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// A FIFO queue of bounded capacity, shared by reference across producers
/// and consumers.
///
/// Fairness between waiters is not guaranteed. When both a successful
/// operation and cancellation are simultaneously possible, cancellation
/// wins (spec.md §4.1.2 "Ordering").
pub struct BoundedQueue<T> {
    state: Mutex<State<T>>,
    capacity: usize,
    not_full: Notify,
    not_empty: Notify,
}

impl<T> BoundedQueue<T> {
    /// Creates a queue. `capacity` is clamped to at least 1.
    pub fn new(capacity: usize) -> Self {
        BoundedQueue {
            state: Mutex::new(State {
                items: VecDeque::new(),
                closed: false,
            }),
            capacity: capacity.max(1),
            not_full: Notify::new(),
            not_empty: Notify::new(),
        }
    }

    /// Inserts `value`, blocking while the queue is full or until `ctx`
    /// cancels or the queue closes. Returns `false` on cancellation or if
    /// the queue is already closed.
    pub async fn send(&self, ctx: &CancellationToken, value: T) -> bool {
        let mut value = Some(value);
        loop {
            if ctx.cancelled() {
                return false;
            }
            {
                let mut state = self.state.lock().await;
                if state.closed {
                    return false;
                }
                if state.items.len() < self.capacity {
                    state.items.push_back(value.take().expect("value consumed once"));
                    self.not_empty.notify_one();
                    return true;
                }
            }
            let not_full = self.not_full.notified();
            let cancelled = ctx.wait_done();
            tokio::select! {
                _ = not_full => {}
                _ = cancelled => return false,
            }
        }
    }

    /// Removes and returns the next element, blocking until one is
    /// available, the queue closes and drains, or `ctx` cancels.
    pub async fn receive(&self, ctx: &CancellationToken) -> Option<T> {
        loop {
            if ctx.cancelled() {
                return None;
            }
            {
                let mut state = self.state.lock().await;
                if let Some(value) = state.items.pop_front() {
                    self.not_full.notify_one();
                    return Some(value);
                }
                if state.closed {
                    return None;
                }
            }
            let not_empty = self.not_empty.notified();
            let cancelled = ctx.wait_done();
            tokio::select! {
                _ = not_empty => {}
                _ = cancelled => return None,
            }
        }
    }

    /// Non-blocking receive: returns `None` immediately if nothing is
    /// queued, regardless of whether the queue is closed.
    pub fn try_receive(&self) -> Option<T> {
        let mut state = match self.state.try_lock() {
            Ok(guard) => guard,
            Err(_) => return None,
        };
        let value = state.items.pop_front();
        if value.is_some() {
            drop(state);
            self.not_full.notify_one();
        }
        value
    }

    /// Closes the queue. Idempotent. Further `send`s fail; `receive` keeps
    /// draining queued items before returning `None`.
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        if !state.closed {
            state.closed = true;
            drop(state);
            self.not_empty.notify_waiters();
            self.not_full.notify_waiters();
        }
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.items.len()
    }

    pub async fn is_closed(&self) -> bool {
        self.state.lock().await.closed
    }
}
