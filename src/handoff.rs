//! Blocking FIFO used to hand owned work items from one pipeline stage to the
//! next.
//!
//! A queue has exactly one producer and one consumer. The producer may stop the
//! queue once it has nothing more to send; the consumer keeps draining queued
//! items and then observes `None` as the end-of-stream sentinel.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

#[derive(Debug)]
struct QueueState<T> {
    items: VecDeque<T>,
    stopped: bool,
}

#[derive(Debug)]
pub struct HandoffQueue<T> {
    state: Mutex<QueueState<T>>,
    ready: Condvar,
}

impl<T> HandoffQueue<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                stopped: false,
            }),
            ready: Condvar::new(),
        }
    }

    /// Appends to the tail. Never blocks on capacity.
    pub fn push(&self, item: T) {
        let mut state = self.lock();
        state.items.push_back(item);
        drop(state);
        self.ready.notify_one();
    }

    /// Blocks until an item is available or the queue has been stopped and
    /// drained. `None` means end of stream.
    pub fn pop(&self) -> Option<T> {
        let mut state = self.lock();
        loop {
            if let Some(item) = state.items.pop_front() {
                return Some(item);
            }
            if state.stopped {
                return None;
            }
            state = self
                .ready
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// One-way transition; queued items stay poppable.
    pub fn stop(&self) {
        let mut state = self.lock();
        if state.stopped {
            return;
        }
        state.stopped = true;
        drop(state);
        self.ready.notify_all();
    }

    pub fn is_stopped(&self) -> bool {
        self.lock().stopped
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }

    // A panicking holder cannot leave the deque half-updated, so the guard is
    // safe to reuse after poisoning.
    fn lock(&self) -> MutexGuard<'_, QueueState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T> Default for HandoffQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Creates a connected producer/consumer pair over a fresh queue.
pub fn handoff<T>() -> (HandoffSender<T>, HandoffReceiver<T>) {
    let queue = Arc::new(HandoffQueue::new());
    (
        HandoffSender {
            queue: Arc::clone(&queue),
        },
        HandoffReceiver { queue },
    )
}

/// Producing half. Dropping it stops the queue, so a stage that exits early
/// still releases its consumer.
#[derive(Debug)]
pub struct HandoffSender<T> {
    queue: Arc<HandoffQueue<T>>,
}

impl<T> HandoffSender<T> {
    pub fn push(&self, item: T) {
        self.queue.push(item);
    }

    pub fn stop(&self) {
        self.queue.stop();
    }
}

impl<T> Drop for HandoffSender<T> {
    fn drop(&mut self) {
        self.queue.stop();
    }
}

/// Consuming half.
#[derive(Debug)]
pub struct HandoffReceiver<T> {
    queue: Arc<HandoffQueue<T>>,
}

impl<T> HandoffReceiver<T> {
    pub fn pop(&self) -> Option<T> {
        self.queue.pop()
    }

    pub fn is_stopped(&self) -> bool {
        self.queue.is_stopped()
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }
}

impl<T> Iterator for HandoffReceiver<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        self.queue.pop()
    }
}
