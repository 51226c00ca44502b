use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering::{Acquire, Release};
use std::time::{Duration, Instant};

use super::RingBuffer::RingBuffer;
use crate::Core::futex;

/// Longest single futex sleep when the caller's timeout has no representable
/// deadline.
const UNBOUNDED_WAIT_SLICE: Duration = Duration::from_secs(1);

/// Result of a timed send.
#[derive(Debug, PartialEq, Eq)]
pub enum SendOutcome<T> {
    /// The value was enqueued.
    Sent,
    /// No slot freed up before the timeout; the value is handed back.
    Timeout(T),
    /// The queue was closed; the value is handed back.
    Closed(T),
}

/// Result of a timed receive.
#[derive(Debug, PartialEq, Eq)]
pub enum RecvOutcome<T> {
    Message(T),
    Timeout,
    Closed,
}

/// A fixed-capacity, thread-safe FIFO with timeout-bounded send and receive
/// and an explicit close signal.
///
/// The queue does not look at its entries. Closing is sticky: once
/// [`close`](Self::close) runs, every blocked and future receive returns
/// [`RecvOutcome::Closed`] even if entries remain, and those entries go to the
/// destructor passed to [`destroy`](Self::destroy).
pub struct BoundedQueue<T> {
    pub(crate) name: String,
    pub(crate) ring: RingBuffer<T>,
}

impl<T> BoundedQueue<T> {
    pub(crate) fn new(name: String, capacity: usize) -> Self {
        Self {
            name,
            ring: RingBuffer::new(capacity),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.ring.control().closed.load(Acquire)
    }

    /// Enqueue `value`, waiting up to `timeout` for a free slot.
    pub fn send(&self, value: T, timeout: Duration) -> SendOutcome<T> {
        let deadline = Instant::now().checked_add(timeout);
        let signal = &self.ring.control().not_full;
        let mut value = value;

        loop {
            if self.is_closed() {
                return SendOutcome::Closed(value);
            }
            let seen = signal.load(Acquire);
            match self.ring.enqueue(value) {
                Ok(_) => {
                    self.ring.signal_not_empty();
                    return SendOutcome::Sent;
                }
                Err(back) => value = back,
            }
            match remaining(deadline) {
                Some(left) => wait(signal, seen, left),
                None => return SendOutcome::Timeout(value),
            }
        }
    }

    /// Dequeue the oldest entry, waiting up to `timeout` for one to arrive.
    pub fn receive(&self, timeout: Duration) -> RecvOutcome<T> {
        let deadline = Instant::now().checked_add(timeout);
        let signal = &self.ring.control().not_empty;

        loop {
            if self.is_closed() {
                return RecvOutcome::Closed;
            }
            let seen = signal.load(Acquire);
            if let Some(value) = self.ring.dequeue() {
                self.ring.signal_not_full();
                return RecvOutcome::Message(value);
            }
            match remaining(deadline) {
                Some(left) => wait(signal, seen, left),
                None => return RecvOutcome::Timeout,
            }
        }
    }

    /// Mark the queue closed and wake every blocked sender and receiver.
    /// Idempotent.
    pub fn close(&self) {
        self.ring.control().closed.store(true, Release);
        self.ring.signal_not_empty();
        self.ring.signal_not_full();
    }

    /// Pop every entry currently queued, passing each to `destructor`.
    /// Works on open and closed queues. Returns the number of entries flushed.
    pub fn flush<F: FnMut(T)>(&self, mut destructor: F) -> usize {
        let mut count = 0;
        while let Some(value) = self.ring.dequeue() {
            destructor(value);
            count += 1;
        }
        if count > 0 {
            self.ring.signal_not_full();
        }
        count
    }

    /// Tear the queue down, passing every undelivered entry to `destructor`
    /// exactly once. Taking `self` guarantees nobody is blocked on it.
    pub fn destroy<F: FnMut(T)>(self, destructor: F) -> usize {
        let count = self.flush(destructor);
        tracing::debug!(queue = %self.name, count, "queue destroyed");
        count
    }
}

/// Time left before `deadline`, or `None` once it has passed. A missing
/// deadline never expires.
fn remaining(deadline: Option<Instant>) -> Option<Duration> {
    let Some(deadline) = deadline else {
        return Some(UNBOUNDED_WAIT_SLICE);
    };
    let now = Instant::now();
    if now >= deadline {
        None
    } else {
        Some(deadline - now)
    }
}

fn wait(signal: &AtomicU32, seen: u32, left: Duration) {
    futex::futex_wait(signal, seen, Some(left));
}
