use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering::{AcqRel, Acquire, Relaxed, Release};

use super::layout::QueueControl;
use super::RingBuffer::{RingBuffer, Slot};
use crate::Core::futex;

impl<T> RingBuffer<T> {
    /// Allocate a ring with `capacity` slots, all free.
    ///
    /// Slot `k` starts stamped `2k`: free for the producer at position `k`.
    pub fn new(capacity: usize) -> Self {
        let slots = (0..capacity)
            .map(|k| Slot {
                stamp: AtomicU64::new(2 * k as u64),
                value: UnsafeCell::new(MaybeUninit::uninit()),
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            control: QueueControl::new(),
            slots,
            capacity,
        }
    }

    /// Number of slots.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Approximate number of entries; exact when no operation is in flight.
    pub fn len(&self) -> usize {
        let tail = self.control.tail.load(Acquire);
        let head = self.control.head.load(Acquire);
        tail.saturating_sub(head) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn control(&self) -> &QueueControl {
        &self.control
    }

    #[inline]
    fn slot(&self, position: u64) -> &Slot<T> {
        &self.slots[(position % self.capacity as u64) as usize]
    }

    /// Enqueue reserves a slot and publishes the value.
    /// Returns the slot index on success, or hands the value back if the ring is full.
    pub fn enqueue(&self, value: T) -> Result<usize, T> {
        let tail_atomic = &*self.control.tail;
        let mut tail = tail_atomic.load(Relaxed);

        loop {
            let slot = self.slot(tail);
            let stamp = slot.stamp.load(Acquire);
            let dif = stamp.wrapping_sub(2 * tail) as i64;

            if dif == 0 {
                match tail_atomic.compare_exchange_weak(tail, tail + 1, AcqRel, Relaxed) {
                    Ok(_) => {
                        // We own this slot now
                        unsafe {
                            (*slot.value.get()).write(value);
                        }
                        // Publish
                        slot.stamp.store(2 * tail + 1, Release);
                        return Ok((tail % self.capacity as u64) as usize);
                    }
                    Err(current) => tail = current,
                }
            } else if dif < 0 {
                // full
                return Err(value);
            } else {
                // another producer took this position; reload and retry
                std::hint::spin_loop();
                tail = tail_atomic.load(Relaxed);
            }
        }
    }

    /// Dequeue takes the oldest published value.
    /// Returns None if the ring appears empty.
    pub fn dequeue(&self) -> Option<T> {
        let head_atomic = &*self.control.head;
        let mut head = head_atomic.load(Relaxed);

        loop {
            let slot = self.slot(head);
            let stamp = slot.stamp.load(Acquire);
            let dif = stamp.wrapping_sub(2 * head + 1) as i64;

            if dif == 0 {
                match head_atomic.compare_exchange_weak(head, head + 1, AcqRel, Relaxed) {
                    Ok(_) => {
                        let value = unsafe { (*slot.value.get()).assume_init_read() };
                        // free slot for the producer one lap later
                        slot.stamp
                            .store(2 * (head + self.capacity as u64), Release);
                        return Some(value);
                    }
                    Err(current) => head = current,
                }
            } else if dif < 0 {
                // empty, or the producer for this position has not published yet
                return None;
            } else {
                // another consumer took this position; reload and retry
                std::hint::spin_loop();
                head = head_atomic.load(Relaxed);
            }
        }
    }

    /// Signal consumers that a value was published (or the ring was closed).
    pub fn signal_not_empty(&self) {
        self.control.not_empty.fetch_add(1, Release);
        futex::futex_wake_all(&self.control.not_empty);
    }

    /// Signal producers that a slot was released (or the ring was closed).
    pub fn signal_not_full(&self) {
        self.control.not_full.fetch_add(1, Release);
        futex::futex_wake_all(&self.control.not_full);
    }
}

impl<T> Drop for RingBuffer<T> {
    fn drop(&mut self) {
        while let Some(value) = self.dequeue() {
            drop(value);
        }
    }
}
