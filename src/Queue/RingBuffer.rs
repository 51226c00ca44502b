// Bounded slot ring backing every message queue

use super::layout::QueueControl;

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::AtomicU64;

/// A single slot in the ring.
///
/// The stamp is the core of the synchronization. For logical position `p`
/// living in this slot:
/// - `stamp == 2p`     the slot is free and a producer holding `tail == p` may write it.
/// - `stamp == 2p + 1` the value is published and a consumer holding `head == p` may take it.
/// After taking the value the consumer stores `2(p + capacity)`, freeing the
/// slot for the producer one lap later. Doubling the positions keeps "free"
/// and "ready" distinguishable even for a capacity of one.
pub struct Slot<T> {
    pub(crate) stamp: AtomicU64,
    pub(crate) value: UnsafeCell<MaybeUninit<T>>,
}

/// A lock-free, multi-producer, multi-consumer bounded ring of owned values.
///
/// ### Concurrency Design:
/// - **Producers (Enqueue)**: claim a position by CAS-advancing `tail`, after
///   checking the target slot's stamp says it is free for that position.
/// - **Consumers (Dequeue)**: claim a position by CAS-advancing `head`, after
///   checking the stamp says a producer finished writing it.
///
/// Blocking and timeouts are layered on top by `BoundedQueue`.
pub struct RingBuffer<T> {
    pub(crate) control: QueueControl,
    pub(crate) slots: Box<[Slot<T>]>,
    pub(crate) capacity: usize,
}

// Values move between threads through the slots; access to each slot is
// arbitrated by its stamp.
unsafe impl<T: Send> Send for RingBuffer<T> {}
unsafe impl<T: Send> Sync for RingBuffer<T> {}
