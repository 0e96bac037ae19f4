// Bounded lock-free MPMC ring shared by the ready queue and the receive queue.

use super::layout::Cursors;

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::AtomicUsize;

/// A single cell in the ring.
pub struct Cell<T> {
    /// The sequence number of the cell. This is the core of the synchronization.
    /// - A producer claims a `tail` sequence and waits for the `sequence` in
    ///   the target cell to equal `tail`.
    /// - After writing, it sets the `sequence` to `tail + 1`, signaling completion.
    /// - A consumer waits for the `sequence` in its `head` cell to equal
    ///   `head + 1`, and after reading sets it to `head + capacity`.
    pub(crate) sequence: AtomicUsize,

    /// The stored value; initialized exactly while `sequence == pos + 1`.
    pub(crate) value: UnsafeCell<MaybeUninit<T>>,
}

/// A lock-free, multi-producer, multi-consumer (MPMC) bounded ring buffer.
///
/// ### Concurrency Design:
/// - **Producers (Enqueue)**: Producers claim a cell by atomically incrementing `tail`.
///   They use the `sequence` field in the `Cell` to know when the cell is free to
///   be written.
/// - **Consumers (Dequeue)**: Consumers claim a value by atomically incrementing `head`.
///   They use the `sequence` field to know when a value has been fully written by a producer.
///
/// Neither side ever blocks: a full ring rejects `enqueue`, an empty ring
/// makes `dequeue` return `None`.
pub struct RingBuffer<T> {
    pub(crate) cursors: Cursors,

    pub(crate) cells: Box<[Cell<T>]>,

    /// The capacity of the buffer (number of cells, a power of two).
    pub(crate) capacity: usize,

    /// A bitmask used to wrap sequence numbers around the buffer.
    /// Calculated as `capacity - 1`.
    pub(crate) mask: usize,
}

unsafe impl<T: Send> Send for RingBuffer<T> {}
unsafe impl<T: Send> Sync for RingBuffer<T> {}
