use crossbeam_utils::CachePadded;
use std::sync::atomic::AtomicUsize;

/// Smallest ring the sequence protocol works with.
pub const MIN_QUEUE_SIZE: usize = 2;

/// Default slot count for send and receive queues.
pub const DEFAULT_QUEUE_SIZE: usize = 1024;

/// Default per-message payload capacity in bytes.
pub const DEFAULT_PACKET_SIZE: usize = 1024;

/// The producer and consumer cursors of one ring.
///
/// Each cursor sits on its own cache line so producers hammering `tail` do not
/// invalidate the line consumers read `head` from.
pub struct Cursors {
    /// The "tail" cursor for producers. Atomically incremented to claim a cell for writing.
    pub tail: CachePadded<AtomicUsize>,

    /// The "head" cursor for consumers. Atomically incremented to claim a cell for reading.
    pub head: CachePadded<AtomicUsize>,
}

impl Cursors {
    pub fn new() -> Self {
        Self {
            tail: CachePadded::new(AtomicUsize::new(0)),
            head: CachePadded::new(AtomicUsize::new(0)),
        }
    }
}

impl Default for Cursors {
    fn default() -> Self {
        Self::new()
    }
}

/// Largest power of two a `usize` holds.
pub const MAX_QUEUE_SIZE: usize = 1 << (usize::BITS - 1);

/// Round a requested queue size up to the size the ring actually allocates:
/// the next power of two, and never below [`MIN_QUEUE_SIZE`].
///
/// `None` when the request is above [`MAX_QUEUE_SIZE`].
pub fn checked_minimum_queue_size(request_size: usize) -> Option<usize> {
    request_size.max(MIN_QUEUE_SIZE).checked_next_power_of_two()
}

/// Like [`checked_minimum_queue_size`], clamped to [`MAX_QUEUE_SIZE`].
pub fn calc_minimum_queue_size(request_size: usize) -> usize {
    checked_minimum_queue_size(request_size).unwrap_or(MAX_QUEUE_SIZE)
}
