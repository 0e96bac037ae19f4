use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering::{AcqRel, Acquire, Relaxed, Release};

use super::layout::{calc_minimum_queue_size, Cursors};
use super::Buffer::{Cell, RingBuffer};

impl<T> RingBuffer<T> {
    /// Create an empty ring holding at least `request_size` values.
    ///
    /// The real capacity is [`calc_minimum_queue_size`] of the request.
    pub fn new(request_size: usize) -> Self {
        let capacity = calc_minimum_queue_size(request_size);

        // Initialize per-cell sequence numbers to k for k in 0..capacity.
        let cells = (0..capacity)
            .map(|k| Cell {
                sequence: AtomicUsize::new(k),
                value: UnsafeCell::new(MaybeUninit::uninit()),
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            cursors: Cursors::new(),
            cells,
            capacity,
            mask: capacity - 1,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of stored values. Only exact while no other thread touches the ring.
    pub fn len(&self) -> usize {
        let tail = self.cursors.tail.load(Acquire);
        let head = self.cursors.head.load(Acquire);
        tail.wrapping_sub(head).min(self.capacity)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    fn cell(&self, pos: usize) -> &Cell<T> {
        &self.cells[pos & self.mask]
    }

    /// Enqueue reserves a cell and publishes the value.
    /// Returns the value back if the ring appears full.
    pub fn enqueue(&self, value: T) -> Result<(), T> {
        let tail_atomic = &self.cursors.tail;

        loop {
            let tail = tail_atomic.load(Relaxed);
            let cell = self.cell(tail);
            let seq = cell.sequence.load(Acquire);
            let dif = (seq as isize).wrapping_sub(tail as isize);

            if dif == 0 {
                if tail_atomic
                    .compare_exchange_weak(tail, tail.wrapping_add(1), AcqRel, Relaxed)
                    .is_ok()
                {
                    // We own this cell now
                    unsafe {
                        (*cell.value.get()).write(value);
                    }
                    // Publish
                    cell.sequence.store(tail.wrapping_add(1), Release);
                    return Ok(());
                }
                continue;
            } else if dif < 0 {
                // full
                return Err(value);
            } else {
                // someone else is producing; backoff and retry
                std::hint::spin_loop();
                continue;
            }
        }
    }

    /// Dequeue acquires a ready cell and moves its value out.
    /// Returns None if the ring appears empty.
    pub fn dequeue(&self) -> Option<T> {
        let head_atomic = &self.cursors.head;

        loop {
            let head = head_atomic.load(Relaxed);
            let cell = self.cell(head);
            let seq = cell.sequence.load(Acquire);
            let dif = (seq as isize).wrapping_sub(head.wrapping_add(1) as isize);

            if dif == 0 {
                if head_atomic
                    .compare_exchange_weak(head, head.wrapping_add(1), AcqRel, Relaxed)
                    .is_ok()
                {
                    let value = unsafe { (*cell.value.get()).assume_init_read() };

                    // free cell for future producers
                    cell.sequence
                        .store(head.wrapping_add(self.capacity), Release);
                    return Some(value);
                }
                continue;
            } else if dif < 0 {
                // empty
                return None;
            } else {
                // producer not finished; retry
                std::hint::spin_loop();
                continue;
            }
        }
    }
}

impl<T> Drop for RingBuffer<T> {
    fn drop(&mut self) {
        while self.dequeue().is_some() {}
    }
}
