//! Slot pool and ready queue.
//!
//! ```text
//!  [producer threads]        :  [loop thread]
//!                            :
//!   enqueue(msg)             :
//!     ready.dequeue() -> i   :
//!     copy msg into slot i   :
//!     slot[i].async.send() ~~~~~> on_async_msg(i)
//!                            :      handler.on_msg(slot i)
//!                            :        Done     -> ready.enqueue(i)
//!                            :        Deferred -> restore_message(handle) later
//!                            :
//!                            :   close_async_msgs()
//!                            :      slot[*].async.close() ~> on_close_msg(i)
//!                            :        N confirmations -> handler.on_close_msg_done()
//! ```
//!
//! The ready queue is the only state producers touch, so `enqueue` takes no lock.
//! Every other piece of slot state belongs to the loop thread.

use std::cell::UnsafeCell;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};

use tracing::{error, trace};

use crate::error::{MqError, MqResult};
use crate::Core::EventLoop::panic_message;
use crate::Core::{AsyncCallback, AsyncHandle, Loop};
use crate::MQ::Buffer::layout::calc_minimum_queue_size;
use crate::MQ::Buffer::RingBuffer;
use crate::MQ::Structs::{MqEvent, MqMsg};

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

const SLOT_FREE: u8 = 0;
const SLOT_IN_FLIGHT: u8 = 1;
const SLOT_DEFERRED: u8 = 2;

/// What happens to a slot after its handler ran.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AfterAction {
    /// Return the slot to the ready queue now.
    Done,
    /// Keep the slot in flight; the handler returns it with
    /// [`MqEventQueue::restore_message`].
    Deferred,
}

/// Identifies one in-flight use of one slot.
///
/// The generation changes every time the slot goes back to the ready queue,
/// so a handle kept past its restore no longer verifies.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct SlotHandle {
    pool: u64,
    index: u32,
    generation: u32,
}

impl SlotHandle {
    #[inline]
    pub fn index(&self) -> usize {
        self.index as usize
    }

    #[inline]
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

/// The slot handed to [`MqEventHandler::on_msg`].
pub struct SlotRef<'a> {
    handle: SlotHandle,
    msg: &'a MqMsg,
}

impl<'a> SlotRef<'a> {
    pub fn handle(&self) -> SlotHandle {
        self.handle
    }

    pub fn msg(&self) -> &'a MqMsg {
        self.msg
    }

    pub fn event(&self) -> MqEvent {
        self.msg.event()
    }
}

/// Loop-side behavior plugged into an [`MqEventQueue`].
///
/// All methods run on the loop thread.
pub trait MqEventHandler: Send + Sync + 'static {
    /// The queue whose slots dispatch to this handler.
    fn event_queue(&self) -> &MqEventQueue;

    /// A slot arrived carrying a message.
    fn on_msg(&self, slot: SlotRef<'_>) -> AfterAction;

    /// Every slot has confirmed its close. Called exactly once.
    fn on_close_msg_done(&self);
}

struct Slot {
    /// Written only by the thread that pulled this slot from the ready queue,
    /// then read only by the loop thread until the slot is released.
    msg: UnsafeCell<MqMsg>,
    generation: AtomicU32,
    state: AtomicU8,
    async_handle: AsyncHandle,
}

unsafe impl Send for Slot {}
unsafe impl Sync for Slot {}

struct SlotWaker {
    index: usize,
    owner: Weak<dyn MqEventHandler>,
}

impl AsyncCallback for SlotWaker {
    fn on_async(&self) {
        if let Some(owner) = self.owner.upgrade() {
            owner.event_queue().on_async_msg(&*owner, self.index);
        }
    }

    fn on_close(&self) {
        if let Some(owner) = self.owner.upgrade() {
            owner.event_queue().on_close_msg(&*owner, self.index);
        }
    }
}

/// A fixed pool of loop-bound message carriers plus the lock-free queue of
/// the ones currently free.
pub struct MqEventQueue {
    pool: u64,
    thread: ThreadId,
    max_msg_size: usize,
    slots: Box<[Slot]>,
    ready: RingBuffer<usize>,
    closed: AtomicUsize,
    close_done: AtomicBool,
}

impl MqEventQueue {
    /// Create `calc_minimum_queue_size(capacity)` slots bound to `event_loop`,
    /// all of them ready.
    ///
    /// The calling thread becomes the only thread allowed to run the
    /// loop-side methods.
    pub fn new(
        event_loop: &Loop,
        capacity: usize,
        max_msg_size: usize,
        owner: Weak<dyn MqEventHandler>,
    ) -> Self {
        let size = calc_minimum_queue_size(capacity);
        let ready = RingBuffer::new(size);
        debug_assert_eq!(ready.capacity(), size);

        let slots = (0..size)
            .map(|index| Slot {
                msg: UnsafeCell::new(MqMsg::with_capacity(max_msg_size)),
                generation: AtomicU32::new(0),
                state: AtomicU8::new(SLOT_FREE),
                async_handle: event_loop.new_async(Arc::new(SlotWaker {
                    index,
                    owner: owner.clone(),
                })),
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();

        for index in 0..size {
            let pushed = ready.enqueue(index);
            debug_assert!(pushed.is_ok());
        }
        debug_assert_eq!(ready.len(), size);

        Self {
            pool: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
            thread: thread::current().id(),
            max_msg_size,
            slots,
            ready,
            closed: AtomicUsize::new(0),
            close_done: AtomicBool::new(false),
        }
    }

    /// Number of slots N.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn max_msg_size(&self) -> usize {
        self.max_msg_size
    }

    /// Slots sitting in the ready queue. Exact only while nothing is moving.
    pub fn ready_count(&self) -> usize {
        self.ready.len()
    }

    /// Slots handed to the loop and not yet returned.
    pub fn in_flight_count(&self) -> usize {
        self.capacity() - self.ready_count()
    }

    /// Slots that have confirmed their close.
    pub fn closed_count(&self) -> usize {
        self.closed.load(Ordering::Acquire)
    }

    pub fn is_close_done(&self) -> bool {
        self.close_done.load(Ordering::Acquire)
    }

    /// Whether the current thread is the one that owns the loop side.
    pub fn is_loop_thread(&self) -> bool {
        thread::current().id() == self.thread
    }

    #[inline]
    fn assert_loop_thread(&self) {
        debug_assert!(self.is_loop_thread(), "loop-side call from a foreign thread");
    }

    /// Copy `msg` into a free slot and wake the loop. Never blocks.
    ///
    /// Fails with [`MqError::NotReady`] when every slot is in flight. If the
    /// wake-up fails the slot goes back to the ready queue before returning.
    pub fn enqueue(&self, msg: &MqMsg) -> MqResult<()> {
        if msg.len() > self.max_msg_size {
            return Err(MqError::MessageTooLarge {
                size: msg.len(),
                max: self.max_msg_size,
            });
        }

        let index = self.ready.dequeue().ok_or(MqError::NotReady {
            capacity: self.capacity(),
        })?;
        let slot = &self.slots[index];
        slot.state.store(SLOT_IN_FLIGHT, Ordering::Relaxed);

        // We own this slot until the loop is woken.
        unsafe {
            (*slot.msg.get()).copy_from(msg);
        }

        if let Err(e) = slot.async_handle.send() {
            trace!(index, error = %e, "slot wake-up failed, rolling back");
            slot.state.store(SLOT_FREE, Ordering::Relaxed);
            self.release(index);
            return Err(e);
        }
        Ok(())
    }

    pub fn enqueue_close(&self) -> MqResult<()> {
        self.enqueue(&MqMsg::close())
    }

    /// Return a slot the handler deferred.
    ///
    /// The slot must be deferred, i.e. its `on_msg` returned
    /// [`AfterAction::Deferred`]. With `verify`, the handle must also come
    /// from this pool and refer to the slot's current deferred use. Anything
    /// else is rejected with [`MqError::IllegalArgument`]; a verified
    /// rejection also trips a debug assertion.
    pub fn restore_message(&self, handle: SlotHandle, verify: bool) -> MqResult<()> {
        let index = handle.index();
        let Some(slot) = self.slots.get(index) else {
            error!(index, capacity = self.capacity(), "restore of out-of-range slot");
            return Err(MqError::illegal_argument(format!("slot {index} out of range")));
        };

        if verify {
            let valid = handle.pool == self.pool
                && slot.generation.load(Ordering::Acquire) == handle.generation;
            let valid = valid && Self::take_deferred(slot);
            if !valid {
                error!(?handle, pool = self.pool, "restore of a slot this pool did not defer");
                debug_assert!(valid, "slot {index} is not a deferred member of pool {}", self.pool);
                return Err(MqError::illegal_argument("slot is not a deferred member of this pool"));
            }
        } else if !Self::take_deferred(slot) {
            // Only a deferred slot may go back; anything else would sit in two places.
            error!(?handle, "unverified restore of a slot that is not deferred");
            return Err(MqError::illegal_argument(format!("slot {index} is not deferred")));
        }

        self.release(index);
        Ok(())
    }

    /// DEFERRED -> FREE. Exactly one restore wins per deferred use.
    fn take_deferred(slot: &Slot) -> bool {
        slot.state
            .compare_exchange(SLOT_DEFERRED, SLOT_FREE, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn release(&self, index: usize) {
        self.slots[index].generation.fetch_add(1, Ordering::AcqRel);
        if self.ready.enqueue(index).is_err() {
            // Cannot happen while every index lives in exactly one place.
            error!(index, "ready queue overflow");
        }
    }

    /// Loop thread: a slot was woken.
    pub fn on_async_msg(&self, handler: &dyn MqEventHandler, index: usize) {
        self.assert_loop_thread();
        let slot = &self.slots[index];

        // The producer finished writing before it triggered the wake-up.
        let msg = unsafe { &*slot.msg.get() };
        let handle = SlotHandle {
            pool: self.pool,
            index: index as u32,
            generation: slot.generation.load(Ordering::Acquire),
        };

        let action = catch_unwind(AssertUnwindSafe(|| handler.on_msg(SlotRef { handle, msg })))
            .unwrap_or_else(|payload| {
                let reason = panic_message(payload.as_ref());
                error!(index, %reason, "message handler panicked, releasing slot");
                AfterAction::Done
            });

        match action {
            AfterAction::Done => {
                slot.state.store(SLOT_FREE, Ordering::Release);
                self.release(index);
            }
            AfterAction::Deferred => {
                slot.state.store(SLOT_DEFERRED, Ordering::Release);
            }
        }
    }

    /// Loop thread: a slot confirmed its close.
    pub fn on_close_msg(&self, handler: &dyn MqEventHandler, index: usize) {
        self.assert_loop_thread();
        let closed = self.closed.fetch_add(1, Ordering::AcqRel) + 1;
        trace!(index, closed, capacity = self.capacity(), "slot closed");

        if closed == self.capacity() && !self.close_done.swap(true, Ordering::AcqRel) {
            handler.on_close_msg_done();
        }
    }

    /// Loop thread: close every slot's handle, bypassing the ready queue.
    pub fn close_async_msgs(&self) {
        self.assert_loop_thread();
        for slot in self.slots.iter() {
            slot.async_handle.close();
        }
    }

    pub(crate) fn pool_id(&self) -> u64 {
        self.pool
    }
}
