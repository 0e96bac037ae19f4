//! In-process transport: the consumer-facing half of the engine.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info, warn};

use crate::error::{MqError, MqResult};
use crate::Core::EventLoop::panic_message;
use crate::Core::Loop;
use crate::MQ::event_queue::{AfterAction, MqEventHandler, MqEventQueue, SlotRef};
use crate::MQ::Buffer::RingBuffer;
use crate::MQ::Structs::{Callbacks, MqEvent, MqMachineState, MqMsg, MqParams, MqType};

/// Everything guarded by the wait lock.
struct WaitState {
    state: MqMachineState,
    enabled: bool,
    /// Single producer (loop thread), single consumer.
    receives: RingBuffer<MqMsg>,
}

/// Send pool + receive queue + lifecycle state machine.
pub struct MqLocalQueue {
    events: MqEventQueue,
    params: MqParams,
    callbacks: Callbacks,
    wait_lock: Mutex<WaitState>,
    wait_cond: Condvar,
    sending: AtomicUsize,
}

impl MqLocalQueue {
    /// Build a local queue whose slots are bound to `event_loop`.
    ///
    /// Call from the thread that will run the loop. `params.recv_cb` is used
    /// when `callbacks` carries no receive callback.
    pub fn new(event_loop: &Loop, params: MqParams, mut callbacks: Callbacks) -> MqResult<Arc<Self>> {
        if params.typ != MqType::Local {
            error!(typ = params.typ.name(), "local queue needs a local transport type");
            return Err(MqError::illegal_argument(format!(
                "unsupported type for local queue: {}",
                params.typ.name()
            )));
        }
        params.validate()?;

        if callbacks.recv_cb.is_none() {
            callbacks.recv_cb = params.recv_cb.clone();
        }

        Ok(Arc::new_cyclic(|weak: &Weak<MqLocalQueue>| {
            let owner: Weak<dyn MqEventHandler> = weak.clone();
            MqLocalQueue {
                events: MqEventQueue::new(
                    event_loop,
                    params.send_queue_size,
                    params.send_msg_size,
                    owner,
                ),
                wait_lock: Mutex::new(WaitState {
                    state: MqMachineState::Active,
                    enabled: false,
                    receives: RingBuffer::new(params.recv_queue_size),
                }),
                wait_cond: Condvar::new(),
                sending: AtomicUsize::new(0),
                params,
                callbacks,
            }
        }))
    }

    pub fn params(&self) -> &MqParams {
        &self.params
    }

    pub fn state(&self) -> MqMachineState {
        self.wait_lock.lock().state
    }

    pub fn is_enabled(&self) -> bool {
        self.wait_lock.lock().enabled
    }

    /// Sends currently between their state check and their enqueue.
    pub fn sending_count(&self) -> usize {
        self.sending.load(Ordering::Acquire)
    }

    /// Messages waiting in the receive queue.
    pub fn recv_pending(&self) -> usize {
        self.wait_lock.lock().receives.len()
    }

    /// Hand `msg` to the loop. Fails fast with [`MqError::IllegalState`] once
    /// the close protocol has started and with [`MqError::NotReady`] when the
    /// send pool is exhausted.
    pub fn send(&self, msg: &MqMsg) -> MqResult<()> {
        {
            let guard = self.wait_lock.lock();
            if guard.state != MqMachineState::Active {
                return Err(MqError::IllegalState {
                    state: guard.state.name(),
                });
            }
            // Counted while the state is pinned, so a close never misses it.
            self.sending.fetch_add(1, Ordering::AcqRel);
        }

        let result = self.events.enqueue(msg);
        self.sending.fetch_sub(1, Ordering::AcqRel);

        match result {
            // The slot handles were closed under us: the close won the race.
            Err(MqError::Closing) => Err(MqError::IllegalState {
                state: self.state().name(),
            }),
            other => other,
        }
    }

    /// Single non-blocking receive attempt.
    pub fn recv(&self) -> MqResult<MqMsg> {
        self.wait_lock.lock().receives.dequeue().ok_or(MqError::Empty)
    }

    /// Receive, blocking up to `timeout` (`Duration::ZERO` waits forever).
    ///
    /// Returns [`MqError::Canceled`] once the queue is closed or destroyed and
    /// nothing is left to read, [`MqError::Timeout`] when the budget runs out.
    pub fn recv_wait(&self, timeout: Duration) -> MqResult<MqMsg> {
        let begin = Instant::now();
        let mut guard = self.wait_lock.lock();
        loop {
            if let Some(msg) = guard.receives.dequeue() {
                return Ok(msg);
            }
            if guard.state.is_finished() {
                return Err(MqError::Canceled);
            }
            self.wait(&mut guard, begin, timeout)?;
        }
    }

    /// Block until the transport reports activation, up to `timeout`
    /// (`Duration::ZERO` waits forever).
    pub fn wait_enable(&self, timeout: Duration) -> MqResult<()> {
        let begin = Instant::now();
        let mut guard = self.wait_lock.lock();
        loop {
            if guard.enabled {
                return Ok(());
            }
            if guard.state.is_finished() {
                return Err(MqError::Canceled);
            }
            self.wait(&mut guard, begin, timeout)?;
        }
    }

    fn wait(
        &self,
        guard: &mut parking_lot::MutexGuard<'_, WaitState>,
        begin: Instant,
        timeout: Duration,
    ) -> MqResult<()> {
        if timeout.is_zero() {
            self.wait_cond.wait(guard);
            return Ok(());
        }
        let deadline = begin + timeout;
        if Instant::now() >= deadline {
            return Err(MqError::Timeout);
        }
        self.wait_cond.wait_until(guard, deadline);
        Ok(())
    }

    /// Move to `DESTROYING` and wake every blocked waiter.
    ///
    /// Also asks the loop to close the slot handles if nothing has yet, so a
    /// loop thread driving this queue can finish.
    pub fn destroy(&self) {
        let previous = {
            let mut guard = self.wait_lock.lock();
            let previous = guard.state;
            if previous == MqMachineState::Destroying {
                return;
            }
            guard.state = MqMachineState::Destroying;
            guard.enabled = false;
            self.wait_cond.notify_all();
            previous
        };

        if previous == MqMachineState::Active {
            if let Err(e) = self.events.enqueue_close() {
                debug!(error = %e, "no close message for destroyed queue");
            }
        }
    }

    /// Loop thread: report the in-process peer to `OnAccept`.
    ///
    /// An accepted peer enables the queue; a refused one (or a panicking
    /// callback) starts the close protocol right away.
    pub fn activate(&self) -> bool {
        let peer = self.params.peer_id();
        let accepted = catch_unwind(AssertUnwindSafe(|| self.callbacks.on_accept(peer)))
            .unwrap_or_else(|payload| {
                let reason = panic_message(payload.as_ref());
                error!(peer, %reason, "accept callback panicked");
                false
            });
        if !accepted {
            warn!(peer, "peer refused, closing local queue");
            self.begin_close();
            return false;
        }

        let mut guard = self.wait_lock.lock();
        if guard.state == MqMachineState::Active {
            guard.enabled = true;
            self.wait_cond.notify_all();
        }
        drop(guard);

        if self.params.verbose {
            info!(peer, "local queue enabled");
        }
        true
    }

    pub fn event_queue(&self) -> &MqEventQueue {
        &self.events
    }

    fn begin_close(&self) {
        {
            let mut guard = self.wait_lock.lock();
            if guard.state != MqMachineState::Active {
                if self.params.verbose {
                    warn!(state = guard.state.name(), "local queue is already closing");
                }
                return;
            }
            guard.state = MqMachineState::Closing;
        }

        info!(
            capacity = self.events.capacity(),
            "close message confirmed, closing slots"
        );
        // From here no send passes the state check; a racing one fails its wake-up.
        self.events.close_async_msgs();
    }

    fn on_read(&self, msg: &MqMsg) {
        if self.callbacks.write_cb.is_some() {
            let mut outgoing = msg.clone();
            if self.callbacks.on_write(&mut outgoing) {
                if self.params.verbose {
                    debug!("write callback consumed the message");
                }
                return;
            }
            self.deliver(&outgoing);
        } else {
            self.deliver(msg);
        }
    }

    fn deliver(&self, msg: &MqMsg) {
        if self.callbacks.on_recv(msg) {
            if self.params.verbose {
                debug!(len = msg.len(), "receive callback consumed the message");
            }
            return;
        }

        let mut copy = MqMsg::with_capacity(self.params.recv_msg_size.max(msg.len()));
        copy.copy_from(msg);

        let result = {
            let guard = self.wait_lock.lock();
            let result = guard.receives.enqueue(copy);
            if result.is_ok() {
                self.wait_cond.notify_one();
            }
            result.map(|()| guard.receives.len())
        };

        match result {
            Ok(pending) => {
                if self.params.verbose {
                    debug!(pending, "receive enqueue success");
                }
            }
            Err(_) => {
                let e = MqError::PushFailed {
                    capacity: self.params.recv_queue_size,
                };
                error!(error = %e, "receive enqueue error, message dropped");
            }
        }
    }
}

impl MqEventHandler for MqLocalQueue {
    fn event_queue(&self) -> &MqEventQueue {
        &self.events
    }

    fn on_msg(&self, slot: SlotRef<'_>) -> AfterAction {
        let state = self.state();
        if state != MqMachineState::Active {
            if state == MqMachineState::Destroying && slot.event() == MqEvent::Close {
                self.events.close_async_msgs();
            } else if self.params.verbose {
                warn!(state = state.name(), event = slot.event().name(), "skip message in non-active state");
            }
            return AfterAction::Done;
        }

        match slot.event() {
            MqEvent::Close => self.begin_close(),
            MqEvent::Data | MqEvent::None => self.on_read(slot.msg()),
        }
        AfterAction::Done
    }

    fn on_close_msg_done(&self) {
        let mut guard = self.wait_lock.lock();
        if guard.state.can_transition(MqMachineState::Closed) {
            guard.state = MqMachineState::Closed;
        }
        guard.enabled = false;
        self.wait_cond.notify_all();
        drop(guard);

        info!("local queue closed");
    }
}

impl Drop for MqLocalQueue {
    fn drop(&mut self) {
        self.destroy();
    }
}
