//! Minimal single-threaded event loop.
//!
//! The loop owns a set of async handles. Any thread may trigger a handle; the
//! thread running [`Loop::run`] then calls the handle's [`AsyncCallback::on_async`].
//! Closing a handle queues exactly one [`AsyncCallback::on_close`]. `run` returns
//! once every handle has been closed, or after [`Loop::stop`].

use std::any::Any;
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};

use parking_lot::Mutex;
use tracing::{error, trace};

use super::futex::Signal;
use crate::error::{MqError, MqResult};

/// Callbacks bound to one async handle. Both run on the loop thread only.
pub trait AsyncCallback: Send + Sync {
    fn on_async(&self);
    fn on_close(&self);
}

#[derive(Clone, Copy, Debug)]
enum LoopEvent {
    Async(usize),
    Close(usize),
}

struct HandleEntry {
    callback: Arc<dyn AsyncCallback>,
    /// Set while an `Async` event for this handle sits in the queue.
    pending: AtomicBool,
    closing: AtomicBool,
}

struct LoopShared {
    handles: Mutex<Vec<Option<Arc<HandleEntry>>>>,
    events: Mutex<VecDeque<LoopEvent>>,
    alive: AtomicUsize,
    stopped: AtomicBool,
    signal: Signal,
    runner: Mutex<Option<ThreadId>>,
}

/// Cloneable reference to one event loop.
#[derive(Clone)]
pub struct Loop {
    shared: Arc<LoopShared>,
}

/// Loop-bound handle that can be triggered from any thread.
pub struct AsyncHandle {
    id: usize,
    entry: Arc<HandleEntry>,
    shared: Weak<LoopShared>,
}

impl Loop {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(LoopShared {
                handles: Mutex::new(Vec::new()),
                events: Mutex::new(VecDeque::new()),
                alive: AtomicUsize::new(0),
                stopped: AtomicBool::new(false),
                signal: Signal::new(),
                runner: Mutex::new(None),
            }),
        }
    }

    /// Register a new handle. It keeps the loop alive until closed.
    pub fn new_async(&self, callback: Arc<dyn AsyncCallback>) -> AsyncHandle {
        let entry = Arc::new(HandleEntry {
            callback,
            pending: AtomicBool::new(false),
            closing: AtomicBool::new(false),
        });

        let id = {
            let mut handles = self.shared.handles.lock();
            handles.push(Some(entry.clone()));
            handles.len() - 1
        };
        self.shared.alive.fetch_add(1, Ordering::AcqRel);

        AsyncHandle {
            id,
            entry,
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// Number of handles not yet closed.
    pub fn alive_handles(&self) -> usize {
        self.shared.alive.load(Ordering::Acquire)
    }

    /// Thread currently (or last) running this loop.
    pub fn runner_thread(&self) -> Option<ThreadId> {
        *self.shared.runner.lock()
    }

    /// Ask `run` to return after the event it is servicing.
    pub fn stop(&self) {
        self.shared.stopped.store(true, Ordering::Release);
        self.shared.signal.notify();
    }

    /// Service events until no live handle remains or `stop` is called.
    pub fn run(&self) -> MqResult<()> {
        *self.shared.runner.lock() = Some(thread::current().id());
        trace!(handles = self.alive_handles(), "loop start");

        loop {
            if self.shared.stopped.load(Ordering::Acquire) {
                trace!("loop stopped");
                return Ok(());
            }

            let observed = self.shared.signal.observe();
            let batch = std::mem::take(&mut *self.shared.events.lock());

            if batch.is_empty() {
                if self.alive_handles() == 0 {
                    trace!("loop end: no live handles");
                    return Ok(());
                }
                self.shared.signal.wait(observed);
                continue;
            }

            for event in batch {
                self.dispatch(event)?;
            }
        }
    }

    /// Service whatever is queued right now without blocking.
    ///
    /// Returns the number of events dispatched.
    pub fn run_pending(&self) -> MqResult<usize> {
        let batch = std::mem::take(&mut *self.shared.events.lock());
        let count = batch.len();
        for event in batch {
            self.dispatch(event)?;
        }
        Ok(count)
    }

    fn dispatch(&self, event: LoopEvent) -> MqResult<()> {
        match event {
            LoopEvent::Async(id) => {
                let entry = self.shared.handles.lock().get(id).cloned().flatten();
                if let Some(entry) = entry {
                    entry.pending.store(false, Ordering::Release);
                    guard(|| entry.callback.on_async())?;
                }
            }
            LoopEvent::Close(id) => {
                let entry = self.shared.handles.lock().get_mut(id).and_then(Option::take);
                if let Some(entry) = entry {
                    self.shared.alive.fetch_sub(1, Ordering::AcqRel);
                    guard(|| entry.callback.on_close())?;
                }
            }
        }
        Ok(())
    }
}

impl Default for Loop {
    fn default() -> Self {
        Self::new()
    }
}

fn guard(f: impl FnOnce()) -> MqResult<()> {
    catch_unwind(AssertUnwindSafe(f)).map_err(|payload| {
        let reason = panic_message(payload.as_ref());
        error!(%reason, "loop callback panicked");
        MqError::LoopPanicked(reason)
    })
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl AsyncHandle {
    /// Wake the loop so it calls `on_async` for this handle.
    ///
    /// Triggers coalesce while one is already queued. Fails once the handle
    /// is closing or the loop has been dropped.
    pub fn send(&self) -> MqResult<()> {
        let shared = self.shared.upgrade().ok_or(MqError::Closing)?;
        {
            // Same lock as `close`, so no trigger can be queued behind the close event.
            let mut events = shared.events.lock();
            if self.entry.closing.load(Ordering::Acquire) {
                return Err(MqError::Closing);
            }
            if self.entry.pending.swap(true, Ordering::AcqRel) {
                return Ok(());
            }
            events.push_back(LoopEvent::Async(self.id));
        }
        shared.signal.notify();
        Ok(())
    }

    /// Queue the close callback. Later calls are ignored.
    pub fn close(&self) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        {
            let mut events = shared.events.lock();
            if self.entry.closing.swap(true, Ordering::AcqRel) {
                return;
            }
            events.push_back(LoopEvent::Close(self.id));
        }
        shared.signal.notify();
    }

    pub fn is_closing(&self) -> bool {
        self.entry.closing.load(Ordering::Acquire)
    }
}

impl Drop for AsyncHandle {
    // A handle nobody can trigger must not keep the loop alive.
    fn drop(&mut self) {
        self.close();
    }
}
