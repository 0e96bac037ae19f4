//! Public facade: one node, one loop thread, one transport.

use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_utils::Backoff;
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::error::{MqError, MqResult};
use crate::Core::Loop;
use crate::MQ::local_queue::MqLocalQueue;
use crate::MQ::Structs::{Callbacks, MqEvent, MqMachineState, MqMode, MqMsg, MqParams, MqType};

/// A bound or connected message-queue node.
///
/// The node owns a loop thread that services the transport. Sends never
/// block; receives come from the transport's receive queue.
pub struct MqNode {
    params: MqParams,
    mode: MqMode,
    queue: Arc<MqLocalQueue>,
    runner: Mutex<Option<JoinHandle<MqResult<()>>>>,
}

impl MqNode {
    pub fn bind(params: MqParams) -> MqResult<Self> {
        Self::open(params, MqMode::Bind, Callbacks::default())
    }

    pub fn connect(params: MqParams) -> MqResult<Self> {
        Self::open(params, MqMode::Connect, Callbacks::default())
    }

    pub fn bind_uri(uri: &str) -> MqResult<Self> {
        Self::bind(MqParams::from_uri(uri)?)
    }

    pub fn connect_uri(uri: &str) -> MqResult<Self> {
        Self::connect(MqParams::from_uri(uri)?)
    }

    /// Start the loop thread, build the transport on it, and wire `callbacks`.
    pub fn open(params: MqParams, mode: MqMode, callbacks: Callbacks) -> MqResult<Self> {
        params.validate()?;
        if params.typ != MqType::Local {
            error!(typ = params.typ.name(), mode = mode.name(), "transport not available");
            return Err(MqError::Unsupported(params.typ.name()));
        }

        let (tx, rx) = mpsc::sync_channel::<MqResult<Arc<MqLocalQueue>>>(1);
        let thread_params = params.clone();
        let runner = thread::Builder::new()
            .name(format!("mq-{}-{}", params.typ.name(), mode.name()))
            .spawn(move || run_loop(thread_params, mode, callbacks, tx))?;

        let queue = match rx.recv() {
            Ok(Ok(queue)) => queue,
            Ok(Err(e)) => {
                let _ = runner.join();
                return Err(e);
            }
            Err(_) => {
                let reason = match runner.join() {
                    Ok(Err(e)) => e.to_string(),
                    _ => "loop thread exited before the transport was ready".to_string(),
                };
                return Err(MqError::LoopPanicked(reason));
            }
        };

        let node = Self {
            params,
            mode,
            queue,
            runner: Mutex::new(Some(runner)),
        };

        let timeout = node.params.wait_on_activation_timeout;
        if mode == MqMode::Connect && !timeout.is_zero() {
            if node.params.verbose {
                info!(?timeout, "waiting for activation");
            }
            if let Err(e) = node.wait_enable(timeout) {
                warn!(error = %e, "activation wait ended without activation");
            }
        }
        Ok(node)
    }

    pub fn params(&self) -> &MqParams {
        &self.params
    }

    pub fn mode(&self) -> MqMode {
        self.mode
    }

    pub fn state(&self) -> MqMachineState {
        self.queue.state()
    }

    pub fn is_enabled(&self) -> bool {
        self.queue.is_enabled()
    }

    pub fn local_queue(&self) -> &Arc<MqLocalQueue> {
        &self.queue
    }

    /// Block until the transport is active, up to `timeout` (`ZERO` = forever).
    pub fn wait_enable(&self, timeout: Duration) -> MqResult<()> {
        self.queue.wait_enable(timeout)
    }

    pub fn send_msg(&self, msg: &MqMsg) -> MqResult<()> {
        self.queue.send(msg)
    }

    /// Send raw bytes as a `DATA` message.
    pub fn send<T: AsRef<[u8]>>(&self, bytes: T) -> MqResult<()> {
        self.send_msg(&MqMsg::data(bytes.as_ref()))
    }

    pub fn send_str(&self, text: &str) -> MqResult<()> {
        self.send(text)
    }

    pub fn send_event<T: AsRef<[u8]>>(&self, event: MqEvent, bytes: T) -> MqResult<()> {
        self.send_msg(&MqMsg::new(event, bytes.as_ref()))
    }

    /// Ask the loop to run the close protocol.
    pub fn send_close_msg(&self) -> MqResult<()> {
        self.send_msg(&MqMsg::close())
    }

    pub fn recv(&self) -> MqResult<MqMsg> {
        self.queue.recv()
    }

    pub fn recv_wait(&self, timeout: Duration) -> MqResult<MqMsg> {
        self.queue.recv_wait(timeout)
    }

    /// Wait for the loop thread to exit and return its result.
    ///
    /// Later calls (and calls racing the first) return `Ok(())` once the
    /// first join has finished.
    pub fn join(&self) -> MqResult<()> {
        let mut runner = self.runner.lock();
        match runner.take() {
            Some(handle) => handle
                .join()
                .unwrap_or_else(|_| Err(MqError::LoopPanicked("loop thread panicked".to_string()))),
            None => Ok(()),
        }
    }

    fn is_loop_finished(&self) -> bool {
        self.runner.lock().as_ref().map_or(true, JoinHandle::is_finished)
    }

    fn send_close_for_drop(&self) {
        let backoff = Backoff::new();
        loop {
            match self.send_close_msg() {
                Ok(()) => {
                    if self.params.verbose {
                        debug!(mode = self.mode.name(), "close message sent");
                    }
                    return;
                }
                // Slots are still being serviced; one frees up shortly.
                Err(MqError::NotReady { .. }) if !self.is_loop_finished() => backoff.snooze(),
                Err(e) => {
                    if self.params.verbose {
                        warn!(mode = self.mode.name(), error = %e, "failed to send close message");
                    }
                    return;
                }
            }
        }
    }
}

impl Drop for MqNode {
    fn drop(&mut self) {
        self.send_close_for_drop();
        if let Err(e) = self.join() {
            error!(error = %e, "loop ended with error");
        }
        self.queue.destroy();

        if self.params.verbose {
            info!(typ = self.params.typ.name(), mode = self.mode.name(), "node done");
        }
    }
}

fn run_loop(
    params: MqParams,
    mode: MqMode,
    callbacks: Callbacks,
    ready: mpsc::SyncSender<MqResult<Arc<MqLocalQueue>>>,
) -> MqResult<()> {
    let event_loop = Loop::new();
    let queue = match MqLocalQueue::new(&event_loop, params, callbacks) {
        Ok(queue) => queue,
        Err(e) => {
            let _ = ready.send(Err(e));
            return Ok(());
        }
    };
    if ready.send(Ok(queue.clone())).is_err() {
        return Ok(());
    }

    let verbose = queue.params().verbose;
    queue.activate();

    if verbose {
        info!(mode = mode.name(), "loop start");
    }
    let result = event_loop.run();
    match &result {
        Ok(()) => {
            if verbose {
                info!(mode = mode.name(), "loop end success");
            }
        }
        Err(e) => {
            error!(mode = mode.name(), error = %e, "loop end error");
            // Nothing services the slots any more; fail senders and waiters.
            queue.destroy();
        }
    }
    result
}
