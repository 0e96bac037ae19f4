//! Result codes surfaced by the message-queue engine.

/// Errors returned by queue, node and loop operations.
///
/// `Ok(())` plays the role of `SUCCESS`; every other outcome is one of these.
#[derive(Debug, thiserror::Error)]
pub enum MqError {
    /// Every slot of the send pool is in flight. Retry, drop, or back off.
    #[error("no ready slot: all {capacity} slots are in flight")]
    NotReady {
        /// Size of the slot pool.
        capacity: usize,
    },

    /// The operation is not valid in the current lifecycle state.
    #[error("illegal state: {state}")]
    IllegalState {
        /// Name of the state the queue was in.
        state: &'static str,
    },

    /// A blocked wait was woken by queue shutdown or destruction.
    #[error("wait canceled")]
    Canceled,

    /// The wait budget was exhausted.
    #[error("timed out")]
    Timeout,

    /// Non-blocking receive found nothing.
    #[error("receive queue is empty")]
    Empty,

    /// The receive ring buffer refused a delivered message.
    #[error("receive queue push failed: capacity {capacity}")]
    PushFailed {
        /// Capacity of the receive ring.
        capacity: usize,
    },

    /// An argument was rejected, e.g. a slot handle that does not belong to the pool.
    #[error("illegal argument: {message}")]
    IllegalArgument {
        /// What was wrong with it.
        message: String,
    },

    /// Payload exceeds the configured maximum message size.
    #[error("message too large ({size} > {max})")]
    MessageTooLarge {
        /// Payload length.
        size: usize,
        /// Configured limit.
        max: usize,
    },

    /// The async handle is closing or its loop is gone.
    #[error("handle is closing")]
    Closing,

    /// The requested transport is not provided by this crate.
    #[error("unsupported transport: {0}")]
    Unsupported(&'static str),

    /// A node URI could not be converted to parameters.
    #[error("invalid uri {uri:?}: {message}")]
    InvalidUri {
        /// The offending URI.
        uri: String,
        /// Why it was rejected.
        message: String,
    },

    /// A loop callback panicked; the loop stopped servicing handles.
    #[error("event loop callback panicked: {0}")]
    LoopPanicked(String),

    /// Spawning or joining the loop thread failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl MqError {
    /// Whether the same call may succeed later without any other change.
    pub fn is_retryable(&self) -> bool {
        matches!(self, MqError::NotReady { .. } | MqError::Timeout | MqError::Empty)
    }

    pub(crate) fn illegal_argument(message: impl Into<String>) -> Self {
        MqError::IllegalArgument {
            message: message.into(),
        }
    }
}

/// Shorthand used throughout the crate.
pub type MqResult<T> = Result<T, MqError>;
