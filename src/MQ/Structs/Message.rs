// Message value carried through slots and the receive queue.

use std::fmt;

/// What a message asks the receiving side to do.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum MqEvent {
    #[default]
    None,
    /// Payload for the consumer.
    Data,
    /// Start the close handshake of the queue.
    Close,
}

impl MqEvent {
    pub fn name(self) -> &'static str {
        match self {
            MqEvent::None => "NONE",
            MqEvent::Data => "DATA",
            MqEvent::Close => "CLOSE",
        }
    }
}

impl fmt::Display for MqEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An event kind plus an owned byte payload.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct MqMsg {
    event: MqEvent,
    payload: Vec<u8>,
}

impl MqMsg {
    pub fn new(event: MqEvent, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            event,
            payload: payload.into(),
        }
    }

    /// A `DATA` message.
    pub fn data(payload: impl Into<Vec<u8>>) -> Self {
        Self::new(MqEvent::Data, payload)
    }

    /// An empty `CLOSE` message.
    pub fn close() -> Self {
        Self::new(MqEvent::Close, Vec::new())
    }

    /// An empty `NONE` message with `capacity` bytes reserved.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            event: MqEvent::None,
            payload: Vec::with_capacity(capacity),
        }
    }

    #[inline]
    pub fn event(&self) -> MqEvent {
        self.event
    }

    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    pub fn set_event(&mut self, event: MqEvent) {
        self.event = event;
    }

    /// Replace the payload, reusing the existing allocation.
    pub fn set_payload(&mut self, payload: &[u8]) {
        self.payload.clear();
        self.payload.extend_from_slice(payload);
    }

    /// Overwrite `self` with `other` without giving up `self`'s buffer.
    pub fn copy_from(&mut self, other: &MqMsg) {
        self.event = other.event;
        self.set_payload(&other.payload);
    }

    /// Payload as UTF-8, replacing invalid sequences.
    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }

    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }
}

impl fmt::Debug for MqMsg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MqMsg")
            .field("event", &self.event)
            .field("len", &self.payload.len())
            .finish()
    }
}

impl From<&[u8]> for MqMsg {
    fn from(value: &[u8]) -> Self {
        MqMsg::data(value)
    }
}

impl From<Vec<u8>> for MqMsg {
    fn from(value: Vec<u8>) -> Self {
        MqMsg::data(value)
    }
}

impl From<&str> for MqMsg {
    fn from(value: &str) -> Self {
        MqMsg::data(value.as_bytes())
    }
}

impl From<String> for MqMsg {
    fn from(value: String) -> Self {
        MqMsg::data(value.into_bytes())
    }
}
