use std::fmt;

use crate::Core::Loop;
use crate::MQ::Buffer::RingBuffer;
use crate::MQ::{MqEventQueue, MqLocalQueue, MqNode};

/// Debug function for RingBuffer
///
/// Shows capacity and the (potentially inaccurate) fill level, never the values.
pub fn debug_ring_buffer<T>(buffer: &RingBuffer<T>, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("RingBuffer")
        .field("capacity", &buffer.capacity())
        .field("len", &buffer.len())
        .finish_non_exhaustive()
}

/// Debug function for MqEventQueue
///
/// Shows:
/// - Pool ID
/// - Slot count and how many are ready / in flight
/// - Close quorum progress
pub fn debug_event_queue(queue: &MqEventQueue, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("MqEventQueue")
        .field("pool", &queue.pool_id())
        .field("capacity", &queue.capacity())
        .field("max_msg_size", &queue.max_msg_size())
        .field("ready", &queue.ready_count())
        .field("in_flight", &queue.in_flight_count())
        .field("closed", &queue.closed_count())
        .finish()
}

pub fn debug_local_queue(queue: &MqLocalQueue, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("MqLocalQueue")
        .field("state", &queue.state())
        .field("enabled", &queue.is_enabled())
        .field("sending", &queue.sending_count())
        .field("recv_pending", &queue.recv_pending())
        .field("events", queue.event_queue())
        .finish()
}

pub fn debug_node(node: &MqNode, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("MqNode")
        .field("mode", &node.mode())
        .field("params", node.params())
        .field("queue", node.local_queue())
        .finish()
}

pub fn debug_loop(event_loop: &Loop, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Loop")
        .field("alive_handles", &event_loop.alive_handles())
        .field("runner", &event_loop.runner_thread())
        .finish()
}

// Debug proxy implementations that call the standalone debug functions
impl<T> fmt::Debug for RingBuffer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        debug_ring_buffer(self, f)
    }
}

impl fmt::Debug for MqEventQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        debug_event_queue(self, f)
    }
}

impl fmt::Debug for MqLocalQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        debug_local_queue(self, f)
    }
}

impl fmt::Debug for MqNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        debug_node(self, f)
    }
}

impl fmt::Debug for Loop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        debug_loop(self, f)
    }
}
