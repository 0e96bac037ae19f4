mod builder;
pub mod event_queue;
pub mod local_queue;
pub mod node;

pub use builder::NodeBuilder;
pub use event_queue::{AfterAction, MqEventHandler, MqEventQueue, SlotHandle, SlotRef};
pub use local_queue::MqLocalQueue;
pub use node::MqNode;

pub mod Buffer {
    pub mod Buffer;
    pub mod Buffer_impl;
    pub mod layout;
    pub use Buffer::RingBuffer; // re-export for stable path
    pub use layout::{calc_minimum_queue_size, checked_minimum_queue_size};
}

pub mod Structs {
    pub mod Message;
    pub mod Params;
    pub mod State;
    pub use Message::{MqEvent, MqMsg}; // re-export for stable path
    pub use Params::{Callbacks, MqMode, MqParams, MqType, OnAccept, OnRecv, OnWrite};
    pub use State::MqMachineState;
}
