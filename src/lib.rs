// Module naming follows project convention (MQ = Message Queue)
#[allow(non_snake_case)]
pub mod MQ;
#[allow(non_snake_case)]
pub mod Core;
#[allow(non_snake_case)]
mod Debug {
    pub mod StructDebug;
}

pub mod error;
pub mod trace;

pub use error::{MqError, MqResult};
pub use MQ::Structs::{Callbacks, MqEvent, MqMachineState, MqMode, MqMsg, MqParams, MqType};
pub use MQ::{MqLocalQueue, MqNode, NodeBuilder};
