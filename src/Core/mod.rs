pub mod futex;
pub mod EventLoop;

pub use futex::Signal;
pub use EventLoop::{AsyncCallback, AsyncHandle, Loop};
