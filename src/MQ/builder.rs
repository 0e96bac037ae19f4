use std::sync::Arc;
use std::time::Duration;

use super::node::MqNode;
use super::Structs::{Callbacks, MqMode, MqMsg, MqParams, MqType};
use crate::error::MqResult;

pub struct NodeBuilder {
    params: MqParams,
    callbacks: Callbacks,
}

impl Default for NodeBuilder {
    fn default() -> Self {
        Self {
            params: MqParams::default(), // local transport, 1024 x 1024B queues
            callbacks: Callbacks::default(),
        }
    }
}

impl NodeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_params(params: MqParams) -> Self {
        Self {
            params,
            callbacks: Callbacks::default(),
        }
    }

    pub fn with_type(mut self, typ: MqType) -> Self {
        self.params.typ = typ;
        self
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.params.address = address.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.params.port = port;
        self
    }

    pub fn with_send_queue_size(mut self, size: usize) -> Self {
        self.params.send_queue_size = size;
        self
    }

    pub fn with_send_msg_size(mut self, size: usize) -> Self {
        self.params.send_msg_size = size;
        self
    }

    pub fn with_recv_queue_size(mut self, size: usize) -> Self {
        self.params.recv_queue_size = size;
        self
    }

    pub fn with_recv_msg_size(mut self, size: usize) -> Self {
        self.params.recv_msg_size = size;
        self
    }

    pub fn with_wait_on_activation(mut self, timeout: Duration) -> Self {
        self.params.wait_on_activation_timeout = timeout;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.params.verbose = verbose;
        self
    }

    pub fn with_accept_callback<F>(mut self, cb: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        self.callbacks.accept_cb = Some(Arc::new(cb));
        self
    }

    pub fn with_write_callback<F>(mut self, cb: F) -> Self
    where
        F: Fn(&mut MqMsg) -> bool + Send + Sync + 'static,
    {
        self.callbacks.write_cb = Some(Arc::new(cb));
        self
    }

    pub fn with_recv_callback<F>(mut self, cb: F) -> Self
    where
        F: Fn(&MqMsg) -> bool + Send + Sync + 'static,
    {
        self.callbacks.recv_cb = Some(Arc::new(cb));
        self
    }

    pub fn params(&self) -> &MqParams {
        &self.params
    }

    pub fn bind(self) -> MqResult<MqNode> {
        MqNode::open(self.params, MqMode::Bind, self.callbacks)
    }

    pub fn connect(self) -> MqResult<MqNode> {
        MqNode::open(self.params, MqMode::Connect, self.callbacks)
    }
}
