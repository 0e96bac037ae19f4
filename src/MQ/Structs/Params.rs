// Node configuration and the callbacks a transport consumes.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::Message::MqMsg;
use crate::error::{MqError, MqResult};
use crate::MQ::Buffer::layout::{
    checked_minimum_queue_size, DEFAULT_PACKET_SIZE, DEFAULT_QUEUE_SIZE, MAX_QUEUE_SIZE,
};

/// Peer accepted (or refused) by the transport.
pub type OnAccept = Arc<dyn Fn(&str) -> bool + Send + Sync>;
/// Outgoing message about to be written; may rewrite it. `true` consumes it.
pub type OnWrite = Arc<dyn Fn(&mut MqMsg) -> bool + Send + Sync>;
/// Incoming message; `true` consumes it so it never reaches the receive queue.
pub type OnRecv = Arc<dyn Fn(&MqMsg) -> bool + Send + Sync>;

/// Peer id reported to `OnAccept` when a local node has no address.
pub const LOCAL_PEER: &str = "local";

/// Transport behind a node.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum MqType {
    /// In-process queue; the only transport provided by this crate.
    #[default]
    Local,
    Tcp,
    Pipe,
}

impl MqType {
    pub fn name(self) -> &'static str {
        match self {
            MqType::Local => "local",
            MqType::Tcp => "tcp",
            MqType::Pipe => "pipe",
        }
    }
}

/// Which side of the transport a node plays.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MqMode {
    Bind,
    Connect,
}

impl MqMode {
    pub fn name(self) -> &'static str {
        match self {
            MqMode::Bind => "bind",
            MqMode::Connect => "connect",
        }
    }
}

/// Transport callbacks. Unset callbacks fall back to the defaults:
/// accept every peer, consume nothing.
#[derive(Clone, Default)]
pub struct Callbacks {
    pub accept_cb: Option<OnAccept>,
    pub write_cb: Option<OnWrite>,
    pub recv_cb: Option<OnRecv>,
}

impl Callbacks {
    pub(crate) fn on_accept(&self, peer: &str) -> bool {
        self.accept_cb.as_ref().map_or(true, |cb| cb(peer))
    }

    pub(crate) fn on_write(&self, msg: &mut MqMsg) -> bool {
        self.write_cb.as_ref().map_or(false, |cb| cb(msg))
    }

    pub(crate) fn on_recv(&self, msg: &MqMsg) -> bool {
        self.recv_cb.as_ref().map_or(false, |cb| cb(msg))
    }
}

impl fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callbacks")
            .field("accept_cb", &self.accept_cb.is_some())
            .field("write_cb", &self.write_cb.is_some())
            .field("recv_cb", &self.recv_cb.is_some())
            .finish()
    }
}

/// Everything needed to bind or connect a node.
#[derive(Clone)]
pub struct MqParams {
    pub typ: MqType,
    pub address: String,
    pub port: u16,

    /// Slots in the send pool (rounded up to a power of two).
    pub send_queue_size: usize,
    /// Largest payload a slot carries.
    pub send_msg_size: usize,
    /// Entries in the receive queue (rounded up to a power of two).
    pub recv_queue_size: usize,
    /// Payload bytes reserved per received message.
    pub recv_msg_size: usize,

    /// How long `connect` waits for activation. Zero skips the wait.
    pub wait_on_activation_timeout: Duration,

    pub verbose: bool,

    /// Consumes received messages instead of queueing them.
    pub recv_cb: Option<OnRecv>,
}

impl Default for MqParams {
    fn default() -> Self {
        Self {
            typ: MqType::Local,
            address: String::new(),
            port: 0,
            send_queue_size: DEFAULT_QUEUE_SIZE,
            send_msg_size: DEFAULT_PACKET_SIZE,
            recv_queue_size: DEFAULT_QUEUE_SIZE,
            recv_msg_size: DEFAULT_PACKET_SIZE,
            wait_on_activation_timeout: Duration::ZERO,
            verbose: false,
            recv_cb: None,
        }
    }
}

impl fmt::Debug for MqParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MqParams")
            .field("typ", &self.typ)
            .field("address", &self.address)
            .field("port", &self.port)
            .field("send_queue_size", &self.send_queue_size)
            .field("send_msg_size", &self.send_msg_size)
            .field("recv_queue_size", &self.recv_queue_size)
            .field("recv_msg_size", &self.recv_msg_size)
            .field("wait_on_activation_timeout", &self.wait_on_activation_timeout)
            .field("verbose", &self.verbose)
            .field("recv_cb", &self.recv_cb.is_some())
            .finish()
    }
}

impl MqParams {
    pub fn local(name: impl Into<String>) -> Self {
        Self {
            address: name.into(),
            ..Self::default()
        }
    }

    /// Peer id the local transport reports on accept.
    pub fn peer_id(&self) -> &str {
        if self.address.is_empty() {
            LOCAL_PEER
        } else {
            &self.address
        }
    }

    pub fn validate(&self) -> MqResult<()> {
        let sizes = [
            ("send_queue_size", self.send_queue_size),
            ("send_msg_size", self.send_msg_size),
            ("recv_queue_size", self.recv_queue_size),
            ("recv_msg_size", self.recv_msg_size),
        ];
        for (name, value) in sizes {
            if value == 0 {
                return Err(MqError::illegal_argument(format!("{name} must be greater than zero")));
            }
        }

        for (name, value) in [
            ("send_queue_size", self.send_queue_size),
            ("recv_queue_size", self.recv_queue_size),
        ] {
            if checked_minimum_queue_size(value).is_none() {
                return Err(MqError::illegal_argument(format!(
                    "{name} {value} exceeds {MAX_QUEUE_SIZE}"
                )));
            }
        }
        Ok(())
    }

    /// Convert a node URI to parameters.
    ///
    /// Accepted forms: `local://name`, `tcp://host:port`, `pipe://path`, each
    /// optionally followed by `?key=value&...` with the keys `send_queue_size`,
    /// `send_msg_size`, `recv_queue_size`, `recv_msg_size`, `verbose` and
    /// `wait_on_activation_ms`.
    pub fn from_uri(uri: &str) -> MqResult<Self> {
        let invalid = |message: &str| MqError::InvalidUri {
            uri: uri.to_string(),
            message: message.to_string(),
        };

        let (scheme, rest) = uri.split_once("://").ok_or_else(|| invalid("missing scheme"))?;
        let (location, query) = match rest.split_once('?') {
            Some((location, query)) => (location, Some(query)),
            None => (rest, None),
        };

        let mut params = MqParams::default();
        match scheme.to_ascii_lowercase().as_str() {
            "local" => {
                params.typ = MqType::Local;
                params.address = location.to_string();
            }
            "tcp" => {
                let (host, port) = location
                    .rsplit_once(':')
                    .ok_or_else(|| invalid("tcp address needs host:port"))?;
                if host.is_empty() {
                    return Err(invalid("empty host"));
                }
                params.typ = MqType::Tcp;
                params.address = host.to_string();
                params.port = port.parse().map_err(|_| invalid("bad port"))?;
            }
            "pipe" => {
                if location.is_empty() {
                    return Err(invalid("empty pipe path"));
                }
                params.typ = MqType::Pipe;
                params.address = location.to_string();
            }
            _ => return Err(invalid("unknown scheme")),
        }

        for pair in query.into_iter().flat_map(|q| q.split('&')).filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            let size = || value.parse::<usize>().map_err(|_| invalid(&format!("bad value for {key}")));
            match key {
                "send_queue_size" => params.send_queue_size = size()?,
                "send_msg_size" => params.send_msg_size = size()?,
                "recv_queue_size" => params.recv_queue_size = size()?,
                "recv_msg_size" => params.recv_msg_size = size()?,
                "wait_on_activation_ms" => {
                    params.wait_on_activation_timeout = Duration::from_millis(size()? as u64)
                }
                "verbose" => {
                    params.verbose = match value {
                        "" | "1" | "true" => true,
                        "0" | "false" => false,
                        _ => return Err(invalid("bad value for verbose")),
                    }
                }
                _ => return Err(invalid(&format!("unknown key {key}"))),
            }
        }

        params.validate()?;
        Ok(params)
    }
}
