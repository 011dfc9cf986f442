use crate::core::errors::LiveApiError;
use tokio::sync::mpsc;

/// Ready state of a transport, numbered like the browser WebSocket API
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ReadyState {
    Connecting = 0,
    Open = 1,
    Closing = 2,
    Closed = 3,
}

impl ReadyState {
    pub const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Connecting,
            1 => Self::Open,
            2 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

/// Lifecycle reactions a transport reports back to its session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Open,
    Close,
    Error(String),
    Message(String),
}

/// Channel a transport reports its events into
///
/// Every sink is stamped with the connection generation it was created for,
/// so the session can discard events coming from a transport it replaced.
#[derive(Debug, Clone)]
pub struct EventSink {
    generation: u64,
    tx: mpsc::UnboundedSender<(u64, TransportEvent)>,
}

impl EventSink {
    pub fn new(generation: u64, tx: mpsc::UnboundedSender<(u64, TransportEvent)>) -> Self {
        Self { generation, tx }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Report an event; returns false once the session is gone
    pub fn emit(&self, event: TransportEvent) -> bool {
        self.tx.send((self.generation, event)).is_ok()
    }
}

/// A single connection owned by the session
///
/// Implementations must never block: `send` either hands the frame to the
/// wire or fails.
pub trait Transport: Send {
    /// Wire the session's reactions to this transport; called once, right
    /// after the session installs it
    fn attach(&mut self, sink: EventSink);

    fn ready_state(&self) -> ReadyState;

    fn send(&mut self, frame: String) -> Result<(), LiveApiError>;

    fn close(&mut self);

    fn is_open(&self) -> bool {
        self.ready_state() == ReadyState::Open
    }
}

/// Creates a fresh transport for every (re)connect
pub trait TransportFactory: Send + Sync {
    fn open(&self, url: &str) -> Result<Box<dyn Transport>, LiveApiError>;
}
