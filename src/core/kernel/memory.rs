use crate::core::errors::LiveApiError;
use crate::core::kernel::transport::{
    EventSink, ReadyState, Transport, TransportEvent, TransportFactory,
};
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug)]
struct MemoryState {
    url: String,
    ready: ReadyState,
    sent: Vec<String>,
    sink: Option<EventSink>,
    close_calls: usize,
}

/// In-memory transport for driving a session without a network
///
/// The session owns the `MemoryTransport`; the test keeps a `MemoryHandle`
/// to the same state to inspect sent frames and inject lifecycle events.
pub struct MemoryTransport {
    state: Arc<Mutex<MemoryState>>,
}

/// Test-side view of a `MemoryTransport`
#[derive(Debug, Clone)]
pub struct MemoryHandle {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryTransport {
    pub fn new(url: impl Into<String>) -> (Self, MemoryHandle) {
        let state = Arc::new(Mutex::new(MemoryState {
            url: url.into(),
            ready: ReadyState::Connecting,
            sent: Vec::new(),
            sink: None,
            close_calls: 0,
        }));
        (
            Self {
                state: Arc::clone(&state),
            },
            MemoryHandle { state },
        )
    }
}

fn lock(state: &Mutex<MemoryState>) -> MutexGuard<'_, MemoryState> {
    state
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

impl Transport for MemoryTransport {
    fn attach(&mut self, sink: EventSink) {
        lock(&self.state).sink = Some(sink);
    }

    fn ready_state(&self) -> ReadyState {
        lock(&self.state).ready
    }

    fn send(&mut self, frame: String) -> Result<(), LiveApiError> {
        let mut state = lock(&self.state);
        if state.ready != ReadyState::Open {
            return Err(LiveApiError::NetworkError(
                "Memory transport not open".to_string(),
            ));
        }
        state.sent.push(frame);
        Ok(())
    }

    fn close(&mut self) {
        let sink = {
            let mut state = lock(&self.state);
            state.close_calls += 1;
            if state.ready == ReadyState::Closed {
                return;
            }
            state.ready = ReadyState::Closed;
            state.sink.clone()
        };
        if let Some(sink) = sink {
            sink.emit(TransportEvent::Close);
        }
    }
}

impl MemoryHandle {
    fn emit(&self, event: TransportEvent) -> bool {
        let sink = lock(&self.state).sink.clone();
        sink.is_some_and(|sink| sink.emit(event))
    }

    pub fn url(&self) -> String {
        lock(&self.state).url.clone()
    }

    /// Mark the transport open and report it
    pub fn open(&self) -> bool {
        lock(&self.state).ready = ReadyState::Open;
        self.emit(TransportEvent::Open)
    }

    /// Deliver a server frame
    pub fn deliver(&self, frame: &Value) -> bool {
        self.emit(TransportEvent::Message(frame.to_string()))
    }

    /// Deliver raw text exactly as given
    pub fn deliver_text(&self, text: impl Into<String>) -> bool {
        self.emit(TransportEvent::Message(text.into()))
    }

    /// Simulate the peer dropping the connection
    pub fn drop_connection(&self) -> bool {
        lock(&self.state).ready = ReadyState::Closed;
        self.emit(TransportEvent::Close)
    }

    /// Simulate a low-level socket error
    pub fn fail(&self, reason: impl Into<String>) -> bool {
        self.emit(TransportEvent::Error(reason.into()))
    }

    pub fn ready_state(&self) -> ReadyState {
        lock(&self.state).ready
    }

    pub fn is_attached(&self) -> bool {
        lock(&self.state).sink.is_some()
    }

    pub fn close_calls(&self) -> usize {
        lock(&self.state).close_calls
    }

    /// Frames sent so far, as raw text
    pub fn sent(&self) -> Vec<String> {
        lock(&self.state).sent.clone()
    }

    /// Frames sent so far, parsed as JSON
    pub fn sent_json(&self) -> Vec<Value> {
        self.sent()
            .iter()
            .filter_map(|frame| serde_json::from_str(frame).ok())
            .collect()
    }
}

/// Factory handing out `MemoryTransport`s and keeping a handle to each
#[derive(Debug, Clone, Default)]
pub struct MemoryConnector {
    handles: Arc<Mutex<Vec<MemoryHandle>>>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handles of every transport created so far, oldest first
    pub fn handles(&self) -> Vec<MemoryHandle> {
        self.handles
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    pub fn latest(&self) -> Option<MemoryHandle> {
        self.handles().last().cloned()
    }

    pub fn connection_count(&self) -> usize {
        self.handles().len()
    }
}

impl TransportFactory for MemoryConnector {
    fn open(&self, url: &str) -> Result<Box<dyn Transport>, LiveApiError> {
        let (transport, handle) = MemoryTransport::new(url);
        self.handles
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(handle);
        Ok(Box::new(transport))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::mpsc;

    #[test]
    fn test_send_requires_open() {
        let (mut transport, handle) = MemoryTransport::new("mem://a");
        assert!(transport.send("{}".to_string()).is_err());

        let (tx, mut rx) = mpsc::unbounded_channel();
        transport.attach(EventSink::new(1, tx));
        assert!(handle.open());
        assert_eq!(rx.try_recv().unwrap(), (1, TransportEvent::Open));

        transport.send(json!({"ping": 1}).to_string()).unwrap();
        assert_eq!(handle.sent_json(), vec![json!({"ping": 1})]);
    }

    #[test]
    fn test_close_reports_once() {
        let (mut transport, handle) = MemoryTransport::new("mem://a");
        let (tx, mut rx) = mpsc::unbounded_channel();
        transport.attach(EventSink::new(2, tx));
        handle.open();
        let _ = rx.try_recv();

        transport.close();
        transport.close();
        assert_eq!(rx.try_recv().unwrap(), (2, TransportEvent::Close));
        assert!(rx.try_recv().is_err());
        assert_eq!(handle.close_calls(), 2);
    }

    #[test]
    fn test_connector_tracks_handles() {
        let connector = MemoryConnector::new();
        connector.open("mem://one").unwrap();
        connector.open("mem://two").unwrap();
        assert_eq!(connector.connection_count(), 2);
        assert_eq!(connector.latest().unwrap().url(), "mem://two");
    }
}
