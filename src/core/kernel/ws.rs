use crate::core::errors::LiveApiError;
use crate::core::kernel::transport::{
    EventSink, ReadyState, Transport, TransportEvent, TransportFactory,
};
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tracing::{debug, error, instrument, warn};

/// WebSocket transport configuration
#[derive(Debug, Clone)]
pub struct WsConfig {
    /// Connection timeout in milliseconds
    pub connect_timeout_ms: u64,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 10_000, // 10 seconds
        }
    }
}

/// Factory producing a fresh tungstenite connection per (re)connect
#[derive(Debug, Clone, Default)]
pub struct TungsteniteConnector {
    config: WsConfig,
}

impl TungsteniteConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set custom WebSocket configuration
    pub fn with_config(mut self, config: WsConfig) -> Self {
        self.config = config;
        self
    }
}

impl TransportFactory for TungsteniteConnector {
    fn open(&self, url: &str) -> Result<Box<dyn Transport>, LiveApiError> {
        Ok(Box::new(TungsteniteTransport::new(
            url.to_string(),
            self.config.clone(),
        )))
    }
}

/// Tungstenite-based transport
///
/// The socket lives in a background task started by `attach`; frames to send
/// are queued on an unbounded channel so `send` never waits on the network.
pub struct TungsteniteTransport {
    url: String,
    config: WsConfig,
    state: Arc<AtomicU8>,
    outgoing: Option<mpsc::UnboundedSender<Message>>,
}

impl TungsteniteTransport {
    pub fn new(url: String, config: WsConfig) -> Self {
        Self {
            url,
            config,
            state: Arc::new(AtomicU8::new(ReadyState::Connecting as u8)),
            outgoing: None,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Transport for TungsteniteTransport {
    fn attach(&mut self, sink: EventSink) {
        let (tx, rx) = mpsc::unbounded_channel();
        self.outgoing = Some(tx);
        tokio::spawn(run_connection(
            self.url.clone(),
            self.config.clone(),
            Arc::clone(&self.state),
            rx,
            sink,
        ));
    }

    fn ready_state(&self) -> ReadyState {
        ReadyState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn send(&mut self, frame: String) -> Result<(), LiveApiError> {
        if !self.is_open() {
            return Err(LiveApiError::NetworkError(
                "WebSocket not connected".to_string(),
            ));
        }

        let outgoing = self.outgoing.as_ref().ok_or_else(|| {
            LiveApiError::NetworkError("WebSocket write stream not available".to_string())
        })?;

        outgoing.send(Message::Text(frame)).map_err(|_| {
            self.state
                .store(ReadyState::Closed as u8, Ordering::Release);
            LiveApiError::NetworkError("WebSocket writer has stopped".to_string())
        })
    }

    fn close(&mut self) {
        if self.ready_state() == ReadyState::Closed {
            return;
        }
        self.state
            .store(ReadyState::Closing as u8, Ordering::Release);
        if let Some(outgoing) = self.outgoing.as_ref() {
            let _ = outgoing.send(Message::Close(None));
        }
    }
}

#[instrument(skip(config, state, outgoing, sink), fields(generation = sink.generation()))]
async fn run_connection(
    url: String,
    config: WsConfig,
    state: Arc<AtomicU8>,
    mut outgoing: mpsc::UnboundedReceiver<Message>,
    sink: EventSink,
) {
    let connect_timeout = Duration::from_millis(config.connect_timeout_ms);
    let connected = tokio::time::timeout(connect_timeout, connect_async(url.as_str())).await;

    let ws_stream = match connected {
        Ok(Ok((ws_stream, _))) => ws_stream,
        Ok(Err(e)) => {
            fail(&state, &sink, format!("WebSocket connection failed: {}", e));
            return;
        }
        Err(_) => {
            fail(&state, &sink, "WebSocket connection timeout".to_string());
            return;
        }
    };

    // close() may have raced the handshake
    if ReadyState::from_u8(state.load(Ordering::Acquire)) == ReadyState::Connecting {
        state.store(ReadyState::Open as u8, Ordering::Release);
        sink.emit(TransportEvent::Open);
    }

    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            frame = outgoing.recv() => {
                let Some(frame) = frame else {
                    // transport handle dropped
                    let _ = write.send(Message::Close(None)).await;
                    break;
                };
                if let Err(e) = write.send(frame).await {
                    error!("Failed to send WebSocket message: {}", e);
                    sink.emit(TransportEvent::Error(format!(
                        "Failed to send WebSocket message: {}",
                        e
                    )));
                    break;
                }
            }
            incoming = read.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    if !sink.emit(TransportEvent::Message(text)) {
                        break;
                    }
                }
                Some(Ok(Message::Binary(data))) => match String::from_utf8(data) {
                    Ok(text) => {
                        if !sink.emit(TransportEvent::Message(text)) {
                            break;
                        }
                    }
                    Err(e) => warn!("Dropping binary frame with invalid UTF-8: {}", e),
                },
                Some(Ok(Message::Ping(data))) => {
                    if let Err(e) = write.send(Message::Pong(data)).await {
                        warn!("Failed to send pong response: {}", e);
                    }
                }
                Some(Ok(Message::Pong(_) | Message::Frame(_))) => {}
                Some(Ok(Message::Close(_))) | None => {
                    debug!("WebSocket closed by peer");
                    break;
                }
                Some(Err(e)) => {
                    error!("WebSocket error: {}", e);
                    sink.emit(TransportEvent::Error(format!("WebSocket error: {}", e)));
                    break;
                }
            }
        }
    }

    state.store(ReadyState::Closed as u8, Ordering::Release);
    sink.emit(TransportEvent::Close);
}

fn fail(state: &AtomicU8, sink: &EventSink, reason: String) {
    error!("{}", reason);
    state.store(ReadyState::Closed as u8, Ordering::Release);
    sink.emit(TransportEvent::Error(reason));
    sink.emit(TransportEvent::Close);
}
