/// `LiveX` Kernel - transport layer for the session
///
/// The kernel owns everything that touches the wire and nothing that knows
/// about calls, subscriptions or correlation.
///
/// # Architecture
///
/// ## Transport Layer
/// - `Transport`: one connection, with open/close/error/message reactions
///   reported through an `EventSink`
/// - `TransportFactory`: creates a fresh `Transport` on every (re)connect
/// - `TungsteniteConnector`: network transport on `tokio-tungstenite`
/// - `MemoryConnector`: in-memory transport for tests and embedding
///
/// ## Message Handling
/// - `LiveCodec`: JSON text frames in and out, classified once into
///   `IncomingMessage`
///
/// # Usage
///
/// ```rust,no_run
/// use livex::core::kernel::*;
/// use tokio::sync::mpsc;
///
/// # async fn example() -> Result<(), livex::LiveApiError> {
/// let (tx, mut rx) = mpsc::unbounded_channel();
/// let mut transport = TungsteniteConnector::new()
///     .open("wss://ws.binaryws.com/websockets/v3?l=en")?;
/// transport.attach(EventSink::new(1, tx));
///
/// while let Some((_, event)) = rx.recv().await {
///     if event == TransportEvent::Open {
///         transport.send(r#"{"ping":1}"#.to_string())?;
///     }
/// }
/// # Ok(())
/// # }
/// ```
pub mod codec;
pub mod memory;
pub mod transport;
pub mod ws;

// Re-export key types for convenience
pub use codec::{IncomingMessage, LiveCodec};
pub use memory::{MemoryConnector, MemoryHandle, MemoryTransport};
pub use transport::{EventSink, ReadyState, Transport, TransportEvent, TransportFactory};
pub use ws::{TungsteniteConnector, TungsteniteTransport, WsConfig};
