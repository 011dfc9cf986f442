use crate::core::errors::LiveApiError;
use rand::Rng;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

/// Upper bound (exclusive) of generated request ids
const REQ_ID_SPACE: u64 = 1_000_000_000_000_000;

/// How a pending request ended
#[derive(Debug)]
pub enum Settlement {
    Resolved(Value),
    Rejected(LiveApiError),
    /// The server answered with an ignorable error; the request stays unsettled
    Ignored,
}

/// Result of matching one response frame against the pending set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettleOutcome {
    /// No pending request carries this id
    Unmatched,
    Resolved,
    Rejected,
    Ignored,
}

/// Future over the settlement of a single request
///
/// Resolves to the response frame, fails with the server's error, or never
/// completes when the server answered with an ignorable error. If the
/// session goes away first it fails with `SessionClosed`.
#[derive(Debug)]
pub struct PendingResponse {
    req_id: String,
    rx: oneshot::Receiver<Settlement>,
    ignored: bool,
}

impl PendingResponse {
    pub fn req_id(&self) -> &str {
        &self.req_id
    }
}

impl Future for PendingResponse {
    type Output = Result<Value, LiveApiError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.ignored {
            return Poll::Pending;
        }

        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(Settlement::Resolved(frame))) => Poll::Ready(Ok(frame)),
            Poll::Ready(Ok(Settlement::Rejected(err))) => Poll::Ready(Err(err)),
            Poll::Ready(Ok(Settlement::Ignored)) => {
                self.ignored = true;
                Poll::Pending
            }
            Poll::Ready(Err(_)) => Poll::Ready(Err(LiveApiError::SessionClosed)),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Tracks one pending handle per outstanding request id
#[derive(Debug, Default)]
pub struct Correlator {
    pending: HashMap<String, oneshot::Sender<Settlement>>,
}

impl Correlator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Draw a fresh request id
    pub fn next_id(&self) -> u64 {
        rand::thread_rng().gen_range(1..REQ_ID_SPACE)
    }

    /// Start tracking a request; a second registration of the same id
    /// replaces the first
    pub fn register(&mut self, req_id: String) -> PendingResponse {
        let (tx, rx) = oneshot::channel();
        if self.pending.insert(req_id.clone(), tx).is_some() {
            warn!(req_id = %req_id, "Request id collision, earlier request abandoned");
        }
        PendingResponse {
            req_id,
            rx,
            ignored: false,
        }
    }

    /// Settle the pending request matching a response frame
    pub fn settle(&mut self, req_id: &str, error: Option<&Value>, frame: Value) -> SettleOutcome {
        let Some(tx) = self.pending.remove(req_id) else {
            trace!(req_id, "No pending request for response");
            return SettleOutcome::Unmatched;
        };

        let (settlement, outcome) = match error {
            None => (Settlement::Resolved(frame), SettleOutcome::Resolved),
            Some(error) => {
                let message = error
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                if LiveApiError::is_ignorable_api_message(message) {
                    debug!(req_id, message, "Ignoring expected subscription error");
                    (Settlement::Ignored, SettleOutcome::Ignored)
                } else {
                    (
                        Settlement::Rejected(LiveApiError::from_api_error(error)),
                        SettleOutcome::Rejected,
                    )
                }
            }
        };

        // The caller may have dropped its handle
        let _ = tx.send(settlement);
        outcome
    }

    /// Stop tracking a request without settling it
    pub fn abandon(&mut self, req_id: &str) -> bool {
        self.pending.remove(req_id).is_some()
    }

    pub fn is_pending(&self, req_id: &str) -> bool {
        self.pending.contains_key(req_id)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}
