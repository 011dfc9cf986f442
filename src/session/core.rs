use crate::calls;
use crate::core::config::{FatalPolicy, LiveApiConfig};
use crate::core::errors::LiveApiError;
use crate::core::kernel::{
    EventSink, IncomingMessage, LiveCodec, Transport, TransportEvent, TransportFactory,
};
use crate::core::types::SessionStatus;
use crate::session::buffer::{Action, SendBuffer};
use crate::session::correlator::{Correlator, PendingResponse, SettleOutcome};
use crate::session::events::{EventBroadcaster, ERROR_CHANNEL};
use crate::session::state::{AuthReplay, SubscriptionState};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument, trace, warn};

/// Single-timeline session state machine
///
/// Owns the transport, the pending-request map, the send buffers and the
/// subscription state. Every mutation happens through `&mut self`, driven
/// either by a caller operation or by a transport event, one at a time.
pub struct SessionCore {
    config: LiveApiConfig,
    language: String,
    status: SessionStatus,
    factory: Arc<dyn TransportFactory>,
    transport: Option<Box<dyn Transport>>,
    generation: u64,
    reconnect_on_close: bool,
    event_tx: mpsc::UnboundedSender<(u64, TransportEvent)>,
    codec: LiveCodec,
    buffer: SendBuffer,
    correlator: Correlator,
    subscriptions: SubscriptionState,
    on_auth: Option<AuthReplay>,
    events: Arc<EventBroadcaster>,
}

impl SessionCore {
    pub fn new(
        config: LiveApiConfig,
        factory: Arc<dyn TransportFactory>,
        event_tx: mpsc::UnboundedSender<(u64, TransportEvent)>,
        events: Arc<EventBroadcaster>,
    ) -> Self {
        let language = config.language.clone();
        Self {
            config,
            language,
            status: SessionStatus::Unknown,
            factory,
            transport: None,
            generation: 0,
            reconnect_on_close: false,
            event_tx,
            codec: LiveCodec,
            buffer: SendBuffer::new(),
            correlator: Correlator::new(),
            subscriptions: SubscriptionState::new(),
            on_auth: None,
            events,
        }
    }

    /// Install a transport and wire its reactions
    ///
    /// Uses `existing` when given, otherwise opens a new one at
    /// `endpoint?l=language`. The previous transport, if any, is discarded.
    #[instrument(skip(self, existing), fields(language = %self.language))]
    pub fn connect(&mut self, existing: Option<Box<dyn Transport>>) -> Result<(), LiveApiError> {
        let mut transport = match existing {
            Some(transport) => transport,
            None => {
                let url = self.config.connection_url(&self.language);
                debug!(url = %url, "Opening transport");
                self.factory.open(&url)?
            }
        };

        self.generation += 1;
        transport.attach(EventSink::new(self.generation, self.event_tx.clone()));
        self.transport = Some(transport);
        self.reconnect_on_close = true;
        Ok(())
    }

    /// Close the session on purpose; no reconnect follows
    #[instrument(skip(self))]
    pub fn disconnect(&mut self) {
        self.subscriptions.clear_token();
        self.close_transport();
    }

    /// Restart the session under a new language
    #[instrument(skip(self), fields(from = %self.language))]
    pub fn change_language(&mut self, language: &str) -> Result<(), LiveApiError> {
        if language == self.language {
            return Ok(());
        }

        info!(to = language, "Changing language, restarting session");
        self.close_transport();
        self.language = language.to_string();
        self.connect(None)?;
        self.resubscribe();
        Ok(())
    }

    /// Reissue the recorded subscriptions
    ///
    /// Authorization, ticks and proposals go out immediately (buffered while
    /// not ready); balance, transaction and portfolio feeds wait for the next
    /// successful authorization.
    #[instrument(skip(self))]
    pub fn resubscribe(&mut self) {
        let mut replay: Vec<(&'static str, Value)> = Vec::new();

        if let Some(token) = self.subscriptions.token() {
            replay.push(("authorize", json!(token)));
        }
        for symbol in self.subscriptions.ticks() {
            replay.push(("subscribe_to_tick", json!(symbol)));
        }
        for descriptor in self.subscriptions.proposals() {
            replay.push(("subscribe_to_price_for_contract_proposal", descriptor.clone()));
        }

        info!(
            requests = replay.len(),
            ticks = self.subscriptions.ticks().len(),
            proposals = self.subscriptions.proposals().len(),
            "Replaying subscriptions"
        );

        for (name, arg) in replay {
            match calls::build(name, &[arg]) {
                Ok(payload) => {
                    // nobody awaits a replayed request
                    let _ = self.send(payload);
                }
                Err(e) => warn!(call = name, "Skipping subscription replay: {}", e),
            }
        }

        self.on_auth = Some(self.subscriptions.auth_replay());
    }

    pub fn is_ready(&self) -> bool {
        self.transport
            .as_ref()
            .is_some_and(|transport| transport.is_open())
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn subscriptions(&self) -> &SubscriptionState {
        &self.subscriptions
    }

    pub fn pending_requests(&self) -> usize {
        self.correlator.pending_count()
    }

    pub fn is_pending(&self, req_id: &str) -> bool {
        self.correlator.is_pending(req_id)
    }

    pub fn buffered_sends(&self) -> usize {
        self.buffer.pending_sends()
    }

    pub fn buffered_executes(&self) -> usize {
        self.buffer.pending_executes()
    }

    pub fn has_auth_continuation(&self) -> bool {
        self.on_auth.is_some()
    }

    pub fn events(&self) -> &Arc<EventBroadcaster> {
        &self.events
    }

    /// Run a registry call: record it when stateful, then send it
    pub fn invoke(&mut self, name: &str, args: &[Value]) -> Result<PendingResponse, LiveApiError> {
        let payload = calls::prepare(name, args, &mut self.subscriptions)?;
        self.send(payload)?.ok_or_else(|| {
            LiveApiError::Other(format!("Call {} produced no request id", name))
        })
    }

    /// Tag a payload with a fresh `req_id` and send it
    ///
    /// A `req_id` already present in the payload is kept.
    pub fn send(&mut self, payload: Value) -> Result<Option<PendingResponse>, LiveApiError> {
        let Value::Object(mut fields) = payload else {
            return Err(LiveApiError::InvalidParameters(
                "Request payload must be a JSON object".to_string(),
            ));
        };
        let req_id = self.correlator.next_id();
        fields.entry("req_id").or_insert_with(|| json!(req_id));
        self.send_raw(Value::Object(fields))
    }

    /// Send a payload as is, buffering it while the transport is not ready
    ///
    /// Returns a pending handle only when the payload carries a `req_id`.
    #[instrument(skip(self, payload), fields(req_id = ?LiveCodec::req_id(&payload)))]
    pub fn send_raw(&mut self, payload: Value) -> Result<Option<PendingResponse>, LiveApiError> {
        // encode up front so an unencodable payload never reaches the queue
        self.codec.encode(&payload)?;

        let pending = LiveCodec::req_id(&payload).map(|req_id| self.correlator.register(req_id));

        if self.is_ready() {
            self.flush_sends();
        }

        if self.is_ready() && !self.buffer.has_sends() {
            if let Err(e) = self.transmit(&payload) {
                warn!("Send failed, buffering until reconnect: {}", e);
                self.buffer.push_send(payload);
            }
        } else {
            trace!("Transport not ready, buffering send");
            self.buffer.push_send(payload);
        }

        Ok(pending)
    }

    /// Run an action now if ready, otherwise once the transport opens
    ///
    /// Actions queued earlier, and the sends buffered before them, always
    /// go first.
    pub fn execute(&mut self, action: Action) {
        if self.is_ready() {
            self.flush_sends();
        }
        if !self.is_ready() || self.buffer.has_sends() {
            self.buffer.push_execute(action);
            return;
        }

        for queued in self.buffer.take_executes() {
            queued(self);
        }
        action(self);
    }

    /// Stop tracking a request the caller gave up on
    pub fn abandon(&mut self, req_id: &str) -> bool {
        self.correlator.abandon(req_id)
    }

    /// Feed one transport event into the session
    pub fn handle_event(&mut self, generation: u64, event: TransportEvent) {
        if generation != self.generation {
            trace!(generation, current = self.generation, "Dropping event from discarded transport");
            return;
        }

        match event {
            TransportEvent::Open => self.on_open(),
            TransportEvent::Close => self.on_close(),
            TransportEvent::Error(reason) => self.on_error(LiveApiError::NetworkError(reason)),
            TransportEvent::Message(text) => self.on_message(&text),
        }
    }

    /// Close the transport without triggering a reconnect
    pub fn shutdown(&mut self) {
        self.close_transport();
    }

    fn close_transport(&mut self) {
        self.reconnect_on_close = false;
        if let Some(transport) = self.transport.as_mut() {
            transport.close();
        }
    }

    fn on_open(&mut self) {
        info!(generation = self.generation, "Transport open");
        self.status = SessionStatus::Connected;
        self.flush_sends();

        if self.buffer.has_sends() {
            return;
        }
        for action in self.buffer.take_executes() {
            action(self);
        }
    }

    fn on_close(&mut self) {
        self.status = SessionStatus::Unknown;
        if !self.reconnect_on_close {
            debug!("Transport closed on request");
            return;
        }

        info!(generation = self.generation, "Transport closed, reconnecting");
        self.transport = None;
        if let Err(e) = self.connect(None) {
            self.on_error(e);
            return;
        }
        self.resubscribe();
    }

    fn on_error(&mut self, err: LiveApiError) {
        error!("Transport error: {}", err);
        match &self.config.fatal_policy {
            FatalPolicy::Terminate => std::process::exit(1),
            FatalPolicy::Callback(handler) => handler(&err),
            FatalPolicy::LogOnly => {}
        }
    }

    fn on_message(&mut self, text: &str) {
        let message = match self.codec.decode(text) {
            Ok(message) => message,
            Err(e) => {
                warn!("Dropping undecodable frame: {}", e);
                return;
            }
        };

        match message {
            IncomingMessage::Response {
                req_id,
                msg_type,
                error,
                frame,
            } => {
                match &error {
                    None => self.dispatch(&msg_type, frame.clone()),
                    Some(_) => {
                        self.events.publish(ERROR_CHANNEL, frame.clone());
                    }
                }
                let outcome = self.correlator.settle(&req_id, error.as_ref(), frame);
                if outcome == SettleOutcome::Unmatched {
                    trace!(req_id = %req_id, "Response matched no pending request");
                } else {
                    debug!(req_id = %req_id, msg_type = %msg_type, ?outcome, "Response settled");
                }
            }
            IncomingMessage::Push { msg_type, frame } => self.dispatch(&msg_type, frame),
            IncomingMessage::ErrorPush { frame, .. } => {
                self.events.publish(ERROR_CHANNEL, frame);
            }
        }
    }

    fn dispatch(&mut self, msg_type: &str, frame: Value) {
        if msg_type == "authorize" {
            if let Some(replay) = self.on_auth.take() {
                debug!(?replay, "Authorized, replaying account feeds");
                self.replay_after_auth(replay);
            }
        }

        if msg_type.is_empty() {
            trace!("Frame without msg_type, not published");
            return;
        }
        self.events.publish(msg_type, frame);
    }

    fn replay_after_auth(&mut self, replay: AuthReplay) {
        for name in replay.calls() {
            match calls::build(name, &[]) {
                Ok(payload) => {
                    let _ = self.send(payload);
                }
                Err(e) => warn!(call = name, "Skipping account feed replay: {}", e),
            }
        }
    }

    fn flush_sends(&mut self) {
        while let Some(payload) = self.buffer.pop_send() {
            if let Err(e) = self.transmit(&payload) {
                warn!("Flush interrupted: {}", e);
                self.buffer.requeue_send(payload);
                break;
            }
        }
    }

    fn transmit(&mut self, payload: &Value) -> Result<(), LiveApiError> {
        let frame = self.codec.encode(payload)?;
        let transport = self.transport.as_mut().ok_or_else(|| {
            LiveApiError::NetworkError("No transport installed".to_string())
        })?;
        transport.send(frame)
    }
}

impl std::fmt::Debug for SessionCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCore")
            .field("language", &self.language)
            .field("status", &self.status)
            .field("generation", &self.generation)
            .field("buffer", &self.buffer)
            .field("pending", &self.correlator.pending_count())
            .field("subscriptions", &self.subscriptions)
            .finish_non_exhaustive()
    }
}
