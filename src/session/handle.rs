use crate::core::config::LiveApiConfig;
use crate::core::errors::LiveApiError;
use crate::core::kernel::{
    Transport, TransportEvent, TransportFactory, TungsteniteConnector,
};
use crate::core::traits::{CallInvoker, SystemClock};
use crate::core::types::{DurationSelector, HistoryStyle, SessionStatus, TickPoint};
use crate::history;
use crate::session::buffer::Action;
use crate::session::core::SessionCore;
use crate::session::correlator::PendingResponse;
use crate::session::events::EventBroadcaster;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, instrument, warn};

type Reply<T> = oneshot::Sender<Result<T, LiveApiError>>;
type Inspection = Box<dyn FnOnce(&SessionCore) + Send>;

enum Command {
    Invoke {
        name: String,
        args: Vec<Value>,
        reply: Reply<PendingResponse>,
    },
    Send {
        payload: Value,
        raw: bool,
        reply: Reply<Option<PendingResponse>>,
    },
    Execute(Action),
    Disconnect,
    ChangeLanguage {
        language: String,
        reply: Reply<()>,
    },
    Resubscribe,
    Abandon(String),
    Inspect(Inspection),
}

/// Handle to a live API session
///
/// Cheap to clone; every clone talks to the same session task. The task
/// stops, closing the connection, once the last handle is dropped.
#[derive(Debug, Clone)]
pub struct LiveApi {
    commands: mpsc::UnboundedSender<Command>,
    events: Arc<EventBroadcaster>,
    request_timeout: Option<Duration>,
}

impl LiveApi {
    /// Open a session over a real websocket
    ///
    /// Must be called from within a Tokio runtime.
    pub fn connect(config: LiveApiConfig) -> Result<Self, LiveApiError> {
        Self::with_transport(config, Arc::new(TungsteniteConnector::new()), None)
    }

    /// Open a session with a custom transport factory
    ///
    /// `existing` is used for the first connection instead of asking the
    /// factory; reconnects always go through the factory.
    #[instrument(skip_all, fields(endpoint = %config.endpoint, language = %config.language))]
    pub fn with_transport(
        config: LiveApiConfig,
        factory: Arc<dyn TransportFactory>,
        existing: Option<Box<dyn Transport>>,
    ) -> Result<Self, LiveApiError> {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (commands, command_rx) = mpsc::unbounded_channel();
        let events = Arc::new(EventBroadcaster::new());
        let request_timeout = config.request_timeout;
        let token = config.api_token().map(str::to_string);

        let mut core = SessionCore::new(config, factory, event_tx, Arc::clone(&events));
        core.connect(existing)?;
        if let Some(token) = token {
            debug!("Authorizing with configured token");
            core.invoke("authorize", &[json!(token)])?;
        }

        tokio::spawn(run_session(core, command_rx, event_rx));

        Ok(Self {
            commands,
            events,
            request_timeout,
        })
    }

    fn submit(&self, command: Command) -> Result<(), LiveApiError> {
        self.commands
            .send(command)
            .map_err(|_| LiveApiError::SessionClosed)
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(Reply<T>) -> Command,
    ) -> Result<T, LiveApiError> {
        let (tx, rx) = oneshot::channel();
        self.submit(command(tx))?;
        rx.await.map_err(|_| LiveApiError::SessionClosed)?
    }

    /// Read something off the session state
    async fn inspect<T, F>(&self, read: F) -> Result<T, LiveApiError>
    where
        T: Send + 'static,
        F: FnOnce(&SessionCore) -> T + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.submit(Command::Inspect(Box::new(move |core| {
            let _ = tx.send(read(core));
        })))?;
        rx.await.map_err(|_| LiveApiError::SessionClosed)
    }

    /// Send a registry call and return its pending response
    pub async fn invoke(
        &self,
        name: &str,
        args: Vec<Value>,
    ) -> Result<PendingResponse, LiveApiError> {
        let name = name.to_string();
        self.request(|reply| Command::Invoke { name, args, reply })
            .await
    }

    /// Send a registry call and wait for its response
    ///
    /// Honors the configured request timeout; a timed out request is
    /// dropped from the pending set.
    pub async fn call(&self, name: &str, args: Vec<Value>) -> Result<Value, LiveApiError> {
        let pending = self.invoke(name, args).await?;
        self.settle(pending).await
    }

    async fn settle(&self, pending: PendingResponse) -> Result<Value, LiveApiError> {
        let Some(limit) = self.request_timeout else {
            return pending.await;
        };

        let req_id = pending.req_id().to_string();
        match tokio::time::timeout(limit, pending).await {
            Ok(result) => result,
            Err(_) => {
                warn!(req_id = %req_id, timeout = ?limit, "Request timed out");
                let _ = self.submit(Command::Abandon(req_id.clone()));
                Err(LiveApiError::RequestTimeout { req_id })
            }
        }
    }

    /// Send an arbitrary payload tagged with a fresh `req_id`
    pub async fn send(&self, payload: Value) -> Result<PendingResponse, LiveApiError> {
        self.request(|reply| Command::Send {
            payload,
            raw: false,
            reply,
        })
        .await?
        .ok_or_else(|| LiveApiError::Other("Payload was sent without a request id".to_string()))
    }

    /// Send a payload unchanged; only a payload carrying a `req_id` is tracked
    pub async fn send_raw(&self, payload: Value) -> Result<Option<PendingResponse>, LiveApiError> {
        self.request(|reply| Command::Send {
            payload,
            raw: true,
            reply,
        })
        .await
    }

    /// Run an action on the session now if connected, otherwise after the
    /// next open once every buffered send has gone out
    pub fn execute<F>(&self, action: F) -> Result<(), LiveApiError>
    where
        F: FnOnce(&mut SessionCore) + Send + 'static,
    {
        self.submit(Command::Execute(Box::new(action)))
    }

    /// Close the connection without reconnecting and forget the token
    pub fn disconnect(&self) -> Result<(), LiveApiError> {
        self.submit(Command::Disconnect)
    }

    /// Reconnect under another language and replay subscriptions
    pub async fn change_language(&self, language: &str) -> Result<(), LiveApiError> {
        let language = language.to_string();
        self.request(|reply| Command::ChangeLanguage { language, reply })
            .await
    }

    pub fn resubscribe(&self) -> Result<(), LiveApiError> {
        self.submit(Command::Resubscribe)
    }

    pub async fn is_ready(&self) -> Result<bool, LiveApiError> {
        self.inspect(SessionCore::is_ready).await
    }

    pub async fn status(&self) -> Result<SessionStatus, LiveApiError> {
        self.inspect(SessionCore::status).await
    }

    pub async fn language(&self) -> Result<String, LiveApiError> {
        self.inspect(|core| core.language().to_string()).await
    }

    pub async fn pending_requests(&self) -> Result<usize, LiveApiError> {
        self.inspect(SessionCore::pending_requests).await
    }

    pub fn events(&self) -> &Arc<EventBroadcaster> {
        &self.events
    }

    /// Listen to frames of one `msg_type`, or to [`ERROR_CHANNEL`](crate::session::ERROR_CHANNEL)
    pub fn on(&self, channel: &str) -> broadcast::Receiver<Value> {
        self.events.on(channel)
    }

    pub fn off(&self, channel: &str) {
        self.events.off(channel);
    }

    /// Price history of a contract as `{epoch, quote}` points
    pub async fn get_data_for_contract(
        &self,
        contract_id: impl Into<Value>,
        duration: DurationSelector,
        style: HistoryStyle,
    ) -> Result<Vec<TickPoint>, LiveApiError> {
        history::get_data_for_contract(self, &SystemClock, contract_id.into(), duration, style)
            .await
    }

    // Typed wrappers

    pub async fn ping(&self) -> Result<Value, LiveApiError> {
        self.call("ping", vec![]).await
    }

    pub async fn get_server_time(&self) -> Result<Value, LiveApiError> {
        self.call("get_server_time", vec![]).await
    }

    pub async fn get_active_symbols_brief(&self) -> Result<Value, LiveApiError> {
        self.call("get_active_symbols_brief", vec![]).await
    }

    pub async fn authorize(&self, token: &str) -> Result<Value, LiveApiError> {
        self.call("authorize", vec![json!(token)]).await
    }

    pub async fn logout(&self) -> Result<Value, LiveApiError> {
        self.call("logout", vec![]).await
    }

    pub async fn get_balance(&self) -> Result<Value, LiveApiError> {
        self.call("get_balance", vec![]).await
    }

    pub async fn get_portfolio(&self) -> Result<Value, LiveApiError> {
        self.call("get_portfolio", vec![]).await
    }

    /// `options` is layered over `{ticks_history: symbol, end: "latest"}`
    pub async fn get_tick_history(&self, symbol: &str, options: Value) -> Result<Value, LiveApiError> {
        self.call("get_tick_history", vec![json!(symbol), options])
            .await
    }

    pub async fn buy_contract(
        &self,
        proposal_id: &str,
        price: f64,
    ) -> Result<Value, LiveApiError> {
        self.call("buy_contract", vec![json!(proposal_id), json!(price)])
            .await
    }

    pub async fn sell_contract(&self, contract_id: i64, price: f64) -> Result<Value, LiveApiError> {
        self.call("sell_contract", vec![json!(contract_id), json!(price)])
            .await
    }

    pub async fn subscribe_to_balance(&self) -> Result<Value, LiveApiError> {
        self.call("subscribe_to_balance", vec![]).await
    }

    pub async fn unsubscribe_from_balance(&self) -> Result<Value, LiveApiError> {
        self.call("unsubscribe_from_balance", vec![]).await
    }

    pub async fn subscribe_to_transactions(&self) -> Result<Value, LiveApiError> {
        self.call("subscribe_to_transactions", vec![]).await
    }

    pub async fn subscribe_to_all_open_contracts(&self) -> Result<Value, LiveApiError> {
        self.call("subscribe_to_all_open_contracts", vec![]).await
    }

    /// One-off snapshot of a contract, without opening a stream
    pub async fn get_open_contract(
        &self,
        contract_id: impl Into<Value>,
    ) -> Result<Value, LiveApiError> {
        self.call("get_open_contract", vec![contract_id.into()])
            .await
    }

    pub async fn subscribe_to_open_contract(
        &self,
        contract_id: impl Into<Value>,
    ) -> Result<Value, LiveApiError> {
        self.call("subscribe_to_open_contract", vec![contract_id.into()])
            .await
    }

    pub async fn subscribe_to_tick(&self, symbol: &str) -> Result<Value, LiveApiError> {
        self.call("subscribe_to_tick", vec![json!(symbol)]).await
    }

    pub async fn subscribe_to_ticks(&self, symbols: &[&str]) -> Result<Value, LiveApiError> {
        self.call("subscribe_to_ticks", vec![json!(symbols)]).await
    }

    pub async fn unsubscribe_from_tick(&self, symbol: &str) -> Result<Value, LiveApiError> {
        self.call("unsubscribe_from_tick", vec![json!(symbol)])
            .await
    }

    pub async fn unsubscribe_from_all_ticks(&self) -> Result<Value, LiveApiError> {
        self.call("unsubscribe_from_all_ticks", vec![]).await
    }

    /// `descriptor` is the proposal request body, e.g. symbol, contract type, amount
    pub async fn subscribe_to_price_for_contract_proposal(
        &self,
        descriptor: Value,
    ) -> Result<Value, LiveApiError> {
        self.call("subscribe_to_price_for_contract_proposal", vec![descriptor])
            .await
    }

    pub async fn unsubscribe_from_all_proposals(&self) -> Result<Value, LiveApiError> {
        self.call("unsubscribe_from_all_proposals", vec![]).await
    }

    pub async fn unsubscribe_by_id(&self, id: &str) -> Result<Value, LiveApiError> {
        self.call("unsubscribe_by_id", vec![json!(id)]).await
    }
}

#[async_trait]
impl CallInvoker for LiveApi {
    async fn call(&self, name: &str, args: Vec<Value>) -> Result<Value, LiveApiError> {
        Self::call(self, name, args).await
    }
}

/// Session task: one timeline over transport events and handle commands
async fn run_session(
    mut core: SessionCore,
    mut commands: mpsc::UnboundedReceiver<Command>,
    mut events: mpsc::UnboundedReceiver<(u64, TransportEvent)>,
) {
    loop {
        tokio::select! {
            biased;

            Some((generation, event)) = events.recv() => {
                core.handle_event(generation, event);
            }
            command = commands.recv() => match command {
                Some(command) => apply(&mut core, command),
                None => {
                    debug!("All handles dropped, closing session");
                    core.shutdown();
                    break;
                }
            },
        }
    }
}

fn apply(core: &mut SessionCore, command: Command) {
    match command {
        Command::Invoke { name, args, reply } => {
            let _ = reply.send(core.invoke(&name, &args));
        }
        Command::Send {
            payload,
            raw,
            reply,
        } => {
            let result = if raw {
                core.send_raw(payload)
            } else {
                core.send(payload)
            };
            let _ = reply.send(result);
        }
        Command::Execute(action) => core.execute(action),
        Command::Disconnect => core.disconnect(),
        Command::ChangeLanguage { language, reply } => {
            let _ = reply.send(core.change_language(&language));
        }
        Command::Resubscribe => core.resubscribe(),
        Command::Abandon(req_id) => {
            core.abandon(&req_id);
        }
        Command::Inspect(read) => read(core),
    }
}
