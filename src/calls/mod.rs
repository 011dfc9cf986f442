//! Call registry
//!
//! Every call the session exposes is a row in [`CALLS`]: a pure builder that
//! turns positional arguments into a request payload, plus an optional
//! recorder that notes the call in [`SubscriptionState`] so it can be
//! replayed after a reconnect.

use crate::core::errors::LiveApiError;
use crate::session::state::SubscriptionState;
use serde_json::{json, Map, Value};

pub type BuildFn = fn(&[Value]) -> Result<Value, LiveApiError>;
pub type RecordFn = fn(&mut SubscriptionState, &[Value]);

#[derive(Debug, Clone, Copy)]
pub struct CallEntry {
    pub name: &'static str,
    pub build: BuildFn,
    pub record: Option<RecordFn>,
}

impl CallEntry {
    pub fn is_stateful(&self) -> bool {
        self.record.is_some()
    }
}

/// Look up a call by name
pub fn lookup(name: &str) -> Result<&'static CallEntry, LiveApiError> {
    CALLS
        .iter()
        .find(|entry| entry.name == name)
        .ok_or_else(|| LiveApiError::UnknownCall(name.to_string()))
}

/// Build the payload for a call and, when it is stateful, record it
pub fn prepare(
    name: &str,
    args: &[Value],
    state: &mut SubscriptionState,
) -> Result<Value, LiveApiError> {
    let entry = lookup(name)?;
    let payload = (entry.build)(args)?;
    if let Some(record) = entry.record {
        record(state, args);
    }
    Ok(payload)
}

/// Build the payload for a call without touching subscription state
pub fn build(name: &str, args: &[Value]) -> Result<Value, LiveApiError> {
    let entry = lookup(name)?;
    (entry.build)(args)
}

pub fn names() -> impl Iterator<Item = &'static str> {
    CALLS.iter().map(|entry| entry.name)
}

fn arg(args: &[Value], index: usize) -> Result<&Value, LiveApiError> {
    args.get(index)
        .filter(|value| !value.is_null())
        .ok_or_else(|| LiveApiError::InvalidParameters(format!("missing argument {}", index)))
}

/// A string or number argument, rendered as a string
fn text(args: &[Value], index: usize) -> Result<String, LiveApiError> {
    match arg(args, index)? {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(LiveApiError::InvalidParameters(format!(
            "argument {} must be a string, got {}",
            index, other
        ))),
    }
}

/// A scalar argument passed through unchanged
fn scalar(args: &[Value], index: usize) -> Result<Value, LiveApiError> {
    match arg(args, index)? {
        value @ (Value::String(_) | Value::Number(_)) => Ok(value.clone()),
        other => Err(LiveApiError::InvalidParameters(format!(
            "argument {} must be a string or number, got {}",
            index, other
        ))),
    }
}

/// An optional options object; absent means empty
fn options(args: &[Value], index: usize) -> Result<Map<String, Value>, LiveApiError> {
    match args.get(index) {
        None | Some(Value::Null) => Ok(Map::new()),
        Some(Value::Object(map)) => Ok(map.clone()),
        Some(other) => Err(LiveApiError::InvalidParameters(format!(
            "argument {} must be an object, got {}",
            index, other
        ))),
    }
}

fn list(args: &[Value], index: usize) -> Result<Vec<Value>, LiveApiError> {
    match arg(args, index)? {
        Value::Array(items) => Ok(items.clone()),
        other => Err(LiveApiError::InvalidParameters(format!(
            "argument {} must be a list, got {}",
            index, other
        ))),
    }
}

/// `base` with every option layered over it
fn with_options(base: Value, options: Map<String, Value>) -> Value {
    let mut payload = match base {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    payload.extend(options);
    Value::Object(payload)
}

fn string_at(args: &[Value], index: usize) -> Option<String> {
    match args.get(index)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn record_token(state: &mut SubscriptionState, args: &[Value]) {
    if let Some(token) = string_at(args, 0) {
        state.set_token(token);
    }
}

fn record_tick(state: &mut SubscriptionState, args: &[Value]) {
    if let Some(symbol) = string_at(args, 0) {
        state.add_tick(symbol);
    }
}

fn record_ticks(state: &mut SubscriptionState, args: &[Value]) {
    if let Some(Value::Array(symbols)) = args.first() {
        for symbol in symbols.iter().filter_map(Value::as_str) {
            state.add_tick(symbol);
        }
    }
}

fn record_untick(state: &mut SubscriptionState, args: &[Value]) {
    if let Some(symbol) = string_at(args, 0) {
        state.remove_tick(&symbol);
    }
}

fn record_proposal(state: &mut SubscriptionState, args: &[Value]) {
    if let Some(descriptor) = args.first().filter(|value| value.is_object()) {
        state.add_proposal(descriptor.clone());
    }
}

fn record_balance_on(state: &mut SubscriptionState, _: &[Value]) {
    state.balance = true;
}

fn record_balance_off(state: &mut SubscriptionState, _: &[Value]) {
    state.balance = false;
}

fn record_portfolio_on(state: &mut SubscriptionState, _: &[Value]) {
    state.portfolio = true;
}

fn record_portfolio_off(state: &mut SubscriptionState, _: &[Value]) {
    state.portfolio = false;
}

fn record_transactions_on(state: &mut SubscriptionState, _: &[Value]) {
    state.transactions = true;
}

fn record_transactions_off(state: &mut SubscriptionState, _: &[Value]) {
    state.transactions = false;
}

fn record_clear_ticks(state: &mut SubscriptionState, _: &[Value]) {
    state.clear_ticks();
}

fn record_clear_proposals(state: &mut SubscriptionState, _: &[Value]) {
    state.clear_proposals();
}

pub static CALLS: &[CallEntry] = &[
    // Unauthenticated reads
    CallEntry {
        name: "ping",
        build: |_| Ok(json!({ "ping": 1 })),
        record: None,
    },
    CallEntry {
        name: "get_server_time",
        build: |_| Ok(json!({ "time": 1 })),
        record: None,
    },
    CallEntry {
        name: "get_website_status",
        build: |_| Ok(json!({ "website_status": 1 })),
        record: None,
    },
    CallEntry {
        name: "get_active_symbols_brief",
        build: |_| Ok(json!({ "active_symbols": "brief" })),
        record: None,
    },
    CallEntry {
        name: "get_active_symbols_full",
        build: |_| Ok(json!({ "active_symbols": "full" })),
        record: None,
    },
    CallEntry {
        name: "get_asset_index",
        build: |_| Ok(json!({ "asset_index": 1 })),
        record: None,
    },
    CallEntry {
        name: "get_contracts_for_symbol",
        build: |args| Ok(json!({ "contracts_for": text(args, 0)? })),
        record: None,
    },
    CallEntry {
        name: "get_trading_times",
        build: |args| {
            let date = string_at(args, 0).unwrap_or_else(|| "today".to_string());
            Ok(json!({ "trading_times": date }))
        },
        record: None,
    },
    CallEntry {
        name: "get_residences",
        build: |_| Ok(json!({ "residence_list": 1 })),
        record: None,
    },
    CallEntry {
        name: "get_states",
        build: |args| Ok(json!({ "states_list": text(args, 0)? })),
        record: None,
    },
    CallEntry {
        name: "get_payout_currencies",
        build: |_| Ok(json!({ "payout_currencies": 1 })),
        record: None,
    },
    CallEntry {
        name: "get_landing_company",
        build: |args| Ok(json!({ "landing_company": text(args, 0)? })),
        record: None,
    },
    CallEntry {
        name: "get_landing_company_details",
        build: |args| Ok(json!({ "landing_company_details": text(args, 0)? })),
        record: None,
    },
    CallEntry {
        name: "get_tick_history",
        build: |args| {
            let base = json!({ "ticks_history": text(args, 0)?, "end": "latest" });
            Ok(with_options(base, options(args, 1)?))
        },
        record: None,
    },
    CallEntry {
        name: "get_price_proposal_for_contract",
        build: |args| Ok(with_options(json!({ "proposal": 1 }), options(args, 0)?)),
        record: None,
    },
    CallEntry {
        name: "verify_email",
        build: |args| Ok(json!({ "verify_email": text(args, 0)?, "type": text(args, 1)? })),
        record: None,
    },
    // Account
    CallEntry {
        name: "authorize",
        build: |args| Ok(json!({ "authorize": text(args, 0)? })),
        record: Some(record_token),
    },
    CallEntry {
        name: "logout",
        build: |_| Ok(json!({ "logout": 1 })),
        record: None,
    },
    CallEntry {
        name: "get_balance",
        build: |_| Ok(json!({ "balance": 1 })),
        record: None,
    },
    CallEntry {
        name: "get_statement",
        build: |args| Ok(with_options(json!({ "statement": 1 }), options(args, 0)?)),
        record: None,
    },
    CallEntry {
        name: "get_portfolio",
        build: |_| Ok(json!({ "portfolio": 1 })),
        record: None,
    },
    CallEntry {
        name: "get_open_contract",
        build: |args| {
            Ok(json!({
                "proposal_open_contract": 1,
                "contract_id": scalar(args, 0)?,
            }))
        },
        record: None,
    },
    CallEntry {
        name: "get_profit_table",
        build: |args| Ok(with_options(json!({ "profit_table": 1 }), options(args, 0)?)),
        record: None,
    },
    CallEntry {
        name: "get_account_settings",
        build: |_| Ok(json!({ "get_settings": 1 })),
        record: None,
    },
    CallEntry {
        name: "get_account_status",
        build: |_| Ok(json!({ "get_account_status": 1 })),
        record: None,
    },
    CallEntry {
        name: "get_account_limits",
        build: |_| Ok(json!({ "get_limits": 1 })),
        record: None,
    },
    CallEntry {
        name: "get_self_exclusion",
        build: |_| Ok(json!({ "get_self_exclusion": 1 })),
        record: None,
    },
    // Trading
    CallEntry {
        name: "buy_contract",
        build: |args| Ok(json!({ "buy": scalar(args, 0)?, "price": scalar(args, 1)? })),
        record: None,
    },
    CallEntry {
        name: "sell_contract",
        build: |args| Ok(json!({ "sell": scalar(args, 0)?, "price": scalar(args, 1)? })),
        record: None,
    },
    CallEntry {
        name: "sell_expired_contracts",
        build: |_| Ok(json!({ "sell_expired": 1 })),
        record: None,
    },
    // Streams
    CallEntry {
        name: "subscribe_to_balance",
        build: |_| Ok(json!({ "balance": 1, "subscribe": 1 })),
        record: Some(record_balance_on),
    },
    CallEntry {
        name: "unsubscribe_from_balance",
        build: |_| Ok(json!({ "forget_all": "balance" })),
        record: Some(record_balance_off),
    },
    CallEntry {
        name: "subscribe_to_open_contract",
        build: |args| {
            Ok(json!({
                "proposal_open_contract": 1,
                "subscribe": 1,
                "contract_id": scalar(args, 0)?,
            }))
        },
        record: None,
    },
    CallEntry {
        name: "subscribe_to_all_open_contracts",
        build: |_| Ok(json!({ "proposal_open_contract": 1, "subscribe": 1 })),
        record: Some(record_portfolio_on),
    },
    CallEntry {
        name: "unsubscribe_from_all_open_contracts",
        build: |_| Ok(json!({ "forget_all": "proposal_open_contract" })),
        record: Some(record_portfolio_off),
    },
    CallEntry {
        name: "subscribe_to_transactions",
        build: |_| Ok(json!({ "transaction": 1, "subscribe": 1 })),
        record: Some(record_transactions_on),
    },
    CallEntry {
        name: "unsubscribe_from_transactions",
        build: |_| Ok(json!({ "forget_all": "transaction" })),
        record: Some(record_transactions_off),
    },
    CallEntry {
        name: "subscribe_to_tick",
        build: |args| Ok(json!({ "ticks": text(args, 0)?, "subscribe": 1 })),
        record: Some(record_tick),
    },
    CallEntry {
        name: "subscribe_to_ticks",
        build: |args| Ok(json!({ "ticks": list(args, 0)?, "subscribe": 1 })),
        record: Some(record_ticks),
    },
    CallEntry {
        name: "unsubscribe_from_tick",
        build: |args| Ok(json!({ "forget": text(args, 0)? })),
        record: Some(record_untick),
    },
    CallEntry {
        name: "unsubscribe_from_all_ticks",
        build: |_| Ok(json!({ "forget_all": "ticks" })),
        record: Some(record_clear_ticks),
    },
    CallEntry {
        name: "subscribe_to_price_for_contract_proposal",
        build: |args| {
            let descriptor = match arg(args, 0)? {
                Value::Object(map) => map.clone(),
                other => {
                    return Err(LiveApiError::InvalidParameters(format!(
                        "proposal descriptor must be an object, got {}",
                        other
                    )))
                }
            };
            Ok(with_options(json!({ "proposal": 1, "subscribe": 1 }), descriptor))
        },
        record: Some(record_proposal),
    },
    CallEntry {
        name: "unsubscribe_from_all_proposals",
        build: |_| Ok(json!({ "forget_all": "proposal" })),
        record: Some(record_clear_proposals),
    },
    CallEntry {
        name: "unsubscribe_by_id",
        build: |args| Ok(json!({ "forget": text(args, 0)? })),
        record: None,
    },
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_are_unique() {
        let mut names: Vec<&str> = names().collect();
        let total = names.len();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), total);
    }

    #[test]
    fn test_open_contract_snapshot_does_not_subscribe() {
        let payload = build("get_open_contract", &[json!(4242)]).unwrap();
        assert_eq!(payload, json!({ "proposal_open_contract": 1, "contract_id": 4242 }));
        assert!(!lookup("get_open_contract").unwrap().is_stateful());

        let stream = build("subscribe_to_open_contract", &[json!(4242)]).unwrap();
        assert_eq!(stream["subscribe"], 1);
    }

    #[test]
    fn test_unknown_call() {
        let result = lookup("subscribe_to_weather");
        assert!(matches!(result, Err(LiveApiError::UnknownCall(name)) if name == "subscribe_to_weather"));
    }

    #[test]
    fn test_tick_history_merges_options() {
        let payload = build(
            "get_tick_history",
            &[json!("R_100"), json!({"end": 2000, "style": "candles", "granularity": 60})],
        )
        .unwrap();
        assert_eq!(payload["ticks_history"], "R_100");
        assert_eq!(payload["end"], 2000);
        assert_eq!(payload["granularity"], 60);

        let payload = build("get_tick_history", &[json!("R_100")]).unwrap();
        assert_eq!(payload["end"], "latest");
    }

    #[test]
    fn test_missing_argument() {
        let result = build("subscribe_to_tick", &[]);
        assert!(matches!(result, Err(LiveApiError::InvalidParameters(_))));

        let result = build("get_statement", &[json!("not an object")]);
        assert!(matches!(result, Err(LiveApiError::InvalidParameters(_))));
    }

    #[test]
    fn test_stateful_calls_record() {
        let mut state = SubscriptionState::new();
        prepare("authorize", &[json!("tok-1")], &mut state).unwrap();
        prepare("subscribe_to_balance", &[], &mut state).unwrap();
        prepare("subscribe_to_ticks", &[json!(["R_10", "R_25"])], &mut state).unwrap();
        prepare("subscribe_to_tick", &[json!("R_50")], &mut state).unwrap();
        prepare(
            "subscribe_to_price_for_contract_proposal",
            &[json!({"symbol": "R_50", "contract_type": "CALL"})],
            &mut state,
        )
        .unwrap();

        assert_eq!(state.token(), Some("tok-1"));
        assert!(state.balance);
        assert_eq!(state.ticks(), ["R_10", "R_25", "R_50"].map(String::from));
        assert_eq!(state.proposals().len(), 1);

        prepare("unsubscribe_from_tick", &[json!("R_25")], &mut state).unwrap();
        prepare("unsubscribe_from_balance", &[], &mut state).unwrap();
        prepare("unsubscribe_from_all_proposals", &[], &mut state).unwrap();
        assert_eq!(state.ticks(), ["R_10", "R_50"].map(String::from));
        assert!(!state.balance);
        assert!(state.proposals().is_empty());
    }

    #[test]
    fn test_failed_build_records_nothing() {
        let mut state = SubscriptionState::new();
        assert!(prepare("subscribe_to_tick", &[json!({"bad": true})], &mut state).is_err());
        assert!(state.ticks().is_empty());
    }

    #[test]
    fn test_read_calls_are_stateless() {
        assert!(!lookup("get_balance").unwrap().is_stateful());
        assert!(lookup("subscribe_to_transactions").unwrap().is_stateful());
    }

    #[test]
    fn test_proposal_payload() {
        let payload = build(
            "subscribe_to_price_for_contract_proposal",
            &[json!({"symbol": "R_100", "amount": 10, "basis": "stake"})],
        )
        .unwrap();
        assert_eq!(payload["proposal"], 1);
        assert_eq!(payload["subscribe"], 1);
        assert_eq!(payload["symbol"], "R_100");
    }
}
