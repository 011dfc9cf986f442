//! Contract price history
//!
//! Turns a contract's lifetime (or a trailing slice of it) into a single
//! bounded `ticks_history` request and normalizes the answer into
//! `{epoch, quote}` points. Long windows switch to candles so one request
//! never asks for more points than the server returns.

use crate::core::errors::LiveApiError;
use crate::core::traits::{CallInvoker, Clock};
use crate::core::types::{
    coerce_epoch, coerce_number, ContractSnapshot, DurationSelector, HistoryStyle, TickPoint,
};
use serde_json::{json, Value};
use tracing::{debug, instrument};

/// Points the server returns for one history request
pub const MAX_POINTS: i64 = 4999;

/// Estimated tick count at which a request switches to candles
pub const CANDLE_THRESHOLD: i64 = 5000;

/// Candle widths the server accepts, in seconds
pub const GRANULARITIES: [i64; 12] = [
    60, 120, 180, 300, 600, 900, 1800, 3600, 7200, 14400, 28800, 86400,
];

const MAX_GRANULARITY: i64 = 86400;

/// Time range and symbol of a history request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryWindow {
    pub symbol: String,
    pub start: i64,
    pub end: i64,
}

impl HistoryWindow {
    /// Window covering a contract
    ///
    /// Ends at the sell time once the contract is sold, otherwise at `now`.
    /// A trailing window starts `count` units before the end, or at the
    /// purchase time when that is earlier.
    pub fn for_contract(contract: &ContractSnapshot, duration: DurationSelector, now: i64) -> Self {
        let end = match (contract.is_sold, contract.sell_time) {
            (true, Some(sell_time)) => sell_time,
            _ => now,
        };

        let start = match duration {
            DurationSelector::All => contract.purchase_time,
            DurationSelector::Trailing { unit, count } => contract
                .purchase_time
                .min(end.saturating_sub(unit.seconds().saturating_mul(count))),
        };

        Self {
            symbol: contract.underlying.clone(),
            start,
            end,
        }
    }

    pub fn span(&self) -> i64 {
        self.end.saturating_sub(self.start).max(0)
    }

    /// Ticks the window would hold at native resolution
    pub fn estimated_ticks(&self) -> i64 {
        self.span() / 2
    }
}

/// Style and candle width chosen for a window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryPlan {
    pub style: HistoryStyle,
    pub granularity: Option<i64>,
}

impl HistoryPlan {
    /// Ticks while they fit in one request, candles otherwise
    ///
    /// A caller asking for candles always gets candles.
    pub fn for_window(window: &HistoryWindow, requested: HistoryStyle) -> Self {
        if window.estimated_ticks() >= CANDLE_THRESHOLD || requested == HistoryStyle::Candles {
            Self {
                style: HistoryStyle::Candles,
                granularity: Some(select_granularity(window.span())),
            }
        } else {
            Self {
                style: HistoryStyle::Ticks,
                granularity: None,
            }
        }
    }

    /// Options object of the `ticks_history` request
    pub fn request_options(&self, window: &HistoryWindow) -> Value {
        let mut options = json!({
            "start": window.start,
            "end": window.end,
            "adjust_start_time": 1,
            "count": MAX_POINTS,
            "style": self.style.as_str(),
        });
        if let Some(granularity) = self.granularity {
            options["granularity"] = json!(granularity);
        }
        options
    }

    /// Normalize a `ticks_history` response according to this plan
    pub fn points(&self, response: &Value) -> Result<Vec<TickPoint>, LiveApiError> {
        match self.style {
            HistoryStyle::Candles => candles_to_points(response),
            HistoryStyle::Ticks => history_to_points(response),
        }
    }
}

/// Smallest candle width that keeps `span` within one request
pub fn select_granularity(span: i64) -> i64 {
    let ideal = span as f64 / MAX_POINTS as f64;
    GRANULARITIES
        .iter()
        .copied()
        .find(|&granularity| granularity as f64 >= ideal)
        .unwrap_or(MAX_GRANULARITY)
}

/// One point per candle: its epoch and opening price
pub fn candles_to_points(response: &Value) -> Result<Vec<TickPoint>, LiveApiError> {
    let candles = response
        .get("candles")
        .and_then(Value::as_array)
        .ok_or_else(|| LiveApiError::DeserializationError("Missing candles in response".to_string()))?;

    candles
        .iter()
        .map(|candle| {
            Ok(TickPoint {
                epoch: coerce_epoch(field(candle, "epoch")?)?,
                quote: coerce_number(field(candle, "open")?)?,
            })
        })
        .collect()
}

/// Zip `history.times` with `history.prices`
///
/// Extra entries on the longer side are dropped.
pub fn history_to_points(response: &Value) -> Result<Vec<TickPoint>, LiveApiError> {
    let history = response
        .get("history")
        .ok_or_else(|| LiveApiError::DeserializationError("Missing history in response".to_string()))?;
    let times = array(history, "times")?;
    let prices = array(history, "prices")?;

    times
        .iter()
        .zip(prices)
        .map(|(time, price)| {
            Ok(TickPoint {
                epoch: coerce_epoch(time)?,
                quote: coerce_number(price)?,
            })
        })
        .collect()
}

fn field<'a>(value: &'a Value, key: &str) -> Result<&'a Value, LiveApiError> {
    value
        .get(key)
        .ok_or_else(|| LiveApiError::DeserializationError(format!("Missing field '{}'", key)))
}

fn array<'a>(value: &'a Value, key: &str) -> Result<&'a Vec<Value>, LiveApiError> {
    field(value, key)?
        .as_array()
        .ok_or_else(|| LiveApiError::DeserializationError(format!("Field '{}' is not a list", key)))
}

/// Fetch the price history of a contract
///
/// Reads a one-off snapshot of the contract, then issues a single history
/// request sized by [`HistoryPlan::for_window`]. No stream is left open, so
/// repeated calls for the same contract behave alike.
#[instrument(skip(invoker, clock, contract_id), fields(contract_id = %contract_id))]
pub async fn get_data_for_contract<I, C>(
    invoker: &I,
    clock: &C,
    contract_id: Value,
    duration: DurationSelector,
    style: HistoryStyle,
) -> Result<Vec<TickPoint>, LiveApiError>
where
    I: CallInvoker + ?Sized,
    C: Clock + ?Sized,
{
    let response = invoker
        .call("get_open_contract", vec![contract_id])
        .await?;
    let contract = ContractSnapshot::from_response(&response)?;

    let window = HistoryWindow::for_contract(&contract, duration, clock.now_epoch());
    let plan = HistoryPlan::for_window(&window, style);
    debug!(
        symbol = %window.symbol,
        start = window.start,
        end = window.end,
        style = plan.style.as_str(),
        granularity = ?plan.granularity,
        "Requesting contract history"
    );

    let history = invoker
        .call(
            "get_tick_history",
            vec![json!(window.symbol), plan.request_options(&window)],
        )
        .await?;
    plan.points(&history)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::traits::FixedClock;
    use crate::core::types::DurationUnit;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Answers each call name with a canned frame and records what was asked
    struct ScriptedInvoker {
        contract: Value,
        history: Value,
        calls: Mutex<Vec<(String, Vec<Value>)>>,
    }

    impl ScriptedInvoker {
        fn new(contract: Value, history: Value) -> Self {
            Self {
                contract,
                history,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<(String, Vec<Value>)> {
            self.calls.lock().unwrap().clone()
        }

        fn history_options(&self) -> Value {
            let calls = self.calls();
            let (name, args) = calls.last().unwrap();
            assert_eq!(name, "get_tick_history");
            args[1].clone()
        }
    }

    #[async_trait]
    impl CallInvoker for ScriptedInvoker {
        async fn call(&self, name: &str, args: Vec<Value>) -> Result<Value, LiveApiError> {
            self.calls.lock().unwrap().push((name.to_string(), args));
            match name {
                "get_open_contract" => Ok(self.contract.clone()),
                "get_tick_history" => Ok(self.history.clone()),
                other => Err(LiveApiError::UnknownCall(other.to_string())),
            }
        }
    }

    fn open_contract(purchase_time: i64) -> Value {
        json!({
            "msg_type": "proposal_open_contract",
            "proposal_open_contract": {
                "contract_id": 42,
                "underlying": "R_100",
                "purchase_time": purchase_time,
                "sell_time": null,
                "sell_spot": null
            }
        })
    }

    fn snapshot(purchase_time: i64, sell_time: Option<i64>) -> ContractSnapshot {
        ContractSnapshot {
            underlying: "R_100".to_string(),
            purchase_time,
            sell_time,
            is_sold: sell_time.is_some(),
        }
    }

    #[test]
    fn test_select_granularity() {
        assert_eq!(select_granularity(0), 60);
        assert_eq!(select_granularity(24_996), 60);
        assert_eq!(select_granularity(4999 * 60), 60);
        assert_eq!(select_granularity(4999 * 60 + 1), 120);
        assert_eq!(select_granularity(4999 * 7000), 7200);
        assert_eq!(select_granularity(4999 * 86400), 86400);
    }

    #[test]
    fn test_granularity_clamps_to_one_day() {
        assert_eq!(select_granularity(4999 * 86400 * 3), 86400);
    }

    #[test]
    fn test_window_for_open_contract_ends_now() {
        let window = HistoryWindow::for_contract(&snapshot(1000, None), DurationSelector::All, 5000);
        assert_eq!(window.start, 1000);
        assert_eq!(window.end, 5000);
        assert_eq!(window.span(), 4000);
    }

    #[test]
    fn test_window_for_sold_contract_ends_at_sell_time() {
        let window =
            HistoryWindow::for_contract(&snapshot(1000, Some(1600)), DurationSelector::All, 99_999);
        assert_eq!(window.end, 1600);
    }

    #[test]
    fn test_sell_time_without_sell_spot_is_ignored() {
        let mut contract = snapshot(1000, Some(1600));
        contract.is_sold = false;
        let window = HistoryWindow::for_contract(&contract, DurationSelector::All, 2000);
        assert_eq!(window.end, 2000);
    }

    #[test]
    fn test_trailing_window_never_starts_after_purchase() {
        let contract = snapshot(10_000, None);

        let short = DurationSelector::trailing(DurationUnit::Minute, 1);
        let window = HistoryWindow::for_contract(&contract, short, 20_000);
        assert_eq!(window.start, 10_000);

        let long = DurationSelector::trailing(DurationUnit::Hour, 5);
        let window = HistoryWindow::for_contract(&contract, long, 20_000);
        assert_eq!(window.start, 20_000 - 5 * 3600);
    }

    #[test]
    fn test_trailing_window_with_extreme_counts() {
        let contract = snapshot(10_000, None);

        let negative = DurationSelector::trailing(DurationUnit::Day, i64::MIN);
        let window = HistoryWindow::for_contract(&contract, negative, 20_000);
        assert_eq!(window.start, 10_000);
        assert_eq!(window.end, 20_000);

        let huge = DurationSelector::trailing(DurationUnit::Day, i64::MAX);
        let window = HistoryWindow::for_contract(&contract, huge, 20_000);
        assert_eq!(window.start, i64::MIN);
        assert_eq!(
            HistoryPlan::for_window(&window, HistoryStyle::Ticks).granularity,
            Some(86400)
        );
    }

    #[test]
    fn test_plan_switches_to_candles_at_threshold() {
        let window = |span: i64| HistoryWindow {
            symbol: "R_100".to_string(),
            start: 0,
            end: span,
        };

        assert_eq!(
            HistoryPlan::for_window(&window(9_999), HistoryStyle::Ticks).style,
            HistoryStyle::Ticks
        );
        let plan = HistoryPlan::for_window(&window(10_000), HistoryStyle::Ticks);
        assert_eq!(plan.style, HistoryStyle::Candles);
        assert_eq!(plan.granularity, Some(60));
    }

    #[test]
    fn test_requested_candles_are_kept() {
        let window = HistoryWindow {
            symbol: "R_100".to_string(),
            start: 0,
            end: 100,
        };
        let plan = HistoryPlan::for_window(&window, HistoryStyle::Candles);
        assert_eq!(plan.style, HistoryStyle::Candles);
        assert_eq!(plan.granularity, Some(60));
    }

    #[test]
    fn test_history_points_coerce_strings() {
        let response = json!({
            "history": { "times": ["1000", 1002, "1004"], "prices": [1.5, "1.75", "2"] }
        });
        let points = history_to_points(&response).unwrap();
        assert_eq!(
            points,
            vec![
                TickPoint { epoch: 1000, quote: 1.5 },
                TickPoint { epoch: 1002, quote: 1.75 },
                TickPoint { epoch: 1004, quote: 2.0 },
            ]
        );
    }

    #[test]
    fn test_history_points_reject_garbage() {
        let response = json!({ "history": { "times": ["soon"], "prices": [1.0] } });
        assert!(matches!(
            history_to_points(&response),
            Err(LiveApiError::DeserializationError(_))
        ));
        assert!(history_to_points(&json!({})).is_err());
    }

    #[tokio::test]
    async fn test_long_open_contract_uses_candles() {
        let invoker = ScriptedInvoker::new(
            open_contract(1000),
            json!({
                "msg_type": "candles",
                "candles": [
                    { "epoch": 1000, "open": "10.5", "high": 11, "low": 10, "close": 10.8 },
                    { "epoch": 1060, "open": 10.8, "high": 11, "low": 10, "close": 10.9 }
                ]
            }),
        );

        let points = get_data_for_contract(
            &invoker,
            &FixedClock(25_996),
            json!(42),
            DurationSelector::All,
            HistoryStyle::Ticks,
        )
        .await
        .unwrap();

        assert_eq!(
            points,
            vec![
                TickPoint { epoch: 1000, quote: 10.5 },
                TickPoint { epoch: 1060, quote: 10.8 },
            ]
        );

        let calls = invoker.calls();
        assert_eq!(calls[0].0, "get_open_contract");
        assert_eq!(calls[0].1, vec![json!(42)]);
        assert_eq!(calls[1].1[0], "R_100");
        assert_eq!(
            invoker.history_options(),
            json!({
                "start": 1000,
                "end": 25_996,
                "adjust_start_time": 1,
                "count": 4999,
                "style": "candles",
                "granularity": 60
            })
        );
    }

    #[tokio::test]
    async fn test_short_contract_uses_ticks() {
        let invoker = ScriptedInvoker::new(
            open_contract(1000),
            json!({
                "msg_type": "history",
                "history": { "times": ["1000", "1002"], "prices": ["5.1", 5.2] }
            }),
        );

        let points = get_data_for_contract(
            &invoker,
            &FixedClock(1100),
            json!(42),
            DurationSelector::All,
            HistoryStyle::Ticks,
        )
        .await
        .unwrap();

        assert_eq!(
            points,
            vec![
                TickPoint { epoch: 1000, quote: 5.1 },
                TickPoint { epoch: 1002, quote: 5.2 },
            ]
        );
        let options = invoker.history_options();
        assert_eq!(options["style"], "ticks");
        assert!(options.get("granularity").is_none());
        assert_eq!(options["end"], 1100);
    }

    #[tokio::test]
    async fn test_repeated_requests_for_same_contract() {
        let invoker = ScriptedInvoker::new(
            open_contract(1000),
            json!({ "history": { "times": [1000], "prices": [3.5] } }),
        );
        let clock = FixedClock(1100);

        for _ in 0..2 {
            let points = get_data_for_contract(
                &invoker,
                &clock,
                json!(42),
                DurationSelector::All,
                HistoryStyle::Ticks,
            )
            .await
            .unwrap();
            assert_eq!(points, vec![TickPoint { epoch: 1000, quote: 3.5 }]);
        }

        let names: Vec<String> = invoker.calls().into_iter().map(|(name, _)| name).collect();
        assert_eq!(
            names,
            vec!["get_open_contract", "get_tick_history", "get_open_contract", "get_tick_history"]
        );
    }

    #[tokio::test]
    async fn test_sold_contract_stops_at_sell_time() {
        let invoker = ScriptedInvoker::new(
            json!({
                "msg_type": "proposal_open_contract",
                "proposal_open_contract": {
                    "underlying": "frxEURUSD",
                    "purchase_time": "2000",
                    "sell_time": "2300",
                    "sell_spot": "1.0842"
                }
            }),
            json!({ "history": { "times": [], "prices": [] } }),
        );

        let points = get_data_for_contract(
            &invoker,
            &FixedClock(1_000_000),
            json!("77"),
            DurationSelector::All,
            HistoryStyle::Ticks,
        )
        .await
        .unwrap();

        assert!(points.is_empty());
        let options = invoker.history_options();
        assert_eq!(options["start"], 2000);
        assert_eq!(options["end"], 2300);
        assert_eq!(invoker.calls()[1].1[0], "frxEURUSD");
    }

    #[tokio::test]
    async fn test_trailing_window_request() {
        let invoker = ScriptedInvoker::new(
            open_contract(50_000),
            json!({ "history": { "times": [], "prices": [] } }),
        );

        get_data_for_contract(
            &invoker,
            &FixedClock(60_000),
            json!(42),
            DurationSelector::trailing(DurationUnit::Day, 1),
            HistoryStyle::Ticks,
        )
        .await
        .unwrap();

        let options = invoker.history_options();
        assert_eq!(options["start"], 60_000 - 86_400);
        assert_eq!(options["style"], "candles");
    }

    #[tokio::test]
    async fn test_contract_error_propagates() {
        struct Failing;

        #[async_trait]
        impl CallInvoker for Failing {
            async fn call(&self, _name: &str, _args: Vec<Value>) -> Result<Value, LiveApiError> {
                Err(LiveApiError::ApiError {
                    code: "InvalidContractId".to_string(),
                    message: "Contract not found".to_string(),
                })
            }
        }

        let result = get_data_for_contract(
            &Failing,
            &FixedClock(0),
            json!(1),
            DurationSelector::All,
            HistoryStyle::Ticks,
        )
        .await;
        assert!(matches!(result, Err(LiveApiError::ApiError { .. })));
    }
}
