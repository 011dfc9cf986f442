use crate::core::errors::LiveApiError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Session connection status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Unknown,
    Connected,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => write!(f, "unknown"),
            Self::Connected => write!(f, "connected"),
        }
    }
}

/// One point of a normalized price series
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TickPoint {
    pub epoch: i64,
    pub quote: f64,
}

/// Presentation style of a historical data request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryStyle {
    Ticks,
    Candles,
}

impl HistoryStyle {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ticks => "ticks",
            Self::Candles => "candles",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DurationUnit {
    Second,
    Minute,
    Hour,
    Day,
}

impl DurationUnit {
    /// Parse a unit name; anything unrecognised counts as days
    pub fn parse(unit: &str) -> Self {
        match unit {
            "second" | "s" => Self::Second,
            "minute" | "m" => Self::Minute,
            "hour" | "h" => Self::Hour,
            _ => Self::Day,
        }
    }

    pub const fn seconds(self) -> i64 {
        match self {
            Self::Second => 1,
            Self::Minute => 60,
            Self::Hour => 3_600,
            Self::Day => 86_400,
        }
    }
}

/// How much of a contract's lifetime to fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DurationSelector {
    All,
    Trailing { unit: DurationUnit, count: i64 },
}

impl DurationSelector {
    pub const fn trailing(unit: DurationUnit, count: i64) -> Self {
        Self::Trailing { unit, count }
    }
}

/// The subset of a `proposal_open_contract` snapshot the aggregator needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractSnapshot {
    pub underlying: String,
    pub purchase_time: i64,
    pub sell_time: Option<i64>,
    pub is_sold: bool,
}

impl ContractSnapshot {
    /// Extract the snapshot from a `proposal_open_contract` response frame
    pub fn from_response(response: &Value) -> Result<Self, LiveApiError> {
        let contract = response.get("proposal_open_contract").ok_or_else(|| {
            LiveApiError::DeserializationError(
                "Missing proposal_open_contract in response".to_string(),
            )
        })?;

        let underlying = contract
            .get("underlying")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                LiveApiError::DeserializationError("Contract has no underlying".to_string())
            })?
            .to_string();

        let purchase_time = contract
            .get("purchase_time")
            .map(coerce_epoch)
            .transpose()?
            .ok_or_else(|| {
                LiveApiError::DeserializationError("Contract has no purchase_time".to_string())
            })?;

        let sell_time = match contract.get("sell_time") {
            None | Some(Value::Null) => None,
            Some(value) => Some(coerce_epoch(value)?),
        };

        let is_sold = contract
            .get("sell_spot")
            .is_some_and(|spot| !spot.is_null());

        Ok(Self {
            underlying,
            purchase_time,
            sell_time,
            is_sold,
        })
    }
}

/// Coerce a JSON number or numeric string to `f64`
pub fn coerce_number(value: &Value) -> Result<f64, LiveApiError> {
    match value {
        Value::Number(n) => n.as_f64().ok_or_else(|| {
            LiveApiError::DeserializationError(format!("Number out of range: {}", n))
        }),
        Value::String(s) => s.trim().parse::<f64>().map_err(|e| {
            LiveApiError::DeserializationError(format!("Not a number '{}': {}", s, e))
        }),
        other => Err(LiveApiError::DeserializationError(format!(
            "Expected a number, got {}",
            other
        ))),
    }
}

/// Coerce a JSON number or numeric string to whole epoch seconds
pub fn coerce_epoch(value: &Value) -> Result<i64, LiveApiError> {
    if let Some(epoch) = value.as_i64() {
        return Ok(epoch);
    }
    coerce_number(value).map(|n| n as i64)
}
