//! Trade data structures for the tracked account

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which side of a trade the tracked account was on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeSide {
    /// The tracked account placed the bid (bought)
    Buy,
    /// The tracked account placed the ask (sold)
    Sell,
    /// Neither counterparty matched the tracked account
    Unknown,
}

impl TradeSide {
    /// Parse an explicit direction string (e.g. from the poll feed)
    pub fn from_direction(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "buy" => TradeSide::Buy,
            "sell" => TradeSide::Sell,
            _ => TradeSide::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TradeSide::Buy => "buy",
            TradeSide::Sell => "sell",
            TradeSide::Unknown => "unknown",
        }
    }
}

impl fmt::Display for TradeSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for TradeSide {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "buy" => Ok(TradeSide::Buy),
            "sell" => Ok(TradeSide::Sell),
            "unknown" => Ok(TradeSide::Unknown),
            _ => Err(format!("Unknown trade side: {}", s)),
        }
    }
}

/// A trade of the tracked account, normalized from a source-specific record
///
/// Produced exactly once per raw event by the normalizer and passed by value
/// thereafter; never mutated. Timestamps are event time truncated to whole
/// seconds so they compare directly against the watermark and window scores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedTrade {
    /// Source-provided trade id, or a content hash when the source omits one
    pub external_id: String,
    /// Opaque market identifier
    pub market_id: String,
    /// Event time (not receipt time), second precision
    pub timestamp: DateTime<Utc>,
    /// Side of the trade from the tracked account's perspective
    pub side: TradeSide,
    /// USD notional of the trade; malformed source values coerce to zero
    pub usd_notional: Decimal,
    /// Execution price as reported by the source
    pub price: Decimal,
    /// Base size as reported by the source
    pub size: Decimal,
}

impl NormalizedTrade {
    pub fn is_sell(&self) -> bool {
        self.side == TradeSide::Sell
    }

    pub fn is_buy(&self) -> bool {
        self.side == TradeSide::Buy
    }

    /// Event time as unix seconds (watermark / window score)
    pub fn unix_ts(&self) -> i64 {
        self.timestamp.timestamp()
    }
}
