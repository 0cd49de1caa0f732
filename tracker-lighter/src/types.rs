//! Lighter wire types and trade normalization
//!
//! The stream and the poll API describe the same trades in different shapes.
//! Both raw records normalize into a single `NormalizedTrade`; normalization
//! is pure and total — malformed numeric fields coerce to zero instead of
//! failing the batch, and a missing trade id falls back to a content hash.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};

use tracker_core::{NormalizedTrade, TradeSide};

/// Pseudo-market used for polled trades, which the aggregator API does not
/// attribute to a specific market
pub const AGGREGATE_MARKET: &str = "aggregate";

// ============================================================================
// Stream protocol (matching Lighter's WebSocket API)
// ============================================================================

/// Command sent to the Lighter stream
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamCommand {
    /// Subscribe to a channel, authenticating with a bearer token
    Subscribe { channel: String, auth: String },
    /// Reply to an application-level ping
    Pong,
}

/// Message received from the Lighter stream
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum StreamMessage {
    /// Application-level liveness probe; must be answered with a pong
    #[serde(rename = "ping")]
    Ping,
    /// Subscription confirmed
    #[serde(rename = "subscribed/account_all_trades")]
    Subscribed {
        #[serde(default)]
        channel: Option<String>,
    },
    /// Trades of the tracked account, grouped by market
    #[serde(
        rename = "update/account_all_trades",
        alias = "account_all_trades"
    )]
    TradeUpdate {
        #[serde(default)]
        channel: Option<String>,
        #[serde(default)]
        trades: HashMap<String, Vec<RawStreamTrade>>,
    },
}

/// A raw trade record from the stream
///
/// The API reports counterparties as `bid_account_id` / `ask_account_id`
/// rather than an explicit side, and timestamps in milliseconds.
#[derive(Debug, Clone, Deserialize)]
pub struct RawStreamTrade {
    #[serde(default)]
    pub trade_id: Option<i64>,
    #[serde(default)]
    pub market_id: Option<i64>,
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub size: Decimal,
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub price: Decimal,
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub usd_amount: Decimal,
    #[serde(default)]
    pub bid_account_id: Option<i64>,
    #[serde(default)]
    pub ask_account_id: Option<i64>,
    #[serde(default)]
    pub is_maker_ask: Option<bool>,
    /// Event time in milliseconds
    #[serde(default)]
    pub timestamp: Option<i64>,
}

impl RawStreamTrade {
    /// Normalize a stream record against the tracked account
    ///
    /// `market_key` is the map key the trade arrived under, used when the
    /// record itself omits `market_id`. `received_at` stands in for a missing
    /// event timestamp.
    pub fn normalize(
        &self,
        tracked_account: i64,
        market_key: &str,
        received_at: DateTime<Utc>,
    ) -> NormalizedTrade {
        let side = if self.bid_account_id == Some(tracked_account) {
            TradeSide::Buy
        } else if self.ask_account_id == Some(tracked_account) {
            TradeSide::Sell
        } else {
            TradeSide::Unknown
        };

        // Millisecond event time -> whole seconds, the unit the watermark and
        // window scores compare in
        let timestamp = self
            .timestamp
            .and_then(|ms| DateTime::from_timestamp(ms / 1000, 0))
            .unwrap_or_else(|| truncate_to_seconds(received_at));

        let market_id = self
            .market_id
            .map(|m| m.to_string())
            .unwrap_or_else(|| market_key.to_string());

        let external_id = match self.trade_id {
            Some(id) => id.to_string(),
            None => content_hash(&[
                &market_id,
                &timestamp.timestamp().to_string(),
                &self.price.to_string(),
                &self.size.to_string(),
                &self.usd_amount.to_string(),
            ]),
        };

        NormalizedTrade {
            external_id,
            market_id,
            timestamp,
            side,
            usd_notional: self.usd_amount.max(Decimal::ZERO),
            price: self.price,
            size: self.size,
        }
    }
}

// ============================================================================
// Poll API (aggregator)
// ============================================================================

/// Response body of `GET /accounts/{id}/trades`
#[derive(Debug, Clone, Deserialize)]
pub struct TradesResponse {
    pub trades: Vec<RawPolledTrade>,
}

/// A raw trade record from the poll API: `{timestamp, direction, usdSize}`
#[derive(Debug, Clone, Deserialize)]
pub struct RawPolledTrade {
    #[serde(default, alias = "ts")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub direction: Option<String>,
    #[serde(default, alias = "usdSize", deserialize_with = "lenient_decimal")]
    pub usd_size: Decimal,
    #[serde(default, alias = "marketId")]
    pub market_id: Option<String>,
}

impl RawPolledTrade {
    /// Normalize a polled record
    ///
    /// The aggregator feed carries no trade id, so the window key is a
    /// content hash; it also carries no price/size breakdown.
    pub fn normalize(&self, received_at: DateTime<Utc>) -> NormalizedTrade {
        let side = self
            .direction
            .as_deref()
            .map(TradeSide::from_direction)
            .unwrap_or(TradeSide::Unknown);

        let timestamp = self
            .timestamp
            .map(truncate_to_seconds)
            .unwrap_or_else(|| truncate_to_seconds(received_at));

        let market_id = self
            .market_id
            .clone()
            .unwrap_or_else(|| AGGREGATE_MARKET.to_string());

        let external_id = content_hash(&[
            &market_id,
            &timestamp.timestamp().to_string(),
            side.as_str(),
            &self.usd_size.to_string(),
        ]);

        NormalizedTrade {
            external_id,
            market_id,
            timestamp,
            side,
            usd_notional: self.usd_size.max(Decimal::ZERO),
            price: Decimal::ZERO,
            size: Decimal::ZERO,
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Deterministic window key for records that lack a source id
fn content_hash(parts: &[&str]) -> String {
    format!("{:x}", md5::compute(parts.join("|")))
}

fn truncate_to_seconds(ts: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp(ts.timestamp(), 0).unwrap_or(ts)
}

/// Accept decimal fields as strings or numbers; anything malformed becomes
/// zero so one bad field never sinks the batch
fn lenient_decimal<'de, D>(deserializer: D) -> Result<Decimal, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    let parsed = match &value {
        serde_json::Value::String(s) => s.parse::<Decimal>().ok(),
        serde_json::Value::Number(n) => n.to_string().parse::<Decimal>().ok(),
        _ => None,
    };
    Ok(parsed.unwrap_or(Decimal::ZERO))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const ACCOUNT: i64 = 714_638;

    fn sample_stream_trade() -> RawStreamTrade {
        serde_json::from_str(
            r#"{
                "trade_id": 14879321842,
                "market_id": 132,
                "size": "1891",
                "price": "0.132360",
                "usd_amount": "250.292760",
                "bid_account_id": 714638,
                "ask_account_id": 54344,
                "is_maker_ask": true,
                "timestamp": 1772025303979
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_side_resolution_bid_is_buy() {
        let raw = sample_stream_trade();
        let trade = raw.normalize(ACCOUNT, "132", Utc::now());
        assert_eq!(trade.side, TradeSide::Buy);
    }

    #[test]
    fn test_side_resolution_ask_is_sell() {
        let mut raw = sample_stream_trade();
        raw.bid_account_id = Some(1);
        raw.ask_account_id = Some(ACCOUNT);
        let trade = raw.normalize(ACCOUNT, "132", Utc::now());
        assert_eq!(trade.side, TradeSide::Sell);
    }

    #[test]
    fn test_side_resolution_unmatched_is_unknown() {
        let raw = sample_stream_trade();
        let trade = raw.normalize(999, "132", Utc::now());
        assert_eq!(trade.side, TradeSide::Unknown);
    }

    #[test]
    fn test_millisecond_timestamp_truncated_to_seconds() {
        let raw = sample_stream_trade();
        let trade = raw.normalize(ACCOUNT, "132", Utc::now());
        assert_eq!(trade.unix_ts(), 1_772_025_303);
        assert_eq!(trade.timestamp.timestamp_subsec_millis(), 0);
    }

    #[test]
    fn test_malformed_numeric_fields_coerce_to_zero() {
        let raw: RawStreamTrade = serde_json::from_str(
            r#"{
                "trade_id": 7,
                "market_id": 1,
                "size": "not-a-number",
                "price": null,
                "usd_amount": "-3.50",
                "bid_account_id": 714638,
                "timestamp": 1772025303979
            }"#,
        )
        .unwrap();
        let trade = raw.normalize(ACCOUNT, "1", Utc::now());
        assert_eq!(trade.size, Decimal::ZERO);
        assert_eq!(trade.price, Decimal::ZERO);
        // usd notional is clamped non-negative
        assert_eq!(trade.usd_notional, Decimal::ZERO);
    }

    #[test]
    fn test_missing_trade_id_gets_deterministic_hash() {
        let mut raw = sample_stream_trade();
        raw.trade_id = None;
        let received = Utc::now();
        let a = raw.normalize(ACCOUNT, "132", received);
        let b = raw.normalize(ACCOUNT, "132", received);
        assert_eq!(a.external_id, b.external_id);
        assert_ne!(a.external_id, sample_stream_trade().normalize(ACCOUNT, "132", received).external_id);
    }

    #[test]
    fn test_polled_trade_normalization() {
        let raw: RawPolledTrade = serde_json::from_str(
            r#"{"timestamp": "2026-02-25T14:35:03Z", "direction": "Sell", "usdSize": 512.25}"#,
        )
        .unwrap();
        let trade = raw.normalize(Utc::now());
        assert_eq!(trade.side, TradeSide::Sell);
        assert_eq!(trade.usd_notional, dec!(512.25));
        assert_eq!(trade.market_id, AGGREGATE_MARKET);
        assert!(!trade.external_id.is_empty());
    }

    #[test]
    fn test_trade_update_message_parses() {
        let raw = r#"{
            "channel": "account_all_trades:714638",
            "type": "update/account_all_trades",
            "trades": {"132": [{"trade_id": 1, "timestamp": 1772025303979}]}
        }"#;
        match serde_json::from_str::<StreamMessage>(raw).unwrap() {
            StreamMessage::TradeUpdate { trades, .. } => {
                assert_eq!(trades.get("132").map(|t| t.len()), Some(1));
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_ping_message_parses_and_pong_serializes() {
        assert!(matches!(
            serde_json::from_str::<StreamMessage>(r#"{"type": "ping"}"#).unwrap(),
            StreamMessage::Ping
        ));
        assert_eq!(
            serde_json::to_string(&StreamCommand::Pong).unwrap(),
            r#"{"type":"pong"}"#
        );
    }
}
