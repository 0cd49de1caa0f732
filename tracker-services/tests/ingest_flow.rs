//! End-to-end ingestion tests: stream batches in, alerts and window state out

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use tracker_core::{NormalizedTrade, TradeSide};
use tracker_notify::{BroadcastChannel, NotifyError, PushSender};
use tracker_services::{
    DispatcherConfig, IngestConfig, NotificationDispatcher, SubscriberStore, TradeIngestor,
    TradeWindowStore, WatermarkStore, WatermarkTracker,
};

const ACCOUNT: &str = "714638";

#[derive(Default)]
struct RecordingBroadcast {
    messages: Mutex<Vec<String>>,
}

impl RecordingBroadcast {
    fn sell_alerts(&self) -> usize {
        self.messages
            .lock()
            .iter()
            .filter(|m| m.contains("SELL detected"))
            .count()
    }
}

#[async_trait]
impl BroadcastChannel for RecordingBroadcast {
    async fn send_message(&self, text: &str) -> Result<(), NotifyError> {
        self.messages.lock().push(text.to_string());
        Ok(())
    }
}

#[derive(Default)]
struct RecordingPush {
    sent: Mutex<Vec<String>>,
}

#[async_trait]
impl PushSender for RecordingPush {
    async fn send(&self, user_key: &str, _title: &str, _body: &str) -> Result<bool, NotifyError> {
        self.sent.lock().push(user_key.to_string());
        Ok(true)
    }
}

struct Harness {
    ingestor: Arc<TradeIngestor>,
    broadcast: Arc<RecordingBroadcast>,
    push: Arc<RecordingPush>,
    subscribers: Arc<SubscriberStore>,
    window: Arc<TradeWindowStore>,
    watermark_store: Arc<WatermarkStore>,
}

fn harness() -> Harness {
    let watermark_store = Arc::new(WatermarkStore::new_in_memory().unwrap());
    let watermark = Arc::new(WatermarkTracker::new(Arc::clone(&watermark_store), ACCOUNT).unwrap());
    let window = Arc::new(TradeWindowStore::new_in_memory().unwrap());
    let subscribers = Arc::new(SubscriberStore::new_in_memory().unwrap());
    let broadcast = Arc::new(RecordingBroadcast::default());
    let push = Arc::new(RecordingPush::default());

    let dispatcher = Arc::new(NotificationDispatcher::new(
        Arc::clone(&broadcast) as Arc<dyn BroadcastChannel>,
        Arc::clone(&push) as Arc<dyn PushSender>,
        Arc::clone(&subscribers),
        DispatcherConfig {
            cooldown: Duration::from_secs(7200),
            account_id: ACCOUNT.to_string(),
        },
    ));

    // Retention long enough that test trades (stamped near now) survive purges
    let ingestor = Arc::new(TradeIngestor::new(
        watermark,
        Arc::clone(&window),
        dispatcher,
        IngestConfig {
            account_id: ACCOUNT.to_string(),
            retention: Duration::from_secs(3600),
        },
    ));

    Harness {
        ingestor,
        broadcast,
        push,
        subscribers,
        window,
        watermark_store,
    }
}

fn trade(id: &str, ts: i64, side: TradeSide, usd: Decimal) -> NormalizedTrade {
    NormalizedTrade {
        external_id: id.to_string(),
        market_id: "132".to_string(),
        timestamp: DateTime::from_timestamp(ts, 0).unwrap(),
        side,
        usd_notional: usd,
        price: dec!(0.5),
        size: dec!(100),
    }
}

fn now() -> i64 {
    Utc::now().timestamp()
}

#[tokio::test]
async fn duplicate_trade_in_one_batch_alerts_once() {
    let h = harness();
    let ts = now();

    // Two copies of the same sell, identical external id
    let summary = h
        .ingestor
        .process_batch(vec![
            trade("s1", ts, TradeSide::Sell, dec!(500)),
            trade("s1", ts, TradeSide::Sell, dec!(500)),
        ])
        .await
        .unwrap();

    assert_eq!(summary.admitted, 1);
    assert_eq!(summary.sells_dispatched, 1);
    assert_eq!(h.broadcast.sell_alerts(), 1);
    assert_eq!(h.window.count(ACCOUNT).unwrap(), 1);
}

#[tokio::test]
async fn replaying_a_batch_neither_advances_nor_realerts() {
    let h = harness();
    let ts = now();
    let batch = vec![
        trade("b1", ts - 2, TradeSide::Buy, dec!(100)),
        trade("s1", ts - 1, TradeSide::Sell, dec!(500)),
    ];

    let first = h.ingestor.process_batch(batch.clone()).await.unwrap();
    assert_eq!(first.admitted, 2);
    assert_eq!(first.sells_dispatched, 1);
    let watermark_after_first = h.watermark_store.load(ACCOUNT).unwrap();
    assert_eq!(watermark_after_first, Some(ts - 1));

    // Same raw batch again: nothing admitted, watermark unchanged, no alert
    let second = h.ingestor.process_batch(batch).await.unwrap();
    assert_eq!(second.admitted, 0);
    assert_eq!(h.watermark_store.load(ACCOUNT).unwrap(), watermark_after_first);
    assert_eq!(h.broadcast.sell_alerts(), 1);
    assert_eq!(h.window.count(ACCOUNT).unwrap(), 2);
}

#[tokio::test]
async fn watermark_is_monotonic_across_cycles() {
    let h = harness();
    let ts = now();

    h.ingestor
        .process_batch(vec![trade("t1", ts - 10, TradeSide::Buy, dec!(1))])
        .await
        .unwrap();
    let mut previous = h.watermark_store.load(ACCOUNT).unwrap().unwrap();

    for (i, offset) in [8, 9, 5, 2].iter().enumerate() {
        h.ingestor
            .process_batch(vec![trade(
                &format!("t{}", i + 2),
                ts - offset,
                TradeSide::Buy,
                dec!(1),
            )])
            .await
            .unwrap();
        let current = h.watermark_store.load(ACCOUNT).unwrap().unwrap();
        assert!(current >= previous, "watermark regressed: {} < {}", current, previous);
        previous = current;
    }
}

#[tokio::test]
async fn cooldown_limits_personal_alerts_but_not_broadcast() {
    let h = harness();
    h.subscribers.upsert(1, "key-1").unwrap();
    let ts = now();

    h.ingestor
        .process_batch(vec![trade("s1", ts - 5, TradeSide::Sell, dec!(500))])
        .await
        .unwrap();
    assert_eq!(h.push.sent.lock().len(), 1);

    // A second sell moments later: the subscriber is inside the cooldown,
    // the channel is not
    h.ingestor
        .process_batch(vec![trade("s2", ts - 1, TradeSide::Sell, dec!(700))])
        .await
        .unwrap();

    assert_eq!(h.push.sent.lock().len(), 1);
    assert_eq!(h.broadcast.sell_alerts(), 2);
}

#[tokio::test]
async fn unknown_side_trades_reach_the_window_but_never_alert() {
    let h = harness();
    let ts = now();

    let summary = h
        .ingestor
        .process_batch(vec![trade("u1", ts, TradeSide::Unknown, dec!(900))])
        .await
        .unwrap();

    assert_eq!(summary.admitted, 1);
    assert_eq!(summary.sells_dispatched, 0);
    assert_eq!(h.broadcast.sell_alerts(), 0);
    assert_eq!(h.window.count(ACCOUNT).unwrap(), 1);
}

#[tokio::test]
async fn late_duplicate_with_newer_timestamp_is_stopped_by_window_key() {
    let h = harness();
    let ts = now();

    h.ingestor
        .process_batch(vec![trade("s1", ts - 10, TradeSide::Sell, dec!(500))])
        .await
        .unwrap();

    // The same trade id re-delivered with a (bogus) newer timestamp passes
    // the watermark but is rejected by the window key, so no second alert
    let summary = h
        .ingestor
        .process_batch(vec![trade("s1", ts - 3, TradeSide::Sell, dec!(500))])
        .await
        .unwrap();

    assert_eq!(summary.admitted, 1);
    assert_eq!(summary.inserted, 0);
    assert_eq!(summary.sells_dispatched, 0);
    assert_eq!(h.broadcast.sell_alerts(), 1);
    assert_eq!(h.window.count(ACCOUNT).unwrap(), 1);
}
