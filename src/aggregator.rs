//! Sliding-window volume aggregation with per-wallet alert cooldown.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::alchemy::MinedTxEvent;
use crate::amount::parse_value;
use crate::domain::{Direction, VolumeAlert};
use crate::notifier::Notifier;

#[derive(Debug, Clone, PartialEq)]
pub struct AggregationConfig {
    /// Inclusive lower bound on the windowed total.
    pub threshold: f64,
    pub window: Duration,
    pub cooldown: Duration,
}

/// Consumer of matched transactions.
#[async_trait]
pub trait Aggregate: Send + Sync {
    async fn process(&self, event: &MinedTxEvent, direction: Direction);
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct WalletKey {
    direction: Direction,
    wallet: String,
}

#[derive(Debug, Clone, Copy)]
struct TxRecord {
    amount: f64,
    observed_at: Instant,
}

#[derive(Debug, Default)]
struct WalletWindow {
    records: VecDeque<TxRecord>,
    last_alert: Option<Instant>,
}

impl WalletWindow {
    /// Appends `amount`, drops records older than `window` and returns the new total.
    fn observe(&mut self, amount: f64, now: Instant, window: Duration) -> f64 {
        self.records.push_back(TxRecord {
            amount,
            observed_at: now,
        });
        self.records
            .retain(|record| now.saturating_duration_since(record.observed_at) <= window);
        self.total()
    }

    fn total(&self) -> f64 {
        self.records.iter().map(|record| record.amount).sum()
    }

    /// Arms a new alert unless the previous one is still cooling down.
    fn try_alert(&mut self, now: Instant, cooldown: Duration) -> bool {
        if let Some(last) = self.last_alert {
            if now.saturating_duration_since(last) <= cooldown {
                return false;
            }
        }
        self.last_alert = Some(now);
        true
    }
}

/// Tracks volume per (direction, wallet) and fires rate limited alerts.
///
/// Every key shares one lock, so updates are fully serialized.
pub struct Aggregator {
    config: AggregationConfig,
    state: Mutex<HashMap<WalletKey, WalletWindow>>,
    notifier: Arc<dyn Notifier>,
    notifications: TaskTracker,
}

impl Aggregator {
    pub fn new(config: AggregationConfig, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            config,
            state: Mutex::new(HashMap::new()),
            notifier,
            notifications: TaskTracker::new(),
        }
    }

    pub fn config(&self) -> &AggregationConfig {
        &self.config
    }

    pub async fn process(&self, event: &MinedTxEvent, direction: Direction) {
        let Some(wallet) = event.transaction.wallet(direction) else {
            debug!(hash = %event.transaction.hash, "no {} wallet on transaction", direction);
            return;
        };

        let mut state = self.state.lock().await;
        let now = Instant::now();
        let amount = parse_value(&event.transaction.value);

        let window = state
            .entry(WalletKey {
                direction,
                wallet: wallet.clone(),
            })
            .or_default();
        let total = window.observe(amount, now, self.config.window);

        if total < self.config.threshold {
            return;
        }
        if !window.try_alert(now, self.config.cooldown) {
            debug!("Alert for {} wallet {} suppressed by cooldown", direction, wallet);
            return;
        }
        drop(state);

        info!("🚨 {} wallet {} moved {:.4} ETH inside the window", direction, wallet, total);

        let alert = VolumeAlert::new(event.transaction.hash.clone(), direction, wallet, total);
        let notifier = Arc::clone(&self.notifier);
        self.notifications.spawn(async move {
            if let Err(e) = notifier.notify_threshold_exceeded(&alert).await {
                warn!("Failed to deliver alert for tx {}: {:#}", alert.tx_hash, e);
            }
        });
    }

    /// Total currently retained for a key, as of its last update.
    pub async fn window_total(&self, direction: Direction, wallet: &str) -> Option<f64> {
        let state = self.state.lock().await;
        state.get(&key(direction, wallet)).map(WalletWindow::total)
    }

    pub async fn window_len(&self, direction: Direction, wallet: &str) -> usize {
        let state = self.state.lock().await;
        state
            .get(&key(direction, wallet))
            .map_or(0, |window| window.records.len())
    }

    pub async fn last_alert(&self, direction: Direction, wallet: &str) -> Option<Instant> {
        let state = self.state.lock().await;
        state.get(&key(direction, wallet)).and_then(|window| window.last_alert)
    }

    pub async fn tracked_keys(&self) -> usize {
        self.state.lock().await.len()
    }

    /// Waits for every alert delivery spawned so far.
    pub async fn wait_idle(&self) {
        self.notifications.close();
        self.notifications.wait().await;
        self.notifications.reopen();
    }
}

fn key(direction: Direction, wallet: &str) -> WalletKey {
    WalletKey {
        direction,
        wallet: wallet.to_lowercase(),
    }
}

#[async_trait]
impl Aggregate for Aggregator {
    async fn process(&self, event: &MinedTxEvent, direction: Direction) {
        Aggregator::process(self, event, direction).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alchemy::MinedTransaction;
    use anyhow::{anyhow, Result};
    use std::sync::Mutex as StdMutex;
    use tokio::time::advance;

    const ONE_ETH: &str = "0xde0b6b3a7640000";
    const POINT_SIX_ETH: &str = "0x853a0d2313c0000";

    #[derive(Default)]
    struct RecordingNotifier {
        alerts: StdMutex<Vec<VolumeAlert>>,
        fail: bool,
    }

    impl RecordingNotifier {
        fn failing() -> Self {
            Self {
                fail: true,
                ..Default::default()
            }
        }

        fn alerts(&self) -> Vec<VolumeAlert> {
            self.alerts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify_threshold_exceeded(&self, alert: &VolumeAlert) -> Result<()> {
            self.alerts.lock().unwrap().push(alert.clone());
            if self.fail {
                Err(anyhow!("delivery failed"))
            } else {
                Ok(())
            }
        }
    }

    fn config(threshold: f64) -> AggregationConfig {
        AggregationConfig {
            threshold,
            window: Duration::from_secs(10),
            cooldown: Duration::from_secs(5),
        }
    }

    fn setup(threshold: f64) -> (Aggregator, Arc<RecordingNotifier>) {
        let notifier = Arc::new(RecordingNotifier::default());
        (Aggregator::new(config(threshold), notifier.clone()), notifier)
    }

    fn tx(hash: &str, from: &str, to: &str, value: &str) -> MinedTxEvent {
        MinedTxEvent {
            removed: false,
            transaction: MinedTransaction {
                hash: hash.to_string(),
                from: from.to_string(),
                to: Some(to.to_string()),
                value: value.to_string(),
                ..Default::default()
            },
        }
    }

    fn wei(eth: f64) -> String {
        format!("{:#x}", (eth * 1e18) as u128)
    }

    fn assert_close(actual: f64, expected: f64) {
        assert!((actual - expected).abs() < 1e-9, "expected {expected}, got {actual}");
    }

    #[tokio::test(start_paused = true)]
    async fn single_transaction_at_threshold_alerts() {
        let (aggregator, notifier) = setup(1.0);

        aggregator.process(&tx("0x1", "0xabc", "0xdef", ONE_ETH), Direction::From).await;
        aggregator.wait_idle().await;

        let alerts = notifier.alerts();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].tx_hash, "0x1");
        assert_eq!(alerts[0].wallet_from, "0xabc");
        assert_eq!(alerts[0].wallet_to, "");
        assert_close(alerts[0].total, 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn volume_accumulates_inside_window() {
        let (aggregator, notifier) = setup(1.0);

        aggregator.process(&tx("0x1", "0xabc", "0xdef", POINT_SIX_ETH), Direction::From).await;
        aggregator.wait_idle().await;
        assert!(notifier.alerts().is_empty());

        advance(Duration::from_secs(3)).await;
        aggregator.process(&tx("0x2", "0xabc", "0xdef", POINT_SIX_ETH), Direction::From).await;
        aggregator.wait_idle().await;

        let alerts = notifier.alerts();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].tx_hash, "0x2");
        assert_close(alerts[0].total, 1.2);
    }

    #[tokio::test(start_paused = true)]
    async fn cooldown_suppresses_then_rearms() {
        let (aggregator, notifier) = setup(1.0);
        let event = tx("0x1", "0xabc", "0xdef", ONE_ETH);

        aggregator.process(&event, Direction::From).await;
        advance(Duration::from_secs(2)).await;
        aggregator.process(&event, Direction::From).await;
        aggregator.wait_idle().await;
        assert_eq!(notifier.alerts().len(), 1);

        advance(Duration::from_secs(4)).await;
        aggregator.process(&event, Direction::From).await;
        aggregator.wait_idle().await;
        assert_eq!(notifier.alerts().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cooldown_boundary_is_exclusive() {
        let (aggregator, notifier) = setup(1.0);
        let event = tx("0x1", "0xabc", "0xdef", ONE_ETH);

        aggregator.process(&event, Direction::From).await;
        let first_alert = aggregator.last_alert(Direction::From, "0xabc").await.unwrap();

        advance(Duration::from_secs(5)).await;
        aggregator.process(&event, Direction::From).await;
        aggregator.wait_idle().await;
        assert_eq!(notifier.alerts().len(), 1, "exactly cooldown elapsed must suppress");
        assert_eq!(aggregator.last_alert(Direction::From, "0xabc").await, Some(first_alert));

        advance(Duration::from_millis(1)).await;
        aggregator.process(&event, Direction::From).await;
        aggregator.wait_idle().await;
        assert_eq!(notifier.alerts().len(), 2);
        assert!(aggregator.last_alert(Direction::From, "0xabc").await.unwrap() > first_alert);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_records_leave_the_total() {
        let (aggregator, notifier) = setup(1.0);

        aggregator.process(&tx("0x1", "0xabc", "0xdef", POINT_SIX_ETH), Direction::From).await;
        advance(Duration::from_secs(11)).await;
        aggregator.process(&tx("0x2", "0xabc", "0xdef", POINT_SIX_ETH), Direction::From).await;
        aggregator.wait_idle().await;

        assert!(notifier.alerts().is_empty());
        assert_close(aggregator.window_total(Direction::From, "0xabc").await.unwrap(), 0.6);
        assert_eq!(aggregator.window_len(Direction::From, "0xabc").await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn record_exactly_window_old_is_retained() {
        let (aggregator, _notifier) = setup(100.0);

        aggregator.process(&tx("0x1", "0xabc", "0xdef", ONE_ETH), Direction::From).await;
        advance(Duration::from_secs(10)).await;
        aggregator.process(&tx("0x2", "0xabc", "0xdef", ONE_ETH), Direction::From).await;

        assert_close(aggregator.window_total(Direction::From, "0xabc").await.unwrap(), 2.0);
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_amount_counts_as_zero() {
        let (aggregator, notifier) = setup(1.0);

        aggregator.process(&tx("0x1", "0xabc", "0xdef", "nothex"), Direction::From).await;
        assert_eq!(aggregator.window_total(Direction::From, "0xabc").await, Some(0.0));

        aggregator.process(&tx("0x2", "0xabc", "0xdef", ONE_ETH), Direction::From).await;
        aggregator.wait_idle().await;

        let alerts = notifier.alerts();
        assert_eq!(alerts.len(), 1);
        assert_close(alerts[0].total, 1.0);
        assert_eq!(aggregator.window_len(Direction::From, "0xabc").await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn directions_are_tracked_independently() {
        let (aggregator, notifier) = setup(1.0);

        aggregator.process(&tx("0x1", "0xabc", "0xdef", POINT_SIX_ETH), Direction::From).await;
        aggregator.process(&tx("0x2", "0xdef", "0xabc", POINT_SIX_ETH), Direction::To).await;
        aggregator.wait_idle().await;
        assert!(notifier.alerts().is_empty());
        assert_eq!(aggregator.tracked_keys().await, 2);

        aggregator.process(&tx("0x3", "0xdef", "0xabc", POINT_SIX_ETH), Direction::To).await;
        aggregator.wait_idle().await;

        let alerts = notifier.alerts();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].wallet_from, "");
        assert_eq!(alerts[0].wallet_to, "0xabc");
        assert!(aggregator.last_alert(Direction::From, "0xabc").await.is_none());
        assert_close(aggregator.window_total(Direction::From, "0xabc").await.unwrap(), 0.6);
    }

    #[tokio::test(start_paused = true)]
    async fn wallets_are_case_insensitive() {
        let (aggregator, _notifier) = setup(100.0);

        aggregator.process(&tx("0x1", "0xABC", "0xdef", ONE_ETH), Direction::From).await;
        aggregator.process(&tx("0x2", "0xabc", "0xdef", ONE_ETH), Direction::From).await;

        assert_eq!(aggregator.tracked_keys().await, 1);
        assert_close(aggregator.window_total(Direction::From, "0xAbC").await.unwrap(), 2.0);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_receiver_is_a_noop() {
        let (aggregator, notifier) = setup(0.0);
        let mut creation = tx("0x1", "0xabc", "", ONE_ETH);
        creation.transaction.to = None;

        aggregator.process(&creation, Direction::To).await;
        aggregator.wait_idle().await;

        assert_eq!(aggregator.tracked_keys().await, 0);
        assert!(notifier.alerts().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn non_positive_threshold_alerts_on_zero_volume() {
        for threshold in [0.0, -1.0] {
            let (aggregator, notifier) = setup(threshold);
            aggregator.process(&tx("0x1", "0xabc", "0xdef", "0x0"), Direction::From).await;
            aggregator.wait_idle().await;

            let alerts = notifier.alerts();
            assert_eq!(alerts.len(), 1, "threshold {threshold}");
            assert_eq!(alerts[0].total, 0.0);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn failed_delivery_still_counts_as_sent() {
        let notifier = Arc::new(RecordingNotifier::failing());
        let aggregator = Aggregator::new(config(1.0), notifier.clone());
        let event = tx("0x1", "0xabc", "0xdef", ONE_ETH);

        aggregator.process(&event, Direction::From).await;
        aggregator.wait_idle().await;
        assert!(aggregator.last_alert(Direction::From, "0xabc").await.is_some());

        advance(Duration::from_secs(1)).await;
        aggregator.process(&event, Direction::From).await;
        aggregator.wait_idle().await;
        assert_eq!(notifier.alerts().len(), 1, "no retry inside cooldown");
    }

    #[tokio::test(start_paused = true)]
    async fn retained_sum_matches_window_of_latest_event() {
        let (aggregator, _notifier) = setup(f64::MAX);
        let steps: [(u64, f64); 8] = [
            (0, 0.5),
            (2, 1.25),
            (4, 0.75),
            (7, 2.0),
            (3, 0.1),
            (9, 3.5),
            (1, 0.2),
            (12, 0.05),
        ];

        let mut history: Vec<(u64, f64)> = Vec::new();
        let mut elapsed = 0;
        for (gap, eth) in steps {
            advance(Duration::from_secs(gap)).await;
            elapsed += gap;
            history.push((elapsed, eth));

            aggregator.process(&tx("0x1", "0xabc", "0xdef", &wei(eth)), Direction::From).await;

            let expected: f64 = history
                .iter()
                .filter(|(at, _)| elapsed - at <= 10)
                .map(|(_, eth)| eth)
                .sum();
            let actual = aggregator.window_total(Direction::From, "0xabc").await.unwrap();
            assert!((actual - expected).abs() < 1e-9, "at {elapsed}s expected {expected}, got {actual}");
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_updates_keep_state_consistent() {
        let notifier = Arc::new(RecordingNotifier::default());
        let aggregator = Arc::new(Aggregator::new(
            AggregationConfig {
                threshold: 50.0,
                window: Duration::from_secs(3600),
                cooldown: Duration::from_secs(3600),
            },
            notifier.clone(),
        ));
        let wallets = ["0xaaa", "0xbbb", "0xccc", "0xddd"];

        let mut handles = Vec::new();
        for task in 0..16 {
            let aggregator = Arc::clone(&aggregator);
            handles.push(tokio::spawn(async move {
                let direction = if task % 2 == 0 { Direction::From } else { Direction::To };
                for i in 0..40 {
                    let wallet = wallets[i % wallets.len()];
                    let event = tx(&format!("0x{task}{i}"), wallet, wallet, ONE_ETH);
                    aggregator.process(&event, direction).await;
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        aggregator.wait_idle().await;

        // 8 tasks per direction, each sending 10 events to every wallet.
        assert_eq!(aggregator.tracked_keys().await, 8);
        let mut total_records = 0;
        for wallet in wallets {
            for direction in [Direction::From, Direction::To] {
                let len = aggregator.window_len(direction, wallet).await;
                let total = aggregator.window_total(direction, wallet).await.unwrap();
                assert_eq!(total, len as f64);
                assert_eq!(len, 80);
                total_records += len;
            }
        }
        assert_eq!(total_records, 640);

        // Each key crosses 50 ETH once and then stays inside the cooldown.
        assert_eq!(notifier.alerts().len(), 8);
    }
}
