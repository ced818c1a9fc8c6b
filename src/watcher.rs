use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::alchemy::{AddressFilter, MinedTransaction, MinedTxEvent, MinedTxOptions, MinedTxSource};
use crate::domain::Direction;
use crate::error::StreamError;
use crate::pool::AggregationPool;

/// Monitored wallets, lowercased, split by the side they are watched on.
#[derive(Debug, Clone, Default)]
pub struct WalletFilter {
    from: HashSet<String>,
    to: HashSet<String>,
}

impl WalletFilter {
    pub fn new(from: &[String], to: &[String]) -> Self {
        Self {
            from: to_set(from),
            to: to_set(to),
        }
    }

    /// Every direction this transaction matches: none, one or both.
    pub fn directions(&self, tx: &MinedTransaction) -> Vec<Direction> {
        let mut matched = Vec::with_capacity(2);
        if self.from.contains(&tx.from.to_lowercase()) {
            matched.push(Direction::From);
        }
        if tx.wallet(Direction::To).is_some_and(|to| self.to.contains(&to)) {
            matched.push(Direction::To);
        }
        matched
    }

    pub fn subscription_filters(&self) -> Vec<AddressFilter> {
        let mut senders: Vec<&String> = self.from.iter().collect();
        let mut receivers: Vec<&String> = self.to.iter().collect();
        senders.sort();
        receivers.sort();

        senders
            .into_iter()
            .map(|wallet| AddressFilter::sender(wallet.as_str()))
            .chain(receivers.into_iter().map(|wallet| AddressFilter::receiver(wallet.as_str())))
            .collect()
    }
}

/// Routes mined transactions for the monitored wallets into the aggregation lanes.
pub struct Watcher<C: MinedTxSource> {
    client: Arc<C>,
    filter: Arc<WalletFilter>,
    include_removed: bool,
    shutdown: CancellationToken,
    pool: Option<AggregationPool>,
    dispatch: Option<JoinHandle<AggregationPool>>,
}

impl<C: MinedTxSource + 'static> Watcher<C> {
    pub fn new(client: Arc<C>, wallets_from: &[String], wallets_to: &[String], pool: AggregationPool) -> Self {
        Self {
            client,
            filter: Arc::new(WalletFilter::new(wallets_from, wallets_to)),
            include_removed: false,
            shutdown: CancellationToken::new(),
            pool: Some(pool),
            dispatch: None,
        }
    }

    /// Counts transactions later dropped by a reorg instead of skipping them.
    pub fn include_removed(mut self, include_removed: bool) -> Self {
        self.include_removed = include_removed;
        self
    }

    /// Subscribes and starts dispatching.
    ///
    /// The returned receiver resolves if the stream dies. Nothing reconnects,
    /// so the caller decides whether that ends the process.
    pub async fn start(&mut self) -> Result<oneshot::Receiver<StreamError>, StreamError> {
        let Some(pool) = self.pool.take() else {
            return Err(StreamError::AlreadySubscribed);
        };

        let options = MinedTxOptions {
            addresses: self.filter.subscription_filters(),
            include_removed: self.include_removed,
            hashes_only: false,
        };
        let subscription = match self.client.subscribe_mined_transactions(options).await {
            Ok(subscription) => subscription,
            Err(e) => {
                self.pool = Some(pool);
                return Err(e);
            }
        };

        info!(
            "👁️  Started transaction watcher: {} sender wallets, {} receiver wallets",
            self.filter.from.len(),
            self.filter.to.len()
        );

        self.dispatch = Some(tokio::spawn(dispatch(
            subscription.events,
            Arc::clone(&self.filter),
            pool,
            self.shutdown.clone(),
            self.include_removed,
        )));

        Ok(subscription.failures)
    }

    /// Stops taking events, drains the lanes within `grace`, then closes the stream.
    pub async fn stop(&mut self, grace: Duration) {
        info!("[Watcher] Stopping watcher");
        self.shutdown.cancel();

        let pool = match self.dispatch.take() {
            Some(handle) => match handle.await {
                Ok(pool) => Some(pool),
                Err(e) => {
                    warn!("[Watcher] Dispatch task failed: {}", e);
                    None
                }
            },
            None => self.pool.take(),
        };
        if let Some(pool) = pool {
            pool.drain(grace).await;
        }

        if let Err(e) = self.client.close().await {
            warn!("[Watcher] Failed to close stream: {}", e);
        }
    }
}

async fn dispatch(
    mut events: mpsc::Receiver<MinedTxEvent>,
    filter: Arc<WalletFilter>,
    pool: AggregationPool,
    shutdown: CancellationToken,
    include_removed: bool,
) -> AggregationPool {
    'events: loop {
        let event = tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                info!("[Watcher] Shutdown signal received");
                break;
            }
            event = events.recv() => match event {
                Some(event) => event,
                None => {
                    warn!("[Watcher] Event stream closed, no further transactions will arrive");
                    break;
                }
            },
        };

        if event.removed && !include_removed {
            warn!("[Watcher] Skipping reorged transaction {}", event.transaction.hash);
            continue;
        }

        for direction in filter.directions(&event.transaction) {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break 'events,
                queued = pool.submit(event.clone(), direction) => {
                    if let Err(rejected) = queued {
                        warn!("[Watcher] Aggregation lane closed, dropping {}", rejected.transaction.hash);
                    }
                }
            }
        }
    }

    pool
}

fn to_set(addresses: &[String]) -> HashSet<String> {
    addresses.iter().map(|addr| addr.to_lowercase()).collect()
}
