//! Watches mined Ethereum transactions for a set of wallets and alerts when
//! the ETH a wallet sends or receives inside a sliding window crosses a
//! threshold.
//!
//! Transactions that a chain reorganization later removes are skipped by
//! default, so they never count toward a window. Set
//! `INCLUDE_REMOVED_TRANSACTIONS=true` to count them as well.

pub mod aggregator;
pub mod alchemy;
pub mod amount;
pub mod config;
pub mod domain;
pub mod error;
pub mod notifier;
pub mod pool;
pub mod watcher;

use std::sync::Arc;

use aggregator::Aggregator;
use alchemy::AlchemyClient;
use config::AppConfig;
use error::StreamError;
use notifier::NotifierHub;
use pool::AggregationPool;
use watcher::Watcher;

use anyhow::{anyhow, Result};
use tokio::sync::oneshot::error::RecvError;
use tracing::{error, info, warn};

pub async fn run() -> Result<()> {
    let config = AppConfig::from_env()?;

    let notifier = NotifierHub::from_config(&config);
    if notifier.telegram_enabled() {
        info!("📱 Telegram notifications enabled");
    } else {
        info!("📱 Telegram notifications disabled (no credentials)");
    }
    info!(
        "📊 Threshold {} ETH over {:?}, cooldown {:?}",
        config.aggregation.threshold, config.aggregation.window, config.aggregation.cooldown
    );

    let aggregator = Arc::new(Aggregator::new(config.aggregation.clone(), Arc::new(notifier)));
    let client = Arc::new(AlchemyClient::connect(&config.alchemy_endpoint()).await?);
    let pool = AggregationPool::new(
        aggregator.clone(),
        config.aggregation_workers,
        config.aggregation_queue_depth,
    );
    let mut watcher = Watcher::new(client, &config.wallets_from, &config.wallets_to, pool)
        .include_removed(config.include_removed);

    let failures = watcher.start().await?;

    let outcome = tokio::select! {
        _ = shutdown_signal() => {
            info!("🛑 Shutdown requested");
            Ok(())
        }
        failure = failures => stream_outcome(failure),
    };

    watcher.stop(config.shutdown_grace).await;
    if tokio::time::timeout(config.shutdown_grace, aggregator.wait_idle())
        .await
        .is_err()
    {
        warn!("⚠️  Pending notifications abandoned after {:?}", config.shutdown_grace);
    }

    info!("👋 Watcher stopped");
    outcome
}

/// Maps the stream's failure channel to the exit result of `run`.
fn stream_outcome(failure: Result<StreamError, RecvError>) -> Result<()> {
    match failure {
        Ok(e) => {
            error!("❌ Transaction stream failed: {}", e);
            Err(anyhow!("transaction stream failed: {e}"))
        }
        Err(_) => {
            warn!("⚠️  Transaction stream stopped without reporting a cause");
            Ok(())
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
