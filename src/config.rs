use std::collections::HashMap;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use ethers_core::types::Address;

use crate::aggregator::AggregationConfig;
use crate::alchemy::ALCHEMY_WS_URL;

const DEFAULT_WINDOW_SECS: u64 = 300;
const DEFAULT_COOLDOWN_SECS: u64 = 30;
const DEFAULT_WORKERS: usize = 4;
const DEFAULT_QUEUE_DEPTH: usize = 256;
const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 5;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub alchemy_api_key: String,
    pub alchemy_ws_url: String,
    pub telegram_bot_token: Option<String>,
    pub telegram_chat_id: Option<String>,
    pub wallets_from: Vec<String>,
    pub wallets_to: Vec<String>,
    pub wallet_labels: HashMap<String, String>,
    pub aggregation: AggregationConfig,
    pub aggregation_workers: usize,
    pub aggregation_queue_depth: usize,
    pub include_removed: bool,
    pub shutdown_grace: Duration,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let alchemy_api_key =
            get("ALCHEMY_API_KEY").ok_or_else(|| anyhow!("ALCHEMY_API_KEY must be set in .env"))?;
        let alchemy_ws_url = get("ALCHEMY_WS_URL").unwrap_or_else(|| ALCHEMY_WS_URL.to_string());

        let wallets_from = parse_wallets(&get("MONITORED_WALLETS_FROM").unwrap_or_default())
            .context("invalid MONITORED_WALLETS_FROM")?;
        let wallets_to = parse_wallets(&get("MONITORED_WALLETS_TO").unwrap_or_default())
            .context("invalid MONITORED_WALLETS_TO")?;
        if wallets_from.is_empty() && wallets_to.is_empty() {
            return Err(anyhow!(
                "MONITORED_WALLETS_FROM and MONITORED_WALLETS_TO cannot both be empty"
            ));
        }

        let wallet_labels = parse_wallet_labels(&get("WALLET_LABELS").unwrap_or_default());

        let threshold: f64 = parse_or("THRESHOLD_ETH", get("THRESHOLD_ETH"), 0.0)?;
        if !threshold.is_finite() {
            return Err(anyhow!("THRESHOLD_ETH must be a finite number"));
        }
        let window = parse_or(
            "AGGREGATION_WINDOW_IN_SECONDS",
            get("AGGREGATION_WINDOW_IN_SECONDS"),
            DEFAULT_WINDOW_SECS,
        )?;
        let cooldown = parse_or(
            "AGGREGATION_NOTIFICATION_COOLDOWN_IN_SECONDS",
            get("AGGREGATION_NOTIFICATION_COOLDOWN_IN_SECONDS"),
            DEFAULT_COOLDOWN_SECS,
        )?;

        let aggregation_workers = parse_or("AGGREGATION_WORKERS", get("AGGREGATION_WORKERS"), DEFAULT_WORKERS)?;
        let aggregation_queue_depth = parse_or(
            "AGGREGATION_QUEUE_DEPTH",
            get("AGGREGATION_QUEUE_DEPTH"),
            DEFAULT_QUEUE_DEPTH,
        )?;
        if aggregation_workers == 0 || aggregation_queue_depth == 0 {
            return Err(anyhow!(
                "AGGREGATION_WORKERS and AGGREGATION_QUEUE_DEPTH must be at least 1"
            ));
        }

        let include_removed = parse_or(
            "INCLUDE_REMOVED_TRANSACTIONS",
            get("INCLUDE_REMOVED_TRANSACTIONS"),
            false,
        )?;
        let shutdown_grace = parse_or(
            "SHUTDOWN_GRACE_IN_SECONDS",
            get("SHUTDOWN_GRACE_IN_SECONDS"),
            DEFAULT_SHUTDOWN_GRACE_SECS,
        )?;

        Ok(Self {
            alchemy_api_key,
            alchemy_ws_url,
            telegram_bot_token: get("TELEGRAM_BOT_API_KEY"),
            telegram_chat_id: get("TELEGRAM_CHAT_ID"),
            wallets_from,
            wallets_to,
            wallet_labels,
            aggregation: AggregationConfig {
                threshold,
                window: Duration::from_secs(window),
                cooldown: Duration::from_secs(cooldown),
            },
            aggregation_workers,
            aggregation_queue_depth,
            include_removed,
            shutdown_grace: Duration::from_secs(shutdown_grace),
        })
    }

    /// Full websocket endpoint, API key included. Log it through `mask_endpoint`.
    pub fn alchemy_endpoint(&self) -> String {
        format!("{}{}", self.alchemy_ws_url, self.alchemy_api_key)
    }
}

fn parse_or<T>(key: &str, raw: Option<String>, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|e| anyhow!("invalid value '{}' for {}: {}", raw, key, e)),
    }
}

/// Splits a comma separated wallet list, validates each address and lowercases it.
pub fn parse_wallets(raw: &str) -> Result<Vec<String>> {
    let mut wallets = Vec::new();
    for wallet in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        wallet
            .parse::<Address>()
            .map_err(|e| anyhow!("'{}' is not a valid address: {}", wallet, e))?;
        let wallet = wallet.to_lowercase();
        if !wallets.contains(&wallet) {
            wallets.push(wallet);
        }
    }
    Ok(wallets)
}

pub fn parse_wallet_labels(raw: &str) -> HashMap<String, String> {
    raw.split(',')
        .filter_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            let key = key.trim();
            let value = value.trim();
            if key.is_empty() || value.is_empty() || value.contains('=') {
                return None;
            }
            Some((key.to_lowercase(), value.to_string()))
        })
        .collect()
}
