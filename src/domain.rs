use std::fmt;

use chrono::{DateTime, Utc};

/// Whether a wallet is watched as the sender or the receiver of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    From,
    To,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::From => "from",
            Direction::To => "to",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decided alert: `total` ETH moved through one wallet inside the window.
///
/// Exactly one of `wallet_from` / `wallet_to` is non-empty.
#[derive(Debug, Clone, PartialEq)]
pub struct VolumeAlert {
    pub tx_hash: String,
    pub wallet_from: String,
    pub wallet_to: String,
    pub total: f64,
    pub timestamp: DateTime<Utc>,
}

impl VolumeAlert {
    pub fn new(tx_hash: impl Into<String>, direction: Direction, wallet: impl Into<String>, total: f64) -> Self {
        let wallet = wallet.into();
        let (wallet_from, wallet_to) = match direction {
            Direction::From => (wallet, String::new()),
            Direction::To => (String::new(), wallet),
        };

        Self {
            tx_hash: tx_hash.into(),
            wallet_from,
            wallet_to,
            total,
            timestamp: Utc::now(),
        }
    }

    pub fn direction(&self) -> Direction {
        if self.wallet_from.is_empty() {
            Direction::To
        } else {
            Direction::From
        }
    }

    pub fn wallet(&self) -> &str {
        match self.direction() {
            Direction::From => &self.wallet_from,
            Direction::To => &self.wallet_to,
        }
    }
}

/// A rendered notification, ready for a delivery channel.
#[derive(Debug, Clone)]
pub struct Alert {
    pub title: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl Alert {
    pub fn new(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn high_volume(alert: &VolumeAlert, label: Option<&str>) -> Self {
        let role = match alert.direction() {
            Direction::From => "Sender",
            Direction::To => "Receiver",
        };
        let wallet = match label {
            Some(label) => format!("{} [{}]", alert.wallet(), label),
            None => alert.wallet().to_string(),
        };

        Self {
            title: "🔔 High Volume Detected".to_string(),
            message: format!(
                "{role}: {wallet}\nAmount: {:.4} ETH\nTxID: {}",
                alert.total, alert.tx_hash
            ),
            timestamp: alert.timestamp,
        }
    }
}
