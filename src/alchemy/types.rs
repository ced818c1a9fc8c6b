use serde::{Deserialize, Serialize};

use crate::domain::Direction;

pub const SUBSCRIBE_METHOD: &str = "eth_subscribe";
pub const SUBSCRIPTION_METHOD: &str = "eth_subscription";
pub const MINED_TRANSACTIONS: &str = "alchemy_minedTransactions";

/// Parameters of an `alchemy_minedTransactions` subscription.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MinedTxOptions {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub addresses: Vec<AddressFilter>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub include_removed: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub hashes_only: bool,
}

/// One `{from, to}` pair; either side may be left open.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct AddressFilter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
}

impl AddressFilter {
    pub fn sender(wallet: impl Into<String>) -> Self {
        Self {
            from: Some(wallet.into()),
            to: None,
        }
    }

    pub fn receiver(wallet: impl Into<String>) -> Self {
        Self {
            from: None,
            to: Some(wallet.into()),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SubscriptionRequest<'a> {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: &'static str,
    pub params: (&'static str, &'a MinedTxOptions),
}

impl<'a> SubscriptionRequest<'a> {
    pub fn mined_transactions(id: u64, options: &'a MinedTxOptions) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method: SUBSCRIBE_METHOD,
            params: (MINED_TRANSACTIONS, options),
        }
    }
}

/// Any inbound JSON-RPC frame: a subscription push, an ack, or an error.
#[derive(Debug, Deserialize)]
pub struct RpcFrame {
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub params: Option<SubscriptionBody>,
    #[serde(default)]
    pub id: Option<serde_json::Value>,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct SubscriptionBody {
    pub subscription: String,
    pub result: MinedTxEvent,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct MinedTxEvent {
    #[serde(default)]
    pub removed: bool,
    pub transaction: MinedTransaction,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MinedTransaction {
    pub block_hash: String,
    pub block_number: String,
    pub hash: String,
    pub from: String,
    /// `None` for contract creations.
    pub to: Option<String>,
    pub value: String,
    pub gas: String,
    pub gas_price: String,
    pub nonce: String,
    pub transaction_index: String,
}

impl MinedTransaction {
    /// Lowercase wallet on the given side, if the transaction has one.
    pub fn wallet(&self, direction: Direction) -> Option<String> {
        match direction {
            Direction::From => Some(self.from.to_lowercase()),
            Direction::To => self.to.as_deref().map(str::to_lowercase),
        }
    }
}
