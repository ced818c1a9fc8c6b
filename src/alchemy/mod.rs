//! Alchemy `alchemy_minedTransactions` websocket subscription.

mod client;
mod types;

pub use client::{
    mask_endpoint, AlchemyClient, MinedTxSource, Subscription, ALCHEMY_WS_URL, EVENT_CHANNEL_CAPACITY,
};
pub use types::{AddressFilter, MinedTransaction, MinedTxEvent, MinedTxOptions};
