mod console;
mod telegram;

pub use console::ConsoleNotifier;
pub use telegram::TelegramNotifier;

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;

use crate::config::AppConfig;
use crate::domain::{Alert, VolumeAlert};

/// Delivers an alert that the aggregator already decided to send.
///
/// The result is only reported back; callers never retry.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify_threshold_exceeded(&self, alert: &VolumeAlert) -> Result<()>;
}

pub struct NotifierHub {
    console: ConsoleNotifier,
    telegram: Option<TelegramNotifier>,
    wallet_labels: HashMap<String, String>,
}

impl NotifierHub {
    pub fn new(
        console: ConsoleNotifier,
        telegram: Option<TelegramNotifier>,
        wallet_labels: HashMap<String, String>,
    ) -> Self {
        Self {
            console,
            telegram,
            wallet_labels,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            ConsoleNotifier,
            TelegramNotifier::maybe_from_config(config),
            config.wallet_labels.clone(),
        )
    }

    pub fn telegram_enabled(&self) -> bool {
        self.telegram.is_some()
    }

    fn render(&self, alert: &VolumeAlert) -> Alert {
        let label = self.wallet_labels.get(alert.wallet()).map(String::as_str);
        Alert::high_volume(alert, label)
    }
}

#[async_trait]
impl Notifier for NotifierHub {
    async fn notify_threshold_exceeded(&self, alert: &VolumeAlert) -> Result<()> {
        let rendered = self.render(alert);
        self.console.show(alert, &rendered);

        if let Some(telegram) = &self.telegram {
            telegram.send(&rendered).await?;
        }

        Ok(())
    }
}
