use crate::domain::{Alert, VolumeAlert};
use tracing::info;

/// Prints alerts to stdout and mirrors them as structured log events.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleNotifier;

impl ConsoleNotifier {
    pub fn show(&self, alert: &VolumeAlert, rendered: &Alert) {
        println!("{}", banner(rendered));
        info!(
            tx = %alert.tx_hash,
            direction = %alert.direction(),
            wallet = alert.wallet(),
            total_eth = alert.total,
            "volume alert printed"
        );
    }
}

fn banner(rendered: &Alert) -> String {
    let rule = "─".repeat(48);
    format!(
        "{rule}\n{} · {}\n{}\n{rule}",
        rendered.title,
        rendered.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
        rendered.message
    )
}
