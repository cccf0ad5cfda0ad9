use tracing::info;

use crate::error::DeliveryError;

pub mod message;
pub mod telegram;

/// Delivers a fully formatted message to one fixed destination.
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, message: &str) -> Result<(), DeliveryError>;

    /// Check credentials before the loop starts. Defaults to accepting.
    async fn verify(&self) -> Result<(), DeliveryError> {
        Ok(())
    }
}

/// Writes messages to the log instead of sending them (`--dry-run`).
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait::async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, message: &str) -> Result<(), DeliveryError> {
        if message.trim().is_empty() {
            return Err(DeliveryError::EmptyMessage);
        }
        info!(target: "jobsniper::dry_run", "would send:\n{}", message);
        Ok(())
    }
}
