//! Notification delivery collaborator
//!
//! The alert lifecycle hands each pending notification to a
//! [`NotificationSender`] and persists whatever outcome it reports. Senders
//! are called outside any store transaction.

use async_trait::async_trait;
use shared::NotificationChannel;

/// Delivers one rendered notification to one recipient.
///
/// `Err` carries the failure detail stored on the notification.
#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send(
        &self,
        channel: NotificationChannel,
        recipient: &str,
        subject: &str,
        message: &str,
    ) -> Result<(), String>;
}

/// Writes notifications to the log instead of delivering them.
///
/// Serves the dashboard channel, which is read from the store, and local
/// development where no mail relay is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingSender;

#[async_trait]
impl NotificationSender for LoggingSender {
    async fn send(
        &self,
        channel: NotificationChannel,
        recipient: &str,
        subject: &str,
        message: &str,
    ) -> Result<(), String> {
        tracing::info!(
            channel = channel.as_str(),
            recipient,
            subject,
            message_len = message.len(),
            "notification delivered to log"
        );
        Ok(())
    }
}
