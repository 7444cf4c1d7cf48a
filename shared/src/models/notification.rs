//! Notification attempts raised for stock alerts

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::alert::StockAlert;
use super::catalog::{Product, Warehouse};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationChannel {
    Email,
    Dashboard,
}

impl NotificationChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationChannel::Email => "email",
            NotificationChannel::Dashboard => "dashboard",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "email" => Some(NotificationChannel::Email),
            "dashboard" => Some(NotificationChannel::Dashboard),
            _ => None,
        }
    }
}

impl std::fmt::Display for NotificationChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Delivery status: `pending` then `sent`, `failed` or `cancelled`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Sent,
    Failed,
    Cancelled,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::Sent => "sent",
            DeliveryStatus::Failed => "failed",
            DeliveryStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(DeliveryStatus::Pending),
            "sent" => Some(DeliveryStatus::Sent),
            "failed" => Some(DeliveryStatus::Failed),
            "cancelled" => Some(DeliveryStatus::Cancelled),
            _ => None,
        }
    }

    pub fn can_transition_to(&self, next: DeliveryStatus) -> bool {
        use DeliveryStatus::*;
        matches!(
            (self, next),
            (Pending, Sent) | (Pending, Failed) | (Pending, Cancelled) | (Failed, Pending)
        )
    }
}

impl std::fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("notification cannot move from {from} to {to}")]
pub struct DeliveryTransitionError {
    pub from: DeliveryStatus,
    pub to: DeliveryStatus,
}

/// One delivery attempt of an alert over one channel to one recipient
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AlertNotification {
    pub id: Uuid,
    pub alert_id: Uuid,
    pub channel: NotificationChannel,
    pub status: DeliveryStatus,
    pub recipient: String,
    pub subject: String,
    pub message: String,
    pub sent_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AlertNotification {
    pub fn pending(
        alert_id: Uuid,
        channel: NotificationChannel,
        recipient: String,
        subject: String,
        message: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            alert_id,
            channel,
            status: DeliveryStatus::Pending,
            recipient,
            subject,
            message,
            sent_at: None,
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn move_to(&mut self, next: DeliveryStatus) -> Result<(), DeliveryTransitionError> {
        if !self.status.can_transition_to(next) {
            return Err(DeliveryTransitionError {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn mark_sent(&mut self, at: DateTime<Utc>) -> Result<(), DeliveryTransitionError> {
        self.move_to(DeliveryStatus::Sent)?;
        self.sent_at = Some(at);
        self.error_message = None;
        Ok(())
    }

    pub fn mark_failed(&mut self, error: &str) -> Result<(), DeliveryTransitionError> {
        self.move_to(DeliveryStatus::Failed)?;
        self.error_message = Some(error.to_string());
        Ok(())
    }

    /// `failed -> pending`; the previous error is kept until the next outcome
    pub fn retry(&mut self) -> Result<(), DeliveryTransitionError> {
        self.move_to(DeliveryStatus::Pending)
    }

    pub fn cancel(&mut self) -> Result<(), DeliveryTransitionError> {
        self.move_to(DeliveryStatus::Cancelled)
    }
}

/// Rendered subject and body of an alert email
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailMessage {
    pub subject: String,
    pub body: String,
}

pub fn render_alert_email(alert: &StockAlert, product: &Product, warehouse: &Warehouse) -> EmailMessage {
    let kind = alert.kind.title();
    let subject = format!("Stock Alert: {kind}");
    let body = format!(
        "Stock Alert Notification\n\
         \n\
         Alert Type: {kind}\n\
         Severity: {severity}\n\
         \n\
         Product: {product} ({sku})\n\
         Warehouse: {warehouse}\n\
         Current Stock: {current}\n\
         Threshold: {threshold}\n\
         \n\
         Message: {message}\n\
         \n\
         This alert was triggered on {created}.\n\
         \n\
         Please take appropriate action to resolve this stock issue.",
        severity = alert.severity.title(),
        product = product.name,
        sku = product.sku,
        warehouse = warehouse.name,
        current = alert.current_value,
        threshold = alert.threshold_value,
        message = alert.message,
        created = alert.created_at.format("%Y-%m-%d %H:%M:%S"),
    );
    EmailMessage { subject, body }
}
