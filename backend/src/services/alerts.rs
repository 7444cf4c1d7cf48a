//! Alert lifecycle and notification dispatch

use std::cmp::Reverse;
use std::sync::Arc;

use chrono::Utc;
use shared::{
    render_alert_email, ActorId, AlertFilter, AlertNotification, AlertRule, NotificationChannel,
    StockAlert,
};
use uuid::Uuid;

use crate::config::AlertsConfig;
use crate::error::{AppError, AppResult};
use crate::services::delivery::NotificationSender;
use crate::store::{NotificationOp, Store};

/// Resolution note written when the evaluator closes an alert
pub const AUTO_RESOLUTION_NOTE: &str = "Automatically resolved: condition no longer holds";

/// Alert lifecycle service
#[derive(Clone)]
pub struct AlertLifecycle {
    store: Arc<dyn Store>,
    recipients: AlertsConfig,
    sender: Arc<dyn NotificationSender>,
}

/// An alert stored by [`AlertLifecycle::raise`]
#[derive(Debug, Clone)]
pub struct RaisedAlert {
    pub alert: StockAlert,
    pub notifications_queued: usize,
}

/// Outcome of one dispatch run
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchReport {
    pub sent: usize,
    pub failed: usize,
    /// Picked up but changed by someone else before the outcome was stored
    pub skipped: usize,
}

impl AlertLifecycle {
    pub fn new(
        store: Arc<dyn Store>,
        recipients: AlertsConfig,
        sender: Arc<dyn NotificationSender>,
    ) -> Self {
        Self {
            store,
            recipients,
            sender,
        }
    }

    pub async fn get_alert(&self, alert_id: Uuid) -> AppResult<StockAlert> {
        self.store
            .get_alert(alert_id)
            .await?
            .ok_or_else(|| AppError::not_found("alert", alert_id))
    }

    /// Newest first
    pub async fn list_alerts(&self, filter: &AlertFilter) -> AppResult<Vec<StockAlert>> {
        self.store.list_alerts(filter).await
    }

    /// Resolve an alert. Returns false if it was already resolved.
    pub async fn resolve(
        &self,
        alert_id: Uuid,
        resolver: ActorId,
        notes: Option<String>,
    ) -> AppResult<bool> {
        let notes = notes.unwrap_or_default();
        let (alert, changed) = self
            .store
            .mutate_alert(
                alert_id,
                Box::new(move |alert: &mut StockAlert| {
                    alert.resolve(Some(resolver), &notes, Utc::now())
                }),
            )
            .await?;

        if changed {
            tracing::info!(
                alert_id = %alert.id,
                product_id = %alert.product_id,
                warehouse_id = %alert.warehouse_id,
                kind = alert.kind.as_str(),
                resolved_by = %resolver,
                "alert resolved"
            );
        }
        Ok(changed)
    }

    /// System resolution used by auto-resolving rules
    pub async fn resolve_automatically(&self, alert_id: Uuid) -> AppResult<bool> {
        let (alert, changed) = self
            .store
            .mutate_alert(
                alert_id,
                Box::new(|alert: &mut StockAlert| {
                    alert.resolve(None, AUTO_RESOLUTION_NOTE, Utc::now())
                }),
            )
            .await?;

        if changed {
            tracing::info!(
                alert_id = %alert.id,
                product_id = %alert.product_id,
                warehouse_id = %alert.warehouse_id,
                kind = alert.kind.as_str(),
                "alert auto-resolved"
            );
        }
        Ok(changed)
    }

    /// Reopen a resolved alert. Returns false if it was not resolved.
    ///
    /// Fails with `ConcurrencyConflict` when another unresolved alert already
    /// exists for the same product, warehouse and kind.
    pub async fn reactivate(&self, alert_id: Uuid) -> AppResult<bool> {
        let (alert, changed) = self
            .store
            .mutate_alert(
                alert_id,
                Box::new(|alert: &mut StockAlert| alert.reactivate()),
            )
            .await?;

        if changed {
            tracing::info!(
                alert_id = %alert.id,
                kind = alert.kind.as_str(),
                "alert reactivated"
            );
        }
        Ok(changed)
    }

    /// Hours from creation to resolution, `None` while unresolved
    pub async fn duration(&self, alert_id: Uuid) -> AppResult<Option<i64>> {
        Ok(self.get_alert(alert_id).await?.duration_hours())
    }

    /// Most specific active rule of the alert's kind covering its stock line
    pub async fn applicable_rule(&self, alert: &StockAlert) -> AppResult<Option<AlertRule>> {
        let category_id = self
            .store
            .get_product(alert.product_id)
            .await?
            .map(|p| p.category_id);

        let rule = self
            .store
            .active_rules()
            .await?
            .into_iter()
            .filter(|rule| rule.kind == alert.kind)
            .filter(|rule| {
                rule.scope
                    .covers(alert.product_id, category_id, alert.warehouse_id)
            })
            // Oldest rule wins a tie
            .min_by_key(|rule| (Reverse(rule.scope.specificity()), rule.created_at));

        Ok(rule)
    }

    /// Raise `alert` unless an unresolved alert is already open for its key.
    ///
    /// The notifications for the alert are stored in the same write, so an
    /// alert never exists without the notifications its rule asks for.
    pub async fn raise(&self, alert: &StockAlert) -> AppResult<Option<RaisedAlert>> {
        if self.store.find_unresolved(alert.key()).await?.is_some() {
            return Ok(None);
        }

        let notifications = self.plan_notifications(alert).await?;
        let Some(created) = self
            .store
            .create_alert_if_absent(alert, &notifications)
            .await?
        else {
            return Ok(None);
        };

        if !notifications.is_empty() {
            tracing::info!(
                alert_id = %created.id,
                count = notifications.len(),
                "notifications queued"
            );
        }
        Ok(Some(RaisedAlert {
            alert: created,
            notifications_queued: notifications.len(),
        }))
    }

    /// Pending notifications for a new alert.
    ///
    /// One per configured email recipient when the applicable rule wants
    /// email, plus one dashboard notification when it wants the dashboard.
    pub async fn plan_notifications(&self, alert: &StockAlert) -> AppResult<Vec<AlertNotification>> {
        let Some(rule) = self.applicable_rule(alert).await? else {
            tracing::debug!(alert_id = %alert.id, "no applicable rule, nothing to notify");
            return Ok(Vec::new());
        };
        if !rule.notify_email && !rule.notify_dashboard {
            return Ok(Vec::new());
        }

        let product = self
            .store
            .get_product(alert.product_id)
            .await?
            .ok_or_else(|| AppError::not_found("product", alert.product_id))?;
        let warehouse = self
            .store
            .get_warehouse(alert.warehouse_id)
            .await?
            .ok_or_else(|| AppError::not_found("warehouse", alert.warehouse_id))?;

        let email = render_alert_email(alert, &product, &warehouse);
        let mut planned = Vec::new();

        if rule.notify_email {
            for recipient in &self.recipients.email_recipients {
                planned.push(AlertNotification::pending(
                    alert.id,
                    NotificationChannel::Email,
                    recipient.clone(),
                    email.subject.clone(),
                    email.body.clone(),
                ));
            }
        }
        if rule.notify_dashboard {
            planned.push(AlertNotification::pending(
                alert.id,
                NotificationChannel::Dashboard,
                self.recipients.dashboard_recipient.clone(),
                email.subject.clone(),
                alert.message.clone(),
            ));
        }
        Ok(planned)
    }

    pub async fn notifications_for_alert(&self, alert_id: Uuid) -> AppResult<Vec<AlertNotification>> {
        self.store.notifications_for_alert(alert_id).await
    }

    pub async fn mark_sent(&self, notification_id: Uuid) -> AppResult<AlertNotification> {
        self.mutate_notification(
            notification_id,
            Box::new(move |n: &mut AlertNotification| {
                n.mark_sent(Utc::now())
                    .map_err(|e| AppError::delivery_transition(notification_id, e))
            }),
        )
        .await
    }

    pub async fn mark_failed(
        &self,
        notification_id: Uuid,
        error: impl Into<String>,
    ) -> AppResult<AlertNotification> {
        let error = error.into();
        self.mutate_notification(
            notification_id,
            Box::new(move |n: &mut AlertNotification| {
                n.mark_failed(&error)
                    .map_err(|e| AppError::delivery_transition(notification_id, e))
            }),
        )
        .await
    }

    /// `failed -> pending`
    pub async fn retry(&self, notification_id: Uuid) -> AppResult<AlertNotification> {
        self.mutate_notification(
            notification_id,
            Box::new(move |n: &mut AlertNotification| {
                n.retry()
                    .map_err(|e| AppError::delivery_transition(notification_id, e))
            }),
        )
        .await
    }

    /// `pending -> cancelled`
    pub async fn cancel(&self, notification_id: Uuid) -> AppResult<AlertNotification> {
        self.mutate_notification(
            notification_id,
            Box::new(move |n: &mut AlertNotification| {
                n.cancel()
                    .map_err(|e| AppError::delivery_transition(notification_id, e))
            }),
        )
        .await
    }

    async fn mutate_notification(
        &self,
        notification_id: Uuid,
        op: NotificationOp,
    ) -> AppResult<AlertNotification> {
        let notification = self.store.mutate_notification(notification_id, op).await?;
        tracing::debug!(
            notification_id = %notification.id,
            status = notification.status.as_str(),
            "notification status changed"
        );
        Ok(notification)
    }

    /// Hand up to `batch` pending notifications to the sender and store each
    /// outcome.
    pub async fn dispatch_pending(&self, batch: i64) -> AppResult<DispatchReport> {
        let pending = self.store.pending_notifications(batch).await?;
        let mut report = DispatchReport::default();

        for notification in pending {
            let outcome = self
                .sender
                .send(
                    notification.channel,
                    &notification.recipient,
                    &notification.subject,
                    &notification.message,
                )
                .await;

            let stored = match outcome {
                Ok(()) => self.mark_sent(notification.id).await.map(|_| true),
                Err(detail) => {
                    tracing::error!(
                        notification_id = %notification.id,
                        alert_id = %notification.alert_id,
                        channel = notification.channel.as_str(),
                        recipient = %notification.recipient,
                        error = %detail,
                        "notification delivery failed"
                    );
                    self.mark_failed(notification.id, detail).await.map(|_| false)
                }
            };

            match stored {
                Ok(true) => report.sent += 1,
                Ok(false) => report.failed += 1,
                // Cancelled while the sender was running
                Err(AppError::InvalidTransition { .. }) => {
                    tracing::warn!(
                        notification_id = %notification.id,
                        "notification changed during delivery, outcome not stored"
                    );
                    report.skipped += 1;
                }
                Err(e) => return Err(e),
            }
        }

        if report.sent + report.failed + report.skipped > 0 {
            tracing::info!(
                sent = report.sent,
                failed = report.failed,
                skipped = report.skipped,
                "notification dispatch finished"
            );
        }
        Ok(report)
    }
}
