//! Periodic background jobs

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::services::alerts::AlertLifecycle;
use crate::services::evaluator::AlertEvaluator;

/// Run a rule evaluation sweep every `period`.
///
/// A failed sweep is logged and the next tick tries again.
pub fn spawn_evaluation_loop(evaluator: AlertEvaluator, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!(period_secs = period.as_secs(), "alert evaluation loop started");

        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            interval.tick().await;
            if let Err(e) = evaluator.evaluate().await {
                tracing::error!(error = %e, code = e.code(), "alert evaluation failed");
            }
        }
    })
}

/// Hand pending notifications to the sender every `period`, at most `batch`
/// per run.
pub fn spawn_dispatch_loop(lifecycle: AlertLifecycle, period: Duration, batch: i64) -> JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!(period_secs = period.as_secs(), batch, "notification dispatch loop started");

        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            interval.tick().await;
            if let Err(e) = lifecycle.dispatch_pending(batch).await {
                tracing::error!(error = %e, code = e.code(), "notification dispatch failed");
            }
        }
    })
}
