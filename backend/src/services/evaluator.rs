//! Alert rule evaluation
//!
//! A sweep walks the active rules one at a time. For each rule it loads the
//! stock lines in the rule's scope and asks the predicate registered for the
//! rule's kind whether the line violates it. Violations become alerts through
//! the store's dedup-guarded insert, so two sweeps over unchanged stock raise
//! each alert exactly once.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::Serialize;
use shared::{
    alert_message, validate_rule_name, validate_rule_thresholds, AlertKey, AlertRule, RuleKind,
    RuleScope, StockAlert, StockLine,
};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::services::alerts::AlertLifecycle;
use crate::store::Store;

/// Values captured on an alert when its rule is violated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Violation {
    pub threshold_value: i64,
    pub current_value: i64,
}

/// Kind-specific rule condition
pub trait RulePredicate: Send + Sync {
    /// `Some` when `line` violates `rule`
    fn check(&self, rule: &AlertRule, line: &StockLine) -> Option<Violation>;
}

/// Available quantity at or below the rule's minimum
#[derive(Debug, Clone, Copy, Default)]
pub struct LowStock;

impl RulePredicate for LowStock {
    fn check(&self, rule: &AlertRule, line: &StockLine) -> Option<Violation> {
        let available = line.available_quantity();
        (available <= rule.min_threshold).then_some(Violation {
            threshold_value: rule.min_threshold,
            current_value: available,
        })
    }
}

/// Nothing available
#[derive(Debug, Clone, Copy, Default)]
pub struct OutOfStock;

impl RulePredicate for OutOfStock {
    fn check(&self, _rule: &AlertRule, line: &StockLine) -> Option<Violation> {
        let available = line.available_quantity();
        (available == 0).then_some(Violation {
            threshold_value: 0,
            current_value: available,
        })
    }
}

/// On-hand quantity at or above the rule's maximum. A zero maximum disables
/// the check.
#[derive(Debug, Clone, Copy, Default)]
pub struct Overstock;

impl RulePredicate for Overstock {
    fn check(&self, rule: &AlertRule, line: &StockLine) -> Option<Violation> {
        if rule.max_threshold <= 0 {
            return None;
        }
        (line.quantity >= rule.max_threshold).then_some(Violation {
            threshold_value: rule.max_threshold,
            current_value: line.quantity,
        })
    }
}

/// Predicates keyed by rule kind. Kinds without a predicate never fire.
#[derive(Clone, Default)]
pub struct PredicateRegistry {
    predicates: HashMap<RuleKind, Arc<dyn RulePredicate>>,
}

impl PredicateRegistry {
    /// `custom` starts out sharing the low-stock condition; `expiring` has
    /// none until one is registered.
    pub fn with_defaults() -> Self {
        let mut registry = Self::default();
        registry.register(RuleKind::LowStock, Arc::new(LowStock));
        registry.register(RuleKind::OutOfStock, Arc::new(OutOfStock));
        registry.register(RuleKind::Overstock, Arc::new(Overstock));
        registry.register(RuleKind::Custom, Arc::new(LowStock));
        registry
    }

    /// Replaces any predicate already registered for `kind`
    pub fn register(&mut self, kind: RuleKind, predicate: Arc<dyn RulePredicate>) {
        self.predicates.insert(kind, predicate);
    }

    pub fn get(&self, kind: RuleKind) -> Option<&Arc<dyn RulePredicate>> {
        self.predicates.get(&kind)
    }
}

/// Counters for one sweep
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EvaluationReport {
    pub rules_evaluated: usize,
    /// (rule, line) pairs checked
    pub lines_checked: usize,
    pub alerts_created: usize,
    pub alerts_resolved: usize,
    pub notifications_queued: usize,
    /// Store errors logged and skipped without stopping the sweep
    pub failures: usize,
}

/// Alert rule evaluator service
#[derive(Clone)]
pub struct AlertEvaluator {
    store: Arc<dyn Store>,
    lifecycle: AlertLifecycle,
    registry: PredicateRegistry,
}

impl AlertEvaluator {
    pub fn new(store: Arc<dyn Store>, lifecycle: AlertLifecycle) -> Self {
        Self::with_registry(store, lifecycle, PredicateRegistry::with_defaults())
    }

    pub fn with_registry(
        store: Arc<dyn Store>,
        lifecycle: AlertLifecycle,
        registry: PredicateRegistry,
    ) -> Self {
        Self {
            store,
            lifecycle,
            registry,
        }
    }

    // ------------------------------------------------------------------
    // Rules
    // ------------------------------------------------------------------

    pub async fn create_rule(&self, rule: AlertRule) -> AppResult<AlertRule> {
        validate_rule_name(&rule.name).map_err(AppError::validation)?;
        validate_rule_thresholds(rule.min_threshold, rule.max_threshold)
            .map_err(AppError::validation)?;

        match rule.scope {
            RuleScope::Product(id) => {
                self.store
                    .get_product(id)
                    .await?
                    .ok_or_else(|| AppError::not_found("product", id))?;
            }
            RuleScope::Warehouse(id) => {
                self.store
                    .get_warehouse(id)
                    .await?
                    .ok_or_else(|| AppError::not_found("warehouse", id))?;
            }
            RuleScope::Category(_) | RuleScope::All => {}
        }

        self.store.insert_rule(&rule).await?;

        tracing::info!(
            rule_id = %rule.id,
            kind = rule.kind.as_str(),
            severity = rule.severity.as_str(),
            "alert rule created"
        );
        Ok(rule)
    }

    pub async fn set_rule_active(&self, rule_id: Uuid, active: bool) -> AppResult<AlertRule> {
        let rule = self.store.set_rule_active(rule_id, active).await?;
        tracing::info!(rule_id = %rule.id, active, "alert rule toggled");
        Ok(rule)
    }

    pub async fn get_rule(&self, rule_id: Uuid) -> AppResult<AlertRule> {
        self.store
            .get_rule(rule_id)
            .await?
            .ok_or_else(|| AppError::not_found("alert rule", rule_id))
    }

    // ------------------------------------------------------------------
    // Sweep
    // ------------------------------------------------------------------

    /// Evaluate every active rule against the current stock lines.
    ///
    /// Each alert is created in its own unit of work. A store error on one
    /// rule or line is logged and counted, and the sweep moves on; the next
    /// sweep picks the pair up again. Unresolved alerts are closed afterwards
    /// when an auto-resolving rule of their kind no longer holds and no other
    /// active rule of that kind still does.
    pub async fn evaluate(&self) -> AppResult<EvaluationReport> {
        let rules = self.store.active_rules().await?;
        let mut report = EvaluationReport::default();
        let mut holding: HashSet<AlertKey> = HashSet::new();
        let mut cleared: HashSet<AlertKey> = HashSet::new();

        for rule in &rules {
            let Some(predicate) = self.registry.get(rule.kind) else {
                tracing::debug!(
                    rule_id = %rule.id,
                    kind = rule.kind.as_str(),
                    "no predicate for rule kind, skipping"
                );
                continue;
            };

            let candidates = match self.store.candidate_lines(rule.scope).await {
                Ok(candidates) => candidates,
                Err(e) => {
                    tracing::error!(
                        rule_id = %rule.id,
                        error = %e,
                        code = e.code(),
                        "failed to load stock lines for rule"
                    );
                    report.failures += 1;
                    continue;
                }
            };
            report.rules_evaluated += 1;

            for candidate in candidates {
                report.lines_checked += 1;
                let key = AlertKey::new(candidate.line.key(), rule.kind);

                let Some(violation) = predicate.check(rule, &candidate.line) else {
                    if rule.auto_resolve {
                        cleared.insert(key);
                    }
                    continue;
                };
                holding.insert(key);

                let message = alert_message(
                    rule.kind,
                    &candidate,
                    violation.threshold_value,
                    violation.current_value,
                    &rule.description,
                );
                let alert = StockAlert::open(
                    key,
                    rule.severity,
                    message,
                    violation.threshold_value,
                    violation.current_value,
                );

                match self.lifecycle.raise(&alert).await {
                    Ok(Some(raised)) => {
                        report.alerts_created += 1;
                        report.notifications_queued += raised.notifications_queued;
                        tracing::info!(
                            alert_id = %raised.alert.id,
                            rule_id = %rule.id,
                            product_id = %raised.alert.product_id,
                            warehouse_id = %raised.alert.warehouse_id,
                            kind = raised.alert.kind.as_str(),
                            current_value = raised.alert.current_value,
                            "alert raised"
                        );
                    }
                    Ok(None) => {}
                    Err(e) => {
                        tracing::error!(
                            rule_id = %rule.id,
                            product_id = %key.product_id,
                            warehouse_id = %key.warehouse_id,
                            error = %e,
                            code = e.code(),
                            "failed to raise alert"
                        );
                        report.failures += 1;
                    }
                }
            }
        }

        for key in cleared.difference(&holding) {
            match self.resolve_cleared(*key).await {
                Ok(true) => report.alerts_resolved += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::error!(
                        product_id = %key.product_id,
                        warehouse_id = %key.warehouse_id,
                        kind = key.kind.as_str(),
                        error = %e,
                        code = e.code(),
                        "failed to auto-resolve alert"
                    );
                    report.failures += 1;
                }
            }
        }

        if report.failures > 0 {
            tracing::warn!(failures = report.failures, "alert evaluation finished with failures");
        }
        tracing::info!(
            rules = report.rules_evaluated,
            checked = report.lines_checked,
            created = report.alerts_created,
            resolved = report.alerts_resolved,
            "alert evaluation finished"
        );
        Ok(report)
    }

    async fn resolve_cleared(&self, key: AlertKey) -> AppResult<bool> {
        match self.store.find_unresolved(key).await? {
            Some(alert) => self.lifecycle.resolve_automatically(alert.id).await,
            None => Ok(false),
        }
    }
}
