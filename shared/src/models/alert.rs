//! Alert rules and the stock alerts they raise

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::stock::{StockKey, StockLine};
use crate::types::ActorId;

/// Condition a rule watches for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    LowStock,
    OutOfStock,
    Overstock,
    Expiring,
    Custom,
}

impl RuleKind {
    pub const ALL: [RuleKind; 5] = [
        RuleKind::LowStock,
        RuleKind::OutOfStock,
        RuleKind::Overstock,
        RuleKind::Expiring,
        RuleKind::Custom,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RuleKind::LowStock => "low_stock",
            RuleKind::OutOfStock => "out_of_stock",
            RuleKind::Overstock => "overstock",
            RuleKind::Expiring => "expiring",
            RuleKind::Custom => "custom",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "low_stock" => Some(RuleKind::LowStock),
            "out_of_stock" => Some(RuleKind::OutOfStock),
            "overstock" => Some(RuleKind::Overstock),
            "expiring" => Some(RuleKind::Expiring),
            "custom" => Some(RuleKind::Custom),
            _ => None,
        }
    }

    /// Human label, e.g. "Low Stock"
    pub fn title(&self) -> &'static str {
        match self {
            RuleKind::LowStock => "Low Stock",
            RuleKind::OutOfStock => "Out Of Stock",
            RuleKind::Overstock => "Overstock",
            RuleKind::Expiring => "Expiring",
            RuleKind::Custom => "Custom",
        }
    }
}

impl std::fmt::Display for RuleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "low" => Some(Severity::Low),
            "medium" => Some(Severity::Medium),
            "high" => Some(Severity::High),
            "critical" => Some(Severity::Critical),
            _ => None,
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            Severity::Low => "Low",
            Severity::Medium => "Medium",
            Severity::High => "High",
            Severity::Critical => "Critical",
        }
    }
}

impl Default for Severity {
    fn default() -> Self {
        Severity::Medium
    }
}

/// Which stock lines a rule applies to. At most one filter is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum RuleScope {
    Product(Uuid),
    Category(Uuid),
    Warehouse(Uuid),
    All,
}

impl RuleScope {
    /// Higher is more specific
    pub fn specificity(&self) -> u8 {
        match self {
            RuleScope::Product(_) => 3,
            RuleScope::Category(_) => 2,
            RuleScope::Warehouse(_) => 1,
            RuleScope::All => 0,
        }
    }

    pub fn covers(&self, product_id: Uuid, category_id: Option<Uuid>, warehouse_id: Uuid) -> bool {
        match self {
            RuleScope::Product(id) => *id == product_id,
            RuleScope::Category(id) => category_id == Some(*id),
            RuleScope::Warehouse(id) => *id == warehouse_id,
            RuleScope::All => true,
        }
    }

    /// Split into the nullable storage columns (product, category, warehouse)
    pub fn to_columns(&self) -> (Option<Uuid>, Option<Uuid>, Option<Uuid>) {
        match *self {
            RuleScope::Product(id) => (Some(id), None, None),
            RuleScope::Category(id) => (None, Some(id), None),
            RuleScope::Warehouse(id) => (None, None, Some(id)),
            RuleScope::All => (None, None, None),
        }
    }

    /// Product wins over category, category over warehouse
    pub fn from_columns(product: Option<Uuid>, category: Option<Uuid>, warehouse: Option<Uuid>) -> Self {
        match (product, category, warehouse) {
            (Some(id), _, _) => RuleScope::Product(id),
            (None, Some(id), _) => RuleScope::Category(id),
            (None, None, Some(id)) => RuleScope::Warehouse(id),
            (None, None, None) => RuleScope::All,
        }
    }
}

/// A standing condition evaluated against stock lines
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AlertRule {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub kind: RuleKind,
    pub scope: RuleScope,
    pub min_threshold: i64,
    /// 0 disables the upper bound
    pub max_threshold: i64,
    pub severity: Severity,
    pub is_active: bool,
    pub notify_email: bool,
    pub notify_dashboard: bool,
    pub auto_resolve: bool,
    pub created_at: DateTime<Utc>,
}

impl AlertRule {
    pub fn new(name: impl Into<String>, kind: RuleKind, scope: RuleScope) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description: String::new(),
            kind,
            scope,
            min_threshold: 0,
            max_threshold: 0,
            severity: Severity::default(),
            is_active: true,
            notify_email: true,
            notify_dashboard: true,
            auto_resolve: false,
            created_at: Utc::now(),
        }
    }
}

/// A stock line joined with the catalog data rules scope and report on
#[derive(Debug, Clone, PartialEq)]
pub struct AlertCandidate {
    pub line: StockLine,
    pub product_name: String,
    pub category_id: Option<Uuid>,
    pub warehouse_name: String,
}

/// Identity under which at most one unresolved alert may exist
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AlertKey {
    pub product_id: Uuid,
    pub warehouse_id: Uuid,
    pub kind: RuleKind,
}

impl AlertKey {
    pub fn new(stock: StockKey, kind: RuleKind) -> Self {
        Self {
            product_id: stock.product_id,
            warehouse_id: stock.warehouse_id,
            kind,
        }
    }

    pub fn stock_key(&self) -> StockKey {
        StockKey::new(self.product_id, self.warehouse_id)
    }
}

/// A materialised rule violation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StockAlert {
    pub id: Uuid,
    pub product_id: Uuid,
    pub warehouse_id: Uuid,
    pub kind: RuleKind,
    pub severity: Severity,
    pub message: String,
    /// Captured when the alert was raised, never recomputed
    pub threshold_value: i64,
    pub current_value: i64,
    pub is_resolved: bool,
    /// None for system resolutions
    pub resolved_by: Option<ActorId>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolution_notes: String,
    pub created_at: DateTime<Utc>,
}

impl StockAlert {
    pub fn open(
        key: AlertKey,
        severity: Severity,
        message: String,
        threshold_value: i64,
        current_value: i64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            product_id: key.product_id,
            warehouse_id: key.warehouse_id,
            kind: key.kind,
            severity,
            message,
            threshold_value,
            current_value,
            is_resolved: false,
            resolved_by: None,
            resolved_at: None,
            resolution_notes: String::new(),
            created_at: Utc::now(),
        }
    }

    pub fn key(&self) -> AlertKey {
        AlertKey {
            product_id: self.product_id,
            warehouse_id: self.warehouse_id,
            kind: self.kind,
        }
    }

    /// Returns false if already resolved
    pub fn resolve(&mut self, resolver: Option<ActorId>, notes: &str, at: DateTime<Utc>) -> bool {
        if self.is_resolved {
            return false;
        }
        self.is_resolved = true;
        self.resolved_by = resolver;
        self.resolved_at = Some(at);
        self.resolution_notes = notes.to_string();
        true
    }

    /// Returns false if not currently resolved
    pub fn reactivate(&mut self) -> bool {
        if !self.is_resolved {
            return false;
        }
        self.is_resolved = false;
        self.resolved_by = None;
        self.resolved_at = None;
        self.resolution_notes.clear();
        true
    }

    /// Whole hours between creation and resolution
    pub fn duration_hours(&self) -> Option<i64> {
        self.resolved_at
            .map(|resolved| (resolved - self.created_at).num_hours())
    }
}

/// Alert listing criteria; unset fields match everything
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlertFilter {
    pub resolved: Option<bool>,
    pub kind: Option<RuleKind>,
    pub product_id: Option<Uuid>,
    pub warehouse_id: Option<Uuid>,
}

impl AlertFilter {
    pub fn unresolved() -> Self {
        Self {
            resolved: Some(false),
            ..Default::default()
        }
    }

    pub fn matches(&self, alert: &StockAlert) -> bool {
        self.resolved.map_or(true, |r| alert.is_resolved == r)
            && self.kind.map_or(true, |k| alert.kind == k)
            && self.product_id.map_or(true, |p| alert.product_id == p)
            && self.warehouse_id.map_or(true, |w| alert.warehouse_id == w)
    }
}

/// Operator-facing alert text
pub fn alert_message(
    kind: RuleKind,
    candidate: &AlertCandidate,
    threshold_value: i64,
    current_value: i64,
    description: &str,
) -> String {
    let product = &candidate.product_name;
    let warehouse = &candidate.warehouse_name;
    match kind {
        RuleKind::LowStock => format!(
            "Low stock alert: {product} has {current_value} units available at {warehouse} (threshold: {threshold_value})"
        ),
        RuleKind::OutOfStock => {
            format!("Out of stock alert: {product} has 0 units available at {warehouse}")
        }
        RuleKind::Overstock => format!(
            "Overstock alert: {product} has {current_value} units at {warehouse} (threshold: {threshold_value})"
        ),
        RuleKind::Expiring => format!("Expiring stock alert: {product} at {warehouse} - {description}"),
        RuleKind::Custom => format!("Custom alert: {product} at {warehouse} - {description}"),
    }
}
