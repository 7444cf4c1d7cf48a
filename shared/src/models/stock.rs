//! Stock lines, movements and the quantity rules that govern them

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::types::Reference;

/// Identity of a stock line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StockKey {
    pub product_id: Uuid,
    pub warehouse_id: Uuid,
}

impl StockKey {
    pub fn new(product_id: Uuid, warehouse_id: Uuid) -> Self {
        Self {
            product_id,
            warehouse_id,
        }
    }
}

impl std::fmt::Display for StockKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "product {} at warehouse {}", self.product_id, self.warehouse_id)
    }
}

/// Kind of a ledger movement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementKind {
    In,
    Out,
    Adjustment,
    TransferIn,
    TransferOut,
}

impl MovementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementKind::In => "in",
            MovementKind::Out => "out",
            MovementKind::Adjustment => "adjustment",
            MovementKind::TransferIn => "transfer_in",
            MovementKind::TransferOut => "transfer_out",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "in" => Some(MovementKind::In),
            "out" => Some(MovementKind::Out),
            "adjustment" => Some(MovementKind::Adjustment),
            "transfer_in" => Some(MovementKind::TransferIn),
            "transfer_out" => Some(MovementKind::TransferOut),
            _ => None,
        }
    }

    /// Transfer legs are only produced by a transfer, never requested directly
    pub fn is_transfer_leg(&self) -> bool {
        matches!(self, MovementKind::TransferIn | MovementKind::TransferOut)
    }
}

/// Violation of a stock quantity rule
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StockRuleError {
    #[error("amount must be positive, got {amount}")]
    NonPositive { amount: i64 },

    #[error("adjustment target must not be negative, got {amount}")]
    NegativeTarget { amount: i64 },

    #[error("quantity overflow adding {amount} to {quantity}")]
    Overflow { quantity: i64, amount: i64 },

    #[error("available quantity {available}, requested {requested}")]
    InsufficientStock { available: i64, requested: i64 },

    #[error("available quantity {available}, requested reservation {requested}")]
    InsufficientAvailable { available: i64, requested: i64 },

    #[error("reserved quantity {reserved}, requested release {requested}")]
    OverRelease { reserved: i64, requested: i64 },

    #[error("adjustment to {requested} would fall below reserved quantity {reserved}")]
    BelowReserved { reserved: i64, requested: i64 },
}

/// Authoritative quantity state for one (product, warehouse) pair
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StockLine {
    pub id: Uuid,
    pub product_id: Uuid,
    pub warehouse_id: Uuid,
    /// Total physically present
    pub quantity: i64,
    pub reserved_quantity: i64,
    pub reorder_point: i64,
    /// 0 means unlimited
    pub max_stock_level: i64,
    pub is_active: bool,
    pub last_updated: DateTime<Utc>,
}

impl StockLine {
    /// An empty line, as created on the first movement into a pair
    pub fn empty(key: StockKey, reorder_point: i64, max_stock_level: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            product_id: key.product_id,
            warehouse_id: key.warehouse_id,
            quantity: 0,
            reserved_quantity: 0,
            reorder_point,
            max_stock_level,
            is_active: true,
            last_updated: Utc::now(),
        }
    }

    pub fn key(&self) -> StockKey {
        StockKey::new(self.product_id, self.warehouse_id)
    }

    pub fn available_quantity(&self) -> i64 {
        (self.quantity - self.reserved_quantity).max(0)
    }

    pub fn is_low_stock(&self) -> bool {
        self.available_quantity() <= self.reorder_point
    }

    pub fn is_out_of_stock(&self) -> bool {
        self.available_quantity() == 0
    }

    pub fn stock_value(&self, unit_price: Decimal) -> Decimal {
        Decimal::from(self.quantity) * unit_price
    }

    /// Apply a quantity movement in place.
    ///
    /// Returns the quantity to record on the movement (always positive), or
    /// `None` when an adjustment leaves the quantity where it was. On error
    /// the line is untouched.
    pub fn apply_movement(
        &mut self,
        kind: MovementKind,
        amount: i64,
    ) -> Result<Option<i64>, StockRuleError> {
        let new_quantity = match kind {
            MovementKind::In | MovementKind::TransferIn => {
                if amount <= 0 {
                    return Err(StockRuleError::NonPositive { amount });
                }
                self.quantity
                    .checked_add(amount)
                    .ok_or(StockRuleError::Overflow {
                        quantity: self.quantity,
                        amount,
                    })?
            }
            MovementKind::Out | MovementKind::TransferOut => {
                if amount <= 0 {
                    return Err(StockRuleError::NonPositive { amount });
                }
                let available = self.available_quantity();
                if amount > available {
                    return Err(StockRuleError::InsufficientStock {
                        available,
                        requested: amount,
                    });
                }
                self.quantity - amount
            }
            MovementKind::Adjustment => {
                if amount < 0 {
                    return Err(StockRuleError::NegativeTarget { amount });
                }
                if amount < self.reserved_quantity {
                    return Err(StockRuleError::BelowReserved {
                        reserved: self.reserved_quantity,
                        requested: amount,
                    });
                }
                amount
            }
        };

        let delta = (new_quantity - self.quantity).abs();
        self.quantity = new_quantity;
        self.last_updated = Utc::now();

        Ok(if delta == 0 { None } else { Some(delta) })
    }

    pub fn reserve(&mut self, amount: i64) -> Result<(), StockRuleError> {
        if amount <= 0 {
            return Err(StockRuleError::NonPositive { amount });
        }
        let available = self.available_quantity();
        if amount > available {
            return Err(StockRuleError::InsufficientAvailable {
                available,
                requested: amount,
            });
        }
        self.reserved_quantity += amount;
        self.last_updated = Utc::now();
        Ok(())
    }

    pub fn release(&mut self, amount: i64) -> Result<(), StockRuleError> {
        if amount <= 0 {
            return Err(StockRuleError::NonPositive { amount });
        }
        if amount > self.reserved_quantity {
            return Err(StockRuleError::OverRelease {
                reserved: self.reserved_quantity,
                requested: amount,
            });
        }
        self.reserved_quantity -= amount;
        self.last_updated = Utc::now();
        Ok(())
    }

    /// `0 <= reserved_quantity <= quantity`
    pub fn is_consistent(&self) -> bool {
        self.quantity >= 0 && self.reserved_quantity >= 0 && self.reserved_quantity <= self.quantity
    }
}

/// Movement about to be appended; the store assigns id and timestamp
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewMovement {
    pub kind: MovementKind,
    pub quantity: i64,
    pub reference: Option<Reference>,
    pub note: String,
}

impl NewMovement {
    pub fn into_movement(self, key: StockKey) -> StockMovement {
        StockMovement {
            id: Uuid::new_v4(),
            product_id: key.product_id,
            warehouse_id: key.warehouse_id,
            kind: self.kind,
            quantity: self.quantity,
            reference: self.reference,
            note: self.note,
            created_at: Utc::now(),
        }
    }
}

/// Immutable, append-only record of one quantity change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockMovement {
    pub id: Uuid,
    pub product_id: Uuid,
    pub warehouse_id: Uuid,
    pub kind: MovementKind,
    pub quantity: i64,
    pub reference: Option<Reference>,
    pub note: String,
    pub created_at: DateTime<Utc>,
}

/// Per-warehouse row of a product's stock levels
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WarehouseStock {
    pub warehouse_id: Uuid,
    pub quantity: i64,
    pub reserved: i64,
    pub available: i64,
    pub is_low_stock: bool,
    pub is_out_of_stock: bool,
}

/// Stock levels of one product across warehouses
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StockLevels {
    pub product_id: Uuid,
    pub total_quantity: i64,
    pub total_reserved: i64,
    pub total_available: i64,
    pub low_stock_warehouses: Vec<Uuid>,
    pub out_of_stock_warehouses: Vec<Uuid>,
    pub breakdown: Vec<WarehouseStock>,
}

impl StockLevels {
    pub fn from_lines(product_id: Uuid, lines: &[StockLine]) -> Self {
        let breakdown: Vec<WarehouseStock> = lines
            .iter()
            .filter(|l| l.product_id == product_id && l.is_active)
            .map(|l| WarehouseStock {
                warehouse_id: l.warehouse_id,
                quantity: l.quantity,
                reserved: l.reserved_quantity,
                available: l.available_quantity(),
                is_low_stock: l.is_low_stock(),
                is_out_of_stock: l.is_out_of_stock(),
            })
            .collect();

        Self {
            product_id,
            total_quantity: breakdown.iter().map(|w| w.quantity).sum(),
            total_reserved: breakdown.iter().map(|w| w.reserved).sum(),
            total_available: breakdown.iter().map(|w| w.available).sum(),
            low_stock_warehouses: breakdown
                .iter()
                .filter(|w| w.is_low_stock)
                .map(|w| w.warehouse_id)
                .collect(),
            out_of_stock_warehouses: breakdown
                .iter()
                .filter(|w| w.is_out_of_stock)
                .map(|w| w.warehouse_id)
                .collect(),
            breakdown,
        }
    }
}

/// How soon a line needs restocking, most urgent first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReorderUrgency {
    Critical,
    High,
    Medium,
}

/// Read-only restocking hint for a line at or below its reorder point
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReorderSuggestion {
    pub product_id: Uuid,
    pub warehouse_id: Uuid,
    pub current_quantity: i64,
    pub reorder_point: i64,
    pub max_stock_level: i64,
    pub suggested_quantity: i64,
    pub urgency: ReorderUrgency,
}

impl ReorderSuggestion {
    pub fn for_line(line: &StockLine) -> Option<Self> {
        if !line.is_active || line.quantity > line.reorder_point {
            return None;
        }

        let suggested_quantity = line
            .max_stock_level
            .saturating_sub(line.quantity)
            .max(line.reorder_point.saturating_mul(2));
        let urgency = if line.quantity == 0 {
            ReorderUrgency::Critical
        } else if line.quantity <= line.reorder_point / 2 {
            ReorderUrgency::High
        } else {
            ReorderUrgency::Medium
        };

        Some(Self {
            product_id: line.product_id,
            warehouse_id: line.warehouse_id,
            current_quantity: line.quantity,
            reorder_point: line.reorder_point,
            max_stock_level: line.max_stock_level,
            suggested_quantity,
            urgency,
        })
    }
}
