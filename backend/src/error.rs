//! Error handling for the stock ledger and alerting engine
//!
//! Every variant is a caller-facing outcome carrying enough detail to name
//! the offending entity and the violated constraint.

use shared::{
    DeliveryTransitionError, ReceiptError, StockKey, StockRuleError, TransitionError,
};
use thiserror::Error;
use uuid::Uuid;

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Quantity errors
    #[error("Invalid amount {amount}: {reason}")]
    InvalidAmount { amount: i64, reason: &'static str },

    #[error("Insufficient stock for {key}: available quantity {available}, requested {requested}")]
    InsufficientStock {
        key: StockKey,
        available: i64,
        requested: i64,
    },

    #[error("Insufficient available stock for {key}: available quantity {available}, requested {requested}")]
    InsufficientAvailable {
        key: StockKey,
        available: i64,
        requested: i64,
    },

    #[error("Over-receipt on order item {item_id}: ordered {ordered}, received {received}, requested {requested}")]
    OverReceipt {
        item_id: Uuid,
        ordered: i64,
        received: i64,
        requested: i64,
    },

    #[error("Over-release for {key}: reserved quantity {reserved}, requested {requested}")]
    OverRelease {
        key: StockKey,
        reserved: i64,
        requested: i64,
    },

    // Lifecycle errors
    #[error("Invalid transition of {entity} {id}: cannot {action} from {state}")]
    InvalidTransition {
        entity: &'static str,
        id: Uuid,
        state: String,
        action: String,
    },

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Concurrency conflict: {0}")]
    ConcurrencyConflict(String),

    #[error("Validation error: {0}")]
    Validation(String),

    // Fatal: stock left the source but never reached the target
    #[error("Transfer compensation failed for {key}: {amount} units unaccounted ({cause})")]
    CompensationFailed {
        key: StockKey,
        amount: i64,
        cause: String,
    },

    // Database errors
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        AppError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        AppError::Validation(message.into())
    }

    /// Translate a stock rule violation on `key` into the caller-facing kind
    pub fn from_stock_rule(key: StockKey, err: StockRuleError) -> Self {
        match err {
            StockRuleError::NonPositive { amount } => AppError::InvalidAmount {
                amount,
                reason: "amount must be positive",
            },
            StockRuleError::NegativeTarget { amount } => AppError::InvalidAmount {
                amount,
                reason: "adjusted quantity cannot be negative",
            },
            StockRuleError::Overflow { quantity, amount } => AppError::Validation(format!(
                "quantity {quantity} of {key} cannot grow by {amount}"
            )),
            StockRuleError::InsufficientStock {
                available,
                requested,
            } => AppError::InsufficientStock {
                key,
                available,
                requested,
            },
            StockRuleError::InsufficientAvailable {
                available,
                requested,
            } => AppError::InsufficientAvailable {
                key,
                available,
                requested,
            },
            StockRuleError::OverRelease {
                reserved,
                requested,
            } => AppError::OverRelease {
                key,
                reserved,
                requested,
            },
            StockRuleError::BelowReserved {
                reserved,
                requested,
            } => AppError::Validation(format!(
                "cannot set quantity of {key} to {requested}: {reserved} units are reserved"
            )),
        }
    }

    pub fn from_receipt(item_id: Uuid, err: ReceiptError) -> Self {
        match err {
            ReceiptError::NonPositive(amount) => AppError::InvalidAmount {
                amount,
                reason: "received quantity must be positive",
            },
            ReceiptError::OverReceipt {
                ordered,
                received,
                requested,
            } => AppError::OverReceipt {
                item_id,
                ordered,
                received,
                requested,
            },
        }
    }

    pub fn order_transition(order_id: Uuid, err: TransitionError) -> Self {
        AppError::InvalidTransition {
            entity: "purchase order",
            id: order_id,
            state: err.from.as_str().to_string(),
            action: err.action.as_str().to_string(),
        }
    }

    pub fn delivery_transition(notification_id: Uuid, err: DeliveryTransitionError) -> Self {
        AppError::InvalidTransition {
            entity: "notification",
            id: notification_id,
            state: err.from.as_str().to_string(),
            action: format!("move to {}", err.to),
        }
    }

    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            AppError::InvalidAmount { .. } => "INVALID_AMOUNT",
            AppError::InsufficientStock { .. } => "INSUFFICIENT_STOCK",
            AppError::InsufficientAvailable { .. } => "INSUFFICIENT_AVAILABLE",
            AppError::OverReceipt { .. } => "OVER_RECEIPT",
            AppError::OverRelease { .. } => "OVER_RELEASE",
            AppError::InvalidTransition { .. } => "INVALID_TRANSITION",
            AppError::NotFound { .. } => "NOT_FOUND",
            AppError::ConcurrencyConflict(_) => "CONCURRENCY_CONFLICT",
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::CompensationFailed { .. } => "COMPENSATION_FAILED",
            AppError::DatabaseError(_) => "DATABASE_ERROR",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether the caller should retry the triggering operation
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::ConcurrencyConflict(_))
    }

    /// Map a Postgres unique violation (SQLSTATE 23505) to a conflict
    pub fn from_unique_violation(err: sqlx::Error, what: &str) -> Self {
        let unique = err
            .as_database_error()
            .and_then(|db| db.code())
            .map_or(false, |code| code == "23505");
        if unique {
            AppError::ConcurrencyConflict(format!("duplicate {what}"))
        } else {
            AppError::DatabaseError(err)
        }
    }
}

/// Result type alias for engine operations
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stock_rule_mapping_keeps_numbers() {
        let key = StockKey::new(Uuid::new_v4(), Uuid::new_v4());
        let err = AppError::from_stock_rule(
            key,
            StockRuleError::InsufficientAvailable {
                available: 3,
                requested: 10,
            },
        );
        assert_eq!(err.code(), "INSUFFICIENT_AVAILABLE");
        assert!(err.to_string().contains("available quantity 3, requested 10"));
    }

    #[test]
    fn test_only_conflicts_are_retryable() {
        assert!(AppError::ConcurrencyConflict("x".into()).is_retryable());
        assert!(!AppError::validation("x").is_retryable());
        assert!(!AppError::not_found("alert", Uuid::nil()).is_retryable());
    }
}
