//! Input validation for ledger, order and alert rule operations

use chrono::NaiveDate;
use rust_decimal::Decimal;

// ============================================================================
// Stock Validations
// ============================================================================

/// Validate stock line thresholds (max 0 means unlimited)
pub fn validate_stock_thresholds(reorder_point: i64, max_stock_level: i64) -> Result<(), &'static str> {
    if reorder_point < 0 {
        return Err("Reorder point cannot be negative");
    }
    if max_stock_level < 0 {
        return Err("Max stock level cannot be negative");
    }
    if max_stock_level > 0 && reorder_point > max_stock_level {
        return Err("Reorder point cannot exceed max stock level");
    }
    Ok(())
}

/// Validate that a transfer moves stock between two distinct warehouses
pub fn validate_transfer_endpoints(
    source: uuid::Uuid,
    target: uuid::Uuid,
) -> Result<(), &'static str> {
    if source == target {
        return Err("Transfer source and target warehouse must differ");
    }
    Ok(())
}

// ============================================================================
// Purchase Order Validations
// ============================================================================

pub fn validate_order_dates(order_date: NaiveDate, expected_date: Option<NaiveDate>) -> Result<(), &'static str> {
    match expected_date {
        Some(expected) if expected < order_date => Err("Expected date cannot be before order date"),
        _ => Ok(()),
    }
}

pub fn validate_quantity_ordered(quantity: i64) -> Result<(), &'static str> {
    if quantity < 1 {
        return Err("Quantity ordered must be at least 1");
    }
    Ok(())
}

pub fn validate_unit_price(unit_price: Decimal) -> Result<(), &'static str> {
    if unit_price < Decimal::ZERO {
        return Err("Unit price cannot be negative");
    }
    Ok(())
}

// ============================================================================
// Alert Rule Validations
// ============================================================================

pub fn validate_rule_name(name: &str) -> Result<(), &'static str> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err("Rule name cannot be empty");
    }
    if trimmed.len() > 200 {
        return Err("Rule name must be at most 200 characters");
    }
    Ok(())
}

/// Validate rule thresholds (max 0 disables the upper bound)
pub fn validate_rule_thresholds(min_threshold: i64, max_threshold: i64) -> Result<(), &'static str> {
    if min_threshold < 0 || max_threshold < 0 {
        return Err("Thresholds cannot be negative");
    }
    if max_threshold > 0 && min_threshold > max_threshold {
        return Err("Minimum threshold cannot exceed maximum threshold");
    }
    Ok(())
}

// ============================================================================
// General Validations
// ============================================================================

/// Validate notification recipient address format (basic check)
pub fn validate_email(email: &str) -> Result<(), &'static str> {
    if email.contains('@') && email.contains('.') && email.len() >= 5 {
        Ok(())
    } else {
        Err("Invalid email format")
    }
}
