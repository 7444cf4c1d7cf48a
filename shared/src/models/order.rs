//! Purchase orders, their items and the order state machine

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::types::ActorId;

/// Purchase order status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Draft,
    Pending,
    Approved,
    Ordered,
    Received,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Draft => "draft",
            OrderStatus::Pending => "pending",
            OrderStatus::Approved => "approved",
            OrderStatus::Ordered => "ordered",
            OrderStatus::Received => "received",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(OrderStatus::Draft),
            "pending" => Some(OrderStatus::Pending),
            "approved" => Some(OrderStatus::Approved),
            "ordered" => Some(OrderStatus::Ordered),
            "received" => Some(OrderStatus::Received),
            "cancelled" => Some(OrderStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Received | OrderStatus::Cancelled)
    }

    pub fn can_receive(&self) -> bool {
        matches!(self, OrderStatus::Approved | OrderStatus::Ordered)
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operation attempted on an order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderAction {
    Submit,
    Approve,
    MarkOrdered,
    Receive,
    Cancel,
    EditItems,
}

impl OrderAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderAction::Submit => "submit",
            OrderAction::Approve => "approve",
            OrderAction::MarkOrdered => "mark_ordered",
            OrderAction::Receive => "receive",
            OrderAction::Cancel => "cancel",
            OrderAction::EditItems => "edit_items",
        }
    }

    /// Whether `action` is permitted from `status`
    pub fn allowed_from(&self, status: OrderStatus) -> bool {
        match self {
            OrderAction::Submit => status == OrderStatus::Draft,
            OrderAction::Approve => matches!(status, OrderStatus::Draft | OrderStatus::Pending),
            OrderAction::MarkOrdered => status == OrderStatus::Approved,
            OrderAction::Receive => status.can_receive(),
            OrderAction::Cancel | OrderAction::EditItems => !status.is_terminal(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot {} an order in status {from}", action.as_str())]
pub struct TransitionError {
    pub from: OrderStatus,
    pub action: OrderAction,
}

/// A supplier purchase order
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PurchaseOrder {
    pub id: Uuid,
    /// `PO-YYYYMMDD-NNNN`
    pub order_number: String,
    pub supplier_id: Uuid,
    /// Destination of received stock
    pub warehouse_id: Uuid,
    pub status: OrderStatus,
    pub order_date: NaiveDate,
    pub expected_date: Option<NaiveDate>,
    pub received_date: Option<NaiveDate>,
    pub total_amount: Decimal,
    pub notes: String,
    pub approved_by: Option<ActorId>,
    pub approved_at: Option<DateTime<Utc>>,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PurchaseOrder {
    fn guard(&self, action: OrderAction) -> Result<(), TransitionError> {
        if action.allowed_from(self.status) {
            Ok(())
        } else {
            Err(TransitionError {
                from: self.status,
                action,
            })
        }
    }

    pub fn submit(&mut self) -> Result<(), TransitionError> {
        self.guard(OrderAction::Submit)?;
        self.status = OrderStatus::Pending;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn approve(&mut self, approver: ActorId, at: DateTime<Utc>) -> Result<(), TransitionError> {
        self.guard(OrderAction::Approve)?;
        self.status = OrderStatus::Approved;
        self.approved_by = Some(approver);
        self.approved_at = Some(at);
        self.updated_at = at;
        Ok(())
    }

    pub fn mark_ordered(&mut self) -> Result<(), TransitionError> {
        self.guard(OrderAction::MarkOrdered)?;
        self.status = OrderStatus::Ordered;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn cancel(&mut self) -> Result<(), TransitionError> {
        self.guard(OrderAction::Cancel)?;
        self.status = OrderStatus::Cancelled;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn ensure_receivable(&self) -> Result<(), TransitionError> {
        self.guard(OrderAction::Receive)
    }

    pub fn ensure_editable(&self) -> Result<(), TransitionError> {
        self.guard(OrderAction::EditItems)
    }

    /// Close the order as received if every item is fully received.
    ///
    /// Returns whether the order was closed. A partial receipt leaves the
    /// status unchanged.
    pub fn close_if_fully_received(
        &mut self,
        items: &[PurchaseOrderItem],
        received_date: NaiveDate,
    ) -> Result<bool, TransitionError> {
        self.guard(OrderAction::Receive)?;
        if !all_items_received(items) {
            return Ok(false);
        }
        self.status = OrderStatus::Received;
        self.received_date = Some(received_date);
        self.updated_at = Utc::now();
        Ok(true)
    }

    pub fn is_complete(&self, items: &[PurchaseOrderItem]) -> bool {
        self.status == OrderStatus::Received && all_items_received(items)
    }
}

/// Violation of an item receipt rule
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReceiptError {
    #[error("received quantity must be positive, got {0}")]
    NonPositive(i64),

    #[error("ordered {ordered}, already received {received}, cannot receive {requested} more")]
    OverReceipt {
        ordered: i64,
        received: i64,
        requested: i64,
    },
}

/// A product line of a purchase order
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PurchaseOrderItem {
    pub id: Uuid,
    pub order_id: Uuid,
    pub product_id: Uuid,
    pub quantity_ordered: i64,
    pub quantity_received: i64,
    pub unit_price: Decimal,
    pub notes: String,
}

impl PurchaseOrderItem {
    pub fn new(order_id: Uuid, product_id: Uuid, quantity_ordered: i64, unit_price: Decimal) -> Self {
        Self {
            id: Uuid::new_v4(),
            order_id,
            product_id,
            quantity_ordered,
            quantity_received: 0,
            unit_price,
            notes: String::new(),
        }
    }

    pub fn total_price(&self) -> Decimal {
        Decimal::from(self.quantity_ordered) * self.unit_price
    }

    pub fn remaining_quantity(&self) -> i64 {
        (self.quantity_ordered - self.quantity_received).max(0)
    }

    pub fn is_complete(&self) -> bool {
        self.quantity_received >= self.quantity_ordered
    }

    /// Record `delta` more units as received
    pub fn receive(&mut self, delta: i64) -> Result<(), ReceiptError> {
        if delta <= 0 {
            return Err(ReceiptError::NonPositive(delta));
        }
        if delta > self.quantity_ordered - self.quantity_received {
            return Err(ReceiptError::OverReceipt {
                ordered: self.quantity_ordered,
                received: self.quantity_received,
                requested: delta,
            });
        }
        self.quantity_received += delta;
        Ok(())
    }
}

pub fn order_total(items: &[PurchaseOrderItem]) -> Decimal {
    items.iter().map(PurchaseOrderItem::total_price).sum()
}

/// An order with no items is never fully received
pub fn all_items_received(items: &[PurchaseOrderItem]) -> bool {
    !items.is_empty() && items.iter().all(PurchaseOrderItem::is_complete)
}

/// Received share of ordered units, in percent, rounded to two places
pub fn completion_percentage(items: &[PurchaseOrderItem]) -> Decimal {
    let ordered: i64 = items.iter().map(|i| i.quantity_ordered).sum();
    if ordered == 0 {
        return Decimal::ZERO;
    }
    let received: i64 = items.iter().map(|i| i.quantity_received).sum();
    (Decimal::from(received) * Decimal::from(100) / Decimal::from(ordered)).round_dp(2)
}

/// Order plus its items, as read back from the store
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderWithItems {
    pub order: PurchaseOrder,
    pub items: Vec<PurchaseOrderItem>,
}

impl OrderWithItems {
    pub fn item_count(&self) -> usize {
        self.items.len()
    }

    pub fn total_quantity(&self) -> i64 {
        self.items.iter().map(|i| i.quantity_ordered).sum()
    }

    pub fn received_quantity(&self) -> i64 {
        self.items.iter().map(|i| i.quantity_received).sum()
    }

    pub fn completion_percentage(&self) -> Decimal {
        completion_percentage(&self.items)
    }

    pub fn is_complete(&self) -> bool {
        self.order.is_complete(&self.items)
    }
}

/// Format an order number: `PO-{YYYYMMDD}-{seq:04}`
pub fn format_order_number(date: NaiveDate, sequence: u32) -> String {
    format!("PO-{}-{:04}", date.format("%Y%m%d"), sequence)
}

/// Sequence part of an order number issued on `date`
pub fn parse_order_sequence(order_number: &str, date: NaiveDate) -> Option<u32> {
    let prefix = format!("PO-{}-", date.format("%Y%m%d"));
    let seq = order_number.strip_prefix(&prefix)?;
    if seq.is_empty() || !seq.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    seq.parse().ok()
}

/// Next order number for `date` given the numbers already issued
pub fn next_order_number<'a>(date: NaiveDate, existing: impl IntoIterator<Item = &'a str>) -> String {
    let highest = existing
        .into_iter()
        .filter_map(|n| parse_order_sequence(n, date))
        .max()
        .unwrap_or(0);
    format_order_number(date, highest + 1)
}
