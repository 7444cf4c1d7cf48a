//! Purchase order lifecycle and receipt accounting
//!
//! Orders move `draft -> pending -> approved -> ordered -> received`, with
//! `cancelled` reachable from every non-terminal state. Receiving goods is
//! the only bridge into the stock ledger: each accepted line increments the
//! item and appends an `in` movement in one unit of work.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use shared::{
    next_order_number, order_total, validate_order_dates, validate_quantity_ordered,
    validate_unit_price, ActorId, MovementKind, OrderStatus, OrderWithItems, PurchaseOrder,
    PurchaseOrderItem, Reference, StockKey,
};
use uuid::Uuid;

use crate::config::OrdersConfig;
use crate::error::{AppError, AppResult};
use crate::services::ledger::{movement_op, StockLedger};
use crate::store::{ItemsOp, OrderOp, Store};

/// Purchase order service
#[derive(Clone)]
pub struct OrderService {
    store: Arc<dyn Store>,
    ledger: StockLedger,
    config: OrdersConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewOrderItem {
    pub product_id: Uuid,
    pub quantity_ordered: i64,
    pub unit_price: Decimal,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateOrderInput {
    pub supplier_id: Uuid,
    pub warehouse_id: Uuid,
    /// Defaults to today
    pub order_date: Option<NaiveDate>,
    pub expected_date: Option<NaiveDate>,
    pub notes: Option<String>,
    pub items: Vec<NewOrderItem>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateItemInput {
    pub quantity_ordered: Option<i64>,
    pub unit_price: Option<Decimal>,
    pub notes: Option<String>,
}

/// Units arriving for one order item
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ReceivedItem {
    pub item_id: Uuid,
    pub quantity: i64,
}

/// Result of one line of a receipt
#[derive(Debug)]
pub struct LineReceipt {
    pub item_id: Uuid,
    /// Units accepted, or why the line was rejected
    pub result: AppResult<i64>,
}

/// Result of a receive call. A partial receipt is not an error: check
/// `completed` or the order status.
#[derive(Debug)]
pub struct ReceiptOutcome {
    pub order: OrderWithItems,
    pub lines: Vec<LineReceipt>,
    pub completed: bool,
}

impl ReceiptOutcome {
    pub fn accepted(&self) -> i64 {
        self.lines
            .iter()
            .filter_map(|l| l.result.as_ref().ok())
            .sum()
    }

    pub fn rejected(&self) -> usize {
        self.lines.iter().filter(|l| l.result.is_err()).count()
    }
}

fn live(order: &PurchaseOrder) -> AppResult<()> {
    if order.is_deleted {
        Err(AppError::not_found("purchase order", order.id))
    } else {
        Ok(())
    }
}

fn validate_item_fields(quantity_ordered: i64, unit_price: Decimal) -> AppResult<()> {
    validate_quantity_ordered(quantity_ordered).map_err(AppError::validation)?;
    validate_unit_price(unit_price).map_err(AppError::validation)?;
    Ok(())
}

impl OrderService {
    pub fn new(store: Arc<dyn Store>, ledger: StockLedger, config: OrdersConfig) -> Self {
        Self {
            store,
            ledger,
            config,
        }
    }

    async fn ensure_product(&self, product_id: Uuid) -> AppResult<()> {
        self.store
            .get_product(product_id)
            .await?
            .filter(|p| p.is_active)
            .ok_or_else(|| AppError::not_found("product", product_id))?;
        Ok(())
    }

    /// Create a draft order with its items.
    ///
    /// The order number is claimed optimistically: a concurrent creator that
    /// takes the same number causes a retry with a fresh one.
    pub async fn create_order(&self, input: CreateOrderInput) -> AppResult<OrderWithItems> {
        let today = Utc::now().date_naive();
        let order_date = input.order_date.unwrap_or(today);
        validate_order_dates(order_date, input.expected_date).map_err(AppError::validation)?;

        self.store
            .get_warehouse(input.warehouse_id)
            .await?
            .filter(|w| w.is_active)
            .ok_or_else(|| AppError::not_found("warehouse", input.warehouse_id))?;
        for item in &input.items {
            validate_item_fields(item.quantity_ordered, item.unit_price)?;
            self.ensure_product(item.product_id).await?;
        }

        let attempts = self.config.number_retry_attempts.max(1);
        for attempt in 1..=attempts {
            let existing = self.store.order_numbers_on(today).await?;
            let order_number = next_order_number(today, existing.iter().map(String::as_str));

            let order_id = Uuid::new_v4();
            let items: Vec<PurchaseOrderItem> = input
                .items
                .iter()
                .map(|i| {
                    let mut item =
                        PurchaseOrderItem::new(order_id, i.product_id, i.quantity_ordered, i.unit_price);
                    item.notes = i.notes.clone().unwrap_or_default();
                    item
                })
                .collect();
            let now = Utc::now();
            let order = PurchaseOrder {
                id: order_id,
                order_number,
                supplier_id: input.supplier_id,
                warehouse_id: input.warehouse_id,
                status: OrderStatus::Draft,
                order_date,
                expected_date: input.expected_date,
                received_date: None,
                total_amount: order_total(&items),
                notes: input.notes.clone().unwrap_or_default(),
                approved_by: None,
                approved_at: None,
                is_deleted: false,
                created_at: now,
                updated_at: now,
            };

            match self.store.insert_order(&order, &items).await {
                Ok(()) => {
                    tracing::info!(
                        order_id = %order.id,
                        order_number = %order.order_number,
                        items = items.len(),
                        total = %order.total_amount,
                        "purchase order created"
                    );
                    return Ok(OrderWithItems { order, items });
                }
                Err(e) if e.is_retryable() => {
                    tracing::warn!(
                        order_number = %order.order_number,
                        attempt,
                        "order number taken, retrying"
                    );
                }
                Err(e) => return Err(e),
            }
        }

        Err(AppError::ConcurrencyConflict(format!(
            "no free order number after {attempts} attempts"
        )))
    }

    /// Live (not soft-deleted) order with its items
    pub async fn get_order(&self, order_id: Uuid) -> AppResult<OrderWithItems> {
        self.store
            .get_order(order_id)
            .await?
            .filter(|o| !o.order.is_deleted)
            .ok_or_else(|| AppError::not_found("purchase order", order_id))
    }

    async fn transition(
        &self,
        order_id: Uuid,
        label: &'static str,
        op: OrderOp,
    ) -> AppResult<OrderWithItems> {
        match self.store.mutate_order(order_id, op).await {
            Ok(updated) => {
                tracing::info!(
                    order_id = %order_id,
                    status = updated.order.status.as_str(),
                    "purchase order {label}"
                );
                Ok(updated)
            }
            Err(e) => {
                tracing::warn!(order_id = %order_id, error = %e, "purchase order {label} rejected");
                Err(e)
            }
        }
    }

    /// `draft -> pending`
    pub async fn submit(&self, order_id: Uuid) -> AppResult<OrderWithItems> {
        let op: OrderOp = Box::new(move |order: &mut PurchaseOrder, _: &[PurchaseOrderItem]| {
            live(order)?;
            order
                .submit()
                .map_err(|e| AppError::order_transition(order_id, e))
        });
        self.transition(order_id, "submitted", op).await
    }

    /// `draft | pending -> approved`, recording the approver
    pub async fn approve(&self, order_id: Uuid, approver: ActorId) -> AppResult<OrderWithItems> {
        let op: OrderOp = Box::new(move |order: &mut PurchaseOrder, _: &[PurchaseOrderItem]| {
            live(order)?;
            order
                .approve(approver, Utc::now())
                .map_err(|e| AppError::order_transition(order_id, e))
        });
        self.transition(order_id, "approved", op).await
    }

    /// `approved -> ordered`
    pub async fn mark_ordered(&self, order_id: Uuid) -> AppResult<OrderWithItems> {
        let op: OrderOp = Box::new(move |order: &mut PurchaseOrder, _: &[PurchaseOrderItem]| {
            live(order)?;
            order
                .mark_ordered()
                .map_err(|e| AppError::order_transition(order_id, e))
        });
        self.transition(order_id, "ordered", op).await
    }

    /// Any non-terminal state to `cancelled`
    pub async fn cancel(&self, order_id: Uuid) -> AppResult<OrderWithItems> {
        let op: OrderOp = Box::new(move |order: &mut PurchaseOrder, _: &[PurchaseOrderItem]| {
            live(order)?;
            order
                .cancel()
                .map_err(|e| AppError::order_transition(order_id, e))
        });
        self.transition(order_id, "cancelled", op).await
    }

    pub async fn soft_delete(&self, order_id: Uuid) -> AppResult<()> {
        let op: OrderOp = Box::new(move |order: &mut PurchaseOrder, _: &[PurchaseOrderItem]| {
            live(order)?;
            order.is_deleted = true;
            order.updated_at = Utc::now();
            Ok(())
        });
        self.transition(order_id, "deleted", op).await?;
        Ok(())
    }

    /// Receive goods against an approved or ordered purchase order.
    ///
    /// Each line commits on its own; a rejected line (over-receipt, bad
    /// quantity, unknown item) does not stop the others. The order closes as
    /// `received` only once every item is fully received.
    pub async fn receive(
        &self,
        order_id: Uuid,
        received: Vec<ReceivedItem>,
        received_date: Option<NaiveDate>,
    ) -> AppResult<ReceiptOutcome> {
        let snapshot = self.get_order(order_id).await?;
        snapshot
            .order
            .ensure_receivable()
            .map_err(|e| AppError::order_transition(order_id, e))?;

        let reference = Reference::purchase_order(order_id);
        let mut lines = Vec::with_capacity(received.len());
        for entry in received {
            let result = self
                .receive_line(&snapshot, reference, entry)
                .await;
            match &result {
                Ok(accepted) => tracing::info!(
                    order_id = %order_id,
                    item_id = %entry.item_id,
                    accepted,
                    "order item received"
                ),
                Err(e) => tracing::warn!(
                    order_id = %order_id,
                    item_id = %entry.item_id,
                    quantity = entry.quantity,
                    error = %e,
                    "order item receipt rejected"
                ),
            }
            lines.push(LineReceipt {
                item_id: entry.item_id,
                result,
            });
        }

        let date = received_date.unwrap_or_else(|| Utc::now().date_naive());
        let close: OrderOp = Box::new(move |order: &mut PurchaseOrder, items: &[PurchaseOrderItem]| {
            // Cancelled meanwhile: keep what was received, leave the status alone
            if !order.status.can_receive() {
                return Ok(());
            }
            order
                .close_if_fully_received(items, date)
                .map(|_| ())
                .map_err(|e| AppError::order_transition(order_id, e))
        });
        let order = self.store.mutate_order(order_id, close).await?;
        let completed = order.order.status == OrderStatus::Received;

        let outcome = ReceiptOutcome {
            order,
            lines,
            completed,
        };
        tracing::info!(
            order_id = %order_id,
            accepted = outcome.accepted(),
            rejected = outcome.rejected(),
            completed,
            "purchase order receipt processed"
        );
        Ok(outcome)
    }

    async fn receive_line(
        &self,
        snapshot: &OrderWithItems,
        reference: Reference,
        entry: ReceivedItem,
    ) -> AppResult<i64> {
        if entry.quantity <= 0 {
            return Err(AppError::InvalidAmount {
                amount: entry.quantity,
                reason: "received quantity must be positive",
            });
        }
        let item = snapshot
            .items
            .iter()
            .find(|i| i.id == entry.item_id)
            .ok_or_else(|| AppError::not_found("purchase order item", entry.item_id))?;

        let key = StockKey::new(item.product_id, snapshot.order.warehouse_id);
        let op = movement_op(
            MovementKind::In,
            entry.quantity,
            Some(reference),
            Some(format!("Received against {}", snapshot.order.order_number)),
        );
        self.store
            .receive_item(
                snapshot.order.id,
                entry.item_id,
                entry.quantity,
                self.ledger.template(key),
                op,
            )
            .await?;
        Ok(entry.quantity)
    }

    /// Add an item to a non-terminal order; the total is recomputed with it
    pub async fn add_item(&self, order_id: Uuid, input: NewOrderItem) -> AppResult<OrderWithItems> {
        validate_item_fields(input.quantity_ordered, input.unit_price)?;
        self.ensure_product(input.product_id).await?;

        let op: ItemsOp = Box::new(move |order: &PurchaseOrder, _: &mut Vec<PurchaseOrderItem>| {
            live(order)?;
            order
                .ensure_editable()
                .map_err(|e| AppError::order_transition(order_id, e))?;
            let mut item =
                PurchaseOrderItem::new(order_id, input.product_id, input.quantity_ordered, input.unit_price);
            item.notes = input.notes.unwrap_or_default();
            Ok(item)
        });
        let updated = self.store.mutate_items(order_id, op).await?;
        tracing::info!(
            order_id = %order_id,
            total = %updated.order.total_amount,
            "order item added"
        );
        Ok(updated)
    }

    /// Change quantity, price or notes of an item on a non-terminal order
    pub async fn update_item(
        &self,
        order_id: Uuid,
        item_id: Uuid,
        input: UpdateItemInput,
    ) -> AppResult<OrderWithItems> {
        if let Some(quantity) = input.quantity_ordered {
            validate_quantity_ordered(quantity).map_err(AppError::validation)?;
        }
        if let Some(price) = input.unit_price {
            validate_unit_price(price).map_err(AppError::validation)?;
        }

        let op: ItemsOp = Box::new(move |order: &PurchaseOrder, items: &mut Vec<PurchaseOrderItem>| {
            live(order)?;
            order
                .ensure_editable()
                .map_err(|e| AppError::order_transition(order_id, e))?;
            let item = items
                .iter_mut()
                .find(|i| i.id == item_id)
                .ok_or_else(|| AppError::not_found("purchase order item", item_id))?;

            if let Some(quantity) = input.quantity_ordered {
                if quantity < item.quantity_received {
                    return Err(AppError::validation(format!(
                        "quantity ordered {quantity} is below quantity already received {}",
                        item.quantity_received
                    )));
                }
                item.quantity_ordered = quantity;
            }
            if let Some(price) = input.unit_price {
                item.unit_price = price;
            }
            if let Some(notes) = input.notes {
                item.notes = notes;
            }
            Ok(item.clone())
        });
        let updated = self.store.mutate_items(order_id, op).await?;
        tracing::info!(
            order_id = %order_id,
            item_id = %item_id,
            total = %updated.order.total_amount,
            "order item updated"
        );
        Ok(updated)
    }
}
