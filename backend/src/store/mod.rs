//! Persistence seams for the engine
//!
//! Every multi-row write the engine needs is one trait method, so that each
//! implementation can run it as a single unit of work: one database
//! transaction for [`PgStore`], one critical section for [`InMemoryStore`].
//! Mutations take closures that run against the locked, current state of the
//! row; business rules live in those closures, not in the stores.

use async_trait::async_trait;
use chrono::NaiveDate;
use shared::{
    AlertCandidate, AlertFilter, AlertKey, AlertNotification, AlertRule, Category, OrderWithItems,
    Product, PurchaseOrder, PurchaseOrderItem, Reference, RuleScope, StockAlert, StockKey,
    StockLine, StockMovement, NewMovement, Warehouse,
};
use uuid::Uuid;

use crate::error::AppResult;

mod memory;
mod postgres;

pub use memory::InMemoryStore;
pub use postgres::PgStore;

/// Change applied to a locked stock line. Returns the movement to append,
/// or `None` when nothing is logged (settings-only changes, no-op adjustments).
pub type LineOp = Box<dyn FnOnce(&mut StockLine) -> AppResult<Option<NewMovement>> + Send>;

/// Change applied to a locked order, given its current items
pub type OrderOp = Box<dyn FnOnce(&mut PurchaseOrder, &[PurchaseOrderItem]) -> AppResult<()> + Send>;

/// Change applied to a locked order's items. Returns the item to write.
pub type ItemsOp =
    Box<dyn FnOnce(&PurchaseOrder, &mut Vec<PurchaseOrderItem>) -> AppResult<PurchaseOrderItem> + Send>;

/// Change applied to a locked alert. Returns whether anything changed.
pub type AlertOp = Box<dyn FnOnce(&mut StockAlert) -> bool + Send>;

pub type NotificationOp = Box<dyn FnOnce(&mut AlertNotification) -> AppResult<()> + Send>;

/// Stock line state after a committed mutation
#[derive(Debug, Clone)]
pub struct LineChange {
    pub line: StockLine,
    pub movement: Option<StockMovement>,
}

/// Result of receiving units against one order item
#[derive(Debug, Clone)]
pub struct ItemReceipt {
    pub item: PurchaseOrderItem,
    pub line: StockLine,
    pub movement: Option<StockMovement>,
}

#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn insert_category(&self, category: &Category) -> AppResult<()>;

    async fn insert_product(&self, product: &Product) -> AppResult<()>;

    async fn insert_warehouse(&self, warehouse: &Warehouse) -> AppResult<()>;

    async fn get_product(&self, id: Uuid) -> AppResult<Option<Product>>;

    async fn get_warehouse(&self, id: Uuid) -> AppResult<Option<Warehouse>>;

    async fn set_product_active(&self, id: Uuid, active: bool) -> AppResult<()>;

    async fn set_warehouse_active(&self, id: Uuid, active: bool) -> AppResult<()>;
}

#[async_trait]
pub trait StockStore: Send + Sync {
    async fn get_line(&self, key: StockKey) -> AppResult<Option<StockLine>>;

    /// Lock the line for `key`, apply `op`, write the line and append the
    /// returned movement atomically.
    ///
    /// A missing line is created from `template` when one is given, and is
    /// `NotFound` otherwise. If `op` fails nothing is written.
    async fn mutate_line(
        &self,
        key: StockKey,
        template: Option<StockLine>,
        op: LineOp,
    ) -> AppResult<LineChange>;

    async fn lines_for_product(&self, product_id: Uuid) -> AppResult<Vec<StockLine>>;

    async fn active_lines(&self) -> AppResult<Vec<StockLine>>;

    /// Newest first
    async fn movements(&self, key: StockKey) -> AppResult<Vec<StockMovement>>;

    /// Oldest first
    async fn movements_for_reference(&self, reference: Reference) -> AppResult<Vec<StockMovement>>;
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Insert an order and its items. A duplicate order number is a
    /// `ConcurrencyConflict`.
    async fn insert_order(&self, order: &PurchaseOrder, items: &[PurchaseOrderItem]) -> AppResult<()>;

    async fn order_numbers_on(&self, date: NaiveDate) -> AppResult<Vec<String>>;

    /// Includes soft-deleted orders
    async fn get_order(&self, id: Uuid) -> AppResult<Option<OrderWithItems>>;

    async fn mutate_order(&self, id: Uuid, op: OrderOp) -> AppResult<OrderWithItems>;

    /// Lock the order, apply `op` to its items, upsert the returned item and
    /// recompute the order total, all in one unit of work.
    async fn mutate_items(&self, order_id: Uuid, op: ItemsOp) -> AppResult<OrderWithItems>;

    /// Receive `delta` units of one item into the order's warehouse.
    ///
    /// Locks the order, then the item, then the stock line. The item update,
    /// line update and movement commit together or not at all.
    async fn receive_item(
        &self,
        order_id: Uuid,
        item_id: Uuid,
        delta: i64,
        template: StockLine,
        line_op: LineOp,
    ) -> AppResult<ItemReceipt>;
}

#[async_trait]
pub trait AlertStore: Send + Sync {
    async fn insert_rule(&self, rule: &AlertRule) -> AppResult<()>;

    async fn get_rule(&self, id: Uuid) -> AppResult<Option<AlertRule>>;

    async fn set_rule_active(&self, id: Uuid, active: bool) -> AppResult<AlertRule>;

    async fn active_rules(&self) -> AppResult<Vec<AlertRule>>;

    /// Active stock lines of active products covered by `scope`
    async fn candidate_lines(&self, scope: RuleScope) -> AppResult<Vec<AlertCandidate>>;

    /// Insert `alert` together with the notifications queued for it, unless an
    /// unresolved alert already exists for its key. Both land or neither does.
    /// Returns the inserted alert, or `None` if one was already open.
    async fn create_alert_if_absent(
        &self,
        alert: &StockAlert,
        notifications: &[AlertNotification],
    ) -> AppResult<Option<StockAlert>>;

    async fn find_unresolved(&self, key: AlertKey) -> AppResult<Option<StockAlert>>;

    async fn get_alert(&self, id: Uuid) -> AppResult<Option<StockAlert>>;

    /// Lock the alert and apply `op`; writes only when `op` reports a change.
    /// Reopening an alert whose key already has an open alert is a
    /// `ConcurrencyConflict`.
    async fn mutate_alert(&self, id: Uuid, op: AlertOp) -> AppResult<(StockAlert, bool)>;

    /// Newest first
    async fn list_alerts(&self, filter: &AlertFilter) -> AppResult<Vec<StockAlert>>;
}

#[async_trait]
pub trait NotificationStore: Send + Sync {
    async fn get_notification(&self, id: Uuid) -> AppResult<Option<AlertNotification>>;

    async fn mutate_notification(&self, id: Uuid, op: NotificationOp) -> AppResult<AlertNotification>;

    /// Oldest first
    async fn pending_notifications(&self, limit: i64) -> AppResult<Vec<AlertNotification>>;

    async fn notifications_for_alert(&self, alert_id: Uuid) -> AppResult<Vec<AlertNotification>>;
}

/// Everything the services need from storage
pub trait Store: CatalogStore + StockStore + OrderStore + AlertStore + NotificationStore {}

impl<T> Store for T where T: CatalogStore + StockStore + OrderStore + AlertStore + NotificationStore {}
