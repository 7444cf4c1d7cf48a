use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use shared::{
    order_total, parse_order_sequence, AlertCandidate, AlertFilter, AlertKey, AlertNotification,
    AlertRule, Category, DeliveryStatus, OrderWithItems, Product, PurchaseOrder, PurchaseOrderItem,
    Reference, RuleScope, StockAlert, StockKey, StockLine, StockMovement, Warehouse,
};
use uuid::Uuid;

use super::{
    AlertOp, AlertStore, CatalogStore, ItemReceipt, ItemsOp, LineChange, LineOp,
    NotificationOp, NotificationStore, OrderOp, OrderStore, StockStore,
};
use crate::error::{AppError, AppResult};

fn poisoned<T>(_: T) -> AppError {
    AppError::Internal("in-memory store lock poisoned".to_string())
}

#[derive(Debug)]
struct OrderRecord {
    order: PurchaseOrder,
    items: Vec<PurchaseOrderItem>,
}

impl OrderRecord {
    fn snapshot(&self) -> OrderWithItems {
        OrderWithItems {
            order: self.order.clone(),
            items: self.items.clone(),
        }
    }
}

#[derive(Debug, Default)]
struct OrderTable {
    records: HashMap<Uuid, Arc<Mutex<OrderRecord>>>,
    numbers: HashMap<String, Uuid>,
}

/// In-memory store.
///
/// Intended for tests and local development. Each stock line and each order
/// sits behind its own mutex, so writes to one line serialise while writes to
/// different lines proceed in parallel. Alert inserts share one mutex, which
/// makes the unresolved-alert uniqueness check and the insert one step.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    categories: RwLock<HashMap<Uuid, Category>>,
    products: RwLock<HashMap<Uuid, Product>>,
    warehouses: RwLock<HashMap<Uuid, Warehouse>>,
    lines: RwLock<HashMap<StockKey, Arc<Mutex<StockLine>>>>,
    movements: RwLock<Vec<StockMovement>>,
    orders: RwLock<OrderTable>,
    rules: RwLock<HashMap<Uuid, AlertRule>>,
    alerts: Mutex<Vec<StockAlert>>,
    notifications: Mutex<Vec<AlertNotification>>,
    /// Movement writes allowed on a line before writes start failing
    movement_failures: Mutex<HashMap<StockKey, u32>>,
    notification_writes_fail: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Make every subsequent movement write on `key` fail
    pub fn inject_failure(&self, key: StockKey) {
        self.inject_failure_after(key, 0);
    }

    /// Let `successes` more movement writes on `key` through, then fail
    pub fn inject_failure_after(&self, key: StockKey, successes: u32) {
        if let Ok(mut plans) = self.movement_failures.lock() {
            plans.insert(key, successes);
        }
    }

    /// Make alert inserts that carry notifications fail while `fail` is set
    pub fn fail_notification_writes(&self, fail: bool) {
        self.notification_writes_fail.store(fail, Ordering::SeqCst);
    }

    fn check_movement_write(&self, key: StockKey) -> AppResult<()> {
        let mut plans = self.movement_failures.lock().map_err(poisoned)?;
        match plans.get_mut(&key) {
            Some(0) => Err(AppError::Internal(format!(
                "movement log write failed for {key}"
            ))),
            Some(remaining) => {
                *remaining -= 1;
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// Apply `op` to a copy of `line` and commit the copy plus its movement
    fn commit_line_op(&self, key: StockKey, line: &mut StockLine, op: LineOp) -> AppResult<LineChange> {
        let mut next = line.clone();
        let movement = op(&mut next)?.map(|m| m.into_movement(key));
        if let Some(movement) = &movement {
            self.check_movement_write(key)?;
            self.movements
                .write()
                .map_err(poisoned)?
                .push(movement.clone());
        }
        *line = next.clone();
        Ok(LineChange {
            line: next,
            movement,
        })
    }

    fn mutate_line_now(
        &self,
        key: StockKey,
        template: Option<StockLine>,
        op: LineOp,
    ) -> AppResult<LineChange> {
        let existing = self.lines.read().map_err(poisoned)?.get(&key).cloned();
        let cell = match existing {
            Some(cell) => cell,
            None => {
                let Some(mut line) = template else {
                    return Err(AppError::not_found("stock line", key));
                };
                let mut lines = self.lines.write().map_err(poisoned)?;
                match lines.get(&key).cloned() {
                    Some(cell) => cell,
                    None => {
                        // Insert only once the op succeeded
                        let change = self.commit_line_op(key, &mut line, op)?;
                        lines.insert(key, Arc::new(Mutex::new(line)));
                        return Ok(change);
                    }
                }
            }
        };

        let mut line = cell.lock().map_err(poisoned)?;
        self.commit_line_op(key, &mut line, op)
    }

    fn order_cell(&self, id: Uuid) -> AppResult<Arc<Mutex<OrderRecord>>> {
        self.orders
            .read()
            .map_err(poisoned)?
            .records
            .get(&id)
            .cloned()
            .ok_or_else(|| AppError::not_found("purchase order", id))
    }

    fn snapshot_lines(&self) -> AppResult<Vec<StockLine>> {
        let cells: Vec<_> = self.lines.read().map_err(poisoned)?.values().cloned().collect();
        let mut lines = Vec::with_capacity(cells.len());
        for cell in cells {
            lines.push(cell.lock().map_err(poisoned)?.clone());
        }
        lines.sort_by_key(|l| l.key());
        Ok(lines)
    }
}

#[async_trait]
impl CatalogStore for InMemoryStore {
    async fn insert_category(&self, category: &Category) -> AppResult<()> {
        self.categories
            .write()
            .map_err(poisoned)?
            .insert(category.id, category.clone());
        Ok(())
    }

    async fn insert_product(&self, product: &Product) -> AppResult<()> {
        let mut products = self.products.write().map_err(poisoned)?;
        if products.values().any(|p| p.sku == product.sku && p.id != product.id) {
            return Err(AppError::ConcurrencyConflict(format!(
                "duplicate product sku {}",
                product.sku
            )));
        }
        products.insert(product.id, product.clone());
        Ok(())
    }

    async fn insert_warehouse(&self, warehouse: &Warehouse) -> AppResult<()> {
        self.warehouses
            .write()
            .map_err(poisoned)?
            .insert(warehouse.id, warehouse.clone());
        Ok(())
    }

    async fn get_product(&self, id: Uuid) -> AppResult<Option<Product>> {
        Ok(self.products.read().map_err(poisoned)?.get(&id).cloned())
    }

    async fn get_warehouse(&self, id: Uuid) -> AppResult<Option<Warehouse>> {
        Ok(self.warehouses.read().map_err(poisoned)?.get(&id).cloned())
    }

    async fn set_product_active(&self, id: Uuid, active: bool) -> AppResult<()> {
        let mut products = self.products.write().map_err(poisoned)?;
        let product = products
            .get_mut(&id)
            .ok_or_else(|| AppError::not_found("product", id))?;
        product.is_active = active;
        Ok(())
    }

    async fn set_warehouse_active(&self, id: Uuid, active: bool) -> AppResult<()> {
        let mut warehouses = self.warehouses.write().map_err(poisoned)?;
        let warehouse = warehouses
            .get_mut(&id)
            .ok_or_else(|| AppError::not_found("warehouse", id))?;
        warehouse.is_active = active;
        Ok(())
    }
}

#[async_trait]
impl StockStore for InMemoryStore {
    async fn get_line(&self, key: StockKey) -> AppResult<Option<StockLine>> {
        let cell = self.lines.read().map_err(poisoned)?.get(&key).cloned();
        match cell {
            Some(cell) => Ok(Some(cell.lock().map_err(poisoned)?.clone())),
            None => Ok(None),
        }
    }

    async fn mutate_line(
        &self,
        key: StockKey,
        template: Option<StockLine>,
        op: LineOp,
    ) -> AppResult<LineChange> {
        self.mutate_line_now(key, template, op)
    }

    async fn lines_for_product(&self, product_id: Uuid) -> AppResult<Vec<StockLine>> {
        Ok(self
            .snapshot_lines()?
            .into_iter()
            .filter(|l| l.product_id == product_id)
            .collect())
    }

    async fn active_lines(&self) -> AppResult<Vec<StockLine>> {
        Ok(self
            .snapshot_lines()?
            .into_iter()
            .filter(|l| l.is_active)
            .collect())
    }

    async fn movements(&self, key: StockKey) -> AppResult<Vec<StockMovement>> {
        let movements = self.movements.read().map_err(poisoned)?;
        Ok(movements
            .iter()
            .rev()
            .filter(|m| m.product_id == key.product_id && m.warehouse_id == key.warehouse_id)
            .cloned()
            .collect())
    }

    async fn movements_for_reference(&self, reference: Reference) -> AppResult<Vec<StockMovement>> {
        let movements = self.movements.read().map_err(poisoned)?;
        Ok(movements
            .iter()
            .filter(|m| m.reference == Some(reference))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl OrderStore for InMemoryStore {
    async fn insert_order(&self, order: &PurchaseOrder, items: &[PurchaseOrderItem]) -> AppResult<()> {
        let mut table = self.orders.write().map_err(poisoned)?;
        if table.numbers.contains_key(&order.order_number) {
            return Err(AppError::ConcurrencyConflict(format!(
                "duplicate order number {}",
                order.order_number
            )));
        }
        table.numbers.insert(order.order_number.clone(), order.id);
        table.records.insert(
            order.id,
            Arc::new(Mutex::new(OrderRecord {
                order: order.clone(),
                items: items.to_vec(),
            })),
        );
        Ok(())
    }

    async fn order_numbers_on(&self, date: NaiveDate) -> AppResult<Vec<String>> {
        let table = self.orders.read().map_err(poisoned)?;
        Ok(table
            .numbers
            .keys()
            .filter(|n| parse_order_sequence(n, date).is_some())
            .cloned()
            .collect())
    }

    async fn get_order(&self, id: Uuid) -> AppResult<Option<OrderWithItems>> {
        let cell = self.orders.read().map_err(poisoned)?.records.get(&id).cloned();
        match cell {
            Some(cell) => Ok(Some(cell.lock().map_err(poisoned)?.snapshot())),
            None => Ok(None),
        }
    }

    async fn mutate_order(&self, id: Uuid, op: OrderOp) -> AppResult<OrderWithItems> {
        let cell = self.order_cell(id)?;
        let mut record = cell.lock().map_err(poisoned)?;
        let mut order = record.order.clone();
        op(&mut order, &record.items)?;
        record.order = order;
        Ok(record.snapshot())
    }

    async fn mutate_items(&self, order_id: Uuid, op: ItemsOp) -> AppResult<OrderWithItems> {
        let cell = self.order_cell(order_id)?;
        let mut record = cell.lock().map_err(poisoned)?;
        let mut items = record.items.clone();
        let changed = op(&record.order, &mut items)?;
        match items.iter_mut().find(|i| i.id == changed.id) {
            Some(existing) => *existing = changed,
            None => items.push(changed),
        }
        record.order.total_amount = order_total(&items);
        record.order.updated_at = Utc::now();
        record.items = items;
        Ok(record.snapshot())
    }

    async fn receive_item(
        &self,
        order_id: Uuid,
        item_id: Uuid,
        delta: i64,
        template: StockLine,
        line_op: LineOp,
    ) -> AppResult<ItemReceipt> {
        let cell = self.order_cell(order_id)?;
        let mut record = cell.lock().map_err(poisoned)?;
        if record.order.is_deleted {
            return Err(AppError::not_found("purchase order", order_id));
        }
        record
            .order
            .ensure_receivable()
            .map_err(|e| AppError::order_transition(order_id, e))?;

        let index = record
            .items
            .iter()
            .position(|i| i.id == item_id)
            .ok_or_else(|| AppError::not_found("purchase order item", item_id))?;
        let mut item = record.items[index].clone();
        item.receive(delta)
            .map_err(|e| AppError::from_receipt(item_id, e))?;

        let key = StockKey::new(item.product_id, record.order.warehouse_id);
        let change = self.mutate_line_now(key, Some(template), line_op)?;

        record.items[index] = item.clone();
        record.order.updated_at = Utc::now();
        Ok(ItemReceipt {
            item,
            line: change.line,
            movement: change.movement,
        })
    }
}

#[async_trait]
impl AlertStore for InMemoryStore {
    async fn insert_rule(&self, rule: &AlertRule) -> AppResult<()> {
        self.rules
            .write()
            .map_err(poisoned)?
            .insert(rule.id, rule.clone());
        Ok(())
    }

    async fn get_rule(&self, id: Uuid) -> AppResult<Option<AlertRule>> {
        Ok(self.rules.read().map_err(poisoned)?.get(&id).cloned())
    }

    async fn set_rule_active(&self, id: Uuid, active: bool) -> AppResult<AlertRule> {
        let mut rules = self.rules.write().map_err(poisoned)?;
        let rule = rules
            .get_mut(&id)
            .ok_or_else(|| AppError::not_found("alert rule", id))?;
        rule.is_active = active;
        Ok(rule.clone())
    }

    async fn active_rules(&self) -> AppResult<Vec<AlertRule>> {
        let mut rules: Vec<_> = self
            .rules
            .read()
            .map_err(poisoned)?
            .values()
            .filter(|r| r.is_active)
            .cloned()
            .collect();
        rules.sort_by_key(|r| (r.created_at, r.id));
        Ok(rules)
    }

    async fn candidate_lines(&self, scope: RuleScope) -> AppResult<Vec<AlertCandidate>> {
        let lines = self.snapshot_lines()?;
        let products = self.products.read().map_err(poisoned)?;
        let warehouses = self.warehouses.read().map_err(poisoned)?;

        let mut candidates = Vec::new();
        for line in lines.into_iter().filter(|l| l.is_active) {
            let Some(product) = products.get(&line.product_id).filter(|p| p.is_active) else {
                continue;
            };
            let Some(warehouse) = warehouses.get(&line.warehouse_id) else {
                continue;
            };
            if !scope.covers(line.product_id, Some(product.category_id), line.warehouse_id) {
                continue;
            }
            candidates.push(AlertCandidate {
                product_name: product.name.clone(),
                category_id: Some(product.category_id),
                warehouse_name: warehouse.name.clone(),
                line,
            });
        }
        Ok(candidates)
    }

    async fn create_alert_if_absent(
        &self,
        alert: &StockAlert,
        notifications: &[AlertNotification],
    ) -> AppResult<Option<StockAlert>> {
        let mut alerts = self.alerts.lock().map_err(poisoned)?;
        let key = alert.key();
        if alerts.iter().any(|a| !a.is_resolved && a.key() == key) {
            return Ok(None);
        }
        if !notifications.is_empty() {
            if self.notification_writes_fail.load(Ordering::SeqCst) {
                return Err(AppError::Internal(format!(
                    "notification write failed for alert {}",
                    alert.id
                )));
            }
            self.notifications
                .lock()
                .map_err(poisoned)?
                .extend_from_slice(notifications);
        }
        alerts.push(alert.clone());
        Ok(Some(alert.clone()))
    }

    async fn find_unresolved(&self, key: AlertKey) -> AppResult<Option<StockAlert>> {
        let alerts = self.alerts.lock().map_err(poisoned)?;
        Ok(alerts
            .iter()
            .find(|a| !a.is_resolved && a.key() == key)
            .cloned())
    }

    async fn get_alert(&self, id: Uuid) -> AppResult<Option<StockAlert>> {
        let alerts = self.alerts.lock().map_err(poisoned)?;
        Ok(alerts.iter().find(|a| a.id == id).cloned())
    }

    async fn mutate_alert(&self, id: Uuid, op: AlertOp) -> AppResult<(StockAlert, bool)> {
        let mut alerts = self.alerts.lock().map_err(poisoned)?;
        let index = alerts
            .iter()
            .position(|a| a.id == id)
            .ok_or_else(|| AppError::not_found("alert", id))?;

        let mut alert = alerts[index].clone();
        if !op(&mut alert) {
            return Ok((alert, false));
        }
        let key = alert.key();
        if !alert.is_resolved
            && alerts
                .iter()
                .any(|a| a.id != id && !a.is_resolved && a.key() == key)
        {
            return Err(AppError::ConcurrencyConflict(format!(
                "an unresolved {} alert already exists for {}",
                key.kind,
                key.stock_key()
            )));
        }
        alerts[index] = alert.clone();
        Ok((alert, true))
    }

    async fn list_alerts(&self, filter: &AlertFilter) -> AppResult<Vec<StockAlert>> {
        let alerts = self.alerts.lock().map_err(poisoned)?;
        let mut matching: Vec<_> = alerts.iter().filter(|a| filter.matches(a)).cloned().collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matching)
    }
}

#[async_trait]
impl NotificationStore for InMemoryStore {
    async fn get_notification(&self, id: Uuid) -> AppResult<Option<AlertNotification>> {
        let notifications = self.notifications.lock().map_err(poisoned)?;
        Ok(notifications.iter().find(|n| n.id == id).cloned())
    }

    async fn mutate_notification(&self, id: Uuid, op: NotificationOp) -> AppResult<AlertNotification> {
        let mut notifications = self.notifications.lock().map_err(poisoned)?;
        let notification = notifications
            .iter_mut()
            .find(|n| n.id == id)
            .ok_or_else(|| AppError::not_found("notification", id))?;
        let mut next = notification.clone();
        op(&mut next)?;
        *notification = next.clone();
        Ok(next)
    }

    async fn pending_notifications(&self, limit: i64) -> AppResult<Vec<AlertNotification>> {
        let notifications = self.notifications.lock().map_err(poisoned)?;
        Ok(notifications
            .iter()
            .filter(|n| n.status == DeliveryStatus::Pending)
            .take(usize::try_from(limit).unwrap_or(0))
            .cloned()
            .collect())
    }

    async fn notifications_for_alert(&self, alert_id: Uuid) -> AppResult<Vec<AlertNotification>> {
        let notifications = self.notifications.lock().map_err(poisoned)?;
        Ok(notifications
            .iter()
            .filter(|n| n.alert_id == alert_id)
            .cloned()
            .collect())
    }
}
