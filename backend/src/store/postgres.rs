//! PostgreSQL store
//!
//! Every trait method that writes more than one row runs in one transaction.
//! Rows that a mutation reads and then rewrites are taken with
//! `SELECT ... FOR UPDATE`, always in the order purchase order, order item,
//! stock line.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use shared::{
    order_total, AlertCandidate, AlertFilter, AlertKey, AlertNotification, AlertRule, Category,
    DeliveryStatus, MovementKind, NotificationChannel, OrderStatus, OrderWithItems, Product,
    PurchaseOrder, PurchaseOrderItem, Reference, ReferenceKind, RuleKind, RuleScope, Severity,
    StockAlert, StockKey, StockLine, StockMovement, Warehouse,
};
use sqlx::{FromRow, PgConnection, PgPool};
use uuid::Uuid;

use super::{
    AlertOp, AlertStore, CatalogStore, ItemReceipt, ItemsOp, LineChange, LineOp,
    NotificationOp, NotificationStore, OrderOp, OrderStore, StockStore,
};
use crate::error::{AppError, AppResult};

/// Store backed by a PostgreSQL pool
#[derive(Clone)]
pub struct PgStore {
    db: PgPool,
}

impl PgStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

fn decode<T>(value: Option<T>, column: &str, raw: &str) -> AppResult<T> {
    value.ok_or_else(|| AppError::Internal(format!("unknown {column} value '{raw}' in database")))
}

// ============================================================================
// Row types
// ============================================================================

#[derive(Debug, FromRow)]
struct ProductRow {
    id: Uuid,
    sku: String,
    name: String,
    category_id: Uuid,
    unit_price: Decimal,
    is_active: bool,
    created_at: DateTime<Utc>,
}

impl From<ProductRow> for Product {
    fn from(row: ProductRow) -> Self {
        Product {
            id: row.id,
            sku: row.sku,
            name: row.name,
            category_id: row.category_id,
            unit_price: row.unit_price,
            is_active: row.is_active,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct WarehouseRow {
    id: Uuid,
    name: String,
    is_active: bool,
    created_at: DateTime<Utc>,
}

impl From<WarehouseRow> for Warehouse {
    fn from(row: WarehouseRow) -> Self {
        Warehouse {
            id: row.id,
            name: row.name,
            is_active: row.is_active,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct StockLineRow {
    id: Uuid,
    product_id: Uuid,
    warehouse_id: Uuid,
    quantity: i64,
    reserved_quantity: i64,
    reorder_point: i64,
    max_stock_level: i64,
    is_active: bool,
    last_updated: DateTime<Utc>,
}

impl From<StockLineRow> for StockLine {
    fn from(row: StockLineRow) -> Self {
        StockLine {
            id: row.id,
            product_id: row.product_id,
            warehouse_id: row.warehouse_id,
            quantity: row.quantity,
            reserved_quantity: row.reserved_quantity,
            reorder_point: row.reorder_point,
            max_stock_level: row.max_stock_level,
            is_active: row.is_active,
            last_updated: row.last_updated,
        }
    }
}

#[derive(Debug, FromRow)]
struct MovementRow {
    id: Uuid,
    product_id: Uuid,
    warehouse_id: Uuid,
    kind: String,
    quantity: i64,
    reference_kind: Option<String>,
    reference_id: Option<Uuid>,
    note: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<MovementRow> for StockMovement {
    type Error = AppError;

    fn try_from(row: MovementRow) -> AppResult<Self> {
        let reference = match (row.reference_kind, row.reference_id) {
            (Some(kind), Some(id)) => Some(Reference::new(
                decode(ReferenceKind::from_str(&kind), "reference_kind", &kind)?,
                id,
            )),
            _ => None,
        };
        Ok(StockMovement {
            id: row.id,
            product_id: row.product_id,
            warehouse_id: row.warehouse_id,
            kind: decode(MovementKind::from_str(&row.kind), "movement kind", &row.kind)?,
            quantity: row.quantity,
            reference,
            note: row.note,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct OrderRow {
    id: Uuid,
    order_number: String,
    supplier_id: Uuid,
    warehouse_id: Uuid,
    status: String,
    order_date: NaiveDate,
    expected_date: Option<NaiveDate>,
    received_date: Option<NaiveDate>,
    total_amount: Decimal,
    notes: String,
    approved_by: Option<Uuid>,
    approved_at: Option<DateTime<Utc>>,
    is_deleted: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<OrderRow> for PurchaseOrder {
    type Error = AppError;

    fn try_from(row: OrderRow) -> AppResult<Self> {
        Ok(PurchaseOrder {
            id: row.id,
            order_number: row.order_number,
            supplier_id: row.supplier_id,
            warehouse_id: row.warehouse_id,
            status: decode(OrderStatus::from_str(&row.status), "order status", &row.status)?,
            order_date: row.order_date,
            expected_date: row.expected_date,
            received_date: row.received_date,
            total_amount: row.total_amount,
            notes: row.notes,
            approved_by: row.approved_by,
            approved_at: row.approved_at,
            is_deleted: row.is_deleted,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct OrderItemRow {
    id: Uuid,
    order_id: Uuid,
    product_id: Uuid,
    quantity_ordered: i64,
    quantity_received: i64,
    unit_price: Decimal,
    notes: String,
}

impl From<OrderItemRow> for PurchaseOrderItem {
    fn from(row: OrderItemRow) -> Self {
        PurchaseOrderItem {
            id: row.id,
            order_id: row.order_id,
            product_id: row.product_id,
            quantity_ordered: row.quantity_ordered,
            quantity_received: row.quantity_received,
            unit_price: row.unit_price,
            notes: row.notes,
        }
    }
}

#[derive(Debug, FromRow)]
struct RuleRow {
    id: Uuid,
    name: String,
    description: String,
    kind: String,
    scope_product_id: Option<Uuid>,
    scope_category_id: Option<Uuid>,
    scope_warehouse_id: Option<Uuid>,
    min_threshold: i64,
    max_threshold: i64,
    severity: String,
    is_active: bool,
    notify_email: bool,
    notify_dashboard: bool,
    auto_resolve: bool,
    created_at: DateTime<Utc>,
}

impl TryFrom<RuleRow> for AlertRule {
    type Error = AppError;

    fn try_from(row: RuleRow) -> AppResult<Self> {
        Ok(AlertRule {
            id: row.id,
            name: row.name,
            description: row.description,
            kind: decode(RuleKind::from_str(&row.kind), "rule kind", &row.kind)?,
            scope: RuleScope::from_columns(
                row.scope_product_id,
                row.scope_category_id,
                row.scope_warehouse_id,
            ),
            min_threshold: row.min_threshold,
            max_threshold: row.max_threshold,
            severity: decode(Severity::from_str(&row.severity), "severity", &row.severity)?,
            is_active: row.is_active,
            notify_email: row.notify_email,
            notify_dashboard: row.notify_dashboard,
            auto_resolve: row.auto_resolve,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct CandidateRow {
    #[sqlx(flatten)]
    line: StockLineRow,
    product_name: String,
    category_id: Uuid,
    warehouse_name: String,
}

#[derive(Debug, FromRow)]
struct AlertRow {
    id: Uuid,
    product_id: Uuid,
    warehouse_id: Uuid,
    alert_kind: String,
    severity: String,
    message: String,
    threshold_value: i64,
    current_value: i64,
    is_resolved: bool,
    resolved_by: Option<Uuid>,
    resolved_at: Option<DateTime<Utc>>,
    resolution_notes: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<AlertRow> for StockAlert {
    type Error = AppError;

    fn try_from(row: AlertRow) -> AppResult<Self> {
        Ok(StockAlert {
            id: row.id,
            product_id: row.product_id,
            warehouse_id: row.warehouse_id,
            kind: decode(RuleKind::from_str(&row.alert_kind), "alert kind", &row.alert_kind)?,
            severity: decode(Severity::from_str(&row.severity), "severity", &row.severity)?,
            message: row.message,
            threshold_value: row.threshold_value,
            current_value: row.current_value,
            is_resolved: row.is_resolved,
            resolved_by: row.resolved_by,
            resolved_at: row.resolved_at,
            resolution_notes: row.resolution_notes,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct NotificationRow {
    id: Uuid,
    alert_id: Uuid,
    channel: String,
    status: String,
    recipient: String,
    subject: String,
    message: String,
    sent_at: Option<DateTime<Utc>>,
    error_message: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<NotificationRow> for AlertNotification {
    type Error = AppError;

    fn try_from(row: NotificationRow) -> AppResult<Self> {
        Ok(AlertNotification {
            id: row.id,
            alert_id: row.alert_id,
            channel: decode(NotificationChannel::from_str(&row.channel), "channel", &row.channel)?,
            status: decode(DeliveryStatus::from_str(&row.status), "delivery status", &row.status)?,
            recipient: row.recipient,
            subject: row.subject,
            message: row.message,
            sent_at: row.sent_at,
            error_message: row.error_message,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn collect<R, T>(rows: Vec<R>) -> AppResult<Vec<T>>
where
    T: TryFrom<R, Error = AppError>,
{
    rows.into_iter().map(T::try_from).collect()
}

// ============================================================================
// Shared transactional steps
// ============================================================================

async fn mutate_line_in(
    conn: &mut PgConnection,
    key: StockKey,
    template: Option<StockLine>,
    op: LineOp,
) -> AppResult<LineChange> {
    if let Some(template) = &template {
        sqlx::query(
            r#"
            INSERT INTO stock_lines (id, product_id, warehouse_id, quantity, reserved_quantity,
                                     reorder_point, max_stock_level, is_active, last_updated)
            VALUES ($1, $2, $3, 0, 0, $4, $5, TRUE, NOW())
            ON CONFLICT (product_id, warehouse_id) DO NOTHING
            "#,
        )
        .bind(template.id)
        .bind(key.product_id)
        .bind(key.warehouse_id)
        .bind(template.reorder_point)
        .bind(template.max_stock_level)
        .execute(&mut *conn)
        .await?;
    }

    let mut line: StockLine = sqlx::query_as::<_, StockLineRow>(
        r#"
        SELECT id, product_id, warehouse_id, quantity, reserved_quantity,
               reorder_point, max_stock_level, is_active, last_updated
        FROM stock_lines
        WHERE product_id = $1 AND warehouse_id = $2
        FOR UPDATE
        "#,
    )
    .bind(key.product_id)
    .bind(key.warehouse_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| AppError::not_found("stock line", key))?
    .into();

    let movement = op(&mut line)?.map(|m| m.into_movement(key));

    sqlx::query(
        r#"
        UPDATE stock_lines
        SET quantity = $1, reserved_quantity = $2, reorder_point = $3,
            max_stock_level = $4, is_active = $5, last_updated = $6
        WHERE id = $7
        "#,
    )
    .bind(line.quantity)
    .bind(line.reserved_quantity)
    .bind(line.reorder_point)
    .bind(line.max_stock_level)
    .bind(line.is_active)
    .bind(line.last_updated)
    .bind(line.id)
    .execute(&mut *conn)
    .await?;

    if let Some(movement) = &movement {
        sqlx::query(
            r#"
            INSERT INTO stock_movements (id, product_id, warehouse_id, kind, quantity,
                                         reference_kind, reference_id, note, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(movement.id)
        .bind(movement.product_id)
        .bind(movement.warehouse_id)
        .bind(movement.kind.as_str())
        .bind(movement.quantity)
        .bind(movement.reference.map(|r| r.kind.as_str()))
        .bind(movement.reference.map(|r| r.id))
        .bind(&movement.note)
        .bind(movement.created_at)
        .execute(&mut *conn)
        .await?;
    }

    Ok(LineChange { line, movement })
}

async fn lock_order(conn: &mut PgConnection, id: Uuid) -> AppResult<PurchaseOrder> {
    sqlx::query_as::<_, OrderRow>(
        r#"
        SELECT id, order_number, supplier_id, warehouse_id, status, order_date, expected_date,
               received_date, total_amount, notes, approved_by, approved_at, is_deleted,
               created_at, updated_at
        FROM purchase_orders
        WHERE id = $1
        FOR UPDATE
        "#,
    )
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| AppError::not_found("purchase order", id))?
    .try_into()
}

async fn load_items(conn: &mut PgConnection, order_id: Uuid) -> AppResult<Vec<PurchaseOrderItem>> {
    let rows = sqlx::query_as::<_, OrderItemRow>(
        r#"
        SELECT id, order_id, product_id, quantity_ordered, quantity_received, unit_price, notes
        FROM purchase_order_items
        WHERE order_id = $1
        ORDER BY id
        "#,
    )
    .bind(order_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows.into_iter().map(Into::into).collect())
}

async fn write_order(conn: &mut PgConnection, order: &PurchaseOrder) -> AppResult<()> {
    sqlx::query(
        r#"
        UPDATE purchase_orders
        SET status = $1, expected_date = $2, received_date = $3, total_amount = $4, notes = $5,
            approved_by = $6, approved_at = $7, is_deleted = $8, updated_at = $9
        WHERE id = $10
        "#,
    )
    .bind(order.status.as_str())
    .bind(order.expected_date)
    .bind(order.received_date)
    .bind(order.total_amount)
    .bind(&order.notes)
    .bind(order.approved_by)
    .bind(order.approved_at)
    .bind(order.is_deleted)
    .bind(order.updated_at)
    .bind(order.id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn upsert_item(conn: &mut PgConnection, item: &PurchaseOrderItem) -> AppResult<()> {
    sqlx::query(
        r#"
        INSERT INTO purchase_order_items (id, order_id, product_id, quantity_ordered,
                                          quantity_received, unit_price, notes)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (id) DO UPDATE
        SET quantity_ordered = EXCLUDED.quantity_ordered,
            quantity_received = EXCLUDED.quantity_received,
            unit_price = EXCLUDED.unit_price,
            notes = EXCLUDED.notes
        "#,
    )
    .bind(item.id)
    .bind(item.order_id)
    .bind(item.product_id)
    .bind(item.quantity_ordered)
    .bind(item.quantity_received)
    .bind(item.unit_price)
    .bind(&item.notes)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn insert_notification(conn: &mut PgConnection, n: &AlertNotification) -> AppResult<()> {
    sqlx::query(
        r#"
        INSERT INTO alert_notifications (id, alert_id, channel, status, recipient, subject,
                                         message, sent_at, error_message, created_at,
                                         updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        "#,
    )
    .bind(n.id)
    .bind(n.alert_id)
    .bind(n.channel.as_str())
    .bind(n.status.as_str())
    .bind(&n.recipient)
    .bind(&n.subject)
    .bind(&n.message)
    .bind(n.sent_at)
    .bind(&n.error_message)
    .bind(n.created_at)
    .bind(n.updated_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

// ============================================================================
// Catalog
// ============================================================================

#[async_trait]
impl CatalogStore for PgStore {
    async fn insert_category(&self, category: &Category) -> AppResult<()> {
        sqlx::query("INSERT INTO categories (id, name) VALUES ($1, $2)")
            .bind(category.id)
            .bind(&category.name)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    async fn insert_product(&self, product: &Product) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO products (id, sku, name, category_id, unit_price, is_active, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(product.id)
        .bind(&product.sku)
        .bind(&product.name)
        .bind(product.category_id)
        .bind(product.unit_price)
        .bind(product.is_active)
        .bind(product.created_at)
        .execute(&self.db)
        .await
        .map_err(|e| AppError::from_unique_violation(e, "product sku"))?;
        Ok(())
    }

    async fn insert_warehouse(&self, warehouse: &Warehouse) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO warehouses (id, name, is_active, created_at) VALUES ($1, $2, $3, $4)",
        )
        .bind(warehouse.id)
        .bind(&warehouse.name)
        .bind(warehouse.is_active)
        .bind(warehouse.created_at)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn get_product(&self, id: Uuid) -> AppResult<Option<Product>> {
        let row = sqlx::query_as::<_, ProductRow>(
            r#"
            SELECT id, sku, name, category_id, unit_price, is_active, created_at
            FROM products
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn get_warehouse(&self, id: Uuid) -> AppResult<Option<Warehouse>> {
        let row = sqlx::query_as::<_, WarehouseRow>(
            "SELECT id, name, is_active, created_at FROM warehouses WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn set_product_active(&self, id: Uuid, active: bool) -> AppResult<()> {
        let result = sqlx::query("UPDATE products SET is_active = $1 WHERE id = $2")
            .bind(active)
            .bind(id)
            .execute(&self.db)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::not_found("product", id));
        }
        Ok(())
    }

    async fn set_warehouse_active(&self, id: Uuid, active: bool) -> AppResult<()> {
        let result = sqlx::query("UPDATE warehouses SET is_active = $1 WHERE id = $2")
            .bind(active)
            .bind(id)
            .execute(&self.db)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::not_found("warehouse", id));
        }
        Ok(())
    }
}

// ============================================================================
// Stock lines and movements
// ============================================================================

#[async_trait]
impl StockStore for PgStore {
    async fn get_line(&self, key: StockKey) -> AppResult<Option<StockLine>> {
        let row = sqlx::query_as::<_, StockLineRow>(
            r#"
            SELECT id, product_id, warehouse_id, quantity, reserved_quantity,
                   reorder_point, max_stock_level, is_active, last_updated
            FROM stock_lines
            WHERE product_id = $1 AND warehouse_id = $2
            "#,
        )
        .bind(key.product_id)
        .bind(key.warehouse_id)
        .fetch_optional(&self.db)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn mutate_line(
        &self,
        key: StockKey,
        template: Option<StockLine>,
        op: LineOp,
    ) -> AppResult<LineChange> {
        let mut tx = self.db.begin().await?;
        let change = mutate_line_in(&mut tx, key, template, op).await?;
        tx.commit().await?;
        Ok(change)
    }

    async fn lines_for_product(&self, product_id: Uuid) -> AppResult<Vec<StockLine>> {
        let rows = sqlx::query_as::<_, StockLineRow>(
            r#"
            SELECT id, product_id, warehouse_id, quantity, reserved_quantity,
                   reorder_point, max_stock_level, is_active, last_updated
            FROM stock_lines
            WHERE product_id = $1
            ORDER BY warehouse_id
            "#,
        )
        .bind(product_id)
        .fetch_all(&self.db)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn active_lines(&self) -> AppResult<Vec<StockLine>> {
        let rows = sqlx::query_as::<_, StockLineRow>(
            r#"
            SELECT id, product_id, warehouse_id, quantity, reserved_quantity,
                   reorder_point, max_stock_level, is_active, last_updated
            FROM stock_lines
            WHERE is_active
            ORDER BY product_id, warehouse_id
            "#,
        )
        .fetch_all(&self.db)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn movements(&self, key: StockKey) -> AppResult<Vec<StockMovement>> {
        let rows = sqlx::query_as::<_, MovementRow>(
            r#"
            SELECT id, product_id, warehouse_id, kind, quantity, reference_kind, reference_id,
                   note, created_at
            FROM stock_movements
            WHERE product_id = $1 AND warehouse_id = $2
            ORDER BY created_at DESC
            "#,
        )
        .bind(key.product_id)
        .bind(key.warehouse_id)
        .fetch_all(&self.db)
        .await?;
        collect(rows)
    }

    async fn movements_for_reference(&self, reference: Reference) -> AppResult<Vec<StockMovement>> {
        let rows = sqlx::query_as::<_, MovementRow>(
            r#"
            SELECT id, product_id, warehouse_id, kind, quantity, reference_kind, reference_id,
                   note, created_at
            FROM stock_movements
            WHERE reference_kind = $1 AND reference_id = $2
            ORDER BY created_at
            "#,
        )
        .bind(reference.kind.as_str())
        .bind(reference.id)
        .fetch_all(&self.db)
        .await?;
        collect(rows)
    }
}

// ============================================================================
// Purchase orders
// ============================================================================

#[async_trait]
impl OrderStore for PgStore {
    async fn insert_order(&self, order: &PurchaseOrder, items: &[PurchaseOrderItem]) -> AppResult<()> {
        let mut tx = self.db.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO purchase_orders (id, order_number, supplier_id, warehouse_id, status,
                                         order_date, expected_date, received_date, total_amount,
                                         notes, approved_by, approved_at, is_deleted,
                                         created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(order.id)
        .bind(&order.order_number)
        .bind(order.supplier_id)
        .bind(order.warehouse_id)
        .bind(order.status.as_str())
        .bind(order.order_date)
        .bind(order.expected_date)
        .bind(order.received_date)
        .bind(order.total_amount)
        .bind(&order.notes)
        .bind(order.approved_by)
        .bind(order.approved_at)
        .bind(order.is_deleted)
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::from_unique_violation(e, "order number"))?;

        for item in items {
            upsert_item(&mut tx, item).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn order_numbers_on(&self, date: NaiveDate) -> AppResult<Vec<String>> {
        let pattern = format!("PO-{}-%", date.format("%Y%m%d"));
        let numbers = sqlx::query_scalar::<_, String>(
            "SELECT order_number FROM purchase_orders WHERE order_number LIKE $1",
        )
        .bind(pattern)
        .fetch_all(&self.db)
        .await?;
        Ok(numbers)
    }

    async fn get_order(&self, id: Uuid) -> AppResult<Option<OrderWithItems>> {
        let mut conn = self.db.acquire().await?;
        let row = sqlx::query_as::<_, OrderRow>(
            r#"
            SELECT id, order_number, supplier_id, warehouse_id, status, order_date, expected_date,
                   received_date, total_amount, notes, approved_by, approved_at, is_deleted,
                   created_at, updated_at
            FROM purchase_orders
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let order = PurchaseOrder::try_from(row)?;
        let items = load_items(&mut conn, id).await?;
        Ok(Some(OrderWithItems { order, items }))
    }

    async fn mutate_order(&self, id: Uuid, op: OrderOp) -> AppResult<OrderWithItems> {
        let mut tx = self.db.begin().await?;
        let mut order = lock_order(&mut tx, id).await?;
        let items = load_items(&mut tx, id).await?;

        op(&mut order, &items)?;
        write_order(&mut tx, &order).await?;

        tx.commit().await?;
        Ok(OrderWithItems { order, items })
    }

    async fn mutate_items(&self, order_id: Uuid, op: ItemsOp) -> AppResult<OrderWithItems> {
        let mut tx = self.db.begin().await?;
        let mut order = lock_order(&mut tx, order_id).await?;
        let mut items = load_items(&mut tx, order_id).await?;

        let changed = op(&order, &mut items)?;
        upsert_item(&mut tx, &changed).await?;
        match items.iter_mut().find(|i| i.id == changed.id) {
            Some(existing) => *existing = changed,
            None => items.push(changed),
        }

        order.total_amount = order_total(&items);
        order.updated_at = Utc::now();
        write_order(&mut tx, &order).await?;

        tx.commit().await?;
        Ok(OrderWithItems { order, items })
    }

    async fn receive_item(
        &self,
        order_id: Uuid,
        item_id: Uuid,
        delta: i64,
        template: StockLine,
        line_op: LineOp,
    ) -> AppResult<ItemReceipt> {
        let mut tx = self.db.begin().await?;

        let mut order = lock_order(&mut tx, order_id).await?;
        if order.is_deleted {
            return Err(AppError::not_found("purchase order", order_id));
        }
        order
            .ensure_receivable()
            .map_err(|e| AppError::order_transition(order_id, e))?;

        let mut item: PurchaseOrderItem = sqlx::query_as::<_, OrderItemRow>(
            r#"
            SELECT id, order_id, product_id, quantity_ordered, quantity_received, unit_price, notes
            FROM purchase_order_items
            WHERE id = $1 AND order_id = $2
            FOR UPDATE
            "#,
        )
        .bind(item_id)
        .bind(order_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::not_found("purchase order item", item_id))?
        .into();

        item.receive(delta)
            .map_err(|e| AppError::from_receipt(item_id, e))?;

        let key = StockKey::new(item.product_id, order.warehouse_id);
        let change = mutate_line_in(&mut tx, key, Some(template), line_op).await?;

        sqlx::query("UPDATE purchase_order_items SET quantity_received = $1 WHERE id = $2")
            .bind(item.quantity_received)
            .bind(item.id)
            .execute(&mut *tx)
            .await?;

        order.updated_at = Utc::now();
        write_order(&mut tx, &order).await?;

        tx.commit().await?;
        Ok(ItemReceipt {
            item,
            line: change.line,
            movement: change.movement,
        })
    }
}

// ============================================================================
// Alert rules and alerts
// ============================================================================

#[async_trait]
impl AlertStore for PgStore {
    async fn insert_rule(&self, rule: &AlertRule) -> AppResult<()> {
        let (product, category, warehouse) = rule.scope.to_columns();
        sqlx::query(
            r#"
            INSERT INTO alert_rules (id, name, description, kind, scope_product_id,
                                     scope_category_id, scope_warehouse_id, min_threshold,
                                     max_threshold, severity, is_active, notify_email,
                                     notify_dashboard, auto_resolve, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(rule.id)
        .bind(&rule.name)
        .bind(&rule.description)
        .bind(rule.kind.as_str())
        .bind(product)
        .bind(category)
        .bind(warehouse)
        .bind(rule.min_threshold)
        .bind(rule.max_threshold)
        .bind(rule.severity.as_str())
        .bind(rule.is_active)
        .bind(rule.notify_email)
        .bind(rule.notify_dashboard)
        .bind(rule.auto_resolve)
        .bind(rule.created_at)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn get_rule(&self, id: Uuid) -> AppResult<Option<AlertRule>> {
        let row = sqlx::query_as::<_, RuleRow>(
            r#"
            SELECT id, name, description, kind, scope_product_id, scope_category_id,
                   scope_warehouse_id, min_threshold, max_threshold, severity, is_active,
                   notify_email, notify_dashboard, auto_resolve, created_at
            FROM alert_rules
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        row.map(AlertRule::try_from).transpose()
    }

    async fn set_rule_active(&self, id: Uuid, active: bool) -> AppResult<AlertRule> {
        sqlx::query_as::<_, RuleRow>(
            r#"
            UPDATE alert_rules
            SET is_active = $1
            WHERE id = $2
            RETURNING id, name, description, kind, scope_product_id, scope_category_id,
                      scope_warehouse_id, min_threshold, max_threshold, severity, is_active,
                      notify_email, notify_dashboard, auto_resolve, created_at
            "#,
        )
        .bind(active)
        .bind(id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::not_found("alert rule", id))?
        .try_into()
    }

    async fn active_rules(&self) -> AppResult<Vec<AlertRule>> {
        let rows = sqlx::query_as::<_, RuleRow>(
            r#"
            SELECT id, name, description, kind, scope_product_id, scope_category_id,
                   scope_warehouse_id, min_threshold, max_threshold, severity, is_active,
                   notify_email, notify_dashboard, auto_resolve, created_at
            FROM alert_rules
            WHERE is_active
            ORDER BY created_at, id
            "#,
        )
        .fetch_all(&self.db)
        .await?;
        collect(rows)
    }

    async fn candidate_lines(&self, scope: RuleScope) -> AppResult<Vec<AlertCandidate>> {
        let (product, category, warehouse) = scope.to_columns();
        let rows = sqlx::query_as::<_, CandidateRow>(
            r#"
            SELECT sl.id, sl.product_id, sl.warehouse_id, sl.quantity, sl.reserved_quantity,
                   sl.reorder_point, sl.max_stock_level, sl.is_active, sl.last_updated,
                   p.name AS product_name, p.category_id, w.name AS warehouse_name
            FROM stock_lines sl
            JOIN products p ON p.id = sl.product_id
            JOIN warehouses w ON w.id = sl.warehouse_id
            WHERE sl.is_active AND p.is_active
              AND ($1::uuid IS NULL OR sl.product_id = $1)
              AND ($2::uuid IS NULL OR p.category_id = $2)
              AND ($3::uuid IS NULL OR sl.warehouse_id = $3)
            ORDER BY sl.product_id, sl.warehouse_id
            "#,
        )
        .bind(product)
        .bind(category)
        .bind(warehouse)
        .fetch_all(&self.db)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| AlertCandidate {
                line: row.line.into(),
                product_name: row.product_name,
                category_id: Some(row.category_id),
                warehouse_name: row.warehouse_name,
            })
            .collect())
    }

    async fn create_alert_if_absent(
        &self,
        alert: &StockAlert,
        notifications: &[AlertNotification],
    ) -> AppResult<Option<StockAlert>> {
        let mut tx = self.db.begin().await?;
        let row = sqlx::query_as::<_, AlertRow>(
            r#"
            INSERT INTO stock_alerts (id, product_id, warehouse_id, alert_kind, severity, message,
                                      threshold_value, current_value, is_resolved, resolved_by,
                                      resolved_at, resolution_notes, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, FALSE, NULL, NULL, '', $9)
            ON CONFLICT (product_id, warehouse_id, alert_kind) WHERE NOT is_resolved
            DO NOTHING
            RETURNING id, product_id, warehouse_id, alert_kind, severity, message,
                      threshold_value, current_value, is_resolved, resolved_by, resolved_at,
                      resolution_notes, created_at
            "#,
        )
        .bind(alert.id)
        .bind(alert.product_id)
        .bind(alert.warehouse_id)
        .bind(alert.kind.as_str())
        .bind(alert.severity.as_str())
        .bind(&alert.message)
        .bind(alert.threshold_value)
        .bind(alert.current_value)
        .bind(alert.created_at)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let created = StockAlert::try_from(row)?;
        for n in notifications {
            insert_notification(&mut tx, n).await?;
        }
        tx.commit().await?;
        Ok(Some(created))
    }

    async fn find_unresolved(&self, key: AlertKey) -> AppResult<Option<StockAlert>> {
        let row = sqlx::query_as::<_, AlertRow>(
            r#"
            SELECT id, product_id, warehouse_id, alert_kind, severity, message, threshold_value,
                   current_value, is_resolved, resolved_by, resolved_at, resolution_notes,
                   created_at
            FROM stock_alerts
            WHERE product_id = $1 AND warehouse_id = $2 AND alert_kind = $3 AND NOT is_resolved
            "#,
        )
        .bind(key.product_id)
        .bind(key.warehouse_id)
        .bind(key.kind.as_str())
        .fetch_optional(&self.db)
        .await?;
        row.map(StockAlert::try_from).transpose()
    }

    async fn get_alert(&self, id: Uuid) -> AppResult<Option<StockAlert>> {
        let row = sqlx::query_as::<_, AlertRow>(
            r#"
            SELECT id, product_id, warehouse_id, alert_kind, severity, message, threshold_value,
                   current_value, is_resolved, resolved_by, resolved_at, resolution_notes,
                   created_at
            FROM stock_alerts
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        row.map(StockAlert::try_from).transpose()
    }

    async fn mutate_alert(&self, id: Uuid, op: AlertOp) -> AppResult<(StockAlert, bool)> {
        let mut tx = self.db.begin().await?;

        let mut alert: StockAlert = sqlx::query_as::<_, AlertRow>(
            r#"
            SELECT id, product_id, warehouse_id, alert_kind, severity, message, threshold_value,
                   current_value, is_resolved, resolved_by, resolved_at, resolution_notes,
                   created_at
            FROM stock_alerts
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::not_found("alert", id))?
        .try_into()?;

        if !op(&mut alert) {
            return Ok((alert, false));
        }

        sqlx::query(
            r#"
            UPDATE stock_alerts
            SET is_resolved = $1, resolved_by = $2, resolved_at = $3, resolution_notes = $4
            WHERE id = $5
            "#,
        )
        .bind(alert.is_resolved)
        .bind(alert.resolved_by)
        .bind(alert.resolved_at)
        .bind(&alert.resolution_notes)
        .bind(alert.id)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::from_unique_violation(e, "unresolved alert"))?;

        tx.commit().await?;
        Ok((alert, true))
    }

    async fn list_alerts(&self, filter: &AlertFilter) -> AppResult<Vec<StockAlert>> {
        let rows = sqlx::query_as::<_, AlertRow>(
            r#"
            SELECT id, product_id, warehouse_id, alert_kind, severity, message, threshold_value,
                   current_value, is_resolved, resolved_by, resolved_at, resolution_notes,
                   created_at
            FROM stock_alerts
            WHERE ($1::boolean IS NULL OR is_resolved = $1)
              AND ($2::text IS NULL OR alert_kind = $2)
              AND ($3::uuid IS NULL OR product_id = $3)
              AND ($4::uuid IS NULL OR warehouse_id = $4)
            ORDER BY created_at DESC
            "#,
        )
        .bind(filter.resolved)
        .bind(filter.kind.map(|k| k.as_str()))
        .bind(filter.product_id)
        .bind(filter.warehouse_id)
        .fetch_all(&self.db)
        .await?;
        collect(rows)
    }
}

// ============================================================================
// Notifications
// ============================================================================

#[async_trait]
impl NotificationStore for PgStore {
    async fn get_notification(&self, id: Uuid) -> AppResult<Option<AlertNotification>> {
        let row = sqlx::query_as::<_, NotificationRow>(
            r#"
            SELECT id, alert_id, channel, status, recipient, subject, message, sent_at,
                   error_message, created_at, updated_at
            FROM alert_notifications
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        row.map(AlertNotification::try_from).transpose()
    }

    async fn mutate_notification(&self, id: Uuid, op: NotificationOp) -> AppResult<AlertNotification> {
        let mut tx = self.db.begin().await?;

        let mut notification: AlertNotification = sqlx::query_as::<_, NotificationRow>(
            r#"
            SELECT id, alert_id, channel, status, recipient, subject, message, sent_at,
                   error_message, created_at, updated_at
            FROM alert_notifications
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::not_found("notification", id))?
        .try_into()?;

        op(&mut notification)?;

        sqlx::query(
            r#"
            UPDATE alert_notifications
            SET status = $1, sent_at = $2, error_message = $3, updated_at = $4
            WHERE id = $5
            "#,
        )
        .bind(notification.status.as_str())
        .bind(notification.sent_at)
        .bind(&notification.error_message)
        .bind(notification.updated_at)
        .bind(notification.id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(notification)
    }

    async fn pending_notifications(&self, limit: i64) -> AppResult<Vec<AlertNotification>> {
        let rows = sqlx::query_as::<_, NotificationRow>(
            r#"
            SELECT id, alert_id, channel, status, recipient, subject, message, sent_at,
                   error_message, created_at, updated_at
            FROM alert_notifications
            WHERE status = 'pending'
            ORDER BY created_at
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.db)
        .await?;
        collect(rows)
    }

    async fn notifications_for_alert(&self, alert_id: Uuid) -> AppResult<Vec<AlertNotification>> {
        let rows = sqlx::query_as::<_, NotificationRow>(
            r#"
            SELECT id, alert_id, channel, status, recipient, subject, message, sent_at,
                   error_message, created_at, updated_at
            FROM alert_notifications
            WHERE alert_id = $1
            ORDER BY created_at
            "#,
        )
        .bind(alert_id)
        .fetch_all(&self.db)
        .await?;
        collect(rows)
    }
}
