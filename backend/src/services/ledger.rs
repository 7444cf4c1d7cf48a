//! Stock ledger: the only path through which stock quantities change
//!
//! Every quantity change is a [`StockMovement`] appended in the same unit of
//! work as the [`StockLine`] update. Reservations and threshold settings
//! change a line without moving stock and are not logged as movements.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use shared::{
    validate_stock_thresholds, validate_transfer_endpoints, MovementKind, NewMovement, Reference,
    ReorderSuggestion, StockKey, StockLevels, StockLine, StockMovement,
};
use uuid::Uuid;

use crate::config::LedgerConfig;
use crate::error::{AppError, AppResult};
use crate::store::{LineOp, Store};

/// Stock ledger service
#[derive(Clone)]
pub struct StockLedger {
    store: Arc<dyn Store>,
    defaults: LedgerConfig,
}

/// One quantity adjustment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdjustRequest {
    pub product_id: Uuid,
    pub warehouse_id: Uuid,
    /// Delta for `in`/`out`, absolute target for `adjustment`
    pub amount: i64,
    pub kind: MovementKind,
    pub reference: Option<Reference>,
    pub note: Option<String>,
}

impl AdjustRequest {
    pub fn new(product_id: Uuid, warehouse_id: Uuid, kind: MovementKind, amount: i64) -> Self {
        Self {
            product_id,
            warehouse_id,
            amount,
            kind,
            reference: None,
            note: None,
        }
    }

    pub fn with_reference(mut self, reference: Reference) -> Self {
        self.reference = Some(reference);
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    pub fn key(&self) -> StockKey {
        StockKey::new(self.product_id, self.warehouse_id)
    }
}

/// Outcome of a bulk adjustment; one failure never aborts the others
#[derive(Debug, Default)]
pub struct BulkAdjustReport {
    pub succeeded: usize,
    /// Index into the request list and the error it produced
    pub failures: Vec<(usize, AppError)>,
}

/// Both sides of a completed transfer
#[derive(Debug, Clone)]
pub struct TransferOutcome {
    pub transfer_id: Uuid,
    pub source: StockLine,
    pub target: StockLine,
}

fn ensure_active(line: &StockLine) -> AppResult<()> {
    if line.is_active {
        Ok(())
    } else {
        Err(AppError::not_found("stock line", line.key()))
    }
}

/// Line op applying one quantity movement
pub(crate) fn movement_op(
    kind: MovementKind,
    amount: i64,
    reference: Option<Reference>,
    note: Option<String>,
) -> LineOp {
    Box::new(move |line: &mut StockLine| {
        ensure_active(line)?;
        let key = line.key();
        let old = line.quantity;
        let quantity = line
            .apply_movement(kind, amount)
            .map_err(|e| AppError::from_stock_rule(key, e))?;
        Ok(quantity.map(|quantity| NewMovement {
            kind,
            quantity,
            reference,
            note: note.unwrap_or_else(|| format!("Quantity adjusted from {} to {}", old, line.quantity)),
        }))
    })
}

impl StockLedger {
    pub fn new(store: Arc<dyn Store>, defaults: LedgerConfig) -> Self {
        Self { store, defaults }
    }

    /// Empty line used when a movement lands on a pair for the first time
    pub(crate) fn template(&self, key: StockKey) -> StockLine {
        StockLine::empty(
            key,
            self.defaults.default_reorder_point,
            self.defaults.default_max_stock_level,
        )
    }

    /// Product and warehouse must exist and be active
    async fn ensure_references(&self, key: StockKey) -> AppResult<()> {
        self.store
            .get_product(key.product_id)
            .await?
            .filter(|p| p.is_active)
            .ok_or_else(|| AppError::not_found("product", key.product_id))?;
        self.store
            .get_warehouse(key.warehouse_id)
            .await?
            .filter(|w| w.is_active)
            .ok_or_else(|| AppError::not_found("warehouse", key.warehouse_id))?;
        Ok(())
    }

    /// Apply one quantity movement to a stock line
    pub async fn adjust(&self, request: AdjustRequest) -> AppResult<StockLine> {
        let key = request.key();
        if request.kind.is_transfer_leg() {
            return Err(AppError::validation(
                "transfer movements can only be created by a transfer",
            ));
        }
        self.ensure_references(key).await?;

        // Outbound movements never create a line
        let template = match request.kind {
            MovementKind::Out => None,
            _ => Some(self.template(key)),
        };
        let op = movement_op(request.kind, request.amount, request.reference, request.note);

        match self.store.mutate_line(key, template, op).await {
            Ok(change) => {
                tracing::info!(
                    product_id = %key.product_id,
                    warehouse_id = %key.warehouse_id,
                    kind = request.kind.as_str(),
                    amount = request.amount,
                    quantity = change.line.quantity,
                    "stock adjusted"
                );
                Ok(change.line)
            }
            Err(e) => {
                tracing::warn!(
                    product_id = %key.product_id,
                    warehouse_id = %key.warehouse_id,
                    kind = request.kind.as_str(),
                    amount = request.amount,
                    error = %e,
                    "stock adjustment rejected"
                );
                Err(e)
            }
        }
    }

    /// Apply each adjustment on its own
    pub async fn bulk_adjust(&self, requests: Vec<AdjustRequest>) -> BulkAdjustReport {
        let mut report = BulkAdjustReport::default();
        for (index, request) in requests.into_iter().enumerate() {
            match self.adjust(request).await {
                Ok(_) => report.succeeded += 1,
                Err(e) => report.failures.push((index, e)),
            }
        }
        tracing::info!(
            succeeded = report.succeeded,
            failed = report.failures.len(),
            "bulk adjustment finished"
        );
        report
    }

    /// Set aside `amount` units of available stock
    pub async fn reserve(&self, product_id: Uuid, warehouse_id: Uuid, amount: i64) -> AppResult<StockLine> {
        let key = StockKey::new(product_id, warehouse_id);
        let op: LineOp = Box::new(move |line: &mut StockLine| {
            ensure_active(line)?;
            line.reserve(amount)
                .map_err(|e| AppError::from_stock_rule(key, e))?;
            Ok(None)
        });

        let change = self.store.mutate_line(key, None, op).await.map_err(|e| {
            tracing::warn!(product_id = %product_id, warehouse_id = %warehouse_id, amount, error = %e, "reservation rejected");
            e
        })?;
        tracing::info!(
            product_id = %product_id,
            warehouse_id = %warehouse_id,
            amount,
            reserved = change.line.reserved_quantity,
            "stock reserved"
        );
        Ok(change.line)
    }

    /// Return `amount` reserved units to available stock
    pub async fn release(&self, product_id: Uuid, warehouse_id: Uuid, amount: i64) -> AppResult<StockLine> {
        let key = StockKey::new(product_id, warehouse_id);
        let op: LineOp = Box::new(move |line: &mut StockLine| {
            ensure_active(line)?;
            line.release(amount)
                .map_err(|e| AppError::from_stock_rule(key, e))?;
            Ok(None)
        });

        let change = self.store.mutate_line(key, None, op).await.map_err(|e| {
            tracing::warn!(product_id = %product_id, warehouse_id = %warehouse_id, amount, error = %e, "release rejected");
            e
        })?;
        tracing::info!(
            product_id = %product_id,
            warehouse_id = %warehouse_id,
            amount,
            reserved = change.line.reserved_quantity,
            "reservation released"
        );
        Ok(change.line)
    }

    /// Move `amount` units of a product between warehouses.
    ///
    /// The source leg commits first. If the target leg then fails, the source
    /// leg is reversed before the error is returned; if that reversal fails
    /// too the result is [`AppError::CompensationFailed`].
    pub async fn transfer(
        &self,
        product_id: Uuid,
        source_warehouse: Uuid,
        target_warehouse: Uuid,
        amount: i64,
        note: Option<String>,
    ) -> AppResult<TransferOutcome> {
        validate_transfer_endpoints(source_warehouse, target_warehouse).map_err(AppError::validation)?;
        if amount <= 0 {
            return Err(AppError::InvalidAmount {
                amount,
                reason: "transfer amount must be positive",
            });
        }

        let source_key = StockKey::new(product_id, source_warehouse);
        let target_key = StockKey::new(product_id, target_warehouse);
        self.ensure_references(source_key).await?;
        self.ensure_references(target_key).await?;

        let transfer_id = Uuid::new_v4();
        let reference = Reference::transfer(transfer_id);
        let note = note.unwrap_or_else(|| {
            format!("Transfer from {} to {}", source_warehouse, target_warehouse)
        });

        let source = self
            .store
            .mutate_line(
                source_key,
                None,
                movement_op(MovementKind::TransferOut, amount, Some(reference), Some(note.clone())),
            )
            .await?;

        let target = self
            .store
            .mutate_line(
                target_key,
                Some(self.template(target_key)),
                movement_op(MovementKind::TransferIn, amount, Some(reference), Some(note)),
            )
            .await;

        match target {
            Ok(target) => {
                tracing::info!(
                    transfer_id = %transfer_id,
                    product_id = %product_id,
                    source_warehouse = %source_warehouse,
                    target_warehouse = %target_warehouse,
                    amount,
                    "stock transferred"
                );
                Ok(TransferOutcome {
                    transfer_id,
                    source: source.line,
                    target: target.line,
                })
            }
            Err(cause) => Err(self.compensate(transfer_id, source_key, target_warehouse, amount, cause).await),
        }
    }

    /// Put back stock taken from the source of a failed transfer
    async fn compensate(
        &self,
        transfer_id: Uuid,
        source_key: StockKey,
        target_warehouse: Uuid,
        amount: i64,
        cause: AppError,
    ) -> AppError {
        let note = format!("Rollback of failed transfer to {}", target_warehouse);
        // The source may have been deactivated meanwhile; the stock still goes back
        let op: LineOp = Box::new(move |line: &mut StockLine| {
            let key = line.key();
            let quantity = line
                .apply_movement(MovementKind::In, amount)
                .map_err(|e| AppError::from_stock_rule(key, e))?;
            Ok(quantity.map(|quantity| NewMovement {
                kind: MovementKind::In,
                quantity,
                reference: Some(Reference::rollback(transfer_id)),
                note,
            }))
        });

        match self.store.mutate_line(source_key, None, op).await {
            Ok(_) => {
                tracing::warn!(
                    transfer_id = %transfer_id,
                    product_id = %source_key.product_id,
                    source_warehouse = %source_key.warehouse_id,
                    amount,
                    error = %cause,
                    "transfer failed, source restored"
                );
                cause
            }
            Err(rollback) => {
                tracing::error!(
                    transfer_id = %transfer_id,
                    product_id = %source_key.product_id,
                    source_warehouse = %source_key.warehouse_id,
                    amount,
                    error = %cause,
                    rollback_error = %rollback,
                    "transfer compensation failed, stock unaccounted for"
                );
                AppError::CompensationFailed {
                    key: source_key,
                    amount,
                    cause: format!("{cause}; rollback: {rollback}"),
                }
            }
        }
    }

    /// Update reorder point and max stock level, creating the line if needed
    pub async fn configure_thresholds(
        &self,
        product_id: Uuid,
        warehouse_id: Uuid,
        reorder_point: i64,
        max_stock_level: i64,
    ) -> AppResult<StockLine> {
        validate_stock_thresholds(reorder_point, max_stock_level).map_err(AppError::validation)?;
        let key = StockKey::new(product_id, warehouse_id);
        self.ensure_references(key).await?;

        let op: LineOp = Box::new(move |line: &mut StockLine| {
            ensure_active(line)?;
            line.reorder_point = reorder_point;
            line.max_stock_level = max_stock_level;
            line.last_updated = chrono::Utc::now();
            Ok(None)
        });
        let change = self
            .store
            .mutate_line(key, Some(self.template(key)), op)
            .await?;

        tracing::info!(
            product_id = %product_id,
            warehouse_id = %warehouse_id,
            reorder_point,
            max_stock_level,
            "stock thresholds configured"
        );
        Ok(change.line)
    }

    /// Soft-delete a stock line
    pub async fn deactivate(&self, product_id: Uuid, warehouse_id: Uuid) -> AppResult<StockLine> {
        let key = StockKey::new(product_id, warehouse_id);
        let op: LineOp = Box::new(|line: &mut StockLine| {
            if line.is_active {
                line.is_active = false;
                line.last_updated = chrono::Utc::now();
            }
            Ok(None)
        });
        let change = self.store.mutate_line(key, None, op).await?;
        tracing::info!(product_id = %product_id, warehouse_id = %warehouse_id, "stock line deactivated");
        Ok(change.line)
    }

    pub async fn stock_line(&self, product_id: Uuid, warehouse_id: Uuid) -> AppResult<StockLine> {
        let key = StockKey::new(product_id, warehouse_id);
        self.store
            .get_line(key)
            .await?
            .ok_or_else(|| AppError::not_found("stock line", key))
    }

    /// Movement history of one line, newest first
    pub async fn movements(&self, product_id: Uuid, warehouse_id: Uuid) -> AppResult<Vec<StockMovement>> {
        self.store
            .movements(StockKey::new(product_id, warehouse_id))
            .await
    }

    pub async fn movements_for_reference(&self, reference: Reference) -> AppResult<Vec<StockMovement>> {
        self.store.movements_for_reference(reference).await
    }

    /// Totals of one product across its active lines
    pub async fn stock_levels(&self, product_id: Uuid) -> AppResult<StockLevels> {
        self.store
            .get_product(product_id)
            .await?
            .ok_or_else(|| AppError::not_found("product", product_id))?;
        let lines = self.store.lines_for_product(product_id).await?;
        Ok(StockLevels::from_lines(product_id, &lines))
    }

    /// Restocking hints for every active line at or below its reorder point,
    /// most urgent first
    pub async fn reorder_suggestions(&self) -> AppResult<Vec<ReorderSuggestion>> {
        let mut suggestions: Vec<_> = self
            .store
            .active_lines()
            .await?
            .iter()
            .filter_map(ReorderSuggestion::for_line)
            .collect();
        suggestions.sort_by_key(|s| (s.urgency, s.current_quantity));
        Ok(suggestions)
    }
}
