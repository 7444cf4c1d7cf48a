//! Purchase order lifecycle tests
//!
//! Service-level tests against the in-memory store for:
//! - Property 5: Order Completion (received status and every item fully received)
//! - Property 6: Partial Receipt Keeps The Order Open
//! - Property 7: Order Total Equals The Sum Of Item Totals
//! - Order number assignment under concurrent creation

mod common;

use chrono::{Duration, NaiveDate, Utc};
use common::Fixture;
use proptest::prelude::*;
use rust_decimal::Decimal;
use shared::{format_order_number, MovementKind, OrderStatus, Reference};
use stockflow_backend::services::{
    CreateOrderInput, NewOrderItem, ReceivedItem, UpdateItemInput,
};
use stockflow_backend::AppError;
use uuid::Uuid;

fn dollars(amount: i64) -> Decimal {
    Decimal::new(amount * 100, 2)
}

fn item(product_id: Uuid, quantity: i64, unit_price: Decimal) -> NewOrderItem {
    NewOrderItem {
        product_id,
        quantity_ordered: quantity,
        unit_price,
        notes: None,
    }
}

fn input(warehouse_id: Uuid, items: Vec<NewOrderItem>) -> CreateOrderInput {
    CreateOrderInput {
        supplier_id: Uuid::new_v4(),
        warehouse_id,
        order_date: None,
        expected_date: None,
        notes: None,
        items,
    }
}

/// Products `a` and `b` and a warehouse, with a draft order for
/// 10 x a @ $5 and 4 x b @ $25
struct OrderSetup {
    a: Uuid,
    b: Uuid,
    warehouse: Uuid,
    order_id: Uuid,
}

async fn draft(fx: &Fixture) -> OrderSetup {
    let a = fx.product("Shrink film").await.id;
    let b = fx.product("Forklift battery").await.id;
    let warehouse = fx.warehouse("Receiving").await.id;

    let order = fx
        .orders
        .create_order(input(
            warehouse,
            vec![item(a, 10, dollars(5)), item(b, 4, dollars(25))],
        ))
        .await
        .unwrap();

    OrderSetup {
        a,
        b,
        warehouse,
        order_id: order.order.id,
    }
}

async fn ordered(fx: &Fixture) -> OrderSetup {
    let setup = draft(fx).await;
    fx.orders.submit(setup.order_id).await.unwrap();
    fx.orders.approve(setup.order_id, Uuid::new_v4()).await.unwrap();
    fx.orders.mark_ordered(setup.order_id).await.unwrap();
    setup
}

async fn item_ids(fx: &Fixture, order_id: Uuid) -> (Uuid, Uuid) {
    let order = fx.orders.get_order(order_id).await.unwrap();
    (order.items[0].id, order.items[1].id)
}

// ============================================================================
// Creation
// ============================================================================

/// Scenario: 10 @ $5 and 4 @ $25 total $150
#[tokio::test]
async fn test_create_order_computes_total() {
    let fx = Fixture::new();
    let setup = draft(&fx).await;

    let order = fx.orders.get_order(setup.order_id).await.unwrap();
    assert_eq!(order.order.status, OrderStatus::Draft);
    assert_eq!(order.order.total_amount, dollars(150));
    assert_eq!(order.item_count(), 2);
    assert_eq!(order.total_quantity(), 14);
    assert_eq!(order.received_quantity(), 0);
    assert!(!order.is_complete());
}

#[tokio::test]
async fn test_order_numbers_are_sequential_per_day() {
    let fx = Fixture::new();
    let product = fx.product("Pallet").await.id;
    let warehouse = fx.warehouse("Main").await.id;
    let today = Utc::now().date_naive();

    for seq in 1..=3 {
        let order = fx
            .orders
            .create_order(input(warehouse, vec![item(product, 1, dollars(1))]))
            .await
            .unwrap();
        assert_eq!(order.order.order_number, format_order_number(today, seq));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_creation_yields_unique_numbers() {
    let fx = Fixture::new();
    let product = fx.product("Pallet").await.id;
    let warehouse = fx.warehouse("Main").await.id;

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let orders = fx.orders.clone();
            tokio::spawn(async move {
                orders
                    .create_order(input(warehouse, vec![item(product, 2, dollars(3))]))
                    .await
            })
        })
        .collect();

    let mut numbers = Vec::new();
    for handle in handles {
        numbers.push(handle.await.unwrap().unwrap().order.order_number);
    }
    numbers.sort();
    numbers.dedup();
    assert_eq!(numbers.len(), 4);
}

#[tokio::test]
async fn test_expected_date_before_order_date_is_rejected() {
    let fx = Fixture::new();
    let product = fx.product("Pallet").await.id;
    let warehouse = fx.warehouse("Main").await.id;
    let order_date = NaiveDate::from_ymd_opt(2024, 3, 10).unwrap();

    let mut request = input(warehouse, vec![item(product, 1, dollars(1))]);
    request.order_date = Some(order_date);
    request.expected_date = Some(order_date - Duration::days(1));

    let err = fx.orders.create_order(request).await.unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
}

#[tokio::test]
async fn test_unknown_product_or_bad_quantity_is_rejected() {
    let fx = Fixture::new();
    let product = fx.product("Pallet").await.id;
    let warehouse = fx.warehouse("Main").await.id;

    let err = fx
        .orders
        .create_order(input(warehouse, vec![item(Uuid::new_v4(), 1, dollars(1))]))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound { .. }));

    let err = fx
        .orders
        .create_order(input(warehouse, vec![item(product, 0, dollars(1))]))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
}

// ============================================================================
// Transitions
// ============================================================================

#[tokio::test]
async fn test_full_lifecycle_to_received() {
    let fx = Fixture::new();
    let setup = ordered(&fx).await;
    let (first, second) = item_ids(&fx, setup.order_id).await;
    let received_on = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();

    let outcome = fx
        .orders
        .receive(
            setup.order_id,
            vec![
                ReceivedItem { item_id: first, quantity: 10 },
                ReceivedItem { item_id: second, quantity: 4 },
            ],
            Some(received_on),
        )
        .await
        .unwrap();

    assert!(outcome.completed);
    assert_eq!(outcome.accepted(), 14);
    assert_eq!(outcome.rejected(), 0);
    assert_eq!(outcome.order.order.status, OrderStatus::Received);
    assert_eq!(outcome.order.order.received_date, Some(received_on));
    assert!(outcome.order.is_complete());
    assert_eq!(outcome.order.completion_percentage(), dollars(100));

    assert_eq!(fx.ledger.stock_line(setup.a, setup.warehouse).await.unwrap().quantity, 10);
    assert_eq!(fx.ledger.stock_line(setup.b, setup.warehouse).await.unwrap().quantity, 4);
    let movements = fx
        .ledger
        .movements_for_reference(Reference::purchase_order(setup.order_id))
        .await
        .unwrap();
    assert_eq!(movements.len(), 2);
    assert!(movements.iter().all(|m| m.kind == MovementKind::In));
}

#[tokio::test]
async fn test_approve_records_approver() {
    let fx = Fixture::new();
    let setup = draft(&fx).await;
    let approver = Uuid::new_v4();

    // Approval straight from draft is allowed
    let order = fx.orders.approve(setup.order_id, approver).await.unwrap();
    assert_eq!(order.order.status, OrderStatus::Approved);
    assert_eq!(order.order.approved_by, Some(approver));
    assert!(order.order.approved_at.is_some());
}

#[tokio::test]
async fn test_approving_received_order_is_invalid() {
    let fx = Fixture::new();
    let setup = ordered(&fx).await;
    let (first, second) = item_ids(&fx, setup.order_id).await;
    fx.orders
        .receive(
            setup.order_id,
            vec![
                ReceivedItem { item_id: first, quantity: 10 },
                ReceivedItem { item_id: second, quantity: 4 },
            ],
            None,
        )
        .await
        .unwrap();

    let err = fx
        .orders
        .approve(setup.order_id, Uuid::new_v4())
        .await
        .unwrap_err();
    match err {
        AppError::InvalidTransition { state, action, .. } => {
            assert_eq!(state, "received");
            assert_eq!(action, "approve");
        }
        other => panic!("expected InvalidTransition, got {other:?}"),
    }
}

#[tokio::test]
async fn test_mark_ordered_requires_approval() {
    let fx = Fixture::new();
    let setup = draft(&fx).await;

    let err = fx.orders.mark_ordered(setup.order_id).await.unwrap_err();
    assert!(matches!(err, AppError::InvalidTransition { .. }));
}

#[tokio::test]
async fn test_cancel_rules() {
    let fx = Fixture::new();
    let setup = ordered(&fx).await;

    let order = fx.orders.cancel(setup.order_id).await.unwrap();
    assert_eq!(order.order.status, OrderStatus::Cancelled);

    let err = fx.orders.cancel(setup.order_id).await.unwrap_err();
    assert!(matches!(err, AppError::InvalidTransition { .. }));
}

#[tokio::test]
async fn test_soft_deleted_order_is_not_found() {
    let fx = Fixture::new();
    let setup = draft(&fx).await;

    fx.orders.soft_delete(setup.order_id).await.unwrap();
    assert!(matches!(
        fx.orders.get_order(setup.order_id).await,
        Err(AppError::NotFound { .. })
    ));
    assert!(matches!(
        fx.orders.submit(setup.order_id).await,
        Err(AppError::NotFound { .. })
    ));
}

// ============================================================================
// Receiving
// ============================================================================

#[tokio::test]
async fn test_receiving_draft_order_is_invalid() {
    let fx = Fixture::new();
    let setup = draft(&fx).await;
    let (first, _) = item_ids(&fx, setup.order_id).await;

    let err = fx
        .orders
        .receive(
            setup.order_id,
            vec![ReceivedItem { item_id: first, quantity: 1 }],
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidTransition { .. }));
    assert!(fx.ledger.stock_line(setup.a, setup.warehouse).await.is_err());
}

/// Property 6: a partial receipt leaves the order open with the exact delta
/// booked into stock
#[tokio::test]
async fn test_partial_receipt_keeps_order_open() {
    let fx = Fixture::new();
    let setup = ordered(&fx).await;
    let (first, _) = item_ids(&fx, setup.order_id).await;

    let outcome = fx
        .orders
        .receive(
            setup.order_id,
            vec![ReceivedItem { item_id: first, quantity: 6 }],
            None,
        )
        .await
        .unwrap();

    assert!(!outcome.completed);
    assert_eq!(outcome.order.order.status, OrderStatus::Ordered);
    assert_eq!(outcome.order.order.received_date, None);
    assert_eq!(outcome.order.items[0].quantity_received, 6);
    assert_eq!(outcome.order.items[0].remaining_quantity(), 4);
    assert_eq!(outcome.order.received_quantity(), 6);

    let movements = fx
        .ledger
        .movements_for_reference(Reference::purchase_order(setup.order_id))
        .await
        .unwrap();
    assert_eq!(movements.len(), 1);
    assert_eq!(movements[0].kind, MovementKind::In);
    assert_eq!(movements[0].quantity, 6);
    assert_eq!(movements[0].product_id, setup.a);
}

#[tokio::test]
async fn test_second_receipt_completes_order() {
    let fx = Fixture::new();
    let setup = ordered(&fx).await;
    let (first, second) = item_ids(&fx, setup.order_id).await;

    fx.orders
        .receive(
            setup.order_id,
            vec![ReceivedItem { item_id: first, quantity: 10 }],
            None,
        )
        .await
        .unwrap();
    let outcome = fx
        .orders
        .receive(
            setup.order_id,
            vec![ReceivedItem { item_id: second, quantity: 4 }],
            None,
        )
        .await
        .unwrap();

    assert!(outcome.completed);
    assert_eq!(outcome.order.order.status, OrderStatus::Received);
}

#[tokio::test]
async fn test_over_receipt_rejects_only_that_line() {
    let fx = Fixture::new();
    let setup = ordered(&fx).await;
    let (first, second) = item_ids(&fx, setup.order_id).await;

    let outcome = fx
        .orders
        .receive(
            setup.order_id,
            vec![
                ReceivedItem { item_id: first, quantity: 11 },
                ReceivedItem { item_id: second, quantity: 4 },
                ReceivedItem { item_id: second, quantity: -1 },
            ],
            None,
        )
        .await
        .unwrap();

    assert_eq!(outcome.accepted(), 4);
    assert_eq!(outcome.rejected(), 2);
    match &outcome.lines[0].result {
        Err(AppError::OverReceipt {
            ordered,
            received,
            requested,
            ..
        }) => {
            assert_eq!((*ordered, *received, *requested), (10, 0, 11));
        }
        other => panic!("expected OverReceipt, got {other:?}"),
    }
    assert!(matches!(
        outcome.lines[2].result,
        Err(AppError::InvalidAmount { .. })
    ));

    assert_eq!(outcome.order.order.status, OrderStatus::Ordered);
    assert!(fx.ledger.stock_line(setup.a, setup.warehouse).await.is_err());
    assert_eq!(fx.ledger.stock_line(setup.b, setup.warehouse).await.unwrap().quantity, 4);
}

#[tokio::test]
async fn test_huge_receipt_after_partial_is_over_receipt() {
    let fx = Fixture::new();
    let setup = ordered(&fx).await;
    let (first, _) = item_ids(&fx, setup.order_id).await;

    fx.orders
        .receive(
            setup.order_id,
            vec![ReceivedItem { item_id: first, quantity: 1 }],
            None,
        )
        .await
        .unwrap();
    let outcome = fx
        .orders
        .receive(
            setup.order_id,
            vec![ReceivedItem { item_id: first, quantity: i64::MAX }],
            None,
        )
        .await
        .unwrap();

    match &outcome.lines[0].result {
        Err(AppError::OverReceipt {
            ordered,
            received,
            requested,
            ..
        }) => {
            assert_eq!((*ordered, *received, *requested), (10, 1, i64::MAX));
        }
        other => panic!("expected OverReceipt, got {other:?}"),
    }

    // The order stays usable and nothing beyond the first unit landed
    let order = fx.orders.get_order(setup.order_id).await.unwrap();
    assert_eq!(order.items[0].quantity_received, 1);
    assert_eq!(order.order.status, OrderStatus::Ordered);
    assert_eq!(fx.ledger.stock_line(setup.a, setup.warehouse).await.unwrap().quantity, 1);
}

// ============================================================================
// Item edits
// ============================================================================

#[tokio::test]
async fn test_item_edits_recompute_total() {
    let fx = Fixture::new();
    let setup = draft(&fx).await;
    let (first, _) = item_ids(&fx, setup.order_id).await;
    let extra = fx.product("Strapping").await.id;

    let order = fx
        .orders
        .add_item(setup.order_id, item(extra, 2, dollars(10)))
        .await
        .unwrap();
    assert_eq!(order.item_count(), 3);
    assert_eq!(order.order.total_amount, dollars(170));

    let order = fx
        .orders
        .update_item(
            setup.order_id,
            first,
            UpdateItemInput {
                quantity_ordered: Some(20),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(order.order.total_amount, dollars(220));
}

#[tokio::test]
async fn test_quantity_cannot_drop_below_received() {
    let fx = Fixture::new();
    let setup = ordered(&fx).await;
    let (first, _) = item_ids(&fx, setup.order_id).await;
    fx.orders
        .receive(
            setup.order_id,
            vec![ReceivedItem { item_id: first, quantity: 7 }],
            None,
        )
        .await
        .unwrap();

    let err = fx
        .orders
        .update_item(
            setup.order_id,
            first,
            UpdateItemInput {
                quantity_ordered: Some(5),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
}

#[tokio::test]
async fn test_terminal_order_items_are_frozen() {
    let fx = Fixture::new();
    let setup = draft(&fx).await;
    fx.orders.cancel(setup.order_id).await.unwrap();
    let extra = fx.product("Strapping").await.id;

    let err = fx
        .orders
        .add_item(setup.order_id, item(extra, 1, dollars(1)))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidTransition { .. }));
}

// ============================================================================
// Property Tests
// ============================================================================

fn line_strategy() -> impl Strategy<Value = (i64, i64)> {
    // (quantity, price in cents)
    (1i64..500, 0i64..100_000)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Property 7: the stored total is the sum of quantity x unit price
    #[test]
    fn prop_order_total_is_sum_of_items(lines in prop::collection::vec(line_strategy(), 1..8)) {
        tokio_test::block_on(async {
            let fx = Fixture::new();
            let warehouse = fx.warehouse("Main").await.id;
            let mut items = Vec::new();
            let mut expected = Decimal::ZERO;
            for (quantity, cents) in &lines {
                let product = fx.product("Part").await.id;
                let price = Decimal::new(*cents, 2);
                expected += Decimal::from(*quantity) * price;
                items.push(item(product, *quantity, price));
            }

            let order = fx.orders.create_order(input(warehouse, items)).await.unwrap();
            assert_eq!(order.order.total_amount, expected);
        });
    }

    /// Property 5: complete exactly when every item is fully received
    #[test]
    fn prop_completion_requires_every_item(received in prop::collection::vec(0i64..=5, 1..5)) {
        tokio_test::block_on(async {
            let fx = Fixture::new();
            let warehouse = fx.warehouse("Main").await.id;
            let mut items = Vec::new();
            for _ in &received {
                let product = fx.product("Part").await.id;
                items.push(item(product, 5, dollars(1)));
            }
            let order = fx.orders.create_order(input(warehouse, items)).await.unwrap();
            let id = order.order.id;
            fx.orders.approve(id, Uuid::new_v4()).await.unwrap();

            let receipts: Vec<ReceivedItem> = order
                .items
                .iter()
                .zip(&received)
                .filter(|(_, qty)| **qty > 0)
                .map(|(i, qty)| ReceivedItem { item_id: i.id, quantity: *qty })
                .collect();
            let outcome = fx.orders.receive(id, receipts, None).await.unwrap();

            let all_received = received.iter().all(|q| *q == 5);
            assert_eq!(outcome.completed, all_received);
            assert_eq!(outcome.order.is_complete(), all_received);
            let expected_status = if all_received { OrderStatus::Received } else { OrderStatus::Approved };
            assert_eq!(outcome.order.order.status, expected_status);
        });
    }
}
