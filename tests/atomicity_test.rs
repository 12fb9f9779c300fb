mod common;

use assert_matches::assert_matches;
use inventory_ledger::{
    services::operations::{CreateOperation, OperationFilter},
    ServiceError,
};
use rust_decimal_macros::dec;
use sea_orm::ConnectionTrait;

use common::TestLedger;

async fn fail_quantity_writes(ledger: &TestLedger) {
    for event in ["INSERT", "UPDATE"] {
        ledger
            .db
            .execute_unprepared(&format!(
                "CREATE TRIGGER fail_quantity_{event} BEFORE {event} ON product_quantities \
                 BEGIN SELECT RAISE(ABORT, 'quantity write failed'); END;"
            ))
            .await
            .expect("create trigger");
    }
}

async fn fail_wac_writes(ledger: &TestLedger) {
    ledger
        .db
        .execute_unprepared(
            "CREATE TRIGGER fail_wac BEFORE UPDATE OF wac ON products \
             BEGIN SELECT RAISE(ABORT, 'wac write failed'); END;",
        )
        .await
        .expect("create trigger");
}

async fn operation_count(ledger: &TestLedger) -> usize {
    ledger
        .services
        .operations
        .list_operations(OperationFilter {
            include_deleted: true,
            ..Default::default()
        })
        .await
        .unwrap()
        .len()
}

#[tokio::test]
async fn failed_aggregation_rolls_back_the_operation() {
    let ledger = TestLedger::new().await;
    let store = ledger.store("Main").await;
    let product = ledger.product("SKU-1").await;
    let purchase = ledger.purchase(store.id).await;
    fail_quantity_writes(&ledger).await;

    let result = ledger
        .services
        .operations
        .create_operation(CreateOperation::new(5, true, product.id, purchase))
        .await;

    let err = result.unwrap_err();
    assert_matches!(err, ServiceError::DatabaseError(_));
    assert!(err.is_retryable());
    assert_eq!(operation_count(&ledger).await, 0);
    assert_eq!(ledger.quantity(product.id, store.id).await, 0);
}

#[tokio::test]
async fn failed_wac_write_rolls_back_stock_too() {
    let ledger = TestLedger::new().await;
    let store = ledger.store("Main").await;
    let product = ledger.product("SKU-1").await;
    let purchase = ledger.purchase(store.id).await;
    ledger.record_priced(product.id, purchase, 10, dec!(100)).await;
    fail_wac_writes(&ledger).await;

    let input = CreateOperation::new(5, true, product.id, purchase).with_cost_props(
        inventory_ledger::services::operation_props::CostPropsInput::new(dec!(130), dec!(1)),
    );
    let result = ledger.services.operations.create_operation(input).await;

    assert_matches!(result, Err(ServiceError::DatabaseError(_)));
    assert_eq!(operation_count(&ledger).await, 1);
    assert_eq!(ledger.quantity(product.id, store.id).await, 10);
    assert_eq!(ledger.wac(product.id).await, dec!(100.00));
}

#[tokio::test]
async fn failed_cascade_keeps_document_live() {
    let ledger = TestLedger::new().await;
    let store = ledger.store("Main").await;
    let product = ledger.product("SKU-1").await;
    let sell = ledger.sell(store.id).await;
    let recorded = ledger.record(product.id, sell, -3).await;
    fail_quantity_writes(&ledger).await;

    let result = ledger
        .services
        .documents
        .delete_documents(sell.kind(), &[sell.id()])
        .await;

    assert_matches!(result, Err(ServiceError::DatabaseError(_)));
    assert!(ledger
        .services
        .documents
        .find_document(sell.kind(), sell.id())
        .await
        .is_ok());
    assert!(ledger
        .services
        .operations
        .find_operation(recorded.operation.id)
        .await
        .is_ok());
    assert_eq!(ledger.quantity(product.id, store.id).await, -3);
}

#[tokio::test]
async fn failed_delete_leaves_operations_live() {
    let ledger = TestLedger::new().await;
    let store = ledger.store("Main").await;
    let product = ledger.product("SKU-1").await;
    let adjustment = ledger.adjustment(store.id).await;
    let recorded = ledger.record(product.id, adjustment, 4).await;
    fail_quantity_writes(&ledger).await;

    let result = ledger
        .services
        .operations
        .delete_operations(&[recorded.operation.id])
        .await;

    assert_matches!(result, Err(ServiceError::DatabaseError(_)));
    assert!(ledger
        .services
        .operations
        .find_operation(recorded.operation.id)
        .await
        .is_ok());
    assert_eq!(ledger.quantity(product.id, store.id).await, 4);
}
