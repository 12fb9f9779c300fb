mod common;

use assert_matches::assert_matches;
use inventory_ledger::{
    db::transaction,
    entities::DocumentRef,
    events::LedgerEvent,
    services::{
        operation_props::CostPropsInput,
        operations::{CreateOperation, OperationFilter, UpdateOperation},
    },
    ServiceError,
};
use rstest::rstest;
use rust_decimal_macros::dec;
use uuid::Uuid;

use common::TestLedger;

#[tokio::test]
async fn operation_takes_store_of_its_document() {
    let ledger = TestLedger::new().await;
    let warehouse = ledger.store("Warehouse").await;
    let shop = ledger.store("Shop").await;
    let product = ledger.product("SKU-1").await;
    let purchase = ledger.purchase(warehouse.id).await;

    let mut input = CreateOperation::new(10, true, product.id, purchase);
    input.store_id = Some(shop.id);
    let details = ledger
        .services
        .operations
        .create_operation(input)
        .await
        .expect("recorded");

    assert_eq!(details.operation.store_id, warehouse.id);
    assert_eq!(details.operation.document_ref(), Some(purchase));
    assert_eq!(ledger.quantity(product.id, warehouse.id).await, 10);
    assert_eq!(ledger.quantity(product.id, shop.id).await, 0);
}

#[rstest]
#[case::no_document(false, false, false)]
#[case::purchase_and_sell(true, true, false)]
#[case::sell_and_adjustment(false, true, true)]
#[case::all_three(true, true, true)]
#[tokio::test]
async fn operation_must_reference_exactly_one_document(
    #[case] purchase: bool,
    #[case] sell: bool,
    #[case] adjustment: bool,
) {
    let ledger = TestLedger::new().await;
    let store = ledger.store("Main").await;
    let product = ledger.product("SKU-1").await;
    let purchase_doc = ledger.purchase(store.id).await;
    let sell_doc = ledger.sell(store.id).await;
    let adjustment_doc = ledger.adjustment(store.id).await;

    let input = CreateOperation {
        quantity: 4,
        is_inbound: true,
        product_id: product.id,
        store_id: None,
        purchase_document_id: purchase.then_some(purchase_doc.id()),
        sell_document_id: sell.then_some(sell_doc.id()),
        adjustment_document_id: adjustment.then_some(adjustment_doc.id()),
        cost_props: None,
    };

    let result = ledger.services.operations.create_operation(input).await;
    assert_matches!(result, Err(ServiceError::ValidationError(_)));

    let listed = ledger
        .services
        .operations
        .list_operations(OperationFilter {
            include_deleted: true,
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(listed.is_empty());
    assert_eq!(ledger.quantity(product.id, store.id).await, 0);
}

#[tokio::test]
async fn zero_quantity_is_rejected() {
    let ledger = TestLedger::new().await;
    let store = ledger.store("Main").await;
    let product = ledger.product("SKU-1").await;
    let adjustment = ledger.adjustment(store.id).await;

    let result = ledger
        .services
        .operations
        .create_operation(CreateOperation::new(0, true, product.id, adjustment))
        .await;

    assert_matches!(result, Err(ServiceError::ValidationError(_)));
}

#[tokio::test]
async fn unknown_product_or_document_is_not_found() {
    let ledger = TestLedger::new().await;
    let store = ledger.store("Main").await;
    let product = ledger.product("SKU-1").await;
    let sell = ledger.sell(store.id).await;

    let missing_product = ledger
        .services
        .operations
        .create_operation(CreateOperation::new(1, false, Uuid::new_v4(), sell))
        .await;
    assert_matches!(missing_product, Err(ServiceError::NotFound(_)));

    let missing_document = ledger
        .services
        .operations
        .create_operation(CreateOperation::new(
            1,
            false,
            product.id,
            DocumentRef::Sell(sell.id() + 100),
        ))
        .await;
    assert_matches!(missing_document, Err(ServiceError::NotFound(_)));
}

#[tokio::test]
async fn recording_against_deleted_document_is_not_found() {
    let ledger = TestLedger::new().await;
    let store = ledger.store("Main").await;
    let product = ledger.product("SKU-1").await;
    let adjustment = ledger.adjustment(store.id).await;

    ledger
        .services
        .documents
        .delete_documents(adjustment.kind(), &[adjustment.id()])
        .await
        .unwrap();

    let result = ledger
        .services
        .operations
        .create_operation(CreateOperation::new(2, true, product.id, adjustment))
        .await;
    assert_matches!(result, Err(ServiceError::NotFound(_)));
}

#[tokio::test]
async fn find_operation_includes_cost_props_and_hides_deleted() {
    let ledger = TestLedger::new().await;
    let store = ledger.store("Main").await;
    let product = ledger.product("SKU-1").await;
    let purchase = ledger.purchase(store.id).await;

    let recorded = ledger
        .record_priced(product.id, purchase, 3, dec!(12.50))
        .await;
    let found = ledger
        .services
        .operations
        .find_operation(recorded.operation.id)
        .await
        .unwrap();
    assert_eq!(found.operation, recorded.operation);
    assert_eq!(found.cost_props.map(|p| p.unit_price), Some(dec!(12.50)));

    assert!(ledger
        .services
        .operations
        .delete_operations(&[recorded.operation.id])
        .await
        .unwrap());
    assert_matches!(
        ledger
            .services
            .operations
            .find_operation(recorded.operation.id)
            .await,
        Err(ServiceError::NotFound(_))
    );
}

#[tokio::test]
async fn second_cost_props_attachment_conflicts() {
    let ledger = TestLedger::new().await;
    let store = ledger.store("Main").await;
    let product = ledger.product("SKU-1").await;
    let purchase = ledger.purchase(store.id).await;
    let recorded = ledger.record_priced(product.id, purchase, 1, dec!(5)).await;

    let txn = transaction::begin(&ledger.db).await.unwrap();
    let result = ledger
        .services
        .operation_props
        .create_in(
            &txn,
            recorded.operation.id,
            &CostPropsInput::new(dec!(6), dec!(1)),
        )
        .await;
    let result = transaction::finish(txn, result).await;

    assert_matches!(result, Err(ServiceError::Conflict(_)));
    let props = ledger
        .services
        .operation_props
        .find_by_operation(recorded.operation.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(props.unit_price, dec!(5));
}

#[tokio::test]
async fn invalid_cost_props_reject_the_operation() {
    let ledger = TestLedger::new().await;
    let store = ledger.store("Main").await;
    let product = ledger.product("SKU-1").await;
    let purchase = ledger.purchase(store.id).await;

    let input = CreateOperation::new(1, true, product.id, purchase)
        .with_cost_props(CostPropsInput::new(dec!(0.001), dec!(1)));
    let result = ledger.services.operations.create_operation(input).await;

    assert_matches!(result, Err(ServiceError::ValidationError(_)));
    assert_eq!(ledger.quantity(product.id, store.id).await, 0);
}

#[tokio::test]
async fn relinking_to_another_document_moves_store() {
    let ledger = TestLedger::new().await;
    let north = ledger.store("North").await;
    let south = ledger.store("South").await;
    let product = ledger.product("SKU-1").await;
    let north_adjustment = ledger.adjustment(north.id).await;
    let south_adjustment = ledger.adjustment(south.id).await;

    let recorded = ledger.record(product.id, north_adjustment, 7).await;
    let updated = ledger
        .services
        .operations
        .update_operation(
            recorded.operation.id,
            UpdateOperation {
                adjustment_document_id: Some(south_adjustment.id()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(updated.operation.store_id, south.id);
    assert_eq!(ledger.quantity(product.id, north.id).await, 0);
    assert_eq!(ledger.quantity(product.id, south.id).await, 7);
}

#[tokio::test]
async fn update_with_two_documents_is_rejected() {
    let ledger = TestLedger::new().await;
    let store = ledger.store("Main").await;
    let product = ledger.product("SKU-1").await;
    let purchase = ledger.purchase(store.id).await;
    let sell = ledger.sell(store.id).await;
    let recorded = ledger.record(product.id, purchase, 2).await;

    let result = ledger
        .services
        .operations
        .update_operation(
            recorded.operation.id,
            UpdateOperation {
                purchase_document_id: Some(purchase.id()),
                sell_document_id: Some(sell.id()),
                ..Default::default()
            },
        )
        .await;

    assert_matches!(result, Err(ServiceError::ValidationError(_)));
    assert_eq!(ledger.quantity(product.id, store.id).await, 2);
}

#[tokio::test]
async fn update_of_deleted_operation_is_not_found() {
    let ledger = TestLedger::new().await;
    let store = ledger.store("Main").await;
    let product = ledger.product("SKU-1").await;
    let sell = ledger.sell(store.id).await;
    let recorded = ledger.record(product.id, sell, -2).await;

    ledger
        .services
        .operations
        .delete_operations(&[recorded.operation.id])
        .await
        .unwrap();

    let result = ledger
        .services
        .operations
        .update_operation(
            recorded.operation.id,
            UpdateOperation {
                quantity: Some(5),
                ..Default::default()
            },
        )
        .await;
    assert_matches!(result, Err(ServiceError::NotFound(_)));
}

#[tokio::test]
async fn list_filters_by_document_and_product() {
    let ledger = TestLedger::new().await;
    let store = ledger.store("Main").await;
    let first = ledger.product("SKU-1").await;
    let second = ledger.product("SKU-2").await;
    let purchase = ledger.purchase(store.id).await;
    let sell = ledger.sell(store.id).await;

    let a = ledger.record(first.id, purchase, 10).await;
    let b = ledger.record(second.id, purchase, 4).await;
    let c = ledger.record(first.id, sell, -1).await;

    let operations = &ledger.services.operations;
    let by_purchase = operations
        .list_operations(OperationFilter {
            purchase_document_id: Some(purchase.id()),
            ..Default::default()
        })
        .await
        .unwrap();
    let ids: Vec<Uuid> = by_purchase.iter().map(|op| op.id).collect();
    assert_eq!(ids.len(), 2);
    assert!(ids.contains(&a.operation.id) && ids.contains(&b.operation.id));

    let by_product = operations
        .list_operations(OperationFilter {
            product_id: Some(first.id),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(by_product.len(), 2);
    assert!(by_product.iter().all(|op| op.product_id == first.id));

    operations.delete_operations(&[c.operation.id]).await.unwrap();
    let live = operations
        .list_operations(OperationFilter::default())
        .await
        .unwrap();
    let everything = operations
        .list_operations(OperationFilter {
            include_deleted: true,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(live.len(), 2);
    assert_eq!(everything.len(), 3);
}

#[tokio::test]
async fn delete_and_restore_of_unknown_ids_change_nothing() {
    let ledger = TestLedger::new().await;
    let operations = &ledger.services.operations;

    assert!(!operations.delete_operations(&[Uuid::new_v4()]).await.unwrap());
    assert!(!operations.restore_operations(&[Uuid::new_v4()]).await.unwrap());
    assert!(!operations.delete_operations(&[]).await.unwrap());
}

#[tokio::test]
async fn recording_publishes_events_after_commit() {
    let mut ledger = TestLedger::new().await;
    let store = ledger.store("Main").await;
    let product = ledger.product("SKU-1").await;
    let purchase = ledger.purchase(store.id).await;
    ledger.drain_events();

    let recorded = ledger.record_priced(product.id, purchase, 2, dec!(3)).await;
    let events = ledger.drain_events();

    assert_eq!(
        events,
        vec![
            LedgerEvent::OperationRecorded {
                operation_id: recorded.operation.id,
                product_id: product.id,
                store_id: store.id,
            },
            LedgerEvent::WacRecalculated {
                product_id: product.id
            },
            LedgerEvent::StockRecalculated {
                product_ids: vec![product.id]
            },
        ]
    );
}
