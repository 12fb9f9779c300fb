//! Property-based tests for the derived stock and cost values.
//!
//! Each case drives a fresh in-memory ledger through a random sequence of
//! movements and checks the materialized values against a model computed in
//! the test.

mod common;

use std::collections::HashMap;

use proptest::prelude::*;
use rust_decimal::Decimal;
use uuid::Uuid;

use common::TestLedger;

#[derive(Debug, Clone, Copy)]
enum Kind {
    Purchase,
    Sell,
    Adjustment,
}

#[derive(Debug, Clone)]
struct Movement {
    kind: Kind,
    second_store: bool,
    signed_quantity: i32,
    unit_price: Option<u32>,
}

fn movement_strategy() -> impl Strategy<Value = Movement> {
    (
        prop_oneof![Just(Kind::Purchase), Just(Kind::Sell), Just(Kind::Adjustment)],
        any::<bool>(),
        prop_oneof![-50i32..=-1, 1i32..=50],
        prop::option::of(1u32..10_000),
    )
        .prop_map(|(kind, second_store, signed_quantity, unit_price)| Movement {
            kind,
            second_store,
            signed_quantity,
            unit_price,
        })
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("tokio runtime")
}

/// Records every movement and returns operation ids with their store.
async fn apply(
    ledger: &TestLedger,
    product: Uuid,
    stores: [Uuid; 2],
    movements: &[Movement],
) -> Vec<(Uuid, Uuid)> {
    let mut recorded = Vec::with_capacity(movements.len());
    for movement in movements {
        let store = stores[movement.second_store as usize];
        let document = match movement.kind {
            Kind::Purchase => ledger.purchase(store).await,
            Kind::Sell => ledger.sell(store).await,
            Kind::Adjustment => ledger.adjustment(store).await,
        };
        let details = match movement.unit_price {
            Some(cents) if movement.signed_quantity > 0 => {
                ledger
                    .record_priced(
                        product,
                        document,
                        movement.signed_quantity,
                        Decimal::new(cents as i64, 2),
                    )
                    .await
            }
            _ => ledger.record(product, document, movement.signed_quantity).await,
        };
        recorded.push((details.operation.id, store));
    }
    recorded
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn stock_matches_live_movements(
        movements in prop::collection::vec(movement_strategy(), 1..10),
        delete_mask in prop::collection::vec(any::<bool>(), 10),
    ) {
        runtime().block_on(async {
            let ledger = TestLedger::new().await;
            let stores = [ledger.store("A").await.id, ledger.store("B").await.id];
            let product = ledger.product("SKU-P").await.id;

            let recorded = apply(&ledger, product, stores, &movements).await;

            let to_delete: Vec<Uuid> = recorded
                .iter()
                .zip(&delete_mask)
                .filter(|(_, delete)| **delete)
                .map(|((id, _), _)| *id)
                .collect();
            ledger
                .services
                .operations
                .delete_operations(&to_delete)
                .await
                .unwrap();

            let mut expected: HashMap<Uuid, i64> = HashMap::new();
            for ((_, store), (movement, deleted)) in recorded
                .iter()
                .zip(movements.iter().zip(delete_mask.iter()))
            {
                if !deleted {
                    *expected.entry(*store).or_default() += movement.signed_quantity as i64;
                }
            }

            for store in stores {
                let actual = ledger.quantity(product, store).await;
                prop_assert_eq!(actual, expected.get(&store).copied().unwrap_or(0));
            }
            Ok(())
        })?;
    }

    #[test]
    fn rebuild_is_idempotent(
        movements in prop::collection::vec(movement_strategy(), 1..8),
    ) {
        runtime().block_on(async {
            let ledger = TestLedger::new().await;
            let stores = [ledger.store("A").await.id, ledger.store("B").await.id];
            let product = ledger.product("SKU-P").await.id;
            apply(&ledger, product, stores, &movements).await;

            let wac_before = ledger.wac(product).await;
            let rows_before = ledger
                .services
                .quantities
                .quantities_for_product(product)
                .await
                .unwrap();

            let first = ledger.services.rebuild(&[product]).await.unwrap();
            let second = ledger.services.rebuild(&[product]).await.unwrap();

            prop_assert_eq!(first[0].wac, wac_before);
            prop_assert_eq!(second[0].wac, wac_before);
            prop_assert_eq!(&first[0].quantities, &second[0].quantities);

            let rows_after = ledger
                .services
                .quantities
                .quantities_for_product(product)
                .await
                .unwrap();
            prop_assert_eq!(rows_before, rows_after);
            Ok(())
        })?;
    }
}
