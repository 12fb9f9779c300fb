use metrics::counter;
use rust_decimal::{Decimal, RoundingStrategy};
use sea_orm::sea_query::LockType;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DatabaseTransaction, EntityTrait,
    IntoActiveModel, QueryFilter, QuerySelect, Set,
};
use std::sync::Arc;
use tracing::{debug, error, instrument};
use uuid::Uuid;

use crate::{
    db::{self, transaction},
    entities::{operation, operation_props, product},
    errors::ServiceError,
};

/// Decimal places kept for weighted-average cost.
pub const WAC_SCALE: u32 = 2;

/// `Σ(unit_price × quantity) / Σ quantity` over the given purchase lines,
/// rounded half away from zero to [`WAC_SCALE`] places. Zero when no
/// quantity was received.
pub fn weighted_average_cost<I>(lines: I) -> Decimal
where
    I: IntoIterator<Item = (Decimal, i32)>,
{
    let (total_cost, total_quantity) = lines.into_iter().fold(
        (Decimal::ZERO, Decimal::ZERO),
        |(cost, qty), (unit_price, quantity)| {
            let quantity = Decimal::from(quantity);
            (cost + unit_price * quantity, qty + quantity)
        },
    );

    if total_quantity.is_zero() {
        return Decimal::ZERO;
    }

    (total_cost / total_quantity)
        .round_dp_with_strategy(WAC_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// Owns `products.wac`.
#[derive(Clone)]
pub struct WacService {
    db: Arc<DatabaseConnection>,
}

impl WacService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Recalculates in a transaction of its own.
    #[instrument(skip(self))]
    pub async fn recalculate(&self, product_id: Uuid) -> Result<Decimal, ServiceError> {
        let txn = transaction::begin(&self.db).await?;
        let result = self.recalculate_in(&txn, product_id).await;
        transaction::finish(txn, result).await
    }

    /// Recomputes the product's WAC from its live inbound purchase operations
    /// that carry cost props and stores it on the product.
    #[instrument(skip(self, txn))]
    pub async fn recalculate_in(
        &self,
        txn: &DatabaseTransaction,
        product_id: Uuid,
    ) -> Result<Decimal, ServiceError> {
        let mut query = product::Entity::find_by_id(product_id);
        if db::supports_row_locks(txn) {
            query = query.lock(LockType::NoKeyUpdate);
        }
        let product = query
            .one(txn)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::not_found("Product", product_id))?;

        let purchases = operation::Entity::find()
            .filter(operation::Column::ProductId.eq(product_id))
            .filter(operation::Column::DeletedAt.is_null())
            .filter(operation::Column::IsInbound.eq(true))
            .filter(operation::Column::PurchaseDocumentId.is_not_null())
            .find_also_related(operation_props::Entity)
            .all(txn)
            .await
            .map_err(|e| {
                error!(error = %e, %product_id, "Failed to load purchase operations");
                ServiceError::db_error(e)
            })?;

        // Operations without cost props do not contribute.
        let wac = weighted_average_cost(
            purchases
                .iter()
                .filter_map(|(op, props)| props.as_ref().map(|p| (p.unit_price, op.quantity))),
        );

        if product.wac.round_dp(WAC_SCALE) != wac {
            let mut active = product.into_active_model();
            active.wac = Set(wac);
            active.update(txn).await.map_err(|e| {
                error!(error = %e, %product_id, "Failed to store WAC");
                ServiceError::db_error(e)
            })?;
        }

        counter!("ledger.wac.recalculations", 1);
        debug!(%product_id, %wac, lines = purchases.len(), "WAC recalculated");
        Ok(wac)
    }

    /// Reads the stored WAC at its stored scale. Never recomputes.
    #[instrument(skip(self))]
    pub async fn get_wac(&self, product_id: Uuid) -> Result<Decimal, ServiceError> {
        let product = product::Entity::find_by_id(product_id)
            .one(&*self.db)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::not_found("Product", product_id))?;

        Ok(product.wac.round_dp(WAC_SCALE))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    #[test]
    fn averages_by_quantity() {
        assert_eq!(
            weighted_average_cost([(dec!(100), 10), (dec!(130), 5)]),
            dec!(110.00)
        );
    }

    #[test]
    fn repeating_thirds_round_to_cents() {
        // 2150 / 15 = 143.333...
        assert_eq!(
            weighted_average_cost([(dec!(100), 10), (dec!(230), 5)]),
            dec!(143.33)
        );
    }

    #[test]
    fn midpoint_rounds_away_from_zero() {
        assert_eq!(
            weighted_average_cost([(dec!(0.01), 1), (dec!(0.02), 1)]),
            dec!(0.02)
        );
        assert_eq!(
            weighted_average_cost([(dec!(10.00), 1), (dec!(10.01), 1)]),
            dec!(10.01)
        );
    }

    #[test]
    fn empty_history_is_zero() {
        assert_eq!(weighted_average_cost(Vec::new()), Decimal::ZERO);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn wac_stays_within_price_range(
            lines in prop::collection::vec((1i64..1_000_000, 1i32..1_000), 1..20)
        ) {
            let lines: Vec<(Decimal, i32)> = lines
                .into_iter()
                .map(|(cents, qty)| (Decimal::new(cents, 2), qty))
                .collect();
            let min = lines.iter().map(|(p, _)| *p).min().unwrap();
            let max = lines.iter().map(|(p, _)| *p).max().unwrap();

            let wac = weighted_average_cost(lines);
            prop_assert!(wac >= min && wac <= max);
            prop_assert!(wac.scale() <= WAC_SCALE);
        }
    }
}
