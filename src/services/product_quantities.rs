use metrics::{counter, histogram};
use sea_orm::sea_query::{Expr, LockType};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, DatabaseTransaction,
    EntityTrait, FromQueryResult, IntoActiveModel, QueryFilter, QueryOrder, QuerySelect, Select, Set,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, instrument};
use uuid::Uuid;

use crate::{
    db::{self, transaction},
    entities::{operation, product, product_quantity},
    errors::ServiceError,
};

/// Signed on-hand total for one (product, store) pair, as aggregated by the
/// database.
#[derive(Debug, FromQueryResult)]
struct StockTotal {
    product_id: Uuid,
    store_id: Uuid,
    total: i64,
}

/// Maintains the materialized `product_quantities` table.
///
/// Every recalculation is a full replace over the requested products: the
/// signed sum of their live, document-linked operations is written per store
/// and every other existing row for those products is zeroed.
#[derive(Clone)]
pub struct ProductQuantityService {
    db: Arc<DatabaseConnection>,
}

impl ProductQuantityService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Recalculates in a transaction of its own.
    #[instrument(skip(self))]
    pub async fn recalculate(
        &self,
        product_ids: &[Uuid],
    ) -> Result<Vec<product_quantity::Model>, ServiceError> {
        let txn = transaction::begin(&self.db).await?;
        let result = self.recalculate_in(&txn, product_ids).await;
        transaction::finish(txn, result).await
    }

    /// Recalculates inside the caller's transaction and returns the resulting
    /// rows for the requested products, ordered by product then store.
    #[instrument(skip(self, txn), fields(products = product_ids.len()))]
    pub async fn recalculate_in(
        &self,
        txn: &DatabaseTransaction,
        product_ids: &[Uuid],
    ) -> Result<Vec<product_quantity::Model>, ServiceError> {
        let ids: Vec<Uuid> = product_ids
            .iter()
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let start = Instant::now();
        lock_products(txn, &ids).await?;

        let totals = stock_totals(&ids)
            .into_model::<StockTotal>()
            .all(txn)
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to aggregate operations");
                ServiceError::db_error(e)
            })?;

        let mut wanted: BTreeMap<(Uuid, Uuid), i64> = totals
            .into_iter()
            .map(|t| ((t.product_id, t.store_id), t.total))
            .collect();

        let existing = product_quantity::Entity::find()
            .filter(product_quantity::Column::ProductId.is_in(ids.clone()))
            .all(txn)
            .await
            .map_err(ServiceError::db_error)?;

        let mut rows = Vec::with_capacity(existing.len() + wanted.len());
        let mut written = 0usize;

        for row in existing {
            // Pairs with no remaining operations keep their row at zero.
            let target = wanted
                .remove(&(row.product_id, row.store_id))
                .unwrap_or(0);
            if row.quantity == target {
                rows.push(row);
                continue;
            }
            let mut active = row.into_active_model();
            active.quantity = Set(target);
            rows.push(active.update(txn).await.map_err(|e| {
                error!(error = %e, "Failed to update product quantity");
                ServiceError::db_error(e)
            })?);
            written += 1;
        }

        for ((product_id, store_id), total) in wanted {
            let created = product_quantity::ActiveModel {
                id: Set(Uuid::now_v7()),
                product_id: Set(product_id),
                store_id: Set(store_id),
                quantity: Set(total),
                ..Default::default()
            }
            .insert(txn)
            .await
            .map_err(|e| {
                error!(error = %e, %product_id, %store_id, "Failed to insert product quantity");
                ServiceError::db_error(e)
            })?;
            rows.push(created);
            written += 1;
        }

        rows.sort_by_key(|r| (r.product_id, r.store_id));

        counter!("ledger.quantity.recalculations", 1);
        histogram!("ledger.quantity.recalculation_duration", start.elapsed());
        debug!(
            products = ids.len(),
            rows = rows.len(),
            written,
            "Product quantities recalculated"
        );

        Ok(rows)
    }

    /// On-hand quantity for a pair, read from the materialized table only.
    /// A pair that was never touched by an operation has quantity zero.
    #[instrument(skip(self))]
    pub async fn get_current_quantity(
        &self,
        product_id: Uuid,
        store_id: Uuid,
    ) -> Result<i64, ServiceError> {
        let row = product_quantity::Entity::find()
            .filter(product_quantity::Column::ProductId.eq(product_id))
            .filter(product_quantity::Column::StoreId.eq(store_id))
            .one(&*self.db)
            .await
            .map_err(ServiceError::db_error)?;

        Ok(row.map(|r| r.quantity).unwrap_or(0))
    }

    /// Per-store rows for a product.
    pub async fn quantities_for_product(
        &self,
        product_id: Uuid,
    ) -> Result<Vec<product_quantity::Model>, ServiceError> {
        product_quantity::Entity::find()
            .filter(product_quantity::Column::ProductId.eq(product_id))
            .order_by_asc(product_quantity::Column::StoreId)
            .all(&*self.db)
            .await
            .map_err(ServiceError::db_error)
    }
}

/// Takes row locks on the products, in id order, so concurrent writers to
/// overlapping product sets serialize instead of interleaving. Writers call
/// this before touching any row that references the products.
///
/// `FOR NO KEY UPDATE` does not conflict with the `FOR KEY SHARE` locks that
/// foreign keys from `operations` and `product_quantities` take, so inserting
/// a referencing row never blocks against it. SQLite already serializes
/// writers for the whole database.
pub(crate) async fn lock_products(
    txn: &DatabaseTransaction,
    ids: &[Uuid],
) -> Result<(), ServiceError> {
    if ids.is_empty() || !db::supports_row_locks(txn) {
        return Ok(());
    }

    product::Entity::find()
        .select_only()
        .column(product::Column::Id)
        .filter(product::Column::Id.is_in(ids.iter().copied()))
        .order_by_asc(product::Column::Id)
        .lock(LockType::NoKeyUpdate)
        .into_tuple::<Uuid>()
        .all(txn)
        .await
        .map_err(|e| {
            error!(error = %e, "Failed to lock products for recalculation");
            ServiceError::db_error(e)
        })?;

    Ok(())
}

/// `SUM(+quantity | -quantity)` per (product, store) over live operations
/// that reference some document.
fn stock_totals(ids: &[Uuid]) -> Select<operation::Entity> {
    operation::Entity::find()
        .select_only()
        .column(operation::Column::ProductId)
        .column(operation::Column::StoreId)
        .column_as(
            Expr::cust("SUM(CASE WHEN is_inbound THEN quantity ELSE -quantity END)"),
            "total",
        )
        .filter(operation::Column::ProductId.is_in(ids.iter().copied()))
        .filter(operation::Column::DeletedAt.is_null())
        .filter(
            Condition::any()
                .add(operation::Column::PurchaseDocumentId.is_not_null())
                .add(operation::Column::SellDocumentId.is_not_null())
                .add(operation::Column::AdjustmentDocumentId.is_not_null()),
        )
        .group_by(operation::Column::ProductId)
        .group_by(operation::Column::StoreId)
}
