use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DatabaseTransaction, IntoActiveModel,
    QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::{
    db::transaction,
    entities::{operation, operation_props, DocumentRef, DocumentRefError},
    errors::ServiceError,
    events::{self, EventSender, LedgerEvent},
    repositories,
    services::{
        operation_props::{CostPropsInput, OperationPropsService},
        product_quantities::{lock_products, ProductQuantityService},
        wac::WacService,
        DocumentLookup, ProductLookup,
    },
};

impl From<DocumentRefError> for ServiceError {
    fn from(err: DocumentRefError) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

/// Input for recording a stock movement.
///
/// `store_id` is informational: the store is always taken from the
/// referenced document.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateOperation {
    #[validate(range(min = 1))]
    pub quantity: i32,
    pub is_inbound: bool,
    pub product_id: Uuid,
    #[serde(default)]
    pub store_id: Option<Uuid>,
    #[serde(default)]
    pub purchase_document_id: Option<i32>,
    #[serde(default)]
    pub sell_document_id: Option<i32>,
    #[serde(default)]
    pub adjustment_document_id: Option<i32>,
    #[serde(default)]
    pub cost_props: Option<CostPropsInput>,
}

impl CreateOperation {
    pub fn new(quantity: i32, is_inbound: bool, product_id: Uuid, document: DocumentRef) -> Self {
        let (purchase, sell, adjustment) = document.columns();
        Self {
            quantity,
            is_inbound,
            product_id,
            store_id: None,
            purchase_document_id: purchase,
            sell_document_id: sell,
            adjustment_document_id: adjustment,
            cost_props: None,
        }
    }

    pub fn with_cost_props(mut self, props: CostPropsInput) -> Self {
        self.cost_props = Some(props);
        self
    }

    pub fn document_ref(&self) -> Result<DocumentRef, DocumentRefError> {
        DocumentRef::from_parts(
            self.purchase_document_id,
            self.sell_document_id,
            self.adjustment_document_id,
        )
    }
}

/// Partial update of an operation. When any document id is present, the
/// three ids together must name exactly one document and replace the
/// current link.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct UpdateOperation {
    #[validate(range(min = 1))]
    pub quantity: Option<i32>,
    pub is_inbound: Option<bool>,
    pub product_id: Option<Uuid>,
    pub store_id: Option<Uuid>,
    pub purchase_document_id: Option<i32>,
    pub sell_document_id: Option<i32>,
    pub adjustment_document_id: Option<i32>,
    pub cost_props: Option<CostPropsInput>,
    /// Detaches the operation's cost props. Cannot be combined with
    /// `cost_props`.
    #[serde(default)]
    pub clear_cost_props: bool,
}

impl UpdateOperation {
    fn document_ref(&self) -> Result<Option<DocumentRef>, DocumentRefError> {
        if self.purchase_document_id.is_none()
            && self.sell_document_id.is_none()
            && self.adjustment_document_id.is_none()
        {
            return Ok(None);
        }
        DocumentRef::from_parts(
            self.purchase_document_id,
            self.sell_document_id,
            self.adjustment_document_id,
        )
        .map(Some)
    }
}

/// Filters for listing operations. Empty filter lists every live operation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OperationFilter {
    pub purchase_document_id: Option<i32>,
    pub sell_document_id: Option<i32>,
    pub adjustment_document_id: Option<i32>,
    pub product_id: Option<Uuid>,
    pub store_id: Option<Uuid>,
    #[serde(default)]
    pub include_deleted: bool,
}

/// An operation with its cost props, if any.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperationDetails {
    pub operation: operation::Model,
    pub cost_props: Option<operation_props::Model>,
}

/// Products whose derived state a write touched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Affected {
    /// Quantity was recalculated for these.
    pub stock: BTreeSet<Uuid>,
    /// WAC was recalculated for these.
    pub wac: BTreeSet<Uuid>,
}

impl Affected {
    fn touch(&mut self, product_id: Uuid, purchase_linked: bool) {
        self.stock.insert(product_id);
        if purchase_linked {
            self.wac.insert(product_id);
        }
    }

    fn into_events(self) -> Vec<LedgerEvent> {
        let mut events: Vec<LedgerEvent> = self
            .wac
            .into_iter()
            .map(|product_id| LedgerEvent::WacRecalculated { product_id })
            .collect();
        if !self.stock.is_empty() {
            events.push(LedgerEvent::StockRecalculated {
                product_ids: self.stock.into_iter().collect(),
            });
        }
        events
    }
}

/// The operation ledger.
///
/// Every write recalculates stock for the products it touched, and WAC for
/// those whose purchase-linked operations changed, before its transaction
/// commits.
#[derive(Clone)]
pub struct OperationService {
    db: Arc<DatabaseConnection>,
    products: Arc<dyn ProductLookup>,
    documents: Arc<dyn DocumentLookup>,
    props: OperationPropsService,
    quantities: ProductQuantityService,
    wac: WacService,
    event_sender: Option<EventSender>,
}

impl OperationService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        products: Arc<dyn ProductLookup>,
        documents: Arc<dyn DocumentLookup>,
        props: OperationPropsService,
        quantities: ProductQuantityService,
        wac: WacService,
        event_sender: Option<EventSender>,
    ) -> Self {
        Self {
            db,
            products,
            documents,
            props,
            quantities,
            wac,
            event_sender,
        }
    }

    /// Records an operation in a transaction of its own.
    #[instrument(skip(self, input), fields(product_id = %input.product_id))]
    pub async fn create_operation(
        &self,
        input: CreateOperation,
    ) -> Result<OperationDetails, ServiceError> {
        let txn = transaction::begin(&self.db).await?;
        let result = self.create_operation_in(&txn, input).await;
        let (details, affected) = transaction::finish(txn, result).await?;

        let mut events = vec![LedgerEvent::OperationRecorded {
            operation_id: details.operation.id,
            product_id: details.operation.product_id,
            store_id: details.operation.store_id,
        }];
        events.extend(affected.into_events());
        events::publish(self.event_sender.as_ref(), events).await;

        info!(operation_id = %details.operation.id, "Operation recorded");
        Ok(details)
    }

    pub async fn create_operation_in(
        &self,
        txn: &DatabaseTransaction,
        input: CreateOperation,
    ) -> Result<(OperationDetails, Affected), ServiceError> {
        input.validate()?;
        if let Some(props) = &input.cost_props {
            props.validate()?;
        }
        let document = input.document_ref()?;

        self.products.ensure_product(txn, input.product_id).await?;
        lock_products(txn, &[input.product_id]).await?;
        let store_id = self.documents.document_store(txn, document).await?;
        if let Some(requested) = input.store_id.filter(|s| *s != store_id) {
            warn!(
                %requested,
                %store_id,
                %document,
                "Ignoring requested store; operations take the store of their document"
            );
        }

        let (purchase, sell, adjustment) = document.columns();
        let created = operation::ActiveModel {
            id: Set(Uuid::now_v7()),
            quantity: Set(input.quantity),
            is_inbound: Set(input.is_inbound),
            product_id: Set(input.product_id),
            store_id: Set(store_id),
            purchase_document_id: Set(purchase),
            sell_document_id: Set(sell),
            adjustment_document_id: Set(adjustment),
            deleted_at: Set(None),
            ..Default::default()
        }
        .insert(txn)
        .await
        .map_err(|e| {
            error!(error = %e, "Failed to insert operation");
            ServiceError::db_error(e)
        })?;

        let cost_props = match &input.cost_props {
            Some(props) => Some(self.props.create_in(txn, created.id, props).await?),
            None => None,
        };

        let mut affected = Affected::default();
        affected.touch(created.product_id, document.is_purchase());
        self.recalculate_in(txn, &affected).await?;

        Ok((
            OperationDetails {
                operation: created,
                cost_props,
            },
            affected,
        ))
    }

    /// Applies a partial update in a transaction of its own.
    #[instrument(skip(self, patch))]
    pub async fn update_operation(
        &self,
        id: Uuid,
        patch: UpdateOperation,
    ) -> Result<OperationDetails, ServiceError> {
        let txn = transaction::begin(&self.db).await?;
        let result = self.update_operation_in(&txn, id, patch).await;
        let (details, affected) = transaction::finish(txn, result).await?;

        let mut events = vec![LedgerEvent::OperationUpdated {
            operation_id: id,
            product_id: details.operation.product_id,
        }];
        events.extend(affected.into_events());
        events::publish(self.event_sender.as_ref(), events).await;

        info!(operation_id = %id, "Operation updated");
        Ok(details)
    }

    pub async fn update_operation_in(
        &self,
        txn: &DatabaseTransaction,
        id: Uuid,
        patch: UpdateOperation,
    ) -> Result<(OperationDetails, Affected), ServiceError> {
        patch.validate()?;
        if let Some(props) = &patch.cost_props {
            props.validate()?;
        }
        if patch.clear_cost_props && patch.cost_props.is_some() {
            return Err(ServiceError::ValidationError(
                "cost props cannot be replaced and cleared in one update".to_string(),
            ));
        }

        let existing = repositories::find_live::<operation::Entity, _>(txn, id)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::not_found("Operation", id))?;

        let old_product = existing.product_id;
        let mut products = vec![old_product];
        products.extend(patch.product_id);
        lock_products(txn, &products).await?;

        let old_document = existing.document_ref();
        let new_document = match patch.document_ref()? {
            Some(document) => document,
            None => old_document.ok_or_else(|| {
                ServiceError::ValidationError(format!(
                    "operation {} has no single document link; supply one",
                    id
                ))
            })?,
        };

        let mut active = existing.clone().into_active_model();

        if let Some(product_id) = patch.product_id.filter(|p| *p != old_product) {
            self.products.ensure_product(txn, product_id).await?;
            active.product_id = Set(product_id);
        }
        if let Some(quantity) = patch.quantity {
            active.quantity = Set(quantity);
        }
        if let Some(is_inbound) = patch.is_inbound {
            active.is_inbound = Set(is_inbound);
        }

        let mut store_id = existing.store_id;
        if old_document != Some(new_document) {
            store_id = self.documents.document_store(txn, new_document).await?;
            let (purchase, sell, adjustment) = new_document.columns();
            active.store_id = Set(store_id);
            active.purchase_document_id = Set(purchase);
            active.sell_document_id = Set(sell);
            active.adjustment_document_id = Set(adjustment);
        }
        if let Some(requested) = patch.store_id.filter(|s| *s != store_id) {
            warn!(
                %requested,
                %store_id,
                "Ignoring requested store; operations take the store of their document"
            );
        }

        let updated = if active.is_changed() {
            active.update(txn).await.map_err(|e| {
                error!(error = %e, operation_id = %id, "Failed to update operation");
                ServiceError::db_error(e)
            })?
        } else {
            existing
        };

        let cost_props = match &patch.cost_props {
            Some(props) => Some(self.props.upsert_in(txn, id, props).await?),
            None if patch.clear_cost_props => {
                self.props.remove_by_operation_in(txn, id).await?;
                None
            }
            None => self.props.find_by_operation_in(txn, id).await?,
        };

        let mut affected = Affected::default();
        affected.touch(
            old_product,
            old_document.map_or(false, |d| d.is_purchase()),
        );
        affected.touch(updated.product_id, new_document.is_purchase());
        self.recalculate_in(txn, &affected).await?;

        Ok((
            OperationDetails {
                operation: updated,
                cost_props,
            },
            affected,
        ))
    }

    /// Soft-deletes the live operations among `ids`. Returns whether any
    /// operation changed.
    #[instrument(skip(self))]
    pub async fn delete_operations(&self, ids: &[Uuid]) -> Result<bool, ServiceError> {
        let txn = transaction::begin(&self.db).await?;
        let result = self.delete_operations_in(&txn, ids).await;
        let (deleted, affected) = transaction::finish(txn, result).await?;

        if deleted.is_empty() {
            return Ok(false);
        }
        let mut events = vec![LedgerEvent::OperationsDeleted {
            operation_ids: deleted.clone(),
        }];
        events.extend(affected.into_events());
        events::publish(self.event_sender.as_ref(), events).await;

        info!(count = deleted.len(), "Operations deleted");
        Ok(true)
    }

    pub async fn delete_operations_in(
        &self,
        txn: &DatabaseTransaction,
        ids: &[Uuid],
    ) -> Result<(Vec<Uuid>, Affected), ServiceError> {
        // Products are captured before the rows disappear from live reads.
        let targets = repositories::live::<operation::Entity>()
            .filter(operation::Column::Id.is_in(ids.iter().copied()))
            .all(txn)
            .await
            .map_err(ServiceError::db_error)?;
        if targets.is_empty() {
            return Ok((Vec::new(), Affected::default()));
        }

        let affected = affected_by(&targets);
        lock_products(txn, &affected.stock.iter().copied().collect::<Vec<_>>()).await?;

        let target_ids: Vec<Uuid> = targets.iter().map(|op| op.id).collect();
        repositories::soft_delete_many::<operation::Entity, _>(
            txn,
            &target_ids,
            crate::entities::base::now(),
        )
        .await
        .map_err(|e| {
            error!(error = %e, "Failed to delete operations");
            ServiceError::db_error(e)
        })?;

        self.recalculate_in(txn, &affected).await?;
        Ok((target_ids, affected))
    }

    /// Restores the deleted operations among `ids`. Returns whether any
    /// operation changed.
    #[instrument(skip(self))]
    pub async fn restore_operations(&self, ids: &[Uuid]) -> Result<bool, ServiceError> {
        let txn = transaction::begin(&self.db).await?;
        let result = self.restore_operations_in(&txn, ids).await;
        let (restored, affected) = transaction::finish(txn, result).await?;

        if restored.is_empty() {
            return Ok(false);
        }
        let mut events = vec![LedgerEvent::OperationsRestored {
            operation_ids: restored.clone(),
        }];
        events.extend(affected.into_events());
        events::publish(self.event_sender.as_ref(), events).await;

        info!(count = restored.len(), "Operations restored");
        Ok(true)
    }

    pub async fn restore_operations_in(
        &self,
        txn: &DatabaseTransaction,
        ids: &[Uuid],
    ) -> Result<(Vec<Uuid>, Affected), ServiceError> {
        // Tombstoned rows are invisible to live reads, so read with deleted.
        let candidates = repositories::with_deleted::<operation::Entity>()
            .filter(operation::Column::Id.is_in(ids.iter().copied()))
            .filter(operation::Column::DeletedAt.is_not_null())
            .all(txn)
            .await
            .map_err(ServiceError::db_error)?;

        // An operation whose document is deleted comes back only with the
        // document itself.
        let mut targets = Vec::with_capacity(candidates.len());
        for op in candidates {
            let Some(document) = op.document_ref() else {
                continue;
            };
            match self.documents.document_store(txn, document).await {
                Ok(_) => targets.push(op),
                Err(ServiceError::NotFound(_)) => {
                    debug!(operation_id = %op.id, %document, "Skipping restore; document is deleted");
                }
                Err(e) => return Err(e),
            }
        }
        if targets.is_empty() {
            return Ok((Vec::new(), Affected::default()));
        }

        let affected = affected_by(&targets);
        lock_products(txn, &affected.stock.iter().copied().collect::<Vec<_>>()).await?;

        let target_ids: Vec<Uuid> = targets.iter().map(|op| op.id).collect();
        repositories::restore_many::<operation::Entity, _>(
            txn,
            &target_ids,
            crate::entities::base::now(),
        )
        .await
        .map_err(|e| {
            error!(error = %e, "Failed to restore operations");
            ServiceError::db_error(e)
        })?;

        self.recalculate_in(txn, &affected).await?;
        Ok((target_ids, affected))
    }

    /// A live operation with its cost props.
    pub async fn find_operation(&self, id: Uuid) -> Result<OperationDetails, ServiceError> {
        let (operation, cost_props) = repositories::live::<operation::Entity>()
            .filter(operation::Column::Id.eq(id))
            .find_also_related(operation_props::Entity)
            .one(&*self.db)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::not_found("Operation", id))?;

        Ok(OperationDetails {
            operation,
            cost_props,
        })
    }

    /// Newest first.
    pub async fn list_operations(
        &self,
        filter: OperationFilter,
    ) -> Result<Vec<operation::Model>, ServiceError> {
        let mut query = if filter.include_deleted {
            repositories::with_deleted::<operation::Entity>()
        } else {
            repositories::live::<operation::Entity>()
        };

        if let Some(id) = filter.purchase_document_id {
            query = query.filter(operation::Column::PurchaseDocumentId.eq(id));
        }
        if let Some(id) = filter.sell_document_id {
            query = query.filter(operation::Column::SellDocumentId.eq(id));
        }
        if let Some(id) = filter.adjustment_document_id {
            query = query.filter(operation::Column::AdjustmentDocumentId.eq(id));
        }
        if let Some(id) = filter.product_id {
            query = query.filter(operation::Column::ProductId.eq(id));
        }
        if let Some(id) = filter.store_id {
            query = query.filter(operation::Column::StoreId.eq(id));
        }

        // v7 ids sort by creation time.
        query
            .order_by_desc(operation::Column::CreatedAt)
            .order_by_desc(operation::Column::Id)
            .all(&*self.db)
            .await
            .map_err(ServiceError::db_error)
    }

    async fn recalculate_in(
        &self,
        txn: &DatabaseTransaction,
        affected: &Affected,
    ) -> Result<(), ServiceError> {
        let products: Vec<Uuid> = affected.stock.iter().copied().collect();
        self.quantities.recalculate_in(txn, &products).await?;
        for product_id in &affected.wac {
            self.wac.recalculate_in(txn, *product_id).await?;
        }
        Ok(())
    }
}

fn affected_by(operations: &[operation::Model]) -> Affected {
    let mut affected = Affected::default();
    for op in operations {
        affected.touch(
            op.product_id,
            op.document_ref().map_or(false, |d| d.is_purchase()),
        );
    }
    affected
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_without_document_ids_keeps_link() {
        assert_eq!(UpdateOperation::default().document_ref(), Ok(None));
    }

    #[test]
    fn update_with_two_document_ids_is_rejected() {
        let patch = UpdateOperation {
            purchase_document_id: Some(1),
            adjustment_document_id: Some(2),
            ..Default::default()
        };
        assert_eq!(patch.document_ref(), Err(DocumentRefError::Ambiguous(2)));
    }

    #[test]
    fn clear_flag_defaults_off_when_absent() {
        let patch: UpdateOperation = serde_json::from_str(r#"{"quantity": 4}"#).unwrap();
        assert!(!patch.clear_cost_props);
        assert_eq!(patch.quantity, Some(4));
    }

    #[test]
    fn create_input_round_trips_document() {
        let input = CreateOperation::new(3, false, Uuid::now_v7(), DocumentRef::Sell(9));
        assert_eq!(input.document_ref(), Ok(DocumentRef::Sell(9)));
        assert!(input.validate().is_ok());
    }

    #[test]
    fn zero_quantity_is_invalid() {
        let input = CreateOperation::new(0, true, Uuid::now_v7(), DocumentRef::Purchase(1));
        assert!(input.validate().is_err());
    }

    #[test]
    fn affected_tracks_wac_only_for_purchases() {
        let mut affected = Affected::default();
        let a = Uuid::now_v7();
        let b = Uuid::now_v7();
        affected.touch(a, true);
        affected.touch(b, false);
        assert_eq!(affected.stock.len(), 2);
        assert_eq!(affected.wac.into_iter().collect::<Vec<_>>(), vec![a]);
    }
}
