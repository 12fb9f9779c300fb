use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DatabaseTransaction, EntityTrait,
    QueryFilter, QueryOrder, QuerySelect, Set, Value,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::{
    db::transaction,
    entities::{
        base::{self, Record, RecordMeta, SoftDelete},
        document_adjustment, document_purchase, document_sell, operation, DocumentKind,
        DocumentRef,
    },
    errors::ServiceError,
    events::{self, EventSender, LedgerEvent},
    repositories,
    services::{
        catalog::CatalogService,
        product_quantities::{lock_products, ProductQuantityService},
        wac::WacService, DocumentLookup,
    },
};

/// Header fields a document update may touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentField {
    Performed,
    Date,
    Store,
    Author,
    Note,
    Vendor,
    Customer,
    PriceType,
}

/// Behaviour shared by the three document tables.
pub trait DocumentEntity: SoftDelete<Key = i32>
where
    Self::Model: Record<Key = i32>,
{
    const KIND: DocumentKind;

    /// Column backing `field`, or `None` when this kind has no such field.
    fn column(field: DocumentField) -> Option<Self::Column>;
    fn store_of(model: &Self::Model) -> Uuid;
    fn wrap(model: Self::Model) -> Document;
}

impl DocumentEntity for document_purchase::Entity {
    const KIND: DocumentKind = DocumentKind::Purchase;

    fn column(field: DocumentField) -> Option<Self::Column> {
        use document_purchase::Column;
        match field {
            DocumentField::Performed => Some(Column::Performed),
            DocumentField::Date => Some(Column::Date),
            DocumentField::Store => Some(Column::StoreId),
            DocumentField::Author => Some(Column::AuthorId),
            DocumentField::Note => Some(Column::Note),
            DocumentField::Vendor => Some(Column::VendorId),
            DocumentField::PriceType => Some(Column::PriceTypeId),
            DocumentField::Customer => None,
        }
    }

    fn store_of(model: &Self::Model) -> Uuid {
        model.store_id
    }

    fn wrap(model: Self::Model) -> Document {
        Document::Purchase(model)
    }
}

impl DocumentEntity for document_sell::Entity {
    const KIND: DocumentKind = DocumentKind::Sell;

    fn column(field: DocumentField) -> Option<Self::Column> {
        use document_sell::Column;
        match field {
            DocumentField::Performed => Some(Column::Performed),
            DocumentField::Date => Some(Column::Date),
            DocumentField::Store => Some(Column::StoreId),
            DocumentField::Author => Some(Column::AuthorId),
            DocumentField::Note => Some(Column::Note),
            DocumentField::Customer => Some(Column::CustomerId),
            DocumentField::PriceType => Some(Column::PriceTypeId),
            DocumentField::Vendor => None,
        }
    }

    fn store_of(model: &Self::Model) -> Uuid {
        model.store_id
    }

    fn wrap(model: Self::Model) -> Document {
        Document::Sell(model)
    }
}

impl DocumentEntity for document_adjustment::Entity {
    const KIND: DocumentKind = DocumentKind::Adjustment;

    fn column(field: DocumentField) -> Option<Self::Column> {
        use document_adjustment::Column;
        match field {
            DocumentField::Performed => Some(Column::Performed),
            DocumentField::Date => Some(Column::Date),
            DocumentField::Store => Some(Column::StoreId),
            DocumentField::Author => Some(Column::AuthorId),
            DocumentField::Note => Some(Column::Note),
            DocumentField::Vendor | DocumentField::Customer | DocumentField::PriceType => None,
        }
    }

    fn store_of(model: &Self::Model) -> Uuid {
        model.store_id
    }

    fn wrap(model: Self::Model) -> Document {
        Document::Adjustment(model)
    }
}

/// Runs `$body` with `$E` bound to the entity of document kind `$kind`.
macro_rules! with_document_entity {
    ($kind:expr, $E:ident => $body:expr) => {
        match $kind {
            DocumentKind::Purchase => {
                type $E = document_purchase::Entity;
                $body
            }
            DocumentKind::Sell => {
                type $E = document_sell::Entity;
                $body
            }
            DocumentKind::Adjustment => {
                type $E = document_adjustment::Entity;
                $body
            }
        }
    };
}

/// A document header of any kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Document {
    Purchase(document_purchase::Model),
    Sell(document_sell::Model),
    Adjustment(document_adjustment::Model),
}

impl Document {
    pub fn kind(&self) -> DocumentKind {
        match self {
            Document::Purchase(_) => DocumentKind::Purchase,
            Document::Sell(_) => DocumentKind::Sell,
            Document::Adjustment(_) => DocumentKind::Adjustment,
        }
    }

    pub fn meta(&self) -> RecordMeta<i32> {
        match self {
            Document::Purchase(m) => m.meta(),
            Document::Sell(m) => m.meta(),
            Document::Adjustment(m) => m.meta(),
        }
    }

    pub fn id(&self) -> i32 {
        self.meta().id
    }

    pub fn document_ref(&self) -> DocumentRef {
        DocumentRef::new(self.kind(), self.id())
    }

    pub fn store_id(&self) -> Uuid {
        match self {
            Document::Purchase(m) => m.store_id,
            Document::Sell(m) => m.store_id,
            Document::Adjustment(m) => m.store_id,
        }
    }

    pub fn performed(&self) -> bool {
        match self {
            Document::Purchase(m) => m.performed,
            Document::Sell(m) => m.performed,
            Document::Adjustment(m) => m.performed,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreatePurchaseDocument {
    #[serde(default)]
    pub performed: bool,
    pub date: Option<DateTime<Utc>>,
    pub store_id: Uuid,
    pub author_id: Uuid,
    pub vendor_id: Uuid,
    pub price_type_id: Uuid,
    #[validate(length(max = 2000))]
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateSellDocument {
    #[serde(default)]
    pub performed: bool,
    pub date: Option<DateTime<Utc>>,
    pub store_id: Uuid,
    pub author_id: Uuid,
    pub customer_id: Option<Uuid>,
    pub price_type_id: Uuid,
    #[validate(length(max = 2000))]
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateAdjustmentDocument {
    #[serde(default)]
    pub performed: bool,
    pub date: Option<DateTime<Utc>>,
    pub store_id: Uuid,
    pub author_id: Uuid,
    #[validate(length(max = 2000))]
    pub note: Option<String>,
}

/// Partial header update. Fields that the document kind does not have are
/// rejected.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct UpdateDocument {
    pub performed: Option<bool>,
    pub date: Option<DateTime<Utc>>,
    pub store_id: Option<Uuid>,
    pub author_id: Option<Uuid>,
    #[validate(length(max = 2000))]
    pub note: Option<String>,
    pub vendor_id: Option<Uuid>,
    pub customer_id: Option<Uuid>,
    pub price_type_id: Option<Uuid>,
}

impl UpdateDocument {
    fn assignments(&self) -> Vec<(DocumentField, Value)> {
        let mut out = Vec::new();
        if let Some(v) = self.performed {
            out.push((DocumentField::Performed, v.into()));
        }
        if let Some(v) = self.date {
            out.push((DocumentField::Date, v.into()));
        }
        if let Some(v) = self.store_id {
            out.push((DocumentField::Store, v.into()));
        }
        if let Some(v) = self.author_id {
            out.push((DocumentField::Author, v.into()));
        }
        if let Some(v) = &self.note {
            out.push((DocumentField::Note, v.clone().into()));
        }
        if let Some(v) = self.vendor_id {
            out.push((DocumentField::Vendor, v.into()));
        }
        if let Some(v) = self.customer_id {
            out.push((DocumentField::Customer, v.into()));
        }
        if let Some(v) = self.price_type_id {
            out.push((DocumentField::PriceType, v.into()));
        }
        out
    }
}

/// Purchase, sell and adjustment headers.
///
/// Deleting a document tombstones its live operations with the same
/// timestamp, and restoring it brings back exactly those operations. Both
/// recalculate stock (and WAC for purchases) in the same transaction.
#[derive(Clone)]
pub struct DocumentService {
    db: Arc<DatabaseConnection>,
    catalog: Arc<CatalogService>,
    quantities: ProductQuantityService,
    wac: WacService,
    event_sender: Option<EventSender>,
}

impl DocumentService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        catalog: Arc<CatalogService>,
        quantities: ProductQuantityService,
        wac: WacService,
        event_sender: Option<EventSender>,
    ) -> Self {
        Self {
            db,
            catalog,
            quantities,
            wac,
            event_sender,
        }
    }

    #[instrument(skip(self))]
    pub async fn create_purchase(
        &self,
        input: CreatePurchaseDocument,
    ) -> Result<document_purchase::Model, ServiceError> {
        input.validate()?;
        let txn = transaction::begin(&self.db).await?;
        let result = async {
            self.catalog.ensure_store(&txn, input.store_id).await?;
            document_purchase::ActiveModel {
                performed: Set(input.performed),
                date: Set(input.date.unwrap_or_else(base::now)),
                store_id: Set(input.store_id),
                author_id: Set(input.author_id),
                vendor_id: Set(input.vendor_id),
                price_type_id: Set(input.price_type_id),
                note: Set(input.note.clone()),
                deleted_at: Set(None),
                ..Default::default()
            }
            .insert(&*txn)
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to create purchase document");
                ServiceError::db_error(e)
            })
        }
        .await;
        let created = transaction::finish(txn, result).await?;

        info!(document_id = created.id, "Purchase document created");
        Ok(created)
    }

    #[instrument(skip(self))]
    pub async fn create_sell(
        &self,
        input: CreateSellDocument,
    ) -> Result<document_sell::Model, ServiceError> {
        input.validate()?;
        let txn = transaction::begin(&self.db).await?;
        let result = async {
            self.catalog.ensure_store(&txn, input.store_id).await?;
            document_sell::ActiveModel {
                performed: Set(input.performed),
                date: Set(input.date.unwrap_or_else(base::now)),
                store_id: Set(input.store_id),
                author_id: Set(input.author_id),
                customer_id: Set(input.customer_id),
                price_type_id: Set(input.price_type_id),
                note: Set(input.note.clone()),
                deleted_at: Set(None),
                ..Default::default()
            }
            .insert(&*txn)
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to create sell document");
                ServiceError::db_error(e)
            })
        }
        .await;
        let created = transaction::finish(txn, result).await?;

        info!(document_id = created.id, "Sell document created");
        Ok(created)
    }

    #[instrument(skip(self))]
    pub async fn create_adjustment(
        &self,
        input: CreateAdjustmentDocument,
    ) -> Result<document_adjustment::Model, ServiceError> {
        input.validate()?;
        let txn = transaction::begin(&self.db).await?;
        let result = async {
            self.catalog.ensure_store(&txn, input.store_id).await?;
            document_adjustment::ActiveModel {
                performed: Set(input.performed),
                date: Set(input.date.unwrap_or_else(base::now)),
                store_id: Set(input.store_id),
                author_id: Set(input.author_id),
                note: Set(input.note.clone()),
                deleted_at: Set(None),
                ..Default::default()
            }
            .insert(&*txn)
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to create adjustment document");
                ServiceError::db_error(e)
            })
        }
        .await;
        let created = transaction::finish(txn, result).await?;

        info!(document_id = created.id, "Adjustment document created");
        Ok(created)
    }

    /// A live document. Deleted documents are reported as missing.
    pub async fn find_document(&self, kind: DocumentKind, id: i32) -> Result<Document, ServiceError> {
        with_document_entity!(kind, E => {
            repositories::find_live::<E, _>(&*self.db, id)
                .await
                .map_err(ServiceError::db_error)?
                .map(E::wrap)
                .ok_or_else(|| ServiceError::not_found(&format!("{} document", kind), id))
        })
    }

    /// Newest first. Document ids are sequential.
    pub async fn list_documents(
        &self,
        kind: DocumentKind,
        include_deleted: bool,
    ) -> Result<Vec<Document>, ServiceError> {
        with_document_entity!(kind, E => {
            let query = if include_deleted {
                repositories::with_deleted::<E>()
            } else {
                repositories::live::<E>()
            };
            let rows = query
                .order_by_desc(E::id_column())
                .all(&*self.db)
                .await
                .map_err(ServiceError::db_error)?;
            Ok(rows.into_iter().map(E::wrap).collect())
        })
    }

    /// Applies a partial header update. A store change moves every operation
    /// of the document to the new store and recalculates their products.
    #[instrument(skip(self))]
    pub async fn update_document(
        &self,
        kind: DocumentKind,
        id: i32,
        patch: UpdateDocument,
    ) -> Result<Document, ServiceError> {
        patch.validate()?;
        let txn = transaction::begin(&self.db).await?;
        let result = with_document_entity!(kind, E => self.update_in::<E>(&txn, id, &patch).await);
        let (document, recalculated) = transaction::finish(txn, result).await?;

        let mut events = Vec::new();
        if !recalculated.is_empty() {
            events.push(LedgerEvent::StockRecalculated {
                product_ids: recalculated,
            });
        }
        events::publish(self.event_sender.as_ref(), events).await;

        info!(document_id = id, %kind, "Document updated");
        Ok(document)
    }

    /// Marks a document performed or not. The flag carries no state machine.
    pub async fn set_performed(
        &self,
        kind: DocumentKind,
        id: i32,
        performed: bool,
    ) -> Result<Document, ServiceError> {
        self.update_document(
            kind,
            id,
            UpdateDocument {
                performed: Some(performed),
                ..Default::default()
            },
        )
        .await
    }

    async fn update_in<E>(
        &self,
        txn: &DatabaseTransaction,
        id: i32,
        patch: &UpdateDocument,
    ) -> Result<(Document, Vec<Uuid>), ServiceError>
    where
        E: DocumentEntity,
        E::Model: Record<Key = i32>,
    {
        let existing = repositories::find_live::<E, _>(txn, id)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::not_found(&format!("{} document", E::KIND), id))?;

        let assignments = patch.assignments();
        if assignments.is_empty() {
            return Ok((E::wrap(existing), Vec::new()));
        }

        let new_store = patch
            .store_id
            .filter(|store_id| *store_id != E::store_of(&existing));
        if let Some(store_id) = new_store {
            self.catalog.ensure_store(txn, store_id).await?;
        }

        let mut update = E::update_many()
            .col_expr(E::updated_at_column(), Expr::value(base::now()))
            .filter(E::id_column().eq(id));
        for (field, value) in assignments {
            let column = E::column(field).ok_or_else(|| {
                ServiceError::ValidationError(format!(
                    "{:?} does not apply to {} documents",
                    field,
                    E::KIND
                ))
            })?;
            update = update.col_expr(column, Expr::value(value));
        }
        update.exec(txn).await.map_err(|e| {
            error!(error = %e, document_id = id, "Failed to update document");
            ServiceError::db_error(e)
        })?;

        let mut recalculated = Vec::new();
        if let Some(store_id) = new_store {
            recalculated = live_products_of(txn, E::KIND, &[id]).await?;
            lock_products(txn, &recalculated).await?;

            let link = E::KIND.operation_column();
            let moved = operation::Entity::update_many()
                .col_expr(operation::Column::StoreId, Expr::value(store_id))
                .col_expr(operation::Column::UpdatedAt, Expr::value(base::now()))
                .filter(link.eq(id))
                .exec(txn)
                .await
                .map_err(ServiceError::db_error)?;

            self.quantities.recalculate_in(txn, &recalculated).await?;
            info!(
                document_id = id,
                %store_id,
                operations = moved.rows_affected,
                "Document moved to another store"
            );
        }

        let updated = repositories::find_live::<E, _>(txn, id)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::not_found(&format!("{} document", E::KIND), id))?;

        Ok((E::wrap(updated), recalculated))
    }

    /// Soft-deletes the live documents among `ids` together with their live
    /// operations. Returns the number of documents deleted.
    #[instrument(skip(self))]
    pub async fn delete_documents(
        &self,
        kind: DocumentKind,
        ids: &[i32],
    ) -> Result<u64, ServiceError> {
        let txn = transaction::begin(&self.db).await?;
        let result = with_document_entity!(kind, E => self.delete_in::<E>(&txn, ids).await);
        let outcome = transaction::finish(txn, result).await?;

        self.publish_cascade(kind, outcome.clone(), true).await;
        info!(%kind, documents = outcome.documents.len(), "Documents deleted");
        Ok(outcome.documents.len() as u64)
    }

    /// Restores the deleted documents among `ids` and the operations their
    /// deletion removed. Returns the number of documents restored.
    #[instrument(skip(self))]
    pub async fn restore_documents(
        &self,
        kind: DocumentKind,
        ids: &[i32],
    ) -> Result<u64, ServiceError> {
        let txn = transaction::begin(&self.db).await?;
        let result = with_document_entity!(kind, E => self.restore_in::<E>(&txn, ids).await);
        let outcome = transaction::finish(txn, result).await?;

        self.publish_cascade(kind, outcome.clone(), false).await;
        info!(%kind, documents = outcome.documents.len(), "Documents restored");
        Ok(outcome.documents.len() as u64)
    }

    async fn delete_in<E>(
        &self,
        txn: &DatabaseTransaction,
        ids: &[i32],
    ) -> Result<CascadeOutcome, ServiceError>
    where
        E: DocumentEntity,
        E::Model: Record<Key = i32>,
    {
        let documents: Vec<i32> = repositories::live::<E>()
            .filter(E::id_column().is_in(ids.iter().copied()))
            .all(txn)
            .await
            .map_err(ServiceError::db_error)?
            .iter()
            .map(|d| d.meta().id)
            .collect();
        if documents.is_empty() {
            return Ok(CascadeOutcome::default());
        }

        let operations = operation::Entity::find()
            .filter(E::KIND.operation_column().is_in(documents.iter().copied()))
            .filter(operation::Column::DeletedAt.is_null())
            .all(txn)
            .await
            .map_err(ServiceError::db_error)?;

        let products = distinct_products(&operations);
        lock_products(txn, &products).await?;

        let at = base::now();
        repositories::soft_delete_many::<E, _>(txn, &documents, at)
            .await
            .map_err(ServiceError::db_error)?;
        let operation_ids: Vec<Uuid> = operations.iter().map(|op| op.id).collect();
        repositories::soft_delete_many::<operation::Entity, _>(txn, &operation_ids, at)
            .await
            .map_err(ServiceError::db_error)?;

        self.recalculate_in(txn, E::KIND, &products).await?;

        Ok(CascadeOutcome {
            documents,
            operations: operation_ids,
            products,
        })
    }

    async fn restore_in<E>(
        &self,
        txn: &DatabaseTransaction,
        ids: &[i32],
    ) -> Result<CascadeOutcome, ServiceError>
    where
        E: DocumentEntity,
        E::Model: Record<Key = i32>,
    {
        let deleted = repositories::with_deleted::<E>()
            .filter(E::id_column().is_in(ids.iter().copied()))
            .filter(E::deleted_at_column().is_not_null())
            .all(txn)
            .await
            .map_err(ServiceError::db_error)?;
        if deleted.is_empty() {
            return Ok(CascadeOutcome::default());
        }

        // Only the operations removed together with the document come back.
        let mut operations = Vec::new();
        for document in &deleted {
            let meta = document.meta();
            let Some(deleted_at) = meta.deleted_at else {
                continue;
            };
            let cascaded = operation::Entity::find()
                .filter(E::KIND.operation_column().eq(meta.id))
                .filter(operation::Column::DeletedAt.eq(deleted_at))
                .all(txn)
                .await
                .map_err(ServiceError::db_error)?;
            operations.extend(cascaded);
        }

        let products = distinct_products(&operations);
        lock_products(txn, &products).await?;

        let documents: Vec<i32> = deleted.iter().map(|d| d.meta().id).collect();
        let at = base::now();
        repositories::restore_many::<E, _>(txn, &documents, at)
            .await
            .map_err(ServiceError::db_error)?;
        let operation_ids: Vec<Uuid> = operations.iter().map(|op| op.id).collect();
        repositories::restore_many::<operation::Entity, _>(txn, &operation_ids, at)
            .await
            .map_err(ServiceError::db_error)?;

        self.recalculate_in(txn, E::KIND, &products).await?;

        Ok(CascadeOutcome {
            documents,
            operations: operation_ids,
            products,
        })
    }

    async fn recalculate_in(
        &self,
        txn: &DatabaseTransaction,
        kind: DocumentKind,
        products: &[Uuid],
    ) -> Result<(), ServiceError> {
        self.quantities.recalculate_in(txn, products).await?;
        if kind == DocumentKind::Purchase {
            for product_id in products {
                self.wac.recalculate_in(txn, *product_id).await?;
            }
        }
        Ok(())
    }

    async fn publish_cascade(&self, kind: DocumentKind, outcome: CascadeOutcome, deleted: bool) {
        if outcome.documents.is_empty() {
            return;
        }
        let mut events = Vec::new();
        if deleted {
            events.push(LedgerEvent::DocumentsDeleted {
                kind,
                document_ids: outcome.documents,
            });
            events.push(LedgerEvent::OperationsDeleted {
                operation_ids: outcome.operations,
            });
        } else {
            events.push(LedgerEvent::DocumentsRestored {
                kind,
                document_ids: outcome.documents,
            });
            events.push(LedgerEvent::OperationsRestored {
                operation_ids: outcome.operations,
            });
        }
        if kind == DocumentKind::Purchase {
            events.extend(
                outcome
                    .products
                    .iter()
                    .map(|product_id| LedgerEvent::WacRecalculated {
                        product_id: *product_id,
                    }),
            );
        }
        events.push(LedgerEvent::StockRecalculated {
            product_ids: outcome.products,
        });
        events::publish(self.event_sender.as_ref(), events).await;
    }
}

#[derive(Debug, Clone, Default)]
struct CascadeOutcome {
    documents: Vec<i32>,
    operations: Vec<Uuid>,
    products: Vec<Uuid>,
}

fn distinct_products(operations: &[operation::Model]) -> Vec<Uuid> {
    operations
        .iter()
        .map(|op| op.product_id)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Products of the live operations attached to the given documents.
async fn live_products_of(
    txn: &DatabaseTransaction,
    kind: DocumentKind,
    documents: &[i32],
) -> Result<Vec<Uuid>, ServiceError> {
    operation::Entity::find()
        .select_only()
        .column(operation::Column::ProductId)
        .distinct()
        .filter(kind.operation_column().is_in(documents.iter().copied()))
        .filter(operation::Column::DeletedAt.is_null())
        .into_tuple::<Uuid>()
        .all(txn)
        .await
        .map_err(ServiceError::db_error)
}

#[async_trait]
impl DocumentLookup for DocumentService {
    async fn document_store(
        &self,
        txn: &DatabaseTransaction,
        document: DocumentRef,
    ) -> Result<Uuid, ServiceError> {
        let id = document.id();
        let store = with_document_entity!(document.kind(), E => {
            repositories::find_live::<E, _>(txn, id)
                .await
                .map_err(ServiceError::db_error)?
                .map(|model| E::store_of(&model))
        });

        store.ok_or_else(|| {
            warn!(%document, "Operation references a missing document");
            ServiceError::NotFound(format!("{} not found", document))
        })
    }
}
