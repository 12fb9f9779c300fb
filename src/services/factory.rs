use std::sync::Arc;

use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::{
    db::{transaction, DbPool},
    entities::product_quantity,
    errors::ServiceError,
    events::{self, EventSender, LedgerEvent},
    services::{
        catalog::CatalogService, documents::DocumentService,
        operation_props::OperationPropsService, operations::OperationService,
        product_quantities::ProductQuantityService, wac::WacService,
    },
};

/// Factory for creating service instances with shared dependencies
pub struct ServiceFactory {
    db_pool: Arc<DbPool>,
    event_sender: Option<EventSender>,
}

impl ServiceFactory {
    pub fn new(db_pool: Arc<DbPool>, event_sender: Option<EventSender>) -> Self {
        Self {
            db_pool,
            event_sender,
        }
    }

    pub fn catalog_service(&self) -> CatalogService {
        CatalogService::new(self.db_pool.clone())
    }

    pub fn quantity_service(&self) -> ProductQuantityService {
        ProductQuantityService::new(self.db_pool.clone())
    }

    pub fn wac_service(&self) -> WacService {
        WacService::new(self.db_pool.clone())
    }

    pub fn operation_props_service(&self) -> OperationPropsService {
        OperationPropsService::new(self.db_pool.clone())
    }

    pub fn document_service(&self, catalog: Arc<CatalogService>) -> DocumentService {
        DocumentService::new(
            self.db_pool.clone(),
            catalog,
            self.quantity_service(),
            self.wac_service(),
            self.event_sender.clone(),
        )
    }

    /// The operation ledger, validating products against `catalog` and
    /// resolving stores through `documents`.
    pub fn operation_service(
        &self,
        catalog: Arc<CatalogService>,
        documents: Arc<DocumentService>,
    ) -> OperationService {
        OperationService::new(
            self.db_pool.clone(),
            catalog,
            documents,
            self.operation_props_service(),
            self.quantity_service(),
            self.wac_service(),
            self.event_sender.clone(),
        )
    }

    pub fn db_pool(&self) -> &Arc<DbPool> {
        &self.db_pool
    }

    pub fn event_sender(&self) -> Option<&EventSender> {
        self.event_sender.as_ref()
    }
}

/// Derived state of one product after a rebuild.
#[derive(Debug, Clone, Serialize)]
pub struct RebuiltProduct {
    pub product_id: Uuid,
    pub wac: Decimal,
    pub quantities: Vec<product_quantity::Model>,
}

/// All ledger services, wired once.
#[derive(Clone)]
pub struct LedgerServices {
    pub catalog: Arc<CatalogService>,
    pub documents: Arc<DocumentService>,
    pub operations: Arc<OperationService>,
    pub operation_props: Arc<OperationPropsService>,
    pub quantities: Arc<ProductQuantityService>,
    pub wac: Arc<WacService>,
    db_pool: Arc<DbPool>,
    event_sender: Option<EventSender>,
}

impl LedgerServices {
    pub fn new(factory: &ServiceFactory) -> Self {
        let catalog = Arc::new(factory.catalog_service());
        let documents = Arc::new(factory.document_service(catalog.clone()));
        let operations = Arc::new(factory.operation_service(catalog.clone(), documents.clone()));

        Self {
            catalog,
            documents,
            operations,
            operation_props: Arc::new(factory.operation_props_service()),
            quantities: Arc::new(factory.quantity_service()),
            wac: Arc::new(factory.wac_service()),
            db_pool: factory.db_pool().clone(),
            event_sender: factory.event_sender().cloned(),
        }
    }

    /// Recomputes stock and WAC for `product_ids` from the live operations in
    /// one transaction. Used to repair derived state after out-of-band edits.
    #[instrument(skip(self), fields(products = product_ids.len()))]
    pub async fn rebuild(&self, product_ids: &[Uuid]) -> Result<Vec<RebuiltProduct>, ServiceError> {
        let mut ids = product_ids.to_vec();
        ids.sort();
        ids.dedup();

        let txn = transaction::begin(&self.db_pool).await?;
        let result = async {
            let quantities = self.quantities.recalculate_in(&txn, &ids).await?;
            let mut rebuilt = Vec::with_capacity(ids.len());
            for product_id in &ids {
                let wac = self.wac.recalculate_in(&txn, *product_id).await?;
                rebuilt.push(RebuiltProduct {
                    product_id: *product_id,
                    wac,
                    quantities: quantities
                        .iter()
                        .filter(|row| row.product_id == *product_id)
                        .cloned()
                        .collect(),
                });
            }
            Ok(rebuilt)
        }
        .await;
        let rebuilt = transaction::finish(txn, result).await?;

        let mut events: Vec<LedgerEvent> = ids
            .iter()
            .map(|product_id| LedgerEvent::WacRecalculated {
                product_id: *product_id,
            })
            .collect();
        if !ids.is_empty() {
            events.push(LedgerEvent::StockRecalculated { product_ids: ids });
        }
        events::publish(self.event_sender.as_ref(), events).await;

        info!(count = rebuilt.len(), "Derived state rebuilt");
        Ok(rebuilt)
    }
}
