use async_trait::async_trait;
use sea_orm::{ActiveModelTrait, DatabaseConnection, DatabaseTransaction, Set};
use std::sync::Arc;
use tracing::{error, info, instrument};
use uuid::Uuid;

use crate::{
    entities::{product, store},
    errors::ServiceError,
    repositories,
    services::ProductLookup,
};

/// Minimal product and store registry. Full reference-data management lives
/// outside the ledger; this is what the ledger needs to validate against.
#[derive(Clone)]
pub struct CatalogService {
    db: Arc<DatabaseConnection>,
}

impl CatalogService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    #[instrument(skip(self))]
    pub async fn create_store(&self, name: &str) -> Result<store::Model, ServiceError> {
        if name.trim().is_empty() {
            return Err(ServiceError::ValidationError(
                "store name must not be empty".to_string(),
            ));
        }

        let created = store::ActiveModel {
            id: Set(Uuid::now_v7()),
            name: Set(name.trim().to_string()),
            deleted_at: Set(None),
            ..Default::default()
        }
        .insert(&*self.db)
        .await
        .map_err(|e| {
            error!("Failed to create store: {}", e);
            ServiceError::db_error(e)
        })?;

        info!(store_id = %created.id, "Store created");
        Ok(created)
    }

    /// Creates a product with a zero WAC. Articles are unique.
    #[instrument(skip(self))]
    pub async fn create_product(
        &self,
        name: &str,
        article: &str,
    ) -> Result<product::Model, ServiceError> {
        if name.trim().is_empty() || article.trim().is_empty() {
            return Err(ServiceError::ValidationError(
                "product name and article must not be empty".to_string(),
            ));
        }

        let created = product::ActiveModel {
            id: Set(Uuid::now_v7()),
            name: Set(name.trim().to_string()),
            article: Set(article.trim().to_string()),
            wac: Set(rust_decimal::Decimal::ZERO),
            deleted_at: Set(None),
            ..Default::default()
        }
        .insert(&*self.db)
        .await
        .map_err(|e| {
            error!("Failed to create product: {}", e);
            ServiceError::db_error(e)
        })?;

        info!(product_id = %created.id, article = %created.article, "Product created");
        Ok(created)
    }

    pub async fn find_product(&self, product_id: Uuid) -> Result<product::Model, ServiceError> {
        repositories::find_live::<product::Entity, _>(&*self.db, product_id)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::not_found("Product", product_id))
    }

    pub async fn find_store(&self, store_id: Uuid) -> Result<store::Model, ServiceError> {
        repositories::find_live::<store::Entity, _>(&*self.db, store_id)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::not_found("Store", store_id))
    }

    /// Fails with `NotFound` unless the store exists and is not deleted.
    pub async fn ensure_store(
        &self,
        txn: &DatabaseTransaction,
        store_id: Uuid,
    ) -> Result<(), ServiceError> {
        repositories::find_live::<store::Entity, _>(txn, store_id)
            .await
            .map_err(ServiceError::db_error)?
            .map(|_| ())
            .ok_or_else(|| ServiceError::not_found("Store", store_id))
    }
}

#[async_trait]
impl ProductLookup for CatalogService {
    async fn ensure_product(
        &self,
        txn: &DatabaseTransaction,
        product_id: Uuid,
    ) -> Result<(), ServiceError> {
        repositories::find_live::<product::Entity, _>(txn, product_id)
            .await
            .map_err(ServiceError::db_error)?
            .map(|_| ())
            .ok_or_else(|| ServiceError::not_found("Product", product_id))
    }
}
