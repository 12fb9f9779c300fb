use async_trait::async_trait;
use sea_orm::DatabaseTransaction;
use uuid::Uuid;

use crate::{entities::DocumentRef, errors::ServiceError};

// Ledger core
pub mod operation_props;
pub mod operations;
pub mod product_quantities;
pub mod wac;

// Collaborators the core validates against
pub mod catalog;
pub mod documents;

// Explicit wiring
pub mod factory;

/// Existence checks for products referenced by operations.
#[async_trait]
pub trait ProductLookup: Send + Sync {
    /// Fails with `NotFound` unless the product exists and is not deleted.
    async fn ensure_product(
        &self,
        txn: &DatabaseTransaction,
        product_id: Uuid,
    ) -> Result<(), ServiceError>;
}

/// Resolves the store that owns a document.
#[async_trait]
pub trait DocumentLookup: Send + Sync {
    /// Store of a live document. Fails with `NotFound` when the document is
    /// missing or deleted.
    async fn document_store(
        &self,
        txn: &DatabaseTransaction,
        document: DocumentRef,
    ) -> Result<Uuid, ServiceError>;
}
