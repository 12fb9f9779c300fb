#![allow(dead_code)]

use std::sync::Arc;

use inventory_ledger::{
    db::{self, DbConfig, DbPool},
    entities::{product, store, DocumentRef},
    events::{EventSender, LedgerEvent},
    services::{
        documents::{CreateAdjustmentDocument, CreatePurchaseDocument, CreateSellDocument},
        operation_props::CostPropsInput,
        operations::{CreateOperation, OperationDetails},
    },
    LedgerServices, ServiceFactory,
};
use rust_decimal::Decimal;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Ledger services over a fresh, migrated in-memory SQLite database.
pub struct TestLedger {
    pub db: Arc<DbPool>,
    pub services: LedgerServices,
    events: mpsc::Receiver<LedgerEvent>,
}

impl TestLedger {
    pub async fn new() -> Self {
        Self::with_config(DbConfig::sqlite_in_memory(), 256).await
    }

    /// Ledger over the PostgreSQL database named by `DATABASE_URL`, or `None`
    /// when the variable is unset. Rows from earlier runs are left in place,
    /// so callers create their own stores and products.
    pub async fn postgres() -> Option<Self> {
        let url = std::env::var("DATABASE_URL").ok()?;
        let config = DbConfig {
            url,
            max_connections: 20,
            sqlx_logging: false,
            ..Default::default()
        };
        Some(Self::with_config(config, 4096).await)
    }

    async fn with_config(config: DbConfig, event_capacity: usize) -> Self {
        let pool = db::establish_connection_with_config(&config)
            .await
            .expect("database");
        db::run_migrations(&pool).await.expect("migrations");
        let db = Arc::new(pool);

        let (sender, events) = EventSender::channel(event_capacity);
        let factory = ServiceFactory::new(db.clone(), Some(sender));
        let services = LedgerServices::new(&factory);

        Self {
            db,
            services,
            events,
        }
    }

    /// Events published so far.
    pub fn drain_events(&mut self) -> Vec<LedgerEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            out.push(event);
        }
        out
    }

    pub async fn store(&self, name: &str) -> store::Model {
        self.services
            .catalog
            .create_store(name)
            .await
            .expect("create store")
    }

    pub async fn product(&self, article: &str) -> product::Model {
        self.services
            .catalog
            .create_product(&format!("Product {}", article), article)
            .await
            .expect("create product")
    }

    pub async fn purchase(&self, store_id: Uuid) -> DocumentRef {
        let created = self
            .services
            .documents
            .create_purchase(CreatePurchaseDocument {
                performed: true,
                date: None,
                store_id,
                author_id: Uuid::new_v4(),
                vendor_id: Uuid::new_v4(),
                price_type_id: Uuid::new_v4(),
                note: None,
            })
            .await
            .expect("create purchase");
        DocumentRef::Purchase(created.id)
    }

    pub async fn sell(&self, store_id: Uuid) -> DocumentRef {
        let created = self
            .services
            .documents
            .create_sell(CreateSellDocument {
                performed: true,
                date: None,
                store_id,
                author_id: Uuid::new_v4(),
                customer_id: None,
                price_type_id: Uuid::new_v4(),
                note: None,
            })
            .await
            .expect("create sell");
        DocumentRef::Sell(created.id)
    }

    pub async fn adjustment(&self, store_id: Uuid) -> DocumentRef {
        let created = self
            .services
            .documents
            .create_adjustment(CreateAdjustmentDocument {
                performed: true,
                date: None,
                store_id,
                author_id: Uuid::new_v4(),
                note: Some("stock count".to_string()),
            })
            .await
            .expect("create adjustment");
        DocumentRef::Adjustment(created.id)
    }

    /// Records a movement; negative `signed_quantity` is outbound.
    pub async fn record(
        &self,
        product_id: Uuid,
        document: DocumentRef,
        signed_quantity: i32,
    ) -> OperationDetails {
        let input = CreateOperation::new(
            signed_quantity.abs(),
            signed_quantity > 0,
            product_id,
            document,
        );
        self.services
            .operations
            .create_operation(input)
            .await
            .expect("record operation")
    }

    /// Records an inbound purchase line with a unit price.
    pub async fn record_priced(
        &self,
        product_id: Uuid,
        document: DocumentRef,
        quantity: i32,
        unit_price: Decimal,
    ) -> OperationDetails {
        let input = CreateOperation::new(quantity, true, product_id, document)
            .with_cost_props(CostPropsInput::new(unit_price, Decimal::ONE));
        self.services
            .operations
            .create_operation(input)
            .await
            .expect("record priced operation")
    }

    pub async fn quantity(&self, product_id: Uuid, store_id: Uuid) -> i64 {
        self.services
            .quantities
            .get_current_quantity(product_id, store_id)
            .await
            .expect("read quantity")
    }

    pub async fn wac(&self, product_id: Uuid) -> Decimal {
        self.services
            .wac
            .get_wac(product_id)
            .await
            .expect("read wac")
    }
}
