use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240601_000001_create_catalog_tables::Migration),
            Box::new(m20240601_000002_create_document_tables::Migration),
            Box::new(m20240601_000003_create_operation_tables::Migration),
            Box::new(m20240601_000004_create_product_quantities_table::Migration),
        ]
    }
}

// Migration implementations

mod m20240601_000001_create_catalog_tables {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000001_create_catalog_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Stores::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Stores::Id).uuid().not_null().primary_key())
                        .col(ColumnDef::new(Stores::Name).string().not_null())
                        .col(
                            ColumnDef::new(Stores::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Stores::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Stores::DeletedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(Products::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Products::Id).uuid().not_null().primary_key())
                        .col(ColumnDef::new(Products::Name).string().not_null())
                        .col(
                            ColumnDef::new(Products::Article)
                                .string()
                                .not_null()
                                .unique_key(),
                        )
                        .col(
                            ColumnDef::new(Products::Wac)
                                .decimal_len(12, 2)
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Products::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Products::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Products::DeletedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Products::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Stores::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub enum Stores {
        Table,
        Id,
        Name,
        CreatedAt,
        UpdatedAt,
        DeletedAt,
    }

    #[derive(DeriveIden)]
    pub enum Products {
        Table,
        Id,
        Name,
        Article,
        Wac,
        CreatedAt,
        UpdatedAt,
        DeletedAt,
    }
}

mod m20240601_000002_create_document_tables {

    use super::m20240601_000001_create_catalog_tables::Stores;
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000002_create_document_tables"
        }
    }

    /// Columns every document header carries, in table order.
    fn header_table<T>(table: T, extra: Vec<ColumnDef>, fk_name: &str) -> TableCreateStatement
    where
        T: Iden + Copy + 'static,
    {
        let mut stmt = Table::create();
        stmt.table(table)
            .if_not_exists()
            .col(
                ColumnDef::new(Document::Id)
                    .integer()
                    .not_null()
                    .auto_increment()
                    .primary_key(),
            )
            .col(
                ColumnDef::new(Document::Performed)
                    .boolean()
                    .not_null()
                    .default(false),
            )
            .col(
                ColumnDef::new(Document::Date)
                    .timestamp_with_time_zone()
                    .not_null(),
            )
            .col(ColumnDef::new(Document::StoreId).uuid().not_null())
            .col(ColumnDef::new(Document::AuthorId).uuid().not_null());

        for mut col in extra {
            stmt.col(&mut col);
        }

        stmt.col(ColumnDef::new(Document::Note).text().null())
            .col(
                ColumnDef::new(Document::CreatedAt)
                    .timestamp_with_time_zone()
                    .not_null(),
            )
            .col(
                ColumnDef::new(Document::UpdatedAt)
                    .timestamp_with_time_zone()
                    .not_null(),
            )
            .col(
                ColumnDef::new(Document::DeletedAt)
                    .timestamp_with_time_zone()
                    .null(),
            )
            .foreign_key(
                ForeignKey::create()
                    .name(fk_name)
                    .from(table, Document::StoreId)
                    .to(Stores::Table, Stores::Id)
                    .on_delete(ForeignKeyAction::Restrict),
            )
            .to_owned()
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(header_table(
                    DocumentPurchases::Table,
                    vec![
                        ColumnDef::new(Document::VendorId).uuid().not_null().to_owned(),
                        ColumnDef::new(Document::PriceTypeId).uuid().not_null().to_owned(),
                    ],
                    "fk_document_purchases_store",
                ))
                .await?;

            manager
                .create_table(header_table(
                    DocumentSells::Table,
                    vec![
                        ColumnDef::new(Document::CustomerId).uuid().null().to_owned(),
                        ColumnDef::new(Document::PriceTypeId).uuid().not_null().to_owned(),
                    ],
                    "fk_document_sells_store",
                ))
                .await?;

            manager
                .create_table(header_table(
                    DocumentAdjustments::Table,
                    Vec::new(),
                    "fk_document_adjustments_store",
                ))
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(DocumentAdjustments::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(DocumentSells::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(DocumentPurchases::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden, Clone, Copy)]
    pub enum DocumentPurchases {
        Table,
    }

    #[derive(DeriveIden, Clone, Copy)]
    pub enum DocumentSells {
        Table,
    }

    #[derive(DeriveIden, Clone, Copy)]
    pub enum DocumentAdjustments {
        Table,
    }

    #[derive(DeriveIden)]
    pub enum Document {
        Id,
        Performed,
        Date,
        StoreId,
        AuthorId,
        VendorId,
        CustomerId,
        PriceTypeId,
        Note,
        CreatedAt,
        UpdatedAt,
        DeletedAt,
    }
}

mod m20240601_000003_create_operation_tables {

    use super::m20240601_000001_create_catalog_tables::{Products, Stores};
    use super::m20240601_000002_create_document_tables::{
        Document, DocumentAdjustments, DocumentPurchases, DocumentSells,
    };
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000003_create_operation_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Operations::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Operations::Id).uuid().not_null().primary_key())
                        .col(ColumnDef::new(Operations::Quantity).integer().not_null())
                        .col(ColumnDef::new(Operations::IsInbound).boolean().not_null())
                        .col(ColumnDef::new(Operations::ProductId).uuid().not_null())
                        .col(ColumnDef::new(Operations::StoreId).uuid().not_null())
                        .col(ColumnDef::new(Operations::PurchaseDocumentId).integer().null())
                        .col(ColumnDef::new(Operations::SellDocumentId).integer().null())
                        .col(
                            ColumnDef::new(Operations::AdjustmentDocumentId)
                                .integer()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(Operations::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Operations::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Operations::DeletedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_operations_product")
                                .from(Operations::Table, Operations::ProductId)
                                .to(Products::Table, Products::Id)
                                .on_delete(ForeignKeyAction::Restrict),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_operations_store")
                                .from(Operations::Table, Operations::StoreId)
                                .to(Stores::Table, Stores::Id)
                                .on_delete(ForeignKeyAction::Restrict),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_operations_purchase_document")
                                .from(Operations::Table, Operations::PurchaseDocumentId)
                                .to(DocumentPurchases::Table, Document::Id)
                                .on_delete(ForeignKeyAction::Restrict),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_operations_sell_document")
                                .from(Operations::Table, Operations::SellDocumentId)
                                .to(DocumentSells::Table, Document::Id)
                                .on_delete(ForeignKeyAction::Restrict),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_operations_adjustment_document")
                                .from(Operations::Table, Operations::AdjustmentDocumentId)
                                .to(DocumentAdjustments::Table, Document::Id)
                                .on_delete(ForeignKeyAction::Restrict),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_operations_product_store")
                        .table(Operations::Table)
                        .col(Operations::ProductId)
                        .col(Operations::StoreId)
                        .to_owned(),
                )
                .await?;

            for (name, column) in [
                ("idx_operations_purchase_document", Operations::PurchaseDocumentId),
                ("idx_operations_sell_document", Operations::SellDocumentId),
                ("idx_operations_adjustment_document", Operations::AdjustmentDocumentId),
            ] {
                manager
                    .create_index(
                        Index::create()
                            .if_not_exists()
                            .name(name)
                            .table(Operations::Table)
                            .col(column)
                            .to_owned(),
                    )
                    .await?;
            }

            manager
                .create_table(
                    Table::create()
                        .table(OperationProps::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(OperationProps::Id)
                                .uuid()
                                .not_null()
                                .primary_key(),
                        )
                        .col(
                            ColumnDef::new(OperationProps::OperationId)
                                .uuid()
                                .not_null()
                                .unique_key(),
                        )
                        .col(
                            ColumnDef::new(OperationProps::UnitPrice)
                                .decimal_len(12, 2)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(OperationProps::ExchangeRate)
                                .decimal_len(12, 2)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(OperationProps::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(OperationProps::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_operation_props_operation")
                                .from(OperationProps::Table, OperationProps::OperationId)
                                .to(Operations::Table, Operations::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(OperationProps::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Operations::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Operations {
        Table,
        Id,
        Quantity,
        IsInbound,
        ProductId,
        StoreId,
        PurchaseDocumentId,
        SellDocumentId,
        AdjustmentDocumentId,
        CreatedAt,
        UpdatedAt,
        DeletedAt,
    }

    #[derive(DeriveIden)]
    enum OperationProps {
        Table,
        Id,
        OperationId,
        UnitPrice,
        ExchangeRate,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240601_000004_create_product_quantities_table {

    use super::m20240601_000001_create_catalog_tables::{Products, Stores};
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000004_create_product_quantities_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(ProductQuantities::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(ProductQuantities::Id)
                                .uuid()
                                .not_null()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(ProductQuantities::ProductId).uuid().not_null())
                        .col(ColumnDef::new(ProductQuantities::StoreId).uuid().not_null())
                        .col(
                            ColumnDef::new(ProductQuantities::Quantity)
                                .big_integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(ProductQuantities::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ProductQuantities::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_product_quantities_product")
                                .from(ProductQuantities::Table, ProductQuantities::ProductId)
                                .to(Products::Table, Products::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_product_quantities_store")
                                .from(ProductQuantities::Table, ProductQuantities::StoreId)
                                .to(Stores::Table, Stores::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .unique()
                        .name("uq_product_quantities_product_store")
                        .table(ProductQuantities::Table)
                        .col(ProductQuantities::ProductId)
                        .col(ProductQuantities::StoreId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(ProductQuantities::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum ProductQuantities {
        Table,
        Id,
        ProductId,
        StoreId,
        Quantity,
        CreatedAt,
        UpdatedAt,
    }
}
