use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use inventory_ledger::{
    config::{self, AppConfig},
    db,
    entities::{DocumentKind, DocumentRef},
    events::{self, EventSender},
    services::{
        documents::{
            CreateAdjustmentDocument, CreatePurchaseDocument, CreateSellDocument, UpdateDocument,
        },
        operation_props::CostPropsInput,
        operations::{CreateOperation, OperationFilter, UpdateOperation},
    },
    LedgerServices, ServiceFactory,
};
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let context = CliContext::initialize().await?;

    match cli.command {
        Commands::Migrate => {
            db::run_migrations(&context.db)
                .await
                .context("failed to run migrations")?;
            println!("Migrations applied");
        }
        Commands::Store(command) => handle_store_command(&context, command, cli.json).await?,
        Commands::Product(command) => handle_product_command(&context, command, cli.json).await?,
        Commands::Document(command) => {
            handle_document_command(&context, command, cli.json).await?
        }
        Commands::Operation(command) => {
            handle_operation_command(&context, command, cli.json).await?
        }
        Commands::Quantity(args) => {
            let services = context.services();
            match args.store_id {
                Some(store_id) => {
                    let quantity = services
                        .quantities
                        .get_current_quantity(args.product_id, store_id)
                        .await
                        .context("failed to read quantity")?;
                    if cli.json {
                        print_json(&quantity)?;
                    } else {
                        println!("{}", quantity);
                    }
                }
                None => {
                    let rows = services
                        .quantities
                        .quantities_for_product(args.product_id)
                        .await
                        .context("failed to read quantities")?;
                    if cli.json {
                        print_json(&rows)?;
                    } else {
                        for row in rows {
                            println!("- store {} • {}", row.store_id, row.quantity);
                        }
                    }
                }
            }
        }
        Commands::Wac { product_id } => {
            let wac = context
                .services()
                .wac
                .get_wac(product_id)
                .await
                .context("failed to read WAC")?;
            if cli.json {
                print_json(&wac)?;
            } else {
                println!("{}", wac);
            }
        }
        Commands::Rebuild { product_ids } => {
            let rebuilt = context
                .services()
                .rebuild(&product_ids)
                .await
                .context("failed to rebuild derived state")?;
            if cli.json {
                print_json(&rebuilt)?;
            } else {
                for product in rebuilt {
                    println!(
                        "Product {} • WAC {} • {} store row(s)",
                        product.product_id,
                        product.wac,
                        product.quantities.len()
                    );
                }
            }
        }
    }

    Ok(())
}

#[derive(Parser)]
#[command(name = "ledger", about = "Inventory ledger operations and derived stock", version)]
struct Cli {
    #[arg(
        long,
        global = true,
        action = ArgAction::SetTrue,
        help = "Render command output as pretty JSON"
    )]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending schema migrations
    Migrate,
    #[command(subcommand)]
    Store(StoreCommands),
    #[command(subcommand)]
    Product(ProductCommands),
    #[command(subcommand)]
    Document(DocumentCommands),
    #[command(subcommand)]
    Operation(OperationCommands),
    /// Show on-hand quantity of a product
    Quantity(QuantityArgs),
    /// Show the stored weighted average cost of a product
    Wac {
        product_id: Uuid,
    },
    /// Recompute quantities and WAC from live operations
    Rebuild {
        #[arg(required = true)]
        product_ids: Vec<Uuid>,
    },
}

#[derive(Subcommand)]
enum StoreCommands {
    Create { name: String },
}

#[derive(Subcommand)]
enum ProductCommands {
    Create { name: String, article: String },
}

#[derive(Subcommand)]
enum DocumentCommands {
    Create(CreateDocumentArgs),
    /// Change the store of a document, moving its operations with it
    SetStore {
        kind: DocumentKind,
        id: i32,
        store_id: Uuid,
    },
    List {
        kind: DocumentKind,
        #[arg(long, action = ArgAction::SetTrue)]
        include_deleted: bool,
    },
    Delete {
        kind: DocumentKind,
        #[arg(required = true)]
        ids: Vec<i32>,
    },
    Restore {
        kind: DocumentKind,
        #[arg(required = true)]
        ids: Vec<i32>,
    },
}

#[derive(Args)]
struct CreateDocumentArgs {
    kind: DocumentKind,
    #[arg(long)]
    store_id: Uuid,
    #[arg(long)]
    author_id: Uuid,
    /// Vendor for purchases, customer for sells
    #[arg(long)]
    counterparty_id: Option<Uuid>,
    #[arg(long)]
    price_type_id: Option<Uuid>,
    #[arg(long, action = ArgAction::SetTrue)]
    performed: bool,
    #[arg(long)]
    note: Option<String>,
}

#[derive(Subcommand)]
enum OperationCommands {
    Record(RecordOperationArgs),
    Update(UpdateOperationArgs),
    Delete {
        #[arg(required = true)]
        ids: Vec<Uuid>,
    },
    Restore {
        #[arg(required = true)]
        ids: Vec<Uuid>,
    },
    Show {
        id: Uuid,
    },
    List(ListOperationsArgs),
}

#[derive(Args)]
struct DocumentArgs {
    #[arg(long)]
    purchase: Option<i32>,
    #[arg(long)]
    sell: Option<i32>,
    #[arg(long)]
    adjustment: Option<i32>,
}

#[derive(Args)]
struct RecordOperationArgs {
    #[arg(long)]
    product_id: Uuid,
    #[arg(long)]
    quantity: i32,
    /// Record an outbound movement
    #[arg(long, action = ArgAction::SetTrue)]
    outbound: bool,
    #[command(flatten)]
    document: DocumentArgs,
    #[arg(long, requires = "exchange_rate")]
    unit_price: Option<Decimal>,
    #[arg(long, requires = "unit_price")]
    exchange_rate: Option<Decimal>,
}

#[derive(Args)]
struct UpdateOperationArgs {
    id: Uuid,
    #[arg(long)]
    product_id: Option<Uuid>,
    #[arg(long)]
    quantity: Option<i32>,
    #[arg(long)]
    inbound: Option<bool>,
    #[command(flatten)]
    document: DocumentArgs,
    #[arg(long, requires = "exchange_rate")]
    unit_price: Option<Decimal>,
    #[arg(long, requires = "unit_price")]
    exchange_rate: Option<Decimal>,
    /// Drop the line's unit price and exchange rate
    #[arg(long, action = ArgAction::SetTrue, conflicts_with = "unit_price")]
    clear_price: bool,
}

#[derive(Args)]
struct ListOperationsArgs {
    #[command(flatten)]
    document: DocumentArgs,
    #[arg(long)]
    product_id: Option<Uuid>,
    #[arg(long)]
    store_id: Option<Uuid>,
    #[arg(long, action = ArgAction::SetTrue)]
    include_deleted: bool,
}

#[derive(Args)]
struct QuantityArgs {
    product_id: Uuid,
    #[arg(long)]
    store_id: Option<Uuid>,
}

fn cost_props(unit_price: Option<Decimal>, exchange_rate: Option<Decimal>) -> Option<CostPropsInput> {
    match (unit_price, exchange_rate) {
        (Some(price), Some(rate)) => Some(CostPropsInput::new(price, rate)),
        _ => None,
    }
}

async fn handle_store_command(context: &CliContext, command: StoreCommands, json: bool) -> Result<()> {
    match command {
        StoreCommands::Create { name } => {
            let store = context
                .services()
                .catalog
                .create_store(&name)
                .await
                .context("failed to create store")?;
            if json {
                print_json(&store)?;
            } else {
                println!("Store {} created ({})", store.name, store.id);
            }
        }
    }
    Ok(())
}

async fn handle_product_command(
    context: &CliContext,
    command: ProductCommands,
    json: bool,
) -> Result<()> {
    match command {
        ProductCommands::Create { name, article } => {
            let product = context
                .services()
                .catalog
                .create_product(&name, &article)
                .await
                .context("failed to create product")?;
            if json {
                print_json(&product)?;
            } else {
                println!("Product {} [{}] created ({})", product.name, product.article, product.id);
            }
        }
    }
    Ok(())
}

async fn handle_document_command(
    context: &CliContext,
    command: DocumentCommands,
    json: bool,
) -> Result<()> {
    let documents = context.services().documents;

    match command {
        DocumentCommands::Create(args) => {
            let document_ref = match args.kind {
                DocumentKind::Purchase => {
                    let created = documents
                        .create_purchase(CreatePurchaseDocument {
                            performed: args.performed,
                            date: None,
                            store_id: args.store_id,
                            author_id: args.author_id,
                            vendor_id: args
                                .counterparty_id
                                .context("--counterparty-id (vendor) is required for purchases")?,
                            price_type_id: args
                                .price_type_id
                                .context("--price-type-id is required for purchases")?,
                            note: args.note,
                        })
                        .await
                        .context("failed to create purchase document")?;
                    DocumentRef::Purchase(created.id)
                }
                DocumentKind::Sell => {
                    let created = documents
                        .create_sell(CreateSellDocument {
                            performed: args.performed,
                            date: None,
                            store_id: args.store_id,
                            author_id: args.author_id,
                            customer_id: args.counterparty_id,
                            price_type_id: args
                                .price_type_id
                                .context("--price-type-id is required for sells")?,
                            note: args.note,
                        })
                        .await
                        .context("failed to create sell document")?;
                    DocumentRef::Sell(created.id)
                }
                DocumentKind::Adjustment => {
                    let created = documents
                        .create_adjustment(CreateAdjustmentDocument {
                            performed: args.performed,
                            date: None,
                            store_id: args.store_id,
                            author_id: args.author_id,
                            note: args.note,
                        })
                        .await
                        .context("failed to create adjustment document")?;
                    DocumentRef::Adjustment(created.id)
                }
            };
            if json {
                print_json(&document_ref)?;
            } else {
                println!("Document {} created", document_ref);
            }
        }
        DocumentCommands::SetStore { kind, id, store_id } => {
            let document = documents
                .update_document(
                    kind,
                    id,
                    UpdateDocument {
                        store_id: Some(store_id),
                        ..Default::default()
                    },
                )
                .await
                .context("failed to update document")?;
            if json {
                print_json(&document)?;
            } else {
                println!("Document {} now belongs to store {}", document.document_ref(), store_id);
            }
        }
        DocumentCommands::List {
            kind,
            include_deleted,
        } => {
            let listed = documents
                .list_documents(kind, include_deleted)
                .await
                .context("failed to list documents")?;
            if json {
                print_json(&listed)?;
            } else {
                for document in listed {
                    let status = if document.meta().is_deleted() {
                        "deleted"
                    } else if document.performed() {
                        "performed"
                    } else {
                        "draft"
                    };
                    println!(
                        "- {} • store {} • {}",
                        document.document_ref(),
                        document.store_id(),
                        status
                    );
                }
            }
        }
        DocumentCommands::Delete { kind, ids } => {
            let count = documents
                .delete_documents(kind, &ids)
                .await
                .context("failed to delete documents")?;
            println!("{} {} document(s) deleted", count, kind);
        }
        DocumentCommands::Restore { kind, ids } => {
            let count = documents
                .restore_documents(kind, &ids)
                .await
                .context("failed to restore documents")?;
            println!("{} {} document(s) restored", count, kind);
        }
    }
    Ok(())
}

async fn handle_operation_command(
    context: &CliContext,
    command: OperationCommands,
    json: bool,
) -> Result<()> {
    let operations = context.services().operations;

    match command {
        OperationCommands::Record(args) => {
            let input = CreateOperation {
                quantity: args.quantity,
                is_inbound: !args.outbound,
                product_id: args.product_id,
                store_id: None,
                purchase_document_id: args.document.purchase,
                sell_document_id: args.document.sell,
                adjustment_document_id: args.document.adjustment,
                cost_props: cost_props(args.unit_price, args.exchange_rate),
            };
            let details = operations
                .create_operation(input)
                .await
                .context("failed to record operation")?;
            if json {
                print_json(&details)?;
            } else {
                println!(
                    "Operation {} recorded in store {}",
                    details.operation.id, details.operation.store_id
                );
            }
        }
        OperationCommands::Update(args) => {
            let patch = UpdateOperation {
                quantity: args.quantity,
                is_inbound: args.inbound,
                product_id: args.product_id,
                store_id: None,
                purchase_document_id: args.document.purchase,
                sell_document_id: args.document.sell,
                adjustment_document_id: args.document.adjustment,
                cost_props: cost_props(args.unit_price, args.exchange_rate),
                clear_cost_props: args.clear_price,
            };
            let details = operations
                .update_operation(args.id, patch)
                .await
                .context("failed to update operation")?;
            if json {
                print_json(&details)?;
            } else {
                println!("Operation {} updated", details.operation.id);
            }
        }
        OperationCommands::Delete { ids } => {
            let changed = operations
                .delete_operations(&ids)
                .await
                .context("failed to delete operations")?;
            println!("{}", if changed { "Deleted" } else { "Nothing to delete" });
        }
        OperationCommands::Restore { ids } => {
            let changed = operations
                .restore_operations(&ids)
                .await
                .context("failed to restore operations")?;
            println!("{}", if changed { "Restored" } else { "Nothing to restore" });
        }
        OperationCommands::Show { id } => {
            let details = operations
                .find_operation(id)
                .await
                .context("failed to load operation")?;
            print_json(&details)?;
        }
        OperationCommands::List(args) => {
            let listed = operations
                .list_operations(OperationFilter {
                    purchase_document_id: args.document.purchase,
                    sell_document_id: args.document.sell,
                    adjustment_document_id: args.document.adjustment,
                    product_id: args.product_id,
                    store_id: args.store_id,
                    include_deleted: args.include_deleted,
                })
                .await
                .context("failed to list operations")?;
            if json {
                print_json(&listed)?;
            } else {
                for op in listed {
                    let sign = if op.is_inbound { '+' } else { '-' };
                    let document = op
                        .document_ref()
                        .map(|d| d.to_string())
                        .unwrap_or_else(|| "unlinked".to_string());
                    println!(
                        "- {} • product {} • store {} • {}{} • {}",
                        op.id, op.product_id, op.store_id, sign, op.quantity, document
                    );
                }
            }
        }
    }
    Ok(())
}

struct CliContext {
    _config: AppConfig,
    db: Arc<db::DbPool>,
    services: LedgerServices,
}

impl CliContext {
    async fn initialize() -> Result<Self> {
        let config = config::load_config().context("failed to load application config")?;
        config::init_tracing(config.log_level(), config.log_json);

        let db_pool = db::establish_connection_from_app_config(&config)
            .await
            .context("failed to connect to database")?;
        if config.auto_migrate {
            db::run_migrations(&db_pool)
                .await
                .context("failed to run migrations")?;
        }
        let db = Arc::new(db_pool);

        let (event_sender, event_rx) = EventSender::channel(config.event_channel_capacity);
        tokio::spawn(events::process_events(event_rx));

        let factory = ServiceFactory::new(db.clone(), Some(event_sender));
        let services = LedgerServices::new(&factory);

        Ok(Self {
            _config: config,
            db,
            services,
        })
    }

    fn services(&self) -> LedgerServices {
        self.services.clone()
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
