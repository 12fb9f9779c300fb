pub mod base;

pub mod document_adjustment;
pub mod document_purchase;
pub mod document_sell;
pub mod operation;
pub mod operation_props;
pub mod product;
pub mod product_quantity;
pub mod store;

pub use base::{Record, RecordMeta, SoftDelete};
pub use operation::{DocumentKind, DocumentRef, DocumentRefError};
