use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::base::{soft_delete_entity, timestamped_behavior};

/// A single stock movement. Exactly one document column is set on every
/// row written through the operation service.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "operations")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub quantity: i32,
    /// `true` adds to stock, `false` removes from it.
    pub is_inbound: bool,
    pub product_id: Uuid,
    pub store_id: Uuid,
    pub purchase_document_id: Option<i32>,
    pub sell_document_id: Option<i32>,
    pub adjustment_document_id: Option<i32>,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
    pub deleted_at: Option<DateTimeUtc>,
}

impl Model {
    pub fn signed_quantity(&self) -> i64 {
        if self.is_inbound {
            i64::from(self.quantity)
        } else {
            -i64::from(self.quantity)
        }
    }

    /// The linked document, or `None` when the row has zero or several links.
    pub fn document_ref(&self) -> Option<DocumentRef> {
        DocumentRef::from_parts(
            self.purchase_document_id,
            self.sell_document_id,
            self.adjustment_document_id,
        )
        .ok()
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::product::Entity",
        from = "Column::ProductId",
        to = "super::product::Column::Id"
    )]
    Product,
    #[sea_orm(
        belongs_to = "super::store::Entity",
        from = "Column::StoreId",
        to = "super::store::Column::Id"
    )]
    Store,
    #[sea_orm(
        belongs_to = "super::document_purchase::Entity",
        from = "Column::PurchaseDocumentId",
        to = "super::document_purchase::Column::Id"
    )]
    DocumentPurchase,
    #[sea_orm(
        belongs_to = "super::document_sell::Entity",
        from = "Column::SellDocumentId",
        to = "super::document_sell::Column::Id"
    )]
    DocumentSell,
    #[sea_orm(
        belongs_to = "super::document_adjustment::Entity",
        from = "Column::AdjustmentDocumentId",
        to = "super::document_adjustment::Column::Id"
    )]
    DocumentAdjustment,
    #[sea_orm(has_one = "super::operation_props::Entity")]
    OperationProps,
}

impl Related<super::product::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Product.def()
    }
}

impl Related<super::store::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Store.def()
    }
}

impl Related<super::document_purchase::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::DocumentPurchase.def()
    }
}

impl Related<super::document_sell::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::DocumentSell.def()
    }
}

impl Related<super::document_adjustment::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::DocumentAdjustment.def()
    }
}

impl Related<super::operation_props::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OperationProps.def()
    }
}

soft_delete_entity!(Uuid);
timestamped_behavior!();

/// The three kinds of source document an operation can belong to.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum DocumentKind {
    Purchase,
    Sell,
    Adjustment,
}

impl DocumentKind {
    pub fn as_str(&self) -> &'static str {
        self.into()
    }

    /// The operations column that links to this kind of document.
    pub fn operation_column(&self) -> Column {
        match self {
            DocumentKind::Purchase => Column::PurchaseDocumentId,
            DocumentKind::Sell => Column::SellDocumentId,
            DocumentKind::Adjustment => Column::AdjustmentDocumentId,
        }
    }
}

/// Why a set of document columns does not name exactly one document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DocumentRefError {
    #[error("operation must reference a purchase, sell or adjustment document")]
    Missing,
    #[error("operation must reference exactly one document, got {0}")]
    Ambiguous(usize),
}

/// The single document an operation is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum DocumentRef {
    Purchase(i32),
    Sell(i32),
    Adjustment(i32),
}

impl DocumentRef {
    pub fn new(kind: DocumentKind, id: i32) -> Self {
        match kind {
            DocumentKind::Purchase => DocumentRef::Purchase(id),
            DocumentKind::Sell => DocumentRef::Sell(id),
            DocumentKind::Adjustment => DocumentRef::Adjustment(id),
        }
    }

    pub fn from_parts(
        purchase: Option<i32>,
        sell: Option<i32>,
        adjustment: Option<i32>,
    ) -> Result<Self, DocumentRefError> {
        match (purchase, sell, adjustment) {
            (Some(id), None, None) => Ok(DocumentRef::Purchase(id)),
            (None, Some(id), None) => Ok(DocumentRef::Sell(id)),
            (None, None, Some(id)) => Ok(DocumentRef::Adjustment(id)),
            (None, None, None) => Err(DocumentRefError::Missing),
            (p, s, a) => Err(DocumentRefError::Ambiguous(
                [p, s, a].iter().filter(|v| v.is_some()).count(),
            )),
        }
    }

    pub fn kind(&self) -> DocumentKind {
        match self {
            DocumentRef::Purchase(_) => DocumentKind::Purchase,
            DocumentRef::Sell(_) => DocumentKind::Sell,
            DocumentRef::Adjustment(_) => DocumentKind::Adjustment,
        }
    }

    pub fn id(&self) -> i32 {
        match *self {
            DocumentRef::Purchase(id) | DocumentRef::Sell(id) | DocumentRef::Adjustment(id) => id,
        }
    }

    pub fn is_purchase(&self) -> bool {
        matches!(self, DocumentRef::Purchase(_))
    }

    /// Column values in `(purchase, sell, adjustment)` order.
    pub fn columns(&self) -> (Option<i32>, Option<i32>, Option<i32>) {
        match *self {
            DocumentRef::Purchase(id) => (Some(id), None, None),
            DocumentRef::Sell(id) => (None, Some(id), None),
            DocumentRef::Adjustment(id) => (None, None, Some(id)),
        }
    }
}

impl fmt::Display for DocumentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} document {}", self.kind(), self.id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn columns_reflect_the_single_link() {
        let doc = DocumentRef::Sell(4);
        assert_eq!(doc.columns(), (None, Some(4), None));
        assert_eq!(
            DocumentRef::from_parts(None, Some(4), None).unwrap(),
            doc
        );
        assert_eq!(doc.kind(), DocumentKind::Sell);
        assert!(!doc.is_purchase());
    }

    #[test]
    fn kind_parses_case_insensitively() {
        assert_eq!("Purchase".parse::<DocumentKind>().unwrap(), DocumentKind::Purchase);
        assert!("transfer".parse::<DocumentKind>().is_err());
    }
}
