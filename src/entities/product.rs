use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use super::base::{soft_delete_entity, timestamped_behavior};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "products")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub name: String,
    #[sea_orm(unique)]
    pub article: String,
    /// Weighted-average unit cost. Written only by the WAC calculator.
    #[sea_orm(column_type = "Decimal(Some((12, 2)))")]
    pub wac: Decimal,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
    pub deleted_at: Option<DateTimeUtc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::operation::Entity")]
    Operation,
    #[sea_orm(has_many = "super::product_quantity::Entity")]
    ProductQuantity,
}

impl Related<super::operation::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Operation.def()
    }
}

impl Related<super::product_quantity::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ProductQuantity.def()
    }
}

soft_delete_entity!(Uuid);
timestamped_behavior!();
