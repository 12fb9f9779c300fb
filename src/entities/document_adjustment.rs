use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use super::base::{soft_delete_entity, timestamped_behavior};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "document_adjustments")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub performed: bool,
    pub date: DateTimeUtc,
    pub store_id: Uuid,
    pub author_id: Uuid,
    pub note: Option<String>,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
    pub deleted_at: Option<DateTimeUtc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::store::Entity",
        from = "Column::StoreId",
        to = "super::store::Column::Id"
    )]
    Store,
    #[sea_orm(has_many = "super::operation::Entity")]
    Operation,
}

impl Related<super::store::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Store.def()
    }
}

impl Related<super::operation::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Operation.def()
    }
}

soft_delete_entity!(i32);
timestamped_behavior!();
