use chrono::{DateTime, SubsecRound, Utc};
use sea_orm::entity::prelude::*;
use serde::Serialize;

/// Audit columns shared by every soft-deletable ledger record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RecordMeta<K> {
    pub id: K,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl<K> RecordMeta<K> {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Models that carry [`RecordMeta`] columns.
pub trait Record {
    type Key: Clone;

    fn meta(&self) -> RecordMeta<Self::Key>;

    fn is_deleted(&self) -> bool {
        self.meta().is_deleted()
    }
}

/// Entities whose rows are tombstoned through `deleted_at` instead of being
/// physically removed.
pub trait SoftDelete: EntityTrait {
    type Key: Into<sea_orm::Value> + Clone + Send + Sync;

    fn id_column() -> Self::Column;
    fn deleted_at_column() -> Self::Column;
    fn updated_at_column() -> Self::Column;
}

/// Current time at the precision every supported backend stores, so a
/// timestamp written and read back compares equal.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

macro_rules! soft_delete_entity {
    ($key:ty) => {
        impl $crate::entities::base::SoftDelete for Entity {
            type Key = $key;

            fn id_column() -> Column {
                Column::Id
            }

            fn deleted_at_column() -> Column {
                Column::DeletedAt
            }

            fn updated_at_column() -> Column {
                Column::UpdatedAt
            }
        }

        impl $crate::entities::base::Record for Model {
            type Key = $key;

            fn meta(&self) -> $crate::entities::base::RecordMeta<$key> {
                $crate::entities::base::RecordMeta {
                    id: self.id,
                    created_at: self.created_at,
                    updated_at: self.updated_at,
                    deleted_at: self.deleted_at,
                }
            }
        }
    };
}

/// Stamps `created_at` on insert and `updated_at` on every save.
macro_rules! timestamped_behavior {
    () => {
        #[async_trait::async_trait]
        impl ActiveModelBehavior for ActiveModel {
            async fn before_save<C>(self, _db: &C, insert: bool) -> Result<Self, DbErr>
            where
                C: ConnectionTrait,
            {
                let mut active_model = self;
                let now = $crate::entities::base::now();
                if insert {
                    if let sea_orm::ActiveValue::NotSet = active_model.created_at {
                        active_model.created_at = sea_orm::Set(now);
                    }
                }
                active_model.updated_at = sea_orm::Set(now);
                Ok(active_model)
            }
        }
    };
}

pub(crate) use soft_delete_entity;
pub(crate) use timestamped_behavior;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_is_microsecond_precise() {
        let ts = now();
        assert_eq!(ts.timestamp_subsec_nanos() % 1_000, 0);
    }

    #[test]
    fn meta_reports_tombstone() {
        let meta = RecordMeta {
            id: 1,
            created_at: now(),
            updated_at: now(),
            deleted_at: Some(now()),
        };
        assert!(meta.is_deleted());
    }
}
