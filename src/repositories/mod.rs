//! Generic persistence helpers for soft-deletable entities.

use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, ConnectionTrait, DbErr, QueryFilter, Select};

use crate::entities::SoftDelete;

/// Rows that have not been tombstoned.
pub fn live<E: SoftDelete>() -> Select<E> {
    E::find().filter(E::deleted_at_column().is_null())
}

/// Every row, tombstoned or not.
pub fn with_deleted<E: SoftDelete>() -> Select<E> {
    E::find()
}

pub async fn find_live<E, C>(conn: &C, id: E::Key) -> Result<Option<E::Model>, DbErr>
where
    E: SoftDelete,
    C: ConnectionTrait,
{
    live::<E>().filter(E::id_column().eq(id)).one(conn).await
}

/// Tombstones the live rows among `ids` with `at`. Returns the number of rows
/// that changed.
pub async fn soft_delete_many<E, C>(
    conn: &C,
    ids: &[E::Key],
    at: DateTime<Utc>,
) -> Result<u64, DbErr>
where
    E: SoftDelete,
    C: ConnectionTrait,
{
    if ids.is_empty() {
        return Ok(0);
    }

    let result = E::update_many()
        .col_expr(E::deleted_at_column(), Expr::value(at))
        .col_expr(E::updated_at_column(), Expr::value(at))
        .filter(E::id_column().is_in(ids.iter().cloned()))
        .filter(E::deleted_at_column().is_null())
        .exec(conn)
        .await?;

    Ok(result.rows_affected)
}

/// Clears the tombstone on the deleted rows among `ids`.
pub async fn restore_many<E, C>(
    conn: &C,
    ids: &[E::Key],
    at: DateTime<Utc>,
) -> Result<u64, DbErr>
where
    E: SoftDelete,
    C: ConnectionTrait,
{
    if ids.is_empty() {
        return Ok(0);
    }

    let result = E::update_many()
        .col_expr(E::deleted_at_column(), Expr::value(Option::<DateTime<Utc>>::None))
        .col_expr(E::updated_at_column(), Expr::value(at))
        .filter(E::id_column().is_in(ids.iter().cloned()))
        .filter(E::deleted_at_column().is_not_null())
        .exec(conn)
        .await?;

    Ok(result.rows_affected)
}
