/*!
 * Transaction Helper Utilities
 *
 * Every ledger mutation runs inside one `DatabaseTransaction`. Callers that
 * already hold a transaction pass it to the `*_in` service methods; top-level
 * service methods open one with [`begin`] and close it with [`finish`].
 */

use crate::errors::ServiceError;
use metrics::{counter, histogram};
use sea_orm::{DatabaseConnection, DatabaseTransaction, TransactionTrait};
use std::time::Instant;
use tracing::{debug, error, warn};
use uuid::Uuid;

/// An open transaction together with the bookkeeping used when it closes.
pub struct LedgerTransaction {
    txn: DatabaseTransaction,
    id: Uuid,
    started: Instant,
}

impl std::ops::Deref for LedgerTransaction {
    type Target = DatabaseTransaction;

    fn deref(&self) -> &Self::Target {
        &self.txn
    }
}

/// Starts a database transaction
pub async fn begin(db: &DatabaseConnection) -> Result<LedgerTransaction, ServiceError> {
    let id = Uuid::new_v4();
    debug!(transaction_id = %id, "Starting database transaction");
    counter!("ledger_db.transaction.started", 1);

    let txn = db.begin().await.map_err(|e| {
        error!(transaction_id = %id, error = %e, "Failed to start transaction");
        ServiceError::db_error(e)
    })?;

    Ok(LedgerTransaction {
        txn,
        id,
        started: Instant::now(),
    })
}

/// Commits on `Ok`, rolls back on `Err`.
///
/// A commit failure is returned as a `DatabaseError`; nothing written inside
/// the transaction is visible afterwards.
pub async fn finish<T>(
    txn: LedgerTransaction,
    result: Result<T, ServiceError>,
) -> Result<T, ServiceError> {
    let LedgerTransaction { txn, id, started } = txn;

    match result {
        Ok(value) => {
            txn.commit().await.map_err(|e| {
                error!(transaction_id = %id, error = %e, "Transaction commit failed");
                counter!("ledger_db.transaction.commit_failed", 1);
                ServiceError::DatabaseError(e)
            })?;
            let elapsed = started.elapsed();
            histogram!("ledger_db.transaction.duration", elapsed);
            counter!("ledger_db.transaction.committed", 1);
            debug!(transaction_id = %id, "Transaction committed successfully in {:?}", elapsed);
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = txn.rollback().await {
                error!(transaction_id = %id, error = %rollback_err, "Transaction rollback failed");
            }
            let elapsed = started.elapsed();
            histogram!("ledger_db.transaction.duration", elapsed);
            counter!("ledger_db.transaction.rolled_back", 1);
            warn!(transaction_id = %id, error = %err, "Transaction rolled back after {:?}", elapsed);
            Err(err)
        }
    }
}
