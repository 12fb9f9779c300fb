use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DatabaseTransaction, EntityTrait,
    IntoActiveModel, QueryFilter, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument};
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::{
    entities::{operation, operation_props},
    errors::ServiceError,
    repositories,
};

/// Price attachment for an operation. Prices are in the ledger currency;
/// the exchange rate is kept for reporting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct CostPropsInput {
    #[validate(custom = "validate_unit_price")]
    pub unit_price: Decimal,
    #[validate(custom = "validate_exchange_rate")]
    pub exchange_rate: Decimal,
}

impl CostPropsInput {
    pub fn new(unit_price: Decimal, exchange_rate: Decimal) -> Self {
        Self {
            unit_price,
            exchange_rate,
        }
    }
}

fn validate_money(value: &Decimal, code: &'static str, min: Decimal) -> Result<(), ValidationError> {
    if *value < min {
        let mut err = ValidationError::new(code);
        err.message = Some(format!("must be at least {}", min).into());
        return Err(err);
    }
    if value.normalize().scale() > 2 {
        let mut err = ValidationError::new(code);
        err.message = Some("must have at most 2 decimal places".into());
        return Err(err);
    }
    Ok(())
}

fn validate_unit_price(value: &Decimal) -> Result<(), ValidationError> {
    validate_money(value, "unit_price", dec!(0.01))
}

fn validate_exchange_rate(value: &Decimal) -> Result<(), ValidationError> {
    validate_money(value, "exchange_rate", dec!(0.01))
}

/// One-to-one cost props of an operation. Mutations are only exposed inside
/// a caller's transaction, since a price change must be followed by a WAC
/// recalculation in that same transaction.
#[derive(Clone)]
pub struct OperationPropsService {
    db: Arc<DatabaseConnection>,
}

impl OperationPropsService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Attaches props to a live operation. A second attachment is a conflict.
    #[instrument(skip(self, txn))]
    pub async fn create_in(
        &self,
        txn: &DatabaseTransaction,
        operation_id: Uuid,
        input: &CostPropsInput,
    ) -> Result<operation_props::Model, ServiceError> {
        input.validate()?;

        repositories::find_live::<operation::Entity, _>(txn, operation_id)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::not_found("Operation", operation_id))?;

        if self.find_by_operation_in(txn, operation_id).await?.is_some() {
            return Err(ServiceError::Conflict(format!(
                "Operation {} already has cost props",
                operation_id
            )));
        }

        let created = operation_props::ActiveModel {
            id: Set(Uuid::now_v7()),
            operation_id: Set(operation_id),
            unit_price: Set(input.unit_price),
            exchange_rate: Set(input.exchange_rate),
            ..Default::default()
        }
        .insert(txn)
        .await
        .map_err(|e| {
            error!(error = %e, %operation_id, "Failed to create cost props");
            ServiceError::db_error(e)
        })?;

        info!(%operation_id, "Cost props attached");
        Ok(created)
    }

    pub async fn find_by_operation(
        &self,
        operation_id: Uuid,
    ) -> Result<Option<operation_props::Model>, ServiceError> {
        operation_props::Entity::find()
            .filter(operation_props::Column::OperationId.eq(operation_id))
            .one(&*self.db)
            .await
            .map_err(ServiceError::db_error)
    }

    pub async fn find_by_operation_in(
        &self,
        txn: &DatabaseTransaction,
        operation_id: Uuid,
    ) -> Result<Option<operation_props::Model>, ServiceError> {
        operation_props::Entity::find()
            .filter(operation_props::Column::OperationId.eq(operation_id))
            .one(txn)
            .await
            .map_err(ServiceError::db_error)
    }

    /// Replaces the price and rate of existing props.
    #[instrument(skip(self, txn))]
    pub async fn update_in(
        &self,
        txn: &DatabaseTransaction,
        operation_id: Uuid,
        input: &CostPropsInput,
    ) -> Result<operation_props::Model, ServiceError> {
        input.validate()?;

        let existing = self
            .find_by_operation_in(txn, operation_id)
            .await?
            .ok_or_else(|| ServiceError::not_found("Cost props for operation", operation_id))?;

        let mut active = existing.into_active_model();
        active.unit_price = Set(input.unit_price);
        active.exchange_rate = Set(input.exchange_rate);
        active.update(txn).await.map_err(|e| {
            error!(error = %e, %operation_id, "Failed to update cost props");
            ServiceError::db_error(e)
        })
    }

    /// Updates the props if present, attaches them otherwise.
    pub async fn upsert_in(
        &self,
        txn: &DatabaseTransaction,
        operation_id: Uuid,
        input: &CostPropsInput,
    ) -> Result<operation_props::Model, ServiceError> {
        if self.find_by_operation_in(txn, operation_id).await?.is_some() {
            self.update_in(txn, operation_id, input).await
        } else {
            self.create_in(txn, operation_id, input).await
        }
    }

    /// Detaches the props. Returns whether a row existed.
    #[instrument(skip(self, txn))]
    pub async fn remove_by_operation_in(
        &self,
        txn: &DatabaseTransaction,
        operation_id: Uuid,
    ) -> Result<bool, ServiceError> {
        let result = operation_props::Entity::delete_many()
            .filter(operation_props::Column::OperationId.eq(operation_id))
            .exec(txn)
            .await
            .map_err(ServiceError::db_error)?;

        Ok(result.rows_affected > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_cents() {
        assert!(CostPropsInput::new(dec!(0.01), dec!(12650.50)).validate().is_ok());
        assert!(CostPropsInput::new(dec!(100.10), dec!(1.00)).validate().is_ok());
    }

    #[test]
    fn rejects_sub_cent_precision() {
        let errors = CostPropsInput::new(dec!(10.005), dec!(1))
            .validate()
            .unwrap_err();
        assert!(errors.field_errors().contains_key("unit_price"));
    }

    #[test]
    fn rejects_non_positive_values() {
        let errors = CostPropsInput::new(dec!(0), dec!(0)).validate().unwrap_err();
        let fields = errors.field_errors();
        assert!(fields.contains_key("unit_price"));
        assert!(fields.contains_key("exchange_rate"));
    }
}
