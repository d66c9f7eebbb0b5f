//! Error types for ledger operations.

use thiserror::Error;

use crate::Amount;
use crate::model::{DriverId, TxId, ValidationError, VehicleId};

/// Top-level error returned by [`Ledger`](super::Ledger) operations.
///
/// Duplicates and unknown repayment-channel drivers are not errors: they are
/// reported through the outcome types.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("no driver found for '{0}'")]
    DriverNotFound(String),

    #[error("driver {0} has no payout destination configured")]
    NoPayoutDestination(DriverId),

    #[error("driver {0} is not active")]
    DriverInactive(DriverId),

    #[error("insufficient deposit for {driver}: available {available}, requested {requested}")]
    InsufficientFunds {
        driver: DriverId,
        available: Amount,
        requested: Amount,
    },

    #[error("driver {0} has not opted in to target deductions from deposit")]
    DeductionNotAllowed(DriverId),

    #[error("storage error: {0}")]
    Store(StoreError),
}

impl From<StoreError> for LedgerError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::UnknownDriver(id) => LedgerError::DriverNotFound(id.to_string()),
            other => LedgerError::Store(other),
        }
    }
}

/// Errors raised by the store when a unit of work cannot be applied.
/// Any of these aborts the whole unit.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("driver {0} not found")]
    UnknownDriver(DriverId),

    #[error("driver {0} already exists")]
    DuplicateDriver(DriverId),

    #[error("alternate id {0} already belongs to another driver")]
    DuplicateAltId(String),

    #[error("vehicle {0} is already assigned to driver {1}")]
    VehicleTaken(VehicleId, DriverId),

    #[error("duplicate transaction id {0}")]
    DuplicateTransaction(TxId),

    #[error("transaction {0} carries a negative amount")]
    NegativeAmount(TxId),

    #[error("deposit for driver {driver} would go negative: balance {balance}, change {change}")]
    NegativeDeposit {
        driver: DriverId,
        balance: Amount,
        change: Amount,
    },

    #[error("driver {0} has exited and cannot be credited")]
    DriverExited(DriverId),

    #[error("amount overflow for driver {0}")]
    Overflow(DriverId),

    #[error("store lock poisoned")]
    Poisoned,
}
