//! Deposit sub-ledger operations.
//!
//! Each mutating call appends exactly one deposit entry. Debits that exceed
//! the balance are rejected whole; nothing is clamped.

use chrono::NaiveDate;
use serde::Serialize;
use tracing::info;

use super::{DriverRecord, Ledger, LedgerError};
use crate::Amount;
use crate::model::{
    DepositEntry, DepositKind, DriverId, DriverStatus, TransactionKind, TransactionRecord,
    TransactionStatus, TxId, ValidationError, require_positive,
};

/// Refund computed when a driver leaves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExitSettlement {
    pub driver: DriverId,
    pub refund: Amount,
    pub exit_date: NaiveDate,
}

impl Ledger {
    pub fn top_up_deposit(
        &self,
        id: &DriverId,
        amount: Amount,
        reference: &str,
    ) -> Result<DepositEntry, LedgerError> {
        let amount = require_positive(amount)?;
        let entry = self.append_deposit_entry(id, DepositKind::TopUp, amount, reference)?;
        info!(driver = %id, amount = %amount, balance = %entry.balance_after, "deposit topped up");
        Ok(entry)
    }

    pub fn deduct_for_damage(
        &self,
        id: &DriverId,
        amount: Amount,
        description: &str,
    ) -> Result<DepositEntry, LedgerError> {
        let amount = require_positive(amount)?;
        let entry =
            self.append_deposit_entry(id, DepositKind::DamageDeduction, -amount, description)?;
        info!(
            driver = %id,
            amount = %amount,
            balance = %entry.balance_after,
            "damage deducted from deposit"
        );
        Ok(entry)
    }

    /// Operator correction to the deposit balance, credit or debit.
    pub fn adjust_deposit(
        &self,
        id: &DriverId,
        delta: Amount,
        reason: &str,
    ) -> Result<DepositEntry, LedgerError> {
        if delta.is_zero() {
            return Err(ValidationError::NonPositiveAmount(delta).into());
        }
        self.append_deposit_entry(id, DepositKind::Adjustment, delta, reason)
    }

    /// Pay `amount` of target out of the deposit. Only for drivers who opted in.
    ///
    /// The deducted amount is credited to `current_balance` and logged as a
    /// `DriverRepayment` transaction next to the deposit entry.
    pub fn deduct_for_target_miss(
        &self,
        id: &DriverId,
        amount: Amount,
    ) -> Result<DepositEntry, LedgerError> {
        let amount = require_positive(amount)?;
        let now = self.now();

        let mut uow = self.store.begin(self.config.global_daily_target)?;
        let driver = uow.driver(id)?;
        if !driver.allow_target_deduction_from_deposit {
            return Err(LedgerError::DeductionNotAllowed(id.clone()));
        }
        check_funds(driver, amount)?;

        let tx = TxId::new(format!("deposit-deduction-{}", uuid::Uuid::new_v4()));
        uow.append_deposit(id, DepositKind::TargetDeduction, -amount, tx.as_str(), now);
        uow.increment_balance(id, amount);
        uow.append_transaction(TransactionRecord {
            tx,
            driver: id.clone(),
            kind: TransactionKind::DriverRepayment,
            amount,
            driver_share: Amount::ZERO,
            target_contribution: amount,
            deposited_amount: Amount::ZERO,
            status: TransactionStatus::Completed,
            customer_hash: None,
            at: now,
        });
        let committed = uow.commit()?;
        let entry = single_entry(committed.deposit_entries, id)?;

        info!(
            driver = %id,
            amount = %amount,
            balance = %entry.balance_after,
            "target miss paid from deposit"
        );
        Ok(entry)
    }

    /// Close out a leaving driver: refund the remaining deposit, zero the
    /// balance fields and release the vehicle. The record is kept.
    pub fn process_exit(
        &self,
        id: &DriverId,
        exit_date: NaiveDate,
    ) -> Result<ExitSettlement, LedgerError> {
        let now = self.now();
        let mut uow = self.store.begin(self.config.global_daily_target)?;
        let driver = uow.driver(id)?;
        if driver.status == DriverStatus::Exited {
            return Err(LedgerError::DriverInactive(id.clone()));
        }
        let refund = driver.current_deposit_balance;

        uow.append_deposit(id, DepositKind::Refund, -refund, format!("exit {exit_date}"), now);
        uow.exit(id, exit_date);
        uow.commit()?;

        info!(driver = %id, refund = %refund, %exit_date, "driver exited");
        Ok(ExitSettlement {
            driver: id.clone(),
            refund,
            exit_date,
        })
    }

    fn append_deposit_entry(
        &self,
        id: &DriverId,
        kind: DepositKind,
        amount: Amount,
        reference: &str,
    ) -> Result<DepositEntry, LedgerError> {
        let now = self.now();
        let mut uow = self.store.begin(self.config.global_daily_target)?;
        let driver = uow.driver(id)?;
        if amount.is_negative() {
            check_funds(driver, -amount)?;
        }
        uow.append_deposit(id, kind, amount, reference, now);
        let committed = uow.commit()?;
        single_entry(committed.deposit_entries, id)
    }
}

fn check_funds(driver: &DriverRecord, requested: Amount) -> Result<(), LedgerError> {
    if driver.current_deposit_balance < requested {
        return Err(LedgerError::InsufficientFunds {
            driver: driver.id.clone(),
            available: driver.current_deposit_balance,
            requested,
        });
    }
    Ok(())
}

fn single_entry(entries: Vec<DepositEntry>, id: &DriverId) -> Result<DepositEntry, LedgerError> {
    entries
        .into_iter()
        .next()
        .ok_or_else(|| LedgerError::DriverNotFound(id.to_string()))
}
