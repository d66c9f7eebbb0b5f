//! Drift detection between cached balance fields and the transaction log.
//!
//! Both checks only report unless `auto_fix` is set. A fix re-derives the
//! value from the log or from the record's own balance, inside one unit of
//! work, so it cannot race a payment commit.

use serde::Serialize;
use tracing::{info, warn};

use super::{DriverRecord, Ledger, LedgerError, StoreError};
use crate::Amount;
use crate::model::{DriverId, DriverStatus, TransactionKind, TransactionRecord, VehicleId};

/// One driver whose stored `left_to_target` disagrees with its balance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetDiscrepancy {
    pub driver: DriverId,
    pub vehicle: Option<VehicleId>,
    pub effective_target: Amount,
    pub current_balance: Amount,
    pub stored_left_to_target: Amount,
    pub expected_left_to_target: Amount,
    /// `stored - expected`
    pub error: Amount,
    pub fixed: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TargetReconciliation {
    pub total_checked: usize,
    pub discrepancies_found: usize,
    pub discrepancies_fixed: usize,
    /// Sum of absolute errors.
    pub total_error_amount: Amount,
    pub details: Vec<TargetDiscrepancy>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DriverBalanceReport {
    pub driver: DriverId,
    pub effective_target: Amount,
    pub current_balance: Amount,
    pub actual_left_to_target: Amount,
    pub expected_left_to_target: Amount,
    pub error: Amount,
    pub is_correct: bool,
    /// Completed payments in the current period.
    pub todays_payments: Vec<TransactionRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BalanceReconciliation {
    pub driver: DriverId,
    pub old_balance: Amount,
    pub calculated_balance: Amount,
    /// `old - calculated`
    pub discrepancy: Amount,
    pub transactions_count: usize,
    pub fixed: bool,
}

fn outside_tolerance(error: Amount) -> bool {
    error.abs() > Amount::CENT
}

/// Records that count toward the current period's balance.
fn qualifying(record: &TransactionRecord) -> bool {
    record.is_completed() && record.kind.credits_target()
}

impl Ledger {
    /// Compare every vehicle-holding driver's `left_to_target` with
    /// `max(0, target - balance)`.
    pub fn check_target_discrepancies(
        &self,
        auto_fix: bool,
    ) -> Result<TargetReconciliation, LedgerError> {
        let global_target = self.config.global_daily_target;
        let mut uow = self.store.begin(global_target)?;
        let mut report = TargetReconciliation::default();

        for id in uow.tracked_driver_ids() {
            let driver = uow.driver(&id)?;
            report.total_checked += 1;

            let expected = driver.expected_left_to_target(global_target);
            let error = driver.left_to_target - expected;
            if !outside_tolerance(error) {
                continue;
            }

            warn!(
                driver = %id,
                stored = %driver.left_to_target,
                expected = %expected,
                error = %error,
                "left_to_target drift"
            );
            report.discrepancies_found += 1;
            report.total_error_amount += error.abs();
            report.details.push(TargetDiscrepancy {
                driver: id.clone(),
                vehicle: driver.assigned_vehicle.clone(),
                effective_target: driver.effective_target(global_target),
                current_balance: driver.current_balance,
                stored_left_to_target: driver.left_to_target,
                expected_left_to_target: expected,
                error,
                fixed: auto_fix,
            });
            if auto_fix {
                uow.recompute_left_to_target(&id);
            }
        }

        if auto_fix && report.discrepancies_found > 0 {
            uow.commit()?;
            report.discrepancies_fixed = report.discrepancies_found;
        }

        info!(
            checked = report.total_checked,
            found = report.discrepancies_found,
            fixed = report.discrepancies_fixed,
            total_error = %report.total_error_amount,
            "target reconciliation"
        );
        Ok(report)
    }

    pub fn get_driver_balance_report(
        &self,
        id: &DriverId,
    ) -> Result<DriverBalanceReport, LedgerError> {
        let global_target = self.config.global_daily_target;
        let uow = self.store.begin(global_target)?;
        let driver = uow.driver(id)?;

        let expected = driver.expected_left_to_target(global_target);
        let error = driver.left_to_target - expected;
        let todays_payments = uow
            .transactions_since(id, driver.period_started_at)
            .into_iter()
            .filter(|r| r.is_completed() && r.kind == TransactionKind::Payment)
            .collect();

        Ok(DriverBalanceReport {
            driver: id.clone(),
            effective_target: driver.effective_target(global_target),
            current_balance: driver.current_balance,
            actual_left_to_target: driver.left_to_target,
            expected_left_to_target: expected,
            error,
            is_correct: !outside_tolerance(error),
            todays_payments,
        })
    }

    /// Replay the current period from the log: opening balance plus the
    /// target contribution of every qualifying Completed record since the
    /// period started.
    pub fn reconcile_driver_balance(
        &self,
        id: &DriverId,
        auto_fix: bool,
    ) -> Result<BalanceReconciliation, LedgerError> {
        let mut uow = self.store.begin(self.config.global_daily_target)?;
        let driver = uow.driver(id)?;
        let old_balance = driver.current_balance;

        let records: Vec<_> = uow
            .transactions_since(id, driver.period_started_at)
            .into_iter()
            .filter(qualifying)
            .collect();
        let calculated_balance = replayed_balance(driver, &records)?;
        let discrepancy = old_balance - calculated_balance;

        let fixed = auto_fix && !discrepancy.is_zero();
        if fixed {
            uow.set_balance(id, calculated_balance);
            uow.commit()?;
        } else {
            drop(uow);
        }

        if discrepancy.is_zero() {
            info!(
                driver = %id,
                balance = %old_balance,
                transactions = records.len(),
                "balance consistent"
            );
        } else {
            warn!(
                driver = %id,
                stored = %old_balance,
                calculated = %calculated_balance,
                discrepancy = %discrepancy,
                fixed,
                "balance drift"
            );
        }

        Ok(BalanceReconciliation {
            driver: id.clone(),
            old_balance,
            calculated_balance,
            discrepancy,
            transactions_count: records.len(),
            fixed,
        })
    }
}

fn replayed_balance(
    driver: &DriverRecord,
    records: &[TransactionRecord],
) -> Result<Amount, StoreError> {
    // exit zeroes the balance for good
    if driver.status == DriverStatus::Exited {
        return Ok(Amount::ZERO);
    }
    records
        .iter()
        .try_fold(driver.period_opening_balance, |acc, r| {
            acc.checked_add(r.target_contribution)
        })
        .ok_or_else(|| StoreError::Overflow(driver.id.clone()))
}
