//! Fare payment split: driver payout plus target contribution.

use tracing::{info, warn};

use super::{DriverRecord, Ledger, LedgerError};
use crate::Amount;
use crate::config::LedgerConfig;
use crate::gateway::send_with_timeout;
use crate::model::{
    DriverStatus, TransactionKind, TransactionRecord, TransactionStatus, ValidatedNotification,
};

/// Result of a fare payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SplitOutcome {
    /// Payout confirmed and the contribution credited.
    Completed(TransactionRecord),
    /// Payout failed or timed out. Recorded, balance untouched, not retried.
    PayoutFailed(TransactionRecord),
    /// The transaction id was already processed; this is the original record.
    Duplicate(TransactionRecord),
}

impl SplitOutcome {
    pub fn record(&self) -> &TransactionRecord {
        match self {
            SplitOutcome::Completed(r)
            | SplitOutcome::PayoutFailed(r)
            | SplitOutcome::Duplicate(r) => r,
        }
    }
}

/// `(driver_share, target_contribution)` for `amount`.
///
/// Once the target is met for the period, the driver keeps everything.
pub fn split_amount(
    driver: &DriverRecord,
    amount: Amount,
    config: &LedgerConfig,
) -> (Amount, Amount) {
    if driver.target_met(config.global_daily_target) {
        return (amount, Amount::ZERO);
    }
    let share = amount.percent(driver.fare_percentage(config.global_fare_percentage));
    (share, amount - share)
}

impl Ledger {
    /// Split a fare payment, pay the driver's share out, and credit the rest
    /// toward the target once the payout is confirmed.
    ///
    /// `reference` is the payout-channel billing reference (vehicle account or driver id).
    pub async fn split_payment(
        &self,
        payment: &ValidatedNotification,
        reference: &str,
    ) -> Result<SplitOutcome, LedgerError> {
        if let Some(existing) = self.store.transaction(&payment.tx)? {
            return Ok(SplitOutcome::Duplicate(existing));
        }

        // held across the payout so a concurrent redelivery waits for our record
        let _guard = self.tx_locks.acquire(&payment.tx).await;
        if let Some(existing) = self.store.transaction(&payment.tx)? {
            return Ok(SplitOutcome::Duplicate(existing));
        }

        let driver = self
            .store
            .driver_by_reference(reference)?
            .ok_or_else(|| LedgerError::DriverNotFound(reference.to_string()))?;
        if !driver.is_active() {
            return Err(LedgerError::DriverInactive(driver.id));
        }
        let destination = driver
            .payout_destination
            .as_deref()
            .filter(|d| !d.trim().is_empty())
            .ok_or_else(|| LedgerError::NoPayoutDestination(driver.id.clone()))?;

        let (driver_share, target_contribution) =
            split_amount(&driver, payment.amount, &self.config);

        let payout = if driver_share.is_zero() {
            Ok(())
        } else {
            send_with_timeout(
                self.gateway.as_ref(),
                destination,
                driver_share,
                self.config.payout_timeout(),
            )
            .await
            .map(|receipt| {
                info!(
                    driver = %driver.id,
                    tx = %payment.tx,
                    receipt = %receipt.reference,
                    "payout confirmed"
                );
            })
        };

        let status = match &payout {
            Ok(()) => TransactionStatus::Completed,
            Err(e) => {
                warn!(
                    driver = %driver.id,
                    tx = %payment.tx,
                    reason = %e,
                    "payout failed, contribution not credited"
                );
                TransactionStatus::Failed
            }
        };

        let record = TransactionRecord {
            tx: payment.tx.clone(),
            driver: driver.id.clone(),
            kind: TransactionKind::Payment,
            amount: payment.amount,
            driver_share,
            target_contribution,
            deposited_amount: Amount::ZERO,
            status,
            customer_hash: Some(payment.customer_hash.clone()),
            at: payment.at,
        };

        let mut uow = self.store.begin(self.config.global_daily_target)?;
        if let Some(existing) = uow.transaction(&payment.tx) {
            return Ok(SplitOutcome::Duplicate(existing.clone()));
        }
        // the driver may have exited while the payout was in flight
        let exited = uow.driver(&driver.id)?.status == DriverStatus::Exited;
        if exited {
            warn!(
                driver = %driver.id,
                tx = %payment.tx,
                "driver exited during payout, contribution not credited"
            );
        } else if status == TransactionStatus::Completed {
            uow.increment_balance(&driver.id, target_contribution);
        }
        uow.append_transaction(record.clone());
        uow.commit()?;

        Ok(match status {
            TransactionStatus::Completed => SplitOutcome::Completed(record),
            TransactionStatus::Failed => SplitOutcome::PayoutFailed(record),
        })
    }
}
