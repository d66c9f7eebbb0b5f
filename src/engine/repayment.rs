//! Direct repayment channel.
//!
//! Payments keyed by a driver's alternate id go straight against the
//! outstanding target; anything beyond it tops up the deposit. There is no
//! payout leg.

use tracing::{info, warn};

use super::{Ledger, LedgerError};
use crate::Amount;
use crate::model::{
    AltId, DepositKind, TransactionKind, TransactionRecord, TransactionStatus,
    ValidatedNotification,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepaymentOutcome {
    Applied {
        record: TransactionRecord,
        target_reduction: Amount,
        deposited_amount: Amount,
    },
    /// Already processed; this is the original record.
    Duplicate(TransactionRecord),
    /// No driver carries this alternate id. Acknowledged so the sender stops
    /// redelivering; nothing is persisted.
    UnknownDriver(AltId),
}

impl Ledger {
    pub async fn apply_repayment(
        &self,
        payment: &ValidatedNotification,
        alt: &AltId,
    ) -> Result<RepaymentOutcome, LedgerError> {
        if let Some(existing) = self.store.transaction(&payment.tx)? {
            return Ok(RepaymentOutcome::Duplicate(existing));
        }
        let _guard = self.tx_locks.acquire(&payment.tx).await;

        let mut uow = self.store.begin(self.config.global_daily_target)?;
        // the lock-free check above can race another delivery; this one cannot
        if let Some(existing) = uow.transaction(&payment.tx) {
            return Ok(RepaymentOutcome::Duplicate(existing.clone()));
        }

        let Some(driver) = uow.driver_by_alt_id(alt) else {
            warn!(
                alt_id = %alt,
                tx = %payment.tx,
                "repayment for unknown alternate id acknowledged"
            );
            return Ok(RepaymentOutcome::UnknownDriver(alt.clone()));
        };
        let driver_id = driver.id.clone();

        // left_to_target is read under the store lock, so it is current
        let target_reduction = driver.left_to_target.min(payment.amount);
        let deposited_amount = payment.amount - target_reduction;

        if target_reduction.is_positive() {
            uow.increment_balance(&driver_id, target_reduction);
        }
        if deposited_amount.is_positive() {
            uow.append_deposit(
                &driver_id,
                DepositKind::TopUp,
                deposited_amount,
                format!("repayment overflow {}", payment.tx),
                payment.at,
            );
        }

        let record = TransactionRecord {
            tx: payment.tx.clone(),
            driver: driver_id.clone(),
            kind: TransactionKind::TargetReduction,
            amount: payment.amount,
            driver_share: Amount::ZERO,
            target_contribution: target_reduction,
            deposited_amount,
            status: TransactionStatus::Completed,
            customer_hash: Some(payment.customer_hash.clone()),
            at: payment.at,
        };
        uow.append_transaction(record.clone());
        let committed = uow.commit()?;

        if let Some(after) = committed.driver(&driver_id) {
            info!(
                driver = %driver_id,
                tx = %payment.tx,
                target_reduction = %target_reduction,
                deposited = %deposited_amount,
                left_to_target = %after.left_to_target,
                deposit_balance = %after.current_deposit_balance,
                "repayment applied"
            );
        }

        Ok(RepaymentOutcome::Applied {
            record,
            target_reduction,
            deposited_amount,
        })
    }
}
