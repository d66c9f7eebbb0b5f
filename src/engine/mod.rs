//! Driver settlement ledger.
//!
//! The ledger splits fare payments between driver payout and target, applies
//! direct repayments against outstanding target, keeps the deposit sub-ledger,
//! runs the periodic target reset, and reconciles cached balances against the
//! transaction log. It also consumes an async stream of notifications.
//!
//! Every handler takes `&self` and is safe to call concurrently, including for
//! the same driver or the same transaction id.

use std::sync::Arc;

use chrono::{Local, NaiveDateTime};
use tokio_stream::{Stream, StreamExt};
use tracing::{info, warn};

use crate::Amount;
use crate::config::LedgerConfig;
use crate::gateway::PayoutGateway;
use crate::model::{
    Channel, DepositKind, DriverId, DriverProfile, PaymentNotification, TransactionKind,
    TransactionRecord, TransactionStatus, TxId, ValidationError, require_positive,
};

mod deposit;
mod error;
mod locks;
mod reconcile;
mod repayment;
mod reset;
mod split;
mod state;
mod store;

pub use deposit::ExitSettlement;
pub use error::{LedgerError, StoreError};
pub use locks::TxLocks;
pub use reconcile::{
    BalanceReconciliation, DriverBalanceReport, TargetDiscrepancy, TargetReconciliation,
};
pub use repayment::RepaymentOutcome;
pub use reset::{ResetDecision, ResetSkipped, ResetSummary, spawn_reset_scheduler};
pub use split::SplitOutcome;
pub use state::{DriverRecord, TargetState};
pub use store::{Committed, LedgerStore, UnitOfWork, VehicleRecord, VehicleStatus};

/// Source of "now" for operations that are not driven by a notification timestamp.
pub type Clock = Arc<dyn Fn() -> NaiveDateTime + Send + Sync>;

/// Result of handling one inbound notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement {
    Split(SplitOutcome),
    Repayment(RepaymentOutcome),
}

/// The settlement ledger.
pub struct Ledger {
    store: Arc<LedgerStore>,
    gateway: Arc<dyn PayoutGateway>,
    config: LedgerConfig,
    tx_locks: TxLocks,
    clock: Clock,
}

/// Public API
impl Ledger {
    pub fn new(gateway: Arc<dyn PayoutGateway>, config: LedgerConfig) -> Self {
        Self::with_store(Arc::new(LedgerStore::new()), gateway, config)
    }

    pub fn with_store(
        store: Arc<LedgerStore>,
        gateway: Arc<dyn PayoutGateway>,
        config: LedgerConfig,
    ) -> Self {
        Self {
            store,
            gateway,
            config,
            tx_locks: TxLocks::new(),
            clock: Arc::new(|| Local::now().naive_local()),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn store(&self) -> &LedgerStore {
        &self.store
    }

    pub fn now(&self) -> NaiveDateTime {
        (self.clock)()
    }

    /// Run the ledger over a stream of notifications. Failures are logged and skipped.
    pub async fn run(&self, mut stream: impl Stream<Item = PaymentNotification> + Unpin) {
        while let Some(notification) = stream.next().await {
            // a bad notification must not stop the stream
            let _ = self.handle(notification).await;
        }
    }

    /// Validate a notification and route it to the split engine or the repayment handler.
    pub async fn handle(
        &self,
        notification: PaymentNotification,
    ) -> Result<Settlement, LedgerError> {
        let validated = match notification.validate() {
            Ok(v) => v,
            Err(e) => {
                warn!(
                    tx = %notification.transaction_id,
                    reason = %e,
                    "notification rejected"
                );
                return Err(e.into());
            }
        };

        match validated.channel.clone() {
            Channel::Payout(reference) => {
                let result = self.split_payment(&validated, &reference).await;
                log_result("payment", &validated.tx, Some(validated.amount), &result);
                result.map(Settlement::Split)
            }
            Channel::Repayment(alt) => {
                let result = self.apply_repayment(&validated, &alt).await;
                log_result("repayment", &validated.tx, Some(validated.amount), &result);
                result.map(Settlement::Repayment)
            }
        }
    }

    pub fn driver(&self, id: &DriverId) -> Result<DriverRecord, LedgerError> {
        Ok(self.store.driver(id)?)
    }

    /// Onboard a driver. A positive initial deposit is written as the first
    /// deposit ledger entry.
    pub fn register_driver(&self, profile: DriverProfile) -> Result<DriverRecord, LedgerError> {
        let now = self.now();
        let id = profile.id.clone();
        let initial_deposit = profile.initial_deposit_amount.unwrap_or_default();
        if initial_deposit.is_negative() {
            return Err(ValidationError::NonPositiveAmount(initial_deposit).into());
        }

        let global_target = self.config.global_daily_target;
        let mut uow = self.store.begin(global_target)?;
        uow.insert_driver(DriverRecord::onboard(profile, now, global_target));
        if initial_deposit.is_positive() {
            uow.append_deposit(
                &id,
                DepositKind::InitialDeposit,
                initial_deposit,
                "onboarding",
                now,
            );
        }
        let committed = uow.commit()?;

        info!(driver = %id, deposit = %initial_deposit, "driver registered");
        committed
            .driver(&id)
            .cloned()
            .ok_or(LedgerError::DriverNotFound(id.to_string()))
    }

    /// Change a driver's target override; `left_to_target` follows.
    pub fn set_daily_target(
        &self,
        id: &DriverId,
        target: Option<Amount>,
    ) -> Result<DriverRecord, LedgerError> {
        let mut uow = self.store.begin(self.config.global_daily_target)?;
        uow.driver(id)?;
        uow.set_daily_target(id, target);
        let committed = uow.commit()?;
        info!(driver = %id, target = ?target.map(|t| t.to_string()), "daily target updated");
        committed
            .driver(id)
            .cloned()
            .ok_or(LedgerError::DriverNotFound(id.to_string()))
    }

    /// Opt a driver in or out of deposit-funded target deductions.
    pub fn set_target_deduction_allowed(
        &self,
        id: &DriverId,
        allowed: bool,
    ) -> Result<(), LedgerError> {
        let mut uow = self.store.begin(self.config.global_daily_target)?;
        uow.driver(id)?;
        uow.set_deduction_allowed(id, allowed);
        uow.commit()?;
        info!(driver = %id, allowed, "target deduction policy updated");
        Ok(())
    }

    /// Credit `amount` toward a driver's target outside the payment channels
    /// (cash collected by an operator, for example). Idempotent on `tx`.
    pub fn adjust_balance(
        &self,
        tx: TxId,
        id: &DriverId,
        amount: Amount,
    ) -> Result<TransactionRecord, LedgerError> {
        let amount = require_positive(amount)?;
        let now = self.now();
        let mut uow = self.store.begin(self.config.global_daily_target)?;
        if let Some(existing) = uow.transaction(&tx) {
            return Ok(existing.clone());
        }
        if !uow.driver(id)?.is_active() {
            return Err(LedgerError::DriverInactive(id.clone()));
        }

        let record = TransactionRecord {
            tx,
            driver: id.clone(),
            kind: TransactionKind::Adjustment,
            amount,
            driver_share: Amount::ZERO,
            target_contribution: amount,
            deposited_amount: Amount::ZERO,
            status: TransactionStatus::Completed,
            customer_hash: None,
            at: now,
        };
        uow.increment_balance(id, amount);
        uow.append_transaction(record.clone());
        uow.commit()?;

        info!(driver = %id, tx = %record.tx, amount = %amount, "balance adjusted");
        Ok(record)
    }
}

/// Small helper to log handler results
fn log_result<T: std::fmt::Debug>(
    op: &str,
    tx: &TxId,
    amount: Option<Amount>,
    result: &Result<T, LedgerError>,
) {
    match (result, amount) {
        (Ok(outcome), Some(amt)) => {
            info!(tx = %tx, amount = %amt, outcome = ?outcome, "{op} handled");
        }
        (Ok(outcome), None) => {
            info!(tx = %tx, outcome = ?outcome, "{op} handled");
        }
        (Err(e), Some(amt)) => {
            warn!(tx = %tx, amount = %amt, reason = %e, "{op} rejected");
        }
        (Err(e), None) => {
            warn!(tx = %tx, reason = %e, "{op} rejected");
        }
    }
}
