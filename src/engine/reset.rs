//! Periodic target reset.
//!
//! Once per operating day every tracked driver is evaluated against their
//! target:
//!
//! - met: misses reset to zero, optional bonus payout, balance restarts at zero
//! - missed: misses + 1; at three misses the driver is terminated and the
//!   vehicle released, otherwise the shortfall `target - balance` becomes the
//!   new period's opening balance
//!
//! The shortfall rollover carries forward as-is; it is not a reset to zero.

use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{Ledger, LedgerError, StoreError};
use crate::Amount;
use crate::gateway::send_with_timeout;
use crate::model::{DriverId, TransactionKind, TransactionRecord, TransactionStatus, TxId};

/// Misses in a row that end a driver's assignment.
pub const MAX_CONSECUTIVE_MISSES: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ResetDecision {
    Met,
    Missed {
        misses: u32,
        carried_balance: Amount,
    },
    Terminated {
        misses: u32,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ResetSkipped {
    OutsideOperatingHours,
    AlreadyRan(NaiveDate),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResetSummary {
    pub date: NaiveDate,
    pub skipped: Option<ResetSkipped>,
    pub decisions: Vec<(DriverId, ResetDecision)>,
    /// Drivers whose transition could not be applied, with the reason. The
    /// date is already claimed, so these need an operator.
    pub failed: Vec<(DriverId, String)>,
    pub bonuses_paid: usize,
    pub bonuses_failed: usize,
}

impl ResetSummary {
    fn skipped(date: NaiveDate, reason: ResetSkipped) -> Self {
        Self {
            date,
            skipped: Some(reason),
            decisions: Vec::new(),
            failed: Vec::new(),
            bonuses_paid: 0,
            bonuses_failed: 0,
        }
    }

    pub fn decision(&self, driver: &DriverId) -> Option<ResetDecision> {
        self.decisions
            .iter()
            .find(|(id, _)| id == driver)
            .map(|(_, d)| *d)
    }
}

impl Ledger {
    /// Run the period reset if we are inside operating hours and it has not
    /// run yet today.
    pub async fn run_target_reset(&self) -> Result<ResetSummary, LedgerError> {
        let now = self.now();
        let date = now.date();

        if !self.config.operating_hours.contains(now.time()) {
            debug!(%now, "target reset skipped: outside operating hours");
            return Ok(ResetSummary::skipped(date, ResetSkipped::OutsideOperatingHours));
        }

        // claim the date first so overlapping runs do not both evaluate drivers
        let drivers = {
            let mut uow = self.store.begin(self.config.global_daily_target)?;
            if uow.last_reset() == Some(date) {
                debug!(%date, "target reset skipped: already ran");
                return Ok(ResetSummary::skipped(date, ResetSkipped::AlreadyRan(date)));
            }
            let drivers = uow.tracked_driver_ids();
            uow.mark_reset(date);
            uow.commit()?;
            drivers
        };

        let mut summary = ResetSummary {
            date,
            skipped: None,
            decisions: Vec::with_capacity(drivers.len()),
            failed: Vec::new(),
            bonuses_paid: 0,
            bonuses_failed: 0,
        };

        for id in drivers {
            let decision = match self.evaluate_driver(&id, now) {
                Ok(Some(decision)) => decision,
                Ok(None) => continue,
                Err(e) => {
                    error!(driver = %id, reason = %e, "target reset failed for driver");
                    summary.failed.push((id, e.to_string()));
                    continue;
                }
            };

            if decision == ResetDecision::Met && self.config.bonus.enabled {
                match self.pay_bonus(&id, now).await {
                    Ok(Some(TransactionStatus::Completed)) => summary.bonuses_paid += 1,
                    Ok(Some(TransactionStatus::Failed)) => summary.bonuses_failed += 1,
                    Ok(None) => {}
                    Err(e) => {
                        summary.bonuses_failed += 1;
                        warn!(driver = %id, reason = %e, "bonus payout not attempted");
                    }
                }
            }
            summary.decisions.push((id, decision));
        }

        info!(
            %date,
            evaluated = summary.decisions.len(),
            failed = summary.failed.len(),
            bonuses_paid = summary.bonuses_paid,
            bonuses_failed = summary.bonuses_failed,
            "target reset complete"
        );
        Ok(summary)
    }

    /// Apply one driver's period transition. `None` if the driver is no longer tracked.
    fn evaluate_driver(
        &self,
        id: &DriverId,
        now: NaiveDateTime,
    ) -> Result<Option<ResetDecision>, LedgerError> {
        let global_target = self.config.global_daily_target;
        let mut uow = self.store.begin(global_target)?;
        let driver = uow.driver(id)?;
        if !driver.is_tracked() {
            return Ok(None);
        }

        let target = driver.effective_target(global_target);
        let balance = driver.current_balance;
        let decision = if balance >= target {
            ResetDecision::Met
        } else {
            let misses = driver.consecutive_misses + 1;
            if misses >= MAX_CONSECUTIVE_MISSES {
                ResetDecision::Terminated { misses }
            } else {
                let carried_balance = target
                    .checked_sub(balance)
                    .ok_or_else(|| StoreError::Overflow(id.clone()))?;
                ResetDecision::Missed {
                    misses,
                    carried_balance,
                }
            }
        };

        match decision {
            ResetDecision::Met => {
                uow.set_consecutive_misses(id, 0);
                uow.start_period(id, now, Amount::ZERO);
            }
            ResetDecision::Missed {
                misses,
                carried_balance,
            } => {
                uow.set_consecutive_misses(id, misses);
                uow.start_period(id, now, carried_balance);
            }
            ResetDecision::Terminated { misses } => {
                uow.set_consecutive_misses(id, misses);
                uow.terminate(id);
            }
        }
        uow.commit()?;

        match decision {
            ResetDecision::Terminated { misses } => {
                warn!(
                    driver = %id,
                    misses,
                    balance = %balance,
                    target = %target,
                    "driver terminated after consecutive misses"
                );
            }
            _ => {
                info!(
                    driver = %id,
                    decision = ?decision,
                    balance = %balance,
                    target = %target,
                    "period reset"
                );
            }
        }
        Ok(Some(decision))
    }

    /// Pay the on-target bonus once per driver per day.
    async fn pay_bonus(
        &self,
        id: &DriverId,
        now: NaiveDateTime,
    ) -> Result<Option<TransactionStatus>, LedgerError> {
        let tx = TxId::new(format!("bonus-{id}-{}", now.format("%Y%m%d")));
        let _guard = self.tx_locks.acquire(&tx).await;
        if self.store.transaction(&tx)?.is_some() {
            return Ok(None);
        }

        let driver = self.store.driver(id)?;
        let destination = driver
            .payout_destination
            .as_deref()
            .filter(|d| !d.trim().is_empty())
            .ok_or_else(|| LedgerError::NoPayoutDestination(id.clone()))?;
        let amount = self.config.bonus.amount;

        let status = match send_with_timeout(
            self.gateway.as_ref(),
            destination,
            amount,
            self.config.payout_timeout(),
        )
        .await
        {
            Ok(_) => TransactionStatus::Completed,
            Err(e) => {
                warn!(driver = %id, reason = %e, "bonus payout failed");
                TransactionStatus::Failed
            }
        };

        let mut uow = self.store.begin(self.config.global_daily_target)?;
        uow.append_transaction(TransactionRecord {
            tx,
            driver: id.clone(),
            kind: TransactionKind::PayoutRecord,
            amount,
            driver_share: amount,
            target_contribution: Amount::ZERO,
            deposited_amount: Amount::ZERO,
            status,
            customer_hash: None,
            at: now,
        });
        uow.commit()?;
        Ok(Some(status))
    }
}

/// Drive [`Ledger::run_target_reset`] from a fixed interval. The reset itself
/// decides whether to fire, so a short interval is fine.
pub fn spawn_reset_scheduler(ledger: Arc<Ledger>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            match ledger.run_target_reset().await {
                Ok(summary) if summary.skipped.is_none() => {
                    debug!(date = %summary.date, "scheduled target reset ran");
                }
                Ok(_) => {}
                Err(e) => error!(reason = %e, "scheduled target reset failed"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use chrono::Duration as ChronoDuration;

    use super::*;
    use crate::config::LedgerConfig;
    use crate::engine::test_support::*;
    use crate::engine::{Clock, TargetState, VehicleStatus};
    use crate::gateway::testing::ScriptedGateway;
    use crate::model::{DriverStatus, VehicleId};

    fn amt(major: i64) -> Amount {
        Amount::from_major(major)
    }

    /// Clock the test can move forward.
    fn movable_clock(start: NaiveDateTime) -> (Arc<Mutex<NaiveDateTime>>, Clock) {
        let cell = Arc::new(Mutex::new(start));
        let reader = Arc::clone(&cell);
        (cell, Arc::new(move || *reader.lock().unwrap()))
    }

    fn setup(
        config: LedgerConfig,
        gateway: Arc<ScriptedGateway>,
    ) -> (Ledger, Arc<Mutex<NaiveDateTime>>, DriverId) {
        let (cell, clock) = movable_clock(t0());
        let ledger = Ledger::new(gateway, config).with_clock(clock);
        let id = ledger.register_driver(profile()).unwrap().id;
        (ledger, cell, id)
    }

    fn next_day(cell: &Mutex<NaiveDateTime>) {
        *cell.lock().unwrap() += ChronoDuration::days(1);
    }

    #[tokio::test]
    async fn miss_rolls_shortfall_forward() {
        let (ledger, _, id) = setup(LedgerConfig::default(), Arc::new(ScriptedGateway::default()));
        ledger.adjust_balance(TxId::new("A1"), &id, amt(1800)).unwrap();

        let summary = ledger.run_target_reset().await.unwrap();
        assert_eq!(
            summary.decision(&id),
            Some(ResetDecision::Missed { misses: 1, carried_balance: amt(1200) })
        );

        let driver = ledger.driver(&id).unwrap();
        assert_eq!(driver.consecutive_misses, 1);
        assert_eq!(driver.current_balance, amt(1200));
        assert_eq!(driver.period_opening_balance, amt(1200));
        assert_eq!(driver.left_to_target, amt(1800));
        assert_eq!(driver.target_state(ledger.config().global_daily_target), TargetState::Behind);
    }

    #[tokio::test]
    async fn third_miss_terminates() {
        let (ledger, clock, id) =
            setup(LedgerConfig::default(), Arc::new(ScriptedGateway::default()));

        // a zero balance carries the full target forward, which would count as
        // met next time; hold the balance below target between resets
        for day in 0..2 {
            let summary = ledger.run_target_reset().await.unwrap();
            assert!(
                matches!(summary.decision(&id), Some(ResetDecision::Missed { .. })),
                "day {day}"
            );
            let mut uow = ledger.store().begin(amt(3000)).unwrap();
            uow.set_balance(&id, amt(100));
            uow.commit().unwrap();
            next_day(&clock);
        }

        let summary = ledger.run_target_reset().await.unwrap();
        assert_eq!(summary.decision(&id), Some(ResetDecision::Terminated { misses: 3 }));

        let driver = ledger.driver(&id).unwrap();
        assert_eq!(driver.status, DriverStatus::Terminated);
        assert_eq!(driver.assigned_vehicle, None);
        let vehicle = ledger.store().vehicle(&VehicleId::new("KDA123X")).unwrap().unwrap();
        assert_eq!(vehicle.status, VehicleStatus::Available);

        // no longer evaluated
        next_day(&clock);
        let summary = ledger.run_target_reset().await.unwrap();
        assert_eq!(summary.decision(&id), None);
    }

    #[tokio::test]
    async fn met_target_resets_balance_and_misses() {
        let (ledger, clock, id) =
            setup(LedgerConfig::default(), Arc::new(ScriptedGateway::default()));
        ledger.adjust_balance(TxId::new("A1"), &id, amt(100)).unwrap();
        ledger.run_target_reset().await.unwrap();
        assert_eq!(ledger.driver(&id).unwrap().consecutive_misses, 1);

        next_day(&clock);
        ledger.adjust_balance(TxId::new("A2"), &id, amt(2500)).unwrap();
        let summary = ledger.run_target_reset().await.unwrap();
        assert_eq!(summary.decision(&id), Some(ResetDecision::Met));

        let driver = ledger.driver(&id).unwrap();
        assert_eq!(driver.consecutive_misses, 0);
        assert_eq!(driver.current_balance, Amount::ZERO);
        assert_eq!(driver.left_to_target, amt(3000));
    }

    #[tokio::test]
    async fn failed_driver_is_reported_and_others_still_reset() {
        let (ledger, _, id) = setup(LedgerConfig::default(), Arc::new(ScriptedGateway::default()));
        let mut other = profile();
        other.id = DriverId::new("drv-2");
        other.alt_id = None;
        other.vehicle = Some(VehicleId::new("KDB456Y"));
        let other = ledger.register_driver(other).unwrap().id;

        // a shortfall that cannot be represented
        ledger.store().corrupt_balance(&id, Amount::from_scaled(i64::MIN));

        let summary = ledger.run_target_reset().await.unwrap();
        assert_eq!(summary.decision(&id), None);
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.failed[0].0, id);
        assert!(summary.failed[0].1.contains("overflow"));
        assert!(matches!(summary.decision(&other), Some(ResetDecision::Missed { .. })));

        // the store is still usable
        assert_eq!(ledger.driver(&id).unwrap().consecutive_misses, 0);
    }

    #[tokio::test]
    async fn bonus_paid_once_when_enabled() {
        let mut config = LedgerConfig::default();
        config.bonus.enabled = true;
        config.bonus.amount = amt(150);
        let gateway = Arc::new(ScriptedGateway::default());
        let (ledger, _, id) = setup(config, Arc::clone(&gateway));
        ledger.adjust_balance(TxId::new("A1"), &id, amt(3000)).unwrap();

        let summary = ledger.run_target_reset().await.unwrap();
        assert_eq!(summary.bonuses_paid, 1);
        assert_eq!(gateway.call_count(), 1);

        let record = ledger
            .store()
            .transaction(&TxId::new("bonus-drv-1-20240301"))
            .unwrap()
            .unwrap();
        assert_eq!(record.kind, TransactionKind::PayoutRecord);
        assert_eq!(record.amount, amt(150));
        // bonus does not touch the target balance
        assert_eq!(ledger.driver(&id).unwrap().current_balance, Amount::ZERO);

        assert_eq!(ledger.pay_bonus(&id, t0()).await.unwrap(), None);
        assert_eq!(gateway.call_count(), 1);
    }

    #[tokio::test]
    async fn failed_bonus_is_recorded() {
        let mut config = LedgerConfig::default();
        config.bonus.enabled = true;
        config.bonus.amount = amt(150);
        let (ledger, _, id) = setup(config, Arc::new(ScriptedGateway::failing()));
        ledger.adjust_balance(TxId::new("A1"), &id, amt(3000)).unwrap();

        let summary = ledger.run_target_reset().await.unwrap();
        assert_eq!(summary.bonuses_failed, 1);
        let record = ledger
            .store()
            .transaction(&TxId::new("bonus-drv-1-20240301"))
            .unwrap()
            .unwrap();
        assert_eq!(record.status, TransactionStatus::Failed);
    }

    #[tokio::test]
    async fn skipped_outside_operating_hours() {
        let (ledger, clock, id) =
            setup(LedgerConfig::default(), Arc::new(ScriptedGateway::default()));
        *clock.lock().unwrap() = t0().date().and_hms_opt(3, 0, 0).unwrap();

        let summary = ledger.run_target_reset().await.unwrap();
        assert_eq!(summary.skipped, Some(ResetSkipped::OutsideOperatingHours));
        assert_eq!(ledger.driver(&id).unwrap().consecutive_misses, 0);
    }

    #[tokio::test]
    async fn runs_once_per_day() {
        let (ledger, clock, id) =
            setup(LedgerConfig::default(), Arc::new(ScriptedGateway::default()));
        ledger.run_target_reset().await.unwrap();

        let again = ledger.run_target_reset().await.unwrap();
        assert_eq!(again.skipped, Some(ResetSkipped::AlreadyRan(t0().date())));
        assert_eq!(ledger.driver(&id).unwrap().consecutive_misses, 1);

        next_day(&clock);
        let next = ledger.run_target_reset().await.unwrap();
        assert_eq!(next.skipped, None);
    }

    #[tokio::test]
    async fn drivers_without_vehicle_are_not_tracked() {
        let (ledger, _, _) = setup(LedgerConfig::default(), Arc::new(ScriptedGateway::default()));
        let mut p = profile();
        p.id = DriverId::new("drv-2");
        p.alt_id = None;
        p.vehicle = None;
        ledger.register_driver(p).unwrap();

        let summary = ledger.run_target_reset().await.unwrap();
        assert_eq!(summary.decision(&DriverId::new("drv-2")), None);
        assert_eq!(summary.decisions.len(), 1);
    }

    #[tokio::test]
    async fn scheduler_fires_reset() {
        let (ledger, _, id) = setup(LedgerConfig::default(), Arc::new(ScriptedGateway::default()));
        let ledger = Arc::new(ledger);
        let handle = spawn_reset_scheduler(Arc::clone(&ledger), Duration::from_millis(5));

        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.abort();

        assert_eq!(ledger.store().last_reset().unwrap(), Some(t0().date()));
        assert_eq!(ledger.driver(&id).unwrap().consecutive_misses, 1);
    }
}
