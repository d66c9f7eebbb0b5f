//! In-memory driver record store and transaction log.
//!
//! All writes go through a [`UnitOfWork`]: it holds the store lock, stages
//! mutations, and applies them on [`UnitOfWork::commit`] only if every one of
//! them succeeds. Dropping an uncommitted unit discards it.
//!
//! Balance changes are staged as deltas and applied to the committed value at
//! commit time, so a delta computed from an earlier snapshot never overwrites
//! a concurrent credit.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::{Mutex, MutexGuard};

use chrono::{NaiveDate, NaiveDateTime};
use tracing::debug;

use super::error::StoreError;
use super::state::DriverRecord;
use crate::Amount;
use crate::model::{
    AltId, DepositEntry, DepositKind, DriverId, DriverStatus, TransactionRecord, TxId, VehicleId,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VehicleStatus {
    Assigned,
    Available,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VehicleRecord {
    pub status: VehicleStatus,
    pub driver: Option<DriverId>,
}

#[derive(Debug, Default)]
struct StoreState {
    drivers: HashMap<DriverId, DriverRecord>,
    alt_ids: HashMap<AltId, DriverId>,
    vehicles: HashMap<VehicleId, VehicleRecord>,
    transactions: HashMap<TxId, TransactionRecord>,
    /// Insertion order of `transactions`
    tx_order: Vec<TxId>,
    deposits: HashMap<DriverId, Vec<DepositEntry>>,
    last_reset: Option<NaiveDate>,
}

#[derive(Debug, Default)]
pub struct LedgerStore {
    state: Mutex<StoreState>,
}

/// Read API. Every accessor returns owned snapshots.
impl LedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, StoreState>, StoreError> {
        self.state.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Open a unit of work. `global_target` is used to recompute
    /// `left_to_target` for every driver the unit touches.
    pub fn begin(&self, global_target: Amount) -> Result<UnitOfWork<'_>, StoreError> {
        Ok(UnitOfWork {
            state: self.lock()?,
            staged: Vec::new(),
            global_target,
        })
    }

    pub fn driver(&self, id: &DriverId) -> Result<DriverRecord, StoreError> {
        self.lock()?
            .drivers
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::UnknownDriver(id.clone()))
    }

    /// All drivers ordered by id.
    pub fn drivers(&self) -> Result<Vec<DriverRecord>, StoreError> {
        let state = self.lock()?;
        let mut drivers: Vec<_> = state.drivers.values().cloned().collect();
        drivers.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(drivers)
    }

    /// Resolve a payout-channel billing reference: the driver assigned to the
    /// vehicle of that name, else the driver with that id.
    pub fn driver_by_reference(&self, reference: &str) -> Result<Option<DriverRecord>, StoreError> {
        let state = self.lock()?;
        let by_vehicle = state
            .vehicles
            .get(&VehicleId::new(reference))
            .and_then(|v| v.driver.as_ref())
            .and_then(|id| state.drivers.get(id));
        Ok(by_vehicle
            .or_else(|| state.drivers.get(&DriverId::new(reference)))
            .cloned())
    }

    pub fn transaction(&self, tx: &TxId) -> Result<Option<TransactionRecord>, StoreError> {
        Ok(self.lock()?.transactions.get(tx).cloned())
    }

    pub fn transaction_count(&self) -> Result<usize, StoreError> {
        Ok(self.lock()?.tx_order.len())
    }

    /// Transactions for `driver` at or after `since`, in insertion order.
    pub fn transactions_since(
        &self,
        driver: &DriverId,
        since: NaiveDateTime,
    ) -> Result<Vec<TransactionRecord>, StoreError> {
        let state = self.lock()?;
        Ok(collect_since(&state, driver, since))
    }

    pub fn deposit_history(&self, driver: &DriverId) -> Result<Vec<DepositEntry>, StoreError> {
        Ok(self
            .lock()?
            .deposits
            .get(driver)
            .cloned()
            .unwrap_or_default())
    }

    pub fn vehicle(&self, id: &VehicleId) -> Result<Option<VehicleRecord>, StoreError> {
        Ok(self.lock()?.vehicles.get(id).cloned())
    }

    pub fn last_reset(&self) -> Result<Option<NaiveDate>, StoreError> {
        Ok(self.lock()?.last_reset)
    }

    /// Overwrite the cached `left_to_target` without recomputing it.
    #[cfg(test)]
    pub(crate) fn corrupt_left_to_target(&self, id: &DriverId, value: Amount) {
        let mut state = self.state.lock().unwrap();
        state.drivers.get_mut(id).unwrap().left_to_target = value;
    }

    /// Overwrite `current_balance` without touching anything else.
    #[cfg(test)]
    pub(crate) fn corrupt_balance(&self, id: &DriverId, value: Amount) {
        let mut state = self.state.lock().unwrap();
        state.drivers.get_mut(id).unwrap().current_balance = value;
    }
}

fn collect_since(
    state: &StoreState,
    driver: &DriverId,
    since: NaiveDateTime,
) -> Vec<TransactionRecord> {
    state
        .tx_order
        .iter()
        .filter_map(|tx| state.transactions.get(tx))
        .filter(|record| &record.driver == driver && record.at >= since)
        .cloned()
        .collect()
}

/// A staged change, applied at commit.
#[derive(Debug)]
enum Mutation {
    InsertDriver(Box<DriverRecord>),
    IncrementBalance { driver: DriverId, delta: Amount },
    SetBalance { driver: DriverId, balance: Amount },
    SetDailyTarget { driver: DriverId, target: Option<Amount> },
    SetConsecutiveMisses { driver: DriverId, misses: u32 },
    StartPeriod {
        driver: DriverId,
        at: NaiveDateTime,
        opening_balance: Amount,
    },
    SetDeductionAllowed { driver: DriverId, allowed: bool },
    RecomputeLeftToTarget { driver: DriverId },
    Terminate { driver: DriverId },
    Exit { driver: DriverId, date: NaiveDate },
    AppendTransaction(Box<TransactionRecord>),
    AppendDeposit {
        driver: DriverId,
        kind: DepositKind,
        amount: Amount,
        reference: String,
        at: NaiveDateTime,
    },
    MarkReset(NaiveDate),
}

/// Atomic unit of work over the store.
///
/// Reads see committed state only; staged mutations become visible after
/// [`commit`](Self::commit).
pub struct UnitOfWork<'a> {
    state: MutexGuard<'a, StoreState>,
    staged: Vec<Mutation>,
    global_target: Amount,
}

/// What a successful commit wrote.
#[derive(Debug, Default)]
pub struct Committed {
    pub drivers: HashMap<DriverId, DriverRecord>,
    pub deposit_entries: Vec<DepositEntry>,
}

impl Committed {
    pub fn driver(&self, id: &DriverId) -> Option<&DriverRecord> {
        self.drivers.get(id)
    }
}

/// Reads
impl UnitOfWork<'_> {
    pub fn driver(&self, id: &DriverId) -> Result<&DriverRecord, StoreError> {
        self.state
            .drivers
            .get(id)
            .ok_or_else(|| StoreError::UnknownDriver(id.clone()))
    }

    pub fn driver_by_alt_id(&self, alt: &AltId) -> Option<&DriverRecord> {
        self.state
            .alt_ids
            .get(alt)
            .and_then(|id| self.state.drivers.get(id))
    }

    pub fn transaction(&self, tx: &TxId) -> Option<&TransactionRecord> {
        self.state.transactions.get(tx)
    }

    pub fn transactions_since(
        &self,
        driver: &DriverId,
        since: NaiveDateTime,
    ) -> Vec<TransactionRecord> {
        collect_since(&self.state, driver, since)
    }

    pub fn tracked_driver_ids(&self) -> Vec<DriverId> {
        let mut ids: Vec<_> = self
            .state
            .drivers
            .values()
            .filter(|d| d.is_tracked())
            .map(|d| d.id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn last_reset(&self) -> Option<NaiveDate> {
        self.state.last_reset
    }
}

/// Staging
impl UnitOfWork<'_> {
    pub fn insert_driver(&mut self, record: DriverRecord) {
        self.staged.push(Mutation::InsertDriver(Box::new(record)));
    }

    /// `current_balance += delta`, applied to the committed value.
    /// Fails the commit if the driver has exited.
    pub fn increment_balance(&mut self, driver: &DriverId, delta: Amount) {
        self.staged.push(Mutation::IncrementBalance {
            driver: driver.clone(),
            delta,
        });
    }

    pub fn set_balance(&mut self, driver: &DriverId, balance: Amount) {
        self.staged.push(Mutation::SetBalance {
            driver: driver.clone(),
            balance,
        });
    }

    pub fn set_daily_target(&mut self, driver: &DriverId, target: Option<Amount>) {
        self.staged.push(Mutation::SetDailyTarget {
            driver: driver.clone(),
            target,
        });
    }

    pub fn set_consecutive_misses(&mut self, driver: &DriverId, misses: u32) {
        self.staged.push(Mutation::SetConsecutiveMisses {
            driver: driver.clone(),
            misses,
        });
    }

    /// Open a new target period with `opening_balance` as the starting balance.
    pub fn start_period(&mut self, driver: &DriverId, at: NaiveDateTime, opening_balance: Amount) {
        self.staged.push(Mutation::StartPeriod {
            driver: driver.clone(),
            at,
            opening_balance,
        });
    }

    pub fn set_deduction_allowed(&mut self, driver: &DriverId, allowed: bool) {
        self.staged.push(Mutation::SetDeductionAllowed {
            driver: driver.clone(),
            allowed,
        });
    }

    /// Touch the driver so its cached `left_to_target` is re-derived at commit.
    pub fn recompute_left_to_target(&mut self, driver: &DriverId) {
        self.staged.push(Mutation::RecomputeLeftToTarget {
            driver: driver.clone(),
        });
    }

    /// Unassign the vehicle (released to Available) and stop target tracking.
    pub fn terminate(&mut self, driver: &DriverId) {
        self.staged.push(Mutation::Terminate {
            driver: driver.clone(),
        });
    }

    /// Zero balance fields, release the vehicle, archive the record.
    pub fn exit(&mut self, driver: &DriverId, date: NaiveDate) {
        self.staged.push(Mutation::Exit {
            driver: driver.clone(),
            date,
        });
    }

    pub fn append_transaction(&mut self, record: TransactionRecord) {
        self.staged
            .push(Mutation::AppendTransaction(Box::new(record)));
    }

    /// Append a deposit ledger entry; `balance_after` is derived at commit.
    pub fn append_deposit(
        &mut self,
        driver: &DriverId,
        kind: DepositKind,
        amount: Amount,
        reference: impl Into<String>,
        at: NaiveDateTime,
    ) {
        self.staged.push(Mutation::AppendDeposit {
            driver: driver.clone(),
            kind,
            amount,
            reference: reference.into(),
            at,
        });
    }

    pub fn mark_reset(&mut self, date: NaiveDate) {
        self.staged.push(Mutation::MarkReset(date));
    }
}

/// Commit
impl UnitOfWork<'_> {
    pub fn commit(self) -> Result<Committed, StoreError> {
        let UnitOfWork {
            mut state,
            staged,
            global_target,
        } = self;

        let mut drivers: HashMap<DriverId, DriverRecord> = HashMap::new();
        let mut inserted: Vec<DriverId> = Vec::new();
        let mut new_txs: Vec<TransactionRecord> = Vec::new();
        let mut entries: Vec<DepositEntry> = Vec::new();
        let mut released: Vec<VehicleId> = Vec::new();
        let mut reset_date = None;

        for mutation in staged {
            match mutation {
                Mutation::InsertDriver(record) => {
                    if state.drivers.contains_key(&record.id) || drivers.contains_key(&record.id) {
                        return Err(StoreError::DuplicateDriver(record.id.clone()));
                    }
                    inserted.push(record.id.clone());
                    drivers.insert(record.id.clone(), *record);
                }
                Mutation::IncrementBalance { driver, delta } => {
                    let record = touch(&state, &mut drivers, &driver)?;
                    if record.status == DriverStatus::Exited {
                        return Err(StoreError::DriverExited(driver));
                    }
                    record.current_balance = record
                        .current_balance
                        .checked_add(delta)
                        .ok_or(StoreError::Overflow(driver))?;
                }
                Mutation::SetBalance { driver, balance } => {
                    touch(&state, &mut drivers, &driver)?.current_balance = balance;
                }
                Mutation::SetDailyTarget { driver, target } => {
                    touch(&state, &mut drivers, &driver)?.daily_target = target;
                }
                Mutation::SetConsecutiveMisses { driver, misses } => {
                    touch(&state, &mut drivers, &driver)?.consecutive_misses = misses;
                }
                Mutation::StartPeriod {
                    driver,
                    at,
                    opening_balance,
                } => {
                    let record = touch(&state, &mut drivers, &driver)?;
                    record.current_balance = opening_balance;
                    record.period_opening_balance = opening_balance;
                    record.period_started_at = at;
                }
                Mutation::SetDeductionAllowed { driver, allowed } => {
                    touch(&state, &mut drivers, &driver)?.allow_target_deduction_from_deposit =
                        allowed;
                }
                Mutation::RecomputeLeftToTarget { driver } => {
                    touch(&state, &mut drivers, &driver)?;
                }
                Mutation::Terminate { driver } => {
                    let record = touch(&state, &mut drivers, &driver)?;
                    record.status = DriverStatus::Terminated;
                    released.extend(record.assigned_vehicle.take());
                }
                Mutation::Exit { driver, date } => {
                    let record = touch(&state, &mut drivers, &driver)?;
                    record.status = DriverStatus::Exited;
                    record.exit_date = Some(date);
                    record.current_balance = Amount::ZERO;
                    record.period_opening_balance = Amount::ZERO;
                    record.consecutive_misses = 0;
                    released.extend(record.assigned_vehicle.take());
                }
                Mutation::AppendTransaction(record) => {
                    if state.transactions.contains_key(&record.tx)
                        || new_txs.iter().any(|r| r.tx == record.tx)
                    {
                        return Err(StoreError::DuplicateTransaction(record.tx.clone()));
                    }
                    let amounts = [
                        record.amount,
                        record.driver_share,
                        record.target_contribution,
                        record.deposited_amount,
                    ];
                    if amounts.iter().any(|a| a.is_negative()) {
                        return Err(StoreError::NegativeAmount(record.tx.clone()));
                    }
                    // the owning driver must exist
                    touch(&state, &mut drivers, &record.driver)?;
                    new_txs.push(*record);
                }
                Mutation::AppendDeposit {
                    driver,
                    kind,
                    amount,
                    reference,
                    at,
                } => {
                    let record = touch(&state, &mut drivers, &driver)?;
                    let Some(balance_after) = record.current_deposit_balance.checked_add(amount)
                    else {
                        return Err(StoreError::Overflow(driver));
                    };
                    if balance_after.is_negative() {
                        return Err(StoreError::NegativeDeposit {
                            driver,
                            balance: record.current_deposit_balance,
                            change: amount,
                        });
                    }
                    record.current_deposit_balance = balance_after;
                    entries.push(DepositEntry {
                        driver,
                        kind,
                        amount,
                        balance_after,
                        reference,
                        created_at: at,
                    });
                }
                Mutation::MarkReset(date) => reset_date = Some(date),
            }
        }

        for id in &inserted {
            let record = &drivers[id];
            if let Some(alt) = &record.alt_id {
                if state.alt_ids.get(alt).is_some_and(|owner| owner != id) {
                    return Err(StoreError::DuplicateAltId(alt.to_string()));
                }
            }
            if let Some(vehicle) = &record.assigned_vehicle {
                if let Some(owner) = state.vehicles.get(vehicle).and_then(|v| v.driver.as_ref()) {
                    return Err(StoreError::VehicleTaken(vehicle.clone(), owner.clone()));
                }
            }
        }

        // Validation is done; from here on nothing can fail.
        for record in drivers.values_mut() {
            if record.status == DriverStatus::Exited {
                record.left_to_target = Amount::ZERO;
            } else {
                record.left_to_target = record.expected_left_to_target(global_target);
            }
        }

        for id in inserted {
            let record = &drivers[&id];
            if let Some(alt) = record.alt_id.clone() {
                state.alt_ids.insert(alt, id.clone());
            }
            if let Some(vehicle) = record.assigned_vehicle.clone() {
                state.vehicles.insert(
                    vehicle,
                    VehicleRecord {
                        status: VehicleStatus::Assigned,
                        driver: Some(id),
                    },
                );
            }
        }
        for vehicle in released {
            state.vehicles.insert(
                vehicle,
                VehicleRecord {
                    status: VehicleStatus::Available,
                    driver: None,
                },
            );
        }
        for record in new_txs {
            state.tx_order.push(record.tx.clone());
            state.transactions.insert(record.tx.clone(), record);
        }
        for entry in &entries {
            state
                .deposits
                .entry(entry.driver.clone())
                .or_default()
                .push(entry.clone());
        }
        for (id, record) in &drivers {
            state.drivers.insert(id.clone(), record.clone());
        }
        if let Some(date) = reset_date {
            state.last_reset = Some(date);
        }

        debug!(
            drivers = drivers.len(),
            deposit_entries = entries.len(),
            "unit of work committed"
        );

        Ok(Committed {
            drivers,
            deposit_entries: entries,
        })
    }
}

/// Scratch copy of a driver for this commit, cloned from committed state on first touch.
fn touch<'d>(
    state: &StoreState,
    drivers: &'d mut HashMap<DriverId, DriverRecord>,
    id: &DriverId,
) -> Result<&'d mut DriverRecord, StoreError> {
    match drivers.entry(id.clone()) {
        Entry::Occupied(entry) => Ok(entry.into_mut()),
        Entry::Vacant(entry) => {
            let committed = state
                .drivers
                .get(id)
                .ok_or_else(|| StoreError::UnknownDriver(id.clone()))?;
            Ok(entry.insert(committed.clone()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DriverProfile, TransactionKind, TransactionStatus};

    fn at() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(8, 0, 0)
            .unwrap()
    }

    fn target() -> Amount {
        Amount::from_major(3000)
    }

    fn seeded() -> (LedgerStore, DriverId) {
        let store = LedgerStore::new();
        let mut profile = DriverProfile::new("drv-1");
        profile.vehicle = Some(VehicleId::new("KDA123X"));
        profile.alt_id = Some(AltId::parse("D123456").unwrap());
        let id = profile.id.clone();

        let mut uow = store.begin(target()).unwrap();
        uow.insert_driver(DriverRecord::onboard(profile, at(), target()));
        uow.commit().unwrap();
        (store, id)
    }

    fn payment(tx: &str, driver: &DriverId, contribution: i64) -> TransactionRecord {
        TransactionRecord {
            tx: TxId::new(tx),
            driver: driver.clone(),
            kind: TransactionKind::Payment,
            amount: Amount::from_major(contribution * 2),
            driver_share: Amount::from_major(contribution),
            target_contribution: Amount::from_major(contribution),
            deposited_amount: Amount::ZERO,
            status: TransactionStatus::Completed,
            customer_hash: None,
            at: at(),
        }
    }

    #[test]
    fn insert_indexes_alt_id_and_vehicle() {
        let (store, id) = seeded();
        let uow = store.begin(target()).unwrap();
        let alt = AltId::parse("D123456").unwrap();
        assert_eq!(uow.driver_by_alt_id(&alt).unwrap().id, id);
        drop(uow);

        assert_eq!(store.driver_by_reference("KDA123X").unwrap().unwrap().id, id);

        let vehicle = store.vehicle(&VehicleId::new("KDA123X")).unwrap().unwrap();
        assert_eq!(vehicle.status, VehicleStatus::Assigned);
    }

    #[test]
    fn increments_accumulate_and_recompute_left_to_target() {
        let (store, id) = seeded();
        let mut uow = store.begin(target()).unwrap();
        uow.increment_balance(&id, Amount::from_major(500));
        uow.increment_balance(&id, Amount::from_major(250));
        let committed = uow.commit().unwrap();

        let driver = committed.driver(&id).unwrap();
        assert_eq!(driver.current_balance, Amount::from_major(750));
        assert_eq!(driver.left_to_target, Amount::from_major(2250));
        assert_eq!(store.driver(&id).unwrap(), *driver);
    }

    #[test]
    fn dropped_unit_of_work_changes_nothing() {
        let (store, id) = seeded();
        {
            let mut uow = store.begin(target()).unwrap();
            uow.increment_balance(&id, Amount::from_major(500));
            uow.append_transaction(payment("T1", &id, 500));
        }
        assert_eq!(store.driver(&id).unwrap().current_balance, Amount::ZERO);
        assert_eq!(store.transaction_count().unwrap(), 0);
    }

    #[test]
    fn failed_commit_rolls_back_every_mutation() {
        let (store, id) = seeded();
        let mut uow = store.begin(target()).unwrap();
        uow.increment_balance(&id, Amount::from_major(500));
        uow.append_transaction(payment("T1", &id, 500));
        // deposit is zero, so this debit must fail the whole unit
        uow.append_deposit(&id, DepositKind::DamageDeduction, Amount::from_major(-10), "x", at());
        assert!(matches!(
            uow.commit(),
            Err(StoreError::NegativeDeposit { .. })
        ));

        assert_eq!(store.driver(&id).unwrap().current_balance, Amount::ZERO);
        assert_eq!(store.transaction(&TxId::new("T1")).unwrap(), None);
        assert!(store.deposit_history(&id).unwrap().is_empty());
    }

    #[test]
    fn duplicate_transaction_is_rejected() {
        let (store, id) = seeded();
        let mut uow = store.begin(target()).unwrap();
        uow.append_transaction(payment("T1", &id, 500));
        uow.commit().unwrap();

        let mut uow = store.begin(target()).unwrap();
        uow.increment_balance(&id, Amount::from_major(500));
        uow.append_transaction(payment("T1", &id, 500));
        assert_eq!(
            uow.commit().unwrap_err(),
            StoreError::DuplicateTransaction(TxId::new("T1"))
        );
        assert_eq!(store.driver(&id).unwrap().current_balance, Amount::ZERO);
    }

    #[test]
    fn deposit_entries_chain_balance_after() {
        let (store, id) = seeded();
        let mut uow = store.begin(target()).unwrap();
        uow.append_deposit(&id, DepositKind::TopUp, Amount::from_major(300), "a", at());
        uow.append_deposit(&id, DepositKind::DamageDeduction, Amount::from_major(-100), "b", at());
        uow.commit().unwrap();

        let history = store.deposit_history(&id).unwrap();
        let balances: Vec<_> = history.iter().map(|e| e.balance_after).collect();
        assert_eq!(balances, vec![Amount::from_major(300), Amount::from_major(200)]);
        assert_eq!(
            store.driver(&id).unwrap().current_deposit_balance,
            Amount::from_major(200)
        );
    }

    #[test]
    fn overflowing_increment_rolls_back() {
        let (store, id) = seeded();
        let mut uow = store.begin(target()).unwrap();
        uow.increment_balance(&id, Amount::from_scaled(i64::MAX));
        uow.commit().unwrap();

        let mut uow = store.begin(target()).unwrap();
        uow.increment_balance(&id, Amount::from_scaled(1));
        uow.append_transaction(payment("T1", &id, 1));
        assert_eq!(uow.commit().unwrap_err(), StoreError::Overflow(id.clone()));

        // the lock is not poisoned and nothing was applied
        let driver = store.driver(&id).unwrap();
        assert_eq!(driver.current_balance, Amount::from_scaled(i64::MAX));
        assert_eq!(driver.left_to_target, Amount::ZERO);
        assert_eq!(store.transaction_count().unwrap(), 0);
    }

    #[test]
    fn overflowing_deposit_rolls_back() {
        let (store, id) = seeded();
        let mut uow = store.begin(target()).unwrap();
        uow.append_deposit(&id, DepositKind::TopUp, Amount::from_scaled(i64::MAX), "a", at());
        uow.commit().unwrap();

        let mut uow = store.begin(target()).unwrap();
        uow.append_deposit(&id, DepositKind::TopUp, Amount::from_scaled(1), "b", at());
        assert_eq!(uow.commit().unwrap_err(), StoreError::Overflow(id.clone()));
        assert_eq!(store.deposit_history(&id).unwrap().len(), 1);
    }

    #[test]
    fn exited_driver_cannot_be_credited() {
        let (store, id) = seeded();
        let mut uow = store.begin(target()).unwrap();
        uow.exit(&id, at().date());
        uow.commit().unwrap();

        let mut uow = store.begin(target()).unwrap();
        uow.increment_balance(&id, Amount::from_major(500));
        assert_eq!(uow.commit().unwrap_err(), StoreError::DriverExited(id.clone()));
        assert_eq!(store.driver(&id).unwrap().current_balance, Amount::ZERO);
    }

    #[test]
    fn recompute_repairs_cached_left_to_target() {
        let (store, id) = seeded();
        store.corrupt_left_to_target(&id, Amount::from_major(7));
        let mut uow = store.begin(target()).unwrap();
        uow.recompute_left_to_target(&id);
        uow.commit().unwrap();
        assert_eq!(store.driver(&id).unwrap().left_to_target, target());
    }

    #[test]
    fn terminate_releases_vehicle() {
        let (store, id) = seeded();
        let mut uow = store.begin(target()).unwrap();
        uow.terminate(&id);
        uow.commit().unwrap();

        let driver = store.driver(&id).unwrap();
        assert_eq!(driver.status, DriverStatus::Terminated);
        assert_eq!(driver.assigned_vehicle, None);
        let vehicle = store.vehicle(&VehicleId::new("KDA123X")).unwrap().unwrap();
        assert_eq!(vehicle.status, VehicleStatus::Available);
        assert_eq!(vehicle.driver, None);
    }

    #[test]
    fn vehicle_cannot_be_double_assigned() {
        let (store, _) = seeded();
        let mut profile = DriverProfile::new("drv-2");
        profile.vehicle = Some(VehicleId::new("KDA123X"));
        let mut uow = store.begin(target()).unwrap();
        uow.insert_driver(DriverRecord::onboard(profile, at(), target()));
        assert!(matches!(uow.commit(), Err(StoreError::VehicleTaken(..))));
    }

    #[test]
    fn unknown_driver_aborts_commit() {
        let (store, _) = seeded();
        let mut uow = store.begin(target()).unwrap();
        uow.increment_balance(&DriverId::new("ghost"), Amount::from_major(1));
        assert_eq!(
            uow.commit().unwrap_err(),
            StoreError::UnknownDriver(DriverId::new("ghost"))
        );
    }

    #[test]
    fn transactions_since_filters_by_driver_and_time() {
        let (store, id) = seeded();
        let mut uow = store.begin(target()).unwrap();
        uow.append_transaction(payment("T1", &id, 100));
        let mut late = payment("T2", &id, 200);
        late.at = at() + chrono::Duration::hours(2);
        uow.append_transaction(late);
        uow.commit().unwrap();

        let since = at() + chrono::Duration::hours(1);
        let txs = store.transactions_since(&id, since).unwrap();
        assert_eq!(txs.len(), 1);
        assert_eq!(txs[0].tx, TxId::new("T2"));
        assert!(
            store
                .transactions_since(&DriverId::new("other"), at())
                .unwrap()
                .is_empty()
        );
    }
}
