use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;

use crate::Amount;
use crate::amount::Percentage;
use crate::model::{AltId, DriverId, DriverProfile, DriverStatus, VehicleId};

/// Durable per-driver state.
///
/// Records handed out by the store are snapshots; every mutation goes through
/// a [`UnitOfWork`](super::UnitOfWork).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DriverRecord {
    pub id: DriverId,
    pub alt_id: Option<AltId>,
    pub assigned_vehicle: Option<VehicleId>,
    pub payout_destination: Option<String>,
    pub daily_target: Option<Amount>,
    pub fare_percentage: Option<Percentage>,
    pub current_balance: Amount,
    /// Cached `max(0, effective_target - current_balance)`.
    pub left_to_target: Amount,
    pub consecutive_misses: u32,
    pub deposit_required: bool,
    pub initial_deposit_amount: Amount,
    pub current_deposit_balance: Amount,
    pub allow_target_deduction_from_deposit: bool,
    pub status: DriverStatus,
    pub period_started_at: NaiveDateTime,
    /// Balance the current period started from (non-zero after a rolled-over miss).
    pub period_opening_balance: Amount,
    pub exit_date: Option<NaiveDate>,
}

/// Where a driver stands against the target for the current period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TargetState {
    OnTarget,
    Behind,
    Terminated,
}

impl DriverRecord {
    /// Fresh record at onboarding. The deposit balance starts at zero and is
    /// funded by an Initial Deposit ledger entry.
    pub fn onboard(profile: DriverProfile, now: NaiveDateTime, global_target: Amount) -> Self {
        let mut record = Self {
            id: profile.id,
            alt_id: profile.alt_id,
            assigned_vehicle: profile.vehicle,
            payout_destination: profile.payout_destination,
            daily_target: profile.daily_target,
            fare_percentage: profile.fare_percentage,
            current_balance: Amount::ZERO,
            left_to_target: Amount::ZERO,
            consecutive_misses: 0,
            deposit_required: profile.deposit_required,
            initial_deposit_amount: profile.initial_deposit_amount.unwrap_or_default(),
            current_deposit_balance: Amount::ZERO,
            allow_target_deduction_from_deposit: profile.allow_target_deduction_from_deposit,
            status: DriverStatus::Active,
            period_started_at: now,
            period_opening_balance: Amount::ZERO,
            exit_date: None,
        };
        record.left_to_target = record.expected_left_to_target(global_target);
        record
    }

    /// Per-driver override, or the global target when absent or zero.
    pub fn effective_target(&self, global_target: Amount) -> Amount {
        match self.daily_target {
            Some(target) if target.is_positive() => target,
            _ => global_target,
        }
    }

    pub fn fare_percentage(&self, global: Percentage) -> Percentage {
        self.fare_percentage.unwrap_or(global)
    }

    pub fn expected_left_to_target(&self, global_target: Amount) -> Amount {
        self.effective_target(global_target)
            .shortfall_from(self.current_balance)
    }

    pub fn target_met(&self, global_target: Amount) -> bool {
        self.current_balance >= self.effective_target(global_target)
    }

    pub fn target_state(&self, global_target: Amount) -> TargetState {
        if self.status != DriverStatus::Active {
            TargetState::Terminated
        } else if self.target_met(global_target) {
            TargetState::OnTarget
        } else {
            TargetState::Behind
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == DriverStatus::Active
    }

    /// Active drivers with a vehicle are the ones tracked against a target.
    pub fn is_tracked(&self) -> bool {
        self.is_active() && self.assigned_vehicle.is_some()
    }
}
