use serde::{Deserialize, Serialize};
use std::io;
use std::path::Path;
use thiserror::Error;

use crate::amount::Percentage;
use crate::engine::DriverRecord;
use crate::model::{
    AltId, DriverId, DriverProfile, DriverStatus, PaymentNotification, ValidationError, VehicleId,
};
use crate::Amount;

/// Errors that can occur when reading or writing csv files
#[derive(Debug, Error)]
pub enum CsvError {
    #[error("{path}: failed to open csv file: {source}")]
    Open { path: String, source: csv::Error },

    #[error("line {line}: failed to parse row: {source}")]
    Parse { line: usize, source: csv::Error },

    #[error("line {line}: {source}")]
    Invalid { line: usize, source: ValidationError },

    #[error("failed to write csv: {0}")]
    Write(#[from] csv::Error),

    #[error("failed to flush csv output: {0}")]
    Flush(#[from] io::Error),
}

#[derive(Debug, Deserialize)]
struct RosterRow {
    driver: DriverId,
    alt_id: Option<String>,
    vehicle: Option<VehicleId>,
    payout_destination: Option<String>,
    daily_target: Option<Amount>,
    fare_percentage: Option<u8>,
    initial_deposit: Option<Amount>,
    #[serde(default)]
    allow_target_deduction: Option<bool>,
}

impl RosterRow {
    fn into_profile(self) -> Result<DriverProfile, ValidationError> {
        let alt_id = non_empty(self.alt_id).map(|s| AltId::parse(&s)).transpose()?;
        let fare_percentage = self
            .fare_percentage
            .map(|p| Percentage::new(p).map_err(|_| ValidationError::Percentage(p)))
            .transpose()?;
        let initial_deposit = self.initial_deposit.filter(|d| !d.is_zero());

        Ok(DriverProfile {
            id: self.driver,
            alt_id,
            vehicle: self.vehicle.filter(|v| !v.as_str().is_empty()),
            payout_destination: non_empty(self.payout_destination),
            daily_target: self.daily_target,
            fare_percentage,
            deposit_required: initial_deposit.is_some(),
            initial_deposit_amount: initial_deposit,
            allow_target_deduction_from_deposit: self.allow_target_deduction.unwrap_or(false),
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.is_empty())
}

#[derive(Debug, Deserialize)]
struct NotificationRow {
    transaction_id: String,
    amount: String,
    billing_reference: String,
    #[serde(default)]
    customer_reference: String,
    trans_time: String,
}

impl From<NotificationRow> for PaymentNotification {
    fn from(row: NotificationRow) -> Self {
        PaymentNotification {
            transaction_id: row.transaction_id,
            amount: row.amount,
            billing_reference: row.billing_reference,
            customer_reference: row.customer_reference,
            trans_time: row.trans_time,
        }
    }
}

#[derive(Debug, Serialize)]
struct OutputRow<'a> {
    driver: &'a str,
    vehicle: &'a str,
    status: &'static str,
    target: String,
    balance: String,
    left_to_target: String,
    misses: u32,
    deposit: String,
}

fn open(path: &Path) -> Result<csv::Reader<std::fs::File>, CsvError> {
    csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|source| CsvError::Open {
            path: path.display().to_string(),
            source,
        })
}

/// Read the driver roster from a csv file
pub fn read_drivers(
    path: impl AsRef<Path>,
) -> Result<impl Iterator<Item = Result<DriverProfile, CsvError>>, CsvError> {
    let reader = open(path.as_ref())?;

    Ok(reader
        .into_deserialize::<RosterRow>()
        .enumerate()
        .map(|(idx, result)| {
            let line = idx + 2; // 1-indexed, skip header
            let row = result.map_err(|source| CsvError::Parse { line, source })?;
            row.into_profile()
                .map_err(|source| CsvError::Invalid { line, source })
        }))
}

/// Read payment notifications from a csv file. Field validation is left to the ledger.
pub fn read_notifications(
    path: impl AsRef<Path>,
) -> Result<impl Iterator<Item = Result<PaymentNotification, CsvError>>, CsvError> {
    let reader = open(path.as_ref())?;

    Ok(reader
        .into_deserialize::<NotificationRow>()
        .enumerate()
        .map(|(idx, result)| {
            let line = idx + 2;
            result
                .map(PaymentNotification::from)
                .map_err(|source| CsvError::Parse { line, source })
        }))
}

/// Write the driver balance table in csv format
pub fn write_drivers<'a>(
    out: impl io::Write,
    drivers: impl IntoIterator<Item = &'a DriverRecord>,
    global_target: Amount,
) -> Result<(), CsvError> {
    let mut writer = csv::Writer::from_writer(out);

    for driver in drivers {
        let row = OutputRow {
            driver: driver.id.as_str(),
            vehicle: driver.assigned_vehicle.as_ref().map_or("", |v| v.as_str()),
            status: match driver.status {
                DriverStatus::Active => "active",
                DriverStatus::Terminated => "terminated",
                DriverStatus::Exited => "exited",
            },
            target: driver.effective_target(global_target).to_string(),
            balance: driver.current_balance.to_string(),
            left_to_target: driver.left_to_target.to_string(),
            misses: driver.consecutive_misses,
            deposit: driver.current_deposit_balance.to_string(),
        };
        writer.serialize(&row)?;
    }

    writer.flush()?;
    Ok(())
}
