//! Core domain types for the settlement ledger.

use std::fmt;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::Amount;
use crate::amount::Percentage;

/// Format of `trans_time` on inbound notifications.
pub const TRANS_TIME_FORMAT: &str = "%Y%m%d%H%M%S";

macro_rules! string_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }
    };
}

string_id!(
    /// Stable driver identifier.
    DriverId
);
string_id!(
    /// Vehicle account reference, also used as the payout-channel billing reference.
    VehicleId
);
string_id!(
    /// Caller-supplied transaction identifier; the idempotency key.
    TxId
);

/// Alternate driver identifier used on the repayment channel: one uppercase
/// ASCII letter followed by exactly six digits (`D123456`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AltId(String);

#[derive(Debug, Error, PartialEq, Eq)]
#[error("'{0}' is not a valid alternate id (expected one uppercase letter and six digits)")]
pub struct InvalidAltId(pub String);

impl AltId {
    pub fn parse(s: &str) -> Result<Self, InvalidAltId> {
        let bytes = s.as_bytes();
        let valid = bytes.len() == 7
            && bytes[0].is_ascii_uppercase()
            && bytes[1..].iter().all(u8::is_ascii_digit);
        if valid {
            Ok(AltId(s.to_string()))
        } else {
            Err(InvalidAltId(s.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for AltId {
    type Error = InvalidAltId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        AltId::parse(&value)
    }
}

impl From<AltId> for String {
    fn from(id: AltId) -> String {
        id.0
    }
}

impl fmt::Display for AltId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which handler an inbound payment is routed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Channel {
    /// Fare payment split between driver payout and target.
    Payout(String),
    /// Direct repayment against outstanding target, keyed by alternate id.
    Repayment(AltId),
}

impl Channel {
    pub fn route(billing_reference: &str) -> Self {
        match AltId::parse(billing_reference) {
            Ok(alt) => Channel::Repayment(alt),
            Err(_) => Channel::Payout(billing_reference.to_string()),
        }
    }
}

/// Inbound payment notification, normalized from the provider callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentNotification {
    pub transaction_id: String,
    pub amount: String,
    pub billing_reference: String,
    pub customer_reference: String,
    pub trans_time: String,
}

/// Reasons a notification is rejected before anything is persisted.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("missing transaction id")]
    MissingTransactionId,
    #[error("missing billing reference")]
    MissingBillingReference,
    #[error("invalid amount: {0}")]
    InvalidAmount(String),
    #[error("amount must be positive, got {0}")]
    NonPositiveAmount(Amount),
    #[error("malformed trans_time '{0}' (expected YYYYMMDDHHmmss)")]
    MalformedTimestamp(String),
    #[error(transparent)]
    AltId(#[from] InvalidAltId),
    #[error("percentage {0} is outside 0..=100")]
    Percentage(u8),
}

/// A notification that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedNotification {
    pub tx: TxId,
    pub amount: Amount,
    pub channel: Channel,
    pub customer_hash: String,
    pub at: NaiveDateTime,
}

impl PaymentNotification {
    pub fn validate(&self) -> Result<ValidatedNotification, ValidationError> {
        let tx = self.transaction_id.trim();
        if tx.is_empty() {
            return Err(ValidationError::MissingTransactionId);
        }
        let billing = self.billing_reference.trim();
        if billing.is_empty() {
            return Err(ValidationError::MissingBillingReference);
        }

        let amount = self
            .amount
            .parse::<Amount>()
            .map_err(|e| ValidationError::InvalidAmount(e.to_string()))?;
        let amount = require_positive(amount)?;

        let at = NaiveDateTime::parse_from_str(self.trans_time.trim(), TRANS_TIME_FORMAT)
            .map_err(|_| ValidationError::MalformedTimestamp(self.trans_time.clone()))?;

        Ok(ValidatedNotification {
            tx: TxId::new(tx),
            amount,
            channel: Channel::route(billing),
            customer_hash: hash_customer_reference(&self.customer_reference),
            at,
        })
    }
}

pub(crate) fn require_positive(amount: Amount) -> Result<Amount, ValidationError> {
    if amount.is_positive() {
        Ok(amount)
    } else {
        Err(ValidationError::NonPositiveAmount(amount))
    }
}

/// Lowercase hex SHA-256 of the trimmed customer reference.
pub fn hash_customer_reference(reference: &str) -> String {
    hex::encode(Sha256::digest(reference.trim().as_bytes()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionKind {
    Payment,
    Adjustment,
    DriverRepayment,
    /// Direct repayment: target reduction with deposit overflow.
    TargetReduction,
    /// Outbound payout made outside a fare split (bonus).
    PayoutRecord,
}

impl TransactionKind {
    /// Kinds whose `target_contribution` is credited to `current_balance`.
    pub fn credits_target(self) -> bool {
        !matches!(self, TransactionKind::PayoutRecord)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionStatus {
    Completed,
    Failed,
}

/// Immutable payment record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransactionRecord {
    pub tx: TxId,
    pub driver: DriverId,
    pub kind: TransactionKind,
    pub amount: Amount,
    pub driver_share: Amount,
    pub target_contribution: Amount,
    pub deposited_amount: Amount,
    pub status: TransactionStatus,
    pub customer_hash: Option<String>,
    pub at: NaiveDateTime,
}

impl TransactionRecord {
    pub fn is_completed(&self) -> bool {
        self.status == TransactionStatus::Completed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DepositKind {
    InitialDeposit,
    TopUp,
    TargetDeduction,
    DamageDeduction,
    Refund,
    Adjustment,
}

/// Append-only deposit ledger row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DepositEntry {
    pub driver: DriverId,
    pub kind: DepositKind,
    /// Signed: positive credits, negative debits.
    pub amount: Amount,
    pub balance_after: Amount,
    pub reference: String,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DriverStatus {
    Active,
    Terminated,
    Exited,
}

/// Onboarding input for a new driver.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DriverProfile {
    pub id: DriverId,
    pub alt_id: Option<AltId>,
    pub vehicle: Option<VehicleId>,
    pub payout_destination: Option<String>,
    pub daily_target: Option<Amount>,
    pub fare_percentage: Option<Percentage>,
    #[serde(default)]
    pub deposit_required: bool,
    pub initial_deposit_amount: Option<Amount>,
    #[serde(default)]
    pub allow_target_deduction_from_deposit: bool,
}

impl DriverProfile {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: DriverId::new(id),
            alt_id: None,
            vehicle: None,
            payout_destination: None,
            daily_target: None,
            fare_percentage: None,
            deposit_required: false,
            initial_deposit_amount: None,
            allow_target_deduction_from_deposit: false,
        }
    }
}
