#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use fleet_ledger::amount::Percentage;
use fleet_ledger::gateway::{GatewayError, PayoutReceipt};
use fleet_ledger::engine::Clock;
use fleet_ledger::model::DriverProfile;
use fleet_ledger::{
    AltId, Amount, Ledger, LedgerConfig, PaymentNotification, PayoutGateway, VehicleId,
};

/// Counts payouts; optionally fails or stalls every call.
#[derive(Default)]
pub struct CountingGateway {
    calls: AtomicUsize,
    fail: bool,
    delay: Option<Duration>,
}

impl CountingGateway {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PayoutGateway for CountingGateway {
    async fn send_payout(
        &self,
        destination: &str,
        _amount: Amount,
    ) -> Result<PayoutReceipt, GatewayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            return Err(GatewayError::Unavailable("gateway down".into()));
        }
        Ok(PayoutReceipt {
            reference: format!("ref-{destination}"),
        })
    }
}

pub fn amt(major: i64) -> Amount {
    Amount::from_major(major)
}

pub fn start() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 3, 1)
        .unwrap()
        .and_hms_opt(7, 0, 0)
        .unwrap()
}

pub fn ledger(gateway: Arc<CountingGateway>) -> Ledger {
    ledger_with_config(gateway, LedgerConfig::default())
}

pub fn ledger_with_config(gateway: Arc<CountingGateway>, config: LedgerConfig) -> Ledger {
    Ledger::new(gateway, config).with_clock(Arc::new(start))
}

/// A clock the test moves by hand.
pub fn movable_clock(at: NaiveDateTime) -> (Arc<Mutex<NaiveDateTime>>, Clock) {
    let cell = Arc::new(Mutex::new(at));
    let reader = Arc::clone(&cell);
    (cell, Arc::new(move || *reader.lock().unwrap()))
}

/// Target 3000, fare 50%, on vehicle `KDA123X`, alt id `D123456`.
pub fn driver(id: &str) -> DriverProfile {
    let mut profile = DriverProfile::new(id);
    profile.alt_id = Some(AltId::parse("D123456").unwrap());
    profile.vehicle = Some(VehicleId::new("KDA123X"));
    profile.payout_destination = Some("254700000001".into());
    profile.daily_target = Some(amt(3000));
    profile.fare_percentage = Some(Percentage::new(50).unwrap());
    profile
}

pub fn notification(tx: &str, billing: &str, amount: &str) -> PaymentNotification {
    PaymentNotification {
        transaction_id: tx.into(),
        amount: amount.into(),
        billing_reference: billing.into(),
        customer_reference: "254711111111".into(),
        trans_time: "20240301090000".into(),
    }
}
