//! Outbound payout gateway.
//!
//! The ledger treats the gateway as a black box: it sends `(destination, amount)`
//! and gets back a receipt or an error. Timeouts are failures. Nothing is retried.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

use crate::Amount;

/// Confirmation returned by the gateway for a successful payout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayoutReceipt {
    pub reference: String,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GatewayError {
    #[error("payout rejected: {0}")]
    Rejected(String),
    #[error("payout timed out after {0:?}")]
    Timeout(Duration),
    #[error("gateway unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait PayoutGateway: Send + Sync {
    async fn send_payout(
        &self,
        destination: &str,
        amount: Amount,
    ) -> Result<PayoutReceipt, GatewayError>;
}

/// Send a payout, treating an elapsed `timeout` as a failure.
pub async fn send_with_timeout(
    gateway: &dyn PayoutGateway,
    destination: &str,
    amount: Amount,
    timeout: Duration,
) -> Result<PayoutReceipt, GatewayError> {
    match tokio::time::timeout(timeout, gateway.send_payout(destination, amount)).await {
        Ok(result) => result,
        Err(_) => Err(GatewayError::Timeout(timeout)),
    }
}

/// Accepts every payout without moving money. Used for offline replays.
#[derive(Debug, Default)]
pub struct DryRunGateway;

#[async_trait]
impl PayoutGateway for DryRunGateway {
    async fn send_payout(
        &self,
        destination: &str,
        amount: Amount,
    ) -> Result<PayoutReceipt, GatewayError> {
        info!(destination, amount = %amount, "dry-run payout");
        Ok(PayoutReceipt {
            reference: format!("dry-run-{}", uuid::Uuid::new_v4()),
        })
    }
}
