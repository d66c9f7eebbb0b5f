pub mod amount;
pub mod config;
pub mod csv;
pub mod engine;
pub mod gateway;
pub mod model;

pub use amount::{Amount, Percentage};
pub use config::LedgerConfig;
pub use engine::{Ledger, LedgerError, Settlement};
pub use gateway::{DryRunGateway, PayoutGateway};
pub use model::{AltId, DriverId, PaymentNotification, TxId, VehicleId};
