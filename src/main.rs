use std::env;
use std::io;
use std::process::ExitCode;
use std::sync::Arc;

use fleet_ledger::csv::{read_drivers, read_notifications, write_drivers};
use fleet_ledger::{DryRunGateway, Ledger, LedgerConfig};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage: fleet-ledger <drivers.csv> <notifications.csv> [config.toml]";

#[tokio::main]
async fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = env::args().skip(1).collect();
    let (drivers_path, notifications_path) = match args.as_slice() {
        [drivers, notifications] | [drivers, notifications, _] => {
            (drivers.clone(), notifications.clone())
        }
        _ => {
            eprintln!("{USAGE}");
            return ExitCode::from(2);
        }
    };

    let config = match args.get(2) {
        Some(path) => match LedgerConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                error!("{e}");
                return ExitCode::FAILURE;
            }
        },
        None => LedgerConfig::default(),
    };

    for path in [&drivers_path, &notifications_path] {
        if !path.ends_with(".csv") {
            warn!(path, "input file seems to not be a csv file");
        }
    }

    let ledger = Ledger::new(Arc::new(DryRunGateway), config);

    let roster = match read_drivers(&drivers_path) {
        Ok(roster) => roster,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };
    for result in roster {
        match result.map(|profile| ledger.register_driver(profile)) {
            Ok(Ok(driver)) => info!(driver = %driver.id, "loaded driver"),
            Ok(Err(e)) => warn!("{e}"),
            Err(e) => warn!("{e}"),
        }
    }

    // owned path: the reader is moved into a spawned task
    let notifications = match read_notifications(notifications_path) {
        Ok(notifications) => notifications,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };
    let (tx_sender, tx_receiver) = tokio::sync::mpsc::channel(16);

    tokio::spawn(async move {
        for result in notifications {
            match result {
                Ok(notification) => {
                    if tx_sender.send(notification).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!("{e}");
                }
            }
        }
    });

    ledger.run(ReceiverStream::new(tx_receiver)).await;

    let drivers = match ledger.store().drivers() {
        Ok(drivers) => drivers,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };
    let global_target = ledger.config().global_daily_target;
    if let Err(e) = write_drivers(io::stdout().lock(), &drivers, global_target) {
        error!("{e}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
