mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use fleet_ledger::engine::{RepaymentOutcome, SplitOutcome};
use fleet_ledger::model::TransactionKind;
use fleet_ledger::{Amount, Settlement};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_redelivery_pays_once() {
    let gateway = Arc::new(CountingGateway::slow(Duration::from_millis(20)));
    let ledger = Arc::new(ledger(Arc::clone(&gateway)));
    let id = ledger.register_driver(driver("drv-1")).unwrap().id;

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let ledger = Arc::clone(&ledger);
            tokio::spawn(async move {
                ledger.handle(notification("QK1", "KDA123X", "1000")).await
            })
        })
        .collect();

    let mut completed = 0;
    for handle in handles {
        match handle.await.unwrap().unwrap() {
            Settlement::Split(SplitOutcome::Completed(_)) => completed += 1,
            Settlement::Split(SplitOutcome::Duplicate(_)) => {}
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    assert_eq!(completed, 1);
    assert_eq!(gateway.calls(), 1);
    assert_eq!(ledger.driver(&id).unwrap().current_balance, amt(500));
    assert_eq!(ledger.store().transaction_count().unwrap(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_repayment_redelivery_applies_once() {
    let ledger = Arc::new(ledger(Arc::new(CountingGateway::default())));
    let id = ledger.register_driver(driver("drv-1")).unwrap().id;

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let ledger = Arc::clone(&ledger);
            tokio::spawn(async move {
                ledger.handle(notification("R1", "D123456", "3200")).await
            })
        })
        .collect();

    let mut applied = 0;
    for handle in handles {
        let outcome = handle.await.unwrap().unwrap();
        if let Settlement::Repayment(RepaymentOutcome::Applied { .. }) = outcome {
            applied += 1;
        }
    }

    assert_eq!(applied, 1);
    let driver = ledger.driver(&id).unwrap();
    assert_eq!(driver.current_balance, amt(3000));
    assert_eq!(driver.current_deposit_balance, amt(200));
    assert_eq!(ledger.store().deposit_history(&id).unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn mixed_traffic_keeps_balances_consistent() {
    let gateway = Arc::new(CountingGateway::slow(Duration::from_millis(2)));
    let ledger = Arc::new(ledger(gateway));
    let id = ledger.register_driver(driver("drv-1")).unwrap().id;

    let mut handles = Vec::new();
    for i in 0..20 {
        let pay = Arc::clone(&ledger);
        handles.push(tokio::spawn(async move {
            pay.handle(notification(&format!("QK{i}"), "KDA123X", "200"))
                .await
                .map(|_| ())
        }));
        let repay = Arc::clone(&ledger);
        handles.push(tokio::spawn(async move {
            repay
                .handle(notification(&format!("R{i}"), "D123456", "150"))
                .await
                .map(|_| ())
        }));
    }
    // reconciliation runs alongside live traffic
    let checker = {
        let ledger = Arc::clone(&ledger);
        tokio::spawn(async move {
            for _ in 0..10 {
                ledger.check_target_discrepancies(true).unwrap();
                tokio::task::yield_now().await;
            }
        })
    };

    for handle in handles {
        handle.await.unwrap().unwrap();
    }
    checker.await.unwrap();

    let driver = ledger.driver(&id).unwrap();
    let records = ledger
        .store()
        .transactions_since(&id, driver.period_started_at)
        .unwrap();
    assert_eq!(records.len(), 40);

    let credited: Amount = records.iter().map(|r| r.target_contribution).sum();
    let deposited: Amount = records.iter().map(|r| r.deposited_amount).sum();
    assert_eq!(driver.current_balance, credited);
    assert_eq!(driver.current_deposit_balance, deposited);
    assert_eq!(driver.left_to_target, amt(3000).shortfall_from(driver.current_balance));

    // every repayment either reduced target or landed in the deposit, never lost
    let repaid: Amount = records
        .iter()
        .filter(|r| r.kind == TransactionKind::TargetReduction)
        .map(|r| r.target_contribution + r.deposited_amount)
        .sum();
    assert_eq!(repaid, amt(3000));

    let report = ledger.reconcile_driver_balance(&id, false).unwrap();
    assert!(report.discrepancy.is_zero(), "{report:?}");
    assert_eq!(ledger.check_target_discrepancies(false).unwrap().discrepancies_found, 0);
}
