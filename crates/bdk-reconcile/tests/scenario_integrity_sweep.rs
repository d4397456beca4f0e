use bdk_ledger::{
    plan_cancellation_in, CancelRequest, Cents, Client, Disposition, Invoice, InvoiceDirectory,
    InvoiceStatus, LedgerService, MemoryStore, Payment, PaymentStore,
};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;
use bdk_reconcile::*;
use chrono::NaiveDate;
use uuid::Uuid;

fn d() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
}

fn c(units: i64) -> Cents {
    Cents::from_units(units).unwrap()
}

fn messy_store() -> MemoryStore {
    let mut s = MemoryStore::new();
    s.insert_client(Client::new("C1", "Acme"));
    s.insert_client(Client::new("C2", "Beta"));
    s.insert_invoice(Invoice::new("INV-1", "C1", "2024-001", c(500), d()));
    s.insert_invoice(Invoice::new("INV-2", "C2", "2024-002", c(300), d()));

    // healthy
    s.insert_payment(Payment::allocated("ok-1", "C1", "INV-1", c(100), d()));
    // owner missing, invoice resolves -> repairable
    let mut p = Payment::allocated("unowned-1", "C1", "INV-2", c(50), d());
    p.client_id = None;
    s.insert_payment(p);
    // owner missing, invoice gone -> must not be guessed
    let mut p = Payment::allocated("unowned-2", "C1", "INV-GONE", c(70), d());
    p.client_id = None;
    s.insert_payment(p);
    // owner present, invoice gone -> orphan
    s.insert_payment(Payment::allocated("orphan-1", "C1", "INV-DELETED", c(40), d()));
    // stale flags both ways
    let mut p = Payment::unallocated("stale-1", "C1", c(10), d());
    p.settled_to_document = true;
    s.insert_payment(p);
    let mut p = Payment::allocated("stale-2", "C2", "INV-2", c(20), d());
    p.settled_to_document = false;
    s.insert_payment(p);
    s
}

#[test]
fn scenario_sweep_reports_everything_and_deletes_nothing() {
    let svc = LedgerService::new(messy_store());
    let before = svc.read(|s| s.query_all().unwrap());

    let report = svc.read(|s| sweep(&RecordSet::load(s).unwrap()));
    assert_eq!(report.action, ReconcileAction::NeedsAttention);

    let orphans: Vec<&IntegrityViolation> = report
        .violations
        .iter()
        .filter(|v| matches!(v, IntegrityViolation::OrphanedPayment { .. }))
        .collect();
    // unowned-2 points at a missing invoice as well
    assert_eq!(orphans.len(), 2);
    assert!(report.violations.contains(&IntegrityViolation::UnresolvableOwner {
        payment_id: "unowned-2".to_string(),
        document_id: Some("INV-GONE".to_string()),
        amount: c(70),
    }));
    assert_eq!(
        report.repairs.owner_repairs,
        vec![OwnerRepair {
            payment_id: "unowned-1".to_string(),
            client_id: "C2".to_string(),
        }]
    );
    assert_eq!(report.repairs.settlement_corrections.len(), 2);

    // a sweep is read-only
    assert_eq!(svc.read(|s| s.query_all().unwrap()), before);
}

#[test]
fn scenario_owner_repair_assigns_invoice_owner_only() {
    let svc = LedgerService::new(messy_store());
    let report = svc.read(|s| sweep(&RecordSet::load(s).unwrap()));

    let (summary, plans) = apply_owner_repairs(&svc, Uuid::new_v4(), &report.repairs.owner_repairs);
    assert_eq!(summary.applied, 1);
    assert!(summary.is_complete());
    assert_eq!(plans.len(), 1);

    let fixed = svc.read(|s| s.get("unowned-1").unwrap().unwrap());
    assert_eq!(fixed.client_id.as_deref(), Some("C2"));
    assert!(fixed.provenance.repaired);

    let untouched = svc.read(|s| s.get("unowned-2").unwrap().unwrap());
    assert!(untouched.client_id.is_none());
    assert!(!untouched.provenance.repaired);

    // second run: nothing left to do
    let (again, _) = apply_owner_repairs(&svc, Uuid::new_v4(), &report.repairs.owner_repairs);
    assert_eq!(again.applied, 0);
    assert_eq!(again.skipped, 1);
}

#[test]
fn scenario_settlement_flags_are_idempotent() {
    let svc = LedgerService::new(messy_store());

    let first = svc.read(|s| reconcile_settlement_flags(&RecordSet::load(s).unwrap()));
    assert_eq!(first.len(), 2);
    let (summary, _) = apply_settlement_corrections(&svc, Uuid::new_v4(), &first);
    assert_eq!(summary.applied, 2);

    let second = svc.read(|s| reconcile_settlement_flags(&RecordSet::load(s).unwrap()));
    assert!(second.is_empty());

    // replaying the stale list is a no-op too
    let (replay, _) = apply_settlement_corrections(&svc, Uuid::new_v4(), &first);
    assert_eq!(replay.applied, 0);
    assert_eq!(replay.skipped, 2);

    // orphans keep their settled flag
    let orphan = svc.read(|s| s.get("orphan-1").unwrap().unwrap());
    assert!(orphan.settled_to_document);
}

#[test]
fn scenario_after_repairs_only_unrepairable_problems_remain() {
    let svc = LedgerService::new(messy_store());
    let report = svc.read(|s| sweep(&RecordSet::load(s).unwrap()));
    apply_owner_repairs(&svc, Uuid::new_v4(), &report.repairs.owner_repairs);
    apply_settlement_corrections(&svc, Uuid::new_v4(), &report.repairs.settlement_corrections);

    let after = svc.read(|s| sweep(&RecordSet::load(s).unwrap()));
    assert!(after.repairs.is_empty());
    assert!(after.violations.iter().all(|v| matches!(
        v,
        IntegrityViolation::OrphanedPayment { .. } | IntegrityViolation::UnresolvableOwner { .. }
    )));
    assert_eq!(svc.read(|s| s.query_all().unwrap()).len(), 6);
}

/// C2 paid C1's invoice with a stale settled flag.
fn cross_client_store() -> MemoryStore {
    let mut s = MemoryStore::new();
    s.insert_client(Client::new("C1", "Acme"));
    s.insert_client(Client::new("C2", "Beta"));
    s.insert_invoice(Invoice::new("INV-1", "C1", "2024-001", c(500), d()));
    let mut p = Payment::allocated("p1", "C2", "INV-1", c(200), d());
    p.settled_to_document = false;
    s.insert_payment(p);
    s
}

#[test]
fn scenario_settlement_lock_follows_the_invoice_owner() {
    let svc = LedgerService::new(cross_client_store());
    assert_eq!(svc.read(|s| settlement_lock_key(s, "p1")).unwrap(), "C1");

    svc.cancel_invoice(&CancelRequest::new("INV-1", Some(Disposition::MoveToAccount)))
        .unwrap();
    // back on C2's account, so C2's lock
    assert_eq!(svc.read(|s| settlement_lock_key(s, "p1")).unwrap(), "C2");
    assert_eq!(svc.read(|s| settlement_lock_key(s, "missing")).unwrap(), "");
}

#[test]
fn scenario_settlement_correction_waits_for_cancel_of_paid_invoice() {
    let svc = LedgerService::new(cross_client_store());
    let corrections = svc.read(|s| reconcile_settlement_flags(&RecordSet::load(s).unwrap()));
    assert_eq!(corrections.len(), 1);

    let (planned, planned_rx) = mpsc::channel();
    let svc = &svc;
    thread::scope(|scope| {
        let cancel = scope.spawn(move || {
            svc.mutate_client("C1", |store| {
                let req = CancelRequest::new("INV-1", Some(Disposition::MoveToAccount));
                let outcome = plan_cancellation_in(store, &req)?;
                planned.send(()).unwrap();
                thread::sleep(Duration::from_millis(150));
                Ok((outcome.plan.clone(), outcome))
            })
        });
        planned_rx.recv().unwrap();
        let (summary, _) = apply_settlement_corrections(svc, Uuid::new_v4(), &corrections);
        assert!(summary.failed.is_empty(), "{:?}", summary.failed);
        cancel.join().unwrap().unwrap();
    });

    let p1 = svc.read(|s| s.get("p1").unwrap().unwrap());
    assert_eq!(p1.document_id, None, "cancelled allocation must not come back");
    assert!(!p1.settled_to_document);
    assert_eq!(svc.unallocated_balance("C2").unwrap(), c(200));
    let inv = svc.read(|s| s.get_invoice("INV-1").unwrap().unwrap());
    assert_eq!(inv.status, InvoiceStatus::Cancelled);
}
