use bdk_ledger::{
    Cents, Client, EmbeddedPayment, Invoice, InvoiceDirectory, LedgerService, MemoryStore,
    PaymentMethod, PaymentStore,
};
use bdk_reconcile::*;
use chrono::NaiveDate;
use uuid::Uuid;

fn d(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2023, 3, day).unwrap()
}

fn entry(cents: i64, day: u32) -> EmbeddedPayment {
    EmbeddedPayment {
        amount: Cents::new(cents),
        date: d(day),
        method: PaymentMethod::BankTransfer,
        notes: String::new(),
    }
}

fn store_with_legacy_invoice() -> MemoryStore {
    let mut s = MemoryStore::new();
    s.insert_client(Client::new("C1", "Acme"));
    let mut inv = Invoice::new("INV-OLD", "C1", "2023-017", Cents::new(50_000), d(1));
    inv.legacy_payments = vec![entry(20_000, 2), entry(12_550, 9), entry(7_450, 20)];
    s.insert_invoice(inv);
    s
}

#[test]
fn scenario_migration_writes_verifies_and_clears() {
    let svc = LedgerService::new(store_with_legacy_invoice());
    let before = svc.outstanding("INV-OLD").unwrap();
    assert_eq!(before, Cents::new(50_000));

    let out = migrate_legacy(&svc, Uuid::new_v4(), "INV-OLD").unwrap();
    assert_eq!(
        out,
        MigrationOutcome::Migrated {
            invoice_id: "INV-OLD".to_string(),
            count: 3,
            total: Cents::new(40_000),
        }
    );

    let inv = svc.read(|s| s.get_invoice("INV-OLD").unwrap().unwrap());
    assert!(inv.legacy_payments.is_empty());
    let migrated = svc.read(|s| s.query_by_invoice("INV-OLD").unwrap());
    assert_eq!(migrated.len(), 3);
    assert!(migrated
        .iter()
        .all(|p| p.provenance.migrated && p.settled_to_document && p.belongs_to("C1")));
    assert_eq!(svc.outstanding("INV-OLD").unwrap(), Cents::new(10_000));

    // second run is a no-op
    let again = migrate_legacy(&svc, Uuid::new_v4(), "INV-OLD").unwrap();
    assert!(matches!(again, MigrationOutcome::AlreadyMigrated { .. }));
    assert_eq!(svc.read(|s| s.query_all().unwrap()).len(), 3);
}

#[test]
fn scenario_failed_verification_keeps_legacy_list_and_retry_converges() {
    let svc = LedgerService::new(store_with_legacy_invoice());

    svc.with_client_store("C1", |s| s.lose_next_creates(1));
    let out = migrate_legacy(&svc, Uuid::new_v4(), "INV-OLD").unwrap();
    assert_eq!(
        out,
        MigrationOutcome::VerificationFailed {
            invoice_id: "INV-OLD".to_string(),
            expected: Cents::new(40_000),
            found: Cents::new(20_000),
        }
    );
    assert!(!out.is_success());

    // invoice untouched, residue visible to the sweep
    let inv = svc.read(|s| s.get_invoice("INV-OLD").unwrap().unwrap());
    assert_eq!(inv.legacy_payments.len(), 3);
    let report = svc.read(|s| sweep(&RecordSet::load(s).unwrap()));
    assert!(report.violations.contains(&IntegrityViolation::MigrationSumMismatch {
        invoice_id: "INV-OLD".to_string(),
        expected: Cents::new(40_000),
        found: Cents::new(20_000),
    }));

    // retry rewrites the same ids and completes
    let out = migrate_legacy(&svc, Uuid::new_v4(), "INV-OLD").unwrap();
    assert!(matches!(out, MigrationOutcome::Migrated { count: 3, .. }));
    assert_eq!(svc.read(|s| s.query_all().unwrap()).len(), 3);
    assert!(svc.read(|s| sweep(&RecordSet::load(s).unwrap())).is_clean());
}

#[test]
fn scenario_crash_before_clear_is_recovered_by_rerun() {
    let svc = LedgerService::new(store_with_legacy_invoice());

    // three creates succeed, the clear fails
    svc.with_client_store("C1", |s| s.fail_after_writes(3));
    assert!(migrate_legacy(&svc, Uuid::new_v4(), "INV-OLD").is_err());
    assert_eq!(svc.read(|s| s.query_all().unwrap()).len(), 3);

    let out = migrate_legacy(&svc, Uuid::new_v4(), "INV-OLD").unwrap();
    assert!(out.is_success());
    assert_eq!(svc.read(|s| s.query_all().unwrap()).len(), 3);
    assert_eq!(svc.outstanding("INV-OLD").unwrap(), Cents::new(10_000));
}

#[test]
fn scenario_unknown_invoice_is_rejected() {
    let svc = LedgerService::new(store_with_legacy_invoice());
    assert!(migrate_legacy(&svc, Uuid::new_v4(), "NOPE")
        .unwrap_err()
        .is_validation());
}
