//! A plan interrupted by a store failure converges when the same request is
//! retried, and replaying a finished request changes nothing.

use bdk_ledger::{
    AllocationRequest, Cents, Client, FundingSource, Invoice, LedgerError, LedgerService,
    MemoryStore, Payment, PaymentDetails, PaymentStore,
};
use chrono::NaiveDate;

fn d(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
}

fn amt(s: &str) -> Cents {
    Cents::parse(s).unwrap()
}

fn ledger(payments: Vec<Payment>) -> LedgerService<MemoryStore> {
    let mut s = MemoryStore::new();
    s.insert_client(Client::new("C1", "Acme"));
    s.insert_invoice(Invoice::new("INV-1", "C1", "2024-001", amt("500"), d(1)));
    for p in payments {
        s.insert_payment(p);
    }
    LedgerService::new(s)
}

#[test]
fn scenario_split_interrupted_between_create_and_update() {
    let svc = ledger(vec![Payment::unallocated("p1", "C1", amt("100"), d(1))]);
    let req = AllocationRequest::new(
        "C1",
        Some("INV-1"),
        amt("37"),
        FundingSource::ClientAccount,
        PaymentDetails::new(d(2)),
    );

    svc.with_client_store("C1", |s| s.fail_after_writes(1));
    let err = svc.allocate(&req).unwrap_err();
    assert!(matches!(err, LedgerError::Persistence { .. }));

    // residue is visible, never lost: 100 original + 63 leftover
    assert_eq!(svc.unallocated_balance("C1").unwrap(), amt("163"));

    svc.allocate(&req).unwrap();
    assert_eq!(svc.unallocated_balance("C1").unwrap(), amt("63"));
    assert_eq!(svc.outstanding("INV-1").unwrap(), amt("463"));
    let payments = svc.read(|s| s.query_by_client("C1").unwrap());
    assert_eq!(payments.len(), 2);
    assert_eq!(payments.iter().map(|p| p.amount).sum::<Cents>(), amt("100"));
}

#[test]
fn scenario_excess_interrupted_after_applied_part() {
    let svc = ledger(vec![]);
    let req = AllocationRequest::new(
        "C1",
        Some("INV-1"),
        amt("700"),
        FundingSource::NewPayment,
        PaymentDetails::new(d(2)),
    );

    svc.with_client_store("C1", |s| s.fail_after_writes(1));
    assert!(svc.allocate(&req).is_err());
    assert_eq!(svc.outstanding("INV-1").unwrap(), Cents::ZERO);
    assert_eq!(svc.unallocated_balance("C1").unwrap(), Cents::ZERO);

    let out = svc.allocate(&req).unwrap();
    assert_eq!(out.applied, amt("500"));
    assert_eq!(out.to_account, amt("200"));
    assert_eq!(svc.unallocated_balance("C1").unwrap(), amt("200"));
    let payments = svc.read(|s| s.query_by_client("C1").unwrap());
    assert_eq!(payments.iter().map(|p| p.amount).sum::<Cents>(), amt("700"));
}

#[test]
fn scenario_replaying_a_finished_request_is_a_noop() {
    let svc = ledger(vec![
        Payment::unallocated("p1", "C1", amt("30"), d(1)),
        Payment::unallocated("p2", "C1", amt("30"), d(2)),
    ]);
    let req = AllocationRequest::new(
        "C1",
        Some("INV-1"),
        amt("45"),
        FundingSource::ClientAccount,
        PaymentDetails::new(d(3)),
    );
    svc.allocate(&req).unwrap();
    let snapshot = svc.read(|s| s.query_all().unwrap());

    let again = svc.allocate(&req).unwrap();
    assert!(again.plan.is_empty());
    assert_eq!(svc.read(|s| s.query_all().unwrap()), snapshot);
    assert_eq!(svc.outstanding("INV-1").unwrap(), amt("455"));
}
