//! Splits are exact: allocated part + leftover == original, to the cent.

use bdk_ledger::{
    plan_allocation, AllocationRequest, Cents, FundingSource, Invoice, Payment, PaymentDetails,
    PaymentWrite, MAX_AMOUNT,
};
use chrono::NaiveDate;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;

fn d() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
}

fn split(original: Cents, need: Cents) -> (Cents, Cents) {
    let invoice = Invoice::new("INV-1", "C1", "2024-001", MAX_AMOUNT, d());
    let payments = vec![Payment::unallocated("src", "C1", original, d())];
    let req = AllocationRequest::new(
        "C1",
        Some("INV-1"),
        need,
        FundingSource::ClientAccount,
        PaymentDetails::new(d()),
    );
    let out = plan_allocation(&req, Some(&invoice), &payments).unwrap();
    match &out.plan.payment_writes[..] {
        [PaymentWrite::Create(leftover), PaymentWrite::Update(allocated)] => {
            assert_eq!(allocated.id, "src");
            assert!(leftover.is_unallocated());
            assert!(allocated.is_allocated_to("INV-1"));
            (allocated.amount, leftover.amount)
        }
        other => panic!("expected create+update, got {other:?}"),
    }
}

#[test]
fn scenario_split_100_for_37_leaves_63() {
    let (allocated, leftover) = split(Cents::parse("100").unwrap(), Cents::parse("37").unwrap());
    assert_eq!(allocated, Cents::parse("37").unwrap());
    assert_eq!(leftover, Cents::parse("63").unwrap());
    assert_eq!(allocated + leftover, Cents::parse("100").unwrap());
}

#[test]
fn scenario_randomized_splits_have_no_rounding_drift() {
    let mut rng = StdRng::seed_from_u64(0xB111_DE5C);
    for _ in 0..1000 {
        // three fraction digits in, so the decimal boundary has to round
        let original_raw: i64 = rng.gen_range(20..=100_000_000);
        let original = Cents::from_decimal(Decimal::new(original_raw, 3)).unwrap();
        if original.raw() < 2 {
            continue;
        }
        let need_raw: i64 = rng.gen_range(1..original.raw());
        let need = Cents::new(need_raw);

        let (allocated, leftover) = split(original, need);
        assert_eq!(allocated, need);
        assert!(leftover.is_positive());
        assert_eq!(allocated + leftover, original, "drift splitting {original} for {need}");
    }
}

#[test]
fn half_cent_inputs_round_half_up() {
    assert_eq!(Cents::parse("0.005").unwrap(), Cents::new(1));
    assert_eq!(Cents::parse("0.004").unwrap(), Cents::new(0));
    assert_eq!(Cents::parse("12.345").unwrap(), Cents::new(1235));
}
