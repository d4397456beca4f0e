use std::collections::BTreeMap;

use bdk_ledger::{Cents, Payment};

use crate::migrate::migrated_total;
use crate::{
    IntegrityViolation, OwnerRepair, ReconcileAction, ReconcileReport, RecordSet, RepairPlan,
    SettlementCorrection,
};

/// Payments whose `document_id` does not resolve to an invoice.
///
/// Reported only; nothing here ever deletes a payment.
pub fn find_orphaned_payments(records: &RecordSet) -> Vec<&Payment> {
    records
        .payments
        .iter()
        .filter(|p| match &p.document_id {
            Some(doc) => !records.invoices.contains_key(doc),
            None => false,
        })
        .collect()
}

/// Result of the unowned-payment scan.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UnownedScan {
    pub repairs: Vec<OwnerRepair>,
    pub unresolved: Vec<IntegrityViolation>,
}

/// Payments with no owner. The owner is recovered only from an invoice that
/// resolves to a known client; otherwise the payment is reported untouched.
pub fn find_unowned_payments(records: &RecordSet) -> UnownedScan {
    let mut scan = UnownedScan::default();
    for p in records.payments.iter().filter(|p| p.is_unowned()) {
        match p.document_id.as_deref().and_then(|doc| records.resolve_owner(doc)) {
            Some(client_id) => scan.repairs.push(OwnerRepair {
                payment_id: p.id.clone(),
                client_id: client_id.to_string(),
            }),
            None => scan.unresolved.push(IntegrityViolation::UnresolvableOwner {
                payment_id: p.id.clone(),
                document_id: p.document_id.clone(),
                amount: p.amount,
            }),
        }
    }
    scan.repairs.sort();
    scan.unresolved.sort();
    scan
}

/// Corrections that bring every stored settlement flag in line with
/// `document_id.is_some()`. An orphaned payment still counts as settled.
pub fn reconcile_settlement_flags(records: &RecordSet) -> Vec<SettlementCorrection> {
    records
        .payments
        .iter()
        .filter(|p| p.settled_to_document != p.is_allocated())
        .map(|p| SettlementCorrection {
            payment_id: p.id.clone(),
            settled: p.is_allocated(),
        })
        .collect()
}

fn legacy_violations(records: &RecordSet) -> Vec<IntegrityViolation> {
    let mut by_invoice: BTreeMap<&str, Vec<Payment>> = BTreeMap::new();
    for p in &records.payments {
        if let Some(doc) = p.document_id.as_deref() {
            if p.provenance.migrated {
                by_invoice.entry(doc).or_default().push(p.clone());
            }
        }
    }

    let mut out = Vec::new();
    for inv in records.invoices.values() {
        if inv.legacy_payments.is_empty() {
            continue;
        }
        let expected = inv.legacy_total();
        out.push(IntegrityViolation::LegacyPaymentsPending {
            invoice_id: inv.id.clone(),
            count: inv.legacy_payments.len(),
            total: expected,
        });

        // Residue of an earlier attempt that did not verify.
        if let Some(migrated) = by_invoice.get(inv.id.as_str()) {
            let (_, found) = migrated_total(inv, migrated);
            if found != Cents::ZERO && found != expected {
                out.push(IntegrityViolation::MigrationSumMismatch {
                    invoice_id: inv.id.clone(),
                    expected,
                    found,
                });
            }
        }
    }
    out
}

/// Run every scan over `records`.
///
/// Never fails: each problem becomes a violation and the sweep carries on.
pub fn sweep(records: &RecordSet) -> ReconcileReport {
    let mut violations: Vec<IntegrityViolation> = Vec::new();

    for p in find_orphaned_payments(records) {
        violations.push(IntegrityViolation::OrphanedPayment {
            payment_id: p.id.clone(),
            document_id: p.document_id.clone().unwrap_or_default(),
            amount: p.amount,
        });
    }

    let unowned = find_unowned_payments(records);
    violations.extend(unowned.unresolved);

    let corrections = reconcile_settlement_flags(records);
    for c in &corrections {
        violations.push(IntegrityViolation::StaleSettlementFlag {
            payment_id: c.payment_id.clone(),
            stored: !c.settled,
            expected: c.settled,
        });
    }

    violations.extend(legacy_violations(records));
    violations.sort();

    let repairs = RepairPlan {
        owner_repairs: unowned.repairs,
        settlement_corrections: corrections,
    };

    if violations.is_empty() && repairs.is_empty() {
        ReconcileReport::clean()
    } else {
        ReconcileReport {
            action: ReconcileAction::NeedsAttention,
            violations,
            repairs,
        }
    }
}
