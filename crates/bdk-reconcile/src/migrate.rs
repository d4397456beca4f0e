//! Legacy embedded-payment migration.
//!
//! Two phases over the store: write one first-class payment per embedded
//! entry, read them back and verify the sum, and only then clear the
//! embedded list. Ids derive from `(invoice id, index)`, so re-running after
//! a crash overwrites the same records instead of duplicating them.

use std::collections::BTreeSet;

use bdk_ledger::{
    AllocationOrigin, AuditNote, Cents, Invoice, InvoiceDirectory, LedgerError, LedgerPlan,
    LedgerService, LedgerStore, Payment, PaymentStore, PlanKind, Provenance, ValidationError,
};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

/// Namespace for migrated payment ids.
const LEGACY_NAMESPACE: Uuid = Uuid::from_u128(0x6b1d_4e0a_93c2_5f7e_a4d1_08c3_2e6f_b915);

pub fn legacy_payment_id(invoice_id: &str, index: usize) -> String {
    Uuid::new_v5(&LEGACY_NAMESPACE, format!("{invoice_id}:{index}").as_bytes()).to_string()
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MigrationOutcome {
    Migrated {
        invoice_id: String,
        count: usize,
        total: Cents,
    },
    /// Nothing embedded; no-op.
    AlreadyMigrated { invoice_id: String },
    /// Written records did not read back to the embedded sum. The embedded
    /// list is left in place.
    VerificationFailed {
        invoice_id: String,
        expected: Cents,
        found: Cents,
    },
}

impl MigrationOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, MigrationOutcome::VerificationFailed { .. })
    }
}

/// Creates for every embedded entry of `invoice` (write phase only).
pub fn plan_legacy_migration(request_id: Uuid, invoice: &Invoice) -> Result<LedgerPlan, LedgerError> {
    let mut plan = LedgerPlan::new(request_id, PlanKind::MigrateLegacy);
    for (index, entry) in invoice.legacy_payments.iter().enumerate() {
        if !entry.amount.is_positive() {
            return Err(ValidationError::NonPositiveAmount {
                amount: entry.amount,
            }
            .into());
        }
        plan.create(Payment {
            id: legacy_payment_id(&invoice.id, index),
            client_id: Some(invoice.client_id.clone()),
            document_id: Some(invoice.id.clone()),
            amount: entry.amount,
            date: entry.date,
            method: entry.method.clone(),
            notes: entry.notes.clone(),
            settled_to_document: true,
            provenance: Provenance {
                migrated: true,
                allocated_from: Some(AllocationOrigin::LegacyMigration),
                request_id: Some(request_id),
                trail: vec![AuditNote::MigratedFromLegacy {
                    invoice_id: invoice.id.clone(),
                    index,
                }],
                ..Provenance::default()
            },
        });
    }
    Ok(plan)
}

/// Count and sum of the migrated records of `invoice` among `payments`.
pub fn migrated_total(invoice: &Invoice, payments: &[Payment]) -> (usize, Cents) {
    let expected_ids: BTreeSet<String> = (0..invoice.legacy_payments.len())
        .map(|i| legacy_payment_id(&invoice.id, i))
        .collect();
    payments
        .iter()
        .filter(|p| p.is_allocated_to(&invoice.id) && expected_ids.contains(&p.id))
        .fold((0, Cents::ZERO), |(n, sum), p| (n + 1, sum + p.amount))
}

/// Run both phases against `store`. The caller holds the owning client's lock.
pub fn migrate_legacy_embedded_payments<S>(
    store: &mut S,
    request_id: Uuid,
    invoice_id: &str,
) -> Result<MigrationOutcome, LedgerError>
where
    S: InvoiceDirectory + PaymentStore + ?Sized,
{
    let invoice = store
        .get_invoice(invoice_id)?
        .ok_or_else(|| ValidationError::UnknownInvoice {
            invoice_id: invoice_id.to_string(),
        })?;

    if invoice.legacy_payments.is_empty() {
        return Ok(MigrationOutcome::AlreadyMigrated {
            invoice_id: invoice.id,
        });
    }

    // Phase 1: write.
    let plan = plan_legacy_migration(request_id, &invoice)?;
    for w in &plan.payment_writes {
        store.create(w.payment().clone())?;
    }

    // Phase 2: verify, then clear.
    let expected = invoice.legacy_total();
    let (count, found) = migrated_total(&invoice, &store.query_by_invoice(&invoice.id)?);
    if count != invoice.legacy_payments.len() || found != expected {
        warn!(
            invoice_id = %invoice.id,
            expected = %expected,
            found = %found,
            "legacy migration did not verify; embedded list kept"
        );
        return Ok(MigrationOutcome::VerificationFailed {
            invoice_id: invoice.id,
            expected,
            found,
        });
    }

    store.clear_legacy_payments(&invoice.id)?;
    info!(invoice_id = %invoice.id, count, total = %expected, "legacy payments migrated");
    Ok(MigrationOutcome::Migrated {
        invoice_id: invoice.id,
        count,
        total: expected,
    })
}

/// Migrate one invoice through the service, under its owner's lock.
pub fn migrate_legacy<S: LedgerStore>(
    svc: &LedgerService<S>,
    request_id: Uuid,
    invoice_id: &str,
) -> Result<MigrationOutcome, LedgerError> {
    let owner = svc
        .read(|s| s.get_invoice(invoice_id))?
        .map(|i| i.client_id)
        .ok_or_else(|| ValidationError::UnknownInvoice {
            invoice_id: invoice_id.to_string(),
        })?;
    svc.with_client_store(&owner, |store| {
        migrate_legacy_embedded_payments(store, request_id, invoice_id)
    })
}
