//! Applying repair plans.
//!
//! Each repair is re-checked against a fresh read of the payment under the
//! owning client's lock. A record that no longer needs the repair is
//! skipped, so running the same repair plan twice changes nothing the
//! second time.

use bdk_ledger::{
    AuditNote, InvoiceDirectory, LedgerError, LedgerPlan, LedgerService, LedgerStore,
    PaymentStore, PlanKind,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{OwnerRepair, RepairSummary, SettlementCorrection};

/// Plan assigning `client_id` to an unowned payment, or an empty plan when
/// the payment is owned already or its invoice is not owned by `client_id`.
pub fn plan_owner_repair<S>(
    store: &S,
    request_id: Uuid,
    repair: &OwnerRepair,
) -> Result<LedgerPlan, LedgerError>
where
    S: InvoiceDirectory + PaymentStore + ?Sized,
{
    let mut plan = LedgerPlan::new(request_id, PlanKind::RepairOwner);
    let Some(current) = store.get(&repair.payment_id)? else {
        return Ok(plan);
    };
    if !current.is_unowned() {
        return Ok(plan);
    }
    let resolves = match current.document_id.as_deref() {
        Some(doc) => store
            .get_invoice(doc)?
            .map(|i| i.client_id == repair.client_id)
            .unwrap_or(false),
        None => false,
    };
    if !resolves {
        return Ok(plan);
    }

    let mut fixed = current;
    fixed.client_id = Some(repair.client_id.clone());
    fixed.provenance.repaired = true;
    fixed.provenance.request_id = Some(request_id);
    fixed.provenance.trail.push(AuditNote::OwnerRepaired {
        client_id: repair.client_id.clone(),
    });
    plan.update(fixed);
    Ok(plan)
}

/// Plan correcting a stored settlement flag, or an empty plan when the flag
/// already matches `document_id`.
pub fn plan_settlement_correction<S>(
    store: &S,
    request_id: Uuid,
    payment_id: &str,
) -> Result<LedgerPlan, LedgerError>
where
    S: PaymentStore + ?Sized,
{
    let mut plan = LedgerPlan::new(request_id, PlanKind::SettlementFlag);
    let Some(current) = store.get(payment_id)? else {
        return Ok(plan);
    };
    let expected = current.is_allocated();
    if current.settled_to_document == expected {
        return Ok(plan);
    }
    let mut fixed = current;
    fixed.settled_to_document = expected;
    fixed.provenance.request_id = Some(request_id);
    fixed
        .provenance
        .trail
        .push(AuditNote::SettlementFlagCorrected { settled: expected });
    plan.update(fixed);
    Ok(plan)
}

/// Apply owner repairs, each under the lock of the client being assigned.
///
/// Returns the committed plans alongside the summary for auditing.
pub fn apply_owner_repairs<S: LedgerStore>(
    svc: &LedgerService<S>,
    request_id: Uuid,
    repairs: &[OwnerRepair],
) -> (RepairSummary, Vec<LedgerPlan>) {
    let mut summary = RepairSummary::default();
    let mut committed = Vec::new();
    for repair in repairs {
        let res = svc.mutate_client(&repair.client_id, |store| {
            let plan = plan_owner_repair(store, request_id, repair)?;
            Ok((plan.clone(), plan))
        });
        tally(&mut summary, &mut committed, &repair.payment_id, res);
    }
    info!(
        request_id = %request_id,
        applied = summary.applied,
        skipped = summary.skipped,
        failed = summary.failed.len(),
        "owner repairs applied"
    );
    (summary, committed)
}

/// Apply settlement-flag corrections, each under the lock returned by
/// [`settlement_lock_key`].
pub fn apply_settlement_corrections<S: LedgerStore>(
    svc: &LedgerService<S>,
    request_id: Uuid,
    corrections: &[SettlementCorrection],
) -> (RepairSummary, Vec<LedgerPlan>) {
    let mut summary = RepairSummary::default();
    let mut committed = Vec::new();
    for c in corrections {
        let res = correct_settlement_flag(svc, request_id, &c.payment_id);
        tally(&mut summary, &mut committed, &c.payment_id, res);
    }
    info!(
        request_id = %request_id,
        applied = summary.applied,
        skipped = summary.skipped,
        failed = summary.failed.len(),
        "settlement flags reconciled"
    );
    (summary, committed)
}

/// Times a correction re-resolves its lock when the payment moves between
/// the read of its key and the lock being held.
pub const LOCK_KEY_ATTEMPTS: usize = 3;

fn correct_settlement_flag<S: LedgerStore>(
    svc: &LedgerService<S>,
    request_id: Uuid,
    payment_id: &str,
) -> Result<LedgerPlan, LedgerError> {
    let mut key = svc.read(|s| settlement_lock_key(s, payment_id))?;
    for _ in 0..LOCK_KEY_ATTEMPTS {
        let held = svc.mutate_client(&key, |store| {
            let current = settlement_lock_key(store, payment_id)?;
            if current != key {
                let empty = LedgerPlan::new(request_id, PlanKind::SettlementFlag);
                return Ok((empty, Err(current)));
            }
            let plan = plan_settlement_correction(store, request_id, payment_id)?;
            Ok((plan.clone(), Ok(plan)))
        })?;
        match held {
            Ok(plan) => return Ok(plan),
            Err(moved) => {
                debug!(payment_id, from = %key, to = %moved, "settlement lock key moved");
                key = moved;
            }
        }
    }
    Err(LedgerError::persistence(
        "settlement_flag",
        format!("payment '{payment_id}' kept moving between clients"),
    ))
}

/// The client lock a settlement correction must hold.
///
/// Allocation and cancellation of an invoice run under the invoice owner's
/// lock, so a payment whose `document_id` resolves is keyed by that owner
/// even when the payment belongs to another client. Otherwise the payment's
/// own owner, else the shared "" key.
pub fn settlement_lock_key<S>(store: &S, payment_id: &str) -> Result<String, LedgerError>
where
    S: InvoiceDirectory + PaymentStore + ?Sized,
{
    let Some(p) = store.get(payment_id)? else {
        return Ok(String::new());
    };
    if let Some(doc) = p.document_id.as_deref() {
        if let Some(inv) = store.get_invoice(doc)? {
            return Ok(inv.client_id);
        }
    }
    Ok(p.client_id.filter(|c| !c.trim().is_empty()).unwrap_or_default())
}

fn tally(
    summary: &mut RepairSummary,
    committed: &mut Vec<LedgerPlan>,
    payment_id: &str,
    res: Result<LedgerPlan, LedgerError>,
) {
    match res {
        Ok(plan) if plan.is_empty() => summary.skipped += 1,
        Ok(plan) => {
            summary.applied += 1;
            committed.push(plan);
        }
        Err(e) => {
            warn!(payment_id, error = %e, "repair failed; continuing");
            summary.failed.push((payment_id.to_string(), e));
        }
    }
}
