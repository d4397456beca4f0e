//! Per-client transactional ledger operations on Postgres.
//!
//! Each mutation runs in one transaction:
//! 1. `pg_advisory_xact_lock` on the owning client (released at commit)
//! 2. load the client's records into an in-memory snapshot
//! 3. plan with the pure engine
//! 4. write the plan
//! 5. `before_commit(&plan)`, e.g. the audit append; an error rolls back
//! 6. commit
//!
//! Readers outside the transaction see either none or all of a plan, and
//! no plan commits without `before_commit` having succeeded for it.

use anyhow::{Context, Result};
use bdk_ledger::{
    plan_allocation_in, plan_cancellation_in, plan_restore_in, AllocationOutcome,
    AllocationRequest, CancelOutcome, CancelRequest, InvoiceWrite, LedgerError, LedgerPlan,
    MemoryStore, PaymentWrite, ValidationError,
};
use bdk_reconcile::{
    migrated_total, plan_legacy_migration, plan_owner_repair, plan_settlement_correction,
    settlement_lock_key, MigrationOutcome, OwnerRepair, RepairSummary, SettlementCorrection,
    LOCK_KEY_ATTEMPTS,
};
use sqlx::{PgConnection, PgPool};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    fetch_client, fetch_invoice, fetch_invoices_of_client, fetch_payment,
    fetch_payments_by_client, fetch_payments_by_invoice, upsert_payment,
};

/// Serialize with every other transaction touching `client_id`.
pub async fn lock_client(conn: &mut PgConnection, client_id: &str) -> Result<()> {
    sqlx::query("select pg_advisory_xact_lock(hashtext($1))")
        .bind(format!("bdk:client:{client_id}"))
        .execute(conn)
        .await
        .with_context(|| format!("advisory lock for client {client_id} failed"))?;
    Ok(())
}

/// The client's records plus `invoice_id` and everything allocated to it.
async fn client_snapshot(
    conn: &mut PgConnection,
    client_id: &str,
    invoice_id: Option<&str>,
) -> Result<MemoryStore> {
    let mut snap = MemoryStore::new();
    if let Some(c) = fetch_client(&mut *conn, client_id).await? {
        snap.insert_client(c);
    }
    for inv in fetch_invoices_of_client(&mut *conn, client_id).await? {
        snap.insert_invoice(inv);
    }
    for p in fetch_payments_by_client(&mut *conn, client_id).await? {
        snap.insert_payment(p);
    }
    if let Some(id) = invoice_id {
        if let Some(inv) = fetch_invoice(&mut *conn, id).await? {
            snap.insert_invoice(inv);
        }
        for p in fetch_payments_by_invoice(&mut *conn, id).await? {
            snap.insert_payment(p);
        }
    }
    Ok(snap)
}

/// Write every step of `plan` inside the caller's transaction.
pub async fn write_plan(conn: &mut PgConnection, plan: &LedgerPlan) -> Result<usize> {
    let mut applied = 0usize;
    for w in &plan.payment_writes {
        match w {
            PaymentWrite::Create(p) => upsert_payment(&mut *conn, p).await?,
            PaymentWrite::Update(p) => {
                if fetch_payment(&mut *conn, &p.id).await?.is_none() {
                    return Err(LedgerError::persistence(
                        "update",
                        format!("payment '{}' does not exist", p.id),
                    )
                    .into());
                }
                upsert_payment(&mut *conn, p).await?;
            }
        }
        applied += 1;
    }
    for w in &plan.invoice_writes {
        let (invoice_id, res) = match w {
            InvoiceWrite::SetStatus { invoice_id, status } => (
                invoice_id,
                sqlx::query(
                    "update invoices set status = $2, updated_at_utc = now() where invoice_id = $1",
                )
                .bind(invoice_id)
                .bind(status.as_str())
                .execute(&mut *conn)
                .await
                .context("set invoice status failed")?,
            ),
            InvoiceWrite::ClearLegacyPayments { invoice_id } => (
                invoice_id,
                sqlx::query(
                    "update invoices set legacy_payments = '[]'::jsonb, updated_at_utc = now() \
                     where invoice_id = $1",
                )
                .bind(invoice_id)
                .execute(&mut *conn)
                .await
                .context("clear legacy payments failed")?,
            ),
        };
        if res.rows_affected() == 0 {
            return Err(LedgerError::from(ValidationError::UnknownInvoice {
                invoice_id: invoice_id.clone(),
            })
            .into());
        }
        applied += 1;
    }
    Ok(applied)
}

async fn owner_of_invoice(pool: &PgPool, invoice_id: &str) -> Result<String> {
    match fetch_invoice(pool, invoice_id).await? {
        Some(inv) => Ok(inv.client_id),
        None => Err(LedgerError::from(ValidationError::UnknownInvoice {
            invoice_id: invoice_id.to_string(),
        })
        .into()),
    }
}

/// Lock, snapshot, plan, write, `before_commit`, commit. An empty plan
/// commits nothing and skips `before_commit`.
async fn run_client_tx<R>(
    pool: &PgPool,
    client_id: &str,
    invoice_id: Option<&str>,
    build: impl FnOnce(&MemoryStore) -> Result<(LedgerPlan, R), LedgerError>,
    before_commit: impl FnOnce(&LedgerPlan) -> Result<()>,
) -> Result<(LedgerPlan, R)> {
    let mut tx = pool.begin().await.context("begin ledger tx failed")?;
    lock_client(&mut tx, client_id).await?;
    let snap = client_snapshot(&mut tx, client_id, invoice_id).await?;

    // Domain errors abort before any write; the tx rolls back on drop.
    let (plan, out) = build(&snap)?;

    if plan.is_empty() {
        debug!(client_id, request_id = %plan.request_id, kind = plan.kind.event_type(), "nothing to commit");
        tx.rollback().await.context("rollback empty ledger tx failed")?;
        return Ok((plan, out));
    }

    let writes = write_plan(&mut tx, &plan).await?;
    if let Err(e) = before_commit(&plan) {
        warn!(client_id, request_id = %plan.request_id, error = %format!("{e:#}"), "before-commit step failed; rolled back");
        tx.rollback().await.context("rollback ledger tx failed")?;
        return Err(e);
    }
    tx.commit().await.context("commit ledger tx failed")?;
    info!(
        client_id,
        request_id = %plan.request_id,
        kind = plan.kind.event_type(),
        writes,
        "ledger plan committed"
    );
    Ok((plan, out))
}

pub async fn allocate(
    pool: &PgPool,
    req: &AllocationRequest,
    before_commit: impl FnOnce(&LedgerPlan) -> Result<()>,
) -> Result<AllocationOutcome> {
    let (_, outcome) = run_client_tx(
        pool,
        &req.client_id,
        req.invoice_id.as_deref(),
        |snap| {
            let outcome = plan_allocation_in(snap, req)?;
            Ok((outcome.plan.clone(), outcome))
        },
        before_commit,
    )
    .await?;
    Ok(outcome)
}

pub async fn cancel_invoice(
    pool: &PgPool,
    req: &CancelRequest,
    before_commit: impl FnOnce(&LedgerPlan) -> Result<()>,
) -> Result<CancelOutcome> {
    let client_id = owner_of_invoice(pool, &req.invoice_id).await?;
    let (_, outcome) = run_client_tx(
        pool,
        &client_id,
        Some(&req.invoice_id),
        |snap| {
            let outcome = plan_cancellation_in(snap, req)?;
            Ok((outcome.plan.clone(), outcome))
        },
        before_commit,
    )
    .await?;
    Ok(outcome)
}

pub async fn restore_invoice(
    pool: &PgPool,
    request_id: Uuid,
    invoice_id: &str,
    before_commit: impl FnOnce(&LedgerPlan) -> Result<()>,
) -> Result<LedgerPlan> {
    let client_id = owner_of_invoice(pool, invoice_id).await?;
    let (plan, _) = run_client_tx(
        pool,
        &client_id,
        Some(invoice_id),
        |snap| Ok((plan_restore_in(snap, request_id, invoice_id)?, ())),
        before_commit,
    )
    .await?;
    Ok(plan)
}

// ---------------------------------------------------------------------------
// Repairs
// ---------------------------------------------------------------------------

fn tally(summary: &mut RepairSummary, payment_id: &str, res: Result<LedgerPlan>) -> Option<LedgerPlan> {
    match res {
        Ok(plan) if plan.is_empty() => {
            summary.skipped += 1;
            None
        }
        Ok(plan) => {
            summary.applied += 1;
            Some(plan)
        }
        Err(e) => {
            warn!(payment_id, error = %format!("{e:#}"), "repair failed; continuing");
            let err = match e.downcast::<LedgerError>() {
                Ok(le) => le,
                Err(other) => LedgerError::persistence("repair", format!("{other:#}")),
            };
            summary.failed.push((payment_id.to_string(), err));
            None
        }
    }
}

/// Apply owner repairs, each in its own transaction under the new owner's lock.
pub async fn apply_owner_repairs(
    pool: &PgPool,
    request_id: Uuid,
    repairs: &[OwnerRepair],
    mut before_commit: impl FnMut(&LedgerPlan) -> Result<()>,
) -> Result<(RepairSummary, Vec<LedgerPlan>)> {
    let mut summary = RepairSummary::default();
    let mut plans = Vec::new();
    for repair in repairs {
        let res = async {
            let mut tx = pool.begin().await.context("begin repair tx failed")?;
            lock_client(&mut tx, &repair.client_id).await?;
            let snap = repair_snapshot(&mut tx, &repair.payment_id).await?;
            let plan = plan_owner_repair(&snap, request_id, repair)?;
            if !plan.is_empty() {
                write_plan(&mut tx, &plan).await?;
                before_commit(&plan)?;
                tx.commit().await.context("commit repair tx failed")?;
            }
            Ok::<_, anyhow::Error>(plan)
        }
        .await;
        if let Some(plan) = tally(&mut summary, &repair.payment_id, res) {
            plans.push(plan);
        }
    }
    info!(
        applied = summary.applied,
        skipped = summary.skipped,
        failed = summary.failed.len(),
        "owner repairs done"
    );
    Ok((summary, plans))
}

/// Re-derive settlement flags, each correction under the lock returned by
/// `bdk_reconcile::settlement_lock_key`, re-resolved once the lock is held.
pub async fn apply_settlement_corrections(
    pool: &PgPool,
    request_id: Uuid,
    corrections: &[SettlementCorrection],
    mut before_commit: impl FnMut(&LedgerPlan) -> Result<()>,
) -> Result<(RepairSummary, Vec<LedgerPlan>)> {
    let mut summary = RepairSummary::default();
    let mut plans = Vec::new();
    for c in corrections {
        let res = correct_settlement_flag(pool, request_id, &c.payment_id, &mut before_commit).await;
        if let Some(plan) = tally(&mut summary, &c.payment_id, res) {
            plans.push(plan);
        }
    }
    info!(
        applied = summary.applied,
        skipped = summary.skipped,
        failed = summary.failed.len(),
        "settlement flag corrections done"
    );
    Ok((summary, plans))
}

async fn correct_settlement_flag(
    pool: &PgPool,
    request_id: Uuid,
    payment_id: &str,
    before_commit: &mut impl FnMut(&LedgerPlan) -> Result<()>,
) -> Result<LedgerPlan> {
    let mut key = {
        let mut conn = pool.acquire().await.context("acquire conn failed")?;
        settlement_lock_key(&repair_snapshot(&mut conn, payment_id).await?, payment_id)?
    };
    for _ in 0..LOCK_KEY_ATTEMPTS {
        let mut tx = pool.begin().await.context("begin settlement tx failed")?;
        lock_client(&mut tx, &key).await?;
        let snap = repair_snapshot(&mut tx, payment_id).await?;
        let current = settlement_lock_key(&snap, payment_id)?;
        if current != key {
            debug!(payment_id, from = %key, to = %current, "settlement lock key moved");
            key = current;
            continue;
        }
        let plan = plan_settlement_correction(&snap, request_id, payment_id)?;
        if !plan.is_empty() {
            write_plan(&mut tx, &plan).await?;
            before_commit(&plan)?;
            tx.commit().await.context("commit settlement tx failed")?;
        }
        return Ok(plan);
    }
    Err(LedgerError::persistence(
        "settlement_flag",
        format!("payment '{payment_id}' kept moving between clients"),
    )
    .into())
}

/// One payment and the invoice it points at.
async fn repair_snapshot(conn: &mut PgConnection, payment_id: &str) -> Result<MemoryStore> {
    let mut snap = MemoryStore::new();
    if let Some(p) = fetch_payment(&mut *conn, payment_id).await? {
        if let Some(doc) = p.document_id.as_deref() {
            if let Some(inv) = fetch_invoice(&mut *conn, doc).await? {
                snap.insert_invoice(inv);
            }
        }
        snap.insert_payment(p);
    }
    Ok(snap)
}

// ---------------------------------------------------------------------------
// Legacy migration
// ---------------------------------------------------------------------------

/// Write, read back and verify, then clear; all in one transaction under the
/// owner's lock. On a failed verification nothing is committed.
pub async fn migrate_legacy(
    pool: &PgPool,
    request_id: Uuid,
    invoice_id: &str,
    before_commit: impl FnOnce(&LedgerPlan) -> Result<()>,
) -> Result<(MigrationOutcome, Option<LedgerPlan>)> {
    let client_id = owner_of_invoice(pool, invoice_id).await?;
    let mut tx = pool.begin().await.context("begin migration tx failed")?;
    lock_client(&mut tx, &client_id).await?;

    let invoice = fetch_invoice(&mut *tx, invoice_id)
        .await?
        .ok_or_else(|| {
            LedgerError::from(ValidationError::UnknownInvoice {
                invoice_id: invoice_id.to_string(),
            })
        })?;

    if invoice.legacy_payments.is_empty() {
        return Ok((
            MigrationOutcome::AlreadyMigrated {
                invoice_id: invoice.id,
            },
            None,
        ));
    }

    let mut plan = plan_legacy_migration(request_id, &invoice)?;
    write_plan(&mut tx, &plan).await?;

    let expected = invoice.legacy_total();
    let written = fetch_payments_by_invoice(&mut *tx, &invoice.id).await?;
    let (count, found) = migrated_total(&invoice, &written);
    if count != invoice.legacy_payments.len() || found != expected {
        warn!(
            invoice_id = %invoice.id,
            expected = %expected,
            found = %found,
            "legacy migration did not verify; rolled back"
        );
        tx.rollback().await.context("rollback migration tx failed")?;
        return Ok((
            MigrationOutcome::VerificationFailed {
                invoice_id: invoice.id,
                expected,
                found,
            },
            None,
        ));
    }

    let clear = InvoiceWrite::ClearLegacyPayments {
        invoice_id: invoice.id.clone(),
    };
    let mut clear_plan = LedgerPlan::new(request_id, plan.kind);
    clear_plan.invoice_writes.push(clear.clone());
    write_plan(&mut tx, &clear_plan).await?;
    plan.invoice_writes.push(clear);
    before_commit(&plan)?;
    tx.commit().await.context("commit migration tx failed")?;

    info!(invoice_id = %invoice.id, count, total = %expected, "legacy payments migrated");
    Ok((
        MigrationOutcome::Migrated {
            invoice_id: invoice.id,
            count,
            total: expected,
        },
        Some(plan),
    ))
}
