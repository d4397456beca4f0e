use anyhow::{bail, Context, Result};
use bdk_reconcile::{find_unowned_payments, reconcile_settlement_flags, sweep, RepairSummary};
use uuid::Uuid;

use super::Ctx;

pub async fn scan(ctx: &Ctx) -> Result<()> {
    let pool = ctx.connect().await?;
    let records = bdk_db::load_record_set(&pool).await?;
    let report = sweep(&records);
    let json = serde_json::to_string_pretty(&report).context("serialize reconcile report failed")?;
    println!("{json}");
    println!("action={}", if report.is_clean() { "CLEAN" } else { "NEEDS_ATTENTION" });
    println!("violations={}", report.violations.len());
    Ok(())
}

pub async fn repair_owners(ctx: &Ctx) -> Result<()> {
    if !ctx.cfg.repair_owners {
        bail!("REPAIR_DISABLED: /reconcile/repair_owners is false");
    }
    let pool = ctx.connect().await?;
    let records = bdk_db::load_record_set(&pool).await?;
    let scan = find_unowned_payments(&records);
    for v in &scan.unresolved {
        println!("unresolved {v}");
    }

    let request_id = Uuid::new_v4();
    let (summary, _) =
        bdk_db::apply_owner_repairs(&pool, request_id, &scan.repairs, |plan| ctx.record(plan))
            .await?;
    finish(request_id, &summary)
}

pub async fn settlement_flags(ctx: &Ctx) -> Result<()> {
    let pool = ctx.connect().await?;
    let records = bdk_db::load_record_set(&pool).await?;
    let corrections = reconcile_settlement_flags(&records);

    let request_id = Uuid::new_v4();
    let (summary, _) = bdk_db::apply_settlement_corrections(&pool, request_id, &corrections, |plan| {
        ctx.record(plan)
    })
    .await?;
    finish(request_id, &summary)
}

pub async fn migrate_legacy(ctx: &Ctx, invoice_id: &str) -> Result<()> {
    let pool = ctx.connect().await?;
    let request_id = Uuid::new_v4();
    let (outcome, _) =
        bdk_db::migrate_legacy(&pool, request_id, invoice_id, |plan| ctx.record(plan)).await?;
    let json = serde_json::to_string(&outcome).context("serialize migration outcome failed")?;
    println!("{json}");
    if !outcome.is_success() {
        bail!("MIGRATION_NOT_VERIFIED: invoice {invoice_id} keeps its embedded payments; re-run to retry");
    }
    Ok(())
}

/// Print the summary, fail when anything failed.
fn finish(request_id: Uuid, summary: &RepairSummary) -> Result<()> {
    println!("request_id={request_id}");
    println!(
        "applied={} skipped={} failed={}",
        summary.applied,
        summary.skipped,
        summary.failed.len()
    );
    for (payment_id, err) in &summary.failed {
        println!("failed payment_id={payment_id} error={err}");
    }
    if !summary.is_complete() {
        bail!("REPAIR_INCOMPLETE: {} record(s) failed", summary.failed.len());
    }
    Ok(())
}
