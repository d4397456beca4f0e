use anyhow::{Context, Result};
use bdk_ledger::{
    outstanding as invoice_outstanding, unallocated_balance, AllocationRequest, CancelRequest,
    Cents, Disposition, FundingSource, LedgerError, PaymentDetails, PaymentMethod,
    ValidationError,
};

use super::{parse_date, parse_request_id, Ctx};

pub async fn balance(ctx: &Ctx, client_id: &str) -> Result<()> {
    let pool = ctx.connect().await?;
    let payments = bdk_db::fetch_payments_by_client(&pool, client_id).await?;
    println!("client_id={client_id}");
    println!("unallocated_balance={}", unallocated_balance(&payments, client_id));
    println!("currency={}", ctx.cfg.currency);
    Ok(())
}

pub async fn outstanding(ctx: &Ctx, invoice_id: &str) -> Result<()> {
    let pool = ctx.connect().await?;
    let invoice = bdk_db::fetch_invoice(&pool, invoice_id)
        .await?
        .ok_or_else(|| {
            LedgerError::from(ValidationError::UnknownInvoice {
                invoice_id: invoice_id.to_string(),
            })
        })?;
    let payments = bdk_db::fetch_payments_by_invoice(&pool, invoice_id).await?;
    println!("invoice_id={invoice_id}");
    println!("status={}", invoice.status.as_str());
    println!("total={}", invoice.total);
    println!("outstanding={}", invoice_outstanding(&invoice, &payments));
    Ok(())
}

pub async fn statement(ctx: &Ctx, client_id: &str, today: Option<&str>) -> Result<()> {
    let today = parse_date(today, "--today")?;
    let pool = ctx.connect().await?;
    let st = bdk_db::load_statement(&pool, client_id, today, ctx.cfg.overdue_after_days).await?;

    println!("client_id={} as_of={}", st.client_id, today);
    for row in &st.invoices {
        println!(
            "invoice={} number={} date={} total={} paid={} outstanding={} status={}",
            row.invoice_id,
            row.number,
            row.date,
            row.total,
            row.total_paid,
            row.outstanding,
            row.status.as_str()
        );
    }
    println!("unallocated_balance={}", st.unallocated_balance);
    println!("outstanding_total={}", st.outstanding_total);
    println!("currency={}", ctx.cfg.currency);
    Ok(())
}

pub struct AllocateArgs {
    pub client: String,
    pub invoice: Option<String>,
    pub amount: String,
    pub source: FundingSource,
    pub method: String,
    pub date: Option<String>,
    pub notes: String,
    pub request_id: Option<String>,
}

pub async fn allocate(ctx: &Ctx, args: AllocateArgs) -> Result<()> {
    let amount = Cents::parse(&args.amount)
        .with_context(|| format!("invalid --amount '{}'", args.amount))?;
    let request_id = parse_request_id(args.request_id.as_deref())?;
    let details = PaymentDetails::new(parse_date(args.date.as_deref(), "--date")?)
        .with_method(PaymentMethod::parse(&args.method))
        .with_notes(args.notes);
    let req = AllocationRequest::new(
        &args.client,
        args.invoice.as_deref(),
        amount,
        args.source,
        details,
    )
    .with_request_id(request_id);

    let pool = ctx.connect().await?;
    let out = bdk_db::allocate(&pool, &req, |plan| ctx.record(plan)).await?;

    println!("request_id={request_id}");
    println!("applied={}", out.applied);
    println!("to_account={}", out.to_account);
    if args.invoice.is_some() {
        println!("outstanding_before={}", out.outstanding_before);
        println!("outstanding_after={}", out.outstanding_after);
    }
    println!("writes={}", out.plan.write_count());
    Ok(())
}

pub async fn cancel(
    ctx: &Ctx,
    invoice_id: &str,
    disposition: Option<Disposition>,
    request_id: Option<&str>,
) -> Result<()> {
    let request_id = parse_request_id(request_id)?;
    let mut req = CancelRequest::new(invoice_id, disposition);
    req.request_id = request_id;

    let pool = ctx.connect().await?;
    let out = bdk_db::cancel_invoice(&pool, &req, |plan| ctx.record(plan)).await?;

    println!("request_id={request_id}");
    println!("invoice_id={invoice_id} status=CANCELLED");
    println!("returned_to_account={}", out.returned_to_account);
    println!("kept_as_history={}", out.kept_as_history);
    println!("writes={}", out.plan.write_count());
    Ok(())
}

pub async fn restore(ctx: &Ctx, invoice_id: &str, request_id: Option<&str>) -> Result<()> {
    let request_id = parse_request_id(request_id)?;
    let pool = ctx.connect().await?;
    let plan = bdk_db::restore_invoice(&pool, request_id, invoice_id, |plan| ctx.record(plan)).await?;

    println!("request_id={request_id}");
    println!("invoice_id={invoice_id} status=ACTIVE");
    println!("writes={}", plan.write_count());
    Ok(())
}
