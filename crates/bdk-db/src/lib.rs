use anyhow::{Context, Result};
use bdk_ledger::{
    client_statement, Cents, Client, ClientStatement, EmbeddedPayment, Invoice, InvoiceStatus,
    Payment, PaymentMethod, Provenance,
};
use chrono::NaiveDate;
use bdk_reconcile::RecordSet;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgExecutor, PgPool, Row};

mod ledger;

pub use ledger::{
    allocate, apply_owner_repairs, apply_settlement_corrections, cancel_invoice, lock_client,
    migrate_legacy, restore_invoice, write_plan,
};

pub async fn connect(url: &str, max_connections: u32) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(url)
        .await
        .context("failed to connect to Postgres")?;
    Ok(pool)
}

/// Run embedded SQLx migrations.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("db migrate failed")?;
    Ok(())
}

/// Connectivity plus schema presence.
pub async fn status(pool: &PgPool) -> Result<DbStatus> {
    let (one,): (i32,) = sqlx::query_as::<_, (i32,)>("select 1")
        .fetch_one(pool)
        .await
        .context("status connectivity query failed")?;

    let (exists,): (bool,) = sqlx::query_as::<_, (bool,)>(
        r#"
        select exists (
            select 1
            from information_schema.tables
            where table_schema='public' and table_name='payments'
        )
        "#,
    )
    .fetch_one(pool)
    .await
    .context("status table-exists query failed")?;

    Ok(DbStatus {
        ok: one == 1,
        has_payments_table: exists,
    })
}

#[derive(Debug, Clone)]
pub struct DbStatus {
    pub ok: bool,
    pub has_payments_table: bool,
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

const PAYMENT_COLUMNS: &str = "payment_id, client_id, document_id, amount_cents, paid_on, method, \
                               notes, settled_to_document, provenance";

const INVOICE_COLUMNS: &str =
    "invoice_id, client_id, number, total_cents, status, issue_date, deleted, legacy_payments";

fn payment_from_row(row: &PgRow) -> Result<Payment> {
    let provenance: Provenance = serde_json::from_value(row.try_get("provenance")?)
        .context("decode payments.provenance")?;
    Ok(Payment {
        id: row.try_get("payment_id")?,
        client_id: row.try_get("client_id")?,
        document_id: row.try_get("document_id")?,
        amount: Cents::new(row.try_get("amount_cents")?),
        date: row.try_get("paid_on")?,
        method: PaymentMethod::parse(&row.try_get::<String, _>("method")?),
        notes: row.try_get("notes")?,
        settled_to_document: row.try_get("settled_to_document")?,
        provenance,
    })
}

fn invoice_from_row(row: &PgRow) -> Result<Invoice> {
    let status: String = row.try_get("status")?;
    let status = InvoiceStatus::parse(&status)
        .with_context(|| format!("invalid invoice status: {status}"))?;
    let legacy_payments: Vec<EmbeddedPayment> =
        serde_json::from_value(row.try_get("legacy_payments")?)
            .context("decode invoices.legacy_payments")?;
    Ok(Invoice {
        id: row.try_get("invoice_id")?,
        client_id: row.try_get("client_id")?,
        number: row.try_get("number")?,
        total: Cents::new(row.try_get("total_cents")?),
        status,
        date: row.try_get("issue_date")?,
        deleted: row.try_get("deleted")?,
        legacy_payments,
    })
}

fn client_from_row(row: &PgRow) -> Result<Client> {
    Ok(Client {
        id: row.try_get("client_id")?,
        name: row.try_get("name")?,
    })
}

// ---------------------------------------------------------------------------
// Reads
// ---------------------------------------------------------------------------

pub async fn fetch_client<'e, E: PgExecutor<'e>>(ex: E, client_id: &str) -> Result<Option<Client>> {
    let row = sqlx::query("select client_id, name from clients where client_id = $1")
        .bind(client_id)
        .fetch_optional(ex)
        .await
        .context("fetch_client failed")?;
    row.as_ref().map(client_from_row).transpose()
}

pub async fn fetch_clients<'e, E: PgExecutor<'e>>(ex: E) -> Result<Vec<Client>> {
    let rows = sqlx::query("select client_id, name from clients order by client_id")
        .fetch_all(ex)
        .await
        .context("fetch_clients failed")?;
    rows.iter().map(client_from_row).collect()
}

pub async fn fetch_invoice<'e, E: PgExecutor<'e>>(ex: E, invoice_id: &str) -> Result<Option<Invoice>> {
    let sql = format!("select {INVOICE_COLUMNS} from invoices where invoice_id = $1");
    let row = sqlx::query(&sql)
        .bind(invoice_id)
        .fetch_optional(ex)
        .await
        .context("fetch_invoice failed")?;
    row.as_ref().map(invoice_from_row).transpose()
}

pub async fn fetch_invoices_of_client<'e, E: PgExecutor<'e>>(
    ex: E,
    client_id: &str,
) -> Result<Vec<Invoice>> {
    let sql = format!(
        "select {INVOICE_COLUMNS} from invoices where client_id = $1 order by invoice_id"
    );
    let rows = sqlx::query(&sql)
        .bind(client_id)
        .fetch_all(ex)
        .await
        .context("fetch_invoices_of_client failed")?;
    rows.iter().map(invoice_from_row).collect()
}

pub async fn fetch_invoices<'e, E: PgExecutor<'e>>(ex: E) -> Result<Vec<Invoice>> {
    let sql = format!("select {INVOICE_COLUMNS} from invoices order by invoice_id");
    let rows = sqlx::query(&sql)
        .fetch_all(ex)
        .await
        .context("fetch_invoices failed")?;
    rows.iter().map(invoice_from_row).collect()
}

pub async fn fetch_payment<'e, E: PgExecutor<'e>>(ex: E, payment_id: &str) -> Result<Option<Payment>> {
    let sql = format!("select {PAYMENT_COLUMNS} from payments where payment_id = $1");
    let row = sqlx::query(&sql)
        .bind(payment_id)
        .fetch_optional(ex)
        .await
        .context("fetch_payment failed")?;
    row.as_ref().map(payment_from_row).transpose()
}

pub async fn fetch_payments_by_client<'e, E: PgExecutor<'e>>(
    ex: E,
    client_id: &str,
) -> Result<Vec<Payment>> {
    let sql = format!(
        "select {PAYMENT_COLUMNS} from payments where client_id = $1 order by payment_id"
    );
    let rows = sqlx::query(&sql)
        .bind(client_id)
        .fetch_all(ex)
        .await
        .context("fetch_payments_by_client failed")?;
    rows.iter().map(payment_from_row).collect()
}

pub async fn fetch_payments_by_invoice<'e, E: PgExecutor<'e>>(
    ex: E,
    invoice_id: &str,
) -> Result<Vec<Payment>> {
    let sql = format!(
        "select {PAYMENT_COLUMNS} from payments where document_id = $1 order by payment_id"
    );
    let rows = sqlx::query(&sql)
        .bind(invoice_id)
        .fetch_all(ex)
        .await
        .context("fetch_payments_by_invoice failed")?;
    rows.iter().map(payment_from_row).collect()
}

pub async fn fetch_payments<'e, E: PgExecutor<'e>>(ex: E) -> Result<Vec<Payment>> {
    let sql = format!("select {PAYMENT_COLUMNS} from payments order by payment_id");
    let rows = sqlx::query(&sql)
        .fetch_all(ex)
        .await
        .context("fetch_payments failed")?;
    rows.iter().map(payment_from_row).collect()
}

/// Whole database as a reconciliation record set. Read committed; the
/// sweep sees a consistent view per table, not across tables.
pub async fn load_record_set(pool: &PgPool) -> Result<RecordSet> {
    let clients = fetch_clients(pool).await?;
    let invoices = fetch_invoices(pool).await?;
    let payments = fetch_payments(pool).await?;
    Ok(RecordSet::new(clients, invoices, payments))
}

/// Statement of `client_id` as of `today`. Payments on the client's
/// invoices that are owned by nobody still count as paid.
pub async fn load_statement(
    pool: &PgPool,
    client_id: &str,
    today: NaiveDate,
    overdue_after_days: i64,
) -> Result<ClientStatement> {
    let invoices = fetch_invoices_of_client(pool, client_id).await?;
    let mut payments = fetch_payments_by_client(pool, client_id).await?;
    for inv in &invoices {
        for p in fetch_payments_by_invoice(pool, &inv.id).await? {
            if !p.belongs_to(client_id) {
                payments.push(p);
            }
        }
    }
    Ok(client_statement(
        client_id,
        &invoices,
        &payments,
        today,
        overdue_after_days,
    ))
}

// ---------------------------------------------------------------------------
// Directory sync
// ---------------------------------------------------------------------------

/// Insert or refresh a client row.
pub async fn upsert_client<'e, E: PgExecutor<'e>>(ex: E, client: &Client) -> Result<()> {
    sqlx::query(
        r#"
        insert into clients (client_id, name) values ($1, $2)
        on conflict (client_id) do update set name = excluded.name
        "#,
    )
    .bind(&client.id)
    .bind(&client.name)
    .execute(ex)
    .await
    .context("upsert_client failed")?;
    Ok(())
}

/// Insert or refresh an invoice row, legacy payments included.
pub async fn upsert_invoice<'e, E: PgExecutor<'e>>(ex: E, invoice: &Invoice) -> Result<()> {
    let legacy = serde_json::to_value(&invoice.legacy_payments)
        .context("encode invoices.legacy_payments")?;
    sqlx::query(
        r#"
        insert into invoices (
          invoice_id, client_id, number, total_cents, status, issue_date, deleted, legacy_payments
        ) values (
          $1, $2, $3, $4, $5, $6, $7, $8
        )
        on conflict (invoice_id) do update set
          client_id = excluded.client_id,
          number = excluded.number,
          total_cents = excluded.total_cents,
          status = excluded.status,
          issue_date = excluded.issue_date,
          deleted = excluded.deleted,
          legacy_payments = excluded.legacy_payments,
          updated_at_utc = now()
        "#,
    )
    .bind(&invoice.id)
    .bind(&invoice.client_id)
    .bind(&invoice.number)
    .bind(invoice.total.raw())
    .bind(invoice.status.as_str())
    .bind(invoice.date)
    .bind(invoice.deleted)
    .bind(legacy)
    .execute(ex)
    .await
    .context("upsert_invoice failed")?;
    Ok(())
}

/// Idempotent payment write: creates the row or overwrites it in place.
pub async fn upsert_payment<'e, E: PgExecutor<'e>>(ex: E, p: &Payment) -> Result<()> {
    let provenance =
        serde_json::to_value(&p.provenance).context("encode payments.provenance")?;
    sqlx::query(
        r#"
        insert into payments (
          payment_id, client_id, document_id, amount_cents, paid_on, method, notes,
          settled_to_document, provenance
        ) values (
          $1, $2, $3, $4, $5, $6, $7, $8, $9
        )
        on conflict (payment_id) do update set
          client_id = excluded.client_id,
          document_id = excluded.document_id,
          amount_cents = excluded.amount_cents,
          paid_on = excluded.paid_on,
          method = excluded.method,
          notes = excluded.notes,
          settled_to_document = excluded.settled_to_document,
          provenance = excluded.provenance,
          updated_at_utc = now()
        "#,
    )
    .bind(&p.id)
    .bind(&p.client_id)
    .bind(&p.document_id)
    .bind(p.amount.raw())
    .bind(p.date)
    .bind(p.method.as_str())
    .bind(&p.notes)
    .bind(p.settled_to_document)
    .bind(provenance)
    .execute(ex)
    .await
    .context("upsert_payment failed")?;
    Ok(())
}
