//! Balance Calculator.
//!
//! Pure projections over an explicitly passed snapshot of records. Unknown
//! ids produce zero-valued results; existence checks are the caller's job.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::types::{Invoice, Payment};
use crate::Cents;

/// Default age (days since issue) after which an unpaid invoice is OVERDUE.
pub const DEFAULT_OVERDUE_AFTER_DAYS: i64 = 30;

/// Sum of a client's unallocated payments.
pub fn unallocated_balance(payments: &[Payment], client_id: &str) -> Cents {
    payments
        .iter()
        .filter(|p| p.is_unallocated() && p.belongs_to(client_id))
        .map(|p| p.amount)
        .sum()
}

/// Sum of payments allocated to an invoice (whoever owns them).
pub fn total_paid(payments: &[Payment], invoice_id: &str) -> Cents {
    payments
        .iter()
        .filter(|p| p.is_allocated_to(invoice_id))
        .map(|p| p.amount)
        .sum()
}

/// `max(0, total - total_paid)`.
pub fn outstanding(invoice: &Invoice, payments: &[Payment]) -> Cents {
    (invoice.total - total_paid(payments, &invoice.id)).clamp_non_negative()
}

/// `max(0, Σ totals of active non-deleted invoices - Σ all client payments)`.
pub fn client_outstanding_total(invoices: &[Invoice], payments: &[Payment], client_id: &str) -> Cents {
    let billed: Cents = invoices
        .iter()
        .filter(|i| i.client_id == client_id && i.counts_towards_outstanding())
        .map(|i| i.total)
        .sum();
    let received: Cents = payments
        .iter()
        .filter(|p| p.belongs_to(client_id))
        .map(|p| p.amount)
        .sum();
    (billed - received).clamp_non_negative()
}

// ---------------------------------------------------------------------------
// Payment status
// ---------------------------------------------------------------------------

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Unpaid,
    Partial,
    Paid,
    Overdue,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Unpaid => "UNPAID",
            PaymentStatus::Partial => "PARTIAL",
            PaymentStatus::Paid => "PAID",
            PaymentStatus::Overdue => "OVERDUE",
        }
    }

    /// Display rank: UNPAID/OVERDUE < PARTIAL < PAID.
    pub fn rank(&self) -> u8 {
        match self {
            PaymentStatus::Unpaid | PaymentStatus::Overdue => 0,
            PaymentStatus::Partial => 1,
            PaymentStatus::Paid => 2,
        }
    }
}

/// Classify an invoice given its derived `total_paid`.
///
/// `today` is supplied by the caller; this module never reads a clock.
pub fn payment_status(
    invoice: &Invoice,
    total_paid: Cents,
    today: NaiveDate,
    overdue_after_days: i64,
) -> PaymentStatus {
    if total_paid >= invoice.total {
        PaymentStatus::Paid
    } else if total_paid.is_positive() {
        PaymentStatus::Partial
    } else if (today - invoice.date).num_days() > overdue_after_days {
        PaymentStatus::Overdue
    } else {
        PaymentStatus::Unpaid
    }
}

// ---------------------------------------------------------------------------
// Per-invoice projection
// ---------------------------------------------------------------------------

/// One row of a client statement.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceBalance {
    pub invoice_id: String,
    pub number: String,
    pub date: NaiveDate,
    pub total: Cents,
    pub total_paid: Cents,
    pub outstanding: Cents,
    pub status: PaymentStatus,
}

impl InvoiceBalance {
    pub fn compute(
        invoice: &Invoice,
        payments: &[Payment],
        today: NaiveDate,
        overdue_after_days: i64,
    ) -> Self {
        let paid = total_paid(payments, &invoice.id);
        Self {
            invoice_id: invoice.id.clone(),
            number: invoice.number.clone(),
            date: invoice.date,
            total: invoice.total,
            total_paid: paid,
            outstanding: (invoice.total - paid).clamp_non_negative(),
            status: payment_status(invoice, paid, today, overdue_after_days),
        }
    }
}

/// Display order: status rank ascending, then newest first, then id.
pub fn sort_for_display(rows: &mut [InvoiceBalance]) {
    rows.sort_by(|a, b| {
        a.status
            .rank()
            .cmp(&b.status.rank())
            .then_with(|| b.date.cmp(&a.date))
            .then_with(|| a.invoice_id.cmp(&b.invoice_id))
    });
}

/// Client statement: active invoices in display order plus totals.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientStatement {
    pub client_id: String,
    pub invoices: Vec<InvoiceBalance>,
    pub unallocated_balance: Cents,
    pub outstanding_total: Cents,
}

pub fn client_statement(
    client_id: &str,
    invoices: &[Invoice],
    payments: &[Payment],
    today: NaiveDate,
    overdue_after_days: i64,
) -> ClientStatement {
    let mut rows: Vec<InvoiceBalance> = invoices
        .iter()
        .filter(|i| i.client_id == client_id && i.counts_towards_outstanding())
        .map(|i| InvoiceBalance::compute(i, payments, today, overdue_after_days))
        .collect();
    sort_for_display(&mut rows);

    ClientStatement {
        client_id: client_id.to_string(),
        invoices: rows,
        unallocated_balance: unallocated_balance(payments, client_id),
        outstanding_total: client_outstanding_total(invoices, payments, client_id),
    }
}
