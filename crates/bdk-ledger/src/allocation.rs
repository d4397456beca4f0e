//! Allocation Engine.
//!
//! # Rules
//! - `invoice_id == None`, `NewPayment`: deposit the full amount on the
//!   client account as one unallocated payment.
//! - `NewPayment` to an invoice: one allocated payment of
//!   `min(amount, outstanding)`; any remainder becomes an unallocated
//!   "excess" payment. The only path that adds cash to the ledger.
//! - `ClientAccount` to an invoice: fund `min(amount, outstanding)` from the
//!   client's unallocated payments, oldest first (date, then id). A payment
//!   that fits is relinked whole; the first one that does not is split into
//!   an allocated part and a new unallocated leftover of the same date.
//!   All-or-nothing: fails with `InsufficientBalance` before any write.
//!
//! # Retries
//! Every record written carries `provenance.request_id`. Planning the same
//! request again counts what that request already allocated to the target
//! and skips its own residue in the FIFO pool, so a retry after a partial
//! failure completes the original operation instead of repeating it.

use uuid::Uuid;

use crate::balance;
use crate::error::{LedgerError, ValidationError};
use crate::plan::{derived_payment_id, LedgerPlan, PlanKind};
use crate::types::{
    AllocationOrigin, AuditNote, FundingSource, Invoice, Payment, PaymentDetails, Provenance,
};
use crate::Cents;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AllocationRequest {
    /// Idempotency key; reuse it when retrying the same user action.
    pub request_id: Uuid,
    pub client_id: String,
    pub invoice_id: Option<String>,
    pub amount: Cents,
    pub source: FundingSource,
    pub details: PaymentDetails,
}

impl AllocationRequest {
    pub fn new(
        client_id: impl Into<String>,
        invoice_id: Option<&str>,
        amount: Cents,
        source: FundingSource,
        details: PaymentDetails,
    ) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            client_id: client_id.into(),
            invoice_id: invoice_id.map(str::to_string),
            amount,
            source,
            details,
        }
    }

    pub fn with_request_id(mut self, request_id: Uuid) -> Self {
        self.request_id = request_id;
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AllocationOutcome {
    pub plan: LedgerPlan,
    /// Amount applied to the invoice by this request.
    pub applied: Cents,
    /// Amount moved to the client account (excess or plain deposit).
    pub to_account: Cents,
    pub outstanding_before: Cents,
    pub outstanding_after: Cents,
}

/// Plan an allocation against a snapshot.
///
/// `payments` must contain every payment of the client and every payment
/// allocated to the target invoice. `invoice` is the resolved target (or
/// `None` when the request targets the client account, or the id did not
/// resolve).
pub fn plan_allocation(
    req: &AllocationRequest,
    invoice: Option<&Invoice>,
    payments: &[Payment],
) -> Result<AllocationOutcome, LedgerError> {
    if !req.amount.is_positive() {
        return Err(ValidationError::NonPositiveAmount { amount: req.amount }.into());
    }

    let invoice_id = match (&req.invoice_id, req.source) {
        (None, FundingSource::NewPayment) => return Ok(plan_deposit(req)),
        (None, FundingSource::ClientAccount) => {
            return Err(ValidationError::MissingTargetInvoice.into())
        }
        (Some(id), _) => id.as_str(),
    };

    let invoice = validate_target(req, invoice_id, invoice)?;

    let already: Cents = payments
        .iter()
        .filter(|p| p.is_allocated_to(invoice_id) && p.written_by(req.request_id))
        .map(|p| p.amount)
        .sum();
    let outstanding_now = balance::outstanding(invoice, payments);
    let outstanding_before = outstanding_now + already;
    let amount_to_apply = req.amount.min(outstanding_before);
    let need = (amount_to_apply - already).clamp_non_negative();
    let remainder = req.amount - amount_to_apply;

    let mut plan = LedgerPlan::new(req.request_id, PlanKind::Allocate);
    let mut to_account = Cents::ZERO;

    match req.source {
        FundingSource::NewPayment => {
            if amount_to_apply.is_positive() {
                let mut p = new_payment(req, derived_payment_id(req.request_id, "applied", invoice_id), amount_to_apply);
                p.link_to(invoice_id, AllocationOrigin::NewPayment, req.request_id);
                plan.create(p);
            }
            if remainder.is_positive() {
                let mut p = new_payment(req, derived_payment_id(req.request_id, "excess", invoice_id), remainder);
                p.provenance.excess_of_invoice_id = Some(invoice_id.to_string());
                p.provenance.trail.push(AuditNote::ExcessFrom {
                    invoice_id: invoice_id.to_string(),
                });
                plan.create(p);
                to_account = remainder;
            }
        }
        FundingSource::ClientAccount => {
            fund_from_account(req, invoice_id, need, payments, &mut plan)?;
        }
    }

    Ok(AllocationOutcome {
        plan,
        applied: amount_to_apply,
        to_account,
        outstanding_before,
        outstanding_after: outstanding_before - amount_to_apply,
    })
}

fn validate_target<'a>(
    req: &AllocationRequest,
    invoice_id: &str,
    invoice: Option<&'a Invoice>,
) -> Result<&'a Invoice, LedgerError> {
    let invoice = match invoice {
        Some(i) if i.id == invoice_id => i,
        _ => {
            return Err(ValidationError::UnknownInvoice {
                invoice_id: invoice_id.to_string(),
            }
            .into())
        }
    };
    if invoice.client_id != req.client_id {
        return Err(ValidationError::InvoiceClientMismatch {
            invoice_id: invoice.id.clone(),
            invoice_client_id: invoice.client_id.clone(),
            client_id: req.client_id.clone(),
        }
        .into());
    }
    if !invoice.counts_towards_outstanding() {
        return Err(ValidationError::InvoiceNotActive {
            invoice_id: invoice.id.clone(),
        }
        .into());
    }
    Ok(invoice)
}

fn plan_deposit(req: &AllocationRequest) -> AllocationOutcome {
    let mut plan = LedgerPlan::new(req.request_id, PlanKind::Deposit);
    plan.create(new_payment(
        req,
        derived_payment_id(req.request_id, "deposit", &req.client_id),
        req.amount,
    ));
    AllocationOutcome {
        plan,
        applied: Cents::ZERO,
        to_account: req.amount,
        outstanding_before: Cents::ZERO,
        outstanding_after: Cents::ZERO,
    }
}

fn new_payment(req: &AllocationRequest, id: String, amount: Cents) -> Payment {
    Payment {
        id,
        client_id: Some(req.client_id.clone()),
        document_id: None,
        amount,
        date: req.details.date,
        method: req.details.method.clone(),
        notes: req.details.notes.clone(),
        settled_to_document: false,
        provenance: Provenance {
            request_id: Some(req.request_id),
            ..Provenance::default()
        },
    }
}

/// Client's unallocated payments in FIFO order (date, then id), excluding
/// residue this request already created.
pub fn fifo_pool<'a>(payments: &'a [Payment], client_id: &str, request_id: Uuid) -> Vec<&'a Payment> {
    let mut pool: Vec<&Payment> = payments
        .iter()
        .filter(|p| p.is_unallocated() && p.belongs_to(client_id) && !p.written_by(request_id))
        .collect();
    pool.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.id.cmp(&b.id)));
    pool
}

fn fund_from_account(
    req: &AllocationRequest,
    invoice_id: &str,
    need: Cents,
    payments: &[Payment],
    plan: &mut LedgerPlan,
) -> Result<(), LedgerError> {
    if need.is_zero() {
        return Ok(());
    }

    let pool = fifo_pool(payments, &req.client_id, req.request_id);
    let available: Cents = pool.iter().map(|p| p.amount).sum();
    if available < need {
        return Err(LedgerError::InsufficientBalance {
            available,
            required: need,
        });
    }

    let mut remaining = need;
    for source in pool {
        if remaining.is_zero() {
            break;
        }

        let mut allocated = source.clone();
        if source.amount <= remaining {
            allocated.link_to(invoice_id, AllocationOrigin::ClientAccount, req.request_id);
            remaining -= source.amount;
            plan.update(allocated);
            continue;
        }

        // Split: leftover keeps the source's date so FIFO order is stable.
        let leftover_amount = source.amount - remaining;
        let mut leftover = source.clone();
        leftover.id = derived_payment_id(req.request_id, "split", &source.id);
        leftover.amount = leftover_amount;
        leftover.provenance.request_id = Some(req.request_id);
        leftover.provenance.split_from_payment_id = Some(source.id.clone());
        leftover.provenance.trail.push(AuditNote::SplitFrom {
            payment_id: source.id.clone(),
            original: source.amount,
        });

        allocated.amount = remaining;
        allocated.link_to(invoice_id, AllocationOrigin::ClientAccount, req.request_id);

        plan.create(leftover);
        plan.update(allocated);
        remaining = Cents::ZERO;
    }

    debug_assert!(remaining.is_zero());
    Ok(())
}
