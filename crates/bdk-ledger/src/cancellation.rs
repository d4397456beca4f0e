//! Invoice cancellation and restore.
//!
//! Cancelling an invoice that still has allocated payments needs an explicit
//! [`Disposition`]. Restoring never re-runs allocation.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{LedgerError, ValidationError};
use crate::plan::{LedgerPlan, PlanKind};
use crate::types::{AuditNote, Invoice, InvoiceStatus, Payment};
use crate::Cents;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Disposition {
    /// Unlink every allocated payment; the cash returns to the client account.
    MoveToAccount,
    /// Leave payments linked to the cancelled invoice as history.
    KeepAsHistory,
}

impl Disposition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Disposition::MoveToAccount => "MOVE_TO_ACCOUNT",
            Disposition::KeepAsHistory => "KEEP_AS_HISTORY",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CancelRequest {
    pub request_id: Uuid,
    pub invoice_id: String,
    /// May be `None` only when nothing is allocated to the invoice.
    pub disposition: Option<Disposition>,
}

impl CancelRequest {
    pub fn new(invoice_id: impl Into<String>, disposition: Option<Disposition>) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            invoice_id: invoice_id.into(),
            disposition,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CancelOutcome {
    pub plan: LedgerPlan,
    /// Cash returned to the client account.
    pub returned_to_account: Cents,
    /// Cash left allocated to the cancelled invoice.
    pub kept_as_history: Cents,
}

/// Plan a cancellation. `payments` must include every payment allocated to
/// the invoice. Cancelling an already cancelled invoice plans nothing.
pub fn plan_cancellation(
    req: &CancelRequest,
    invoice: Option<&Invoice>,
    payments: &[Payment],
) -> Result<CancelOutcome, LedgerError> {
    let invoice = match invoice {
        Some(i) if i.id == req.invoice_id => i,
        _ => {
            return Err(ValidationError::UnknownInvoice {
                invoice_id: req.invoice_id.clone(),
            }
            .into())
        }
    };

    let mut plan = LedgerPlan::new(req.request_id, PlanKind::Cancel);
    if invoice.status == InvoiceStatus::Cancelled {
        return Ok(CancelOutcome {
            plan,
            returned_to_account: Cents::ZERO,
            kept_as_history: Cents::ZERO,
        });
    }

    let allocated: Vec<&Payment> = payments
        .iter()
        .filter(|p| p.is_allocated_to(&invoice.id))
        .collect();
    let allocated_total: Cents = allocated.iter().map(|p| p.amount).sum();

    let disposition = match (req.disposition, allocated.is_empty()) {
        (Some(d), _) => d,
        (None, true) => Disposition::KeepAsHistory,
        (None, false) => {
            return Err(ValidationError::DispositionRequired {
                invoice_id: invoice.id.clone(),
                allocated: allocated_total,
            }
            .into())
        }
    };

    let mut returned = Cents::ZERO;
    if disposition == Disposition::MoveToAccount {
        for p in allocated {
            let mut unlinked = p.clone();
            unlinked.document_id = None;
            unlinked.settled_to_document = false;
            unlinked.provenance.request_id = Some(req.request_id);
            unlinked.provenance.trail.push(AuditNote::ReturnedFromCancelled {
                invoice_id: invoice.id.clone(),
            });
            // Without its document reference an unowned payment could never
            // be attributed again; the invoice owner is the only candidate.
            if unlinked.is_unowned() {
                unlinked.client_id = Some(invoice.client_id.clone());
                unlinked.provenance.repaired = true;
                unlinked.provenance.trail.push(AuditNote::OwnerRepaired {
                    client_id: invoice.client_id.clone(),
                });
            }
            returned += unlinked.amount;
            plan.update(unlinked);
        }
    }

    plan.set_status(&invoice.id, InvoiceStatus::Cancelled);

    Ok(CancelOutcome {
        plan,
        returned_to_account: returned,
        kept_as_history: allocated_total - returned,
    })
}

/// Plan a restore (CANCELLED -> ACTIVE). Payments are not touched.
pub fn plan_restore(request_id: Uuid, invoice: Option<&Invoice>, invoice_id: &str) -> Result<LedgerPlan, LedgerError> {
    let invoice = match invoice {
        Some(i) if i.id == invoice_id => i,
        _ => {
            return Err(ValidationError::UnknownInvoice {
                invoice_id: invoice_id.to_string(),
            }
            .into())
        }
    };
    let mut plan = LedgerPlan::new(request_id, PlanKind::Restore);
    if invoice.status == InvoiceStatus::Cancelled {
        plan.set_status(&invoice.id, InvoiceStatus::Active);
    }
    Ok(plan)
}
