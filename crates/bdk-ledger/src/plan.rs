//! Mutation plans.
//!
//! Engines never touch a store. They return a [`LedgerPlan`]: the ordered
//! writes that implement one operation. Stores apply plans in order.
//!
//! Ordering rule: when a payment is split, the `Create` for the leftover is
//! emitted before the `Update` that shrinks the source. A crash between the
//! two leaves visible residue (money briefly counted twice, tagged with the
//! request id) rather than a silent loss.

use serde::Serialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::types::{InvoiceStatus, Payment};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PaymentWrite {
    /// Insert; applied as an upsert so retries of the same request converge.
    Create(Payment),
    Update(Payment),
}

impl PaymentWrite {
    pub fn payment(&self) -> &Payment {
        match self {
            PaymentWrite::Create(p) | PaymentWrite::Update(p) => p,
        }
    }

    pub fn is_create(&self) -> bool {
        matches!(self, PaymentWrite::Create(_))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InvoiceWrite {
    SetStatus {
        invoice_id: String,
        status: InvoiceStatus,
    },
    ClearLegacyPayments {
        invoice_id: String,
    },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlanKind {
    Deposit,
    Allocate,
    Cancel,
    Restore,
    RepairOwner,
    SettlementFlag,
    MigrateLegacy,
}

impl PlanKind {
    /// Audit event type string.
    pub fn event_type(&self) -> &'static str {
        match self {
            PlanKind::Deposit => "DEPOSIT",
            PlanKind::Allocate => "ALLOCATE",
            PlanKind::Cancel => "CANCEL",
            PlanKind::Restore => "RESTORE",
            PlanKind::RepairOwner => "REPAIR_OWNER",
            PlanKind::SettlementFlag => "SETTLEMENT_FLAG",
            PlanKind::MigrateLegacy => "MIGRATE_LEGACY",
        }
    }

    /// Audit topic.
    pub fn topic(&self) -> &'static str {
        match self {
            PlanKind::Deposit | PlanKind::Allocate | PlanKind::Cancel | PlanKind::Restore => {
                "ledger"
            }
            PlanKind::RepairOwner | PlanKind::SettlementFlag | PlanKind::MigrateLegacy => {
                "reconcile"
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LedgerPlan {
    pub request_id: Uuid,
    pub kind: PlanKind,
    pub payment_writes: Vec<PaymentWrite>,
    /// Applied after all payment writes.
    pub invoice_writes: Vec<InvoiceWrite>,
}

impl LedgerPlan {
    pub fn new(request_id: Uuid, kind: PlanKind) -> Self {
        Self {
            request_id,
            kind,
            payment_writes: Vec::new(),
            invoice_writes: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.payment_writes.is_empty() && self.invoice_writes.is_empty()
    }

    pub fn write_count(&self) -> usize {
        self.payment_writes.len() + self.invoice_writes.len()
    }

    pub fn create(&mut self, p: Payment) {
        self.payment_writes.push(PaymentWrite::Create(p));
    }

    pub fn update(&mut self, p: Payment) {
        self.payment_writes.push(PaymentWrite::Update(p));
    }

    pub fn set_status(&mut self, invoice_id: &str, status: InvoiceStatus) {
        self.invoice_writes.push(InvoiceWrite::SetStatus {
            invoice_id: invoice_id.to_string(),
            status,
        });
    }

    /// Compact JSON for the audit trail.
    pub fn audit_payload(&self) -> Value {
        let payments: Vec<Value> = self
            .payment_writes
            .iter()
            .map(|w| {
                let p = w.payment();
                json!({
                    "op": if w.is_create() { "create" } else { "update" },
                    "payment_id": p.id,
                    "client_id": p.client_id,
                    "document_id": p.document_id,
                    "amount": p.amount,
                    "settled_to_document": p.settled_to_document,
                })
            })
            .collect();
        let invoices: Vec<Value> = self
            .invoice_writes
            .iter()
            .map(|w| match w {
                InvoiceWrite::SetStatus { invoice_id, status } => {
                    json!({"op": "set_status", "invoice_id": invoice_id, "status": status.as_str()})
                }
                InvoiceWrite::ClearLegacyPayments { invoice_id } => {
                    json!({"op": "clear_legacy_payments", "invoice_id": invoice_id})
                }
            })
            .collect();
        json!({
            "request_id": self.request_id,
            "kind": self.kind,
            "payments": payments,
            "invoices": invoices,
        })
    }
}

/// Derive the id of a record created by `request_id`.
///
/// Deterministic, so replaying a request writes the same ids.
pub fn derived_payment_id(request_id: Uuid, role: &str, source: &str) -> String {
    Uuid::new_v5(&request_id, format!("{role}:{source}").as_bytes()).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_ids_are_stable_and_distinct() {
        let r = Uuid::new_v4();
        assert_eq!(
            derived_payment_id(r, "split", "p1"),
            derived_payment_id(r, "split", "p1")
        );
        assert_ne!(
            derived_payment_id(r, "split", "p1"),
            derived_payment_id(r, "split", "p2")
        );
        assert_ne!(
            derived_payment_id(r, "split", "p1"),
            derived_payment_id(Uuid::new_v4(), "split", "p1")
        );
    }
}
