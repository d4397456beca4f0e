use std::collections::BTreeMap;

use bdk_ledger::{Cents, Client, Invoice, LedgerError, LedgerStore, Payment};
use serde::Serialize;

/// Everything a reconciliation sweep looks at, loaded once.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RecordSet {
    pub clients: BTreeMap<String, Client>,
    pub invoices: BTreeMap<String, Invoice>,
    /// Sorted by payment id.
    pub payments: Vec<Payment>,
}

impl RecordSet {
    pub fn new(
        clients: impl IntoIterator<Item = Client>,
        invoices: impl IntoIterator<Item = Invoice>,
        payments: impl IntoIterator<Item = Payment>,
    ) -> Self {
        let mut payments: Vec<Payment> = payments.into_iter().collect();
        payments.sort_by(|a, b| a.id.cmp(&b.id));
        Self {
            clients: clients.into_iter().map(|c| (c.id.clone(), c)).collect(),
            invoices: invoices.into_iter().map(|i| (i.id.clone(), i)).collect(),
            payments,
        }
    }

    pub fn load<S: LedgerStore + ?Sized>(store: &S) -> Result<Self, LedgerError> {
        Ok(Self::new(
            store.list_clients()?,
            store.list_invoices()?,
            store.query_all()?,
        ))
    }

    /// Owner of an invoice, if both the invoice and its client exist.
    pub fn resolve_owner(&self, invoice_id: &str) -> Option<&str> {
        let invoice = self.invoices.get(invoice_id)?;
        self.clients
            .get(&invoice.client_id)
            .map(|c| c.id.as_str())
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReconcileAction {
    Clean,
    NeedsAttention,
}

/// A detected problem. Variant order is the report sort order.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IntegrityViolation {
    /// `document_id` does not resolve to an invoice.
    OrphanedPayment {
        payment_id: String,
        document_id: String,
        amount: Cents,
    },
    /// No owner, and the document reference gives no safe way to find one.
    UnresolvableOwner {
        payment_id: String,
        document_id: Option<String>,
        amount: Cents,
    },
    /// Stored settlement flag disagrees with `document_id`.
    StaleSettlementFlag {
        payment_id: String,
        stored: bool,
        expected: bool,
    },
    /// Invoice still carries embedded payments.
    LegacyPaymentsPending {
        invoice_id: String,
        count: usize,
        total: Cents,
    },
    /// Migrated records for an invoice do not add up to its embedded list.
    MigrationSumMismatch {
        invoice_id: String,
        expected: Cents,
        found: Cents,
    },
}

impl std::fmt::Display for IntegrityViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OrphanedPayment {
                payment_id,
                document_id,
                amount,
            } => write!(
                f,
                "payment {payment_id} ({amount}) references missing invoice {document_id}"
            ),
            Self::UnresolvableOwner {
                payment_id,
                document_id,
                amount,
            } => match document_id {
                Some(doc) => write!(
                    f,
                    "payment {payment_id} ({amount}) has no owner and invoice {doc} does not resolve to a known client"
                ),
                None => write!(f, "payment {payment_id} ({amount}) has no owner and no invoice"),
            },
            Self::StaleSettlementFlag {
                payment_id,
                stored,
                expected,
            } => write!(
                f,
                "payment {payment_id} settled flag is {stored}, expected {expected}"
            ),
            Self::LegacyPaymentsPending {
                invoice_id,
                count,
                total,
            } => write!(
                f,
                "invoice {invoice_id} still embeds {count} legacy payment(s) totalling {total}"
            ),
            Self::MigrationSumMismatch {
                invoice_id,
                expected,
                found,
            } => write!(
                f,
                "invoice {invoice_id} migrated records sum to {found}, embedded list sums to {expected}"
            ),
        }
    }
}

/// Assign `client_id` as owner of `payment_id`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct OwnerRepair {
    pub payment_id: String,
    pub client_id: String,
}

/// Set the stored settlement flag of `payment_id` to `settled`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct SettlementCorrection {
    pub payment_id: String,
    pub settled: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RepairPlan {
    pub owner_repairs: Vec<OwnerRepair>,
    pub settlement_corrections: Vec<SettlementCorrection>,
}

impl RepairPlan {
    pub fn is_empty(&self) -> bool {
        self.owner_repairs.is_empty() && self.settlement_corrections.is_empty()
    }
}

/// Full sweep report.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub action: ReconcileAction,
    pub violations: Vec<IntegrityViolation>,
    pub repairs: RepairPlan,
}

impl ReconcileReport {
    pub fn clean() -> Self {
        Self {
            action: ReconcileAction::Clean,
            violations: Vec::new(),
            repairs: RepairPlan::default(),
        }
    }

    pub fn is_clean(&self) -> bool {
        self.action == ReconcileAction::Clean
    }
}

/// Per-record result of applying repairs. Failures do not stop the run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RepairSummary {
    pub applied: usize,
    /// Records that no longer needed the repair when re-read under lock.
    pub skipped: usize,
    pub failed: Vec<(String, LedgerError)>,
}

impl RepairSummary {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}
