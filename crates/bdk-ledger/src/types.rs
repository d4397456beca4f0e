use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::Cents;

/// A customer. Owns invoices and payments.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Client {
    pub id: String,
    pub name: String,
}

impl Client {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Invoice
// ---------------------------------------------------------------------------

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvoiceStatus {
    Active,
    Cancelled,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Active => "ACTIVE",
            InvoiceStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ACTIVE" => Some(InvoiceStatus::Active),
            "CANCELLED" => Some(InvoiceStatus::Cancelled),
            _ => None,
        }
    }
}

/// A payment stored inside the invoice document (legacy shape).
///
/// Every embedded entry was, by construction, applied to its invoice.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddedPayment {
    pub amount: Cents,
    pub date: NaiveDate,
    #[serde(default)]
    pub method: PaymentMethod,
    #[serde(default)]
    pub notes: String,
}

/// Invoice as seen by the ledger. `total` is owned by the document service;
/// `totalPaid` is never stored and always derived from payments.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: String,
    pub client_id: String,
    pub number: String,
    pub total: Cents,
    pub status: InvoiceStatus,
    /// Issue date; drives OVERDUE.
    pub date: NaiveDate,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub legacy_payments: Vec<EmbeddedPayment>,
}

impl Invoice {
    pub fn new(
        id: impl Into<String>,
        client_id: impl Into<String>,
        number: impl Into<String>,
        total: Cents,
        date: NaiveDate,
    ) -> Self {
        debug_assert!(!total.is_negative(), "Invoice.total must be >= 0");
        Self {
            id: id.into(),
            client_id: client_id.into(),
            number: number.into(),
            total,
            status: InvoiceStatus::Active,
            date,
            deleted: false,
            legacy_payments: Vec::new(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == InvoiceStatus::Active
    }

    /// Active and not soft-deleted: counts towards client outstanding totals.
    pub fn counts_towards_outstanding(&self) -> bool {
        self.is_active() && !self.deleted
    }

    pub fn legacy_total(&self) -> Cents {
        self.legacy_payments.iter().map(|p| p.amount).sum()
    }
}

// ---------------------------------------------------------------------------
// Payment
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    #[default]
    Cash,
    BankTransfer,
    Card,
    Cheque,
    Other(String),
}

impl PaymentMethod {
    pub fn as_str(&self) -> &str {
        match self {
            PaymentMethod::Cash => "cash",
            PaymentMethod::BankTransfer => "bank_transfer",
            PaymentMethod::Card => "card",
            PaymentMethod::Cheque => "cheque",
            PaymentMethod::Other(s) => s.as_str(),
        }
    }

    /// Lenient parse: unknown methods are kept verbatim as `Other`.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "cash" => PaymentMethod::Cash,
            "bank_transfer" | "bank" | "transfer" => PaymentMethod::BankTransfer,
            "card" => PaymentMethod::Card,
            "cheque" | "check" => PaymentMethod::Cheque,
            _ => PaymentMethod::Other(s.trim().to_string()),
        }
    }
}

/// Where the cash for an allocation comes from (the `source` of `allocate`).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FundingSource {
    /// Fresh cash received now.
    NewPayment,
    /// Existing unallocated payments of the client, consumed FIFO.
    ClientAccount,
}

impl FundingSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            FundingSource::NewPayment => "new_payment",
            FundingSource::ClientAccount => "client_account",
        }
    }
}

/// How a payment became linked to its current invoice.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationOrigin {
    NewPayment,
    ClientAccount,
    LegacyMigration,
}

impl From<FundingSource> for AllocationOrigin {
    fn from(s: FundingSource) -> Self {
        match s {
            FundingSource::NewPayment => AllocationOrigin::NewPayment,
            FundingSource::ClientAccount => AllocationOrigin::ClientAccount,
        }
    }
}

/// Structured audit note attached to a payment. Notes on [`Payment::notes`]
/// stay free-text for humans.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuditNote {
    AllocatedTo { invoice_id: String },
    SplitFrom { payment_id: String, original: Cents },
    ExcessFrom { invoice_id: String },
    ReturnedFromCancelled { invoice_id: String },
    OwnerRepaired { client_id: String },
    SettlementFlagCorrected { settled: bool },
    MigratedFromLegacy { invoice_id: String, index: usize },
}

/// Audit-only provenance. Never consulted by balance calculations.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    #[serde(default)]
    pub migrated: bool,
    #[serde(default)]
    pub repaired: bool,
    #[serde(default)]
    pub allocated_from: Option<AllocationOrigin>,
    #[serde(default)]
    pub split_from_payment_id: Option<String>,
    #[serde(default)]
    pub excess_of_invoice_id: Option<String>,
    /// Idempotency key of the operation that last wrote this record.
    #[serde(default)]
    pub request_id: Option<Uuid>,
    #[serde(default)]
    pub trail: Vec<AuditNote>,
}

/// A cash receipt. `document_id == None` means unallocated (client account).
///
/// amount is always strictly positive.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub id: String,
    pub client_id: Option<String>,
    pub document_id: Option<String>,
    pub amount: Cents,
    pub date: NaiveDate,
    pub method: PaymentMethod,
    pub notes: String,
    /// Stored settlement flag; expected to equal `document_id.is_some()`.
    pub settled_to_document: bool,
    pub provenance: Provenance,
}

impl Payment {
    /// New unallocated payment for a client.
    pub fn unallocated(
        id: impl Into<String>,
        client_id: impl Into<String>,
        amount: Cents,
        date: NaiveDate,
    ) -> Self {
        debug_assert!(amount.is_positive(), "Payment.amount must be > 0");
        Self {
            id: id.into(),
            client_id: Some(client_id.into()),
            document_id: None,
            amount,
            date,
            method: PaymentMethod::default(),
            notes: String::new(),
            settled_to_document: false,
            provenance: Provenance::default(),
        }
    }

    /// New payment allocated to an invoice.
    pub fn allocated(
        id: impl Into<String>,
        client_id: impl Into<String>,
        invoice_id: impl Into<String>,
        amount: Cents,
        date: NaiveDate,
    ) -> Self {
        let mut p = Self::unallocated(id, client_id, amount, date);
        p.document_id = Some(invoice_id.into());
        p.settled_to_document = true;
        p
    }

    pub fn is_allocated(&self) -> bool {
        self.document_id.is_some()
    }

    pub fn is_unallocated(&self) -> bool {
        self.document_id.is_none()
    }

    pub fn belongs_to(&self, client_id: &str) -> bool {
        self.client_id.as_deref() == Some(client_id)
    }

    pub fn is_allocated_to(&self, invoice_id: &str) -> bool {
        self.document_id.as_deref() == Some(invoice_id)
    }

    /// Missing or blank owner reference.
    pub fn is_unowned(&self) -> bool {
        self.client_id
            .as_deref()
            .map(|c| c.trim().is_empty())
            .unwrap_or(true)
    }

    /// Whether this record was last written by `request_id`.
    pub fn written_by(&self, request_id: Uuid) -> bool {
        self.provenance.request_id == Some(request_id)
    }

    /// Link to an invoice, keeping the settlement flag in sync.
    pub(crate) fn link_to(&mut self, invoice_id: &str, origin: AllocationOrigin, request_id: Uuid) {
        self.document_id = Some(invoice_id.to_string());
        self.settled_to_document = true;
        self.provenance.allocated_from = Some(origin);
        self.provenance.request_id = Some(request_id);
        self.provenance.trail.push(AuditNote::AllocatedTo {
            invoice_id: invoice_id.to_string(),
        });
    }
}

/// Audit fields supplied by the caller of `allocate`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PaymentDetails {
    pub date: NaiveDate,
    pub method: PaymentMethod,
    pub notes: String,
}

impl PaymentDetails {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date,
            method: PaymentMethod::default(),
            notes: String::new(),
        }
    }

    pub fn with_method(mut self, method: PaymentMethod) -> Self {
        self.method = method;
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = notes.into();
        self
    }
}
