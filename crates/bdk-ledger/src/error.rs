//! Ledger error taxonomy.
//!
//! - [`ValidationError`]: caller supplied something unusable; nothing mutated.
//! - [`LedgerError::InsufficientBalance`]: account-funded allocation asked for
//!   more than the unallocated balance; nothing mutated.
//! - [`LedgerError::Persistence`]: a store write failed mid-sequence. Writes
//!   already applied are not rolled back; records carry provenance so a retry
//!   with the same request id converges.
//!
//! Integrity problems found by reconciliation are reported, not raised; they
//! live in `bdk-reconcile`.

use crate::Cents;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Amounts must be strictly positive.
    NonPositiveAmount { amount: Cents },
    UnknownClient { client_id: String },
    UnknownInvoice { invoice_id: String },
    /// The invoice belongs to a different client than the one named.
    InvoiceClientMismatch {
        invoice_id: String,
        invoice_client_id: String,
        client_id: String,
    },
    /// Allocation targets must be ACTIVE and not deleted.
    InvoiceNotActive { invoice_id: String },
    /// Account-funded allocation needs a target invoice.
    MissingTargetInvoice,
    /// Cancelling an invoice with allocated payments needs a disposition.
    DispositionRequired { invoice_id: String, allocated: Cents },
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NonPositiveAmount { amount } => {
                write!(f, "amount must be > 0, got {amount}")
            }
            Self::UnknownClient { client_id } => write!(f, "unknown client '{client_id}'"),
            Self::UnknownInvoice { invoice_id } => write!(f, "unknown invoice '{invoice_id}'"),
            Self::InvoiceClientMismatch {
                invoice_id,
                invoice_client_id,
                client_id,
            } => write!(
                f,
                "invoice '{invoice_id}' belongs to client '{invoice_client_id}', not '{client_id}'"
            ),
            Self::InvoiceNotActive { invoice_id } => {
                write!(f, "invoice '{invoice_id}' is not active")
            }
            Self::MissingTargetInvoice => {
                write!(f, "allocation from client account requires a target invoice")
            }
            Self::DispositionRequired {
                invoice_id,
                allocated,
            } => write!(
                f,
                "invoice '{invoice_id}' has {allocated} allocated; choose move-to-account or keep-as-history"
            ),
        }
    }
}

impl std::error::Error for ValidationError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    Validation(ValidationError),
    InsufficientBalance { available: Cents, required: Cents },
    Persistence { op: &'static str, detail: String },
}

impl LedgerError {
    pub fn persistence(op: &'static str, detail: impl Into<String>) -> Self {
        LedgerError::Persistence {
            op,
            detail: detail.into(),
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, LedgerError::Validation(_))
    }
}

impl From<ValidationError> for LedgerError {
    fn from(e: ValidationError) -> Self {
        LedgerError::Validation(e)
    }
}

impl std::fmt::Display for LedgerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(e) => write!(f, "validation failed: {e}"),
            Self::InsufficientBalance {
                available,
                required,
            } => write!(
                f,
                "insufficient client balance: available {available}, required {required}"
            ),
            Self::Persistence { op, detail } => write!(f, "store {op} failed: {detail}"),
        }
    }
}

impl std::error::Error for LedgerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Validation(e) => Some(e),
            _ => None,
        }
    }
}
