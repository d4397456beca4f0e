//! bdk-ledger
//!
//! Payment allocation and settlement ledger.
//! - Payments are the source of truth; `total_paid` is always derived
//! - Allocation from new cash or FIFO from the client account, with exact splits
//! - Cancellation with an explicit disposition of allocated cash
//! - Engines emit ordered plans; stores apply them; the service serializes
//!   mutations per client
//! - Integer cents after the decimal boundary (no float drift)

mod error;
mod locks;
mod money;
mod types;

pub mod allocation;
pub mod balance;
pub mod cancellation;
pub mod plan;
pub mod service;
pub mod store;

pub use allocation::{plan_allocation, AllocationOutcome, AllocationRequest};
pub use balance::{
    client_outstanding_total, client_statement, outstanding, payment_status, sort_for_display,
    total_paid, unallocated_balance, ClientStatement, InvoiceBalance, PaymentStatus,
    DEFAULT_OVERDUE_AFTER_DAYS,
};
pub use cancellation::{plan_cancellation, plan_restore, CancelOutcome, CancelRequest, Disposition};
pub use error::{LedgerError, ValidationError};
pub use locks::ClientLocks;
pub use money::{Cents, ParseCentsError, CENTS_SCALE, MAX_AMOUNT};
pub use plan::{derived_payment_id, InvoiceWrite, LedgerPlan, PaymentWrite, PlanKind};
pub use service::{plan_allocation_in, plan_cancellation_in, plan_restore_in, LedgerService};
pub use store::{
    apply_plan, ClientDirectory, InvoiceDirectory, LedgerStore, MemoryStore, PaymentStore,
};
pub use types::{
    AllocationOrigin, AuditNote, Client, EmbeddedPayment, FundingSource, Invoice, InvoiceStatus,
    Payment, PaymentDetails, PaymentMethod, Provenance,
};
