//! Record store contracts and the in-memory implementation.
//!
//! The ledger never owns invoices or clients; it consumes them through
//! [`InvoiceDirectory`] and [`ClientDirectory`]. Payments are owned through
//! [`PaymentStore`]. Plans produced by the engines are applied with
//! [`apply_plan`].

use std::collections::BTreeMap;

use crate::error::LedgerError;
use crate::plan::{InvoiceWrite, LedgerPlan, PaymentWrite};
use crate::types::{Client, Invoice, InvoiceStatus, Payment};

pub trait InvoiceDirectory {
    fn get_invoice(&self, invoice_id: &str) -> Result<Option<Invoice>, LedgerError>;
    fn set_invoice_status(&mut self, invoice_id: &str, status: InvoiceStatus) -> Result<(), LedgerError>;
    /// Drop the legacy embedded payment list of an invoice.
    fn clear_legacy_payments(&mut self, invoice_id: &str) -> Result<(), LedgerError>;
    fn list_invoices(&self) -> Result<Vec<Invoice>, LedgerError>;

    fn invoices_of_client(&self, client_id: &str) -> Result<Vec<Invoice>, LedgerError> {
        Ok(self
            .list_invoices()?
            .into_iter()
            .filter(|i| i.client_id == client_id)
            .collect())
    }
}

pub trait ClientDirectory {
    fn get_client(&self, client_id: &str) -> Result<Option<Client>, LedgerError>;
    fn list_clients(&self) -> Result<Vec<Client>, LedgerError>;
}

pub trait PaymentStore {
    /// Insert a payment. An existing record with the same id is overwritten,
    /// so replaying a plan converges instead of failing.
    fn create(&mut self, payment: Payment) -> Result<(), LedgerError>;
    /// Replace an existing payment. Fails if the id is unknown.
    fn update(&mut self, payment: Payment) -> Result<(), LedgerError>;
    fn delete(&mut self, payment_id: &str) -> Result<(), LedgerError>;
    fn get(&self, payment_id: &str) -> Result<Option<Payment>, LedgerError>;
    fn query_by_client(&self, client_id: &str) -> Result<Vec<Payment>, LedgerError>;
    fn query_by_invoice(&self, invoice_id: &str) -> Result<Vec<Payment>, LedgerError>;
    fn query_all(&self) -> Result<Vec<Payment>, LedgerError>;
}

/// Everything the ledger service needs from a backing store.
pub trait LedgerStore: InvoiceDirectory + ClientDirectory + PaymentStore {}

impl<T: InvoiceDirectory + ClientDirectory + PaymentStore> LedgerStore for T {}

/// Apply a plan in order: payment writes first, then invoice writes.
///
/// Stops at the first failing write. Writes already applied stay applied;
/// the caller retries with the same request id.
pub fn apply_plan<S>(store: &mut S, plan: &LedgerPlan) -> Result<usize, LedgerError>
where
    S: InvoiceDirectory + PaymentStore + ?Sized,
{
    let mut applied = 0usize;
    for w in &plan.payment_writes {
        match w {
            PaymentWrite::Create(p) => store.create(p.clone())?,
            PaymentWrite::Update(p) => store.update(p.clone())?,
        }
        applied += 1;
    }
    for w in &plan.invoice_writes {
        match w {
            InvoiceWrite::SetStatus { invoice_id, status } => {
                store.set_invoice_status(invoice_id, *status)?
            }
            InvoiceWrite::ClearLegacyPayments { invoice_id } => {
                store.clear_legacy_payments(invoice_id)?
            }
        }
        applied += 1;
    }
    Ok(applied)
}

/// Payments relevant to planning an operation for `client_id`: all of the
/// client's payments plus everything allocated to `invoice_id`, by id.
pub fn planning_snapshot<S>(
    store: &S,
    client_id: &str,
    invoice_id: Option<&str>,
) -> Result<Vec<Payment>, LedgerError>
where
    S: PaymentStore + ?Sized,
{
    let mut by_id: BTreeMap<String, Payment> = store
        .query_by_client(client_id)?
        .into_iter()
        .map(|p| (p.id.clone(), p))
        .collect();
    if let Some(invoice_id) = invoice_id {
        for p in store.query_by_invoice(invoice_id)? {
            by_id.entry(p.id.clone()).or_insert(p);
        }
    }
    Ok(by_id.into_values().collect())
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

/// In-process store. Deterministic iteration (ordered by id).
///
/// Fault injection for tests:
/// - [`MemoryStore::fail_after_writes`]: after `n` more successful writes the
///   next write fails with a persistence error (one shot).
/// - [`MemoryStore::lose_next_creates`]: the next `n` creates report success
///   without storing anything.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    clients: BTreeMap<String, Client>,
    invoices: BTreeMap<String, Invoice>,
    payments: BTreeMap<String, Payment>,
    fail_after: Option<usize>,
    lost_creates: usize,
    writes: u64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_client(&mut self, client: Client) {
        self.clients.insert(client.id.clone(), client);
    }

    pub fn insert_invoice(&mut self, invoice: Invoice) {
        self.invoices.insert(invoice.id.clone(), invoice);
    }

    /// Seed a payment, bypassing fault injection.
    pub fn insert_payment(&mut self, payment: Payment) {
        self.payments.insert(payment.id.clone(), payment);
    }

    pub fn fail_after_writes(&mut self, n: usize) {
        self.fail_after = Some(n);
    }

    pub fn lose_next_creates(&mut self, n: usize) {
        self.lost_creates = n;
    }

    /// Writes accepted so far (including lost creates).
    pub fn write_count(&self) -> u64 {
        self.writes
    }

    pub fn payment_count(&self) -> usize {
        self.payments.len()
    }

    fn admit_write(&mut self, op: &'static str) -> Result<(), LedgerError> {
        match self.fail_after {
            Some(0) => {
                self.fail_after = None;
                Err(LedgerError::persistence(op, "injected write failure"))
            }
            Some(n) => {
                self.fail_after = Some(n - 1);
                self.writes += 1;
                Ok(())
            }
            None => {
                self.writes += 1;
                Ok(())
            }
        }
    }

    fn invoice_mut(&mut self, invoice_id: &str, op: &'static str) -> Result<&mut Invoice, LedgerError> {
        self.invoices
            .get_mut(invoice_id)
            .ok_or_else(|| LedgerError::persistence(op, format!("invoice '{invoice_id}' not found")))
    }
}

impl InvoiceDirectory for MemoryStore {
    fn get_invoice(&self, invoice_id: &str) -> Result<Option<Invoice>, LedgerError> {
        Ok(self.invoices.get(invoice_id).cloned())
    }

    fn set_invoice_status(&mut self, invoice_id: &str, status: InvoiceStatus) -> Result<(), LedgerError> {
        self.admit_write("set_invoice_status")?;
        self.invoice_mut(invoice_id, "set_invoice_status")?.status = status;
        Ok(())
    }

    fn clear_legacy_payments(&mut self, invoice_id: &str) -> Result<(), LedgerError> {
        self.admit_write("clear_legacy_payments")?;
        self.invoice_mut(invoice_id, "clear_legacy_payments")?
            .legacy_payments
            .clear();
        Ok(())
    }

    fn list_invoices(&self) -> Result<Vec<Invoice>, LedgerError> {
        Ok(self.invoices.values().cloned().collect())
    }
}

impl ClientDirectory for MemoryStore {
    fn get_client(&self, client_id: &str) -> Result<Option<Client>, LedgerError> {
        Ok(self.clients.get(client_id).cloned())
    }

    fn list_clients(&self) -> Result<Vec<Client>, LedgerError> {
        Ok(self.clients.values().cloned().collect())
    }
}

impl PaymentStore for MemoryStore {
    fn create(&mut self, payment: Payment) -> Result<(), LedgerError> {
        self.admit_write("create")?;
        if self.lost_creates > 0 {
            self.lost_creates -= 1;
            return Ok(());
        }
        self.payments.insert(payment.id.clone(), payment);
        Ok(())
    }

    fn update(&mut self, payment: Payment) -> Result<(), LedgerError> {
        self.admit_write("update")?;
        match self.payments.get_mut(&payment.id) {
            Some(slot) => {
                *slot = payment;
                Ok(())
            }
            None => Err(LedgerError::persistence(
                "update",
                format!("payment '{}' not found", payment.id),
            )),
        }
    }

    fn delete(&mut self, payment_id: &str) -> Result<(), LedgerError> {
        self.admit_write("delete")?;
        self.payments.remove(payment_id);
        Ok(())
    }

    fn get(&self, payment_id: &str) -> Result<Option<Payment>, LedgerError> {
        Ok(self.payments.get(payment_id).cloned())
    }

    fn query_by_client(&self, client_id: &str) -> Result<Vec<Payment>, LedgerError> {
        Ok(self
            .payments
            .values()
            .filter(|p| p.belongs_to(client_id))
            .cloned()
            .collect())
    }

    fn query_by_invoice(&self, invoice_id: &str) -> Result<Vec<Payment>, LedgerError> {
        Ok(self
            .payments
            .values()
            .filter(|p| p.is_allocated_to(invoice_id))
            .cloned()
            .collect())
    }

    fn query_all(&self) -> Result<Vec<Payment>, LedgerError> {
        Ok(self.payments.values().cloned().collect())
    }
}
