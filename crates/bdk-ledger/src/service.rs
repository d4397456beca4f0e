//! LedgerService: the caller-facing ledger over a [`LedgerStore`].
//!
//! - Mutations (allocate, cancel, restore, repairs) take the per-client lock
//!   of the affected client, plan against a fresh snapshot, then apply the
//!   whole plan under the store write lock.
//! - Reads take the store read lock only, so they never observe half of a
//!   plan.

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::NaiveDate;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::allocation::{plan_allocation, AllocationOutcome, AllocationRequest};
use crate::balance::{self, ClientStatement, PaymentStatus, DEFAULT_OVERDUE_AFTER_DAYS};
use crate::cancellation::{plan_cancellation, plan_restore, CancelOutcome, CancelRequest};
use crate::error::{LedgerError, ValidationError};
use crate::locks::ClientLocks;
use crate::plan::LedgerPlan;
use crate::store::{apply_plan, planning_snapshot, LedgerStore};
use crate::Cents;

pub struct LedgerService<S> {
    store: RwLock<S>,
    locks: ClientLocks,
    overdue_after_days: i64,
}

impl<S: LedgerStore> LedgerService<S> {
    pub fn new(store: S) -> Self {
        Self {
            store: RwLock::new(store),
            locks: ClientLocks::new(),
            overdue_after_days: DEFAULT_OVERDUE_AFTER_DAYS,
        }
    }

    pub fn with_overdue_after_days(mut self, days: i64) -> Self {
        self.overdue_after_days = days;
        self
    }

    pub fn overdue_after_days(&self) -> i64 {
        self.overdue_after_days
    }

    pub fn into_inner(self) -> S {
        self.store
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn read_store(&self) -> RwLockReadGuard<'_, S> {
        self.store.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write_store(&self) -> RwLockWriteGuard<'_, S> {
        self.store.write().unwrap_or_else(|p| p.into_inner())
    }

    /// Run a read-only closure against committed state.
    pub fn read<R>(&self, f: impl FnOnce(&S) -> R) -> R {
        f(&self.read_store())
    }

    // -----------------------------------------------------------------------
    // Balance Calculator
    // -----------------------------------------------------------------------

    pub fn unallocated_balance(&self, client_id: &str) -> Result<Cents, LedgerError> {
        let store = self.read_store();
        Ok(balance::unallocated_balance(
            &store.query_by_client(client_id)?,
            client_id,
        ))
    }

    /// Unknown invoices yield zero.
    pub fn outstanding(&self, invoice_id: &str) -> Result<Cents, LedgerError> {
        let store = self.read_store();
        match store.get_invoice(invoice_id)? {
            Some(invoice) => Ok(balance::outstanding(
                &invoice,
                &store.query_by_invoice(invoice_id)?,
            )),
            None => Ok(Cents::ZERO),
        }
    }

    pub fn payment_status(
        &self,
        invoice_id: &str,
        today: NaiveDate,
    ) -> Result<Option<PaymentStatus>, LedgerError> {
        let store = self.read_store();
        let Some(invoice) = store.get_invoice(invoice_id)? else {
            return Ok(None);
        };
        let paid = balance::total_paid(&store.query_by_invoice(invoice_id)?, invoice_id);
        Ok(Some(balance::payment_status(
            &invoice,
            paid,
            today,
            self.overdue_after_days,
        )))
    }

    pub fn client_outstanding_total(&self, client_id: &str) -> Result<Cents, LedgerError> {
        let store = self.read_store();
        Ok(balance::client_outstanding_total(
            &store.invoices_of_client(client_id)?,
            &store.query_by_client(client_id)?,
            client_id,
        ))
    }

    pub fn statement(&self, client_id: &str, today: NaiveDate) -> Result<ClientStatement, LedgerError> {
        let store = self.read_store();
        let invoices = store.invoices_of_client(client_id)?;
        let mut payments = store.query_by_client(client_id)?;
        // Payments on the client's invoices owned by nobody still count as paid.
        for inv in &invoices {
            for p in store.query_by_invoice(&inv.id)? {
                if !p.belongs_to(client_id) {
                    payments.push(p);
                }
            }
        }
        Ok(balance::client_statement(
            client_id,
            &invoices,
            &payments,
            today,
            self.overdue_after_days,
        ))
    }

    // -----------------------------------------------------------------------
    // Mutations
    // -----------------------------------------------------------------------

    pub fn allocate(&self, req: &AllocationRequest) -> Result<AllocationOutcome, LedgerError> {
        self.mutate_client(&req.client_id, |store| {
            let outcome = plan_allocation_in(store, req)?;
            Ok((outcome.plan.clone(), outcome))
        })
    }

    pub fn cancel_invoice(&self, req: &CancelRequest) -> Result<CancelOutcome, LedgerError> {
        let client_id = self.owner_of_invoice(&req.invoice_id)?;
        self.mutate_client(&client_id, |store| {
            let outcome = plan_cancellation_in(store, req)?;
            Ok((outcome.plan.clone(), outcome))
        })
    }

    pub fn restore_invoice(&self, request_id: Uuid, invoice_id: &str) -> Result<LedgerPlan, LedgerError> {
        let client_id = self.owner_of_invoice(invoice_id)?;
        self.mutate_client(&client_id, |store| {
            let plan = plan_restore_in(store, request_id, invoice_id)?;
            Ok((plan.clone(), plan))
        })
    }

    fn owner_of_invoice(&self, invoice_id: &str) -> Result<String, LedgerError> {
        self.read_store()
            .get_invoice(invoice_id)?
            .map(|i| i.client_id)
            .ok_or_else(|| {
                ValidationError::UnknownInvoice {
                    invoice_id: invoice_id.to_string(),
                }
                .into()
            })
    }

    /// Plan and commit one mutation for `client_id`.
    ///
    /// `build` sees a snapshot taken under the client lock and returns the
    /// plan to apply plus the caller's result. An empty plan commits nothing.
    pub fn mutate_client<R>(
        &self,
        client_id: &str,
        build: impl FnOnce(&S) -> Result<(LedgerPlan, R), LedgerError>,
    ) -> Result<R, LedgerError> {
        self.locks.with_client(client_id, || {
            let (plan, out) = {
                let store = self.read_store();
                build(&store)?
            };
            self.commit(client_id, &plan)?;
            Ok(out)
        })
    }

    /// Exclusive access to the store while holding the lock for `client_id`.
    ///
    /// For multi-phase operations that must read back their own writes
    /// before deciding the next step.
    pub fn with_client_store<R>(&self, client_id: &str, f: impl FnOnce(&mut S) -> R) -> R {
        self.locks.with_client(client_id, || {
            let mut store = self.write_store();
            f(&mut store)
        })
    }

    fn commit(&self, client_id: &str, plan: &LedgerPlan) -> Result<(), LedgerError> {
        if plan.is_empty() {
            debug!(client_id, request_id = %plan.request_id, kind = plan.kind.event_type(), "nothing to commit");
            return Ok(());
        }
        let mut store = self.write_store();
        match apply_plan(&mut *store, plan) {
            Ok(writes) => {
                info!(
                    client_id,
                    request_id = %plan.request_id,
                    kind = plan.kind.event_type(),
                    writes,
                    "ledger plan committed"
                );
                Ok(())
            }
            Err(e) => {
                warn!(
                    client_id,
                    request_id = %plan.request_id,
                    kind = plan.kind.event_type(),
                    error = %e,
                    "ledger plan failed part-way; retry with the same request id"
                );
                Err(e)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Planning against a store snapshot
// ---------------------------------------------------------------------------
//
// The caller holds the client's lock (in-process or database advisory lock).

pub fn plan_allocation_in<S>(store: &S, req: &AllocationRequest) -> Result<AllocationOutcome, LedgerError>
where
    S: LedgerStore + ?Sized,
{
    if store.get_client(&req.client_id)?.is_none() {
        return Err(ValidationError::UnknownClient {
            client_id: req.client_id.clone(),
        }
        .into());
    }
    let invoice = match &req.invoice_id {
        Some(id) => store.get_invoice(id)?,
        None => None,
    };
    let payments = planning_snapshot(store, &req.client_id, req.invoice_id.as_deref())?;
    plan_allocation(req, invoice.as_ref(), &payments)
}

pub fn plan_cancellation_in<S>(store: &S, req: &CancelRequest) -> Result<CancelOutcome, LedgerError>
where
    S: LedgerStore + ?Sized,
{
    let invoice = store.get_invoice(&req.invoice_id)?;
    let payments = store.query_by_invoice(&req.invoice_id)?;
    plan_cancellation(req, invoice.as_ref(), &payments)
}

pub fn plan_restore_in<S>(store: &S, request_id: Uuid, invoice_id: &str) -> Result<LedgerPlan, LedgerError>
where
    S: LedgerStore + ?Sized,
{
    let invoice = store.get_invoice(invoice_id)?;
    plan_restore(request_id, invoice.as_ref(), invoice_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::types::{Client, FundingSource, Invoice, Payment, PaymentDetails};

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
    }

    fn units(n: i64) -> Cents {
        Cents::from_units(n).unwrap()
    }

    fn service() -> LedgerService<MemoryStore> {
        let mut s = MemoryStore::new();
        s.insert_client(Client::new("C1", "Acme"));
        s.insert_invoice(Invoice::new("INV-1", "C1", "2024-001", units(500), d(1)));
        LedgerService::new(s)
    }

    #[test]
    fn unknown_client_is_rejected_before_any_write() {
        let svc = service();
        let req = AllocationRequest::new(
            "NOPE",
            None,
            units(10),
            FundingSource::NewPayment,
            PaymentDetails::new(d(2)),
        );
        assert!(matches!(
            svc.allocate(&req),
            Err(LedgerError::Validation(ValidationError::UnknownClient { .. }))
        ));
        assert_eq!(svc.into_inner().write_count(), 0);
    }

    #[test]
    fn reads_for_unknown_ids_are_zero() {
        let svc = service();
        assert_eq!(svc.outstanding("NOPE").unwrap(), Cents::ZERO);
        assert_eq!(svc.unallocated_balance("NOPE").unwrap(), Cents::ZERO);
        assert_eq!(svc.payment_status("NOPE", d(2)).unwrap(), None);
    }

    #[test]
    fn statement_counts_unowned_payments_on_client_invoices() {
        let mut s = MemoryStore::new();
        s.insert_client(Client::new("C1", "Acme"));
        s.insert_invoice(Invoice::new("INV-1", "C1", "2024-001", units(500), d(1)));
        let mut p = Payment::allocated("p1", "C1", "INV-1", units(200), d(2));
        p.client_id = None;
        s.insert_payment(p);
        let svc = LedgerService::new(s);
        let st = svc.statement("C1", d(3)).unwrap();
        assert_eq!(st.invoices[0].total_paid, units(200));
        assert_eq!(st.invoices[0].status, PaymentStatus::Partial);
    }
}
