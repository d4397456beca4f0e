//! bdk-reconcile
//!
//! Integrity sweep and repairs over the whole payment store.
//! - Orphaned document references are reported, never deleted
//! - Missing owners are recovered only through a resolvable invoice
//! - Settlement flags are re-derived from `document_id` (idempotent)
//! - Legacy embedded payments migrate write, verify, then clear
//!
//! Scans are pure functions over a [`RecordSet`]; repairs go through
//! `LedgerService` so they respect per-client serialization.

mod engine;
mod migrate;
mod repair;
mod types;

pub use engine::{
    find_orphaned_payments, find_unowned_payments, reconcile_settlement_flags, sweep, UnownedScan,
};
pub use migrate::{
    legacy_payment_id, migrate_legacy, migrate_legacy_embedded_payments, migrated_total,
    plan_legacy_migration, MigrationOutcome,
};
pub use repair::{
    apply_owner_repairs, apply_settlement_corrections, plan_owner_repair,
    plan_settlement_correction, settlement_lock_key, LOCK_KEY_ATTEMPTS,
};
pub use types::*;
