//! Command handlers for bdk-cli.
//!
//! Shared context (config, db connection, audit writer) lives here.
//! Command-specific logic lives in the submodules.

pub mod ledger;
pub mod reconcile;

use anyhow::{bail, Context, Result};
use bdk_audit::{verify_hash_chain, AuditWriter, VerifyResult};
use bdk_config::{report_unused_keys, LedgerConfig, LoadedConfig, UnusedKeyPolicy};
use bdk_ledger::LedgerPlan;
use chrono::{NaiveDate, Utc};
use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

/// Loaded configuration shared by every command.
pub struct Ctx {
    pub loaded: LoadedConfig,
    pub cfg: LedgerConfig,
}

impl Ctx {
    pub fn load(config_paths: &[String]) -> Result<Self> {
        let loaded = if config_paths.is_empty() {
            LoadedConfig::empty()?
        } else {
            let refs: Vec<&str> = config_paths.iter().map(|s| s.as_str()).collect();
            bdk_config::load_layered_yaml(&refs)?
        };
        let report = report_unused_keys(&loaded.config_json, UnusedKeyPolicy::Warn)?;
        for pointer in &report.unused_leaf_pointers {
            warn!(pointer = %pointer, "config key is not used by bdk");
        }
        let cfg = LedgerConfig::from_config_json(&loaded.config_json)?;
        Ok(Self { loaded, cfg })
    }

    /// Connect using the env var named by `/db/url_env`.
    pub async fn connect(&self) -> Result<PgPool> {
        let url = bdk_config::secrets::resolve_database_url(&self.loaded.config_json)?;
        bdk_db::connect(&url, self.cfg.db_max_connections).await
    }

    pub fn audit_writer(&self) -> Result<AuditWriter> {
        AuditWriter::resume(&self.cfg.audit_path, self.cfg.audit_hash_chain)
    }

    /// Append the audit event for a written plan. Passed to `bdk_db` as the
    /// before-commit step, so an append failure rolls the plan back.
    ///
    /// A plan whose commit failed after its event was written is recorded
    /// once: retrying the same request id finds the event already there.
    pub fn record(&self, plan: &LedgerPlan) -> Result<()> {
        if plan.is_empty() {
            return Ok(());
        }
        let mut payload = plan.audit_payload();
        payload["config_hash"] = serde_json::Value::String(self.loaded.config_hash.clone());
        let mut writer = self.audit_writer()?;
        let written = writer
            .append_once(plan.request_id, plan.kind.topic(), plan.kind.event_type(), payload)
            .with_context(|| format!("audit append failed for request {}", plan.request_id))?;
        match written {
            Some(ev) => {
                info!(event_id = %ev.event_id, seq = ev.seq, event_type = %ev.event_type, "audit event written")
            }
            None => {
                info!(request_id = %plan.request_id, "audit event already recorded for retried request")
            }
        }
        Ok(())
    }
}

pub fn parse_request_id(raw: Option<&str>) -> Result<Uuid> {
    match raw {
        Some(s) => Uuid::parse_str(s.trim()).context("invalid --request-id uuid"),
        None => Ok(Uuid::new_v4()),
    }
}

/// `YYYY-MM-DD`, or today (UTC) when absent.
pub fn parse_date(raw: Option<&str>, flag: &str) -> Result<NaiveDate> {
    match raw {
        Some(s) => NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
            .with_context(|| format!("invalid {flag} '{s}': expected YYYY-MM-DD")),
        None => Ok(Utc::now().date_naive()),
    }
}

pub fn verify_audit(ctx: &Ctx, path: Option<&str>) -> Result<()> {
    let path = path.unwrap_or(&ctx.cfg.audit_path);
    match verify_hash_chain(path)? {
        VerifyResult::Valid { lines } => {
            println!("audit_valid=true lines={lines} path={path}");
            Ok(())
        }
        VerifyResult::Broken { line, reason } => {
            bail!("AUDIT_CHAIN_BROKEN path={path} line={line}: {reason}")
        }
    }
}
