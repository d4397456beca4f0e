//! Runtime secret resolution.
//!
//! Config YAML stores only env var NAMES (e.g. `db.url_env: "BDK_DATABASE_URL"`).
//! Values are read from the environment once, at startup, and are redacted
//! in `Debug` output. Errors name the variable, never its value.

use anyhow::{bail, Result};
use serde_json::Value;

/// Env var read for the database URL when the config names none.
pub const DEFAULT_DATABASE_URL_ENV: &str = "BDK_DATABASE_URL";

/// Secrets resolved from the environment.
#[derive(Clone)]
pub struct ResolvedSecrets {
    /// Name of the env var the URL came from.
    pub database_url_env: String,
    pub database_url: Option<String>,
}

impl std::fmt::Debug for ResolvedSecrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedSecrets")
            .field("database_url_env", &self.database_url_env)
            .field(
                "database_url",
                &self.database_url.as_ref().map(|_| "<REDACTED>"),
            )
            .finish()
    }
}

fn read_str_at(config: &Value, pointer: &str) -> Option<String> {
    let s = config.pointer(pointer)?.as_str()?;
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn resolve_env(var_name: &str) -> Option<String> {
    match std::env::var(var_name) {
        Ok(v) if !v.trim().is_empty() => Some(v),
        _ => None,
    }
}

/// Env var name holding the database URL.
pub fn database_url_env(config_json: &Value) -> String {
    read_str_at(config_json, "/db/url_env").unwrap_or_else(|| DEFAULT_DATABASE_URL_ENV.to_string())
}

/// Resolve every secret; missing values stay `None`.
pub fn resolve_secrets(config_json: &Value) -> ResolvedSecrets {
    let database_url_env = database_url_env(config_json);
    let database_url = resolve_env(&database_url_env);
    ResolvedSecrets {
        database_url_env,
        database_url,
    }
}

/// The database URL, required.
pub fn resolve_database_url(config_json: &Value) -> Result<String> {
    let secrets = resolve_secrets(config_json);
    match secrets.database_url {
        Some(url) => Ok(url),
        None => bail!(
            "SECRETS_MISSING: required env var '{}' (database url) is not set or empty",
            secrets.database_url_env
        ),
    }
}
