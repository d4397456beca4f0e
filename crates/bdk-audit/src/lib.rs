//! Append-only ledger audit log.
//!
//! One JSON object per line, keys sorted. With the hash chain enabled every
//! event carries `hash_prev` (the previous event's `hash_self`) and its own
//! `hash_self`, so an edited, dropped or reordered line breaks verification.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Namespace for deterministic event ids.
const EVENT_ID_NAMESPACE: Uuid = Uuid::from_u128(0x5d0c_41f7_93b2_4a8e_b1c6_7e2f_0a94_d311);

pub struct AuditWriter {
    path: PathBuf,
    hash_chain: bool,
    last_hash: Option<String>,
    /// Number of events in the log; the next event's seq.
    seq: u64,
    /// [`event_key`] of every event in the log.
    recorded: HashSet<String>,
}

impl AuditWriter {
    /// Fresh writer. Creates parent dirs; does not read an existing file.
    pub fn new(path: impl AsRef<Path>, hash_chain: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("create_dir_all {:?}", parent))?;
            }
        }

        Ok(Self {
            path,
            hash_chain,
            last_hash: None,
            seq: 0,
            recorded: HashSet::new(),
        })
    }

    /// Writer continuing an existing log: seq, last hash and the recorded
    /// event keys are restored from the file.
    pub fn resume(path: impl AsRef<Path>, hash_chain: bool) -> Result<Self> {
        let mut writer = Self::new(path, hash_chain)?;
        if !writer.path.exists() {
            return Ok(writer);
        }
        let content = fs::read_to_string(&writer.path)
            .with_context(|| format!("read audit log {:?}", writer.path))?;
        for parsed in parse_events(&content) {
            let (_, ev) = parsed?;
            writer
                .recorded
                .insert(event_key(ev.request_id, &ev.event_type, &ev.payload)?);
            writer.seq += 1;
            writer.last_hash = ev.hash_self;
        }
        Ok(writer)
    }

    /// `hash_self` of the last event, when chained.
    pub fn last_hash(&self) -> Option<&str> {
        self.last_hash.as_deref()
    }

    /// Seq the next event gets.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// True when an event with the same request, type and payload is
    /// already in the log this writer was resumed from or appended to.
    pub fn contains(&self, request_id: Uuid, event_type: &str, payload: &Value) -> Result<bool> {
        Ok(self
            .recorded
            .contains(&event_key(request_id, event_type, payload)?))
    }

    /// Like [`AuditWriter::append`], but `None` when the same event is
    /// already recorded, so a request retried after a failed commit is
    /// recorded once.
    pub fn append_once(
        &mut self,
        request_id: Uuid,
        topic: &str,
        event_type: &str,
        payload: Value,
    ) -> Result<Option<AuditEvent>> {
        if self.contains(request_id, event_type, &payload)? {
            return Ok(None);
        }
        self.append(request_id, topic, event_type, payload).map(Some)
    }

    /// Append one event for the ledger request `request_id`.
    pub fn append(
        &mut self,
        request_id: Uuid,
        topic: &str,
        event_type: &str,
        payload: Value,
    ) -> Result<AuditEvent> {
        let ts_utc = Utc::now();
        let event_id = derive_event_id(self.last_hash.as_deref(), &payload, self.seq)?;

        let mut ev = AuditEvent {
            event_id,
            request_id,
            seq: self.seq,
            ts_utc,
            topic: topic.to_string(),
            event_type: event_type.to_string(),
            payload,
            hash_prev: None,
            hash_self: None,
        };

        if self.hash_chain {
            ev.hash_prev = self.last_hash.clone();
            ev.hash_self = Some(compute_event_hash(&ev)?);
        }

        let key = event_key(request_id, &ev.event_type, &ev.payload)?;
        let line = canonical_json_line(&ev)?;
        append_line(&self.path, &line)?;

        // Advance only once the line is on disk.
        self.seq += 1;
        self.recorded.insert(key);
        if self.hash_chain {
            self.last_hash = ev.hash_self.clone();
        }
        Ok(ev)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: Uuid,
    pub request_id: Uuid,
    pub seq: u64,
    pub ts_utc: DateTime<Utc>,
    pub topic: String,
    pub event_type: String,
    pub payload: Value,
    pub hash_prev: Option<String>,
    pub hash_self: Option<String>,
}

/// uuid v5 over previous hash, canonical payload and seq. No RNG, so a
/// replayed log derives the same ids.
pub fn derive_event_id(last_hash: Option<&str>, payload: &Value, seq: u64) -> Result<Uuid> {
    let canonical = serde_json::to_string(&sort_keys(payload)).context("json stringify failed")?;
    let name = format!("{}|{}|{}", last_hash.unwrap_or("GENESIS"), canonical, seq);
    Ok(Uuid::new_v5(&EVENT_ID_NAMESPACE, name.as_bytes()))
}

/// Non-blank lines of a JSONL log, parsed, with their 1-based line number.
fn parse_events(content: &str) -> impl Iterator<Item = Result<(usize, AuditEvent)>> + '_ {
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            serde_json::from_str(line.trim())
                .map(|ev| (i + 1, ev))
                .with_context(|| format!("parse audit event at line {}", i + 1))
        })
}

/// Identity of an event apart from its position in the log.
fn event_key(request_id: Uuid, event_type: &str, payload: &Value) -> Result<String> {
    let canonical = serde_json::to_string(&sort_keys(payload)).context("json stringify failed")?;
    let digest = hex::encode(Sha256::digest(canonical.as_bytes()));
    Ok(format!("{request_id}|{event_type}|{digest}"))
}

fn append_line(path: &Path, line: &str) -> Result<()> {
    let mut f = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open audit log {:?}", path))?;
    f.write_all(line.as_bytes())
        .context("write audit line failed")?;
    f.write_all(b"\n").context("write newline failed")?;
    f.flush().context("flush audit log failed")?;
    Ok(())
}

fn canonical_json_line<T: Serialize>(v: &T) -> Result<String> {
    let raw = serde_json::to_value(v).context("serialize audit event failed")?;
    serde_json::to_string(&sort_keys(&raw)).context("json stringify failed")
}

fn sort_keys(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut out = serde_json::Map::new();
            for k in keys {
                out.insert(k.clone(), sort_keys(&map[k]));
            }
            Value::Object(out)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sort_keys).collect()),
        _ => v.clone(),
    }
}

/// sha256 of the canonical event with `hash_self` blanked.
pub fn compute_event_hash(ev: &AuditEvent) -> Result<String> {
    let mut unsealed = ev.clone();
    unsealed.hash_self = None;

    let canonical = canonical_json_line(&unsealed)?;
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

pub fn verify_hash_chain(path: impl AsRef<Path>) -> Result<VerifyResult> {
    let content = fs::read_to_string(path.as_ref())
        .with_context(|| format!("read audit log {:?}", path.as_ref()))?;
    verify_hash_chain_str(&content)
}

/// Verify JSONL content already in memory.
pub fn verify_hash_chain_str(content: &str) -> Result<VerifyResult> {
    let mut prev_hash: Option<String> = None;
    let mut expected_seq = 0u64;
    for parsed in parse_events(content) {
        let (line, ev) = parsed?;
        if let Some(reason) = chain_break(&ev, expected_seq, prev_hash.as_deref())? {
            return Ok(VerifyResult::Broken { line, reason });
        }
        prev_hash = ev.hash_self;
        expected_seq += 1;
    }
    Ok(VerifyResult::Valid {
        lines: expected_seq as usize,
    })
}

/// Why `ev` does not continue a chain at `expected_seq` after `prev_hash`.
fn chain_break(ev: &AuditEvent, expected_seq: u64, prev_hash: Option<&str>) -> Result<Option<String>> {
    if ev.seq != expected_seq {
        return Ok(Some(format!("seq gap: expected {expected_seq}, got {}", ev.seq)));
    }
    if ev.hash_prev.as_deref() != prev_hash {
        return Ok(Some(format!(
            "hash_prev mismatch: expected {prev_hash:?}, got {:?}",
            ev.hash_prev
        )));
    }
    match &ev.hash_self {
        Some(claimed) => {
            let recomputed = compute_event_hash(ev)?;
            Ok((*claimed != recomputed)
                .then(|| format!("hash_self mismatch: claimed {claimed}, recomputed {recomputed}")))
        }
        None => Ok(None),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyResult {
    Valid { lines: usize },
    /// First bad line (1-based) and why.
    Broken { line: usize, reason: String },
}

impl VerifyResult {
    pub fn is_valid(&self) -> bool {
        matches!(self, VerifyResult::Valid { .. })
    }
}
