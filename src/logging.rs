//! Structured logging for the agent loop.
//!
//! Design goals:
//! 1. One JSON object per line, stdout always, per-run file when LOG_DIR is writable
//! 2. Module tags for filtering (signal_engine, decision, risk_guard, paper_exec, ...)
//! 3. Decision entries carry intent, reason, confidence and alternatives for audit
//! 4. Deterministic sequence numbers for ordering within a run

use chrono::Utc;
use serde_json::{json, Map, Value};
use std::fs::{create_dir_all, File};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};

// =============================================================================
// Levels
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Debug = 0,
    Info = 1,
    Warn = 2,
    Error = 3,
}

impl Level {
    pub fn from_env() -> Self {
        match std::env::var("LOG_LEVEL").as_deref() {
            Ok("debug") => Level::Debug,
            Ok("warn") => Level::Warn,
            Ok("error") => Level::Error,
            _ => Level::Info,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
        }
    }
}

// =============================================================================
// Run context
// =============================================================================

static LOG_SEQ: AtomicU64 = AtomicU64::new(0);
static RUN_CONTEXT: OnceLock<RunContext> = OnceLock::new();

fn next_seq() -> u64 {
    LOG_SEQ.fetch_add(1, Ordering::SeqCst)
}

struct RunContext {
    run_id: String,
    events: Option<Mutex<BufWriter<File>>>,
}

fn ensure_run_context() -> &'static RunContext {
    RUN_CONTEXT.get_or_init(|| {
        let run_id = std::env::var("RUN_ID")
            .unwrap_or_else(|_| format!("r-{}-{}", ts_epoch_ms(), process::id()));
        let base = std::env::var("LOG_DIR").unwrap_or_else(|_| "out/runs".to_string());
        let mut run_dir = PathBuf::from(base);
        run_dir.push(&run_id);
        let events = match create_dir_all(&run_dir)
            .and_then(|_| File::create(run_dir.join("events.jsonl")))
        {
            Ok(f) => Some(Mutex::new(BufWriter::new(f))),
            Err(err) => {
                eprintln!("[log] stdout only, no run dir: {}", err);
                None
            }
        };
        RunContext { run_id, events }
    })
}

// =============================================================================
// Core logging functions
// =============================================================================

/// RFC3339 timestamp with milliseconds.
pub fn ts_now() -> String {
    Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Epoch milliseconds.
pub fn ts_epoch_ms() -> u64 {
    Utc::now().timestamp_millis() as u64
}

/// Emit a structured entry at an explicit level.
pub fn log(level: Level, module: &str, fields: Map<String, Value>) {
    if level < Level::from_env() {
        return;
    }
    let ctx = ensure_run_context();
    let mut entry = Map::new();
    entry.insert("ts".to_string(), json!(ts_now()));
    entry.insert("run_id".to_string(), json!(ctx.run_id.clone()));
    entry.insert("seq".to_string(), json!(next_seq()));
    entry.insert("lvl".to_string(), json!(level.as_str()));
    entry.insert("module".to_string(), json!(module));
    for (k, v) in fields {
        entry.insert(k, v);
    }
    let line = Value::Object(entry).to_string();
    if let Some(events) = &ctx.events {
        if let Ok(mut w) = events.lock() {
            let _ = writeln!(w, "{}", line);
        }
    }
    println!("{}", line);
}

/// Info-level entry tagged with a module name.
pub fn json_log(module: &str, fields: Map<String, Value>) {
    log(Level::Info, module, fields);
}

/// Flush the run-file writer (called on shutdown).
pub fn flush() {
    if let Some(events) = &ensure_run_context().events {
        if let Ok(mut w) = events.lock() {
            let _ = w.flush();
        }
    }
}

// =============================================================================
// Decision audit entries
// =============================================================================

/// Log one decision-cycle outcome with the paths not taken.
pub fn log_decision(
    intent_id: &str,
    kind: &str,
    token: Option<&str>,
    reason: &str,
    confidence: f64,
    alternatives: &[&str],
) {
    let alts: Vec<Value> = alternatives.iter().map(|a| v_str(a)).collect();
    log(
        Level::Info,
        "decision",
        obj(&[
            ("intent_id", v_str(intent_id)),
            ("intent", v_str(kind)),
            ("token", token.map(v_str).unwrap_or(Value::Null)),
            ("reason", v_str(reason)),
            ("confidence", v_num(confidence)),
            ("alternatives", Value::Array(alts)),
        ]),
    );
}

// =============================================================================
// Helpers
// =============================================================================

/// Short deterministic hash for correlating log entries.
pub fn params_hash(input: &str) -> String {
    use std::hash::{Hash, Hasher};
    let mut h = std::collections::hash_map::DefaultHasher::new();
    input.hash(&mut h);
    format!("{:x}", h.finish())
}

pub fn obj(pairs: &[(&str, Value)]) -> Map<String, Value> {
    let mut map = Map::new();
    for (k, v) in pairs {
        map.insert((*k).to_string(), v.clone());
    }
    map
}

pub fn v_str(s: &str) -> Value {
    Value::String(s.to_string())
}

pub fn v_num(n: f64) -> Value {
    json!(n)
}

pub fn v_bool(b: bool) -> Value {
    Value::Bool(b)
}

// =============================================================================
// Tests
// =============================================================================
