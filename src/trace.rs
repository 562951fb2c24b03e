// Trace recorder: append-only JSONL sink with a single-writer invariant.

use crate::core::models::{PiiType, Verdict};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

#[derive(Debug, Serialize)]
pub struct TraceRecord {
    pub ts: f64,
    pub session_id: String,
    pub tool_name: String,
    pub verdict: Verdict,
    pub rule_id: String,
    pub pii_types: Vec<PiiType>,
    pub message: String,
    pub args_hash: String,
}

struct WriterState {
    file: File,
    buffer: Vec<String>,
}

/// Append-only JSONL sink. `record()` buffers; `flush()` writes the buffer
/// to disk under a single exclusive lock. Appends to an existing file on
/// restart rather than truncating.
pub struct TraceRecorder {
    writer: Mutex<WriterState>,
    flush_threshold: usize,
}

impl TraceRecorder {
    pub fn open<P: AsRef<Path>>(path: P, flush_threshold: usize) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: Mutex::new(WriterState { file, buffer: Vec::new() }),
            flush_threshold,
        })
    }

    /// Buffers one trace line; flushes automatically once the buffer
    /// reaches `flush_threshold` entries.
    pub fn record(&self, record: &TraceRecord) {
        let line = serde_json::to_string(record).unwrap_or_default();
        tracing::info!(target: "trace", tool = %record.tool_name, verdict = ?record.verdict, rule_id = %record.rule_id, "decision traced");
        let mut state = self.writer.lock().unwrap();
        state.buffer.push(line);
        if state.buffer.len() >= self.flush_threshold {
            flush_locked(&mut state);
        }
    }

    /// Forces a flush regardless of buffer size.
    pub fn flush(&self) {
        let mut state = self.writer.lock().unwrap();
        flush_locked(&mut state);
    }
}

fn flush_locked(state: &mut WriterState) {
    if state.buffer.is_empty() {
        return;
    }
    for line in state.buffer.drain(..) {
        if let Err(e) = writeln!(state.file, "{line}") {
            tracing::warn!(error = %e, "trace flush failed, will retry on next flush");
            return;
        }
    }
    let _ = state.file.flush();
}

/// Stable content hash of a tool call's args, used as `args_hash` in trace
/// records rather than logging raw (potentially sensitive) argument values.
pub fn hash_args(args: &serde_json::Value) -> String {
    let canonical = serde_json::to_vec(args).unwrap_or_default();
    let digest = Sha256::digest(&canonical);
    hex::encode(digest)
}
