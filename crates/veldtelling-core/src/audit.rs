//! Line-delimited JSON audit trail of match attempts.
//!
//! Rows are serialised on the calling thread but written by a dedicated
//! worker, so matching never blocks on log I/O. The log is append-only; a
//! file grown past the ceiling is truncated on open.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::thread::JoinHandle;

use chrono::{DateTime, Utc};
use crossbeam_channel::Sender;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::warn;

use crate::types::MatchResult;

/// One audit row, one JSON object per line.
#[derive(Debug, Serialize)]
pub struct AuditRecord {
    pub timestamp: DateTime<Utc>,
    /// Raw input as delivered by the host ASR.
    pub raw: String,
    pub result_type: &'static str,
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<u64>,
    pub hypotheses: Vec<AuditHypothesis>,
    /// Candidate or multi-match details: the full result, serialised.
    pub details: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub struct AuditHypothesis {
    pub text: String,
    pub confidence: f64,
}

impl AuditRecord {
    pub fn of(
        raw: &str,
        session_id: Option<u64>,
        hypotheses: &[(String, f64)],
        result: &MatchResult,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            raw: raw.to_owned(),
            result_type: result.kind(),
            source: result.source().to_owned(),
            session_id,
            hypotheses: hypotheses
                .iter()
                .map(|(text, confidence)| AuditHypothesis {
                    text: text.clone(),
                    confidence: *confidence,
                })
                .collect(),
            details: serde_json::to_value(result).unwrap_or(serde_json::Value::Null),
        }
    }
}

enum AuditMsg {
    Line(String),
    Shutdown,
}

/// Append-only JSONL writer with its own worker thread.
pub struct AuditLog {
    tx: Sender<AuditMsg>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl AuditLog {
    /// Opens (or truncates, above `ceiling_bytes`) the log at `path` and
    /// starts the writer.
    pub fn open(path: PathBuf, ceiling_bytes: u64) -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        let worker = std::thread::Builder::new()
            .name("match-audit".into())
            .spawn(move || {
                let mut writer = open_writer(&path, ceiling_bytes);
                while let Ok(msg) = rx.recv() {
                    match msg {
                        AuditMsg::Shutdown => break,
                        AuditMsg::Line(line) => {
                            if let Some(w) = writer.as_mut() {
                                if writeln!(w, "{line}").and_then(|_| w.flush()).is_err() {
                                    warn!("audit line dropped; disabling audit writer");
                                    writer = None;
                                }
                            }
                        }
                    }
                }
            })
            .expect("spawn match-audit worker");
        Self {
            tx,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Queues one audit row. Never blocks, never fails the caller.
    pub fn record(&self, record: &AuditRecord) {
        match serde_json::to_string(record) {
            Ok(line) => {
                let _ = self.tx.send(AuditMsg::Line(line));
            }
            Err(e) => warn!(error = %e, "audit record not serialisable"),
        }
    }

    pub fn shutdown(&self) {
        let _ = self.tx.send(AuditMsg::Shutdown);
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for AuditLog {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn open_writer(path: &PathBuf, ceiling_bytes: u64) -> Option<BufWriter<File>> {
    if let Some(parent) = path.parent() {
        if let Err(e) = fs::create_dir_all(parent) {
            warn!(error = %e, "audit directory not created");
            return None;
        }
    }
    let oversized = fs::metadata(path).map(|m| m.len() > ceiling_bytes).unwrap_or(false);
    let mut options = OpenOptions::new();
    options.create(true);
    if oversized {
        options.write(true).truncate(true);
    } else {
        options.append(true);
    }
    match options.open(path) {
        Ok(file) => Some(BufWriter::new(file)),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "audit log not opened");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MatchResult;

    #[test]
    fn writes_one_json_object_per_line() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = tmp.path().join("match_audit.jsonl");
        let log = AuditLog::open(path.clone(), 1024 * 1024);

        let result = MatchResult::no_match("vijf", "none");
        log.record(&AuditRecord::of(
            "vijf",
            Some(3),
            &[("vijf".to_owned(), 0.95)],
            &result,
        ));
        log.record(&AuditRecord::of("fuut", None, &[], &result));
        log.shutdown();

        let content = std::fs::read_to_string(&path).expect("read log");
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let row: serde_json::Value = serde_json::from_str(lines[0]).expect("valid json");
        assert_eq!(row["result_type"], "no_match");
        assert_eq!(row["raw"], "vijf");
        assert_eq!(row["session_id"], 3);
        assert_eq!(row["hypotheses"][0]["confidence"], 0.95);
    }

    #[test]
    fn oversized_log_is_truncated_on_open() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = tmp.path().join("match_audit.jsonl");
        std::fs::write(&path, vec![b'x'; 4096]).expect("prefill");

        let log = AuditLog::open(path.clone(), 1024);
        let result = MatchResult::no_match("fuut", "none");
        log.record(&AuditRecord::of("fuut", None, &[], &result));
        log.shutdown();

        let content = std::fs::read_to_string(&path).expect("read log");
        assert!(content.len() < 4096, "old content gone");
        assert_eq!(content.lines().count(), 1);
    }
}
