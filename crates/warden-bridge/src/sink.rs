// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Audit sinks — one newline-delimited file per calendar day, plus an
// in-memory sink that can be told to fail for fault-injection tests.

use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::NaiveDate;
use tracing::debug;
use warden_core::error::{Result, SecurityError};

use crate::traits::AuditSink;

/// Writes `audit-YYYY-MM-DD.jsonl` files into a directory.
#[derive(Debug, Clone)]
pub struct DailyFileSink {
    dir: PathBuf,
}

impl DailyFileSink {
    /// Use `dir` for log files, creating it if needed.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the log file for `day`.
    pub fn path_for(&self, day: NaiveDate) -> PathBuf {
        self.dir.join(format!("audit-{}.jsonl", day.format("%Y-%m-%d")))
    }
}

impl AuditSink for DailyFileSink {
    fn append_line(&self, day: NaiveDate, line: &str) -> Result<()> {
        let path = self.path_for(day);
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        // One write call per line keeps concurrent appenders from interleaving
        // within a line.
        let mut buf = Vec::with_capacity(line.len() + 1);
        buf.extend_from_slice(line.as_bytes());
        buf.push(b'\n');
        file.write_all(&buf)?;
        Ok(())
    }

    fn read_day(&self, day: NaiveDate) -> Result<Option<String>> {
        let path = self.path_for(day);
        match std::fs::read(&path) {
            Ok(bytes) => {
                debug!(path = %path.display(), bytes = bytes.len(), "audit log read");
                // A torn trailing write may leave invalid UTF-8; keep what we can.
                Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-memory day-partitioned sink.
#[derive(Debug, Default)]
pub struct MemorySink {
    days: Mutex<BTreeMap<NaiveDate, String>>,
    fail_writes: AtomicBool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent append fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.fail_writes.store(failing, Ordering::SeqCst);
    }

    /// Lines written for `day`.
    pub fn lines(&self, day: NaiveDate) -> Vec<String> {
        self.days
            .lock()
            .expect("sink lock poisoned")
            .get(&day)
            .map(|s| s.lines().map(str::to_owned).collect())
            .unwrap_or_default()
    }

    /// Replace the raw contents for `day`, e.g. to simulate a corrupt file.
    pub fn put_raw(&self, day: NaiveDate, contents: impl Into<String>) {
        self.days
            .lock()
            .expect("sink lock poisoned")
            .insert(day, contents.into());
    }
}

impl AuditSink for MemorySink {
    fn append_line(&self, day: NaiveDate, line: &str) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(SecurityError::Io(std::io::Error::other(
                "audit sink unavailable",
            )));
        }
        let mut days = self.days.lock().expect("sink lock poisoned");
        let entry = days.entry(day).or_default();
        entry.push_str(line);
        entry.push('\n');
        Ok(())
    }

    fn read_day(&self, day: NaiveDate) -> Result<Option<String>> {
        Ok(self
            .days
            .lock()
            .expect("sink lock poisoned")
            .get(&day)
            .cloned())
    }
}
