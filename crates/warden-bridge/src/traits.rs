// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Environment seams consumed by the security subsystem.
//
// The subsystem touches the outside world through exactly three facilities:
// a byte-oriented secret store, a clock, and an append-only audit sink.

use chrono::{DateTime, NaiveDate, Utc};
use warden_core::error::Result;

/// Byte-oriented key/value storage for secrets (platform keychain / keystore).
pub trait SecretStore: Send + Sync {
    /// Store a secret under the given key, replacing any previous value.
    fn store_secret(&self, key: &str, value: &[u8]) -> Result<()>;

    /// Retrieve a secret by key. Returns None if not found.
    fn load_secret(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Delete a secret by key. Deleting a missing key is not an error.
    fn delete_secret(&self, key: &str) -> Result<()>;
}

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Calendar day (UTC) used to select the audit log file.
    fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }
}

/// Append-only, day-partitioned line sink for the audit log.
pub trait AuditSink: Send + Sync {
    /// Append one line (without trailing newline) to the log for `day`.
    fn append_line(&self, day: NaiveDate, line: &str) -> Result<()>;

    /// Read the full contents of the log for `day`, if it exists.
    fn read_day(&self, day: NaiveDate) -> Result<Option<String>>;
}
