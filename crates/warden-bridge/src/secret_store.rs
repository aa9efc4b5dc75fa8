// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Secret stores — a SQLite-backed store for desktop builds and an in-memory
// store for tests.
//
// Schema:
//   secrets(
//     key        TEXT PRIMARY KEY,
//     value      BLOB NOT NULL,
//     updated_at TEXT NOT NULL   -- RFC 3339
//   )

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, instrument};
use warden_core::error::{Result, SecurityError};

use crate::traits::SecretStore;

const CREATE_TABLE_SQL: &str = "CREATE TABLE IF NOT EXISTS secrets (
    key        TEXT PRIMARY KEY,
    value      BLOB NOT NULL,
    updated_at TEXT NOT NULL
);";

/// Convert a `rusqlite::Error` into a `SecurityError::Storage`.
fn db_err(e: rusqlite::Error) -> SecurityError {
    SecurityError::Storage(e.to_string())
}

/// Secret store backed by a local SQLite database.
///
/// `rusqlite::Connection` is `Send` but not `Sync`, so it sits behind a
/// mutex to satisfy the `SecretStore` bound.
pub struct SqliteSecretStore {
    conn: Mutex<Connection>,
}

impl SqliteSecretStore {
    /// Open (or create) the secret database at `path`.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path).map_err(db_err)?;

        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(db_err)?;
        conn.execute_batch(CREATE_TABLE_SQL).map_err(db_err)?;

        debug!("secret store opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory secret database (useful for tests).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        conn.execute_batch(CREATE_TABLE_SQL).map_err(db_err)?;

        debug!("in-memory secret store opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl SecretStore for SqliteSecretStore {
    fn store_secret(&self, key: &str, value: &[u8]) -> Result<()> {
        let conn = self.conn.lock().expect("secret store lock poisoned");
        conn.execute(
            "INSERT INTO secrets (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, Utc::now().to_rfc3339()],
        )
        .map_err(db_err)?;
        debug!(%key, "secret stored");
        Ok(())
    }

    fn load_secret(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let conn = self.conn.lock().expect("secret store lock poisoned");
        conn.query_row(
            "SELECT value FROM secrets WHERE key = ?1",
            params![key],
            |row| row.get::<_, Vec<u8>>(0),
        )
        .optional()
        .map_err(db_err)
    }

    fn delete_secret(&self, key: &str) -> Result<()> {
        let conn = self.conn.lock().expect("secret store lock poisoned");
        conn.execute("DELETE FROM secrets WHERE key = ?1", params![key])
            .map_err(db_err)?;
        Ok(())
    }
}

/// Process-local secret store. Contents vanish with the value.
#[derive(Debug, Default)]
pub struct MemorySecretStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SecretStore for MemorySecretStore {
    fn store_secret(&self, key: &str, value: &[u8]) -> Result<()> {
        self.entries
            .lock()
            .expect("secret store lock poisoned")
            .insert(key.to_owned(), value.to_vec());
        Ok(())
    }

    fn load_secret(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self
            .entries
            .lock()
            .expect("secret store lock poisoned")
            .get(key)
            .cloned())
    }

    fn delete_secret(&self, key: &str) -> Result<()> {
        self.entries
            .lock()
            .expect("secret store lock poisoned")
            .remove(key);
        Ok(())
    }
}
