// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Warden — Environment bridge.
//
// Defines the traits through which the security subsystem reaches its
// environment (secret storage, time, audit files) together with desktop and
// in-memory implementations of each.

pub mod clock;
pub mod secret_store;
pub mod sink;
pub mod traits;

use std::sync::Arc;

pub use clock::{ManualClock, SystemClock};
pub use secret_store::{MemorySecretStore, SqliteSecretStore};
pub use sink::{DailyFileSink, MemorySink};
pub use traits::{AuditSink, Clock, SecretStore};

/// The three facilities the security subsystem consumes, bundled for wiring.
#[derive(Clone)]
pub struct Environment {
    pub secrets: Arc<dyn SecretStore>,
    pub clock: Arc<dyn Clock>,
    pub sink: Arc<dyn AuditSink>,
}

impl Environment {
    /// Desktop environment rooted at `data_dir`: `secrets.db` for key
    /// material and `audit/` for the daily log files.
    pub fn on_disk(data_dir: impl AsRef<std::path::Path>) -> warden_core::Result<Self> {
        let dir = data_dir.as_ref();
        std::fs::create_dir_all(dir)?;
        Ok(Self {
            secrets: Arc::new(SqliteSecretStore::open(dir.join("secrets.db"))?),
            clock: Arc::new(SystemClock),
            sink: Arc::new(DailyFileSink::new(dir.join("audit"))?),
        })
    }

    /// Fully in-memory environment driven by a manual clock.
    pub fn in_memory(clock: Arc<ManualClock>) -> Self {
        Self {
            secrets: Arc::new(MemorySecretStore::new()),
            clock,
            sink: Arc::new(MemorySink::new()),
        }
    }
}
