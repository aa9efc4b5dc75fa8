// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Warden — Core types, configuration, and error definitions shared across all crates.

pub mod config;
pub mod domain;
pub mod error;
pub mod types;

pub use config::SecurityConfig;
pub use domain::*;
pub use error::{ComplianceError, EncryptionError, Result, SecurityError};
pub use types::*;
