// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for Warden.

use thiserror::Error;

/// Failures of the authenticated-encryption primitive.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncryptionError {
    #[error("encryption key unavailable")]
    KeyUnavailable,

    #[error("invalid encrypted data: {0}")]
    InvalidData(String),

    #[error("decryption failed: authentication tag mismatch")]
    DecryptionFailed,

    #[error("encryption failed: {0}")]
    EncryptionFailed(String),
}

/// Policy violations reported by the compliance engine.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ComplianceError {
    #[error("payload too large: {size} bytes exceeds the {max} byte limit")]
    DataTooLarge { size: usize, max: usize },

    #[error("invalid payload format: {0}")]
    InvalidFormat(String),

    #[error("payload must be encrypted before storage")]
    EncryptionRequired,

    #[error("invalid score: {0}")]
    InvalidScore(i64),

    #[error("invalid session duration: {0}s")]
    InvalidDuration(f64),

    #[error("invalid player data: {0}")]
    InvalidPlayerData(String),

    #[error("retention policy violated: {0}")]
    RetentionViolation(String),

    #[error("rule `{rule}` failed: {reason}")]
    PolicyViolation { rule: String, reason: String },
}

/// Top-level error type for all Warden operations.
#[derive(Debug, Error)]
pub enum SecurityError {
    // -- Coordinator state --
    #[error("security subsystem not initialized")]
    NotInitialized,

    #[error("encrypted payload failed validation")]
    EncryptionValidationFailed,

    #[error("invalid data format: {0}")]
    InvalidDataFormat(String),

    #[error("integrity check failed: expected {expected}, got {actual}")]
    IntegrityViolation { expected: String, actual: String },

    // -- Component errors --
    #[error(transparent)]
    Encryption(#[from] EncryptionError),

    #[error(transparent)]
    Compliance(#[from] ComplianceError),

    // -- Storage / persistence --
    #[error("secure storage error: {0}")]
    Storage(String),

    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, SecurityError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn component_errors_convert_into_security_error() {
        let err: SecurityError = EncryptionError::DecryptionFailed.into();
        assert!(matches!(
            err,
            SecurityError::Encryption(EncryptionError::DecryptionFailed)
        ));

        let err: SecurityError = ComplianceError::EncryptionRequired.into();
        assert_eq!(err.to_string(), "payload must be encrypted before storage");
    }

    #[test]
    fn too_large_message_names_both_sizes() {
        let err = ComplianceError::DataTooLarge { size: 10, max: 4 };
        assert_eq!(
            err.to_string(),
            "payload too large: 10 bytes exceeds the 4 byte limit"
        );
    }
}
