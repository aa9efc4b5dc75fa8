// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Domain payloads handed to the security subsystem by the host application.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{AuditEventType, Metadata};

/// One entry in a player's score history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreEntry {
    pub points: i64,
    pub reason: String,
    pub at: DateTime<Utc>,
}

/// Plain game state that the coordinator secures and retrieves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainData {
    pub player_id: String,
    pub score: i64,
    pub level: u32,
    /// Elapsed play time of the current session in seconds.
    pub duration_secs: f64,
    #[serde(default)]
    pub achievements: Vec<String>,
    #[serde(default)]
    pub preferences: BTreeMap<String, String>,
    /// Transaction-level detail. Never exposed through [`SecureRecord`].
    #[serde(default)]
    pub score_history: Vec<ScoreEntry>,
}

impl DomainData {
    pub fn new(player_id: impl Into<String>, score: i64, duration_secs: f64) -> Self {
        Self {
            player_id: player_id.into(),
            score,
            level: 1,
            duration_secs,
            achievements: Vec::new(),
            preferences: BTreeMap::new(),
            score_history: Vec::new(),
        }
    }
}

/// Reduced projection returned after securing [`DomainData`].
///
/// Carries aggregate statistics only; the full payload lives in `ciphertext`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecureRecord {
    pub player_id: String,
    pub score: i64,
    pub level: u32,
    pub achievement_count: usize,
    pub history_len: usize,
    /// Sum of positive score-history entries.
    pub total_earned: i64,
    /// Base64 of `nonce ‖ ciphertext ‖ tag`.
    pub ciphertext: String,
    /// SHA-256 hex digest of the base64 `ciphertext` string.
    pub content_hash: String,
    pub secured_at: DateTime<Utc>,
}

/// A domain event observed by the threat monitor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameEvent {
    pub event_type: AuditEventType,
    pub player_id: Option<String>,
    pub session_id: Option<String>,
    pub score_delta: Option<i64>,
    /// Time taken to earn `score_delta`.
    pub interval_secs: Option<f64>,
    /// Measured player reaction time.
    pub reaction_time_ms: Option<f64>,
    /// Outcome of the action, when it has one.
    pub success: Option<bool>,
    /// A decryption attempt on encrypted data failed.
    pub decryption_failed: bool,
    /// Whether the event itself deserves an audit record.
    pub security_relevant: bool,
    pub data: Metadata,
    pub timestamp: DateTime<Utc>,
}

impl GameEvent {
    pub fn new(event_type: AuditEventType, timestamp: DateTime<Utc>) -> Self {
        Self {
            event_type,
            player_id: None,
            session_id: None,
            score_delta: None,
            interval_secs: None,
            reaction_time_ms: None,
            success: None,
            decryption_failed: false,
            security_relevant: false,
            data: Metadata::new(),
            timestamp,
        }
    }

    pub fn player(mut self, player_id: impl Into<String>) -> Self {
        self.player_id = Some(player_id.into());
        self
    }

    pub fn score_change(mut self, delta: i64, interval_secs: f64) -> Self {
        self.score_delta = Some(delta);
        self.interval_secs = Some(interval_secs);
        self
    }

    pub fn reaction_time(mut self, millis: f64) -> Self {
        self.reaction_time_ms = Some(millis);
        self
    }

    pub fn outcome(mut self, success: bool) -> Self {
        self.success = Some(success);
        self
    }

    pub fn decryption_failure(mut self) -> Self {
        self.decryption_failed = true;
        self
    }

    pub fn security_relevant(mut self) -> Self {
        self.security_relevant = true;
        self
    }
}

/// Kind of operation performed on protected data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessOperation {
    Read,
    Write,
    Delete,
    Encrypt,
    Decrypt,
}

impl AccessOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Delete => "delete",
            Self::Encrypt => "encrypt",
            Self::Decrypt => "decrypt",
        }
    }
}

/// A single data-access request observed by the threat monitor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessRecord {
    pub resource: String,
    pub operation: AccessOperation,
    pub user_id: Option<String>,
    pub success: bool,
    pub timestamp: DateTime<Utc>,
}

impl AccessRecord {
    pub fn new(
        resource: impl Into<String>,
        operation: AccessOperation,
        user_id: Option<String>,
        success: bool,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            resource: resource.into(),
            operation,
            user_id,
            success,
            timestamp,
        }
    }
}

/// Category of a reported security incident.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentKind {
    DataTampering,
    UnauthorizedAccess,
    SuspiciousActivity,
    SystemCompromise,
}

impl IncidentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DataTampering => "data_tampering",
            Self::UnauthorizedAccess => "unauthorized_access",
            Self::SuspiciousActivity => "suspicious_activity",
            Self::SystemCompromise => "system_compromise",
        }
    }
}

/// An incident reported to the coordinator for response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityIncident {
    pub kind: IncidentKind,
    pub description: String,
    pub user_id: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl SecurityIncident {
    pub fn new(kind: IncidentKind, description: impl Into<String>) -> Self {
        Self {
            kind,
            description: description.into(),
            user_id: None,
            metadata: Metadata::new(),
        }
    }
}
