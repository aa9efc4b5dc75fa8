// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core audit and classification types for the Warden security subsystem.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for an audit event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(pub Uuid);

impl EventId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of occurrence captured by an audit event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    GameStart,
    GameEnd,
    ScoreUpdate,
    LevelProgress,
    DataAccess,
    DataModification,
    SecurityAlert,
    ComplianceCheck,
    Authentication,
    Authorization,
}

impl AuditEventType {
    /// Wire keyword, identical to the serde representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GameStart => "game_start",
            Self::GameEnd => "game_end",
            Self::ScoreUpdate => "score_update",
            Self::LevelProgress => "level_progress",
            Self::DataAccess => "data_access",
            Self::DataModification => "data_modification",
            Self::SecurityAlert => "security_alert",
            Self::ComplianceCheck => "compliance_check",
            Self::Authentication => "authentication",
            Self::Authorization => "authorization",
        }
    }
}

/// Severity attached to audit events, threat patterns, and alerts.
///
/// Ordered from least to most severe so `max()` picks the worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

/// Dynamically-shaped metadata value.
///
/// Serialized untagged so the JSON form is the plain value. Integers are tried
/// before floats, which keeps `100` an `Int` after a round trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetaValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Array(Vec<MetaValue>),
    Map(BTreeMap<String, MetaValue>),
}

/// Free-form key/value map carried by audit events.
pub type Metadata = BTreeMap<String, MetaValue>;

impl MetaValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }
}

impl From<bool> for MetaValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for MetaValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<u64> for MetaValue {
    fn from(v: u64) -> Self {
        i64::try_from(v).map(Self::Int).unwrap_or(Self::Float(v as f64))
    }
}

impl From<usize> for MetaValue {
    fn from(v: usize) -> Self {
        Self::from(v as u64)
    }
}

impl From<u32> for MetaValue {
    fn from(v: u32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<f64> for MetaValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for MetaValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_owned())
    }
}

impl From<String> for MetaValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl<T: Into<MetaValue>> From<Vec<T>> for MetaValue {
    fn from(v: Vec<T>) -> Self {
        Self::Array(v.into_iter().map(Into::into).collect())
    }
}

impl From<Metadata> for MetaValue {
    fn from(v: Metadata) -> Self {
        Self::Map(v)
    }
}

/// Build a [`Metadata`] map from `key => value` pairs.
#[macro_export]
macro_rules! metadata {
    () => { $crate::types::Metadata::new() };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut map = $crate::types::Metadata::new();
        $( map.insert(($key).to_string(), $crate::types::MetaValue::from($value)); )+
        map
    }};
}

/// Immutable record of a single security-relevant occurrence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: EventId,
    pub timestamp: DateTime<Utc>,
    pub event_type: AuditEventType,
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub game_data: Option<Metadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
    /// Network context. Never populated by a local deployment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

impl AuditEvent {
    /// Look up a metadata entry by key.
    pub fn meta(&self, key: &str) -> Option<&MetaValue> {
        self.metadata.as_ref().and_then(|m| m.get(key))
    }
}

/// What a payload is for, which decides how the compliance engine checks it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataPurpose {
    GameState,
    Analytics,
    AuditLog,
    UserPreferences,
    Achievements,
    SecureGameData,
}

/// Structural shape a payload must have for its purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadFormat {
    /// Parseable JSON document.
    Json,
    /// A log line: leading ISO-8601 timestamp, or JSON.
    LogLine,
    /// Base64-encoded ciphertext.
    Ciphertext,
}

impl DataPurpose {
    pub const ALL: [DataPurpose; 6] = [
        Self::GameState,
        Self::Analytics,
        Self::AuditLog,
        Self::UserPreferences,
        Self::Achievements,
        Self::SecureGameData,
    ];

    pub fn format(&self) -> PayloadFormat {
        match self {
            Self::GameState | Self::Analytics => PayloadFormat::Json,
            Self::AuditLog => PayloadFormat::LogLine,
            Self::UserPreferences | Self::Achievements | Self::SecureGameData => {
                PayloadFormat::Ciphertext
            }
        }
    }

    /// Whether payloads for this purpose must never be stored in clear form.
    pub fn requires_encryption(&self) -> bool {
        self.format() == PayloadFormat::Ciphertext
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GameState => "game_state",
            Self::Analytics => "analytics",
            Self::AuditLog => "audit_log",
            Self::UserPreferences => "user_preferences",
            Self::Achievements => "achievements",
            Self::SecureGameData => "secure_game_data",
        }
    }
}

/// Aggregate threat level computed from the set of active patterns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreatLevel {
    None,
    Low,
    Medium,
    High,
    Critical,
}

/// Health of a single component or of the whole subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Healthy,
    Degraded,
    Failed,
    Unknown,
}

impl HealthState {
    /// Combine component states by worst-case precedence.
    ///
    /// Any failed → failed; else any degraded → degraded; else all healthy →
    /// healthy; otherwise unknown. An empty set is unknown.
    pub fn combine(states: &[HealthState]) -> HealthState {
        if states.contains(&Self::Failed) {
            Self::Failed
        } else if states.contains(&Self::Degraded) {
            Self::Degraded
        } else if !states.is_empty() && states.iter().all(|s| *s == Self::Healthy) {
            Self::Healthy
        } else {
            Self::Unknown
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meta_value_round_trip_keeps_variants() {
        let original = crate::metadata! {
            "high_score" => 100i64,
            "ratio" => 0.5f64,
            "name" => "ada",
            "flags" => vec![true, false],
        };
        let json = serde_json::to_string(&original).unwrap();
        let back: Metadata = serde_json::from_str(&json).unwrap();
        assert_eq!(back, original);
        assert_eq!(back["high_score"], MetaValue::Int(100));
    }

    #[test]
    fn nested_maps_survive_json() {
        let inner = crate::metadata! { "level" => 3i64 };
        let outer = crate::metadata! { "progress" => inner.clone() };
        let json = serde_json::to_string(&outer).unwrap();
        let back: Metadata = serde_json::from_str(&json).unwrap();
        assert_eq!(back["progress"], MetaValue::Map(inner));
    }

    #[test]
    fn event_type_keyword_matches_serde() {
        let json = serde_json::to_string(&AuditEventType::SecurityAlert).unwrap();
        assert_eq!(json, format!("\"{}\"", AuditEventType::SecurityAlert.as_str()));
    }

    #[test]
    fn absent_network_context_is_omitted() {
        let event = AuditEvent {
            id: EventId::new(),
            timestamp: Utc::now(),
            event_type: AuditEventType::GameStart,
            severity: Severity::Info,
            user_id: None,
            session_id: "s".into(),
            game_data: None,
            metadata: None,
            ip_address: None,
            user_agent: None,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(!json.contains("ip_address"));
        assert!(!json.contains("user_id"));
    }

    #[test]
    fn health_combines_by_worst_case() {
        use HealthState::*;
        assert_eq!(HealthState::combine(&[Healthy, Degraded, Failed]), Failed);
        assert_eq!(HealthState::combine(&[Healthy, Degraded, Unknown]), Degraded);
        assert_eq!(HealthState::combine(&[Healthy, Healthy]), Healthy);
        assert_eq!(HealthState::combine(&[Healthy, Unknown]), Unknown);
    }

    #[test]
    fn encrypted_purposes() {
        assert!(DataPurpose::UserPreferences.requires_encryption());
        assert!(DataPurpose::Achievements.requires_encryption());
        assert!(!DataPurpose::GameState.requires_encryption());
        assert_eq!(DataPurpose::AuditLog.format(), PayloadFormat::LogLine);
    }
}
