// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Compliance engine — payload policy checks applied before data is accepted
// or persisted.
//
// Order of checks in `validate`:
//   1. size limit
//   2. structure for the purpose (JSON / log line)
//   3. encryption marker for purposes that must never be stored in clear
//   4. every rule registered for the purpose, first failure wins

use std::sync::{Arc, LazyLock, Mutex};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use warden_bridge::Clock;
use warden_core::config::ComplianceConfig;
use warden_core::error::ComplianceError;
use warden_core::{DataPurpose, DomainData, PayloadFormat, Severity, metadata};

use crate::audit::AuditTrail;
use crate::crypto::MIN_BLOB_LEN;

// ---------------------------------------------------------------------------
// Patterns and limits
// ---------------------------------------------------------------------------

static LOG_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}:\d{2}").expect("log line pattern is valid")
});

static BASE64_TEXT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9+/]+={0,2}$").expect("base64 pattern is valid"));

const MAX_PLAYER_ID_CHARS: usize = 50;
const MAX_SESSION_SECS: f64 = 3600.0;

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

/// Validation performed by a [`ComplianceRule`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    /// Payload must contain something other than whitespace.
    NonEmptyPayload,
    /// No top-level credential fields in a JSON object.
    NoPlaintextCredentials,
    /// No direct personal identifiers in analytics payloads.
    DataMinimization,
    /// Decoded ciphertext must be long enough to hold nonce and tag.
    CiphertextEnvelope,
}

const CREDENTIAL_KEYS: &[&str] = &["password", "secret", "token", "api_key"];
const PERSONAL_KEYS: &[&str] = &["email", "phone", "address"];

impl RuleKind {
    pub fn check(&self, data: &[u8]) -> Result<(), ComplianceError> {
        match self {
            Self::NonEmptyPayload => {
                if data.iter().all(u8::is_ascii_whitespace) {
                    Err(ComplianceError::InvalidFormat("payload is empty".into()))
                } else {
                    Ok(())
                }
            }
            Self::NoPlaintextCredentials => forbid_keys(data, CREDENTIAL_KEYS, "no-plaintext-credentials"),
            Self::DataMinimization => forbid_keys(data, PERSONAL_KEYS, "data-minimization"),
            Self::CiphertextEnvelope => {
                let decoded = STANDARD.decode(data).map_err(|e| ComplianceError::PolicyViolation {
                    rule: "ciphertext-envelope".into(),
                    reason: format!("not decodable: {e}"),
                })?;
                if decoded.len() < MIN_BLOB_LEN {
                    return Err(ComplianceError::PolicyViolation {
                        rule: "ciphertext-envelope".into(),
                        reason: format!(
                            "{} bytes is shorter than the {MIN_BLOB_LEN} byte envelope",
                            decoded.len()
                        ),
                    });
                }
                Ok(())
            }
        }
    }
}

fn forbid_keys(data: &[u8], keys: &[&str], rule: &str) -> Result<(), ComplianceError> {
    let Ok(serde_json::Value::Object(map)) = serde_json::from_slice::<serde_json::Value>(data) else {
        return Ok(());
    };
    match map
        .keys()
        .find(|k| keys.iter().any(|f| k.eq_ignore_ascii_case(f)))
    {
        Some(key) => Err(ComplianceError::PolicyViolation {
            rule: rule.into(),
            reason: format!("field `{key}` is not allowed"),
        }),
        None => Ok(()),
    }
}

/// A named, purpose-scoped validator.
#[derive(Debug, Clone, Serialize)]
pub struct ComplianceRule {
    pub id: &'static str,
    pub name: &'static str,
    pub applies_to: &'static [DataPurpose],
    pub kind: RuleKind,
}

impl ComplianceRule {
    pub fn applies(&self, purpose: DataPurpose) -> bool {
        self.applies_to.contains(&purpose)
    }
}

/// The fixed rule set, in evaluation order.
pub fn builtin_rules() -> Vec<ComplianceRule> {
    use DataPurpose::*;
    vec![
        ComplianceRule {
            id: "non-empty-payload",
            name: "Payload must not be empty",
            applies_to: &DataPurpose::ALL,
            kind: RuleKind::NonEmptyPayload,
        },
        ComplianceRule {
            id: "no-plaintext-credentials",
            name: "Credentials must never be stored in clear",
            applies_to: &[GameState, Analytics],
            kind: RuleKind::NoPlaintextCredentials,
        },
        ComplianceRule {
            id: "data-minimization",
            name: "Analytics must not carry personal identifiers",
            applies_to: &[Analytics],
            kind: RuleKind::DataMinimization,
        },
        ComplianceRule {
            id: "ciphertext-envelope",
            name: "Encrypted payloads must carry nonce and tag",
            applies_to: &[UserPreferences, Achievements, SecureGameData],
            kind: RuleKind::CiphertextEnvelope,
        },
    ]
}

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// A compliance finding against stored data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplianceViolation {
    pub rule_id: String,
    pub purpose: Option<DataPurpose>,
    pub description: String,
    pub detected_at: DateTime<Utc>,
}

/// Point-in-time compliance summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplianceReport {
    pub generated_at: DateTime<Utc>,
    pub total_rules: usize,
    pub violations: Vec<ComplianceViolation>,
    /// 0–100.
    pub score: f64,
    pub is_compliant: bool,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Validates payloads and domain state against the fixed policy.
pub struct ComplianceEngine {
    audit: Arc<AuditTrail>,
    clock: Arc<dyn Clock>,
    config: ComplianceConfig,
    rules: Vec<ComplianceRule>,
    /// Findings registered by a storage scan.
    known_violations: Mutex<Vec<ComplianceViolation>>,
}

impl ComplianceEngine {
    /// An engine with the builtin rule set and no registered violations.
    pub fn new(audit: Arc<AuditTrail>, clock: Arc<dyn Clock>, config: ComplianceConfig) -> Self {
        Self {
            audit,
            clock,
            config,
            rules: builtin_rules(),
            known_violations: Mutex::new(Vec::new()),
        }
    }

    /// Rules in evaluation order.
    pub fn rules(&self) -> &[ComplianceRule] {
        &self.rules
    }

    /// Check `data` for `purpose`. The outcome is always audited.
    pub fn validate(&self, data: &[u8], purpose: DataPurpose) -> Result<(), ComplianceError> {
        let result = self.check_payload(data, purpose);

        let mut details = metadata! {
            "purpose" => purpose.as_str(),
            "size" => data.len(),
        };
        if let Err(e) = &result {
            details.insert("error".into(), e.to_string().into());
            debug!(purpose = purpose.as_str(), error = %e, "payload rejected");
        }
        self.audit
            .record_compliance_check("payload_validation", result.is_ok(), Some(details));
        result
    }

    fn check_payload(&self, data: &[u8], purpose: DataPurpose) -> Result<(), ComplianceError> {
        if data.len() > self.config.max_payload_bytes {
            return Err(ComplianceError::DataTooLarge {
                size: data.len(),
                max: self.config.max_payload_bytes,
            });
        }

        match purpose.format() {
            PayloadFormat::Json => {
                serde_json::from_slice::<serde_json::Value>(data)
                    .map_err(|e| ComplianceError::InvalidFormat(format!("not JSON: {e}")))?;
            }
            PayloadFormat::LogLine => {
                let is_log_line = std::str::from_utf8(data).is_ok_and(|s| LOG_LINE.is_match(s));
                if !is_log_line && serde_json::from_slice::<serde_json::Value>(data).is_err() {
                    return Err(ComplianceError::InvalidFormat(
                        "expected a timestamped line or JSON".into(),
                    ));
                }
            }
            PayloadFormat::Ciphertext => {}
        }

        if purpose.requires_encryption()
            && !std::str::from_utf8(data).is_ok_and(|s| BASE64_TEXT.is_match(s))
        {
            return Err(ComplianceError::EncryptionRequired);
        }

        self.rules
            .iter()
            .filter(|r| r.applies(purpose))
            .try_for_each(|r| r.kind.check(data))
    }

    /// Hard invariants on game state, plus soft plausibility flags.
    ///
    /// Implausible states (very high score, or a high score in very little
    /// time) raise a warning alert but still pass.
    pub fn validate_domain_state(&self, state: &DomainData) -> Result<(), ComplianceError> {
        if state.score < 0 {
            return Err(ComplianceError::InvalidScore(state.score));
        }
        if !(0.0..=MAX_SESSION_SECS).contains(&state.duration_secs) {
            return Err(ComplianceError::InvalidDuration(state.duration_secs));
        }
        let id_len = state.player_id.chars().count();
        if state.player_id.trim().is_empty() {
            return Err(ComplianceError::InvalidPlayerData("player id is empty".into()));
        }
        if id_len > MAX_PLAYER_ID_CHARS {
            return Err(ComplianceError::InvalidPlayerData(format!(
                "player id is {id_len} characters, limit is {MAX_PLAYER_ID_CHARS}"
            )));
        }

        let flag = if state.score > self.config.score_ceiling {
            Some("implausible score")
        } else if state.score >= self.config.fast_score_threshold
            && state.duration_secs < self.config.fast_score_min_duration_secs
        {
            Some("implausible scoring rate")
        } else {
            None
        };
        if let Some(message) = flag {
            warn!(player = %state.player_id, score = state.score, "{message}");
            self.audit.record_alert(
                message,
                Severity::Warning,
                Some(metadata! {
                    "player_id" => state.player_id.as_str(),
                    "score" => state.score,
                    "duration_secs" => state.duration_secs,
                }),
            );
        }
        Ok(())
    }

    /// Compute the retention cutoff and audit the check. Purging records
    /// older than the cutoff is left to the storage layer.
    pub fn check_retention_compliance(&self) -> DateTime<Utc> {
        let cutoff = self.clock.now() - Duration::days(i64::from(self.config.retention_days));
        self.audit.record_compliance_check(
            "data_retention",
            true,
            Some(metadata! {
                "cutoff" => cutoff.to_rfc3339(),
                "retention_days" => self.config.retention_days,
            }),
        );
        cutoff
    }

    /// Register a finding from a storage scan.
    pub fn register_violation(&self, violation: ComplianceViolation) {
        self.known_violations
            .lock()
            .expect("compliance lock poisoned")
            .push(violation);
    }

    /// Forget every registered finding, e.g. after remediation.
    pub fn clear_violations(&self) {
        self.known_violations
            .lock()
            .expect("compliance lock poisoned")
            .clear();
    }

    /// Score current findings against the rule set and audit the result.
    pub fn generate_report(&self) -> ComplianceReport {
        let violations = self
            .known_violations
            .lock()
            .expect("compliance lock poisoned")
            .clone();
        let total_rules = self.rules.len();
        let score = if total_rules == 0 {
            100.0
        } else {
            (100.0 * (1.0 - violations.len() as f64 / total_rules as f64)).clamp(0.0, 100.0)
        };
        let is_compliant = score >= self.config.compliance_threshold;

        self.audit.record_compliance_check(
            "compliance_report",
            is_compliant,
            Some(metadata! {
                "score" => score,
                "violations" => violations.len(),
                "total_rules" => total_rules,
            }),
        );

        ComplianceReport {
            generated_at: self.clock.now(),
            total_rules,
            violations,
            score,
            is_compliant,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use warden_bridge::{ManualClock, MemorySink};
    use warden_core::config::AuditConfig;
    use warden_core::{AuditEventType, MetaValue};

    use super::*;
    use crate::audit::AuditQuery;

    fn engine_with(config: ComplianceConfig) -> (ComplianceEngine, Arc<AuditTrail>) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).unwrap(),
        ));
        let audit = Arc::new(AuditTrail::open(
            Arc::new(MemorySink::new()),
            clock.clone(),
            AuditConfig::default(),
        ));
        (ComplianceEngine::new(audit.clone(), clock, config), audit)
    }

    fn engine() -> (ComplianceEngine, Arc<AuditTrail>) {
        engine_with(ComplianceConfig::default())
    }

    fn json_of_len(len: usize) -> Vec<u8> {
        let overhead = r#"{"pad":""}"#.len();
        format!(r#"{{"pad":"{}"}}"#, "a".repeat(len - overhead)).into_bytes()
    }

    fn checks(audit: &AuditTrail) -> Vec<warden_core::AuditEvent> {
        audit.query(&AuditQuery::new().event_type(AuditEventType::ComplianceCheck))
    }

    #[test]
    fn max_size_passes_one_over_fails() {
        let (engine, _) = engine();
        let max = ComplianceConfig::default().max_payload_bytes;

        let exact = json_of_len(max);
        assert_eq!(exact.len(), max);
        assert_eq!(engine.validate(&exact, DataPurpose::GameState), Ok(()));

        let over = json_of_len(max + 1);
        assert_eq!(
            engine.validate(&over, DataPurpose::GameState),
            Err(ComplianceError::DataTooLarge { size: max + 1, max })
        );
    }

    #[test]
    fn structured_purposes_need_json() {
        let (engine, _) = engine();
        assert!(matches!(
            engine.validate(b"score=10", DataPurpose::GameState),
            Err(ComplianceError::InvalidFormat(_))
        ));
        assert_eq!(engine.validate(br#"{"score":10}"#, DataPurpose::Analytics), Ok(()));
    }

    #[test]
    fn log_purpose_accepts_timestamp_or_json() {
        let (engine, _) = engine();
        assert_eq!(
            engine.validate(b"2026-10-19T12:00:00Z started", DataPurpose::AuditLog),
            Ok(())
        );
        assert_eq!(engine.validate(br#"{"msg":"x"}"#, DataPurpose::AuditLog), Ok(()));
        assert!(matches!(
            engine.validate(b"yesterday something happened", DataPurpose::AuditLog),
            Err(ComplianceError::InvalidFormat(_))
        ));
    }

    #[test]
    fn encrypted_purposes_reject_plaintext() {
        let (engine, _) = engine();
        assert_eq!(
            engine.validate(br#"{"theme":"dark"}"#, DataPurpose::UserPreferences),
            Err(ComplianceError::EncryptionRequired)
        );

        let envelope = STANDARD.encode([7u8; MIN_BLOB_LEN + 4]);
        assert_eq!(engine.validate(envelope.as_bytes(), DataPurpose::Achievements), Ok(()));
    }

    #[test]
    fn short_ciphertext_fails_envelope_rule() {
        let (engine, _) = engine();
        let short = STANDARD.encode([1u8; 8]);
        match engine.validate(short.as_bytes(), DataPurpose::SecureGameData) {
            Err(ComplianceError::PolicyViolation { rule, .. }) => assert_eq!(rule, "ciphertext-envelope"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn credential_and_personal_fields_are_rejected() {
        let (engine, _) = engine();
        assert!(matches!(
            engine.validate(br#"{"Password":"hunter2"}"#, DataPurpose::GameState),
            Err(ComplianceError::PolicyViolation { .. })
        ));
        assert!(matches!(
            engine.validate(br#"{"email":"a@b.c"}"#, DataPurpose::Analytics),
            Err(ComplianceError::PolicyViolation { .. })
        ));
        // Minimization applies to analytics only.
        assert_eq!(engine.validate(br#"{"email":"a@b.c"}"#, DataPurpose::GameState), Ok(()));
    }

    #[test]
    fn every_validation_is_audited() {
        let (engine, audit) = engine();
        let _ = engine.validate(br#"{"a":1}"#, DataPurpose::GameState);
        let _ = engine.validate(b"nope", DataPurpose::GameState);

        let recorded = checks(&audit);
        assert_eq!(recorded.len(), 2);
        assert_eq!(recorded[0].meta("result"), Some(&MetaValue::Bool(true)));
        assert_eq!(recorded[1].meta("result"), Some(&MetaValue::Bool(false)));
    }

    #[test]
    fn domain_state_hard_limits() {
        let (engine, _) = engine();
        assert_eq!(engine.validate_domain_state(&DomainData::new("p1", 10, 120.0)), Ok(()));
        assert_eq!(
            engine.validate_domain_state(&DomainData::new("p1", -1, 120.0)),
            Err(ComplianceError::InvalidScore(-1))
        );
        assert_eq!(
            engine.validate_domain_state(&DomainData::new("p1", 1, 3600.5)),
            Err(ComplianceError::InvalidDuration(3600.5))
        );
        assert_eq!(engine.validate_domain_state(&DomainData::new("p1", 1, 3600.0)), Ok(()));
        assert!(matches!(
            engine.validate_domain_state(&DomainData::new("  ", 1, 1.0)),
            Err(ComplianceError::InvalidPlayerData(_))
        ));
        assert!(matches!(
            engine.validate_domain_state(&DomainData::new("x".repeat(51), 1, 1.0)),
            Err(ComplianceError::InvalidPlayerData(_))
        ));
        assert_eq!(engine.validate_domain_state(&DomainData::new("x".repeat(50), 1, 1.0)), Ok(()));
    }

    #[test]
    fn implausible_state_is_flagged_not_rejected() {
        let (engine, audit) = engine();
        assert_eq!(engine.validate_domain_state(&DomainData::new("p1", 20_000, 5.0)), Ok(()));
        assert_eq!(engine.validate_domain_state(&DomainData::new("p1", 2_000_000, 3000.0)), Ok(()));

        let alerts = audit.query(&AuditQuery::new().event_type(AuditEventType::SecurityAlert));
        assert_eq!(alerts.len(), 2);
        assert!(alerts.iter().all(|a| a.severity == Severity::Warning));
    }

    #[test]
    fn retention_cutoff_is_a_year_back() {
        let (engine, audit) = engine();
        let cutoff = engine.check_retention_compliance();
        assert_eq!(cutoff, Utc.with_ymd_and_hms(2025, 10, 19, 12, 0, 0).unwrap());
        assert_eq!(
            checks(&audit)[0].meta("check_type").and_then(MetaValue::as_str),
            Some("data_retention")
        );
    }

    #[test]
    fn report_scores_against_rule_count() {
        let (engine, _) = engine();
        let clean = engine.generate_report();
        assert_eq!(clean.score, 100.0);
        assert!(clean.is_compliant);
        assert_eq!(clean.total_rules, 4);

        engine.register_violation(ComplianceViolation {
            rule_id: "data-minimization".into(),
            purpose: Some(DataPurpose::Analytics),
            description: "email found in stored analytics".into(),
            detected_at: Utc::now(),
        });
        let dirty = engine.generate_report();
        assert_eq!(dirty.score, 75.0);
        assert!(!dirty.is_compliant);

        engine.clear_violations();
        assert!(engine.generate_report().is_compliant);
    }
}
