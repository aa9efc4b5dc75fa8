// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Security coordinator — the single entry point the host application uses.
//
// Fail-closed: until `initialize` succeeds every protected operation returns
// `NotInitialized` without touching crypto or the audit trail.
//
// One operation lock serializes `secure`, `retrieve`, `handle_incident` and
// the scheduled sweep/reset, so background work never interleaves with a
// foreground operation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{error, info, warn};
use warden_bridge::{Clock, Environment};
use warden_core::config::SecurityConfig;
use warden_core::error::{ComplianceError, Result, SecurityError};
use warden_core::{
    AccessOperation, AccessRecord, AuditEvent, AuditEventType, DataPurpose, DomainData, GameEvent,
    HealthState, IncidentKind, SecureRecord, SecurityIncident, Severity, metadata,
};

use crate::audit::{AuditQuery, AuditTrail, EventDetails};
use crate::compliance::{ComplianceEngine, ComplianceReport};
use crate::crypto::CryptoBox;
use crate::integrity::verify_hash;
use crate::scheduler::Scheduler;
use crate::threat::{ScanResult, SecurityStatus, ThreatMonitor};

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Resource name used for game data in access records.
const GAME_DATA: &str = "game_data";

/// Per-component health.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComponentHealth {
    pub audit: HealthState,
    pub encryption: HealthState,
    pub compliance: HealthState,
    pub monitoring: HealthState,
}

impl ComponentHealth {
    fn all(&self) -> [HealthState; 4] {
        [self.audit, self.encryption, self.compliance, self.monitoring]
    }
}

/// Outcome of [`SecurityCoordinator::health_check`]: the worst component
/// state wins, with one recommendation per unhealthy component.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SecurityHealthStatus {
    pub overall: HealthState,
    pub components: ComponentHealth,
    pub recommendations: Vec<String>,
    pub checked_at: DateTime<Utc>,
}

/// Composite report. Everything except `summary` is empty when the
/// coordinator is not initialized.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SecurityReport {
    pub generated_at: DateTime<Utc>,
    pub initialized: bool,
    pub health: Option<SecurityHealthStatus>,
    pub compliance: Option<ComplianceReport>,
    pub status: Option<SecurityStatus>,
    /// Security alerts from the last 24 hours.
    pub recent_alerts: Vec<AuditEvent>,
    pub summary: String,
}

/// Action taken in response to an incident.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum IncidentResponse {
    KeyRotated { key_id: Option<String> },
    ForcedScan(ScanResult),
    ComplianceReview(ComplianceReport),
    Escalated,
}

// ---------------------------------------------------------------------------
// Coordinator
// ---------------------------------------------------------------------------

/// Owns the security components and gates every protected operation on a
/// successful [`initialize`](Self::initialize).
pub struct SecurityCoordinator {
    crypto: Arc<CryptoBox>,
    audit: Arc<AuditTrail>,
    compliance: Arc<ComplianceEngine>,
    monitor: Arc<ThreatMonitor>,
    clock: Arc<dyn Clock>,
    config: SecurityConfig,
    initialized: AtomicBool,
    op_lock: Arc<Mutex<()>>,
    scheduler: Mutex<Option<Scheduler>>,
}

impl SecurityCoordinator {
    /// Wire up already-built components. The coordinator starts closed.
    pub fn new(
        crypto: Arc<CryptoBox>,
        audit: Arc<AuditTrail>,
        compliance: Arc<ComplianceEngine>,
        monitor: Arc<ThreatMonitor>,
        clock: Arc<dyn Clock>,
        config: SecurityConfig,
    ) -> Self {
        Self {
            crypto,
            audit,
            compliance,
            monitor,
            clock,
            config,
            initialized: AtomicBool::new(false),
            op_lock: Arc::new(Mutex::new(())),
            scheduler: Mutex::new(None),
        }
    }

    /// Build every component over `env`.
    pub fn assemble(env: Environment, config: SecurityConfig) -> Self {
        let audit = Arc::new(AuditTrail::open(
            env.sink,
            env.clock.clone(),
            config.audit.clone(),
        ));
        let crypto = Arc::new(CryptoBox::new(env.secrets, &config.crypto).with_audit(audit.clone()));
        let compliance = Arc::new(ComplianceEngine::new(
            audit.clone(),
            env.clock.clone(),
            config.compliance.clone(),
        ));
        let monitor = Arc::new(ThreatMonitor::new(
            audit.clone(),
            env.clock.clone(),
            config.monitor.clone(),
        ));
        Self::new(crypto, audit, compliance, monitor, env.clock, config)
    }

    /// Shared handles to the components, for callers that need direct access.
    pub fn crypto(&self) -> &Arc<CryptoBox> {
        &self.crypto
    }

    pub fn audit(&self) -> &Arc<AuditTrail> {
        &self.audit
    }

    pub fn compliance(&self) -> &Arc<ComplianceEngine> {
        &self.compliance
    }

    pub fn monitor(&self) -> &Arc<ThreatMonitor> {
        &self.monitor
    }

    /// Whether `initialize` has succeeded.
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// Self-test crypto, start the background schedules, and open for
    /// business.
    ///
    /// Schedules are only started when called from within a tokio runtime;
    /// otherwise monitoring stays inactive and health reports it degraded.
    pub fn initialize(&self) -> Result<()> {
        if self.is_initialized() {
            return Ok(());
        }
        let _op = self.op_lock.lock().expect("operation lock poisoned");
        // Another caller may have finished while we waited for the lock.
        if self.is_initialized() {
            return Ok(());
        }

        if !self.crypto.self_test() {
            error!("crypto self-test failed; security subsystem stays closed");
            self.audit.record_alert(
                "security subsystem initialization failed",
                Severity::Critical,
                Some(metadata! { "reason" => "crypto self-test failed" }),
            );
            return Err(SecurityError::EncryptionValidationFailed);
        }

        self.start_schedules();
        self.compliance.check_retention_compliance();
        self.initialized.store(true, Ordering::SeqCst);

        self.audit.record_alert(
            "security subsystem initialized",
            Severity::Info,
            Some(metadata! {
                "key_id" => self.crypto.key_id().unwrap_or_default(),
                "monitoring" => self.monitor.is_monitoring(),
            }),
        );
        info!("security subsystem initialized");
        Ok(())
    }

    fn start_schedules(&self) {
        if tokio::runtime::Handle::try_current().is_err() {
            warn!("no async runtime; background security schedules not started");
            return;
        }

        let mut scheduler = Scheduler::new();
        let (monitor, lock) = (self.monitor.clone(), self.op_lock.clone());
        scheduler.spawn_every("threat-sweep", self.config.monitor.sweep_interval(), move || {
            let _op = lock.lock().expect("operation lock poisoned");
            monitor.sweep();
        });
        let (monitor, lock) = (self.monitor.clone(), self.op_lock.clone());
        scheduler.spawn_every(
            "metrics-reset",
            self.config.monitor.metrics_reset_interval(),
            move || {
                let _op = lock.lock().expect("operation lock poisoned");
                monitor.reset_metrics();
            },
        );

        self.monitor.set_monitoring(true);
        if let Some(previous) = self
            .scheduler
            .lock()
            .expect("scheduler lock poisoned")
            .replace(scheduler)
        {
            previous.cancel();
        }
    }

    fn ensure_initialized(&self) -> Result<()> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(SecurityError::NotInitialized)
        }
    }

    /// Validate, encrypt and project `data`.
    pub fn secure(&self, data: &DomainData) -> Result<SecureRecord> {
        self.ensure_initialized()?;
        let _op = self.op_lock.lock().expect("operation lock poisoned");

        self.seal(data).inspect_err(|e| {
            self.record_failure("secure", AccessOperation::Encrypt, Some(&data.player_id), e);
        })
    }

    fn seal(&self, data: &DomainData) -> Result<SecureRecord> {
        self.compliance.validate_domain_state(data)?;

        let blob = self.crypto.encrypt_structured(data)?;
        let ciphertext = STANDARD.encode(&blob);
        match self
            .compliance
            .validate(ciphertext.as_bytes(), DataPurpose::SecureGameData)
        {
            Ok(()) => {}
            Err(e @ ComplianceError::DataTooLarge { .. }) => return Err(e.into()),
            Err(e) => {
                warn!(error = %e, "ciphertext failed compliance");
                return Err(SecurityError::EncryptionValidationFailed);
            }
        }

        let now = self.clock.now();
        self.monitor.observe_access(&AccessRecord::new(
            GAME_DATA,
            AccessOperation::Encrypt,
            Some(data.player_id.clone()),
            true,
            now,
        ));
        self.audit.record(
            AuditEventType::DataModification,
            Severity::Info,
            EventDetails::new()
                .user(data.player_id.as_str())
                .metadata(metadata! {
                    "resource" => GAME_DATA,
                    "operation" => "secure",
                    "payload_size" => blob.len(),
                }),
        );

        Ok(SecureRecord {
            player_id: data.player_id.clone(),
            score: data.score,
            level: data.level,
            achievement_count: data.achievements.len(),
            history_len: data.score_history.len(),
            total_earned: data
                .score_history
                .iter()
                .map(|e| e.points)
                .filter(|p| *p > 0)
                .fold(0i64, i64::saturating_add),
            content_hash: self.crypto.hash(ciphertext.as_bytes()),
            ciphertext,
            secured_at: now,
        })
    }

    /// Decode, decrypt, parse and validate a base64 blob.
    pub fn retrieve(&self, blob: &str, for_user: &str) -> Result<DomainData> {
        self.ensure_initialized()?;
        let _op = self.op_lock.lock().expect("operation lock poisoned");

        match self.open_blob(blob) {
            Ok(data) => {
                self.monitor.observe_access(&AccessRecord::new(
                    GAME_DATA,
                    AccessOperation::Read,
                    Some(for_user.to_owned()),
                    true,
                    self.clock.now(),
                ));
                self.audit
                    .record_data_access(GAME_DATA, AccessOperation::Read, Some(for_user), true);
                Ok(data)
            }
            Err((stage, e)) => {
                self.record_failure("retrieve", stage, Some(for_user), &e);
                Err(e)
            }
        }
    }

    /// Like [`retrieve`](Self::retrieve), but checks the record's content
    /// hash before decrypting.
    pub fn retrieve_record(&self, record: &SecureRecord, for_user: &str) -> Result<DomainData> {
        self.ensure_initialized()?;
        if let Err(e) = verify_hash(record.ciphertext.as_bytes(), &record.content_hash) {
            let _op = self.op_lock.lock().expect("operation lock poisoned");
            self.record_failure("retrieve", AccessOperation::Read, Some(for_user), &e);
            return Err(e);
        }
        self.retrieve(&record.ciphertext, for_user)
    }

    /// On failure, also reports which kind of access failed.
    fn open_blob(
        &self,
        blob: &str,
    ) -> std::result::Result<DomainData, (AccessOperation, SecurityError)> {
        let bytes = STANDARD.decode(blob.trim()).map_err(|e| {
            (
                AccessOperation::Read,
                SecurityError::InvalidDataFormat(format!("ciphertext is not base64: {e}")),
            )
        })?;
        let plain = self
            .crypto
            .decrypt(&bytes)
            .map_err(|e| (AccessOperation::Decrypt, e.into()))?;
        let data: DomainData = serde_json::from_slice(&plain).map_err(|e| {
            (
                AccessOperation::Read,
                SecurityError::InvalidDataFormat(e.to_string()),
            )
        })?;
        self.compliance
            .validate_domain_state(&data)
            .map_err(|e| (AccessOperation::Read, e.into()))?;
        Ok(data)
    }

    fn record_failure(
        &self,
        operation: &str,
        access: AccessOperation,
        user: Option<&str>,
        error: &SecurityError,
    ) {
        warn!(operation, error = %error, "security operation failed");
        self.monitor.observe_access(&AccessRecord::new(
            GAME_DATA,
            access,
            user.map(str::to_owned),
            false,
            self.clock.now(),
        ));
        self.audit.record_alert(
            &format!("{operation} failed"),
            Severity::Warning,
            Some(metadata! {
                "operation" => operation,
                "access" => access.as_str(),
                "error" => error.to_string(),
            }),
        );
    }

    /// Check every component and record the outcome.
    pub fn health_check(&self) -> SecurityHealthStatus {
        let components = ComponentHealth {
            audit: if self.audit.check_write() {
                HealthState::Healthy
            } else {
                HealthState::Degraded
            },
            encryption: if self.crypto.self_test() {
                HealthState::Healthy
            } else {
                HealthState::Failed
            },
            compliance: if self.compliance.generate_report().is_compliant {
                HealthState::Healthy
            } else {
                HealthState::Degraded
            },
            monitoring: if !self.is_initialized() {
                HealthState::Unknown
            } else if self.monitor.is_monitoring() {
                HealthState::Healthy
            } else {
                HealthState::Degraded
            },
        };
        let overall = HealthState::combine(&components.all());
        let recommendations = recommendations_for(&components);

        let severity = match overall {
            HealthState::Healthy => Severity::Info,
            HealthState::Failed => Severity::Error,
            HealthState::Degraded | HealthState::Unknown => Severity::Warning,
        };
        self.audit.record_alert(
            "security health check",
            severity,
            Some(metadata! {
                "overall" => health_str(overall),
                "audit" => health_str(components.audit),
                "encryption" => health_str(components.encryption),
                "compliance" => health_str(components.compliance),
                "monitoring" => health_str(components.monitoring),
            }),
        );

        SecurityHealthStatus {
            overall,
            components,
            recommendations,
            checked_at: self.clock.now(),
        }
    }

    /// Health, compliance, monitor status and the last day of alerts.
    /// Runs a health check, so it also records one.
    pub fn report(&self) -> SecurityReport {
        let now = self.clock.now();
        if !self.is_initialized() {
            return SecurityReport {
                generated_at: now,
                initialized: false,
                health: None,
                compliance: None,
                status: None,
                recent_alerts: Vec::new(),
                summary: "security subsystem not initialized".into(),
            };
        }

        let health = self.health_check();
        let compliance = self.compliance.generate_report();
        let status = self.monitor.status();
        let recent_alerts = self.audit.query(
            &AuditQuery::new()
                .event_type(AuditEventType::SecurityAlert)
                .since(now - Duration::hours(24))
                .limit(usize::MAX),
        );
        let summary = format!(
            "health {}, compliance score {:.1}, {} active threats, {} alerts in 24h",
            health_str(health.overall),
            compliance.score,
            status.active_threats,
            recent_alerts.len(),
        );

        SecurityReport {
            generated_at: now,
            initialized: true,
            health: Some(health),
            compliance: Some(compliance),
            status: Some(status),
            recent_alerts,
            summary,
        }
    }

    /// Record `incident` and take the matching response.
    pub fn handle_incident(&self, incident: &SecurityIncident) -> Result<IncidentResponse> {
        self.ensure_initialized()?;
        let _op = self.op_lock.lock().expect("operation lock poisoned");

        let severity = match incident.kind {
            IncidentKind::DataTampering | IncidentKind::SystemCompromise => Severity::Critical,
            IncidentKind::UnauthorizedAccess => Severity::Error,
            IncidentKind::SuspiciousActivity => Severity::Warning,
        };
        let mut meta = incident.metadata.clone();
        meta.insert("alert_message".into(), "security incident reported".into());
        meta.insert("incident_type".into(), incident.kind.as_str().into());
        meta.insert("description".into(), incident.description.as_str().into());
        self.audit.record(
            AuditEventType::SecurityAlert,
            severity,
            EventDetails::new()
                .maybe_user(incident.user_id.as_deref())
                .metadata(meta),
        );
        warn!(kind = incident.kind.as_str(), "handling security incident");

        let response = match incident.kind {
            IncidentKind::DataTampering => self.crypto.rotate_key().map(|()| {
                IncidentResponse::KeyRotated {
                    key_id: self.crypto.key_id(),
                }
            }),
            IncidentKind::UnauthorizedAccess => {
                Ok(IncidentResponse::ForcedScan(self.monitor.force_scan()))
            }
            IncidentKind::SuspiciousActivity => Ok(IncidentResponse::ComplianceReview(
                self.compliance.generate_report(),
            )),
            IncidentKind::SystemCompromise => {
                self.audit.record_alert(
                    "system compromise reported",
                    Severity::Critical,
                    Some(metadata! { "description" => incident.description.as_str() }),
                );
                Ok(IncidentResponse::Escalated)
            }
        };

        let mut event = GameEvent::new(AuditEventType::SecurityAlert, self.clock.now());
        event.player_id = incident.user_id.clone();
        event
            .data
            .insert("incident_type".into(), incident.kind.as_str().into());
        if incident.kind == IncidentKind::DataTampering {
            event = event.decryption_failure();
        }
        self.monitor.observe(&event);

        response.map_err(Into::into)
    }

    /// Stop the background schedules and clear the monitoring flag.
    pub async fn shutdown(&self) {
        let scheduler = self.scheduler.lock().expect("scheduler lock poisoned").take();
        if let Some(mut scheduler) = scheduler {
            scheduler.shutdown().await;
        }
        self.monitor.set_monitoring(false);
        self.audit
            .record_alert("security subsystem shut down", Severity::Info, None);
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn health_str(state: HealthState) -> &'static str {
    match state {
        HealthState::Healthy => "healthy",
        HealthState::Degraded => "degraded",
        HealthState::Failed => "failed",
        HealthState::Unknown => "unknown",
    }
}

fn recommendations_for(components: &ComponentHealth) -> Vec<String> {
    let mut out = Vec::new();
    match components.audit {
        HealthState::Healthy => {}
        _ => out.push("Audit log writes are failing; check free space and permissions of the audit directory".into()),
    }
    match components.encryption {
        HealthState::Healthy => {}
        _ => out.push("Encryption self-test failed; verify the secret store and consider rotating the key".into()),
    }
    match components.compliance {
        HealthState::Healthy => {}
        _ => out.push("Compliance score is below threshold; review the reported violations".into()),
    }
    match components.monitoring {
        HealthState::Healthy => {}
        HealthState::Unknown => out.push("Monitoring state unknown; initialize the security subsystem".into()),
        _ => out.push("Threat monitoring is not running; initialize from within an async runtime".into()),
    }
    out
}
