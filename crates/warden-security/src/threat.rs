// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Threat monitor — rolling behavioural picture of the session.
//
// Four fixed patterns are evaluated against every observed game event and
// data-access record. A pattern goes inactive → active when its detector
// matches, and back to inactive at the first sweep after `cooldown_secs`
// without a re-trigger.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};
use warden_bridge::Clock;
use warden_core::config::MonitorConfig;
use warden_core::{
    AccessOperation, AccessRecord, AuditEventType, GameEvent, Metadata, Severity, ThreatLevel,
    metadata,
};

use crate::audit::{AuditTrail, EventDetails};

// ---------------------------------------------------------------------------
// Detection thresholds
// ---------------------------------------------------------------------------

/// Number of recent outcomes considered by the failure-ratio detector.
const OUTCOME_WINDOW: usize = 10;
/// Failures within a full outcome window that count as "frequent".
const FREQUENT_FAILURES: usize = 7;
const RAPID_SCORE_DELTA: i64 = 1000;
const RAPID_SCORE_SECS: f64 = 5.0;
const MIN_HUMAN_REACTION_MS: f64 = 100.0;

// ---------------------------------------------------------------------------
// Patterns
// ---------------------------------------------------------------------------

/// Something the monitor was shown.
#[derive(Debug, Clone, Copy)]
pub enum Observation<'a> {
    Game(&'a GameEvent),
    Access(&'a AccessRecord),
}

/// Detection rule behind a [`ThreatPattern`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Detector {
    RapidScoreIncrease,
    FrequentFailures,
    DataTampering,
    UnusualTiming,
}

impl Detector {
    /// Pure predicate over one observation and the recent outcome window
    /// (oldest first, `true` = success).
    pub fn matches(&self, observation: &Observation<'_>, outcomes: &VecDeque<bool>) -> bool {
        match (self, observation) {
            (Self::RapidScoreIncrease, Observation::Game(e)) => matches!(
                (e.score_delta, e.interval_secs),
                (Some(delta), Some(secs)) if delta > RAPID_SCORE_DELTA && secs < RAPID_SCORE_SECS
            ),
            (Self::FrequentFailures, _) => {
                outcomes.len() >= OUTCOME_WINDOW
                    && outcomes.iter().filter(|ok| !**ok).count() > FREQUENT_FAILURES
            }
            (Self::DataTampering, Observation::Game(e)) => e.decryption_failed,
            (Self::DataTampering, Observation::Access(a)) => {
                a.operation == AccessOperation::Decrypt && !a.success
            }
            (Self::UnusualTiming, Observation::Game(e)) => {
                e.reaction_time_ms.is_some_and(|ms| ms < MIN_HUMAN_REACTION_MS)
            }
            (Self::RapidScoreIncrease | Self::UnusualTiming, Observation::Access(_)) => false,
        }
    }
}

/// A named detection rule and its activation state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThreatPattern {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub severity: Severity,
    pub detector: Detector,
    pub is_active: bool,
    pub last_detected_at: Option<DateTime<Utc>>,
}

impl ThreatPattern {
    fn new(
        id: &'static str,
        name: &'static str,
        description: &'static str,
        severity: Severity,
        detector: Detector,
    ) -> Self {
        Self {
            id,
            name,
            description,
            severity,
            detector,
            is_active: false,
            last_detected_at: None,
        }
    }
}

/// The fixed pattern set, all inactive.
pub fn builtin_patterns() -> Vec<ThreatPattern> {
    vec![
        ThreatPattern::new(
            "rapid_score_increase",
            "Rapid score increase",
            "More than 1000 points earned in under 5 seconds",
            Severity::Error,
            Detector::RapidScoreIncrease,
        ),
        ThreatPattern::new(
            "frequent_failures",
            "Frequent failures",
            "More than 7 of the last 10 outcomes failed",
            Severity::Warning,
            Detector::FrequentFailures,
        ),
        ThreatPattern::new(
            "data_tampering",
            "Data tampering",
            "Encrypted data failed to decrypt",
            Severity::Critical,
            Detector::DataTampering,
        ),
        ThreatPattern::new(
            "unusual_timing",
            "Unusual timing",
            "Reaction time faster than a human can respond",
            Severity::Error,
            Detector::UnusualTiming,
        ),
    ]
}

/// Aggregate threat level for a pattern set.
pub fn threat_level_of(patterns: &[ThreatPattern]) -> ThreatLevel {
    let active: Vec<&ThreatPattern> = patterns.iter().filter(|p| p.is_active).collect();
    let errors = active.iter().filter(|p| p.severity == Severity::Error).count();

    if active.iter().any(|p| p.severity == Severity::Critical) {
        ThreatLevel::Critical
    } else if errors > 1 {
        ThreatLevel::High
    } else if active.len() > 2 {
        ThreatLevel::Medium
    } else if !active.is_empty() {
        ThreatLevel::Low
    } else {
        ThreatLevel::None
    }
}

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Rolling counters, zeroed by [`ThreatMonitor::reset_metrics`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SecurityMetrics {
    pub total_events: u64,
    pub recent_failures: u64,
    pub failed_accesses: u64,
    pub successful_accesses: u64,
    /// Access records from the last hour, oldest first.
    pub recent_accesses: VecDeque<AccessRecord>,
    pub since: DateTime<Utc>,
}

impl SecurityMetrics {
    fn new(since: DateTime<Utc>) -> Self {
        Self {
            total_events: 0,
            recent_failures: 0,
            failed_accesses: 0,
            successful_accesses: 0,
            recent_accesses: VecDeque::new(),
            since,
        }
    }

    fn prune_accesses(&mut self, now: DateTime<Utc>) {
        let horizon = now - Duration::hours(1);
        while self
            .recent_accesses
            .front()
            .is_some_and(|a| a.timestamp < horizon)
        {
            self.recent_accesses.pop_front();
        }
    }
}

/// Result of a periodic sweep.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SweepOutcome {
    pub deactivated: Vec<&'static str>,
    pub threat_level: ThreatLevel,
    pub resource_pressure: bool,
    pub summary_recorded: bool,
}

/// Result of an on-demand scan.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanResult {
    pub active_threats: usize,
    pub anomalies_detected: usize,
    pub anomalies: Vec<String>,
    pub threat_level: ThreatLevel,
    pub duration: std::time::Duration,
    pub scanned_at: DateTime<Utc>,
}

/// Point-in-time monitor status.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SecurityStatus {
    pub monitoring_active: bool,
    pub active_threats: usize,
    /// Security alerts recorded in the last hour.
    pub recent_alerts: usize,
    pub threat_level: ThreatLevel,
    pub timestamp: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Monitor state
// ---------------------------------------------------------------------------

/// Alert produced under the monitor lock, recorded after it is released.
struct PendingAlert {
    pattern: Option<&'static str>,
    message: String,
    severity: Severity,
    metadata: Metadata,
}

struct MonitorState {
    patterns: Vec<ThreatPattern>,
    metrics: SecurityMetrics,
    outcomes: VecDeque<bool>,
    threat_level: ThreatLevel,
    /// Burst alerts fire once per crossing, per operation.
    burst_armed: HashMap<AccessOperation, bool>,
    /// Resource-pressure alerts fire once per crossing of the soft cap.
    pressure_armed: bool,
    next_summary_at: u64,
    monitoring: bool,
}

impl MonitorState {
    fn push_outcome(&mut self, success: bool) {
        self.outcomes.push_back(success);
        if self.outcomes.len() > OUTCOME_WINDOW {
            self.outcomes.pop_front();
        }
        if !success {
            self.metrics.recent_failures += 1;
        }
    }

    /// Run every detector; return the patterns that just became active.
    fn evaluate(&mut self, observation: &Observation<'_>, now: DateTime<Utc>) -> Vec<PendingAlert> {
        let mut activated = Vec::new();
        for pattern in &mut self.patterns {
            if !pattern.detector.matches(observation, &self.outcomes) {
                continue;
            }
            pattern.last_detected_at = Some(now);
            if !pattern.is_active {
                pattern.is_active = true;
                activated.push(PendingAlert {
                    pattern: Some(pattern.id),
                    message: format!("threat pattern detected: {}", pattern.name),
                    severity: pattern.severity,
                    metadata: metadata! {
                        "pattern_id" => pattern.id,
                        "description" => pattern.description,
                    },
                });
            }
        }
        self.threat_level = threat_level_of(&self.patterns);
        activated
    }
}

// ---------------------------------------------------------------------------
// Monitor
// ---------------------------------------------------------------------------

/// Observes game events and data access, and flags anomalies.
pub struct ThreatMonitor {
    audit: Arc<AuditTrail>,
    clock: Arc<dyn Clock>,
    config: MonitorConfig,
    state: Mutex<MonitorState>,
}

impl ThreatMonitor {
    /// A monitor with every builtin pattern inactive and monitoring off.
    pub fn new(audit: Arc<AuditTrail>, clock: Arc<dyn Clock>, config: MonitorConfig) -> Self {
        let now = clock.now();
        let next_summary_at = config.summary_every.max(1);
        Self {
            audit,
            clock,
            config,
            state: Mutex::new(MonitorState {
                patterns: builtin_patterns(),
                metrics: SecurityMetrics::new(now),
                outcomes: VecDeque::with_capacity(OUTCOME_WINDOW + 1),
                threat_level: ThreatLevel::None,
                burst_armed: HashMap::new(),
                pressure_armed: true,
                next_summary_at,
                monitoring: false,
            }),
        }
    }

    /// Feed a game event. Returns the ids of patterns it newly activated.
    pub fn observe(&self, event: &GameEvent) -> Vec<&'static str> {
        let now = self.clock.now();
        let alerts = {
            let mut state = self.state.lock().expect("monitor lock poisoned");
            state.metrics.total_events += 1;
            if let Some(success) = event.success {
                state.push_outcome(success);
            }
            state.evaluate(&Observation::Game(event), now)
        };

        let activated = alerts.iter().filter_map(|a| a.pattern).collect();
        for mut alert in alerts {
            if let Some(player) = &event.player_id {
                alert.metadata.insert("player_id".into(), player.as_str().into());
            }
            self.emit(alert);
        }

        if event.security_relevant {
            let mut details = EventDetails::new()
                .maybe_user(event.player_id.as_deref())
                .game_data(event.data.clone())
                .metadata(metadata! { "source" => "threat_monitor" });
            if let Some(session) = &event.session_id {
                details = details.session(session.clone());
            }
            self.audit.record(event.event_type, Severity::Warning, details);
        }
        activated
    }

    /// Feed a data-access record. Returns the ids of patterns it newly
    /// activated.
    pub fn observe_access(&self, record: &AccessRecord) -> Vec<&'static str> {
        let now = self.clock.now();
        let mut alerts = Vec::new();
        let activated = {
            let mut state = self.state.lock().expect("monitor lock poisoned");
            state.metrics.total_events += 1;
            if record.success {
                state.metrics.successful_accesses += 1;
            } else {
                state.metrics.failed_accesses += 1;
            }
            state.push_outcome(record.success);
            state.metrics.recent_accesses.push_back(record.clone());
            state.metrics.prune_accesses(now);

            let window_start = now - Duration::seconds(self.config.access_burst_window_secs as i64);
            let burst = state
                .metrics
                .recent_accesses
                .iter()
                .filter(|a| a.operation == record.operation && a.timestamp >= window_start)
                .count();
            let armed = state.burst_armed.entry(record.operation).or_insert(true);
            if burst > self.config.access_burst_threshold {
                if *armed {
                    *armed = false;
                    alerts.push(PendingAlert {
                        pattern: None,
                        message: "suspicious access pattern".into(),
                        severity: Severity::Warning,
                        metadata: metadata! {
                            "operation" => record.operation.as_str(),
                            "accesses_in_window" => burst,
                            "window_secs" => self.config.access_burst_window_secs,
                        },
                    });
                }
            } else {
                *armed = true;
            }

            let failures = state.metrics.failed_accesses;
            if !record.success && failures > self.config.access_failure_threshold {
                let severity = if failures > self.config.access_failure_threshold * 2 {
                    Severity::Critical
                } else {
                    Severity::Error
                };
                alerts.push(PendingAlert {
                    pattern: None,
                    message: "repeated data access failures".into(),
                    severity,
                    metadata: metadata! {
                        "failed_accesses" => failures,
                        "resource" => record.resource.as_str(),
                    },
                });
            }

            state.evaluate(&Observation::Access(record), now)
        };

        let ids = activated.iter().filter_map(|a| a.pattern).collect();
        for alert in alerts.into_iter().chain(activated) {
            self.emit(alert);
        }
        ids
    }

    /// Periodic maintenance: resource heuristic, stale-pattern expiry,
    /// threat-level recomputation, and the periodic summary record.
    pub fn sweep(&self) -> SweepOutcome {
        let now = self.clock.now();
        let cooldown = self.config.cooldown();
        let (pressure_alert, outcome, summary) = {
            let mut state = self.state.lock().expect("monitor lock poisoned");
            state.metrics.prune_accesses(now);
            let window = state.metrics.recent_accesses.len();
            let resource_pressure = window > self.config.access_window_soft_cap;
            let pressure_alert = resource_pressure && state.pressure_armed;
            state.pressure_armed = !resource_pressure;

            let mut deactivated = Vec::new();
            for pattern in &mut state.patterns {
                let stale = pattern
                    .last_detected_at
                    .is_none_or(|at| now - at >= cooldown);
                if pattern.is_active && stale {
                    pattern.is_active = false;
                    deactivated.push(pattern.id);
                }
            }
            state.threat_level = threat_level_of(&state.patterns);

            let every = self.config.summary_every.max(1);
            let summary = if state.metrics.total_events >= state.next_summary_at {
                let total = state.metrics.total_events;
                state.next_summary_at = (total / every + 1) * every;
                Some(metadata! {
                    "total_events" => state.metrics.total_events,
                    "recent_failures" => state.metrics.recent_failures,
                    "failed_accesses" => state.metrics.failed_accesses,
                    "successful_accesses" => state.metrics.successful_accesses,
                    "threat_level" => format!("{:?}", state.threat_level).to_lowercase(),
                })
            } else {
                None
            };

            (
                pressure_alert,
                SweepOutcome {
                    deactivated,
                    threat_level: state.threat_level,
                    resource_pressure,
                    summary_recorded: summary.is_some(),
                },
                summary,
            )
        };

        if pressure_alert {
            warn!(cap = self.config.access_window_soft_cap, "access window above soft cap");
            self.audit.record_alert(
                "monitoring resource pressure",
                Severity::Warning,
                Some(metadata! { "soft_cap" => self.config.access_window_soft_cap }),
            );
        }
        for id in &outcome.deactivated {
            info!(pattern = *id, "threat pattern cleared");
        }
        if let Some(summary) = summary {
            self.audit
                .record_alert("security monitoring summary", Severity::Info, Some(summary));
        }
        debug!(level = ?outcome.threat_level, "sweep complete");
        outcome
    }

    /// Zero the rolling aggregate. Pattern state is kept.
    pub fn reset_metrics(&self) {
        let now = self.clock.now();
        let mut state = self.state.lock().expect("monitor lock poisoned");
        state.metrics = SecurityMetrics::new(now);
        state.outcomes.clear();
        state.burst_armed.clear();
        state.next_summary_at = self.config.summary_every.max(1);
        debug!("security metrics reset");
    }

    /// Sweep immediately and check the aggregate for outliers.
    pub fn force_scan(&self) -> ScanResult {
        let started = Instant::now();
        let sweep = self.sweep();

        let (active_threats, anomalies) = {
            let state = self.state.lock().expect("monitor lock poisoned");
            let m = &state.metrics;
            let mut anomalies = Vec::new();
            if m.total_events > self.config.scan_event_threshold {
                anomalies.push(format!(
                    "event volume {} above {}",
                    m.total_events, self.config.scan_event_threshold
                ));
            }
            let accesses = m.failed_accesses + m.successful_accesses;
            if accesses >= 10 && m.failed_accesses * 2 > accesses {
                anomalies.push(format!("{} of {accesses} accesses failed", m.failed_accesses));
            }
            if m.recent_failures > self.config.scan_failure_threshold {
                anomalies.push(format!(
                    "{} recent failures above {}",
                    m.recent_failures, self.config.scan_failure_threshold
                ));
            }
            (state.patterns.iter().filter(|p| p.is_active).count(), anomalies)
        };

        let result = ScanResult {
            active_threats,
            anomalies_detected: anomalies.len(),
            anomalies,
            threat_level: sweep.threat_level,
            duration: started.elapsed(),
            scanned_at: self.clock.now(),
        };

        self.audit.record(
            AuditEventType::SecurityAlert,
            Severity::Info,
            EventDetails::new().metadata(metadata! {
                "alert_message" => "forced security scan completed",
                "active_threats" => result.active_threats,
                "anomalies_detected" => result.anomalies_detected,
                "duration_ms" => result.duration.as_millis() as u64,
            }),
        );
        if result.threat_level == ThreatLevel::Critical {
            self.audit.record_alert(
                "critical threat level after forced scan",
                Severity::Critical,
                Some(metadata! { "active_threats" => result.active_threats }),
            );
        }
        result
    }

    /// Snapshot for health reporting. `recent_alerts` covers the last hour.
    pub fn status(&self) -> SecurityStatus {
        let now = self.clock.now();
        let recent_alerts = self
            .audit
            .count_since(Some(AuditEventType::SecurityAlert), now - Duration::hours(1));
        let state = self.state.lock().expect("monitor lock poisoned");
        SecurityStatus {
            monitoring_active: state.monitoring,
            active_threats: state.patterns.iter().filter(|p| p.is_active).count(),
            recent_alerts,
            threat_level: state.threat_level,
            timestamp: now,
        }
    }

    /// Copy of the pattern set with current activation state.
    pub fn patterns(&self) -> Vec<ThreatPattern> {
        self.state.lock().expect("monitor lock poisoned").patterns.clone()
    }

    /// Copy of the rolling counters.
    pub fn metrics(&self) -> SecurityMetrics {
        self.state.lock().expect("monitor lock poisoned").metrics.clone()
    }

    /// Level derived from the active patterns at the last observation or sweep.
    pub fn threat_level(&self) -> ThreatLevel {
        self.state.lock().expect("monitor lock poisoned").threat_level
    }

    /// Mark whether background schedules are driving this monitor.
    pub fn set_monitoring(&self, active: bool) {
        self.state.lock().expect("monitor lock poisoned").monitoring = active;
    }

    /// Whether background schedules are running.
    pub fn is_monitoring(&self) -> bool {
        self.state.lock().expect("monitor lock poisoned").monitoring
    }

    fn emit(&self, alert: PendingAlert) {
        warn!(severity = ?alert.severity, "{}", alert.message);
        self.audit
            .record_alert(&alert.message, alert.severity, Some(alert.metadata));
    }
}
