// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Audit trail — append-only record of every security-relevant occurrence.
//
// Each event is kept in a bounded in-memory ring (newest last) and appended
// as one JSON line to the current day's log file:
//
//   audit-YYYY-MM-DD.jsonl
//     {"id":"…","timestamp":"2026-10-19T08:00:00Z","event_type":"data_access",…}
//
// Writing to the sink is fire-and-forget: a failed append is logged and
// dropped so that auditing never aborts the operation being audited.

use std::collections::VecDeque;
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use warden_bridge::{AuditSink, Clock};
use warden_core::config::AuditConfig;
use warden_core::error::Result;
use warden_core::{
    AccessOperation, AuditEvent, AuditEventType, EventId, MetaValue, Metadata, Severity, metadata,
};

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Optional attributes of an event being recorded.
#[derive(Debug, Clone, Default)]
pub struct EventDetails {
    pub user_id: Option<String>,
    /// Overrides the trail's own session id.
    pub session_id: Option<String>,
    pub game_data: Option<Metadata>,
    pub metadata: Option<Metadata>,
}

impl EventDetails {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn maybe_user(mut self, user_id: Option<&str>) -> Self {
        self.user_id = user_id.map(str::to_owned);
        self
    }

    pub fn session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn game_data(mut self, data: Metadata) -> Self {
        self.game_data = Some(data);
        self
    }

    pub fn metadata(mut self, data: Metadata) -> Self {
        self.metadata = Some(data);
        self
    }
}

/// Filter for [`AuditTrail::query`]. All supplied filters must match.
#[derive(Debug, Clone)]
pub struct AuditQuery {
    pub user_id: Option<String>,
    pub event_type: Option<AuditEventType>,
    pub since: Option<DateTime<Utc>>,
    pub limit: usize,
}

impl Default for AuditQuery {
    fn default() -> Self {
        Self {
            user_id: None,
            event_type: None,
            since: None,
            limit: 100,
        }
    }
}

impl AuditQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn event_type(mut self, event_type: AuditEventType) -> Self {
        self.event_type = Some(event_type);
        self
    }

    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    fn matches(&self, event: &AuditEvent) -> bool {
        self.user_id
            .as_deref()
            .is_none_or(|u| event.user_id.as_deref() == Some(u))
            && self.event_type.is_none_or(|t| event.event_type == t)
            && self.since.is_none_or(|s| event.timestamp >= s)
    }
}

// ---------------------------------------------------------------------------
// Audit trail
// ---------------------------------------------------------------------------

struct TrailState {
    events: VecDeque<AuditEvent>,
    /// Cleared once a high-frequency alert fires; set again when volume
    /// drops back to the threshold.
    high_frequency_armed: bool,
}

/// Append-only audit log with a bounded in-memory cache.
pub struct AuditTrail {
    sink: Arc<dyn AuditSink>,
    clock: Arc<dyn Clock>,
    config: AuditConfig,
    session_id: String,
    state: Mutex<TrailState>,
}

impl AuditTrail {
    /// Open the trail, reloading today's log file into the cache.
    ///
    /// Lines that fail to parse are skipped. Only the most recent
    /// `cache_capacity` events are kept.
    pub fn open(sink: Arc<dyn AuditSink>, clock: Arc<dyn Clock>, config: AuditConfig) -> Self {
        let today = clock.today();
        let mut events = VecDeque::new();

        match sink.read_day(today) {
            Ok(Some(contents)) => {
                let mut skipped = 0usize;
                for line in contents.lines().filter(|l| !l.trim().is_empty()) {
                    match serde_json::from_str::<AuditEvent>(line) {
                        Ok(event) => {
                            events.push_back(event);
                            if events.len() > config.cache_capacity {
                                events.pop_front();
                            }
                        }
                        Err(_) => skipped += 1,
                    }
                }
                if skipped > 0 {
                    warn!(skipped, %today, "skipped unparsable audit log lines");
                }
                debug!(loaded = events.len(), %today, "audit log reloaded");
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, %today, "could not read audit log"),
        }

        Self {
            sink,
            clock,
            config,
            session_id: Uuid::new_v4().to_string(),
            state: Mutex::new(TrailState {
                events,
                high_frequency_armed: true,
            }),
        }
    }

    /// Session id stamped on events that do not carry their own.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Record an event, then run the self-monitoring heuristics.
    pub fn record(
        &self,
        event_type: AuditEventType,
        severity: Severity,
        details: EventDetails,
    ) -> AuditEvent {
        let event = self.build(event_type, severity, details);
        self.append(event.clone());
        self.self_monitor(&event);
        event
    }

    /// Record a `security_alert` carrying `alert_message`.
    pub fn record_alert(
        &self,
        message: &str,
        severity: Severity,
        metadata: Option<Metadata>,
    ) -> AuditEvent {
        self.record(
            AuditEventType::SecurityAlert,
            severity,
            EventDetails::new().metadata(alert_metadata(message, metadata)),
        )
    }

    /// Record a `data_access` event. Failures are logged at warning.
    pub fn record_data_access(
        &self,
        resource: &str,
        operation: AccessOperation,
        user_id: Option<&str>,
        success: bool,
    ) -> AuditEvent {
        let severity = if success { Severity::Info } else { Severity::Warning };
        self.record(
            AuditEventType::DataAccess,
            severity,
            EventDetails::new().maybe_user(user_id).metadata(metadata! {
                "resource" => resource,
                "operation" => operation.as_str(),
                "success" => success,
            }),
        )
    }

    /// Record the outcome of a compliance check.
    pub fn record_compliance_check(
        &self,
        check_type: &str,
        result: bool,
        details: Option<Metadata>,
    ) -> AuditEvent {
        let mut meta = details.unwrap_or_default();
        meta.insert("check_type".into(), check_type.into());
        meta.insert("result".into(), result.into());
        let severity = if result { Severity::Info } else { Severity::Warning };
        self.record(
            AuditEventType::ComplianceCheck,
            severity,
            EventDetails::new().metadata(meta),
        )
    }

    /// Up to `limit` most recent cached events matching every filter, oldest
    /// first.
    pub fn query(&self, query: &AuditQuery) -> Vec<AuditEvent> {
        let state = self.state.lock().expect("audit lock poisoned");
        let mut matched: Vec<AuditEvent> = state
            .events
            .iter()
            .filter(|e| query.matches(e))
            .cloned()
            .collect();
        let skip = matched.len().saturating_sub(query.limit);
        matched.split_off(skip)
    }

    /// Number of cached events at or after `since`, optionally of one type.
    pub fn count_since(&self, event_type: Option<AuditEventType>, since: DateTime<Utc>) -> usize {
        let state = self.state.lock().expect("audit lock poisoned");
        state
            .events
            .iter()
            .filter(|e| e.timestamp >= since && event_type.is_none_or(|t| e.event_type == t))
            .count()
    }

    /// Copy of the whole cache, oldest first.
    pub fn snapshot(&self) -> Vec<AuditEvent> {
        let state = self.state.lock().expect("audit lock poisoned");
        state.events.iter().cloned().collect()
    }

    /// Number of events in the in-memory cache.
    pub fn len(&self) -> usize {
        self.state.lock().expect("audit lock poisoned").events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write the whole cache to `dest` as a pretty-printed JSON array.
    pub fn export<W: Write>(&self, mut dest: W) -> Result<()> {
        let json = serde_json::to_vec_pretty(&self.snapshot())?;
        dest.write_all(&json)?;
        dest.flush()?;
        info!(bytes = json.len(), "audit trail exported");
        Ok(())
    }

    /// [`export`](Self::export) into a newly created file, replacing any
    /// existing one.
    pub fn export_to_path(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = std::fs::File::create(path)?;
        self.export(std::io::BufWriter::new(file))
    }

    /// Record a test event and report whether the sink accepted it.
    pub fn check_write(&self) -> bool {
        let event = self.build(
            AuditEventType::ComplianceCheck,
            Severity::Info,
            EventDetails::new().metadata(metadata! {
                "check_type" => "audit_write_check",
                "result" => true,
            }),
        );
        self.append(event)
    }

    fn build(&self, event_type: AuditEventType, severity: Severity, details: EventDetails) -> AuditEvent {
        AuditEvent {
            id: EventId::new(),
            timestamp: self.clock.now(),
            event_type,
            severity,
            user_id: details.user_id,
            session_id: details.session_id.unwrap_or_else(|| self.session_id.clone()),
            game_data: details.game_data,
            metadata: details.metadata,
            ip_address: None,
            user_agent: None,
        }
    }

    /// Cache, persist, and forward one event. Returns whether the sink write
    /// succeeded.
    fn append(&self, event: AuditEvent) -> bool {
        forward_to_tracing(&event);

        let mut state = self.state.lock().expect("audit lock poisoned");
        let written = match serde_json::to_string(&event) {
            Ok(line) => match self.sink.append_line(event.timestamp.date_naive(), &line) {
                Ok(()) => true,
                Err(e) => {
                    error!(error = %e, event_id = %event.id, "failed to write audit event");
                    false
                }
            },
            Err(e) => {
                error!(error = %e, event_id = %event.id, "failed to serialize audit event");
                false
            }
        };

        state.events.push_back(event);
        while state.events.len() > self.config.cache_capacity {
            state.events.pop_front();
        }
        written
    }

    /// Heuristics run after each public `record`. Alerts raised here bypass
    /// self-monitoring.
    fn self_monitor(&self, event: &AuditEvent) {
        if event.event_type == AuditEventType::DataAccess
            && event.meta("success").and_then(MetaValue::as_bool) == Some(false)
        {
            let mut meta = Metadata::new();
            for key in ["resource", "operation"] {
                if let Some(v) = event.meta(key) {
                    meta.insert(key.into(), v.clone());
                }
            }
            meta.insert("source_event".into(), event.id.to_string().into());
            self.emit_alert(
                "failed data access detected",
                Severity::Warning,
                event.user_id.clone(),
                meta,
            );
        }

        let since = self
            .clock
            .now()
            .checked_sub_signed(self.config.high_frequency_window())
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let volume = self.count_since(None, since);
        let fire = {
            let mut state = self.state.lock().expect("audit lock poisoned");
            if volume > self.config.high_frequency_threshold {
                std::mem::replace(&mut state.high_frequency_armed, false)
            } else {
                state.high_frequency_armed = true;
                false
            }
        };
        if fire {
            self.emit_alert(
                "high frequency activity",
                Severity::Warning,
                None,
                metadata! {
                    "events_in_window" => volume,
                    "window_secs" => self.config.high_frequency_window_secs,
                    "threshold" => self.config.high_frequency_threshold,
                },
            );
        }
    }

    fn emit_alert(&self, message: &str, severity: Severity, user_id: Option<String>, meta: Metadata) {
        let details = EventDetails {
            user_id,
            metadata: Some(alert_metadata(message, Some(meta))),
            ..EventDetails::default()
        };
        let event = self.build(AuditEventType::SecurityAlert, severity, details);
        self.append(event);
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn alert_metadata(message: &str, extra: Option<Metadata>) -> Metadata {
    let mut meta = extra.unwrap_or_default();
    meta.insert("alert_message".into(), message.into());
    meta
}

fn forward_to_tracing(event: &AuditEvent) {
    let kind = event.event_type.as_str();
    let message = event
        .meta("alert_message")
        .and_then(MetaValue::as_str)
        .unwrap_or(kind);
    let user = event.user_id.as_deref().unwrap_or("-");
    match event.severity {
        Severity::Info => info!(target: "warden::audit", event_type = kind, user, "{message}"),
        Severity::Warning => warn!(target: "warden::audit", event_type = kind, user, "{message}"),
        Severity::Error | Severity::Critical => {
            error!(target: "warden::audit", event_type = kind, user, severity = ?event.severity, "{message}")
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};
    use warden_bridge::{ManualClock, MemorySink};

    use super::*;

    struct Fixture {
        trail: AuditTrail,
        clock: Arc<ManualClock>,
        sink: Arc<MemorySink>,
    }

    fn fixture_with(config: AuditConfig) -> Fixture {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 10, 19, 9, 0, 0).unwrap(),
        ));
        let sink = Arc::new(MemorySink::new());
        let trail = AuditTrail::open(sink.clone(), clock.clone(), config);
        Fixture { trail, clock, sink }
    }

    fn fixture() -> Fixture {
        fixture_with(AuditConfig::default())
    }

    fn alerts_with(trail: &AuditTrail, message: &str) -> usize {
        trail
            .query(&AuditQuery::new().event_type(AuditEventType::SecurityAlert).limit(usize::MAX))
            .iter()
            .filter(|e| e.meta("alert_message").and_then(MetaValue::as_str) == Some(message))
            .count()
    }

    #[test]
    fn record_appends_a_json_line_for_today() {
        let f = fixture();
        let event = f.trail.record(
            AuditEventType::GameStart,
            Severity::Info,
            EventDetails::new().user("p1"),
        );

        let lines = f.sink.lines(f.clock.today());
        assert_eq!(lines.len(), 1);
        let parsed: AuditEvent = serde_json::from_str(&lines[0]).unwrap();
        assert_eq!(parsed, event);
        assert_eq!(parsed.session_id, f.trail.session_id());
        assert_eq!(f.trail.len(), 1);
    }

    #[test]
    fn new_day_goes_to_a_new_file() {
        let f = fixture();
        let first_day = f.clock.today();
        f.trail.record(AuditEventType::GameStart, Severity::Info, EventDetails::new());
        f.clock.advance(Duration::days(1));
        f.trail.record(AuditEventType::GameEnd, Severity::Info, EventDetails::new());

        assert_eq!(f.sink.lines(first_day).len(), 1);
        assert_eq!(f.sink.lines(f.clock.today()).len(), 1);
    }

    #[test]
    fn cache_keeps_only_the_most_recent() {
        let f = fixture_with(AuditConfig {
            cache_capacity: 5,
            ..AuditConfig::default()
        });
        for seq in 0..8i64 {
            f.trail.record(
                AuditEventType::ScoreUpdate,
                Severity::Info,
                EventDetails::new().metadata(metadata! { "seq" => seq }),
            );
        }
        let cached = f.trail.snapshot();
        assert_eq!(cached.len(), 5);
        let seqs: Vec<i64> = cached
            .iter()
            .filter_map(|e| e.meta("seq").and_then(MetaValue::as_i64))
            .collect();
        assert_eq!(seqs, vec![3, 4, 5, 6, 7]);
        // The file keeps everything.
        assert_eq!(f.sink.lines(f.clock.today()).len(), 8);
    }

    #[test]
    fn query_applies_all_filters_and_keeps_order() {
        let f = fixture();
        let t0 = f.clock.now();
        f.trail.record(AuditEventType::ScoreUpdate, Severity::Info, EventDetails::new().user("a"));
        f.clock.advance(Duration::seconds(10));
        f.trail.record(AuditEventType::ScoreUpdate, Severity::Info, EventDetails::new().user("b"));
        f.trail.record(AuditEventType::GameEnd, Severity::Info, EventDetails::new().user("a"));
        f.clock.advance(Duration::seconds(10));
        let wanted_1 =
            f.trail.record(AuditEventType::ScoreUpdate, Severity::Info, EventDetails::new().user("a"));
        let wanted_2 =
            f.trail.record(AuditEventType::ScoreUpdate, Severity::Warning, EventDetails::new().user("a"));

        let result = f.trail.query(
            &AuditQuery::new()
                .user("a")
                .event_type(AuditEventType::ScoreUpdate)
                .since(t0 + Duration::seconds(5)),
        );
        assert_eq!(result, vec![wanted_1, wanted_2.clone()]);

        let last = f.trail.query(&AuditQuery::new().user("a").limit(1));
        assert_eq!(last, vec![wanted_2]);
    }

    #[test]
    fn reload_skips_corrupt_lines() {
        let f = fixture();
        let good = f.trail.record(AuditEventType::GameStart, Severity::Info, EventDetails::new());
        let mut contents = f.sink.read_day(f.clock.today()).unwrap().unwrap();
        contents.push_str("{not json}\n");
        contents.push_str(&serde_json::to_string(&good).unwrap());
        contents.push('\n');
        contents.push_str(r#"{"id":"trunc"#);
        f.sink.put_raw(f.clock.today(), contents);

        let reopened = AuditTrail::open(f.sink.clone(), f.clock.clone(), AuditConfig::default());
        assert_eq!(reopened.len(), 2);
        assert!(reopened.snapshot().iter().all(|e| e.id == good.id));
    }

    #[test]
    fn reload_is_capped() {
        let f = fixture();
        for _ in 0..6 {
            f.trail.record(AuditEventType::ScoreUpdate, Severity::Info, EventDetails::new());
        }
        let reopened = AuditTrail::open(
            f.sink.clone(),
            f.clock.clone(),
            AuditConfig {
                cache_capacity: 4,
                ..AuditConfig::default()
            },
        );
        assert_eq!(reopened.len(), 4);
    }

    #[test]
    fn sink_failure_is_swallowed() {
        let f = fixture();
        f.sink.set_failing(true);
        let event = f.trail.record(AuditEventType::GameEnd, Severity::Info, EventDetails::new());
        assert_eq!(f.trail.snapshot(), vec![event]);
        assert!(!f.trail.check_write());

        f.sink.set_failing(false);
        assert!(f.trail.check_write());
    }

    #[test]
    fn failed_access_raises_secondary_alert() {
        let f = fixture();
        f.trail.record_data_access("game_data", AccessOperation::Decrypt, Some("p1"), true);
        assert_eq!(alerts_with(&f.trail, "failed data access detected"), 0);

        let access = f.trail.record_data_access("game_data", AccessOperation::Decrypt, Some("p1"), false);
        assert_eq!(access.severity, Severity::Warning);
        assert_eq!(alerts_with(&f.trail, "failed data access detected"), 1);
    }

    #[test]
    fn high_frequency_alert_fires_once_per_crossing() {
        let f = fixture();
        for _ in 0..51 {
            f.trail.record(AuditEventType::ScoreUpdate, Severity::Info, EventDetails::new());
        }
        assert_eq!(alerts_with(&f.trail, "high frequency activity"), 1);

        for _ in 0..20 {
            f.trail.record(AuditEventType::ScoreUpdate, Severity::Info, EventDetails::new());
        }
        assert_eq!(alerts_with(&f.trail, "high frequency activity"), 1);

        // Once the window drains the alarm re-arms.
        f.clock.advance(Duration::minutes(6));
        for _ in 0..51 {
            f.trail.record(AuditEventType::ScoreUpdate, Severity::Info, EventDetails::new());
        }
        assert_eq!(alerts_with(&f.trail, "high frequency activity"), 2);
    }

    #[test]
    fn fifty_events_stay_quiet() {
        let f = fixture();
        for _ in 0..50 {
            f.trail.record(AuditEventType::ScoreUpdate, Severity::Info, EventDetails::new());
        }
        assert_eq!(alerts_with(&f.trail, "high frequency activity"), 0);
    }

    #[test]
    fn compliance_and_alert_wrappers_tag_metadata() {
        let f = fixture();
        let check = f.trail.record_compliance_check("retention", false, None);
        assert_eq!(check.event_type, AuditEventType::ComplianceCheck);
        assert_eq!(check.meta("result"), Some(&MetaValue::Bool(false)));
        assert_eq!(check.severity, Severity::Warning);

        let alert = f.trail.record_alert("odd", Severity::Error, Some(metadata! { "k" => 1i64 }));
        assert_eq!(alert.meta("alert_message").and_then(MetaValue::as_str), Some("odd"));
        assert_eq!(alert.meta("k"), Some(&MetaValue::Int(1)));
    }

    #[test]
    fn export_writes_pretty_json() {
        let f = fixture();
        f.trail.record(AuditEventType::GameStart, Severity::Info, EventDetails::new());
        f.trail.record(AuditEventType::GameEnd, Severity::Info, EventDetails::new());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("export.json");
        f.trail.export_to_path(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("\n  "));
        let back: Vec<AuditEvent> = serde_json::from_str(&text).unwrap();
        assert_eq!(back, f.trail.snapshot());
    }

    #[test]
    fn export_to_broken_writer_is_an_io_error() {
        struct Broken;
        impl Write for Broken {
            fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
                Err(std::io::Error::other("disk full"))
            }
            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        let f = fixture();
        f.trail.record(AuditEventType::GameStart, Severity::Info, EventDetails::new());
        assert!(matches!(
            f.trail.export(Broken),
            Err(warden_core::SecurityError::Io(_))
        ));
    }
}
