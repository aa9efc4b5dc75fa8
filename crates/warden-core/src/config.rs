// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Security subsystem configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SecurityError};

/// Whole seconds as a chrono duration, saturating instead of overflowing.
fn chrono_secs(secs: u64) -> chrono::Duration {
    i64::try_from(secs)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .unwrap_or(chrono::Duration::MAX)
}

/// Top-level settings, persisted as JSON next to the application data.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    pub crypto: CryptoConfig,
    pub audit: AuditConfig,
    pub compliance: ComplianceConfig,
    pub monitor: MonitorConfig,
}

impl SecurityConfig {
    /// Load settings from `path`, falling back to defaults if the file does
    /// not exist. A file that exists but does not parse, or that sets a
    /// schedule interval to zero, is an error.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&data)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the background schedules cannot run with.
    pub fn validate(&self) -> Result<()> {
        let intervals = [
            ("monitor.sweep_interval_secs", self.monitor.sweep_interval_secs),
            (
                "monitor.metrics_reset_interval_secs",
                self.monitor.metrics_reset_interval_secs,
            ),
        ];
        match intervals.iter().find(|(_, secs)| *secs == 0) {
            Some((name, _)) => Err(SecurityError::InvalidDataFormat(format!(
                "{name} must be at least 1"
            ))),
            None => Ok(()),
        }
    }

    /// Persist settings to `path` as pretty-printed JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoConfig {
    /// SHA-256 applications in key derivation (10,000 rounds in batches of 1,000).
    pub kdf_iterations: u32,
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            kdf_iterations: 10_000 / 1_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Maximum events retained in memory.
    pub cache_capacity: usize,
    /// Events in the trailing window above which a high-frequency alert fires.
    pub high_frequency_threshold: usize,
    pub high_frequency_window_secs: u64,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            cache_capacity: 1000,
            high_frequency_threshold: 50,
            high_frequency_window_secs: 300,
        }
    }
}

impl AuditConfig {
    pub fn high_frequency_window(&self) -> chrono::Duration {
        chrono_secs(self.high_frequency_window_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComplianceConfig {
    pub max_payload_bytes: usize,
    pub retention_days: u32,
    /// Minimum report score (0–100) considered compliant.
    pub compliance_threshold: f64,
    /// Scores above this are flagged as implausible.
    pub score_ceiling: i64,
    /// A score at least this high ...
    pub fast_score_threshold: i64,
    /// ... reached in under this many seconds is flagged as implausible.
    pub fast_score_min_duration_secs: f64,
}

impl Default for ComplianceConfig {
    fn default() -> Self {
        Self {
            max_payload_bytes: 1024 * 1024,
            retention_days: 365,
            compliance_threshold: 95.0,
            score_ceiling: 1_000_000,
            fast_score_threshold: 10_000,
            fast_score_min_duration_secs: 60.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub sweep_interval_secs: u64,
    pub metrics_reset_interval_secs: u64,
    /// Quiet period after which an active pattern is deactivated.
    pub cooldown_secs: u64,
    /// Same-operation accesses within `access_burst_window_secs` that trip an alert.
    pub access_burst_threshold: usize,
    pub access_burst_window_secs: u64,
    /// Cumulative access failures after which alerts escalate.
    pub access_failure_threshold: u64,
    /// Observed events between periodic summary records.
    pub summary_every: u64,
    /// Access-window size treated as resource pressure.
    pub access_window_soft_cap: usize,
    /// Forced scan: total events per reset window considered an outlier.
    pub scan_event_threshold: u64,
    /// Forced scan: recent failures considered an outlier.
    pub scan_failure_threshold: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 30,
            metrics_reset_interval_secs: 3600,
            cooldown_secs: 300,
            access_burst_threshold: 10,
            access_burst_window_secs: 60,
            access_failure_threshold: 5,
            summary_every: 100,
            access_window_soft_cap: 10_000,
            scan_event_threshold: 1_000,
            scan_failure_threshold: 10,
        }
    }
}

impl MonitorConfig {
    /// Sweep period, never shorter than one second.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    /// Metrics reset period, never shorter than one second.
    pub fn metrics_reset_interval(&self) -> Duration {
        Duration::from_secs(self.metrics_reset_interval_secs.max(1))
    }

    pub fn cooldown(&self) -> chrono::Duration {
        chrono_secs(self.cooldown_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = SecurityConfig::load(dir.path().join("absent.json")).unwrap();
        assert_eq!(config, SecurityConfig::default());
        assert_eq!(config.audit.cache_capacity, 1000);
        assert_eq!(config.crypto.kdf_iterations, 10);
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("security.json");
        std::fs::write(&path, r#"{"audit":{"cache_capacity":5}}"#).unwrap();

        let config = SecurityConfig::load(&path).unwrap();
        assert_eq!(config.audit.cache_capacity, 5);
        assert_eq!(config.audit.high_frequency_threshold, 50);
        assert_eq!(config.monitor.sweep_interval_secs, 30);
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("security.json");
        let mut config = SecurityConfig::default();
        config.compliance.retention_days = 30;
        config.save(&path).unwrap();

        assert_eq!(SecurityConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn zero_schedule_interval_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("security.json");
        std::fs::write(&path, r#"{"monitor":{"sweep_interval_secs":0}}"#).unwrap();
        assert!(matches!(
            SecurityConfig::load(&path),
            Err(SecurityError::InvalidDataFormat(msg)) if msg.contains("sweep_interval_secs")
        ));

        std::fs::write(&path, r#"{"monitor":{"metrics_reset_interval_secs":0}}"#).unwrap();
        assert!(SecurityConfig::load(&path).is_err());
    }

    #[test]
    fn interval_helpers_clamp_and_saturate() {
        let monitor = MonitorConfig {
            sweep_interval_secs: 0,
            metrics_reset_interval_secs: 0,
            cooldown_secs: u64::MAX,
            ..MonitorConfig::default()
        };
        assert_eq!(monitor.sweep_interval(), Duration::from_secs(1));
        assert_eq!(monitor.metrics_reset_interval(), Duration::from_secs(1));
        assert_eq!(monitor.cooldown(), chrono::Duration::MAX);

        let audit = AuditConfig {
            high_frequency_window_secs: u64::MAX,
            ..AuditConfig::default()
        };
        assert_eq!(audit.high_frequency_window(), chrono::Duration::MAX);
        assert_eq!(
            AuditConfig::default().high_frequency_window(),
            chrono::Duration::seconds(300)
        );
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("security.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(SecurityConfig::load(&path).is_err());
    }
}
