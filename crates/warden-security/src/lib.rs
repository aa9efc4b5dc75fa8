// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Warden — Security subsystem.
//
// Authenticated encryption of game data with locally managed keys, an
// append-only audit trail, payload compliance checks, and rule-based threat
// monitoring, fronted by a single fail-closed coordinator.

pub mod audit;
pub mod compliance;
pub mod coordinator;
pub mod crypto;
pub mod integrity;
pub mod scheduler;
pub mod threat;

pub use audit::{AuditQuery, AuditTrail, EventDetails};
pub use compliance::{ComplianceEngine, ComplianceReport, ComplianceRule, ComplianceViolation};
pub use coordinator::{
    ComponentHealth, IncidentResponse, SecurityCoordinator, SecurityHealthStatus, SecurityReport,
};
pub use crypto::CryptoBox;
pub use integrity::{hash_bytes, verify_hash};
pub use scheduler::Scheduler;
pub use threat::{
    Detector, Observation, ScanResult, SecurityMetrics, SecurityStatus, SweepOutcome,
    ThreatMonitor, ThreatPattern,
};
