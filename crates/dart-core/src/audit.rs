//! Hash-chained audit trail
//!
//! Agents narrate what they do here. Each record is chained to the previous
//! one with SHA-256 so a trail can be checked for tampering after the fact.
//! Every record is also mirrored to `tracing`.

use crate::error::AuditError;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Who wrote a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Agent {
    /// Mission orchestrator
    Commander,
    /// Root-cause analysis
    Investigator,
    /// Vendor probe and DR
    VendorLiaison,
    /// Plan review and human gate
    SafetyReviewer,
    /// Plan drafting and execution
    RemediationEngineer,
    /// Long-term memory
    Memory,
}

impl Agent {
    /// Stable label
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Commander => "commander",
            Self::Investigator => "investigator",
            Self::VendorLiaison => "vendor_liaison",
            Self::SafetyReviewer => "safety_reviewer",
            Self::RemediationEngineer => "remediation_engineer",
            Self::Memory => "memory",
        }
    }
}

impl fmt::Display for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Record level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditLevel {
    /// Narration
    Info,
    /// Degraded but continuing
    Warn,
    /// Step failed
    Error,
    /// Step succeeded
    Success,
}

impl AuditLevel {
    fn tag(self) -> u8 {
        match self {
            Self::Info => 0,
            Self::Warn => 1,
            Self::Error => 2,
            Self::Success => 3,
        }
    }
}

/// One audit record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Position in the trail
    pub seq: u64,
    /// Record id
    pub event_id: String,
    /// Write time
    pub timestamp: DateTime<Utc>,
    /// Mission the record belongs to
    pub incident_id: String,
    /// Author
    pub agent: Agent,
    /// Level
    pub level: AuditLevel,
    /// Message
    pub message: String,
    /// Hash of the previous record
    pub prev_hash: [u8; 32],
    /// Hash of this record
    pub hash: [u8; 32],
}

impl AuditEvent {
    /// Hex form of the record hash
    #[must_use]
    pub fn hash_hex(&self) -> String {
        hex::encode(self.hash)
    }
}

/// Append-only audit trail shared by all agents
#[derive(Debug, Default)]
pub struct AuditTrail {
    inner: Mutex<Vec<AuditEvent>>,
}

impl AuditTrail {
    /// Create empty trail
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record and mirror it to tracing. Returns its sequence number.
    pub fn record(&self, incident_id: &str, agent: Agent, level: AuditLevel, message: impl Into<String>) -> u64 {
        let message = message.into();
        match level {
            AuditLevel::Info | AuditLevel::Success => {
                tracing::info!(incident_id, agent = agent.as_str(), "{}", message);
            }
            AuditLevel::Warn => tracing::warn!(incident_id, agent = agent.as_str(), "{}", message),
            AuditLevel::Error => tracing::error!(incident_id, agent = agent.as_str(), "{}", message),
        }

        let mut guard = self.inner.lock();
        let prev_hash = guard.last().map(|e| e.hash).unwrap_or([0u8; 32]);
        let seq = guard.len() as u64;
        let mut event = AuditEvent {
            seq,
            event_id: ulid::Ulid::new().to_string(),
            timestamp: Utc::now(),
            incident_id: incident_id.to_string(),
            agent,
            level,
            message,
            prev_hash,
            hash: [0u8; 32],
        };
        event.hash = compute_hash(&event);
        guard.push(event);
        seq
    }

    /// Snapshot of every record
    #[must_use]
    pub fn events(&self) -> Vec<AuditEvent> {
        self.inner.lock().clone()
    }

    /// Records of one mission
    #[must_use]
    pub fn events_for(&self, incident_id: &str) -> Vec<AuditEvent> {
        self.inner
            .lock()
            .iter()
            .filter(|e| e.incident_id == incident_id)
            .cloned()
            .collect()
    }

    /// Number of records one agent wrote for one mission
    #[must_use]
    pub fn count(&self, incident_id: &str, agent: Agent) -> usize {
        self.inner
            .lock()
            .iter()
            .filter(|e| e.incident_id == incident_id && e.agent == agent)
            .count()
    }

    /// Record count
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Check if empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Walk the chain and recompute every hash
    pub fn verify_integrity(&self) -> Result<(), AuditError> {
        let guard = self.inner.lock();
        let mut prev = [0u8; 32];
        for e in guard.iter() {
            if e.prev_hash != prev || e.hash != compute_hash(e) {
                return Err(AuditError::IntegrityViolation(e.seq));
            }
            prev = e.hash;
        }
        Ok(())
    }

    #[cfg(test)]
    fn tamper(&self, seq: usize, message: &str) {
        if let Some(e) = self.inner.lock().get_mut(seq) {
            e.message = message.to_string();
        }
    }
}

fn compute_hash(event: &AuditEvent) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(event.seq.to_le_bytes());
    hasher.update(event.event_id.as_bytes());
    hasher.update(event.timestamp.timestamp_millis().to_le_bytes());
    hasher.update(event.incident_id.as_bytes());
    hasher.update([0]);
    hasher.update(event.agent.as_str().as_bytes());
    hasher.update([event.level.tag()]);
    hasher.update(event.message.as_bytes());
    hasher.update([0]);
    hasher.update(event.prev_hash);
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_verifies() {
        let trail = AuditTrail::new();
        trail.record("inc-1", Agent::Commander, AuditLevel::Info, "Mission started");
        trail.record("inc-1", Agent::VendorLiaison, AuditLevel::Warn, "Probe attempt 1 failed");
        trail.record("inc-2", Agent::Commander, AuditLevel::Info, "Mission started");

        assert_eq!(trail.len(), 3);
        assert!(trail.verify_integrity().is_ok());
        let events = trail.events();
        assert_eq!(events[1].prev_hash, events[0].hash);
        assert_eq!(events[0].hash_hex().len(), 64);
    }

    #[test]
    fn tampering_is_detected() {
        let trail = AuditTrail::new();
        trail.record("inc-1", Agent::Commander, AuditLevel::Info, "a");
        trail.record("inc-1", Agent::Commander, AuditLevel::Info, "b");
        trail.tamper(0, "rewritten");
        assert_eq!(trail.verify_integrity(), Err(AuditError::IntegrityViolation(0)));
    }

    #[test]
    fn filters_by_incident_and_agent() {
        let trail = AuditTrail::new();
        trail.record("inc-1", Agent::VendorLiaison, AuditLevel::Info, "probe");
        trail.record("inc-1", Agent::Investigator, AuditLevel::Info, "logs");
        trail.record("inc-2", Agent::VendorLiaison, AuditLevel::Info, "probe");

        assert_eq!(trail.events_for("inc-1").len(), 2);
        assert_eq!(trail.count("inc-1", Agent::VendorLiaison), 1);
        assert_eq!(trail.count("inc-3", Agent::VendorLiaison), 0);
    }
}
