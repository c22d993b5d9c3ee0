//! Long-term incident memory
//!
//! Resolved incidents are stored as post-mortem documents and recalled on the
//! first attempt of later missions. Both operations are best-effort: the
//! Commander logs failures and carries on.

use crate::error::MemoryError;
use crate::types::{IncidentContext, PlanDescriptor, Severity};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Default similarity a record needs to count as a hit
pub const DEFAULT_THRESHOLD: f64 = 0.5;

/// How an incident was remediated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RemediationType {
    /// Schema change via SQL
    Sql,
    /// Code change via pull request
    GitOps,
    /// Anything else
    Manual,
}

impl RemediationType {
    fn of(plan: Option<&PlanDescriptor>) -> Self {
        match plan {
            Some(PlanDescriptor::GitChange { .. }) => Self::GitOps,
            Some(PlanDescriptor::SqlPatch { statement }) if statement.to_uppercase().contains("ALTER") => Self::Sql,
            _ => Self::Manual,
        }
    }
}

/// A stored post-mortem
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentRecord {
    /// Incident id (record key)
    pub incident_id: String,
    /// Embedded document text
    pub document: String,
    /// Alert error code
    pub error_code: String,
    /// Alert message
    pub message: String,
    /// Alert severity
    pub severity: Severity,
    /// Alert source
    pub source: String,
    /// Alert time
    pub timestamp: DateTime<Utc>,
    /// Remediation family
    pub remediation_type: RemediationType,
}

impl IncidentRecord {
    /// Build a record from a resolved context. Incidents without a root
    /// cause are not worth remembering.
    #[must_use]
    pub fn from_context(ctx: &IncidentContext) -> Option<Self> {
        let root_cause = ctx.root_cause_hypothesis.as_ref()?;
        let fix = ctx
            .plan
            .as_ref()
            .map_or_else(|| "None".to_string(), ToString::to_string);
        let alert = &ctx.alert;
        Some(Self {
            incident_id: ctx.incident_id.clone(),
            document: format!(
                "Error Code: {}. Message: {}. Root Cause: {}. Fix: {}",
                alert.error_code, alert.message, root_cause, fix
            ),
            error_code: alert.error_code.clone(),
            message: alert.message.clone(),
            severity: alert.severity,
            source: alert.source.clone(),
            timestamp: alert.timestamp,
            remediation_type: RemediationType::of(ctx.plan.as_ref()),
        })
    }

    fn key(&self) -> String {
        format!("{} {}", self.error_code, self.message)
    }
}

/// A recalled record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryHit {
    /// Incident id
    pub incident_id: String,
    /// Similarity in `[0, 1]`
    pub score: f64,
}

/// Long-term memory capability
#[async_trait]
pub trait IncidentMemory: Send + Sync {
    /// Records similar to the query, best first
    async fn recall(&self, query: &str, limit: usize) -> Result<Vec<MemoryHit>, MemoryError>;

    /// Remember a resolved incident
    async fn store(&self, record: IncidentRecord) -> Result<(), MemoryError>;
}

fn tokens(text: &str) -> HashSet<String> {
    text.split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Jaccard similarity of two token sets
#[must_use]
pub fn jaccard(a: &str, b: &str) -> f64 {
    let a = tokens(a);
    let b = tokens(b);
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let shared = a.intersection(&b).count();
    let union = a.union(&b).count();
    shared as f64 / union as f64
}

/// In-process memory ranked by token-set similarity of the query against
/// each record's error code and message
#[derive(Debug)]
pub struct InMemoryIncidentMemory {
    records: DashMap<String, IncidentRecord>,
    threshold: f64,
}

impl Default for InMemoryIncidentMemory {
    fn default() -> Self {
        Self {
            records: DashMap::new(),
            threshold: DEFAULT_THRESHOLD,
        }
    }
}

impl InMemoryIncidentMemory {
    /// Create empty memory
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With hit threshold
    #[must_use]
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    /// Stored record count
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check if empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Look up one record
    #[must_use]
    pub fn get(&self, incident_id: &str) -> Option<IncidentRecord> {
        self.records.get(incident_id).map(|r| r.value().clone())
    }

    /// Write a JSON snapshot
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), MemoryError> {
        let mut records: Vec<IncidentRecord> = self.records.iter().map(|r| r.value().clone()).collect();
        records.sort_by(|a, b| a.incident_id.cmp(&b.incident_id));
        let text = serde_json::to_string_pretty(&records)?;
        std::fs::write(path, text)?;
        Ok(())
    }

    /// Read a JSON snapshot; a missing file yields empty memory
    pub fn load(path: impl AsRef<Path>) -> Result<Self, MemoryError> {
        let path = path.as_ref();
        let memory = Self::new();
        if !path.exists() {
            return Ok(memory);
        }
        let text = std::fs::read_to_string(path)?;
        let records: Vec<IncidentRecord> = serde_json::from_str(&text)?;
        for record in records {
            memory.records.insert(record.incident_id.clone(), record);
        }
        Ok(memory)
    }
}

#[async_trait]
impl IncidentMemory for InMemoryIncidentMemory {
    async fn recall(&self, query: &str, limit: usize) -> Result<Vec<MemoryHit>, MemoryError> {
        let mut hits: Vec<MemoryHit> = self
            .records
            .iter()
            .filter_map(|entry| {
                let score = jaccard(query, &entry.value().key());
                (score >= self.threshold).then(|| MemoryHit {
                    incident_id: entry.key().clone(),
                    score,
                })
            })
            .collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.incident_id.cmp(&b.incident_id)));
        hits.truncate(limit);
        Ok(hits)
    }

    async fn store(&self, record: IncidentRecord) -> Result<(), MemoryError> {
        tracing::info!(incident_id = %record.incident_id, "incident memorized");
        self.records.insert(record.incident_id.clone(), record);
        Ok(())
    }
}
