//! Core types for DART
//!
//! Defines the fundamental types for the Commander:
//! - Alerts and their severity
//! - The per-mission incident context and its metrics
//! - Vendor health signals
//! - Remediation plans and safety verdicts
//! - The terminal mission report

use crate::error::{FailureKind, MissionFailure};
use crate::profile::MissionProfile;
use crate::state::MissionState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Error code whose missions always take the stage-cleanup path
pub const DEADLOCK_ERROR_CODE: &str = "ERROR_DEADLOCK_712";

/// Alert severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    /// Informational
    Low,
    /// Degraded pipeline
    Medium,
    /// Broken pipeline
    High,
    /// Business-impacting outage
    Critical,
}

impl Default for Severity {
    fn default() -> Self {
        Severity::Medium
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
            Severity::Critical => "CRITICAL",
        };
        f.write_str(s)
    }
}

/// Incoming alert (immutable once ingested)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    /// Alert identifier from the source system
    pub id: String,
    /// Emitting system
    #[serde(alias = "source_system")]
    pub source: String,
    /// Machine-readable error code
    pub error_code: String,
    /// Human-readable message
    pub message: String,
    /// Severity
    #[serde(default)]
    pub severity: Severity,
    /// When the alert fired
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    /// Recognized mission flags
    #[serde(default)]
    pub metadata: MissionProfile,
}

impl Alert {
    /// Create new alert with default profile
    #[inline]
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        source: impl Into<String>,
        error_code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            error_code: error_code.into(),
            message: message.into(),
            severity: Severity::default(),
            timestamp: Utc::now(),
            metadata: MissionProfile::default(),
        }
    }

    /// With severity
    #[inline]
    #[must_use]
    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    /// With mission profile
    #[inline]
    #[must_use]
    pub fn with_profile(mut self, profile: MissionProfile) -> Self {
        self.metadata = profile;
        self
    }

    /// Memory recall query for this alert
    #[inline]
    #[must_use]
    pub fn recall_query(&self) -> String {
        format!("{} {}", self.error_code, self.message)
    }

    /// Stage-cleanup missions exercise DB remediation and never take the
    /// vendor or already-fixed branches.
    #[must_use]
    pub fn is_stage_cleanup(&self) -> bool {
        self.metadata.is_stage_cleanup() || self.error_code == DEADLOCK_ERROR_CODE
    }
}

/// Reported vendor status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum VendorStatus {
    /// Operational
    #[serde(alias = "healthy")]
    Healthy,
    /// Partially operational
    #[serde(alias = "degraded")]
    Degraded,
    /// Down or unreachable
    #[serde(alias = "outage")]
    Outage,
}

impl std::fmt::Display for VendorStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            VendorStatus::Healthy => "HEALTHY",
            VendorStatus::Degraded => "DEGRADED",
            VendorStatus::Outage => "OUTAGE",
        };
        f.write_str(s)
    }
}

/// Vendor health as reported, plus the vendor's own ground truth
///
/// `internal_truth_is_healthy` may disagree with `status`; a lying vendor
/// reports HEALTHY while its truth flag is false.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VendorHealthSignal {
    /// What the vendor claims
    pub status: VendorStatus,
    /// Vendor message
    pub message: String,
    /// Vendor-side truth
    pub internal_truth_is_healthy: bool,
}

impl VendorHealthSignal {
    /// Degraded signal produced when the vendor cannot be reached
    #[inline]
    #[must_use]
    pub fn outage(message: impl Into<String>) -> Self {
        Self {
            status: VendorStatus::Outage,
            message: message.into(),
            internal_truth_is_healthy: false,
        }
    }

    /// Check reported health
    #[inline]
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.status == VendorStatus::Healthy
    }

    /// Reported healthy while the vendor's truth says otherwise
    #[inline]
    #[must_use]
    pub fn is_deceptive(&self) -> bool {
        self.is_healthy() && !self.internal_truth_is_healthy
    }
}

/// A single collected log line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Emitting service
    #[serde(default)]
    pub service: String,
    /// Log level
    #[serde(default)]
    pub level: String,
    /// Log text
    pub content: String,
    /// Timestamp as reported
    #[serde(default)]
    pub timestamp: Option<String>,
}

impl LogEntry {
    /// Create new log entry
    #[inline]
    #[must_use]
    pub fn new(service: impl Into<String>, level: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            level: level.into(),
            content: content.into(),
            timestamp: None,
        }
    }
}

/// Table evidence captured during investigation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSnapshot {
    /// Table name
    pub table_name: String,
    /// Column names
    pub columns: Vec<String>,
    /// Sample rows
    pub rows: Vec<Vec<serde_json::Value>>,
}

/// Concrete remediation proposed for execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlanDescriptor {
    /// Runtime SQL patch
    SqlPatch {
        /// Statement(s) to deploy
        statement: String,
    },
    /// Code change delivered as a pull request
    GitChange {
        /// Repository
        repo: String,
        /// Branch carrying the fix
        branch: String,
        /// PR title
        title: String,
        /// Patched code
        diff: String,
    },
}

impl PlanDescriptor {
    /// Create SQL patch plan
    #[inline]
    #[must_use]
    pub fn sql(statement: impl Into<String>) -> Self {
        Self::SqlPatch {
            statement: statement.into(),
        }
    }

    /// Text the safety reviewer inspects
    #[inline]
    #[must_use]
    pub fn review_text(&self) -> &str {
        match self {
            Self::SqlPatch { statement } => statement,
            Self::GitChange { diff, .. } => diff,
        }
    }

    /// What a human sees when asked to authorize
    #[must_use]
    pub fn prompt_text(&self) -> String {
        match self {
            Self::SqlPatch { statement } => statement.clone(),
            Self::GitChange { branch, .. } => format!("Merge PR {branch}"),
        }
    }

    /// Workflow label used in summaries
    #[inline]
    #[must_use]
    pub fn method(&self) -> &'static str {
        match self {
            Self::SqlPatch { .. } => "Runtime SQL Patch",
            Self::GitChange { .. } => "GitOps (PR)",
        }
    }

    /// Check for a code change
    #[inline]
    #[must_use]
    pub fn is_git(&self) -> bool {
        matches!(self, Self::GitChange { .. })
    }
}

impl std::fmt::Display for PlanDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SqlPatch { statement } => write!(f, "{statement}"),
            Self::GitChange { title, .. } => write!(f, "Merge PR: {title}"),
        }
    }
}

/// Safety verdict status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum VerdictStatus {
    /// Cleared for execution
    Approved,
    /// Refused
    Rejected,
    /// Not yet reviewed
    Pending,
}

impl std::fmt::Display for VerdictStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            VerdictStatus::Approved => "APPROVED",
            VerdictStatus::Rejected => "REJECTED",
            VerdictStatus::Pending => "PENDING",
        };
        f.write_str(s)
    }
}

/// How a human authorization request ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApprovalOutcome {
    /// Human authorized the action
    Approved,
    /// Human blocked the action
    Denied,
    /// Nobody answered before the deadline
    TimedOut,
}

impl ApprovalOutcome {
    /// Only an explicit approval authorizes execution
    #[inline]
    #[must_use]
    pub fn is_approved(&self) -> bool {
        matches!(self, Self::Approved)
    }

    /// Label recorded on the HITL ledger
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approved => "APPROVED",
            Self::Denied => "BLOCKED",
            Self::TimedOut => "TIMED_OUT",
        }
    }
}

/// Result of a safety review
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyVerdict {
    /// Verdict
    pub status: VerdictStatus,
    /// Trigger reason
    pub reason: String,
    /// Cumulative HITL events for the mission after this review
    pub hitl_events: u32,
    /// Human outcome when a human was consulted
    pub human: Option<ApprovalOutcome>,
}

impl SafetyVerdict {
    /// Create verdict without human involvement
    #[inline]
    #[must_use]
    pub fn automatic(status: VerdictStatus, reason: impl Into<String>, hitl_events: u32) -> Self {
        Self {
            status,
            reason: reason.into(),
            hitl_events,
            human: None,
        }
    }

    /// Check approval
    #[inline]
    #[must_use]
    pub fn is_approved(&self) -> bool {
        self.status == VerdictStatus::Approved
    }

    /// Rejected by an explicit human decision (or its timeout)
    #[inline]
    #[must_use]
    pub fn rejected_by_human(&self) -> bool {
        self.status == VerdictStatus::Rejected
            && matches!(self.human, Some(ApprovalOutcome::Denied | ApprovalOutcome::TimedOut))
    }
}

/// Cumulative human-in-the-loop bookkeeping for one mission
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HitlLedger {
    /// Human prompts issued
    pub events: u32,
    /// Sticky block after a human rejection
    pub blocked: bool,
    /// Reason of the last prompt
    pub last_reason: Option<String>,
    /// Decision of the last prompt
    pub last_decision: Option<ApprovalOutcome>,
}

/// Audit ticket filed in the ops tracker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditTicket {
    /// Ticket key
    pub ticket_id: String,
    /// Summary line
    pub summary: String,
    /// Browser link
    pub link: String,
}

/// Mission timing and cost (set once, at termination)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    /// Mission start
    pub start_time: DateTime<Utc>,
    /// Mission end
    pub end_time: Option<DateTime<Utc>>,
    /// Wall-clock duration in seconds
    pub duration_seconds: Option<f64>,
    /// Estimated spend
    pub estimated_cost: Option<f64>,
}

impl Metrics {
    /// Start the clock
    #[inline]
    #[must_use]
    pub fn start() -> Self {
        Self {
            start_time: Utc::now(),
            end_time: None,
            duration_seconds: None,
            estimated_cost: None,
        }
    }

    /// Stop the clock and price the mission. Returns `false` if already
    /// finalized; the first call wins.
    pub fn finalize(&mut self, cost_per_second: f64) -> bool {
        if self.end_time.is_some() {
            return false;
        }
        let end = Utc::now();
        let millis = (end - self.start_time).num_milliseconds().max(0);
        let duration = millis as f64 / 1000.0;
        self.end_time = Some(end);
        self.duration_seconds = Some(duration);
        self.estimated_cost = Some(round_to(duration * cost_per_second, 4));
        true
    }

    /// Check if the clock was stopped
    #[inline]
    #[must_use]
    pub fn is_finalized(&self) -> bool {
        self.end_time.is_some()
    }
}

/// Round to a number of decimal places
#[must_use]
pub fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

/// Mutable per-mission state, owned by the Commander
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncidentContext {
    /// Mission identifier
    pub incident_id: String,
    /// Triggering alert
    pub alert: Alert,
    /// Current mission state
    pub state: MissionState,
    /// Attempts started so far
    pub attempts: u32,
    /// Investigator's hypothesis for the current attempt
    pub root_cause_hypothesis: Option<String>,
    /// Logs collected in the current attempt
    pub logs_collected: Vec<LogEntry>,
    /// Active plan
    pub plan: Option<PlanDescriptor>,
    /// Latest vendor signal
    pub vendor_signal: Option<VendorHealthSignal>,
    /// Logs contradicted a healthy vendor report
    pub vendor_conflict: bool,
    /// Table evidence
    pub data_snapshot: Option<DataSnapshot>,
    /// Header columns absent from the target table
    pub missing_columns: Vec<String>,
    /// Safety verdict for the active plan
    pub verdict: Option<SafetyVerdict>,
    /// Remediation took effect
    pub remediation_applied: bool,
    /// Human-in-the-loop ledger; `hitl.blocked` is the sticky block flag
    pub hitl: HitlLedger,
    /// Long-term memory hit on attempt 1
    pub memory_match_id: Option<String>,
    /// Vendor cursor reset already performed
    pub vendor_reset_done: bool,
    /// Ticket filed on success
    pub ticket: Option<AuditTicket>,
    /// Timing and cost
    pub metrics: Metrics,
    /// One entry per attempt
    pub loop_history: Vec<String>,
}

impl IncidentContext {
    /// Create context at alert ingestion
    #[must_use]
    pub fn new(alert: Alert) -> Self {
        let missing_columns = alert.metadata.missing_columns.clone();
        Self {
            incident_id: Uuid::new_v4().to_string(),
            alert,
            state: MissionState::Init,
            attempts: 0,
            root_cause_hypothesis: None,
            logs_collected: Vec::new(),
            plan: None,
            vendor_signal: None,
            vendor_conflict: false,
            data_snapshot: None,
            missing_columns,
            verdict: None,
            remediation_applied: false,
            hitl: HitlLedger::default(),
            memory_match_id: None,
            vendor_reset_done: false,
            ticket: None,
            metrics: Metrics::start(),
            loop_history: Vec::new(),
        }
    }

    /// First eight characters of the incident id
    #[inline]
    #[must_use]
    pub fn short_id(&self) -> &str {
        let end = self.incident_id.len().min(8);
        &self.incident_id[..end]
    }

    /// Mission profile
    #[inline]
    #[must_use]
    pub fn profile(&self) -> &MissionProfile {
        &self.alert.metadata
    }

    /// Sticky human block
    #[inline]
    #[must_use]
    pub fn hitl_blocked(&self) -> bool {
        self.hitl.blocked
    }

    /// Clear per-attempt fields; history, ledger and flags survive
    pub fn reset_attempt(&mut self) {
        self.plan = None;
        self.verdict = None;
        self.remediation_applied = false;
        self.root_cause_hypothesis = None;
    }

    /// Append the outcome of an attempt to the loop history
    pub fn record_attempt(&mut self, attempt: u32, outcome: &str) {
        self.loop_history.push(format!("Attempt {attempt}: {outcome}"));
    }

    /// Compact, prompt-sized view of the context
    #[must_use]
    pub fn summary(&self) -> String {
        let mut out = format!(
            "Incident ID: {}\nInitial Alert: {}\n",
            self.incident_id, self.alert.message
        );
        if !self.logs_collected.is_empty() {
            let head: Vec<&str> = self
                .logs_collected
                .iter()
                .take(2)
                .map(|l| l.content.as_str())
                .collect();
            out.push_str(&format!(
                "Logs Found (Count: {}): {:?}...\n",
                self.logs_collected.len(),
                head
            ));
        }
        if let Some(signal) = &self.vendor_signal {
            out.push_str(&format!("Vendor Status: {} ({})\n", signal.status, signal.message));
        }
        if let Some(snapshot) = &self.data_snapshot {
            out.push_str(&format!(
                "Data Snapshot: Table {} has {} columns.\n",
                snapshot.table_name,
                snapshot.columns.len()
            ));
        }
        out
    }
}

/// How a successful mission was resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// Schema already matched the incoming header
    AlreadyAligned,
    /// Vendor healthy again after disaster recovery
    VendorRecovery,
    /// A plan was approved, executed and verified
    Remediated,
}

/// Terminal outcome of a mission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MissionOutcome {
    /// Mission succeeded
    Resolved {
        /// How
        resolution: Resolution,
    },
    /// Mission failed
    Failed(MissionFailure),
}

/// What `run_mission` hands back: the terminal context plus its outcome
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MissionReport {
    /// Terminal, read-only context
    pub context: IncidentContext,
    /// Outcome
    pub outcome: MissionOutcome,
}

impl MissionReport {
    /// Check success
    #[inline]
    #[must_use]
    pub fn succeeded(&self) -> bool {
        matches!(self.outcome, MissionOutcome::Resolved { .. })
    }

    /// Failure details, if the mission failed
    #[inline]
    #[must_use]
    pub fn failure(&self) -> Option<&MissionFailure> {
        match &self.outcome {
            MissionOutcome::Failed(failure) => Some(failure),
            MissionOutcome::Resolved { .. } => None,
        }
    }

    /// Failure classification, if the mission failed
    #[inline]
    #[must_use]
    pub fn failure_kind(&self) -> Option<FailureKind> {
        self.failure().map(|f| f.kind)
    }

    /// Attempts taken
    #[inline]
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.context.attempts
    }
}
