//! Error types for DART Core
//!
//! Provides error handling for:
//! - Tool gateway calls (logs, schema, deploys, repos, tickets)
//! - Vendor probes and their transient/permanent classification
//! - Text generation backends
//! - Human approval requests
//! - Configuration and audit integrity
//!
//! None of these escape a mission: collaborators turn them into degraded
//! values and the Commander records the attempt-level [`FailureKind`].

use serde::{Deserialize, Serialize};

/// Tool gateway errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum ToolError {
    /// Transport failure reaching the gateway
    #[error("transport failure calling {tool}: {message}")]
    Transport { tool: String, message: String },

    /// Gateway answered with a non-success status
    #[error("tool {tool} returned status {status}")]
    Status { tool: String, status: u16 },

    /// Payload could not be decoded into the expected shape
    #[error("malformed reply from {tool}: {message}")]
    Malformed { tool: String, message: String },

    /// Tool reported a domain-level failure
    #[error("tool {tool} failed: {message}")]
    Rejected { tool: String, message: String },
}

impl ToolError {
    /// Name of the tool that failed
    #[inline]
    #[must_use]
    pub fn tool(&self) -> &str {
        match self {
            Self::Transport { tool, .. }
            | Self::Status { tool, .. }
            | Self::Malformed { tool, .. }
            | Self::Rejected { tool, .. } => tool,
        }
    }

    /// Check if the failure is I/O-class and worth retrying
    #[inline]
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport { .. } => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::Malformed { .. } | Self::Rejected { .. } => false,
        }
    }
}

/// Vendor probe errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VendorError {
    /// Connection or request failure
    #[error("vendor transport failure: {0}")]
    Transport(String),

    /// Per-call timeout elapsed
    #[error("vendor call timed out after {0}ms")]
    Timeout(u64),

    /// Vendor answered with an HTTP error status
    #[error("vendor returned HTTP {0}")]
    Status(u16),

    /// Vendor reply was not a valid status payload
    #[error("vendor reply could not be decoded: {0}")]
    Decode(String),
}

impl VendorError {
    /// Only transient I/O-class errors are retried by the liaison
    #[inline]
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Timeout(_) => true,
            Self::Status(code) => *code == 429 || *code >= 500,
            Self::Decode(_) => false,
        }
    }
}

/// Text generation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GenerationError {
    /// Backend unreachable or failed
    #[error("generation backend unavailable: {0}")]
    Unavailable(String),

    /// Backend answered with its error sentinel
    #[error("generation sentinel: {0}")]
    Sentinel(String),

    /// Backend produced nothing usable
    #[error("generation produced empty output")]
    Empty,

    /// Every backend in the chain failed
    #[error("all {0} generation backends failed")]
    Exhausted(usize),
}

impl GenerationError {
    /// A lower-ranked backend may still answer
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Exhausted(_))
    }
}

/// Human approval channel errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApprovalError {
    /// No pending request with this token
    #[error("unknown approval token: {0}")]
    UnknownToken(String),

    /// Request was already resolved or timed out
    #[error("approval {0} is no longer pending")]
    NotPending(String),
}

/// Long-term memory errors
#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    /// Backing store failed
    #[error("memory store failure: {0}")]
    Store(String),

    /// Snapshot I/O failure
    #[error("memory snapshot I/O: {0}")]
    Io(#[from] std::io::Error),

    /// Snapshot decode failure
    #[error("memory snapshot decode: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("cannot read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// TOML did not parse
    #[error("invalid configuration: {0}")]
    Toml(#[from] toml::de::Error),

    /// YAML alert did not parse
    #[error("invalid alert document: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON alert did not parse
    #[error("invalid alert document: {0}")]
    Json(#[from] serde_json::Error),

    /// Value out of range
    #[error("invalid value for {key}: {message}")]
    Invalid { key: &'static str, message: String },
}

/// Audit trail errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuditError {
    /// Hash chain broken at the given sequence number
    #[error("audit chain broken at event {0}")]
    IntegrityViolation(u64),
}

/// Mission state machine errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StateMachineError {
    /// Transition not in the allowed table
    #[error("illegal mission transition {from} -> {to}")]
    IllegalTransition { from: String, to: String },
}

/// Attempt-level failure classification
///
/// Every failed attempt and every failed mission carries one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Tool or vendor call failed and degraded
    TransientIo,
    /// Investigation or plan drafting produced nothing usable
    GenerationFailure,
    /// Plan refused, by rule or by a human
    SafetyRejection,
    /// Post-fix check found no real change
    VerificationFailure,
    /// Vendor disaster recovery did not restore health
    DisasterRecovery,
    /// Attempts exhausted
    LoopExhaustion,
}

impl FailureKind {
    /// Check if a failure of this kind ends the mission immediately
    #[inline]
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::SafetyRejection | Self::DisasterRecovery | Self::LoopExhaustion
        )
    }
}

/// One failed attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptFailure {
    /// Classification
    pub kind: FailureKind,
    /// Human-readable reason, appended to the loop history
    pub reason: String,
}

impl AttemptFailure {
    /// Create new attempt failure
    #[inline]
    #[must_use]
    pub fn new(kind: FailureKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
        }
    }
}

/// Terminal failure of a whole mission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("mission failed after {attempts} attempt(s): {last_reason}")]
pub struct MissionFailure {
    /// Why the loop stopped
    pub kind: FailureKind,
    /// Attempts taken
    pub attempts: u32,
    /// Last failure reason recorded
    pub last_reason: String,
    /// Full per-attempt history
    pub loop_history: Vec<String>,
}

impl MissionFailure {
    /// Render the single terminal report shown to operators
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = format!(
            "Mission failed after {} attempt(s) [{:?}]\nLast failure: {}\n",
            self.attempts, self.kind, self.last_reason
        );
        for entry in &self.loop_history {
            out.push_str("  - ");
            out.push_str(entry);
            out.push('\n');
        }
        out
    }
}
