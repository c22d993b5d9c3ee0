//! Safety Reviewer
//!
//! Every plan is classified against the ordered safety rules before it can
//! run. Controlled and ambiguous plans need a human; plain reads and inserts
//! pass. Once a human has blocked a mission, later reviews reject without
//! asking again.

use crate::approval::HumanGate;
use crate::audit::{Agent, AuditLevel, AuditTrail};
use crate::rules::{self, SafetyClass};
use crate::types::{HitlLedger, PlanDescriptor, SafetyVerdict, VerdictStatus};
use std::sync::Arc;

/// Reason used for plans no rule recognizes
pub const AMBIGUOUS_REASON: &str = "Ambiguous SQL pattern detected";

/// Plan reviewer with a human in the loop
pub struct SafetyReviewer {
    gate: Arc<dyn HumanGate>,
    audit: Arc<AuditTrail>,
}

impl std::fmt::Debug for SafetyReviewer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SafetyReviewer").finish_non_exhaustive()
    }
}

impl SafetyReviewer {
    /// Create reviewer
    #[must_use]
    pub fn new(gate: Arc<dyn HumanGate>, audit: Arc<AuditTrail>) -> Self {
        Self { gate, audit }
    }

    /// Review a plan. `ledger` is the mission's HITL state; the returned
    /// verdict carries the new cumulative event count.
    pub async fn review(&self, incident_id: &str, plan: &PlanDescriptor, ledger: &HitlLedger) -> SafetyVerdict {
        if ledger.blocked {
            self.audit.record(
                incident_id,
                Agent::SafetyReviewer,
                AuditLevel::Warn,
                "HITL previously blocked; skipping further review",
            );
            return SafetyVerdict::automatic(VerdictStatus::Rejected, "HITL previously blocked", ledger.events);
        }

        let text = plan.review_text();
        match (plan, rules::classify_plan_text(text)) {
            (PlanDescriptor::GitChange { .. }, SafetyClass::Controlled(term)) => {
                self.ask(incident_id, plan, format!("Diff contains '{term}'"), ledger).await
            }
            (PlanDescriptor::GitChange { title, .. }, _) => {
                self.audit.record(
                    incident_id,
                    Agent::SafetyReviewer,
                    AuditLevel::Success,
                    format!("PR '{title}' approved; code changes look safe"),
                );
                SafetyVerdict::automatic(VerdictStatus::Approved, "Code changes look safe", ledger.events)
            }
            (PlanDescriptor::SqlPatch { .. }, SafetyClass::Controlled(term)) => {
                self.ask(incident_id, plan, format!("Detected controlled command '{term}'"), ledger)
                    .await
            }
            (PlanDescriptor::SqlPatch { .. }, SafetyClass::Standard) => {
                self.audit.record(
                    incident_id,
                    Agent::SafetyReviewer,
                    AuditLevel::Success,
                    "Plan approved; standard data operation",
                );
                SafetyVerdict::automatic(VerdictStatus::Approved, "Standard data operation", ledger.events)
            }
            (PlanDescriptor::SqlPatch { .. }, SafetyClass::Ambiguous) => {
                self.ask(incident_id, plan, AMBIGUOUS_REASON.to_string(), ledger).await
            }
        }
    }

    async fn ask(&self, incident_id: &str, plan: &PlanDescriptor, reason: String, ledger: &HitlLedger) -> SafetyVerdict {
        let events = ledger.events + 1;
        self.audit.record(
            incident_id,
            Agent::SafetyReviewer,
            AuditLevel::Error,
            format!("HITL triggered: {reason}"),
        );
        let outcome = self.gate.authorize(incident_id, &plan.prompt_text(), &reason).await;
        let (status, level) = if outcome.is_approved() {
            (VerdictStatus::Approved, AuditLevel::Success)
        } else {
            (VerdictStatus::Rejected, AuditLevel::Error)
        };
        self.audit.record(
            incident_id,
            Agent::SafetyReviewer,
            level,
            format!("Human decision: {}", outcome.as_str()),
        );
        SafetyVerdict {
            status,
            reason,
            hitl_events: events,
            human: Some(outcome),
        }
    }
}
