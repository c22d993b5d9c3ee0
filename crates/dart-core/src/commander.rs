//! Commander
//!
//! Drives one mission through a bounded attempt loop:
//! - Recall similar incidents (first attempt only)
//! - Investigate and probe the vendor concurrently
//! - Decide between "already fixed", vendor disaster recovery and remediation
//! - Plan, review, execute and verify
//!
//! The Commander is the only writer of [`IncidentContext`]. Collaborators
//! read it and hand values back; none of them raise errors into the loop.

use crate::approval::HumanGate;
use crate::audit::{Agent, AuditLevel, AuditTrail};
use crate::drift;
use crate::error::{AttemptFailure, FailureKind, MissionFailure};
use crate::gateway::{ToolGateway, TICKET_PRIORITY};
use crate::generation::GenerationChain;
use crate::investigator::Investigator;
use crate::liaison::{BackoffPolicy, VendorEndpoint, VendorLiaison};
use crate::memory::{IncidentMemory, IncidentRecord};
use crate::profile::CommanderConfig;
use crate::remediation::RemediationEngineer;
use crate::rules;
use crate::safety::SafetyReviewer;
use crate::state::{validate_transition, MissionState};
use crate::types::{
    Alert, AuditTicket, DataSnapshot, IncidentContext, MissionOutcome, MissionReport, PlanDescriptor, Resolution,
};
use std::sync::Arc;

/// Hits requested from memory on recall
const RECALL_LIMIT: usize = 3;

/// Rows re-sampled after a successful fix
const REFRESH_SAMPLE_LIMIT: usize = 3;

/// Collaborators the Commander is wired with
#[derive(Clone)]
pub struct Services {
    /// Tool gateway
    pub gateway: Arc<dyn ToolGateway>,
    /// Vendor status endpoint
    pub vendor: Arc<dyn VendorEndpoint>,
    /// Ranked text generators
    pub generators: GenerationChain,
    /// Long-term memory
    pub memory: Arc<dyn IncidentMemory>,
    /// Human authorization channel
    pub gate: Arc<dyn HumanGate>,
}

impl std::fmt::Debug for Services {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Services")
            .field("generators", &self.generators)
            .finish_non_exhaustive()
    }
}

/// How a single attempt ended
#[derive(Debug)]
enum Step {
    /// Mission resolved
    Resolved(Resolution),
    /// Attempt failed; loop may continue
    Retry(AttemptFailure),
    /// Attempt failed; loop must stop
    Stop(AttemptFailure),
}

/// Mission orchestrator
pub struct Commander {
    config: CommanderConfig,
    gateway: Arc<dyn ToolGateway>,
    memory: Arc<dyn IncidentMemory>,
    investigator: Investigator,
    liaison: VendorLiaison,
    engineer: RemediationEngineer,
    reviewer: SafetyReviewer,
    audit: Arc<AuditTrail>,
}

impl std::fmt::Debug for Commander {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Commander")
            .field("config", &self.config)
            .field("liaison", &self.liaison)
            .finish_non_exhaustive()
    }
}

impl Commander {
    /// Create Commander with the vendor backoff taken from the config
    #[must_use]
    pub fn new(config: CommanderConfig, services: Services) -> Self {
        let policy = BackoffPolicy::from(&config.vendor);
        Self::with_parts(config, services, policy, Arc::new(AuditTrail::new()))
    }

    /// Create Commander with an explicit backoff policy and audit trail
    #[must_use]
    pub fn with_parts(
        config: CommanderConfig,
        services: Services,
        policy: BackoffPolicy,
        audit: Arc<AuditTrail>,
    ) -> Self {
        let Services {
            gateway,
            vendor,
            generators,
            memory,
            gate,
        } = services;
        Self {
            investigator: Investigator::new(Arc::clone(&gateway), generators.clone(), Arc::clone(&audit)),
            liaison: VendorLiaison::new(vendor, policy, Arc::clone(&audit)),
            engineer: RemediationEngineer::new(Arc::clone(&gateway), generators, Arc::clone(&audit), &config),
            reviewer: SafetyReviewer::new(gate, Arc::clone(&audit)),
            config,
            gateway,
            memory,
            audit,
        }
    }

    /// Configuration in use
    #[inline]
    #[must_use]
    pub fn config(&self) -> &CommanderConfig {
        &self.config
    }

    /// Shared audit trail
    #[inline]
    #[must_use]
    pub fn audit(&self) -> &Arc<AuditTrail> {
        &self.audit
    }

    fn note(&self, ctx: &IncidentContext, level: AuditLevel, message: impl Into<String>) {
        self.audit.record(&ctx.incident_id, Agent::Commander, level, message);
    }

    fn advance(&self, ctx: &mut IncidentContext, to: MissionState) {
        match validate_transition(ctx.state, to) {
            Ok(()) => {
                tracing::debug!(incident_id = %ctx.incident_id, from = %ctx.state, to = %to, "state transition");
                ctx.state = to;
            }
            Err(e) => {
                tracing::error!(incident_id = %ctx.incident_id, error = %e, "state transition refused");
            }
        }
    }

    /// Run one mission to a terminal state
    ///
    /// # Workflow
    /// 1. Build the incident context
    /// 2. Loop up to `max_attempts` times, one history entry per attempt
    /// 3. Stop early on success, a human block or failed disaster recovery
    /// 4. Return the terminal context with its outcome
    pub async fn run_mission(&self, alert: Alert) -> MissionReport {
        let mut ctx = IncidentContext::new(alert);
        let max_attempts = self.config.max_attempts.max(1);
        tracing::info!(
            incident_id = %ctx.incident_id,
            error_code = %ctx.alert.error_code,
            max_attempts,
            "mission started"
        );
        self.note(
            &ctx,
            AuditLevel::Error,
            format!("Alert received: {} | {}", ctx.alert.error_code, ctx.alert.message),
        );

        let mut last_failure: Option<AttemptFailure> = None;
        for attempt in 1..=max_attempts {
            ctx.attempts = attempt;
            ctx.reset_attempt();
            self.note(&ctx, AuditLevel::Info, format!("Loop attempt {attempt}"));

            match self.run_attempt(&mut ctx, attempt, max_attempts).await {
                Step::Resolved(resolution) => return self.resolve(ctx, attempt, resolution).await,
                Step::Retry(failure) => {
                    self.fail_attempt(&mut ctx, attempt, max_attempts, &failure);
                    last_failure = Some(failure);
                }
                Step::Stop(failure) => {
                    self.fail_attempt(&mut ctx, attempt, max_attempts, &failure);
                    last_failure = Some(failure);
                    break;
                }
            }
        }

        self.advance(&mut ctx, MissionState::Abort);
        ctx.metrics.finalize(self.config.cost_per_second);
        let (kind, last_reason) = match last_failure {
            Some(failure) if failure.kind.is_terminal() => (failure.kind, failure.reason),
            Some(failure) => (FailureKind::LoopExhaustion, failure.reason),
            None => (FailureKind::LoopExhaustion, "No attempt completed.".to_string()),
        };
        let failure = MissionFailure {
            kind,
            attempts: ctx.attempts,
            last_reason,
            loop_history: ctx.loop_history.clone(),
        };
        tracing::warn!(incident_id = %ctx.incident_id, kind = ?kind, attempts = ctx.attempts, "mission failed");
        self.note(&ctx, AuditLevel::Error, failure.to_string());
        MissionReport {
            context: ctx,
            outcome: MissionOutcome::Failed(failure),
        }
    }

    fn fail_attempt(&self, ctx: &mut IncidentContext, attempt: u32, max: u32, failure: &AttemptFailure) {
        ctx.record_attempt(attempt, &failure.reason);
        let level = if attempt < max { AuditLevel::Warn } else { AuditLevel::Error };
        tracing::warn!(incident_id = %ctx.incident_id, attempt, kind = ?failure.kind, reason = %failure.reason, "attempt failed");
        self.note(ctx, level, format!("Loop attempt {attempt} failed: {}", failure.reason));
        if ctx.hitl_blocked() {
            self.note(ctx, AuditLevel::Warn, "HITL decision blocked further remediation; stopping loop");
        }
    }

    async fn run_attempt(&self, ctx: &mut IncidentContext, attempt: u32, max: u32) -> Step {
        if attempt == 1 {
            self.advance(ctx, MissionState::Recall);
            self.recall(ctx).await;
        }
        self.advance(ctx, MissionState::Investigate);
        self.gather_evidence(ctx).await;
        self.advance(ctx, MissionState::Decide);

        let Some(hypothesis) = ctx.root_cause_hypothesis.clone() else {
            return Step::Retry(AttemptFailure::new(
                FailureKind::GenerationFailure,
                "Investigation inconclusive.",
            ));
        };
        let summary = ctx.summary();
        tracing::debug!(incident_id = %ctx.incident_id, payload_chars = summary.len(), "context compacted");

        let stage_cleanup = ctx.alert.is_stage_cleanup();
        let disable_drift = ctx.profile().disable_drift;
        if disable_drift {
            ctx.missing_columns.clear();
        } else {
            let table = ctx.profile().table_name.clone();
            let alignment = drift::check_alignment(self.gateway.as_ref(), &table).await;
            if !stage_cleanup && alignment.is_aligned() {
                ctx.missing_columns.clear();
                ctx.remediation_applied = true;
                self.note(
                    ctx,
                    AuditLevel::Success,
                    "Schema already aligned with incoming file; marking mission complete (previous fix)",
                );
                return Step::Resolved(Resolution::AlreadyAligned);
            }
            if alignment.is_complete() {
                ctx.missing_columns = alignment.missing;
            }
        }

        let force_db = ctx.profile().force_db_checks || stage_cleanup;
        let marker = rules::mentions_vendor(&format!("{hypothesis} {}", ctx.alert.message));
        let vendor_unhealthy = ctx.vendor_signal.as_ref().is_some_and(|s| !s.is_healthy());
        if !force_db && (marker.is_some() || vendor_unhealthy) {
            return self.vendor_branch(ctx, attempt, max).await;
        }

        self.remediate(ctx, attempt).await
    }

    async fn recall(&self, ctx: &mut IncidentContext) {
        self.note(ctx, AuditLevel::Info, "Checking long-term memory for similar incidents");
        match self.memory.recall(&ctx.alert.recall_query(), RECALL_LIMIT).await {
            Ok(hits) => match hits.into_iter().next() {
                Some(best) => {
                    self.audit.record(
                        &ctx.incident_id,
                        Agent::Memory,
                        AuditLevel::Success,
                        format!("Memory hit: {} (score {:.2})", best.incident_id, best.score),
                    );
                    ctx.memory_match_id = Some(best.incident_id);
                }
                None => {
                    self.audit.record(
                        &ctx.incident_id,
                        Agent::Memory,
                        AuditLevel::Warn,
                        "No relevant memories found; starting fresh investigation",
                    );
                }
            },
            Err(e) => {
                self.audit.record(
                    &ctx.incident_id,
                    Agent::Memory,
                    AuditLevel::Warn,
                    format!("Memory recall failed: {e}"),
                );
            }
        }
    }

    async fn gather_evidence(&self, ctx: &mut IncidentContext) {
        if ctx.memory_match_id.is_some() {
            self.note(ctx, AuditLevel::Warn, "Fast track: known pattern, focusing on internal logs");
        } else {
            self.note(ctx, AuditLevel::Info, "Deploying investigation team in parallel");
        }

        let (investigation, signal) = {
            let view: &IncidentContext = ctx;
            tokio::join!(
                self.investigator.investigate(view),
                self.liaison.probe(&view.incident_id)
            )
        };

        ctx.logs_collected = investigation.logs;
        if investigation.snapshot.is_some() {
            ctx.data_snapshot = investigation.snapshot;
        }
        ctx.root_cause_hypothesis = investigation.hypothesis;

        let logs_show_503 = ctx.logs_collected.iter().any(|l| l.content.contains("503"));
        ctx.vendor_conflict = signal.is_healthy() && logs_show_503;
        if ctx.vendor_conflict {
            self.note(
                ctx,
                AuditLevel::Error,
                "Conflict: logs show failure while vendor claims HEALTHY; overruling vendor, trusting log evidence",
            );
        }
        if signal.is_deceptive() {
            tracing::warn!(incident_id = %ctx.incident_id, "vendor health report contradicts its own truth flag");
        }
        ctx.vendor_signal = Some(signal);
    }

    async fn vendor_branch(&self, ctx: &mut IncidentContext, attempt: u32, max: u32) -> Step {
        if !ctx.profile().dr_enabled() {
            return Step::Retry(AttemptFailure::new(
                FailureKind::TransientIo,
                "Vendor/API issue detected; DR disabled for this mission.",
            ));
        }
        if attempt < max {
            return Step::Retry(AttemptFailure::new(
                FailureKind::TransientIo,
                "Vendor/API outage detected; deferring DR to final attempt.",
            ));
        }

        self.note(
            ctx,
            AuditLevel::Warn,
            "Vendor/API outage persists; invoking disaster recovery (final attempt)",
        );
        self.advance(ctx, MissionState::Execute);
        let recovered = self.engineer.run_disaster_recovery(ctx).await;
        ctx.vendor_reset_done = true;
        if !recovered {
            return Step::Stop(AttemptFailure::new(FailureKind::DisasterRecovery, "Vendor DR failed."));
        }

        self.advance(ctx, MissionState::Verify);
        let signal = self.liaison.probe(&ctx.incident_id).await;
        let healthy = signal.is_healthy();
        ctx.vendor_signal = Some(signal);
        if !healthy {
            return Step::Stop(AttemptFailure::new(
                FailureKind::DisasterRecovery,
                "Vendor still unhealthy after DR.",
            ));
        }
        ctx.remediation_applied = true;
        self.note(ctx, AuditLevel::Success, "Vendor recovered after DR");
        Step::Resolved(Resolution::VendorRecovery)
    }

    async fn remediate(&self, ctx: &mut IncidentContext, attempt: u32) -> Step {
        if ctx.profile().requires_vendor_reset && attempt > 1 && !ctx.vendor_reset_done {
            let cleared = self.engineer.reset_before_retry(ctx, attempt).await;
            tracing::info!(incident_id = %ctx.incident_id, attempt, cleared, "vendor cursor reset before retry");
            ctx.vendor_reset_done = true;
        }

        self.advance(ctx, MissionState::Plan);
        let Some(plan) = self.engineer.plan(ctx).await else {
            return Step::Retry(AttemptFailure::new(
                FailureKind::GenerationFailure,
                "No remediation plan generated.",
            ));
        };
        ctx.plan = Some(plan.clone());

        self.advance(ctx, MissionState::SafetyReview);
        let verdict = self.reviewer.review(&ctx.incident_id, &plan, &ctx.hitl).await;
        ctx.hitl.events = verdict.hitl_events;
        if let Some(outcome) = verdict.human {
            ctx.hitl.last_reason = Some(verdict.reason.clone());
            ctx.hitl.last_decision = Some(outcome);
        }
        let approved = verdict.is_approved();
        let by_human = verdict.rejected_by_human();
        let reason = format!("Safety review {}: {}", verdict.status, verdict.reason);
        ctx.verdict = Some(verdict);
        if !approved {
            if by_human {
                ctx.hitl.blocked = true;
                return Step::Stop(AttemptFailure::new(FailureKind::SafetyRejection, reason));
            }
            return Step::Retry(AttemptFailure::new(FailureKind::SafetyRejection, reason));
        }
        self.note(ctx, AuditLevel::Success, "Safety checks passed; authorizing execution");

        self.advance(ctx, MissionState::Execute);
        if !self.engineer.execute(ctx, &plan).await {
            return Step::Retry(AttemptFailure::new(FailureKind::TransientIo, "Execution failed."));
        }
        ctx.remediation_applied = true;
        self.refresh_snapshot(ctx).await;

        self.advance(ctx, MissionState::Verify);
        if ctx.profile().requires_verification() {
            let table = ctx.profile().table_name.clone();
            let alignment = drift::check_alignment(self.gateway.as_ref(), &table).await;
            if !alignment.missing.is_empty() {
                ctx.remediation_applied = false;
                self.note(
                    ctx,
                    AuditLevel::Error,
                    format!("Schema still missing {:?} after reported success", alignment.missing),
                );
                return Step::Retry(AttemptFailure::new(
                    FailureKind::VerificationFailure,
                    "Verification: deploy reported success but schema unchanged.",
                ));
            }
            self.note(ctx, AuditLevel::Success, "Post-fix verification passed");
        }
        Step::Resolved(Resolution::Remediated)
    }

    async fn refresh_snapshot(&self, ctx: &mut IncidentContext) {
        let table = ctx.profile().table_name.clone();
        match self.gateway.get_sample(&table, REFRESH_SAMPLE_LIMIT).await {
            Ok(sample) => {
                ctx.data_snapshot = Some(DataSnapshot {
                    table_name: table.clone(),
                    columns: sample.columns,
                    rows: sample.rows,
                });
                self.note(ctx, AuditLevel::Info, format!("Post-fix sample refreshed for {table}"));
            }
            Err(e) => {
                self.note(ctx, AuditLevel::Warn, format!("Failed to refresh sample after fix: {e}"));
            }
        }
    }

    async fn resolve(&self, mut ctx: IncidentContext, attempt: u32, resolution: Resolution) -> MissionReport {
        self.advance(&mut ctx, MissionState::Success);
        ctx.metrics.finalize(self.config.cost_per_second);
        let duration = ctx.metrics.duration_seconds.unwrap_or_default();

        let entry = match resolution {
            Resolution::AlreadyAligned => "Success (Already Fixed)",
            Resolution::VendorRecovery => "Success (Vendor DR)",
            Resolution::Remediated => "Success",
        };
        if resolution == Resolution::Remediated {
            self.file_ticket(&mut ctx, duration).await;
            self.remember(&ctx).await;
        }
        ctx.record_attempt(attempt, entry);

        tracing::info!(
            incident_id = %ctx.incident_id,
            attempt,
            resolution = ?resolution,
            duration_seconds = duration,
            "mission resolved"
        );
        self.note(&ctx, AuditLevel::Success, format!("Mission accomplished in {duration}s"));
        MissionReport {
            context: ctx,
            outcome: MissionOutcome::Resolved { resolution },
        }
    }

    async fn file_ticket(&self, ctx: &mut IncidentContext, duration: f64) {
        let summary = format!(
            "Resolved {} in {duration}s (ID: {})",
            ctx.alert.error_code,
            ctx.short_id()
        );
        match self
            .gateway
            .create_ticket(&self.config.audit_project, &summary, TICKET_PRIORITY)
            .await
        {
            Ok(ticket) => {
                self.note(ctx, AuditLevel::Success, format!("Audit ticket created: {}", ticket.link));
                ctx.ticket = Some(AuditTicket {
                    ticket_id: ticket.ticket_id,
                    summary,
                    link: ticket.link,
                });
            }
            Err(e) => {
                self.note(ctx, AuditLevel::Warn, format!("Audit ticket not filed: {e}"));
            }
        }
    }

    async fn remember(&self, ctx: &IncidentContext) {
        if ctx.memory_match_id.is_some() {
            return;
        }
        let Some(record) = IncidentRecord::from_context(ctx) else {
            return;
        };
        let level = match self.memory.store(record).await {
            Ok(()) => AuditLevel::Success,
            Err(e) => {
                tracing::warn!(incident_id = %ctx.incident_id, error = %e, "memory store failed");
                AuditLevel::Warn
            }
        };
        let message = if level == AuditLevel::Success {
            "Incident stored in long-term memory"
        } else {
            "Incident could not be stored in long-term memory"
        };
        self.audit.record(&ctx.incident_id, Agent::Memory, level, message);
    }
}

/// Plan executed by a resolved mission, if any
#[must_use]
pub fn applied_plan(report: &MissionReport) -> Option<&PlanDescriptor> {
    if report.succeeded() && report.context.remediation_applied {
        report.context.plan.as_ref()
    } else {
        None
    }
}
