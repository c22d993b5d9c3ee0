//! Mission loop tests
//!
//! Tenets:
//! - Attempts never exceed the budget and every attempt leaves one history entry
//! - A human rejection (or an unanswered prompt) ends the mission on the spot
//! - Vendor disaster recovery only ever runs on the final attempt
//! - Nothing executes without an approved verdict
//! - Memory hits are not stored again

use dart_core::approval::ApprovalBroker;
use dart_core::error::{FailureKind, VendorError};
use dart_core::evaluation::MissionSummary;
use dart_core::gateway::ToolGateway;
use dart_core::memory::InMemoryIncidentMemory;
use dart_core::profile::{CommanderConfig, MissionProfile};
use dart_core::state::MissionState;
use dart_core::types::{Alert, ApprovalOutcome, MissionOutcome, PlanDescriptor, Resolution, VendorStatus};
use dart_test_utils::{
    deadlock_alert, fast_commander, kpi_alert, schema_drift_alert, vendor_outage_alert, vendor_reply, Harness,
    InMemoryWorld, ScriptedGate, ScriptedGenerator, ScriptedVendor,
};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;

fn vendor_world() -> InMemoryWorld {
    InMemoryWorld::builder()
        .log("Airflow", "ERROR", "HTTP 503 from vendor feed")
        .table("SALES_DATA", &["a", "b", "c"])
        .build()
}

fn outage() -> Result<dart_core::liaison::ProbeResponse, VendorError> {
    Ok(vendor_reply(VendorStatus::Outage, "Upstream API unavailable."))
}

/// Tenet: the canonical drift mission resolves on the first attempt
#[tokio::test]
async fn test_schema_drift_mission() {
    let harness = Harness::new(InMemoryWorld::schema_drift());

    let report = harness.commander().run_mission(schema_drift_alert()).await;

    assert!(report.succeeded());
    assert_eq!(report.attempts(), 1);
    assert_eq!(report.context.loop_history, vec!["Attempt 1: Success".to_string()]);
    assert_eq!(report.context.missing_columns, vec!["d".to_string()]);
    assert_eq!(
        harness.world.deployed(),
        vec!["ALTER TABLE SALES_DATA ADD COLUMN IF NOT EXISTS d VARCHAR".to_string()]
    );
    assert_eq!(harness.world.columns("SALES_DATA"), vec!["a", "b", "c", "d"]);
    assert_eq!(
        harness.gate.requests(),
        vec![(
            "ALTER TABLE SALES_DATA ADD COLUMN IF NOT EXISTS d VARCHAR".to_string(),
            "Detected controlled command 'ALTER TABLE'".to_string()
        )]
    );
    assert_eq!(report.context.hitl.events, 1);
    assert_eq!(report.context.hitl.last_decision, Some(ApprovalOutcome::Approved));
    assert_eq!(report.context.state, MissionState::Success);
    assert!(report.context.remediation_applied);

    let tickets = harness.world.tickets();
    assert_eq!(tickets.len(), 1);
    assert_eq!(tickets[0].0, "OPS");
    assert!(tickets[0].1.starts_with("Resolved ERR_SCHEMA_001 in "));
    assert!(tickets[0].1.ends_with(&format!("(ID: {})", report.context.short_id())));
    assert!(report.context.ticket.is_some());

    let metrics = &report.context.metrics;
    assert!(metrics.is_finalized());
    assert!(metrics.estimated_cost.is_some());
    assert_eq!(harness.memory.len(), 1);
}

/// Tenet: an aligned schema short-circuits with zero executions
#[tokio::test]
async fn test_already_aligned_short_circuit() {
    let world = InMemoryWorld::builder()
        .log("Airflow", "ERROR", "Column 'd' missing in SALES_DATA")
        .header(&["a", "b", "c", "d"])
        .table("SALES_DATA", &["A", "b", "c", "d"])
        .build();
    let harness = Harness::new(world);

    let report = harness.commander().run_mission(schema_drift_alert()).await;

    assert_eq!(
        report.outcome,
        MissionOutcome::Resolved {
            resolution: Resolution::AlreadyAligned
        }
    );
    assert!(report.context.remediation_applied);
    assert_eq!(
        report.context.loop_history,
        vec!["Attempt 1: Success (Already Fixed)".to_string()]
    );
    assert_eq!(harness.world.calls("deploy_sql"), 0);
    assert_eq!(harness.gate.prompts(), 0);
    assert!(harness.memory.is_empty());
}

/// Tenet: no hypothesis on any attempt exhausts the loop
#[tokio::test]
async fn test_inconclusive_investigation_exhausts() {
    let harness = Harness::new(InMemoryWorld::schema_drift())
        .with_generator(ScriptedGenerator::new("LLM_ERROR: Service Unavailable (503)"));

    let report = harness.commander().run_mission(schema_drift_alert()).await;

    let failure = report.failure().unwrap();
    assert_eq!(failure.kind, FailureKind::LoopExhaustion);
    assert_eq!(failure.attempts, 3);
    assert_eq!(failure.last_reason, "Investigation inconclusive.");
    assert_eq!(report.context.loop_history.len(), 3);
    assert!(report
        .context
        .loop_history
        .iter()
        .all(|entry| entry.ends_with("Investigation inconclusive.")));
    assert_eq!(harness.vendor.calls(), 3);
    assert_eq!(harness.world.calls("deploy_sql"), 0);
    assert_eq!(report.context.state, MissionState::Abort);
    assert!(report.context.metrics.is_finalized());
}

/// Tenet: a human denial aborts at that attempt and nothing runs
#[tokio::test]
async fn test_human_rejection_aborts() {
    let harness = Harness::new(InMemoryWorld::schema_drift()).with_gate(ScriptedGate::denying());

    let report = harness.commander().run_mission(schema_drift_alert()).await;

    assert_eq!(report.failure_kind(), Some(FailureKind::SafetyRejection));
    assert_eq!(report.attempts(), 1);
    assert_eq!(report.context.loop_history.len(), 1);
    assert!(report.context.hitl_blocked());
    assert_eq!(report.context.hitl.last_decision, Some(ApprovalOutcome::Denied));
    assert_eq!(harness.gate.prompts(), 1);
    assert!(harness.world.deployed().is_empty());
    assert!(!report.context.remediation_applied);
}

/// Tenet: an unanswered prompt times out and counts as a rejection
#[tokio::test]
async fn test_approval_timeout_is_rejection() {
    let harness = Harness::new(InMemoryWorld::schema_drift());
    let broker = ApprovalBroker::new(Duration::from_millis(50));
    let _silent_operator = broker.subscribe();
    let mut services = harness.services();
    services.gate = Arc::new(broker.clone());

    let report = fast_commander(CommanderConfig::default(), services)
        .run_mission(schema_drift_alert())
        .await;

    assert_eq!(report.failure_kind(), Some(FailureKind::SafetyRejection));
    assert_eq!(report.context.hitl.last_decision, Some(ApprovalOutcome::TimedOut));
    assert!(report.context.hitl_blocked());
    assert_eq!(broker.stats().timed_out, 1);
    assert!(broker.pending().is_empty());
    assert!(harness.world.deployed().is_empty());
}

/// Tenet: DR is deferred until the final attempt, then recovers the vendor
#[tokio::test]
async fn test_vendor_dr_only_on_final_attempt() {
    let harness = Harness::new(vendor_world()).with_vendor(ScriptedVendor::healthy().then_n(outage(), 3));

    let report = harness.commander().run_mission(vendor_outage_alert(true)).await;

    assert_eq!(
        report.outcome,
        MissionOutcome::Resolved {
            resolution: Resolution::VendorRecovery
        }
    );
    assert_eq!(
        report.context.loop_history,
        vec![
            "Attempt 1: Vendor/API outage detected; deferring DR to final attempt.".to_string(),
            "Attempt 2: Vendor/API outage detected; deferring DR to final attempt.".to_string(),
            "Attempt 3: Success (Vendor DR)".to_string(),
        ]
    );
    let resets = harness.world.resets();
    assert_eq!(resets, vec![format!("vendor_dr_{}", report.context.short_id())]);
    assert_eq!(harness.vendor.calls(), 4);
    assert!(report.context.vendor_signal.as_ref().unwrap().is_healthy());
    assert_eq!(harness.world.calls("deploy_sql"), 0);
}

/// Tenet: with DR disabled the vendor branch never resets anything
#[tokio::test]
async fn test_vendor_dr_disabled() {
    let harness = Harness::new(vendor_world()).with_vendor(ScriptedVendor::outage());

    let report = harness.commander().run_mission(vendor_outage_alert(false)).await;

    let failure = report.failure().unwrap();
    assert_eq!(failure.kind, FailureKind::LoopExhaustion);
    assert_eq!(failure.last_reason, "Vendor/API issue detected; DR disabled for this mission.");
    assert_eq!(report.context.loop_history.len(), 3);
    assert!(harness.world.resets().is_empty());
}

/// Tenet: a vendor still down after DR ends the mission
#[tokio::test]
async fn test_vendor_still_unhealthy_after_dr() {
    let harness = Harness::new(vendor_world()).with_vendor(ScriptedVendor::outage());
    let config = CommanderConfig::default().with_max_attempts(2);

    let report = harness
        .with_config(config)
        .commander()
        .run_mission(vendor_outage_alert(true))
        .await;

    let failure = report.failure().unwrap();
    assert_eq!(failure.kind, FailureKind::DisasterRecovery);
    assert_eq!(failure.attempts, 2);
    assert_eq!(failure.last_reason, "Vendor still unhealthy after DR.");
    assert!(!report.context.remediation_applied);
}

/// Tenet: logs showing 503 overrule a vendor that claims to be healthy
#[tokio::test]
async fn test_vendor_conflict_recorded() {
    let harness = Harness::new(vendor_world()).with_vendor(ScriptedVendor::deceptive());
    let config = CommanderConfig::default().with_max_attempts(1);

    let report = harness
        .with_config(config)
        .commander()
        .run_mission(vendor_outage_alert(false))
        .await;

    assert!(report.context.vendor_conflict);
    assert!(report.context.vendor_signal.as_ref().unwrap().is_deceptive());
    assert!(!report.succeeded());
}

/// Tenet: a deploy that claims success but changes nothing is retried
#[tokio::test]
async fn test_verification_failure_loops() {
    let world = InMemoryWorld::builder()
        .log("Airflow", "ERROR", "Column 'd' missing in SALES_DATA")
        .header(&["a", "b", "c", "d"])
        .table("SALES_DATA", &["a", "b", "c"])
        .force_observability_failure()
        .build();
    let harness = Harness::new(world);
    let mut profile = MissionProfile::default();
    profile.verify_after_fix = true;
    let alert = schema_drift_alert().with_profile(profile);

    let report = harness.commander().run_mission(alert).await;

    let failure = report.failure().unwrap();
    assert_eq!(failure.kind, FailureKind::LoopExhaustion);
    assert_eq!(
        failure.last_reason,
        "Verification: deploy reported success but schema unchanged."
    );
    assert_eq!(harness.world.calls("deploy_sql"), 3);
    assert_eq!(harness.gate.prompts(), 3);
    assert_eq!(report.context.hitl.events, 3);
    assert!(!report.context.remediation_applied);
    assert!(harness.world.tickets().is_empty());
}

/// Tenet: the vendor cursor is reset once, before the first retry
#[tokio::test]
async fn test_single_vendor_reset_before_retry() {
    let world = InMemoryWorld::builder()
        .log("Airflow", "ERROR", "Deadlock on STAGE_SALES, duplicate ids in batch")
        .table("STAGE_SALES", &["id", "date", "amount"])
        .locked_until_reset()
        .build();
    let harness = Harness::new(world)
        .with_generator(ScriptedGenerator::new("Root Cause: duplicate rows in the stage table block the load."));

    let report = harness.commander().run_mission(deadlock_alert()).await;

    assert!(report.succeeded());
    assert_eq!(
        report.context.loop_history,
        vec!["Attempt 1: Execution failed.".to_string(), "Attempt 2: Success".to_string()]
    );
    assert_eq!(harness.world.resets(), vec!["loop_retry_2".to_string()]);
    assert!(report.context.vendor_reset_done);
    let deployed = harness.world.deployed();
    assert_eq!(deployed.len(), 2);
    assert!(deployed.iter().all(|sql| sql.starts_with("DELETE FROM STAGE_SALES USING")));
    assert_eq!(harness.gate.requests()[0].1, "Detected controlled command 'DELETE FROM'");
}

/// Tenet: a recalled incident is fast-tracked and not memorized twice
#[tokio::test]
async fn test_memory_hit_is_not_stored_again() {
    let memory = Arc::new(InMemoryIncidentMemory::new());

    let first = Harness::new(InMemoryWorld::schema_drift()).with_memory(Arc::clone(&memory));
    let earlier = first.commander().run_mission(schema_drift_alert()).await;
    assert!(earlier.succeeded());
    assert!(earlier.context.memory_match_id.is_none());
    assert_eq!(memory.len(), 1);

    let second = Harness::new(InMemoryWorld::schema_drift()).with_memory(Arc::clone(&memory));
    let report = second.commander().run_mission(schema_drift_alert()).await;

    assert!(report.succeeded());
    assert_eq!(report.context.memory_match_id.as_deref(), Some(earlier.context.incident_id.as_str()));
    assert_eq!(memory.len(), 1);
}

/// Tenet: code bugs are fixed through a pull request
#[tokio::test]
async fn test_gitops_code_fix() {
    let world = InMemoryWorld::builder()
        .log("Airflow", "ERROR", "division by zero in roi_calc")
        .table("SALES_DATA", &["a", "b", "c"])
        .file("models/kpi/roi_calc.sql", "SELECT revenue / spend AS roi FROM kpi")
        .build();
    let generator = ScriptedGenerator::new("Root Cause: division by zero in the ROI model when spend is 0.")
        .on("[BUG]", "```sql\nSELECT revenue / NULLIF(spend, 0) AS roi FROM kpi\n```");
    let harness = Harness::new(world).with_generator(generator);

    let report = harness.commander().run_mission(kpi_alert()).await;

    assert!(report.succeeded());
    match report.context.plan.as_ref().unwrap() {
        PlanDescriptor::GitChange { branch, diff, .. } => {
            assert_eq!(branch, &format!("fix/{}", report.context.short_id()));
            assert_eq!(diff, "SELECT revenue / NULLIF(spend, 0) AS roi FROM kpi");
        }
        other => panic!("expected git change, got {other:?}"),
    }
    assert_eq!(harness.gate.prompts(), 0);
    assert_eq!(harness.world.pull_requests().len(), 1);
    let projects: Vec<String> = harness.world.tickets().into_iter().map(|t| t.0).collect();
    assert_eq!(projects, vec!["DATA".to_string(), "OPS".to_string()]);

    let summary = MissionSummary::from_report(&report, None);
    assert_eq!(summary.method, "GitOps (PR)");
    assert!(summary.success);
}

/// Tenet: the audit chain of a full mission verifies
#[tokio::test]
async fn test_mission_audit_chain_verifies() {
    let harness = Harness::new(InMemoryWorld::schema_drift());
    let commander = harness.commander();

    let report = commander.run_mission(schema_drift_alert()).await;

    let audit = commander.audit();
    assert!(audit.verify_integrity().is_ok());
    assert!(!audit.events_for(&report.context.incident_id).is_empty());
}

/// Tenet: re-adding an existing column succeeds without duplicating it
#[tokio::test]
async fn test_add_column_is_idempotent() {
    let world = InMemoryWorld::schema_drift();
    let sql = "ALTER TABLE SALES_DATA ADD COLUMN IF NOT EXISTS d VARCHAR";

    assert!(world.deploy_sql(sql).await.unwrap().succeeded());
    assert!(world.deploy_sql(sql).await.unwrap().succeeded());

    assert_eq!(world.columns("SALES_DATA").len(), 4);
}

#[derive(Debug, Clone, Copy)]
enum Scenario {
    Inconclusive,
    VendorNoDr,
    Denied,
    Unverified,
    Drift,
}

fn scenario() -> impl Strategy<Value = Scenario> {
    prop_oneof![
        Just(Scenario::Inconclusive),
        Just(Scenario::VendorNoDr),
        Just(Scenario::Denied),
        Just(Scenario::Unverified),
        Just(Scenario::Drift),
    ]
}

fn harness_for(scenario: Scenario) -> (Harness, Alert) {
    match scenario {
        Scenario::Inconclusive => (
            Harness::new(InMemoryWorld::schema_drift()).with_generator(ScriptedGenerator::new("LLM_ERROR: down")),
            schema_drift_alert(),
        ),
        Scenario::VendorNoDr => (
            Harness::new(vendor_world()).with_vendor(ScriptedVendor::outage()),
            vendor_outage_alert(false),
        ),
        Scenario::Denied => (
            Harness::new(InMemoryWorld::schema_drift()).with_gate(ScriptedGate::denying()),
            schema_drift_alert(),
        ),
        Scenario::Unverified => {
            let world = InMemoryWorld::builder()
                .header(&["a", "d"])
                .table("SALES_DATA", &["a"])
                .force_observability_failure()
                .build();
            let mut profile = MissionProfile::default();
            profile.verify_after_fix = true;
            (Harness::new(world), schema_drift_alert().with_profile(profile))
        }
        Scenario::Drift => (Harness::new(InMemoryWorld::schema_drift()), schema_drift_alert()),
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Tenet: attempts stay within budget and history matches attempts
    #[test]
    fn prop_loop_is_bounded(max_attempts in 1u32..=5, scenario in scenario()) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let (harness, alert) = harness_for(scenario);
        let harness = harness.with_config(CommanderConfig::default().with_max_attempts(max_attempts));

        let report = runtime.block_on(harness.commander().run_mission(alert));

        prop_assert!(report.attempts() >= 1);
        prop_assert!(report.attempts() <= max_attempts);
        prop_assert_eq!(report.context.loop_history.len(), report.attempts() as usize);
        prop_assert!(report.context.state.is_terminal());
        prop_assert!(report.context.metrics.is_finalized());
        prop_assert!(harness.gate.prompts() <= report.attempts() as usize);
        if report.context.hitl_blocked() {
            prop_assert_eq!(harness.gate.prompts(), report.context.hitl.events as usize);
        }
    }
}
