//! Mission evaluation
//!
//! Turns a terminal [`MissionReport`] into the numbers operators compare
//! against a human on-call baseline, and renders them as markdown.

use crate::types::{round_to, MissionReport};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

/// Time a human needs for the same incident
pub const HUMAN_BASELINE_SECONDS: f64 = 15.0 * 60.0;

/// What a human response costs
pub const HUMAN_BASELINE_COST: f64 = 12.50;

/// Label used when neither caller nor profile names the mission
const DEFAULT_LABEL: &str = "Live Mission";

/// Normalized mission summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissionSummary {
    /// Scenario label
    pub scenario: String,
    /// Remediation took effect
    pub success: bool,
    /// Workflow used
    pub method: String,
    /// Wall-clock seconds
    pub duration_seconds: f64,
    /// Estimated spend
    pub estimated_cost: f64,
    /// Attempts taken
    pub loop_attempts: u32,
    /// Seconds saved against the baseline
    pub human_time_saved: f64,
    /// Spend saved against the baseline
    pub cost_saved: f64,
    /// Share of the baseline saved, in percent
    pub efficiency_pct: f64,
    /// Vendor cross-check text
    pub vendor_status: String,
    /// Human prompts issued
    pub hitl_events: u32,
    /// Last human decision
    pub hitl_decision: String,
}

impl MissionSummary {
    /// Summarize a finished mission. `label` overrides the profile's
    /// scenario id.
    #[must_use]
    pub fn from_report(report: &MissionReport, label: Option<&str>) -> Self {
        let ctx = &report.context;
        let scenario = label
            .map(str::to_string)
            .or_else(|| Some(ctx.profile().scenario_id.clone()).filter(|s| !s.is_empty()))
            .unwrap_or_else(|| DEFAULT_LABEL.to_string());

        let duration = round_to(ctx.metrics.duration_seconds.unwrap_or_default(), 2);
        let cost = ctx.metrics.estimated_cost.unwrap_or_default();
        let method = match &ctx.plan {
            Some(plan) if plan.is_git() => plan.method(),
            _ => "Runtime SQL Patch",
        };
        let vendor_status = ctx
            .vendor_signal
            .as_ref()
            .map_or_else(|| "-".to_string(), |s| format!("{}: {}", s.status, s.message));
        let hitl_decision = ctx
            .hitl
            .last_decision
            .map_or_else(|| "N/A".to_string(), |d| d.as_str().to_string());

        let saved = (HUMAN_BASELINE_SECONDS - duration).max(0.0);
        let cost_saved = (HUMAN_BASELINE_COST - cost).max(0.0);

        Self {
            scenario,
            success: ctx.remediation_applied,
            method: method.to_string(),
            duration_seconds: duration,
            estimated_cost: round_to(cost, 4),
            loop_attempts: ctx.attempts,
            human_time_saved: round_to(saved, 2),
            cost_saved: round_to(cost_saved, 2),
            efficiency_pct: round_to(saved / HUMAN_BASELINE_SECONDS * 100.0, 1),
            vendor_status,
            hitl_events: ctx.hitl.events,
            hitl_decision,
        }
    }

    /// Markdown dashboard
    #[must_use]
    pub fn render_dashboard(&self) -> String {
        let mut out = format!("### Mission Dashboard - {}\n\n", self.scenario);
        out.push_str("| SIGNAL | VALUE | TARGET |\n| :--- | :--- | :--- |\n");
        let rows = [
            ("Runtime", format!("{}s", self.duration_seconds), "< 60s"),
            ("Est. Cost", format!("${}", self.estimated_cost), "< $0.05"),
            ("Loop Attempts", self.loop_attempts.to_string(), "1 pass"),
            (
                "Human Time Saved",
                format!(
                    "{}s (~{}m)",
                    self.human_time_saved,
                    round_to(self.human_time_saved / 60.0, 1)
                ),
                "> 600s",
            ),
            ("Cost Saved vs Ops", format!("${}", self.cost_saved), "> $5"),
            ("Efficiency Gain", format!("{}%", self.efficiency_pct), "90%+"),
            ("Workflow", self.method.clone(), "Adaptive"),
            ("Vendor Cross-Check", self.vendor_status.clone(), "Catch deception"),
            (
                "HITL Events",
                format!("{} ({})", self.hitl_events, self.hitl_decision),
                "<= 1",
            ),
        ];
        for (signal, value, target) in rows {
            let _ = writeln!(out, "| **{signal}** | {value} | {target} |");
        }
        out.trim_end().to_string()
    }
}

/// One line per mission, for batch runs
#[must_use]
pub fn render_batch(summaries: &[MissionSummary]) -> String {
    let mut out = String::from("| SCENARIO | SUCCESS | METHOD | DURATION | COST | EFFICIENCY |\n");
    out.push_str("| :--- | :--- | :--- | :--- | :--- | :--- |\n");
    for s in summaries {
        let _ = writeln!(
            out,
            "| {} | {} | {} | {}s | ${} | {}% |",
            s.scenario,
            if s.success { "yes" } else { "no" },
            s.method,
            s.duration_seconds,
            s.estimated_cost,
            s.efficiency_pct
        );
    }
    out.trim_end().to_string()
}
