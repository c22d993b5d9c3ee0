//! Remediation Engineer
//!
//! Turns a hypothesis into a concrete plan and applies approved plans.
//!
//! Strategy selection, in priority order:
//! 1. Stage cleanup (dedup delete) when the mission asks for it
//! 2. No plan when the problem is upstream
//! 3. One `ADD COLUMN IF NOT EXISTS` per known missing column
//! 4. A code fix delivered as a pull request
//! 5. A generated SQL fix

use crate::audit::{Agent, AuditLevel, AuditTrail};
use crate::gateway::{PullRequest, ToolGateway, TICKET_PRIORITY};
use crate::generation::{sanitize, GenerationChain};
use crate::profile::CommanderConfig;
use crate::rules;
use crate::types::{IncidentContext, PlanDescriptor};
use std::sync::Arc;

const PERSONA: &str = "You are a remediation engineer. \
Choose minimal, safe fixes (SQL or Git) aligned to the diagnosis.";

const INSTRUCTION_SQL: &str = "Return a single SQL command. No comments. No prose. \
Prefer additive changes (ALTER ... ADD) or targeted updates only.";

const INSTRUCTION_GIT: &str = "Return ONLY the fixed code block. No prose, no comments. \
Keep changes minimal and aligned to the diagnosis.";

/// Chosen remediation family
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Strategy {
    /// Deterministic dedup of the stage table
    StageCleanup,
    /// Upstream problem; nothing to patch here
    VendorDeferred,
    /// Add the missing columns
    SchemaDrift(Vec<String>),
    /// Patch source code via pull request
    CodeFix {
        /// File to patch
        path: String,
    },
    /// Ask the generator for SQL
    GeneratedSql,
}

/// Vendor classification used by plan selection
#[must_use]
pub fn is_vendor_issue(ctx: &IncidentContext, diagnosis: &str) -> bool {
    let profile = ctx.profile();
    if profile.requires_kb_lookup || profile.force_db_checks || profile.disable_drift {
        return false;
    }
    let endpoint_is_http = profile
        .endpoint
        .as_deref()
        .is_some_and(|e| e.to_lowercase().contains("http"));
    rules::mentions_vendor(diagnosis).is_some() || rules::is_http_error_code(&ctx.alert.error_code) || endpoint_is_http
}

/// Pick a strategy; `None` without a hypothesis
#[must_use]
pub fn select_strategy(ctx: &IncidentContext, default_code_path: &str) -> Option<Strategy> {
    let diagnosis = ctx.root_cause_hypothesis.as_deref()?;
    let profile = ctx.profile();

    if ctx.alert.is_stage_cleanup() {
        return Some(Strategy::StageCleanup);
    }
    if is_vendor_issue(ctx, diagnosis) {
        return Some(Strategy::VendorDeferred);
    }
    if !ctx.missing_columns.is_empty() {
        return Some(Strategy::SchemaDrift(ctx.missing_columns.clone()));
    }
    if let Some(path) = &profile.file_path {
        return Some(Strategy::CodeFix { path: path.clone() });
    }
    if rules::mentions_division_by_zero(diagnosis) {
        return Some(Strategy::CodeFix {
            path: default_code_path.to_string(),
        });
    }
    Some(Strategy::GeneratedSql)
}

/// Dedup statement keeping the newest row per id
#[must_use]
pub fn stage_cleanup_sql(table: &str) -> String {
    format!(
        "DELETE FROM {table} USING (SELECT id, ROW_NUMBER() OVER (PARTITION BY id ORDER BY date DESC) AS rn FROM {table}) dedup \
         WHERE {table}.id = dedup.id AND dedup.rn > 1"
    )
}

/// One additive statement per missing column
#[must_use]
pub fn schema_drift_sql(table: &str, missing: &[String]) -> String {
    missing
        .iter()
        .map(|col| format!("ALTER TABLE {table} ADD COLUMN IF NOT EXISTS {col} VARCHAR"))
        .collect::<Vec<_>>()
        .join(";\n")
}

/// Plans and applies fixes
pub struct RemediationEngineer {
    gateway: Arc<dyn ToolGateway>,
    generator: GenerationChain,
    audit: Arc<AuditTrail>,
    repo_name: String,
    default_code_path: String,
    change_project: String,
}

impl std::fmt::Debug for RemediationEngineer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemediationEngineer")
            .field("repo_name", &self.repo_name)
            .field("default_code_path", &self.default_code_path)
            .finish()
    }
}

impl RemediationEngineer {
    /// Create engineer
    #[must_use]
    pub fn new(
        gateway: Arc<dyn ToolGateway>,
        generator: GenerationChain,
        audit: Arc<AuditTrail>,
        config: &CommanderConfig,
    ) -> Self {
        Self {
            gateway,
            generator,
            audit,
            repo_name: config.repo_name.clone(),
            default_code_path: config.default_code_path.clone(),
            change_project: config.change_project.clone(),
        }
    }

    fn note(&self, ctx: &IncidentContext, level: AuditLevel, message: impl Into<String>) {
        self.audit.record(&ctx.incident_id, Agent::RemediationEngineer, level, message);
    }

    /// Draft a plan for the current hypothesis
    pub async fn plan(&self, ctx: &IncidentContext) -> Option<PlanDescriptor> {
        let strategy = select_strategy(ctx, &self.default_code_path)?;
        let diagnosis = ctx.root_cause_hypothesis.as_deref().unwrap_or_default();
        let table = ctx.profile().table_name.as_str();

        match strategy {
            Strategy::StageCleanup => {
                let sql = stage_cleanup_sql(table);
                self.note(ctx, AuditLevel::Warn, format!("Strategy: stage cleanup -> {sql}"));
                Some(PlanDescriptor::sql(sql))
            }
            Strategy::VendorDeferred => {
                self.note(
                    ctx,
                    AuditLevel::Warn,
                    "Vendor/API issue detected; no SQL or code change generated",
                );
                None
            }
            Strategy::SchemaDrift(missing) => {
                let sql = schema_drift_sql(table, &missing);
                self.note(ctx, AuditLevel::Warn, format!("Strategy: schema drift patch -> {sql}"));
                Some(PlanDescriptor::sql(sql))
            }
            Strategy::CodeFix { path } => self.code_fix(ctx, &path, diagnosis).await,
            Strategy::GeneratedSql => {
                self.note(ctx, AuditLevel::Info, "Strategy: generated SQL patch");
                let prompt = format!("{PERSONA}\n[DIAGNOSIS] {diagnosis}\n[INSTRUCTION] {INSTRUCTION_SQL}\n");
                match self.generator.generate(&prompt).await {
                    Ok(text) => {
                        let sql = sanitize(&text);
                        self.note(ctx, AuditLevel::Warn, format!("Proposed SQL: {sql}"));
                        Some(PlanDescriptor::sql(sql))
                    }
                    Err(e) => {
                        self.note(ctx, AuditLevel::Error, format!("SQL generation failed: {e}"));
                        None
                    }
                }
            }
        }
    }

    async fn code_fix(&self, ctx: &IncidentContext, path: &str, diagnosis: &str) -> Option<PlanDescriptor> {
        self.note(ctx, AuditLevel::Info, format!("Strategy: code fix, reading {path}"));
        let source = match self.gateway.get_file(&self.repo_name, path).await {
            Ok(source) => source,
            Err(e) => {
                self.note(ctx, AuditLevel::Warn, format!("Source unavailable: {e}"));
                String::from("(source unavailable)")
            }
        };
        let prompt = format!("{PERSONA}\n[BUG] {diagnosis}\n[FILE: {path}]\n{source}\n{INSTRUCTION_GIT}\n");
        let fixed = match self.generator.generate(&prompt).await {
            Ok(text) => sanitize(&text),
            Err(e) => {
                self.note(ctx, AuditLevel::Error, format!("Patch generation failed: {e}"));
                return None;
            }
        };
        let plan = PlanDescriptor::GitChange {
            repo: self.repo_name.clone(),
            branch: format!("fix/{}", ctx.short_id()),
            title: format!("Fix: {}", ctx.alert.error_code),
            diff: fixed,
        };
        self.note(ctx, AuditLevel::Warn, format!("Proposed {plan}"));
        Some(plan)
    }

    /// Apply an approved plan
    pub async fn execute(&self, ctx: &IncidentContext, plan: &PlanDescriptor) -> bool {
        match plan {
            PlanDescriptor::GitChange {
                repo, branch, title, ..
            } => {
                match self.gateway.create_branch(repo, "main", branch).await {
                    Ok(ack) if ack.accepted() => {}
                    Ok(ack) => {
                        self.note(ctx, AuditLevel::Error, format!("Branch creation refused: {}", ack.status));
                        return false;
                    }
                    Err(e) => {
                        self.note(ctx, AuditLevel::Error, format!("Branch creation failed: {e}"));
                        return false;
                    }
                }
                let pr = PullRequest {
                    repo_name: repo.clone(),
                    title: title.clone(),
                    description: "Auto-fix".to_string(),
                    branch_name: branch.clone(),
                };
                match self.gateway.open_pr(&pr).await {
                    Ok(ack) if ack.accepted() => {
                        let link = ack.link.unwrap_or_else(|| "unknown link".to_string());
                        self.note(ctx, AuditLevel::Success, format!("PR opened: {link}"));
                    }
                    Ok(ack) => {
                        self.note(ctx, AuditLevel::Error, format!("PR refused: {}", ack.status));
                        return false;
                    }
                    Err(e) => {
                        self.note(ctx, AuditLevel::Error, format!("PR failed: {e}"));
                        return false;
                    }
                }
                let summary = format!("Fix {}", ctx.alert.error_code);
                let filed = self
                    .gateway
                    .create_ticket(&self.change_project, &summary, TICKET_PRIORITY)
                    .await;
                if let Err(e) = filed {
                    self.note(ctx, AuditLevel::Warn, format!("Change ticket not filed: {e}"));
                }
                true
            }
            PlanDescriptor::SqlPatch { statement } => {
                self.note(ctx, AuditLevel::Warn, "Deploying patch");
                match self.gateway.deploy_sql(statement).await {
                    Ok(reply) if reply.succeeded() => {
                        self.note(ctx, AuditLevel::Success, format!("Deployment result: {}", reply.detail()));
                        true
                    }
                    Ok(reply) => {
                        self.note(ctx, AuditLevel::Error, format!("Deployment rejected: {}", reply.detail()));
                        false
                    }
                    Err(e) => {
                        self.note(ctx, AuditLevel::Error, format!("Deployment failed: {e}"));
                        false
                    }
                }
            }
        }
    }

    /// Reset the vendor cursor; `true` only when the cursor is now reset
    pub async fn run_disaster_recovery(&self, ctx: &IncidentContext) -> bool {
        self.note(ctx, AuditLevel::Warn, "Executing vendor disaster recovery (cursor reset)");
        self.reset_cursor(ctx, &format!("vendor_dr_{}", ctx.short_id())).await
    }

    /// Reset the vendor cursor before a retry
    pub async fn reset_before_retry(&self, ctx: &IncidentContext, attempt: u32) -> bool {
        self.note(ctx, AuditLevel::Warn, "Triggering vendor cursor reset before retry");
        self.reset_cursor(ctx, &format!("loop_retry_{attempt}")).await
    }

    async fn reset_cursor(&self, ctx: &IncidentContext, reason: &str) -> bool {
        match self.gateway.reset_vendor_cursor(reason).await {
            Ok(ack) if ack.cleared() => {
                self.note(ctx, AuditLevel::Success, format!("Cursor reset: {} ({})", ack.status, ack.message));
                true
            }
            Ok(ack) => {
                self.note(ctx, AuditLevel::Error, format!("Cursor reset not applied: {} ({})", ack.status, ack.message));
                false
            }
            Err(e) => {
                self.note(ctx, AuditLevel::Error, format!("Cursor reset failed: {e}"));
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{GenerationError, ToolError};
    use crate::gateway::{DeployReply, MockToolGateway, ResetAck, Ticket, ToolAck};
    use crate::generation::TextGenerator;
    use crate::profile::MissionProfile;
    use crate::types::Alert;
    use async_trait::async_trait;

    struct Reply(&'static str);

    #[async_trait]
    impl TextGenerator for Reply {
        fn name(&self) -> &str {
            "reply"
        }

        async fn generate(&self, _prompt: &str) -> Result<String, GenerationError> {
            Ok(self.0.to_string())
        }
    }

    fn engineer(gateway: MockToolGateway, reply: &'static str) -> RemediationEngineer {
        RemediationEngineer::new(
            Arc::new(gateway),
            GenerationChain::new(vec![Arc::new(Reply(reply))]),
            Arc::new(AuditTrail::new()),
            &CommanderConfig::default(),
        )
    }

    fn context(code: &str, profile: MissionProfile, hypothesis: &str) -> IncidentContext {
        let mut ctx = IncidentContext::new(Alert::new("A-1", "Airflow", code, "Load failed").with_profile(profile));
        ctx.root_cause_hypothesis = Some(hypothesis.to_string());
        ctx
    }

    #[test]
    fn strategy_priority() {
        let mut profile = MissionProfile::default();
        profile.expected_fix = "stage_cleanup".into();
        let ctx = context("ERR", profile, "Upstream vendor timeout");
        assert_eq!(select_strategy(&ctx, "x.sql"), Some(Strategy::StageCleanup));

        let ctx = context("HTTP_503", MissionProfile::default(), "Root cause: column d missing");
        assert_eq!(select_strategy(&ctx, "x.sql"), Some(Strategy::VendorDeferred));

        let mut ctx = context("ERR_SCHEMA_001", MissionProfile::default(), "column d missing");
        ctx.missing_columns = vec!["d".into()];
        assert_eq!(select_strategy(&ctx, "x.sql"), Some(Strategy::SchemaDrift(vec!["d".into()])));

        let ctx = context("ERR_KPI", MissionProfile::default(), "Division by zero in ROI");
        assert_eq!(
            select_strategy(&ctx, "models/kpi/roi_calc.sql"),
            Some(Strategy::CodeFix {
                path: "models/kpi/roi_calc.sql".into()
            })
        );

        let ctx = context("ERR_X", MissionProfile::default(), "bad cast");
        assert_eq!(select_strategy(&ctx, "x.sql"), Some(Strategy::GeneratedSql));

        let mut ctx = context("ERR_X", MissionProfile::default(), "bad cast");
        ctx.root_cause_hypothesis = None;
        assert_eq!(select_strategy(&ctx, "x.sql"), None);
    }

    #[test]
    fn force_db_suppresses_vendor_classification() {
        let ctx = context("HTTP_503", MissionProfile::default().with_force_db_checks(true), "upstream timeout");
        assert!(!is_vendor_issue(&ctx, "upstream timeout"));
    }

    #[test]
    fn drift_sql_joins_statements() {
        let sql = schema_drift_sql("SALES_DATA", &["d".into(), "e".into()]);
        assert_eq!(
            sql,
            "ALTER TABLE SALES_DATA ADD COLUMN IF NOT EXISTS d VARCHAR;\nALTER TABLE SALES_DATA ADD COLUMN IF NOT EXISTS e VARCHAR"
        );
        assert!(stage_cleanup_sql("STAGE").starts_with("DELETE FROM STAGE USING"));
    }

    #[tokio::test]
    async fn code_fix_builds_git_change() {
        let mut gateway = MockToolGateway::new();
        gateway
            .expect_get_file()
            .withf(|repo, path| repo == "analytics-pipeline" && path == "models/kpi/roi_calc.sql")
            .returning(|_, _| Ok("SELECT revenue / spend AS roi".into()));

        let ctx = context("ERR_KPI_DIV", MissionProfile::default(), "division by zero in roi");
        let plan = engineer(gateway, "```sql\nSELECT revenue / NULLIF(spend, 0) AS roi\n```")
            .plan(&ctx)
            .await
            .unwrap();

        match plan {
            PlanDescriptor::GitChange {
                repo, branch, title, diff,
            } => {
                assert_eq!(repo, "analytics-pipeline");
                assert_eq!(branch, format!("fix/{}", ctx.short_id()));
                assert_eq!(title, "Fix: ERR_KPI_DIV");
                assert_eq!(diff, "SELECT revenue / NULLIF(spend, 0) AS roi");
            }
            other => panic!("expected git change, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn sentinel_generation_yields_no_plan() {
        let ctx = context("ERR_X", MissionProfile::default(), "bad cast");
        let plan = engineer(MockToolGateway::new(), "LLM_ERROR: Service Unavailable (503)")
            .plan(&ctx)
            .await;
        assert!(plan.is_none());
    }

    #[tokio::test]
    async fn fenced_sentinel_or_empty_fence_yields_no_sql_plan() {
        let ctx = context("ERR_X", MissionProfile::default(), "bad cast");
        for reply in ["```sql\nLLM_ERROR: Service Unavailable (503)\n```", "```sql\n```"] {
            assert!(engineer(MockToolGateway::new(), reply).plan(&ctx).await.is_none(), "{reply}");
        }
    }

    #[tokio::test]
    async fn fenced_sentinel_yields_no_code_fix() {
        let mut gateway = MockToolGateway::new();
        gateway
            .expect_get_file()
            .returning(|_, _| Ok("SELECT revenue / spend AS roi".into()));

        let ctx = context("ERR_KPI_DIV", MissionProfile::default(), "division by zero in roi");
        let plan = engineer(gateway, "```\nLLM_ERROR: Quota Exceeded (429)\n```").plan(&ctx).await;
        assert!(plan.is_none());
    }

    #[tokio::test]
    async fn git_execution_opens_pr_and_files_ticket() {
        let mut gateway = MockToolGateway::new();
        gateway.expect_create_branch().times(1).returning(|_, _, branch| {
            Ok(ToolAck {
                status: "SUCCESS".into(),
                link: Some(branch.to_string()),
            })
        });
        gateway.expect_open_pr().times(1).returning(|pr| {
            Ok(ToolAck {
                status: "OPEN".into(),
                link: Some(format!("https://git.example/{}/pull/1", pr.repo_name)),
            })
        });
        gateway
            .expect_create_ticket()
            .withf(|project, summary, priority| {
                project == "DATA" && summary == "Fix ERR_KPI" && priority == TICKET_PRIORITY
            })
            .times(1)
            .returning(|project, _, _| {
                Ok(Ticket {
                    ticket_id: format!("{project}-101"),
                    link: "https://tracker.example/DATA-101".into(),
                })
            });

        let ctx = context("ERR_KPI", MissionProfile::default(), "division by zero");
        let plan = PlanDescriptor::GitChange {
            repo: "analytics-pipeline".into(),
            branch: "fix/abc".into(),
            title: "Fix: ERR_KPI".into(),
            diff: "SELECT 1".into(),
        };
        assert!(engineer(gateway, "").execute(&ctx, &plan).await);
    }

    #[tokio::test]
    async fn failed_deploy_is_execution_failure() {
        let mut gateway = MockToolGateway::new();
        gateway
            .expect_deploy_sql()
            .returning(|_| Ok(DeployReply::failed("Stage table locked by vendor sync")));
        let ctx = context("ERR", MissionProfile::default(), "h");
        assert!(!engineer(gateway, "").execute(&ctx, &PlanDescriptor::sql("DELETE FROM t")).await);

        let mut gateway = MockToolGateway::new();
        gateway.expect_deploy_sql().returning(|_| {
            Err(ToolError::Transport {
                tool: "deploy_sql_patch".into(),
                message: "reset".into(),
            })
        });
        assert!(!engineer(gateway, "").execute(&ctx, &PlanDescriptor::sql("SELECT 1")).await);
    }

    #[tokio::test]
    async fn disaster_recovery_accepts_already_reset() {
        let mut gateway = MockToolGateway::new();
        let ctx = context("HTTP_503", MissionProfile::default(), "h");
        let expected = format!("vendor_dr_{}", ctx.short_id());
        gateway
            .expect_reset_vendor_cursor()
            .withf(move |reason| *reason == expected)
            .returning(|_| {
                Ok(ResetAck {
                    status: "ALREADY_RESET".into(),
                    message: "Vendor cursor already reset.".into(),
                })
            });
        assert!(engineer(gateway, "").run_disaster_recovery(&ctx).await);
    }

    #[tokio::test]
    async fn skipped_reset_is_not_recovery() {
        let mut gateway = MockToolGateway::new();
        gateway.expect_reset_vendor_cursor().returning(|_| {
            Ok(ResetAck {
                status: "SKIPPED".into(),
                message: String::new(),
            })
        });
        let ctx = context("HTTP_503", MissionProfile::default(), "h");
        assert!(!engineer(gateway, "").run_disaster_recovery(&ctx).await);
    }
}
