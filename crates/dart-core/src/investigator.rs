//! Investigator
//!
//! Gathers evidence for one attempt (logs, schema, sample rows, incoming
//! header), optionally consults the knowledge base or the web, and asks the
//! generation chain for a root-cause hypothesis. Tool failures degrade to
//! missing evidence; a failed generation yields no hypothesis.

use crate::audit::{Agent, AuditLevel, AuditTrail};
use crate::gateway::ToolGateway;
use crate::generation::GenerationChain;
use crate::rules::{self, FastScan};
use crate::types::{DataSnapshot, IncidentContext, LogEntry};
use std::fmt::Write as _;
use std::sync::Arc;

/// Hypothesis used when evidence points upstream
pub const VENDOR_HYPOTHESIS: &str = "Vendor/API outage or deception detected; DB checks skipped.";

/// Log lines fetched per attempt
const LOG_LIMIT: usize = 10;

/// Rows sampled from the target table
const SAMPLE_LIMIT: usize = 3;

const PERSONA: &str = "You are a forensic data-pipeline auditor. \
Correlate logs, schema, data and vendor signals to produce a crisp root cause.";

const INSTRUCTION: &str = "Respond with:\n\
- Root Cause: <one-line root cause>\n\
- Evidence: <bullet summary of key signals>\n\
- Recommendation: <next step>\n\
Keep it concise and actionable.";

/// What one investigation produced
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Investigation {
    /// Root-cause hypothesis, if one was reached
    pub hypothesis: Option<String>,
    /// Logs collected
    pub logs: Vec<LogEntry>,
    /// Table sample
    pub snapshot: Option<DataSnapshot>,
    /// Fast-scan hint (with any lookup result folded in)
    pub hint: String,
}

/// Join log contents the way searches and scans consume them
#[must_use]
pub fn flatten_logs(logs: &[LogEntry]) -> String {
    logs.iter()
        .map(|l| l.content.as_str())
        .collect::<Vec<_>>()
        .join(" | ")
}

/// Render a markdown table; `None` when there is nothing to show
#[must_use]
pub fn markdown_table(headers: &[String], rows: &[Vec<String>]) -> Option<String> {
    if headers.is_empty() || rows.is_empty() {
        return None;
    }
    let mut out = format!("| {} |\n", headers.join(" | "));
    let _ = writeln!(out, "| {} |", vec!["---"; headers.len()].join(" | "));
    for row in rows {
        let _ = writeln!(out, "| {} |", row.join(" | "));
    }
    Some(out.trim_end().to_string())
}

fn numbered(title: &str, label: &str, columns: &[String]) -> Option<String> {
    let rows: Vec<Vec<String>> = columns
        .iter()
        .enumerate()
        .map(|(i, c)| vec![(i + 1).to_string(), c.clone()])
        .collect();
    markdown_table(&["#".to_string(), label.to_string()], &rows).map(|t| format!("### {title}\n{t}"))
}

fn cell(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Root-cause analyst
pub struct Investigator {
    gateway: Arc<dyn ToolGateway>,
    generator: GenerationChain,
    audit: Arc<AuditTrail>,
}

impl std::fmt::Debug for Investigator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Investigator").field("generator", &self.generator).finish()
    }
}

impl Investigator {
    /// Create investigator
    #[must_use]
    pub fn new(gateway: Arc<dyn ToolGateway>, generator: GenerationChain, audit: Arc<AuditTrail>) -> Self {
        Self {
            gateway,
            generator,
            audit,
        }
    }

    fn note(&self, ctx: &IncidentContext, level: AuditLevel, message: impl Into<String>) {
        self.audit.record(&ctx.incident_id, Agent::Investigator, level, message);
    }

    /// Investigate the current attempt
    pub async fn investigate(&self, ctx: &IncidentContext) -> Investigation {
        let profile = ctx.profile();
        self.note(ctx, AuditLevel::Info, "Starting forensic analysis");

        let logs = match self.gateway.fetch_logs(profile.service_filter(), LOG_LIMIT).await {
            Ok(logs) => logs,
            Err(e) => {
                self.note(ctx, AuditLevel::Warn, format!("Log fetch failed: {e}"));
                Vec::new()
            }
        };
        let flat = flatten_logs(&logs);

        let mut scan = rules::fast_scan(&flat);
        if profile.requires_kb_lookup && !scan.is_unknown() {
            self.note(ctx, AuditLevel::Info, "Knowledge base lookup required; overriding fast scan");
            scan = FastScan::Unknown;
        }

        let hint = if scan.is_unknown() && profile.lookup_allowed() {
            self.lookup(ctx, &flat).await
        } else {
            self.note(ctx, AuditLevel::Info, format!("Fast scan result: {scan}"));
            scan.to_string()
        };

        let mut investigation = Investigation {
            hypothesis: None,
            logs,
            snapshot: None,
            hint,
        };

        let diag = format!("{} {}", investigation.hint, ctx.alert.message);
        if !profile.force_db_checks {
            if let Some(marker) = rules::mentions_vendor(&diag) {
                self.note(
                    ctx,
                    AuditLevel::Warn,
                    format!("Vendor marker '{marker}' found; skipping schema, sample and header capture"),
                );
                investigation.hypothesis = Some(VENDOR_HYPOTHESIS.to_string());
                return investigation;
            }
        }

        let table = profile.table_name.as_str();
        let schema = match self.gateway.inspect_schema(table).await {
            Ok(columns) => columns,
            Err(e) => {
                self.note(ctx, AuditLevel::Warn, format!("Schema capture failed: {e}"));
                Vec::new()
            }
        };
        let sample = match self.gateway.get_sample(table, SAMPLE_LIMIT).await {
            Ok(sample) => Some(sample),
            Err(e) => {
                self.note(ctx, AuditLevel::Warn, format!("Sample capture failed: {e}"));
                None
            }
        };
        let header = match self.gateway.get_incoming_header("*").await {
            Ok(columns) => columns,
            Err(e) => {
                self.note(ctx, AuditLevel::Warn, format!("Header capture failed: {e}"));
                Vec::new()
            }
        };

        let sample_section = sample.as_ref().and_then(|s| {
            let rows: Vec<Vec<String>> = s.rows.iter().map(|r| r.iter().map(cell).collect()).collect();
            markdown_table(&s.columns, &rows).map(|t| format!("### Sample Rows: {table}\n{t}"))
        });
        investigation.snapshot = sample.map(|s| DataSnapshot {
            table_name: table.to_string(),
            columns: s.columns,
            rows: s.rows,
        });
        let schema_section = numbered(&format!("Schema Columns: {table}"), "Column", &schema);
        let header_section = numbered("Incoming File Header", "Field", &header);
        for section in [&schema_section, &sample_section, &header_section].into_iter().flatten() {
            if let Some(title) = section.lines().next() {
                self.note(ctx, AuditLevel::Info, format!("{} captured", title.trim_start_matches("### ")));
            }
        }

        let prompt = format!(
            "{PERSONA}\n{INSTRUCTION}\n\n[FAST SCAN HINT]\n{}\n\n[LOGS]\n{}\n\n[SCHEMA]\n{}\n\n[FILE_HEADER]\n{}\n\n[DATA SAMPLE]\n{}\n\n[ALERT]\n{}\n",
            investigation.hint,
            flat,
            schema_section.unwrap_or_else(|| "(unavailable)".to_string()),
            header_section.unwrap_or_else(|| "(unavailable)".to_string()),
            sample_section.unwrap_or_else(|| "(unavailable)".to_string()),
            ctx.alert.message,
        );

        match self.generator.generate(&prompt).await {
            Ok(analysis) => {
                let analysis = analysis.trim().to_string();
                self.note(ctx, AuditLevel::Success, format!("Analysis complete: {analysis}"));
                investigation.hypothesis = Some(analysis);
            }
            Err(e) => {
                self.note(ctx, AuditLevel::Error, format!("Analysis failed: {e}"));
            }
        }
        investigation
    }

    /// KB first, then web when allowed
    async fn lookup(&self, ctx: &IncidentContext, flat: &str) -> String {
        let profile = ctx.profile();
        let code = rules::extract_error_code(flat);
        let query = code.clone().unwrap_or_else(|| flat.to_string());
        self.note(ctx, AuditLevel::Warn, "Fast scan inconclusive; searching knowledge base");

        let article = match self.gateway.search_kb(&query).await {
            Ok(article) => article,
            Err(e) => {
                self.note(ctx, AuditLevel::Warn, format!("Knowledge base search failed: {e}"));
                None
            }
        };
        if let Some(article) = article {
            self.note(ctx, AuditLevel::Info, format!("Knowledge base result: {article}"));
            return format!("UNKNOWN (KB Hint: {article})");
        }
        if !profile.requires_google_lookup {
            return "UNKNOWN (KB Hint: no relevant articles)".to_string();
        }

        self.note(ctx, AuditLevel::Warn, "Knowledge base empty; escalating to web search");
        let web_query = match &code {
            Some(code) => format!("{code} | {flat}"),
            None => flat.to_string(),
        };
        match self.gateway.search_web(&web_query).await {
            Ok(Some(snippet)) => {
                self.note(ctx, AuditLevel::Info, format!("Web result: {snippet}"));
                format!("UNKNOWN (Web Hint: {snippet})")
            }
            Ok(None) => "UNKNOWN (Web Hint: no results)".to_string(),
            Err(e) => {
                self.note(ctx, AuditLevel::Warn, format!("Web search failed: {e}"));
                "UNKNOWN".to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{GenerationError, ToolError};
    use crate::gateway::{MockToolGateway, TableSample};
    use crate::generation::TextGenerator;
    use crate::profile::MissionProfile;
    use crate::types::Alert;
    use async_trait::async_trait;
    use serde_json::json;

    struct Echo(&'static str);

    #[async_trait]
    impl TextGenerator for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        async fn generate(&self, _prompt: &str) -> Result<String, GenerationError> {
            Ok(self.0.to_string())
        }
    }

    fn investigator(gateway: MockToolGateway, reply: &'static str) -> Investigator {
        Investigator::new(
            Arc::new(gateway),
            GenerationChain::new(vec![Arc::new(Echo(reply))]),
            Arc::new(AuditTrail::new()),
        )
    }

    fn log(content: &str) -> LogEntry {
        LogEntry::new("Airflow", "ERROR", content)
    }

    #[test]
    fn markdown_table_shape() {
        let table = markdown_table(&["a".into(), "b".into()], &[vec!["1".into(), "2".into()]]).unwrap();
        assert_eq!(table, "| a | b |\n| --- | --- |\n| 1 | 2 |");
        assert!(markdown_table(&[], &[]).is_none());
    }

    #[tokio::test]
    async fn vendor_evidence_skips_database() {
        let mut gateway = MockToolGateway::new();
        gateway
            .expect_fetch_logs()
            .returning(|_, _| Ok(vec![LogEntry::new("Vendor", "ERROR", "HTTP 503 from upstream")]));
        gateway.expect_inspect_schema().never();
        gateway.expect_get_sample().never();

        let ctx = IncidentContext::new(Alert::new("A-1", "Airflow", "HTTP_503", "Upstream API timeout"));
        let result = investigator(gateway, "unused").investigate(&ctx).await;

        assert_eq!(result.hypothesis.as_deref(), Some(VENDOR_HYPOTHESIS));
        assert_eq!(result.logs.len(), 1);
    }

    #[tokio::test]
    async fn schema_evidence_reaches_generator() {
        let mut gateway = MockToolGateway::new();
        gateway
            .expect_fetch_logs()
            .withf(|filter, limit| filter.as_deref() == Some("Airflow") && *limit == 10)
            .returning(|_, _| Ok(vec![log("Column 'd' missing in SALES_DATA")]));
        gateway
            .expect_inspect_schema()
            .returning(|_| Ok(vec!["a".into(), "b".into(), "c".into()]));
        gateway.expect_get_sample().returning(|table, _| {
            Ok(TableSample {
                table: table.to_string(),
                columns: vec!["a".into()],
                rows: vec![vec![json!(101)]],
            })
        });
        gateway
            .expect_get_incoming_header()
            .returning(|_| Ok(vec!["a".into(), "b".into(), "c".into(), "d".into()]));

        let ctx = IncidentContext::new(Alert::new("A-1", "Airflow", "ERR_SCHEMA_001", "Load failed"));
        let result = investigator(gateway, " Root Cause: column d missing ")
            .investigate(&ctx)
            .await;

        assert_eq!(result.hint, "SCHEMA_ERROR: COLUMN_MISSING");
        assert_eq!(result.hypothesis.as_deref(), Some("Root Cause: column d missing"));
        let snapshot = result.snapshot.unwrap();
        assert_eq!(snapshot.table_name, "SALES_DATA");
        assert_eq!(snapshot.rows.len(), 1);
    }

    #[tokio::test]
    async fn sentinel_answer_means_no_hypothesis() {
        let mut gateway = MockToolGateway::new();
        gateway.expect_fetch_logs().returning(|_, _| Ok(vec![log("job failed")]));
        gateway.expect_inspect_schema().returning(|_| {
            Err(ToolError::Transport {
                tool: "inspect_snowflake_schema".into(),
                message: "refused".into(),
            })
        });
        gateway.expect_get_sample().returning(|_, _| Ok(TableSample::default()));
        gateway.expect_get_incoming_header().returning(|_| Ok(Vec::new()));

        let ctx = IncidentContext::new(Alert::new("A-1", "Airflow", "ERR_X", "Load failed"));
        let result = investigator(gateway, "LLM_ERROR: Quota Exceeded (429)")
            .investigate(&ctx)
            .await;
        assert!(result.hypothesis.is_none());
    }

    #[tokio::test]
    async fn kb_miss_escalates_to_web() {
        let mut gateway = MockToolGateway::new();
        gateway
            .expect_fetch_logs()
            .withf(|filter, _| filter.is_none())
            .returning(|_, _| Ok(vec![log("ERROR_SNOWFLAKE_8001 in model")]));
        gateway
            .expect_search_kb()
            .withf(|q| q == "ERROR_SNOWFLAKE_8001")
            .returning(|_| Ok(None));
        gateway
            .expect_search_web()
            .returning(|_| Ok(Some("Create helper function DERIVE_SPEND".into())));
        gateway.expect_inspect_schema().returning(|_| Ok(vec!["spend".into()]));
        gateway.expect_get_sample().returning(|_, _| Ok(TableSample::default()));
        gateway.expect_get_incoming_header().returning(|_| Ok(vec!["spend".into()]));

        let mut profile = MissionProfile::default();
        profile.requires_kb_lookup = true;
        profile.requires_google_lookup = true;
        let ctx = IncidentContext::new(
            Alert::new("A-1", "dbt", "ERR_UDF", "Model failed").with_profile(profile),
        );
        let result = investigator(gateway, "Root Cause: missing UDF").investigate(&ctx).await;

        assert_eq!(result.hint, "UNKNOWN (Web Hint: Create helper function DERIVE_SPEND)");
        assert!(result.hypothesis.is_some());
    }
}
