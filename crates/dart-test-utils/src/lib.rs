//! Testing utilities for the DART workspace
//!
//! Deterministic stand-ins for every collaborator the Commander talks to,
//! plus fixture alerts and a harness that wires them together.

#![allow(missing_docs)]

use async_trait::async_trait;
use dart_core::approval::HumanGate;
use dart_core::audit::AuditTrail;
use dart_core::commander::{Commander, Services};
use dart_core::error::{GenerationError, ToolError, VendorError};
use dart_core::gateway::{DeployReply, PullRequest, ResetAck, TableSample, Ticket, ToolAck, ToolGateway};
use dart_core::generation::{GenerationChain, TextGenerator};
use dart_core::liaison::{BackoffPolicy, ProbeRequest, ProbeResponse, VendorEndpoint};
use dart_core::memory::InMemoryIncidentMemory;
use dart_core::profile::{CommanderConfig, MissionProfile};
use dart_core::types::{Alert, ApprovalOutcome, LogEntry, Severity, VendorStatus};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

static ADD_COLUMN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)ALTER\s+TABLE\s+(\w+)\s+ADD\s+COLUMN\s+(?:IF\s+NOT\s+EXISTS\s+)?(\w+)").unwrap()
});

/// Reply the world gives while the stage table is locked
pub const LOCKED_MESSAGE: &str = "Stage table locked by vendor sync";

#[derive(Debug, Default)]
struct WorldState {
    logs: Vec<LogEntry>,
    header: Vec<String>,
    tables: HashMap<String, Vec<String>>,
    rows: HashMap<String, Vec<Vec<Value>>>,
    kb: HashMap<String, String>,
    web: Option<String>,
    files: HashMap<String, String>,
    locked_until_reset: bool,
    cursor_reset: bool,
    ignore_ddl: bool,
    deployed: Vec<String>,
    tickets: Vec<(String, String, String)>,
    branches: Vec<String>,
    pull_requests: Vec<PullRequest>,
    resets: Vec<String>,
    calls: HashMap<&'static str, usize>,
}

/// In-memory warehouse, log store, repo and tracker
#[derive(Debug, Default)]
pub struct InMemoryWorld {
    state: Mutex<WorldState>,
}

/// Builder for [`InMemoryWorld`]
#[derive(Debug, Default)]
pub struct WorldBuilder {
    state: WorldState,
}

impl WorldBuilder {
    pub fn log(mut self, service: &str, level: &str, content: &str) -> Self {
        self.state.logs.push(LogEntry::new(service, level, content));
        self
    }

    pub fn header(mut self, columns: &[&str]) -> Self {
        self.state.header = columns.iter().map(|c| (*c).to_string()).collect();
        self
    }

    pub fn table(mut self, name: &str, columns: &[&str]) -> Self {
        self.state
            .tables
            .insert(name.to_string(), columns.iter().map(|c| (*c).to_string()).collect());
        self
    }

    pub fn rows(mut self, table: &str, rows: Vec<Vec<Value>>) -> Self {
        self.state.rows.insert(table.to_string(), rows);
        self
    }

    pub fn kb_article(mut self, key: &str, article: &str) -> Self {
        self.state.kb.insert(key.to_string(), article.to_string());
        self
    }

    pub fn web_result(mut self, snippet: &str) -> Self {
        self.state.web = Some(snippet.to_string());
        self
    }

    pub fn file(mut self, path: &str, content: &str) -> Self {
        self.state.files.insert(path.to_string(), content.to_string());
        self
    }

    /// Deploys fail until the vendor cursor is reset
    pub fn locked_until_reset(mut self) -> Self {
        self.state.locked_until_reset = true;
        self
    }

    /// Deploys report success without changing any schema
    pub fn force_observability_failure(mut self) -> Self {
        self.state.ignore_ddl = true;
        self
    }

    pub fn build(self) -> InMemoryWorld {
        InMemoryWorld {
            state: Mutex::new(self.state),
        }
    }
}

impl InMemoryWorld {
    pub fn builder() -> WorldBuilder {
        WorldBuilder::default()
    }

    /// `SALES_DATA` is `[a, b, c]`, the incoming file carries `d` too
    pub fn schema_drift() -> Self {
        Self::builder()
            .log("Airflow", "ERROR", "Load job failed: Column 'd' missing in SALES_DATA")
            .header(&["a", "b", "c", "d"])
            .table("SALES_DATA", &["a", "b", "c"])
            .rows("SALES_DATA", vec![vec![Value::from(1), Value::from("x"), Value::from(2.5)]])
            .build()
    }

    fn bump(&self, tool: &'static str) {
        *self.state.lock().calls.entry(tool).or_default() += 1;
    }

    pub fn calls(&self, tool: &str) -> usize {
        self.state.lock().calls.get(tool).copied().unwrap_or_default()
    }

    pub fn columns(&self, table: &str) -> Vec<String> {
        self.state.lock().tables.get(table).cloned().unwrap_or_default()
    }

    pub fn deployed(&self) -> Vec<String> {
        self.state.lock().deployed.clone()
    }

    pub fn tickets(&self) -> Vec<(String, String, String)> {
        self.state.lock().tickets.clone()
    }

    pub fn pull_requests(&self) -> Vec<PullRequest> {
        self.state.lock().pull_requests.clone()
    }

    pub fn resets(&self) -> Vec<String> {
        self.state.lock().resets.clone()
    }

    fn apply(state: &mut WorldState, statement: &str) -> Result<(), String> {
        let upper = statement.to_uppercase();
        if upper.contains("DROP ") {
            return Err("DROP statements are not permitted".to_string());
        }
        if let Some(caps) = ADD_COLUMN.captures(statement) {
            if state.ignore_ddl {
                return Ok(());
            }
            let table = caps[1].to_string();
            let column = caps[2].to_lowercase();
            let Some(columns) = state.tables.get_mut(&table) else {
                return Err(format!("Table {table} does not exist"));
            };
            if !columns.iter().any(|c| c.eq_ignore_ascii_case(&column)) {
                columns.push(column);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ToolGateway for InMemoryWorld {
    async fn fetch_logs(&self, service_filter: Option<String>, limit: usize) -> Result<Vec<LogEntry>, ToolError> {
        self.bump("fetch_logs");
        let state = self.state.lock();
        Ok(state
            .logs
            .iter()
            .filter(|l| service_filter.as_deref().map_or(true, |s| l.service == s))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn inspect_schema(&self, table: &str) -> Result<Vec<String>, ToolError> {
        self.bump("inspect_schema");
        self.state
            .lock()
            .tables
            .get(table)
            .cloned()
            .ok_or_else(|| ToolError::Rejected {
                tool: "inspect_snowflake_schema".into(),
                message: format!("Table {table} does not exist"),
            })
    }

    async fn get_sample(&self, table: &str, limit: usize) -> Result<TableSample, ToolError> {
        self.bump("get_sample");
        let state = self.state.lock();
        let columns = state.tables.get(table).cloned().unwrap_or_default();
        let rows = state
            .rows
            .get(table)
            .map(|rows| rows.iter().take(limit).cloned().collect())
            .unwrap_or_default();
        Ok(TableSample {
            table: table.to_string(),
            columns,
            rows,
        })
    }

    async fn get_incoming_header(&self, _pattern: &str) -> Result<Vec<String>, ToolError> {
        self.bump("get_incoming_header");
        Ok(self.state.lock().header.clone())
    }

    async fn search_kb(&self, query: &str) -> Result<Option<String>, ToolError> {
        self.bump("search_kb");
        let state = self.state.lock();
        Ok(state
            .kb
            .iter()
            .find(|(key, _)| query.contains(key.as_str()))
            .map(|(_, article)| article.clone()))
    }

    async fn search_web(&self, _query: &str) -> Result<Option<String>, ToolError> {
        self.bump("search_web");
        Ok(self.state.lock().web.clone())
    }

    async fn deploy_sql(&self, statement: &str) -> Result<DeployReply, ToolError> {
        self.bump("deploy_sql");
        let mut state = self.state.lock();
        state.deployed.push(statement.to_string());
        if state.locked_until_reset && !state.cursor_reset {
            return Ok(DeployReply::failed(LOCKED_MESSAGE));
        }
        for part in statement.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            if let Err(e) = Self::apply(&mut state, part) {
                return Ok(DeployReply::failed(e));
            }
        }
        Ok(DeployReply::success("Patch applied"))
    }

    async fn get_file(&self, repo: &str, path: &str) -> Result<String, ToolError> {
        self.bump("get_file");
        self.state
            .lock()
            .files
            .get(path)
            .cloned()
            .ok_or_else(|| ToolError::Rejected {
                tool: "read_github_file".into(),
                message: format!("{path} not found in {repo}"),
            })
    }

    async fn create_branch(&self, repo: &str, _base: &str, branch: &str) -> Result<ToolAck, ToolError> {
        self.bump("create_branch");
        self.state.lock().branches.push(branch.to_string());
        Ok(ToolAck {
            status: "SUCCESS".into(),
            link: Some(format!("https://git.example/{repo}/tree/{branch}")),
        })
    }

    async fn open_pr(&self, pr: &PullRequest) -> Result<ToolAck, ToolError> {
        self.bump("open_pr");
        let mut state = self.state.lock();
        state.pull_requests.push(pr.clone());
        let number = state.pull_requests.len();
        Ok(ToolAck {
            status: "OPEN".into(),
            link: Some(format!("https://git.example/{}/pull/{number}", pr.repo_name)),
        })
    }

    async fn create_ticket(&self, project: &str, summary: &str, priority: &str) -> Result<Ticket, ToolError> {
        self.bump("create_ticket");
        let mut state = self.state.lock();
        state
            .tickets
            .push((project.to_string(), summary.to_string(), priority.to_string()));
        let key = format!("{project}-{}", 100 + state.tickets.len());
        Ok(Ticket {
            link: format!("https://tracker.example/browse/{key}"),
            ticket_id: key,
        })
    }

    async fn reset_vendor_cursor(&self, reason: &str) -> Result<ResetAck, ToolError> {
        self.bump("reset_vendor_cursor");
        let mut state = self.state.lock();
        state.resets.push(reason.to_string());
        let status = if state.cursor_reset { "ALREADY_RESET" } else { "RESET" };
        state.cursor_reset = true;
        Ok(ResetAck {
            status: status.into(),
            message: format!("Vendor cursor reset ({reason})."),
        })
    }
}

pub fn vendor_reply(status: VendorStatus, message: &str) -> ProbeResponse {
    ProbeResponse {
        status,
        message: message.to_string(),
        internal_truth_is_healthy: status == VendorStatus::Healthy,
    }
}

/// Vendor endpoint that replays a script, then repeats a default
#[derive(Debug)]
pub struct ScriptedVendor {
    script: Mutex<VecDeque<Result<ProbeResponse, VendorError>>>,
    default: Result<ProbeResponse, VendorError>,
    calls: AtomicUsize,
}

impl ScriptedVendor {
    pub fn new(default: Result<ProbeResponse, VendorError>) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            default,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn healthy() -> Self {
        Self::new(Ok(vendor_reply(VendorStatus::Healthy, "Systems nominal.")))
    }

    pub fn outage() -> Self {
        Self::new(Ok(vendor_reply(VendorStatus::Outage, "Upstream API unavailable.")))
    }

    /// Reports healthy while its own truth flag says otherwise
    pub fn deceptive() -> Self {
        Self::new(Ok(ProbeResponse {
            status: VendorStatus::Healthy,
            message: "All systems operational.".into(),
            internal_truth_is_healthy: false,
        }))
    }

    pub fn failing(error: VendorError) -> Self {
        Self::new(Err(error))
    }

    /// Queue one scripted reply
    pub fn then(self, reply: Result<ProbeResponse, VendorError>) -> Self {
        self.script.lock().push_back(reply);
        self
    }

    /// Queue the same reply `n` times
    pub fn then_n(self, reply: Result<ProbeResponse, VendorError>, n: usize) -> Self {
        {
            let mut script = self.script.lock();
            for _ in 0..n {
                script.push_back(reply.clone());
            }
        }
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VendorEndpoint for ScriptedVendor {
    async fn status_check(&self, _request: &ProbeRequest) -> Result<ProbeResponse, VendorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().pop_front();
        next.unwrap_or_else(|| self.default.clone())
    }
}

/// Generator answering by prompt content
#[derive(Debug)]
pub struct ScriptedGenerator {
    rules: Vec<(String, String)>,
    default: String,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedGenerator {
    pub fn new(default: &str) -> Self {
        Self {
            rules: Vec::new(),
            default: default.to_string(),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Answer `reply` to prompts containing `needle`
    pub fn on(mut self, needle: &str, reply: &str) -> Self {
        self.rules.push((needle.to_string(), reply.to_string()));
        self
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().len()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        self.prompts.lock().push(prompt.to_string());
        let reply = self
            .rules
            .iter()
            .find(|(needle, _)| prompt.contains(needle.as_str()))
            .map_or(self.default.as_str(), |(_, reply)| reply.as_str());
        Ok(reply.to_string())
    }
}

/// Human gate with a fixed answer
#[derive(Debug)]
pub struct ScriptedGate {
    outcome: ApprovalOutcome,
    requests: Mutex<Vec<(String, String)>>,
}

impl ScriptedGate {
    pub fn new(outcome: ApprovalOutcome) -> Self {
        Self {
            outcome,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn approving() -> Self {
        Self::new(ApprovalOutcome::Approved)
    }

    pub fn denying() -> Self {
        Self::new(ApprovalOutcome::Denied)
    }

    pub fn prompts(&self) -> usize {
        self.requests.lock().len()
    }

    /// `(plan, reason)` of every prompt
    pub fn requests(&self) -> Vec<(String, String)> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl HumanGate for ScriptedGate {
    async fn authorize(&self, _incident_id: &str, plan: &str, reason: &str) -> ApprovalOutcome {
        self.requests.lock().push((plan.to_string(), reason.to_string()));
        self.outcome
    }
}

pub const DRIFT_HYPOTHESIS: &str = "Root Cause: schema drift, incoming file carries column d missing from SALES_DATA.";

pub fn schema_drift_alert() -> Alert {
    Alert::new("ALERT-001", "Airflow", "ERR_SCHEMA_001", "Load failed for SALES_DATA")
        .with_severity(Severity::High)
}

pub fn vendor_outage_alert(dr_enabled: bool) -> Alert {
    Alert::new("ALERT-503", "Airflow", "HTTP_503", "Upstream vendor feed unavailable")
        .with_severity(Severity::Critical)
        .with_profile(MissionProfile::default().with_vendor_dr(dr_enabled))
}

pub fn kpi_alert() -> Alert {
    let mut profile = MissionProfile::default();
    profile.file_path = Some("models/kpi/roi_calc.sql".into());
    Alert::new("ALERT-KPI", "dbt", "ERR_KPI_DIV", "ROI model failed").with_profile(profile)
}

pub fn deadlock_alert() -> Alert {
    let mut profile = MissionProfile::default().with_table("STAGE_SALES");
    profile.requires_vendor_reset = true;
    Alert::new("ALERT-712", "Airflow", "ERROR_DEADLOCK_712", "Stage load deadlocked").with_profile(profile)
}

/// Collaborators for one test, kept around for inspection
#[derive(Debug, Clone)]
pub struct Harness {
    pub world: Arc<InMemoryWorld>,
    pub vendor: Arc<ScriptedVendor>,
    pub generator: Arc<ScriptedGenerator>,
    pub gate: Arc<ScriptedGate>,
    pub memory: Arc<InMemoryIncidentMemory>,
    pub config: CommanderConfig,
}

impl Harness {
    /// Healthy vendor, approving human, drift hypothesis
    pub fn new(world: InMemoryWorld) -> Self {
        Self {
            world: Arc::new(world),
            vendor: Arc::new(ScriptedVendor::healthy()),
            generator: Arc::new(ScriptedGenerator::new(DRIFT_HYPOTHESIS)),
            gate: Arc::new(ScriptedGate::approving()),
            memory: Arc::new(InMemoryIncidentMemory::new()),
            config: CommanderConfig::default(),
        }
    }

    pub fn with_vendor(mut self, vendor: ScriptedVendor) -> Self {
        self.vendor = Arc::new(vendor);
        self
    }

    pub fn with_generator(mut self, generator: ScriptedGenerator) -> Self {
        self.generator = Arc::new(generator);
        self
    }

    pub fn with_gate(mut self, gate: ScriptedGate) -> Self {
        self.gate = Arc::new(gate);
        self
    }

    pub fn with_memory(mut self, memory: Arc<InMemoryIncidentMemory>) -> Self {
        self.memory = memory;
        self
    }

    pub fn with_config(mut self, config: CommanderConfig) -> Self {
        self.config = config;
        self
    }

    pub fn services(&self) -> Services {
        Services {
            gateway: self.world.clone(),
            vendor: self.vendor.clone(),
            generators: GenerationChain::new(vec![self.generator.clone() as Arc<dyn TextGenerator>]),
            memory: self.memory.clone(),
            gate: self.gate.clone(),
        }
    }

    /// Commander with no backoff sleeps
    pub fn commander(&self) -> Commander {
        fast_commander(self.config.clone(), self.services())
    }
}

pub fn fast_commander(config: CommanderConfig, services: Services) -> Commander {
    let policy = BackoffPolicy::immediate(config.vendor.max_attempts.max(1));
    Commander::with_parts(config, services, policy, Arc::new(AuditTrail::new()))
}
