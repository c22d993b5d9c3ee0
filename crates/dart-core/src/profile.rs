//! Mission profile and Commander configuration
//!
//! [`MissionProfile`] is the typed form of an alert's metadata. Every flag
//! has an explicit default so an alert with no metadata runs the plain
//! schema-drift mission against `SALES_DATA`.
//!
//! [`CommanderConfig`] holds the engine-wide knobs. It loads from TOML and
//! accepts a few environment overrides for endpoint wiring.

use crate::error::ConfigError;
use crate::types::Alert;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default target table
pub const DEFAULT_TABLE: &str = "SALES_DATA";

/// Default log service filter
pub const DEFAULT_LOG_SERVICE: &str = "Airflow";

/// Environment override for the vendor base URL
pub const ENV_VENDOR_URL: &str = "DART_VENDOR_URL";

/// Environment override for the tool gateway base URL
pub const ENV_GATEWAY_URL: &str = "DART_GATEWAY_URL";

/// Environment override for the memory snapshot path
pub const ENV_MEMORY_PATH: &str = "DART_MEMORY_PATH";

/// Per-mission flags carried on the alert
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MissionProfile {
    /// Free-form mission name
    pub mission_name: String,
    /// Expected fix family (e.g. `stage_cleanup`)
    pub expected_fix: String,
    /// Target table
    pub table_name: String,
    /// Columns known to be missing before investigation
    pub missing_columns: Vec<String>,
    /// Never route this mission to vendor handling
    pub force_db_checks: bool,
    /// Skip the header/schema alignment check
    pub disable_drift: bool,
    /// Investigation must consult the knowledge base
    pub requires_kb_lookup: bool,
    /// Investigation may escalate to web search
    pub requires_google_lookup: bool,
    /// Vendor disaster recovery allowed on the final attempt
    pub enable_vendor_dr: bool,
    /// Vendor cursor must be reset before retrying
    pub requires_vendor_reset: bool,
    /// Scenario identifier
    pub scenario_id: String,
    /// Log service filter for investigation
    pub log_service_filter: Option<String>,
    /// Source file for code-fix missions
    pub file_path: Option<String>,
    /// Upstream HTTP endpoint involved in the failure
    pub endpoint: Option<String>,
    /// Re-diff header and schema after execution
    pub verify_after_fix: bool,
}

impl Default for MissionProfile {
    fn default() -> Self {
        Self {
            mission_name: String::new(),
            expected_fix: String::new(),
            table_name: DEFAULT_TABLE.to_string(),
            missing_columns: Vec::new(),
            force_db_checks: false,
            disable_drift: false,
            requires_kb_lookup: false,
            requires_google_lookup: false,
            enable_vendor_dr: false,
            requires_vendor_reset: false,
            scenario_id: String::new(),
            log_service_filter: None,
            file_path: None,
            endpoint: None,
            verify_after_fix: false,
        }
    }
}

impl MissionProfile {
    /// Create default profile
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With table name
    #[inline]
    #[must_use]
    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table_name = table.into();
        self
    }

    /// With scenario id
    #[inline]
    #[must_use]
    pub fn with_scenario(mut self, scenario_id: impl Into<String>) -> Self {
        self.scenario_id = scenario_id.into();
        self
    }

    /// With vendor disaster recovery enabled
    #[inline]
    #[must_use]
    pub fn with_vendor_dr(mut self, enabled: bool) -> Self {
        self.enable_vendor_dr = enabled;
        self
    }

    /// With forced DB-only handling
    #[inline]
    #[must_use]
    pub fn with_force_db_checks(mut self, force: bool) -> Self {
        self.force_db_checks = force;
        self
    }

    /// Check stage-cleanup flags
    #[must_use]
    pub fn is_stage_cleanup(&self) -> bool {
        self.expected_fix == "stage_cleanup" || self.mission_name.to_lowercase().contains("agent loop")
    }

    /// Check if vendor DR may run; missions that need a cursor reset
    /// imply it
    #[inline]
    #[must_use]
    pub fn dr_enabled(&self) -> bool {
        self.enable_vendor_dr || self.requires_vendor_reset
    }

    /// Post-fix verification is required
    #[must_use]
    pub fn requires_verification(&self) -> bool {
        self.verify_after_fix
            || self.scenario_id.contains("07_observability")
            || self.scenario_id.contains("observability_guard")
    }

    /// Service filter for log collection; KB-lookup missions read all services
    #[must_use]
    pub fn service_filter(&self) -> Option<String> {
        if self.requires_kb_lookup {
            return None;
        }
        Some(
            self.log_service_filter
                .clone()
                .unwrap_or_else(|| DEFAULT_LOG_SERVICE.to_string()),
        )
    }

    /// Any lookup beyond the local evidence is allowed
    #[inline]
    #[must_use]
    pub fn lookup_allowed(&self) -> bool {
        self.requires_kb_lookup || self.requires_google_lookup
    }
}

/// Vendor probe settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VendorConfig {
    /// Vendor base URL
    pub base_url: String,
    /// Per-call timeout
    pub timeout_secs: u64,
    /// Total calls per probe
    pub max_attempts: u32,
    /// First backoff delay
    pub base_delay_ms: u64,
    /// Backoff multiplier
    pub factor: u32,
}

impl Default for VendorConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8001".to_string(),
            timeout_secs: 5,
            max_attempts: 3,
            base_delay_ms: 1000,
            factor: 2,
        }
    }
}

/// Tool gateway settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Gateway base URL
    pub base_url: String,
    /// Per-call timeout
    pub timeout_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            timeout_secs: 30,
        }
    }
}

/// Text generation settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Ranked backend URLs, tried in order
    pub endpoints: Vec<String>,
    /// Per-call timeout
    pub timeout_secs: Option<u64>,
}

/// Commander configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommanderConfig {
    /// Attempt budget per mission
    pub max_attempts: u32,
    /// Human authorization timeout
    pub hitl_timeout_secs: u64,
    /// Estimated spend per mission second
    pub cost_per_second: f64,
    /// Repository for code fixes
    pub repo_name: String,
    /// Source file used when the profile names none
    pub default_code_path: String,
    /// Project for audit tickets
    pub audit_project: String,
    /// Project for change tickets
    pub change_project: String,
    /// Memory snapshot location
    pub memory_path: Option<PathBuf>,
    /// Vendor probe
    pub vendor: VendorConfig,
    /// Tool gateway
    pub gateway: GatewayConfig,
    /// Text generation
    pub generation: GenerationConfig,
}

impl Default for CommanderConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            hitl_timeout_secs: 600,
            cost_per_second: 0.002,
            repo_name: "analytics-pipeline".to_string(),
            default_code_path: "models/kpi/roi_calc.sql".to_string(),
            audit_project: "OPS".to_string(),
            change_project: "DATA".to_string(),
            memory_path: None,
            vendor: VendorConfig::default(),
            gateway: GatewayConfig::default(),
            generation: GenerationConfig::default(),
        }
    }
}

impl CommanderConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With attempt budget
    #[inline]
    #[must_use]
    pub fn with_max_attempts(mut self, max: u32) -> Self {
        self.max_attempts = max;
        self
    }

    /// With human authorization timeout
    #[inline]
    #[must_use]
    pub fn with_hitl_timeout_secs(mut self, secs: u64) -> Self {
        self.hitl_timeout_secs = secs;
        self
    }

    /// With vendor settings
    #[inline]
    #[must_use]
    pub fn with_vendor(mut self, vendor: VendorConfig) -> Self {
        self.vendor = vendor;
        self
    }

    /// With memory snapshot path
    #[inline]
    #[must_use]
    pub fn with_memory_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.memory_path = Some(path.into());
        self
    }

    /// Parse TOML
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&text)
    }

    /// Render as TOML
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Invalid {
            key: "config",
            message: e.to_string(),
        })
    }

    /// Apply `DART_*` environment overrides
    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from any key lookup
    #[must_use]
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(url) = lookup(ENV_VENDOR_URL) {
            self.vendor.base_url = url;
        }
        if let Some(url) = lookup(ENV_GATEWAY_URL) {
            self.gateway.base_url = url;
        }
        if let Some(path) = lookup(ENV_MEMORY_PATH) {
            self.memory_path = Some(PathBuf::from(path));
        }
        self
    }

    /// Check ranges
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid {
                key: "max_attempts",
                message: "must be at least 1".to_string(),
            });
        }
        if self.vendor.max_attempts == 0 {
            return Err(ConfigError::Invalid {
                key: "vendor.max_attempts",
                message: "must be at least 1".to_string(),
            });
        }
        if !self.cost_per_second.is_finite() || self.cost_per_second < 0.0 {
            return Err(ConfigError::Invalid {
                key: "cost_per_second",
                message: format!("{} is not a valid rate", self.cost_per_second),
            });
        }
        Ok(())
    }
}

/// An alert file holds either a bare alert or a scenario wrapping one
#[derive(Deserialize)]
#[serde(untagged)]
enum AlertDocument {
    Scenario { trigger_alert: Alert },
    Bare(Alert),
}

impl From<AlertDocument> for Alert {
    fn from(doc: AlertDocument) -> Self {
        match doc {
            AlertDocument::Scenario { trigger_alert } => trigger_alert,
            AlertDocument::Bare(alert) => alert,
        }
    }
}

/// Parse an alert document; `.json` files as JSON, anything else as YAML
pub fn parse_alert(text: &str, json: bool) -> Result<Alert, ConfigError> {
    let doc: AlertDocument = if json {
        serde_json::from_str(text)?
    } else {
        serde_yaml::from_str(text)?
    };
    Ok(doc.into())
}

/// Load an alert from a YAML or JSON file
pub fn load_alert(path: impl AsRef<Path>) -> Result<Alert, ConfigError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    let json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    parse_alert(&text, json)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alert_from_scenario_yaml() {
        let alert = parse_alert(
            r"
scenario_id: 01_schema_drift
trigger_alert:
  id: ALERT-001
  source_system: Airflow
  error_code: ERR_SCHEMA_001
  message: Load failed
  severity: HIGH
  metadata:
    table_name: SALES_DATA
    enable_vendor_dr: true
",
            false,
        )
        .unwrap();
        assert_eq!(alert.error_code, "ERR_SCHEMA_001");
        assert_eq!(alert.severity, crate::types::Severity::High);
        assert!(alert.metadata.enable_vendor_dr);
    }

    #[test]
    fn bare_json_alert_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alert.json");
        std::fs::write(
            &path,
            r#"{"id":"A-2","source":"dbt","error_code":"ERR_KPI","message":"ROI failed"}"#,
        )
        .unwrap();
        let alert = load_alert(&path).unwrap();
        assert_eq!(alert.source, "dbt");
        assert!(!alert.is_stage_cleanup());
    }

    #[test]
    fn profile_defaults() {
        let profile = MissionProfile::default();
        assert_eq!(profile.table_name, "SALES_DATA");
        assert_eq!(profile.service_filter().as_deref(), Some("Airflow"));
        assert!(!profile.dr_enabled());
        assert!(!profile.requires_verification());
    }

    #[test]
    fn stage_cleanup_detection() {
        let mut profile = MissionProfile::default();
        profile.mission_name = "The Agent Loop".into();
        assert!(profile.is_stage_cleanup());

        let mut profile = MissionProfile::default();
        profile.expected_fix = "stage_cleanup".into();
        assert!(profile.is_stage_cleanup());
    }

    #[test]
    fn kb_missions_read_all_services() {
        let mut profile = MissionProfile::default();
        profile.requires_kb_lookup = true;
        profile.log_service_filter = Some("dbt".into());
        assert!(profile.service_filter().is_none());
    }

    #[test]
    fn observability_scenarios_verify() {
        let profile = MissionProfile::default().with_scenario("07_observability_guard");
        assert!(profile.requires_verification());
    }

    #[test]
    fn config_parses_partial_toml() {
        let config = CommanderConfig::from_toml(
            r#"
            max_attempts = 5

            [vendor]
            base_url = "http://vendor:9000"
            "#,
        )
        .unwrap();
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.vendor.base_url, "http://vendor:9000");
        assert_eq!(config.vendor.max_attempts, 3);
        assert_eq!(config.hitl_timeout_secs, 600);
    }

    #[test]
    fn config_rejects_zero_attempts() {
        let err = CommanderConfig::from_toml("max_attempts = 0").unwrap_err();
        assert!(err.to_string().contains("max_attempts"));
    }

    #[test]
    fn overrides_replace_endpoints() {
        let config = CommanderConfig::default().with_overrides(|key| match key {
            ENV_GATEWAY_URL => Some("http://gw:1".to_string()),
            ENV_MEMORY_PATH => Some("/tmp/mem.json".to_string()),
            _ => None,
        });
        assert_eq!(config.gateway.base_url, "http://gw:1");
        assert_eq!(config.memory_path, Some(PathBuf::from("/tmp/mem.json")));
        assert_eq!(config.vendor.base_url, "http://localhost:8001");
    }

    #[test]
    fn config_round_trips_through_toml() {
        let config = CommanderConfig::default().with_max_attempts(4);
        let text = config.to_toml().unwrap();
        assert_eq!(CommanderConfig::from_toml(&text).unwrap(), config);
    }

    #[test]
    fn config_load_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = CommanderConfig::load(dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
