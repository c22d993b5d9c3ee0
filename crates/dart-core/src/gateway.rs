//! Tool gateway seam
//!
//! Every side effect the agents have on the outside world (logs, warehouse,
//! repository, ticket tracker, vendor cursor) goes through [`ToolGateway`].
//! Calls return `Result<_, ToolError>`; callers degrade errors into missing
//! evidence or a failed step and never propagate them to the Commander.

use crate::error::ToolError;
use crate::types::LogEntry;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

/// Reply text the knowledge base uses for "nothing found"
const KB_NO_RESULTS: &str = "No relevant articles found.";

/// Priority of every ticket the Commander files
pub const TICKET_PRIORITY: &str = "Medium";

/// Sample rows from a warehouse table
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableSample {
    /// Table name
    #[serde(default)]
    pub table: String,
    /// Column names
    pub columns: Vec<String>,
    /// Rows
    pub rows: Vec<Vec<Value>>,
}

/// What a deploy returned
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DeployReply {
    /// Structured `{status, error?, message?}` reply
    Structured {
        /// Status word
        status: String,
        /// Failure detail
        #[serde(default)]
        error: Option<String>,
        /// Informational message
        #[serde(default)]
        message: Option<String>,
    },
    /// Free-text reply
    Text(String),
}

impl DeployReply {
    /// Structured success
    #[must_use]
    pub fn success(message: impl Into<String>) -> Self {
        Self::Structured {
            status: "SUCCESS".to_string(),
            error: None,
            message: Some(message.into()),
        }
    }

    /// Structured failure
    #[must_use]
    pub fn failed(error: impl Into<String>) -> Self {
        Self::Structured {
            status: "FAILED".to_string(),
            error: Some(error.into()),
            message: None,
        }
    }

    /// Only an unambiguous success counts; anything else is a failed deploy
    #[must_use]
    pub fn succeeded(&self) -> bool {
        match self {
            Self::Structured { status, error, .. } => {
                error.is_none() && matches!(status.to_uppercase().as_str(), "SUCCESS" | "OK")
            }
            Self::Text(text) => {
                let upper = text.to_uppercase();
                !text.trim_start().starts_with("Error") && !upper.contains("FAILED") && upper.contains("SUCCESS")
            }
        }
    }

    /// Failure detail for logs
    #[must_use]
    pub fn detail(&self) -> String {
        match self {
            Self::Structured {
                status, error, message, ..
            } => error
                .clone()
                .or_else(|| message.clone())
                .unwrap_or_else(|| status.clone()),
            Self::Text(text) => text.clone(),
        }
    }
}

/// Pull request to open
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    /// Repository
    pub repo_name: String,
    /// Title
    pub title: String,
    /// Body
    pub description: String,
    /// Source branch
    pub branch_name: String,
}

/// Acknowledgement from a repository call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolAck {
    /// Status word
    pub status: String,
    /// Browser link, when one exists
    #[serde(default)]
    pub link: Option<String>,
}

impl ToolAck {
    /// Check for an accepted call
    #[must_use]
    pub fn accepted(&self) -> bool {
        matches!(self.status.to_uppercase().as_str(), "SUCCESS" | "OPEN" | "OK" | "CREATED")
    }
}

/// Ticket created in the tracker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    /// Ticket key
    pub ticket_id: String,
    /// Browser link
    pub link: String,
}

/// Reply to a vendor cursor reset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResetAck {
    /// `RESET`, `ALREADY_RESET`, `SKIPPED`, ...
    pub status: String,
    /// Detail
    #[serde(default)]
    pub message: String,
}

impl ResetAck {
    /// Cursor is in the reset state now
    #[must_use]
    pub fn cleared(&self) -> bool {
        matches!(self.status.to_uppercase().as_str(), "RESET" | "ALREADY_RESET")
    }
}

/// External tools the agents act through
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ToolGateway: Send + Sync {
    /// Recent pipeline logs, optionally filtered by service
    async fn fetch_logs(&self, service_filter: Option<String>, limit: usize) -> Result<Vec<LogEntry>, ToolError>;

    /// Column names of a warehouse table
    async fn inspect_schema(&self, table: &str) -> Result<Vec<String>, ToolError>;

    /// Sample rows of a warehouse table
    async fn get_sample(&self, table: &str, limit: usize) -> Result<TableSample, ToolError>;

    /// Header columns of the incoming file
    async fn get_incoming_header(&self, pattern: &str) -> Result<Vec<String>, ToolError>;

    /// Knowledge base article, if any
    async fn search_kb(&self, query: &str) -> Result<Option<String>, ToolError>;

    /// Web search snippet, if any
    async fn search_web(&self, query: &str) -> Result<Option<String>, ToolError>;

    /// Run SQL against the warehouse
    async fn deploy_sql(&self, statement: &str) -> Result<DeployReply, ToolError>;

    /// Read a file from a repository
    async fn get_file(&self, repo: &str, path: &str) -> Result<String, ToolError>;

    /// Create a branch
    async fn create_branch(&self, repo: &str, base: &str, branch: &str) -> Result<ToolAck, ToolError>;

    /// Open a pull request
    async fn open_pr(&self, pr: &PullRequest) -> Result<ToolAck, ToolError>;

    /// File a ticket
    async fn create_ticket(&self, project: &str, summary: &str, priority: &str) -> Result<Ticket, ToolError>;

    /// Rewind the vendor cursor
    async fn reset_vendor_cursor(&self, reason: &str) -> Result<ResetAck, ToolError>;
}

/// HTTP adapter: `POST {base}/tools/{name}` with JSON arguments
#[derive(Debug, Clone)]
pub struct HttpToolGateway {
    client: reqwest::Client,
    base_url: String,
}

impl HttpToolGateway {
    /// Create a gateway client
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ToolError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ToolError::Transport {
                tool: "client".to_string(),
                message: e.to_string(),
            })?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn call<T: DeserializeOwned>(&self, tool: &str, args: Value) -> Result<T, ToolError> {
        let url = format!("{}/tools/{}", self.base_url, tool);
        tracing::debug!(tool, "calling tool gateway");
        let response = self
            .client
            .post(&url)
            .json(&args)
            .send()
            .await
            .map_err(|e| ToolError::Transport {
                tool: tool.to_string(),
                message: e.to_string(),
            })?;
        let status = response.status();
        if !status.is_success() {
            return Err(ToolError::Status {
                tool: tool.to_string(),
                status: status.as_u16(),
            });
        }
        response.json::<T>().await.map_err(|e| ToolError::Malformed {
            tool: tool.to_string(),
            message: e.to_string(),
        })
    }
}

/// Schema replies are either `{columns: [...]}` or `{error: ...}`
#[derive(Deserialize)]
struct SchemaReply {
    #[serde(default)]
    columns: Vec<String>,
    #[serde(default)]
    error: Option<String>,
}

fn absent_if(reply: String, sentinel: &str) -> Option<String> {
    let trimmed = reply.trim();
    if trimmed.is_empty() || trimmed == sentinel {
        None
    } else {
        Some(reply)
    }
}

#[async_trait]
impl ToolGateway for HttpToolGateway {
    async fn fetch_logs(&self, service_filter: Option<String>, limit: usize) -> Result<Vec<LogEntry>, ToolError> {
        self.call("fetch_recent_logs", json!({ "service_filter": service_filter, "limit": limit }))
            .await
    }

    async fn inspect_schema(&self, table: &str) -> Result<Vec<String>, ToolError> {
        let reply: SchemaReply = self
            .call("inspect_snowflake_schema", json!({ "table_name": table }))
            .await?;
        match reply.error {
            Some(message) => Err(ToolError::Rejected {
                tool: "inspect_snowflake_schema".to_string(),
                message,
            }),
            None => Ok(reply.columns),
        }
    }

    async fn get_sample(&self, table: &str, limit: usize) -> Result<TableSample, ToolError> {
        self.call("get_table_sample", json!({ "table_name": table, "limit": limit }))
            .await
    }

    async fn get_incoming_header(&self, pattern: &str) -> Result<Vec<String>, ToolError> {
        self.call("get_incoming_file_header", json!({ "file_pattern": pattern }))
            .await
    }

    async fn search_kb(&self, query: &str) -> Result<Option<String>, ToolError> {
        let reply: String = self.call("search_knowledge_base", json!({ "query": query })).await?;
        Ok(absent_if(reply, KB_NO_RESULTS))
    }

    async fn search_web(&self, query: &str) -> Result<Option<String>, ToolError> {
        let reply: String = self.call("google_search_error", json!({ "query": query })).await?;
        Ok(absent_if(reply, "Google: No results found."))
    }

    async fn deploy_sql(&self, statement: &str) -> Result<DeployReply, ToolError> {
        self.call("deploy_sql_patch", json!({ "sql_statement": statement }))
            .await
    }

    async fn get_file(&self, repo: &str, path: &str) -> Result<String, ToolError> {
        let reply: String = self
            .call("get_file_content", json!({ "repo_name": repo, "file_path": path }))
            .await?;
        if reply.starts_with("Error") {
            return Err(ToolError::Rejected {
                tool: "get_file_content".to_string(),
                message: reply,
            });
        }
        Ok(reply)
    }

    async fn create_branch(&self, repo: &str, base: &str, branch: &str) -> Result<ToolAck, ToolError> {
        self.call(
            "create_branch",
            json!({ "repo_name": repo, "base_branch": base, "new_branch": branch }),
        )
        .await
    }

    async fn open_pr(&self, pr: &PullRequest) -> Result<ToolAck, ToolError> {
        self.call("open_pull_request", json!(pr)).await
    }

    async fn create_ticket(&self, project: &str, summary: &str, priority: &str) -> Result<Ticket, ToolError> {
        self.call(
            "create_jira_ticket",
            json!({ "project_key": project, "summary": summary, "priority": priority }),
        )
        .await
    }

    async fn reset_vendor_cursor(&self, reason: &str) -> Result<ResetAck, ToolError> {
        self.call("reset_vendor_cursor", json!({ "reason": reason })).await
    }
}
