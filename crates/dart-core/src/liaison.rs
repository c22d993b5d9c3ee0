//! Vendor Liaison
//!
//! Probes the upstream vendor's health endpoint. Transient failures are
//! retried with exponential backoff; anything else ends the probe. The
//! liaison never fails: an unreachable vendor is reported as an outage.

use crate::audit::{Agent, AuditLevel, AuditTrail};
use crate::error::VendorError;
use crate::profile::VendorConfig;
use crate::types::{VendorHealthSignal, VendorStatus};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Message reported after the retry budget is spent
pub const MAX_RETRIES_MESSAGE: &str = "Failed to contact vendor (max retries).";

/// Status query sent to the vendor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeRequest {
    /// Correlation id
    pub request_id: String,
    /// Query word
    pub query: String,
}

impl ProbeRequest {
    /// Fresh `STATUS_CHECK` request
    #[must_use]
    pub fn status_check() -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            query: "STATUS_CHECK".to_string(),
        }
    }
}

fn healthy_by_default() -> bool {
    true
}

/// Vendor's answer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeResponse {
    /// Reported status
    pub status: VendorStatus,
    /// Vendor message
    #[serde(default)]
    pub message: String,
    /// Vendor-side truth
    #[serde(default = "healthy_by_default")]
    pub internal_truth_is_healthy: bool,
}

impl From<ProbeResponse> for VendorHealthSignal {
    fn from(response: ProbeResponse) -> Self {
        Self {
            status: response.status,
            message: response.message,
            internal_truth_is_healthy: response.internal_truth_is_healthy,
        }
    }
}

/// The vendor's status endpoint
#[async_trait]
pub trait VendorEndpoint: Send + Sync {
    /// One status call
    async fn status_check(&self, request: &ProbeRequest) -> Result<ProbeResponse, VendorError>;
}

/// Exponential backoff schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Total calls, first one included
    pub max_attempts: u32,
    /// Delay after the first failure
    pub base_delay: Duration,
    /// Multiplier per further failure
    pub factor: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            factor: 2,
        }
    }
}

impl BackoffPolicy {
    /// Policy without sleeping, for tests and dry runs
    #[must_use]
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            factor: 1,
        }
    }

    /// Delay after the given failed attempt (1-based)
    #[must_use]
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1);
        self.base_delay
            .saturating_mul(self.factor.saturating_pow(exp))
    }
}

impl From<&VendorConfig> for BackoffPolicy {
    fn from(config: &VendorConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            factor: config.factor.max(1),
        }
    }
}

/// Vendor health prober
pub struct VendorLiaison {
    endpoint: Arc<dyn VendorEndpoint>,
    policy: BackoffPolicy,
    audit: Arc<AuditTrail>,
}

impl std::fmt::Debug for VendorLiaison {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VendorLiaison").field("policy", &self.policy).finish()
    }
}

impl VendorLiaison {
    /// Create liaison
    #[must_use]
    pub fn new(endpoint: Arc<dyn VendorEndpoint>, policy: BackoffPolicy, audit: Arc<AuditTrail>) -> Self {
        Self { endpoint, policy, audit }
    }

    /// Retry schedule in use
    #[inline]
    #[must_use]
    pub fn policy(&self) -> BackoffPolicy {
        self.policy
    }

    /// Probe vendor health. Writes one audit record per call.
    pub async fn probe(&self, incident_id: &str) -> VendorHealthSignal {
        let max = self.policy.max_attempts.max(1);
        for attempt in 1..=max {
            let request = ProbeRequest::status_check();
            match self.endpoint.status_check(&request).await {
                Ok(response) => {
                    let level = if response.status == VendorStatus::Healthy {
                        AuditLevel::Success
                    } else {
                        AuditLevel::Error
                    };
                    self.audit.record(
                        incident_id,
                        Agent::VendorLiaison,
                        level,
                        format!(
                            "Probe {attempt}/{max}: vendor reply {} | '{}'",
                            response.status, response.message
                        ),
                    );
                    return response.into();
                }
                Err(e) if !e.is_transient() => {
                    self.audit.record(
                        incident_id,
                        Agent::VendorLiaison,
                        AuditLevel::Error,
                        format!("Probe {attempt}/{max}: permanent failure ({e}), giving up"),
                    );
                    return VendorHealthSignal::outage(format!("Vendor probe failed: {e}"));
                }
                Err(e) if attempt < max => {
                    let delay = self.policy.delay_after(attempt);
                    self.audit.record(
                        incident_id,
                        Agent::VendorLiaison,
                        AuditLevel::Warn,
                        format!("Probe {attempt}/{max}: {e}; retrying in {}ms", delay.as_millis()),
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    self.audit.record(
                        incident_id,
                        Agent::VendorLiaison,
                        AuditLevel::Error,
                        format!("Probe {attempt}/{max}: {e}; max retries exceeded"),
                    );
                }
            }
        }
        VendorHealthSignal::outage(MAX_RETRIES_MESSAGE)
    }
}

/// HTTP adapter: `POST {base}/a2a/echo`
#[derive(Debug, Clone)]
pub struct HttpVendorEndpoint {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl HttpVendorEndpoint {
    /// Create endpoint
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, VendorError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| VendorError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
        })
    }

    /// Create endpoint from config
    pub fn from_config(config: &VendorConfig) -> Result<Self, VendorError> {
        Self::new(config.base_url.clone(), Duration::from_secs(config.timeout_secs))
    }
}

#[async_trait]
impl VendorEndpoint for HttpVendorEndpoint {
    async fn status_check(&self, request: &ProbeRequest) -> Result<ProbeResponse, VendorError> {
        let url = format!("{}/a2a/echo", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    VendorError::Timeout(u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX))
                } else {
                    VendorError::Transport(e.to_string())
                }
            })?;
        let status = response.status();
        if !status.is_success() {
            return Err(VendorError::Status(status.as_u16()));
        }
        response
            .json::<ProbeResponse>()
            .await
            .map_err(|e| VendorError::Decode(e.to_string()))
    }
}
