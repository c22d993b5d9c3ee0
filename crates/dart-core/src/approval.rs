//! Human authorization channel
//!
//! The Safety Reviewer asks a [`HumanGate`] before any controlled or
//! ambiguous plan runs. [`ApprovalBroker`] is the shipped gate:
//! - `submit` registers a pending request and broadcasts it to subscribers
//! - `resolve` answers it from any task holding a broker clone
//! - `wait` blocks the mission until an answer or the timeout
//!
//! A request nobody waits on expires after the same timeout and is swept on
//! the next broker call.
//!
//! With nobody subscribed the broker falls back to a synchronous prompt run
//! on a blocking thread. With no fallback either, the request is denied.

use crate::error::ApprovalError;
use crate::types::ApprovalOutcome;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, oneshot};
use ulid::Ulid;

/// Subscriber queue depth
const EVENT_CAPACITY: usize = 64;

/// A human's answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    /// Allow the action
    Approve,
    /// Block the action
    Deny,
}

impl From<Decision> for ApprovalOutcome {
    fn from(decision: Decision) -> Self {
        match decision {
            Decision::Approve => ApprovalOutcome::Approved,
            Decision::Deny => ApprovalOutcome::Denied,
        }
    }
}

/// Handle for one pending request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ApprovalToken(pub Ulid);

impl ApprovalToken {
    /// Create new token
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for ApprovalToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ApprovalToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a human is asked to authorize
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    /// Token to resolve with
    pub token: ApprovalToken,
    /// Mission asking
    pub incident_id: String,
    /// Action text
    pub plan: String,
    /// Why a human is needed
    pub reason: String,
    /// When the request was raised
    pub requested_at: DateTime<Utc>,
}

/// Gate the Safety Reviewer consults
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HumanGate: Send + Sync {
    /// Ask a human; always produces an outcome
    async fn authorize(&self, incident_id: &str, plan: &str, reason: &str) -> ApprovalOutcome;
}

/// Synchronous alternate channel (e.g. a terminal prompt)
pub trait FallbackPrompt: Send + Sync {
    /// Block until the human answers
    fn prompt(&self, request: &ApprovalRequest) -> Decision;
}

/// Broker counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BrokerStats {
    /// Requests raised
    pub submitted: usize,
    /// Answered approve
    pub approved: usize,
    /// Answered deny (or channel lost)
    pub denied: usize,
    /// Nobody answered in time
    pub timed_out: usize,
    /// Answered through the fallback prompt
    pub fallback_used: usize,
}

struct PendingApproval {
    request: ApprovalRequest,
    reply: oneshot::Sender<Decision>,
    expires_at: Instant,
}

struct BrokerInner {
    pending: DashMap<ApprovalToken, PendingApproval>,
    waiters: DashMap<ApprovalToken, oneshot::Receiver<Decision>>,
    events: broadcast::Sender<ApprovalRequest>,
    timeout: Duration,
    fallback: Option<Arc<dyn FallbackPrompt>>,
    stats: Mutex<BrokerStats>,
}

/// Request/response channel between missions and humans
#[derive(Clone)]
pub struct ApprovalBroker {
    inner: Arc<BrokerInner>,
}

impl std::fmt::Debug for ApprovalBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApprovalBroker")
            .field("pending", &self.inner.pending.len())
            .field("timeout", &self.inner.timeout)
            .field("fallback", &self.inner.fallback.is_some())
            .finish()
    }
}

impl ApprovalBroker {
    /// Create broker with the given answer deadline
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self::build(timeout, None)
    }

    /// Create broker with a fallback prompt
    #[must_use]
    pub fn with_fallback(timeout: Duration, fallback: Arc<dyn FallbackPrompt>) -> Self {
        Self::build(timeout, Some(fallback))
    }

    fn build(timeout: Duration, fallback: Option<Arc<dyn FallbackPrompt>>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(BrokerInner {
                pending: DashMap::new(),
                waiters: DashMap::new(),
                events,
                timeout,
                fallback,
                stats: Mutex::new(BrokerStats::default()),
            }),
        }
    }

    /// Stream of new requests for interactive front-ends
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ApprovalRequest> {
        self.inner.events.subscribe()
    }

    /// Check for a live interactive channel
    #[inline]
    #[must_use]
    pub fn has_subscribers(&self) -> bool {
        self.inner.events.receiver_count() > 0
    }

    /// Register a request and announce it
    pub fn submit(&self, incident_id: &str, plan: &str, reason: &str) -> ApprovalToken {
        self.sweep_expired();
        let request = ApprovalRequest {
            token: ApprovalToken::new(),
            incident_id: incident_id.to_string(),
            plan: plan.to_string(),
            reason: reason.to_string(),
            requested_at: Utc::now(),
        };
        let token = request.token;
        let (reply, receiver) = oneshot::channel();
        self.inner.pending.insert(
            token,
            PendingApproval {
                request: request.clone(),
                reply,
                expires_at: Instant::now() + self.inner.timeout,
            },
        );
        self.inner.waiters.insert(token, receiver);
        self.inner.stats.lock().submitted += 1;

        tracing::info!(%token, incident_id, reason, "human authorization requested");
        // Nobody listening is fine; the request stays pending until timeout
        let _ = self.inner.events.send(request);
        token
    }

    /// Answer a pending request
    pub fn resolve(&self, token: ApprovalToken, decision: Decision) -> Result<(), ApprovalError> {
        self.sweep_expired();
        let (_, pending) = self
            .inner
            .pending
            .remove(&token)
            .ok_or_else(|| ApprovalError::UnknownToken(token.to_string()))?;
        tracing::info!(%token, ?decision, incident_id = %pending.request.incident_id, "human decision received");
        pending
            .reply
            .send(decision)
            .map_err(|_| ApprovalError::NotPending(token.to_string()))
    }

    /// Await the answer to a submitted request
    pub async fn wait(&self, token: ApprovalToken) -> ApprovalOutcome {
        let Some((_, receiver)) = self.inner.waiters.remove(&token) else {
            tracing::warn!(%token, "no waiter registered for approval token");
            return self.count(ApprovalOutcome::Denied);
        };

        let outcome = match tokio::time::timeout(self.inner.timeout, receiver).await {
            Ok(Ok(decision)) => decision.into(),
            // Sender dropped without an answer
            Ok(Err(_)) => ApprovalOutcome::Denied,
            Err(_) => {
                self.inner.pending.remove(&token);
                tracing::warn!(%token, timeout_secs = self.inner.timeout.as_secs(), "human authorization timed out");
                ApprovalOutcome::TimedOut
            }
        };
        self.count(outcome)
    }

    /// Requests still waiting for an answer
    #[must_use]
    pub fn pending(&self) -> Vec<ApprovalRequest> {
        self.sweep_expired();
        let mut requests: Vec<ApprovalRequest> = self
            .inner
            .pending
            .iter()
            .map(|entry| entry.value().request.clone())
            .collect();
        requests.sort_by_key(|r| r.token);
        requests
    }

    /// Counters snapshot
    #[must_use]
    pub fn stats(&self) -> BrokerStats {
        self.inner.stats.lock().clone()
    }

    /// Drop requests past their deadline that no `wait` ever picked up.
    /// Requests with an active waiter are left to that waiter's timeout.
    fn sweep_expired(&self) {
        let now = Instant::now();
        let inner = &self.inner;
        let mut expired = 0;
        inner.pending.retain(|token, pending| {
            if pending.expires_at > now || inner.waiters.remove(token).is_none() {
                return true;
            }
            tracing::warn!(%token, incident_id = %pending.request.incident_id, "unclaimed authorization request expired");
            expired += 1;
            false
        });
        if expired > 0 {
            inner.stats.lock().timed_out += expired;
        }
    }

    fn count(&self, outcome: ApprovalOutcome) -> ApprovalOutcome {
        let mut stats = self.inner.stats.lock();
        match outcome {
            ApprovalOutcome::Approved => stats.approved += 1,
            ApprovalOutcome::Denied => stats.denied += 1,
            ApprovalOutcome::TimedOut => stats.timed_out += 1,
        }
        outcome
    }

    async fn ask_fallback(&self, fallback: Arc<dyn FallbackPrompt>, incident_id: &str, plan: &str, reason: &str) -> ApprovalOutcome {
        let request = ApprovalRequest {
            token: ApprovalToken::new(),
            incident_id: incident_id.to_string(),
            plan: plan.to_string(),
            reason: reason.to_string(),
            requested_at: Utc::now(),
        };
        {
            let mut stats = self.inner.stats.lock();
            stats.submitted += 1;
            stats.fallback_used += 1;
        }
        tracing::info!(incident_id, reason, "no interactive subscriber, using fallback prompt");

        let task = tokio::task::spawn_blocking(move || fallback.prompt(&request));
        let outcome = match tokio::time::timeout(self.inner.timeout, task).await {
            Ok(Ok(decision)) => decision.into(),
            Ok(Err(e)) => {
                tracing::error!(error = %e, "fallback prompt panicked");
                ApprovalOutcome::Denied
            }
            Err(_) => ApprovalOutcome::TimedOut,
        };
        self.count(outcome)
    }
}

#[async_trait]
impl HumanGate for ApprovalBroker {
    async fn authorize(&self, incident_id: &str, plan: &str, reason: &str) -> ApprovalOutcome {
        if !self.has_subscribers() {
            return match self.inner.fallback.clone() {
                Some(fallback) => self.ask_fallback(fallback, incident_id, plan, reason).await,
                None => {
                    tracing::warn!(incident_id, "no approval channel available, denying");
                    self.count(ApprovalOutcome::Denied)
                }
            };
        }
        let token = self.submit(incident_id, plan, reason);
        self.wait(token).await
    }
}
