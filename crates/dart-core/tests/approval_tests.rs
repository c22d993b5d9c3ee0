//! Approval broker tests
//!
//! Tenets:
//! - A pending request is answered by whoever holds a broker clone
//! - An unanswered request times out and counts as a rejection
//! - A request nobody waits on expires instead of lingering
//! - With no subscriber the fallback prompt decides; without one, deny

use dart_core::approval::{ApprovalBroker, ApprovalRequest, Decision, FallbackPrompt, HumanGate};
use dart_core::error::ApprovalError;
use dart_core::types::ApprovalOutcome;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct CountingPrompt {
    decision: Decision,
    calls: AtomicUsize,
}

impl FallbackPrompt for CountingPrompt {
    fn prompt(&self, _request: &ApprovalRequest) -> Decision {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.decision
    }
}

/// Tenet: subscribers see the request and resolve it from another task
#[tokio::test]
async fn test_subscriber_resolves_request() {
    let broker = ApprovalBroker::new(Duration::from_secs(5));
    let mut events = broker.subscribe();

    let responder = broker.clone();
    let handle = tokio::spawn(async move {
        let request = events.recv().await.unwrap();
        assert_eq!(request.reason, "Detected controlled command 'ALTER TABLE'");
        responder.resolve(request.token, Decision::Approve).unwrap();
    });

    let outcome = broker
        .authorize("inc-1", "ALTER TABLE t ADD COLUMN d VARCHAR", "Detected controlled command 'ALTER TABLE'")
        .await;
    handle.await.unwrap();

    assert_eq!(outcome, ApprovalOutcome::Approved);
    assert!(broker.pending().is_empty());
    assert_eq!(broker.stats().approved, 1);
}

/// Tenet: a deny is a deny
#[tokio::test]
async fn test_subscriber_denies_request() {
    let broker = ApprovalBroker::new(Duration::from_secs(5));
    let mut events = broker.subscribe();
    let responder = broker.clone();
    tokio::spawn(async move {
        let request = events.recv().await.unwrap();
        responder.resolve(request.token, Decision::Deny).unwrap();
    });

    let outcome = broker.authorize("inc-1", "DROP TABLE t", "Detected controlled command 'DROP TABLE'").await;
    assert_eq!(outcome, ApprovalOutcome::Denied);
}

/// Tenet: nobody answering never leaves the mission suspended
#[tokio::test]
async fn test_unanswered_request_times_out() {
    let broker = ApprovalBroker::new(Duration::from_millis(50));
    let _events = broker.subscribe();

    let token = broker.submit("inc-1", "UPDATE t SET x = 1", "Ambiguous SQL pattern detected");
    assert_eq!(broker.pending().len(), 1);

    let outcome = broker.wait(token).await;
    assert_eq!(outcome, ApprovalOutcome::TimedOut);
    assert!(broker.pending().is_empty());

    // Late answers are refused
    let late = broker.resolve(token, Decision::Approve);
    assert!(matches!(late, Err(ApprovalError::UnknownToken(_))));
    assert_eq!(broker.stats().timed_out, 1);
}

/// Tenet: submitted but never awaited requests expire after the timeout
#[tokio::test]
async fn test_unclaimed_request_expires() {
    let broker = ApprovalBroker::new(Duration::from_millis(30));

    let abandoned = broker.submit("inc-2", "DELETE FROM t WHERE id = 1", "Ambiguous SQL pattern detected");
    assert_eq!(broker.pending().len(), 1);

    tokio::time::sleep(Duration::from_millis(80)).await;
    let fresh = broker.submit("inc-3", "UPDATE t SET x = 1", "Ambiguous SQL pattern detected");

    let pending = broker.pending();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].token, fresh);
    assert!(matches!(
        broker.resolve(abandoned, Decision::Approve),
        Err(ApprovalError::UnknownToken(_))
    ));
    assert_eq!(broker.wait(abandoned).await, ApprovalOutcome::Denied);
    assert_eq!(broker.stats().timed_out, 1);

    broker.resolve(fresh, Decision::Approve).unwrap();
    assert_eq!(broker.wait(fresh).await, ApprovalOutcome::Approved);
}

/// Tenet: unknown tokens are rejected
#[tokio::test]
async fn test_resolve_unknown_token() {
    let broker = ApprovalBroker::new(Duration::from_secs(1));
    let result = broker.resolve(dart_core::approval::ApprovalToken::new(), Decision::Approve);
    assert!(matches!(result, Err(ApprovalError::UnknownToken(_))));
}

/// Tenet: the fallback prompt decides when nobody subscribes
#[tokio::test]
async fn test_fallback_without_subscriber() {
    let prompt = Arc::new(CountingPrompt {
        decision: Decision::Approve,
        calls: AtomicUsize::new(0),
    });
    let broker = ApprovalBroker::with_fallback(Duration::from_secs(5), prompt.clone());

    let outcome = broker.authorize("inc-1", "ALTER TABLE t", "reason").await;
    assert_eq!(outcome, ApprovalOutcome::Approved);
    assert_eq!(prompt.calls.load(Ordering::SeqCst), 1);
    assert_eq!(broker.stats().fallback_used, 1);
}

/// Tenet: no channel at all means deny
#[tokio::test]
async fn test_no_channel_denies() {
    let broker = ApprovalBroker::new(Duration::from_secs(5));
    let outcome = broker.authorize("inc-1", "ALTER TABLE t", "reason").await;
    assert_eq!(outcome, ApprovalOutcome::Denied);
    assert_eq!(broker.stats().submitted, 0);
}
