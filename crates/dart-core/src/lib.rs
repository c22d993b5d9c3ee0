//! DART Core - Commander orchestration engine
//!
//! The Commander runs data-incident missions:
//! - Recalls similar past incidents
//! - Investigates and probes the upstream vendor in parallel
//! - Plans a remediation and routes it through a safety review
//! - Suspends for a human when a plan is risky
//! - Executes, verifies and files the audit trail
//!
//! # Example
//!
//! ```rust,ignore
//! use dart_core::prelude::*;
//!
//! # async fn example(services: Services) {
//! let commander = Commander::new(CommanderConfig::new(), services);
//! let alert = Alert::new("ALERT-001", "Airflow", "ERR_SCHEMA_001", "Load failed");
//!
//! let report = commander.run_mission(alert).await;
//! println!("succeeded: {}", report.succeeded());
//! # }
//! ```

#![warn(unreachable_pub)]

// Core modules
pub mod approval;
pub mod audit;
pub mod commander;
pub mod drift;
pub mod error;
pub mod evaluation;
pub mod gateway;
pub mod generation;
pub mod investigator;
pub mod liaison;
pub mod memory;
pub mod profile;
pub mod remediation;
pub mod rules;
pub mod safety;
pub mod state;
pub mod types;

// Re-exports for convenience
pub use approval::{ApprovalBroker, ApprovalRequest, ApprovalToken, Decision, FallbackPrompt, HumanGate};
pub use audit::{Agent, AuditEvent, AuditLevel, AuditTrail};
pub use commander::{Commander, Services};
pub use error::{
    ApprovalError, AttemptFailure, AuditError, ConfigError, FailureKind, GenerationError, MemoryError,
    MissionFailure, StateMachineError, ToolError, VendorError,
};
pub use evaluation::MissionSummary;
pub use gateway::{HttpToolGateway, ToolGateway};
pub use generation::{GenerationChain, HttpGenerator, TextGenerator};
pub use liaison::{BackoffPolicy, HttpVendorEndpoint, VendorEndpoint, VendorLiaison};
pub use memory::{InMemoryIncidentMemory, IncidentMemory, IncidentRecord, MemoryHit};
pub use profile::{load_alert, CommanderConfig, MissionProfile};
pub use safety::SafetyReviewer;
pub use state::MissionState;
pub use types::{
    Alert, ApprovalOutcome, IncidentContext, MissionOutcome, MissionReport, PlanDescriptor, Resolution,
    SafetyVerdict, Severity, VendorHealthSignal, VendorStatus, VerdictStatus,
};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for running missions
    pub use crate::{
        Alert, ApprovalBroker, Commander, CommanderConfig, GenerationChain, IncidentMemory, MissionProfile,
        MissionReport, MissionSummary, Services, ToolGateway, VendorEndpoint,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
