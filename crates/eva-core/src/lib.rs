//! # eva-core
//!
//! Deterministic decision-governance validation engine.
//!
//! This crate takes a structured decision record and answers:
//! - Does its context carry enough to judge it?
//! - Does it honor the governing principles?
//! - How much harm could it do, and with what confidence?
//! - Is it consistent with how similar cases were decided?
//!
//! ## Key Guarantees
//!
//! 1. **Deterministic**: Same decision, profile, plan and corpus snapshot
//!    always produce the same report
//! 2. **Rule-based**: No model calls; every checker is a pure function
//! 3. **Traceable**: Every critical finding cites its evidence, and every
//!    session seals a hash-chained audit record
//! 4. **Fail-closed**: A session that cannot complete reports
//!    `VALIDATION_ERROR` and a blocked verdict
//!
//! ## Example
//!
//! ```rust,ignore
//! use eva_core::{validate, DecisionRecord, ThresholdProfile};
//! use eva_core::checkers::CorpusSnapshot;
//!
//! let decision = DecisionRecord::from_json(input)?;
//! let profile = ThresholdProfile::preset("medical")?;
//! let report = validate(&decision, &profile, &CorpusSnapshot::default())?;
//!
//! println!("{} (confidence {:.2})", report.status, report.validation_confidence);
//! ```

pub mod audit;
pub mod checkers;
pub mod decision;
pub mod feedback;
pub mod plan;
pub mod profile;
pub mod router;
pub mod session;
pub mod types;

// Re-export main types at crate root
pub use audit::{AuditContent, AuditError, AuditRecord, CustodyEntry};
pub use decision::{DecisionContext, DecisionError, DecisionRecord, Principle};
pub use feedback::{FeedbackEmitter, FeedbackSignal, FeedbackWindow, SignalPriority, SignalTarget};
pub use plan::{ExecutionPlan, PathMode, PlanError, PlanRegistry};
pub use profile::{ProfileError, RiskRule, ThresholdProfile};
pub use router::{EscalationDecision, EscalationRouter, NotificationPlan, ReviewDisposition};
pub use session::{SessionError, SessionReport, SessionState, ValidationSession};
pub use types::{
    CheckerKind, EscalationLevel, Evidence, Finding, Severity, ValidationOutput,
    ValidationStatus, Verdict,
};

use checkers::CorpusSnapshot;

/// Validate one decision under the default plan registry.
///
/// This is the main entry point for embedded use; the runtime crate wraps
/// it with audit persistence, notification delivery and feedback emission.
pub fn validate(
    decision: &DecisionRecord,
    profile: &ThresholdProfile,
    snapshot: &CorpusSnapshot,
) -> Result<SessionReport, SessionError> {
    let plan = PlanRegistry::new().plan_for(decision, profile);
    ValidationSession::new().execute(decision, profile, plan, snapshot)
}
