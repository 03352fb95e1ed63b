//! The four independent checkers of the validation pipeline.
//!
//! Each checker is a pure function of `(decision, profile, snapshot)` and
//! produces a typed result carrying its findings and a confidence value.
//! None of them performs I/O or branches on the wall clock; the session
//! orchestrator owns their sequencing, and the runtime may execute them
//! concurrently because they share no state.

pub mod consistency;
pub mod context;
pub mod principles;
pub mod risk;

pub use consistency::{
    CaseDigest, ConsistencyChecker, ConsistencyResult, ConsistencyStatus, CorpusSnapshot,
    SimilarCase,
};
pub use context::{ContextChecker, ContextReport};
pub use principles::{
    DetectorDepth, PrincipleAssessment, PrincipleReport, PrincipleStatus, PrincipleValidator,
    ViolationNote,
};
pub use risk::{HarmCategory, RiskAssessment, RiskScorer, RuleViolation};
