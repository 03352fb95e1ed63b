//! Validation sessions.
//!
//! A session drives one decision through the checkers and the router. The
//! checker stage is a pure function of `(decision, profile, plan,
//! snapshot)`, so replaying a session with the same inputs reproduces the
//! same report bit for bit. The session itself is a small state machine;
//! the audit, notification and feedback stages live in the runtime and
//! advance the state through the explicit `mark_*` transitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::audit::AuditContent;
use crate::checkers::{
    ConsistencyChecker, ConsistencyResult, ContextChecker, ContextReport, CorpusSnapshot,
    PrincipleReport, PrincipleValidator, RiskAssessment, RiskScorer,
};
use crate::decision::DecisionRecord;
use crate::plan::ExecutionPlan;
use crate::profile::ThresholdProfile;
use crate::router::{EscalationDecision, EscalationRouter};
use crate::types::{
    EscalationLevel, EscalationSummary, FeedbackSummary, Finding, ValidationOutput,
    ValidationStatus, Verdict,
};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("invalid session transition {from:?} -> {to:?}")]
    InvalidTransition { from: SessionState, to: SessionState },
}

/// Lifecycle of one session. Transitions are strictly forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Received,
    Checked,
    Audited,
    Routed,
    FedBack,
}

/// The complete result of the checker and routing stages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionReport {
    pub session_id: Uuid,
    pub decision: DecisionRecord,
    pub plan: ExecutionPlan,

    pub context: ContextReport,
    pub principles: PrincipleReport,
    pub risk: RiskAssessment,
    pub consistency: Option<ConsistencyResult>,

    /// All findings in pipeline order
    pub findings: Vec<Finding>,

    pub escalation: EscalationDecision,
    pub status: ValidationStatus,

    /// Minimum of the checker confidences
    pub validation_confidence: f64,
}

impl SessionReport {
    /// Content for the audit record sealing this session.
    pub fn audit_content(
        &self,
        profile: &ThresholdProfile,
        prev_hash: Option<String>,
        recorded_at: DateTime<Utc>,
    ) -> AuditContent {
        AuditContent {
            session_id: self.session_id,
            recorded_at,
            decision: self.decision.clone(),
            profile_name: profile.name.clone(),
            profile_version: profile.version,
            plan_version: self.plan.version,
            status: self.status,
            validation_confidence: self.validation_confidence,
            harm_score: self.risk.harm_score,
            findings: self.findings.clone(),
            escalation: self.escalation.clone(),
            consistency: self.consistency.clone(),
            prev_hash,
            supersedes: None,
        }
    }

    /// Caller-facing output once the audit reference and feedback summary
    /// are known.
    pub fn output(
        &self,
        audit_reference: String,
        feedback_summary: Option<FeedbackSummary>,
    ) -> ValidationOutput {
        ValidationOutput {
            status: self.status,
            audit_reference: Some(audit_reference),
            validation_confidence: self.validation_confidence,
            escalation_details: if self.escalation.level > EscalationLevel::None {
                Some(self.escalation.summary())
            } else {
                None
            },
            feedback_summary,
            session_id: self.session_id,
        }
    }
}

/// Fail-closed output for a session that could not complete validation.
pub fn error_output(session_id: Uuid, audit_reference: Option<String>, reason: &str) -> ValidationOutput {
    ValidationOutput {
        status: ValidationStatus::ValidationError,
        audit_reference,
        validation_confidence: 0.0,
        escalation_details: Some(EscalationSummary {
            level: EscalationLevel::Critical,
            verdict: Verdict::Blocked,
            triggers: vec![format!("critical internal/validation_error: {}", reason)],
            requires_human_review: true,
        }),
        feedback_summary: None,
        session_id,
    }
}

/// One validation session.
#[derive(Debug)]
pub struct ValidationSession {
    id: Uuid,
    state: SessionState,
    started_at: DateTime<Utc>,
}

impl ValidationSession {
    pub fn new() -> Self {
        Self::with_id(Uuid::new_v4())
    }

    /// Fixed-id construction, used for deterministic replay.
    pub fn with_id(id: Uuid) -> Self {
        Self {
            id,
            state: SessionState::Received,
            started_at: Utc::now(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Run the checker and routing stages. Pure apart from the transition
    /// to `Checked`.
    pub fn execute(
        &mut self,
        decision: &DecisionRecord,
        profile: &ThresholdProfile,
        plan: ExecutionPlan,
        snapshot: &CorpusSnapshot,
    ) -> Result<SessionReport, SessionError> {
        self.transition(SessionState::Checked)?;

        let context = ContextChecker::new().check(decision, profile);
        let principles = PrincipleValidator::new().check(
            decision,
            profile,
            plan.detector_depth,
            plan.max_refinement_passes,
        );
        let risk = RiskScorer::new().check(decision, profile);

        // Checkers share no data flow, so ordering is free to change
        let consistency = if plan.run_consistency {
            Some(ConsistencyChecker::new().check(decision, snapshot, profile))
        } else {
            None
        };

        let mut findings = Vec::new();
        findings.extend(context.findings.iter().cloned());
        findings.extend(principles.findings.iter().cloned());
        findings.extend(risk.findings.iter().cloned());
        if let Some(consistency) = &consistency {
            findings.extend(consistency.findings.iter().cloned());
        }

        let escalation = EscalationRouter::new().route(&findings, profile);
        let status = if escalation.level >= EscalationLevel::Warning {
            ValidationStatus::Escalated
        } else {
            ValidationStatus::Validated
        };

        // The weakest checker bounds the session's confidence
        let validation_confidence = [
            context.confidence,
            principles.confidence,
            risk.confidence,
            consistency.as_ref().map(|c| c.confidence).unwrap_or(1.0),
        ]
        .into_iter()
        .fold(1.0f64, f64::min)
        .clamp(0.0, 1.0);

        Ok(SessionReport {
            session_id: self.id,
            decision: decision.clone(),
            plan,
            context,
            principles,
            risk,
            consistency,
            findings,
            escalation,
            status,
            validation_confidence,
        })
    }

    pub fn mark_audited(&mut self) -> Result<(), SessionError> {
        self.transition(SessionState::Audited)
    }

    pub fn mark_routed(&mut self) -> Result<(), SessionError> {
        self.transition(SessionState::Routed)
    }

    pub fn mark_fed_back(&mut self) -> Result<(), SessionError> {
        self.transition(SessionState::FedBack)
    }

    fn transition(&mut self, to: SessionState) -> Result<(), SessionError> {
        let valid = matches!(
            (self.state, to),
            (SessionState::Received, SessionState::Checked)
                | (SessionState::Checked, SessionState::Audited)
                | (SessionState::Audited, SessionState::Routed)
                | (SessionState::Routed, SessionState::FedBack)
        );
        if !valid {
            return Err(SessionError::InvalidTransition {
                from: self.state,
                to,
            });
        }
        self.state = to;
        Ok(())
    }
}

impl Default for ValidationSession {
    fn default() -> Self {
        Self::new()
    }
}
