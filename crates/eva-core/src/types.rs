//! Shared vocabulary for the validation pipeline.
//!
//! Findings are data, never errors: every checker reports what it saw as a
//! severity-tagged [`Finding`], and the escalation router maps the combined
//! findings to a verdict. Only infrastructure failures use error returns.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Severity of a finding. Ordered: `Info < Warning < Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Warning => write!(f, "warning"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

/// The four independent checkers of the validation pipeline.
///
/// The enum order is the pipeline order; it is also the tie-break order when
/// findings of equal severity are sorted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckerKind {
    ContextCompleteness,
    Principles,
    Risk,
    Consistency,
}

impl std::fmt::Display for CheckerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CheckerKind::ContextCompleteness => write!(f, "context_completeness"),
            CheckerKind::Principles => write!(f, "principles"),
            CheckerKind::Risk => write!(f, "risk"),
            CheckerKind::Consistency => write!(f, "consistency"),
        }
    }
}

/// Where a piece of evidence comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceSource {
    /// The decision text itself
    Decision,
    /// The decision's declared context
    Context,
    /// A historical case in the audit corpus
    Corpus,
    /// The active threshold profile
    Profile,
}

/// A piece of evidence supporting a finding.
///
/// Every critical finding must point at the specific input that triggered it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    /// What this evidence supports
    pub claim: String,

    /// Where the evidence comes from
    pub source: EvidenceSource,

    /// Pointer to the location (e.g., "decision_text[47:72]")
    pub pointer: String,
}

impl Evidence {
    /// Evidence from a span of the decision text.
    pub fn from_text(claim: impl Into<String>, start: usize, end: usize) -> Self {
        Self {
            claim: claim.into(),
            source: EvidenceSource::Decision,
            pointer: format!("decision_text[{}:{}]", start, end),
        }
    }

    /// Evidence from a declared context field.
    pub fn from_context(claim: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            claim: claim.into(),
            source: EvidenceSource::Context,
            pointer: format!("context.{}", field.into()),
        }
    }

    /// Evidence from a historical case.
    pub fn from_corpus(claim: impl Into<String>, reference: impl Into<String>) -> Self {
        Self {
            claim: claim.into(),
            source: EvidenceSource::Corpus,
            pointer: format!("corpus.{}", reference.into()),
        }
    }

    /// Evidence from a profile threshold.
    pub fn from_profile(claim: impl Into<String>, option: impl Into<String>) -> Self {
        Self {
            claim: claim.into(),
            source: EvidenceSource::Profile,
            pointer: format!("profile.{}", option.into()),
        }
    }
}

/// A severity-tagged observation from one checker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    /// Which checker produced this finding
    pub checker: CheckerKind,

    /// Stable machine-readable code (e.g., "incomplete_context")
    pub code: String,

    pub severity: Severity,

    /// Human-readable explanation for audit and escalation notices
    pub message: String,

    #[serde(default)]
    pub evidence: Vec<Evidence>,
}

impl Finding {
    pub fn new(
        checker: CheckerKind,
        code: impl Into<String>,
        severity: Severity,
        message: impl Into<String>,
    ) -> Self {
        Self {
            checker,
            code: code.into(),
            severity,
            message: message.into(),
            evidence: Vec::new(),
        }
    }

    pub fn with_evidence(mut self, evidence: Evidence) -> Self {
        self.evidence.push(evidence);
        self
    }
}

/// Severity of a rule violation found by the risk scorer.
/// Ordered: `Minor < Major < Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationSeverity {
    Minor,
    Major,
    Critical,
}

impl std::fmt::Display for ViolationSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ViolationSeverity::Minor => write!(f, "minor"),
            ViolationSeverity::Major => write!(f, "major"),
            ViolationSeverity::Critical => write!(f, "critical"),
        }
    }
}

/// Execution verdict for a validated decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Allowed,
    AllowedWithMonitoring,
    Blocked,
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Verdict::Allowed => write!(f, "allowed"),
            Verdict::AllowedWithMonitoring => write!(f, "allowed_with_monitoring"),
            Verdict::Blocked => write!(f, "blocked"),
        }
    }
}

/// Escalation level. Ordered: `None < Info < Warning < Critical`.
///
/// Monotonic in trigger severity: any critical finding forces `Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationLevel {
    None,
    Info,
    Warning,
    Critical,
}

impl std::fmt::Display for EscalationLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EscalationLevel::None => write!(f, "none"),
            EscalationLevel::Info => write!(f, "info"),
            EscalationLevel::Warning => write!(f, "warning"),
            EscalationLevel::Critical => write!(f, "critical"),
        }
    }
}

/// Terminal status of a validation session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationStatus {
    Validated,
    Escalated,
    ValidationError,
}

impl std::fmt::Display for ValidationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationStatus::Validated => write!(f, "VALIDATED"),
            ValidationStatus::Escalated => write!(f, "ESCALATED"),
            ValidationStatus::ValidationError => write!(f, "VALIDATION_ERROR"),
        }
    }
}

/// Condensed escalation details for the caller-facing output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationSummary {
    pub level: EscalationLevel,
    pub verdict: Verdict,

    /// Triggering findings as "severity checker/code: message" lines,
    /// ordered by severity (highest first)
    pub triggers: Vec<String>,

    pub requires_human_review: bool,
}

/// Condensed feedback details for the caller-facing output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackSummary {
    pub signal_count: usize,
    pub targets: Vec<String>,
}

/// The caller-facing result of one validation session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationOutput {
    pub status: ValidationStatus,

    /// Reference of the sealed audit record. Absent only when the audit
    /// write itself failed (the session then reports `VALIDATION_ERROR`).
    pub audit_reference: Option<String>,

    pub validation_confidence: f64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub escalation_details: Option<EscalationSummary>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub feedback_summary: Option<FeedbackSummary>,

    pub session_id: Uuid,
}

impl ValidationOutput {
    /// Whether the decision may execute at all.
    pub fn released(&self) -> bool {
        match &self.escalation_details {
            Some(details) => details.verdict != Verdict::Blocked,
            None => self.status == ValidationStatus::Validated,
        }
    }
}
