//! ALIGN principle validation.
//!
//! Each of the five principles (awareness, learning, integrity, governance,
//! nurturing) is checked by a table of violation-pattern detectors over the
//! decision text plus structural checks over the declared context flags.
//! Detection runs at two depths: `Standard` applies the core detectors,
//! `Deep` adds the extended ones. When more than the configured number of
//! principles come back borderline, the validator re-assesses at deep depth
//! up to the plan's pass limit, stopping early once the assessment set is
//! stable. The loop is bounded and convergence-checked; there is no open
//! recursion.
//!
//! Every assessment carries a human-readable rationale for the audit record.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::decision::{DecisionRecord, Principle};
use crate::profile::ThresholdProfile;
use crate::types::{CheckerKind, Evidence, Finding, Severity};

/// How exhaustively the detector tables are applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorDepth {
    Standard,
    Deep,
}

/// Compliance status of one principle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrincipleStatus {
    Compliant,
    Borderline,
    Violation,
}

/// One detector hit recorded against a principle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViolationNote {
    /// Detector code (e.g., "consent_bypass")
    pub detector: String,

    /// `Critical` marks a violation, `Warning` a borderline concern
    pub severity: Severity,

    pub description: String,

    #[serde(default)]
    pub evidence: Vec<Evidence>,
}

/// Assessment of one principle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrincipleAssessment {
    pub principle: Principle,
    pub status: PrincipleStatus,

    /// Compliance score in [0, 1]
    pub score: f64,

    pub violations: Vec<ViolationNote>,

    /// Human-readable explanation for audit and escalation notices
    pub rationale: String,
}

/// Result of validating all five principles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrincipleReport {
    /// One assessment per principle, in canonical ALIGN order
    pub assessments: Vec<PrincipleAssessment>,

    /// Refinement passes actually run
    pub passes: u32,

    /// Whether the final pass reproduced the previous one
    pub converged: bool,

    pub findings: Vec<Finding>,

    /// Minimum principle score
    pub confidence: f64,
}

impl PrincipleReport {
    pub fn borderline_count(&self) -> usize {
        self.assessments
            .iter()
            .filter(|a| a.status == PrincipleStatus::Borderline)
            .count()
    }

    pub fn violation_count(&self) -> usize {
        self.assessments
            .iter()
            .filter(|a| a.status == PrincipleStatus::Violation)
            .count()
    }
}

struct TextDetector {
    code: &'static str,
    description: &'static str,
    /// true = violation, false = borderline
    violation: bool,
    deep_only: bool,
    pattern: Regex,
}

macro_rules! detector {
    ($code:expr, $desc:expr, $violation:expr, $deep:expr, $re:expr) => {
        TextDetector {
            code: $code,
            description: $desc,
            violation: $violation,
            deep_only: $deep,
            pattern: Regex::new($re).unwrap(),
        }
    };
}

lazy_static! {
    static ref AWARENESS_DETECTORS: Vec<TextDetector> = vec![
        detector!(
            "single_perspective",
            "decision considers only a single perspective",
            false,
            false,
            r"(?i)\b(the only (way|option|solution)|without (considering|consulting)|no (alternative|other) (view|perspective|option)s?)\b"
        ),
        detector!(
            "dismissed_concerns",
            "stakeholder concerns dismissed out of hand",
            false,
            true,
            r"(?i)\b(regardless of (objections|concerns)|despite (objections|concerns)|concerns (are|were) (irrelevant|unfounded))\b"
        ),
    ];

    static ref LEARNING_DETECTORS: Vec<TextDetector> = vec![
        detector!(
            "precedent_ignored",
            "prior outcomes or feedback deliberately ignored",
            false,
            false,
            r"(?i)\b(ignor(e|es|ing) (previous|prior|past|earlier)|disregard(s|ing)? (history|precedent|feedback|lessons))\b"
        ),
        detector!(
            "no_review_planned",
            "decision excludes any later review of its outcome",
            false,
            true,
            r"(?i)\b(no (further|future) (review|evaluation|assessment)|final and not subject to review)\b"
        ),
    ];

    static ref INTEGRITY_DETECTORS: Vec<TextDetector> = vec![
        detector!(
            "deceptive_intent",
            "decision involves concealment or falsification",
            true,
            false,
            r"(?i)\b(conceal(s|ing)?|cover(s|ing)? up|falsif\w+|fabricat\w+)\b"
        ),
        detector!(
            "hidden_reasoning",
            "reasoning is withheld from those affected",
            false,
            false,
            r"(?i)\b(without (disclosure|disclosing|explanation)|no (explanation|rationale|reason) (given|provided|offered)|undisclosed)\b"
        ),
        detector!(
            "selective_disclosure",
            "material information is selectively withheld",
            false,
            true,
            r"(?i)\b(omit(s|ting)? (details|information|the fact)|withhold(s|ing)?)\b"
        ),
    ];

    static ref GOVERNANCE_DETECTORS: Vec<TextDetector> = vec![
        detector!(
            "oversight_evasion",
            "decision path escapes human control",
            true,
            false,
            r"(?i)\b(cannot be (stopped|reversed|overridden|interrupted)|no (human )?(override|oversight|review|intervention))\b"
        ),
        detector!(
            "unattended_automation",
            "consequential step executes without any checkpoint",
            false,
            true,
            r"(?i)\b(automatic(ally)? (approve(s|d)?|execut(e|es|ed)|appl(y|ies|ied))|without (approval|sign-?off|confirmation))\b"
        ),
    ];

    static ref NURTURING_DETECTORS: Vec<TextDetector> = vec![
        detector!(
            "harm_language",
            "decision text describes harm to those affected",
            false,
            false,
            r"(?i)\b(harm(s|ful|ing)?|hurt(s|ing)?|damag(e|es|ing)|endanger(s|ing)?|jeopardiz\w+)\b"
        ),
        detector!(
            "wellbeing_tradeoff",
            "wellbeing traded away for another objective",
            false,
            false,
            r"(?i)\b(at the (cost|expense) of|sacrific(e|es|ing))\b"
        ),
        detector!(
            "coercive_framing",
            "those affected are left without a real choice",
            false,
            true,
            r"(?i)\b(must comply|no choice( but)?|forced to accept|take it or leave it)\b"
        ),
    ];
}

fn detectors_for(principle: Principle) -> &'static [TextDetector] {
    match principle {
        Principle::Awareness => &AWARENESS_DETECTORS,
        Principle::Learning => &LEARNING_DETECTORS,
        Principle::Integrity => &INTEGRITY_DETECTORS,
        Principle::Governance => &GOVERNANCE_DETECTORS,
        Principle::Nurturing => &NURTURING_DETECTORS,
    }
}

/// The ALIGN principle validator. Stateless and deterministic: identical
/// decision, profile and depth always reproduce identical assessments.
pub struct PrincipleValidator;

impl PrincipleValidator {
    pub fn new() -> Self {
        Self
    }

    /// Validate all five principles with bounded refinement.
    pub fn check(
        &self,
        decision: &DecisionRecord,
        profile: &ThresholdProfile,
        initial_depth: DetectorDepth,
        max_passes: u32,
    ) -> PrincipleReport {
        let max_passes = max_passes.max(1);
        let mut depth = initial_depth;
        let mut passes = 0;
        let mut converged = false;
        let mut assessments = Vec::new();

        while passes < max_passes {
            passes += 1;
            let next: Vec<PrincipleAssessment> = Principle::ALL
                .iter()
                .map(|p| self.assess(*p, decision, depth))
                .collect();

            let borderline = next
                .iter()
                .filter(|a| a.status == PrincipleStatus::Borderline)
                .count();

            if passes > 1 && next == assessments {
                converged = true;
                assessments = next;
                break;
            }
            assessments = next;

            // Only an unusual borderline pile-up warrants a deeper pass
            if borderline <= profile.borderline_limit {
                converged = true;
                break;
            }
            depth = DetectorDepth::Deep;
        }

        let findings = self.findings_from(&assessments, profile);
        let confidence = assessments
            .iter()
            .map(|a| a.score)
            .fold(f64::INFINITY, f64::min)
            .clamp(0.0, 1.0);

        PrincipleReport {
            assessments,
            passes,
            converged,
            findings,
            confidence,
        }
    }

    /// Assess a single principle at the given depth.
    fn assess(
        &self,
        principle: Principle,
        decision: &DecisionRecord,
        depth: DetectorDepth,
    ) -> PrincipleAssessment {
        let mut notes = Vec::new();

        for detector in detectors_for(principle) {
            if detector.deep_only && depth == DetectorDepth::Standard {
                continue;
            }
            if let Some(m) = detector.pattern.find(&decision.decision_text) {
                // Harm language alone is borderline; against a declared
                // vulnerable stakeholder it is a violation.
                let violation = detector.violation
                    || (detector.code == "harm_language"
                        && decision.context.has_vulnerable_stakeholder());

                let severity = if violation {
                    Severity::Critical
                } else {
                    Severity::Warning
                };
                notes.push(ViolationNote {
                    detector: detector.code.to_string(),
                    severity,
                    description: detector.description.to_string(),
                    evidence: vec![Evidence::from_text(
                        detector.description,
                        m.start(),
                        m.end(),
                    )],
                });
            }
        }

        self.structural_notes(principle, decision, &mut notes);

        let violations = notes
            .iter()
            .filter(|n| n.severity == Severity::Critical)
            .count();
        let borderlines = notes.len() - violations;

        let (status, score) = if violations > 0 {
            (
                PrincipleStatus::Violation,
                (0.3 - 0.1 * (violations as f64 - 1.0)).max(0.0),
            )
        } else if borderlines > 0 {
            (
                PrincipleStatus::Borderline,
                (1.0 - 0.2 * borderlines as f64).max(0.4),
            )
        } else {
            (PrincipleStatus::Compliant, 1.0)
        };

        let rationale = match status {
            PrincipleStatus::Compliant => format!(
                "{}: no detector matched (weight {:.2})",
                principle,
                decision.weight_of(principle)
            ),
            PrincipleStatus::Borderline => format!(
                "{}: borderline, {} (weight {:.2})",
                principle,
                notes
                    .iter()
                    .map(|n| n.detector.as_str())
                    .collect::<Vec<_>>()
                    .join(", "),
                decision.weight_of(principle)
            ),
            PrincipleStatus::Violation => format!(
                "{}: violated, {} (weight {:.2})",
                principle,
                notes
                    .iter()
                    .filter(|n| n.severity == Severity::Critical)
                    .map(|n| n.description.as_str())
                    .collect::<Vec<_>>()
                    .join("; "),
                decision.weight_of(principle)
            ),
        };

        PrincipleAssessment {
            principle,
            status,
            score,
            violations: notes,
            rationale,
        }
    }

    /// Checks over declared context flags rather than text.
    fn structural_notes(
        &self,
        principle: Principle,
        decision: &DecisionRecord,
        notes: &mut Vec<ViolationNote>,
    ) {
        let context = &decision.context;
        match principle {
            Principle::Integrity => {
                if context.flag("store_private_data") == Some(true)
                    && context.flag("user_consent") == Some(false)
                {
                    notes.push(ViolationNote {
                        detector: "consent_bypass".into(),
                        severity: Severity::Critical,
                        description: "private data retained without user consent".into(),
                        evidence: vec![
                            Evidence::from_context(
                                "private data stored",
                                "flags.store_private_data",
                            ),
                            Evidence::from_context("consent absent", "flags.user_consent"),
                        ],
                    });
                }
            }
            Principle::Governance => {
                if context.flag("human_override") == Some(false) {
                    notes.push(ViolationNote {
                        detector: "uncontrollable_path".into(),
                        severity: Severity::Critical,
                        description: "decision path declares no human override".into(),
                        evidence: vec![Evidence::from_context(
                            "override disabled",
                            "flags.human_override",
                        )],
                    });
                }
            }
            Principle::Learning => {
                if context.flag("feedback_loop") == Some(false) {
                    notes.push(ViolationNote {
                        detector: "feedback_disabled".into(),
                        severity: Severity::Warning,
                        description: "outcome feedback explicitly disabled".into(),
                        evidence: vec![Evidence::from_context(
                            "feedback disabled",
                            "flags.feedback_loop",
                        )],
                    });
                }
            }
            _ => {}
        }
    }

    fn findings_from(
        &self,
        assessments: &[PrincipleAssessment],
        profile: &ThresholdProfile,
    ) -> Vec<Finding> {
        let mut findings = Vec::new();

        for assessment in assessments {
            if assessment.status == PrincipleStatus::Violation {
                let mut finding = Finding::new(
                    CheckerKind::Principles,
                    format!("principle_violation_{}", assessment.principle),
                    Severity::Critical,
                    assessment.rationale.clone(),
                );
                for note in assessment
                    .violations
                    .iter()
                    .filter(|n| n.severity == Severity::Critical)
                {
                    for evidence in &note.evidence {
                        finding = finding.with_evidence(evidence.clone());
                    }
                }
                findings.push(finding);
            }
        }

        let borderline: Vec<&PrincipleAssessment> = assessments
            .iter()
            .filter(|a| a.status == PrincipleStatus::Borderline)
            .collect();
        if borderline.len() > profile.borderline_limit {
            findings.push(Finding::new(
                CheckerKind::Principles,
                "borderline_principles",
                Severity::Warning,
                format!(
                    "{} principles borderline (limit {}): {}",
                    borderline.len(),
                    profile.borderline_limit,
                    borderline
                        .iter()
                        .map(|a| a.principle.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
            ));
        }

        findings
    }
}

impl Default for PrincipleValidator {
    fn default() -> Self {
        Self::new()
    }
}
