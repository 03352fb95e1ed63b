//! Context completeness checking.
//!
//! Scores whether a decision's declared context covers the required
//! categories (stakeholders, environment, ethical dimensions, consequence
//! scope) as a weighted ratio, and reports what is missing.

use serde::{Deserialize, Serialize};

use crate::decision::DecisionRecord;
use crate::profile::ThresholdProfile;
use crate::types::{CheckerKind, Evidence, Finding, Severity};

/// Result of the completeness check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextReport {
    /// Weighted completeness ratio in [0, 1]
    pub score: f64,

    /// Names of the required categories that are absent or empty
    pub missing_elements: Vec<String>,

    pub findings: Vec<Finding>,

    /// Confidence contribution of this checker (equal to the score)
    pub confidence: f64,
}

/// The context completeness checker. Stateless.
pub struct ContextChecker;

impl ContextChecker {
    pub fn new() -> Self {
        Self
    }

    /// Score the decision's context against the profile's category weights.
    pub fn check(&self, decision: &DecisionRecord, profile: &ThresholdProfile) -> ContextReport {
        let context = &decision.context;
        let weights = &profile.context_weights;

        let mut covered = 0.0;
        let mut missing = Vec::new();

        if context.stakeholders.is_empty() {
            missing.push("stakeholders".to_string());
        } else {
            covered += weights.stakeholders;
        }

        if context.environment.as_deref().map_or(true, str::is_empty) {
            missing.push("environment".to_string());
        } else {
            covered += weights.environment;
        }

        if context.ethical_dimensions.is_empty() {
            missing.push("ethical_dimensions".to_string());
        } else {
            covered += weights.ethical_dimensions;
        }

        if context.consequence_scope.is_none() {
            missing.push("consequence_scope".to_string());
        } else {
            covered += weights.consequence_scope;
        }

        let score = covered / weights.total();

        let mut findings = Vec::new();
        if score < profile.context_critical_threshold {
            let mut finding = Finding::new(
                CheckerKind::ContextCompleteness,
                "incomplete_context",
                Severity::Critical,
                format!(
                    "context completeness {:.2} below critical threshold {:.2}; missing: {}",
                    score,
                    profile.context_critical_threshold,
                    missing.join(", ")
                ),
            );
            for element in &missing {
                finding = finding
                    .with_evidence(Evidence::from_context("required category absent", element));
            }
            findings.push(finding);
        } else if score < profile.context_completeness_threshold {
            findings.push(Finding::new(
                CheckerKind::ContextCompleteness,
                "thin_context",
                Severity::Warning,
                format!(
                    "context completeness {:.2} below threshold {:.2}; missing: {}",
                    score,
                    profile.context_completeness_threshold,
                    missing.join(", ")
                ),
            ));
        }

        ContextReport {
            score,
            missing_elements: missing,
            findings,
            confidence: score,
        }
    }
}

impl Default for ContextChecker {
    fn default() -> Self {
        Self::new()
    }
}
