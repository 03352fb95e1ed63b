//! Escalation routing.
//!
//! Maps the combined checker findings to an escalation level, an execution
//! verdict and a notification plan. Pure and monotonic: adding a finding
//! can only raise the level, never lower it, and the highest-severity
//! finding alone decides the outcome class.

use serde::{Deserialize, Serialize};

use crate::profile::ThresholdProfile;
use crate::types::{EscalationLevel, EscalationSummary, Finding, Severity, Verdict};

/// When a human looks at the case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewDisposition {
    /// No review needed
    NotRequired,
    /// Queued for periodic review; execution proceeds under monitoring
    Scheduled,
    /// Blocking review before the decision may execute
    Immediate,
}

/// How the escalation is delivered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationPlan {
    pub level: EscalationLevel,

    /// Whether delivery must be acknowledged by a recipient
    pub requires_ack: bool,

    /// One-line summary for the notification body
    pub summary: String,
}

/// The routed outcome of one validation session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationDecision {
    pub level: EscalationLevel,
    pub verdict: Verdict,

    /// Triggering findings, highest severity first
    pub triggers: Vec<Finding>,

    pub review: ReviewDisposition,

    /// Absent when nothing needs delivering
    pub notification: Option<NotificationPlan>,
}

impl EscalationDecision {
    pub fn requires_human_review(&self) -> bool {
        self.review != ReviewDisposition::NotRequired
    }

    /// Condensed form for the caller-facing output.
    pub fn summary(&self) -> EscalationSummary {
        EscalationSummary {
            level: self.level,
            verdict: self.verdict,
            triggers: self
                .triggers
                .iter()
                .map(|f| format!("{} {}/{}: {}", f.severity, f.checker, f.code, f.message))
                .collect(),
            requires_human_review: self.requires_human_review(),
        }
    }
}

/// The escalation router.
pub struct EscalationRouter;

impl EscalationRouter {
    pub fn new() -> Self {
        Self
    }

    /// Route the combined findings. The profile is consulted for the
    /// warning accumulation policy only; severity precedence is fixed.
    pub fn route(&self, findings: &[Finding], profile: &ThresholdProfile) -> EscalationDecision {
        let mut triggers: Vec<Finding> = findings.to_vec();
        triggers.sort_by(|a, b| {
            b.severity
                .cmp(&a.severity)
                .then_with(|| a.checker.cmp(&b.checker))
                .then_with(|| a.code.cmp(&b.code))
        });

        let criticals = count_at(&triggers, Severity::Critical);
        let warnings = count_at(&triggers, Severity::Warning);

        if criticals > 0 {
            let summary = format!(
                "{} critical finding(s); highest: {}",
                criticals, triggers[0].message
            );
            return EscalationDecision {
                level: EscalationLevel::Critical,
                verdict: Verdict::Blocked,
                triggers,
                review: ReviewDisposition::Immediate,
                notification: Some(NotificationPlan {
                    level: EscalationLevel::Critical,
                    requires_ack: true,
                    summary,
                }),
            };
        }

        if warnings > 0 {
            // Warnings alone never block; stacking past the profile limit
            // tightens delivery, not the verdict
            let stacked = warnings > profile.borderline_limit;
            let level = EscalationLevel::Warning;
            let summary = format!("{} warning finding(s): {}", warnings, triggers[0].message);
            return EscalationDecision {
                level,
                verdict: Verdict::AllowedWithMonitoring,
                triggers,
                review: ReviewDisposition::Scheduled,
                notification: Some(NotificationPlan {
                    level,
                    requires_ack: stacked,
                    summary,
                }),
            };
        }

        if !triggers.is_empty() {
            let summary = format!("{} informational finding(s)", triggers.len());
            return EscalationDecision {
                level: EscalationLevel::Info,
                verdict: Verdict::Allowed,
                triggers,
                review: ReviewDisposition::NotRequired,
                notification: Some(NotificationPlan {
                    level: EscalationLevel::Info,
                    requires_ack: false,
                    summary,
                }),
            };
        }

        EscalationDecision {
            level: EscalationLevel::None,
            verdict: Verdict::Allowed,
            triggers,
            review: ReviewDisposition::NotRequired,
            notification: None,
        }
    }
}

impl Default for EscalationRouter {
    fn default() -> Self {
        Self::new()
    }
}

fn count_at(findings: &[Finding], severity: Severity) -> usize {
    findings.iter().filter(|f| f.severity == severity).count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CheckerKind;

    fn finding(checker: CheckerKind, code: &str, severity: Severity) -> Finding {
        Finding::new(checker, code, severity, format!("{} raised {}", checker, code))
    }

    fn route(findings: &[Finding]) -> EscalationDecision {
        EscalationRouter::new().route(findings, &ThresholdProfile::standard())
    }

    #[test]
    fn test_no_findings_is_clean_pass() {
        let decision = route(&[]);
        assert_eq!(decision.level, EscalationLevel::None);
        assert_eq!(decision.verdict, Verdict::Allowed);
        assert!(!decision.requires_human_review());
        assert!(decision.notification.is_none());
    }

    #[test]
    fn test_any_critical_blocks() {
        let decision = route(&[
            finding(CheckerKind::ContextCompleteness, "thin_context", Severity::Warning),
            finding(CheckerKind::Risk, "harm_threshold_exceeded", Severity::Critical),
        ]);
        assert_eq!(decision.level, EscalationLevel::Critical);
        assert_eq!(decision.verdict, Verdict::Blocked);
        assert_eq!(decision.review, ReviewDisposition::Immediate);
        let notification = decision.notification.as_ref().unwrap();
        assert!(notification.requires_ack);
        // Critical finding sorts first
        assert_eq!(decision.triggers[0].code, "harm_threshold_exceeded");
    }

    #[test]
    fn test_single_warning_allows_with_monitoring() {
        let decision = route(&[finding(
            CheckerKind::Consistency,
            "significant_deviation",
            Severity::Warning,
        )]);
        assert_eq!(decision.level, EscalationLevel::Warning);
        assert_eq!(decision.verdict, Verdict::AllowedWithMonitoring);
        assert_eq!(decision.review, ReviewDisposition::Scheduled);
        assert!(!decision.notification.as_ref().unwrap().requires_ack);
    }

    #[test]
    fn test_stacked_warnings_stay_monitored() {
        // More warnings than the profile's limit demands acknowledgement
        // but still releases under monitoring
        let warnings: Vec<Finding> = [
            (CheckerKind::ContextCompleteness, "thin_context"),
            (CheckerKind::Principles, "borderline_principles"),
            (CheckerKind::Consistency, "significant_deviation"),
        ]
        .into_iter()
        .map(|(checker, code)| finding(checker, code, Severity::Warning))
        .collect();

        let decision = route(&warnings);
        assert_eq!(decision.level, EscalationLevel::Warning);
        assert_eq!(decision.verdict, Verdict::AllowedWithMonitoring);
        assert_eq!(decision.review, ReviewDisposition::Scheduled);
        assert!(decision.notification.as_ref().unwrap().requires_ack);
    }

    #[test]
    fn test_warnings_without_criticals_never_block() {
        let warnings: Vec<Finding> = (0..8)
            .map(|i| {
                finding(
                    CheckerKind::Risk,
                    &format!("rule_violation_{}", i),
                    Severity::Warning,
                )
            })
            .collect();

        let decision = route(&warnings);
        assert_ne!(decision.verdict, Verdict::Blocked);
    }

    #[test]
    fn test_info_only_allows_with_notice() {
        let decision = route(&[finding(
            CheckerKind::Consistency,
            "insufficient_history",
            Severity::Info,
        )]);
        assert_eq!(decision.level, EscalationLevel::Info);
        assert_eq!(decision.verdict, Verdict::Allowed);
        assert!(!decision.requires_human_review());
        assert!(decision.notification.is_some());
    }

    #[test]
    fn test_adding_findings_never_lowers_level() {
        let base = vec![finding(CheckerKind::Risk, "rule_violation", Severity::Warning)];
        let base_level = route(&base).level;

        for severity in [Severity::Info, Severity::Warning, Severity::Critical] {
            let mut extended = base.clone();
            extended.push(finding(CheckerKind::Principles, "extra", severity));
            assert!(route(&extended).level >= base_level);
        }
    }

    #[test]
    fn test_triggers_ordered_by_severity_then_pipeline() {
        let decision = route(&[
            finding(CheckerKind::Consistency, "insufficient_history", Severity::Info),
            finding(CheckerKind::Risk, "low_confidence", Severity::Critical),
            finding(CheckerKind::ContextCompleteness, "incomplete_context", Severity::Critical),
        ]);
        let codes: Vec<&str> = decision.triggers.iter().map(|f| f.code.as_str()).collect();
        assert_eq!(
            codes,
            vec!["incomplete_context", "low_confidence", "insufficient_history"]
        );
    }

    #[test]
    fn test_summary_lines_carry_severity_and_origin() {
        let decision = route(&[finding(
            CheckerKind::Risk,
            "harm_threshold_exceeded",
            Severity::Critical,
        )]);
        let summary = decision.summary();
        assert!(summary.triggers[0].starts_with("critical risk/"));
        assert!(summary.requires_human_review);
    }
}
