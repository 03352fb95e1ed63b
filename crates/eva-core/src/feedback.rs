//! Feedback signals.
//!
//! After a session is audited, the emitter turns its outcome plus recent
//! corpus trends into typed signals for the upstream decision system.
//! Signals are advice, never commands: nothing here mutates a profile or a
//! plan, and emission failures can never affect a verdict.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::audit::AuditRecord;
use crate::decision::Principle;
use crate::router::EscalationDecision;
use crate::types::{CheckerKind, FeedbackSummary, Finding, Severity};

/// Who a signal is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalTarget {
    /// The decision system's principle weighting layer
    PrincipleWeighting,
    /// The decision system's module orchestration layer
    ModuleOrchestration,
    /// Human governance and oversight
    Governance,
}

impl SignalTarget {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalTarget::PrincipleWeighting => "principle_weighting",
            SignalTarget::ModuleOrchestration => "module_orchestration",
            SignalTarget::Governance => "governance",
        }
    }
}

/// How urgently a signal's consumer should act on it. Ordered, so
/// consumers can sort or cut off below a bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalPriority {
    Low,
    Medium,
    High,
}

/// One emitted signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackSignal {
    pub target: SignalTarget,

    pub priority: SignalPriority,

    /// Stable machine-readable code
    pub code: String,

    pub detail: String,
}

/// Rolling statistics over the most recent audited cases.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedbackWindow {
    pub cases: usize,
    pub principle_violation_counts: BTreeMap<Principle, usize>,
    pub checker_critical_counts: BTreeMap<CheckerKind, usize>,
}

impl FeedbackWindow {
    /// Fold one audited case into the window.
    pub fn observe(&mut self, record: &AuditRecord) {
        self.cases += 1;
        for finding in &record.content.findings {
            if finding.severity != Severity::Critical {
                continue;
            }
            *self.checker_critical_counts.entry(finding.checker).or_default() += 1;
            if let Some(principle) = violated_principle(finding) {
                *self.principle_violation_counts.entry(principle).or_default() += 1;
            }
        }
    }

    fn violation_rate(&self, principle: Principle) -> f64 {
        if self.cases == 0 {
            return 0.0;
        }
        *self.principle_violation_counts.get(&principle).unwrap_or(&0) as f64 / self.cases as f64
    }

    fn critical_rate(&self, checker: CheckerKind) -> f64 {
        if self.cases == 0 {
            return 0.0;
        }
        *self.checker_critical_counts.get(&checker).unwrap_or(&0) as f64 / self.cases as f64
    }
}

fn violated_principle(finding: &Finding) -> Option<Principle> {
    let name = finding.code.strip_prefix("principle_violation_")?;
    Principle::ALL.into_iter().find(|p| p.as_str() == name)
}

/// Recurring-violation rate above which a weighting signal is raised.
const VIOLATION_RATE_THRESHOLD: f64 = 0.1;

/// Critical-rate above which a checker's pairing with upstream modules is
/// flagged for orchestration review.
const CHECKER_RATE_THRESHOLD: f64 = 0.25;

/// The feedback emitter. Pure over its window argument.
pub struct FeedbackEmitter;

impl FeedbackEmitter {
    pub fn new() -> Self {
        Self
    }

    pub fn emit(
        &self,
        findings: &[Finding],
        escalation: &EscalationDecision,
        validation_confidence: f64,
        window: &FeedbackWindow,
    ) -> Vec<FeedbackSignal> {
        let mut signals = Vec::new();

        // Principles violated now that also recur across the window
        for finding in findings {
            let Some(principle) = violated_principle(finding) else {
                continue;
            };
            let rate = window.violation_rate(principle);
            if rate > VIOLATION_RATE_THRESHOLD {
                signals.push(FeedbackSignal {
                    target: SignalTarget::PrincipleWeighting,
                    priority: SignalPriority::High,
                    code: format!("recurring_violation_{}", principle),
                    detail: format!(
                        "{} violated in {:.0}% of recent cases; consider raising its weight",
                        principle,
                        rate * 100.0
                    ),
                });
            }
        }

        // Checkers that keep producing criticals point at upstream modules
        for checker in [
            CheckerKind::ContextCompleteness,
            CheckerKind::Principles,
            CheckerKind::Risk,
            CheckerKind::Consistency,
        ] {
            let rate = window.critical_rate(checker);
            if rate > CHECKER_RATE_THRESHOLD
                && findings
                    .iter()
                    .any(|f| f.checker == checker && f.severity == Severity::Critical)
            {
                signals.push(FeedbackSignal {
                    target: SignalTarget::ModuleOrchestration,
                    priority: SignalPriority::Medium,
                    code: format!("recurring_critical_{}", checker),
                    detail: format!(
                        "{} critical in {:.0}% of recent cases; review the modules feeding it",
                        checker,
                        rate * 100.0
                    ),
                });
            }
        }

        // Governance always receives the trend sample
        signals.push(FeedbackSignal {
            target: SignalTarget::Governance,
            priority: SignalPriority::Low,
            code: "trend_sample".into(),
            detail: format!(
                "level={} verdict={} confidence={:.2}",
                escalation.level, escalation.verdict, validation_confidence
            ),
        });

        signals
    }

    /// Condensed form for the caller-facing output.
    pub fn summarize(signals: &[FeedbackSignal]) -> FeedbackSummary {
        let mut targets: Vec<String> = signals
            .iter()
            .map(|s| s.target.as_str().to_string())
            .collect();
        targets.sort();
        targets.dedup();
        FeedbackSummary {
            signal_count: signals.len(),
            targets,
        }
    }
}

impl Default for FeedbackEmitter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::ThresholdProfile;
    use crate::router::EscalationRouter;

    fn escalation(findings: &[Finding]) -> EscalationDecision {
        EscalationRouter::new().route(findings, &ThresholdProfile::standard())
    }

    fn violation(principle: Principle) -> Finding {
        Finding::new(
            CheckerKind::Principles,
            format!("principle_violation_{}", principle),
            Severity::Critical,
            "violated",
        )
    }

    fn window(cases: usize, integrity_violations: usize) -> FeedbackWindow {
        let mut window = FeedbackWindow {
            cases,
            ..Default::default()
        };
        window
            .principle_violation_counts
            .insert(Principle::Integrity, integrity_violations);
        window
            .checker_critical_counts
            .insert(CheckerKind::Principles, integrity_violations);
        window
    }

    #[test]
    fn test_clean_session_emits_trend_sample_only() {
        let signals = FeedbackEmitter::new().emit(
            &[],
            &escalation(&[]),
            0.95,
            &FeedbackWindow::default(),
        );
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].target, SignalTarget::Governance);
        assert_eq!(signals[0].code, "trend_sample");
        assert_eq!(signals[0].priority, SignalPriority::Low);
    }

    #[test]
    fn test_recurring_violation_raises_weighting_signal() {
        let findings = vec![violation(Principle::Integrity)];
        let signals = FeedbackEmitter::new().emit(
            &findings,
            &escalation(&findings),
            0.3,
            &window(20, 4),
        );
        assert!(signals.iter().any(|s| {
            s.target == SignalTarget::PrincipleWeighting
                && s.code == "recurring_violation_integrity"
                && s.priority == SignalPriority::High
        }));
    }

    #[test]
    fn test_rare_violation_stays_quiet() {
        let findings = vec![violation(Principle::Integrity)];
        let signals = FeedbackEmitter::new().emit(
            &findings,
            &escalation(&findings),
            0.3,
            &window(50, 2),
        );
        assert!(!signals
            .iter()
            .any(|s| s.target == SignalTarget::PrincipleWeighting));
    }

    #[test]
    fn test_hot_checker_raises_orchestration_signal() {
        let findings = vec![violation(Principle::Governance)];
        let signals = FeedbackEmitter::new().emit(
            &findings,
            &escalation(&findings),
            0.3,
            &window(10, 4),
        );
        assert!(signals.iter().any(|s| {
            s.target == SignalTarget::ModuleOrchestration
                && s.code == "recurring_critical_principles"
                && s.priority == SignalPriority::Medium
        }));
    }

    #[test]
    fn test_window_observe_counts_criticals() {
        use crate::audit::{AuditContent, AuditRecord};
        use crate::decision::DecisionRecord;
        use crate::types::ValidationStatus;
        use chrono::Utc;
        use uuid::Uuid;

        let findings = vec![violation(Principle::Nurturing)];
        let record = AuditRecord::seal(AuditContent {
            session_id: Uuid::new_v4(),
            recorded_at: Utc::now(),
            decision: DecisionRecord {
                id: "w".into(),
                timestamp: Utc::now(),
                decision_text: "t".into(),
                confidence: 0.5,
                principle_weights: Default::default(),
                modules_triggered: vec![],
                context: Default::default(),
            },
            profile_name: "standard".into(),
            profile_version: 1,
            plan_version: 1,
            status: ValidationStatus::Escalated,
            validation_confidence: 0.2,
            harm_score: 6.0,
            findings: findings.clone(),
            escalation: escalation(&findings),
            consistency: None,
            prev_hash: None,
            supersedes: None,
        })
        .unwrap();

        let mut window = FeedbackWindow::default();
        window.observe(&record);
        assert_eq!(window.cases, 1);
        assert_eq!(
            window.principle_violation_counts[&Principle::Nurturing],
            1
        );
    }

    #[test]
    fn test_summary_deduplicates_targets() {
        let signals = vec![
            FeedbackSignal {
                target: SignalTarget::Governance,
                priority: SignalPriority::Low,
                code: "trend_sample".into(),
                detail: String::new(),
            },
            FeedbackSignal {
                target: SignalTarget::PrincipleWeighting,
                priority: SignalPriority::High,
                code: "a".into(),
                detail: String::new(),
            },
            FeedbackSignal {
                target: SignalTarget::PrincipleWeighting,
                priority: SignalPriority::High,
                code: "b".into(),
                detail: String::new(),
            },
        ];
        let summary = FeedbackEmitter::summarize(&signals);
        assert_eq!(summary.signal_count, 3);
        assert_eq!(summary.targets, vec!["governance", "principle_weighting"]);
    }
}
