//! Harm and risk scoring.
//!
//! Produces a composite harm score on a 0..10 scale from per-category
//! signals (declared context flags plus text lexicons), amplified by the
//! declared consequence scope, then evaluates the profile's risk rules and
//! adjusts the decision's self-reported confidence for the conditions the
//! profile considers aggravating. All thresholds come from the active
//! profile; the scorer itself holds no tunables.

use std::collections::BTreeMap;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::decision::{DecisionRecord, ImpactBreadth};
use crate::profile::ThresholdProfile;
use crate::types::{CheckerKind, Evidence, Finding, Severity, ViolationSeverity};

/// The five harm categories the composite score is built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HarmCategory {
    Physical,
    Psychological,
    Social,
    Economic,
    Systemic,
}

impl HarmCategory {
    pub const ALL: [HarmCategory; 5] = [
        HarmCategory::Physical,
        HarmCategory::Psychological,
        HarmCategory::Social,
        HarmCategory::Economic,
        HarmCategory::Systemic,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            HarmCategory::Physical => "physical",
            HarmCategory::Psychological => "psychological",
            HarmCategory::Social => "social",
            HarmCategory::Economic => "economic",
            HarmCategory::Systemic => "systemic",
        }
    }
}

impl std::fmt::Display for HarmCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One matched risk rule from the profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleViolation {
    pub rule_id: String,
    pub severity: ViolationSeverity,
    pub description: String,
    pub evidence: Evidence,
}

/// Result of the risk check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    /// Composite harm score in [0, 10]
    pub harm_score: f64,

    /// Raw per-category scores in [0, 10], before weighting
    pub category_scores: BTreeMap<HarmCategory, f64>,

    /// Amplifiers applied on top of the weighted category blend
    pub amplifiers: Vec<String>,

    pub rule_violations: Vec<RuleViolation>,

    /// The decision's confidence after profile adjustments, in [0, 1]
    pub adjusted_confidence: f64,

    pub findings: Vec<Finding>,

    /// Confidence contribution of this checker
    pub confidence: f64,
}

struct HarmLexicon {
    category: HarmCategory,
    /// Context flag that declares this harm outright (scores 6.0)
    flag: &'static str,
    pattern: Regex,
}

lazy_static! {
    static ref HARM_LEXICONS: Vec<HarmLexicon> = vec![
        HarmLexicon {
            category: HarmCategory::Physical,
            flag: "physical_risk",
            pattern: Regex::new(
                r"(?i)\b(injur\w+|physical(ly)? (harm|danger)|bodily|overdose|toxic\w*|unsafe dosage)\b"
            )
            .unwrap(),
        },
        HarmLexicon {
            category: HarmCategory::Psychological,
            flag: "psychological_risk",
            pattern: Regex::new(
                r"(?i)\b(distress|anxiety|trauma\w*|humiliat\w+|intimidat\w+|psychological (harm|pressure))\b"
            )
            .unwrap(),
        },
        HarmLexicon {
            category: HarmCategory::Social,
            flag: "social_risk",
            pattern: Regex::new(
                r"(?i)\b(exclu(de|des|ding|sion)|stigmatiz\w+|discriminat\w+|reputation(al)? (harm|damage)|ostraciz\w+)\b"
            )
            .unwrap(),
        },
        HarmLexicon {
            category: HarmCategory::Economic,
            flag: "economic_risk",
            pattern: Regex::new(
                r"(?i)\b(financial (loss|harm|ruin)|bankrupt\w*|unaffordable|wage (cut|loss)|foreclos\w+)\b"
            )
            .unwrap(),
        },
        HarmLexicon {
            category: HarmCategory::Systemic,
            flag: "systemic_risk",
            pattern: Regex::new(
                r"(?i)\b(systemic|infrastructure(-| )wide|cascad\w+ failure|widespread (harm|disruption)|destabiliz\w+)\b"
            )
            .unwrap(),
        },
    ];
}

/// The risk scorer. Stateless and deterministic.
pub struct RiskScorer;

impl RiskScorer {
    pub fn new() -> Self {
        Self
    }

    pub fn check(&self, decision: &DecisionRecord, profile: &ThresholdProfile) -> RiskAssessment {
        let (category_scores, mut amplifiers) = self.score_categories(decision);
        let weighted = self.weighted_blend(&category_scores, profile);
        let harm_score = self.amplify(weighted, decision, &mut amplifiers);

        let rule_violations = self.evaluate_rules(decision, profile);
        let adjusted_confidence = self.adjust_confidence(decision, profile, harm_score);

        let findings = self.findings_from(
            harm_score,
            adjusted_confidence,
            &rule_violations,
            profile,
        );

        RiskAssessment {
            harm_score,
            category_scores,
            amplifiers,
            rule_violations,
            adjusted_confidence,
            findings,
            confidence: adjusted_confidence,
        }
    }

    /// The composite harm score alone, for callers that need the estimate
    /// without rule evaluation or findings.
    pub fn harm_estimate(&self, decision: &DecisionRecord, profile: &ThresholdProfile) -> f64 {
        let (category_scores, mut amplifiers) = self.score_categories(decision);
        let weighted = self.weighted_blend(&category_scores, profile);
        self.amplify(weighted, decision, &mut amplifiers)
    }

    /// Raw per-category score: a declared flag counts 6.0, a text match
    /// 3.0, both stack, capped at 10.
    fn score_categories(
        &self,
        decision: &DecisionRecord,
    ) -> (BTreeMap<HarmCategory, f64>, Vec<String>) {
        let mut scores = BTreeMap::new();
        let mut amplifiers = Vec::new();

        for lexicon in HARM_LEXICONS.iter() {
            let mut score: f64 = 0.0;
            if decision.context.flag(lexicon.flag) == Some(true) {
                score += 6.0;
                amplifiers.push(format!("declared flag {}", lexicon.flag));
            }
            if lexicon.pattern.is_match(&decision.decision_text) {
                score += 3.0;
            }
            scores.insert(lexicon.category, score.min(10.0));
        }

        (scores, amplifiers)
    }

    fn weighted_blend(
        &self,
        scores: &BTreeMap<HarmCategory, f64>,
        profile: &ThresholdProfile,
    ) -> f64 {
        let w = &profile.harm_weights;
        let blended = scores.iter().fold(0.0, |acc, (category, score)| {
            let weight = match category {
                HarmCategory::Physical => w.physical,
                HarmCategory::Psychological => w.psychological,
                HarmCategory::Social => w.social,
                HarmCategory::Economic => w.economic,
                HarmCategory::Systemic => w.systemic,
            };
            acc + weight * score
        });
        blended / w.total()
    }

    /// Scope amplifiers stack additively and the result stays in [0, 10].
    fn amplify(
        &self,
        base: f64,
        decision: &DecisionRecord,
        amplifiers: &mut Vec<String>,
    ) -> f64 {
        let mut score = base;
        let context = &decision.context;

        if context.has_vulnerable_stakeholder() {
            score += 1.5;
            amplifiers.push("vulnerable stakeholder group".into());
        }
        if context.is_irreversible() {
            score += 1.5;
            amplifiers.push("irreversible consequence".into());
        }
        match context.consequence_scope.as_ref().map(|s| s.breadth) {
            Some(ImpactBreadth::Systemic) => {
                score += 1.0;
                amplifiers.push("systemic impact breadth".into());
            }
            Some(ImpactBreadth::Group) => {
                score += 0.5;
                amplifiers.push("group impact breadth".into());
            }
            _ => {}
        }

        score.clamp(0.0, 10.0)
    }

    fn evaluate_rules(
        &self,
        decision: &DecisionRecord,
        profile: &ThresholdProfile,
    ) -> Vec<RuleViolation> {
        let mut violations = Vec::new();
        for rule in &profile.risk_rules {
            // Profile validation compiled these already; a pattern that
            // fails here is treated as non-matching.
            let Ok(pattern) = Regex::new(&rule.pattern) else {
                continue;
            };
            if let Some(m) = pattern.find(&decision.decision_text) {
                violations.push(RuleViolation {
                    rule_id: rule.id.clone(),
                    severity: rule.severity,
                    description: rule.description.clone(),
                    evidence: Evidence::from_text(rule.description.clone(), m.start(), m.end()),
                });
            }
        }
        violations
    }

    fn adjust_confidence(
        &self,
        decision: &DecisionRecord,
        profile: &ThresholdProfile,
        harm_score: f64,
    ) -> f64 {
        let mut adjusted = decision.confidence;
        let context = &decision.context;

        if context
            .domain
            .as_deref()
            .is_some_and(|d| profile.is_high_stakes(d))
        {
            adjusted -= 0.1;
        }
        if context.is_irreversible() {
            adjusted -= 0.1;
        }
        if harm_score > 5.0 {
            adjusted -= 0.05;
        }
        if harm_score < 2.0 && !context.is_irreversible() {
            adjusted += 0.05;
        }

        adjusted.clamp(0.0, 1.0)
    }

    fn findings_from(
        &self,
        harm_score: f64,
        adjusted_confidence: f64,
        violations: &[RuleViolation],
        profile: &ThresholdProfile,
    ) -> Vec<Finding> {
        let mut findings = Vec::new();

        if harm_score > profile.max_harm_score {
            findings.push(
                Finding::new(
                    CheckerKind::Risk,
                    "harm_threshold_exceeded",
                    Severity::Critical,
                    format!(
                        "harm score {:.1} exceeds maximum {:.1}",
                        harm_score, profile.max_harm_score
                    ),
                )
                .with_evidence(Evidence::from_profile(
                    "maximum harm score",
                    "max_harm_score",
                )),
            );
        }

        if adjusted_confidence < profile.min_confidence_level {
            findings.push(
                Finding::new(
                    CheckerKind::Risk,
                    "low_confidence",
                    Severity::Critical,
                    format!(
                        "adjusted confidence {:.2} below minimum {:.2}",
                        adjusted_confidence, profile.min_confidence_level
                    ),
                )
                .with_evidence(Evidence::from_profile(
                    "minimum confidence level",
                    "min_confidence_level",
                )),
            );
        }

        for violation in violations {
            let (code, severity) = match violation.severity {
                ViolationSeverity::Critical => ("critical_rule_violation", Severity::Critical),
                ViolationSeverity::Major => ("rule_violation", Severity::Warning),
                ViolationSeverity::Minor => ("rule_violation", Severity::Info),
            };
            findings.push(
                Finding::new(
                    CheckerKind::Risk,
                    code,
                    severity,
                    format!("rule {}: {}", violation.rule_id, violation.description),
                )
                .with_evidence(violation.evidence.clone()),
            );
        }

        findings
    }
}

impl Default for RiskScorer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::{ConsequenceScope, Stakeholder};
    use chrono::Utc;

    fn decision(text: &str, confidence: f64) -> DecisionRecord {
        DecisionRecord {
            id: "risk-test".into(),
            timestamp: Utc::now(),
            decision_text: text.into(),
            confidence,
            principle_weights: Default::default(),
            modules_triggered: vec![],
            context: Default::default(),
        }
    }

    fn check(decision: &DecisionRecord) -> RiskAssessment {
        RiskScorer::new().check(decision, &ThresholdProfile::standard())
    }

    #[test]
    fn test_benign_decision_scores_low() {
        let assessment = check(&decision("Send the monthly status report to the team.", 0.9));
        assert_eq!(assessment.harm_score, 0.0);
        assert!(assessment.rule_violations.is_empty());
        assert!(assessment.findings.is_empty());
        // Low harm, reversible: small confidence bonus
        assert!((assessment.adjusted_confidence - 0.95).abs() < 1e-9);
    }

    #[test]
    fn test_declared_flag_outweighs_text_match() {
        let mut with_flag = decision("Roll out the update.", 0.9);
        with_flag
            .context
            .flags
            .insert("physical_risk".into(), serde_json::json!(true));
        let flagged = check(&with_flag);

        let text_only = check(&decision("This may cause injury to operators.", 0.9));

        let flag_score = flagged.category_scores[&HarmCategory::Physical];
        let text_score = text_only.category_scores[&HarmCategory::Physical];
        assert_eq!(flag_score, 6.0);
        assert_eq!(text_score, 3.0);
    }

    #[test]
    fn test_amplifiers_stack_and_cap() {
        let mut d = decision(
            "A cascading failure could cause widespread disruption and injury.",
            0.9,
        );
        d.context.stakeholders.push(Stakeholder {
            group: "patients".into(),
            vulnerable: true,
        });
        d.context.consequence_scope = Some(ConsequenceScope {
            breadth: ImpactBreadth::Systemic,
            reversible: false,
            description: None,
        });
        for flag in ["physical_risk", "systemic_risk", "social_risk"] {
            d.context.flags.insert(flag.into(), serde_json::json!(true));
        }

        let assessment = check(&d);
        assert!(assessment.harm_score > ThresholdProfile::standard().max_harm_score);
        assert!(assessment.harm_score <= 10.0);
        assert!(assessment.amplifiers.iter().any(|a| a.contains("vulnerable")));
        assert!(assessment
            .findings
            .iter()
            .any(|f| f.code == "harm_threshold_exceeded" && f.severity == Severity::Critical));
    }

    #[test]
    fn test_high_stakes_domain_lowers_confidence() {
        let mut d = decision("Adjust the treatment plan.", 0.65);
        d.context.domain = Some("medical".into());
        d.context.consequence_scope = Some(ConsequenceScope {
            breadth: ImpactBreadth::Individual,
            reversible: false,
            description: None,
        });

        let assessment = check(&d);
        // 0.65 - 0.1 high stakes - 0.1 irreversible = 0.45
        assert!((assessment.adjusted_confidence - 0.45).abs() < 1e-9);
        assert!(assessment
            .findings
            .iter()
            .any(|f| f.code == "low_confidence" && f.severity == Severity::Critical));
    }

    #[test]
    fn test_default_rules_match() {
        let assessment = check(&decision(
            "Sell user data to the advertising partner without consent.",
            0.9,
        ));
        assert!(assessment
            .rule_violations
            .iter()
            .any(|v| v.severity == ViolationSeverity::Critical));
        assert!(assessment
            .findings
            .iter()
            .any(|f| f.code == "critical_rule_violation"));
    }

    #[test]
    fn test_minor_rule_violation_is_info() {
        let assessment = check(&decision(
            "Pressure the customer to accept before the offer expires.",
            0.9,
        ));
        let minor: Vec<_> = assessment
            .rule_violations
            .iter()
            .filter(|v| v.severity == ViolationSeverity::Minor)
            .collect();
        assert!(!minor.is_empty());
        assert!(assessment
            .findings
            .iter()
            .any(|f| f.code == "rule_violation" && f.severity == Severity::Info));
    }

    #[test]
    fn test_harm_estimate_matches_full_check() {
        let mut d = decision("This may cause injury to operators.", 0.9);
        d.context.consequence_scope = Some(ConsequenceScope {
            breadth: ImpactBreadth::Group,
            reversible: false,
            description: None,
        });
        let scorer = RiskScorer::new();
        let profile = ThresholdProfile::standard();
        assert_eq!(
            scorer.harm_estimate(&d, &profile),
            scorer.check(&d, &profile).harm_score
        );
    }

    #[test]
    fn test_deterministic() {
        let d = decision("This may cause financial loss for affected users.", 0.8);
        assert_eq!(check(&d), check(&d));
    }
}
