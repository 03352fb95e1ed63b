//! Historical consistency checking.
//!
//! Compares the current decision against a point-in-time snapshot of the
//! audit corpus. Similar past cases are selected by a weighted feature
//! blend (domain, stakeholder overlap, principle-weight direction,
//! structural shape), then the decision's own features are compared with
//! each similar case's recorded outcome and the deviations aggregated with
//! rank-based recency weights, newest case counting most. Everything is
//! derived from the decision and the snapshot; no other checker's output
//! enters here.
//!
//! Too few similar cases is reported as insufficient data, never as a
//! deviation: a thin corpus must not block decisions on its own.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::checkers::risk::RiskScorer;
use crate::decision::{DecisionRecord, Principle};
use crate::profile::ThresholdProfile;
use crate::types::{CheckerKind, Evidence, Finding, Severity, Verdict};

/// Compact, comparison-ready summary of one audited case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseDigest {
    /// Audit record reference
    pub reference: String,

    pub recorded_at: DateTime<Utc>,

    #[serde(default)]
    pub domain: Option<String>,

    #[serde(default)]
    pub stakeholder_groups: Vec<String>,

    #[serde(default)]
    pub principle_weights: BTreeMap<Principle, f64>,

    #[serde(default)]
    pub modules_triggered: Vec<String>,

    pub confidence: f64,

    pub harm_score: f64,

    pub verdict: Verdict,
}

impl CaseDigest {
    fn weight_of(&self, principle: Principle) -> f64 {
        self.principle_weights.get(&principle).copied().unwrap_or(1.0)
    }
}

/// A point-in-time view of the corpus. Sessions never see writes that land
/// after the snapshot is taken.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CorpusSnapshot {
    pub cases: Vec<CaseDigest>,
}

impl CorpusSnapshot {
    pub fn from_cases(cases: Vec<CaseDigest>) -> Self {
        Self { cases }
    }

    pub fn len(&self) -> usize {
        self.cases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }
}

/// One selected similar case with its computed scores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarCase {
    pub reference: String,
    pub recorded_at: DateTime<Utc>,

    /// Feature similarity in [0, 1]
    pub similarity: f64,

    /// Outcome deviation in [0, 1]
    pub deviation: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsistencyStatus {
    Consistent,
    SignificantDeviation,
    MajorDeviation,
    InsufficientData,
}

/// Result of the consistency check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsistencyResult {
    pub status: ConsistencyStatus,

    pub similar_cases: Vec<SimilarCase>,

    /// Recency-weighted mean deviation over the similar cases
    pub aggregate_deviation: f64,

    /// Largest single-case deviation
    pub max_single_deviation: f64,

    pub findings: Vec<Finding>,

    /// Confidence contribution of this checker
    pub confidence: f64,
}

/// The consistency checker. Pure over its decision and snapshot arguments.
pub struct ConsistencyChecker;

impl ConsistencyChecker {
    pub fn new() -> Self {
        Self
    }

    /// Compare the current decision against the snapshot. A pure function
    /// of `(decision, snapshot, profile)`: the harm feature is estimated
    /// from the decision itself through the risk scorer's scoring path.
    pub fn check(
        &self,
        decision: &DecisionRecord,
        snapshot: &CorpusSnapshot,
        profile: &ThresholdProfile,
    ) -> ConsistencyResult {
        let mut scored: Vec<(&CaseDigest, f64)> = snapshot
            .cases
            .iter()
            .map(|case| (case, self.similarity(decision, case)))
            .filter(|(_, similarity)| *similarity >= profile.similarity_threshold)
            .collect();

        // Newest first; reference as a deterministic tie-break
        scored.sort_by(|a, b| {
            b.0.recorded_at
                .cmp(&a.0.recorded_at)
                .then_with(|| a.0.reference.cmp(&b.0.reference))
        });
        scored.truncate(profile.max_similar_cases);

        if scored.len() < profile.minimum_similar_cases {
            let finding = Finding::new(
                CheckerKind::Consistency,
                "insufficient_history",
                Severity::Info,
                format!(
                    "{} similar cases found, {} required for a consistency verdict",
                    scored.len(),
                    profile.minimum_similar_cases
                ),
            );
            return ConsistencyResult {
                status: ConsistencyStatus::InsufficientData,
                similar_cases: scored
                    .iter()
                    .map(|(case, similarity)| SimilarCase {
                        reference: case.reference.clone(),
                        recorded_at: case.recorded_at,
                        similarity: *similarity,
                        deviation: 0.0,
                    })
                    .collect(),
                aggregate_deviation: 0.0,
                max_single_deviation: 0.0,
                findings: vec![finding],
                confidence: 0.75,
            };
        }

        let harm_estimate = RiskScorer::new().harm_estimate(decision, profile);
        let expects_block = harm_estimate > profile.max_harm_score;

        let similar_cases: Vec<SimilarCase> = scored
            .iter()
            .map(|(case, similarity)| SimilarCase {
                reference: case.reference.clone(),
                recorded_at: case.recorded_at,
                similarity: *similarity,
                deviation: self.deviation(decision, harm_estimate, expects_block, case),
            })
            .collect();

        let mut weighted_sum = 0.0;
        let mut weight_total = 0.0;
        let mut max_single = 0.0f64;
        let mut worst_reference = similar_cases[0].reference.clone();
        for (rank, case) in similar_cases.iter().enumerate() {
            let weight = 1.0 / (rank as f64 + 1.0);
            weighted_sum += weight * case.deviation;
            weight_total += weight;
            if case.deviation > max_single {
                max_single = case.deviation;
                worst_reference = case.reference.clone();
            }
        }
        let aggregate = weighted_sum / weight_total;

        let (status, findings) = if aggregate > profile.consistency_deviation_threshold
            || max_single > profile.single_case_deviation_threshold
        {
            let finding = Finding::new(
                CheckerKind::Consistency,
                "major_deviation",
                Severity::Critical,
                format!(
                    "deviation {:.2} (single-case max {:.2}) against {} similar cases",
                    aggregate,
                    max_single,
                    similar_cases.len()
                ),
            )
            .with_evidence(Evidence::from_corpus(
                "most deviant similar case",
                worst_reference,
            ))
            .with_evidence(Evidence::from_profile(
                "deviation thresholds",
                "consistency_deviation_threshold",
            ));
            (ConsistencyStatus::MajorDeviation, vec![finding])
        } else if aggregate > profile.consistency_warning_threshold {
            let finding = Finding::new(
                CheckerKind::Consistency,
                "significant_deviation",
                Severity::Warning,
                format!(
                    "deviation {:.2} above warning threshold {:.2}",
                    aggregate, profile.consistency_warning_threshold
                ),
            )
            .with_evidence(Evidence::from_corpus(
                "most deviant similar case",
                worst_reference,
            ));
            (ConsistencyStatus::SignificantDeviation, vec![finding])
        } else {
            (ConsistencyStatus::Consistent, vec![])
        };

        ConsistencyResult {
            status,
            similar_cases,
            aggregate_deviation: aggregate,
            max_single_deviation: max_single,
            findings,
            confidence: (1.0 - aggregate).clamp(0.0, 1.0),
        }
    }

    /// Weighted feature similarity in [0, 1]: domain 0.3, stakeholder
    /// overlap 0.2, principle-weight direction 0.2, structural shape 0.3.
    fn similarity(&self, decision: &DecisionRecord, case: &CaseDigest) -> f64 {
        let domain = match (decision.context.domain.as_deref(), case.domain.as_deref()) {
            (Some(a), Some(b)) if a.eq_ignore_ascii_case(b) => 1.0,
            (None, None) => 1.0,
            _ => 0.0,
        };

        let stakeholders = jaccard(
            decision
                .context
                .stakeholders
                .iter()
                .map(|s| s.group.to_lowercase()),
            case.stakeholder_groups.iter().map(|g| g.to_lowercase()),
        );

        let weights = cosine(
            &Principle::ALL.map(|p| decision.weight_of(p)),
            &Principle::ALL.map(|p| case.weight_of(p)),
        );

        let modules = jaccard(
            decision.modules_triggered.iter().cloned(),
            case.modules_triggered.iter().cloned(),
        );
        let structure = 0.5 * modules + 0.5 * (1.0 - (decision.confidence - case.confidence).abs());

        0.3 * domain + 0.2 * stakeholders + 0.2 * weights + 0.3 * structure
    }

    /// Outcome deviation in [0, 1]: confidence distance 0.4, harm distance
    /// 0.3, verdict disagreement 0.3.
    fn deviation(
        &self,
        decision: &DecisionRecord,
        harm_estimate: f64,
        expects_block: bool,
        case: &CaseDigest,
    ) -> f64 {
        let confidence_distance = (decision.confidence - case.confidence).abs();
        let harm_distance = (harm_estimate - case.harm_score).abs() / 10.0;
        let verdict_disagreement = if expects_block != (case.verdict == Verdict::Blocked) {
            1.0
        } else {
            0.0
        };

        0.4 * confidence_distance + 0.3 * harm_distance + 0.3 * verdict_disagreement
    }
}

impl Default for ConsistencyChecker {
    fn default() -> Self {
        Self::new()
    }
}

fn jaccard(
    a: impl IntoIterator<Item = String>,
    b: impl IntoIterator<Item = String>,
) -> f64 {
    let a: std::collections::BTreeSet<String> = a.into_iter().collect();
    let b: std::collections::BTreeSet<String> = b.into_iter().collect();
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let intersection = a.intersection(&b).count() as f64;
    let union = a.union(&b).count() as f64;
    intersection / union
}

fn cosine(a: &[f64; 5], b: &[f64; 5]) -> f64 {
    let dot: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f64 = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|x| x * x).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::Stakeholder;
    use chrono::Duration;

    fn decision(confidence: f64) -> DecisionRecord {
        let mut d = DecisionRecord {
            id: "cons-test".into(),
            timestamp: Utc::now(),
            decision_text: "allocate the remaining budget to team A".into(),
            confidence,
            principle_weights: Default::default(),
            modules_triggered: vec!["planner".into(), "allocator".into()],
            context: Default::default(),
        };
        d.context.domain = Some("finance".into());
        d.context.stakeholders.push(Stakeholder {
            group: "employees".into(),
            vulnerable: false,
        });
        d
    }

    fn case(reference: &str, age_minutes: i64, confidence: f64, harm: f64, verdict: Verdict) -> CaseDigest {
        CaseDigest {
            reference: reference.into(),
            recorded_at: Utc::now() - Duration::minutes(age_minutes),
            domain: Some("finance".into()),
            stakeholder_groups: vec!["employees".into()],
            principle_weights: Default::default(),
            modules_triggered: vec!["planner".into(), "allocator".into()],
            confidence,
            harm_score: harm,
            verdict,
        }
    }

    fn check(decision: &DecisionRecord, snapshot: &CorpusSnapshot) -> ConsistencyResult {
        ConsistencyChecker::new().check(decision, snapshot, &ThresholdProfile::standard())
    }

    #[test]
    fn test_empty_corpus_is_insufficient_data() {
        let result = check(&decision(0.9), &CorpusSnapshot::default());
        assert_eq!(result.status, ConsistencyStatus::InsufficientData);
        assert_eq!(result.confidence, 0.75);
        assert_eq!(result.findings.len(), 1);
        assert_eq!(result.findings[0].severity, Severity::Info);
        assert_eq!(result.findings[0].code, "insufficient_history");
    }

    #[test]
    fn test_aligned_history_is_consistent() {
        let snapshot = CorpusSnapshot::from_cases(vec![
            case("EVA-1", 30, 0.88, 1.2, Verdict::Allowed),
            case("EVA-2", 20, 0.92, 0.8, Verdict::Allowed),
            case("EVA-3", 10, 0.9, 1.0, Verdict::Allowed),
        ]);

        let result = check(&decision(0.9), &snapshot);
        assert_eq!(result.status, ConsistencyStatus::Consistent);
        assert_eq!(result.similar_cases.len(), 3);
        assert!(result.aggregate_deviation < 0.1);
        assert!(result.findings.is_empty());
    }

    #[test]
    fn test_verdict_disagreement_is_major_deviation() {
        // History blocked near-identical decisions; this one is headed for
        // release.
        let snapshot = CorpusSnapshot::from_cases(vec![
            case("EVA-1", 30, 0.9, 3.0, Verdict::Blocked),
            case("EVA-2", 20, 0.9, 3.0, Verdict::Blocked),
            case("EVA-3", 10, 0.9, 3.0, Verdict::Blocked),
        ]);

        let result = check(&decision(0.9), &snapshot);
        assert_eq!(result.status, ConsistencyStatus::MajorDeviation);
        assert!(result
            .findings
            .iter()
            .any(|f| f.code == "major_deviation" && f.severity == Severity::Critical));
    }

    #[test]
    fn test_single_outlier_triggers_major_deviation() {
        // Aggregate stays low but one case deviates far beyond the
        // single-case threshold.
        let snapshot = CorpusSnapshot::from_cases(vec![
            case("EVA-1", 40, 0.9, 1.0, Verdict::Allowed),
            case("EVA-2", 30, 0.9, 1.0, Verdict::Allowed),
            case("EVA-3", 20, 0.9, 1.0, Verdict::Allowed),
            case("EVA-4", 10, 0.9, 1.0, Verdict::Allowed),
            case("EVA-old", 50, 0.2, 9.0, Verdict::Blocked),
        ]);

        let result = check(&decision(0.9), &snapshot);
        assert!(result.max_single_deviation > 0.4);
        assert_eq!(result.status, ConsistencyStatus::MajorDeviation);
    }

    #[test]
    fn test_recency_weighting_favors_newest() {
        // Newest case deviates, oldest agree. With rank weights the newest
        // dominates the aggregate.
        let agree = |r: &str, age| case(r, age, 0.9, 1.0, Verdict::Allowed);
        let snapshot_new_deviates = CorpusSnapshot::from_cases(vec![
            agree("EVA-1", 40),
            agree("EVA-2", 30),
            case("EVA-3", 5, 0.55, 4.0, Verdict::Allowed),
        ]);
        let snapshot_old_deviates = CorpusSnapshot::from_cases(vec![
            case("EVA-1", 40, 0.55, 4.0, Verdict::Allowed),
            agree("EVA-2", 30),
            agree("EVA-3", 5),
        ]);

        let newest = check(&decision(0.9), &snapshot_new_deviates);
        let oldest = check(&decision(0.9), &snapshot_old_deviates);
        assert!(newest.aggregate_deviation > oldest.aggregate_deviation);
    }

    #[test]
    fn test_dissimilar_cases_are_not_selected() {
        let mut unrelated = case("EVA-other", 10, 0.9, 1.0, Verdict::Allowed);
        unrelated.domain = Some("gaming".into());
        unrelated.stakeholder_groups = vec!["players".into()];
        unrelated.modules_triggered = vec!["matchmaker".into()];

        let snapshot = CorpusSnapshot::from_cases(vec![
            unrelated,
            case("EVA-1", 30, 0.9, 1.0, Verdict::Allowed),
            case("EVA-2", 20, 0.9, 1.0, Verdict::Allowed),
            case("EVA-3", 15, 0.9, 1.0, Verdict::Allowed),
        ]);

        let result = check(&decision(0.9), &snapshot);
        assert!(result
            .similar_cases
            .iter()
            .all(|c| c.reference != "EVA-other"));
    }

    #[test]
    fn test_identical_case_has_full_similarity() {
        let d = decision(0.9);
        let c = case("EVA-1", 10, 0.9, 1.0, Verdict::Allowed);
        let similarity = ConsistencyChecker::new().similarity(&d, &c);
        assert!((similarity - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_deterministic_over_snapshot() {
        let snapshot = CorpusSnapshot::from_cases(vec![
            case("EVA-1", 30, 0.7, 3.0, Verdict::AllowedWithMonitoring),
            case("EVA-2", 20, 0.8, 2.0, Verdict::Allowed),
            case("EVA-3", 10, 0.9, 1.0, Verdict::Allowed),
        ]);
        let d = decision(0.85);
        assert_eq!(check(&d, &snapshot), check(&d, &snapshot));
    }
}
