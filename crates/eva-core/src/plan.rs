//! Execution plans.
//!
//! Sessions run under a finite set of versioned plans rather than a
//! self-modifying optimizer. A plan fixes which checkers run, the detector
//! depth and the refinement-pass ceiling. Path selection between the fast
//! and deep plan is a fixed predicate over the decision and the active
//! profile. Plan changes only happen through explicit activation or
//! rollback, each recorded with a fresh version number; a rollback never
//! silently rewinds the version counter.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::checkers::DetectorDepth;
use crate::decision::DecisionRecord;
use crate::profile::ThresholdProfile;

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("unknown plan version {0}")]
    UnknownVersion(u32),
}

/// Which of the two validation paths a session takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathMode {
    /// Skips the consistency check, standard detectors, single pass
    Fast,
    /// Full pipeline, deep detectors, bounded refinement
    Deep,
}

/// The checker configuration a session executes under.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub version: u32,
    pub mode: PathMode,
    pub run_consistency: bool,
    pub max_refinement_passes: u32,
    pub detector_depth: DetectorDepth,
}

impl ExecutionPlan {
    pub fn fast(version: u32) -> Self {
        Self {
            version,
            mode: PathMode::Fast,
            run_consistency: false,
            max_refinement_passes: 1,
            detector_depth: DetectorDepth::Standard,
        }
    }

    pub fn deep(version: u32) -> Self {
        Self {
            version,
            mode: PathMode::Deep,
            run_consistency: true,
            max_refinement_passes: 3,
            detector_depth: DetectorDepth::Deep,
        }
    }
}

/// Fixed deep-path predicate: any elevated-stakes signal takes the deep
/// plan. Confidence below the deep bound also does.
pub fn requires_deep_path(
    decision: &DecisionRecord,
    profile: &ThresholdProfile,
    deep_confidence_bound: f64,
) -> bool {
    let context = &decision.context;
    context
        .domain
        .as_deref()
        .is_some_and(|d| profile.is_high_stakes(d))
        || context.has_vulnerable_stakeholder()
        || context.is_irreversible()
        || decision.confidence < deep_confidence_bound
}

/// One recorded plan transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanChange {
    pub at: DateTime<Utc>,
    pub from_version: u32,
    pub to_version: u32,
    pub note: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct PlanVersion {
    version: u32,
    fast: ExecutionPlan,
    deep: ExecutionPlan,
    deep_confidence_bound: f64,
}

/// The registry of plan versions. The highest version is active.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanRegistry {
    versions: Vec<PlanVersion>,
    changes: Vec<PlanChange>,
}

impl PlanRegistry {
    /// Registry with the default fast/deep pair as version 1.
    pub fn new() -> Self {
        Self {
            versions: vec![PlanVersion {
                version: 1,
                fast: ExecutionPlan::fast(1),
                deep: ExecutionPlan::deep(1),
                deep_confidence_bound: 0.7,
            }],
            changes: Vec::new(),
        }
    }

    pub fn active_version(&self) -> u32 {
        self.active().version
    }

    /// Select the plan this decision runs under.
    pub fn plan_for(&self, decision: &DecisionRecord, profile: &ThresholdProfile) -> ExecutionPlan {
        let active = self.active();
        if requires_deep_path(decision, profile, active.deep_confidence_bound) {
            active.deep
        } else {
            active.fast
        }
    }

    /// Activate a new fast/deep pair under the next version number.
    pub fn activate(
        &mut self,
        mut fast: ExecutionPlan,
        mut deep: ExecutionPlan,
        deep_confidence_bound: f64,
        note: impl Into<String>,
    ) -> u32 {
        let from = self.active_version();
        let version = from + 1;
        fast.version = version;
        deep.version = version;
        self.versions.push(PlanVersion {
            version,
            fast,
            deep,
            deep_confidence_bound,
        });
        self.changes.push(PlanChange {
            at: Utc::now(),
            from_version: from,
            to_version: version,
            note: note.into(),
        });
        version
    }

    /// Reactivate an earlier version's settings under a new version number.
    pub fn rollback(&mut self, to: u32, note: impl Into<String>) -> Result<u32, PlanError> {
        let target = self
            .versions
            .iter()
            .find(|v| v.version == to)
            .cloned()
            .ok_or(PlanError::UnknownVersion(to))?;
        Ok(self.activate(
            target.fast,
            target.deep,
            target.deep_confidence_bound,
            format!("rollback to v{}: {}", to, note.into()),
        ))
    }

    pub fn changes(&self) -> &[PlanChange] {
        &self.changes
    }

    /// Plan transitions not yet drained. Consumed by audit custody
    /// annotation.
    pub fn drain_changes(&mut self) -> Vec<PlanChange> {
        std::mem::take(&mut self.changes)
    }

    fn active(&self) -> &PlanVersion {
        // The constructor guarantees at least one version
        self.versions.last().expect("registry has a version")
    }
}

impl Default for PlanRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::{ConsequenceScope, ImpactBreadth, Stakeholder};
    use chrono::Utc;

    fn decision(confidence: f64) -> DecisionRecord {
        DecisionRecord {
            id: "plan-test".into(),
            timestamp: Utc::now(),
            decision_text: "routine decision".into(),
            confidence,
            principle_weights: Default::default(),
            modules_triggered: vec![],
            context: Default::default(),
        }
    }

    #[test]
    fn test_routine_decision_takes_fast_path() {
        let registry = PlanRegistry::new();
        let plan = registry.plan_for(&decision(0.9), &ThresholdProfile::standard());
        assert_eq!(plan.mode, PathMode::Fast);
        assert!(!plan.run_consistency);
        assert_eq!(plan.max_refinement_passes, 1);
    }

    #[test]
    fn test_elevated_stakes_take_deep_path() {
        let registry = PlanRegistry::new();
        let profile = ThresholdProfile::standard();

        let mut high_stakes = decision(0.9);
        high_stakes.context.domain = Some("medical".into());
        assert_eq!(registry.plan_for(&high_stakes, &profile).mode, PathMode::Deep);

        let mut vulnerable = decision(0.9);
        vulnerable.context.stakeholders.push(Stakeholder {
            group: "children".into(),
            vulnerable: true,
        });
        assert_eq!(registry.plan_for(&vulnerable, &profile).mode, PathMode::Deep);

        let mut irreversible = decision(0.9);
        irreversible.context.consequence_scope = Some(ConsequenceScope {
            breadth: ImpactBreadth::Individual,
            reversible: false,
            description: None,
        });
        assert_eq!(registry.plan_for(&irreversible, &profile).mode, PathMode::Deep);

        let hesitant = decision(0.5);
        assert_eq!(registry.plan_for(&hesitant, &profile).mode, PathMode::Deep);
    }

    #[test]
    fn test_activation_bumps_version_and_records_change() {
        let mut registry = PlanRegistry::new();
        let mut fast = ExecutionPlan::fast(0);
        fast.max_refinement_passes = 2;
        let version = registry.activate(fast, ExecutionPlan::deep(0), 0.8, "widen fast path");

        assert_eq!(version, 2);
        assert_eq!(registry.active_version(), 2);
        let plan = registry.plan_for(&decision(0.9), &ThresholdProfile::standard());
        assert_eq!(plan.version, 2);
        assert_eq!(plan.max_refinement_passes, 2);
        assert_eq!(registry.changes().len(), 1);
    }

    #[test]
    fn test_rollback_moves_forward() {
        let mut registry = PlanRegistry::new();
        registry.activate(ExecutionPlan::fast(0), ExecutionPlan::deep(0), 0.9, "experiment");
        let version = registry.rollback(1, "experiment regressed").unwrap();

        // Rollback lands on a new version carrying v1 settings
        assert_eq!(version, 3);
        let plan = registry.plan_for(&decision(0.95), &ThresholdProfile::standard());
        assert_eq!(plan.mode, PathMode::Fast);

        assert!(matches!(
            registry.rollback(99, "no such version"),
            Err(PlanError::UnknownVersion(99))
        ));
    }

    #[test]
    fn test_drain_changes_empties_the_log() {
        let mut registry = PlanRegistry::new();
        registry.activate(ExecutionPlan::fast(0), ExecutionPlan::deep(0), 0.7, "tune");
        let drained = registry.drain_changes();
        assert_eq!(drained.len(), 1);
        assert!(registry.changes().is_empty());
    }
}
