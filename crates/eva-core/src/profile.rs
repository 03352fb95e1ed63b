//! Versioned threshold profiles.
//!
//! A [`ThresholdProfile`] carries every tunable the checkers and the router
//! read. Profiles are immutable snapshots passed explicitly into each
//! checker; a configuration update produces a new version instead of
//! mutating shared state, so parallel sessions never observe a half-applied
//! profile.
//!
//! Four presets ship built in: `standard`, `medical` (stricter),
//! `financial`, and `research` (looser).

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::ViolationSeverity;

/// Errors when loading or validating a profile.
#[derive(Error, Debug)]
pub enum ProfileError {
    #[error("failed to read profile file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("failed to parse JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid profile: {0}")]
    Invalid(String),

    #[error("unknown preset: {0}")]
    UnknownPreset(String),
}

/// Per-category weights for the context completeness ratio.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextWeights {
    pub stakeholders: f64,
    pub environment: f64,
    pub ethical_dimensions: f64,
    pub consequence_scope: f64,
}

impl Default for ContextWeights {
    fn default() -> Self {
        Self {
            stakeholders: 0.3,
            environment: 0.2,
            ethical_dimensions: 0.3,
            consequence_scope: 0.2,
        }
    }
}

impl ContextWeights {
    pub fn total(&self) -> f64 {
        self.stakeholders + self.environment + self.ethical_dimensions + self.consequence_scope
    }
}

/// Weights for combining harm-category sub-scores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarmWeights {
    pub physical: f64,
    pub psychological: f64,
    pub social: f64,
    pub economic: f64,
    pub systemic: f64,
}

impl Default for HarmWeights {
    fn default() -> Self {
        Self {
            physical: 0.3,
            psychological: 0.2,
            social: 0.2,
            economic: 0.15,
            systemic: 0.15,
        }
    }
}

impl HarmWeights {
    pub fn total(&self) -> f64 {
        self.physical + self.psychological + self.social + self.economic + self.systemic
    }
}

/// A severity-tagged risk rule matched against the decision text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskRule {
    /// Stable identifier (e.g., "R1")
    pub id: String,

    /// Regex applied case-insensitively to the decision text
    pub pattern: String,

    pub severity: ViolationSeverity,

    pub description: String,
}

fn default_risk_rules() -> Vec<RiskRule> {
    vec![
        RiskRule {
            id: "R1".into(),
            pattern: r"(?i)\b(sell|share|monetiz\w+|disclose)\b.{0,40}\b(personal|private|user|patient)\s+(data|information|records)\b".into(),
            severity: ViolationSeverity::Critical,
            description: "personal data misuse".into(),
        },
        RiskRule {
            id: "R2".into(),
            pattern: r"(?i)\b(permanent(ly)?|irreversibl\w+)\b.{0,40}\b(damage|harm|loss|delete|destroy)\b".into(),
            severity: ViolationSeverity::Critical,
            description: "irreversible harm".into(),
        },
        RiskRule {
            id: "R3".into(),
            pattern: r"(?i)\b(circumvent|bypass|evade|ignore)\b.{0,30}\b(law|regulation|oversight|policy|compliance)\b".into(),
            severity: ViolationSeverity::Critical,
            description: "legal or oversight circumvention".into(),
        },
        RiskRule {
            id: "R4".into(),
            pattern: r"(?i)\b(exclude|deny|refuse)\b.{0,40}\b(based on|because of)\b.{0,30}\b(age|gender|race|religion|disability|origin)\b".into(),
            severity: ViolationSeverity::Major,
            description: "discriminatory treatment".into(),
        },
        RiskRule {
            id: "R5".into(),
            pattern: r"(?i)\b(mislead|deceive|manipulat\w+|pressure)\b".into(),
            severity: ViolationSeverity::Minor,
            description: "manipulative framing".into(),
        },
    ]
}

/// All recognized threshold options, with the conservative v1 defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdProfile {
    /// Preset or operator-assigned name
    pub name: String,

    /// Monotonically increasing; bumped by every configuration update
    pub version: u32,

    /// Harm score above which a critical finding is raised (default 7.0)
    pub max_harm_score: f64,

    /// Adjusted confidence below which a critical finding is raised (default 0.6)
    pub min_confidence_level: f64,

    /// Aggregate consistency deviation above which the deviation is major (default 0.3)
    pub consistency_deviation_threshold: f64,

    /// Aggregate deviation above which a warning is raised (default 0.15)
    pub consistency_warning_threshold: f64,

    /// Single-case deviation that alone makes the deviation major (default 0.4)
    pub single_case_deviation_threshold: f64,

    /// Completeness score at or above which context passes (default 0.8)
    pub context_completeness_threshold: f64,

    /// Completeness score below which context is critically incomplete (default 0.6)
    pub context_critical_threshold: f64,

    /// Minimum similarity for a historical case to count (default 0.7)
    pub similarity_threshold: f64,

    /// Below this many similar cases the consistency checker reports
    /// insufficient data (default 3)
    pub minimum_similar_cases: usize,

    /// How many similar cases to retain at most
    pub max_similar_cases: usize,

    /// More than this many borderline principles raises a warning (default 2)
    pub borderline_limit: usize,

    #[serde(default)]
    pub context_weights: ContextWeights,

    #[serde(default)]
    pub harm_weights: HarmWeights,

    /// Domains treated as high-stakes for confidence adjustment
    pub high_stakes_domains: Vec<String>,

    #[serde(default = "default_risk_rules")]
    pub risk_rules: Vec<RiskRule>,

    /// Audit retention horizon in days; `None` keeps records forever
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retention_period_days: Option<u32>,
}

impl Default for ThresholdProfile {
    fn default() -> Self {
        Self::standard()
    }
}

impl ThresholdProfile {
    /// The conservative v1 defaults.
    pub fn standard() -> Self {
        Self {
            name: "standard".into(),
            version: 1,
            max_harm_score: 7.0,
            min_confidence_level: 0.6,
            consistency_deviation_threshold: 0.3,
            consistency_warning_threshold: 0.15,
            single_case_deviation_threshold: 0.4,
            context_completeness_threshold: 0.8,
            context_critical_threshold: 0.6,
            similarity_threshold: 0.7,
            minimum_similar_cases: 3,
            max_similar_cases: 10,
            borderline_limit: 2,
            context_weights: ContextWeights::default(),
            harm_weights: HarmWeights::default(),
            high_stakes_domains: vec![
                "medical".into(),
                "financial".into(),
                "legal".into(),
                "safety".into(),
            ],
            risk_rules: default_risk_rules(),
            retention_period_days: None,
        }
    }

    /// Strict preset for clinical deployments.
    pub fn medical() -> Self {
        Self {
            name: "medical".into(),
            max_harm_score: 5.0,
            min_confidence_level: 0.75,
            context_completeness_threshold: 0.9,
            context_critical_threshold: 0.7,
            consistency_deviation_threshold: 0.2,
            consistency_warning_threshold: 0.1,
            ..Self::standard()
        }
    }

    /// Preset for financial deployments.
    pub fn financial() -> Self {
        Self {
            name: "financial".into(),
            max_harm_score: 6.0,
            min_confidence_level: 0.7,
            context_completeness_threshold: 0.85,
            consistency_deviation_threshold: 0.25,
            ..Self::standard()
        }
    }

    /// Loose preset for exploratory/research use.
    pub fn research() -> Self {
        Self {
            name: "research".into(),
            max_harm_score: 8.0,
            min_confidence_level: 0.5,
            context_completeness_threshold: 0.7,
            context_critical_threshold: 0.5,
            consistency_deviation_threshold: 0.4,
            consistency_warning_threshold: 0.25,
            ..Self::standard()
        }
    }

    /// Look up a built-in preset by name.
    pub fn preset(name: &str) -> Result<Self, ProfileError> {
        match name {
            "standard" => Ok(Self::standard()),
            "medical" => Ok(Self::medical()),
            "financial" => Ok(Self::financial()),
            "research" => Ok(Self::research()),
            other => Err(ProfileError::UnknownPreset(other.to_string())),
        }
    }

    /// Parse a profile from YAML.
    pub fn from_yaml(yaml: &str) -> Result<Self, ProfileError> {
        let profile: ThresholdProfile = serde_yaml::from_str(yaml)?;
        profile.validate()?;
        Ok(profile)
    }

    /// Parse a profile from JSON.
    pub fn from_json(json: &str) -> Result<Self, ProfileError> {
        let profile: ThresholdProfile = serde_json::from_str(json)?;
        profile.validate()?;
        Ok(profile)
    }

    /// Parse a profile from a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ProfileError> {
        let contents = fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Validate ranges and weights.
    pub fn validate(&self) -> Result<(), ProfileError> {
        if self.name.trim().is_empty() {
            return Err(ProfileError::Invalid("name must not be empty".into()));
        }
        if !(0.0..=10.0).contains(&self.max_harm_score) {
            return Err(ProfileError::Invalid(format!(
                "max_harm_score {} outside [0, 10]",
                self.max_harm_score
            )));
        }
        for (label, value) in [
            ("min_confidence_level", self.min_confidence_level),
            (
                "consistency_deviation_threshold",
                self.consistency_deviation_threshold,
            ),
            (
                "consistency_warning_threshold",
                self.consistency_warning_threshold,
            ),
            (
                "single_case_deviation_threshold",
                self.single_case_deviation_threshold,
            ),
            (
                "context_completeness_threshold",
                self.context_completeness_threshold,
            ),
            ("context_critical_threshold", self.context_critical_threshold),
            ("similarity_threshold", self.similarity_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ProfileError::Invalid(format!(
                    "{} {} outside [0, 1]",
                    label, value
                )));
            }
        }
        if self.context_critical_threshold > self.context_completeness_threshold {
            return Err(ProfileError::Invalid(
                "context_critical_threshold must not exceed context_completeness_threshold".into(),
            ));
        }
        if self.consistency_warning_threshold > self.consistency_deviation_threshold {
            return Err(ProfileError::Invalid(
                "consistency_warning_threshold must not exceed consistency_deviation_threshold"
                    .into(),
            ));
        }
        if self.context_weights.total() <= 0.0 {
            return Err(ProfileError::Invalid(
                "context weights must sum to a positive value".into(),
            ));
        }
        if self.harm_weights.total() <= 0.0 {
            return Err(ProfileError::Invalid(
                "harm weights must sum to a positive value".into(),
            ));
        }
        for rule in &self.risk_rules {
            regex::Regex::new(&rule.pattern).map_err(|e| {
                ProfileError::Invalid(format!("risk rule {} has invalid pattern: {}", rule.id, e))
            })?;
        }
        Ok(())
    }

    /// Derive the next version of this profile with updated values.
    ///
    /// The returned profile carries `version + 1`; the receiver is untouched.
    pub fn next_version(&self, mut updated: ThresholdProfile) -> Result<ThresholdProfile, ProfileError> {
        updated.version = self.version + 1;
        updated.validate()?;
        Ok(updated)
    }

    pub fn is_high_stakes(&self, domain: &str) -> bool {
        self.high_stakes_domains
            .iter()
            .any(|d| d.eq_ignore_ascii_case(domain))
    }
}
