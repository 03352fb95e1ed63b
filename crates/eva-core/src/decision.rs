//! Decision input model and parsing.
//!
//! A [`DecisionRecord`] is produced upstream and is read-only inside the
//! validator: it is parsed once, validated against the embedded JSON Schema
//! (`spec/decision.schema.json`), range-checked, and never mutated.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Embedded decision schema (loaded at compile time).
const DECISION_SCHEMA_JSON: &str = include_str!("../../../spec/decision.schema.json");

/// Compiled JSON Schema validator (initialized once, reused).
static COMPILED_SCHEMA: OnceLock<Result<jsonschema::Validator, String>> = OnceLock::new();

/// Errors that can occur when parsing a decision document.
#[derive(Error, Debug)]
pub enum DecisionError {
    #[error("failed to read decision file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("decision does not match schema: {}", .0.join("; "))]
    Schema(Vec<String>),

    #[error("invalid decision: {0}")]
    Invalid(String),
}

/// The five ALIGN principles a decision is checked against.
///
/// This is a closed set: the validator scores compliance against exactly
/// these five, whatever weights the upstream generator declares.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Principle {
    Awareness,
    Learning,
    Integrity,
    Governance,
    Nurturing,
}

impl Principle {
    /// All principles in canonical order.
    pub const ALL: [Principle; 5] = [
        Principle::Awareness,
        Principle::Learning,
        Principle::Integrity,
        Principle::Governance,
        Principle::Nurturing,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Principle::Awareness => "awareness",
            Principle::Learning => "learning",
            Principle::Integrity => "integrity",
            Principle::Governance => "governance",
            Principle::Nurturing => "nurturing",
        }
    }
}

impl std::fmt::Display for Principle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How widely a decision's consequences reach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImpactBreadth {
    Individual,
    Group,
    Systemic,
}

/// A stakeholder group the decision affects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stakeholder {
    pub group: String,

    /// Declared by the upstream generator; amplifies risk and tightens
    /// principle checks when set.
    #[serde(default)]
    pub vulnerable: bool,
}

/// Declared scope of the decision's consequences.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsequenceScope {
    pub breadth: ImpactBreadth,
    pub reversible: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Free-form context payload declared with the decision.
///
/// The completeness checker scores whether the required categories
/// (stakeholders, environment, ethical dimensions, consequence scope) are
/// actually filled in; the other checkers read individual fields.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DecisionContext {
    /// Context type, e.g. "medical", "financial", "research"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,

    #[serde(default)]
    pub stakeholders: Vec<Stakeholder>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,

    #[serde(default)]
    pub ethical_dimensions: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consequence_scope: Option<ConsequenceScope>,

    /// Upstream-declared boolean/numeric markers, e.g.
    /// `store_private_data`, `user_consent`, `human_override`.
    #[serde(default)]
    pub flags: BTreeMap<String, serde_json::Value>,
}

impl DecisionContext {
    /// Look up a boolean flag; absent or non-boolean values return `None`.
    pub fn flag(&self, name: &str) -> Option<bool> {
        self.flags.get(name).and_then(|v| v.as_bool())
    }

    /// Whether any declared stakeholder is marked vulnerable.
    pub fn has_vulnerable_stakeholder(&self) -> bool {
        self.stakeholders.iter().any(|s| s.vulnerable)
    }

    /// Whether the consequence scope is declared irreversible.
    pub fn is_irreversible(&self) -> bool {
        self.consequence_scope
            .as_ref()
            .map(|s| !s.reversible)
            .unwrap_or(false)
    }
}

/// A candidate decision from the upstream generator. Immutable once parsed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub id: String,

    pub timestamp: DateTime<Utc>,

    pub decision_text: String,

    /// Upstream confidence in [0, 1]
    pub confidence: f64,

    /// Upstream principle weighting; missing principles default to 1.0
    #[serde(default)]
    pub principle_weights: BTreeMap<Principle, f64>,

    /// Upstream evaluation modules that ran for this decision
    #[serde(default)]
    pub modules_triggered: Vec<String>,

    #[serde(default)]
    pub context: DecisionContext,
}

impl DecisionRecord {
    /// Parse a decision from JSON, validating against the schema first.
    pub fn from_json(json: &str) -> Result<Self, DecisionError> {
        let value: serde_json::Value = serde_json::from_str(json)?;
        validate_decision_schema(&value).map_err(DecisionError::Schema)?;
        let decision: DecisionRecord = serde_json::from_value(value)?;
        decision.validate()?;
        Ok(decision)
    }

    /// Parse a decision from YAML.
    ///
    /// YAML input bypasses the JSON Schema; the range checks in
    /// [`DecisionRecord::validate`] still apply.
    pub fn from_yaml(yaml: &str) -> Result<Self, DecisionError> {
        let decision: DecisionRecord = serde_yaml::from_str(yaml)?;
        decision.validate()?;
        Ok(decision)
    }

    /// Parse a decision from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, DecisionError> {
        let contents = fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    /// Range-check the parsed record.
    pub fn validate(&self) -> Result<(), DecisionError> {
        if self.id.trim().is_empty() {
            return Err(DecisionError::Invalid("id must not be empty".into()));
        }
        if self.decision_text.trim().is_empty() {
            return Err(DecisionError::Invalid(
                "decision_text must not be empty".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(DecisionError::Invalid(format!(
                "confidence {} outside [0, 1]",
                self.confidence
            )));
        }
        for (principle, weight) in &self.principle_weights {
            if !(0.0..=1.0).contains(weight) {
                return Err(DecisionError::Invalid(format!(
                    "weight {} for principle {} outside [0, 1]",
                    weight, principle
                )));
            }
        }
        Ok(())
    }

    /// Declared weight for a principle; unspecified principles count fully.
    pub fn weight_of(&self, principle: Principle) -> f64 {
        self.principle_weights.get(&principle).copied().unwrap_or(1.0)
    }
}

/// Get or initialize the compiled schema validator.
fn get_validator() -> Result<&'static jsonschema::Validator, String> {
    let result = COMPILED_SCHEMA.get_or_init(|| {
        let schema_value: serde_json::Value = match serde_json::from_str(DECISION_SCHEMA_JSON) {
            Ok(v) => v,
            Err(e) => return Err(format!("invalid schema JSON: {}", e)),
        };

        match jsonschema::options().build(&schema_value) {
            Ok(v) => Ok(v),
            Err(e) => Err(format!("failed to compile schema: {}", e)),
        }
    });

    match result {
        Ok(v) => Ok(v),
        Err(e) => Err(e.clone()),
    }
}

/// Validate a raw decision document against the embedded schema.
pub fn validate_decision_schema(value: &serde_json::Value) -> Result<(), Vec<String>> {
    let validator = get_validator().map_err(|e| vec![e])?;

    let errors: Vec<String> = validator
        .iter_errors(value)
        .map(|e| format!("{} at {}", e, e.instance_path))
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
