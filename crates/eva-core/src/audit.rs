//! Immutable audit records.
//!
//! Every validation session seals exactly one record. The record's content
//! is hashed (SHA-256 over its canonical JSON form) and linked to the
//! previous record's hash, forming an append-only chain. Corrections never
//! rewrite a sealed record; they append a new one that names the record it
//! supersedes. Custody entries sit outside the hashed content so that
//! later handling annotations cannot invalidate the seal.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;

use crate::checkers::{CaseDigest, ConsistencyResult};
use crate::decision::DecisionRecord;
use crate::router::EscalationDecision;
use crate::types::{Finding, ValidationStatus};

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("audit content serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("record {reference} fails integrity check")]
    IntegrityViolation { reference: String },

    #[error("record {reference} does not link to predecessor {expected}")]
    BrokenChain { reference: String, expected: String },
}

/// A handling annotation appended after sealing. Not covered by the hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustodyEntry {
    pub at: DateTime<Utc>,
    pub actor: String,
    pub action: String,
}

/// Everything the seal covers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditContent {
    pub session_id: Uuid,
    pub recorded_at: DateTime<Utc>,

    /// Full input as received, kept verbatim for replay
    pub decision: DecisionRecord,

    pub profile_name: String,
    pub profile_version: u32,
    pub plan_version: u32,

    pub status: ValidationStatus,
    pub validation_confidence: f64,
    pub harm_score: f64,

    pub findings: Vec<Finding>,
    pub escalation: EscalationDecision,

    /// Absent when the plan skipped the consistency check
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consistency: Option<ConsistencyResult>,

    /// Hash of the previous record in the chain; `None` only for the
    /// first record
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev_hash: Option<String>,

    /// Reference of the record this one corrects
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supersedes: Option<String>,
}

/// A sealed audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// "EVA-{UTC timestamp}-{session id prefix}"
    pub reference: String,

    pub content: AuditContent,

    /// SHA-256 over the canonical JSON form of `content`
    pub content_hash: String,

    /// Detached signature over `content_hash`, when a signing key is
    /// deployed. Sits outside the hashed content, like custody.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,

    #[serde(default)]
    pub custody: Vec<CustodyEntry>,
}

impl AuditRecord {
    /// Seal content into a record. The reference is derived from the
    /// content itself, so sealing is deterministic.
    pub fn seal(content: AuditContent) -> Result<Self, AuditError> {
        let reference = format!(
            "EVA-{}-{}",
            content.recorded_at.format("%Y%m%d%H%M%S"),
            &content.session_id.simple().to_string()[..6]
        );
        let content_hash = hash_content(&content)?;
        Ok(Self {
            reference,
            content,
            content_hash,
            signature: None,
            custody: Vec::new(),
        })
    }

    /// Attach a detached signature over the content hash. Does not touch
    /// the seal.
    pub fn attach_signature(&mut self, signature: impl Into<String>) {
        self.signature = Some(signature.into());
    }

    /// Recompute the content hash and compare against the seal.
    pub fn verify_integrity(&self) -> Result<(), AuditError> {
        let recomputed = hash_content(&self.content)?;
        if recomputed != self.content_hash {
            return Err(AuditError::IntegrityViolation {
                reference: self.reference.clone(),
            });
        }
        Ok(())
    }

    /// Append a handling annotation. Does not touch the seal.
    pub fn add_custody(&mut self, actor: impl Into<String>, action: impl Into<String>) {
        self.custody.push(CustodyEntry {
            at: Utc::now(),
            actor: actor.into(),
            action: action.into(),
        });
    }

    /// Human-readable one-block summary for audit inspection.
    pub fn summary(&self) -> String {
        let content = &self.content;
        let mut lines = vec![
            format!("{} ({})", self.reference, content.recorded_at.to_rfc3339()),
            format!(
                "decision {} under profile {} v{}, plan v{}",
                content.decision.id, content.profile_name, content.profile_version,
                content.plan_version
            ),
            format!(
                "{}: {} at level {}, confidence {:.2}, harm {:.1}",
                content.status,
                content.escalation.verdict,
                content.escalation.level,
                content.validation_confidence,
                content.harm_score
            ),
        ];
        if let Some(superseded) = &content.supersedes {
            lines.push(format!("supersedes {}", superseded));
        }
        for trigger in &content.escalation.summary().triggers {
            lines.push(format!("  {}", trigger));
        }
        for entry in &self.custody {
            lines.push(format!("custody: {} by {}", entry.action, entry.actor));
        }
        lines.join("\n")
    }

    /// Comparison-ready summary for the consistency corpus.
    pub fn digest(&self) -> CaseDigest {
        let content = &self.content;
        CaseDigest {
            reference: self.reference.clone(),
            recorded_at: content.recorded_at,
            domain: content.decision.context.domain.clone(),
            stakeholder_groups: content
                .decision
                .context
                .stakeholders
                .iter()
                .map(|s| s.group.clone())
                .collect(),
            principle_weights: content.decision.principle_weights.clone(),
            modules_triggered: content.decision.modules_triggered.clone(),
            confidence: content.decision.confidence,
            harm_score: content.harm_score,
            verdict: content.escalation.verdict,
        }
    }
}

/// Verify hash integrity and prev-hash linkage over records in chain order.
pub fn verify_chain(records: &[AuditRecord]) -> Result<(), AuditError> {
    let mut prev_hash: Option<&str> = None;
    for record in records {
        record.verify_integrity()?;
        match (prev_hash, record.content.prev_hash.as_deref()) {
            (None, None) => {}
            (Some(expected), Some(actual)) if expected == actual => {}
            (expected, _) => {
                return Err(AuditError::BrokenChain {
                    reference: record.reference.clone(),
                    expected: expected.unwrap_or("<genesis>").to_string(),
                });
            }
        }
        prev_hash = Some(&record.content_hash);
    }
    Ok(())
}

fn hash_content(content: &AuditContent) -> Result<String, AuditError> {
    let canonical = serde_json::to_vec(content)?;
    let mut hasher = Sha256::new();
    hasher.update(&canonical);
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::EscalationRouter;
    use crate::profile::ThresholdProfile;
    use crate::types::Verdict;

    fn content(prev_hash: Option<String>) -> AuditContent {
        let decision = DecisionRecord {
            id: "audit-test".into(),
            timestamp: Utc::now(),
            decision_text: "approve the request".into(),
            confidence: 0.9,
            principle_weights: Default::default(),
            modules_triggered: vec!["approver".into()],
            context: Default::default(),
        };
        let escalation = EscalationRouter::new().route(&[], &ThresholdProfile::standard());
        AuditContent {
            session_id: Uuid::new_v4(),
            recorded_at: Utc::now(),
            decision,
            profile_name: "standard".into(),
            profile_version: 1,
            plan_version: 1,
            status: ValidationStatus::Validated,
            validation_confidence: 0.9,
            harm_score: 0.5,
            findings: vec![],
            escalation,
            consistency: None,
            prev_hash,
            supersedes: None,
        }
    }

    #[test]
    fn test_seal_and_verify() {
        let record = AuditRecord::seal(content(None)).unwrap();
        assert!(record.reference.starts_with("EVA-"));
        assert_eq!(record.content_hash.len(), 64);
        record.verify_integrity().unwrap();
    }

    #[test]
    fn test_sealing_is_deterministic() {
        let content = content(None);
        let a = AuditRecord::seal(content.clone()).unwrap();
        let b = AuditRecord::seal(content).unwrap();
        assert_eq!(a.reference, b.reference);
        assert_eq!(a.content_hash, b.content_hash);
    }

    #[test]
    fn test_tampering_is_detected() {
        let mut record = AuditRecord::seal(content(None)).unwrap();
        record.content.validation_confidence = 1.0;
        assert!(matches!(
            record.verify_integrity(),
            Err(AuditError::IntegrityViolation { .. })
        ));
    }

    #[test]
    fn test_custody_does_not_break_the_seal() {
        let mut record = AuditRecord::seal(content(None)).unwrap();
        record.add_custody("reviewer-1", "case reviewed, no action");
        record.verify_integrity().unwrap();
        assert_eq!(record.custody.len(), 1);
    }

    #[test]
    fn test_chain_links_and_detects_breaks() {
        let first = AuditRecord::seal(content(None)).unwrap();
        let second = AuditRecord::seal(content(Some(first.content_hash.clone()))).unwrap();
        let third = AuditRecord::seal(content(Some(second.content_hash.clone()))).unwrap();

        verify_chain(&[first.clone(), second.clone(), third.clone()]).unwrap();

        // Dropping the middle record breaks linkage
        let result = verify_chain(&[first, third]);
        assert!(matches!(result, Err(AuditError::BrokenChain { .. })));
    }

    #[test]
    fn test_digest_carries_comparison_features() {
        let record = AuditRecord::seal(content(None)).unwrap();
        let digest = record.digest();
        assert_eq!(digest.reference, record.reference);
        assert_eq!(digest.confidence, 0.9);
        assert_eq!(digest.harm_score, 0.5);
        assert_eq!(digest.verdict, Verdict::Allowed);
        assert_eq!(digest.modules_triggered, vec!["approver".to_string()]);
    }

    #[test]
    fn test_summary_names_the_outcome() {
        let mut record = AuditRecord::seal(content(None)).unwrap();
        record.add_custody("reviewer-1", "case reviewed");
        let summary = record.summary();
        assert!(summary.contains(&record.reference));
        assert!(summary.contains("VALIDATED"));
        assert!(summary.contains("custody: case reviewed by reviewer-1"));
    }

    #[test]
    fn test_signature_sits_outside_the_seal() {
        let mut record = AuditRecord::seal(content(None)).unwrap();
        record.attach_signature("ed25519:9f2c41");
        record.verify_integrity().unwrap();

        let json = serde_json::to_string(&record).unwrap();
        let parsed: AuditRecord = serde_json::from_str(&json).unwrap();
        parsed.verify_integrity().unwrap();
        assert_eq!(parsed.signature.as_deref(), Some("ed25519:9f2c41"));
    }

    #[test]
    fn test_supersedes_reference_round_trips() {
        let original = AuditRecord::seal(content(None)).unwrap();
        let mut correction = content(Some(original.content_hash.clone()));
        correction.supersedes = Some(original.reference.clone());
        let corrected = AuditRecord::seal(correction).unwrap();

        let json = serde_json::to_string(&corrected).unwrap();
        let parsed: AuditRecord = serde_json::from_str(&json).unwrap();
        parsed.verify_integrity().unwrap();
        assert_eq!(parsed.content.supersedes.as_deref(), Some(original.reference.as_str()));
    }
}
