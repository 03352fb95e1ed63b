//! Audit sealing and persistence.
//!
//! The recorder is the only writer of audit records. It serializes
//! seal-and-append so every record links to the true chain head, retries
//! transient backend failures with exponential backoff, and treats retry
//! exhaustion as fatal for the session: no audit record, no release.
//! Sessions that fail validation itself still get a record, sealed with
//! `VALIDATION_ERROR` and a blocked verdict.

use std::sync::Arc;

use backon::{ExponentialBuilder, Retryable};
use chrono::Utc;
use eva_core::audit::{AuditContent, AuditRecord, CustodyEntry};
use eva_core::router::{EscalationDecision, NotificationPlan, ReviewDisposition};
use eva_core::types::{EscalationLevel, ValidationStatus, Verdict};
use eva_core::{DecisionRecord, SessionReport, ThresholdProfile};
use thiserror::Error;
use tracing::{error, warn};
use uuid::Uuid;

use crate::config::RetrySettings;
use crate::store::{CorpusStore, StoreError};

#[derive(Debug, Error)]
pub enum RecorderError {
    #[error("audit write failed: {0}")]
    Store(#[from] StoreError),

    #[error("audit sealing failed: {0}")]
    Audit(#[from] eva_core::audit::AuditError),

    #[error("audit task failed: {0}")]
    Task(String),
}

/// The single audit writer.
pub struct AuditRecorder {
    store: Arc<dyn CorpusStore>,
    retry: RetrySettings,
    write_lock: tokio::sync::Mutex<()>,
}

impl AuditRecorder {
    pub fn new(store: Arc<dyn CorpusStore>, retry: RetrySettings) -> Self {
        Self {
            store,
            retry,
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Seal a completed session against the chain head and persist it.
    pub async fn record(
        &self,
        report: &SessionReport,
        profile: &ThresholdProfile,
        custody: Vec<CustodyEntry>,
    ) -> Result<AuditRecord, RecorderError> {
        let _guard = self.write_lock.lock().await;

        let head = self.head_hash().await?;
        let content = report.audit_content(profile, head, Utc::now());
        let mut record = AuditRecord::seal(content)?;
        record.custody = custody;

        self.append_with_retry(record).await
    }

    /// Seal a fail-closed record for a session that could not complete.
    pub async fn record_error(
        &self,
        session_id: Uuid,
        decision: &DecisionRecord,
        profile: &ThresholdProfile,
        plan_version: u32,
        reason: &str,
    ) -> Result<AuditRecord, RecorderError> {
        let _guard = self.write_lock.lock().await;

        let head = self.head_hash().await?;
        let summary = format!("validation error: {}", reason);
        let content = AuditContent {
            session_id,
            recorded_at: Utc::now(),
            decision: decision.clone(),
            profile_name: profile.name.clone(),
            profile_version: profile.version,
            plan_version,
            status: ValidationStatus::ValidationError,
            validation_confidence: 0.0,
            harm_score: 0.0,
            findings: vec![],
            escalation: EscalationDecision {
                level: EscalationLevel::Critical,
                verdict: Verdict::Blocked,
                triggers: vec![],
                review: ReviewDisposition::Immediate,
                notification: Some(NotificationPlan {
                    level: EscalationLevel::Critical,
                    requires_ack: true,
                    summary: summary.clone(),
                }),
            },
            consistency: None,
            prev_hash: head,
            supersedes: None,
        };

        warn!(%session_id, reason, "sealing fail-closed audit record");
        let record = AuditRecord::seal(content)?;
        self.append_with_retry(record).await
    }

    async fn head_hash(&self) -> Result<Option<String>, RecorderError> {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || store.head_hash())
            .await
            .map_err(|e| RecorderError::Task(e.to_string()))?
            .map_err(RecorderError::from)
    }

    async fn append_with_retry(&self, record: AuditRecord) -> Result<AuditRecord, RecorderError> {
        let backoff = ExponentialBuilder::default()
            .with_min_delay(self.retry.base_delay)
            .with_max_times(self.retry.max_attempts as usize);

        let attempt = {
            let store = self.store.clone();
            let record = record.clone();
            move || {
                let store = store.clone();
                let record = record.clone();
                async move {
                    tokio::task::spawn_blocking(move || store.append(&record))
                        .await
                        .map_err(|e| RecorderError::Task(e.to_string()))?
                        .map_err(RecorderError::from)
                }
            }
        };

        attempt
            .retry(backoff)
            // Chain and integrity rejections are deterministic; only the
            // backend is worth retrying
            .when(|e| matches!(e, RecorderError::Store(StoreError::Backend(_)) | RecorderError::Task(_)))
            .notify(|err, dur| warn!(%err, ?dur, "audit append retry"))
            .await
            .map_err(|e| {
                error!(reference = %record.reference, %e, "audit write exhausted retries");
                e
            })?;

        Ok(record)
    }
}
