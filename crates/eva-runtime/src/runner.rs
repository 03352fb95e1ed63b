//! Session execution.
//!
//! The runner owns everything a session touches: the profile store, the
//! plan registry, the corpus, the recorder and the notification hub.
//! Sessions run concurrently up to the configured limit; each takes its
//! own profile and corpus snapshots at start, so a config update or a
//! corpus write mid-flight never changes a running session's inputs.
//!
//! The checker stage runs on the blocking pool, under the inline deadline
//! when the runner is in inline mode; batch sessions run to completion.
//! A session that misses the deadline, panics or hits an internal error is
//! closed out with a fail-closed audit record and a `VALIDATION_ERROR`
//! output; if even that record cannot be written, the output still reports
//! the error with no audit reference. No path releases a decision without
//! a sealed record.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use eva_core::audit::{AuditRecord, CustodyEntry};
use eva_core::checkers::CorpusSnapshot;
use eva_core::plan::{ExecutionPlan, PlanError, PlanRegistry};
use eva_core::profile::ProfileError;
use eva_core::session::error_output;
use eva_core::{
    DecisionRecord, FeedbackEmitter, FeedbackWindow, SessionReport, ThresholdProfile,
    ValidationOutput, ValidationSession, ValidationStatus,
};
use futures::stream::{self, StreamExt};
use parking_lot::RwLock;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{oneshot, Semaphore};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{RuntimeConfig, ValidationMode};
use crate::notify::{Notice, NotificationHub, Notifier};
use crate::recorder::AuditRecorder;
use crate::profiles::ProfileStore;
use crate::store::{CorpusStore, StoreError};

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("batch of {size} exceeds limit {max}")]
    BatchTooLarge { size: usize, max: usize },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Profile(#[from] ProfileError),

    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error(transparent)]
    Audit(#[from] eva_core::audit::AuditError),

    #[error("runtime task failed: {0}")]
    Task(String),
}

#[derive(Debug, Default)]
struct Stats {
    total: AtomicU64,
    validated: AtomicU64,
    escalated: AtomicU64,
    errors: AtomicU64,
}

/// Snapshot for the health surface.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub sessions_total: u64,
    pub sessions_validated: u64,
    pub sessions_escalated: u64,
    pub sessions_errored: u64,
    pub corpus_records: usize,
    pub active_profile: String,
    pub profile_version: u32,
    pub plan_version: u32,
    pub pending_acks: usize,
}

/// Concurrent validation driver.
pub struct SessionRunner {
    config: RuntimeConfig,
    profiles: ProfileStore,
    plans: RwLock<PlanRegistry>,
    store: Arc<dyn CorpusStore>,
    recorder: AuditRecorder,
    hub: NotificationHub,
    limiter: Semaphore,
    stats: Stats,
}

impl SessionRunner {
    pub fn new(config: RuntimeConfig, store: Arc<dyn CorpusStore>) -> Result<Self, RuntimeError> {
        let profiles = ProfileStore::from_preset(&config.profile)?;
        let recorder = AuditRecorder::new(store.clone(), config.audit_retry.clone());
        let hub = NotificationHub::new(config.ack_window, config.notify_retry.clone());
        let limiter = Semaphore::new(config.max_concurrent_sessions);
        Ok(Self {
            config,
            profiles,
            plans: RwLock::new(PlanRegistry::new()),
            store,
            recorder,
            hub,
            limiter,
            stats: Stats::default(),
        })
    }

    /// Add a notification recipient to a level's chain.
    pub fn with_notifier(
        mut self,
        level: eva_core::EscalationLevel,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        self.hub.register(level, notifier);
        self
    }

    /// Validate one decision. Infallible by contract: every failure mode
    /// maps to a fail-closed `VALIDATION_ERROR` output.
    pub async fn validate(&self, decision: DecisionRecord) -> ValidationOutput {
        let (_tx, never) = oneshot::channel();
        self.validate_cancellable(decision, never).await
    }

    /// Validate with a cancellation signal. Cancellation is honored only
    /// until the audit write begins; after that the session completes.
    pub async fn validate_cancellable(
        &self,
        decision: DecisionRecord,
        cancel: oneshot::Receiver<()>,
    ) -> ValidationOutput {
        self.run_session(decision, cancel, self.inline_deadline()).await
    }

    /// The checker deadline for a single session; batch mode has none.
    fn inline_deadline(&self) -> Option<Duration> {
        match self.config.mode {
            ValidationMode::Inline => Some(self.config.inline_timeout),
            ValidationMode::Batch => None,
        }
    }

    async fn run_session(
        &self,
        decision: DecisionRecord,
        mut cancel: oneshot::Receiver<()>,
        deadline: Option<Duration>,
    ) -> ValidationOutput {
        self.stats.total.fetch_add(1, Ordering::Relaxed);
        let Ok(_permit) = self.limiter.acquire().await else {
            // Semaphore closure only happens on shutdown
            self.stats.errors.fetch_add(1, Ordering::Relaxed);
            return error_output(Uuid::new_v4(), None, "runner shutting down");
        };

        let session = ValidationSession::new();
        let session_id = session.id();
        let profile = self.profiles.active();
        let plan = self.plans.read().plan_for(&decision, &profile);

        debug!(%session_id, decision = %decision.id, mode = ?plan.mode, "session started");

        // A dropped sender disables the branch; only an explicit signal
        // cancels
        let checked = tokio::select! {
            biased;
            Ok(()) = &mut cancel => {
                info!(%session_id, "session cancelled before audit");
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                return error_output(session_id, None, "cancelled before audit");
            }
            outcome = self.run_checkers(session, &decision, &profile, plan, deadline) => outcome,
        };

        let (mut session, report) = match checked {
            Ok(pair) => pair,
            Err(reason) => {
                return self
                    .fail_closed(session_id, &decision, &profile, plan, &reason)
                    .await;
            }
        };

        // Point of no return: from here the session always completes
        let custody = self.drain_plan_custody();
        let record = match self.recorder.record(&report, &profile, custody).await {
            Ok(record) => record,
            Err(e) => {
                error!(%session_id, %e, "audit write failed, withholding release");
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                return error_output(session_id, None, "audit write failed");
            }
        };
        if let Err(e) = session.mark_audited() {
            warn!(%session_id, %e, "session state out of order");
        }

        if let Some(plan) = &report.escalation.notification {
            self.hub.dispatch(Notice {
                reference: record.reference.clone(),
                level: plan.level,
                summary: plan.summary.clone(),
                requires_ack: plan.requires_ack,
            });
        }
        let _ = session.mark_routed();

        let signals = self.emit_feedback(&report).await;
        let _ = session.mark_fed_back();

        match report.status {
            ValidationStatus::Validated => self.stats.validated.fetch_add(1, Ordering::Relaxed),
            _ => self.stats.escalated.fetch_add(1, Ordering::Relaxed),
        };
        debug!(%session_id, reference = %record.reference, status = %report.status, "session complete");

        report.output(record.reference, Some(FeedbackEmitter::summarize(&signals)))
    }

    /// Validate a batch, preserving input order in the outputs. Batch
    /// sessions are never subject to the inline deadline; each runs to
    /// completion.
    pub async fn validate_batch(
        &self,
        decisions: Vec<DecisionRecord>,
    ) -> Result<Vec<ValidationOutput>, RuntimeError> {
        if decisions.len() > self.config.batch_max_size {
            return Err(RuntimeError::BatchTooLarge {
                size: decisions.len(),
                max: self.config.batch_max_size,
            });
        }

        let outputs = stream::iter(decisions)
            .map(|decision| {
                let (_tx, never) = oneshot::channel();
                self.run_session(decision, never, None)
            })
            .buffered(self.config.max_concurrent_sessions)
            .collect()
            .await;
        Ok(outputs)
    }

    /// Fetch a sealed record by reference, verifying its seal on the way
    /// out.
    pub async fn audit_record(&self, reference: &str) -> Result<Option<AuditRecord>, RuntimeError> {
        let store = self.store.clone();
        let reference = reference.to_string();
        let record = tokio::task::spawn_blocking(move || store.get(&reference))
            .await
            .map_err(|e| RuntimeError::Task(e.to_string()))?;
        match record? {
            Some(record) => {
                record.verify_integrity()?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// Verify the whole chain; returns the number of records checked.
    pub async fn verify_chain(&self) -> Result<usize, RuntimeError> {
        let store = self.store.clone();
        let mut records = tokio::task::spawn_blocking(move || {
            let len = store.len()?;
            store.recent(len)
        })
        .await
        .map_err(|e| RuntimeError::Task(e.to_string()))??;
        records.reverse();
        eva_core::audit::verify_chain(&records)?;
        Ok(records.len())
    }

    pub fn acknowledge(&self, reference: &str) -> bool {
        self.hub.acknowledge(reference)
    }

    pub fn update_profile(&self, candidate: ThresholdProfile) -> Result<u32, RuntimeError> {
        Ok(self.profiles.update(candidate)?)
    }

    pub fn activate_profile_preset(&self, name: &str) -> Result<u32, RuntimeError> {
        Ok(self.profiles.activate_preset(name)?)
    }

    pub fn rollback_profile(&self, version: u32) -> Result<u32, RuntimeError> {
        Ok(self.profiles.rollback(version)?)
    }

    pub fn active_profile(&self) -> ThresholdProfile {
        self.profiles.active()
    }

    pub fn activate_plan(
        &self,
        fast: ExecutionPlan,
        deep: ExecutionPlan,
        deep_confidence_bound: f64,
        note: &str,
    ) -> u32 {
        self.plans
            .write()
            .activate(fast, deep, deep_confidence_bound, note)
    }

    pub fn rollback_plan(&self, version: u32, note: &str) -> Result<u32, RuntimeError> {
        Ok(self.plans.write().rollback(version, note)?)
    }

    pub fn health(&self) -> HealthReport {
        let profile = self.profiles.active();
        HealthReport {
            status: "ok",
            sessions_total: self.stats.total.load(Ordering::Relaxed),
            sessions_validated: self.stats.validated.load(Ordering::Relaxed),
            sessions_escalated: self.stats.escalated.load(Ordering::Relaxed),
            sessions_errored: self.stats.errors.load(Ordering::Relaxed),
            corpus_records: self.store.len().unwrap_or(0),
            active_profile: profile.name,
            profile_version: profile.version,
            plan_version: self.plans.read().active_version(),
            pending_acks: self.hub.pending_acks(),
        }
    }

    /// Snapshot the corpus and run the checker stage, under the deadline
    /// when one applies.
    async fn run_checkers(
        &self,
        session: ValidationSession,
        decision: &DecisionRecord,
        profile: &ThresholdProfile,
        plan: ExecutionPlan,
        deadline: Option<Duration>,
    ) -> Result<(ValidationSession, SessionReport), String> {
        let snapshot = if plan.run_consistency {
            let store = self.store.clone();
            tokio::task::spawn_blocking(move || store.snapshot())
                .await
                .map_err(|e| format!("snapshot task failed: {}", e))?
                .map_err(|e| format!("corpus snapshot failed: {}", e))?
        } else {
            CorpusSnapshot::default()
        };

        let task = tokio::task::spawn_blocking({
            let decision = decision.clone();
            let profile = profile.clone();
            let mut session = session;
            move || {
                session
                    .execute(&decision, &profile, plan, &snapshot)
                    .map(|report| (session, report))
            }
        });

        let joined = match deadline {
            Some(deadline) => match tokio::time::timeout(deadline, task).await {
                Err(_) => return Err("checker deadline exceeded".into()),
                Ok(joined) => joined,
            },
            None => task.await,
        };
        match joined {
            Err(join) => Err(format!("checker task failed: {}", join)),
            Ok(Err(e)) => Err(format!("session error: {}", e)),
            Ok(Ok(pair)) => Ok(pair),
        }
    }

    /// Close a failed session: seal a fail-closed record if at all
    /// possible, then report `VALIDATION_ERROR`.
    async fn fail_closed(
        &self,
        session_id: Uuid,
        decision: &DecisionRecord,
        profile: &ThresholdProfile,
        plan: ExecutionPlan,
        reason: &str,
    ) -> ValidationOutput {
        self.stats.errors.fetch_add(1, Ordering::Relaxed);
        warn!(%session_id, reason, "session failed, closing out");

        let reference = match self
            .recorder
            .record_error(session_id, decision, profile, plan.version, reason)
            .await
        {
            Ok(record) => {
                self.hub.dispatch(Notice {
                    reference: record.reference.clone(),
                    level: eva_core::EscalationLevel::Critical,
                    summary: format!("validation error: {}", reason),
                    requires_ack: true,
                });
                Some(record.reference)
            }
            Err(e) => {
                error!(%session_id, %e, "fail-closed audit record could not be written");
                None
            }
        };

        error_output(session_id, reference, reason)
    }

    fn drain_plan_custody(&self) -> Vec<CustodyEntry> {
        self.plans
            .write()
            .drain_changes()
            .into_iter()
            .map(|change| CustodyEntry {
                at: change.at,
                actor: "plan-registry".into(),
                action: format!(
                    "plan v{} -> v{}: {}",
                    change.from_version, change.to_version, change.note
                ),
            })
            .collect()
    }

    async fn emit_feedback(&self, report: &SessionReport) -> Vec<eva_core::FeedbackSignal> {
        let store = self.store.clone();
        let limit = self.config.feedback_window_cases;
        let window = match tokio::task::spawn_blocking(move || store.recent(limit)).await {
            Ok(Ok(records)) => {
                let mut window = FeedbackWindow::default();
                for record in &records {
                    window.observe(record);
                }
                window
            }
            Ok(Err(e)) => {
                warn!(%e, "feedback window unavailable");
                FeedbackWindow::default()
            }
            Err(e) => {
                warn!(%e, "feedback window task failed");
                FeedbackWindow::default()
            }
        };

        let signals = FeedbackEmitter::new().emit(
            &report.findings,
            &report.escalation,
            report.validation_confidence,
            &window,
        );
        for signal in &signals {
            debug!(target = signal.target.as_str(), code = %signal.code, "feedback signal");
        }
        signals
    }
}
