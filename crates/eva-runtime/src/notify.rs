//! Escalation notification delivery.
//!
//! Delivery is fire-and-forget with respect to the verdict: a session's
//! outcome is sealed before any notice goes out, and a delivery failure is
//! retried with exponential backoff, then logged, never propagated.
//! Critical notices require acknowledgement; a notice that sits
//! unacknowledged past the ack window is re-dispatched to the next
//! recipient in the channel's chain.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use eva_core::types::EscalationLevel;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::config::RetrySettings;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("delivery failed: {0}")]
    Delivery(String),
}

/// One outgoing notice.
#[derive(Debug, Clone, PartialEq)]
pub struct Notice {
    /// Audit reference of the session being escalated
    pub reference: String,

    pub level: EscalationLevel,
    pub summary: String,
    pub requires_ack: bool,
}

/// A delivery target.
#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &str;

    async fn deliver(&self, notice: &Notice) -> Result<(), NotifyError>;
}

/// Default recipient: structured log output.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    async fn deliver(&self, notice: &Notice) -> Result<(), NotifyError> {
        match notice.level {
            EscalationLevel::Critical => {
                error!(reference = %notice.reference, summary = %notice.summary, "escalation")
            }
            EscalationLevel::Warning => {
                warn!(reference = %notice.reference, summary = %notice.summary, "escalation")
            }
            _ => info!(reference = %notice.reference, summary = %notice.summary, "notice"),
        }
        Ok(())
    }
}

/// Per-level recipient chains with an acknowledgement registry.
pub struct NotificationHub {
    channels: BTreeMap<EscalationLevel, Vec<Arc<dyn Notifier>>>,
    acks: Arc<Mutex<HashSet<String>>>,
    ack_window: Duration,
    retry: RetrySettings,
}

impl NotificationHub {
    /// Hub with the log notifier on every level.
    pub fn new(ack_window: Duration, retry: RetrySettings) -> Self {
        let log: Arc<dyn Notifier> = Arc::new(LogNotifier);
        let mut channels: BTreeMap<EscalationLevel, Vec<Arc<dyn Notifier>>> = BTreeMap::new();
        for level in [
            EscalationLevel::Info,
            EscalationLevel::Warning,
            EscalationLevel::Critical,
        ] {
            channels.insert(level, vec![log.clone()]);
        }
        Self {
            channels,
            acks: Arc::new(Mutex::new(HashSet::new())),
            ack_window,
            retry,
        }
    }

    /// Append a recipient to a level's chain.
    pub fn register(&mut self, level: EscalationLevel, notifier: Arc<dyn Notifier>) {
        self.channels.entry(level).or_default().push(notifier);
    }

    /// Record an acknowledgement. Returns false when nothing was pending.
    pub fn acknowledge(&self, reference: &str) -> bool {
        self.acks.lock().remove(reference)
    }

    pub fn pending_acks(&self) -> usize {
        self.acks.lock().len()
    }

    /// Dispatch a notice down its level's chain. Returns the handle of the
    /// spawned delivery task; callers that do not care may drop it.
    pub fn dispatch(&self, notice: Notice) -> tokio::task::JoinHandle<()> {
        let chain = self.channels.get(&notice.level).cloned().unwrap_or_default();
        let acks = self.acks.clone();
        let ack_window = self.ack_window;
        let retry = self.retry.clone();

        if notice.requires_ack {
            acks.lock().insert(notice.reference.clone());
        }

        tokio::spawn(async move {
            for (position, notifier) in chain.iter().enumerate() {
                let backoff = ExponentialBuilder::default()
                    .with_min_delay(retry.base_delay)
                    .with_max_times(retry.max_attempts as usize);
                let delivered = (|| notifier.deliver(&notice))
                    .retry(backoff)
                    .notify(|err, dur| {
                        warn!(
                            reference = %notice.reference,
                            recipient = notifier.name(),
                            %err,
                            ?dur,
                            "notice delivery retry"
                        )
                    })
                    .await;
                match delivered {
                    Ok(()) => {
                        if !notice.requires_ack {
                            return;
                        }
                        tokio::time::sleep(ack_window).await;
                        if !acks.lock().contains(&notice.reference) {
                            return;
                        }
                        warn!(
                            reference = %notice.reference,
                            recipient = notifier.name(),
                            "notice unacknowledged, escalating to next recipient"
                        );
                    }
                    Err(e) => {
                        warn!(
                            reference = %notice.reference,
                            recipient = notifier.name(),
                            %e,
                            "notice delivery exhausted retries"
                        );
                    }
                }
                if position + 1 == chain.len() {
                    error!(
                        reference = %notice.reference,
                        "notification chain exhausted without acknowledgement"
                    );
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as SyncMutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct RecordingNotifier {
        name: String,
        delivered: Arc<SyncMutex<Vec<String>>>,
        fail: bool,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        fn name(&self) -> &str {
            &self.name
        }

        async fn deliver(&self, notice: &Notice) -> Result<(), NotifyError> {
            if self.fail {
                return Err(NotifyError::Delivery("injected".into()));
            }
            self.delivered.lock().push(format!("{}:{}", self.name, notice.reference));
            Ok(())
        }
    }

    fn recorder(name: &str, log: &Arc<SyncMutex<Vec<String>>>, fail: bool) -> Arc<dyn Notifier> {
        Arc::new(RecordingNotifier {
            name: name.into(),
            delivered: log.clone(),
            fail,
        })
    }

    fn notice(requires_ack: bool) -> Notice {
        Notice {
            reference: "EVA-1".into(),
            level: EscalationLevel::Critical,
            summary: "blocked".into(),
            requires_ack,
        }
    }

    fn hub(ack_window: Duration) -> NotificationHub {
        NotificationHub::new(
            ack_window,
            RetrySettings {
                max_attempts: 2,
                base_delay: Duration::from_millis(1),
            },
        )
    }

    #[tokio::test]
    async fn test_single_delivery_without_ack() {
        let log = Arc::new(SyncMutex::new(Vec::new()));
        let mut hub = hub(Duration::from_secs(60));
        hub.register(EscalationLevel::Critical, recorder("primary", &log, false));

        hub.dispatch(notice(false)).await.unwrap();
        // Log notifier sits first in the chain; the recording notifier is
        // never reached because delivery stops after the first success
        assert!(log.lock().is_empty());
        assert_eq!(hub.pending_acks(), 0);
    }

    #[tokio::test]
    async fn test_ack_stops_the_chain() {
        let log = Arc::new(SyncMutex::new(Vec::new()));
        let mut hub = hub(Duration::from_millis(50));
        hub.register(EscalationLevel::Critical, recorder("secondary", &log, false));

        let handle = hub.dispatch(notice(true));
        assert_eq!(hub.pending_acks(), 1);
        assert!(hub.acknowledge("EVA-1"));

        handle.await.unwrap();
        // Acked during the first recipient's window; secondary never called
        assert!(log.lock().is_empty());
        assert_eq!(hub.pending_acks(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unacknowledged_notice_escalates_down_the_chain() {
        let log = Arc::new(SyncMutex::new(Vec::new()));
        let mut hub = hub(Duration::from_secs(60));
        hub.register(EscalationLevel::Critical, recorder("secondary", &log, false));

        let handle = hub.dispatch(notice(true));
        handle.await.unwrap();

        // The log notifier's window expired unacknowledged, so the
        // secondary recipient was tried too
        assert_eq!(log.lock().as_slice(), ["secondary:EVA-1"]);
        assert_eq!(hub.pending_acks(), 1);
    }

    /// Fails the first `failures` deliveries, then records.
    struct FlakyNotifier {
        delivered: Arc<SyncMutex<Vec<String>>>,
        failures: AtomicU32,
    }

    #[async_trait]
    impl Notifier for FlakyNotifier {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn deliver(&self, notice: &Notice) -> Result<(), NotifyError> {
            if self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(NotifyError::Delivery("injected".into()));
            }
            self.delivered.lock().push(format!("flaky:{}", notice.reference));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_transient_delivery_failure_is_retried() {
        let log = Arc::new(SyncMutex::new(Vec::new()));
        let mut hub = hub(Duration::from_secs(60));
        // A single-recipient chain; the notice must survive two failures
        hub.channels.insert(
            EscalationLevel::Critical,
            vec![Arc::new(FlakyNotifier {
                delivered: log.clone(),
                failures: AtomicU32::new(2),
            })],
        );

        hub.dispatch(notice(false)).await.unwrap();
        assert_eq!(log.lock().as_slice(), ["flaky:EVA-1"]);
    }

    #[tokio::test]
    async fn test_exhausted_delivery_falls_to_the_next_recipient() {
        let log = Arc::new(SyncMutex::new(Vec::new()));
        let mut hub = hub(Duration::from_secs(60));
        // Replace the default chain entirely
        hub.channels.insert(
            EscalationLevel::Critical,
            vec![
                recorder("broken", &log, true),
                recorder("backup", &log, false),
            ],
        );

        hub.dispatch(notice(false)).await.unwrap();
        assert_eq!(log.lock().as_slice(), ["backup:EVA-1"]);
    }

    #[tokio::test]
    async fn test_acknowledge_unknown_reference() {
        let hub = hub(Duration::from_secs(60));
        assert!(!hub.acknowledge("EVA-missing"));
    }
}
