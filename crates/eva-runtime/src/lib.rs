//! # eva-runtime
//!
//! Async execution layer around the deterministic `eva-core` pipeline.
//!
//! This crate owns everything stateful: the append-only audit corpus, the
//! single audit writer with its retry policy, versioned threshold
//! profiles, the plan registry, escalation notification delivery and the
//! concurrent session runner.
//!
//! ## Concurrency model
//!
//! - Sessions run concurrently up to a configured limit; each takes its
//!   profile and corpus snapshots at start
//! - Audit writes are serialized through one writer so chain linkage is
//!   always against the true head
//! - Notification delivery is spawned after the record is sealed and can
//!   never affect a verdict
//!
//! ## Example
//!
//! ```rust,ignore
//! use eva_runtime::{RuntimeConfig, SessionRunner, MemoryCorpusStore};
//! use std::sync::Arc;
//!
//! let runner = SessionRunner::new(RuntimeConfig::default(), Arc::new(MemoryCorpusStore::new()))?;
//! let output = runner.validate(decision).await;
//! println!("{} -> {:?}", output.status, output.audit_reference);
//! ```

pub mod config;
pub mod notify;
pub mod profiles;
pub mod recorder;
pub mod runner;
pub mod store;

pub use config::{ConfigError, RetrySettings, RuntimeConfig, ValidationMode};
pub use notify::{LogNotifier, Notice, NotificationHub, Notifier, NotifyError};
pub use profiles::ProfileStore;
pub use recorder::{AuditRecorder, RecorderError};
pub use runner::{HealthReport, RuntimeError, SessionRunner};
pub use store::{CorpusStore, MemoryCorpusStore, SledCorpusStore, StoreError};

use std::sync::Arc;

/// Build a runner from config alone, opening the sled corpus when a store
/// path is configured and falling back to the in-memory store otherwise.
pub fn runner_from_config(config: RuntimeConfig) -> Result<SessionRunner, RuntimeError> {
    let store: Arc<dyn CorpusStore> = match &config.store_path {
        Some(path) => Arc::new(SledCorpusStore::open(path)?),
        None => Arc::new(MemoryCorpusStore::new()),
    };
    SessionRunner::new(config, store)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_runner_from_config_with_sled_store() {
        let dir = tempfile::tempdir().unwrap();
        let config = RuntimeConfig {
            store_path: Some(dir.path().join("corpus")),
            ..Default::default()
        };
        let runner = runner_from_config(config).unwrap();
        assert_eq!(runner.health().corpus_records, 0);
    }
}
