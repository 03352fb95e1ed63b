//! Audit corpus persistence.
//!
//! The corpus is append-only: records are keyed by a monotonic sequence
//! number and never overwritten. Writers hold the store's write lock so
//! chain linkage stays serial; readers take point-in-time snapshots and
//! never block a writer for the duration of a session.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use eva_core::audit::AuditRecord;
use eva_core::checkers::CorpusSnapshot;
use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store backend error: {0}")]
    Backend(#[from] sled::Error),

    #[error("record serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("record {reference} does not extend the chain head")]
    ChainMismatch { reference: String },

    #[error("record rejected: {0}")]
    Integrity(#[from] eva_core::audit::AuditError),
}

/// Append-only audit corpus.
pub trait CorpusStore: Send + Sync {
    /// Append a sealed record. Must reject a record whose `prev_hash`
    /// does not match the current chain head.
    fn append(&self, record: &AuditRecord) -> Result<(), StoreError>;

    fn get(&self, reference: &str) -> Result<Option<AuditRecord>, StoreError>;

    /// Content hash of the newest record, `None` for an empty corpus.
    fn head_hash(&self) -> Result<Option<String>, StoreError>;

    /// Point-in-time digest snapshot for the consistency checker.
    fn snapshot(&self) -> Result<CorpusSnapshot, StoreError>;

    /// The newest `limit` records, newest first.
    fn recent(&self, limit: usize) -> Result<Vec<AuditRecord>, StoreError>;

    fn len(&self) -> Result<usize, StoreError>;

    fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }
}

fn check_extends(record: &AuditRecord, head: Option<&str>) -> Result<(), StoreError> {
    record.verify_integrity()?;
    if record.content.prev_hash.as_deref() != head {
        return Err(StoreError::ChainMismatch {
            reference: record.reference.clone(),
        });
    }
    Ok(())
}

/// Sled-backed corpus. Records live under 8-byte big-endian sequence keys;
/// a second tree maps references to sequence keys for lookups.
pub struct SledCorpusStore {
    records: sled::Tree,
    refs: sled::Tree,
    db: sled::Db,
    write_lock: Mutex<()>,
}

impl SledCorpusStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db = sled::open(path)?;
        let records = db.open_tree("audit_records")?;
        let refs = db.open_tree("audit_refs")?;
        Ok(Self {
            records,
            refs,
            db,
            write_lock: Mutex::new(()),
        })
    }

    fn last_record(&self) -> Result<Option<AuditRecord>, StoreError> {
        match self.records.last()? {
            Some((_, bytes)) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }
}

impl CorpusStore for SledCorpusStore {
    fn append(&self, record: &AuditRecord) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock();

        let head = self.last_record()?;
        check_extends(record, head.as_ref().map(|r| r.content_hash.as_str()))?;

        let seq = self
            .records
            .last()?
            .map(|(key, _)| {
                let mut buf = [0u8; 8];
                buf.copy_from_slice(&key);
                u64::from_be_bytes(buf) + 1
            })
            .unwrap_or(0);

        let bytes = serde_json::to_vec(record)?;
        self.records.insert(seq.to_be_bytes(), bytes)?;
        self.refs
            .insert(record.reference.as_bytes(), seq.to_be_bytes().to_vec())?;
        self.db.flush()?;

        debug!(reference = %record.reference, seq, "audit record appended");
        Ok(())
    }

    fn get(&self, reference: &str) -> Result<Option<AuditRecord>, StoreError> {
        let Some(key) = self.refs.get(reference.as_bytes())? else {
            return Ok(None);
        };
        match self.records.get(&key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn head_hash(&self) -> Result<Option<String>, StoreError> {
        Ok(self.last_record()?.map(|r| r.content_hash))
    }

    fn snapshot(&self) -> Result<CorpusSnapshot, StoreError> {
        let mut cases = Vec::with_capacity(self.records.len());
        for entry in self.records.iter() {
            let (_, bytes) = entry?;
            let record: AuditRecord = serde_json::from_slice(&bytes)?;
            cases.push(record.digest());
        }
        Ok(CorpusSnapshot::from_cases(cases))
    }

    fn recent(&self, limit: usize) -> Result<Vec<AuditRecord>, StoreError> {
        let mut records = Vec::with_capacity(limit);
        for entry in self.records.iter().rev().take(limit) {
            let (_, bytes) = entry?;
            records.push(serde_json::from_slice(&bytes)?);
        }
        Ok(records)
    }

    fn len(&self) -> Result<usize, StoreError> {
        Ok(self.records.len())
    }
}

/// In-memory corpus for tests and ephemeral deployments.
#[derive(Default)]
pub struct MemoryCorpusStore {
    inner: RwLock<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    records: Vec<AuditRecord>,
    by_reference: HashMap<String, usize>,
}

impl MemoryCorpusStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<dyn CorpusStore> {
        Arc::new(Self::new())
    }
}

impl CorpusStore for MemoryCorpusStore {
    fn append(&self, record: &AuditRecord) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        let head = inner.records.last().map(|r| r.content_hash.clone());
        check_extends(record, head.as_deref())?;

        let index = inner.records.len();
        inner.by_reference.insert(record.reference.clone(), index);
        inner.records.push(record.clone());
        Ok(())
    }

    fn get(&self, reference: &str) -> Result<Option<AuditRecord>, StoreError> {
        let inner = self.inner.read();
        Ok(inner
            .by_reference
            .get(reference)
            .map(|&index| inner.records[index].clone()))
    }

    fn head_hash(&self) -> Result<Option<String>, StoreError> {
        Ok(self.inner.read().records.last().map(|r| r.content_hash.clone()))
    }

    fn snapshot(&self) -> Result<CorpusSnapshot, StoreError> {
        Ok(CorpusSnapshot::from_cases(
            self.inner.read().records.iter().map(|r| r.digest()).collect(),
        ))
    }

    fn recent(&self, limit: usize) -> Result<Vec<AuditRecord>, StoreError> {
        Ok(self
            .inner
            .read()
            .records
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect())
    }

    fn len(&self) -> Result<usize, StoreError> {
        Ok(self.inner.read().records.len())
    }
}
