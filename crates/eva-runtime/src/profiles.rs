//! Threshold profile management.
//!
//! Profiles are immutable snapshots: an update never mutates the active
//! profile in place, it validates a candidate, stamps it with the next
//! version number and appends it to the history. Sessions clone the active
//! snapshot at start and are unaffected by updates that land mid-flight.
//! Every version ever activated stays in the history, so rollback is an
//! ordinary forward activation of an old snapshot's settings.

use eva_core::profile::{ProfileError, ThresholdProfile};
use parking_lot::RwLock;
use tracing::info;

/// Versioned profile history. The newest entry is active.
pub struct ProfileStore {
    history: RwLock<Vec<ThresholdProfile>>,
}

impl ProfileStore {
    pub fn new(initial: ThresholdProfile) -> Result<Self, ProfileError> {
        initial.validate()?;
        Ok(Self {
            history: RwLock::new(vec![initial]),
        })
    }

    /// Store seeded from a named preset.
    pub fn from_preset(name: &str) -> Result<Self, ProfileError> {
        Self::new(ThresholdProfile::preset(name)?)
    }

    /// Snapshot of the active profile.
    pub fn active(&self) -> ThresholdProfile {
        self.history
            .read()
            .last()
            .expect("profile history is never empty")
            .clone()
    }

    pub fn active_version(&self) -> u32 {
        self.active().version
    }

    /// Validate a candidate and activate it under the next version.
    pub fn update(&self, candidate: ThresholdProfile) -> Result<u32, ProfileError> {
        let mut history = self.history.write();
        let current = history.last().expect("profile history is never empty");
        let next = current.next_version(candidate)?;
        let version = next.version;
        info!(name = %next.name, version, "threshold profile updated");
        history.push(next);
        Ok(version)
    }

    /// Activate a preset's settings under the next version.
    pub fn activate_preset(&self, name: &str) -> Result<u32, ProfileError> {
        self.update(ThresholdProfile::preset(name)?)
    }

    /// Reactivate an earlier version's settings under a new version.
    pub fn rollback(&self, version: u32) -> Result<u32, ProfileError> {
        let target = {
            let history = self.history.read();
            history
                .iter()
                .find(|p| p.version == version)
                .cloned()
                .ok_or_else(|| ProfileError::Invalid(format!("unknown profile version {}", version)))?
        };
        self.update(target)
    }

    /// All versions, oldest first.
    pub fn history(&self) -> Vec<ThresholdProfile> {
        self.history.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_is_an_immutable_snapshot() {
        let store = ProfileStore::from_preset("standard").unwrap();
        let before = store.active();

        let mut candidate = store.active();
        candidate.max_harm_score = 5.5;
        let version = store.update(candidate).unwrap();

        assert_eq!(version, 2);
        assert_eq!(store.active().max_harm_score, 5.5);
        // The session that took `before` still sees the old value
        assert_eq!(before.max_harm_score, 7.0);
        assert_eq!(store.history().len(), 2);
    }

    #[test]
    fn test_invalid_candidate_leaves_active_untouched() {
        let store = ProfileStore::from_preset("standard").unwrap();
        let mut candidate = store.active();
        candidate.min_confidence_level = 4.0;

        assert!(store.update(candidate).is_err());
        assert_eq!(store.active_version(), 1);
    }

    #[test]
    fn test_preset_activation_and_rollback() {
        let store = ProfileStore::from_preset("standard").unwrap();
        store.activate_preset("medical").unwrap();
        assert_eq!(store.active().max_harm_score, 5.0);

        let version = store.rollback(1).unwrap();
        // Rollback moves forward in version space
        assert_eq!(version, 3);
        assert_eq!(store.active().max_harm_score, 7.0);

        assert!(store.rollback(99).is_err());
    }
}
