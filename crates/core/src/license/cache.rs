//! Process-local license policy cache.
//!
//! Evaluations read a [`PolicySnapshot`] handed out by [`LicenseCache::snapshot`].
//! A refresh builds a complete new snapshot and swaps the pointer, so a caller
//! holding the previous `Arc` keeps seeing the previous policy.

use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::snapshot::PolicySnapshot;
use super::store::LicensePolicyStore;
use super::types::{PolicyError, ScoreBands};

struct CacheState {
    snapshot: Arc<PolicySnapshot>,
    refreshed_at: Instant,
}

/// Refreshable snapshot of the license policy table.
pub struct LicenseCache {
    source: Arc<dyn LicensePolicyStore>,
    bands: ScoreBands,
    unknown_score: u8,
    refresh_interval: Duration,
    state: RwLock<CacheState>,
}

impl LicenseCache {
    /// Load the policy from `source`. Fails if the initial load fails.
    pub fn load(
        source: Arc<dyn LicensePolicyStore>,
        bands: ScoreBands,
        unknown_score: u8,
        refresh_interval: Duration,
    ) -> Result<Self, PolicyError> {
        let snapshot = Self::build(source.as_ref(), bands, unknown_score)?;
        info!("License cache loaded with {} policies", snapshot.len());
        Ok(Self {
            source,
            bands,
            unknown_score,
            refresh_interval,
            state: RwLock::new(CacheState {
                snapshot: Arc::new(snapshot),
                refreshed_at: Instant::now(),
            }),
        })
    }

    fn build(
        source: &dyn LicensePolicyStore,
        bands: ScoreBands,
        unknown_score: u8,
    ) -> Result<PolicySnapshot, PolicyError> {
        let entries = source.list_policies()?;
        Ok(PolicySnapshot::new(entries, bands, unknown_score))
    }

    /// The current snapshot.
    pub fn snapshot(&self) -> Arc<PolicySnapshot> {
        Arc::clone(&self.state.read().unwrap().snapshot)
    }

    /// Reload the policy and swap it in. On failure the previous snapshot stays.
    pub fn refresh(&self) -> Result<Arc<PolicySnapshot>, PolicyError> {
        let snapshot = Arc::new(Self::build(
            self.source.as_ref(),
            self.bands,
            self.unknown_score,
        )?);

        let mut state = self.state.write().unwrap();
        state.snapshot = Arc::clone(&snapshot);
        state.refreshed_at = Instant::now();
        debug!("License cache refreshed ({} policies)", snapshot.len());
        Ok(snapshot)
    }

    /// Refresh if the refresh interval has elapsed, then return the current
    /// snapshot. Refresh errors are logged, not returned.
    pub fn snapshot_for_cycle(&self) -> Arc<PolicySnapshot> {
        let stale = self.state.read().unwrap().refreshed_at.elapsed() >= self.refresh_interval;
        if stale {
            if let Err(e) = self.refresh() {
                warn!("License cache refresh failed, keeping previous policy: {}", e);
            }
        }
        self.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::license::{
        evaluate, LicensePolicyEntry, LicenseTier, SqliteLicensePolicyStore, DEFAULT_UNKNOWN_SCORE,
    };

    fn setup(refresh: Duration) -> (Arc<SqliteLicensePolicyStore>, LicenseCache) {
        let bands = ScoreBands::default();
        let store = Arc::new(SqliteLicensePolicyStore::in_memory(bands).unwrap());
        store
            .upsert_policy(&LicensePolicyEntry::new("MIT", LicenseTier::AlwaysAllowed, &bands))
            .unwrap();
        let cache = LicenseCache::load(
            Arc::clone(&store) as Arc<dyn LicensePolicyStore>,
            bands,
            DEFAULT_UNKNOWN_SCORE,
            refresh,
        )
        .unwrap();
        (store, cache)
    }

    #[test]
    fn test_held_snapshot_is_not_affected_by_refresh() {
        let (store, cache) = setup(Duration::from_secs(3600));
        let before = cache.snapshot();

        let bands = ScoreBands::default();
        store
            .upsert_policy(&LicensePolicyEntry::new("MIT", LicenseTier::Blocked, &bands))
            .unwrap();
        cache.refresh().unwrap();

        assert_eq!(evaluate("MIT", &before).tier, LicenseTier::AlwaysAllowed);
        assert_eq!(evaluate("MIT", &cache.snapshot()).tier, LicenseTier::Blocked);
    }

    #[test]
    fn test_snapshot_for_cycle_respects_interval() {
        let (store, cache) = setup(Duration::from_secs(3600));
        let bands = ScoreBands::default();
        store
            .upsert_policy(&LicensePolicyEntry::new("ISC", LicenseTier::Allowed, &bands))
            .unwrap();

        // Interval not elapsed: still the old policy.
        assert!(cache.snapshot_for_cycle().lookup("ISC").is_none());
    }

    #[test]
    fn test_snapshot_for_cycle_refreshes_when_stale() {
        let (store, cache) = setup(Duration::ZERO);
        let bands = ScoreBands::default();
        store
            .upsert_policy(&LicensePolicyEntry::new("ISC", LicenseTier::Allowed, &bands))
            .unwrap();

        assert!(cache.snapshot_for_cycle().lookup("ISC").is_some());
    }
}
