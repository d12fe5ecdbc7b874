//! Immutable view of the license policy table.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::warn;

use super::normalize::{lookup_keys, normalize_key};
use super::types::{LicensePolicyEntry, ScoreBands};

/// Score given to identifiers the policy does not know about.
///
/// Sits inside the default `avoid` band so unknown licenses need review but are
/// never scored as blocked.
pub const DEFAULT_UNKNOWN_SCORE: u8 = 50;

/// A consistent, read-only copy of the policy used for one batch.
#[derive(Debug, Clone)]
pub struct PolicySnapshot {
    entries: Vec<LicensePolicyEntry>,
    index: HashMap<String, usize>,
    bands: ScoreBands,
    unknown_score: u8,
    loaded_at: DateTime<Utc>,
}

impl PolicySnapshot {
    /// Build a snapshot, indexing identifiers and aliases by their folded key.
    ///
    /// When two entries claim the same key the first one wins.
    pub fn new(entries: Vec<LicensePolicyEntry>, bands: ScoreBands, unknown_score: u8) -> Self {
        let mut index = HashMap::new();
        for (idx, entry) in entries.iter().enumerate() {
            let keys = std::iter::once(&entry.identifier).chain(entry.aliases.iter());
            for key in keys.map(|k| normalize_key(k)) {
                if let Some(existing) = index.get(&key) {
                    let existing: &LicensePolicyEntry = &entries[*existing];
                    if existing.identifier != entry.identifier {
                        warn!(
                            "License key '{}' of {} already maps to {}, ignoring",
                            key, entry.identifier, existing.identifier
                        );
                    }
                    continue;
                }
                index.insert(key, idx);
            }
        }

        Self {
            entries,
            index,
            bands,
            unknown_score,
            loaded_at: Utc::now(),
        }
    }

    /// An empty policy; every identifier is unknown.
    pub fn empty() -> Self {
        Self::new(Vec::new(), ScoreBands::default(), DEFAULT_UNKNOWN_SCORE)
    }

    /// Find the entry for an identifier, trying its variants.
    pub fn lookup(&self, identifier: &str) -> Option<&LicensePolicyEntry> {
        lookup_keys(identifier)
            .iter()
            .find_map(|key| self.index.get(key))
            .map(|idx| &self.entries[*idx])
    }

    pub fn unknown_score(&self) -> u8 {
        self.unknown_score
    }

    pub fn bands(&self) -> &ScoreBands {
        &self.bands
    }

    pub fn entries(&self) -> &[LicensePolicyEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// When the snapshot was built.
    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::license::defaults::default_policies;
    use crate::license::LicenseTier;

    fn snapshot() -> PolicySnapshot {
        let bands = ScoreBands::default();
        PolicySnapshot::new(default_policies(&bands), bands, DEFAULT_UNKNOWN_SCORE)
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let policy = snapshot();
        for variant in ["MIT", "mit", "MIT License", "Mit license"] {
            let entry = policy.lookup(variant).expect(variant);
            assert_eq!(entry.identifier, "MIT");
        }
    }

    #[test]
    fn test_lookup_by_alias() {
        let policy = snapshot();
        assert_eq!(policy.lookup("Apache License 2.0").unwrap().identifier, "Apache-2.0");
        assert_eq!(policy.lookup("gplv3").unwrap().tier, LicenseTier::Blocked);
    }

    #[test]
    fn test_lookup_falls_back_to_base_identifier() {
        let policy = snapshot();
        assert_eq!(policy.lookup("GPL-3.0-or-later").unwrap().identifier, "GPL-3.0");
        assert_eq!(policy.lookup("GPL-2.0+").unwrap().identifier, "GPL-2.0");
    }

    #[test]
    fn test_lookup_miss() {
        assert!(snapshot().lookup("WTFPL-9").is_none());
        assert!(PolicySnapshot::empty().lookup("MIT").is_none());
    }

    #[test]
    fn test_first_entry_wins_on_duplicate_key() {
        let bands = ScoreBands::default();
        let policy = PolicySnapshot::new(
            vec![
                LicensePolicyEntry::new("MIT", LicenseTier::AlwaysAllowed, &bands),
                LicensePolicyEntry::new("mit", LicenseTier::Blocked, &bands),
            ],
            bands,
            DEFAULT_UNKNOWN_SCORE,
        );
        assert_eq!(policy.lookup("MIT").unwrap().tier, LicenseTier::AlwaysAllowed);
    }
}
