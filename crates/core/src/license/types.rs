//! License policy data types.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by license policy validation and storage.
#[derive(Debug, Error)]
pub enum PolicyError {
    /// Entry score does not fit the band of its tier.
    #[error("score {score} for {identifier} is outside the {tier} band ({min}..={max})")]
    ScoreOutOfBand {
        identifier: String,
        tier: LicenseTier,
        score: u8,
        min: u8,
        max: u8,
    },

    /// Bands overlap or are not ordered.
    #[error("invalid score bands: {0}")]
    InvalidBands(String),

    /// Policy identifiers must not be empty.
    #[error("license identifier cannot be empty")]
    EmptyIdentifier,

    /// The policy tier cannot be stored.
    #[error("tier {0} cannot be assigned to a policy entry")]
    UnassignableTier(LicenseTier),

    /// Database error.
    #[error("database error: {0}")]
    Database(String),
}

/// Policy classification of a license.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LicenseTier {
    /// Always acceptable, no review needed.
    AlwaysAllowed,
    /// Acceptable.
    Allowed,
    /// Discouraged, needs justification.
    Avoid,
    /// Never acceptable.
    Blocked,
    /// Not present in the policy, or the expression could not be read.
    Unknown,
}

impl LicenseTier {
    /// Tiers that policy entries may carry.
    pub const ASSIGNABLE: [LicenseTier; 4] = [
        LicenseTier::AlwaysAllowed,
        LicenseTier::Allowed,
        LicenseTier::Avoid,
        LicenseTier::Blocked,
    ];

    /// Returns the string form used in storage and metrics labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            LicenseTier::AlwaysAllowed => "always_allowed",
            LicenseTier::Allowed => "allowed",
            LicenseTier::Avoid => "avoid",
            LicenseTier::Blocked => "blocked",
            LicenseTier::Unknown => "unknown",
        }
    }
}

impl fmt::Display for LicenseTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LicenseTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "always_allowed" => Ok(LicenseTier::AlwaysAllowed),
            "allowed" => Ok(LicenseTier::Allowed),
            "avoid" => Ok(LicenseTier::Avoid),
            "blocked" => Ok(LicenseTier::Blocked),
            "unknown" => Ok(LicenseTier::Unknown),
            other => Err(format!("unknown license tier: {}", other)),
        }
    }
}

/// Score range allotted to each tier.
///
/// Bands must be ordered `blocked < avoid < allowed <= always_allowed` without
/// overlap, so comparing scores gives the same answer as comparing tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreBands {
    #[serde(default = "default_always_allowed")]
    pub always_allowed: u8,
    #[serde(default = "default_allowed_min")]
    pub allowed_min: u8,
    #[serde(default = "default_avoid_min")]
    pub avoid_min: u8,
    #[serde(default = "default_blocked")]
    pub blocked: u8,
}

fn default_always_allowed() -> u8 {
    100
}

fn default_allowed_min() -> u8 {
    80
}

fn default_avoid_min() -> u8 {
    30
}

fn default_blocked() -> u8 {
    0
}

impl Default for ScoreBands {
    fn default() -> Self {
        Self {
            always_allowed: default_always_allowed(),
            allowed_min: default_allowed_min(),
            avoid_min: default_avoid_min(),
            blocked: default_blocked(),
        }
    }
}

impl ScoreBands {
    /// Check that the bands are ordered and disjoint.
    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.always_allowed > 100 {
            return Err(PolicyError::InvalidBands(
                "always_allowed must be at most 100".to_string(),
            ));
        }
        if !(self.blocked < self.avoid_min
            && self.avoid_min < self.allowed_min
            && self.allowed_min < self.always_allowed)
        {
            return Err(PolicyError::InvalidBands(format!(
                "expected blocked ({}) < avoid_min ({}) < allowed_min ({}) < always_allowed ({})",
                self.blocked, self.avoid_min, self.allowed_min, self.always_allowed
            )));
        }
        Ok(())
    }

    /// Inclusive score range for a tier.
    pub fn range(&self, tier: LicenseTier) -> (u8, u8) {
        match tier {
            LicenseTier::AlwaysAllowed => (self.always_allowed, self.always_allowed),
            LicenseTier::Allowed => (self.allowed_min, self.always_allowed - 1),
            LicenseTier::Avoid => (self.avoid_min, self.allowed_min - 1),
            LicenseTier::Blocked => (self.blocked, self.blocked),
            LicenseTier::Unknown => (self.blocked, self.always_allowed),
        }
    }

    /// The score a tier gets when an entry does not name one.
    pub fn default_score(&self, tier: LicenseTier) -> u8 {
        match tier {
            LicenseTier::AlwaysAllowed => self.always_allowed,
            LicenseTier::Allowed => self.allowed_min,
            LicenseTier::Avoid => self.avoid_min,
            LicenseTier::Blocked => self.blocked,
            LicenseTier::Unknown => self.avoid_min,
        }
    }
}

/// One row of the license policy table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LicensePolicyEntry {
    /// Canonical identifier (e.g. `MIT`, `Apache-2.0`).
    pub identifier: String,
    pub tier: LicenseTier,
    pub score: u8,
    /// Known textual variants that resolve to this entry.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,
}

impl LicensePolicyEntry {
    /// Create an entry with the default score of its tier.
    pub fn new(identifier: impl Into<String>, tier: LicenseTier, bands: &ScoreBands) -> Self {
        Self {
            identifier: identifier.into(),
            tier,
            score: bands.default_score(tier),
            aliases: Vec::new(),
        }
    }

    /// Override the score.
    pub fn with_score(mut self, score: u8) -> Self {
        self.score = score;
        self
    }

    /// Add textual variants.
    pub fn with_aliases<I, S>(mut self, aliases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.aliases.extend(aliases.into_iter().map(Into::into));
        self
    }

    /// Check the entry against the configured bands.
    pub fn validate(&self, bands: &ScoreBands) -> Result<(), PolicyError> {
        if self.identifier.trim().is_empty() {
            return Err(PolicyError::EmptyIdentifier);
        }
        if self.tier == LicenseTier::Unknown {
            return Err(PolicyError::UnassignableTier(self.tier));
        }
        let (min, max) = bands.range(self.tier);
        if self.score < min || self.score > max {
            return Err(PolicyError::ScoreOutOfBand {
                identifier: self.identifier.clone(),
                tier: self.tier,
                score: self.score,
                min,
                max,
            });
        }
        Ok(())
    }
}

/// Result of evaluating a license expression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LicenseVerdict {
    /// Identifier of the license that governs the expression.
    pub identifier: Option<String>,
    pub tier: LicenseTier,
    /// `None` only when there was nothing to evaluate.
    pub score: Option<u8>,
}

impl LicenseVerdict {
    /// Verdict for an empty expression.
    pub fn empty() -> Self {
        Self {
            identifier: None,
            tier: LicenseTier::Unknown,
            score: None,
        }
    }

    /// Verdict for an expression that could not be parsed.
    pub fn malformed(unknown_score: u8) -> Self {
        Self {
            identifier: None,
            tier: LicenseTier::Unknown,
            score: Some(unknown_score),
        }
    }
}
