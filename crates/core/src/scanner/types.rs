//! Scan report types.

use serde::{Deserialize, Serialize};

/// Vulnerability severity as reported by scanners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
    Unknown,
}

impl Severity {
    /// Parse a scanner severity label. Unrecognised labels map to `Unknown`.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_uppercase().as_str() {
            "CRITICAL" => Severity::Critical,
            "HIGH" => Severity::High,
            "MEDIUM" | "MODERATE" => Severity::Medium,
            "LOW" | "NEGLIGIBLE" => Severity::Low,
            _ => Severity::Unknown,
        }
    }

    /// Points subtracted from the security score per finding.
    pub fn penalty(&self) -> u32 {
        match self {
            Severity::Critical => 25,
            Severity::High => 10,
            Severity::Medium => 3,
            Severity::Low => 1,
            Severity::Unknown => 0,
        }
    }
}

/// Number of findings per severity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VulnerabilityCounts {
    pub critical: u32,
    pub high: u32,
    pub medium: u32,
    pub low: u32,
    pub unknown: u32,
}

impl VulnerabilityCounts {
    pub fn record(&mut self, severity: Severity) {
        match severity {
            Severity::Critical => self.critical += 1,
            Severity::High => self.high += 1,
            Severity::Medium => self.medium += 1,
            Severity::Low => self.low += 1,
            Severity::Unknown => self.unknown += 1,
        }
    }

    pub fn total(&self) -> u32 {
        self.critical + self.high + self.medium + self.low + self.unknown
    }

    /// Security score in 0..=100; 100 means no known findings.
    pub fn security_score(&self) -> u8 {
        let penalty = self.critical * Severity::Critical.penalty()
            + self.high * Severity::High.penalty()
            + self.medium * Severity::Medium.penalty()
            + self.low * Severity::Low.penalty();
        100u32.saturating_sub(penalty) as u8
    }
}

/// Outcome of a single scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanReport {
    pub counts: VulnerabilityCounts,
    pub duration_ms: u64,
    /// Name of the scanner that produced the report.
    pub scanner: String,
}

impl ScanReport {
    pub fn security_score(&self) -> u8 {
        self.counts.security_score()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_scan_scores_100() {
        assert_eq!(VulnerabilityCounts::default().security_score(), 100);
    }

    #[test]
    fn test_score_penalties() {
        let counts = VulnerabilityCounts {
            critical: 1,
            high: 2,
            medium: 3,
            low: 4,
            unknown: 9,
        };
        assert_eq!(counts.security_score(), 100 - 25 - 20 - 9 - 4);
        assert_eq!(counts.total(), 19);
    }

    #[test]
    fn test_score_floors_at_zero() {
        let counts = VulnerabilityCounts {
            critical: 5,
            ..Default::default()
        };
        assert_eq!(counts.security_score(), 0);
    }

    #[test]
    fn test_severity_labels() {
        assert_eq!(Severity::from_label("CRITICAL"), Severity::Critical);
        assert_eq!(Severity::from_label("moderate"), Severity::Medium);
        assert_eq!(Severity::from_label("whatever"), Severity::Unknown);
    }
}
