use super::{types::Config, ConfigError};
use crate::worker::StageKind;

/// Validate configuration:
/// - worker batch sizes and intervals are positive
/// - score bands are ordered and the unknown score is a valid score
/// - configured policies fit their tier's band
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    for kind in StageKind::ALL {
        let worker = config.workers.resolve(kind);
        if worker.batch_size == 0 {
            return Err(ConfigError::ValidationError(format!(
                "workers.{}.batch_size cannot be 0",
                kind
            )));
        }
        if worker.poll_interval_secs == 0 {
            return Err(ConfigError::ValidationError(format!(
                "workers.{}.poll_interval_secs cannot be 0",
                kind
            )));
        }
        if worker.stuck_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(format!(
                "workers.{}.stuck_timeout_secs cannot be 0",
                kind
            )));
        }
    }

    let licenses = &config.licenses;
    if licenses.refresh_interval_secs == 0 {
        return Err(ConfigError::ValidationError(
            "licenses.refresh_interval_secs cannot be 0".to_string(),
        ));
    }
    if licenses.unknown_score > 100 {
        return Err(ConfigError::ValidationError(
            "licenses.unknown_score must be at most 100".to_string(),
        ));
    }
    licenses
        .bands
        .validate()
        .map_err(|e| ConfigError::ValidationError(e.to_string()))?;
    for policy in &licenses.policy {
        policy
            .to_entry(&licenses.bands)
            .validate(&licenses.bands)
            .map_err(|e| ConfigError::ValidationError(e.to_string()))?;
    }

    if config.approval.min_license_score > 100 || config.approval.min_security_score > 100 {
        return Err(ConfigError::ValidationError(
            "approval thresholds must be at most 100".to_string(),
        ));
    }

    if config.metrics.enabled && config.metrics.port == 0 {
        return Err(ConfigError::ValidationError(
            "metrics.port cannot be 0".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PolicyOverride;
    use crate::license::LicenseTier;

    #[test]
    fn test_validate_default_config() {
        assert!(validate_config(&Config::default()).is_ok());
    }

    #[test]
    fn test_validate_zero_batch_size_fails() {
        let mut config = Config::default();
        config.workers.license.batch_size = Some(0);
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("workers.license.batch_size"));
    }

    #[test]
    fn test_validate_overlapping_bands_fails() {
        let mut config = Config::default();
        config.licenses.bands.avoid_min = 90;
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_validate_out_of_band_policy_fails() {
        let mut config = Config::default();
        config.licenses.policy.push(PolicyOverride {
            identifier: "WTFPL".to_string(),
            tier: LicenseTier::Avoid,
            score: Some(95),
            aliases: Vec::new(),
        });
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_metrics_port_zero_fails() {
        let mut config = Config::default();
        config.metrics.enabled = true;
        config.metrics.port = 0;
        assert!(validate_config(&config).is_err());
    }
}
