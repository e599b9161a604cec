//! Operator configuration.
//!
//! All environment-derived identity (versions, operand image, namespaces) is
//! read once at startup into `OperatorConfig` and passed explicitly to the
//! components that need it.

use crate::error::ControllerError;
use std::env;
use std::time::Duration;
use tracing::info;

/// Default namespace the operand is deployed into.
pub const DEFAULT_TARGET_NAMESPACE: &str = "openshift-csi-snapshot-controller";

/// Name of the single operator config object.
pub const DEFAULT_CONFIG_NAME: &str = "cluster";

/// Name of the operand Deployment.
pub const OPERAND_DEPLOYMENT_NAME: &str = "csi-snapshot-controller";

/// Default periodic resync interval (20 minutes).
pub const DEFAULT_RESYNC_INTERVAL: Duration = Duration::from_secs(20 * 60);

const OPERATOR_VERSION_ENV: &str = "OPERATOR_IMAGE_VERSION";
const OPERAND_VERSION_ENV: &str = "OPERAND_IMAGE_VERSION";
const OPERAND_IMAGE_ENV: &str = "OPERAND_IMAGE";
const TARGET_NAMESPACE_ENV: &str = "TARGET_NAMESPACE";
const CONFIG_NAME_ENV: &str = "CONFIG_NAME";
const WORKERS_ENV: &str = "WORKERS";
const RESYNC_INTERVAL_ENV: &str = "RESYNC_INTERVAL_SECS";

/// Startup configuration of the operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatorConfig {
    /// Version of this operator, advertised in status
    pub operator_version: String,
    /// Version of the operand (csi-snapshot-controller)
    pub operand_version: String,
    /// Operand container image
    pub operand_image: String,
    /// Namespace the operand Deployment lives in
    pub target_namespace: String,
    /// Name of the operator config object
    pub config_name: String,
    /// Number of reconciliation workers
    pub workers: usize,
    /// Periodic resync interval
    pub resync_interval: Duration,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            operator_version: String::new(),
            operand_version: String::new(),
            operand_image: String::new(),
            target_namespace: DEFAULT_TARGET_NAMESPACE.to_string(),
            config_name: DEFAULT_CONFIG_NAME.to_string(),
            workers: 1,
            resync_interval: DEFAULT_RESYNC_INTERVAL,
        }
    }
}

impl OperatorConfig {
    /// Loads configuration from the process environment.
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Loads configuration through an arbitrary lookup function.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ControllerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let operand_image = lookup(OPERAND_IMAGE_ENV)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| {
                ControllerError::InvalidConfig(format!(
                    "{OPERAND_IMAGE_ENV} environment variable is required"
                ))
            })?;

        let workers = match lookup(WORKERS_ENV) {
            Some(raw) => raw.parse::<usize>().ok().filter(|n| *n > 0).ok_or_else(|| {
                ControllerError::InvalidConfig(format!(
                    "{WORKERS_ENV} must be a positive integer, got {raw:?}"
                ))
            })?,
            None => defaults.workers,
        };

        let resync_interval = match lookup(RESYNC_INTERVAL_ENV) {
            Some(raw) => raw
                .parse::<u64>()
                .ok()
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs)
                .ok_or_else(|| {
                    ControllerError::InvalidConfig(format!(
                        "{RESYNC_INTERVAL_ENV} must be a positive number of seconds, got {raw:?}"
                    ))
                })?,
            None => defaults.resync_interval,
        };

        Ok(Self {
            operator_version: lookup(OPERATOR_VERSION_ENV).unwrap_or_default(),
            operand_version: lookup(OPERAND_VERSION_ENV).unwrap_or_default(),
            operand_image,
            target_namespace: lookup(TARGET_NAMESPACE_ENV).unwrap_or(defaults.target_namespace),
            config_name: lookup(CONFIG_NAME_ENV).unwrap_or(defaults.config_name),
            workers,
            resync_interval,
        })
    }

    /// Logs the effective configuration.
    pub fn log(&self) {
        info!("Configuration:");
        info!("  Operator version: {}", self.operator_version);
        info!("  Operand version: {}", self.operand_version);
        info!("  Operand image: {}", self.operand_image);
        info!("  Target namespace: {}", self.target_namespace);
        info!("  Config object: {}", self.config_name);
        info!("  Workers: {}", self.workers);
        info!("  Resync interval: {:?}", self.resync_interval);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_with_only_image() {
        let config =
            OperatorConfig::from_lookup(lookup_from(&[("OPERAND_IMAGE", "quay.io/snap:1")]))
                .unwrap();
        assert_eq!(config.operand_image, "quay.io/snap:1");
        assert_eq!(config.target_namespace, DEFAULT_TARGET_NAMESPACE);
        assert_eq!(config.config_name, "cluster");
        assert_eq!(config.workers, 1);
        assert_eq!(config.resync_interval, DEFAULT_RESYNC_INTERVAL);
        assert!(config.operator_version.is_empty());
    }

    #[test]
    fn test_missing_image_is_rejected() {
        let result = OperatorConfig::from_lookup(lookup_from(&[]));
        assert!(matches!(result, Err(ControllerError::InvalidConfig(_))));
    }

    #[test]
    fn test_overrides() {
        let config = OperatorConfig::from_lookup(lookup_from(&[
            ("OPERAND_IMAGE", "img"),
            ("OPERATOR_IMAGE_VERSION", "4.3.0"),
            ("OPERAND_IMAGE_VERSION", "2.0.0"),
            ("TARGET_NAMESPACE", "snap-ns"),
            ("WORKERS", "4"),
            ("RESYNC_INTERVAL_SECS", "30"),
        ]))
        .unwrap();
        assert_eq!(config.operator_version, "4.3.0");
        assert_eq!(config.operand_version, "2.0.0");
        assert_eq!(config.target_namespace, "snap-ns");
        assert_eq!(config.workers, 4);
        assert_eq!(config.resync_interval, Duration::from_secs(30));
    }

    #[test]
    fn test_zero_workers_is_rejected() {
        let result =
            OperatorConfig::from_lookup(lookup_from(&[("OPERAND_IMAGE", "img"), ("WORKERS", "0")]));
        assert!(matches!(result, Err(ControllerError::InvalidConfig(_))));
    }
}
