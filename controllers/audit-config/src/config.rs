//! Process configuration
//!
//! Read once at startup from environment variables. Cluster-side policy
//! lives in the `OperatorConfig` resource instead and is re-read every pass.

use std::net::SocketAddr;
use std::time::Duration;

use crds::OPERATOR_CONFIG_DEFAULT_NAME;

use crate::error::ControllerError;

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable lines
    Text,
    /// One JSON object per line
    Json,
}

/// Settings for the controller process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Restrict the watch to one namespace
    pub namespace: Option<String>,
    /// Name of the OperatorConfig singleton
    pub operator_config_name: String,
    /// Maximum concurrent reconciles (distinct AuditConfigs)
    pub concurrency: u16,
    /// Delay before re-checking after a mutation
    pub requeue_interval: Duration,
    /// Delay before re-checking a converged AuditConfig
    pub resync_interval: Duration,
    /// Deadline for a single reconcile pass
    pub reconcile_timeout: Duration,
    /// Probe and metrics listener
    pub probe_address: SocketAddr,
    /// Log output format
    pub log_format: LogFormat,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            namespace: None,
            operator_config_name: OPERATOR_CONFIG_DEFAULT_NAME.to_string(),
            concurrency: 4,
            requeue_interval: Duration::from_secs(1),
            resync_interval: Duration::from_secs(600),
            reconcile_timeout: Duration::from_secs(120),
            probe_address: SocketAddr::from(([0, 0, 0, 0], 8081)),
            log_format: LogFormat::Text,
        }
    }
}

impl ControllerConfig {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary lookup function
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ControllerError> {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let concurrency = match get("RECONCILE_CONCURRENCY") {
            Some(v) => parse_number::<u16>("RECONCILE_CONCURRENCY", &v)?,
            None => defaults.concurrency,
        };
        if concurrency == 0 {
            return Err(ControllerError::InvalidConfig(
                "RECONCILE_CONCURRENCY must be at least 1".to_string(),
            ));
        }

        let seconds = |key: &str, default: Duration| -> Result<Duration, ControllerError> {
            match get(key) {
                Some(v) => Ok(Duration::from_secs(parse_number::<u64>(key, &v)?)),
                None => Ok(default),
            }
        };

        let probe_address = match get("PROBE_BIND_ADDRESS") {
            Some(v) => v.parse().map_err(|e| {
                ControllerError::InvalidConfig(format!("PROBE_BIND_ADDRESS '{v}' is not a socket address: {e}"))
            })?,
            None => defaults.probe_address,
        };

        let log_format = match get("LOG_FORMAT").as_deref() {
            None | Some("text") => LogFormat::Text,
            Some("json") => LogFormat::Json,
            Some(other) => {
                return Err(ControllerError::InvalidConfig(format!(
                    "LOG_FORMAT must be 'text' or 'json', got '{other}'"
                )));
            }
        };

        Ok(Self {
            namespace: get("WATCH_NAMESPACE"),
            operator_config_name: get("OPERATOR_CONFIG_NAME").unwrap_or(defaults.operator_config_name),
            concurrency,
            requeue_interval: seconds("REQUEUE_INTERVAL_SECS", defaults.requeue_interval)?,
            resync_interval: seconds("RESYNC_INTERVAL_SECS", defaults.resync_interval)?,
            reconcile_timeout: seconds("RECONCILE_TIMEOUT_SECS", defaults.reconcile_timeout)?,
            probe_address,
            log_format,
        })
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ControllerError> {
    value
        .parse()
        .map_err(|_| ControllerError::InvalidConfig(format!("{key} must be a non-negative integer, got '{value}'")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_nothing_set() {
        let config = ControllerConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, ControllerConfig::default());
        assert_eq!(config.operator_config_name, "audit-operator-config");
        assert!(config.namespace.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = ControllerConfig::from_lookup(lookup(&[
            ("WATCH_NAMESPACE", "audit"),
            ("RECONCILE_CONCURRENCY", "8"),
            ("REQUEUE_INTERVAL_SECS", "5"),
            ("PROBE_BIND_ADDRESS", "127.0.0.1:9000"),
            ("LOG_FORMAT", "json"),
        ]))
        .unwrap();
        assert_eq!(config.namespace.as_deref(), Some("audit"));
        assert_eq!(config.concurrency, 8);
        assert_eq!(config.requeue_interval, Duration::from_secs(5));
        assert_eq!(config.probe_address.port(), 9000);
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn test_blank_namespace_means_all() {
        let config = ControllerConfig::from_lookup(lookup(&[("WATCH_NAMESPACE", "  ")])).unwrap();
        assert!(config.namespace.is_none());
    }

    #[test]
    fn test_rejects_invalid_values() {
        assert!(ControllerConfig::from_lookup(lookup(&[("RECONCILE_CONCURRENCY", "0")])).is_err());
        assert!(ControllerConfig::from_lookup(lookup(&[("RECONCILE_CONCURRENCY", "many")])).is_err());
        assert!(ControllerConfig::from_lookup(lookup(&[("PROBE_BIND_ADDRESS", "nope")])).is_err());
        assert!(ControllerConfig::from_lookup(lookup(&[("LOG_FORMAT", "xml")])).is_err());
    }
}
