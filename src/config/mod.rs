use std::env;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde_json::Value;

use crate::services::policy::ScanPolicy;

/// Key under which the host configuration carries this interceptor's settings.
pub const CONFIG_NAMESPACE: &str = "clamshield";

const DEFAULT_MAX_FORM_BYTES: usize = 200_000;
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Configuration failures. Raised once at construction, never mid-scan.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("clamd address is required")]
    MissingAddress,

    #[error("invalid clamd address '{0}'")]
    InvalidAddress(String),

    #[error("missing '{0}' configuration section")]
    MissingSection(&'static str),

    #[error("invalid value for {0}")]
    InvalidValue(&'static str),
}

/// Network location of the clamd daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClamdAddress {
    Tcp(String),
    Unix(PathBuf),
}

impl ClamdAddress {
    /// Accepts `tcp://host:port`, `unix:///path/to/socket` or a bare `host:port`.
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(ConfigError::MissingAddress);
        }

        if let Some(path) = raw.strip_prefix("unix://") {
            if path.is_empty() {
                return Err(ConfigError::InvalidAddress(raw.to_string()));
            }
            return Ok(Self::Unix(PathBuf::from(path)));
        }

        let host_port = raw.strip_prefix("tcp://").unwrap_or(raw);
        if host_port.contains("://") {
            return Err(ConfigError::InvalidAddress(raw.to_string()));
        }
        match host_port.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => {
                Ok(Self::Tcp(host_port.to_string()))
            }
            _ => Err(ConfigError::InvalidAddress(raw.to_string())),
        }
    }
}

impl fmt::Display for ClamdAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp(addr) => write!(f, "tcp://{addr}"),
            Self::Unix(path) => write!(f, "unix://{}", path.display()),
        }
    }
}

/// Scanner settings shared by the request and response interceptors.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    pub clamd_address: ClamdAddress,
    pub policy: ScanPolicy,
    /// Ceiling on the total multipart payload parsed for form files.
    pub max_form_bytes: usize,
    /// Upper bound on one scan session, connect to last reply byte.
    pub timeout: Duration,
    /// Refuse a transaction whose body cannot be read. Off by default: the
    /// readable prefix and remainder are forwarded with body-derived
    /// categories skipped, and metadata is still scanned.
    pub deny_unreadable_body: bool,
}

impl ScanConfig {
    pub fn new(clamd_address: ClamdAddress) -> Self {
        Self {
            clamd_address,
            policy: ScanPolicy::default(),
            max_form_bytes: DEFAULT_MAX_FORM_BYTES,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            deny_unreadable_body: false,
        }
    }

    /// Load from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let address = env::var("CLAMD_ADDRESS").map_err(|_| ConfigError::MissingAddress)?;
        Ok(Self {
            clamd_address: ClamdAddress::parse(&address)?,
            policy: ScanPolicy {
                scan_metadata: env_flag("SCAN_METADATA"),
                scan_body: env_flag("SCAN_BODY"),
                scan_form_files: env_flag("SCAN_FORM_FILES"),
            },
            max_form_bytes: env::var("MAX_FORM_BYTES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_MAX_FORM_BYTES),
            timeout: Duration::from_secs(
                env::var("SCAN_TIMEOUT_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(DEFAULT_TIMEOUT_SECS),
            ),
            deny_unreadable_body: env_flag_or("DENY_UNREADABLE_BODY", false),
        })
    }

    /// Load from a host configuration map, reading the [`CONFIG_NAMESPACE`] section.
    ///
    /// Category flags that are absent or not booleans default to enabled.
    pub fn from_value(config: &Value) -> Result<Self, ConfigError> {
        let section = config
            .get(CONFIG_NAMESPACE)
            .filter(|v| v.is_object())
            .ok_or(ConfigError::MissingSection(CONFIG_NAMESPACE))?;

        let address = section
            .get("clamd_address")
            .and_then(Value::as_str)
            .ok_or(ConfigError::MissingAddress)?;

        let flag = |key: &str| section.get(key).and_then(Value::as_bool).unwrap_or(true);

        let max_form_bytes = match section.get("max_form_bytes") {
            None => DEFAULT_MAX_FORM_BYTES,
            Some(v) => v
                .as_u64()
                .and_then(|n| usize::try_from(n).ok())
                .ok_or(ConfigError::InvalidValue("max_form_bytes"))?,
        };
        let timeout_secs = match section.get("timeout_secs") {
            None => DEFAULT_TIMEOUT_SECS,
            Some(v) => v.as_u64().ok_or(ConfigError::InvalidValue("timeout_secs"))?,
        };

        Ok(Self {
            clamd_address: ClamdAddress::parse(address)?,
            policy: ScanPolicy {
                scan_metadata: flag("scan_metadata"),
                scan_body: flag("scan_body"),
                scan_form_files: flag("scan_form_files"),
            },
            max_form_bytes,
            timeout: Duration::from_secs(timeout_secs),
            deny_unreadable_body: section
                .get("deny_unreadable_body")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        })
    }
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub scan: ScanConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            host: env::var("BACKEND_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env::var("BACKEND_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .unwrap_or(3000),
            scan: ScanConfig::from_env()?,
        })
    }
}

/// Boolean env var; anything unset or unparseable counts as enabled.
fn env_flag(name: &str) -> bool {
    env_flag_or(name, true)
}

fn env_flag_or(name: &str, default: bool) -> bool {
    match env::var(name).map(|v| v.trim().to_ascii_lowercase()) {
        Ok(v) if matches!(v.as_str(), "false" | "0" | "no" | "off") => false,
        Ok(v) if matches!(v.as_str(), "true" | "1" | "yes" | "on") => true,
        _ => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_address_schemes() {
        assert_eq!(
            ClamdAddress::parse("tcp://127.0.0.1:3310").unwrap(),
            ClamdAddress::Tcp("127.0.0.1:3310".to_string())
        );
        assert_eq!(
            ClamdAddress::parse("clamd:3310").unwrap(),
            ClamdAddress::Tcp("clamd:3310".to_string())
        );
        assert_eq!(
            ClamdAddress::parse("unix:///run/clamav/clamd.ctl").unwrap(),
            ClamdAddress::Unix(PathBuf::from("/run/clamav/clamd.ctl"))
        );
    }

    #[test]
    fn rejects_bad_addresses() {
        assert!(matches!(ClamdAddress::parse(""), Err(ConfigError::MissingAddress)));
        assert!(matches!(
            ClamdAddress::parse("http://clamd:3310"),
            Err(ConfigError::InvalidAddress(_))
        ));
        assert!(matches!(
            ClamdAddress::parse("clamd"),
            Err(ConfigError::InvalidAddress(_))
        ));
        assert!(matches!(
            ClamdAddress::parse("clamd:notaport"),
            Err(ConfigError::InvalidAddress(_))
        ));
    }

    #[test]
    fn from_value_defaults_flags_to_enabled() {
        let config = ScanConfig::from_value(&json!({
            "clamshield": {
                "clamd_address": "tcp://localhost:3310",
                "scan_body": "nope",
                "scan_form_files": false
            }
        }))
        .unwrap();

        assert!(config.policy.scan_metadata);
        assert!(config.policy.scan_body);
        assert!(!config.policy.scan_form_files);
        assert_eq!(config.max_form_bytes, DEFAULT_MAX_FORM_BYTES);
        assert_eq!(config.timeout, Duration::from_secs(DEFAULT_TIMEOUT_SECS));
        assert!(!config.deny_unreadable_body);
    }

    #[test]
    fn from_value_reads_unreadable_body_switch() {
        let config = ScanConfig::from_value(&json!({
            "clamshield": { "clamd_address": "localhost:3310", "deny_unreadable_body": true }
        }))
        .unwrap();
        assert!(config.deny_unreadable_body);
    }

    #[test]
    fn from_value_requires_address() {
        let err = ScanConfig::from_value(&json!({ "clamshield": { "scan_body": true } }))
            .unwrap_err();
        assert!(matches!(err, ConfigError::MissingAddress));

        let err = ScanConfig::from_value(&json!({ "clamshield": { "clamd_address": 3310 } }))
            .unwrap_err();
        assert!(matches!(err, ConfigError::MissingAddress));
    }

    #[test]
    fn from_value_requires_section() {
        let err = ScanConfig::from_value(&json!({ "other": {} })).unwrap_err();
        assert!(matches!(err, ConfigError::MissingSection("clamshield")));
    }

    #[test]
    fn from_value_reads_limits() {
        let config = ScanConfig::from_value(&json!({
            "clamshield": {
                "clamd_address": "localhost:3310",
                "max_form_bytes": 1024,
                "timeout_secs": 5
            }
        }))
        .unwrap();
        assert_eq!(config.max_form_bytes, 1024);
        assert_eq!(config.timeout, Duration::from_secs(5));

        let err = ScanConfig::from_value(&json!({
            "clamshield": { "clamd_address": "localhost:3310", "timeout_secs": "soon" }
        }))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue("timeout_secs")));
    }
}
