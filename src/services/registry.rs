//! Named modifiers for host pipelines that look interceptors up by name.

use std::sync::Arc;

use serde_json::Value;

use crate::config::{ConfigError, ScanConfig};
use crate::services::clamd::{ClamdClient, Scanner};
use crate::services::interceptor::{Modifier, RequestInterceptor, ResponseInterceptor};

pub const REQUEST_MODIFIER: &str = "clamshield-request";
pub const RESPONSE_MODIFIER: &str = "clamshield-response";

/// A modifier and the pipeline legs it applies to.
#[derive(Clone)]
pub struct Registration {
    pub name: &'static str,
    pub applies_to_request: bool,
    pub applies_to_response: bool,
    pub modifier: Arc<dyn Modifier>,
}

/// Build both modifiers from a host configuration map.
///
/// Configuration is validated here, so a missing scanner address fails
/// registration instead of every transaction.
pub fn register_modifiers(host_config: &Value) -> Result<Vec<Registration>, ConfigError> {
    let config = ScanConfig::from_value(host_config)?;
    let scanner: Arc<dyn Scanner> = Arc::new(ClamdClient::from_config(&config));
    tracing::info!(
        address = %config.clamd_address,
        policy = ?config.policy,
        "Registered clamshield modifiers"
    );
    Ok(modifiers(&config, scanner))
}

/// Build both modifiers around an existing scanner.
pub fn modifiers(config: &ScanConfig, scanner: Arc<dyn Scanner>) -> Vec<Registration> {
    vec![
        Registration {
            name: REQUEST_MODIFIER,
            applies_to_request: true,
            applies_to_response: false,
            modifier: Arc::new(RequestInterceptor::new(config, scanner.clone())),
        },
        Registration {
            name: RESPONSE_MODIFIER,
            applies_to_request: false,
            applies_to_response: true,
            modifier: Arc::new(ResponseInterceptor::new(config, scanner)),
        },
    ]
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::errors::InterceptError;
    use crate::models::transaction::{Body, ProxyRequest, Transaction};
    use crate::services::interceptor::tests::MockScanner;

    #[test]
    fn registration_requires_scanner_address() {
        let err = register_modifiers(&json!({ "clamshield": { "scan_body": false } }))
            .err()
            .unwrap();
        assert!(matches!(err, ConfigError::MissingAddress));
    }

    #[test]
    fn registers_request_and_response_modifiers() {
        let registrations =
            register_modifiers(&json!({ "clamshield": { "clamd_address": "localhost:3310" } }))
                .unwrap();
        let names: Vec<_> = registrations.iter().map(|r| r.name).collect();
        assert_eq!(names, vec![REQUEST_MODIFIER, RESPONSE_MODIFIER]);
        assert!(registrations[0].applies_to_request && !registrations[0].applies_to_response);
        assert!(registrations[1].applies_to_response && !registrations[1].applies_to_request);
    }

    #[tokio::test]
    async fn request_modifier_round_trips_transaction() {
        let config = ScanConfig::from_value(&json!({
            "clamshield": { "clamd_address": "localhost:3310" }
        }))
        .unwrap();
        let scanner = Arc::new(MockScanner::default());
        let registrations = modifiers(&config, scanner.clone());

        let request = ProxyRequest {
            method: "GET".to_string(),
            path: "/status".to_string(),
            body: Body::Empty,
            ..Default::default()
        };
        let out = registrations[0]
            .modifier
            .modify(Transaction::Request(request))
            .await
            .unwrap();
        assert!(matches!(out, Transaction::Request(ref r) if r.path == "/status"));
        assert_eq!(scanner.scanned(), vec!["metadata"]);

        let err = registrations[1]
            .modifier
            .modify(out)
            .await
            .unwrap_err();
        assert!(matches!(err, InterceptError::Type(_)));
    }
}
