//! Proxy classification
//!
//! A classifier looks at a proxy from the outside: where its traffic exits,
//! whether the exit is flagged as a proxy, and whether TLS survives the hop.

use crate::error::{PolicyError, PolicyResult};
use async_trait::async_trait;
use dashmap::DashMap;
use fleet_types::ProxyIdentity;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// What a lookup learned about a proxy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyClassification {
    /// ISO country code of the exit
    pub country: String,
    /// Exit is not flagged as a proxy or VPN
    pub anonymous: bool,
    /// A TLS request with certificate verification succeeded through the proxy
    pub ssl_ok: bool,
    /// Public address seen by the lookup service
    pub exit_ip: Option<String>,
}

/// Collaborator answering geo and anonymity questions about a proxy
#[async_trait]
pub trait GeoClassifier: Send + Sync {
    async fn classify(&self, identity: &ProxyIdentity) -> PolicyResult<ProxyClassification>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IpApiResponse {
    status: Option<String>,
    message: Option<String>,
    country_code: Option<String>,
    #[serde(default)]
    proxy: bool,
    query: Option<String>,
}

/// Classifier backed by the ip-api.com JSON endpoint, queried through the proxy
pub struct IpApiClassifier {
    lookup_url: String,
    tls_check_url: String,
    timeout: Duration,
}

impl IpApiClassifier {
    pub const DEFAULT_LOOKUP_URL: &'static str =
        "http://ip-api.com/json?fields=status,message,countryCode,proxy,query";
    pub const DEFAULT_TLS_CHECK_URL: &'static str = "https://www.cloudflare.com/cdn-cgi/trace";

    pub fn new(timeout: Duration) -> Self {
        Self {
            lookup_url: Self::DEFAULT_LOOKUP_URL.to_string(),
            tls_check_url: Self::DEFAULT_TLS_CHECK_URL.to_string(),
            timeout,
        }
    }

    pub fn with_lookup_url(mut self, url: impl Into<String>) -> Self {
        self.lookup_url = url.into();
        self
    }

    pub fn with_tls_check_url(mut self, url: impl Into<String>) -> Self {
        self.tls_check_url = url.into();
        self
    }

    fn client(&self, identity: &ProxyIdentity) -> PolicyResult<reqwest::Client> {
        let proxy = reqwest::Proxy::all(identity.to_url())
            .map_err(|e| PolicyError::Classification(format!("invalid proxy: {}", e)))?;
        reqwest::Client::builder()
            .proxy(proxy)
            .timeout(self.timeout)
            .build()
            .map_err(|e| PolicyError::Classification(e.to_string()))
    }
}

#[async_trait]
impl GeoClassifier for IpApiClassifier {
    async fn classify(&self, identity: &ProxyIdentity) -> PolicyResult<ProxyClassification> {
        let client = self.client(identity)?;

        let body: IpApiResponse = client
            .get(&self.lookup_url)
            .send()
            .await
            .and_then(|resp| resp.error_for_status())
            .map_err(|e| PolicyError::Classification(format!("lookup request failed: {}", e)))?
            .json()
            .await
            .map_err(|e| PolicyError::Classification(format!("lookup response invalid: {}", e)))?;

        if body.status.as_deref() == Some("fail") {
            return Err(PolicyError::Classification(
                body.message.unwrap_or_else(|| "lookup failed".to_string()),
            ));
        }
        let country = body
            .country_code
            .ok_or_else(|| PolicyError::Classification("lookup returned no country".into()))?;

        let ssl_ok = match client.get(&self.tls_check_url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                warn!(proxy = %identity, error = %e, "TLS check through proxy failed");
                false
            }
        };

        debug!(proxy = %identity, country = %country, flagged = body.proxy, ssl_ok, "Proxy classified");
        Ok(ProxyClassification {
            country,
            anonymous: !body.proxy,
            ssl_ok,
            exit_ip: body.query,
        })
    }
}

/// Classifier with fixed answers, keyed by proxy host
pub struct StaticClassifier {
    default: Option<ProxyClassification>,
    by_host: DashMap<String, Option<ProxyClassification>>,
}

impl StaticClassifier {
    /// Every proxy classifies as `default`
    pub fn new(default: ProxyClassification) -> Self {
        Self {
            default: Some(default),
            by_host: DashMap::new(),
        }
    }

    /// Anonymous, TLS-clean exit in the given country
    pub fn clean(country: &str) -> Self {
        Self::new(ProxyClassification {
            country: country.to_string(),
            anonymous: true,
            ssl_ok: true,
            exit_ip: None,
        })
    }

    /// Every lookup fails unless a host override exists
    pub fn failing() -> Self {
        Self {
            default: None,
            by_host: DashMap::new(),
        }
    }

    pub fn set(&self, host: &str, classification: ProxyClassification) {
        self.by_host.insert(host.to_string(), Some(classification));
    }

    pub fn set_failing(&self, host: &str) {
        self.by_host.insert(host.to_string(), None);
    }
}

#[async_trait]
impl GeoClassifier for StaticClassifier {
    async fn classify(&self, identity: &ProxyIdentity) -> PolicyResult<ProxyClassification> {
        let answer = match self.by_host.get(&identity.host) {
            Some(entry) => entry.clone(),
            None => self.default.clone(),
        };
        answer.ok_or_else(|| PolicyError::Classification(format!("no answer for {}", identity.host)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_types::ProxyScheme;

    #[test]
    fn test_ip_api_response_parsing() {
        let body: IpApiResponse = serde_json::from_str(
            r#"{"status":"success","countryCode":"DE","proxy":true,"query":"203.0.113.7"}"#,
        )
        .unwrap();
        assert_eq!(body.country_code.as_deref(), Some("DE"));
        assert!(body.proxy);
        assert_eq!(body.query.as_deref(), Some("203.0.113.7"));
    }

    #[tokio::test]
    async fn test_static_classifier_overrides() {
        let classifier = StaticClassifier::clean("US");
        classifier.set_failing("broken");
        classifier.set(
            "moscow",
            ProxyClassification {
                country: "RU".into(),
                anonymous: true,
                ssl_ok: true,
                exit_ip: Some("198.51.100.1".into()),
            },
        );

        let us = ProxyIdentity::new(ProxyScheme::Socks5, "any", 1080);
        assert_eq!(classifier.classify(&us).await.unwrap().country, "US");

        let ru = ProxyIdentity::new(ProxyScheme::Socks5, "moscow", 1080);
        assert_eq!(classifier.classify(&ru).await.unwrap().country, "RU");

        let broken = ProxyIdentity::new(ProxyScheme::Socks5, "broken", 1080);
        assert!(classifier.classify(&broken).await.is_err());
    }
}
