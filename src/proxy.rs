//! IP reputation lookups.
//!
//! Lookups fail open: when the reputation service cannot answer, the address
//! is treated as not a proxy and the reason travels in [`ProxyVerdict::error`].
//!
//! Failing closed would let one outage or rate limit at the third-party
//! service refuse every student in every session. Failing open only lets a
//! proxied student past the proxy gate during that window; the geofence
//! still applies to them.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::GeoConfig;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProxyVerdict {
    pub is_proxy: bool,
    /// Why the lookup could not classify the address, if it failed.
    pub error: Option<String>,
}

impl ProxyVerdict {
    pub fn clean() -> Self {
        Self {
            is_proxy: false,
            error: None,
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            is_proxy: false,
            error: Some(reason.into()),
        }
    }

    /// `(is_proxy, error)` pair.
    pub fn into_pair(self) -> (bool, Option<String>) {
        (self.is_proxy, self.error)
    }
}

pub trait ReputationSource: Send + Sync {
    fn classify(&self, ip: &str) -> ProxyVerdict;
}

#[derive(Debug, Deserialize)]
struct Reputation {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    proxy: bool,
    #[serde(default)]
    hosting: bool,
}

fn verdict(rep: Reputation) -> ProxyVerdict {
    if rep.status.as_deref() != Some("success") {
        return ProxyVerdict::failed(rep.message.unwrap_or_else(|| "lookup_failed".to_string()));
    }
    ProxyVerdict {
        is_proxy: rep.proxy || rep.hosting,
        error: None,
    }
}

/// ip-api.com style JSON lookup.
pub struct IpApi {
    agent: ureq::Agent,
    url_template: String,
    public_ip_url: String,
}

impl IpApi {
    pub fn new(cfg: &GeoConfig) -> Self {
        Self::with_urls(
            cfg.lookup_timeout(),
            cfg.reputation_url.clone(),
            cfg.public_ip_url.clone(),
        )
    }

    pub fn with_urls(timeout: Duration, url_template: String, public_ip_url: String) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .into();
        Self {
            agent,
            url_template,
            public_ip_url,
        }
    }

    fn lookup(&self, ip: &str) -> Result<Reputation> {
        let url = self.url_template.replace("{ip}", ip);
        let mut response = self
            .agent
            .get(&url)
            .call()
            .with_context(|| format!("querying {url}"))?;
        response
            .body_mut()
            .read_json::<Reputation>()
            .context("decoding reputation response")
    }

    /// Public address of this host as seen by the echo service.
    pub fn public_ip(&self) -> Result<String> {
        let mut response = self
            .agent
            .get(&self.public_ip_url)
            .call()
            .with_context(|| format!("querying {}", self.public_ip_url))?;
        let ip = response.body_mut().read_to_string()?.trim().to_string();
        if ip.is_empty() {
            anyhow::bail!("empty response from {}", self.public_ip_url);
        }
        Ok(ip)
    }
}

impl ReputationSource for IpApi {
    fn classify(&self, ip: &str) -> ProxyVerdict {
        match self.lookup(ip) {
            Ok(rep) => verdict(rep),
            Err(e) => {
                log::warn!("proxy lookup for {ip} failed, allowing: {e:#}");
                ProxyVerdict::failed(format!("{e:#}"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(body: &str) -> ProxyVerdict {
        serde_json::from_str::<Reputation>(body)
            .map(verdict)
            .unwrap_or_else(|e| ProxyVerdict::failed(e.to_string()))
    }

    #[test]
    fn test_hosting_counts_as_proxy() {
        assert!(parse(r#"{"status":"success","proxy":false,"hosting":true}"#).is_proxy);
        assert!(parse(r#"{"status":"success","proxy":true,"hosting":false}"#).is_proxy);
        assert_eq!(
            parse(r#"{"status":"success","proxy":false,"hosting":false}"#),
            ProxyVerdict::clean()
        );
    }

    #[test]
    fn test_failed_status_fails_open() {
        assert_eq!(
            parse(r#"{"status":"fail","message":"reserved range"}"#).into_pair(),
            (false, Some("reserved range".to_string()))
        );
        assert_eq!(
            parse(r#"{"status":"fail"}"#).into_pair(),
            (false, Some("lookup_failed".to_string()))
        );
    }
}
