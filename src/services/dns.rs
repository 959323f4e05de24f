use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum DnsError {
    #[error("dns transport error: {0}")]
    Transport(String),
    #[error("dns response parse error: {0}")]
    Parse(String),
}

/// CNAME resolution for custom-domain verification. A host with no CNAME
/// records resolves to `Ok(None)` — not an error; verification treats it
/// as a plain "not verified yet" outcome.
#[async_trait]
pub trait DnsResolver: Send + Sync {
    async fn resolve_cname(&self, host: &str) -> Result<Option<String>, DnsError>;
}

/// A domain verifies iff its CNAME points exactly at the expected target.
/// Trailing dots and case are DNS presentation noise and ignored.
pub fn domain_matches_target(cname: Option<&str>, expected_target: &str) -> bool {
    match cname {
        Some(actual) => {
            actual.trim_end_matches('.').eq_ignore_ascii_case(expected_target.trim_end_matches('.'))
        }
        None => false,
    }
}

const CNAME_RECORD_TYPE: u16 = 5;

#[derive(Debug, Deserialize)]
struct DohAnswer {
    #[serde(rename = "type")]
    record_type: u16,
    data: String,
}

#[derive(Debug, Deserialize)]
struct DohResponse {
    #[serde(rename = "Answer", default)]
    answers: Vec<DohAnswer>,
}

/// DNS-over-HTTPS client (RFC 8484 JSON flavor). Keeps the service free of
/// raw UDP plumbing and goes through the same egress path as every other
/// upstream dependency.
pub struct DohResolver {
    client: reqwest::Client,
    endpoint: String,
}

impl DohResolver {
    pub fn new(client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl DnsResolver for DohResolver {
    async fn resolve_cname(&self, host: &str) -> Result<Option<String>, DnsError> {
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("name", host), ("type", "CNAME")])
            .header("accept", "application/dns-json")
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .map_err(|e| DnsError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(DnsError::Transport(format!(
                "doh endpoint returned {}",
                response.status()
            )));
        }

        let body: DohResponse = response
            .json()
            .await
            .map_err(|e| DnsError::Parse(e.to_string()))?;

        // NXDOMAIN and empty answer sections both land here as None.
        let cname = body
            .answers
            .into_iter()
            .find(|a| a.record_type == CNAME_RECORD_TYPE)
            .map(|a| a.data);
        debug!(host, ?cname, "cname lookup");
        Ok(cname)
    }
}

#[derive(Default)]
pub struct MockDnsResolver {
    pub answers: std::sync::Mutex<std::collections::HashMap<String, String>>,
}

impl MockDnsResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cname(self, host: &str, target: &str) -> Self {
        self.answers
            .lock()
            .unwrap()
            .insert(host.to_string(), target.to_string());
        self
    }
}

#[async_trait]
impl DnsResolver for MockDnsResolver {
    async fn resolve_cname(&self, host: &str) -> Result<Option<String>, DnsError> {
        Ok(self.answers.lock().unwrap().get(host).cloned())
    }
}
