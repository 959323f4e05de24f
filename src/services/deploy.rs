use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::info;

#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    #[error("deploy hook failed: {0}")]
    Hook(String),
}

/// Static-site rebuild trigger. One empty POST; the CDN pipeline does the
/// rest. Callers fire this best-effort after publish state changes.
#[async_trait]
pub trait DeployHook: Send + Sync {
    async fn trigger(&self) -> Result<(), DeployError>;
}

pub struct WebhookDeployHook {
    client: reqwest::Client,
    url: Option<String>,
}

impl WebhookDeployHook {
    pub fn new(client: reqwest::Client, url: Option<String>) -> Self {
        Self { client, url }
    }
}

#[async_trait]
impl DeployHook for WebhookDeployHook {
    async fn trigger(&self) -> Result<(), DeployError> {
        let Some(url) = self.url.as_deref() else {
            info!("no deploy hook configured, skipping redeploy");
            return Ok(());
        };
        let response = self
            .client
            .post(url)
            .send()
            .await
            .map_err(|e| DeployError::Hook(e.to_string()))?;
        if !response.status().is_success() {
            return Err(DeployError::Hook(format!(
                "deploy hook returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct MockDeployHook {
    pub triggers: AtomicUsize,
}

impl MockDeployHook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger_count(&self) -> usize {
        self.triggers.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeployHook for MockDeployHook {
    async fn trigger(&self) -> Result<(), DeployError> {
        self.triggers.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    #[tokio::test]
    async fn posts_empty_body_to_hook() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST).path("/hooks/redeploy");
            then.status(200);
        });

        let hook =
            WebhookDeployHook::new(reqwest::Client::new(), Some(server.url("/hooks/redeploy")));
        hook.trigger().await.unwrap();
        mock.assert();
    }

    #[tokio::test]
    async fn missing_hook_url_is_a_noop() {
        let hook = WebhookDeployHook::new(reqwest::Client::new(), None);
        assert!(hook.trigger().await.is_ok());
    }

    #[tokio::test]
    async fn failing_hook_surfaces_error_for_caller_to_log() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST);
            then.status(500);
        });

        let hook = WebhookDeployHook::new(reqwest::Client::new(), Some(server.url("/hooks/x")));
        assert!(matches!(hook.trigger().await, Err(DeployError::Hook(_))));
    }
}
