use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum AiServiceError {
    #[error("ai transport error: {0}")]
    Transport(String),
    #[error("ai provider error: {0}")]
    Provider(String),
    #[error("ai response parse error: {0}")]
    Parse(String),
}

#[derive(Debug, Clone)]
pub struct AiCompletion {
    pub text: String,
    pub tokens_used: i64,
}

/// Writing-assist completion provider. The route owns timeout and
/// cancellation; this trait is a plain request/response surface.
#[async_trait]
pub trait AiService: Send + Sync {
    async fn complete(
        &self,
        prompt: &str,
        instruction: Option<&str>,
    ) -> Result<AiCompletion, AiServiceError>;
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize, Default)]
struct ChatUsage {
    #[serde(default)]
    total_tokens: i64,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

/// OpenAI-compatible chat-completions client.
pub struct HttpAiService {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
    model: String,
}

impl HttpAiService {
    pub fn new(
        client: reqwest::Client,
        api_base: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            client,
            api_base: api_base.into(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }

    pub fn from_settings(client: reqwest::Client, settings: &crate::config::AiSettings) -> Self {
        Self::new(
            client,
            settings.api_base.clone(),
            settings.api_key.clone(),
            settings.model.clone(),
        )
    }
}

const SYSTEM_PROMPT: &str = "You are a writing assistant for policy and legal documents. \
     Improve clarity and precision without changing the meaning.";

#[async_trait]
impl AiService for HttpAiService {
    async fn complete(
        &self,
        prompt: &str,
        instruction: Option<&str>,
    ) -> Result<AiCompletion, AiServiceError> {
        let mut messages = vec![json!({ "role": "system", "content": SYSTEM_PROMPT })];
        if let Some(instruction) = instruction {
            messages.push(json!({ "role": "system", "content": instruction }));
        }
        messages.push(json!({ "role": "user", "content": prompt }));

        let response = self
            .client
            .post(format!(
                "{}/chat/completions",
                self.api_base.trim_end_matches('/')
            ))
            .bearer_auth(&self.api_key)
            .json(&json!({ "model": self.model, "messages": messages }))
            .send()
            .await
            .map_err(|e| AiServiceError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AiServiceError::Provider(format!("{status}: {body}")));
        }

        let body: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| AiServiceError::Parse(e.to_string()))?;
        let text = body
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| AiServiceError::Parse("response carried no choices".into()))?;

        Ok(AiCompletion {
            text,
            tokens_used: body.usage.unwrap_or_default().total_tokens,
        })
    }
}

/// Test double with a configurable artificial delay so route timeouts can
/// be exercised deterministically.
#[derive(Default)]
pub struct MockAiService {
    pub response_text: std::sync::Mutex<String>,
    pub delay: std::sync::Mutex<Option<std::time::Duration>>,
    pub calls: std::sync::Mutex<Vec<String>>,
}

impl MockAiService {
    pub fn new() -> Self {
        let mock = Self::default();
        *mock.response_text.lock().unwrap() = "Suggested rewrite.".to_string();
        mock
    }

    pub fn with_delay(self, delay: std::time::Duration) -> Self {
        *self.delay.lock().unwrap() = Some(delay);
        self
    }
}

#[async_trait]
impl AiService for MockAiService {
    async fn complete(
        &self,
        prompt: &str,
        _instruction: Option<&str>,
    ) -> Result<AiCompletion, AiServiceError> {
        self.calls.lock().unwrap().push(prompt.to_string());
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(AiCompletion {
            text: self.response_text.lock().unwrap().clone(),
            tokens_used: 42,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    #[tokio::test]
    async fn parses_completion_and_usage() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST).path("/v1/chat/completions");
            then.status(200).json_body(serde_json::json!({
                "choices": [
                    { "message": { "role": "assistant", "content": "Tightened clause." } }
                ],
                "usage": { "total_tokens": 128 }
            }));
        });

        let service = HttpAiService::new(
            reqwest::Client::new(),
            server.url("/v1"),
            "sk-test",
            "gpt-4o-mini",
        );
        let completion = service
            .complete("Tighten this clause.", None)
            .await
            .unwrap();
        assert_eq!(completion.text, "Tightened clause.");
        assert_eq!(completion.tokens_used, 128);
        mock.assert();
    }

    #[tokio::test]
    async fn provider_error_status_maps_to_provider_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST);
            then.status(429).body("rate limited");
        });

        let service = HttpAiService::new(
            reqwest::Client::new(),
            server.url("/v1"),
            "sk-test",
            "gpt-4o-mini",
        );
        let result = service.complete("prompt", None).await;
        assert!(matches!(result, Err(AiServiceError::Provider(_))));
    }

    #[tokio::test]
    async fn empty_choices_is_a_parse_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST);
            then.status(200).json_body(serde_json::json!({ "choices": [] }));
        });

        let service = HttpAiService::new(
            reqwest::Client::new(),
            server.url("/v1"),
            "sk-test",
            "gpt-4o-mini",
        );
        let result = service.complete("prompt", None).await;
        assert!(matches!(result, Err(AiServiceError::Parse(_))));
    }
}
