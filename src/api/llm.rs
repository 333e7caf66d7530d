//! A small client for OpenAI-compatible chat completion endpoints. Both the PDF extractor and the
//! classifier talk to the language model through it.

use crate::api::http::{ensure_success, send_with_retry, RetryPolicy};
use crate::config::LlmSettings;
use crate::Result;
use anyhow::{anyhow, Context};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, trace};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Message {
    role: String,
    content: String,
}

impl Message {
    fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<Message>,
    temperature: f64,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Clone)]
pub(crate) struct ChatClient {
    http: reqwest::Client,
    url: String,
    model: String,
    api_key: Option<String>,
    api_key_env: String,
    policy: RetryPolicy,
}

impl ChatClient {
    /// The API key is read from the environment now, but its absence is only an error once a
    /// request is made.
    pub(crate) fn new(settings: &LlmSettings) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .context("Unable to build the language model HTTP client")?;
        Ok(Self {
            http,
            url: format!(
                "{}/chat/completions",
                settings.base_url.trim_end_matches('/')
            ),
            model: settings.model.clone(),
            api_key: std::env::var(&settings.api_key_env)
                .ok()
                .filter(|k| !k.is_empty()),
            api_key_env: settings.api_key_env.clone(),
            policy: RetryPolicy::default(),
        })
    }

    /// Sends one system and one user message and returns the reply text.
    pub(crate) async fn complete(&self, system: &str, user: &str) -> Result<String> {
        let api_key = self.api_key.as_deref().ok_or_else(|| {
            anyhow!(
                "The environment variable {} is not set, it must hold the language model API key",
                self.api_key_env
            )
        })?;
        let request = ChatCompletionRequest {
            model: &self.model,
            messages: vec![Message::system(system), Message::user(user)],
            temperature: 0.0,
        };
        trace!("Chat request to {}: {}", self.url, user);
        let response = send_with_retry(
            self.http.post(&self.url).bearer_auth(api_key).json(&request),
            &self.policy,
        )
        .await?;
        let response = ensure_success(response, "Chat completion").await?;
        let body: ChatCompletionResponse = response
            .json()
            .await
            .context("Unable to parse the chat completion response")?;
        let content = body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .context("The chat completion response has no content")?;
        debug!("Chat reply of {} bytes from {}", content.len(), self.model);
        Ok(content)
    }

    /// Like `complete`, but parses the reply as JSON.
    pub(crate) async fn complete_json<T>(&self, system: &str, user: &str) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let reply = self.complete(system, user).await?;
        parse_reply(&reply)
    }
}

/// Models like to wrap JSON in a markdown code fence even when told not to.
fn strip_code_fence(reply: &str) -> &str {
    let trimmed = reply.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

fn parse_reply<T>(reply: &str) -> Result<T>
where
    T: DeserializeOwned,
{
    let json = strip_code_fence(reply);
    serde_json::from_str(json).with_context(|| {
        let preview: String = json.chars().take(200).collect();
        format!("The language model reply is not the expected JSON: {preview}")
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_code_fence() {
        assert_eq!("[1]", strip_code_fence("```json\n[1]\n```"));
        assert_eq!("[1]", strip_code_fence("```\n[1]\n```"));
        assert_eq!("{\"a\":1}", strip_code_fence("  {\"a\":1} "));
    }

    #[test]
    fn test_parse_reply() {
        let v: Vec<u8> = parse_reply("```json\n[1, 2]\n```").unwrap();
        assert_eq!(vec![1, 2], v);
        let err = parse_reply::<Vec<u8>>("sorry, I can't").unwrap_err();
        assert!(err.to_string().contains("sorry"));
    }

    #[tokio::test]
    async fn test_missing_api_key_fails_on_use() {
        let settings = LlmSettings {
            api_key_env: "BUDGET_SYNC_TEST_KEY_THAT_IS_NEVER_SET".to_string(),
            ..LlmSettings::default()
        };
        let client = ChatClient::new(&settings).unwrap();
        assert_eq!(
            "https://generativelanguage.googleapis.com/v1beta/openai/chat/completions",
            client.url
        );
        let err = client.complete("s", "u").await.unwrap_err();
        assert!(err.to_string().contains("BUDGET_SYNC_TEST_KEY_THAT_IS_NEVER_SET"));
    }
}
