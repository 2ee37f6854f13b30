//! OpenAI-compatible chat completions generator.
//!
//! `POST {base_url}/chat/completions` with a system and a user message and
//! `response_format = json_object`. One HTTP request per call, no retries.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::TextGenerator;
use crate::error::{Error, Result};
use crate::prompt::Prompt;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_TEMPERATURE: f32 = 0.3;
const DEFAULT_MAX_TOKENS: u32 = 2000;

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
    max_tokens: u32,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// [`TextGenerator`] backed by a `/chat/completions` endpoint.
pub struct ChatCompletionsGenerator {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl fmt::Debug for ChatCompletionsGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatCompletionsGenerator")
            .field("endpoint", &self.endpoint)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl ChatCompletionsGenerator {
    /// Creates a generator for `base_url` (e.g. `https://api.openai.com/v1`).
    ///
    /// The per-call deadline is enforced by the generation client; this only
    /// bounds connection setup.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the URL is invalid or the HTTP
    /// client cannot be built.
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        model: impl Into<String>,
    ) -> Result<Self> {
        let parsed = reqwest::Url::parse(base_url)
            .map_err(|e| Error::configuration(format!("invalid generation URL: {e}")))?;
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| Error::configuration(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", parsed.as_str().trim_end_matches('/')),
            api_key,
            model: model.into(),
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
        })
    }

    /// Returns the resolved endpoint.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl TextGenerator for ChatCompletionsGenerator {
    async fn complete(&self, prompt: &Prompt) -> Result<String> {
        let body = ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: &prompt.system,
                },
                ChatMessage {
                    role: "user",
                    content: &prompt.user,
                },
            ],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            response_format: ResponseFormat {
                kind: "json_object",
            },
        };

        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = self.api_key.as_deref() {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::transient(format!("generation request failed: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::transient(format!(
                "generation endpoint returned {status}: {text}"
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| Error::transient(format!("unreadable generation response: {e}")))?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| Error::validation("generation response has no content"))
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_appends_path() {
        let generator =
            ChatCompletionsGenerator::new("https://api.example.com/v1/", None, "gpt-4").unwrap();
        assert_eq!(
            generator.endpoint(),
            "https://api.example.com/v1/chat/completions"
        );
        assert_eq!(generator.model_id(), "gpt-4");
    }

    #[test]
    fn invalid_url_is_configuration_error() {
        let err = ChatCompletionsGenerator::new("not a url", None, "gpt-4").unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
    }

    #[test]
    fn debug_redacts_api_key() {
        let generator = ChatCompletionsGenerator::new(
            "https://api.example.com/v1",
            Some("sk-secret".into()),
            "gpt-4",
        )
        .unwrap();
        let debug = format!("{generator:?}");
        assert!(!debug.contains("sk-secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn request_body_shape() {
        let prompt = Prompt {
            system: "sys".into(),
            user: "usr".into(),
        };
        let body = ChatRequest {
            model: "gpt-4",
            messages: [
                ChatMessage {
                    role: "system",
                    content: &prompt.system,
                },
                ChatMessage {
                    role: "user",
                    content: &prompt.user,
                },
            ],
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
            response_format: ResponseFormat {
                kind: "json_object",
            },
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["response_format"]["type"], "json_object");
        assert_eq!(json["messages"][1]["content"], "usr");
    }
}
