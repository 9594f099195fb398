//! Chat-completion adapter: non-stream `complete`, lazy `stream`, and the
//! `complete_json` convenience, grounded on the Responses-API request/
//! response shapes in `src/advisory/providers/gpt.rs`.

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use crate::error::AdapterError;
use crate::model::{Message, Role};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// One chunk of a streamed completion.
#[derive(Debug, Clone)]
pub struct TokenChunk {
    pub text: String,
}

#[async_trait]
pub trait ChatAdapter: Send + Sync {
    async fn complete(
        &self,
        prompt: &str,
        temperature: f32,
        max_tokens: u32,
        system: Option<&str>,
        history_tail: &[Message],
    ) -> Result<String, AdapterError>;

    /// A lazy finite sequence of token chunks, terminated upstream by
    /// `[DONE]`. Decode failures on an individual chunk are skipped, not
    /// fatal — the adapter itself filters them out of the stream.
    async fn stream(
        &self,
        prompt: &str,
        temperature: f32,
        max_tokens: u32,
        system: Option<&str>,
        history_tail: &[Message],
    ) -> Result<BoxStream<'static, TokenChunk>, AdapterError>;

    /// Invokes `complete`, then parses JSON; on failure, attempts to
    /// extract the first balanced `{...}` span before giving up with
    /// `Decode`.
    async fn complete_json(
        &self,
        prompt: &str,
        temperature: f32,
        max_tokens: u32,
        system: Option<&str>,
    ) -> Result<Value, AdapterError> {
        let text = self
            .complete(prompt, temperature, max_tokens, system, &[])
            .await?;
        parse_json_lenient(&text)
    }
}

/// Parses `text` as JSON; on failure, scans for the first balanced
/// `{…}` span and retries on that slice. This tolerates models that wrap
/// JSON in prose or markdown fences.
pub fn parse_json_lenient(text: &str) -> Result<Value, AdapterError> {
    if let Ok(v) = serde_json::from_str::<Value>(text) {
        return Ok(v);
    }
    if let Some(span) = extract_balanced_braces(text) {
        if let Ok(v) = serde_json::from_str::<Value>(span) {
            return Ok(v);
        }
    }
    Err(AdapterError::Decode(format!(
        "no valid JSON object found in model output ({} bytes)",
        text.len()
    )))
}

fn extract_balanced_braces(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let bytes = text.as_bytes();
    let mut depth = 0i32;
    for (i, &b) in bytes.iter().enumerate().skip(start) {
        match b {
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatStreamChunk {
    choices: Vec<ChatStreamChoice>,
}

#[derive(Deserialize)]
struct ChatStreamChoice {
    delta: ChatStreamDelta,
}

#[derive(Deserialize, Default)]
struct ChatStreamDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Talks to any OpenAI-compatible `/chat/completions` endpoint — the
/// default for `openai_base_url`.
pub struct OpenAiChatAdapter {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiChatAdapter {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }

    fn build_messages<'a>(
        &self,
        system: Option<&'a str>,
        history_tail: &'a [Message],
        prompt: &'a str,
    ) -> Vec<ChatMessage<'a>> {
        let mut messages = Vec::with_capacity(history_tail.len() + 2);
        if let Some(system) = system {
            messages.push(ChatMessage {
                role: "system",
                content: system,
            });
        }
        for m in history_tail {
            let role = match m.role {
                Role::User => "user",
                Role::Assistant => "assistant",
                Role::System => "system",
            };
            messages.push(ChatMessage {
                role,
                content: &m.content,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: prompt,
        });
        messages
    }
}

#[async_trait]
impl ChatAdapter for OpenAiChatAdapter {
    async fn complete(
        &self,
        prompt: &str,
        temperature: f32,
        max_tokens: u32,
        system: Option<&str>,
        history_tail: &[Message],
    ) -> Result<String, AdapterError> {
        let body = ChatCompletionRequest {
            model: &self.model,
            messages: self.build_messages(system, history_tail, prompt),
            temperature,
            max_tokens,
            stream: false,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .timeout(DEFAULT_TIMEOUT)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(AdapterError::HttpStatus(status, body));
        }

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| AdapterError::Decode(e.to_string()))?;

        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();

        // Empty upstream body: a single placeholder chunk, visibility left
        // to the caller.
        if text.is_empty() {
            Ok("[no content returned]".to_string())
        } else {
            Ok(text)
        }
    }

    async fn stream(
        &self,
        prompt: &str,
        temperature: f32,
        max_tokens: u32,
        system: Option<&str>,
        history_tail: &[Message],
    ) -> Result<BoxStream<'static, TokenChunk>, AdapterError> {
        let body = ChatCompletionRequest {
            model: &self.model,
            messages: self.build_messages(system, history_tail, prompt),
            temperature,
            max_tokens,
            stream: true,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .timeout(DEFAULT_TIMEOUT)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(AdapterError::HttpStatus(status, body));
        }

        let byte_stream = response.bytes_stream();
        let stream = byte_stream
            .scan(String::new(), |buf, chunk| {
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(_) => return futures::future::ready(Some(Vec::new())),
                };
                buf.push_str(&String::from_utf8_lossy(&chunk));
                let mut lines = Vec::new();
                while let Some(pos) = buf.find('\n') {
                    let line = buf[..pos].trim().to_string();
                    *buf = buf[pos + 1..].to_string();
                    if !line.is_empty() {
                        lines.push(line);
                    }
                }
                futures::future::ready(Some(lines))
            })
            .flat_map(futures::stream::iter)
            .filter_map(|line| async move {
                let data = line.strip_prefix("data:")?.trim();
                if data == "[DONE]" {
                    return None;
                }
                // A malformed chunk is skipped, not fatal.
                let parsed: ChatStreamChunk = serde_json::from_str(data).ok()?;
                let text = parsed.choices.into_iter().next()?.delta.content?;
                if text.is_empty() {
                    None
                } else {
                    Some(TokenChunk { text })
                }
            });

        Ok(stream.boxed())
    }
}
