//! OpenAI-compatible reasoning oracle.
//!
//! Works with any chat-completions API (vLLM, Ollama, OpenAI, Vertex
//! OpenAI endpoint). The model is asked for a single JSON object; whatever
//! comes back is handed to the predictor as opaque JSON.

use async_trait::async_trait;
use reqwest::{header, Client};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::traits::*;

const SYSTEM_PROMPT: &str = "You are an SRE risk analyst. Given service telemetry and \
threshold violations, respond with ONLY a JSON object of the form \
{\"risk_score\": <number 0-100>, \"recommended_action\": \"none\" | \"scale_up\" | \"restart\", \
\"rationale\": <string>}. No markdown, no extra text.";

/// OpenAI-compatible oracle backend.
pub struct OpenAiOracle {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    max_tokens: u32,
}

impl OpenAiOracle {
    pub fn new(
        client: Client,
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            model: model.into(),
            max_tokens: 1024,
        }
    }

    fn chat_completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn user_prompt(request: &OracleRequest) -> String {
        let mut prompt = format!(
            "Analyze these service metrics and return the JSON verdict.\n\nContext:\n{}",
            request.context
        );
        if let Some(correction) = &request.correction {
            prompt.push_str("\n\nYour previous answer was rejected: ");
            prompt.push_str(correction);
            prompt.push_str("\nReturn ONLY the corrected JSON object.");
        }
        prompt
    }
}

/// Strip a surrounding markdown code fence, if any.
fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
    response_format: ResponseFormatRequest,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ResponseFormatRequest {
    #[serde(rename = "type")]
    format_type: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: MessageResponse,
}

#[derive(Debug, Deserialize)]
struct MessageResponse {
    content: Option<String>,
}

#[async_trait]
impl ReasoningOracle for OpenAiOracle {
    fn id(&self) -> &str {
        &self.model
    }

    async fn score(&self, request: &OracleRequest) -> Result<serde_json::Value, BackendError> {
        let chat_request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: Self::user_prompt(request),
                },
            ],
            max_tokens: self.max_tokens,
            temperature: request.temperature,
            response_format: ResponseFormatRequest {
                format_type: "json_object",
            },
            stream: false,
        };

        let mut http_request = self.client.post(self.chat_completions_url());
        if let Some(key) = &self.api_key {
            http_request = http_request.header(header::AUTHORIZATION, format!("Bearer {}", key));
        }

        let response = http_request.json(&chat_request).send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::from_status(status, body));
        }

        let chat_response: ChatResponse = response
            .json()
            .await
            .map_err(|e| BackendError::Parse(e.to_string()))?;

        let content = chat_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();

        debug!(model = %self.model, len = content.len(), "Oracle replied");

        // Non-JSON content is passed through as a string and fails validation upstream
        let body = strip_code_fence(&content);
        Ok(serde_json::from_str(body).unwrap_or_else(|_| serde_json::Value::String(content.clone())))
    }
}
