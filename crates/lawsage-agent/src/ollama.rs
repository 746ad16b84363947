use std::time::Duration;

use async_trait::async_trait;
use lawsage_core::error::{is_rate_limit_message, GenerationError};
use lawsage_core::generation::{FinishReason, GenerationRequest, GenerationResponse, GenerationService, Tool};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

/// Calls a locally-hosted Ollama model via its native chat API.
///
/// Intended for deployments where case facts must not leave the local machine.
/// No search tool: grounded requests get plain answers and no sources, and the
/// prompt says so. Structured output uses Ollama's `format` field.
pub struct OllamaBackend {
    pub base_url: String,
    pub model: String,
    pub timeout_secs: u64,
}

impl OllamaBackend {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            model: model.into(),
            timeout_secs: 300,
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn chat_url(&self) -> String {
        format!("{}/api/chat", self.base_url.trim_end_matches('/'))
    }
}

#[derive(Serialize)]
struct OllamaMessage {
    role: String,
    content: String,
}

#[derive(Serialize)]
struct OllamaChatRequest {
    model: String,
    messages: Vec<OllamaMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<Value>,
}

#[derive(Deserialize)]
struct OllamaChatResponse {
    message: OllamaResponseMessage,
}

#[derive(Deserialize)]
struct OllamaResponseMessage {
    content: String,
}

fn chat_request(model: &str, req: &GenerationRequest) -> OllamaChatRequest {
    let mut messages = Vec::new();
    if !req.system_instruction.is_empty() {
        messages.push(OllamaMessage {
            role: "system".into(),
            content: req.system_instruction.clone(),
        });
    }
    messages.push(OllamaMessage {
        role: "user".into(),
        content: crate::instruction::build_instruction(req),
    });
    OllamaChatRequest {
        model: model.to_string(),
        messages,
        stream: false,
        format: req.output_schema.clone(),
    }
}

#[async_trait]
impl GenerationService for OllamaBackend {
    async fn generate(&self, req: &GenerationRequest) -> Result<GenerationResponse, GenerationError> {
        if req.tools.contains(&Tool::GroundedSearch) {
            warn!(label = %req.label, "grounded search not supported for OllamaBackend, answering without sources");
        }
        let request_body = chat_request(&self.model, req);

        info!(
            label = %req.label,
            model = %self.model,
            base_url = %self.base_url,
            "calling ollama chat API"
        );

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(self.timeout_secs))
            .build()
            .map_err(|e| GenerationError::Transport(e.to_string()))?;

        let response = match client.post(self.chat_url()).json(&request_body).send().await {
            Ok(r) => r,
            Err(e) if e.is_timeout() => {
                warn!(label = %req.label, timeout_secs = self.timeout_secs, "ollama request timed out");
                return Err(GenerationError::Transport(format!(
                    "ollama request timed out after {}s",
                    self.timeout_secs
                )));
            }
            Err(e) => {
                warn!(label = %req.label, "ollama request failed: {}", e);
                return Err(GenerationError::Transport(e.to_string()));
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(label = %req.label, status = %status, "ollama returned non-200: {}", body);
            if status.as_u16() == 429 || is_rate_limit_message(&body) {
                return Err(GenerationError::RateLimited(body));
            }
            return Err(GenerationError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: OllamaChatResponse = response.json().await.map_err(|e| {
            warn!(label = %req.label, "failed to parse ollama response: {}", e);
            GenerationError::Transport(format!("failed to parse ollama response: {e}"))
        })?;

        let output = parsed.message.content;
        if output.trim().is_empty() {
            return Err(GenerationError::Empty);
        }

        info!(label = %req.label, output_len = output.len(), "ollama response received");

        let structured = if req.output_schema.is_some() {
            serde_json::from_str(output.trim()).ok()
        } else {
            None
        };
        Ok(GenerationResponse {
            text: Some(output),
            parsed: structured,
            citations_found: Vec::new(),
            finish_reason: FinishReason::Stop,
        })
    }
}
