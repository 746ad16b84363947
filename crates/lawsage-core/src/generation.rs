use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::GenerationError;
use crate::types::Source;

/// Tools the generation service may use while answering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tool {
    /// Web search with grounding metadata returned alongside the text.
    GroundedSearch,
}

#[derive(Debug, Clone, Default)]
pub struct GenerationRequest {
    /// Short name of the calling step, used for logging and by test doubles.
    pub label: String,
    pub prompt: String,
    pub system_instruction: String,
    pub tools: Vec<Tool>,
    /// JSON schema the output must follow, when structured output is wanted.
    pub output_schema: Option<Value>,
}

impl GenerationRequest {
    pub fn new(label: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    pub fn system(mut self, instruction: impl Into<String>) -> Self {
        self.system_instruction = instruction.into();
        self
    }

    pub fn tool(mut self, tool: Tool) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn schema(mut self, schema: Value) -> Self {
        self.output_schema = Some(schema);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FinishReason {
    Stop,
    MaxTokens,
    Safety,
    Recitation,
    Other,
}

impl FinishReason {
    /// The model refused or was cut off for policy reasons.
    pub fn is_blocked(self) -> bool {
        matches!(self, Self::Safety | Self::Recitation | Self::Other)
    }
}

#[derive(Debug, Clone)]
pub struct GenerationResponse {
    pub text: Option<String>,
    pub parsed: Option<Value>,
    pub citations_found: Vec<Source>,
    pub finish_reason: FinishReason,
}

impl GenerationResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            parsed: None,
            citations_found: Vec::new(),
            finish_reason: FinishReason::Stop,
        }
    }

    pub fn json(value: Value) -> Self {
        Self {
            text: Some(value.to_string()),
            parsed: Some(value),
            citations_found: Vec::new(),
            finish_reason: FinishReason::Stop,
        }
    }

    /// Non-empty text content, if any.
    pub fn text_content(&self) -> Option<&str> {
        self.text.as_deref().map(str::trim).filter(|t| !t.is_empty())
    }

    /// Decode structured output. Prefers the service's parsed object and falls
    /// back to the text body, tolerating a Markdown code fence around the JSON.
    pub fn parse<T: DeserializeOwned>(&self) -> Parsed<T> {
        if let Some(v) = &self.parsed {
            return match serde_json::from_value(v.clone()) {
                Ok(t) => Parsed::Ok(t),
                Err(e) => Parsed::ParseError(format!("parsed object has unexpected shape: {e}")),
            };
        }
        let Some(text) = self.text_content() else {
            return Parsed::ParseError("empty response".into());
        };
        match serde_json::from_str(strip_code_fence(text)) {
            Ok(t) => Parsed::Ok(t),
            Err(e) => Parsed::ParseError(format!("invalid JSON: {e}")),
        }
    }
}

fn strip_code_fence(text: &str) -> &str {
    let t = text.trim();
    let Some(rest) = t.strip_prefix("```") else {
        return t;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// Structured output never assumes shape: it either decoded or it did not.
#[derive(Debug, Clone, PartialEq)]
pub enum Parsed<T> {
    Ok(T),
    ParseError(String),
}

impl<T> Parsed<T> {
    pub fn ok(self) -> Option<T> {
        match self {
            Self::Ok(t) => Some(t),
            Self::ParseError(_) => None,
        }
    }
}

#[async_trait]
pub trait GenerationService: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResponse, GenerationError>;
}
