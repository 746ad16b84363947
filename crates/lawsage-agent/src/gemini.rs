use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use lawsage_core::error::{is_rate_limit_message, GenerationError};
use lawsage_core::generation::{FinishReason, GenerationRequest, GenerationResponse, GenerationService, Tool};
use lawsage_core::types::Source;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::instruction::schema_instruction;

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Calls the Gemini `generateContent` REST endpoint.
///
/// Grounded search is requested with the `google_search` tool and the returned
/// grounding chunks become the response's sources. The API does not accept a
/// response schema together with a tool, so a grounded request carries its schema
/// in the prompt instead.
pub struct GeminiClient {
    pub base_url: String,
    pub model: String,
    api_key: String,
    http: reqwest::Client,
}

impl GeminiClient {
    pub fn new(api_key: &str, model: &str) -> Result<Self> {
        if api_key.trim().is_empty() {
            bail!("GEMINI_API_KEY not set");
        }
        let http = reqwest::Client::builder()
            .user_agent("lawsage/0.1 (legal-assistant)")
            .timeout(Duration::from_secs(120))
            .build()?;
        Ok(Self {
            base_url: DEFAULT_BASE_URL.into(),
            model: model.to_string(),
            api_key: api_key.to_string(),
            http,
        })
    }

    pub fn with_base_url(mut self, url: &str) -> Self {
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }

    /// Endpoint URL without the key; the key is added as a query parameter.
    pub fn endpoint(&self) -> String {
        format!("{}/v1beta/models/{}:generateContent", self.base_url, self.model)
    }
}

/// JSON body for one `generateContent` call.
pub fn request_body(req: &GenerationRequest) -> Value {
    let grounded = req.tools.contains(&Tool::GroundedSearch);

    let prompt = match (&req.output_schema, grounded) {
        (Some(schema), true) => format!("{}\n\n{}", req.prompt, schema_instruction(schema)),
        _ => req.prompt.clone(),
    };

    let mut body = json!({
        "contents": [{"role": "user", "parts": [{"text": prompt}]}],
    });
    if !req.system_instruction.is_empty() {
        body["systemInstruction"] = json!({"parts": [{"text": req.system_instruction}]});
    }
    if grounded {
        body["tools"] = json!([{"google_search": {}}]);
    } else if let Some(schema) = &req.output_schema {
        body["generationConfig"] = json!({
            "responseMimeType": "application/json",
            "responseJsonSchema": schema,
        });
    }
    body
}

// ── Response decoding ────────────────────────────────────────────────────

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<Content>,
    finish_reason: Option<String>,
    grounding_metadata: Option<GroundingMetadata>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GroundingMetadata {
    #[serde(default)]
    grounding_chunks: Vec<GroundingChunk>,
}

#[derive(Debug, Deserialize)]
struct GroundingChunk {
    web: Option<WebChunk>,
}

#[derive(Debug, Deserialize)]
struct WebChunk {
    uri: Option<String>,
    title: Option<String>,
}

fn finish_reason(raw: Option<&str>) -> FinishReason {
    match raw {
        None | Some("STOP") => FinishReason::Stop,
        Some("MAX_TOKENS") => FinishReason::MaxTokens,
        Some("SAFETY") => FinishReason::Safety,
        Some("RECITATION") => FinishReason::Recitation,
        Some(_) => FinishReason::Other,
    }
}

/// Map a status and body from the endpoint to a response or a typed error.
pub fn parse_response(status: u16, body: &str, structured: bool) -> Result<GenerationResponse, GenerationError> {
    if status == 429 {
        return Err(GenerationError::RateLimited(truncate(body, 200).to_string()));
    }
    if !(200..300).contains(&status) {
        if is_rate_limit_message(body) {
            return Err(GenerationError::RateLimited(truncate(body, 200).to_string()));
        }
        return Err(GenerationError::Api {
            status,
            body: truncate(body, 500).to_string(),
        });
    }

    let parsed: GenerateContentResponse = serde_json::from_str(body)
        .map_err(|e| GenerationError::Transport(format!("unexpected response shape: {e}")))?;

    let Some(candidate) = parsed.candidates.into_iter().next() else {
        return match parsed.prompt_feedback.and_then(|f| f.block_reason) {
            Some(reason) => {
                warn!(reason = %reason, "prompt blocked");
                Err(GenerationError::Blocked(FinishReason::Safety))
            }
            None => Err(GenerationError::Empty),
        };
    };

    let reason = finish_reason(candidate.finish_reason.as_deref());
    let text: String = candidate
        .content
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();

    if text.trim().is_empty() {
        return Err(if reason.is_blocked() {
            GenerationError::Blocked(reason)
        } else {
            GenerationError::Empty
        });
    }

    let citations_found = candidate
        .grounding_metadata
        .map(|m| {
            m.grounding_chunks
                .into_iter()
                .filter_map(|c| c.web)
                .map(|w| Source {
                    title: w.title.unwrap_or_default(),
                    uri: w.uri.filter(|u| !u.is_empty()),
                })
                .collect()
        })
        .unwrap_or_default();

    let parsed = if structured {
        serde_json::from_str(text.trim()).ok()
    } else {
        None
    };

    Ok(GenerationResponse {
        text: Some(text),
        parsed,
        citations_found,
        finish_reason: reason,
    })
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((i, _)) => &s[..i],
        None => s,
    }
}

#[async_trait]
impl GenerationService for GeminiClient {
    async fn generate(&self, req: &GenerationRequest) -> Result<GenerationResponse, GenerationError> {
        let body = request_body(req);
        let structured = req.output_schema.is_some() && !req.tools.contains(&Tool::GroundedSearch);

        debug!(label = %req.label, model = %self.model, "calling gemini generateContent");

        let resp = self
            .http
            .post(self.endpoint())
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await
            .map_err(|e| GenerationError::Transport(e.to_string()))?;

        let status = resp.status().as_u16();
        let text = resp
            .text()
            .await
            .map_err(|e| GenerationError::Transport(e.to_string()))?;

        match parse_response(status, &text, structured) {
            Ok(r) => {
                info!(
                    label = %req.label,
                    output_len = r.text.as_deref().map_or(0, str::len),
                    sources = r.citations_found.len(),
                    "gemini response received"
                );
                Ok(r)
            }
            Err(e) => {
                warn!(label = %req.label, status, "gemini call failed: {e}");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grounded_request_carries_schema_in_prompt() {
        let req = GenerationRequest::new("researcher", "Find lockout statutes.")
            .system("You are a researcher.")
            .tool(Tool::GroundedSearch)
            .schema(json!({"type": "array", "items": {"type": "string"}}));
        let body = request_body(&req);
        assert_eq!(body["tools"], json!([{"google_search": {}}]));
        assert!(body.get("generationConfig").is_none());
        let prompt = body["contents"][0]["parts"][0]["text"].as_str().unwrap();
        assert!(prompt.starts_with("Find lockout statutes."));
        assert!(prompt.contains("\"array\""));
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "You are a researcher.");
    }

    #[test]
    fn test_structured_request_uses_generation_config() {
        let schema = json!({"type": "object"});
        let req = GenerationRequest::new("formatter", "Format.").schema(schema.clone());
        let body = request_body(&req);
        assert_eq!(body["generationConfig"]["responseMimeType"], "application/json");
        assert_eq!(body["generationConfig"]["responseJsonSchema"], schema);
        assert!(body.get("tools").is_none());
        assert!(body.get("systemInstruction").is_none());
    }

    #[test]
    fn test_parse_text_and_grounding_sources() {
        let body = json!({
            "candidates": [{
                "content": {"parts": [{"text": "Civil Code 789.3 "}, {"text": "bars lockouts."}]},
                "finishReason": "STOP",
                "groundingMetadata": {"groundingChunks": [
                    {"web": {"uri": "https://law.example/789.3", "title": "Lockouts"}},
                    {"web": {"title": "Handbook", "uri": ""}},
                    {}
                ]}
            }]
        })
        .to_string();
        let r = parse_response(200, &body, false).unwrap();
        assert_eq!(r.text.as_deref(), Some("Civil Code 789.3 bars lockouts."));
        assert_eq!(r.finish_reason, FinishReason::Stop);
        assert_eq!(r.citations_found.len(), 2);
        assert_eq!(r.citations_found[0].uri.as_deref(), Some("https://law.example/789.3"));
        assert_eq!(r.citations_found[1].uri, None);
        assert!(r.parsed.is_none());
    }

    #[test]
    fn test_parse_structured_output() {
        let body = json!({"candidates": [{"content": {"parts": [{"text": "[\"a\", \"b\"]"}]}}]}).to_string();
        let r = parse_response(200, &body, true).unwrap();
        assert_eq!(r.parsed, Some(json!(["a", "b"])));
    }

    #[test]
    fn test_rate_limit_statuses() {
        assert!(matches!(parse_response(429, "slow down", false), Err(GenerationError::RateLimited(_))));
        assert!(matches!(
            parse_response(503, "Quota exceeded for requests", false),
            Err(GenerationError::RateLimited(_))
        ));
        assert!(matches!(
            parse_response(400, "invalid argument", false),
            Err(GenerationError::Api { status: 400, .. })
        ));
    }

    #[test]
    fn test_blocked_and_empty() {
        let blocked = json!({"promptFeedback": {"blockReason": "SAFETY"}}).to_string();
        assert!(matches!(
            parse_response(200, &blocked, false),
            Err(GenerationError::Blocked(FinishReason::Safety))
        ));

        let cut = json!({"candidates": [{"finishReason": "RECITATION"}]}).to_string();
        assert!(matches!(
            parse_response(200, &cut, false),
            Err(GenerationError::Blocked(FinishReason::Recitation))
        ));

        let empty = json!({"candidates": []}).to_string();
        assert!(matches!(parse_response(200, &empty, false), Err(GenerationError::Empty)));
        assert!(matches!(parse_response(200, "<html>", false), Err(GenerationError::Transport(_))));
    }

    #[test]
    fn test_missing_key_rejected() {
        assert!(GeminiClient::new("  ", "gemini-2.5-flash").is_err());
        let c = GeminiClient::new("k", "gemini-2.5-flash").unwrap().with_base_url("http://127.0.0.1:1/");
        assert_eq!(c.endpoint(), "http://127.0.0.1:1/v1beta/models/gemini-2.5-flash:generateContent");
    }
}
