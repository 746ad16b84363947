use lawsage_core::generation::{GenerationRequest, Tool};
use serde_json::Value;

/// Tells the model to answer in JSON following `schema`. Used where the backend
/// cannot enforce the schema itself.
pub fn schema_instruction(schema: &Value) -> String {
    let pretty = serde_json::to_string_pretty(schema).unwrap_or_else(|_| schema.to_string());
    format!(
        "Respond only with JSON that matches this schema, with no prose before or after it:\n```json\n{pretty}\n```"
    )
}

/// Build the user message for a backend that has no native structured output
/// or search tools.
///
/// Composes the prompt, the schema instruction when structured output is wanted,
/// and a note when grounded search was requested but is not available, so the
/// model answers from its own knowledge instead of pretending to have searched.
pub fn build_instruction(req: &GenerationRequest) -> String {
    let mut s = String::new();

    s.push_str(&req.prompt);

    if req.tools.contains(&Tool::GroundedSearch) {
        s.push_str(
            "\n\n---\n\nWeb search is not available. Answer from what you know and say \
             plainly when an authority should be confirmed against a current source.",
        );
    }

    if let Some(schema) = &req.output_schema {
        s.push_str("\n\n---\n\n");
        s.push_str(&schema_instruction(schema));
    }

    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_plain_prompt_is_unchanged() {
        let req = GenerationRequest::new("reasoner", "Draft a strategy.");
        assert_eq!(build_instruction(&req), "Draft a strategy.");
    }

    #[test]
    fn test_search_note_and_schema() {
        let req = GenerationRequest::new("researcher", "Find statutes.")
            .tool(Tool::GroundedSearch)
            .schema(json!({"type": "array"}));
        let s = build_instruction(&req);
        assert!(s.starts_with("Find statutes."));
        assert!(s.contains("Web search is not available"));
        assert!(s.ends_with("```"));
        assert!(s.find("Web search").unwrap() < s.find("Respond only with JSON").unwrap());
    }
}
