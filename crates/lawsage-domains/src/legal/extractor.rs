use std::sync::{Arc, LazyLock};

use lawsage_core::generation::{GenerationRequest, GenerationService, Parsed};
use lawsage_core::types::Citation;
use regex::Regex;
use serde_json::json;
use tracing::{info, warn};

pub const EXTRACT_LABEL: &str = "extract_citations";

const EXTRACT_SYSTEM: &str = "You are a legal citation extractor. Return every citation to a statute, \
regulation, court rule or case exactly as it appears in the text. Return an empty list when there are none.";

#[allow(clippy::unwrap_used)]
static USC_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b\d+\s+U\.?S\.?C\.?\s+§?\s*\d+(?:\.\d+)?(?:\([^)]+\))*").unwrap()
});

#[allow(clippy::unwrap_used)]
static STATE_CODE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b[A-Z][a-z]+\.?\s+[A-Za-z]+\.?\s+Code\s+§?\s*\d+(?:\.\d+)?(?:\([^)]+\))*").unwrap()
});

#[allow(clippy::unwrap_used)]
static COURT_RULE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(?:Rule|R\.)\s+\d+[a-z]?(?:\([a-z0-9]+\))*").unwrap());

#[allow(clippy::unwrap_used)]
static REPORTER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b\d+\s+(?:U\.S\.|S\.\s?Ct\.|F\.\s?(?:Supp\.\s?)?(?:2d|3d|4th)?|Cal\.\s?(?:App\.\s?)?(?:2d|3d|4th|5th)?|N\.Y\.\s?(?:2d|3d)?|P\.\s?(?:2d|3d)?)\s+\d+\b").unwrap()
});

#[allow(clippy::unwrap_used)]
static SECTION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"§\s*\d+(?:\.\d+)?(?:\([^)]+\))*").unwrap());

/// Order-preserving dedupe on trimmed text. A citation that happens to be a
/// prefix of another one (`§ 1942` next to `§ 1942.5`) is a separate claim and
/// is kept.
pub fn dedupe_citations(candidates: Vec<String>) -> Vec<String> {
    let mut unique: Vec<String> = Vec::new();
    for c in candidates {
        let c = c.trim().to_string();
        if !c.is_empty() && !unique.contains(&c) {
            unique.push(c);
        }
    }
    unique
}

/// Citation-shaped spans found by pattern, in order of appearance.
/// Used when the model-based extraction is unavailable. Where matches overlap
/// the earliest, longest one wins, so `§ 345` inside `12 U.S.C. § 345` is not
/// reported on its own.
pub fn pattern_citations(text: &str) -> Vec<String> {
    let mut spans: Vec<(usize, usize)> = Vec::new();
    for re in [&*USC_RE, &*STATE_CODE_RE, &*COURT_RULE_RE, &*REPORTER_RE, &*SECTION_RE] {
        spans.extend(re.find_iter(text).map(|m| (m.start(), m.end())));
    }
    spans.sort_by(|a, b| a.0.cmp(&b.0).then(b.1.cmp(&a.1)));

    let mut kept: Vec<(usize, usize)> = Vec::new();
    for (start, end) in spans {
        if kept.last().map_or(true, |&(_, last_end)| start >= last_end) {
            kept.push((start, end));
        }
    }
    dedupe_citations(kept.into_iter().map(|(s, e)| text[s..e].to_string()).collect())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionMethod {
    Model,
    Pattern,
}

#[derive(Debug, Clone)]
pub struct Extraction {
    pub citations: Vec<Citation>,
    pub method: ExtractionMethod,
    /// Why the pattern fallback was used.
    pub fallback_reason: Option<String>,
}

pub struct CitationExtractor {
    generator: Arc<dyn GenerationService>,
}

impl CitationExtractor {
    pub fn new(generator: Arc<dyn GenerationService>) -> Self {
        Self { generator }
    }

    pub fn request(text: &str) -> GenerationRequest {
        GenerationRequest::new(EXTRACT_LABEL, format!("Extract all legal citations from this text:\n\n{text}"))
            .system(EXTRACT_SYSTEM)
            .schema(json!({"type": "array", "items": {"type": "string"}}))
    }

    /// Ask the model for a list of citation strings; fall back to the regex
    /// patterns when the call fails or the output does not decode.
    pub async fn extract(&self, text: &str) -> Extraction {
        if text.trim().is_empty() {
            return Extraction {
                citations: Vec::new(),
                method: ExtractionMethod::Model,
                fallback_reason: None,
            };
        }

        let fallback_reason = match self.generator.generate(&Self::request(text)).await {
            Ok(resp) => match resp.parse::<Vec<String>>() {
                Parsed::Ok(list) => {
                    let citations: Vec<Citation> =
                        dedupe_citations(list).into_iter().map(Citation::candidate).collect();
                    info!(count = citations.len(), "extracted citations");
                    return Extraction {
                        citations,
                        method: ExtractionMethod::Model,
                        fallback_reason: None,
                    };
                }
                Parsed::ParseError(e) => format!("extraction output did not decode: {e}"),
            },
            Err(e) => format!("extraction call failed: {e}"),
        };

        warn!("{fallback_reason}; using citation patterns");
        Extraction {
            citations: pattern_citations(text).into_iter().map(Citation::candidate).collect(),
            method: ExtractionMethod::Pattern,
            fallback_reason: Some(fallback_reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_citations_finds_common_forms() {
        let text = "Under 12 U.S.C. § 345 and Cal. Civ. Code § 1708, plus Rule 12(b)(6), \
                    see Roe v. Wade, 410 U.S. 113.";
        let found = pattern_citations(text);
        assert_eq!(
            found,
            vec![
                "12 U.S.C. § 345",
                "Cal. Civ. Code § 1708",
                "Rule 12(b)(6)",
                "410 U.S. 113",
            ]
        );
    }

    #[test]
    fn test_bare_section_kept_when_not_part_of_longer_citation() {
        assert_eq!(pattern_citations("See § 1942.5 for retaliation."), vec!["§ 1942.5"]);
    }

    #[test]
    fn test_dedupe_is_exact_text_only() {
        let out = dedupe_citations(vec![
            " 12 U.S.C. § 345".into(),
            "12 U.S.C. § 345".into(),
            "Cal. Civ. Code § 1942.5".into(),
            "Cal. Civ. Code § 1942".into(),
            "".into(),
        ]);
        assert_eq!(out, vec!["12 U.S.C. § 345", "Cal. Civ. Code § 1942.5", "Cal. Civ. Code § 1942"]);
    }

    #[test]
    fn test_pattern_spans_keep_separate_prefix_citations() {
        let text = "Retaliation is barred by Cal. Civ. Code § 1942.5; repairs fall under Cal. Civ. Code § 1942.";
        assert_eq!(
            pattern_citations(text),
            vec!["Cal. Civ. Code § 1942.5", "Cal. Civ. Code § 1942"]
        );
    }

    #[test]
    fn test_no_false_rule_match_inside_words() {
        assert!(pattern_citations("Number 5 on the docket").is_empty());
    }
}
