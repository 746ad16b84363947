//! Deterministic post-processing of the final answer.
//!
//! [`harden`] guarantees that the canonical disclaimer opens the output exactly once
//! and that the strategy and filings sections are separated by [`DELIMITER`], no
//! matter what the model produced. It is idempotent.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub const DISCLAIMER: &str = "LEGAL DISCLAIMER: I am an AI helping you represent yourself Pro Se. \
This is legal information, not legal advice. Always consult with a qualified attorney.";

pub const DELIMITER: &str = "---";

pub const NO_FILINGS_MSG: &str =
    "No filings generated. Please try a more specific request or check the strategy tab.";

/// Sentences containing any of these are model-written disclaimers.
const DISCLAIMER_KEYWORDS: &[&str] = &[
    "pro se",
    "legal information",
    "not legal advice",
    "not an attorney",
    "legal disclaimer",
];

/// Minimum citations a complete memo carries.
pub const MIN_CITATIONS: usize = 3;

#[allow(clippy::unwrap_used)]
static SENTENCE_END: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[.!?]\s+").unwrap());

#[allow(clippy::unwrap_used)]
static ROADMAP_HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(roadmap|next steps|step-by-step|what to do next)\s*:").unwrap());

fn has_disclaimer_keyword(s: &str) -> bool {
    let lower = s.to_lowercase();
    DISCLAIMER_KEYWORDS.iter().any(|k| lower.contains(k))
}

fn split_sentences(line: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    for m in SENTENCE_END.find_iter(line) {
        // Keep the punctuation, drop the whitespace.
        out.push(line[start..m.start() + 1].trim());
        start = m.end();
    }
    if start < line.len() {
        out.push(line[start..].trim());
    }
    out.retain(|s| !s.is_empty());
    out
}

/// Drop disclaimer-like sentences. Lines without a keyword are kept as written.
fn strip_disclaimer_sentences(text: &str) -> String {
    let mut lines = Vec::new();
    for line in text.lines() {
        if !has_disclaimer_keyword(line) {
            lines.push(line.trim_end().to_string());
            continue;
        }
        let kept: Vec<&str> = split_sentences(line)
            .into_iter()
            .filter(|s| !has_disclaimer_keyword(s))
            .collect();
        if !kept.is_empty() {
            lines.push(kept.join(" "));
        }
    }
    lines.join("\n").trim().to_string()
}

pub fn harden(text: &str) -> String {
    let (strategy, filings) = match text.split_once(DELIMITER) {
        Some((s, f)) => (s, f.trim()),
        None => (text, ""),
    };
    let filings = if filings.is_empty() { NO_FILINGS_MSG } else { filings };

    let strategy = strategy.replace(DISCLAIMER, " ");
    let cleaned = strip_disclaimer_sentences(&strategy);

    let head = if cleaned.is_empty() {
        DISCLAIMER.to_string()
    } else {
        format!("{DISCLAIMER}\n\n{cleaned}")
    };
    format!("{head}\n\n{DELIMITER}\n\n{filings}")
}

// ── Structured memo ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoadmapStep {
    pub step: u32,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub estimated_time: Option<String>,
    #[serde(default)]
    pub required_documents: Vec<String>,
}

/// The formatter's structured output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredMemo {
    pub disclaimer: String,
    pub strategy: String,
    pub roadmap: Vec<RoadmapStep>,
    pub filing_template: String,
    #[serde(default)]
    pub citations: Vec<String>,
}

impl StructuredMemo {
    pub fn schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "disclaimer": {"type": "string"},
                "strategy": {"type": "string"},
                "roadmap": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "step": {"type": "integer"},
                            "title": {"type": "string"},
                            "description": {"type": "string"},
                            "estimated_time": {"type": "string"},
                            "required_documents": {"type": "array", "items": {"type": "string"}}
                        },
                        "required": ["step", "title", "description"]
                    }
                },
                "filing_template": {"type": "string"},
                "citations": {"type": "array", "items": {"type": "string"}}
            },
            "required": ["disclaimer", "strategy", "roadmap", "filing_template", "citations"]
        })
    }

    /// Delimited text form: strategy and roadmap, then the filing template.
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(self.disclaimer.trim());
        out.push_str("\n\n");
        out.push_str(self.strategy.trim());
        if !self.roadmap.is_empty() {
            out.push_str("\n\nProcedural Roadmap:\n");
            for step in &self.roadmap {
                out.push_str(&format!("{}. {}: {}", step.step, step.title, step.description));
                if let Some(t) = &step.estimated_time {
                    out.push_str(&format!(" ({t})"));
                }
                out.push('\n');
            }
        }
        if !self.citations.is_empty() {
            out.push_str("\nAuthorities:\n");
            for c in &self.citations {
                out.push_str(&format!("- {c}\n"));
            }
        }
        out.push_str(&format!("\n{DELIMITER}\n\n"));
        out.push_str(self.filing_template.trim());
        out
    }
}

// ── Structure checks ─────────────────────────────────────────────────────

/// Which required parts a memo carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StructureCheck {
    pub has_disclaimer: bool,
    pub citation_count: usize,
    pub has_roadmap: bool,
    pub has_delimiter: bool,
}

impl StructureCheck {
    pub fn parsed(memo: &StructuredMemo) -> Self {
        Self {
            has_disclaimer: memo.disclaimer.to_uppercase().contains("LEGAL DISCLAIMER"),
            citation_count: memo.citations.len(),
            has_roadmap: !memo.roadmap.is_empty(),
            has_delimiter: true,
        }
    }

    /// Text-pattern checks for output that could not be decoded.
    /// `citation_count` comes from the pattern-based citation scan.
    pub fn text(text: &str, citation_count: usize) -> Self {
        Self {
            has_disclaimer: text.to_uppercase().contains("LEGAL DISCLAIMER"),
            citation_count,
            has_roadmap: ROADMAP_HEADING.is_match(text),
            has_delimiter: text.contains(DELIMITER),
        }
    }

    pub fn passed(&self) -> bool {
        self.has_disclaimer && self.citation_count >= MIN_CITATIONS && self.has_roadmap && self.has_delimiter
    }

    /// Parts [`harden`] cannot supply.
    pub fn missing(&self) -> Vec<String> {
        let mut out = Vec::new();
        if self.citation_count < MIN_CITATIONS {
            out.push(format!("only {} of {MIN_CITATIONS} required citations", self.citation_count));
        }
        if !self.has_roadmap {
            out.push("no procedural roadmap".to_string());
        }
        out
    }
}
