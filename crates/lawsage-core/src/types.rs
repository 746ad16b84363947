use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Conversation ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One turn of the discovery conversation (clarifying questions and answers).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

// ── Sources & Retrieval ──────────────────────────────────────────────────

/// A grounding source surfaced to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub title: String,
    pub uri: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub jurisdiction: String,
    pub case_id: Option<String>,
    /// e.g. "statute", "case_law", "evidence_transcript".
    pub source_type: String,
    pub source_name: String,
}

/// A document returned by a retrieval collaborator. Read-only downstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrievedDocument {
    pub text: String,
    #[serde(default)]
    pub metadata: DocumentMetadata,
}

impl RetrievedDocument {
    /// Identity used when fusing result lists.
    pub fn key(&self) -> &str {
        &self.text
    }
}

// ── Citations ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerificationStatus {
    /// Extracted but not yet looked at by the verifier.
    Unchecked,
    Verified,
    NotFound,
    /// Authority index unreachable; never treated as verified.
    PendingManualVerification,
    Overruled,
    Superseded,
    /// Replacement chain deeper than the resolver follows.
    MaxDepthReached,
}

impl VerificationStatus {
    pub fn is_negative_treatment(self) -> bool {
        matches!(self, Self::Overruled | Self::Superseded)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unchecked => "UNCHECKED",
            Self::Verified => "VERIFIED",
            Self::NotFound => "NOT_FOUND",
            Self::PendingManualVerification => "PENDING_MANUAL_VERIFICATION",
            Self::Overruled => "OVERRULED",
            Self::Superseded => "SUPERSEDED",
            Self::MaxDepthReached => "MAX_DEPTH_REACHED",
        }
    }
}

impl std::fmt::Display for VerificationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Default for VerificationStatus {
    fn default() -> Self {
        Self::Unchecked
    }
}

/// A citation-shaped claim pulled out of generated text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub text: String,
    pub source: Option<String>,
    pub url: Option<String>,
    pub verification_status: VerificationStatus,
    /// Trust score in `[0, 1]`.
    pub confidence: f64,
}

impl Citation {
    pub fn candidate(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            source: None,
            url: None,
            verification_status: VerificationStatus::Unchecked,
            confidence: 0.0,
        }
    }

    /// Produce a new record carrying a verdict. The original is left untouched so
    /// earlier passes stay visible in the citation history.
    pub fn with_verdict(&self, status: VerificationStatus, confidence: f64) -> Self {
        Self {
            verification_status: status,
            confidence: confidence.clamp(0.0, 1.0),
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub citation: String,
    pub is_valid: bool,
    pub status: VerificationStatus,
    pub explanation: Option<String>,
    pub replacement_citation: Option<String>,
}

// ── Audit ────────────────────────────────────────────────────────────────

/// Longest raw-result sample kept per audit entry.
pub const AUDIT_SAMPLE_CHARS: usize = 1_000;

/// One externally observable lookup. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub node: String,
    pub query: String,
    pub raw_results_sample: String,
    pub timestamp: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(node: impl Into<String>, query: impl Into<String>, raw: &str) -> Self {
        Self {
            node: node.into(),
            query: query.into(),
            raw_results_sample: raw.chars().take(AUDIT_SAMPLE_CHARS).collect(),
            timestamp: Utc::now(),
        }
    }
}

// ── Analysis artifacts ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MatrixElement {
    pub element: String,
    #[serde(default)]
    pub facts: Vec<String>,
    #[serde(default)]
    pub authority: String,
}

/// Maps each legal element of a claim to the user's facts and the governing authority.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FactLawMatrix {
    #[serde(default)]
    pub elements: Vec<MatrixElement>,
    #[serde(default)]
    pub summary: String,
}
