//! Authority verification: existence lookup, negative-treatment check with
//! circular resolution of replacements, reasoning validation and a blended
//! confidence score.

use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use futures::stream::{self, StreamExt};
use lawsage_core::authority::AuthorityIndex;
use lawsage_core::generation::{GenerationRequest, GenerationService, Parsed, Tool};
use lawsage_core::types::{AuditEntry, Citation, VerificationResult, VerificationStatus};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

pub const TREATMENT_RESEARCH_LABEL: &str = "treatment_research";
pub const TREATMENT_JUDGMENT_LABEL: &str = "treatment_judgment";
pub const REASONING_LABEL: &str = "validate_reasoning";

/// Deepest replacement followed by circular resolution.
pub const MAX_RESOLUTION_DEPTH: u32 = 2;
pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.4;

const AUDIT_NODE: &str = "verifier";

// ── Confidence score ─────────────────────────────────────────────────────

/// Weight given to the index lookup. Grows by 0.01 per hit and is capped at 0.5,
/// so a lookup alone never decides trust.
pub fn cl_weight(result_count: u32) -> f64 {
    0.4 + (f64::from(result_count) * 0.01).min(0.1)
}

/// `cl_score * cl_weight + consistency * (1 - cl_weight)`, where `cl_score` is 1.0
/// when the index returned at least one hit.
pub fn confidence_score(result_count: u32, consistency: f64) -> f64 {
    let weight = cl_weight(result_count);
    let cl_score = if result_count > 0 { 1.0 } else { 0.0 };
    (cl_score * weight + consistency.clamp(0.0, 1.0) * (1.0 - weight)).clamp(0.0, 1.0)
}

// ── Structured outputs ───────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
struct TreatmentJudgment {
    is_valid: bool,
    #[serde(default)]
    status: String,
    #[serde(default)]
    explanation: String,
    #[serde(default)]
    replacement_citation: Option<String>,
}

fn treatment_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "is_valid": {"type": "boolean"},
            "status": {"type": "string", "enum": ["GOOD_LAW", "OVERRULED", "SUPERSEDED"]},
            "explanation": {"type": "string"},
            "replacement_citation": {"type": "string"}
        },
        "required": ["is_valid", "status", "explanation"]
    })
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ReasoningCheck {
    pub valid: bool,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub critique: String,
}

fn reasoning_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "valid": {"type": "boolean"},
            "confidence": {"type": "number"},
            "critique": {"type": "string"}
        },
        "required": ["valid", "confidence", "critique"]
    })
}

fn judgment_status(j: &TreatmentJudgment) -> VerificationStatus {
    let status = j.status.to_uppercase();
    if status.contains("SUPERSEDED") {
        VerificationStatus::Superseded
    } else if status.contains("OVERRULED") || !j.is_valid {
        VerificationStatus::Overruled
    } else {
        VerificationStatus::Verified
    }
}

// ── Verdicts ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Flag {
    Trusted,
    /// The index has no record of it.
    Unverified,
    /// Overruled or superseded; carries the tag text.
    Superseded(String),
    LowConfidence(f64),
    /// The index could not be asked.
    Pending,
}

impl Flag {
    /// Bracketed annotation written next to the citation in the output.
    pub fn tag(&self) -> Option<String> {
        match self {
            Self::Trusted => None,
            Self::Unverified => Some("[UNVERIFIED]".into()),
            Self::Superseded(note) => Some(format!("[SUPERSEDED: {note}]")),
            Self::LowConfidence(score) => Some(format!("[LOW_CONFIDENCE: {score:.2}]")),
            Self::Pending => Some("[PENDING_VERIFICATION]".into()),
        }
    }
}

const TAG_PREFIXES: &[&str] = &[" [UNVERIFIED]", " [SUPERSEDED", " [LOW_CONFIDENCE", " [PENDING_VERIFICATION]"];

#[derive(Debug, Clone)]
pub struct CitationVerdict {
    /// New record carrying the verdict; the extracted candidate is left as it was.
    pub citation: Citation,
    pub result: VerificationResult,
    pub flag: Flag,
    pub reasoning_mismatch: Option<String>,
    /// Checks that could not run for a citation that otherwise passed.
    pub unchecked: Option<String>,
    pub audit: Vec<AuditEntry>,
}

/// Outcome of a treatment check on one citation.
#[derive(Debug, Clone)]
pub struct TreatmentCheck {
    pub result: VerificationResult,
    pub audit: Option<AuditEntry>,
    /// Why the history could not be checked, when it could not.
    pub unchecked: Option<String>,
}

/// Outcome of following a citation's replacement chain.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub result: VerificationResult,
    pub audit: Vec<AuditEntry>,
    /// Why this citation's treatment history could not be checked.
    pub unchecked: Option<String>,
    /// Where the replacement's own verification ended, if there was one.
    pub replacement_status: Option<VerificationStatus>,
}

/// Sentence folded into a citation's explanation when its replacement did
/// not verify.
fn replacement_note(replacement: &str, status: VerificationStatus) -> String {
    match status {
        VerificationStatus::NotFound => {
            format!("Note: the replacement {replacement} was not found in the authority index and is unverified.")
        }
        VerificationStatus::PendingManualVerification => {
            format!("Note: the replacement {replacement} could not be looked up and is unverified.")
        }
        VerificationStatus::MaxDepthReached => {
            format!("Note: the replacement {replacement} was not checked beyond depth {MAX_RESOLUTION_DEPTH}.")
        }
        other => format!("Note: the replacement {replacement} is itself {other}."),
    }
}

/// Text the reasoning check compares a citation against.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReasoningContext<'a> {
    /// Research material describing what the authorities hold.
    pub source_context: &'a str,
    /// The document in which the citations are applied.
    pub argument_text: &'a str,
}

/// The paragraph of `text` that cites `citation`, or the whole text.
fn applied_argument<'a>(text: &'a str, citation: &str) -> &'a str {
    text.split("\n\n")
        .find(|p| p.contains(citation))
        .map(str::trim)
        .unwrap_or(text)
}

// ── AuthorityVerifier ────────────────────────────────────────────────────

pub struct AuthorityVerifier {
    generator: Arc<dyn GenerationService>,
    index: Arc<dyn AuthorityIndex>,
    threshold: f64,
    concurrency: usize,
}

impl AuthorityVerifier {
    pub fn new(generator: Arc<dyn GenerationService>, index: Arc<dyn AuthorityIndex>) -> Self {
        Self {
            generator,
            index,
            threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            concurrency: 4,
        }
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Grounded lookup of the citation's later history, then a structured judgment
    /// on that research. If either call fails the citation is treated as good law
    /// and the check says why it could not be made.
    pub async fn check_negative_treatment(&self, citation: &str, jurisdiction: &str) -> TreatmentCheck {
        let unchecked = |why: String, audit: Option<AuditEntry>| {
            warn!(citation, "treatment history could not be checked: {why}");
            TreatmentCheck {
                result: VerificationResult {
                    citation: citation.to_string(),
                    is_valid: true,
                    status: VerificationStatus::Verified,
                    explanation: Some(format!("Treatment history could not be checked: {why}")),
                    replacement_citation: None,
                },
                audit,
                unchecked: Some(format!("treatment history not checked ({why})")),
            }
        };

        let research_req = GenerationRequest::new(
            TREATMENT_RESEARCH_LABEL,
            format!(
                "Research the subsequent treatment of {citation} in {jurisdiction}. \
                 Has it been overruled, superseded, or limited? Name the later authority if so."
            ),
        )
        .system("You are a legal research assistant checking whether authorities are still good law.")
        .tool(Tool::GroundedSearch);

        let research = match self.generator.generate(&research_req).await {
            Ok(resp) => resp.text_content().unwrap_or_default().to_string(),
            Err(e) => return unchecked(e.to_string(), None),
        };
        let audit = AuditEntry::new(AUDIT_NODE, format!("treatment: {citation}"), &research);

        let judgment_req = GenerationRequest::new(
            TREATMENT_JUDGMENT_LABEL,
            format!(
                "Citation: {citation}\nJurisdiction: {jurisdiction}\n\nResearch:\n{research}\n\n\
                 Based only on the research above, is the citation still good law?"
            ),
        )
        .system("You judge the validity of legal authorities. Answer strictly in the requested JSON shape.")
        .schema(treatment_schema());

        let judgment = match self.generator.generate(&judgment_req).await {
            Ok(resp) => match resp.parse::<TreatmentJudgment>() {
                Parsed::Ok(j) => j,
                Parsed::ParseError(e) => return unchecked(e, Some(audit)),
            },
            Err(e) => return unchecked(e.to_string(), Some(audit)),
        };

        let status = judgment_status(&judgment);
        TreatmentCheck {
            result: VerificationResult {
                citation: citation.to_string(),
                is_valid: status == VerificationStatus::Verified,
                status,
                explanation: Some(judgment.explanation).filter(|e| !e.trim().is_empty()),
                replacement_citation: judgment.replacement_citation.filter(|r| !r.trim().is_empty()),
            },
            audit: Some(audit),
            unchecked: None,
        }
    }

    /// Check negative treatment and, when the citation was replaced, verify the
    /// replacement the same way, at most [`MAX_RESOLUTION_DEPTH`] levels deep.
    /// A replacement must first exist in the authority index. One that does
    /// not, or that is itself no longer good law, is folded into the original's
    /// explanation.
    pub fn circular_verification<'a>(
        &'a self,
        citation: &'a str,
        jurisdiction: &'a str,
        depth: u32,
    ) -> BoxFuture<'a, Resolution> {
        async move {
            let stop = |status: VerificationStatus, explanation: String, audit: Vec<AuditEntry>| Resolution {
                result: VerificationResult {
                    citation: citation.to_string(),
                    is_valid: false,
                    status,
                    explanation: Some(explanation),
                    replacement_citation: None,
                },
                audit,
                unchecked: None,
                replacement_status: None,
            };

            if depth > MAX_RESOLUTION_DEPTH {
                debug!(citation, depth, "replacement chain too deep, stopping");
                return stop(
                    VerificationStatus::MaxDepthReached,
                    format!("Replacement chain not followed past depth {MAX_RESOLUTION_DEPTH}."),
                    Vec::new(),
                );
            }

            let mut audit = Vec::new();
            // The original citation was looked up by the caller; replacements are not.
            if depth > 0 {
                match self.index.lookup(citation).await {
                    Ok(hit) if hit.found => audit.push(AuditEntry::new(
                        AUDIT_NODE,
                        format!("replacement: {citation}"),
                        &format!("Status: FOUND\nResult Count: {}", hit.count),
                    )),
                    Ok(hit) => {
                        info!(citation, depth, "replacement not found in authority index");
                        audit.push(AuditEntry::new(
                            AUDIT_NODE,
                            format!("replacement: {citation}"),
                            &format!("Status: NOT_FOUND\nResult Count: {}", hit.count),
                        ));
                        return stop(VerificationStatus::NotFound, "No matching authority found.".into(), audit);
                    }
                    Err(e) => {
                        warn!(citation, index = self.index.name(), "replacement lookup failed: {e}");
                        audit.push(AuditEntry::new(
                            AUDIT_NODE,
                            format!("replacement: {citation}"),
                            &format!("Status: ERROR\nDetail: {e}"),
                        ));
                        return stop(VerificationStatus::PendingManualVerification, e.to_string(), audit);
                    }
                }
            }

            let check = self.check_negative_treatment(citation, jurisdiction).await;
            audit.extend(check.audit);
            let mut result = check.result;

            let replacement = result
                .replacement_citation
                .clone()
                .filter(|r| result.status.is_negative_treatment() && r.as_str() != citation);
            let mut replacement_status = None;
            if let Some(rep) = replacement {
                let inner = self.circular_verification(&rep, jurisdiction, depth + 1).await;
                audit.extend(inner.audit);
                replacement_status = Some(inner.result.status);
                if !inner.result.is_valid {
                    let note = replacement_note(&rep, inner.result.status);
                    result.explanation = Some(match result.explanation.take() {
                        Some(e) => format!("{e} {note}"),
                        None => note,
                    });
                }
            }
            Resolution {
                result,
                audit,
                unchecked: check.unchecked,
                replacement_status,
            }
        }
        .boxed()
    }

    /// Independent check that the authority's holding supports the argument made
    /// with it. `Err` carries why the check could not run.
    pub async fn validate_reasoning(
        &self,
        citation: &str,
        source_context: &str,
        applied_argument: &str,
    ) -> Result<ReasoningCheck, String> {
        let req = GenerationRequest::new(
            REASONING_LABEL,
            format!(
                "Citation: {citation}\n\nWhat the authority holds:\n{source_context}\n\n\
                 Argument made with it:\n{applied_argument}\n\n\
                 Does the holding actually support this specific argument? \
                 Give a confidence between 0 and 1 and a short critique."
            ),
        )
        .system("You are a skeptical appellate clerk checking that authorities support the arguments they are cited for.")
        .schema(reasoning_schema());

        match self.generator.generate(&req).await {
            Ok(resp) => match resp.parse::<ReasoningCheck>() {
                Parsed::Ok(mut check) => {
                    check.confidence = check.confidence.clamp(0.0, 1.0);
                    Ok(check)
                }
                Parsed::ParseError(e) => {
                    warn!(citation, "reasoning check output did not decode: {e}");
                    Err(format!("reasoning check output did not decode: {e}"))
                }
            },
            Err(e) => {
                warn!(citation, "reasoning check failed: {e}");
                Err(format!("reasoning check failed: {e}"))
            }
        }
    }

    /// Full verification of one citation.
    pub async fn verify(&self, citation: &Citation, jurisdiction: &str, ctx: ReasoningContext<'_>) -> CitationVerdict {
        let text = citation.text.as_str();
        let mut audit = Vec::new();

        let hit = match self.index.lookup(text).await {
            Ok(hit) => {
                let status = if hit.found { "FOUND" } else { "NOT_FOUND" };
                audit.push(AuditEntry::new(
                    AUDIT_NODE,
                    text,
                    &format!("Status: {status}\nResult Count: {}", hit.count),
                ));
                hit
            }
            Err(e) => {
                warn!(citation = %text, index = self.index.name(), "authority index unavailable: {e}");
                audit.push(AuditEntry::new(AUDIT_NODE, text, &format!("Status: ERROR\nDetail: {e}")));
                return CitationVerdict {
                    citation: citation.with_verdict(VerificationStatus::PendingManualVerification, 0.0),
                    result: VerificationResult {
                        citation: text.to_string(),
                        is_valid: false,
                        status: VerificationStatus::PendingManualVerification,
                        explanation: Some(e.to_string()),
                        replacement_citation: None,
                    },
                    flag: Flag::Pending,
                    reasoning_mismatch: None,
                    unchecked: None,
                    audit,
                };
            }
        };

        if !hit.found {
            info!(citation = %text, "citation not found in authority index");
            return CitationVerdict {
                citation: citation.with_verdict(VerificationStatus::NotFound, 0.0),
                result: VerificationResult {
                    citation: text.to_string(),
                    is_valid: false,
                    status: VerificationStatus::NotFound,
                    explanation: Some("No matching authority found.".into()),
                    replacement_citation: None,
                },
                flag: Flag::Unverified,
                reasoning_mismatch: None,
                unchecked: None,
                audit,
            };
        }

        let resolution = self.circular_verification(text, jurisdiction, 0).await;
        audit.extend(resolution.audit);
        let result = resolution.result;

        if !result.is_valid {
            let note = match (&result.replacement_citation, resolution.replacement_status) {
                (
                    Some(rep),
                    Some(VerificationStatus::NotFound | VerificationStatus::PendingManualVerification),
                ) => format!("{} by {rep}, replacement unverified", result.status),
                (Some(rep), _) => format!("{} by {rep}", result.status),
                (None, _) => result.status.to_string(),
            };
            info!(citation = %text, status = %result.status, "negative treatment");
            return CitationVerdict {
                citation: citation.with_verdict(result.status, confidence_score(hit.count, 0.0)),
                result,
                flag: Flag::Superseded(note),
                reasoning_mismatch: None,
                unchecked: None,
                audit,
            };
        }

        let mut unchecked: Vec<String> = resolution.unchecked.into_iter().collect();
        let reasoning = self
            .validate_reasoning(text, ctx.source_context, applied_argument(ctx.argument_text, text))
            .await;
        let (consistency, reasoning_mismatch) = match reasoning {
            Ok(r) if r.valid => (r.confidence, None),
            Ok(r) => (0.0, Some(format!("{text}: {}", r.critique.trim()))),
            Err(why) => {
                unchecked.push(why);
                (0.0, None)
            }
        };

        let score = confidence_score(hit.count, consistency);
        let flag = if score < self.threshold {
            Flag::LowConfidence(score)
        } else {
            Flag::Trusted
        };
        debug!(citation = %text, count = hit.count, consistency, score, "citation scored");

        CitationVerdict {
            citation: citation.with_verdict(VerificationStatus::Verified, score),
            result,
            flag,
            reasoning_mismatch,
            unchecked: Some(unchecked.join("; ")).filter(|u| !u.is_empty()),
            audit,
        }
    }

    /// Verify every citation with at most `concurrency` in flight. Results come back
    /// in input order.
    pub async fn verify_all(
        &self,
        citations: &[Citation],
        jurisdiction: &str,
        ctx: ReasoningContext<'_>,
    ) -> Vec<CitationVerdict> {
        let mut verdicts: Vec<(usize, CitationVerdict)> = stream::iter(citations.to_vec().into_iter().enumerate())
            .map(|(i, c)| async move { (i, self.verify(&c, jurisdiction, ctx).await) }.boxed())
            .buffer_unordered(self.concurrency)
            .collect()
            .await;
        verdicts.sort_by_key(|(i, _)| *i);
        verdicts.into_iter().map(|(_, v)| v).collect()
    }
}

// ── Annotation ───────────────────────────────────────────────────────────

fn already_tagged(rest: &str) -> bool {
    TAG_PREFIXES.iter().any(|p| rest.starts_with(p))
}

/// False when the match at `start..end` is only the front or back of a longer
/// citation, as `§ 1942` is of `§ 1942.5` or `Rule 12` of `Rule 12(b)`.
fn whole_citation(text: &str, start: usize, end: usize) -> bool {
    let before = text[..start].chars().next_back();
    if before.is_some_and(char::is_alphanumeric) {
        return false;
    }
    let mut after = text[end..].chars();
    match after.next() {
        None => true,
        Some(c) if c.is_alphanumeric() || c == '(' => false,
        Some('.') => !after.next().is_some_and(|c| c.is_ascii_digit()),
        Some(_) => true,
    }
}

/// Mark every untrusted citation in place. Citations are never removed, and
/// citations that already carry a tag are left alone. Longer citations claim
/// their text first, so a short citation never tags inside a longer one.
pub fn annotate(text: &str, verdicts: &[CitationVerdict]) -> String {
    let mut ordered: Vec<&CitationVerdict> = verdicts.iter().filter(|v| !v.citation.text.is_empty()).collect();
    ordered.sort_by_key(|v| std::cmp::Reverse(v.citation.text.len()));

    let mut claimed: Vec<(usize, usize)> = Vec::new();
    let mut inserts: Vec<(usize, String)> = Vec::new();
    for v in ordered {
        let needle = v.citation.text.as_str();
        let tag = v.flag.tag();
        for (start, _) in text.match_indices(needle) {
            let end = start + needle.len();
            if !whole_citation(text, start, end) || claimed.iter().any(|&(s, e)| start < e && s < end) {
                continue;
            }
            claimed.push((start, end));
            if let Some(tag) = &tag {
                if !already_tagged(&text[end..]) {
                    inserts.push((end, tag.clone()));
                }
            }
        }
    }
    inserts.sort_by_key(|(at, _)| *at);

    let mut out = String::with_capacity(text.len() + inserts.iter().map(|(_, t)| t.len() + 1).sum::<usize>());
    let mut last = 0;
    for (at, tag) in inserts {
        out.push_str(&text[last..at]);
        out.push(' ');
        out.push_str(&tag);
        last = at;
    }
    out.push_str(&text[last..]);
    out
}
