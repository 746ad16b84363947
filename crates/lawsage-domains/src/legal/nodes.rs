//! The legal workflow's nodes. Each one reads the merged state, makes at most a
//! few collaborator calls and returns a patch. None of them fails: when a call
//! does not work out the node writes a degraded default and records why.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use lawsage_core::authority::AuthorityIndex;
use lawsage_core::config::Config;
use lawsage_core::error::{classify_error, ErrorKind, GenerationError};
use lawsage_core::generation::{GenerationRequest, GenerationService, Parsed, Tool};
use lawsage_core::graph::Node;
use lawsage_core::hardener::{StructureCheck, StructuredMemo, DELIMITER};
use lawsage_core::retrieval::{HybridRetriever, ScoredDocument, SearchFilter};
use lawsage_core::state::{AgentState, Append, Overwrite, StatePatch};
use lawsage_core::types::{AuditEntry, FactLawMatrix, Role, Source};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use super::extractor::{pattern_citations, CitationExtractor, ExtractionMethod};
use super::procedural;
use super::prompts::*;
use super::verifier::{annotate, AuthorityVerifier, Flag, ReasoningContext, DEFAULT_CONFIDENCE_THRESHOLD};

pub const INTERROGATOR: &str = "interrogator";
pub const RESEARCHER: &str = "researcher";
pub const PROCEDURAL_GUIDE: &str = "procedural_guide";
pub const REASONER: &str = "reasoner";
pub const FACT_MATRIX: &str = "fact_matrix";
pub const DRAFTER: &str = "drafter";
pub const FORMATTER: &str = "formatter";
pub const VERIFIER: &str = "verifier";
pub const SANITY_CHECK: &str = "procedural_sanity_check";
pub const SENIOR_REVIEWER: &str = "senior_reviewer";

/// Labels of the generation calls the nodes make.
pub const COUNTER_RESEARCH_LABEL: &str = "counter_research";
pub const SENIOR_REVIEW_LABEL: &str = "senior_review";

const MAX_DISCOVERY_QUESTIONS: usize = 5;

// ── Shared collaborators ─────────────────────────────────────────────────

/// Read-mostly clients shared by every node and every request.
pub struct LegalServices {
    pub generator: Arc<dyn GenerationService>,
    pub authority: Arc<dyn AuthorityIndex>,
    pub retriever: Arc<HybridRetriever>,
    pub verify_concurrency: usize,
    pub confidence_threshold: f64,
}

impl LegalServices {
    pub fn new(
        generator: Arc<dyn GenerationService>,
        authority: Arc<dyn AuthorityIndex>,
        retriever: Arc<HybridRetriever>,
    ) -> Self {
        Self {
            generator,
            authority,
            retriever,
            verify_concurrency: 4,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
        }
    }

    pub fn from_config(
        config: &Config,
        generator: Arc<dyn GenerationService>,
        authority: Arc<dyn AuthorityIndex>,
        retriever: Arc<HybridRetriever>,
    ) -> Self {
        Self {
            verify_concurrency: config.verify_concurrency.max(1),
            confidence_threshold: config.confidence_threshold,
            ..Self::new(generator, authority, retriever)
        }
    }

    fn verifier(&self) -> AuthorityVerifier {
        AuthorityVerifier::new(self.generator.clone(), self.authority.clone())
            .with_threshold(self.confidence_threshold)
            .with_concurrency(self.verify_concurrency)
    }
}

// ── Prompt helpers ───────────────────────────────────────────────────────

fn system(node_prompt: &str) -> String {
    format!("{LEGAL_PERSONA}\n\n{node_prompt}")
}

fn string_list_schema() -> serde_json::Value {
    json!({"type": "array", "items": {"type": "string"}})
}

fn conversation(state: &AgentState) -> String {
    if state.chat_history.is_empty() {
        return "(none)".into();
    }
    state
        .chat_history
        .iter()
        .map(|m| match m.role {
            Role::User => format!("User: {}", m.content),
            Role::Assistant => format!("Assistant: {}", m.content),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Problems left by the previous pass, for nodes that run again after a loop-back.
fn open_issues(state: &AgentState) -> String {
    let mut out = String::new();
    let mut section = |title: &str, items: &[String]| {
        if items.is_empty() {
            return;
        }
        out.push_str(title);
        out.push_str(":\n");
        for item in items {
            out.push_str(&format!("- {item}\n"));
        }
    };
    section("Citations that could not be found", &state.unverified_citations);
    section("Citations no longer good law", &state.superseded_citations);
    section("Citations with low confidence", &state.low_confidence_citations);
    section("Authorities that do not support the argument", &state.reasoning_mismatches);
    section("Procedural violations", &state.procedural_violations);
    section("Logical fallacies", &state.fallacies_found);
    if let Some(feedback) = &state.senior_feedback {
        out.push_str(&format!("Senior review feedback:\n{feedback}\n"));
    }
    out
}

fn with_issues(prompt: String, state: &AgentState) -> String {
    let issues = open_issues(state);
    if issues.is_empty() {
        prompt
    } else {
        format!("{prompt}\n\nProblems found in the previous draft that must be fixed:\n{issues}")
    }
}

fn failure(node: &str, step: String, e: &GenerationError) -> StatePatch {
    warn!(node, "generation failed: {e}");
    StatePatch::thinking(step).degrade(node, classify_error(e).kind, e.to_string())
}

fn malformed(node: &str, step: String, detail: String) -> StatePatch {
    warn!(node, "structured output did not decode: {detail}");
    StatePatch::thinking(step).degrade(node, ErrorKind::ReliabilityDefect, detail)
}

/// Grounding sources not already recorded, deduplicated by URI, or by title when
/// there is no URI.
pub fn new_sources(existing: &[Source], found: Vec<Source>) -> Vec<Source> {
    fn key(s: &Source) -> String {
        match s.uri.as_deref().map(str::trim) {
            Some(u) if !u.is_empty() => u.to_string(),
            _ => s.title.trim().to_string(),
        }
    }
    let mut seen: HashSet<String> = existing.iter().map(key).collect();
    found
        .into_iter()
        .filter(|s| {
            let k = key(s);
            !k.is_empty() && seen.insert(k)
        })
        .collect()
}

fn render_documents(docs: &[ScoredDocument]) -> String {
    docs.iter()
        .map(|d| {
            let meta = &d.document.metadata;
            format!("[{}] ({})\n{}", meta.source_name, meta.source_type, d.document.text.trim())
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

// ── Interrogator ─────────────────────────────────────────────────────────

/// Asks for missing facts before any research is done.
pub struct Interrogator(pub Arc<LegalServices>);

#[async_trait]
impl Node for Interrogator {
    fn name(&self) -> &'static str {
        INTERROGATOR
    }

    async fn run(&self, state: &AgentState) -> StatePatch {
        let req = GenerationRequest::new(
            INTERROGATOR,
            format!(
                "Jurisdiction: {}\n\nProblem:\n{}\n\nConversation so far:\n{}",
                state.jurisdiction,
                state.user_input,
                conversation(state)
            ),
        )
        .system(system(INTERROGATOR_SYSTEM))
        .schema(string_list_schema());

        let resp = match self.0.generator.generate(&req).await {
            Ok(r) => r,
            Err(e) => return failure(INTERROGATOR, "Interrogator: skipped, proceeding to research".into(), &e),
        };
        match resp.parse::<Vec<String>>() {
            Parsed::Ok(raw) => {
                let questions: Vec<String> = raw
                    .into_iter()
                    .map(|q| q.trim().to_string())
                    .filter(|q| !q.is_empty())
                    .take(MAX_DISCOVERY_QUESTIONS)
                    .collect();
                let step = if questions.is_empty() {
                    "Interrogator: facts are sufficient".to_string()
                } else {
                    format!("Interrogator: {} clarifying questions for the user", questions.len())
                };
                StatePatch {
                    discovery_questions: Overwrite::set(questions),
                    ..StatePatch::thinking(step)
                }
            }
            Parsed::ParseError(e) => malformed(
                INTERROGATOR,
                "Interrogator: questions unreadable, proceeding to research".into(),
                e,
            ),
        }
    }
}

// ── Researcher ───────────────────────────────────────────────────────────

/// Hybrid retrieval over the local corpus, then a grounded search. After a
/// rejected review it also researches the opposing side.
pub struct Researcher(pub Arc<LegalServices>);

impl Researcher {
    async fn counter_research(&self, state: &AgentState, patch: &mut StatePatch) -> Option<String> {
        let req = GenerationRequest::new(
            COUNTER_RESEARCH_LABEL,
            format!(
                "Jurisdiction: {}\n\nPosition to attack:\n{}\n\nOpposing counsel's draft argument:\n{}",
                state.jurisdiction, state.final_output, state.shadow_brief
            ),
        )
        .system(system(COUNTER_RESEARCH_SYSTEM))
        .tool(Tool::GroundedSearch);

        match self.0.generator.generate(&req).await {
            Ok(resp) => {
                let text = resp.text_content()?.to_string();
                patch.grounding_audit_log.push(AuditEntry::new(
                    RESEARCHER,
                    format!("counter-grounding: {}", state.user_input),
                    &text,
                ));
                for s in new_sources(&state.sources, resp.citations_found) {
                    patch.sources.push(s);
                }
                patch
                    .thinking_steps
                    .push("Researcher: Counter-Grounding pass against the rejected draft".into());
                Some(text)
            }
            Err(e) => {
                warn!("counter research failed: {e}");
                patch.thinking_steps.push("Researcher: Counter-Grounding unavailable".into());
                None
            }
        }
    }
}

#[async_trait]
impl Node for Researcher {
    fn name(&self) -> &'static str {
        RESEARCHER
    }

    async fn run(&self, state: &AgentState) -> StatePatch {
        let mut patch = StatePatch::default();

        let filter = SearchFilter::new(&state.jurisdiction, state.case_id.as_deref());
        let retrieval = self.0.retriever.retrieve(&state.user_input, &filter).await;
        let grounding = render_documents(&retrieval.documents);
        patch.grounding_audit_log.push(AuditEntry::new(
            RESEARCHER,
            format!("hybrid retrieval: {}", state.user_input),
            &grounding,
        ));
        patch.thinking_steps.push(format!(
            "Researcher: {} local documents ({} lexical, {} vector hits)",
            retrieval.documents.len(),
            retrieval.lexical_hits,
            retrieval.vector_hits
        ));
        for f in &retrieval.failures {
            patch.thinking_steps.push(format!("Researcher: retrieval degraded ({f})"));
        }
        if !grounding.is_empty() {
            patch.grounding_data = Overwrite::set(grounding.clone());
        }
        let grounding = if grounding.is_empty() { state.grounding_data.clone() } else { grounding };

        let prompt = with_issues(
            format!(
                "Jurisdiction: {}\n\nProblem:\n{}\n\nConversation:\n{}\n\nLocal documents:\n{}",
                state.jurisdiction,
                state.user_input,
                conversation(state),
                if grounding.is_empty() { "(none)" } else { grounding.as_str() }
            ),
            state,
        );
        let req = GenerationRequest::new(RESEARCHER, prompt)
            .system(system(RESEARCHER_SYSTEM))
            .tool(Tool::GroundedSearch);

        let mut research = match self.0.generator.generate(&req).await {
            Ok(resp) => match resp.text_content().map(str::to_string) {
                Some(text) => {
                    patch.grounding_audit_log.push(AuditEntry::new(
                        RESEARCHER,
                        format!("grounded search: {}", state.user_input),
                        &text,
                    ));
                    let found = new_sources(&state.sources, resp.citations_found);
                    patch
                        .thinking_steps
                        .push(format!("Researcher: grounded search returned {} new sources", found.len()));
                    for s in found {
                        patch.sources.push(s);
                    }
                    text
                }
                None => {
                    patch = patch.degrade(RESEARCHER, ErrorKind::GenerationFailure, "grounded search returned no text");
                    String::new()
                }
            },
            Err(e) => {
                warn!("grounded search failed: {e}");
                patch.thinking_steps.push("Researcher: grounded search unavailable".into());
                patch = patch.degrade(RESEARCHER, classify_error(&e).kind, e.to_string());
                String::new()
            }
        };

        // A rejection is acted on once; a later loop from the sanity check
        // finds it cleared.
        if state.is_approved == Some(false) {
            patch.is_approved = Overwrite::set(None);
            if let Some(counter) = self.counter_research(state, &mut patch).await {
                research = format!("{research}\n\nCounter-Grounding:\n{counter}").trim().to_string();
            }
        }

        if research.is_empty() {
            research = if state.research_results.is_empty() {
                grounding
            } else {
                state.research_results.clone()
            };
        }
        info!(sources = patch.sources.items().len(), "research complete");
        StatePatch {
            research_results: Overwrite::set(research),
            ..patch
        }
    }
}

// ── Procedural guide ─────────────────────────────────────────────────────

/// Deterministic lookup of court rules, deadlines and county local rules.
pub struct ProceduralGuide;

#[async_trait]
impl Node for ProceduralGuide {
    fn name(&self) -> &'static str {
        PROCEDURAL_GUIDE
    }

    async fn run(&self, state: &AgentState) -> StatePatch {
        let mut guide = procedural::procedural_guide(&state.jurisdiction);
        guide.push_str("\nChecklist:\n");
        for item in procedural::checklist(&state.jurisdiction) {
            guide.push_str(&format!("- [ ] {item}\n"));
        }
        let county = procedural::county_mentioned(&state.user_input);
        if let Some(county) = county {
            guide.push('\n');
            guide.push_str(&procedural::format_local_rules(county));
        }
        let step = match (procedural::match_jurisdiction(&state.jurisdiction), county) {
            (Some((name, _)), Some(county)) => format!("Procedural Guide: rules for {name} and {county}"),
            (Some((name, _)), None) => format!("Procedural Guide: rules for {name}"),
            (None, _) => "Procedural Guide: no local rules on file, generic checklist".to_string(),
        };
        StatePatch {
            procedural_checklist: Overwrite::set(guide),
            ..StatePatch::thinking(step)
        }
    }
}

// ── Reasoner ─────────────────────────────────────────────────────────────

pub struct Reasoner(pub Arc<LegalServices>);

#[async_trait]
impl Node for Reasoner {
    fn name(&self) -> &'static str {
        REASONER
    }

    async fn run(&self, state: &AgentState) -> StatePatch {
        let prompt = with_issues(
            format!(
                "Jurisdiction: {}\n\nProblem:\n{}\n\nResearch:\n{}\n\nProcedural rules:\n{}",
                state.jurisdiction, state.user_input, state.research_results, state.procedural_checklist
            ),
            state,
        );
        let req = GenerationRequest::new(REASONER, prompt).system(system(REASONER_SYSTEM));
        match self.0.generator.generate(&req).await {
            Ok(resp) => match resp.text_content() {
                Some(strategy) => StatePatch {
                    strategy: Overwrite::set(strategy.to_string()),
                    ..StatePatch::thinking("Reasoner: strategy drafted")
                },
                None => StatePatch::thinking("Reasoner: empty strategy, keeping previous").degrade(
                    REASONER,
                    ErrorKind::GenerationFailure,
                    "model returned no content",
                ),
            },
            Err(e) => failure(REASONER, "Reasoner: strategy unavailable, keeping previous".into(), &e),
        }
    }
}

// ── Fact-law matrix ──────────────────────────────────────────────────────

pub struct FactMatrix(pub Arc<LegalServices>);

fn matrix_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "elements": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "element": {"type": "string"},
                        "facts": {"type": "array", "items": {"type": "string"}},
                        "authority": {"type": "string"}
                    },
                    "required": ["element", "facts", "authority"]
                }
            },
            "summary": {"type": "string"}
        },
        "required": ["elements", "summary"]
    })
}

#[async_trait]
impl Node for FactMatrix {
    fn name(&self) -> &'static str {
        FACT_MATRIX
    }

    async fn run(&self, state: &AgentState) -> StatePatch {
        let req = GenerationRequest::new(
            FACT_MATRIX,
            format!(
                "Facts from the user:\n{}\n\nConversation:\n{}\n\nStrategy:\n{}\n\nResearch:\n{}",
                state.user_input,
                conversation(state),
                state.strategy,
                state.research_results
            ),
        )
        .system(system(FACT_MATRIX_SYSTEM))
        .schema(matrix_schema());

        match self.0.generator.generate(&req).await {
            Ok(resp) => match resp.parse::<FactLawMatrix>() {
                Parsed::Ok(matrix) => {
                    let step = format!("Fact Matrix: {} elements mapped", matrix.elements.len());
                    StatePatch {
                        fact_law_matrix: Overwrite::set(matrix),
                        ..StatePatch::thinking(step)
                    }
                }
                Parsed::ParseError(e) => malformed(FACT_MATRIX, "Fact Matrix: output unreadable".into(), e),
            },
            Err(e) => failure(FACT_MATRIX, "Fact Matrix: unavailable".into(), &e),
        }
    }
}

// ── Drafter ──────────────────────────────────────────────────────────────

pub struct Drafter(pub Arc<LegalServices>);

#[async_trait]
impl Node for Drafter {
    fn name(&self) -> &'static str {
        DRAFTER
    }

    async fn run(&self, state: &AgentState) -> StatePatch {
        let matrix = serde_json::to_string_pretty(&state.fact_law_matrix).unwrap_or_default();
        let req = GenerationRequest::new(
            DRAFTER,
            with_issues(
                format!(
                    "Jurisdiction: {}\n\nStrategy:\n{}\n\nFact-law matrix:\n{}\n\nProcedural rules:\n{}",
                    state.jurisdiction, state.strategy, matrix, state.procedural_checklist
                ),
                state,
            ),
        )
        .system(system(DRAFTER_SYSTEM));

        match self.0.generator.generate(&req).await {
            Ok(resp) => match resp.text_content() {
                Some(draft) => StatePatch {
                    draft: Overwrite::set(draft.to_string()),
                    ..StatePatch::thinking("Drafter: filing drafted")
                },
                None => StatePatch::thinking("Drafter: empty draft").degrade(
                    DRAFTER,
                    ErrorKind::GenerationFailure,
                    "model returned no content",
                ),
            },
            Err(e) => failure(DRAFTER, "Drafter: draft unavailable".into(), &e),
        }
    }
}

// ── Formatter ────────────────────────────────────────────────────────────

/// Structured memo when the output decodes; otherwise the raw text, or a plain
/// assembly of strategy and draft, checked with text patterns.
pub struct Formatter(pub Arc<LegalServices>);

fn assemble(strategy: &str, draft: &str) -> String {
    format!("{}\n\n{DELIMITER}\n\n{}", strategy.trim(), draft.trim())
}

fn text_check(text: &str) -> StructureCheck {
    StructureCheck::text(text, pattern_citations(text).len())
}

#[async_trait]
impl Node for Formatter {
    fn name(&self) -> &'static str {
        FORMATTER
    }

    async fn run(&self, state: &AgentState) -> StatePatch {
        let req = GenerationRequest::new(
            FORMATTER,
            format!(
                "Jurisdiction: {}\n\nStrategy:\n{}\n\nDraft filing:\n{}\n\nProcedural rules:\n{}",
                state.jurisdiction, state.strategy, state.draft, state.procedural_checklist
            ),
        )
        .system(system(FORMATTER_SYSTEM))
        .schema(StructuredMemo::schema());

        let (text, check, mut patch) = match self.0.generator.generate(&req).await {
            Ok(resp) => match resp.parse::<StructuredMemo>() {
                Parsed::Ok(memo) => (memo.render(), StructureCheck::parsed(&memo), StatePatch::thinking("Formatter: structured memo")),
                Parsed::ParseError(e) => {
                    let text = resp
                        .text_content()
                        .map(str::to_string)
                        .unwrap_or_else(|| assemble(&state.strategy, &state.draft));
                    let check = text_check(&text);
                    (text, check, malformed(FORMATTER, "Formatter: memo not structured, using text checks".into(), e))
                }
            },
            Err(e) => {
                let text = assemble(&state.strategy, &state.draft);
                let check = text_check(&text);
                (text, check, failure(FORMATTER, "Formatter: assembled strategy and draft".into(), &e))
            }
        };

        let missing = check.missing();
        if !missing.is_empty() {
            patch.thinking_steps.push(format!("Formatter: missing {}", missing.join(", ")));
        }
        StatePatch {
            final_output: Overwrite::set(text),
            structure_check: Overwrite::set(Some(check)),
            ..patch
        }
    }
}

// ── Verifier ─────────────────────────────────────────────────────────────

/// Extracts the citations in the final output, verifies them, and tags the
/// untrusted ones in place.
pub struct Verifier(pub Arc<LegalServices>);

#[async_trait]
impl Node for Verifier {
    fn name(&self) -> &'static str {
        VERIFIER
    }

    async fn run(&self, state: &AgentState) -> StatePatch {
        let mut patch = StatePatch::default();

        let extraction = CitationExtractor::new(self.0.generator.clone())
            .extract(&state.final_output)
            .await;
        if extraction.method == ExtractionMethod::Pattern {
            patch.thinking_steps.push("Verifier: citation extraction fell back to patterns".into());
            if let Some(reason) = &extraction.fallback_reason {
                patch = patch.degrade(VERIFIER, ErrorKind::GenerationFailure, reason.clone());
            }
        }

        let ctx = ReasoningContext {
            source_context: &state.research_results,
            argument_text: &state.final_output,
        };
        let verdicts = self
            .0
            .verifier()
            .verify_all(&extraction.citations, &state.jurisdiction, ctx)
            .await;

        let mut unverified = Vec::new();
        let mut superseded = Vec::new();
        let mut low_confidence = Vec::new();
        let mut pending = Vec::new();
        let mut unchecked = Vec::new();
        let mut mismatches = Vec::new();
        for v in &verdicts {
            let text = v.citation.text.clone();
            match &v.flag {
                Flag::Trusted => {}
                Flag::Unverified => unverified.push(text),
                Flag::Superseded(_) => superseded.push(match &v.result.explanation {
                    Some(e) => format!("{text} ({}): {e}", v.result.status),
                    None => format!("{text} ({})", v.result.status),
                }),
                Flag::LowConfidence(score) => low_confidence.push(format!("{text} ({score:.2})")),
                Flag::Pending => pending.push(text),
            }
            if let Some(m) = &v.reasoning_mismatch {
                mismatches.push(m.clone());
            }
            if let Some(why) = &v.unchecked {
                unchecked.push(format!("{}: {why}", v.citation.text));
            }
        }

        info!(
            citations = verdicts.len(),
            unverified = unverified.len(),
            superseded = superseded.len(),
            low_confidence = low_confidence.len(),
            pending = pending.len(),
            unchecked = unchecked.len(),
            "citations verified"
        );
        patch.thinking_steps.push(format!(
            "Verifier: {} citations checked, {} unverified, {} superseded, {} low confidence, {} pending manual verification",
            verdicts.len(),
            unverified.len(),
            superseded.len(),
            low_confidence.len(),
            pending.len()
        ));
        if !pending.is_empty() {
            patch = patch.degrade(
                VERIFIER,
                ErrorKind::VerificationUncertainty,
                format!("{} citations pending manual verification", pending.len()),
            );
        }
        if !unchecked.is_empty() {
            patch = patch.degrade(
                VERIFIER,
                ErrorKind::VerificationUncertainty,
                format!("{} citations not fully checked: {}", unchecked.len(), unchecked.join(" | ")),
            );
        }

        let annotated = annotate(&state.final_output, &verdicts);
        StatePatch {
            final_output: Overwrite::set(annotated),
            unverified_citations: Overwrite::set(unverified),
            superseded_citations: Overwrite::set(superseded),
            low_confidence_citations: Overwrite::set(low_confidence),
            pending_citations: Overwrite::set(pending),
            unchecked_citations: Overwrite::set(unchecked),
            reasoning_mismatches: Overwrite::set(mismatches),
            citations: Append::many(verdicts.iter().map(|v| v.citation.clone())),
            grounding_audit_log: Append::many(verdicts.iter().flat_map(|v| v.audit.iter().cloned())),
            ..patch
        }
    }
}

// ── Procedural sanity check ──────────────────────────────────────────────

pub struct ProceduralSanityCheck(pub Arc<LegalServices>);

#[async_trait]
impl Node for ProceduralSanityCheck {
    fn name(&self) -> &'static str {
        SANITY_CHECK
    }

    async fn run(&self, state: &AgentState) -> StatePatch {
        let req = GenerationRequest::new(
            SANITY_CHECK,
            format!(
                "Jurisdiction: {}\n\nProcedural rules:\n{}\n\nMemo:\n{}",
                state.jurisdiction, state.procedural_checklist, state.final_output
            ),
        )
        .system(system(SANITY_CHECK_SYSTEM))
        .schema(string_list_schema());

        // A check that cannot run reports nothing, so it never forces a loop-back.
        let cleared = |step: &str| StatePatch {
            procedural_violations: Overwrite::set(Vec::new()),
            ..StatePatch::thinking(step)
        };
        match self.0.generator.generate(&req).await {
            Ok(resp) => match resp.parse::<Vec<String>>() {
                Parsed::Ok(raw) => {
                    let violations: Vec<String> =
                        raw.into_iter().map(|v| v.trim().to_string()).filter(|v| !v.is_empty()).collect();
                    let step = format!("Procedural Sanity Check: {} violations", violations.len());
                    StatePatch {
                        procedural_violations: Overwrite::set(violations),
                        ..StatePatch::thinking(step)
                    }
                }
                Parsed::ParseError(e) => cleared("Procedural Sanity Check: output unreadable").degrade(
                    SANITY_CHECK,
                    ErrorKind::ReliabilityDefect,
                    e,
                ),
            },
            Err(e) => cleared("Procedural Sanity Check: unavailable").degrade(
                SANITY_CHECK,
                classify_error(&e).kind,
                e.to_string(),
            ),
        }
    }
}

// ── Senior reviewer ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct SeniorReview {
    pub is_approved: bool,
    #[serde(default)]
    pub fallacies_found: Vec<String>,
    #[serde(default)]
    pub missing_rebuttals: Vec<String>,
    #[serde(default)]
    pub shadow_brief: String,
    #[serde(default)]
    pub feedback: String,
}

impl SeniorReview {
    fn schema() -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "is_approved": {"type": "boolean"},
                "fallacies_found": {"type": "array", "items": {"type": "string"}},
                "missing_rebuttals": {"type": "array", "items": {"type": "string"}},
                "shadow_brief": {"type": "string"},
                "feedback": {"type": "string"}
            },
            "required": ["is_approved", "fallacies_found", "missing_rebuttals", "shadow_brief", "feedback"]
        })
    }

    /// Reviewer feedback with any missing rebuttals spelled out.
    pub fn combined_feedback(&self) -> Option<String> {
        let mut feedback = self.feedback.trim().to_string();
        if !self.missing_rebuttals.is_empty() {
            if !feedback.is_empty() {
                feedback.push_str("\n\n");
            }
            feedback.push_str("MISSING REBUTTALS: ");
            feedback.push_str(&self.missing_rebuttals.join("; "));
        }
        Some(feedback).filter(|f| !f.is_empty())
    }
}

/// Red-team pass: argues against the memo and decides whether it ships.
pub struct SeniorReviewer(pub Arc<LegalServices>);

#[async_trait]
impl Node for SeniorReviewer {
    fn name(&self) -> &'static str {
        SENIOR_REVIEWER
    }

    async fn run(&self, state: &AgentState) -> StatePatch {
        let req = GenerationRequest::new(
            SENIOR_REVIEW_LABEL,
            format!(
                "Jurisdiction: {}\n\nClient's problem:\n{}\n\nStrategy:\n{}\n\nMemo:\n{}",
                state.jurisdiction, state.user_input, state.strategy, state.final_output
            ),
        )
        .system(system(SENIOR_REVIEW_SYSTEM))
        .schema(SeniorReview::schema());

        // Without a review there is no approval to report either way.
        let unreviewed = |step: &str| StatePatch {
            is_approved: Overwrite::set(None),
            ..StatePatch::thinking(step)
        };
        let review = match self.0.generator.generate(&req).await {
            Ok(resp) => match resp.parse::<SeniorReview>() {
                Parsed::Ok(r) => r,
                Parsed::ParseError(e) => {
                    return unreviewed("Senior Review: output unreadable").degrade(
                        SENIOR_REVIEWER,
                        ErrorKind::ReliabilityDefect,
                        e,
                    )
                }
            },
            Err(e) => {
                return unreviewed("Senior Review: unavailable").degrade(
                    SENIOR_REVIEWER,
                    classify_error(&e).kind,
                    e.to_string(),
                )
            }
        };

        let step = if review.is_approved {
            "Senior Review: approved".to_string()
        } else {
            format!(
                "Senior Review: rejected ({} fallacies, {} missing rebuttals)",
                review.fallacies_found.len(),
                review.missing_rebuttals.len()
            )
        };
        info!(approved = review.is_approved, "senior review");
        StatePatch {
            is_approved: Overwrite::set(Some(review.is_approved)),
            senior_feedback: Overwrite::set(review.combined_feedback()),
            fallacies_found: Overwrite::set(review.fallacies_found),
            missing_rebuttals: Overwrite::set(review.missing_rebuttals),
            shadow_brief: Overwrite::set(review.shadow_brief),
            ..StatePatch::thinking(step)
        }
    }
}
