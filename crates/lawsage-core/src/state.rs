//! The per-request state record and its field reducers.
//!
//! Every field a node may write is declared in [`StatePatch`] with the reducer that
//! merges it: [`Overwrite`] (latest writer wins) or [`Append`] (accumulate). The
//! reducer is fixed by the field's type, and [`AgentState::apply`] destructures the
//! patch exhaustively, so adding a patch field without merging it does not compile.

use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;
use crate::hardener::StructureCheck;
use crate::types::{AuditEntry, ChatMessage, Citation, FactLawMatrix, Source};

/// Loop-back ceiling, counted in node executions.
pub const DEFAULT_STEP_CEILING: u32 = 20;

// ── Reducers ─────────────────────────────────────────────────────────────

/// Two-argument merge: the current value and this update produce the new value.
pub trait Reduce<T> {
    fn reduce(self, current: &mut T);
}

/// Latest writer wins. An unset `Overwrite` leaves the field untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct Overwrite<T>(Option<T>);

impl<T> Overwrite<T> {
    pub fn set(value: T) -> Self {
        Self(Some(value))
    }

    pub fn keep() -> Self {
        Self(None)
    }

    pub fn is_set(&self) -> bool {
        self.0.is_some()
    }

    pub fn value(&self) -> Option<&T> {
        self.0.as_ref()
    }
}

impl<T> Default for Overwrite<T> {
    fn default() -> Self {
        Self(None)
    }
}

impl<T> Reduce<T> for Overwrite<T> {
    fn reduce(self, current: &mut T) {
        if let Some(v) = self.0 {
            *current = v;
        }
    }
}

/// Merged by append. Accumulated fields never shrink.
#[derive(Debug, Clone, PartialEq)]
pub struct Append<T>(Vec<T>);

impl<T> Append<T> {
    pub fn one(item: T) -> Self {
        Self(vec![item])
    }

    pub fn many(items: impl IntoIterator<Item = T>) -> Self {
        Self(items.into_iter().collect())
    }

    pub fn items(&self) -> &[T] {
        &self.0
    }

    pub fn push(&mut self, item: T) {
        self.0.push(item);
    }
}

impl<T> Default for Append<T> {
    fn default() -> Self {
        Self(Vec::new())
    }
}

impl<T> Reduce<Vec<T>> for Append<T> {
    fn reduce(self, current: &mut Vec<T>) {
        current.extend(self.0);
    }
}

// ── Degradation record ───────────────────────────────────────────────────

/// A node that could not complete and wrote a degraded default instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Degradation {
    pub node: String,
    pub kind: ErrorKind,
    pub detail: String,
}

// ── AgentState ───────────────────────────────────────────────────────────

/// One record threaded through a single invocation.
///
/// `user_input`, `jurisdiction`, `case_id` and `step_ceiling` are fixed at creation.
/// `step_count` is owned by the engine. Everything else is written through patches.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentState {
    pub user_input: String,
    pub jurisdiction: String,
    pub case_id: Option<String>,
    pub step_count: u32,
    pub step_ceiling: u32,

    // Overwrite fields
    pub discovery_questions: Vec<String>,
    pub grounding_data: String,
    pub research_results: String,
    pub procedural_checklist: String,
    pub strategy: String,
    pub fact_law_matrix: FactLawMatrix,
    pub draft: String,
    pub final_output: String,
    /// Set by the formatter; `None` until it runs.
    pub structure_check: Option<StructureCheck>,
    pub unverified_citations: Vec<String>,
    pub superseded_citations: Vec<String>,
    pub low_confidence_citations: Vec<String>,
    pub pending_citations: Vec<String>,
    /// Citations that passed but whose treatment or reasoning check could not run.
    pub unchecked_citations: Vec<String>,
    pub reasoning_mismatches: Vec<String>,
    pub procedural_violations: Vec<String>,
    pub fallacies_found: Vec<String>,
    pub missing_rebuttals: Vec<String>,
    pub senior_feedback: Option<String>,
    pub shadow_brief: String,
    /// `None` until the senior reviewer has judged the current draft. The
    /// researcher clears a rejection once it has acted on it.
    pub is_approved: Option<bool>,

    // Accumulator fields
    pub chat_history: Vec<ChatMessage>,
    pub thinking_steps: Vec<String>,
    pub grounding_audit_log: Vec<AuditEntry>,
    pub sources: Vec<Source>,
    pub citations: Vec<Citation>,
    pub degraded: Vec<Degradation>,
}

impl AgentState {
    pub fn new(
        user_input: impl Into<String>,
        jurisdiction: impl Into<String>,
        case_id: Option<String>,
        chat_history: Vec<ChatMessage>,
    ) -> Self {
        Self {
            user_input: user_input.into(),
            jurisdiction: jurisdiction.into(),
            case_id,
            chat_history,
            step_ceiling: DEFAULT_STEP_CEILING,
            ..Default::default()
        }
    }

    pub fn with_step_ceiling(mut self, ceiling: u32) -> Self {
        self.step_ceiling = ceiling;
        self
    }

    /// Merge a node's patch using each field's reducer.
    pub fn apply(&mut self, patch: StatePatch) {
        let StatePatch {
            discovery_questions,
            grounding_data,
            research_results,
            procedural_checklist,
            strategy,
            fact_law_matrix,
            draft,
            final_output,
            structure_check,
            unverified_citations,
            superseded_citations,
            low_confidence_citations,
            pending_citations,
            unchecked_citations,
            reasoning_mismatches,
            procedural_violations,
            fallacies_found,
            missing_rebuttals,
            senior_feedback,
            shadow_brief,
            is_approved,
            chat_history,
            thinking_steps,
            grounding_audit_log,
            sources,
            citations,
            degraded,
        } = patch;

        discovery_questions.reduce(&mut self.discovery_questions);
        grounding_data.reduce(&mut self.grounding_data);
        research_results.reduce(&mut self.research_results);
        procedural_checklist.reduce(&mut self.procedural_checklist);
        strategy.reduce(&mut self.strategy);
        fact_law_matrix.reduce(&mut self.fact_law_matrix);
        draft.reduce(&mut self.draft);
        final_output.reduce(&mut self.final_output);
        structure_check.reduce(&mut self.structure_check);
        unverified_citations.reduce(&mut self.unverified_citations);
        superseded_citations.reduce(&mut self.superseded_citations);
        low_confidence_citations.reduce(&mut self.low_confidence_citations);
        pending_citations.reduce(&mut self.pending_citations);
        unchecked_citations.reduce(&mut self.unchecked_citations);
        reasoning_mismatches.reduce(&mut self.reasoning_mismatches);
        procedural_violations.reduce(&mut self.procedural_violations);
        fallacies_found.reduce(&mut self.fallacies_found);
        missing_rebuttals.reduce(&mut self.missing_rebuttals);
        senior_feedback.reduce(&mut self.senior_feedback);
        shadow_brief.reduce(&mut self.shadow_brief);
        is_approved.reduce(&mut self.is_approved);

        chat_history.reduce(&mut self.chat_history);
        thinking_steps.reduce(&mut self.thinking_steps);
        grounding_audit_log.reduce(&mut self.grounding_audit_log);
        sources.reduce(&mut self.sources);
        citations.reduce(&mut self.citations);
        degraded.reduce(&mut self.degraded);
    }

    /// Citation or procedural problems that another research pass could fix.
    /// Pending (unreachable index) citations are not counted.
    pub fn has_unresolved_issues(&self) -> bool {
        !self.unverified_citations.is_empty()
            || !self.superseded_citations.is_empty()
            || !self.low_confidence_citations.is_empty()
            || !self.reasoning_mismatches.is_empty()
            || !self.procedural_violations.is_empty()
    }

    pub fn under_step_ceiling(&self) -> bool {
        self.step_count < self.step_ceiling
    }
}

// ── StatePatch ───────────────────────────────────────────────────────────

/// What a node returns. Unset fields leave the state untouched.
#[derive(Debug, Clone, Default)]
pub struct StatePatch {
    pub discovery_questions: Overwrite<Vec<String>>,
    pub grounding_data: Overwrite<String>,
    pub research_results: Overwrite<String>,
    pub procedural_checklist: Overwrite<String>,
    pub strategy: Overwrite<String>,
    pub fact_law_matrix: Overwrite<FactLawMatrix>,
    pub draft: Overwrite<String>,
    pub final_output: Overwrite<String>,
    pub structure_check: Overwrite<Option<StructureCheck>>,
    pub unverified_citations: Overwrite<Vec<String>>,
    pub superseded_citations: Overwrite<Vec<String>>,
    pub low_confidence_citations: Overwrite<Vec<String>>,
    pub pending_citations: Overwrite<Vec<String>>,
    pub unchecked_citations: Overwrite<Vec<String>>,
    pub reasoning_mismatches: Overwrite<Vec<String>>,
    pub procedural_violations: Overwrite<Vec<String>>,
    pub fallacies_found: Overwrite<Vec<String>>,
    pub missing_rebuttals: Overwrite<Vec<String>>,
    pub senior_feedback: Overwrite<Option<String>>,
    pub shadow_brief: Overwrite<String>,
    pub is_approved: Overwrite<Option<bool>>,

    pub chat_history: Append<ChatMessage>,
    pub thinking_steps: Append<String>,
    pub grounding_audit_log: Append<AuditEntry>,
    pub sources: Append<Source>,
    pub citations: Append<Citation>,
    pub degraded: Append<Degradation>,
}

impl StatePatch {
    /// A patch that only records a thinking step.
    pub fn thinking(step: impl Into<String>) -> Self {
        Self {
            thinking_steps: Append::one(step.into()),
            ..Default::default()
        }
    }

    /// Record that `node` fell back to a degraded default.
    pub fn degrade(mut self, node: &str, kind: ErrorKind, detail: impl Into<String>) -> Self {
        self.degraded.push(Degradation {
            node: node.to_string(),
            kind,
            detail: detail.into(),
        });
        self
    }
}
