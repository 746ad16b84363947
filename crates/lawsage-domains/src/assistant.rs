//! Caller-facing entry point: safety audit, workflow run, report and hardening.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use lawsage_core::error::{EngineError, ErrorKind};
use lawsage_core::graph::{Graph, RunOptions, WorkflowEvent};
use lawsage_core::hardener::{harden, DISCLAIMER};
use lawsage_core::safety::{red_team_audit, validate_grounding, SafetyViolation};
use lawsage_core::state::{AgentState, Degradation, DEFAULT_STEP_CEILING};
use lawsage_core::types::{AuditEntry, ChatMessage, FactLawMatrix, Source};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::legal::legal_workflow;
use crate::legal::nodes::LegalServices;

/// What could and could not be confirmed. Built on every path that reaches the
/// workflow, including timeouts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VerificationReport {
    pub unverified_citations: Vec<String>,
    pub superseded_citations: Vec<String>,
    pub low_confidence_citations: Vec<String>,
    pub pending_citations: Vec<String>,
    /// Citations kept as trusted although their treatment history or
    /// reasoning could not be checked, with what was missed.
    pub unchecked_citations: Vec<String>,
    pub reasoning_mismatches: Vec<String>,
    pub procedural_violations: Vec<String>,
    pub fallacies_found: Vec<String>,
    pub missing_rebuttals: Vec<String>,
    pub senior_feedback: Option<String>,
    /// `None` when the senior review never judged the final draft or could not decide.
    pub is_approved: Option<bool>,
    pub shadow_brief: String,
    pub grounding_satisfied: bool,
    pub structure_ok: bool,
    /// Required memo parts the formatter could not produce.
    pub structure_missing: Vec<String>,
    pub degraded_nodes: Vec<Degradation>,
}

impl VerificationReport {
    pub fn from_state(state: &AgentState, final_text: &str) -> Self {
        Self {
            unverified_citations: state.unverified_citations.clone(),
            superseded_citations: state.superseded_citations.clone(),
            low_confidence_citations: state.low_confidence_citations.clone(),
            pending_citations: state.pending_citations.clone(),
            unchecked_citations: state.unchecked_citations.clone(),
            reasoning_mismatches: state.reasoning_mismatches.clone(),
            procedural_violations: state.procedural_violations.clone(),
            fallacies_found: state.fallacies_found.clone(),
            missing_rebuttals: state.missing_rebuttals.clone(),
            senior_feedback: state.senior_feedback.clone(),
            is_approved: state.is_approved,
            shadow_brief: state.shadow_brief.clone(),
            grounding_satisfied: validate_grounding(final_text, &state.sources),
            structure_ok: state.structure_check.is_some_and(|c| c.passed()),
            structure_missing: state.structure_check.map(|c| c.missing()).unwrap_or_default(),
            degraded_nodes: state.degraded.clone(),
        }
    }

    /// True when nothing needs a human to look at it.
    pub fn is_clean(&self) -> bool {
        self.unverified_citations.is_empty()
            && self.superseded_citations.is_empty()
            && self.low_confidence_citations.is_empty()
            && self.pending_citations.is_empty()
            && self.unchecked_citations.is_empty()
            && self.reasoning_mismatches.is_empty()
            && self.procedural_violations.is_empty()
            && self.is_approved == Some(true)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegalResponse {
    pub text: String,
    pub sources: Vec<Source>,
    pub verification_report: VerificationReport,
    pub thinking_steps: Vec<String>,
    /// Non-empty when the run stopped to ask the user for missing facts.
    pub discovery_questions: Vec<String>,
    pub fact_law_matrix: FactLawMatrix,
    pub audit_log: Vec<AuditEntry>,
    pub steps_taken: u32,
}

impl LegalResponse {
    /// Assemble the response from a finished (or interrupted) run.
    pub fn from_state(state: AgentState) -> Self {
        let text = if state.discovery_questions.is_empty() {
            harden(&state.final_output)
        } else {
            discovery_text(&state.discovery_questions)
        };
        let verification_report = VerificationReport::from_state(&state, &text);
        Self {
            text,
            verification_report,
            sources: state.sources,
            thinking_steps: state.thinking_steps,
            discovery_questions: state.discovery_questions,
            fact_law_matrix: state.fact_law_matrix,
            audit_log: state.grounding_audit_log,
            steps_taken: state.step_count,
        }
    }
}

fn discovery_text(questions: &[String]) -> String {
    let mut out = format!("{DISCLAIMER}\n\nBefore I can research this, please answer:\n");
    for (i, q) in questions.iter().enumerate() {
        out.push_str(&format!("{}. {q}\n", i + 1));
    }
    out.trim_end().to_string()
}

#[derive(Debug, Error)]
pub enum LegalError {
    #[error("request rejected: {0}")]
    SafetyRejection(#[from] SafetyViolation),

    #[error("generation failed: {0}")]
    GenerationFailure(String),

    #[error("deadline exceeded; a partial response is attached")]
    Timeout { partial: Box<LegalResponse> },

    #[error("workflow stopped: {error}")]
    Workflow {
        error: EngineError,
        partial: Box<LegalResponse>,
    },
}

impl LegalError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::SafetyRejection(_) => ErrorKind::SafetyRejection,
            Self::GenerationFailure(_) => ErrorKind::GenerationFailure,
            Self::Timeout { .. } | Self::Workflow { .. } => ErrorKind::ReliabilityDefect,
        }
    }

    /// Best-effort response carried by the error, if any.
    pub fn partial(&self) -> Option<&LegalResponse> {
        match self {
            Self::Timeout { partial } | Self::Workflow { partial, .. } => Some(partial.as_ref()),
            _ => None,
        }
    }
}

/// Nothing usable came out of generation: no strategy, no draft and at least
/// one node reported a generation failure.
fn generation_failed(state: &AgentState) -> Option<&Degradation> {
    if !state.strategy.trim().is_empty() || !state.draft.trim().is_empty() {
        return None;
    }
    state.degraded.iter().find(|d| {
        matches!(
            d.kind,
            ErrorKind::GenerationFailure | ErrorKind::TransientGenerationFailure
        )
    })
}

// ── LegalAssistant ───────────────────────────────────────────────────────

/// The compiled legal workflow plus per-request limits. Shared across requests.
pub struct LegalAssistant {
    graph: Graph,
    step_ceiling: u32,
    deadline: Option<Duration>,
    events: Option<broadcast::Sender<WorkflowEvent>>,
}

impl LegalAssistant {
    pub fn new(services: Arc<LegalServices>) -> Result<Self> {
        let graph = legal_workflow(services)?;
        debug!(entry = graph.entry(), nodes = ?graph.node_names(), "legal workflow compiled");
        Ok(Self {
            graph,
            step_ceiling: DEFAULT_STEP_CEILING,
            deadline: None,
            events: None,
        })
    }

    pub fn with_step_ceiling(mut self, ceiling: u32) -> Self {
        self.step_ceiling = ceiling;
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_events(mut self, tx: broadcast::Sender<WorkflowEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub async fn invoke(
        &self,
        user_input: &str,
        jurisdiction: &str,
        case_id: Option<&str>,
        chat_history: Vec<ChatMessage>,
    ) -> Result<LegalResponse, LegalError> {
        if let Err(violation) = red_team_audit(user_input, jurisdiction) {
            warn!(jurisdiction, "safety audit rejected request: {violation}");
            return Err(violation.into());
        }

        let initial = AgentState::new(user_input, jurisdiction.trim(), case_id.map(String::from), chat_history)
            .with_step_ceiling(self.step_ceiling);
        let opts = RunOptions {
            deadline: self.deadline,
            events: self.events.clone(),
        };
        let outcome = self.graph.run(initial, &opts).await;

        // An interrupted run always hands back what it has, report included.
        if let Some(error) = outcome.error {
            let response = LegalResponse::from_state(outcome.state);
            warn!(steps = response.steps_taken, "workflow stopped early: {error}");
            return Err(match error {
                EngineError::DeadlineExceeded { .. } => LegalError::Timeout {
                    partial: Box::new(response),
                },
                error => LegalError::Workflow {
                    error,
                    partial: Box::new(response),
                },
            });
        }

        if let Some(d) = generation_failed(&outcome.state) {
            if outcome.state.discovery_questions.is_empty() {
                return Err(LegalError::GenerationFailure(format!("{}: {}", d.node, d.detail)));
            }
        }

        let response = LegalResponse::from_state(outcome.state);
        info!(
            steps = response.steps_taken,
            unverified = response.verification_report.unverified_citations.len(),
            unchecked = response.verification_report.unchecked_citations.len(),
            approved = ?response.verification_report.is_approved,
            "request complete"
        );
        Ok(response)
    }
}
