pub mod courtlistener;
pub mod extractor;
pub mod nodes;
pub mod procedural;
pub mod prompts;
pub mod verifier;

use std::sync::Arc;

use anyhow::Result;
use lawsage_core::graph::{Graph, END};
use lawsage_core::state::AgentState;

use nodes::*;

/// Node executions from the researcher back around to the senior reviewer.
pub const LOOP_PASS_STEPS: u32 = 9;

/// Take a loop-back only when a full pass still fits under the step ceiling,
/// so a run never ends past it.
pub fn can_loop_back(state: &AgentState) -> bool {
    state.step_count + LOOP_PASS_STEPS <= state.step_ceiling
}

/// Halt and surface questions when the interrogator has any.
pub fn route_after_interrogator(state: &AgentState) -> &'static str {
    if state.discovery_questions.is_empty() {
        RESEARCHER
    } else {
        END
    }
}

/// Citation or procedural problems send the run back to research while budget remains.
pub fn route_after_sanity_check(state: &AgentState) -> &'static str {
    if state.has_unresolved_issues() && can_loop_back(state) {
        RESEARCHER
    } else {
        SENIOR_REVIEWER
    }
}

/// A rejected memo goes back to research while budget remains.
pub fn route_after_review(state: &AgentState) -> &'static str {
    if state.is_approved == Some(false) && can_loop_back(state) {
        RESEARCHER
    } else {
        END
    }
}

/// The full legal pipeline:
/// interrogator → researcher → procedural guide → reasoner → fact matrix → drafter
/// → formatter → verifier → procedural sanity check → senior reviewer.
pub fn legal_workflow(services: Arc<LegalServices>) -> Result<Graph> {
    Graph::builder()
        .add_node(Interrogator(services.clone()))
        .add_node(Researcher(services.clone()))
        .add_node(ProceduralGuide)
        .add_node(Reasoner(services.clone()))
        .add_node(FactMatrix(services.clone()))
        .add_node(Drafter(services.clone()))
        .add_node(Formatter(services.clone()))
        .add_node(Verifier(services.clone()))
        .add_node(ProceduralSanityCheck(services.clone()))
        .add_node(SeniorReviewer(services))
        .entry(INTERROGATOR)
        .add_conditional_edge(INTERROGATOR, &[RESEARCHER, END], route_after_interrogator)
        .add_edge(RESEARCHER, PROCEDURAL_GUIDE)
        .add_edge(PROCEDURAL_GUIDE, REASONER)
        .add_edge(REASONER, FACT_MATRIX)
        .add_edge(FACT_MATRIX, DRAFTER)
        .add_edge(DRAFTER, FORMATTER)
        .add_edge(FORMATTER, VERIFIER)
        .add_edge(VERIFIER, SANITY_CHECK)
        .add_conditional_edge(SANITY_CHECK, &[RESEARCHER, SENIOR_REVIEWER], route_after_sanity_check)
        .add_conditional_edge(SENIOR_REVIEWER, &[RESEARCHER, END], route_after_review)
        .compile()
}
