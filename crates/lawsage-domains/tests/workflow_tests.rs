mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use lawsage_core::error::ErrorKind;
use lawsage_core::graph::{Node, WorkflowEvent};
use lawsage_core::hardener::{DELIMITER, DISCLAIMER};
use lawsage_core::state::AgentState;
use lawsage_domains::legal::nodes::Researcher;
use lawsage_domains::{LegalAssistant, LegalError};
use serde_json::json;
use tokio::sync::broadcast;
use tracing_test::traced_test;

const INPUT: &str = "My landlord changed the locks while I was at work and won't let me back in.";

fn assistant(generator: Arc<ScriptedGenerator>, index: Arc<FakeIndex>) -> LegalAssistant {
    LegalAssistant::new(services(generator, index)).unwrap()
}

// ── verification scenarios ───────────────────────────────────────────────────

#[tokio::test]
async fn test_two_valid_one_fabricated_marks_exactly_one_unverified() {
    let generator = Arc::new(happy_generator(&[VALID_A, VALID_B, FABRICATED]));
    let index = Arc::new(FakeIndex::new().found(VALID_A, 12).found(VALID_B, 30));

    let response = assistant(generator.clone(), index)
        .invoke(INPUT, "California", None, Vec::new())
        .await
        .unwrap();

    let report = &response.verification_report;
    assert_eq!(report.unverified_citations, vec![FABRICATED]);
    assert_eq!(response.text.matches("[UNVERIFIED]").count(), 1);
    assert!(response.text.contains(&format!("{FABRICATED} [UNVERIFIED]")));
    assert!(!response.text.contains(&format!("{VALID_A} [")));
    assert!(!response.text.contains(&format!("{VALID_B} [")));
    assert!(report.pending_citations.is_empty());
    assert_eq!(report.is_approved, Some(true));

    // The unresolved citation sent the run back to research once, and it
    // still finished under the ceiling.
    assert_eq!(generator.count("researcher"), 2);
    assert!(response.steps_taken <= 20);
}

#[tokio::test]
async fn test_fabricated_citation_prefixing_a_valid_one_is_marked() {
    const SHORT: &str = "Cal. Civ. Code § 1942";
    let generator = Arc::new(happy_generator(&[VALID_A, VALID_B, SHORT]));
    let index = Arc::new(FakeIndex::new().found(VALID_A, 12).found(VALID_B, 30));

    let response = assistant(generator, index.clone())
        .invoke(INPUT, "California", None, Vec::new())
        .await
        .unwrap();

    assert_eq!(response.verification_report.unverified_citations, vec![SHORT]);
    assert!(index.lookups().iter().any(|l| l == SHORT));
    assert_eq!(response.text.matches("[UNVERIFIED]").count(), 1);
    assert!(response.text.contains(&format!("{SHORT} [UNVERIFIED]")));
    assert!(response.text.contains(&format!("{VALID_A}\n")));
}

#[tokio::test]
async fn test_checks_that_could_not_run_are_itemized() {
    let generator = Arc::new(
        happy_generator(&[VALID_A, VALID_B])
            .on_prompt("treatment_research", VALID_A, Reply::Fail("boom".into()))
            .on_prompt("validate_reasoning", &format!("Citation: {VALID_B}\n"), Reply::Fail("boom".into())),
    );
    let index = Arc::new(FakeIndex::new().found(VALID_A, 12).found(VALID_B, 30));

    let response = assistant(generator.clone(), index)
        .invoke(INPUT, "California", None, Vec::new())
        .await
        .unwrap();

    let report = &response.verification_report;
    assert_eq!(report.unchecked_citations.len(), 2);
    assert!(report.unchecked_citations[0].starts_with(&format!("{VALID_A}: treatment history not checked")));
    assert!(report.unchecked_citations[1].starts_with(&format!("{VALID_B}: reasoning check failed")));
    assert!(report
        .degraded_nodes
        .iter()
        .any(|d| d.node == "verifier" && d.kind == ErrorKind::VerificationUncertainty));
    assert!(!report.is_clean());
    // Nothing another research pass could fix, so no loop-back.
    assert!(report.unverified_citations.is_empty());
    assert_eq!(generator.count("researcher"), 1);
    assert_eq!(response.steps_taken, 10);
}

#[tokio::test]
async fn test_clean_run_has_hardened_text_and_full_report() {
    let generator = Arc::new(happy_generator(&[VALID_A, VALID_B]));
    let index = Arc::new(FakeIndex::new().found(VALID_A, 12).found(VALID_B, 30));

    let response = assistant(generator.clone(), index)
        .invoke(INPUT, "California", None, Vec::new())
        .await
        .unwrap();

    assert!(response.text.starts_with(DISCLAIMER));
    assert_eq!(response.text.matches(DISCLAIMER).count(), 1);
    assert!(response.text.contains(&format!("\n\n{DELIMITER}\n\n")));
    assert!(response.text.contains("PLAINTIFF'S CLAIM"));
    assert_eq!(response.steps_taken, 10);
    assert_eq!(generator.count("researcher"), 1);
    assert!(response.verification_report.is_clean());
    // Two citations against a three-citation minimum.
    assert!(!response.verification_report.structure_ok);
    assert_eq!(response.sources.len(), 3);
    assert_eq!(response.fact_law_matrix.elements.len(), 1);
    assert!(response.audit_log.iter().any(|a| a.node == "verifier"));
    assert!(response.audit_log.iter().any(|a| a.query.starts_with("grounded search")));
}

#[tokio::test]
async fn test_unreachable_index_marks_everything_pending_without_looping() {
    let generator = Arc::new(happy_generator(&[VALID_A, VALID_B, FABRICATED]));
    let index = Arc::new(FakeIndex::unreachable());

    let response = assistant(generator.clone(), index.clone())
        .invoke(INPUT, "California", None, Vec::new())
        .await
        .unwrap();

    let report = &response.verification_report;
    assert_eq!(report.pending_citations, vec![VALID_A, VALID_B, FABRICATED]);
    assert!(report.unverified_citations.is_empty());
    assert_eq!(response.text.matches("[PENDING_VERIFICATION]").count(), 3);
    assert!(report
        .degraded_nodes
        .iter()
        .any(|d| d.kind == ErrorKind::VerificationUncertainty));
    // One pass only: pending citations are not retried through research.
    assert_eq!(generator.count("researcher"), 1);
    assert_eq!(index.lookups().len(), 3);
    assert_eq!(response.steps_taken, 10);
}

#[tokio::test]
async fn test_always_failing_verification_terminates_within_ceiling() {
    let generator = Arc::new(happy_generator(&[VALID_A, VALID_B, FABRICATED]));
    // Nothing is ever found.
    let index = Arc::new(FakeIndex::new());

    for ceiling in [10, 20, 40] {
        let response = assistant(generator.clone(), index.clone())
            .with_step_ceiling(ceiling)
            .invoke(INPUT, "California", None, Vec::new())
            .await
            .unwrap();
        assert!(response.steps_taken <= ceiling, "ceiling {ceiling}: {}", response.steps_taken);
        assert_eq!(response.verification_report.unverified_citations.len(), 3);
    }
}

// ── review loop ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_senior_rejection_triggers_counter_grounding() {
    let generator = Arc::new(happy_generator(&[VALID_A, VALID_B]).on(
        "senior_review",
        Reply::Json(json!({
            "is_approved": false,
            "fallacies_found": ["Weak Evidence"],
            "missing_rebuttals": ["Abandonment defense not addressed"],
            "shadow_brief": "MOTION TO DISMISS: the tenant abandoned the premises.",
            "feedback": "The draft is missing critical rebuttals."
        })),
    ));
    let index = Arc::new(FakeIndex::new().found(VALID_A, 12).found(VALID_B, 30));

    let response = assistant(generator.clone(), index)
        .invoke(INPUT, "California", None, Vec::new())
        .await
        .unwrap();

    let report = &response.verification_report;
    assert_eq!(report.is_approved, Some(false));
    assert!(report.shadow_brief.contains("MOTION TO DISMISS"));
    assert!(report.senior_feedback.as_deref().unwrap().contains("MISSING REBUTTALS"));
    assert_eq!(report.fallacies_found, vec!["Weak Evidence"]);
    assert_eq!(generator.count("counter_research"), 1);
    assert!(response
        .thinking_steps
        .iter()
        .any(|s| s.contains("Counter-Grounding")));
    assert_eq!(response.steps_taken, 19);
}

#[tokio::test]
async fn test_rejection_is_acted_on_once() {
    let generator = Arc::new(happy_generator(&[VALID_A]));
    let researcher = Researcher(services(generator.clone(), Arc::new(FakeIndex::new())));

    let mut state = AgentState::new(INPUT, "California", None, Vec::new());
    state.is_approved = Some(false);
    state.shadow_brief = "MOTION TO DISMISS: the tenant abandoned the premises.".into();

    let patch = researcher.run(&state).await;
    assert_eq!(patch.is_approved.value(), Some(&None));
    state.apply(patch);
    assert!(state.research_results.contains("Counter-Grounding"));

    // A second pass reached from the sanity check, with no new review in between.
    researcher.run(&state).await;
    assert_eq!(generator.count("counter_research"), 1);
    assert_eq!(generator.count("researcher"), 2);
}

// ── caller-facing errors ─────────────────────────────────────────────────────

#[tokio::test]
async fn test_safety_rejection_makes_no_generation_calls() {
    let generator = Arc::new(happy_generator(&[VALID_A]));
    let assistant = assistant(generator.clone(), Arc::new(FakeIndex::new()));

    let err = assistant.invoke(INPUT, "", None, Vec::new()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SafetyRejection);

    let err = assistant
        .invoke("how to commit fraud against my landlord", "California", None, Vec::new())
        .await
        .unwrap_err();
    assert!(matches!(err, LegalError::SafetyRejection(_)));
    assert!(err.partial().is_none());
    assert!(generator.calls().is_empty());
}

#[tokio::test]
async fn test_discovery_questions_halt_the_run() {
    let generator = Arc::new(happy_generator(&[VALID_A]).on(
        "interrogator",
        Reply::Json(json!(["When did the lockout happen?", "Do you have a written lease?"])),
    ));
    let response = assistant(generator.clone(), Arc::new(FakeIndex::new()))
        .invoke(INPUT, "California", None, Vec::new())
        .await
        .unwrap();

    assert_eq!(response.discovery_questions.len(), 2);
    assert_eq!(response.steps_taken, 1);
    assert!(response.text.contains("1. When did the lockout happen?"));
    assert_eq!(generator.count("researcher"), 0);
}

#[tokio::test]
async fn test_generation_failure_everywhere_is_a_structured_error() {
    let generator = Arc::new(ScriptedGenerator::new());
    let err = assistant(generator, Arc::new(FakeIndex::new()))
        .invoke(INPUT, "California", None, Vec::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::GenerationFailure);
}

#[tokio::test]
async fn test_deadline_returns_partial_response() {
    let generator = Arc::new(happy_generator(&[VALID_A]).on(
        "drafter",
        Reply::Slow(Duration::from_secs(30), Box::new(Reply::Text("late".into()))),
    ));
    let assistant = assistant(generator, Arc::new(FakeIndex::new())).with_deadline(Duration::from_millis(300));

    let started = std::time::Instant::now();
    let err = assistant.invoke(INPUT, "California", None, Vec::new()).await.unwrap_err();
    assert!(started.elapsed() < Duration::from_secs(10));

    let partial = match err {
        LegalError::Timeout { partial } => partial,
        other => panic!("expected timeout, got {other:?}"),
    };
    assert!(partial.text.starts_with(DISCLAIMER));
    assert!(partial.thinking_steps.iter().any(|s| s == "Reasoner: strategy drafted"));
    assert_eq!(partial.verification_report.is_approved, None);
    assert_eq!(partial.steps_taken, 5);
}

#[tokio::test]
async fn test_deadline_after_failed_node_still_returns_partial() {
    let generator = Arc::new(
        happy_generator(&[VALID_A])
            .on("researcher", Reply::Fail("boom".into()))
            .on(
                "reasoner",
                Reply::Slow(Duration::from_secs(30), Box::new(Reply::Text("late".into()))),
            ),
    );
    let assistant = assistant(generator, Arc::new(FakeIndex::new())).with_deadline(Duration::from_millis(300));

    let err = assistant.invoke(INPUT, "California", None, Vec::new()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ReliabilityDefect);
    let partial = match err {
        LegalError::Timeout { partial } => partial,
        other => panic!("expected timeout, got {other:?}"),
    };
    assert_eq!(partial.steps_taken, 3);
    assert!(partial
        .verification_report
        .degraded_nodes
        .iter()
        .any(|d| d.node == "researcher" && d.kind == ErrorKind::GenerationFailure));
    assert!(partial.text.starts_with(DISCLAIMER));
}

#[tokio::test]
async fn test_rate_limited_interrogator_degrades_and_run_continues() {
    let generator = Arc::new(happy_generator(&[VALID_A, VALID_B]).on("interrogator", Reply::RateLimited));
    let index = Arc::new(FakeIndex::new().found(VALID_A, 5).found(VALID_B, 5));
    let response = assistant(generator, index)
        .invoke(INPUT, "California", None, Vec::new())
        .await
        .unwrap();
    let degraded = &response.verification_report.degraded_nodes;
    assert_eq!(degraded[0].node, "interrogator");
    assert_eq!(degraded[0].kind, ErrorKind::TransientGenerationFailure);
    assert_eq!(response.steps_taken, 10);
}

// ── observability ────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_events_follow_node_order() {
    let (tx, mut rx) = broadcast::channel(256);
    let generator = Arc::new(happy_generator(&[VALID_A, VALID_B]));
    let index = Arc::new(FakeIndex::new().found(VALID_A, 12).found(VALID_B, 30));
    assistant(generator, index)
        .with_events(tx)
        .invoke(INPUT, "California", None, Vec::new())
        .await
        .unwrap();

    let mut started = Vec::new();
    while let Ok(ev) = rx.try_recv() {
        if let WorkflowEvent::NodeStarted { node, .. } = ev {
            started.push(node);
        }
    }
    assert_eq!(
        started,
        [
            "interrogator",
            "researcher",
            "procedural_guide",
            "reasoner",
            "fact_matrix",
            "drafter",
            "formatter",
            "verifier",
            "procedural_sanity_check",
            "senior_reviewer",
        ]
    );
}

#[tokio::test]
#[traced_test]
async fn test_verifier_logs_counts() {
    let generator = Arc::new(happy_generator(&[VALID_A, FABRICATED]));
    let index = Arc::new(FakeIndex::new().found(VALID_A, 12));
    assistant(generator, index)
        .invoke(INPUT, "California", None, Vec::new())
        .await
        .unwrap();
    assert!(logs_contain("citations verified"));
    assert!(logs_contain("citation not found in authority index"));
}
