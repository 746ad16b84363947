use lawsage_core::types::{Citation, VerificationResult, VerificationStatus};
use lawsage_domains::legal::verifier::{annotate, cl_weight, confidence_score, CitationVerdict, Flag};
use proptest::prelude::*;

fn verdict(text: &str, flag: Flag) -> CitationVerdict {
    CitationVerdict {
        citation: Citation::candidate(text),
        result: VerificationResult {
            citation: text.into(),
            is_valid: false,
            status: VerificationStatus::NotFound,
            explanation: None,
            replacement_citation: None,
        },
        flag,
        reasoning_mismatch: None,
        unchecked: None,
        audit: Vec::new(),
    }
}

fn flag() -> impl Strategy<Value = Flag> {
    prop_oneof![
        Just(Flag::Trusted),
        Just(Flag::Unverified),
        Just(Flag::Pending),
        Just(Flag::Superseded("OVERRULED by X v. Y".into())),
        (0.0f64..0.4).prop_map(Flag::LowConfidence),
    ]
}

const CITATIONS: &[&str] = &[
    "Cal. Civ. Code § 1942",
    "Cal. Civ. Code § 1942.5",
    "Cal. Civ. Code § 789.3",
    "Rule 12",
    "Rule 12(b)(6)",
    "Smith v. Jones",
];

/// Prose with citations dropped in, some of them prefixes of others.
fn memo_text() -> impl Strategy<Value = String> {
    let piece = prop_oneof![
        prop::sample::select(CITATIONS).prop_map(str::to_string),
        Just(". ".to_string()),
        Just(", ".to_string()),
        Just("\n".to_string()),
        "[a-z ]{0,12}",
    ];
    prop::collection::vec(piece, 0..20).prop_map(|parts| parts.concat())
}

fn verdicts() -> impl Strategy<Value = Vec<CitationVerdict>> {
    prop::collection::vec((prop::sample::select(CITATIONS), flag()), 0..6)
        .prop_map(|vs| vs.into_iter().map(|(c, f)| verdict(c, f)).collect())
}

fn strip_tags(text: &str, verdicts: &[CitationVerdict]) -> String {
    let mut out = text.to_string();
    for tag in verdicts.iter().filter_map(|v| v.flag.tag()) {
        out = out.replace(&format!(" {tag}"), "");
    }
    out
}

proptest! {
    #[test]
    fn cl_weight_is_monotonic_and_bounded(n in 0u32..1_000_000, d in 0u32..1_000) {
        let w = cl_weight(n);
        prop_assert!((0.4..=0.5).contains(&w));
        prop_assert!(cl_weight(n.saturating_add(d)) >= w);
    }

    #[test]
    fn confidence_is_bounded_and_grows_with_consistency(
        n in 0u32..10_000,
        a in 0.0f64..=1.0,
        b in 0.0f64..=1.0,
    ) {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        let s_lo = confidence_score(n, lo);
        let s_hi = confidence_score(n, hi);
        prop_assert!((0.0..=1.0).contains(&s_lo));
        prop_assert!(s_hi >= s_lo);
    }

    #[test]
    fn found_citation_never_scores_below_lookup_weight(n in 1u32..10_000, c in 0.0f64..=1.0) {
        prop_assert!(confidence_score(n, c) >= cl_weight(n) - 1e-12);
    }

    #[test]
    fn annotation_is_idempotent(text in memo_text(), vs in verdicts()) {
        let once = annotate(&text, &vs);
        prop_assert_eq!(annotate(&once, &vs), once);
    }

    #[test]
    fn annotation_never_removes_text(text in memo_text(), vs in verdicts()) {
        let out = annotate(&text, &vs);
        prop_assert_eq!(strip_tags(&out, &vs), text);
    }
}
