use lawsage_core::hardener::{harden, DELIMITER, DISCLAIMER};
use proptest::prelude::*;

/// Text built from the pieces that exercise the hardener: the canonical
/// disclaimer, delimiters, disclaimer-like sentences and line breaks.
fn memo_like() -> impl Strategy<Value = String> {
    let piece = prop_oneof![
        Just(DISCLAIMER.to_string()),
        Just(DELIMITER.to_string()),
        Just("-".to_string()),
        Just("\n".to_string()),
        Just("\n\n".to_string()),
        Just("This is not legal advice. ".to_string()),
        Just("I am not an attorney! ".to_string()),
        Just("Pro Se litigants should file early? ".to_string()),
        Just("Legal Disclaimer:".to_string()),
        "[a-zA-Z .!?\t]{0,24}",
    ];
    prop::collection::vec(piece, 0..16).prop_map(|parts| parts.concat())
}

proptest! {
    #[test]
    fn harden_is_idempotent(x in ".*") {
        let once = harden(&x);
        prop_assert_eq!(harden(&once), once);
    }

    #[test]
    fn harden_is_idempotent_on_memo_like_text(x in memo_like()) {
        let once = harden(&x);
        prop_assert_eq!(harden(&once), once);
    }

    #[test]
    fn disclaimer_opens_strategy_exactly_once(x in memo_like()) {
        let out = harden(&x);
        prop_assert!(out.starts_with(DISCLAIMER));
        let (strategy, _) = out.split_once(DELIMITER).unwrap();
        prop_assert_eq!(strategy.matches(DISCLAIMER).count(), 1);
    }

    #[test]
    fn delimiter_always_separates_sections(x in memo_like()) {
        let out = harden(&x);
        let expected = format!("\n\n{DELIMITER}\n\n");
        prop_assert!(out.contains(&expected));
        let (_, filings) = out.split_once(DELIMITER).unwrap();
        prop_assert!(!filings.trim().is_empty());
    }
}
