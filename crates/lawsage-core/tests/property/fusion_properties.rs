use std::collections::HashMap;

use lawsage_core::retrieval::{fuse, DEFAULT_RRF_K};
use lawsage_core::types::{DocumentMetadata, RetrievedDocument};
use proptest::prelude::*;

fn doc(id: u8) -> RetrievedDocument {
    RetrievedDocument {
        text: format!("D{id}"),
        metadata: DocumentMetadata::default(),
    }
}

/// A best-first result list with no repeated documents.
fn ranked_list() -> impl Strategy<Value = Vec<RetrievedDocument>> {
    prop::collection::vec(0u8..24, 0..12).prop_map(|ids| {
        let mut seen = Vec::new();
        for id in ids {
            if !seen.contains(&id) {
                seen.push(id);
            }
        }
        seen.into_iter().map(doc).collect()
    })
}

fn first_seen(lexical: &[RetrievedDocument], vector: &[RetrievedDocument]) -> HashMap<String, usize> {
    let mut order = HashMap::new();
    for d in lexical.iter().chain(vector) {
        let next = order.len();
        order.entry(d.text.clone()).or_insert(next);
    }
    order
}

proptest! {
    #[test]
    fn fused_scores_are_reciprocal_rank_sums(lexical in ranked_list(), vector in ranked_list()) {
        let fused = fuse(&lexical, &vector, DEFAULT_RRF_K);
        for d in &fused {
            let mut expected = 0.0;
            for list in [&lexical, &vector] {
                if let Some(rank) = list.iter().position(|x| x.text == d.document.text) {
                    expected += 1.0 / (rank as f64 + f64::from(DEFAULT_RRF_K));
                }
            }
            prop_assert!((d.score - expected).abs() < 1e-12);
        }
    }

    #[test]
    fn every_document_appears_once(lexical in ranked_list(), vector in ranked_list()) {
        let fused = fuse(&lexical, &vector, DEFAULT_RRF_K);
        let order = first_seen(&lexical, &vector);
        prop_assert_eq!(fused.len(), order.len());
        for d in &fused {
            prop_assert!(order.contains_key(&d.document.text));
        }
    }

    #[test]
    fn ordered_by_score_then_first_seen(lexical in ranked_list(), vector in ranked_list()) {
        let fused = fuse(&lexical, &vector, DEFAULT_RRF_K);
        let order = first_seen(&lexical, &vector);
        for pair in fused.windows(2) {
            prop_assert!(pair[0].score >= pair[1].score);
            if pair[0].score == pair[1].score {
                prop_assert!(order[&pair[0].document.text] < order[&pair[1].document.text]);
            }
        }
    }

    #[test]
    fn fusion_is_deterministic(lexical in ranked_list(), vector in ranked_list()) {
        prop_assert_eq!(
            fuse(&lexical, &vector, DEFAULT_RRF_K),
            fuse(&lexical, &vector, DEFAULT_RRF_K)
        );
    }
}
