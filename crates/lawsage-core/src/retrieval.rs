//! Hybrid retrieval: a lexical list and a vector list fused by Reciprocal Rank Fusion.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, warn};

use crate::types::{DocumentMetadata, RetrievedDocument};

pub const DEFAULT_RRF_K: u32 = 60;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchFilter {
    pub jurisdiction: Option<String>,
    pub case_id: Option<String>,
}

impl SearchFilter {
    pub fn new(jurisdiction: &str, case_id: Option<&str>) -> Self {
        Self {
            jurisdiction: Some(jurisdiction.to_string()).filter(|j| !j.is_empty()),
            case_id: case_id.map(str::to_string),
        }
    }

    /// Jurisdiction must match when set. Documents tied to a case only match that
    /// case; documents without a case id are general material and always pass.
    pub fn matches(&self, meta: &DocumentMetadata) -> bool {
        if let Some(j) = &self.jurisdiction {
            if !meta.jurisdiction.eq_ignore_ascii_case(j) {
                return false;
            }
        }
        match (&meta.case_id, &self.case_id) {
            (Some(doc_case), Some(want)) => doc_case == want,
            (Some(_), None) => false,
            (None, _) => true,
        }
    }
}

#[async_trait]
pub trait LexicalSearch: Send + Sync {
    async fn lexical_search(&self, query: &str, filter: &SearchFilter) -> Result<Vec<RetrievedDocument>>;
}

#[async_trait]
pub trait VectorSearch: Send + Sync {
    async fn vector_search(&self, query: &str, filter: &SearchFilter) -> Result<Vec<RetrievedDocument>>;
}

/// Stand-in when no index is configured. Always returns nothing.
pub struct EmptyIndex;

#[async_trait]
impl LexicalSearch for EmptyIndex {
    async fn lexical_search(&self, _query: &str, _filter: &SearchFilter) -> Result<Vec<RetrievedDocument>> {
        Ok(Vec::new())
    }
}

#[async_trait]
impl VectorSearch for EmptyIndex {
    async fn vector_search(&self, _query: &str, _filter: &SearchFilter) -> Result<Vec<RetrievedDocument>> {
        Ok(Vec::new())
    }
}

// ── Reciprocal Rank Fusion ───────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredDocument {
    pub document: RetrievedDocument,
    pub score: f64,
}

/// Fuse two best-first lists. Each list contributes `1 / (rank + k)` (0-based rank)
/// to every document it contains. Ties keep first-seen order: lexical list first,
/// then vector list.
pub fn fuse(lexical: &[RetrievedDocument], vector: &[RetrievedDocument], k: u32) -> Vec<ScoredDocument> {
    let mut fused: Vec<ScoredDocument> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();

    for list in [lexical, vector] {
        for (rank, doc) in list.iter().enumerate() {
            let contribution = 1.0 / (rank as f64 + k as f64);
            match index.get(doc.key()) {
                Some(&i) => fused[i].score += contribution,
                None => {
                    index.insert(doc.key(), fused.len());
                    fused.push(ScoredDocument {
                        document: doc.clone(),
                        score: contribution,
                    });
                }
            }
        }
    }

    // Stable sort keeps first-seen order among equal scores.
    fused.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    fused
}

// ── HybridRetriever ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct RetrievalOutcome {
    pub documents: Vec<ScoredDocument>,
    pub lexical_hits: usize,
    pub vector_hits: usize,
    /// Collaborators that failed; the other list is still used.
    pub failures: Vec<String>,
}

/// Read-mostly and shared across requests.
pub struct HybridRetriever {
    lexical: Arc<dyn LexicalSearch>,
    vector: Arc<dyn VectorSearch>,
    k: u32,
    top_k: usize,
}

impl HybridRetriever {
    pub fn new(lexical: Arc<dyn LexicalSearch>, vector: Arc<dyn VectorSearch>) -> Self {
        Self {
            lexical,
            vector,
            k: DEFAULT_RRF_K,
            top_k: 5,
        }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn with_k(mut self, k: u32) -> Self {
        self.k = k;
        self
    }

    pub async fn retrieve(&self, query: &str, filter: &SearchFilter) -> RetrievalOutcome {
        let (lexical, vector) = tokio::join!(
            self.lexical.lexical_search(query, filter),
            self.vector.vector_search(query, filter)
        );
        let mut failures = Vec::new();
        let lexical = lexical.unwrap_or_else(|e| {
            warn!("lexical search failed: {e:#}");
            failures.push(format!("lexical: {e}"));
            Vec::new()
        });
        let vector = vector.unwrap_or_else(|e| {
            warn!("vector search failed: {e:#}");
            failures.push(format!("vector: {e}"));
            Vec::new()
        });

        let mut documents = fuse(&lexical, &vector, self.k);
        documents.truncate(self.top_k);
        debug!(
            lexical_hits = lexical.len(),
            vector_hits = vector.len(),
            fused = documents.len(),
            "hybrid retrieval"
        );
        RetrievalOutcome {
            documents,
            lexical_hits: lexical.len(),
            vector_hits: vector.len(),
            failures,
        }
    }
}

// ── BM25 lexical index ───────────────────────────────────────────────────

const BM25_K1: f64 = 1.5;
const BM25_B: f64 = 0.75;

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// In-memory Okapi BM25 over a fixed document set. Built once, then only read.
#[derive(Debug, Default)]
pub struct Bm25Index {
    docs: Vec<RetrievedDocument>,
    term_freqs: Vec<HashMap<String, u32>>,
    doc_lens: Vec<usize>,
    avg_len: f64,
    doc_freq: HashMap<String, usize>,
    limit: usize,
}

impl Bm25Index {
    pub fn new(docs: Vec<RetrievedDocument>) -> Self {
        let mut term_freqs = Vec::with_capacity(docs.len());
        let mut doc_lens = Vec::with_capacity(docs.len());
        let mut doc_freq: HashMap<String, usize> = HashMap::new();

        for doc in &docs {
            let tokens = tokenize(&doc.text);
            doc_lens.push(tokens.len());
            let mut tf: HashMap<String, u32> = HashMap::new();
            for t in tokens {
                *tf.entry(t).or_default() += 1;
            }
            for term in tf.keys() {
                *doc_freq.entry(term.clone()).or_default() += 1;
            }
            term_freqs.push(tf);
        }

        let avg_len = if docs.is_empty() {
            0.0
        } else {
            doc_lens.iter().sum::<usize>() as f64 / docs.len() as f64
        };

        Self {
            docs,
            term_freqs,
            doc_lens,
            avg_len,
            doc_freq,
            limit: 10,
        }
    }

    /// Load a JSON array of documents.
    pub fn from_json_file(path: &std::path::Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("reading corpus {}: {e}", path.display()))?;
        let docs: Vec<RetrievedDocument> = serde_json::from_str(&raw)?;
        Ok(Self::new(docs))
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    fn idf(&self, term: &str) -> f64 {
        let n = self.docs.len() as f64;
        let df = self.doc_freq.get(term).copied().unwrap_or(0) as f64;
        ((n - df + 0.5) / (df + 0.5) + 1.0).ln()
    }

    fn score(&self, i: usize, query_terms: &[String]) -> f64 {
        let tf = &self.term_freqs[i];
        let len_norm = if self.avg_len > 0.0 {
            self.doc_lens[i] as f64 / self.avg_len
        } else {
            0.0
        };
        query_terms
            .iter()
            .filter_map(|term| tf.get(term).map(|&f| (term, f as f64)))
            .map(|(term, f)| {
                self.idf(term) * (f * (BM25_K1 + 1.0)) / (f + BM25_K1 * (1.0 - BM25_B + BM25_B * len_norm))
            })
            .sum()
    }

    /// Best-first documents with a positive score that pass the filter.
    pub fn search(&self, query: &str, filter: &SearchFilter) -> Vec<RetrievedDocument> {
        let terms = tokenize(query);
        if terms.is_empty() {
            return Vec::new();
        }
        let mut scored: Vec<(usize, f64)> = (0..self.docs.len())
            .filter(|&i| filter.matches(&self.docs[i].metadata))
            .map(|i| (i, self.score(i, &terms)))
            .filter(|(_, s)| *s > 0.0)
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored
            .into_iter()
            .take(self.limit)
            .map(|(i, _)| self.docs[i].clone())
            .collect()
    }
}

#[async_trait]
impl LexicalSearch for Bm25Index {
    async fn lexical_search(&self, query: &str, filter: &SearchFilter) -> Result<Vec<RetrievedDocument>> {
        Ok(self.search(query, filter))
    }
}
