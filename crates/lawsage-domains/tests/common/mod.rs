#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use lawsage_core::authority::{AuthorityIndex, IndexHit};
use lawsage_core::error::{AuthorityError, GenerationError};
use lawsage_core::generation::{GenerationRequest, GenerationResponse, GenerationService};
use lawsage_core::retrieval::{EmptyIndex, HybridRetriever};
use lawsage_core::types::Source;
use lawsage_domains::LegalServices;
use serde_json::{json, Value};

// ── Scripted generation service ──────────────────────────────────────────────

#[derive(Clone)]
pub enum Reply {
    Text(String),
    Json(Value),
    /// Text plus grounding sources.
    Grounded(String, Vec<Source>),
    Fail(String),
    RateLimited,
    /// Sleep, then answer with the inner reply.
    Slow(Duration, Box<Reply>),
}

struct Rule {
    label: String,
    prompt_contains: Option<String>,
    reply: Reply,
}

/// Answers by request label. Later rules win, and a rule with a prompt filter
/// only applies when the prompt contains it. Unmatched requests get
/// `GenerationError::Empty`.
#[derive(Default)]
pub struct ScriptedGenerator {
    rules: Vec<Rule>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(mut self, label: &str, reply: Reply) -> Self {
        self.rules.push(Rule {
            label: label.into(),
            prompt_contains: None,
            reply,
        });
        self
    }

    pub fn on_prompt(mut self, label: &str, contains: &str, reply: Reply) -> Self {
        self.rules.push(Rule {
            label: label.into(),
            prompt_contains: Some(contains.into()),
            reply,
        });
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, label: &str) -> usize {
        self.calls().iter().filter(|l| *l == label).count()
    }

    fn find(&self, req: &GenerationRequest) -> Option<Reply> {
        self.rules
            .iter()
            .rev()
            .find(|r| {
                r.label == req.label
                    && r.prompt_contains.as_deref().map_or(true, |c| req.prompt.contains(c))
            })
            .map(|r| r.reply.clone())
    }
}

fn answer(reply: Reply) -> futures::future::BoxFuture<'static, Result<GenerationResponse, GenerationError>> {
    Box::pin(async move {
        match reply {
            Reply::Text(t) => Ok(GenerationResponse::text(t)),
            Reply::Json(v) => Ok(GenerationResponse::json(v)),
            Reply::Grounded(t, sources) => Ok(GenerationResponse {
                citations_found: sources,
                ..GenerationResponse::text(t)
            }),
            Reply::Fail(msg) => Err(GenerationError::Api { status: 500, body: msg }),
            Reply::RateLimited => Err(GenerationError::RateLimited("429 quota exceeded".into())),
            Reply::Slow(d, inner) => {
                tokio::time::sleep(d).await;
                answer(*inner).await
            }
        }
    })
}

#[async_trait]
impl GenerationService for ScriptedGenerator {
    async fn generate(&self, req: &GenerationRequest) -> Result<GenerationResponse, GenerationError> {
        self.calls.lock().unwrap().push(req.label.clone());
        match self.find(req) {
            Some(reply) => answer(reply).await,
            None => Err(GenerationError::Empty),
        }
    }
}

// ── Fake authority index ─────────────────────────────────────────────────────

/// Hit counts keyed by citation text. Unknown citations are not found.
#[derive(Default)]
pub struct FakeIndex {
    hits: HashMap<String, u32>,
    unreachable: bool,
    lookups: Mutex<Vec<String>>,
}

impl FakeIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn found(mut self, citation: &str, count: u32) -> Self {
        self.hits.insert(citation.into(), count);
        self
    }

    pub fn unreachable() -> Self {
        Self {
            unreachable: true,
            ..Self::default()
        }
    }

    pub fn lookups(&self) -> Vec<String> {
        self.lookups.lock().unwrap().clone()
    }
}

#[async_trait]
impl AuthorityIndex for FakeIndex {
    async fn lookup(&self, citation: &str) -> Result<IndexHit, AuthorityError> {
        self.lookups.lock().unwrap().push(citation.to_string());
        if self.unreachable {
            return Err(AuthorityError::Transient("connection refused".into()));
        }
        Ok(self.hits.get(citation).map_or_else(IndexHit::not_found, |n| IndexHit::found(*n)))
    }

    fn name(&self) -> &str {
        "fake"
    }
}

// ── Happy-path script ────────────────────────────────────────────────────────

pub const VALID_A: &str = "Cal. Civ. Code § 1942.5";
pub const VALID_B: &str = "Cal. Civ. Code § 789.3";
pub const FABRICATED: &str = "Cal. Civ. Code § 4242.7";

pub fn sources() -> Vec<Source> {
    vec![
        Source {
            title: "Retaliatory Eviction".into(),
            uri: Some("https://law.example/1942.5".into()),
        },
        Source {
            title: "Lockouts and Utility Shutoffs".into(),
            uri: Some("https://law.example/789.3".into()),
        },
        Source {
            title: "Tenant Rights Handbook".into(),
            uri: None,
        },
    ]
}

pub fn memo(citations: &[&str]) -> Value {
    json!({
        "disclaimer": "LEGAL DISCLAIMER: this is not legal advice.",
        "strategy": "Your landlord changed the locks without a court order, which is an unlawful lockout.",
        "roadmap": [
            {"step": 1, "title": "Demand letter", "description": "Send a written demand to restore access.", "estimated_time": "1 day"},
            {"step": 2, "title": "File in small claims", "description": "File a claim for statutory damages."}
        ],
        "filing_template": "PLAINTIFF'S CLAIM AND ORDER TO GO TO SMALL CLAIMS COURT\n[YOUR NAME] v. [LANDLORD NAME]",
        "citations": citations
    })
}

/// Every node answers sensibly; every listed citation checks out.
pub fn happy_generator(citations: &[&str]) -> ScriptedGenerator {
    ScriptedGenerator::new()
        .on("interrogator", Reply::Json(json!([])))
        .on(
            "researcher",
            Reply::Grounded(
                "Civil Code 789.3 prohibits lockouts; 1942.5 prohibits retaliation.".into(),
                sources(),
            ),
        )
        .on("counter_research", Reply::Text("Landlord may argue abandonment.".into()))
        .on("reasoner", Reply::Text("Claim statutory damages for the lockout.".into()))
        .on(
            "fact_matrix",
            Reply::Json(json!({
                "elements": [{"element": "Lockout", "facts": ["locks changed"], "authority": VALID_B}],
                "summary": "Lockout established."
            })),
        )
        .on("drafter", Reply::Text("[YOUR NAME] v. [LANDLORD NAME]".into()))
        .on("formatter", Reply::Json(memo(citations)))
        .on("extract_citations", Reply::Json(json!(citations)))
        .on("treatment_research", Reply::Text("No negative treatment found.".into()))
        .on(
            "treatment_judgment",
            Reply::Json(json!({"is_valid": true, "status": "GOOD_LAW", "explanation": "Still good law."})),
        )
        .on(
            "validate_reasoning",
            Reply::Json(json!({"valid": true, "confidence": 0.9, "critique": ""})),
        )
        .on("procedural_sanity_check", Reply::Json(json!([])))
        .on(
            "senior_review",
            Reply::Json(json!({
                "is_approved": true,
                "fallacies_found": [],
                "missing_rebuttals": [],
                "shadow_brief": "The tenant abandoned the unit.",
                "feedback": ""
            })),
        )
}

pub fn services(generator: Arc<dyn GenerationService>, index: Arc<dyn AuthorityIndex>) -> Arc<LegalServices> {
    let retriever = Arc::new(HybridRetriever::new(Arc::new(EmptyIndex), Arc::new(EmptyIndex)));
    Arc::new(LegalServices::new(generator, index, retriever))
}
