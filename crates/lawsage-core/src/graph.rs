//! Workflow engine: named nodes over one [`AgentState`], wired by an explicit edge table
//! and run by a small interpreter loop.
//!
//! The step counter lives in the state itself (`step_count`) and is only written here.
//! Routers compare it against `step_ceiling` to gate loop-back edges; independently the
//! engine stops at a hard limit of twice the ceiling, so a mis-wired router still halts.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::EngineError;
use crate::state::{AgentState, StatePatch};

/// Terminal marker returned by routers and used as an edge target.
pub const END: &str = "__end__";

/// One step of the workflow. Must always return a patch: a node that cannot do its
/// work writes a degraded default and records the degradation instead of failing.
#[async_trait]
pub trait Node: Send + Sync {
    fn name(&self) -> &'static str;
    async fn run(&self, state: &AgentState) -> StatePatch;
}

pub type Router = Box<dyn Fn(&AgentState) -> &'static str + Send + Sync>;

enum Edge {
    Direct(&'static str),
    Conditional {
        targets: Vec<&'static str>,
        router: Router,
    },
}

// ── Events ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEvent {
    NodeStarted { node: String, step: u32 },
    NodeFinished { node: String, step: u32, degraded: bool },
    Routed { from: String, to: String },
    Terminated { steps: u32, error: Option<String> },
}

impl WorkflowEvent {
    pub fn kind(&self) -> &str {
        match self {
            Self::NodeStarted { .. } => "node_started",
            Self::NodeFinished { .. } => "node_finished",
            Self::Routed { .. } => "routed",
            Self::Terminated { .. } => "terminated",
        }
    }
}

// ── Builder ──────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct GraphBuilder {
    nodes: HashMap<&'static str, Arc<dyn Node>>,
    edges: HashMap<&'static str, Edge>,
    entry: Option<&'static str>,
    duplicate: Option<String>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(self, node: impl Node + 'static) -> Self {
        self.add_shared_node(Arc::new(node))
    }

    pub fn add_shared_node(mut self, node: Arc<dyn Node>) -> Self {
        let name = node.name();
        if self.nodes.insert(name, node).is_some() {
            self.duplicate.get_or_insert_with(|| format!("node '{name}' added twice"));
        }
        self
    }

    pub fn add_edge(mut self, from: &'static str, to: &'static str) -> Self {
        if self.edges.insert(from, Edge::Direct(to)).is_some() {
            self.duplicate.get_or_insert_with(|| format!("node '{from}' has two outgoing edges"));
        }
        self
    }

    /// `targets` lists every name the router may return; anything else is a runtime error.
    pub fn add_conditional_edge<F>(mut self, from: &'static str, targets: &[&'static str], router: F) -> Self
    where
        F: Fn(&AgentState) -> &'static str + Send + Sync + 'static,
    {
        let edge = Edge::Conditional {
            targets: targets.to_vec(),
            router: Box::new(router),
        };
        if self.edges.insert(from, edge).is_some() {
            self.duplicate.get_or_insert_with(|| format!("node '{from}' has two outgoing edges"));
        }
        self
    }

    pub fn entry(mut self, name: &'static str) -> Self {
        self.entry = Some(name);
        self
    }

    /// Check the edge table: every edge starts and ends at a known node (or [`END`])
    /// and every node has exactly one outgoing edge.
    pub fn compile(self) -> Result<Graph> {
        if let Some(d) = self.duplicate {
            bail!("invalid graph: {d}");
        }
        let Some(entry) = self.entry else {
            bail!("invalid graph: no entry node");
        };
        if !self.nodes.contains_key(entry) {
            bail!("invalid graph: entry '{entry}' is not a node");
        }
        let known = |name: &str| name == END || self.nodes.contains_key(name);
        for (from, edge) in &self.edges {
            if !self.nodes.contains_key(from) {
                bail!("invalid graph: edge from unknown node '{from}'");
            }
            let targets: &[&str] = match edge {
                Edge::Direct(to) => std::slice::from_ref(to),
                Edge::Conditional { targets, .. } => targets,
            };
            if targets.is_empty() {
                bail!("invalid graph: conditional edge from '{from}' has no targets");
            }
            if let Some(bad) = targets.iter().copied().find(|t| !known(t)) {
                bail!("invalid graph: edge '{from}' -> '{bad}' targets an unknown node");
            }
        }
        if let Some(orphan) = self.nodes.keys().find(|n| !self.edges.contains_key(*n)) {
            bail!("invalid graph: node '{orphan}' has no outgoing edge");
        }
        Ok(Graph {
            nodes: self.nodes,
            edges: self.edges,
            entry,
        })
    }
}

// ── Graph ────────────────────────────────────────────────────────────────

#[derive(Default, Clone)]
pub struct RunOptions {
    /// Overall wall-clock budget for the run.
    pub deadline: Option<Duration>,
    pub events: Option<broadcast::Sender<WorkflowEvent>>,
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// Final state, or the best partial state when `error` is set.
    pub state: AgentState,
    pub error: Option<EngineError>,
}

impl RunOutcome {
    pub fn is_complete(&self) -> bool {
        self.error.is_none()
    }
}

/// A compiled workflow. Immutable, shareable across concurrent runs.
pub struct Graph {
    nodes: HashMap<&'static str, Arc<dyn Node>>,
    edges: HashMap<&'static str, Edge>,
    entry: &'static str,
}

impl Graph {
    pub fn builder() -> GraphBuilder {
        GraphBuilder::new()
    }

    pub fn entry(&self) -> &str {
        self.entry
    }

    pub fn node_names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.nodes.keys().copied().collect();
        names.sort_unstable();
        names
    }

    /// Engine backstop, independent of what the routers do.
    pub fn hard_limit(state: &AgentState) -> u32 {
        state.step_ceiling.saturating_mul(2).max(1)
    }

    pub async fn run(&self, initial: AgentState, opts: &RunOptions) -> RunOutcome {
        let started = Instant::now();
        let deadline = opts.deadline.map(|d| started + d);
        let emit = |event: WorkflowEvent| {
            if let Some(tx) = &opts.events {
                let _ = tx.send(event);
            }
        };

        let mut state = initial;
        let mut current: &'static str = self.entry;
        let hard_limit = Self::hard_limit(&state);

        let error = loop {
            if current == END {
                break None;
            }
            if state.step_count >= hard_limit {
                warn!(node = current, limit = hard_limit, "hard step limit reached, stopping");
                break Some(EngineError::StepLimit {
                    node: current.to_string(),
                    limit: hard_limit,
                });
            }
            let Some(node) = self.nodes.get(current) else {
                break Some(EngineError::UnknownRoute {
                    from: current.to_string(),
                    to: current.to_string(),
                });
            };

            info!(node = current, step = state.step_count, "running node");
            emit(WorkflowEvent::NodeStarted {
                node: current.to_string(),
                step: state.step_count,
            });

            let patch = match deadline {
                Some(at) => match tokio::time::timeout_at(at, node.run(&state)).await {
                    Ok(patch) => patch,
                    Err(_) => {
                        warn!(
                            node = current,
                            elapsed_ms = started.elapsed().as_millis() as u64,
                            "deadline exceeded, returning partial state"
                        );
                        break Some(EngineError::DeadlineExceeded {
                            node: current.to_string(),
                        });
                    }
                },
                None => node.run(&state).await,
            };

            let degraded = !patch.degraded.items().is_empty();
            if degraded {
                warn!(node = current, "node completed with degraded output");
            }
            state.apply(patch);
            state.step_count += 1;
            emit(WorkflowEvent::NodeFinished {
                node: current.to_string(),
                step: state.step_count,
                degraded,
            });

            let next = match self.edges.get(current) {
                Some(Edge::Direct(to)) => *to,
                Some(Edge::Conditional { targets, router }) => {
                    let to = router(&state);
                    if !targets.contains(&to) {
                        break Some(EngineError::UnknownRoute {
                            from: current.to_string(),
                            to: to.to_string(),
                        });
                    }
                    to
                }
                None => END,
            };
            debug!(from = current, to = next, "routed");
            emit(WorkflowEvent::Routed {
                from: current.to_string(),
                to: next.to_string(),
            });
            current = next;
        };

        info!(
            steps = state.step_count,
            elapsed_ms = started.elapsed().as_millis() as u64,
            complete = error.is_none(),
            "workflow finished"
        );
        emit(WorkflowEvent::Terminated {
            steps: state.step_count,
            error: error.as_ref().map(ToString::to_string),
        });
        RunOutcome { state, error }
    }
}
