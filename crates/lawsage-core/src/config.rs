use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Result};

use crate::retry::RetryPolicy;
use crate::state::DEFAULT_STEP_CEILING;

/// Full application configuration.
/// Process env wins over `.env`; every key has a default.
#[derive(Debug, Clone)]
pub struct Config {
    // Generation
    /// "gemini" (default) or "ollama".
    pub backend: String,
    pub model: String,
    pub gemini_api_key: String,
    pub gemini_base_url: String,
    pub ollama_url: String,

    // Authority index
    pub courtlistener_api_key: String,
    pub courtlistener_base_url: String,

    // Workflow tuning
    pub step_ceiling: u32,
    pub deadline_s: u64,
    pub verify_concurrency: usize,
    pub confidence_threshold: f64,
    pub retry_max_attempts: u32,
    pub retry_base_ms: u64,
    pub retry_max_ms: u64,
    pub retrieval_top_k: usize,

    /// Optional JSON file of documents loaded into the lexical index.
    pub corpus_path: String,
    /// "text" (default) or "json".
    pub log_format: String,
}

const KEYS: &[&str] = &[
    "LAWSAGE_BACKEND",
    "LAWSAGE_MODEL",
    "GEMINI_API_KEY",
    "GEMINI_BASE_URL",
    "OLLAMA_URL",
    "COURTLISTENER_API_KEY",
    "COURTLISTENER_BASE_URL",
    "LAWSAGE_STEP_CEILING",
    "LAWSAGE_DEADLINE_S",
    "LAWSAGE_VERIFY_CONCURRENCY",
    "LAWSAGE_CONFIDENCE_THRESHOLD",
    "LAWSAGE_RETRY_MAX_ATTEMPTS",
    "LAWSAGE_RETRY_BASE_MS",
    "LAWSAGE_RETRY_MAX_MS",
    "LAWSAGE_RETRIEVAL_TOP_K",
    "LAWSAGE_CORPUS",
    "LAWSAGE_LOG_FORMAT",
];

pub fn parse_dotenv(path: &Path) -> HashMap<String, String> {
    let mut map = HashMap::new();
    let Ok(contents) = std::fs::read_to_string(path) else {
        return map;
    };
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((k, v)) = line.split_once('=') {
            let v = v.trim().trim_matches('"');
            map.insert(k.trim().to_string(), v.to_string());
        }
    }
    map
}

fn get_str(key: &str, vars: &HashMap<String, String>, default: &str) -> String {
    vars.get(key).cloned().unwrap_or_else(|| default.to_string())
}

fn get_u32(key: &str, vars: &HashMap<String, String>, default: u32) -> u32 {
    vars.get(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn get_u64(key: &str, vars: &HashMap<String, String>, default: u64) -> u64 {
    vars.get(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn get_usize(key: &str, vars: &HashMap<String, String>, default: usize) -> usize {
    vars.get(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn get_f64(key: &str, vars: &HashMap<String, String>, default: f64) -> f64 {
    vars.get(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_env_with_dotenv(Path::new(".env"))
    }

    pub fn from_env_with_dotenv(dotenv: &Path) -> Result<Self> {
        let mut vars = parse_dotenv(dotenv);
        for key in KEYS {
            if let Ok(v) = std::env::var(key) {
                vars.insert((*key).to_string(), v);
            }
        }
        Self::from_map(&vars)
    }

    pub fn from_map(vars: &HashMap<String, String>) -> Result<Self> {
        let config = Self {
            backend: get_str("LAWSAGE_BACKEND", vars, "gemini"),
            model: get_str("LAWSAGE_MODEL", vars, "gemini-2.5-flash"),
            gemini_api_key: get_str("GEMINI_API_KEY", vars, ""),
            gemini_base_url: get_str("GEMINI_BASE_URL", vars, "https://generativelanguage.googleapis.com"),
            ollama_url: get_str("OLLAMA_URL", vars, "http://localhost:11434"),
            courtlistener_api_key: get_str("COURTLISTENER_API_KEY", vars, ""),
            courtlistener_base_url: get_str(
                "COURTLISTENER_BASE_URL",
                vars,
                "https://www.courtlistener.com/api/rest/v4",
            ),
            step_ceiling: get_u32("LAWSAGE_STEP_CEILING", vars, DEFAULT_STEP_CEILING),
            deadline_s: get_u64("LAWSAGE_DEADLINE_S", vars, 180),
            verify_concurrency: get_usize("LAWSAGE_VERIFY_CONCURRENCY", vars, 4).max(1),
            confidence_threshold: get_f64("LAWSAGE_CONFIDENCE_THRESHOLD", vars, 0.4),
            retry_max_attempts: get_u32("LAWSAGE_RETRY_MAX_ATTEMPTS", vars, 2).max(1),
            retry_base_ms: get_u64("LAWSAGE_RETRY_BASE_MS", vars, 2_000),
            retry_max_ms: get_u64("LAWSAGE_RETRY_MAX_MS", vars, 4_000),
            retrieval_top_k: get_usize("LAWSAGE_RETRIEVAL_TOP_K", vars, 5),
            corpus_path: get_str("LAWSAGE_CORPUS", vars, ""),
            log_format: get_str("LAWSAGE_LOG_FORMAT", vars, "text"),
        };

        if !matches!(config.backend.as_str(), "gemini" | "ollama") {
            bail!("LAWSAGE_BACKEND must be 'gemini' or 'ollama', got '{}'", config.backend);
        }
        if !(0.0..=1.0).contains(&config.confidence_threshold) {
            bail!(
                "LAWSAGE_CONFIDENCE_THRESHOLD must be within [0, 1], got {}",
                config.confidence_threshold
            );
        }
        Ok(config)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_max_attempts,
            base_delay: Duration::from_millis(self.retry_base_ms),
            max_delay: Duration::from_millis(self.retry_max_ms),
        }
    }

    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.deadline_s)
    }
}
