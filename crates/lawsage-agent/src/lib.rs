pub mod gemini;
pub mod instruction;
pub mod ollama;

use std::sync::Arc;

use anyhow::Result;
use lawsage_core::cache::ClientCache;
use lawsage_core::config::Config;
use lawsage_core::generation::GenerationService;
use tracing::info;

pub use gemini::GeminiClient;
pub use ollama::OllamaBackend;

/// Pick the generation backend named by `config.backend`. Gemini clients come
/// from `cache`, keyed by model and credentials.
pub fn backend_from_config(
    config: &Config,
    cache: &ClientCache<GeminiClient>,
) -> Result<Arc<dyn GenerationService>> {
    match config.backend.as_str() {
        "ollama" => {
            info!(model = %config.model, url = %config.ollama_url, "using ollama backend");
            Ok(Arc::new(OllamaBackend::new(&config.ollama_url, &config.model)))
        }
        _ => {
            let key = format!("gemini:{}:{}", config.model, config.gemini_api_key);
            let client = cache.get_or_try_insert_with(&key, || {
                Ok(GeminiClient::new(&config.gemini_api_key, &config.model)?
                    .with_base_url(&config.gemini_base_url))
            })?;
            info!(model = %config.model, "using gemini backend");
            let backend: Arc<dyn GenerationService> = client;
            Ok(backend)
        }
    }
}
