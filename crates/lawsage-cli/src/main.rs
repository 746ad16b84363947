use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use lawsage_agent::backend_from_config;
use lawsage_core::cache::ClientCache;
use lawsage_core::config::Config;
use lawsage_core::retrieval::{Bm25Index, EmptyIndex, HybridRetriever, LexicalSearch};
use lawsage_core::retry::RetryingGenerator;
use lawsage_core::types::ChatMessage;
use lawsage_domains::legal::courtlistener::CourtListenerClient;
use lawsage_domains::{LegalAssistant, LegalServices};
use tracing::{error, info};

const DEFAULT_LOG_FILTER: &str = "lawsage=info,lawsage_core=info,lawsage_domains=info,lawsage_agent=info";

#[derive(Parser, Debug)]
#[command(name = "lawsage", version, about = "Grounded legal research memo for one question")]
struct Cli {
    /// The legal question or situation, in plain language.
    input: String,

    /// Jurisdiction the question arises in, e.g. "California" or "Federal".
    #[arg(short, long, env = "LAWSAGE_JURISDICTION")]
    jurisdiction: String,

    /// Restrict retrieval to documents filed under this case.
    #[arg(long)]
    case_id: Option<String>,

    /// JSON file with earlier turns: [{"role": "user", "content": "..."}].
    #[arg(long)]
    history: Option<PathBuf>,

    /// Override LAWSAGE_STEP_CEILING for this run.
    #[arg(long)]
    step_ceiling: Option<u32>,

    /// Pretty-print the JSON response.
    #[arg(long)]
    pretty: bool,
}

fn init_logging(format: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into());
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_history(path: Option<&PathBuf>) -> Result<Vec<ChatMessage>> {
    let Some(path) = path else {
        return Ok(Vec::new());
    };
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading history {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing history {}", path.display()))
}

fn lexical_index(config: &Config) -> Result<Arc<dyn LexicalSearch>> {
    if config.corpus_path.is_empty() {
        return Ok(Arc::new(EmptyIndex));
    }
    let index = Bm25Index::from_json_file(std::path::Path::new(&config.corpus_path))?;
    info!(documents = index.len(), path = %config.corpus_path, "corpus loaded");
    Ok(Arc::new(index))
}

fn to_json<T: serde::Serialize>(value: &T, pretty: bool) -> Result<String> {
    Ok(if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env()?;
    init_logging(&config.log_format);

    let clients = ClientCache::new();
    let backend = backend_from_config(&config, &clients)?;
    let generator = Arc::new(RetryingGenerator::new(backend, config.retry_policy()));
    let authority = Arc::new(
        CourtListenerClient::new(&config.courtlistener_api_key).with_base_url(&config.courtlistener_base_url),
    );
    let retriever = Arc::new(
        HybridRetriever::new(lexical_index(&config)?, Arc::new(EmptyIndex)).with_top_k(config.retrieval_top_k),
    );
    let services = Arc::new(LegalServices::from_config(&config, generator, authority, retriever));

    let assistant = LegalAssistant::new(services)?
        .with_step_ceiling(cli.step_ceiling.unwrap_or(config.step_ceiling))
        .with_deadline(config.deadline());

    let history = load_history(cli.history.as_ref())?;
    match assistant
        .invoke(&cli.input, &cli.jurisdiction, cli.case_id.as_deref(), history)
        .await
    {
        Ok(response) => {
            println!("{}", to_json(&response, cli.pretty)?);
            Ok(())
        }
        Err(e) => {
            error!(kind = ?e.kind(), "{e}");
            if let Some(partial) = e.partial() {
                println!("{}", to_json(partial, cli.pretty)?);
            }
            Err(e.into())
        }
    }
}
