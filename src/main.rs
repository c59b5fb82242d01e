mod server;

use database::Database;
use llm_interface::OpenAiProvider;
use reddit_client::{DuckDuckGoSearch, RedditClient};
use research_core::AppConfig;
use research_pipeline::ResearchService;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str =
    "reddit_research=debug,research_pipeline=debug,reddit_client=debug,llm_interface=debug,database=debug,research_core=debug";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .init();

    tracing::info!("Starting Reddit Research Assistant");

    let config = AppConfig::load()?;
    config.validate()?;
    config.require_credentials()?;

    let db = Database::open(&config.storage).await?;
    let reddit = Arc::new(RedditClient::new(&config.reddit)?);
    let web = Arc::new(DuckDuckGoSearch::new(&config.reddit.user_agent)?);
    let oracle = Arc::new(OpenAiProvider::new(&config.llm)?);
    tracing::info!("Using model {}", oracle.model());

    let service = ResearchService::new(db, reddit, web, oracle, config.limits);
    server::serve(Arc::new(service), &config.server.bind_addr).await
}
