//! Crawler service entry point: ledger-backed crawl pipeline plus the admin
//! HTTP surface.

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use inquest_core::config::{load_dotenv, Config};
use inquest_core::namespace::NamespaceBuilder;
use inquest_core::render::RenderClient;
use inquest_core::AgentType;
use inquest_crawler::http::{build_router, AdminState};
use inquest_crawler::CrawlerPipeline;
use inquest_ledger::{CrawlingLedger, Ledger};
use inquest_llm::{AgentConfigStore, ModelRegistry};
use inquest_memory::VectorStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = Config::from_env();
    config.log_summary();

    // Ledger failure at startup is fatal.
    let ledger = Ledger::connect(&config.redis).await?;
    let crawling_ledger = CrawlingLedger::new(ledger);

    let agent_store = AgentConfigStore::load()?;
    let registry = ModelRegistry::new(&config.llm, agent_store);
    let embedder = registry.provider_for(AgentType::Semantics);
    let store = VectorStore::new(&config.chroma, embedder);

    let collection = NamespaceBuilder::new(&config.namespace).global_data(&["scout", "crawler"]);
    let renderer = RenderClient::new(&config.renderer);

    let pipeline = CrawlerPipeline::start(
        config.crawler.clone(),
        crawling_ledger.clone(),
        store,
        collection,
        renderer,
    );

    let state = Arc::new(AdminState {
        ledger: crawling_ledger,
    });
    let app = build_router(state);

    let addr = format!("0.0.0.0:{}", config.crawler.port);
    info!(addr, "crawler admin listening");
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    info!("shutting down crawler pipeline");
    pipeline.stop().await;
    Ok(())
}
