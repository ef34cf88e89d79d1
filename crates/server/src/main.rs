//! Chat front-end entry point.

use tracing::info;
use tracing_subscriber::EnvFilter;

use inquest_core::config::{load_dotenv, Config};
use inquest_server::{build_router, ChatState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = Config::from_env();
    let state = ChatState::new(config.gateway.submit_url.clone());
    let app = build_router(state);

    let port: u16 = std::env::var("CHAT_SERVER_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080);
    let addr = format!("0.0.0.0:{port}");
    info!(addr, "chat server listening");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
