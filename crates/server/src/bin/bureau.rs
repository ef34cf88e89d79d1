//! The bureau: one process hosting the conductor, the orchestrator, every
//! worker, and the gateway's HTTP intake.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router as AxumRouter};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::Notify;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use url::Url;

use inquest_agent::{
    ArchitectAgent, ComputeAgent, DuckDuckGoSearch, GatewayAgent, PlannerAgent, RetrieveAgent,
    ScoutAgent,
};
use inquest_agent::worker::Cognition;
use inquest_bus::{spawn_agent, AgentRegistry, Envelope, Router, CONDUCTOR_ADDRESS};
use inquest_core::config::{load_dotenv, Config};
use inquest_core::namespace::NamespaceBuilder;
use inquest_core::render::RenderClient;
use inquest_core::{AgentType, UserQuery};
use inquest_llm::{AgentConfigStore, ModelRegistry};
use inquest_memory::{SharedMemory, VectorStore};
use inquest_orchestrator::{Conductor, Orchestrator};

/// The gateway's bus address.
const GATEWAY_ADDRESS: &str = "gateway-1";

#[derive(Clone)]
struct IntakeState {
    router: Router,
}

#[derive(Debug, Deserialize)]
struct SubmitRequest {
    text: String,
    request_id: String,
}

/// `POST /submit`: push the query into the gateway's inbox and return.
async fn submit(State(state): State<IntakeState>, Json(request): Json<SubmitRequest>) -> Json<Value> {
    info!(request_id = %request.request_id, "query submitted");
    let envelope = Envelope::Query(UserQuery::with_request_id(request.text, request.request_id));
    if let Err(e) = state.router.send("intake", GATEWAY_ADDRESS, envelope).await {
        warn!(error = %e, "failed to hand query to gateway");
        return Json(json!({ "status": "error" }));
    }
    Json(json!({ "status": "accepted" }))
}

fn cognition(registry: &ModelRegistry, agent_type: AgentType) -> Cognition {
    Cognition::new(registry.provider_for(agent_type), registry.spec_for(agent_type))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = Config::from_env();
    config.log_summary();

    let store = AgentConfigStore::load()?;
    let models = ModelRegistry::new(&config.llm, store.clone());

    let router = Router::new();
    let registry = AgentRegistry::new();
    let memory = SharedMemory::new();
    let shutdown = Arc::new(Notify::new());

    // Conductor + orchestrator.
    let orchestrator = Arc::new(Orchestrator::new(registry.clone(), memory.clone()));
    let conductor = Arc::new(Conductor::new(registry.clone(), memory.clone(), orchestrator));
    spawn_agent(conductor, router.clone(), CONDUCTOR_ADDRESS, shutdown.clone()).await;

    // Shared collaborators.
    let embedder = models.provider_for(AgentType::Semantics);
    let vector_store = VectorStore::new(&config.chroma, embedder);
    let collection = NamespaceBuilder::new(&config.namespace).global_data(&["scout", "crawler"]);
    let renderer = RenderClient::new(&config.renderer);

    // Workers.
    let planner = PlannerAgent::new(cognition(&models, AgentType::Planner), memory.clone(), &store)?;
    spawn_agent(Arc::new(planner), router.clone(), "planner-1", shutdown.clone()).await;

    let scout = ScoutAgent::new(
        cognition(&models, AgentType::Scout),
        memory.clone(),
        renderer,
        Arc::new(DuckDuckGoSearch::new()),
        &store,
    );
    spawn_agent(Arc::new(scout), router.clone(), "scout-1", shutdown.clone()).await;

    let retrieve = RetrieveAgent::new(
        cognition(&models, AgentType::Retrieve),
        memory.clone(),
        vector_store,
        collection,
        &store,
    );
    spawn_agent(Arc::new(retrieve), router.clone(), "retrieve-1", shutdown.clone()).await;

    let architect = ArchitectAgent::new(
        cognition(&models, AgentType::Synthesize),
        memory.clone(),
        &store,
    )?;
    spawn_agent(Arc::new(architect), router.clone(), "architect-1", shutdown.clone()).await;

    let compute = ComputeAgent::from_env(memory.clone());
    spawn_agent(Arc::new(compute), router.clone(), "compute-1", shutdown.clone()).await;

    let gateway = GatewayAgent::new(
        cognition(&models, AgentType::Speaker),
        &store,
        config.gateway.chat_server_url.clone(),
    )?;
    spawn_agent(Arc::new(gateway), router.clone(), GATEWAY_ADDRESS, shutdown.clone()).await;

    // HTTP intake on the port GATEWAY_ADDRESS names.
    let port = Url::parse(&config.gateway.submit_url)
        .ok()
        .and_then(|u| u.port())
        .unwrap_or(9000);
    let app = AxumRouter::new()
        .route("/submit", post(submit))
        .with_state(IntakeState { router });

    let addr = format!("0.0.0.0:{port}");
    info!(addr, "bureau intake listening");
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    info!("bureau shutting down");
    shutdown.notify_waiters();
    Ok(())
}
