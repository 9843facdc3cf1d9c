//! HTTP gateway for DeepDive.
//!
//! Serves the session channel (`/v1/sessions/{id}/ws`) and a small REST API
//! for health, tool declarations, stored history and the domain event log.
//!
//! Built on Axum; every request is traced through `TraceLayer`.

pub mod api_v1;
pub mod frames;
pub mod session;
pub mod ws;

#[cfg(test)]
pub(crate) mod test_helpers;

use axum::extract::DefaultBodyLimit;
use axum::{Router, response::Json, routing::get};
use serde::Serialize;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use deepdive_agent::StepOrchestrator;
use deepdive_config::AppConfig;
use deepdive_core::event::EventBus;

pub use frames::{ClientFrame, ServerFrame, SessionFrame};
pub use session::{Session, SessionRegistry};

/// Shared application state for the gateway.
pub struct GatewayState {
    pub orchestrator: Arc<StepOrchestrator>,
    pub event_bus: Arc<EventBus>,
    pub sessions: SessionRegistry,
}

impl GatewayState {
    pub fn new(orchestrator: Arc<StepOrchestrator>, event_bus: Arc<EventBus>) -> Self {
        Self {
            orchestrator,
            sessions: SessionRegistry::new(event_bus.clone()),
            event_bus,
        }
    }

    /// Build the provider, tool registry and orchestrator described by `config`.
    pub fn from_config(config: &AppConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let router = deepdive_providers::build_from_config(config);
        let provider = router
            .default()
            .ok_or("No default provider configured, set an API key")?;
        let tools = Arc::new(deepdive_tools::build_registry(config)?);
        let event_bus = Arc::new(EventBus::default());
        let orchestrator = Arc::new(StepOrchestrator::from_config(
            config,
            provider,
            tools,
            event_bus.clone(),
        ));
        Ok(Self::new(orchestrator, event_bus))
    }
}

pub type SharedState = Arc<GatewayState>;

/// Build the Axum router with all gateway routes.
pub fn build_router(state: SharedState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([axum::http::Method::GET, axum::http::Method::DELETE])
        .allow_headers([axum::http::header::CONTENT_TYPE])
        .max_age(std::time::Duration::from_secs(3600));

    Router::new()
        .route("/health", get(health_handler))
        .nest("/v1", api_v1::v1_router())
        .with_state(state)
        .layer(DefaultBodyLimit::max(1024 * 1024))
        .layer(cors)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

/// Serve the gateway on an already-bound listener.
pub async fn serve(listener: TcpListener, state: SharedState) -> std::io::Result<()> {
    axum::serve(listener, build_router(state)).await
}

/// Start the gateway HTTP server.
pub async fn start(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);
    let state = Arc::new(GatewayState::from_config(&config)?);

    info!(
        addr = %addr,
        model = %config.default_model,
        tools = ?state.orchestrator.tools().names(),
        "Gateway starting"
    );
    let listener = TcpListener::bind(&addr).await?;
    serve(listener, state).await?;

    Ok(())
}

// --- Handlers ---

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn health_endpoint() {
        let app = build_router(test_helpers::test_state(vec![]));

        let req = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn state_from_default_config() {
        let state = GatewayState::from_config(&AppConfig::default()).unwrap();
        assert_eq!(
            state.orchestrator.tools().names(),
            vec!["webSearch", "getUserTimezone"]
        );
    }

    #[test]
    fn bad_approval_config_fails_startup() {
        let mut config = AppConfig::default();
        config.agent.require_approval = vec!["deleteEverything".into()];
        assert!(GatewayState::from_config(&config).is_err());
    }
}
