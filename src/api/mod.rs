//! HTTP surface of the control plane: agent registration and CRUD, the REST
//! heartbeat fallback, command issuing, and the WebSocket upgrade route.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::dispatch::Dispatcher;
use crate::hub::{Hub, Writeback};
use crate::store::ControlStore;

pub mod agents;

/// Shared state for all HTTP and WebSocket handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ControlStore>,
    pub hub: Hub,
    pub writeback: Writeback,
    pub dispatcher: Dispatcher,
}

impl AppState {
    /// Wire up hub, writeback worker and dispatcher around a store. Spawns
    /// the registry and writeback tasks.
    pub fn new(store: Arc<dyn ControlStore>) -> Self {
        let writeback = Writeback::spawn(Arc::clone(&store));
        let (hub, runner) = Hub::new(writeback.clone());
        tokio::spawn(runner.run());
        let dispatcher = Dispatcher::new(hub.clone(), Arc::clone(&store));
        Self {
            store,
            hub,
            writeback,
            dispatcher,
        }
    }

    #[cfg(test)]
    pub async fn for_tests(store: Arc<crate::store::mock::MockStore>) -> Self {
        Self::new(store as Arc<dyn ControlStore>)
    }
}

/// Build the router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/agents/connect", get(crate::hub::ws::agent_connect))
        .route("/agents/register", post(agents::register_agent))
        .route("/agents", get(agents::list_agents))
        .route(
            "/agents/{agent_id}",
            get(agents::get_agent).delete(agents::deregister_agent),
        )
        .route("/agents/{agent_id}/heartbeat", post(agents::update_heartbeat))
        .route("/agents/{agent_id}/command", post(agents::send_command))
        .route("/agents/{agent_id}/commands", get(agents::list_commands))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve the API on the given address until the task is cancelled.
pub async fn serve(state: AppState, host: &str, port: u16) -> anyhow::Result<()> {
    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Control plane listening on {addr}");
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "connectedAgents": state.hub.connected_count().await,
        "writeback": state.writeback.stats(),
    }))
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use super::*;
    use crate::store::mock::MockStore;

    #[tokio::test]
    async fn health_reports_ok() {
        let state = AppState::for_tests(Arc::new(MockStore::new())).await;
        let router = router(state);

        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let resp = router.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["connectedAgents"], 0);
        assert_eq!(body["writeback"]["droppedJobs"], 0);
        assert_eq!(body["writeback"]["writeFailures"], 0);
    }
}
