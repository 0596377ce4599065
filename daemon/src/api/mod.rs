//! Optional HTTP surface over the running daemon.
//!
//! # Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/health` | Engine health report |
//! | GET | `/api/v1/results/latest` | Most recent probe result |
//! | GET | `/api/v1/results?limit=N` | Recent probe results, newest first |
//! | GET | `/api/v1/service/status` | Supervisor status of the unit |
//! | POST | `/api/v1/service/{action}` | `start`, `stop` or `restart` the unit |

pub mod handlers;
pub mod service;

use crate::engine::EngineHandle;
use crate::storage::Database;
use axum::Router;
use axum::routing::get;
use service::ServiceController;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tracing::info;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub engine: EngineHandle,
    pub results: Arc<Mutex<Database>>,
    pub service: Arc<ServiceController>,
}

impl ApiState {
    pub fn new(engine: EngineHandle, results: Database, service: ServiceController) -> Self {
        Self {
            engine,
            results: Arc::new(Mutex::new(results)),
            service: Arc::new(service),
        }
    }
}

pub fn build_router(state: ApiState) -> Router {
    let api_routes = Router::new()
        .route("/results", get(handlers::list_results))
        .route("/results/latest", get(handlers::latest_result))
        .route("/service/{action}", get(handlers::service_query).post(handlers::service_action))
        .with_state(state.clone());

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/health", get(handlers::health).with_state(state))
}

/// Serve until the engine has been asked to stop
pub async fn serve(listener: TcpListener, state: ApiState) -> anyhow::Result<()> {
    let engine = state.engine.clone();
    info!("API listening on {}", listener.local_addr()?);

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(async move { engine.stopped().await })
        .await?;

    info!("API server stopped");
    Ok(())
}
