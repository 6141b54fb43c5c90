//! Read-only HTTP view of the coordinator.
//!
//!     GET /api/state  -> PlantState as json
//!     GET /api/peers  -> which peers have connected

use super::barrier::StartupBarrier;
use crate::domain::PlantState;
use crate::state::SharedPlantState;
use anyhow::{Context, Result};
use axum::{extract::State, response::Json, routing::get, Router};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

#[derive(Clone)]
struct StatusState {
    plant: SharedPlantState,
    barrier: Arc<StartupBarrier>,
}

pub fn router(plant: SharedPlantState, barrier: Arc<StartupBarrier>) -> Router {
    Router::new()
        .route("/api/state", get(state_handler))
        .route("/api/peers", get(peers_handler))
        .layer(CorsLayer::permissive())
        .with_state(StatusState { plant, barrier })
}

pub async fn run_status_api(bind: &str, plant: SharedPlantState, barrier: Arc<StartupBarrier>) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("status api could not bind {}", bind))?;
    tracing::info!(addr = %bind, "[STATUS] api listening");
    axum::serve(listener, router(plant, barrier)).await?;
    Ok(())
}

async fn state_handler(State(status): State<StatusState>) -> Json<PlantState> {
    Json(status.plant.get())
}

async fn peers_handler(State(status): State<StatusState>) -> Json<serde_json::Value> {
    let flags = status.barrier.flags();
    Json(serde_json::json!({
        "display": flags.display_ready,
        "actuator": flags.actuator_ready,
        "released": flags.released(),
    }))
}
