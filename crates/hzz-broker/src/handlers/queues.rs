//! /health, /queues, /broker/shutdown handlers.

use axum::extract::{Path, State};
use axum::Json;
use bytes::Bytes;

use hzz_services::broker_api::{CountResponse, PublishRequest, QueuesResponse, StatusResponse};
use hzz_services::Broker;

use super::{bad_request, failure, ok, ApiFailure, ApiState};

// ── /health ───────────────────────────────────────────────────────────────────

pub async fn handle_health(
    State(state): State<ApiState>,
) -> Result<Json<StatusResponse>, ApiFailure> {
    state.broker.ping().await.map_err(failure)?;
    Ok(ok())
}

// ── /queues ───────────────────────────────────────────────────────────────────

pub async fn handle_queue_stats(
    State(state): State<ApiState>,
) -> Result<Json<QueuesResponse>, ApiFailure> {
    let queues = state.broker.queue_stats().await.map_err(failure)?;
    Ok(Json(QueuesResponse { queues }))
}

pub async fn handle_declare(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> Result<Json<StatusResponse>, ApiFailure> {
    state.broker.declare_queue(&name).await.map_err(failure)?;
    Ok(ok())
}

pub async fn handle_publish(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    Json(req): Json<PublishRequest>,
) -> Result<Json<StatusResponse>, ApiFailure> {
    let body = hex::decode(&req.body).map_err(|_| bad_request("body is not hex"))?;
    state
        .broker
        .publish(&name, Bytes::from(body))
        .await
        .map_err(failure)?;
    Ok(ok())
}

pub async fn handle_replay(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> Result<Json<CountResponse>, ApiFailure> {
    let count = state
        .broker
        .replay_dead_letters(&name)
        .await
        .map_err(failure)?;
    Ok(Json(CountResponse { count }))
}

pub async fn handle_purge(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> Result<Json<CountResponse>, ApiFailure> {
    let count = state.broker.purge(&name).await.map_err(failure)?;
    Ok(Json(CountResponse { count }))
}

// ── /broker/shutdown ──────────────────────────────────────────────────────────

pub async fn handle_shutdown(State(state): State<ApiState>) -> Json<StatusResponse> {
    tracing::info!("shutdown requested via API");
    let _ = state.broker.terminate().await;
    let _ = state.shutdown_tx.send(());
    Json(StatusResponse {
        status: "shutting down".to_string(),
    })
}
