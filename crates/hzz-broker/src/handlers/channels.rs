//! /channels handlers: consumer channels, long-poll receive, ack/nack.

use std::time::Duration;

use axum::extract::{Path, State};
use axum::Json;

use hzz_services::broker_api::{
    AckRequest, NackRequest, OpenChannelRequest, OpenChannelResponse, ReceiveRequest,
    ReceiveResponse, StatusResponse, MAX_RECEIVE_WAIT_MS,
};
use hzz_services::{Broker, ChannelId};

use super::{bad_request, failure, ok, ApiFailure, ApiState};

pub async fn handle_open_channel(
    State(state): State<ApiState>,
    Json(req): Json<OpenChannelRequest>,
) -> Result<Json<OpenChannelResponse>, ApiFailure> {
    let channel = state
        .broker
        .open_channel(req.prefetch)
        .await
        .map_err(failure)?;
    Ok(Json(OpenChannelResponse { channel }))
}

pub async fn handle_close_channel(
    State(state): State<ApiState>,
    Path(id): Path<ChannelId>,
) -> Result<Json<StatusResponse>, ApiFailure> {
    state.broker.close_channel(id).await.map_err(failure)?;
    Ok(ok())
}

pub async fn handle_receive(
    State(state): State<ApiState>,
    Path(id): Path<ChannelId>,
    Json(req): Json<ReceiveRequest>,
) -> Result<Json<ReceiveResponse>, ApiFailure> {
    if req.queues.is_empty() {
        return Err(bad_request("no queues to receive from"));
    }
    let queues: Vec<&str> = req.queues.iter().map(String::as_str).collect();
    let wait = Duration::from_millis(req.wait_ms.min(MAX_RECEIVE_WAIT_MS));
    let delivery = state
        .broker
        .receive(id, &queues, wait)
        .await
        .map_err(failure)?;
    Ok(Json(ReceiveResponse {
        delivery: delivery.map(Into::into),
    }))
}

pub async fn handle_ack(
    State(state): State<ApiState>,
    Path(id): Path<ChannelId>,
    Json(req): Json<AckRequest>,
) -> Result<Json<StatusResponse>, ApiFailure> {
    state.broker.ack(id, req.tag).await.map_err(failure)?;
    Ok(ok())
}

pub async fn handle_nack(
    State(state): State<ApiState>,
    Path(id): Path<ChannelId>,
    Json(req): Json<NackRequest>,
) -> Result<Json<StatusResponse>, ApiFailure> {
    state
        .broker
        .nack(id, req.tag, req.requeue)
        .await
        .map_err(failure)?;
    Ok(ok())
}
