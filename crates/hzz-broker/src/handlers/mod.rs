//! HTTP API handlers: a `MemoryBroker` exposed as JSON.

pub mod channels;
pub mod queues;

use axum::http::StatusCode;
use axum::Json;

use hzz_services::broker_api::{ApiError, StatusResponse};
use hzz_services::{BrokerError, MemoryBroker};

#[derive(Clone)]
pub struct ApiState {
    pub broker: MemoryBroker,
    /// Stops the HTTP server and background loops.
    pub shutdown_tx: tokio::sync::broadcast::Sender<()>,
}

impl ApiState {
    pub fn new(broker: MemoryBroker) -> Self {
        let (shutdown_tx, _) = tokio::sync::broadcast::channel(4);
        Self {
            broker,
            shutdown_tx,
        }
    }
}

pub type ApiFailure = (StatusCode, Json<ApiError>);

// ── Shared helpers ────────────────────────────────────────────────────────────

fn failure(e: BrokerError) -> ApiFailure {
    let status = match &e {
        BrokerError::UnknownChannel(_) | BrokerError::UnknownDelivery { .. } => {
            StatusCode::NOT_FOUND
        }
        BrokerError::Closed => StatusCode::SERVICE_UNAVAILABLE,
        BrokerError::Protocol(_) => StatusCode::BAD_REQUEST,
        BrokerError::Unreachable(_) => StatusCode::BAD_GATEWAY,
        BrokerError::Journal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(ApiError::from(&e)))
}

fn ok() -> Json<StatusResponse> {
    Json(StatusResponse {
        status: "ok".to_string(),
    })
}

fn bad_request(message: impl Into<String>) -> ApiFailure {
    failure(BrokerError::Protocol(message.into()))
}

// Re-export handler functions for use in router setup.
pub use channels::{
    handle_ack, handle_close_channel, handle_nack, handle_open_channel, handle_receive,
};
pub use queues::{
    handle_declare, handle_health, handle_publish, handle_purge, handle_queue_stats,
    handle_replay, handle_shutdown,
};
