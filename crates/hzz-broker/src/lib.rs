//! hzz-broker: the broker daemon's HTTP surface and its SQLite journal.

pub mod handlers;
pub mod journal;

use anyhow::Context;
use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};

pub use handlers::ApiState;
pub use journal::SqliteJournal;

pub fn router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/health", get(handlers::handle_health))
        .route("/queues", get(handlers::handle_queue_stats))
        .route("/queues/{name}", post(handlers::handle_declare))
        .route("/queues/{name}/publish", post(handlers::handle_publish))
        .route("/queues/{name}/replay", post(handlers::handle_replay))
        .route("/queues/{name}/purge", post(handlers::handle_purge))
        .route("/channels", post(handlers::handle_open_channel))
        .route("/channels/{id}", delete(handlers::handle_close_channel))
        .route("/channels/{id}/receive", post(handlers::handle_receive))
        .route("/channels/{id}/ack", post(handlers::handle_ack))
        .route("/channels/{id}/nack", post(handlers::handle_nack))
        .route("/broker/shutdown", post(handlers::handle_shutdown))
        .with_state(state);

    Router::new().nest("/api", api_routes).layer(cors)
}

/// Bind `addr` and serve until the state's shutdown channel fires.
pub async fn serve(state: ApiState, addr: &str) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind broker API on {addr}"))?;
    tracing::info!(addr, "broker API listening");
    serve_listener(state, listener).await
}

pub async fn serve_listener(
    state: ApiState,
    listener: tokio::net::TcpListener,
) -> anyhow::Result<()> {
    let mut shutdown = state.shutdown_tx.subscribe();
    let app = router(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await?;
    tracing::info!("broker API stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytes::Bytes;
    use hzz_services::{Broker, BrokerError, HttpBroker, MemoryBroker};

    use super::*;

    async fn spawn_daemon() -> (ApiState, HttpBroker, tokio::task::JoinHandle<()>) {
        let state = ApiState::new(MemoryBroker::new());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let server_state = state.clone();
        let handle = tokio::spawn(async move {
            serve_listener(server_state, listener).await.unwrap();
        });
        (state, HttpBroker::new(&url), handle)
    }

    #[tokio::test]
    async fn http_round_trip() {
        let (state, client, handle) = spawn_daemon().await;
        client.ping().await.unwrap();

        let body = Bytes::from_static(b"\x00binary\xffbody");
        client.publish("task_queue", body.clone()).await.unwrap();
        let ch = client.open_channel(1).await.unwrap();
        let d = client
            .receive(ch, &["shutdown_queue", "task_queue"], Duration::from_millis(200))
            .await
            .unwrap()
            .unwrap();
        assert_eq!((d.queue.as_str(), &d.body), ("task_queue", &body));
        client.ack(ch, d.tag).await.unwrap();

        // Acking twice is an error that survives the HTTP boundary.
        assert_eq!(
            client.ack(ch, d.tag).await,
            Err(BrokerError::UnknownDelivery { channel: ch, tag: d.tag })
        );
        assert!(client
            .receive(ch, &["task_queue"], Duration::from_millis(50))
            .await
            .unwrap()
            .is_none());

        client.publish("task_queue", body.clone()).await.unwrap();
        let d = client
            .receive(ch, &["task_queue"], Duration::from_millis(200))
            .await
            .unwrap()
            .unwrap();
        client.nack(ch, d.tag, false).await.unwrap();
        assert_eq!(client.replay_dead_letters("task_queue").await.unwrap(), 1);
        assert_eq!(client.purge("task_queue").await.unwrap(), 1);

        let stats = client.queue_stats().await.unwrap();
        let q = stats.iter().find(|s| s.name == "task_queue").unwrap();
        assert_eq!((q.published, q.dead_lettered, q.ready), (2, 1, 0));

        client.close_channel(ch).await.unwrap();
        assert_eq!(
            client.close_channel(ch).await,
            Err(BrokerError::UnknownChannel(ch))
        );

        client.terminate().await.unwrap();
        assert!(state.broker.is_closed());
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
