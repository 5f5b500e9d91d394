//! Shutdown signals and broker stop.

use anyhow::{Result, ensure};
use serde::{Deserialize, Serialize};

use super::http::{base_url, post_json, post_json_body};

const SHUTDOWN_QUEUE: &str = "shutdown_queue";
const SHUTDOWN_BODY: &[u8] = b"\"shutdown\"";

#[derive(Serialize)]
struct PublishRequest {
    body: String,
}

#[derive(Deserialize)]
struct StatusResponse {
    status: String,
}

/// Publish `count` shutdown messages; each stops one worker.
pub async fn cmd_shutdown_workers(broker: &str, count: usize) -> Result<()> {
    ensure!(count > 0, "worker count must be at least 1");
    let url = format!("{}/queues/{SHUTDOWN_QUEUE}/publish", base_url(broker));
    let req = PublishRequest {
        body: hex::encode(SHUTDOWN_BODY),
    };
    for _ in 0..count {
        let _: StatusResponse = post_json_body(&url, &req).await?;
    }
    println!("Published {count} shutdown message(s).");
    Ok(())
}

pub async fn cmd_broker_stop(broker: &str) -> Result<()> {
    let resp: StatusResponse = post_json(&format!("{}/broker/shutdown", base_url(broker))).await?;
    println!("Broker: {}", resp.status);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shutdown_body_is_hex_json_string() {
        assert_eq!(hex::encode(SHUTDOWN_BODY), "2273687574646f776e22");
    }
}
