//! Queue depth, dead-letter, replay and purge commands.

use anyhow::Result;
use serde::Deserialize;

use super::http::{base_url, get_json, post_json};

const DLQ_SUFFIX: &str = ".dlq";

// ── Response types ────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct StatusResponse {
    status: String,
}

#[derive(Deserialize)]
struct QueuesResponse {
    queues: Vec<QueueStats>,
}

#[derive(Deserialize)]
struct QueueStats {
    name: String,
    ready: usize,
    unacked: usize,
    published: u64,
    dead_lettered: u64,
}

#[derive(Deserialize)]
struct CountResponse {
    count: usize,
}

/// `task_queue.dlq` and `task_queue` both name the source queue `task_queue`.
fn source_queue(name: &str) -> &str {
    name.strip_suffix(DLQ_SUFFIX).unwrap_or(name)
}

// ── Commands ──────────────────────────────────────────────────────────────────

pub async fn cmd_status(broker: &str) -> Result<()> {
    let health: StatusResponse = get_json(&format!("{}/health", base_url(broker))).await?;
    let resp: QueuesResponse = get_json(&format!("{}/queues", base_url(broker))).await?;

    println!("═══════════════════════════════════════════════════════════════");
    println!("  Broker {broker} ({})", health.status);
    println!("═══════════════════════════════════════════════════════════════");
    println!(
        "  {:<22} {:>8} {:>8} {:>10} {:>8}",
        "queue", "ready", "unacked", "published", "dlq'd"
    );
    for q in &resp.queues {
        println!(
            "  {:<22} {:>8} {:>8} {:>10} {:>8}",
            q.name, q.ready, q.unacked, q.published, q.dead_lettered
        );
    }
    Ok(())
}

pub async fn cmd_dlq(broker: &str) -> Result<()> {
    let resp: QueuesResponse = get_json(&format!("{}/queues", base_url(broker))).await?;
    let dead: Vec<&QueueStats> = resp
        .queues
        .iter()
        .filter(|q| q.name.ends_with(DLQ_SUFFIX) && q.ready > 0)
        .collect();

    if dead.is_empty() {
        println!("No dead letters.");
        return Ok(());
    }
    for q in dead {
        println!("  {:<26} {:>6} message(s)", q.name, q.ready);
    }
    println!();
    println!("Replay with: hzz-ctl replay <queue>");
    Ok(())
}

pub async fn cmd_replay(broker: &str, queue: &str) -> Result<()> {
    let queue = source_queue(queue);
    let resp: CountResponse =
        post_json(&format!("{}/queues/{queue}/replay", base_url(broker))).await?;
    println!("Replayed {} message(s) onto {queue}.", resp.count);
    Ok(())
}

pub async fn cmd_purge(broker: &str, queue: &str) -> Result<()> {
    let resp: CountResponse =
        post_json(&format!("{}/queues/{queue}/purge", base_url(broker))).await?;
    println!("Purged {} message(s) from {queue}.", resp.count);
    Ok(())
}
