//! Broker seam: the queueing contract every role talks through.
//!
//! Semantics follow a work-queue broker with manual acknowledgement:
//!
//!   - queues are durable and FIFO; declaring is idempotent and publishing
//!     or receiving on an undeclared queue declares it
//!   - a consumer opens a channel with a prefetch limit; a delivery stays
//!     unacked on that channel until acked or nacked
//!   - closing a channel (or losing it to lease expiry) requeues every
//!     unacked delivery at the head of its queue, flagged `redelivered`
//!   - nack without requeue moves the body to `<queue>.dlq`
//!
//! Two implementations: [`MemoryBroker`](crate::memory_broker::MemoryBroker)
//! (in-process, also the engine behind the broker daemon) and
//! [`HttpBroker`](crate::http_broker::HttpBroker) (client for the daemon).

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use hzz_core::wire::queues;

pub type ChannelId = u64;
pub type DeliveryTag = u64;

/// One message handed to a consumer channel.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub tag: DeliveryTag,
    /// Queue the message was taken from.
    pub queue: String,
    pub body: Bytes,
    /// True if this body was delivered before and never acked.
    pub redelivered: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub name: String,
    /// Messages waiting for a consumer.
    pub ready: usize,
    /// Messages delivered but not yet acked.
    pub unacked: usize,
    /// Total publishes since the broker started.
    pub published: u64,
    /// Total messages moved from this queue to its dead-letter queue.
    pub dead_lettered: u64,
}

#[async_trait]
pub trait Broker: Send + Sync {
    /// Cheap liveness probe, used by connect-with-retry.
    async fn ping(&self) -> Result<(), BrokerError>;

    async fn declare_queue(&self, queue: &str) -> Result<(), BrokerError>;

    async fn publish(&self, queue: &str, body: Bytes) -> Result<(), BrokerError>;

    /// Open a consumer channel. `prefetch` = 0 means unlimited.
    async fn open_channel(&self, prefetch: u16) -> Result<ChannelId, BrokerError>;

    /// Take the next message from the first non-empty queue in `queues`,
    /// waiting up to `wait` for one to arrive. `Ok(None)` on timeout.
    ///
    /// Queue order is priority order: earlier queues are always drained
    /// first.
    async fn receive(
        &self,
        channel: ChannelId,
        queues: &[&str],
        wait: Duration,
    ) -> Result<Option<Delivery>, BrokerError>;

    async fn ack(&self, channel: ChannelId, tag: DeliveryTag) -> Result<(), BrokerError>;

    /// Reject a delivery. `requeue = false` dead-letters it.
    async fn nack(
        &self,
        channel: ChannelId,
        tag: DeliveryTag,
        requeue: bool,
    ) -> Result<(), BrokerError>;

    /// Close a channel, requeueing whatever it still holds.
    async fn close_channel(&self, channel: ChannelId) -> Result<(), BrokerError>;

    async fn queue_stats(&self) -> Result<Vec<QueueStats>, BrokerError>;

    /// Move every message in `<queue>.dlq` back onto `queue`. Returns how
    /// many were moved.
    async fn replay_dead_letters(&self, queue: &str) -> Result<usize, BrokerError>;

    /// Drop every ready message in `queue`. Returns how many were dropped.
    async fn purge(&self, queue: &str) -> Result<usize, BrokerError>;

    /// Stop the broker. Later calls fail with [`BrokerError::Closed`].
    async fn terminate(&self) -> Result<(), BrokerError> {
        Ok(())
    }
}

/// Declare every pipeline queue.
pub async fn declare_pipeline_queues(broker: &dyn Broker) -> Result<(), BrokerError> {
    for queue in queues::ALL {
        broker.declare_queue(queue).await?;
    }
    Ok(())
}

/// Probe the broker until it answers, sleeping `delay` between attempts.
///
/// Never gives up: a role started before its broker waits for it.
pub async fn connect_with_retry(broker: &dyn Broker, delay: Duration) {
    let mut attempt: u64 = 0;
    loop {
        attempt += 1;
        match broker.ping().await {
            Ok(()) => {
                if attempt > 1 {
                    tracing::info!(attempt, "connected to broker");
                }
                return;
            }
            Err(e) => {
                tracing::warn!(
                    attempt,
                    error = %e,
                    retry_in_secs = delay.as_secs_f64(),
                    "broker unavailable, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BrokerError {
    #[error("broker unreachable: {0}")]
    Unreachable(String),

    #[error("unknown channel {0}")]
    UnknownChannel(ChannelId),

    #[error("unknown delivery tag {tag} on channel {channel}")]
    UnknownDelivery { channel: ChannelId, tag: DeliveryTag },

    #[error("broker is shut down")]
    Closed,

    #[error("journal error: {0}")]
    Journal(String),

    #[error("broker protocol error: {0}")]
    Protocol(String),
}

impl BrokerError {
    /// Errors that mean the broker itself is gone, not that one request was
    /// bad.
    pub fn is_connection(&self) -> bool {
        matches!(self, BrokerError::Unreachable(_) | BrokerError::Closed)
    }
}
