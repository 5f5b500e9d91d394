//! In-process broker.
//!
//! All state sits behind one mutex; waiting consumers park on a `Notify`
//! that every state change wakes. With a [`Journal`] attached, every ready
//! or unacked message is mirrored to it and reloaded on startup, so queues
//! survive a broker restart.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{broadcast, Notify};

use hzz_core::wire::queues;

use crate::broker::{Broker, BrokerError, ChannelId, Delivery, DeliveryTag, QueueStats};

pub type MessageId = u64;

// ── Journal ───────────────────────────────────────────────────────────────────

/// A message as persisted by a [`Journal`].
#[derive(Debug, Clone, PartialEq)]
pub struct JournalEntry {
    pub id: MessageId,
    pub queue: String,
    pub body: Vec<u8>,
}

/// Durable mirror of broker contents. Calls happen under the broker lock, in
/// the order the broker applies them.
pub trait Journal: Send + Sync {
    fn append(&self, id: MessageId, queue: &str, body: &[u8]) -> Result<(), BrokerError>;

    /// The message now lives on `queue` (dead-lettering, replay).
    fn relocate(&self, id: MessageId, queue: &str) -> Result<(), BrokerError>;

    /// The message was acked or purged.
    fn remove(&self, id: MessageId) -> Result<(), BrokerError>;

    /// Every stored message, oldest first.
    fn load(&self) -> Result<Vec<JournalEntry>, BrokerError>;
}

// ── State ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct Message {
    id: MessageId,
    body: Bytes,
    redelivered: bool,
}

#[derive(Debug, Default)]
struct QueueState {
    ready: VecDeque<Message>,
    published: u64,
    dead_lettered: u64,
}

#[derive(Debug)]
struct ChannelState {
    prefetch: u16,
    next_tag: DeliveryTag,
    /// tag → (source queue, message)
    unacked: BTreeMap<DeliveryTag, (String, Message)>,
    last_seen: Instant,
}

impl ChannelState {
    fn has_capacity(&self) -> bool {
        self.prefetch == 0 || self.unacked.len() < self.prefetch as usize
    }
}

#[derive(Debug, Default)]
struct BrokerState {
    queues: BTreeMap<String, QueueState>,
    channels: HashMap<ChannelId, ChannelState>,
    next_message: MessageId,
    next_channel: ChannelId,
    closed: bool,
}

impl BrokerState {
    fn queue(&mut self, name: &str) -> &mut QueueState {
        self.queues.entry(name.to_string()).or_default()
    }

    /// Put a channel's unacked messages back at the head of their queues, in
    /// their original order.
    fn requeue_channel(&mut self, channel: ChannelState) -> usize {
        let count = channel.unacked.len();
        for (_, (queue, mut msg)) in channel.unacked.into_iter().rev() {
            msg.redelivered = true;
            self.queue(&queue).ready.push_front(msg);
        }
        count
    }
}

/// In-process broker. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
    notify: Arc<Notify>,
    journal: Option<Arc<dyn Journal>>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(BrokerState::default())),
            notify: Arc::new(Notify::new()),
            journal: None,
        }
    }

    /// A broker backed by `journal`, preloaded with whatever it holds.
    pub fn with_journal(journal: Arc<dyn Journal>) -> Result<Self, BrokerError> {
        let entries = journal.load()?;
        let mut state = BrokerState::default();
        for entry in &entries {
            state.queue(&entry.queue).ready.push_back(Message {
                id: entry.id,
                body: Bytes::from(entry.body.clone()),
                redelivered: true,
            });
            state.next_message = state.next_message.max(entry.id + 1);
        }
        if !entries.is_empty() {
            tracing::info!(messages = entries.len(), "restored queues from journal");
        }
        Ok(Self {
            state: Arc::new(Mutex::new(state)),
            notify: Arc::new(Notify::new()),
            journal: Some(journal),
        })
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn journal<F>(&self, f: F) -> Result<(), BrokerError>
    where
        F: FnOnce(&dyn Journal) -> Result<(), BrokerError>,
    {
        match &self.journal {
            Some(j) => f(j.as_ref()),
            None => Ok(()),
        }
    }

    /// Close every channel that has not been used for `lease`. Returns the
    /// number of channels closed.
    pub fn expire_idle_channels(&self, lease: Duration) -> usize {
        let now = Instant::now();
        let mut state = self.lock();
        let stale: Vec<ChannelId> = state
            .channels
            .iter()
            .filter(|(_, ch)| now.duration_since(ch.last_seen) > lease)
            .map(|(id, _)| *id)
            .collect();
        for id in &stale {
            if let Some(channel) = state.channels.remove(id) {
                let requeued = state.requeue_channel(channel);
                tracing::warn!(channel = id, requeued, "channel lease expired");
            }
        }
        drop(state);
        if !stale.is_empty() {
            self.notify.notify_waiters();
        }
        stale.len()
    }

    pub fn open_channels(&self) -> usize {
        self.lock().channels.len()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

/// Periodically expire idle channels until shutdown.
pub async fn lease_loop(
    broker: MemoryBroker,
    lease: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let period = (lease / 4).max(Duration::from_secs(1));
    let mut interval = tokio::time::interval(period);
    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            _ = interval.tick() => {
                broker.expire_idle_channels(lease);
            }
        }
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn ping(&self) -> Result<(), BrokerError> {
        if self.lock().closed {
            return Err(BrokerError::Closed);
        }
        Ok(())
    }

    async fn declare_queue(&self, queue: &str) -> Result<(), BrokerError> {
        let mut state = self.lock();
        if state.closed {
            return Err(BrokerError::Closed);
        }
        state.queue(queue);
        Ok(())
    }

    async fn publish(&self, queue: &str, body: Bytes) -> Result<(), BrokerError> {
        {
            let mut state = self.lock();
            if state.closed {
                return Err(BrokerError::Closed);
            }
            let id = state.next_message;
            self.journal(|j| j.append(id, queue, &body))?;
            state.next_message += 1;
            let q = state.queue(queue);
            q.ready.push_back(Message {
                id,
                body,
                redelivered: false,
            });
            q.published += 1;
        }
        self.notify.notify_waiters();
        Ok(())
    }

    async fn open_channel(&self, prefetch: u16) -> Result<ChannelId, BrokerError> {
        let mut state = self.lock();
        if state.closed {
            return Err(BrokerError::Closed);
        }
        state.next_channel += 1;
        let id = state.next_channel;
        state.channels.insert(
            id,
            ChannelState {
                prefetch,
                next_tag: 0,
                unacked: BTreeMap::new(),
                last_seen: Instant::now(),
            },
        );
        tracing::debug!(channel = id, prefetch, "channel opened");
        Ok(id)
    }

    async fn receive(
        &self,
        channel: ChannelId,
        queues: &[&str],
        wait: Duration,
    ) -> Result<Option<Delivery>, BrokerError> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            // Register before inspecting state so a publish in between still
            // wakes us.
            let notified = self.notify.notified();
            {
                let mut guard = self.lock();
                let state = &mut *guard;
                if state.closed {
                    return Err(BrokerError::Closed);
                }
                let ch = state
                    .channels
                    .get_mut(&channel)
                    .ok_or(BrokerError::UnknownChannel(channel))?;
                ch.last_seen = Instant::now();
                if ch.has_capacity() {
                    for &name in queues {
                        let Some(msg) = state
                            .queues
                            .get_mut(name)
                            .and_then(|q| q.ready.pop_front())
                        else {
                            continue;
                        };
                        ch.next_tag += 1;
                        let tag = ch.next_tag;
                        let delivery = Delivery {
                            tag,
                            queue: name.to_string(),
                            body: msg.body.clone(),
                            redelivered: msg.redelivered,
                        };
                        ch.unacked.insert(tag, (name.to_string(), msg));
                        return Ok(Some(delivery));
                    }
                }
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn ack(&self, channel: ChannelId, tag: DeliveryTag) -> Result<(), BrokerError> {
        {
            let mut state = self.lock();
            let ch = state
                .channels
                .get_mut(&channel)
                .ok_or(BrokerError::UnknownChannel(channel))?;
            ch.last_seen = Instant::now();
            let (_, msg) = ch
                .unacked
                .remove(&tag)
                .ok_or(BrokerError::UnknownDelivery { channel, tag })?;
            self.journal(|j| j.remove(msg.id))?;
        }
        self.notify.notify_waiters();
        Ok(())
    }

    async fn nack(
        &self,
        channel: ChannelId,
        tag: DeliveryTag,
        requeue: bool,
    ) -> Result<(), BrokerError> {
        {
            let mut state = self.lock();
            let ch = state
                .channels
                .get_mut(&channel)
                .ok_or(BrokerError::UnknownChannel(channel))?;
            ch.last_seen = Instant::now();
            let (queue, mut msg) = ch
                .unacked
                .remove(&tag)
                .ok_or(BrokerError::UnknownDelivery { channel, tag })?;
            if requeue {
                msg.redelivered = true;
                state.queue(&queue).ready.push_front(msg);
            } else {
                let dlq = queues::dead_letter(&queue);
                self.journal(|j| j.relocate(msg.id, &dlq))?;
                state.queue(&queue).dead_lettered += 1;
                state.queue(&dlq).ready.push_back(msg);
                tracing::warn!(queue = %queue, tag, "message dead-lettered");
            }
        }
        self.notify.notify_waiters();
        Ok(())
    }

    async fn close_channel(&self, channel: ChannelId) -> Result<(), BrokerError> {
        let requeued = {
            let mut state = self.lock();
            let ch = state
                .channels
                .remove(&channel)
                .ok_or(BrokerError::UnknownChannel(channel))?;
            state.requeue_channel(ch)
        };
        if requeued > 0 {
            tracing::info!(channel, requeued, "channel closed with unacked deliveries");
        }
        self.notify.notify_waiters();
        Ok(())
    }

    async fn queue_stats(&self) -> Result<Vec<QueueStats>, BrokerError> {
        let state = self.lock();
        let mut unacked: HashMap<&str, usize> = HashMap::new();
        for ch in state.channels.values() {
            for (queue, _) in ch.unacked.values() {
                *unacked.entry(queue.as_str()).or_default() += 1;
            }
        }
        Ok(state
            .queues
            .iter()
            .map(|(name, q)| QueueStats {
                name: name.clone(),
                ready: q.ready.len(),
                unacked: unacked.get(name.as_str()).copied().unwrap_or(0),
                published: q.published,
                dead_lettered: q.dead_lettered,
            })
            .collect())
    }

    async fn replay_dead_letters(&self, queue: &str) -> Result<usize, BrokerError> {
        let moved = {
            let mut state = self.lock();
            if state.closed {
                return Err(BrokerError::Closed);
            }
            let dlq = queues::dead_letter(queue);
            let drained: Vec<Message> = match state.queues.get_mut(&dlq) {
                Some(q) => q.ready.drain(..).collect(),
                None => Vec::new(),
            };
            for msg in &drained {
                self.journal(|j| j.relocate(msg.id, queue))?;
            }
            let count = drained.len();
            state.queue(queue).ready.extend(drained);
            count
        };
        if moved > 0 {
            tracing::info!(queue, moved, "dead letters replayed");
            self.notify.notify_waiters();
        }
        Ok(moved)
    }

    async fn purge(&self, queue: &str) -> Result<usize, BrokerError> {
        let mut state = self.lock();
        let drained: Vec<Message> = match state.queues.get_mut(queue) {
            Some(q) => q.ready.drain(..).collect(),
            None => return Ok(0),
        };
        for msg in &drained {
            self.journal(|j| j.remove(msg.id))?;
        }
        if !drained.is_empty() {
            tracing::info!(queue, purged = drained.len(), "queue purged");
        }
        Ok(drained.len())
    }

    async fn terminate(&self) -> Result<(), BrokerError> {
        self.lock().closed = true;
        self.notify.notify_waiters();
        tracing::info!("broker terminated");
        Ok(())
    }
}
