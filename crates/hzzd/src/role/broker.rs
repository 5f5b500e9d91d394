//! `hzzd broker`: the queue broker daemon.

use std::sync::Arc;

use anyhow::{Context, Result};

use hzz_broker::{ApiState, SqliteJournal};
use hzz_core::config::PipelineConfig;
use hzz_services::{lease_loop, MemoryBroker};

pub async fn run(config: &PipelineConfig) -> Result<()> {
    let journal_path = &config.broker.journal_path;
    let broker = if journal_path.as_os_str().is_empty() {
        tracing::warn!("no journal configured; queues are lost when the broker stops");
        MemoryBroker::new()
    } else {
        let journal = SqliteJournal::open(journal_path)
            .with_context(|| format!("failed to open journal {}", journal_path.display()))?;
        let pending = journal.len().context("failed to read journal")?;
        let broker = MemoryBroker::with_journal(Arc::new(journal))
            .context("failed to restore queues from journal")?;
        tracing::info!(path = %journal_path.display(), pending, "journal opened");
        broker
    };

    let state = ApiState::new(broker.clone());
    super::forward_ctrl_c(state.shutdown_tx.clone());

    let lease = config.broker.channel_lease();
    let lease_task = if lease.is_zero() {
        None
    } else {
        Some(tokio::spawn(lease_loop(
            broker,
            lease,
            state.shutdown_tx.subscribe(),
        )))
    };

    let addr = format!("{}:{}", config.broker.bind, config.broker.port);
    tracing::info!(addr = %addr, lease_secs = lease.as_secs(), "hzzd broker starting");
    let served = hzz_broker::serve(state.clone(), &addr).await;

    // The server may have stopped on its own (bind failure); stop the rest too.
    let _ = state.shutdown_tx.send(());
    if let Some(task) = lease_task {
        let _ = task.await;
    }
    served
}
