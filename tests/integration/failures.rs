//! Dead letters, redelivery and duplicate results.

use std::sync::Arc;

use bytes::Bytes;

use hzz_core::wire::{queues, DataClass, TaskEnvelope};
use hzz_services::worker::process_task;
use hzz_services::{Broker, Identity, MemoryBroker, StopReason};

use crate::*;

#[tokio::test]
async fn malformed_task_is_dead_lettered_and_replayable() {
    let broker = MemoryBroker::new();
    let shared: Arc<dyn Broker> = Arc::new(broker.clone());
    let stop = shutdown();
    let handle = tokio::spawn(worker(shared, unit_norms(&catalog(&[])), "w0").run(stop.subscribe()));

    broker
        .publish(queues::TASK, Bytes::from_static(b"{\"not\": \"a task\"}"))
        .await
        .unwrap();
    wait_until("dead letter", || {
        let broker = broker.clone();
        async move { stats(&broker, "task_queue.dlq").await.ready == 1 }
    })
    .await
    .unwrap();
    stop.send(()).unwrap();

    let report = within(handle).await.unwrap().unwrap().unwrap();
    assert_eq!(report.stop, StopReason::LocalSignal);
    assert_eq!((report.processed, report.dead_lettered), (0, 1));
    assert_eq!(stats(&broker, queues::TASK).await.dead_lettered, 1);

    assert_eq!(broker.replay_dead_letters(queues::TASK).await.unwrap(), 1);
    assert_eq!(stats(&broker, queues::TASK).await.ready, 1);
    assert_eq!(stats(&broker, "task_queue.dlq").await.ready, 0);
}

#[tokio::test]
async fn unknown_variant_is_dead_lettered() {
    let broker = MemoryBroker::new();
    let shared: Arc<dyn Broker> = Arc::new(broker.clone());
    let stop = shutdown();
    // Normalizations only for llll.
    let norms = unit_norms(&catalog(&[("ZZ", &["llll"])]));
    let handle = tokio::spawn(worker(shared, norms, "w0").run(stop.subscribe()));

    let task = TaskEnvelope::simulated("ZZ", "ghost", records(3)).with_task("t0");
    broker
        .publish(queues::MC_TASK, Bytes::from(task.to_bytes().unwrap()))
        .await
        .unwrap();
    wait_until("dead letter", || {
        let broker = broker.clone();
        async move { stats(&broker, "mc_task_queue.dlq").await.ready == 1 }
    })
    .await
    .unwrap();
    stop.send(()).unwrap();

    let report = within(handle).await.unwrap().unwrap().unwrap();
    assert_eq!(report.dead_lettered, 1);
    assert_eq!(stats(&broker, queues::MC_RESULT).await.published, 0);
}

#[tokio::test]
async fn unacked_task_is_redelivered_after_channel_close() {
    let broker = MemoryBroker::new();
    let task = TaskEnvelope::observed(records(5)).with_task("t0");
    broker
        .publish(queues::TASK, Bytes::from(task.to_bytes().unwrap()))
        .await
        .unwrap();

    // A consumer takes the task and disappears without acking.
    let ch = broker.open_channel(1).await.unwrap();
    let first = broker.receive(ch, &[queues::TASK], WAIT).await.unwrap().unwrap();
    assert!(!first.redelivered);
    assert_eq!(stats(&broker, queues::TASK).await.unacked, 1);
    broker.close_channel(ch).await.unwrap();

    let shared: Arc<dyn Broker> = Arc::new(broker.clone());
    let stop = shutdown();
    let handle = tokio::spawn(worker(shared, unit_norms(&catalog(&[])), "w1").run(stop.subscribe()));
    wait_until("redelivered result", || {
        let broker = broker.clone();
        async move { stats(&broker, queues::RESULT).await.ready == 1 }
    })
    .await
    .unwrap();
    stop.send(()).unwrap();

    let report = within(handle).await.unwrap().unwrap().unwrap();
    assert_eq!(report.processed, 1);
    let task_stats = stats(&broker, queues::TASK).await;
    assert_eq!((task_stats.ready, task_stats.unacked), (0, 0));
}

#[tokio::test]
async fn result_from_crashed_worker_is_counted_once() {
    let broker = MemoryBroker::new();
    let shared: Arc<dyn Broker> = Arc::new(broker.clone());
    let cat = catalog(&[("ZZ", &["llll"])]);
    Producer::new(
        shared.clone(),
        Arc::new(source(&[("data_A", 6), ("llll", 2)])),
        cat.clone(),
        producer_settings(2),
    )
    .run()
    .await
    .unwrap();

    // Process one observed task and publish its result, then crash before
    // the ack. The broker hands the task to the next worker.
    let norms = unit_norms(&cat);
    let ch = broker.open_channel(1).await.unwrap();
    let d = broker.receive(ch, &[queues::TASK], WAIT).await.unwrap().unwrap();
    let result = process_task(DataClass::Observed, &d.body, &Identity, norms.as_ref()).unwrap();
    broker.publish(queues::RESULT, Bytes::from(result)).await.unwrap();
    broker.close_channel(ch).await.unwrap();

    let stop = shutdown();
    let handle = tokio::spawn(worker(shared.clone(), norms, "w0").run(stop.subscribe()));
    wait_until("all results", || {
        let broker = broker.clone();
        async move {
            stats(&broker, queues::RESULT).await.ready == 3
                && stats(&broker, queues::MC_RESULT).await.ready == 2
        }
    })
    .await
    .unwrap();

    let report = within(collector(shared, Arc::new(Recorder::default())).run(stop.subscribe()))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(report.duplicates, 1);
    assert_eq!(report.observed.received(), 2);
    let data = report.identifiers.iter().find(|i| i.identifier == "data").unwrap();
    assert_eq!((data.chunks, data.records), (2, 6));
    assert_eq!(report.shutdown_signals, 2);

    let worker_report = within(handle).await.unwrap().unwrap().unwrap();
    assert_eq!(worker_report.stop, StopReason::ShutdownMessage);
    assert_eq!(worker_report.processed, 4);
    // One shutdown was for a worker that no longer exists.
    assert_eq!(stats(&broker, queues::SHUTDOWN).await.ready, 1);
}
