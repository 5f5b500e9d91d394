//! Chunking, completion counting and the shutdown cascade, end to end.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use hzz_core::wire::{self, queues, DataClass, ResultEnvelope, TaskEnvelope};
use hzz_services::{Broker, MemoryBroker, Producer, StopReason};

use crate::*;

fn sim_result(identifier: &str, task: &str) -> Bytes {
    Bytes::from(
        ResultEnvelope {
            identifier: identifier.to_string(),
            task: Some(task.to_string()),
            data: records(1),
        }
        .to_bytes()
        .unwrap(),
    )
}

/// Drain `queue` on a fresh channel, acking everything.
async fn drain(broker: &dyn Broker, queue: &str) -> Vec<Bytes> {
    let ch = broker.open_channel(0).await.unwrap();
    let mut out = Vec::new();
    while let Some(d) = broker.receive(ch, &[queue], WAIT).await.unwrap() {
        broker.ack(ch, d.tag).await.unwrap();
        out.push(d.body);
    }
    broker.close_channel(ch).await.unwrap();
    out
}

// ── Even chunking, three workers ─────────────────────────────────────────────

#[tokio::test]
async fn chunks_250_records_over_three_workers() {
    let broker = MemoryBroker::new();
    let cat = catalog(&[("ZZ", &["llll"])]);
    let report = Producer::new(
        Arc::new(broker.clone()),
        Arc::new(source(&[("data_A", 250), ("llll", 9)])),
        cat,
        producer_settings(3),
    )
    .run()
    .await
    .unwrap();

    assert_eq!(report.observed_chunks, 3);
    let sizes: Vec<usize> = drain(&broker, queues::TASK)
        .await
        .iter()
        .map(|b| TaskEnvelope::decode(DataClass::Observed, b).unwrap().data.len())
        .collect();
    // ceil(250 / 3) = 84 records per chunk, the last one takes the rest.
    assert_eq!(sizes, vec![84, 84, 82]);
    assert_eq!(sizes.iter().sum::<usize>(), 250);

    let counts = drain(&broker, queues::CHUNKS).await;
    assert_eq!(counts.len(), 1);
    assert_eq!(wire::decode_count(&counts[0]).unwrap(), 3);
}

#[tokio::test]
async fn completes_after_exactly_three_results() {
    // Count first, then results.
    let broker = MemoryBroker::new();
    let shared: Arc<dyn Broker> = Arc::new(broker.clone());
    let stop = shutdown();
    let handle = tokio::spawn(collector(shared, Arc::new(Recorder::default())).run(stop.subscribe()));

    broker.publish(queues::MC_CHUNKS, Bytes::from(wire::encode_count(3))).await.unwrap();
    broker.publish(queues::MC_RESULT, sim_result("ZZ", "t0")).await.unwrap();
    broker.publish(queues::MC_RESULT, sim_result("ZZ", "t1")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!handle.is_finished(), "completed on two of three results");

    broker.publish(queues::MC_RESULT, sim_result("ZZ", "t2")).await.unwrap();
    let report = within(handle).await.unwrap().unwrap().unwrap();
    assert_eq!(report.simulated.received(), 3);
    assert_eq!(report.simulated.expected(), Some(3));
    assert!(!report.interrupted);
}

#[tokio::test]
async fn results_before_count_announcement_still_complete() {
    let broker = MemoryBroker::new();
    let shared: Arc<dyn Broker> = Arc::new(broker.clone());
    let stop = shutdown();
    let handle = tokio::spawn(collector(shared, Arc::new(Recorder::default())).run(stop.subscribe()));

    for t in ["t2", "t0", "t1"] {
        broker.publish(queues::MC_RESULT, sim_result("ZZ", t)).await.unwrap();
    }
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!handle.is_finished(), "completed without a count announcement");

    broker.publish(queues::MC_CHUNKS, Bytes::from(wire::encode_count(3))).await.unwrap();
    let report = within(handle).await.unwrap().unwrap().unwrap();
    assert_eq!(report.simulated.received(), 3);
    assert_eq!(report.identifiers[0].chunks, 3);
}

#[tokio::test]
async fn full_run_stops_every_worker() {
    let broker = MemoryBroker::new();
    let shared: Arc<dyn Broker> = Arc::new(broker.clone());
    let cat = catalog(&[("ZZ", &["llll"])]);
    let stop = shutdown();
    let (produced, mut workers) = produce_and_work(
        shared.clone(),
        source(&[("data_A", 250), ("llll", 30)]),
        &cat,
        3,
        &stop,
    )
    .await;
    assert_eq!(produced.simulated_chunks, 3);

    let recorder = Arc::new(Recorder::default());
    let report = within(collector(shared, recorder.clone()).run(stop.subscribe()))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(report.shutdown_signals, 3);
    let data = report.identifiers.iter().find(|i| i.identifier == "data").unwrap();
    assert_eq!((data.chunks, data.records), (3, 250));
    let zz = report.identifiers.iter().find(|i| i.identifier == "ZZ").unwrap();
    assert_eq!((zz.chunks, zz.records), (3, 30));
    assert_eq!(recorder.exported.lock().unwrap().len(), 1);

    let mut processed = 0;
    while let Some(joined) = within(workers.join_next()).await.unwrap() {
        let r = joined.unwrap().unwrap();
        assert_eq!(r.stop, StopReason::ShutdownMessage);
        processed += r.processed;
    }
    assert_eq!(processed, 6);
    assert_eq!(stats(&broker, queues::SHUTDOWN).await.ready, 0);
}

// ── Zero announced count ─────────────────────────────────────────────────────

#[tokio::test]
async fn zero_count_never_completes() {
    let broker = MemoryBroker::new();
    let shared: Arc<dyn Broker> = Arc::new(broker.clone());
    // No simulated groups: the simulated count announcement is 0.
    let cat = catalog(&[]);
    let stop = shutdown();
    let (produced, mut workers) =
        produce_and_work(shared.clone(), source(&[("data_A", 8)]), &cat, 2, &stop).await;
    assert_eq!(produced.simulated_chunks, 0);

    let handle = tokio::spawn(
        collector(shared, Arc::new(Recorder::default())).run(stop.subscribe()),
    );
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!handle.is_finished());

    stop.send(()).unwrap();
    let report = within(handle).await.unwrap().unwrap().unwrap();
    assert!(report.interrupted);
    assert!(report.observed.is_complete());
    assert_eq!(report.simulated.expected(), Some(0));
    assert!(!report.simulated.is_complete());
    assert_eq!(report.shutdown_signals, 0);

    while let Some(joined) = within(workers.join_next()).await.unwrap() {
        assert_eq!(joined.unwrap().unwrap().stop, StopReason::LocalSignal);
    }
}

// ── Per-group aggregation ────────────────────────────────────────────────────

#[tokio::test]
async fn results_aggregate_per_group() {
    let broker = MemoryBroker::new();
    let shared: Arc<dyn Broker> = Arc::new(broker.clone());
    let cat = catalog(&[("Z", &["Zee"]), ("ZZ", &["llll"])]);
    let stop = shutdown();
    let (produced, mut workers) = produce_and_work(
        shared.clone(),
        source(&[("data_A", 4), ("Zee", 10), ("llll", 1)]),
        &cat,
        2,
        &stop,
    )
    .await;
    assert_eq!(produced.simulated_chunks, 3);

    let report = within(collector(shared, Arc::new(Recorder::default())).run(stop.subscribe()))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(report.simulated.expected(), Some(3));

    let simulated: Vec<_> = report
        .identifiers
        .iter()
        .filter(|i| i.class == DataClass::Simulated)
        .collect();
    assert_eq!(simulated.len(), 2);
    let z = simulated.iter().find(|i| i.identifier == "Z").unwrap();
    assert_eq!((z.chunks, z.records), (2, 10));
    let zz = simulated.iter().find(|i| i.identifier == "ZZ").unwrap();
    assert_eq!((zz.chunks, zz.records), (1, 1));

    while let Some(joined) = within(workers.join_next()).await.unwrap() {
        joined.unwrap().unwrap();
    }
}

// ── Shutdown while idle ──────────────────────────────────────────────────────

#[tokio::test]
async fn shutdown_while_idle_leaves_queued_tasks() {
    let broker = MemoryBroker::new();
    let shared: Arc<dyn Broker> = Arc::new(broker.clone());
    let cat = catalog(&[]);
    let stop = shutdown();
    let handle = tokio::spawn(worker(shared, unit_norms(&cat), "w0").run(stop.subscribe()));
    tokio::time::sleep(Duration::from_millis(50)).await;

    broker
        .publish(queues::SHUTDOWN, Bytes::from(wire::encode_shutdown()))
        .await
        .unwrap();
    for t in ["t0", "t1"] {
        let task = TaskEnvelope::observed(records(2)).with_task(t);
        broker
            .publish(queues::TASK, Bytes::from(task.to_bytes().unwrap()))
            .await
            .unwrap();
    }

    let report = within(handle).await.unwrap().unwrap().unwrap();
    assert_eq!(report.stop, StopReason::ShutdownMessage);
    assert_eq!(report.processed, 0);
    assert_eq!(stats(&broker, queues::TASK).await.ready, 2);
    assert_eq!(stats(&broker, queues::RESULT).await.published, 0);
}

// ── Collector restart ────────────────────────────────────────────────────────

#[tokio::test]
async fn restarted_collector_starts_from_nothing() {
    let broker = MemoryBroker::new();
    let shared: Arc<dyn Broker> = Arc::new(broker.clone());
    broker.publish(queues::MC_CHUNKS, Bytes::from(wire::encode_count(3))).await.unwrap();
    broker.publish(queues::MC_RESULT, sim_result("ZZ", "t0")).await.unwrap();
    broker.publish(queues::MC_RESULT, sim_result("ZZ", "t1")).await.unwrap();

    let recorder = Arc::new(Recorder::default());
    let stop = shutdown();
    let first = tokio::spawn(collector(shared.clone(), recorder.clone()).run(stop.subscribe()));
    wait_until("first collector to consume", || {
        let broker = broker.clone();
        async move {
            let r = stats(&broker, queues::MC_RESULT).await;
            r.ready == 0 && r.unacked == 0
        }
    })
    .await
    .unwrap();
    stop.send(()).unwrap();
    let crashed = within(first).await.unwrap().unwrap().unwrap();
    assert!(crashed.interrupted);
    assert_eq!(crashed.simulated.received(), 2);

    // The count and the first two results were consumed by the lost
    // collector; the replacement only ever sees the last result.
    broker.publish(queues::MC_RESULT, sim_result("ZZ", "t2")).await.unwrap();
    let stop = shutdown();
    let second = tokio::spawn(collector(shared, recorder.clone()).run(stop.subscribe()));
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(!second.is_finished());
    stop.send(()).unwrap();

    let restarted = within(second).await.unwrap().unwrap().unwrap();
    assert!(restarted.interrupted);
    assert_eq!(restarted.simulated.received(), 1);
    assert_eq!(restarted.simulated.expected(), None);
    assert!(recorder.exported.lock().unwrap().is_empty());
}
