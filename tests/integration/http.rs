//! The full pipeline over the broker daemon's HTTP API.

use std::sync::Arc;

use bytes::Bytes;
use tokio::task::JoinHandle;

use hzz_broker::ApiState;
use hzz_core::config::HistogramSettings;
use hzz_core::wire::{queues, TaskEnvelope};
use hzz_services::{
    Broker, FourLeptonSelection, HistogramExporter, HttpBroker, MemoryBroker, StopReason,
    WorkerSettings,
};

use crate::*;

async fn spawn_daemon() -> (Arc<dyn Broker>, JoinHandle<anyhow::Result<()>>) {
    let state = ApiState::new(MemoryBroker::new());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    let server = tokio::spawn(hzz_broker::serve_listener(state, listener));
    (Arc::new(HttpBroker::new(&url)), server)
}

#[tokio::test]
async fn full_run_over_http_exports_histogram() {
    let (broker, server) = spawn_daemon().await;
    let cat = catalog(&[("ZZ", &["llll"])]);
    let stop = shutdown();

    let mut workers = JoinSet::new();
    for i in 0..2 {
        let w = Worker::new(
            broker.clone(),
            Arc::new(FourLeptonSelection),
            unit_norms(&cat),
            WorkerSettings {
                name: format!("http-w{i}"),
                prefetch: 1,
                receive_wait: Duration::from_millis(100),
            },
        );
        workers.spawn(w.run(stop.subscribe()));
    }

    let source = MemorySource::new()
        .with("data_A", lepton_events(6))
        .with("llll", lepton_events(4));
    let produced = Producer::new(broker.clone(), Arc::new(source), cat.clone(), producer_settings(2))
        .run()
        .await
        .unwrap();
    assert_eq!((produced.observed_chunks, produced.simulated_chunks), (2, 2));

    wait_until("all results", || {
        let broker = broker.clone();
        async move {
            stats(broker.as_ref(), queues::RESULT).await.ready == 2
                && stats(broker.as_ref(), queues::MC_RESULT).await.ready == 2
        }
    })
    .await
    .unwrap();

    let out_dir = std::env::temp_dir().join(format!("hzz-it-http-{}", std::process::id()));
    let exporter = HistogramExporter::new(&out_dir, HistogramSettings::default(), cat);
    let report = within(
        Collector::new(broker.clone(), Arc::new(exporter), collector_settings())
            .run(stop.subscribe()),
    )
    .await
    .unwrap()
    .unwrap();

    let path = report.artifact.expect("artifact written");
    let spectrum: serde_json::Value =
        serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
    assert_eq!(spectrum["observed"]["events"], 6);
    assert_eq!(spectrum["simulated"][0]["identifier"], "ZZ");
    assert_eq!(spectrum["simulated"][0]["events"], 4);
    let observed_total: f64 = spectrum["observed"]["counts"]
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c.as_f64().unwrap())
        .sum();
    assert_eq!(observed_total, 6.0);

    while let Some(joined) = within(workers.join_next()).await.unwrap() {
        assert_eq!(joined.unwrap().unwrap().stop, StopReason::ShutdownMessage);
    }

    broker.terminate().await.unwrap();
    within(server).await.unwrap().unwrap().unwrap();
    let _ = std::fs::remove_dir_all(&out_dir);
}

#[tokio::test]
async fn closed_http_channel_redelivers() {
    let (broker, server) = spawn_daemon().await;
    let task = TaskEnvelope::observed(records(2)).with_task("t0");
    broker
        .publish(queues::TASK, Bytes::from(task.to_bytes().unwrap()))
        .await
        .unwrap();

    let ch = broker.open_channel(1).await.unwrap();
    let first = broker.receive(ch, &[queues::TASK], WAIT).await.unwrap().unwrap();
    broker.close_channel(ch).await.unwrap();

    let ch = broker.open_channel(1).await.unwrap();
    let again = broker.receive(ch, &[queues::TASK], WAIT).await.unwrap().unwrap();
    assert!(again.redelivered);
    assert_eq!(again.body, first.body);
    broker.ack(ch, again.tag).await.unwrap();
    assert_eq!(stats(broker.as_ref(), queues::TASK).await.ready, 0);

    broker.terminate().await.unwrap();
    within(server).await.unwrap().unwrap().unwrap();
}
