mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use archiver_api::{BlobSink, ErrorKind, SourceConnector};
use archiver_engine::{ArchiveTotals, Scheduler, WorkItem, parse_work_items};
use archiver_sink_memory::MemorySink;
use archiver_source_memory::{BrokerSettings, InMemoryBroker, MemoryConnector, SourceSettings};

use common::{OutageSink, RecordingConnector, TS_MS, layout, settings};

fn connector(broker: &Arc<InMemoryBroker>) -> MemoryConnector {
    MemoryConnector::new(
        broker.clone(),
        SourceSettings {
            max_messages: 500,
            wait_time: Duration::ZERO,
            max_lock_renewal: Duration::from_secs(120),
        },
    )
}

fn scheduler(items: Vec<WorkItem>, connector: Arc<dyn SourceConnector>, sink: &Arc<MemorySink>) -> Scheduler {
    Scheduler::new(items, connector, sink.clone() as Arc<dyn BlobSink>, layout(), settings())
}

#[tokio::test(start_paused = true)]
async fn sweep_drains_items_in_worklist_order() {
    let broker = Arc::new(InMemoryBroker::default());
    let items = parse_work_items("orders:archive, payments:archive").unwrap();
    for item in &items {
        broker.create_subscription(&item.topic, &item.subscription);
    }
    for i in 0..3 {
        broker.publish("orders", format!("o{i}"), TS_MS);
    }
    broker.publish("payments", "p0", TS_MS);

    let recording = Arc::new(RecordingConnector::new(connector(&broker)));
    let sink = Arc::new(MemorySink::new());
    let mut scheduler = scheduler(items, recording.clone(), &sink);

    let report = scheduler.sweep(&CancellationToken::new()).await;

    assert!(!report.cancelled);
    assert_eq!(report.messages, 4);

    assert_eq!(recording.opened(), vec!["orders/archive", "payments/archive"]);
    assert_eq!(
        scheduler.totals(),
        ArchiveTotals {
            messages: 4,
            objects: 2,
            runs: 2,
            failed_runs: 0,
        }
    );
    assert_eq!(
        sink.keys(),
        vec![
            "archive/topics/orders/year=2024/month=03/day=05/hour=13/orders+0000000000000000002.bin.gz",
            "archive/topics/payments/year=2024/month=03/day=05/hour=13/payments+0000000000000000000.bin.gz",
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn open_failure_does_not_block_other_items() {
    let broker = Arc::new(InMemoryBroker::default());
    broker.create_subscription("payments", "archive");
    broker.publish("payments", "p0", TS_MS);

    let items = vec![WorkItem::new("orders", "missing"), WorkItem::new("payments", "archive")];
    let sink = Arc::new(MemorySink::new());
    let mut scheduler = scheduler(items, Arc::new(connector(&broker)), &sink);

    let report = scheduler.sweep(&CancellationToken::new()).await;

    assert_eq!(report.open_failures, 1);
    let totals = scheduler.totals();
    assert_eq!(totals.failed_runs, 1);
    assert_eq!(totals.runs, 1);
    assert_eq!(totals.messages, 1);
}

#[tokio::test(start_paused = true)]
async fn run_returns_once_cancelled() {
    let broker = Arc::new(InMemoryBroker::default());
    let items = vec![WorkItem::new("orders", "archive"), WorkItem::new("payments", "archive")];
    for item in &items {
        broker.create_subscription(&item.topic, &item.subscription);
    }
    broker.publish("orders", "o0", TS_MS);

    let token = CancellationToken::new();
    let recording = Arc::new(RecordingConnector::new(connector(&broker)).cancel_after(3, token.clone()));
    let sink = Arc::new(MemorySink::new());
    let mut scheduler = scheduler(items, recording.clone(), &sink);

    let totals = scheduler.run(&token).await.unwrap();

    // Two full item runs, then the third open cancels and its run stops
    // before pulling.
    assert_eq!(recording.opened().len(), 3);
    assert_eq!(totals.runs, 3);
    assert_eq!(totals.messages, 1);
    assert_eq!(sink.len(), 1);
}

#[tokio::test]
async fn cancelled_before_start_opens_nothing() {
    let broker = Arc::new(InMemoryBroker::default());
    broker.create_subscription("orders", "archive");
    let recording = Arc::new(RecordingConnector::new(connector(&broker)));
    let sink = Arc::new(MemorySink::new());
    let mut scheduler = scheduler(vec![WorkItem::new("orders", "archive")], recording.clone(), &sink);
    let token = CancellationToken::new();
    token.cancel();

    let totals = scheduler.run(&token).await.unwrap();

    assert_eq!(totals, ArchiveTotals::default());
    assert!(recording.opened().is_empty());
}

#[tokio::test]
async fn totals_accumulate_across_sweeps() {
    let broker = Arc::new(InMemoryBroker::default());
    broker.create_subscription("orders", "archive");
    let sink = Arc::new(MemorySink::new());
    let mut scheduler = scheduler(vec![WorkItem::new("orders", "archive")], Arc::new(connector(&broker)), &sink);
    let token = CancellationToken::new();

    broker.publish("orders", "a", TS_MS);
    scheduler.sweep(&token).await;
    broker.publish("orders", "b", TS_MS);
    scheduler.sweep(&token).await;

    let totals = scheduler.totals();
    assert_eq!(totals.runs, 2);
    assert_eq!(totals.messages, 2);
    assert_eq!(sink.len(), 2);
}

// ═══════════════════════════════════════════════════════════════
//  Pacing and outages
// ═══════════════════════════════════════════════════════════════

fn cancel_at(token: &CancellationToken, after: Duration) {
    let token = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(after).await;
        token.cancel();
    });
}

#[tokio::test(start_paused = true)]
async fn idle_sweeps_back_off_exponentially() {
    let broker = Arc::new(InMemoryBroker::default());
    broker.create_subscription("orders", "archive");
    let recording = Arc::new(RecordingConnector::new(connector(&broker)));
    let sink = Arc::new(MemorySink::new());
    let mut scheduler = scheduler(vec![WorkItem::new("orders", "archive")], recording.clone(), &sink)
        .with_backoff(Duration::from_secs(1), Duration::from_secs(4));
    let token = CancellationToken::new();
    cancel_at(&token, Duration::from_secs(14));

    scheduler.run(&token).await.unwrap();

    // Sweeps at 0s, 1s, 3s, 7s and 11s; the pause is capped at 4s.
    assert_eq!(recording.opened().len(), 5);
}

#[tokio::test(start_paused = true)]
async fn sink_outage_does_not_dead_letter_the_backlog() {
    let broker = Arc::new(InMemoryBroker::new(BrokerSettings {
        lock_duration: Duration::from_secs(30),
        max_delivery_count: 10,
    }));
    broker.create_subscription("orders", "archive");
    broker.publish("orders", "o0", TS_MS);

    let stored = Arc::new(MemorySink::new());
    let outage = Arc::new(OutageSink::new(stored.clone(), Duration::from_secs(120)));
    let mut scheduler = Scheduler::new(
        vec![WorkItem::new("orders", "archive")],
        Arc::new(connector(&broker)),
        outage.clone() as Arc<dyn BlobSink>,
        layout(),
        settings(),
    );
    let token = CancellationToken::new();
    cancel_at(&token, Duration::from_secs(600));

    let totals = scheduler.run(&token).await.unwrap();

    assert_eq!(broker.dead_letter_count("orders", "archive").unwrap(), 0);
    assert_eq!(stored.len(), 1);
    assert_eq!(totals.messages, 1);
    // One delivery per lease expiry during the outage, not one per sweep.
    assert!((1..=5).contains(&outage.rejected()), "rejected {}", outage.rejected());
}

#[tokio::test(start_paused = true)]
async fn run_gives_up_when_no_item_can_be_opened() {
    let broker = Arc::new(InMemoryBroker::default());
    let items = vec![WorkItem::new("orders", "missing"), WorkItem::new("payments", "missing")];
    let sink = Arc::new(MemorySink::new());
    let mut scheduler = scheduler(items, Arc::new(connector(&broker)), &sink);

    let err = scheduler.run(&CancellationToken::new()).await.unwrap_err();

    assert_eq!(err.kind, ErrorKind::Config);
    assert_eq!(scheduler.totals().failed_runs, 2);
}

// ═══════════════════════════════════════════════════════════════
//  Counters
// ═══════════════════════════════════════════════════════════════

#[test]
fn counters_advance_per_run() {
    let recorder = metrics_exporter_prometheus::PrometheusBuilder::new().build_recorder();
    let handle = recorder.handle();
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();

    metrics::with_local_recorder(&recorder, || {
        runtime.block_on(async {
            let broker = Arc::new(InMemoryBroker::default());
            let items = parse_work_items("orders:archive,payments:archive").unwrap();
            for item in &items {
                broker.create_subscription(&item.topic, &item.subscription);
            }
            for i in 0..3 {
                broker.publish("orders", format!("o{i}"), TS_MS);
            }
            broker.publish("payments", "p0", TS_MS);

            let sink = Arc::new(MemorySink::new());
            let mut scheduler =
                scheduler(items, Arc::new(connector(&broker)), &sink).with_metric_prefix("archiver_");
            scheduler.sweep(&CancellationToken::new()).await;
        })
    });

    let rendered = handle.render();
    assert!(rendered.contains("archiver_file_count 2"), "{rendered}");
    assert!(rendered.contains("archiver_message_count 4"), "{rendered}");
}
