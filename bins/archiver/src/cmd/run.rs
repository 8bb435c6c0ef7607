use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use archiver_api::{BlobSink, SourceConnector};
use archiver_engine::{DrainState, Scheduler};
use archiver_sink_object_store::{
    AzureFactory, InMemoryFactory, LocalFileSystemFactory, ObjectStoreFactory, ObjectStoreSink,
};
use archiver_source_memory::{BrokerSettings, InMemoryBroker, MemoryConnector, SourceSettings, load_seed_file};

use crate::config::{ArchiverConfig, Mode, StorageBackend};
use crate::error::ArchiverError;
use crate::prometheus;

pub async fn run(config: ArchiverConfig) -> Result<(), ArchiverError> {
    tracing::info!(
        container = %config.layout.container,
        directory = %config.layout.directory,
        template = %config.layout.template,
        "topic-archiver starting"
    );

    let sink = build_sink(&config.storage)?;
    let connector = build_connector(&config)?;

    // --- CancellationToken for graceful shutdown ---
    let token = CancellationToken::new();
    watch_shutdown(token.clone())?;

    let mut scheduler = Scheduler::new(
        config.mode.items(),
        connector,
        sink,
        config.layout.clone(),
        config.drain.clone(),
    )
    .with_metric_prefix(&config.metrics.prefix);

    match &config.mode {
        Mode::Single(item) => {
            let outcome = scheduler.run_item(item, &token).await?;
            if outcome.state == DrainState::ErrorHalted {
                let detail = outcome
                    .error
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "unknown error".into());
                return Err(ArchiverError::Halted {
                    item: item.to_string(),
                    detail,
                });
            }
        }
        Mode::Multi(items) => {
            tracing::info!(items = items.len(), "multi-topic mode, stop with SIGINT or SIGTERM");
            prometheus::install(&config.metrics)?;
            let totals = scheduler.run(&token).await?;
            tracing::info!(
                messages = totals.messages,
                objects = totals.objects,
                runs = totals.runs,
                failed_runs = totals.failed_runs,
                "archiver totals"
            );
        }
    }
    Ok(())
}

fn build_sink(storage: &StorageBackend) -> Result<Arc<dyn BlobSink>, ArchiverError> {
    let factory: Arc<dyn ObjectStoreFactory> = match storage {
        StorageBackend::Local { root } => {
            let factory = LocalFileSystemFactory::new(root)
                .map_err(|e| ArchiverError::Storage(format!("root '{}': {e}", root.display())))?;
            tracing::info!(root = %factory.root_path().display(), "local storage");
            Arc::new(factory)
        }
        StorageBackend::Memory => {
            tracing::warn!("in-memory storage, archived objects are not persisted");
            Arc::new(InMemoryFactory::new())
        }
        StorageBackend::Azure(credentials) => {
            tracing::info!(account = %credentials.account_name, "azure blob storage");
            Arc::new(AzureFactory::new(Some(credentials.clone())))
        }
    };
    Ok(Arc::new(ObjectStoreSink::new(factory)))
}

/// The in-memory broker lives as long as the process. Subscriptions for
/// every work item exist before the seed file is published, so seeded
/// messages reach them.
fn build_connector(config: &ArchiverConfig) -> Result<Arc<dyn SourceConnector>, ArchiverError> {
    let broker = Arc::new(InMemoryBroker::new(BrokerSettings {
        max_delivery_count: config.source.max_delivery_count,
        ..BrokerSettings::default()
    }));
    for item in config.mode.items() {
        broker.create_subscription(&item.topic, &item.subscription);
    }
    if let Some(seed) = &config.source.seed_file {
        load_seed_file(&broker, seed)?;
    }

    let settings = SourceSettings {
        max_messages: config.drain.max_messages_in_batch,
        wait_time: config.drain.wait_time,
        max_lock_renewal: config.source.max_lock_renewal,
    };
    Ok(Arc::new(MemoryConnector::new(broker, settings)))
}

/// Cancel `token` on SIGINT or SIGTERM. The current drain cycle finishes
/// first; the scheduler stops before the next one.
#[cfg(unix)]
fn watch_shutdown(token: CancellationToken) -> Result<(), ArchiverError> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::spawn(async move {
        tokio::select! {
            r = tokio::signal::ctrl_c() => {
                if let Err(e) = r {
                    tracing::warn!(error = %e, "SIGINT handler failed, waiting for SIGTERM only");
                    terminate.recv().await;
                }
            }
            _ = terminate.recv() => {}
        }
        tracing::info!("shutting down...");
        token.cancel();
    });
    Ok(())
}

#[cfg(not(unix))]
fn watch_shutdown(token: CancellationToken) -> Result<(), ArchiverError> {
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "ctrl-c handler failed");
            return;
        }
        tracing::info!("shutting down...");
        token.cancel();
    });
    Ok(())
}
