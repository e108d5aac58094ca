//! listsync demo - walks a channel list through sync, paging, and local
//! creation against an in-memory remote, logging the position sets a UI
//! would apply.

use listsync::engine::{Entity, EntityPayload, Filter, Query, SortKey};
use listsync::{
    now_millis, ChangeBatch, InMemoryRemote, ListSync, MemoryStore, ObserverEvent, SyncConfig,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    dotenvy::dotenv().ok();
    let config = SyncConfig::from_env()?;

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_filter.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(
        page_size = config.default_page_size,
        persistent = config.snapshot_path.is_some(),
        "Starting listsync demo"
    );

    let remote = InMemoryRemote::new();
    remote.seed(
        "channels",
        (0..7).map(|i| {
            EntityPayload::new(
                format!("channel-{i}"),
                json!({"type": "messaging", "name": format!("Channel {i}"), "last_message_at": i}),
            )
        }),
    );
    remote.set_latency(Duration::from_millis(10));

    let store = Arc::new(MemoryStore::from_config(&config).await?);
    let mut sync = ListSync::new(store, Arc::new(remote.clone()), config);
    sync.start_linker();

    let query = Query::new("channels")
        .filter(Filter::eq("type", "messaging"))
        .sort_by(SortKey::desc("last_message_at"))
        .page_size(3);

    let (items, mut changes) = sync.observe_query(query.clone()).await?;
    tracing::info!(items = items.len(), "Observing channel list");

    let printer = tokio::spawn(async move {
        while let Some(event) = changes.recv().await {
            match event {
                ObserverEvent::Changes(batch) => log_batch(&batch),
                ObserverEvent::Error(err) => tracing::warn!(error = %err, "Observer error"),
            }
        }
    });

    // load_next issued while synchronize is in flight waits for its cursor.
    let (first, second) = tokio::join!(sync.synchronize(&query), sync.load_next(&query));
    tracing::info!(cursor = first?.cursor.offset, "Synchronized");
    tracing::info!(cursor = second?.cursor.offset, "Loaded next page");

    loop {
        let outcome = sync.load_next(&query).await?;
        if outcome.exhausted {
            tracing::info!("No more channels");
            break;
        }
    }

    // A channel created on this device that the server has already accepted.
    let mut reports = sync.linker().reports();
    let drafts = json!({"type": "messaging", "name": "Drafts", "last_message_at": 100});
    remote.put("channels", EntityPayload::new("channel-drafts", drafts.clone()));
    let entity = Entity::new_local("channel-drafts", "channels", drafts, now_millis());
    if let Err(err) = sync.insert_local(entity).await {
        // A persistent store keeps the channel from an earlier run.
        tracing::warn!(error = %err, "Could not create local channel");
    }

    match tokio::time::timeout(Duration::from_secs(1), reports.recv()).await {
        Ok(Ok(report)) => tracing::info!(
            claimed = report.claimed.len(),
            linked = report.linked.len(),
            failed = report.failures.len(),
            "Resolved pending channels"
        ),
        _ => tracing::warn!("Linker did not report in time"),
    }

    // Give the observer a moment to drain, then stop.
    tokio::time::sleep(Duration::from_millis(50)).await;
    printer.abort();

    let records = sync.registry().all().await?;
    for record in records {
        tracing::info!(
            query = %record.key,
            cursor = record.pagination.cursor.offset,
            linked = record.linked_count,
            "Query record"
        );
    }

    Ok(())
}

fn log_batch(batch: &ChangeBatch) {
    match &batch.positions {
        Some(positions) => tracing::info!(
            revision = batch.revision,
            reset = batch.reset,
            insert = ?positions.insert,
            remove = ?positions.remove,
            update = ?positions.update,
            moves = positions.moves.len(),
            items = batch.items.len(),
            "Apply positions"
        ),
        None => tracing::info!(
            revision = batch.revision,
            items = batch.items.len(),
            "Reload list"
        ),
    }
}
