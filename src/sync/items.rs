use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::stream::{self, StreamExt};
use tokio::sync::broadcast;

use crate::config::Config;
use crate::db::{ContentStore, Repository};
use crate::error::{AppError, Result};
use crate::feed::{normalize, short_id, RemoteItem};
use crate::models::ItemMetadata;
use crate::services::ReaderClient;

use super::{notify_done, split_chunks, BusyGuard, SyncDone, SyncKind, SyncOutcome, BATCH_SIZE};

/// Fetches content for rows marked `to_sync` and evicts stale rows.
pub struct ItemSynchronizer {
    repository: Repository,
    content: ContentStore,
    client: ReaderClient,
    max_in_flight: usize,
    synchronizing: AtomicBool,
    events: broadcast::Sender<SyncDone>,
}

fn parse_item(value: serde_json::Value) -> Result<(i64, ItemMetadata, String)> {
    let item: RemoteItem = serde_json::from_value(value)?;
    let id = item
        .id
        .as_deref()
        .ok_or_else(|| AppError::MalformedItem("missing item id".to_string()))
        .and_then(short_id)?;
    let (metadata, content) = normalize(&item)?;
    Ok((id, metadata, content))
}

impl ItemSynchronizer {
    pub fn new(
        repository: Repository,
        content: ContentStore,
        client: ReaderClient,
        config: &Config,
        events: broadcast::Sender<SyncDone>,
    ) -> Self {
        Self {
            repository,
            content,
            client,
            max_in_flight: config.max_in_flight.max(1),
            synchronizing: AtomicBool::new(false),
            events,
        }
    }

    pub fn is_running(&self) -> bool {
        self.synchronizing.load(Ordering::Acquire)
    }

    /// Deletes rows (and their content) that were already stale at the
    /// previous pass and still are.
    ///
    /// Candidates live in the metadata store, so the grace period holds
    /// across restarts. A pass with no id cycle committed since the last
    /// one changes nothing.
    pub async fn collect_garbage(&self) -> Result<usize> {
        let expired = self.repository.expire_stale_items().await?;
        if expired.is_empty() {
            return Ok(0);
        }

        for id in &expired {
            self.content.remove(*id).await?;
        }
        let deleted = self.repository.delete_stale_items(expired).await?;
        tracing::debug!("Removed {} stale items", deleted);
        Ok(deleted)
    }

    pub async fn sync(&self) -> Result<SyncOutcome> {
        let Some(_guard) = BusyGuard::acquire(&self.synchronizing) else {
            tracing::warn!("Items are already being synchronized");
            return Ok(SyncOutcome::Busy);
        };
        tracing::debug!("Synchronizing items");

        self.collect_garbage().await?;

        let ids = self.repository.ids_to_sync().await?;
        if ids.is_empty() {
            tracing::debug!("Items don't need synchronization");
            notify_done(&self.events, SyncKind::Items);
            return Ok(SyncOutcome::Done);
        }
        let requested: HashSet<i64> = ids.iter().copied().collect();

        let pairs = ids.into_iter().map(|id| ("i".to_string(), id.to_string()));
        let batches: Vec<Vec<(String, String)>> =
            split_chunks(pairs, BATCH_SIZE, (String::new(), String::new()))
                .map(|chunk| chunk.into_iter().filter(|(key, _)| !key.is_empty()).collect())
                .collect();

        let mut pending = batches.len();
        let mut updates = Vec::new();
        let mut responses = stream::iter(batches)
            .map(|form| async move { self.client.item_contents(&form).await })
            .buffer_unordered(self.max_in_flight);

        while let Some(result) = responses.next().await {
            pending -= 1;
            let items = match result {
                Ok(items) => items,
                Err(e) => {
                    tracing::error!("Items synchronization failed: {}", e);
                    continue;
                }
            };

            for value in items {
                match parse_item(value) {
                    Ok((id, _, _)) if !requested.contains(&id) => {
                        tracing::warn!("Server returned unrequested item {}", id);
                    }
                    Ok((id, metadata, content)) => {
                        self.content.save(id, &content).await?;
                        updates.push((id, metadata));
                    }
                    Err(e) => tracing::warn!("Skipping malformed item: {}", e),
                }
            }
            tracing::trace!("{} item batches still in flight", pending);
        }

        let fetched = updates.len();
        self.repository.update_items(updates).await?;
        tracing::debug!("Items synchronization completed, {} items updated", fetched);
        notify_done(&self.events, SyncKind::Items);
        Ok(SyncOutcome::Done)
    }
}
