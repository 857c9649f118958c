use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::stream::{self, StreamExt};
use tokio::sync::broadcast;

use crate::config::Config;
use crate::db::Repository;
use crate::error::Result;
use crate::models::SavedView;
use crate::services::ReaderClient;

use super::{notify_done, BusyGuard, SyncDone, SyncKind, SyncOutcome};

/// Mirrors the id universe of every saved view into the `items` table.
pub struct IdSynchronizer {
    repository: Repository,
    client: ReaderClient,
    cache_items: u32,
    max_in_flight: usize,
    synchronizing: AtomicBool,
    events: broadcast::Sender<SyncDone>,
}

impl IdSynchronizer {
    pub fn new(
        repository: Repository,
        client: ReaderClient,
        config: &Config,
        events: broadcast::Sender<SyncDone>,
    ) -> Self {
        Self {
            repository,
            client,
            cache_items: config.cache_items,
            max_in_flight: config.max_in_flight.max(1),
            synchronizing: AtomicBool::new(false),
            events,
        }
    }

    pub fn is_running(&self) -> bool {
        self.synchronizing.load(Ordering::Acquire)
    }

    /// Requests every saved view and commits only when all of them answered.
    ///
    /// A failed view leaves the local store untouched and yields
    /// [`SyncOutcome::Incomplete`]; no `SyncDone` is sent for that cycle.
    pub async fn sync(&self) -> Result<SyncOutcome> {
        let Some(_guard) = BusyGuard::acquire(&self.synchronizing) else {
            tracing::error!("IDs are already being synchronized");
            return Ok(SyncOutcome::Busy);
        };

        let mut status: HashMap<SavedView, Vec<_>> = HashMap::new();
        let mut responses = stream::iter(SavedView::ALL)
            .map(|view| async move { (view, self.client.item_ids(view, self.cache_items).await) })
            .buffer_unordered(self.max_in_flight);

        while let Some((view, result)) = responses.next().await {
            match result {
                Ok(refs) => {
                    tracing::debug!("Received {} ids for {}", refs.len(), view);
                    status.insert(view, refs);
                }
                Err(e) => {
                    tracing::error!("IDs synchronization failed for {}: {}", view, e);
                }
            }
        }

        if !SavedView::ALL.iter().all(|view| status.contains_key(view)) {
            tracing::warn!("IDs synchronization incomplete, nothing committed");
            return Ok(SyncOutcome::Incomplete);
        }

        let responses = SavedView::ALL
            .into_iter()
            .filter_map(|view| status.remove(&view).map(|refs| (view, refs)))
            .collect();
        self.repository.commit_id_sync(responses).await?;

        tracing::debug!("IDs synchronization completed");
        notify_done(&self.events, SyncKind::Ids);
        Ok(SyncOutcome::Done)
    }
}
