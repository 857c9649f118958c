use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::stream::{self, StreamExt};
use reqwest::StatusCode;
use tokio::sync::broadcast;

use crate::config::Config;
use crate::db::Repository;
use crate::error::{AppError, Result};
use crate::models::{Flag, PendingFlagEdit};
use crate::services::ReaderClient;

use super::{notify_done, split_chunks, BusyGuard, SyncDone, SyncKind, SyncOutcome, BATCH_SIZE};

/// The newest queued edit of one (item, flag) pair, plus every queue row
/// it supersedes.
#[derive(Debug, Clone, PartialEq, Eq)]
struct CollapsedEdit {
    item_id: i64,
    remove: bool,
    rows: Vec<i64>,
}

struct FlagBatch {
    flag: Flag,
    remove: bool,
    edits: Vec<CollapsedEdit>,
}

/// Reduces the queue to one edit per (item, flag), the newest one winning.
fn collapse(edits: Vec<PendingFlagEdit>) -> HashMap<Flag, Vec<CollapsedEdit>> {
    let mut newest: HashMap<(i64, Flag), CollapsedEdit> = HashMap::new();
    for edit in edits {
        let entry = newest
            .entry((edit.item_id, edit.flag))
            .or_insert_with(|| CollapsedEdit {
                item_id: edit.item_id,
                remove: edit.remove,
                rows: Vec::new(),
            });
        entry.remove = edit.remove;
        entry.rows.push(edit.id);
    }

    let mut by_flag: HashMap<Flag, Vec<CollapsedEdit>> = HashMap::new();
    for ((_, flag), edit) in newest {
        by_flag.entry(flag).or_default().push(edit);
    }
    for edits in by_flag.values_mut() {
        edits.sort_by_key(|edit| edit.item_id);
    }
    by_flag
}

/// Pushes queued local flag edits upstream.
///
/// Edits are only dropped from the queue once the server acknowledged the
/// batch carrying them; a failed batch is retried on the next cycle.
pub struct FlagSynchronizer {
    repository: Repository,
    client: ReaderClient,
    max_in_flight: usize,
    synchronizing: AtomicBool,
    events: broadcast::Sender<SyncDone>,
}

impl FlagSynchronizer {
    pub fn new(
        repository: Repository,
        client: ReaderClient,
        config: &Config,
        events: broadcast::Sender<SyncDone>,
    ) -> Self {
        Self {
            repository,
            client,
            max_in_flight: config.max_in_flight.max(1),
            synchronizing: AtomicBool::new(false),
            events,
        }
    }

    pub fn is_running(&self) -> bool {
        self.synchronizing.load(Ordering::Acquire)
    }

    async fn collect_batches(&self) -> Result<Vec<FlagBatch>> {
        let mut by_flag = collapse(self.repository.pending_flag_edits().await?);

        let mut batches = Vec::new();
        for flag in Flag::ALL {
            let Some(collapsed) = by_flag.remove(&flag) else {
                continue;
            };
            for remove in [true, false] {
                let edits: Vec<CollapsedEdit> = collapsed
                    .iter()
                    .filter(|edit| edit.remove == remove)
                    .cloned()
                    .collect();
                if edits.is_empty() {
                    continue;
                }
                for chunk in split_chunks(edits.into_iter().map(Some), BATCH_SIZE, None) {
                    batches.push(FlagBatch {
                        flag,
                        remove,
                        edits: chunk.into_iter().flatten().collect(),
                    });
                }
            }
        }
        Ok(batches)
    }

    pub async fn sync(&self) -> Result<SyncOutcome> {
        let Some(_guard) = BusyGuard::acquire(&self.synchronizing) else {
            tracing::error!("Flags are already being synchronized");
            return Ok(SyncOutcome::Busy);
        };

        let batches = self.collect_batches().await?;
        if batches.is_empty() {
            tracing::debug!("There were no flags to synchronize");
            notify_done(&self.events, SyncKind::Flags);
            return Ok(SyncOutcome::Done);
        }

        let edit_token = match self.client.edit_token().await {
            Ok(token) => token,
            Err(e) => {
                tracing::error!("Could not obtain an edit token, flags stay queued: {}", e);
                return Ok(SyncOutcome::Incomplete);
            }
        };
        let edit_token = edit_token.as_str();

        let mut pending = batches.len();
        let mut acknowledged = Vec::new();
        let mut responses = stream::iter(batches)
            .map(|batch| async move {
                let item_ids: Vec<i64> = batch.edits.iter().map(|edit| edit.item_id).collect();
                let result = self
                    .client
                    .edit_tag(&item_ids, batch.flag, batch.remove, edit_token)
                    .await;
                (batch, result)
            })
            .buffer_unordered(self.max_in_flight);

        while let Some((batch, result)) = responses.next().await {
            pending -= 1;
            match result {
                Ok(()) => acknowledged.extend(batch.edits.iter().flat_map(|edit| edit.rows.iter().copied())),
                Err(e) => {
                    tracing::error!(
                        "Flags synchronization failed ({} {} items, {}): {}",
                        if batch.remove { "remove" } else { "add" },
                        batch.edits.len(),
                        batch.flag,
                        e
                    );
                    if matches!(
                        e,
                        AppError::Api { status }
                            if status == StatusCode::BAD_REQUEST || status == StatusCode::UNAUTHORIZED
                    ) {
                        self.client.invalidate_edit_token().await;
                    }
                }
            }
            tracing::trace!("{} flag batches still in flight", pending);
        }

        let deleted = self.repository.delete_flag_edits(acknowledged).await?;
        tracing::debug!("Flags synchronization completed, {} edits acknowledged", deleted);
        notify_done(&self.events, SyncKind::Flags);
        Ok(SyncOutcome::Done)
    }
}
