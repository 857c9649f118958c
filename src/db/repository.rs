use rusqlite::{params, OptionalExtension, Row};
use tokio_rusqlite::Connection;

use crate::error::Result;
use crate::models::{Flag, Item, ItemMetadata, ItemRef, PendingFlagEdit, SavedView};

use super::schema::SCHEMA;

const ID_GENERATION: &str = "id_generation";
const GC_GENERATION: &str = "gc_generation";

const ITEM_COLUMNS: &str = "id, title, author, summary, href, subscription, time, unread, starred, to_delete, to_sync, update_time";

/// Metadata store: item rows plus the queue of pending flag edits.
#[derive(Clone)]
pub struct Repository {
    conn: Connection,
}

impl Repository {
    pub async fn new(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path).await?;
        Self::init(conn).await
    }

    pub async fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().await?;
        Self::init(conn).await
    }

    async fn init(conn: Connection) -> Result<Self> {
        conn.call(|conn| {
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;

        Ok(Self { conn })
    }

    // Id synchronization

    /// Applies one complete id cycle in a single transaction.
    ///
    /// Every row is first reset to stale/unflagged, then each view's ids are
    /// re-confirmed. `to_sync` is raised for rows whose `update_time`
    /// advanced, and kept for live rows whose content fetch is still
    /// outstanding. Queued local flag edits are applied last so they win over
    /// server state that has not seen them yet. Each commit bumps the id
    /// generation that gates garbage collection.
    pub async fn commit_id_sync(&self, responses: Vec<(SavedView, Vec<ItemRef>)>) -> Result<()> {
        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;

                let outstanding: Vec<i64> = {
                    let mut stmt = tx.prepare("SELECT id FROM items WHERE to_sync=1")?;
                    let ids = stmt
                        .query_map([], |row| row.get(0))?
                        .collect::<std::result::Result<Vec<_>, _>>()?;
                    ids
                };

                tx.execute(
                    "UPDATE items SET to_delete=1, unread=0, starred=0, to_sync=0",
                    [],
                )?;

                {
                    let mut ensure = tx.prepare("INSERT OR IGNORE INTO items(id) VALUES (?1)")?;
                    let mut confirm = tx.prepare("UPDATE items SET to_delete=0 WHERE id=?1")?;
                    let mut advance = tx.prepare(
                        "UPDATE items SET to_sync=1, update_time=?2 WHERE id=?1 AND update_time<?2",
                    )?;

                    for (view, refs) in &responses {
                        for item in refs {
                            ensure.execute(params![item.id])?;
                            confirm.execute(params![item.id])?;
                            advance.execute(params![item.id, item.timestamp_usec])?;
                        }

                        if let Some(column) = view.flag_column() {
                            let mut set_flag =
                                tx.prepare(&format!("UPDATE items SET {column}=1 WHERE id=?1"))?;
                            for item in refs {
                                set_flag.execute(params![item.id])?;
                            }
                        }
                    }

                    let mut keep = tx.prepare("UPDATE items SET to_sync=1 WHERE id=?1 AND to_delete=0")?;
                    for id in outstanding {
                        keep.execute(params![id])?;
                    }
                }

                reapply_pending_edits(&tx)?;
                tx.execute(
                    "INSERT INTO sync_state (key, value) VALUES (?1, 1)
                     ON CONFLICT(key) DO UPDATE SET value=value+1",
                    params![ID_GENERATION],
                )?;
                tx.commit()?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    // Flag edit queue

    pub async fn queue_flag_edit(&self, item_id: i64, flag: Flag, remove: bool) -> Result<i64> {
        let id = self
            .conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO flags (item_id, flag, remove) VALUES (?1, ?2, ?3)",
                    params![item_id, flag.uri(), remove],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await?;
        Ok(id)
    }

    /// Every queued edit, oldest first. Rows with an unknown flag URI are skipped.
    pub async fn pending_flag_edits(&self) -> Result<Vec<PendingFlagEdit>> {
        let edits = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare("SELECT id, item_id, flag, remove FROM flags ORDER BY id")?;
                let rows = stmt
                    .query_map([], |row| {
                        Ok((
                            row.get::<_, i64>(0)?,
                            row.get::<_, i64>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, bool>(3)?,
                        ))
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;

        Ok(edits
            .into_iter()
            .filter_map(|(id, item_id, flag, remove)| {
                Flag::from_uri(&flag).map(|flag| PendingFlagEdit {
                    id,
                    item_id,
                    flag,
                    remove,
                })
            })
            .collect())
    }

    pub async fn pending_flag_count(&self) -> Result<i64> {
        let count = self
            .conn
            .call(|conn| {
                let count: i64 = conn.query_row("SELECT COUNT(*) FROM flags", [], |row| row.get(0))?;
                Ok(count)
            })
            .await?;
        Ok(count)
    }

    /// Removes acknowledged edits by their row id.
    pub async fn delete_flag_edits(&self, ids: Vec<i64>) -> Result<usize> {
        let deleted = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let mut deleted = 0;
                {
                    let mut stmt = tx.prepare("DELETE FROM flags WHERE id=?1")?;
                    for id in ids {
                        deleted += stmt.execute(params![id])?;
                    }
                }
                tx.commit()?;
                Ok(deleted)
            })
            .await?;
        Ok(deleted)
    }

    /// Marks an item read or unread locally and queues the change upstream.
    pub async fn mark_read(&self, item_id: i64, read: bool) -> Result<()> {
        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                tx.execute(
                    "UPDATE items SET unread=?1 WHERE id=?2",
                    params![!read, item_id],
                )?;
                tx.execute(
                    "INSERT INTO flags (item_id, flag, remove) VALUES (?1, ?2, ?3)",
                    params![item_id, Flag::Read.uri(), !read],
                )?;
                if !read {
                    tx.execute(
                        "INSERT INTO flags (item_id, flag, remove) VALUES (?1, ?2, 0)",
                        params![item_id, Flag::KeptUnread.uri()],
                    )?;
                }
                tx.commit()?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn set_starred(&self, item_id: i64, starred: bool) -> Result<()> {
        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                tx.execute(
                    "UPDATE items SET starred=?1 WHERE id=?2",
                    params![starred, item_id],
                )?;
                tx.execute(
                    "INSERT INTO flags (item_id, flag, remove) VALUES (?1, ?2, ?3)",
                    params![item_id, Flag::Starred.uri(), !starred],
                )?;
                tx.commit()?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    // Item content synchronization

    /// Starts a GC pass and returns the ids whose grace period ran out.
    ///
    /// An id expires when it was already stale at the previous pass and is
    /// still stale now. The candidate set is only rotated once an id cycle
    /// has committed since that pass, so a failed id cycle never counts as
    /// a grace period.
    pub async fn expire_stale_items(&self) -> Result<Vec<i64>> {
        let expired = self
            .conn
            .call(|conn| {
                let tx = conn.transaction()?;
                let generation = read_counter(&tx, ID_GENERATION)?;
                if generation == read_counter(&tx, GC_GENERATION)? {
                    return Ok(Vec::new());
                }

                let expired = {
                    let mut stmt = tx.prepare(
                        "SELECT id FROM items
                         WHERE to_delete=1 AND id IN (SELECT item_id FROM gc_candidates)
                         ORDER BY id",
                    )?;
                    let ids = stmt
                        .query_map([], |row| row.get(0))?
                        .collect::<std::result::Result<Vec<i64>, _>>()?;
                    ids
                };

                tx.execute("DELETE FROM gc_candidates", [])?;
                tx.execute(
                    "INSERT INTO gc_candidates (item_id) SELECT id FROM items WHERE to_delete=1",
                    [],
                )?;
                tx.execute(
                    "INSERT INTO sync_state (key, value) VALUES (?1, ?2)
                     ON CONFLICT(key) DO UPDATE SET value=excluded.value",
                    params![GC_GENERATION, generation],
                )?;
                tx.commit()?;
                Ok(expired)
            })
            .await?;
        Ok(expired)
    }

    pub async fn ids_to_sync(&self) -> Result<Vec<i64>> {
        self.select_ids("SELECT id FROM items WHERE to_sync=1 ORDER BY id").await
    }

    async fn select_ids(&self, query: &'static str) -> Result<Vec<i64>> {
        let ids = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(query)?;
                let ids = stmt
                    .query_map([], |row| row.get(0))?
                    .collect::<std::result::Result<Vec<i64>, _>>()?;
                Ok(ids)
            })
            .await?;
        Ok(ids)
    }

    /// Deletes the given rows, but only those still marked `to_delete`.
    pub async fn delete_stale_items(&self, ids: Vec<i64>) -> Result<usize> {
        let deleted = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let mut deleted = 0;
                {
                    let mut stmt = tx.prepare("DELETE FROM items WHERE id=?1 AND to_delete=1")?;
                    let mut forget = tx.prepare("DELETE FROM gc_candidates WHERE item_id=?1")?;
                    for id in ids {
                        let removed = stmt.execute(params![id])?;
                        if removed > 0 {
                            forget.execute(params![id])?;
                        }
                        deleted += removed;
                    }
                }
                tx.commit()?;
                Ok(deleted)
            })
            .await?;
        Ok(deleted)
    }

    /// Stores normalized metadata and clears `to_sync` for each item.
    pub async fn update_items(&self, updates: Vec<(i64, ItemMetadata)>) -> Result<()> {
        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                {
                    let mut stmt = tx.prepare(
                        r#"UPDATE items SET title=?2, author=?3, summary=?4, href=?5,
                               time=?6, subscription=?7, to_sync=0
                           WHERE id=?1"#,
                    )?;
                    for (id, meta) in updates {
                        stmt.execute(params![
                            id,
                            meta.title,
                            meta.author,
                            meta.summary,
                            meta.href,
                            meta.time,
                            meta.subscription,
                        ])?;
                    }
                }
                tx.commit()?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    // Queries for the presentation layer

    pub async fn get_item(&self, id: i64) -> Result<Option<Item>> {
        let item = self
            .conn
            .call(move |conn| {
                let mut stmt =
                    conn.prepare(&format!("SELECT {ITEM_COLUMNS} FROM items WHERE id=?1"))?;
                let item = stmt.query_row(params![id], item_from_row).optional()?;
                Ok(item)
            })
            .await?;
        Ok(item)
    }

    pub async fn get_all_items(&self) -> Result<Vec<Item>> {
        let items = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {ITEM_COLUMNS} FROM items ORDER BY time DESC NULLS LAST, id"
                ))?;
                let items = stmt
                    .query_map([], item_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(items)
            })
            .await?;
        Ok(items)
    }

    pub async fn unread_count(&self) -> Result<i64> {
        let count = self
            .conn
            .call(|conn| {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM items WHERE unread=1 AND to_delete=0",
                    [],
                    |row| row.get(0),
                )?;
                Ok(count)
            })
            .await?;
        Ok(count)
    }
}

/// Replays queued edits, oldest first, onto the local flag columns.
fn reapply_pending_edits(conn: &rusqlite::Connection) -> rusqlite::Result<()> {
    let mut stmt = conn.prepare("SELECT item_id, flag, remove FROM flags ORDER BY id")?;
    let edits = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, bool>(2)?,
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    for (item_id, flag, remove) in edits {
        let query = match (Flag::from_uri(&flag), remove) {
            (Some(Flag::Read), false) => "UPDATE items SET unread=0 WHERE id=?1",
            (Some(Flag::Read), true) => "UPDATE items SET unread=1 WHERE id=?1",
            (Some(Flag::Starred), false) => "UPDATE items SET starred=1 WHERE id=?1",
            (Some(Flag::Starred), true) => "UPDATE items SET starred=0 WHERE id=?1",
            _ => continue,
        };
        conn.execute(query, params![item_id])?;
    }
    Ok(())
}

fn read_counter(conn: &rusqlite::Connection, key: &str) -> rusqlite::Result<i64> {
    let value = conn
        .query_row("SELECT value FROM sync_state WHERE key=?1", params![key], |row| row.get(0))
        .optional()?;
    Ok(value.unwrap_or(0))
}

fn item_from_row(row: &Row) -> rusqlite::Result<Item> {
    Ok(Item {
        id: row.get(0)?,
        title: row.get(1)?,
        author: row.get(2)?,
        summary: row.get(3)?,
        href: row.get(4)?,
        subscription: row.get(5)?,
        time: row.get(6)?,
        unread: row.get(7)?,
        starred: row.get(8)?,
        to_delete: row.get(9)?,
        to_sync: row.get(10)?,
        update_time: row.get(11)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn refs(ids: &[i64], timestamp_usec: i64) -> Vec<ItemRef> {
        ids.iter()
            .map(|&id| ItemRef { id, timestamp_usec })
            .collect()
    }

    async fn item(repo: &Repository, id: i64) -> Item {
        repo.get_item(id).await.unwrap().expect("item row")
    }

    #[tokio::test]
    async fn id_sync_inserts_confirms_and_flags() {
        let repo = Repository::open_in_memory().await.unwrap();
        repo.commit_id_sync(vec![
            (SavedView::ReadingList, refs(&[1, 2, 3], 100)),
            (SavedView::Unread, refs(&[1, 2], 100)),
            (SavedView::Starred, refs(&[3], 100)),
        ])
        .await
        .unwrap();

        let one = item(&repo, 1).await;
        assert!(one.unread && !one.starred && !one.to_delete && one.to_sync);
        assert_eq!(one.update_time, 100);

        let three = item(&repo, 3).await;
        assert!(!three.unread && three.starred);
        assert_eq!(repo.unread_count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn to_sync_only_raised_when_update_time_advances() {
        let repo = Repository::open_in_memory().await.unwrap();
        repo.commit_id_sync(vec![(SavedView::ReadingList, refs(&[1, 2], 100))])
            .await
            .unwrap();
        repo.update_items(vec![(1, sample_meta()), (2, sample_meta())])
            .await
            .unwrap();

        repo.commit_id_sync(vec![
            (SavedView::ReadingList, vec![
                ItemRef { id: 1, timestamp_usec: 100 },
                ItemRef { id: 2, timestamp_usec: 200 },
            ]),
        ])
        .await
        .unwrap();

        assert!(!item(&repo, 1).await.to_sync);
        let two = item(&repo, 2).await;
        assert!(two.to_sync);
        assert_eq!(two.update_time, 200);
    }

    #[tokio::test]
    async fn outstanding_fetch_survives_the_blanket_reset() {
        let repo = Repository::open_in_memory().await.unwrap();
        repo.commit_id_sync(vec![(SavedView::ReadingList, refs(&[1, 2], 100))])
            .await
            .unwrap();

        // No content fetch happened; same timestamps come back.
        repo.commit_id_sync(vec![(SavedView::ReadingList, refs(&[1], 100))])
            .await
            .unwrap();

        assert!(item(&repo, 1).await.to_sync);
        let two = item(&repo, 2).await;
        assert!(two.to_delete);
        assert!(!two.to_sync);
    }

    #[tokio::test]
    async fn pending_edits_override_server_flags() {
        let repo = Repository::open_in_memory().await.unwrap();
        repo.commit_id_sync(vec![(SavedView::ReadingList, refs(&[1, 2], 100))])
            .await
            .unwrap();
        repo.mark_read(1, true).await.unwrap();
        repo.set_starred(2, true).await.unwrap();

        repo.commit_id_sync(vec![
            (SavedView::ReadingList, refs(&[1, 2], 100)),
            (SavedView::Unread, refs(&[1, 2], 100)),
        ])
        .await
        .unwrap();

        assert!(!item(&repo, 1).await.unread);
        let two = item(&repo, 2).await;
        assert!(two.unread && two.starred);
    }

    #[tokio::test]
    async fn marking_unread_queues_read_removal_and_kept_unread() {
        let repo = Repository::open_in_memory().await.unwrap();
        repo.mark_read(7, false).await.unwrap();

        let queued: Vec<_> = repo
            .pending_flag_edits()
            .await
            .unwrap()
            .into_iter()
            .map(|edit| (edit.item_id, edit.flag, edit.remove))
            .collect();
        assert_eq!(queued, vec![(7, Flag::Read, true), (7, Flag::KeptUnread, false)]);
        assert_eq!(repo.pending_flag_count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn delete_flag_edits_only_removes_given_rows() {
        let repo = Repository::open_in_memory().await.unwrap();
        let a = repo.queue_flag_edit(1, Flag::Read, false).await.unwrap();
        let _b = repo.queue_flag_edit(2, Flag::Read, false).await.unwrap();

        assert_eq!(repo.delete_flag_edits(vec![a]).await.unwrap(), 1);
        let left = repo.pending_flag_edits().await.unwrap();
        assert_eq!(left.iter().map(|e| e.item_id).collect::<Vec<_>>(), vec![2]);
    }

    #[tokio::test]
    async fn delete_stale_items_skips_reconfirmed_rows() {
        let repo = Repository::open_in_memory().await.unwrap();
        repo.commit_id_sync(vec![(SavedView::ReadingList, refs(&[1, 2], 100))])
            .await
            .unwrap();
        repo.commit_id_sync(vec![(SavedView::ReadingList, refs(&[2], 100))])
            .await
            .unwrap();

        assert!(item(&repo, 1).await.to_delete);
        assert_eq!(repo.delete_stale_items(vec![1, 2]).await.unwrap(), 1);
        assert!(repo.get_item(1).await.unwrap().is_none());
        assert!(repo.get_item(2).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn gc_pass_needs_an_id_commit_since_the_last_one() {
        let repo = Repository::open_in_memory().await.unwrap();
        repo.commit_id_sync(vec![(SavedView::ReadingList, refs(&[1, 2], 100))])
            .await
            .unwrap();
        repo.commit_id_sync(vec![(SavedView::ReadingList, refs(&[1], 100))])
            .await
            .unwrap();

        // Records 2 as a candidate.
        assert!(repo.expire_stale_items().await.unwrap().is_empty());
        // No id cycle committed in between, so nothing moves.
        assert!(repo.expire_stale_items().await.unwrap().is_empty());

        repo.commit_id_sync(vec![(SavedView::ReadingList, refs(&[1], 100))])
            .await
            .unwrap();
        assert_eq!(repo.expire_stale_items().await.unwrap(), vec![2]);
    }

    #[tokio::test]
    async fn gc_candidates_survive_reopening_the_database() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("metadata").to_string_lossy().to_string();

        {
            let repo = Repository::new(&path).await.unwrap();
            repo.commit_id_sync(vec![(SavedView::ReadingList, refs(&[1, 2], 100))])
                .await
                .unwrap();
            repo.commit_id_sync(vec![(SavedView::ReadingList, refs(&[1], 100))])
                .await
                .unwrap();
            assert!(repo.expire_stale_items().await.unwrap().is_empty());
        }

        let repo = Repository::new(&path).await.unwrap();
        repo.commit_id_sync(vec![(SavedView::ReadingList, refs(&[1], 100))])
            .await
            .unwrap();
        assert_eq!(repo.expire_stale_items().await.unwrap(), vec![2]);
        assert_eq!(repo.delete_stale_items(vec![2]).await.unwrap(), 1);
    }

    fn sample_meta() -> ItemMetadata {
        ItemMetadata {
            subscription: "feed/http://example.com/rss".to_string(),
            author: None,
            title: Some("Title".to_string()),
            summary: Some("Summary".to_string()),
            href: "http://example.com/post".to_string(),
            time: 100,
        }
    }
}
