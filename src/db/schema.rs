pub const SCHEMA: &str = r#"
-- items table (one row per remote item id)
CREATE TABLE IF NOT EXISTS items (
    id INTEGER PRIMARY KEY,
    title TEXT,
    author TEXT,
    summary TEXT,
    href TEXT,
    time INTEGER,
    subscription TEXT,
    unread INTEGER NOT NULL DEFAULT 0,
    starred INTEGER NOT NULL DEFAULT 0,
    to_delete INTEGER NOT NULL DEFAULT 0,
    to_sync INTEGER NOT NULL DEFAULT 0,
    update_time INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_items_to_sync ON items(to_sync);
CREATE INDEX IF NOT EXISTS idx_items_to_delete ON items(to_delete);
CREATE INDEX IF NOT EXISTS idx_items_time ON items(time DESC);

-- flags table (local flag edits not yet acknowledged by the server)
CREATE TABLE IF NOT EXISTS flags (
    item_id INTEGER NOT NULL,
    flag TEXT NOT NULL,
    remove INTEGER NOT NULL,
    id INTEGER PRIMARY KEY AUTOINCREMENT
);

CREATE INDEX IF NOT EXISTS idx_flags_flag_remove ON flags(flag, remove);

-- ids found stale at the last GC pass
CREATE TABLE IF NOT EXISTS gc_candidates (
    item_id INTEGER PRIMARY KEY
);

-- counters shared between synchronizers (id_generation, gc_generation)
CREATE TABLE IF NOT EXISTS sync_state (
    key TEXT PRIMARY KEY,
    value INTEGER NOT NULL
);
"#;
