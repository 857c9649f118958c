use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A row of the `items` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: i64,
    pub title: Option<String>,
    pub author: Option<String>,
    pub summary: Option<String>,
    pub href: Option<String>,
    pub subscription: Option<String>,
    /// Microseconds since the Unix epoch.
    pub time: Option<i64>,
    pub unread: bool,
    pub starred: bool,
    pub to_delete: bool,
    pub to_sync: bool,
    /// Microseconds since the Unix epoch of the last known server update.
    pub update_time: i64,
}

impl Item {
    pub fn published_at(&self) -> Option<DateTime<Utc>> {
        self.time.and_then(DateTime::<Utc>::from_timestamp_micros)
    }
}

/// Canonical metadata extracted from a remote item by the normalizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemMetadata {
    pub subscription: String,
    pub author: Option<String>,
    pub title: Option<String>,
    pub summary: Option<String>,
    pub href: String,
    pub time: i64,
}

/// One entry of an id-listing response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ItemRef {
    pub id: i64,
    pub timestamp_usec: i64,
}
