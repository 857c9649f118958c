use std::fmt;

const READING_LIST: &str = "user/-/state/com.google/reading-list";
const READ: &str = "user/-/state/com.google/read";
const STARRED: &str = "user/-/state/com.google/starred";

/// Server-side filters whose id universes are mirrored locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SavedView {
    ReadingList,
    Unread,
    Starred,
}

impl SavedView {
    pub const ALL: [SavedView; 3] = [SavedView::ReadingList, SavedView::Unread, SavedView::Starred];

    pub fn name(&self) -> &'static str {
        match self {
            SavedView::ReadingList => "reading-list",
            SavedView::Unread => "unread",
            SavedView::Starred => "starred",
        }
    }

    /// Query parameters selecting this view on `stream/items/ids`.
    pub fn params(&self) -> &'static [(&'static str, &'static str)] {
        match self {
            SavedView::ReadingList => &[("s", READING_LIST)],
            SavedView::Unread => &[("s", READING_LIST), ("xt", READ)],
            SavedView::Starred => &[("s", STARRED)],
        }
    }

    /// The `items` column set to 1 for every id this view returns.
    pub fn flag_column(&self) -> Option<&'static str> {
        match self {
            SavedView::ReadingList => None,
            SavedView::Unread => Some("unread"),
            SavedView::Starred => Some("starred"),
        }
    }
}

impl fmt::Display for SavedView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
