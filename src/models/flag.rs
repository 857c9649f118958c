use std::fmt;

/// Item states that are pushed upstream through `edit-tag`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Flag {
    Read,
    KeptUnread,
    Starred,
}

impl Flag {
    pub const ALL: [Flag; 3] = [Flag::Read, Flag::KeptUnread, Flag::Starred];

    /// The state URI, which is also what the `flags` table stores.
    pub fn uri(&self) -> &'static str {
        match self {
            Flag::Read => "user/-/state/com.google/read",
            Flag::KeptUnread => "user/-/state/com.google/kept-unread",
            Flag::Starred => "user/-/state/com.google/starred",
        }
    }

    pub fn from_uri(uri: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|flag| flag.uri() == uri)
    }
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Flag::Read => "read",
            Flag::KeptUnread => "kept-unread",
            Flag::Starred => "starred",
        };
        f.write_str(name)
    }
}

/// A queued local flag change awaiting acknowledgement by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingFlagEdit {
    /// Row id in the `flags` table.
    pub id: i64,
    pub item_id: i64,
    pub flag: Flag,
    pub remove: bool,
}
