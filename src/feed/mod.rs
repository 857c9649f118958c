mod normalize;

pub use normalize::{normalize, short_id, strip_markup, RemoteItem, Timestamp};
