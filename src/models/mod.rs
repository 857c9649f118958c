mod flag;
mod item;
mod view;

pub use flag::{Flag, PendingFlagEdit};
pub use item::{Item, ItemMetadata, ItemRef};
pub use view::SavedView;
