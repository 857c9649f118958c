mod content;
mod repository;
mod schema;

pub use content::ContentStore;
pub use repository::Repository;
