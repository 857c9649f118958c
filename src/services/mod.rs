mod auth;
mod reader;

pub use auth::Auth;
pub use reader::ReaderClient;
