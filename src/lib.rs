//! Offline synchronization core of the trifle feed reader.

pub mod config;
pub mod db;
pub mod error;
pub mod feed;
pub mod models;
pub mod services;
pub mod sync;

pub use error::{AppError, Result};
