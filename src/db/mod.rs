mod connection;
mod error;
mod helpers;
mod migrations;
pub mod models;
mod repositories;

pub use connection::Database;
pub use error::{StoreError, StoreResult};
pub use models::{ImageRecord, ImageStatus};
