pub mod database;
pub mod error;
pub mod messages;
pub mod notifications;
pub mod schema;
pub mod todos;
pub mod users;

pub use database::Database;
pub use error::StoreError;
