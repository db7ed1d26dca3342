pub mod auth;
pub mod messages;
pub mod notifications;
pub mod todos;
pub mod users;
