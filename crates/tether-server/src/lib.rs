pub mod auth;
pub mod delivery;
pub mod error;
pub mod handlers;
pub mod registry;
pub mod server;
pub mod ws;

pub use server::{start, AppState, ServerConfig, ServerHandle};
