use std::path::PathBuf;

use tether_store::Database;

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    tracing::info!("Starting Tether server");

    // Database path
    let data_dir = dirs_home().join(".tether").join("database");
    std::fs::create_dir_all(&data_dir).expect("Failed to create database directory");
    let db_path = data_dir.join("tether.db");

    let db = Database::open(&db_path).expect("Failed to open database");
    tracing::info!(path = %db_path.display(), "Database opened");

    let mut config = tether_server::ServerConfig::default();
    if let Ok(port) = std::env::var("PORT") {
        config.port = port.parse().expect("PORT must be a number");
    }
    if let Ok(secret) = std::env::var("JWT_SECRET") {
        config.jwt_secret = secret;
    } else {
        tracing::warn!("JWT_SECRET not set, using the default development secret");
    }

    let port = config.port;
    let _handle = tether_server::start(config, db)
        .await
        .expect("Failed to start server");

    tracing::info!(port = port, "Tether server ready");

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to listen for ctrl+c");

    tracing::info!("Shutting down");
}

fn dirs_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}
