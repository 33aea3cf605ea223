use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use chess_lobby_core::{build_services, Config, Database, Matchmaker, MemoryCache, SessionStore};

mod routes;

pub struct AppState {
    pub db: Arc<Database>,
    pub sessions: SessionStore,
    pub matchmaker: Matchmaker,
    /// Cancelled on shutdown so parked long-polls return promptly
    pub shutdown: CancellationToken,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt::init();

    let config = Config::from_env()?;
    let db = Arc::new(Database::open(&config.database_path)?);
    let cache = Arc::new(MemoryCache::new());
    let (sessions, matchmaker) = build_services(db.clone(), cache, &config);

    let shutdown = CancellationToken::new();
    let state = Arc::new(AppState {
        db,
        sessions,
        matchmaker,
        shutdown: shutdown.clone(),
    });

    let app = routes::router(state);
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    tracing::info!(addr = %config.listen_addr, db = %config.database_path.display(), "server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for shutdown signal");
            }
            tracing::info!("shutting down");
            shutdown.cancel();
        })
        .await?;

    Ok(())
}
