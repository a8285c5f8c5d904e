use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use gradflow::api;
use gradflow::config::Config;
use gradflow::store::{InMemoryRepository, Repository, SqliteRepository};
use gradflow::workflow::{LogNotificationSink, WorkflowEngine};
use gradflow::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env().context("Failed to load configuration")?;

    let repo: Arc<dyn Repository> = match config.database_path() {
        Some(path) => {
            info!(path = %path.display(), "using SQLite store");
            Arc::new(
                SqliteRepository::new(&path)
                    .with_context(|| format!("Failed to open database at {}", path.display()))?,
            )
        }
        None => {
            info!("STATE_DIR not set; using in-memory store (state lost on restart)");
            Arc::new(InMemoryRepository::new())
        }
    };

    let engine = Arc::new(WorkflowEngine::new(
        repo,
        Arc::new(LogNotificationSink),
        config.pass_mark,
    ));
    let state = Arc::new(AppState::new(engine));

    let app = api::router(state).layer(TraceLayer::new_for_http());

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;
    info!("gradflow listening on {addr}");

    axum::serve(listener, app)
        .await
        .context("Server error")?;

    Ok(())
}
