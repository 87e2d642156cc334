use std::{sync::Arc, time::Duration};

use chatchat::{AppState, Config, Hub, blob::{BlobStore, HttpBlobStore}, db};
use clap::Parser;
use sqlx::sqlite::SqlitePoolOptions;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const UPLOAD_GRACE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let config = Config::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let registry = tracing_subscriber::registry().with(filter);
    if config.json_logs {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }

    let db_pool = if config.database_url == "sqlite::memory:" {
        db::in_memory().await?
    } else {
        SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.database_url)
            .await?
    };

    let blobs = config
        .blob_url
        .as_deref()
        .map(|url| Arc::new(HttpBlobStore::new(url)) as Arc<dyn BlobStore>);

    let hub = Hub::open(db_pool, config.hub_options(), blobs).await?;
    let app_state = AppState {
        hub: hub.clone(),
        heartbeat: config.heartbeat(),
    };
    let app = chatchat::app(app_state, config.session_idle_minutes);

    let listener = tokio::net::TcpListener::bind(config.bind).await?;
    info!(addr = %config.bind, "listening");
    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;
    hub.drain_uploads(UPLOAD_GRACE).await;

    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("shutting down");
    }
}
