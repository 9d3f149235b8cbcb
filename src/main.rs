use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use huddle::config::Config;
use huddle::services::fallback::drain_once;
use huddle::state::AppState;

const DRAIN_INTERVAL: Duration = Duration::from_secs(10);
const DRAIN_BATCH: usize = 100;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    tracing::info!("✅ Configuration loaded successfully");

    let state = AppState::new(&config).await?;
    tracing::info!("✅ AppState initialized");

    let drain_state = state.clone();
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(DRAIN_INTERVAL).await;
            if let Err(e) =
                drain_once(drain_state.fallback.as_ref(), &drain_state.tokens, DRAIN_BATCH).await
            {
                tracing::error!("❌ Fallback drain failed: {}", e);
            }
        }
    });

    let app = huddle::routes::router(state);

    let addr = config.bind_addr;
    tracing::info!("🚀 Server listening on http://{}", addr);
    tracing::info!("✅ Fallback queue drain started (every {:?})", DRAIN_INTERVAL);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
