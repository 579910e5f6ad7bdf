use std::sync::Arc;

use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use arkiv_api::{app, AppState};

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "arkiv_api=debug,arkiv=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Pipeline setup (font warmup, validator init, HTTP client) is blocking
    // work; keep it off the async executor.
    let state = tokio::task::spawn_blocking(AppState::from_env)
        .await
        .expect("startup task panicked")
        .expect("pipeline initialization failed");

    let addr = state.config.bind_addr.clone();
    let router = app(Arc::new(state));

    let listener = tokio::net::TcpListener::bind(&addr).await.unwrap();
    info!("arkiv API listening on http://{addr}");

    axum::serve(listener, router).await.unwrap();
}
