mod handlers;
mod routes;

use axum::Router;
use gradebox_common::clock::SystemClock;
use gradebox_common::config::Config;
use gradebox_common::store::RedisStore;
use gradebox_engine::grade::GradingEngine;
use gradebox_engine::runtime::DockerRuntimeFactory;
use gradebox_engine::service::GradingService;
use gradebox_engine::session::SessionPool;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::info;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<GradingService>,
}

#[tokio::main]
async fn main() {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
        )
        .with_target(false)
        .init();

    info!("Gradebox API booting...");

    let config = Config::from_env()
        .expect("Invalid configuration");

    let store = RedisStore::connect(&config.redis_url).await
        .expect("Failed to connect to Redis");

    info!("Connected to Redis: {}", config.redis_url);

    let factory = DockerRuntimeFactory::new(
        config.runtime_image.clone(),
        config.session_memory_mb,
        config.session_cpus,
    )
    .expect("Failed to connect to Docker daemon");

    let pool = SessionPool::new(Arc::new(factory), config.session_pool_size);
    let engine = GradingEngine::new(pool, Duration::from_millis(config.run_timeout_ms));
    let service = GradingService::new(
        engine,
        Arc::new(store),
        Arc::new(SystemClock),
        config.course_start,
        config.reveal_hidden_results,
    );

    let state = Arc::new(AppState {
        service: Arc::new(service),
    });

    // Build router
    let app = Router::new()
        .merge(routes::routes())
        .with_state(state);

    // Start server
    let addr = "0.0.0.0:3000";
    let listener = TcpListener::bind(addr).await
        .expect("Failed to bind to address");

    info!("HTTP server listening on {}", addr);
    info!("Ready to accept submissions");

    axum::serve(listener, app).await
        .expect("Server error");
}
