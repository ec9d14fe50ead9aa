use crate::admission::{admission_middleware, AppState};
use crate::config::Config;
use crate::error::Result;
use crate::handlers;
use crate::store::{CounterBackend, DurableStore, RedisCounterStore};
use axum::http::Method;
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

pub struct Server {
    config: Config,
    state: Arc<AppState>,
}

impl Server {
    pub async fn new(config: Config) -> Result<Self> {
        let durable = DurableStore::open(&config.storage.db).await?;
        let counters: Arc<dyn CounterBackend> = Arc::new(RedisCounterStore::connect(&config.storage.redis).await?);

        let state = Arc::new(AppState {
            durable,
            counters,
            config: config.clone(),
        });

        Ok(Self { config, state })
    }

    pub async fn start(self) -> Result<()> {
        let app = self.create_app();
        let addr = format!("{}:{}", self.config.server.bind, self.config.server.port);

        info!("QuotaGate listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr).await?;
        axum::serve(listener, app).await?;

        Ok(())
    }

    fn create_app(&self) -> Router {
        let notify_routes = Router::new()
            .route("/api/notify/sms", post(handlers::notify_sms))
            .route("/api/notify/email", post(handlers::notify_email))
            .layer(axum::middleware::from_fn_with_state(
                Arc::clone(&self.state),
                admission_middleware,
            ))
            .with_state(Arc::clone(&self.state));

        let public_routes = Router::new()
            .route("/health", get(handlers::health))
            .route("/status", get(handlers::status))
            .with_state(Arc::clone(&self.state));

        let admin_routes = Router::new()
            .route("/api/admin/rate-limit/status", get(handlers::rate_limit_status))
            .with_state(Arc::clone(&self.state));

        Router::new()
            .merge(notify_routes)
            .merge(public_routes)
            .merge(admin_routes)
            .layer(TraceLayer::new_for_http())
            .layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                    .allow_headers(Any),
            )
    }
}
