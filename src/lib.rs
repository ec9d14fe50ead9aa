//! QuotaGate — a distributed rate limiter in front of a notification-sending
//! HTTP surface (SMS/email). A shared Redis counter store enforces per-client
//! and system-wide ceilings atomically across every node; a SQLite store
//! holds subscription plans, clients, and global rules.

pub mod admission;
pub mod buckets;
pub mod classifier;
pub mod config;
pub mod error;
pub mod evaluator;
pub mod handlers;
pub mod limits;
pub mod resolver;
pub mod server;
pub mod store;
pub mod types;

pub use config::Config;
pub use error::{AppError, Result};
pub use server::Server;

/// Initialize QuotaGate's tracing/logging subsystem.
pub fn init_tracing() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "quotagate=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
