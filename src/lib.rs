pub mod cache;
pub mod config;
pub mod error;
pub mod escalation;
pub mod generation;
pub mod indexer;
pub mod models;
pub mod notify;
pub mod queue;
pub mod rag;
pub mod retry;
pub mod server;
pub mod store;

/// Installs the fmt subscriber, filtered by `RUST_LOG` (default `info`).
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
