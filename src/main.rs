use std::sync::Arc;

use anyhow::{Context, Result};

use campus_chat::cache::MemoryCache;
use campus_chat::config::{AppConfig, Backend};
use campus_chat::notify::{LogNotifier, NotificationWorker};
use campus_chat::queue::memory::MemoryQueue;
use campus_chat::queue::postgres::PgQueue;
use campus_chat::queue::EventPublisher;
use campus_chat::server::{self, AppState, Components};
use campus_chat::store::memory::MemoryStore;
use campus_chat::store::postgres::PgStore;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    campus_chat::init_tracing();

    let config = AppConfig::load()?;

    tracing::info!("Vector backend: {:?} ({})", config.vector_backend, config.qdrant_url);
    let embeddings = config.embedding_provider()?;
    if let Err(e) = embeddings.warm_up().await {
        tracing::warn!("Embedding provider not ready (retrieval will degrade until it is): {}", e);
    }
    let index = config
        .vector_index()
        .await
        .context("Failed to initialize vector index")?;
    let generator = config.generation_provider()?;

    let components = |publisher: Arc<dyn EventPublisher>| Components {
        embeddings: embeddings.clone(),
        index: index.clone(),
        generator: generator.clone(),
        cache: Arc::new(MemoryCache::new()),
        publisher,
    };

    let state = match config.store_backend {
        Backend::Postgres => {
            tracing::info!("Connecting to database: {}", config.database_url);
            let store = Arc::new(PgStore::connect(&config.database_url).await?);
            store.init_schema().await?;
            let queue = Arc::new(PgQueue::new(store.pool().clone()));
            queue.init_schema().await?;

            AppState::new(
                store,
                components(queue as Arc<dyn EventPublisher>),
                config.rag_settings(),
                config.ingest_settings(),
            )
        }
        Backend::Memory => {
            tracing::warn!("Using in-memory store; data is lost on restart");
            let store = Arc::new(MemoryStore::new());
            let queue = Arc::new(MemoryQueue::new());

            // Nothing outside this process can see the queue, so drain it here.
            let worker = NotificationWorker::new(queue.clone(), Arc::new(LogNotifier), config.poll_interval());
            tokio::spawn(async move { worker.run().await });

            AppState::new(
                store,
                components(queue as Arc<dyn EventPublisher>),
                config.rag_settings(),
                config.ingest_settings(),
            )
        }
    };

    let app = server::router(Arc::new(state));

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("Campus chat listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("Shutting down");
        })
        .await?;

    Ok(())
}
