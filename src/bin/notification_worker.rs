use std::sync::Arc;

use anyhow::Result;

use campus_chat::config::{AppConfig, Backend};
use campus_chat::notify::{LogNotifier, NotificationWorker};
use campus_chat::queue::postgres::PgQueue;
use campus_chat::store::postgres::PgStore;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    campus_chat::init_tracing();

    let config = AppConfig::load()?;
    if config.store_backend == Backend::Memory {
        anyhow::bail!("The notification worker needs the postgres backend; the memory backend drains its queue in-process");
    }

    let store = PgStore::connect(&config.database_url).await?;
    let queue = PgQueue::new(store.pool().clone());
    queue.init_schema().await?;
    tracing::info!("Notification worker connected to {}", config.database_url);

    let worker = NotificationWorker::new(Arc::new(queue), Arc::new(LogNotifier), config.poll_interval());

    tokio::select! {
        _ = worker.run() => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutting down notification worker");
        }
    }

    Ok(())
}
