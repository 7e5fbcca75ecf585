use std::collections::{HashMap, VecDeque};

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use super::{EventConsumer, EventHandler, EventPublisher};

#[derive(Default)]
pub struct MemoryQueue {
    queues: Mutex<HashMap<String, VecDeque<Value>>>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages still waiting on `queue`, oldest first.
    pub async fn pending(&self, queue: &str) -> Vec<Value> {
        self.queues
            .lock()
            .await
            .get(queue)
            .map(|q| q.iter().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl EventPublisher for MemoryQueue {
    async fn publish(&self, queue: &str, payload: Value) -> Result<()> {
        self.queues
            .lock()
            .await
            .entry(queue.to_string())
            .or_default()
            .push_back(payload);
        Ok(())
    }
}

#[async_trait]
impl EventConsumer for MemoryQueue {
    async fn consume_one(&self, queue: &str, handler: &dyn EventHandler) -> Result<bool> {
        let message = self
            .queues
            .lock()
            .await
            .get_mut(queue)
            .and_then(|q| q.pop_front());

        let Some(payload) = message else {
            return Ok(false);
        };

        if let Err(e) = handler.handle(queue, payload.clone()).await {
            self.queues
                .lock()
                .await
                .entry(queue.to_string())
                .or_default()
                .push_front(payload);
            return Err(e);
        }

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct Flaky {
        fail: AtomicBool,
    }

    #[async_trait]
    impl EventHandler for Flaky {
        async fn handle(&self, _queue: &str, _payload: Value) -> Result<()> {
            if self.fail.swap(false, Ordering::SeqCst) {
                anyhow::bail!("smtp down");
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_failed_handler_leaves_message_queued() {
        let queue = MemoryQueue::new();
        queue.publish("q", json!({"n": 1})).await.unwrap();
        queue.publish("q", json!({"n": 2})).await.unwrap();

        let handler = Flaky { fail: AtomicBool::new(true) };
        assert!(queue.consume_one("q", &handler).await.is_err());
        assert_eq!(queue.pending("q").await, vec![json!({"n": 1}), json!({"n": 2})]);

        assert!(queue.consume_one("q", &handler).await.unwrap());
        assert_eq!(queue.pending("q").await, vec![json!({"n": 2})]);
    }

    #[tokio::test]
    async fn test_empty_queue() {
        let queue = MemoryQueue::new();
        let handler = Flaky { fail: AtomicBool::new(false) };
        assert!(!queue.consume_one("q", &handler).await.unwrap());
    }
}
