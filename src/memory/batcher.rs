//! Embedding request coalescing
//!
//! Bounds the number of upstream embedding calls under concurrent load.
//! Concurrent `embed_single` callers enqueue their text and block on a
//! private oneshot slot; the queue is flushed as one upstream call when it
//! reaches the batch size, when the linger timer fires, or when the
//! background sweep ticks. The queue lock is held only for bookkeeping,
//! never across the upstream call.

use crate::error::{Error, Result};
use crate::memory::embedding::Embedder;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

struct PendingItem {
    text: String,
    reply: oneshot::Sender<Result<Vec<f32>>>,
}

#[derive(Default)]
struct BatchState {
    queue: Vec<PendingItem>,
    /// Single-shot linger timer for the batch currently accumulating.
    /// Aborted by the size trigger; a stale handle left behind by a sweep
    /// flush at worst triggers one early, harmless flush of the next batch.
    linger_timer: Option<JoinHandle<()>>,
}

struct BatcherInner {
    client: Arc<dyn Embedder>,
    batch_size: usize,
    linger: Duration,
    state: Mutex<BatchState>,
}

impl BatcherInner {
    /// Take ownership of the queued items and resolve them with one
    /// upstream call. Safe to call concurrently and on an empty queue.
    async fn flush(&self) {
        let items = {
            let mut state = self.state.lock().await;
            std::mem::take(&mut state.queue)
        };
        if items.is_empty() {
            return;
        }

        let texts: Vec<String> = items.iter().map(|item| item.text.clone()).collect();
        debug!(batch_size = texts.len(), "Flushing embedding batch");

        match self.client.embed(&texts).await {
            Ok(vectors) if vectors.len() == items.len() => {
                for (item, vector) in items.into_iter().zip(vectors) {
                    // Delivery never blocks: a caller that already gave up
                    // has dropped its receiver
                    let _ = item.reply.send(Ok(vector));
                }
            }
            Ok(vectors) => {
                warn!(
                    expected = items.len(),
                    received = vectors.len(),
                    "Batched embedding call returned wrong vector count"
                );
                for item in items {
                    let _ = item.reply.send(Err(Error::Embedding(
                        "embedding batch returned wrong vector count".to_string(),
                    )));
                }
            }
            Err(e) => {
                warn!("Batched embedding call failed: {}", e);
                let message = e.to_string();
                for item in items {
                    let _ = item.reply.send(Err(Error::Embedding(message.clone())));
                }
            }
        }
    }
}

/// Coalesces concurrent single-text embedding requests into batched
/// upstream calls
pub struct EmbeddingBatcher {
    inner: Arc<BatcherInner>,
    shutdown: Arc<Notify>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl EmbeddingBatcher {
    /// Create a batcher and start its background sweep task
    pub fn new(client: Arc<dyn Embedder>, batch_size: usize, linger: Duration) -> Self {
        let inner = Arc::new(BatcherInner {
            client,
            batch_size: batch_size.max(1),
            // interval() rejects a zero period
            linger: linger.max(Duration::from_millis(1)),
            state: Mutex::new(BatchState::default()),
        });
        let shutdown = Arc::new(Notify::new());
        let sweeper = tokio::spawn(Self::sweep(inner.clone(), shutdown.clone()));

        EmbeddingBatcher {
            inner,
            shutdown,
            sweeper: Mutex::new(Some(sweeper)),
        }
    }

    /// Periodic safety net: flushes anything the size and linger triggers
    /// missed, and performs the final flush on shutdown
    async fn sweep(inner: Arc<BatcherInner>, shutdown: Arc<Notify>) {
        let mut tick = tokio::time::interval(inner.linger);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = tick.tick() => inner.flush().await,
                _ = shutdown.notified() => {
                    inner.flush().await;
                    return;
                }
            }
        }
    }

    /// Flush outstanding requests and stop the background sweep
    pub async fn stop(&self) {
        self.shutdown.notify_one();
        let handle = self.sweeper.lock().await.take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

impl Drop for EmbeddingBatcher {
    fn drop(&mut self) {
        if let Ok(mut sweeper) = self.sweeper.try_lock() {
            if let Some(handle) = sweeper.take() {
                handle.abort();
            }
        }
    }
}

#[async_trait]
impl Embedder for EmbeddingBatcher {
    /// A multi-text request is already one upstream call; pass it through
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.inner.client.embed(texts).await
    }

    async fn embed_single(&self, text: &str) -> Result<Vec<f32>> {
        let (reply_tx, reply_rx) = oneshot::channel();

        let flush_now = {
            let mut state = self.inner.state.lock().await;
            state.queue.push(PendingItem {
                text: text.to_string(),
                reply: reply_tx,
            });

            if state.queue.len() == 1 {
                // First item in an empty queue arms the linger timer
                let inner = self.inner.clone();
                state.linger_timer = Some(tokio::spawn(async move {
                    tokio::time::sleep(inner.linger).await;
                    inner.flush().await;
                }));
            }

            if state.queue.len() >= self.inner.batch_size {
                if let Some(timer) = state.linger_timer.take() {
                    timer.abort();
                }
                true
            } else {
                false
            }
        };

        if flush_now {
            self.inner.flush().await;
        }

        // Dropping this future (caller cancellation) drops the receiver;
        // the flush delivering into it is unaffected
        match reply_rx.await {
            Ok(result) => result,
            Err(_) => Err(Error::Internal(
                "embedding batcher dropped the request".to_string(),
            )),
        }
    }

    async fn validate_server(&self) -> Result<()> {
        self.inner.client.validate_server().await
    }
}
