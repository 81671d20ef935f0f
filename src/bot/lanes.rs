//! Per-user lanes — FIFO processing per key, concurrency across keys.
//!
//! Each key gets an unbounded queue drained by one tokio task. A task that
//! stays idle for the configured period removes its own entry and exits;
//! the next item for that key starts a fresh task.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinSet;
use tracing::debug;

/// Processes the items of one lane, one at a time.
#[async_trait]
pub trait LaneHandler: Send + Sync + 'static {
    type Item: Send + 'static;

    async fn handle(&self, item: Self::Item);
}

type LaneMap<T> = Arc<Mutex<HashMap<i64, UnboundedSender<T>>>>;

/// A set of keyed lanes sharing one handler.
pub struct Lanes<H: LaneHandler> {
    lanes: LaneMap<H::Item>,
    tasks: Mutex<JoinSet<()>>,
    handler: Arc<H>,
    idle: Duration,
}

impl<H: LaneHandler> Lanes<H> {
    pub fn new(handler: Arc<H>, idle: Duration) -> Self {
        Self {
            lanes: Arc::new(Mutex::new(HashMap::new())),
            tasks: Mutex::new(JoinSet::new()),
            handler,
            idle,
        }
    }

    /// Queue `item` behind everything already queued for `key`.
    pub async fn dispatch(&self, key: i64, item: H::Item) {
        let mut lanes = self.lanes.lock().await;

        let item = match lanes.get(&key) {
            Some(tx) => match tx.send(item) {
                Ok(()) => return,
                // The lane task died; start a new one.
                Err(mpsc::error::SendError(item)) => item,
            },
            None => item,
        };

        let (tx, rx) = mpsc::unbounded_channel();
        if tx.send(item).is_err() {
            return;
        }
        lanes.insert(key, tx);
        debug!(key, "Lane started");

        let mut tasks = self.tasks.lock().await;
        // Reap lanes that already exited.
        while tasks.try_join_next().is_some() {}
        tasks.spawn(run_lane(
            key,
            rx,
            Arc::clone(&self.lanes),
            Arc::clone(&self.handler),
            self.idle,
        ));
    }

    /// Number of live lanes.
    pub async fn active(&self) -> usize {
        self.lanes.lock().await.len()
    }

    /// Stop accepting work and wait for queued items to be processed.
    pub async fn close(&self) {
        self.lanes.lock().await.clear();
        let mut tasks = self.tasks.lock().await;
        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                tracing::warn!(error = %e, "Lane task failed");
            }
        }
    }
}

async fn run_lane<H: LaneHandler>(
    key: i64,
    mut rx: UnboundedReceiver<H::Item>,
    lanes: LaneMap<H::Item>,
    handler: Arc<H>,
    idle: Duration,
) {
    loop {
        match tokio::time::timeout(idle, rx.recv()).await {
            Ok(Some(item)) => handler.handle(item).await,
            Ok(None) => break,
            Err(_) => {
                // Senders only push while holding the map lock, so an empty
                // queue seen under the lock stays empty until we deregister.
                let mut map = lanes.lock().await;
                if rx.is_empty() {
                    map.remove(&key);
                    debug!(key, "Lane idle, exiting");
                    break;
                }
            }
        }
    }
}
