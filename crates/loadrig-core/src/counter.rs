//! Keyed integer tallies owned by a single worker task.
//!
//! Callers never touch the table. Every operation is a message on one
//! unbounded queue, so the worker applies them in enqueue order: a `get`
//! observes every `increment` that was enqueued before it.

use std::collections::{BTreeMap, HashMap};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CounterError {
    #[error("counter closed")]
    Closed,
}

enum CounterRequest {
    Increment {
        key: String,
        delta: i64,
    },
    IncrementAll {
        keys: Vec<String>,
        delta: i64,
    },
    Get {
        key: String,
        reply: oneshot::Sender<i64>,
    },
    Snapshot {
        reply: oneshot::Sender<BTreeMap<String, i64>>,
    },
    Close {
        done: oneshot::Sender<()>,
    },
}

/// Handle to a running counter. Clones share the same worker.
#[derive(Debug, Clone)]
pub struct Counter {
    requests: mpsc::UnboundedSender<CounterRequest>,
}

impl Counter {
    /// Spawns the worker on the current Tokio runtime.
    pub fn new() -> Self {
        let (requests, rx) = mpsc::unbounded_channel();
        tokio::spawn(run(rx));
        Self { requests }
    }

    /// Adds `delta` to `key` without waiting for the worker.
    pub fn increment(&self, key: impl Into<String>, delta: i64) -> Result<(), CounterError> {
        self.requests
            .send(CounterRequest::Increment {
                key: key.into(),
                delta,
            })
            .map_err(|_| CounterError::Closed)
    }

    /// Adds `delta` to every key in one message, so `get` and `snapshot`
    /// observe all of the keys updated or none of them.
    pub fn increment_all(&self, keys: &[&str], delta: i64) -> Result<(), CounterError> {
        self.requests
            .send(CounterRequest::IncrementAll {
                keys: keys.iter().map(|k| k.to_string()).collect(),
                delta,
            })
            .map_err(|_| CounterError::Closed)
    }

    /// Current value of `key`; keys never written read as zero.
    pub async fn get(&self, key: &str) -> Result<i64, CounterError> {
        let (reply, rx) = oneshot::channel();
        self.requests
            .send(CounterRequest::Get {
                key: key.to_string(),
                reply,
            })
            .map_err(|_| CounterError::Closed)?;
        rx.await.map_err(|_| CounterError::Closed)
    }

    /// Every key written so far, in key order.
    pub async fn snapshot(&self) -> Result<BTreeMap<String, i64>, CounterError> {
        let (reply, rx) = oneshot::channel();
        self.requests
            .send(CounterRequest::Snapshot { reply })
            .map_err(|_| CounterError::Closed)?;
        rx.await.map_err(|_| CounterError::Closed)
    }

    /// Stops accepting messages, lets the worker apply everything already
    /// queued, and resolves once it has exited. Once a close has taken
    /// effect, further calls return immediately.
    pub async fn close(&self) {
        let (done, finished) = oneshot::channel();
        if self.requests.send(CounterRequest::Close { done }).is_ok() {
            let _ = finished.await;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.requests.is_closed()
    }
}

impl Default for Counter {
    fn default() -> Self {
        Self::new()
    }
}

async fn run(mut requests: mpsc::UnboundedReceiver<CounterRequest>) {
    let mut table: HashMap<String, i64> = HashMap::new();
    let mut closers = Vec::new();

    while let Some(request) = requests.recv().await {
        match request {
            CounterRequest::Increment { key, delta } => {
                *table.entry(key).or_insert(0) += delta;
            }
            CounterRequest::IncrementAll { keys, delta } => {
                for key in keys {
                    *table.entry(key).or_insert(0) += delta;
                }
            }
            CounterRequest::Get { key, reply } => {
                let _ = reply.send(table.get(&key).copied().unwrap_or(0));
            }
            CounterRequest::Snapshot { reply } => {
                let snapshot = table.iter().map(|(k, v)| (k.clone(), *v)).collect();
                let _ = reply.send(snapshot);
            }
            CounterRequest::Close { done } => {
                debug!("counter closing, draining queue");
                requests.close();
                closers.push(done);
            }
        }
    }

    debug!(keys = table.len(), "counter worker stopped");
    for done in closers {
        let _ = done.send(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unknown_key_reads_zero() {
        let counter = Counter::new();
        assert_eq!(counter.get("never-written").await, Ok(0));
    }

    #[tokio::test]
    async fn test_increment_then_get_same_caller() {
        let counter = Counter::new();
        counter.increment("200s", 1).unwrap();
        counter.increment("200s", 2).unwrap();
        counter.increment("errors", -1).unwrap();

        assert_eq!(counter.get("200s").await, Ok(3));
        assert_eq!(counter.get("errors").await, Ok(-1));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_increments_are_all_applied() {
        for n in [1usize, 10, 1000] {
            let counter = Counter::new();
            let mut handles = Vec::with_capacity(n);
            for _ in 0..n {
                let counter = counter.clone();
                handles.push(tokio::spawn(async move {
                    counter.increment("total", 1).unwrap();
                }));
            }
            for handle in handles {
                handle.await.unwrap();
            }

            assert_eq!(counter.get("total").await, Ok(n as i64), "n = {n}");
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_many_keys_from_many_threads() {
        let counter = Counter::new();
        let mut handles = Vec::new();
        for worker in 0..8 {
            let counter = counter.clone();
            handles.push(tokio::spawn(async move {
                for i in 0..250 {
                    let key = if i % 2 == 0 { "even" } else { "odd" };
                    counter.increment(key, 1).unwrap();
                    counter.increment(format!("worker-{worker}"), 1).unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let snapshot = counter.snapshot().await.unwrap();
        assert_eq!(snapshot["even"], 1000);
        assert_eq!(snapshot["odd"], 1000);
        assert_eq!(snapshot.len(), 10);
        assert_eq!(snapshot["worker-3"], 250);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_snapshot_never_splits_increment_all() {
        let counter = Counter::new();
        let writer = {
            let counter = counter.clone();
            tokio::spawn(async move {
                for _ in 0..5_000 {
                    counter.increment_all(&["200s", "total"], 1).unwrap();
                    tokio::task::yield_now().await;
                }
            })
        };

        while !writer.is_finished() {
            let snapshot = counter.snapshot().await.unwrap();
            let ok = snapshot.get("200s").copied().unwrap_or(0);
            let total = snapshot.get("total").copied().unwrap_or(0);
            assert_eq!(ok, total);
        }
        writer.await.unwrap();

        let snapshot = counter.snapshot().await.unwrap();
        assert_eq!(snapshot["200s"], 5_000);
        assert_eq!(snapshot["total"], 5_000);
    }

    #[tokio::test]
    async fn test_snapshot_is_ordered() {
        let counter = Counter::new();
        counter.increment("errors", 1).unwrap();
        counter.increment("200s", 4).unwrap();
        counter.increment("total", 5).unwrap();

        let keys: Vec<_> = counter.snapshot().await.unwrap().into_keys().collect();
        assert_eq!(keys, vec!["200s", "errors", "total"]);
    }

    #[tokio::test]
    async fn test_calls_after_close_fail() {
        let counter = Counter::new();
        let other = counter.clone();
        counter.increment("total", 1).unwrap();

        counter.close().await;

        assert!(other.is_closed());
        assert_eq!(other.increment("total", 1), Err(CounterError::Closed));
        assert_eq!(other.get("total").await, Err(CounterError::Closed));
        assert_eq!(other.snapshot().await, Err(CounterError::Closed));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let counter = Counter::new();
        counter.close().await;
        counter.close().await;
        assert_eq!(counter.get("x").await, Err(CounterError::Closed));
    }

    #[tokio::test]
    async fn test_get_queued_before_close_is_answered() {
        let counter = Counter::new();
        counter.increment("total", 7).unwrap();

        // Both futures are polled in order: the get is enqueued before the close.
        let (value, ()) = tokio::join!(counter.get("total"), counter.close());
        assert_eq!(value, Ok(7));
    }
}
