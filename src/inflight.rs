//! Single-flight execution keyed by cache key.
//!
//! The first caller for a key spawns the work as its own task; later callers
//! attach to the same shared result. The task outlives any caller that stops
//! waiting, and removes its map entry only after the work (including any cache
//! write it performs) has finished.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError};

use futures::future::{BoxFuture, FutureExt, Shared};
use tracing::debug;

#[derive(Debug, Clone, thiserror::Error)]
pub enum InFlightError {
    #[error("in-flight task failed: {0}")]
    Join(String),
}

type SharedTask<V> = Shared<BoxFuture<'static, Result<V, InFlightError>>>;

#[derive(Debug, Clone, PartialEq)]
pub struct Deduped<V> {
    pub value: V,
    /// True when this caller attached to a call another caller started.
    pub joined: bool,
}

pub struct InFlightDeduper<K, V> {
    tasks: Arc<Mutex<HashMap<K, SharedTask<V>>>>,
}

impl<K, V> Default for InFlightDeduper<K, V> {
    fn default() -> Self {
        Self {
            tasks: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<K, V> Clone for InFlightDeduper<K, V> {
    fn clone(&self) -> Self {
        Self {
            tasks: Arc::clone(&self.tasks),
        }
    }
}

impl<K, V> InFlightDeduper<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + std::fmt::Debug + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys with outstanding work.
    pub fn len(&self) -> usize {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run `make()` for `key` unless a call for it is already outstanding.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn run<F, Fut>(&self, key: K, make: F) -> Result<Deduped<V>, InFlightError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V> + Send + 'static,
    {
        let (task, joined) = {
            let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
            match tasks.get(&key) {
                Some(existing) => (existing.clone(), true),
                None => {
                    let task = self.spawn(key.clone(), make());
                    tasks.insert(key.clone(), task.clone());
                    (task, false)
                }
            }
        };
        if joined {
            debug!(key = ?key, "attached to in-flight call");
        }
        let value = task.await?;
        Ok(Deduped { value, joined })
    }

    fn spawn<Fut>(&self, key: K, work: Fut) -> SharedTask<V>
    where
        Fut: Future<Output = V> + Send + 'static,
    {
        let tasks = Arc::clone(&self.tasks);
        let handle = tokio::spawn(async move {
            let value = work.await;
            tasks
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&key);
            value
        });
        async move { handle.await.map_err(|e| InFlightError::Join(e.to_string())) }
            .boxed()
            .shared()
    }
}
