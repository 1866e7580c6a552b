//! At most one live workflow per conversation.
//!
//! Starting a run for a key cancels the previous run for that key before the
//! new one is spawned. Cancellation is cooperative: the old run keeps going
//! until it checks its token, so brief overlap is possible.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::workers::WorkerPool;

struct Run {
    generation: u64,
    token: CancellationToken,
}

#[derive(Default)]
struct Registry {
    runs: HashMap<String, Run>,
    next_generation: u64,
}

#[derive(Clone)]
pub struct ConversationScheduler {
    registry: Arc<Mutex<Registry>>,
    pool: WorkerPool,
}

impl ConversationScheduler {
    pub fn new(pool: WorkerPool) -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry::default())),
            pool,
        }
    }

    fn registry(&self) -> std::sync::MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Cancel whatever runs for `key`, then launch `work` with a fresh token.
    pub fn start<F, Fut>(&self, key: &str, work: F) -> JoinHandle<()>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let token = self.pool.child_token();
        let generation = {
            let mut registry = self.registry();
            registry.next_generation += 1;
            let generation = registry.next_generation;
            let previous = registry.runs.insert(
                key.to_string(),
                Run {
                    generation,
                    token: token.clone(),
                },
            );
            if let Some(previous) = previous {
                tracing::debug!(
                    conversation = key,
                    old = previous.generation,
                    new = generation,
                    "Cancelling previous workflow"
                );
                previous.token.cancel();
            }
            generation
        };

        let future = work(token);
        let registry = self.registry.clone();
        let key = key.to_string();
        self.pool.spawn(async move {
            future.await;
            let mut registry = registry.lock().unwrap_or_else(|p| p.into_inner());
            // A newer run may own the slot by now.
            if registry
                .runs
                .get(&key)
                .map(|run| run.generation == generation)
                .unwrap_or(false)
            {
                registry.runs.remove(&key);
            }
        })
    }

    /// Cancel the run for `key`, if any.
    pub fn cancel(&self, key: &str) -> bool {
        match self.registry().runs.remove(key) {
            Some(run) => {
                run.token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_active(&self, key: &str) -> bool {
        self.registry().runs.contains_key(key)
    }

    pub fn active_count(&self) -> usize {
        self.registry().runs.len()
    }
}
