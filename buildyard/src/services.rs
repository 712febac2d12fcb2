//! Registry of long-lived background services
//!
//! Signal handlers start servers, watchers and shell hooks as tokio tasks.
//! The handles are kept here, per owning module, so the worker process can
//! wait for them to finish or abort them on shutdown.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Background task handles keyed by owning module
pub struct ServiceRegistry {
    tasks: Arc<Mutex<HashMap<String, Vec<JoinHandle<()>>>>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self {
            tasks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Handle map, recovered if a holder panicked
    fn tasks(&self) -> MutexGuard<'_, HashMap<String, Vec<JoinHandle<()>>>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a background task for a module
    ///
    /// Call this after `tokio::spawn` to keep the worker alive until it ends.
    pub fn register(&self, module: impl Into<String>, handle: JoinHandle<()>) {
        let module = module.into();
        debug!(module = %module, "Registered background service");
        self.tasks().entry(module).or_default().push(handle);
    }

    /// Spawn and register in one go
    pub fn spawn<F>(&self, module: impl Into<String>, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        self.register(module, tokio::spawn(future));
    }

    /// Number of services not yet finished
    pub fn active(&self) -> usize {
        self.tasks()
            .values()
            .flatten()
            .filter(|handle| !handle.is_finished())
            .count()
    }

    /// Abort everything (on shutdown)
    pub fn cancel_everything(&self) {
        for (module, handles) in self.tasks().drain() {
            debug!(module = %module, count = handles.len(), "Aborting services");
            for handle in handles {
                handle.abort();
            }
        }
    }

    /// Wait until every registered service has ended
    ///
    /// Services registered while waiting are picked up too.
    pub async fn wait_all(&self) {
        loop {
            let drained: Vec<(String, JoinHandle<()>)> = self
                .tasks()
                .drain()
                .flat_map(|(module, handles)| handles.into_iter().map(move |h| (module.clone(), h)))
                .collect();
            if drained.is_empty() {
                return;
            }
            for (module, handle) in drained {
                if let Err(e) = handle.await {
                    if !e.is_cancelled() {
                        warn!(module = %module, error = %e, "Background service panicked");
                    }
                }
            }
        }
    }
}

impl Clone for ServiceRegistry {
    fn clone(&self) -> Self {
        Self {
            tasks: Arc::clone(&self.tasks),
        }
    }
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
