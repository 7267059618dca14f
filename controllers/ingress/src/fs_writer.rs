//! Parallel filesystem writer
//!
//! Closures passed to [`FsWriter::write`] run on the blocking pool, at most
//! [`MAX_PARALLEL_WRITES`] at a time. [`FsWriter::wait_until_writes_done`]
//! is the fence used before a reload: it waits for every scheduled write and
//! holds off new submissions while waiting.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{Mutex, RwLock, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error};

/// Concurrent writes allowed.
pub const MAX_PARALLEL_WRITES: usize = 20;

type WriteFn = Box<dyn FnOnce() -> std::io::Result<()> + Send + 'static>;

/// Bounded-parallelism file writer with a delayed-functions registry.
pub struct FsWriter {
    limit: Arc<Semaphore>,
    tasks: Mutex<JoinSet<()>>,
    gate: RwLock<()>,
    delayed: StdMutex<BTreeMap<String, WriteFn>>,
}

impl std::fmt::Debug for FsWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FsWriter")
            .field("available_permits", &self.limit.available_permits())
            .finish_non_exhaustive()
    }
}

impl Default for FsWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl FsWriter {
    pub fn new() -> Self {
        Self {
            limit: Arc::new(Semaphore::new(MAX_PARALLEL_WRITES)),
            tasks: Mutex::new(JoinSet::new()),
            gate: RwLock::new(()),
            delayed: StdMutex::new(BTreeMap::new()),
        }
    }

    /// Schedules `f`. Errors are logged, the caller does not wait.
    pub async fn write<F>(&self, f: F)
    where
        F: FnOnce() -> std::io::Result<()> + Send + 'static,
    {
        let _gate = self.gate.read().await;
        self.spawn(Box::new(f)).await;
    }

    async fn spawn(&self, f: WriteFn) {
        let limit = Arc::clone(&self.limit);
        self.tasks.lock().await.spawn(async move {
            let Ok(_permit) = limit.acquire_owned().await else {
                return;
            };
            match tokio::task::spawn_blocking(f).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("file write failed: {}", e),
                Err(e) => error!("file write task failed: {}", e),
            }
        });
    }

    /// Waits for every scheduled write.
    pub async fn wait_until_writes_done(&self) {
        let _gate = self.gate.write().await;
        let mut tasks = self.tasks.lock().await;
        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                error!("file write task failed: {}", e);
            }
        }
    }

    /// Registers a function run by [`FsWriter::run_delayed`]. A function
    /// registered under the same name replaces the previous one.
    pub fn add_delayed<F>(&self, name: impl Into<String>, f: F)
    where
        F: FnOnce() -> std::io::Result<()> + Send + 'static,
    {
        if let Ok(mut delayed) = self.delayed.lock() {
            delayed.insert(name.into(), Box::new(f));
        }
    }

    /// Delayed functions queued for the next [`FsWriter::run_delayed`].
    pub fn delayed_count(&self) -> usize {
        self.delayed.lock().map(|d| d.len()).unwrap_or(0)
    }

    /// Drains the delayed functions through the write throttle and waits
    /// for them.
    pub async fn run_delayed(&self) {
        let functions = match self.delayed.lock() {
            Ok(mut delayed) => std::mem::take(&mut *delayed),
            Err(_) => BTreeMap::new(),
        };
        if !functions.is_empty() {
            debug!("running {} delayed functions", functions.len());
        }
        {
            let _gate = self.gate.read().await;
            for (_, f) in functions {
                self.spawn(f).await;
            }
        }
        self.wait_until_writes_done().await;
    }
}
