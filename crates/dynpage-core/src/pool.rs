//! Instance preload pool and the reuse ring.
//!
//! Bootstrapping an instance (host functions plus two glue programs) is
//! the expensive part of serving a dynamic page, so a background producer
//! keeps a bounded channel of ready instances topped up. The channel
//! capacity is the `jobs` setting: the producer blocks on a full channel
//! and wakes whenever a consumer takes one, so the pool self-regulates
//! without counters.
//!
//! Instances flow one way: out of the pool, through one request, into
//! disposal. Finalizing an instance can be slow, so disposal happens on
//! the blocking thread pool, off the request path.

use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use tracing::{debug, error, info};

use crate::ScriptEngine;
use crate::instance::{LoadedPage, PageInstance};
use dynpage_common::{ExecutionConfig, PageError};

/// Background-producer pool of bootstrapped instances.
pub struct InstancePool {
    receiver: Mutex<mpsc::Receiver<PageInstance>>,
    jobs: usize,
}

impl InstancePool {
    /// Start the pool: probe one bootstrap, then spawn the producer.
    ///
    /// The probe runs before anything is spawned so a broken bootstrap
    /// surfaces as a clean startup error instead of a crash loop. The
    /// probed instance becomes the first pool entry.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if `jobs` is zero, or `BootstrapFailed` if
    /// the probe fails.
    pub async fn start(
        engine: ScriptEngine,
        exec: ExecutionConfig,
        jobs: usize,
    ) -> Result<Arc<Self>, PageError> {
        if jobs == 0 {
            return Err(PageError::invalid_config("jobs must be at least 1"));
        }

        let probe = PageInstance::bootstrap(&engine, &exec).await?;

        let (sender, receiver) = mpsc::channel(jobs);
        // Capacity is at least 1, so seeding cannot block.
        if sender.send(probe).await.is_err() {
            return Err(PageError::PoolClosed);
        }

        tokio::spawn(producer(engine, exec, sender));
        info!(jobs, "Instance preload pool started");

        Ok(Arc::new(Self {
            receiver: Mutex::new(receiver),
            jobs,
        }))
    }

    /// Take a ready instance, waiting for the producer if the pool is
    /// momentarily empty.
    ///
    /// # Errors
    ///
    /// Returns `PoolClosed` after [`InstancePool::shutdown`].
    pub async fn acquire(&self) -> Result<PageInstance, PageError> {
        let mut receiver = self.receiver.lock().await;
        receiver.recv().await.ok_or(PageError::PoolClosed)
    }

    /// Dispose of a used instance off the request path.
    ///
    /// Used instances are never returned to the pool; every request gets
    /// a freshly bootstrapped one.
    pub fn dispose(instance: PageInstance) {
        tokio::task::spawn_blocking(move || drop(instance));
    }

    /// Stop the producer and drain the pool.
    ///
    /// Subsequent `acquire` calls fail with `PoolClosed`; the producer
    /// exits on its next send.
    pub async fn shutdown(&self) {
        let mut receiver = self.receiver.lock().await;
        receiver.close();
        while let Some(instance) = receiver.recv().await {
            Self::dispose(instance);
        }
        debug!("Instance preload pool shut down");
    }

    /// The configured pool capacity.
    pub fn jobs(&self) -> usize {
        self.jobs
    }
}

impl std::fmt::Debug for InstancePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstancePool")
            .field("jobs", &self.jobs)
            .finish_non_exhaustive()
    }
}

/// Producer loop: bootstrap instances until the pool closes.
///
/// A bootstrap failure here is fatal for the process. The probe already
/// proved the glue programs work, so a failure at this point means the
/// runtime itself is broken and every further instance would be too.
async fn producer(
    engine: ScriptEngine,
    exec: ExecutionConfig,
    sender: mpsc::Sender<PageInstance>,
) {
    loop {
        match PageInstance::bootstrap(&engine, &exec).await {
            Ok(instance) => {
                if sender.send(instance).await.is_err() {
                    debug!("Pool closed, producer exiting");
                    return;
                }
            }
            Err(e) => {
                error!(error = %e, "Instance bootstrap failed in producer, aborting");
                std::process::exit(1);
            }
        }
    }
}

/// Fixed-size ring of resident, pre-loaded pages for one dynamic route.
///
/// Unlike the preload pool, pages here are recycled: a handler checks one
/// out, re-binds its context, invokes it, and puts it back. Capacity is
/// half the pool's `jobs` per route.
pub struct ReuseRing {
    sender: mpsc::Sender<LoadedPage>,
    receiver: Mutex<mpsc::Receiver<LoadedPage>>,
}

impl ReuseRing {
    /// Build a ring holding exactly the given pages.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` for an empty ring (a `jobs` setting below
    /// 2 leaves no capacity for pooled routes).
    pub fn new(pages: Vec<LoadedPage>) -> Result<Self, PageError> {
        if pages.is_empty() {
            return Err(PageError::invalid_config(
                "pooled routes need jobs >= 2 for a non-empty reuse ring",
            ));
        }

        let (sender, receiver) = mpsc::channel(pages.len());
        for page in pages {
            // Capacity equals the page count, so this cannot fail.
            if sender.try_send(page).is_err() {
                return Err(PageError::PoolClosed);
            }
        }

        Ok(Self {
            sender,
            receiver: Mutex::new(receiver),
        })
    }

    /// Check a page out, waiting until one is put back if all are in use.
    ///
    /// # Errors
    ///
    /// Returns `PoolClosed` if the ring has been torn down.
    pub async fn checkout(&self) -> Result<LoadedPage, PageError> {
        let mut receiver = self.receiver.lock().await;
        receiver.recv().await.ok_or(PageError::PoolClosed)
    }

    /// Return a page to the ring after use.
    ///
    /// Pages go back even after a faulted invocation: the next bind fully
    /// resets their context, and dropping them would shrink the ring.
    pub async fn put_back(&self, page: LoadedPage) {
        if self.sender.send(page).await.is_err() {
            debug!("Reuse ring closed, dropping page");
        }
    }
}

impl std::fmt::Debug for ReuseRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReuseRing")
            .field("capacity", &self.sender.max_capacity())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::BytecodeCompiler;
    use crate::context::ScriptRequest;
    use dynpage_common::EngineConfig;

    fn test_engine() -> ScriptEngine {
        let config = EngineConfig {
            pooling_allocator: false,
            epoch_interruption: false,
            ..Default::default()
        };
        ScriptEngine::new(&config).unwrap()
    }

    #[tokio::test]
    async fn test_zero_jobs_rejected() {
        let err = InstancePool::start(test_engine(), ExecutionConfig::default(), 0)
            .await
            .unwrap_err();
        assert!(matches!(err, PageError::InvalidConfig { .. }));
    }

    #[tokio::test]
    async fn test_acquire_yields_ready_instances() {
        let pool = InstancePool::start(test_engine(), ExecutionConfig::default(), 2)
            .await
            .unwrap();

        let mut first = pool.acquire().await.unwrap();
        let mut second = pool.acquire().await.unwrap();

        // Both are independently bootstrapped and bindable
        let id_a = first.bind(ScriptRequest::new("GET", "/a"));
        let id_b = second.bind(ScriptRequest::new("GET", "/b"));
        assert_ne!(id_a, id_b);

        InstancePool::dispose(first);
        InstancePool::dispose(second);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_acquire_after_shutdown_fails() {
        let pool = InstancePool::start(test_engine(), ExecutionConfig::default(), 2)
            .await
            .unwrap();

        pool.shutdown().await;
        assert!(matches!(pool.acquire().await, Err(PageError::PoolClosed)));
    }

    #[tokio::test]
    async fn test_empty_ring_rejected() {
        let err = ReuseRing::new(Vec::new()).unwrap_err();
        assert!(matches!(err, PageError::InvalidConfig { .. }));
    }

    #[tokio::test]
    async fn test_ring_checkout_and_put_back() {
        let engine = test_engine();
        let exec = ExecutionConfig::default();
        let compiler = BytecodeCompiler::new(engine.clone());
        let bytecode = compiler
            .compile(br#"(module (func (export "_start")))"#)
            .unwrap();

        let pool = InstancePool::start(engine, exec.clone(), 4).await.unwrap();
        let mut pages = Vec::new();
        for _ in 0..2 {
            let instance = pool.acquire().await.unwrap();
            pages.push(LoadedPage::load(instance, &bytecode).await.unwrap());
        }
        let ring = ReuseRing::new(pages).unwrap();

        let mut page = ring.checkout().await.unwrap();
        page.bind(ScriptRequest::new("GET", "/pooled"));
        assert!(page.invoke(&exec).await.is_success());
        ring.put_back(page).await;

        // The recycled page can be checked out again
        let page = ring.checkout().await.unwrap();
        ring.put_back(page).await;
        pool.shutdown().await;
    }
}
