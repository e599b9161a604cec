//! Main controller implementation.
//!
//! This module contains the worker pool that drains the work queue and the
//! `Controller` struct that wires the kube client, reconciler, watchers and
//! periodic resync together.

use crate::config::OperatorConfig;
use crate::error::ControllerError;
use crate::manifests::EmbeddedManifests;
use crate::reconciler::{OperatorClient, Reconciler, WorkKey};
use crate::watcher::{EventHandler, Watcher, panic_message};
use crate::workqueue::{Enqueue, QueueKey, WorkQueue};
use cluster_client::KubeClusterClient;
use futures::FutureExt;
use kube::Client;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Rate-limited retries of a failing key before the cooldown kicks in.
pub const MAX_RETRIES: u32 = 15;

/// Delay before a key that exhausted its retries is tried again.
pub const RETRY_COOLDOWN: Duration = Duration::from_secs(60);

/// Processes one work key.
#[async_trait::async_trait]
pub trait SyncHandler<K>: Send + Sync {
    async fn sync(&self, key: &K) -> Result<(), ControllerError>;
}

#[async_trait::async_trait]
impl<C: OperatorClient + ?Sized> SyncHandler<WorkKey> for Reconciler<C> {
    async fn sync(&self, key: &WorkKey) -> Result<(), ControllerError> {
        Reconciler::sync(self, key).await
    }
}

/// Workers draining a shared queue into a sync handler.
pub struct WorkerPool<K, H: ?Sized> {
    queue: WorkQueue<K>,
    handler: Arc<H>,
}

impl<K, H: ?Sized> Clone for WorkerPool<K, H> {
    fn clone(&self) -> Self {
        Self {
            queue: self.queue.clone(),
            handler: Arc::clone(&self.handler),
        }
    }
}

impl<K: fmt::Debug, H: ?Sized> fmt::Debug for WorkerPool<K, H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("queue", &self.queue)
            .finish_non_exhaustive()
    }
}

impl<K, H> WorkerPool<K, H>
where
    K: QueueKey + fmt::Display,
    H: SyncHandler<K> + ?Sized + 'static,
{
    pub fn new(queue: WorkQueue<K>, handler: Arc<H>) -> Self {
        Self { queue, handler }
    }

    /// Starts `workers` worker tasks. Each exits once the queue shuts down,
    /// after finishing its in-flight pass.
    pub fn spawn(&self, workers: usize) -> Vec<JoinHandle<()>> {
        (0..workers)
            .map(|id| {
                let pool = self.clone();
                tokio::spawn(async move {
                    debug!("Worker {} started", id);
                    while pool.process_next().await {}
                    debug!("Worker {} stopped", id);
                })
            })
            .collect()
    }

    /// Takes one key off the queue and syncs it. Returns false once the queue
    /// has shut down.
    pub async fn process_next(&self) -> bool {
        let Some(key) = self.queue.get().await else {
            return false;
        };

        let result = AssertUnwindSafe(self.handler.sync(&key))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(ControllerError::Panic(panic_message(panic.as_ref()))));

        self.handle_result(&key, result);
        self.queue.done(&key);
        true
    }

    fn handle_result(&self, key: &K, result: Result<(), ControllerError>) {
        let Err(e) = result else {
            self.queue.forget(key);
            return;
        };

        let retries = self.queue.num_requeues(key);
        if retries < MAX_RETRIES {
            warn!("Error syncing {} (retry {}/{}): {}", key, retries + 1, MAX_RETRIES, e);
            self.queue.add_rate_limited(key.clone());
            return;
        }

        error!(
            "Dropping {} out of the queue after {} retries, trying again in {:?}: {}",
            key, MAX_RETRIES, RETRY_COOLDOWN, e
        );
        self.queue.forget(key);
        self.queue.add_after(key.clone(), RETRY_COOLDOWN);
    }
}

/// Enqueues `key` every `interval` until shutdown. The first tick fires
/// immediately, which also triggers the initial sync.
async fn resync<K: QueueKey>(
    queue: WorkQueue<K>,
    key: K,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {
                debug!("Periodic resync of {:?}", key);
                queue.add(key.clone());
            }
        }
    }
}

/// Main controller for the CSI snapshot operator.
pub struct Controller {
    config: OperatorConfig,
    queue: WorkQueue<WorkKey>,
    reconciler: Arc<Reconciler<KubeClusterClient>>,
    watcher: Arc<Watcher<WorkKey>>,
    key: WorkKey,
}

impl fmt::Debug for Controller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Controller")
            .field("config", &self.config)
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

impl Controller {
    /// Creates a new controller instance.
    pub async fn new(config: OperatorConfig) -> Result<Self, ControllerError> {
        info!("Initializing CSI Snapshot Controller Operator");

        let kube_client = Client::try_default().await?;
        let cluster_client = Arc::new(KubeClusterClient::new(kube_client.clone()));

        let manifests = Arc::new(EmbeddedManifests::load(&config)?);
        let reconciler = Arc::new(Reconciler::new(cluster_client, manifests, config.clone()));
        let key = reconciler.work_key();
        info!("Component versions: {:?}", reconciler.versions().versions());

        let queue = WorkQueue::default();
        let enqueue: Arc<dyn Enqueue<WorkKey>> = Arc::new(queue.clone());
        let handler = Arc::new(EventHandler::new(enqueue, key.clone()));
        let watcher = Arc::new(Watcher::new(
            kube_client,
            handler,
            &config.config_name,
            &config.target_namespace,
        ));

        Ok(Self {
            config,
            queue,
            reconciler,
            watcher,
            key,
        })
    }

    /// Runs until `shutdown` fires, then stops the queue and waits for the
    /// workers to finish their in-flight passes.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<(), ControllerError> {
        let watchers = vec![
            {
                let watcher = Arc::clone(&self.watcher);
                let shutdown = shutdown.clone();
                tokio::spawn(async move { watcher.watch_operator_config(shutdown).await })
            },
            {
                let watcher = Arc::clone(&self.watcher);
                let shutdown = shutdown.clone();
                tokio::spawn(async move { watcher.watch_crds(shutdown).await })
            },
            {
                let watcher = Arc::clone(&self.watcher);
                let shutdown = shutdown.clone();
                tokio::spawn(async move { watcher.watch_deployments(shutdown).await })
            },
        ];

        let resync_task = tokio::spawn(resync(
            self.queue.clone(),
            self.key.clone(),
            self.config.resync_interval,
            shutdown.clone(),
        ));

        let pool = WorkerPool::new(self.queue.clone(), Arc::clone(&self.reconciler));
        let workers = pool.spawn(self.config.workers);
        info!("Controller started with {} worker(s), syncing {}", workers.len(), self.key);

        // A closed channel means the signal task is gone; stop as well
        let _ = shutdown.changed().await;
        info!("Shutting down");

        self.queue.shut_down();
        if !self.queue.is_empty() {
            info!("Dropping {} queued key(s)", self.queue.len());
        }
        for worker in workers {
            if let Err(e) = worker.await {
                error!("Worker task failed: {}", e);
            }
        }

        for watcher in watchers {
            match watcher.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("Watcher error: {}", e),
                Err(e) => error!("Watcher task failed: {}", e),
            }
        }
        if let Err(e) = resync_task.await {
            error!("Resync task failed: {}", e);
        }

        info!("Controller stopped");
        Ok(())
    }
}
