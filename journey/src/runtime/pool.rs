use std::fmt::{self, Display};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::job::JobInstance;
use crate::platform::Platform;
use crate::telemetry;

use super::shutdown::ShutdownToken;
use super::worker::{FailurePolicy, PoolConfig};

/// Work performed by a pool for each queued item.
#[async_trait]
pub trait Dispatcher<T>: Send + Sync + 'static {
    /// Handle one item. Errors are subject to the pool's [`FailurePolicy`].
    async fn dispatch(&self, item: T) -> anyhow::Result<()>;
}

/// Outcome counts of a pool that has fully stopped.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PoolReport {
    pub name: String,
    pub workers: usize,
    pub succeeded: u64,
    pub failed: u64,
}

#[derive(Debug, Default)]
struct PoolState {
    succeeded: AtomicU64,
    failed: AtomicU64,
    first_error: Mutex<Option<anyhow::Error>>,
}

impl PoolState {
    fn record_first_error(&self, err: anyhow::Error) {
        let mut slot = self.first_error.lock();
        if slot.is_none() {
            *slot = Some(err);
        }
    }
}

/// Cloneable handle for feeding a pool's queue.
pub struct PoolSender<T> {
    name: Arc<str>,
    tx: mpsc::Sender<T>,
    shutdown: ShutdownToken,
}

impl<T> Clone for PoolSender<T> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            tx: self.tx.clone(),
            shutdown: self.shutdown.clone(),
        }
    }
}

impl<T> fmt::Debug for PoolSender<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolSender")
            .field("name", &self.name)
            .field("capacity", &self.tx.capacity())
            .field("cancelled", &self.shutdown.is_cancelled())
            .finish()
    }
}

impl<T: Send> PoolSender<T> {
    /// Hand an item to the pool, waiting while the queue is full.
    ///
    /// Fails once the pool has been cancelled or every worker is gone, so a
    /// producer never blocks on a pool that will not drain.
    pub async fn enqueue(&self, item: T) -> anyhow::Result<()> {
        if self.shutdown.is_cancelled() {
            return Err(anyhow!("pool {} is shut down", self.name));
        }
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Err(anyhow!("pool {} is shut down", self.name)),
            sent = self.tx.send(item) => {
                sent.map_err(|_| anyhow!("pool {} queue is closed", self.name))
            }
        }
    }
}

/// A fixed set of workers consuming one shared bounded queue.
///
/// Workers take one item at a time and pass it to the [`Dispatcher`]. The
/// pool is stopped by consuming it with [`finish`](WorkerPool::finish) (drain
/// the queue) or [`shutdown`](WorkerPool::shutdown) (stop now); both return
/// only after every worker task has exited.
pub struct WorkerPool<T> {
    config: PoolConfig,
    sender: Option<PoolSender<T>>,
    shutdown: ShutdownToken,
    state: Arc<PoolState>,
    workers: Vec<JoinHandle<()>>,
}

impl<T> fmt::Debug for WorkerPool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("config", &self.config)
            .field("worker_count", &self.workers.len())
            .field("succeeded", &self.state.succeeded.load(Ordering::Relaxed))
            .field("failed", &self.state.failed.load(Ordering::Relaxed))
            .field("shutdown_cancelled", &self.shutdown.is_cancelled())
            .finish()
    }
}

impl<T> WorkerPool<T>
where
    T: Display + Send + 'static,
{
    /// Spawn `config.workers` workers (at least one) feeding `dispatcher`.
    ///
    /// `shutdown` should be a token the pool may cancel on its own, such as
    /// a [`child`](ShutdownToken::child) of the run's token.
    pub fn start<D>(config: PoolConfig, dispatcher: Arc<D>, shutdown: ShutdownToken) -> Self
    where
        D: Dispatcher<T>,
    {
        let worker_count = config.workers.max(1);
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let queue = Arc::new(AsyncMutex::new(rx));
        let state = Arc::new(PoolState::default());
        let name: Arc<str> = Arc::from(config.name.as_str());

        let mut workers = Vec::with_capacity(worker_count);
        for i in 0..worker_count {
            let worker_id = config.worker_id(i);
            let pool = Arc::clone(&name);
            let q = Arc::clone(&queue);
            let d = Arc::clone(&dispatcher);
            let s = Arc::clone(&state);
            let token = shutdown.clone();
            let policy = config.failure_policy;

            workers.push(tokio::spawn(async move {
                Self::worker_loop(worker_id, pool, policy, q, d, s, token).await;
            }));
        }

        tracing::debug!(pool = %config.name, workers = worker_count, "worker pool started");

        Self {
            sender: Some(PoolSender {
                name,
                tx,
                shutdown: shutdown.clone(),
            }),
            config,
            shutdown,
            state,
            workers,
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Whether the pool has been cancelled, by its owner or by an abort.
    pub fn is_cancelled(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// A producer handle; the queue closes once all handles and the pool's
    /// own sender are dropped.
    pub fn sender(&self) -> anyhow::Result<PoolSender<T>> {
        self.sender
            .clone()
            .ok_or_else(|| anyhow!("pool {} queue is closed", self.config.name))
    }

    /// Hand an item to the pool, waiting while every worker is busy.
    pub async fn enqueue(&self, item: T) -> anyhow::Result<()> {
        match &self.sender {
            Some(sender) => sender.enqueue(item).await,
            None => Err(anyhow!("pool {} queue is closed", self.config.name)),
        }
    }

    /// Close the queue, let workers drain it, and wait for them to exit.
    ///
    /// Returns the first recorded error under [`FailurePolicy::Abort`].
    pub async fn finish(mut self) -> anyhow::Result<PoolReport> {
        self.sender.take();
        self.join().await
    }

    /// Cancel the pool and wait for every worker to exit.
    ///
    /// Queued items are dropped; calls already in flight run to completion.
    pub async fn shutdown(mut self) -> anyhow::Result<PoolReport> {
        tracing::debug!(pool = %self.config.name, "shutting down worker pool");
        self.shutdown.cancel();
        self.sender.take();
        self.join().await
    }

    async fn join(&mut self) -> anyhow::Result<PoolReport> {
        let handles = std::mem::take(&mut self.workers);
        let workers = handles.len();
        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                tracing::warn!(pool = %self.config.name, "worker task failed: {e:?}");
            }
        }

        let report = PoolReport {
            name: self.config.name.clone(),
            workers,
            succeeded: self.state.succeeded.load(Ordering::SeqCst),
            failed: self.state.failed.load(Ordering::SeqCst),
        };
        tracing::debug!(
            pool = %report.name,
            succeeded = report.succeeded,
            failed = report.failed,
            "worker pool stopped"
        );

        match self.state.first_error.lock().take() {
            Some(err) => Err(err),
            None => Ok(report),
        }
    }

    async fn worker_loop<D>(
        worker_id: String,
        pool: Arc<str>,
        policy: FailurePolicy,
        queue: Arc<AsyncMutex<mpsc::Receiver<T>>>,
        dispatcher: Arc<D>,
        state: Arc<PoolState>,
        shutdown: ShutdownToken,
    ) where
        D: Dispatcher<T>,
    {
        loop {
            let next = tokio::select! {
                biased;
                _ = shutdown.cancelled() => None,
                item = Self::next_item(&queue) => item,
            };
            let Some(item) = next else {
                break;
            };

            let label = item.to_string();
            let span = telemetry::pool_item_span(&*pool, &worker_id, &label);
            match dispatcher.dispatch(item).instrument(span).await {
                Ok(()) => {
                    state.succeeded.fetch_add(1, Ordering::SeqCst);
                }
                Err(err) => {
                    state.failed.fetch_add(1, Ordering::SeqCst);
                    match policy {
                        FailurePolicy::Continue => {
                            tracing::error!(
                                pool = %pool,
                                worker_id = %worker_id,
                                item = %label,
                                "failed to process item: {err:#}"
                            );
                        }
                        FailurePolicy::Abort => {
                            tracing::error!(
                                pool = %pool,
                                worker_id = %worker_id,
                                item = %label,
                                "failed to process item, aborting pool: {err:#}"
                            );
                            state.record_first_error(err);
                            shutdown.cancel();
                        }
                    }
                }
            }
        }

        tracing::trace!(worker_id = %worker_id, "worker exiting");
    }

    async fn next_item(queue: &AsyncMutex<mpsc::Receiver<T>>) -> Option<T> {
        queue.lock().await.recv().await
    }
}

impl<T> Drop for WorkerPool<T> {
    fn drop(&mut self) {
        if !self.workers.is_empty() {
            // detached workers must not outlive an abandoned pool
            self.shutdown.cancel();
        }
    }
}

/// Registers job instances; failures are logged and the pool keeps going.
pub struct SubmitDispatcher<P: ?Sized> {
    platform: Arc<P>,
}

impl<P: ?Sized> SubmitDispatcher<P> {
    pub fn new(platform: Arc<P>) -> Self {
        Self { platform }
    }
}

#[async_trait]
impl<P> Dispatcher<JobInstance> for SubmitDispatcher<P>
where
    P: Platform + ?Sized + 'static,
{
    async fn dispatch(&self, instance: JobInstance) -> anyhow::Result<()> {
        let result = telemetry::timed_call(
            "submit_job",
            telemetry::submit_span(&instance.id),
            self.platform.submit_job(&instance),
        )
        .await;
        telemetry::record_submission(&instance.id, telemetry::status_label(&result));
        result.map_err(|err| err.context(format!("failed to submit job {:?}", instance.id)))
    }
}

/// Deregisters jobs by ID.
pub struct DeregisterDispatcher<P: ?Sized> {
    platform: Arc<P>,
}

impl<P: ?Sized> DeregisterDispatcher<P> {
    pub fn new(platform: Arc<P>) -> Self {
        Self { platform }
    }
}

#[async_trait]
impl<P> Dispatcher<String> for DeregisterDispatcher<P>
where
    P: Platform + ?Sized + 'static,
{
    async fn dispatch(&self, job_id: String) -> anyhow::Result<()> {
        let result = telemetry::timed_call(
            "deregister_job",
            telemetry::deregister_span(&job_id),
            self.platform.deregister_job(&job_id),
        )
        .await;
        telemetry::record_deregistration(&job_id, telemetry::status_label(&result));
        result.map_err(|err| err.context(format!("failed deregistering job {job_id:?}")))
    }
}

/// Pool submitting job instances.
pub type DispatchPool = WorkerPool<JobInstance>;

/// Pool deregistering jobs by ID.
pub type TeardownPool = WorkerPool<String>;

/// Start a submission pool; failed submissions never stop it.
pub fn start_dispatch_pool<P>(
    workers: usize,
    queue_capacity: usize,
    platform: Arc<P>,
    shutdown: ShutdownToken,
) -> DispatchPool
where
    P: Platform + ?Sized + 'static,
{
    let config = PoolConfig::new("dispatch")
        .with_workers(workers)
        .with_queue_capacity(queue_capacity)
        .with_failure_policy(FailurePolicy::Continue);
    WorkerPool::start(config, Arc::new(SubmitDispatcher::new(platform)), shutdown)
}

/// Start a deregistration pool; the first failure stops it.
pub fn start_teardown_pool<P>(
    workers: usize,
    queue_capacity: usize,
    platform: Arc<P>,
    shutdown: ShutdownToken,
) -> TeardownPool
where
    P: Platform + ?Sized + 'static,
{
    let config = PoolConfig::new("teardown")
        .with_workers(workers)
        .with_queue_capacity(queue_capacity)
        .with_failure_policy(FailurePolicy::Abort);
    WorkerPool::start(config, Arc::new(DeregisterDispatcher::new(platform)), shutdown)
}
