// src/runtime/worker_pool.rs
//! Pool of ready-to-use worker handles
//!
//! Spawning a worker process takes far longer than a simulation tick, so a
//! few idle workers are kept warm and handed out on demand.
//!
//! # Architecture
//!
//! ```text
//! WorkerPool
//! ├─ Idle: [Worker1, Worker2, ...]   (warm, holding a capacity permit)
//! ├─ Leased: owned by agents          (each holding a capacity permit)
//! └─ Capacity: Semaphore(max_workers)
//! ```
//!
//! A leased worker returns its permit when it is dropped, so capacity can
//! never leak past the agent that owns the handle.

use crate::agents::interface::SocialAgent;
use crate::agents::values::{AgentAction, AgentObservation};
use crate::observability::{WORKERS_ACQUIRED, WORKERS_TERMINATED};
use crate::runtime::remote_agent::{ProcessRemoteAgent, RemoteAgent};
use crate::utils::config::{PoolSettings, WorkerCommand};
use crate::utils::errors::{EngineError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, info, warn};

/// Source of remote agents for the agent manager
#[async_trait]
pub trait RemoteAgentPool: Send + Sync {
    /// Lease a started-up worker handle
    async fn acquire(&self) -> Result<Box<dyn RemoteAgent>>;

    /// Shut the pool down and stop every idle worker
    async fn destroy(&self) -> Result<()>;
}

/// Creates fresh workers for the pool
#[async_trait]
pub trait WorkerLauncher: Send + Sync {
    async fn launch(&self) -> Result<Box<dyn RemoteAgent>>;
}

/// Launches worker processes from a configured command line
pub struct ProcessLauncher {
    command: WorkerCommand,
    shutdown_grace: Duration,
}

impl ProcessLauncher {
    pub fn new(command: WorkerCommand, shutdown_grace: Duration) -> Self {
        Self {
            command,
            shutdown_grace,
        }
    }
}

#[async_trait]
impl WorkerLauncher for ProcessLauncher {
    async fn launch(&self) -> Result<Box<dyn RemoteAgent>> {
        let worker = ProcessRemoteAgent::spawn(&self.command, self.shutdown_grace)?;
        Ok(Box::new(worker))
    }
}

/// Configuration for the worker pool
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Idle workers kept warm (default: 4)
    pub buffer_size: usize,

    /// Maximum live workers, idle and leased (default: 64)
    pub max_workers: usize,

    /// How long `acquire` waits for capacity (default: 10s)
    pub acquire_timeout: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self::from(&PoolSettings::default())
    }
}

impl From<&PoolSettings> for WorkerPoolConfig {
    fn from(settings: &PoolSettings) -> Self {
        Self {
            buffer_size: settings.buffer_size.min(settings.max_workers),
            max_workers: settings.max_workers,
            acquire_timeout: settings.acquire_timeout(),
        }
    }
}

/// A worker leased from the pool
pub struct PooledWorker {
    worker: Box<dyn RemoteAgent>,

    /// Returned to the pool when the worker is dropped
    _permit: OwnedSemaphorePermit,
}

#[async_trait]
impl RemoteAgent for PooledWorker {
    fn worker_id(&self) -> &str {
        self.worker.worker_id()
    }

    async fn start(&mut self, agent: &SocialAgent) -> Result<()> {
        self.worker.start(agent).await
    }

    async fn send_observation(&mut self, observation: &AgentObservation) -> Result<()> {
        self.worker.send_observation(observation).await
    }

    async fn recv_action(&mut self, timeout: Duration) -> Result<Option<AgentAction>> {
        self.worker.recv_action(timeout).await
    }

    async fn terminate(&mut self) -> Result<()> {
        let result = self.worker.terminate().await;
        metrics::counter!(WORKERS_TERMINATED).increment(1);
        result
    }
}

struct PoolInner {
    config: WorkerPoolConfig,
    launcher: Arc<dyn WorkerLauncher>,
    idle: Mutex<VecDeque<PooledWorker>>,
    capacity: Arc<Semaphore>,
    replenishing: AtomicBool,
}

impl PoolInner {
    /// Top the idle buffer up to `buffer_size` without waiting for capacity
    async fn fill_buffer(&self) -> Result<()> {
        loop {
            if self.idle.lock().len() >= self.config.buffer_size {
                return Ok(());
            }

            let Ok(permit) = Arc::clone(&self.capacity).try_acquire_owned() else {
                // Every permit is leased; nothing to warm up
                return Ok(());
            };

            let worker = self.launcher.launch().await?;
            let mut worker = PooledWorker {
                worker,
                _permit: permit,
            };

            {
                // Checked under the lock: destroy closes before draining
                let mut idle = self.idle.lock();
                if !self.capacity.is_closed() {
                    debug!("Warmed worker {}", worker.worker_id());
                    idle.push_back(worker);
                    continue;
                }
            }

            debug!("Pool closed while worker {} was launching", worker.worker_id());
            worker.terminate().await?;
            return Ok(());
        }
    }
}

/// Bounded pool of worker handles
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

impl WorkerPool {
    /// Create a pool of worker processes from settings
    pub async fn from_settings(settings: &PoolSettings) -> Result<Self> {
        let launcher = ProcessLauncher::new(settings.worker.clone(), settings.shutdown_grace());
        Self::with_config(WorkerPoolConfig::from(settings), Arc::new(launcher)).await
    }

    /// Create a pool and warm its idle buffer
    pub async fn with_config(
        config: WorkerPoolConfig,
        launcher: Arc<dyn WorkerLauncher>,
    ) -> Result<Self> {
        info!(
            "Initializing worker pool (buffer: {}, max: {})",
            config.buffer_size, config.max_workers
        );

        let inner = Arc::new(PoolInner {
            capacity: Arc::new(Semaphore::new(config.max_workers)),
            idle: Mutex::new(VecDeque::with_capacity(config.buffer_size)),
            replenishing: AtomicBool::new(false),
            launcher,
            config,
        });

        inner.fill_buffer().await?;

        info!("Worker pool initialized with {} idle workers", inner.idle.lock().len());
        Ok(Self { inner })
    }

    /// Refill the idle buffer in the background
    fn spawn_replenish(&self) {
        if self.inner.replenishing.swap(true, Ordering::AcqRel) {
            return;
        }

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            if let Err(e) = inner.fill_buffer().await {
                warn!("Failed to replenish worker pool: {}", e);
            }
            inner.replenishing.store(false, Ordering::Release);
        });
    }

    /// Refill the idle buffer and wait for it
    pub async fn replenish(&self) -> Result<()> {
        self.inner.fill_buffer().await
    }

    /// Get pool statistics
    pub fn stats(&self) -> PoolStats {
        let idle_workers = self.inner.idle.lock().len();
        let available_permits = self.inner.capacity.available_permits();
        let max_workers = self.inner.config.max_workers;

        PoolStats {
            max_workers,
            idle_workers,
            leased_workers: max_workers.saturating_sub(available_permits + idle_workers),
            closed: self.inner.capacity.is_closed(),
        }
    }
}

#[async_trait]
impl RemoteAgentPool for WorkerPool {
    async fn acquire(&self) -> Result<Box<dyn RemoteAgent>> {
        if self.inner.capacity.is_closed() {
            return Err(EngineError::PoolClosed);
        }

        let warm = self.inner.idle.lock().pop_front();
        let worker = match warm {
            Some(worker) => worker,
            None => {
                // Backpressure: wait for a leased worker to be terminated
                let permit = tokio::time::timeout(
                    self.inner.config.acquire_timeout,
                    Arc::clone(&self.inner.capacity).acquire_owned(),
                )
                .await
                .map_err(|_| EngineError::PoolExhausted)?
                .map_err(|_| EngineError::PoolClosed)?;

                PooledWorker {
                    worker: self.inner.launcher.launch().await?,
                    _permit: permit,
                }
            }
        };

        debug!("Acquired worker {} from pool", worker.worker_id());
        metrics::counter!(WORKERS_ACQUIRED).increment(1);

        self.spawn_replenish();
        Ok(Box::new(worker))
    }

    async fn destroy(&self) -> Result<()> {
        info!("Destroying worker pool");
        self.inner.capacity.close();

        let idle: Vec<PooledWorker> = self.inner.idle.lock().drain(..).collect();
        let mut removed = Vec::new();
        let mut failed = Vec::new();
        let mut reasons = Vec::new();

        for mut worker in idle {
            removed.push(worker.worker_id().to_string());
            if let Err(e) = worker.terminate().await {
                error!("Failed to terminate worker {}: {}", worker.worker_id(), e);
                failed.push(worker.worker_id().to_string());
                reasons.push(e.to_string());
            }
        }

        if failed.is_empty() {
            Ok(())
        } else {
            Err(EngineError::TeardownFailed {
                agents: failed,
                removed,
                reason: reasons.join("; "),
            })
        }
    }
}

/// Pool statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolStats {
    pub max_workers: usize,
    pub idle_workers: usize,
    pub leased_workers: usize,
    pub closed: bool,
}
