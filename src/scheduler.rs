//! `AcquireWorker()` — the single entry point every HTTP request goes
//! through to get a `(host, port)` to be routed to (§4.5).

use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::activity_clock::ActivityClock;
use crate::config::DaemonConfig;
use crate::error::{DispatcherError, Result};
use crate::port_allocator::PortAllocator;
use crate::probe::{BusyState, ProbeClient};
use crate::registry::WorkerRegistry;
use crate::worker;

const ACQUIRE_BUDGET: Duration = Duration::from_secs(60);
const RETRY_INTERVAL: Duration = Duration::from_millis(500);

pub struct Scheduler {
    config: DaemonConfig,
    registry: Arc<WorkerRegistry>,
    ports: PortAllocator,
    probe: ProbeClient,
    activity_clock: Arc<ActivityClock>,
}

impl Scheduler {
    pub fn new(config: DaemonConfig, registry: Arc<WorkerRegistry>) -> Self {
        Self::with_activity_clock(config, registry, Arc::new(ActivityClock::new()))
    }

    /// Build a scheduler sharing an existing [`ActivityClock`] — used by
    /// [`crate::AppContext`] so the clock workers poll via `/idle-seconds`
    /// is the same one `acquire_worker` stamps.
    pub fn with_activity_clock(
        config: DaemonConfig,
        registry: Arc<WorkerRegistry>,
        activity_clock: Arc<ActivityClock>,
    ) -> Self {
        let ports = PortAllocator::new(config.port_range_start, config.port_range_len);
        Self {
            config,
            registry,
            ports,
            probe: ProbeClient::new(),
            activity_clock,
        }
    }

    /// Find a free worker to hand a request to, spawning one on demand if
    /// the pool is under capacity, within a fixed wall-clock budget.
    ///
    /// Each iteration: promote any Starting worker whose readiness probe
    /// now succeeds, reap dead/unresponsive workers, then scan Ready
    /// workers for one reporting `/isbusy` == Free. If none is free and
    /// there is room under `SpawnCount`, spawn a new worker without
    /// waiting for it to become ready (so the scan loop picks it up once
    /// it promotes itself). If there is no room, sleep briefly and retry
    /// until the budget is exhausted.
    pub async fn acquire_worker(&self) -> Result<(String, u16)> {
        self.activity_clock.update_last_call().await;
        let deadline = tokio::time::Instant::now() + ACQUIRE_BUDGET;

        loop {
            self.registry.promote_ready_starting(&self.probe).await;
            self.registry.reap(&self.probe).await;

            for port in self.registry.snapshot_ready_ports().await {
                if self.probe.probe_busy(port).await == BusyState::Free {
                    return Ok(("localhost".to_string(), port));
                }
            }

            if self.try_spawn_one_if_room().await? {
                // Give the new process a brief head start before the next
                // busy-scan; it will not be Ready yet, but this avoids a
                // tight spin while the OS schedules the child.
                tokio::time::sleep(Duration::from_millis(50)).await;
                continue;
            }

            if tokio::time::Instant::now() >= deadline {
                warn!(budget_secs = ACQUIRE_BUDGET.as_secs(), "no worker became available in time");
                return Err(DispatcherError::NoWorkerAvailable {
                    budget_secs: ACQUIRE_BUDGET.as_secs(),
                });
            }

            tokio::time::sleep(RETRY_INTERVAL).await;
        }
    }

    /// Atomically check whether there is room under `SpawnCount` and no
    /// spawn already in flight, and if so spawn one worker — all under a
    /// single `WorkerRegistry` lock acquisition (§4.5 step 3c, §5), so two
    /// concurrent `acquire_worker` callers can never both observe room and
    /// both spawn (I2, I3). Returns whether a spawn was performed.
    async fn try_spawn_one_if_room(&self) -> Result<bool> {
        let config = &self.config;
        let probe = &self.probe;
        let ports = &self.ports;
        self.registry
            .try_spawn_one(config.spawn_count, move |claimed| async move {
                let port = ports.allocate(&claimed)?;
                let worker = worker::spawn(config, probe, port, false).await?;
                info!(port, "scheduler spawned worker on demand");
                Ok(worker)
            })
            .await
    }

    pub fn registry(&self) -> &Arc<WorkerRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &DaemonConfig {
        &self.config
    }

    pub fn activity_clock(&self) -> &Arc<ActivityClock> {
        &self.activity_clock
    }
}

pub type SharedScheduler = Arc<Scheduler>;
