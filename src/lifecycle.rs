//! Background maintenance of the worker pool — reaping and cap/floor
//! enforcement, on a fixed tick, independent of request traffic (§4.6).

use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::activity_clock::ActivityClock;
use crate::config::DaemonConfig;
use crate::error::Result;
use crate::port_allocator::PortAllocator;
use crate::probe::ProbeClient;
use crate::registry::WorkerRegistry;
use crate::worker;

const REAP_INTERVAL: Duration = Duration::from_secs(30);

pub struct LifecycleController {
    config: DaemonConfig,
    registry: Arc<WorkerRegistry>,
    ports: PortAllocator,
    probe: ProbeClient,
    activity_clock: Arc<ActivityClock>,
}

impl LifecycleController {
    pub fn new(config: DaemonConfig, registry: Arc<WorkerRegistry>) -> Self {
        Self::with_activity_clock(config, registry, Arc::new(ActivityClock::new()))
    }

    /// Build a controller sharing an existing [`ActivityClock`] — needed so
    /// the floor-enforcement decision below sees the same "has this pool
    /// ever been used" signal that `Scheduler::acquire_worker` stamps.
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

    /// If `SpawnOnStartup` is set, perform one blocking spawn (wait until
    /// Ready) before serving traffic, so the dispatcher never advertises
    /// itself as healthy before it can actually serve a request (§4.6, §6).
    /// The remaining workers up to `SpawnCount`, if any, are filled in by
    /// [`Self::tick`]'s non-blocking floor enforcement once the reap loop
    /// starts — §4.6's Startup clause calls for exactly one blocking spawn
    /// here, not `SpawnCount` of them, so a large cap can't stall startup.
    pub async fn spawn_startup_workers(&self) -> Result<()> {
        if !self.config.spawn_on_startup {
            return Ok(());
        }
        info!("spawning one worker at startup before serving traffic");
        let claimed = self.registry.claimed_ports().await;
        let port = self.ports.allocate(&claimed)?;
        let worker = worker::spawn(&self.config, &self.probe, port, true).await?;
        self.registry.add_starting(worker).await;
        self.registry.promote_to_ready(port).await;
        Ok(())
    }

    /// Spawn the background reaper task. Runs until the returned handle is
    /// aborted or the process exits.
    pub fn spawn_reap_loop(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(REAP_INTERVAL);
            loop {
                interval.tick().await;
                self.tick().await;
            }
        })
    }

    /// One maintenance pass: reap dead/unresponsive workers, then enforce
    /// the cap (I2) and floor (keep the pool at `SpawnCount`) invariants.
    /// Public so operators/tests can trigger an out-of-band pass instead of
    /// waiting for the next 30s tick from [`Self::spawn_reap_loop`].
    pub async fn tick(&self) {
        self.registry.reap(&self.probe).await;

        while self.registry.non_dead_count().await > self.config.spawn_count {
            match self.registry.kill_one_to_enforce_cap().await {
                Some(port) => warn!(port, "killed worker to bring pool back under SpawnCount"),
                None => break,
            }
        }

        // The floor is not enforced on a cold pool that has never been
        // requested and wasn't configured to seed itself at startup — this
        // avoids launching workers on a dispatcher that may never receive
        // traffic (§4.6).
        if !self.config.spawn_on_startup && !self.activity_clock.has_been_called().await {
            return;
        }

        loop {
            match self.spawn_one_to_fill_floor().await {
                Ok(true) => continue,
                Ok(false) => break,
                Err(e) => {
                    error!(error = %e, "failed to spawn replacement worker, will retry next tick");
                    break;
                }
            }
        }
    }

    /// Atomically check whether the pool is under `SpawnCount` and no spawn
    /// is already in flight, and if so spawn one worker — under a single
    /// `WorkerRegistry` lock acquisition (§4.5 step 3c, §5), so this can
    /// never race with a concurrent `Scheduler::acquire_worker` caller doing
    /// the same check (I2, I3). Returns whether a spawn was performed.
    async fn spawn_one_to_fill_floor(&self) -> Result<bool> {
        let config = &self.config;
        let probe = &self.probe;
        let ports = &self.ports;
        self.registry
            .try_spawn_one(config.spawn_count, move |claimed| async move {
                let port = ports.allocate(&claimed)?;
                let worker = worker::spawn(config, probe, port, false).await?;
                info!(port, "lifecycle controller spawned replacement worker");
                Ok(worker)
            })
            .await
    }
}
