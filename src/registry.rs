//! The authoritative in-memory set of workers, partitioned by lifecycle
//! state, under a single lock (§4.4, §5).
//!
//! The implementation keeps one `tokio::sync::Mutex<Vec<WorkerProcess>>`
//! rather than splitting membership and probing into separate locks (§9):
//! `SpawnCount` is operator-configured and expected to stay in the single
//! digits, so probing while holding the lock (each probe is 1s-bounded)
//! never stalls the pool for long. See DESIGN.md for the tradeoff.

use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::probe::{BusyState, ProbeClient};
use crate::worker::{WorkerProcess, WorkerState};

pub struct WorkerRegistry {
    workers: Mutex<Vec<WorkerProcess>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self {
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Ports currently held by any non-Dead worker (I1).
    pub async fn claimed_ports(&self) -> HashSet<u16> {
        let workers = self.workers.lock().await;
        workers
            .iter()
            .filter(|w| w.state != WorkerState::Dead)
            .map(|w| w.port)
            .collect()
    }

    /// Count of non-Dead workers (I2 is `non_dead_count() <= SpawnCount`).
    pub async fn non_dead_count(&self) -> usize {
        let workers = self.workers.lock().await;
        workers.iter().filter(|w| w.state != WorkerState::Dead).count()
    }

    /// True if any worker is currently Starting (I3: at most one at a time).
    pub async fn has_starting(&self) -> bool {
        let workers = self.workers.lock().await;
        workers.iter().any(|w| w.state == WorkerState::Starting)
    }

    /// Insert a newly spawned worker in Starting state. Enforces I1: the
    /// port must not already be held by a non-Dead worker.
    pub async fn add_starting(&self, worker: WorkerProcess) {
        let mut workers = self.workers.lock().await;
        debug_assert!(
            !workers
                .iter()
                .any(|w| w.state != WorkerState::Dead && w.port == worker.port),
            "port {} already claimed by a non-Dead worker",
            worker.port
        );
        info!(port = worker.port, "worker registered as Starting");
        workers.push(worker);
    }

    /// Starting -> Ready (I4), on readiness probe success.
    pub async fn promote_to_ready(&self, port: u16) {
        let mut workers = self.workers.lock().await;
        if let Some(w) = workers.iter_mut().find(|w| w.port == port) {
            if w.state == WorkerState::Starting {
                w.state = WorkerState::Ready;
                info!(port, "worker promoted to Ready");
            }
        }
    }

    /// Starting|Ready -> Dead (I4). Kills the process if still alive and
    /// removes it from the pool so its port can be reused.
    pub async fn mark_dead(&self, port: u16) {
        let mut workers = self.workers.lock().await;
        if let Some(idx) = workers.iter().position(|w| w.port == port) {
            workers[idx].kill().await;
            let removed = workers.remove(idx);
            info!(port = removed.port, "worker marked Dead and removed");
        }
    }

    /// Ready workers in the fixed order they entered Ready (insertion
    /// order), for deterministic "prefer the oldest worker" selection.
    pub async fn snapshot_ready_ports(&self) -> Vec<u16> {
        let workers = self.workers.lock().await;
        workers
            .iter()
            .filter(|w| w.state == WorkerState::Ready)
            .map(|w| w.port)
            .collect()
    }

    /// Probe a Ready worker's `/isbusy` and return its state. Performed
    /// while holding no lock of our own — the caller (Scheduler) holds the
    /// registry lock around the whole scan per §4.5 step 3b.
    pub async fn probe_busy(&self, probe: &ProbeClient, port: u16) -> BusyState {
        probe.probe_busy(port).await
    }

    /// Promote any Starting worker whose `/healthcheck` now succeeds,
    /// without blocking on it (§4.5 step 3a, non-blocking half of readiness).
    pub async fn promote_ready_starting(&self, probe: &ProbeClient) {
        let starting_ports: Vec<u16> = {
            let workers = self.workers.lock().await;
            workers
                .iter()
                .filter(|w| w.state == WorkerState::Starting)
                .map(|w| w.port)
                .collect()
        };
        for port in starting_ports {
            if probe.probe_ready(port).await {
                self.promote_to_ready(port).await;
            }
        }
    }

    /// Remove workers whose process has exited, and demote+kill Ready
    /// workers that fail an `/isbusy` probe as Unreachable (§4.4).
    pub async fn reap(&self, probe: &ProbeClient) {
        let mut workers = self.workers.lock().await;

        // Exited processes: mark Dead immediately, no probe needed.
        for w in workers.iter_mut() {
            if w.state != WorkerState::Dead && !w.is_process_alive() {
                debug!(port = w.port, "worker process exited, reaping");
                w.state = WorkerState::Dead;
            }
        }

        // Unresponsive Ready workers: demote to Dead after probing.
        let ready_ports: Vec<u16> = workers
            .iter()
            .filter(|w| w.state == WorkerState::Ready)
            .map(|w| w.port)
            .collect();
        for port in ready_ports {
            if probe.probe_busy(port).await == BusyState::Unreachable {
                if let Some(w) = workers.iter_mut().find(|w| w.port == port) {
                    debug!(port, "worker unreachable on /isbusy, reaping");
                    w.kill().await;
                    w.state = WorkerState::Dead;
                }
            }
        }

        workers.retain(|w| w.state != WorkerState::Dead);
    }

    /// Atomically decide whether there is room to spawn another worker (I2:
    /// `non_dead_count < spawn_count`) and no spawn already in flight (I3:
    /// at most one Starting at a time), and if so, run `spawn` — passed the
    /// ports currently claimed by non-Dead workers — and insert its result
    /// as Starting. All of this happens under one lock acquisition, so two
    /// concurrent callers can never both observe room and both spawn (§4.5
    /// step 3c, §5: "spawning ... is performed inside the lock only as a
    /// non-blocking launch"). Returns `Ok(false)` without invoking `spawn`
    /// when there is no room.
    pub async fn try_spawn_one<F, Fut>(&self, spawn_count: usize, spawn: F) -> crate::error::Result<bool>
    where
        F: FnOnce(HashSet<u16>) -> Fut,
        Fut: std::future::Future<Output = crate::error::Result<WorkerProcess>>,
    {
        let mut workers = self.workers.lock().await;

        let non_dead = workers.iter().filter(|w| w.state != WorkerState::Dead).count();
        let has_starting = workers.iter().any(|w| w.state == WorkerState::Starting);
        if non_dead >= spawn_count || has_starting {
            return Ok(false);
        }

        let claimed: HashSet<u16> = workers
            .iter()
            .filter(|w| w.state != WorkerState::Dead)
            .map(|w| w.port)
            .collect();
        let worker = spawn(claimed).await?;
        info!(port = worker.port, "worker registered as Starting");
        workers.push(worker);
        Ok(true)
    }

    /// Cap enforcement (§4.6 step 3): kill one worker to bring the pool back
    /// under `SpawnCount`. Prefers a Starting worker (it has served nothing
    /// yet) over the most-recently-spawned Ready worker. Returns the killed
    /// port, if any worker was available to kill.
    pub async fn kill_one_to_enforce_cap(&self) -> Option<u16> {
        let mut workers = self.workers.lock().await;

        let victim_idx = workers
            .iter()
            .position(|w| w.state == WorkerState::Starting)
            .or_else(|| {
                workers
                    .iter()
                    .enumerate()
                    .filter(|(_, w)| w.state == WorkerState::Ready)
                    .max_by_key(|(_, w)| w.spawned_at)
                    .map(|(idx, _)| idx)
            })?;

        workers[victim_idx].kill().await;
        let victim = workers.remove(victim_idx);
        info!(port = victim.port, "worker killed to enforce SpawnCount cap");
        Some(victim.port)
    }

    /// Kill and remove every tracked worker. Used on dispatcher shutdown.
    pub async fn kill_all(&self) {
        let mut workers = self.workers.lock().await;
        for w in workers.iter_mut() {
            w.kill().await;
        }
        workers.clear();
    }
}

impl Default for WorkerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

pub type SharedWorkerRegistry = Arc<WorkerRegistry>;
