//! Front-end dispatcher that multiplexes inbound HTTP compute requests
//! across a pool of locally spawned geometry worker processes.
//!
//! The worker pool scheduler and its lifecycle controller — together with
//! the busy/health probe protocol spoken to each worker — are the core of
//! this crate (see each module's docs). Reverse proxying of request bodies,
//! authentication, TLS, and the geometry evaluator itself are external
//! collaborators and are deliberately out of scope here.

pub mod activity_clock;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod port_allocator;
pub mod probe;
pub mod registry;
pub mod rest;
pub mod scheduler;
pub mod worker;

use std::sync::Arc;

use crate::activity_clock::ActivityClock;
use crate::config::DaemonConfig;
use crate::registry::WorkerRegistry;
use crate::scheduler::Scheduler;

/// The application root's shared handle — passed into every request handler
/// and background task instead of any process-global mutable state.
pub struct AppContext {
    pub config: DaemonConfig,
    pub scheduler: Arc<Scheduler>,
    pub activity_clock: Arc<ActivityClock>,
}

impl AppContext {
    /// Build the scheduler and registry for `config` and wrap them for
    /// sharing across the REST surface and the lifecycle controller.
    pub fn new(config: DaemonConfig) -> Arc<Self> {
        let registry = Arc::new(WorkerRegistry::new());
        let activity_clock = Arc::new(ActivityClock::new());
        let scheduler = Arc::new(Scheduler::with_activity_clock(
            config.clone(),
            registry,
            activity_clock.clone(),
        ));
        Arc::new(Self {
            config,
            scheduler,
            activity_clock,
        })
    }
}
