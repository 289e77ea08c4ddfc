//! Dispatcher configuration — immutable after load.
//!
//! Priority (highest to lowest): CLI flag / env var (both surfaced as
//! `Option<T>` from clap, since clap's `env` attribute already folds the
//! env var into the CLI value) > TOML file at `{data_dir}/dispatcher.toml`
//! > built-in default. Once [`DaemonConfig::load`] returns, nothing in the
//! process mutates these values — the scheduler re-reads them by reference
//! only.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{error, warn};

const DEFAULT_SPAWN_COUNT: usize = 1;
const DEFAULT_CHILD_IDLE_SPAN_SECS: u64 = 0;
const DEFAULT_SPAWN_ON_STARTUP: bool = false;
const DEFAULT_PARENT_PORT: u16 = 5000;
const DEFAULT_REST_PORT: u16 = 4500;
const DEFAULT_LOG_LEVEL: &str = "info";

const WORKER_PORT_RANGE_START: u16 = 6001;
const WORKER_PORT_RANGE_LEN: u16 = 256;

/// `{data_dir}/dispatcher.toml` — every field is an optional override.
#[derive(Deserialize, Default)]
struct TomlConfig {
    spawn_count: Option<usize>,
    child_idle_span_secs: Option<u64>,
    spawn_on_startup: Option<bool>,
    parent_port: Option<u16>,
    rest_port: Option<u16>,
    rhino_sysdir: Option<String>,
    log: Option<String>,
}

fn load_toml(data_dir: &Path) -> Option<TomlConfig> {
    let path = data_dir.join("dispatcher.toml");
    let contents = std::fs::read_to_string(&path).ok()?;
    match toml::from_str::<TomlConfig>(&contents) {
        Ok(cfg) => Some(cfg),
        Err(e) => {
            error!(path = %path.display(), err = %e, "failed to parse dispatcher.toml — using defaults");
            None
        }
    }
}

/// Overrides coming from CLI flags / environment variables (clap already
/// resolves CLI-vs-env precedence for us before this struct is built).
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub spawn_count: Option<usize>,
    pub child_idle_span_secs: Option<u64>,
    pub spawn_on_startup: Option<bool>,
    pub parent_port: Option<u16>,
    pub rest_port: Option<u16>,
    pub rhino_sysdir: Option<String>,
    pub log: Option<String>,
    pub data_dir: Option<PathBuf>,
    pub worker_executable: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// Operator-configured cap on simultaneously-live (non-Dead) workers.
    pub spawn_count: usize,
    /// Duration of parent inactivity after which a worker self-terminates.
    /// Zero disables idle-shutdown.
    pub child_idle_span_secs: u64,
    /// If true, one worker is spawned (and waited on) before the dispatcher
    /// starts serving traffic.
    pub spawn_on_startup: bool,
    /// Port workers poll to read `ActivityClock::idle_seconds()`.
    pub parent_port: u16,
    /// Port the dispatcher's own REST surface (§1.1) listens on.
    pub rest_port: u16,
    /// Optional `-rhinosysdir` passed to every spawned worker.
    pub rhino_sysdir: Option<String>,
    /// `tracing-subscriber` env-filter string, e.g. "info" or "debug,rhino_compute_dispatcher=trace".
    pub log: String,
    /// Resolved path to the `compute.geometry` worker executable.
    pub worker_executable: PathBuf,
    /// First port in the worker range (always 6001, not operator-tunable —
    /// kept as a field so tests can shrink the range).
    pub port_range_start: u16,
    /// Number of candidate ports scanned from `port_range_start` (always 256).
    pub port_range_len: u16,
}

impl DaemonConfig {
    /// Build config from CLI/env overrides plus an optional TOML file in
    /// `data_dir`. `data_dir` defaults to the current directory when not
    /// overridden — the dispatcher persists nothing, so this only matters
    /// for locating `dispatcher.toml`.
    pub fn load(overrides: ConfigOverrides) -> crate::error::Result<Self> {
        let data_dir = overrides
            .data_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("."));
        let toml = load_toml(&data_dir).unwrap_or_default();

        let spawn_count = overrides
            .spawn_count
            .or(toml.spawn_count)
            .unwrap_or(DEFAULT_SPAWN_COUNT)
            .max(1);
        let child_idle_span_secs = overrides
            .child_idle_span_secs
            .or(toml.child_idle_span_secs)
            .unwrap_or(DEFAULT_CHILD_IDLE_SPAN_SECS);
        let spawn_on_startup = overrides
            .spawn_on_startup
            .or(toml.spawn_on_startup)
            .unwrap_or(DEFAULT_SPAWN_ON_STARTUP);
        let parent_port = overrides
            .parent_port
            .or(toml.parent_port)
            .unwrap_or(DEFAULT_PARENT_PORT);
        let rest_port = overrides
            .rest_port
            .or(toml.rest_port)
            .unwrap_or(DEFAULT_REST_PORT);
        let rhino_sysdir = overrides.rhino_sysdir.or(toml.rhino_sysdir);
        let log = overrides
            .log
            .or(toml.log)
            .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string());

        let worker_executable = match overrides.worker_executable {
            Some(p) => p,
            None => resolve_worker_executable()?,
        };

        Ok(Self {
            spawn_count,
            child_idle_span_secs,
            spawn_on_startup,
            parent_port,
            rest_port,
            rhino_sysdir,
            log,
            worker_executable,
            port_range_start: WORKER_PORT_RANGE_START,
            port_range_len: WORKER_PORT_RANGE_LEN,
        })
    }
}

const WORKER_BINARY_NAME: &str = if cfg!(windows) {
    "compute.geometry.exe"
} else {
    "compute.geometry"
};

/// Resolve the `compute.geometry` worker binary: first a sibling of the
/// current executable, then a `compute.geometry/` subdirectory of it.
fn resolve_worker_executable() -> crate::error::Result<PathBuf> {
    let exe = std::env::current_exe().map_err(crate::error::DispatcherError::SpawnFailed)?;
    let dir = exe
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    let sibling = dir.join(WORKER_BINARY_NAME);
    if sibling.is_file() {
        return Ok(sibling);
    }

    let nested = dir.join("compute.geometry").join(WORKER_BINARY_NAME);
    if nested.is_file() {
        return Ok(nested);
    }

    warn!(
        sibling = %sibling.display(),
        nested = %nested.display(),
        "worker executable not found in either candidate location",
    );
    Err(crate::error::DispatcherError::ExecutableNotFound(format!(
        "checked {} and {}",
        sibling.display(),
        nested.display(),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_no_overrides_and_no_toml() {
        let dir = tempfile::tempdir().expect("tempdir");
        let overrides = ConfigOverrides {
            worker_executable: Some(PathBuf::from("/bin/true")),
            data_dir: Some(dir.path().to_path_buf()),
            ..Default::default()
        };
        let cfg = DaemonConfig::load(overrides).expect("config should load");
        assert_eq!(cfg.spawn_count, DEFAULT_SPAWN_COUNT);
        assert_eq!(cfg.child_idle_span_secs, DEFAULT_CHILD_IDLE_SPAN_SECS);
        assert!(!cfg.spawn_on_startup);
        assert_eq!(cfg.parent_port, DEFAULT_PARENT_PORT);
        assert_eq!(cfg.rest_port, DEFAULT_REST_PORT);
        assert_eq!(cfg.log, DEFAULT_LOG_LEVEL);
        assert_eq!(cfg.port_range_start, WORKER_PORT_RANGE_START);
        assert_eq!(cfg.port_range_len, WORKER_PORT_RANGE_LEN);
    }

    #[test]
    fn cli_overrides_win_over_default() {
        let dir = tempfile::tempdir().expect("tempdir");
        let overrides = ConfigOverrides {
            spawn_count: Some(4),
            worker_executable: Some(PathBuf::from("/bin/true")),
            data_dir: Some(dir.path().to_path_buf()),
            ..Default::default()
        };
        let cfg = DaemonConfig::load(overrides).expect("config should load");
        assert_eq!(cfg.spawn_count, 4);
    }

    #[test]
    fn spawn_count_zero_is_clamped_to_one() {
        let dir = tempfile::tempdir().expect("tempdir");
        let overrides = ConfigOverrides {
            spawn_count: Some(0),
            worker_executable: Some(PathBuf::from("/bin/true")),
            data_dir: Some(dir.path().to_path_buf()),
            ..Default::default()
        };
        let cfg = DaemonConfig::load(overrides).expect("config should load");
        assert_eq!(cfg.spawn_count, 1);
    }

    #[test]
    fn toml_file_fills_in_when_no_cli_override() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(
            dir.path().join("dispatcher.toml"),
            "spawn_count = 3\nparent_port = 5050\n",
        )
        .unwrap();

        let overrides = ConfigOverrides {
            worker_executable: Some(PathBuf::from("/bin/true")),
            data_dir: Some(dir.path().to_path_buf()),
            ..Default::default()
        };
        let cfg = DaemonConfig::load(overrides).expect("config should load");
        assert_eq!(cfg.spawn_count, 3);
        assert_eq!(cfg.parent_port, 5050);
    }
}
