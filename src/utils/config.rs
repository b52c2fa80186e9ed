//! Application configuration constants.
//! Defaults and thresholds in one place.

use std::sync::OnceLock;
use std::time::Duration;

// ---- Package / paths (from CARGO_PKG_NAME, cached) ----

/// Package-derived names: built once from `CARGO_PKG_NAME`, then cached.
pub struct PackagePaths {
    pkg_name: &'static str,
    config_filename: String,
    env_prefix: String,
}

static PACKAGE_PATHS: OnceLock<PackagePaths> = OnceLock::new();

impl PackagePaths {
    /// Build and cache names from `CARGO_PKG_NAME`. Called once on first use.
    pub fn get() -> &'static PackagePaths {
        PACKAGE_PATHS.get_or_init(|| {
            let pkg = env!("CARGO_PKG_NAME");
            PackagePaths {
                pkg_name: pkg,
                config_filename: format!("{pkg}.toml"),
                env_prefix: pkg.to_uppercase(),
            }
        })
    }

    pub fn pkg_name(&self) -> &str {
        self.pkg_name
    }

    /// Default pipeline config file looked up in the working directory.
    pub fn config_filename(&self) -> &str {
        &self.config_filename
    }

    /// Name of an environment override, e.g. `SHARDPIPE_MAX_TASKS`.
    pub fn env_var(&self, key: &str) -> String {
        format!("{}_{}", self.env_prefix, key)
    }
}

// ---- Executor ----

/// Executor admission and barrier timing.
pub struct ExecutorDefaults;

impl ExecutorDefaults {
    /// Max concurrently running engine calls.
    pub const MAX_TASKS: usize = 6;
    /// Cap on one admission wait; the timeout is re-checked after each.
    pub const ADMISSION_BACKOFF: Duration = Duration::from_secs(1);
    /// Admission gives up after this long (a stuck task would otherwise block forever).
    pub const ADMISSION_TIMEOUT: Duration = Duration::from_secs(4 * 60 * 60);
    /// Poll interval while waiting for a stage to drain.
    pub const STAGE_POLL: Duration = Duration::from_secs(1);
}

// ---- Shards ----

pub struct ShardDefaults;

impl ShardDefaults {
    /// Size a shard may reach before the next request rotates to a new one (bytes).
    pub const CAPACITY: u64 = 900_000;
}

// ---- Engine boundary ----

/// Marker the engine puts in front of its error code, e.g. `ERROR 000210: ...`.
pub const ENGINE_ERROR_MARKER: &str = "ERROR";

/// Width of the code following the marker and its separator.
pub const ENGINE_ERROR_CODE_WIDTH: usize = 6;
