//! Capacity-bounded output directory trees.
//!
//! A [`ShardManager`] owns `root` and writes into numbered subdirectories
//! `<class_name>0`, `<class_name>1`, ... Only one of them is active at a time. Capacity is a
//! soft bound: a write may push the active shard over it, and the next
//! [`ShardManager::get_directory`] call rotates.

use anyhow::{Context, Result, bail};
use log::{debug, info};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use walkdir::WalkDir;

use crate::pipeline::walk::enumerate;
use crate::types::{WalkOpts, WorkItem};

/// Active shard. Guarded as a unit so measure-rotate-return is atomic.
#[derive(Debug)]
struct ShardState {
    counter: u64,
    current: PathBuf,
}

#[derive(Debug)]
pub struct ShardManager {
    root: PathBuf,
    class_name: String,
    capacity: u64,
    state: Mutex<ShardState>,
}

/// Recursive size of all files under `dir` (bytes).
///
/// Engines may create and remove scratch files while a shard is measured; entries that vanish
/// mid-walk are skipped. A missing `dir` itself is still an error.
pub fn dir_size(dir: &Path) -> Result<u64> {
    let mut total = 0_u64;
    for entry in WalkDir::new(dir) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if e.depth() > 0 && is_not_found(&e) => continue,
            Err(e) => {
                return Err(e).with_context(|| format!("measure shard {}", dir.display()));
            }
        };
        if entry.file_type().is_file() {
            match entry.metadata() {
                Ok(meta) => total += meta.len(),
                Err(e) if is_not_found(&e) => continue,
                Err(e) => {
                    return Err(e).with_context(|| format!("stat {}", entry.path().display()));
                }
            }
        }
    }
    Ok(total)
}

fn is_not_found(err: &walkdir::Error) -> bool {
    err.io_error()
        .is_some_and(|io| io.kind() == ErrorKind::NotFound)
}

impl ShardManager {
    /// Manage `root` (created if missing), writing into `<class_name><n>` shards of at most
    /// `capacity` bytes. Selects the first shard, starting at 0, that is missing or under capacity.
    pub fn new(
        root: impl Into<PathBuf>,
        class_name: impl Into<String>,
        capacity: u64,
    ) -> Result<Self> {
        let root = root.into();
        let class_name = class_name.into();
        fs::create_dir_all(&root)
            .with_context(|| format!("create shard root {}", root.display()))?;
        debug!(
            "Shard manager for {} ({}*), capacity {} bytes",
            root.display(),
            class_name,
            capacity
        );
        let (counter, current) = open_shard(&root, &class_name, capacity, 0)?;
        Ok(Self {
            root,
            class_name,
            capacity,
            state: Mutex::new(ShardState { counter, current }),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn current_counter(&self) -> u64 {
        self.state.lock().unwrap().counter
    }

    /// Active shard as of the last selection, without re-measuring.
    pub fn current_dir(&self) -> PathBuf {
        self.state.lock().unwrap().current.clone()
    }

    /// Directory to write the next output into. Re-measures the active shard first and rotates
    /// if it has reached capacity. Filesystem errors during rotation are returned; the active
    /// shard is left unchanged in that case.
    pub fn get_directory(&self) -> Result<PathBuf> {
        let mut state = self.state.lock().unwrap();
        let size = dir_size(&state.current)?;
        if size >= self.capacity {
            info!(
                "{} is full ({} >= {} bytes); rotating",
                state.current.display(),
                size,
                self.capacity
            );
            let (counter, current) =
                open_shard(&self.root, &self.class_name, self.capacity, state.counter + 1)?;
            state.counter = counter;
            state.current = current;
        }
        Ok(state.current.clone())
    }

    /// Every file anywhere under the managed root, optionally restricted to one extension.
    /// `walk` carries the run's exclude patterns, link policy and strictness.
    pub fn all_files(&self, ext: Option<&str>, walk: &WalkOpts) -> Result<Vec<WorkItem>> {
        enumerate(&self.root, ext, walk)
    }
}

/// Path of shard `counter`.
fn shard_path(root: &Path, class_name: &str, counter: u64) -> PathBuf {
    root.join(format!("{class_name}{counter}"))
}

/// Starting at `counter`, create or reuse the first shard that is under capacity.
/// Returns its counter and path.
fn open_shard(
    root: &Path,
    class_name: &str,
    capacity: u64,
    mut counter: u64,
) -> Result<(u64, PathBuf)> {
    loop {
        let path = shard_path(root, class_name, counter);
        match fs::create_dir(&path) {
            Ok(()) => {
                info!("Created shard {}", path.display());
                return Ok((counter, path));
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                if !path.is_dir() {
                    bail!("shard path {} exists and is not a directory", path.display());
                }
                let size = dir_size(&path)?;
                if size < capacity {
                    debug!(
                        "Reusing shard {} ({} of {} bytes)",
                        path.display(),
                        size,
                        capacity
                    );
                    return Ok((counter, path));
                }
                debug!("Shard {} is full ({} bytes)", path.display(), size);
                counter += 1;
            }
            Err(e) => {
                return Err(e).with_context(|| format!("create shard {}", path.display()));
            }
        }
    }
}
