//! Work enumeration: walk a root and collect matching files as [`WorkItem`]s.

use anyhow::{Result, anyhow};
use log::{debug, warn};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::engine::tools::{extension_matches, should_include_in_walk};
use crate::types::{WalkOpts, WorkItem};

/// One result from a directory walk: either a file to consider or an error with optional path.
pub enum WalkOutcome {
    Ok(PathBuf),
    Err { msg: String, path: Option<PathBuf> },
}

/// Convert a walkdir result into [`WalkOutcome`]. Directories and other non-files are `None`.
pub fn to_outcome_walkdir(r: Result<walkdir::DirEntry, walkdir::Error>) -> Option<WalkOutcome> {
    match r {
        Ok(entry) if entry.file_type().is_file() => Some(WalkOutcome::Ok(entry.into_path())),
        // Directories, and symlinks when not following links.
        Ok(_) => None,
        Err(err) => Some(WalkOutcome::Err {
            msg: format!("{}", err),
            path: err.path().map(PathBuf::from),
        }),
    }
}

/// Every file under `root` (recursive) whose extension matches `extension`; `None` takes all
/// files. Materialized once per call; order is whatever the filesystem yields.
///
/// Walk errors are logged and skipped, or returned immediately when `opts.strict`.
pub fn enumerate(
    root: &Path,
    extension: Option<&str>,
    opts: &WalkOpts,
) -> Result<Vec<WorkItem>> {
    let iter = WalkDir::new(root)
        .follow_links(opts.follow_links)
        .into_iter()
        .filter_map(to_outcome_walkdir);
    let (items, skipped) = run_walk_loop(iter, extension, opts)?;
    if !skipped.is_empty() {
        warn!(
            "Skipped {} paths under {} due to permission errors or access issues",
            skipped.len(),
            root.display()
        );
        for (p, msg) in &skipped {
            debug!("  skipped: {} ({})", p.display(), msg);
        }
    }
    debug!(
        "Enumerated {} files under {} (extension: {})",
        items.len(),
        root.display(),
        extension.unwrap_or("*")
    );
    Ok(items)
}

/// Consume `iter`, keeping included files whose extension matches. Returns the items and the
/// paths skipped on error. In strict mode the first error is returned instead.
pub fn run_walk_loop<I>(
    iter: I,
    extension: Option<&str>,
    opts: &WalkOpts,
) -> Result<(Vec<WorkItem>, Vec<(PathBuf, String)>)>
where
    I: Iterator<Item = WalkOutcome>,
{
    let mut items = Vec::new();
    let mut skipped = Vec::new();
    for outcome in iter {
        match outcome {
            WalkOutcome::Ok(path) => {
                if !should_include_in_walk(&path, &opts.exclude)
                    || !extension_matches(&path, extension)
                {
                    continue;
                }
                if let Some(item) = WorkItem::from_path(&path) {
                    items.push(item);
                }
            }
            WalkOutcome::Err { msg, path } => {
                if opts.strict {
                    return Err(anyhow!("strict mode: {}", msg));
                }
                let path = path.unwrap_or_else(|| PathBuf::from("<no-path>"));
                skipped.push((path, msg));
            }
        }
    }
    Ok((items, skipped))
}
