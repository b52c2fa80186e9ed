//! Completion filter: drop candidates whose output already exists in a stage's shard tree.
//!
//! Matching is by substring: a candidate is done when its base name occurs inside any done
//! base name. That tolerates tags appended by stages (`site12` → `site12_proc`), and also
//! matches unrelated names that happen to contain it (`site1` is found in `site12_proc`).

use log::debug;
use rayon::prelude::*;

use crate::types::WorkItem;

/// True if `base_name` occurs in any of `done_names`.
pub fn is_completed(base_name: &str, done_names: &[&str]) -> bool {
    done_names.iter().any(|done| done.contains(base_name))
}

/// Candidates with no match in `done`, in their original order. Each candidate is checked
/// once against a read-only snapshot of the done names.
pub fn exclude_completed(candidates: Vec<WorkItem>, done: &[WorkItem]) -> Vec<WorkItem> {
    let done_names: Vec<&str> = done.iter().map(|d| d.base_name.as_str()).collect();
    if done_names.is_empty() {
        return candidates;
    }
    candidates
        .into_par_iter()
        .filter(|c| {
            let hit = is_completed(&c.base_name, &done_names);
            if hit {
                debug!("{} has already been processed", c.base_name);
            }
            !hit
        })
        .collect()
}
