//! Stage descriptions: what a stage reads, where it writes, and how it processes one item.

use anyhow::{Result, bail};
use std::path::PathBuf;
use std::sync::Arc;

use crate::engine::Processor;
use crate::pipeline::walk::enumerate;
use crate::shard::ShardManager;
use crate::types::{WalkOpts, WorkItem};

/// Where a stage's candidates come from.
#[derive(Clone)]
pub enum StageInput {
    /// Raw files under `root`, optionally restricted to one extension.
    Enumerate {
        root: PathBuf,
        extension: Option<String>,
    },
    /// Everything a prior stage wrote into its shard tree.
    Shards(Arc<ShardManager>),
}

impl StageInput {
    /// List candidates now. Called when the stage starts, after earlier stages have drained.
    pub fn collect(&self, walk: &WalkOpts) -> Result<Vec<WorkItem>> {
        match self {
            StageInput::Enumerate { root, extension } => {
                if !root.is_dir() {
                    bail!("input root {} is not a directory", root.display());
                }
                enumerate(root, extension.as_deref(), walk)
            }
            StageInput::Shards(shards) => shards.all_files(None, walk),
        }
    }
}

/// One pipeline step. A stateless description; running it is the runner's job.
#[derive(Clone)]
pub struct Stage {
    pub name: String,
    pub input: StageInput,
    pub output: Arc<ShardManager>,
    pub processor: Arc<dyn Processor>,
    /// Items with another extension are skipped (logged, not failed).
    pub required_extension: Option<String>,
}

impl Stage {
    pub fn new(
        name: impl Into<String>,
        input: StageInput,
        output: Arc<ShardManager>,
        processor: Arc<dyn Processor>,
    ) -> Self {
        Self {
            name: name.into(),
            input,
            output,
            processor,
            required_extension: None,
        }
    }

    pub fn with_required_extension(mut self, ext: impl Into<String>) -> Self {
        self.required_extension = Some(ext.into());
        self
    }
}
