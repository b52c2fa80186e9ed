//! Pipeline components: enumeration, completion filter, stage runner, sequencer.

pub mod completion;
pub mod error_handler;
pub mod orchestrator;
pub mod report;
pub mod runner;
pub mod stage;
pub mod walk;

pub use completion::{exclude_completed, is_completed};
pub use error_handler::{handle_item_failure, log_stage_summary};
pub use orchestrator::{Pipeline, run_all};
pub use report::StageProgress;
pub use runner::{RunContext, run_stage};
pub use stage::{Stage, StageInput};
pub use walk::{WalkOutcome, enumerate, run_walk_loop, to_outcome_walkdir};
