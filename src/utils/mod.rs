pub mod config;
pub mod logger;
pub mod pipeline_toml;

pub use config::*;
pub use logger::{Colors, setup_logging};
pub use pipeline_toml::{PipelineToml, StageSection, build_stages, load_pipeline_toml};
