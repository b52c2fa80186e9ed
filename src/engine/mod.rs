//! Engine boundary and driver plumbing

pub mod arg_parser;
pub mod cli;
pub mod command;
pub mod processor;
pub mod tools;

// Re-export commonly used items
pub use arg_parser::Cli;
pub use cli::handle_run;
pub use command::CommandEngine;
pub use processor::{EngineCode, ProcessError, Processor, parse_error_code};
pub use tools::{
    extension_matches, glob_match, is_within, normalize_extension, should_include_in_walk,
    split_file_path,
};
