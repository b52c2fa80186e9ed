//! External-command engine: runs one program per item and classifies its failures.

use anyhow::{Context, anyhow};
use log::debug;
use std::path::Path;
use std::process::Command;

use super::processor::{ProcessError, Processor};
use super::tools::split_file_path;

/// Runs `program args...` once per item. Arguments may contain `{input}`, `{output_dir}` and
/// `{stem}`, substituted per call. Partial output from a failed run is left in place.
#[derive(Clone, Debug)]
pub struct CommandEngine {
    program: String,
    args: Vec<String>,
}

impl CommandEngine {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Build from an argv-style list (`["gdal_translate", "{input}", "{output_dir}"]`).
    pub fn from_argv(argv: &[String]) -> anyhow::Result<Self> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| anyhow!("engine command is empty"))?;
        Ok(Self::new(program.clone(), args.to_vec()))
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Arguments with placeholders filled in for one item.
    pub fn render_args(&self, input: &Path, output_dir: &Path) -> Vec<String> {
        let stem = split_file_path(input)
            .map(|(_, stem, _)| stem)
            .unwrap_or_default();
        let input = input.to_string_lossy();
        let output_dir = output_dir.to_string_lossy();
        self.args
            .iter()
            .map(|a| {
                a.replace("{input}", &input)
                    .replace("{output_dir}", &output_dir)
                    .replace("{stem}", &stem)
            })
            .collect()
    }
}

impl Processor for CommandEngine {
    fn process(&self, input: &Path, output_dir: &Path) -> Result<(), ProcessError> {
        let args = self.render_args(input, output_dir);
        debug!("{} {}", self.program, args.join(" "));
        let output = Command::new(&self.program)
            .args(&args)
            .output()
            .with_context(|| format!("spawn engine command `{}`", self.program))?;
        if output.status.success() {
            return Ok(());
        }
        let mut message = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let stdout = String::from_utf8_lossy(&output.stdout);
        if !stdout.trim().is_empty() {
            if !message.is_empty() {
                message.push('\n');
            }
            message.push_str(stdout.trim());
        }
        if message.is_empty() {
            message = format!("`{}` exited with {}", self.program, output.status);
        }
        Err(ProcessError::from_engine_message(message))
    }
}
