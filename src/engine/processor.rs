//! Geoprocessing engine boundary: the per-item call and its typed errors.

use std::fmt;
use std::path::Path;

use crate::types::FailureKind;
use crate::utils::config::{ENGINE_ERROR_CODE_WIDTH, ENGINE_ERROR_MARKER};

/// Code reported by the engine, kept as text so leading zeros survive (`000210`).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct EngineCode(String);

impl EngineCode {
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EngineCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Failure of a single engine call. Both variants are recoverable at the item level.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    /// The engine ran and reported an error with a code.
    #[error("engine error {code}: {message}")]
    Engine { code: EngineCode, message: String },

    /// Anything the engine did not classify.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ProcessError {
    /// Classify an engine message: `Engine` when it carries a code, `Other` otherwise.
    pub fn from_engine_message(message: impl Into<String>) -> Self {
        let message = message.into();
        match parse_error_code(&message) {
            Some(code) => ProcessError::Engine { code, message },
            None => ProcessError::Other(anyhow::anyhow!(message)),
        }
    }
}

impl From<&ProcessError> for FailureKind {
    fn from(err: &ProcessError) -> Self {
        match err {
            ProcessError::Engine { code, .. } => FailureKind::Engine {
                code: code.to_string(),
            },
            ProcessError::Other(e) => FailureKind::Runtime {
                message: format!("{e:#}"),
            },
        }
    }
}

/// The per-item transformation. One synchronous call per input file; writes into `output_dir`.
pub trait Processor: Send + Sync {
    fn process(&self, input: &Path, output_dir: &Path) -> Result<(), ProcessError>;
}

impl<F> Processor for F
where
    F: Fn(&Path, &Path) -> Result<(), ProcessError> + Send + Sync,
{
    fn process(&self, input: &Path, output_dir: &Path) -> Result<(), ProcessError> {
        self(input, output_dir)
    }
}

/// Pull the code out of an engine message such as `ERROR 000210: Cannot create output`.
///
/// Skips the marker plus one separator character and reads the next
/// [`ENGINE_ERROR_CODE_WIDTH`] characters. `None` if the marker is missing or the message is
/// too short to hold a full code.
pub fn parse_error_code(message: &str) -> Option<EngineCode> {
    let at = message.find(ENGINE_ERROR_MARKER)?;
    let code: String = message[at + ENGINE_ERROR_MARKER.len()..]
        .chars()
        .skip(1)
        .take(ENGINE_ERROR_CODE_WIDTH)
        .collect();
    (code.chars().count() == ENGINE_ERROR_CODE_WIDTH).then(|| EngineCode(code))
}
