use thiserror::Error;

use super::config::ConfigError;
use crate::core::io::traits::TrajectoryError;
use crate::core::models::interfaces::Side;
use crate::core::models::path::PathError;
use crate::core::order::OrderError;
use std::path::PathBuf;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Failed to launch '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error(
        "External program exited with {code}; see '{stdout}' and '{stderr}'",
        code = code.map_or_else(|| "a signal".to_string(), |c| format!("code {c}")),
        stdout = stdout.display(),
        stderr = stderr.display()
    )]
    ProcessFailed {
        code: Option<i32>,
        stdout: PathBuf,
        stderr: PathBuf,
    },

    #[error("Expected output '{path}' was never produced", path = path.display())]
    MissingOutput { path: PathBuf },

    #[error("Corrupt trajectory stream at byte offset {offset}: {reason}")]
    CorruptStream { offset: u64, reason: String },

    #[error("Trajectory error: {0}")]
    Trajectory(TrajectoryError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Path error: {0}")]
    Path(#[from] PathError),

    #[error("Order parameter error: {0}")]
    Order(#[from] OrderError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error(
        "Initial path is inconsistent with the ensemble (start: {start}, end: {end})",
        start = side_label(*start),
        end = side_label(*end)
    )]
    InitiationInconsistent {
        start: Option<Side>,
        end: Option<Side>,
    },

    #[error("Initiation abandoned after {attempts} attempts during {stage}")]
    InitiationAbandoned { stage: &'static str, attempts: usize },

    #[error("Internal logic error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Whether the failure only invalidates the current attempt.
    ///
    /// Retryable errors come from the external process or its output. The caller may
    /// discard the in-progress path and try again with the same ensemble state.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::ProcessFailed { .. }
                | EngineError::MissingOutput { .. }
                | EngineError::CorruptStream { .. }
        )
    }
}

impl From<TrajectoryError> for EngineError {
    fn from(e: TrajectoryError) -> Self {
        match e {
            TrajectoryError::CorruptStream { offset, reason } => {
                EngineError::CorruptStream { offset, reason }
            }
            TrajectoryError::Io(io) => EngineError::Io(io),
            other => EngineError::Trajectory(other),
        }
    }
}

fn side_label(side: Option<Side>) -> String {
    side.map_or_else(|| "none".to_string(), |s| s.to_string())
}
