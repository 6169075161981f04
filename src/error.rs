//! Top-level error type and exit codes.

use thiserror::Error;

use crate::artifact::ArtifactError;
use crate::config::ConfigError;
use crate::layout::LayoutError;
use crate::rules::RulesError;
use crate::runner::RunnerError;
use crate::signal::EXIT_CODE_CANCELLED;
use crate::source::SourceError;
use crate::staging::StagingError;

/// Exit code for terminal failures.
pub const EXIT_CODE_FAILURE: i32 = 1;

/// Exit code for usage and configuration errors.
pub const EXIT_CODE_USAGE: i32 = 2;

#[derive(Debug, Error)]
pub enum HermitError {
    #[error("QMK install directory not given: use --qmk or set QMK_HOME")]
    MissingInstall,

    #[error("QMK install directory does not exist: {0}")]
    InstallNotFound(std::path::PathBuf),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Staging(#[from] StagingError),

    #[error(transparent)]
    Layout(#[from] LayoutError),

    #[error(transparent)]
    Rules(#[from] RulesError),

    #[error(transparent)]
    Runner(#[from] RunnerError),

    #[error(transparent)]
    Artifact(#[from] ArtifactError),

    #[error("make program `{0}` not found")]
    MakeNotFound(String),

    #[error("QMK build failed (make exited with code {0})")]
    BuildFailed(i32),

    #[error("build cancelled")]
    Cancelled,

    #[error("failed to serialize plan: {0}")]
    Json(#[from] serde_json::Error),
}

impl HermitError {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            HermitError::MissingInstall | HermitError::Config(_) => EXIT_CODE_USAGE,
            HermitError::BuildFailed(code) if *code != 0 => *code,
            HermitError::Cancelled => EXIT_CODE_CANCELLED,
            _ => EXIT_CODE_FAILURE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(HermitError::MissingInstall.exit_code(), 2);
        assert_eq!(HermitError::BuildFailed(2).exit_code(), 2);
        assert_eq!(HermitError::BuildFailed(0).exit_code(), 1);
        assert_eq!(HermitError::Cancelled.exit_code(), 130);
        assert_eq!(HermitError::MakeNotFound("gmake".to_string()).exit_code(), 1);
        assert_eq!(
            HermitError::Source(SourceError::UnknownKeyboard("x".to_string())).exit_code(),
            1
        );
        assert_eq!(
            HermitError::Config(ConfigError::ValidationError("x".to_string())).exit_code(),
            2
        );
    }
}
