// cli/src/error.rs - containerctl failure modes

use std::path::PathBuf;

use container_boot::ContainerError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("layout: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("key {}: {message}", path.display())]
    Key { path: PathBuf, message: String },

    #[error("layout: {0}")]
    Layout(String),

    #[error("{0}")]
    Container(#[from] ContainerError),

    #[error("{failed} of {total} component(s) failed verification")]
    VerifyFailed { failed: usize, total: usize },
}

impl CliError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CliError::Io { path: path.into(), source }
    }

    /// Process exit code: 2 for bad input, 3 for trust failures, 1 otherwise.
    pub fn exit_code(&self) -> u8 {
        match self {
            CliError::Container(e) if e.is_security_violation() => 3,
            CliError::VerifyFailed { .. } => 3,
            CliError::Toml(_) | CliError::Layout(_) | CliError::Key { .. } => 2,
            _ => 1,
        }
    }
}

pub type Result<T> = std::result::Result<T, CliError>;
