use std::io;

use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(String),

    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("http client error: {0}")]
    Http(#[from] reqwest::Error),

    /// Shutdown was requested. Not a failure.
    #[error("operation cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

impl AppError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, AppError::Cancelled)
    }
}
