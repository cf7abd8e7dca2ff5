use std::path::PathBuf;
use thiserror::Error;

pub type DumpfsResult<T> = Result<T, DumpfsError>;

#[derive(Debug, Error)]
pub enum DumpfsError {
    #[error("not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("no such entry: {0}")]
    NoSuchEntry(PathBuf),

    #[error("permission denied: {0}")]
    PermissionDenied(PathBuf),

    #[error("operation not supported: {0}")]
    NotSupported(&'static str),

    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
