use thiserror::Error;

/// Failures raised while normalizing a single track document.
#[derive(Error, Debug)]
pub enum TcxError {
    #[error("failed to parse XML: {0}")]
    Parse(String),
    #[error("file is not TCX or GPX format (namespace: {0:?})")]
    UnsupportedFormat(String),
    #[error("missing required data: {0}")]
    MissingData(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("failed to write XML: {0}")]
    Write(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TcxError>;
