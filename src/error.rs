//! Error type shared by packaging, upload and the run service resource.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid glob pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },

    #[error("source root not found: {path}")]
    RootNotFound { path: PathBuf },

    #[error("source root is not a directory: {path}")]
    RootNotDirectory { path: PathBuf },

    #[error("symlink not allowed in source tree: {path}")]
    SymlinkRejected { path: PathBuf },

    #[error("path is not valid UTF-8: {path}")]
    NonUtf8Path { path: PathBuf },

    #[error("walk error: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("invalid config {path}: {message}")]
    Config { path: PathBuf, message: String },

    #[error("invalid HTTP method '{method}'")]
    InvalidMethod { method: String },

    #[error("invalid upload header '{name}'")]
    InvalidHeader { name: String },

    #[error("upload request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("upload failed with HTTP status {status}")]
    UploadStatus { status: String },

    #[error("invalid server name '{name}': {reason}")]
    InvalidServerName { name: String, reason: &'static str },

    #[error("missing required field '{field}'")]
    MissingField { field: &'static str },

    #[error("build service response is incomplete: missing {missing}")]
    IncompleteBuildService { missing: &'static str },

    #[error("failed to encode {what}: {message}")]
    Encode { what: &'static str, message: String },

    #[error("{action} failed: {message}")]
    Api { action: &'static str, message: String },
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }
}
