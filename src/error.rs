//! Error types for the reconstruction pipeline.

use std::{
    io,
    path::{Path, PathBuf},
};
use thiserror::Error;

/// The crate-wide result type.
pub type Result<T, E = LiftError> = std::result::Result<T, E>;

/// Various errors that can occur while recovering and rebuilding a project.
#[derive(Debug, Error)]
pub enum LiftError {
    /// Errors related to the filesystem
    #[error(transparent)]
    Io(#[from] LiftIoError),
    #[error("file could not be resolved due to broken symlink: \"{0}\"")]
    ResolveBadSymlink(PathBuf),
    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("invalid url \"{url}\": {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error(transparent)]
    Semver(#[from] semver::Error),
    /// A source map using the sectioned "index map" form.
    ///
    /// Only the flat Source Map v3 form is supported; rejecting sectioned
    /// maps keeps extraction counts truthful instead of silently producing
    /// empty results.
    #[error("source map uses the sectioned index-map form, which is not supported")]
    IndexMapUnsupported,
    #[error("unsupported source map version {0}, expected version 3")]
    UnsupportedSourceMapVersion(u64),
    #[error("failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },
    /// General purpose message.
    #[error("{0}")]
    Message(String),
}

impl LiftError {
    pub fn io(err: io::Error, path: impl Into<PathBuf>) -> Self {
        LiftIoError::new(err, path).into()
    }

    pub fn invalid_url(url: impl Into<String>, source: url::ParseError) -> Self {
        Self::InvalidUrl { url: url.into(), source }
    }

    pub fn parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Parse { path: path.into(), message: message.into() }
    }

    pub fn msg(msg: impl std::fmt::Display) -> Self {
        Self::Message(msg.to_string())
    }
}

/// An [`io::Error`] together with the path that produced it.
#[derive(Debug, Error)]
#[error("\"{}\": {io}", self.path.display())]
pub struct LiftIoError {
    io: io::Error,
    path: PathBuf,
}

impl LiftIoError {
    pub fn new(io: io::Error, path: impl Into<PathBuf>) -> Self {
        Self { io, path: path.into() }
    }

    /// The path at which the error occurred
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The underlying `io::Error`
    pub fn source(&self) -> &io::Error {
        &self.io
    }
}

impl From<LiftIoError> for io::Error {
    fn from(err: LiftIoError) -> Self {
        err.io
    }
}
