use std::{io, path::PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("no response body to cache")]
    NoContent,
    #[error("failed to create cache directory `{path}`: {source}")]
    CreateDir { path: PathBuf, source: io::Error },
    #[error("failed to write cache file: {0}")]
    Write(io::Error),
    #[error("failed to read cache file: {0}")]
    Read(io::Error),
    #[error("failed to remove cache file: {0}")]
    Remove(io::Error),
    #[error("failed to collect response body: {0}")]
    Body(String),
    #[error("cache write task aborted: {0}")]
    Task(String),
}
