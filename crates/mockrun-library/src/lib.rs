//! Artifact transfer for mockrun engines.
//!
//! This crate fetches engine artifacts (jars, distributions, native binaries,
//! serverless bundles) over HTTP, places them atomically in the local cache,
//! unpacks zip and tar.gz archives with entry-path validation, and queries
//! release metadata to resolve the newest published engine version.

pub mod archive;
pub mod download;
pub mod release;

pub use archive::{extract_archive, safe_join, ArchiveFormat};
pub use download::{DownloadConfig, Downloader, LATEST};
pub use release::{GithubReleases, ReleaseSource};

/// User agent sent on every outbound request.
pub const USER_AGENT: &str = concat!("mockrun/", env!("CARGO_PKG_VERSION"));

/// GitHub organisation publishing the engine releases.
pub const RELEASE_OWNER: &str = "imposter-project";

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LibraryError {
    #[error("library I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("empty response body from {0}")]
    EmptyBody(String),
    #[error("archive extraction failed: {0}")]
    Extract(String),
    #[error("archive entry escapes destination directory: {0}")]
    PathTraversal(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl LibraryError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, LibraryError::NotFound(_))
    }
}
