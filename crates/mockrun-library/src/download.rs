use crate::archive::{extract_archive, ArchiveFormat};
use crate::{LibraryError, USER_AGENT};
use std::fs;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

/// Symbolic version meaning "whatever was released last".
pub const LATEST: &str = "latest";

/// Where an artifact family is published.
///
/// `versioned_base_url` contains a `{version}` placeholder. When `extract` is
/// set the downloaded file is unpacked into the local path, which is then a
/// directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadConfig {
    pub latest_base_url: String,
    pub versioned_base_url: String,
    pub extract: Option<ArchiveFormat>,
}

impl DownloadConfig {
    pub fn new(latest_base_url: &str, versioned_base_url: &str) -> Self {
        Self {
            latest_base_url: latest_base_url.trim_end_matches('/').to_owned(),
            versioned_base_url: versioned_base_url.trim_end_matches('/').to_owned(),
            extract: None,
        }
    }

    /// GitHub release download locations for `owner/repo`, tagged `v<version>`.
    pub fn github(owner: &str, repo: &str) -> Self {
        Self::new(
            &format!("https://github.com/{owner}/{repo}/releases/latest/download"),
            &format!("https://github.com/{owner}/{repo}/releases/download/v{{version}}"),
        )
    }

    #[must_use]
    pub fn extracting(mut self, format: ArchiveFormat) -> Self {
        self.extract = Some(format);
        self
    }

    pub fn url_for(&self, version: &str, file_name: &str) -> String {
        if version == LATEST {
            format!("{}/{file_name}", self.latest_base_url)
        } else {
            let base = self.versioned_base_url.replace("{version}", version);
            format!("{base}/{file_name}")
        }
    }
}

/// HTTP artifact fetcher.
///
/// Bodies are streamed into a temporary file next to the destination and only
/// renamed (or extracted via a staging directory) into place once the
/// response is complete and non-empty. The canonical path therefore never
/// holds a partial artifact.
#[derive(Clone)]
pub struct Downloader {
    agent: ureq::Agent,
}

impl Default for Downloader {
    fn default() -> Self {
        Self::new()
    }
}

impl Downloader {
    pub fn new() -> Self {
        Self {
            agent: ureq::Agent::new_with_defaults(),
        }
    }

    /// Fetch `remote_file_name` for `version` into `local_path`.
    ///
    /// For an explicit version, a not-found response is retried once with
    /// `fallback_remote_file_name`, if one is given.
    pub fn fetch_artifact(
        &self,
        config: &DownloadConfig,
        local_path: &Path,
        remote_file_name: &str,
        version: &str,
        fallback_remote_file_name: Option<&str>,
    ) -> Result<(), LibraryError> {
        let url = config.url_for(version, remote_file_name);
        match self.download_to(&url, local_path, config.extract) {
            Err(e) if e.is_not_found() && version != LATEST => {
                let Some(fallback) = fallback_remote_file_name else {
                    return Err(e);
                };
                let fallback_url = config.url_for(version, fallback);
                warn!("{url} not found, retrying with {fallback_url}");
                self.download_to(&fallback_url, local_path, config.extract)
            }
            other => other,
        }
    }

    fn download_to(
        &self,
        url: &str,
        local_path: &Path,
        extract: Option<ArchiveFormat>,
    ) -> Result<(), LibraryError> {
        let parent = local_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(parent)?;

        info!("downloading {url}");
        let resp = match self.agent.get(url).header("User-Agent", USER_AGENT).call() {
            Ok(r) => r,
            Err(ureq::Error::StatusCode(404)) => {
                return Err(LibraryError::NotFound(url.to_owned()));
            }
            Err(ureq::Error::StatusCode(code)) => {
                return Err(LibraryError::Http(format!("HTTP {code} for {url}")));
            }
            Err(e) => {
                return Err(LibraryError::Http(format!("{url}: {e}")));
            }
        };

        let code = resp.status().as_u16();
        if code == 404 {
            return Err(LibraryError::NotFound(url.to_owned()));
        }
        if !(200..300).contains(&code) {
            return Err(LibraryError::Http(format!("HTTP {code} for {url}")));
        }

        let mut tmp = NamedTempFile::new_in(parent)?;
        let mut reader = resp.into_body().into_reader();
        let written = std::io::copy(&mut reader, &mut tmp)
            .map_err(|e| LibraryError::Http(format!("reading body of {url}: {e}")))?;
        if written == 0 {
            return Err(LibraryError::EmptyBody(url.to_owned()));
        }
        tmp.flush()?;
        tmp.as_file().sync_all()?;
        debug!("received {written} bytes from {url}");

        match extract {
            None => {
                tmp.persist(local_path).map_err(|e| LibraryError::Io(e.error))?;
            }
            Some(format) => {
                let staging = tempfile::Builder::new()
                    .prefix(".staging-")
                    .tempdir_in(parent)?;
                extract_archive(tmp.path(), staging.path(), format)?;
                if local_path.exists() {
                    fs::remove_dir_all(local_path)?;
                }
                fs::rename(staging.path(), local_path)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latest_url_uses_latest_base() {
        let config = DownloadConfig::github("imposter-project", "imposter-jvm-engine");
        assert_eq!(
            config.url_for(LATEST, "imposter.jar"),
            "https://github.com/imposter-project/imposter-jvm-engine/releases/latest/download/imposter.jar"
        );
    }

    #[test]
    fn versioned_url_substitutes_version() {
        let config = DownloadConfig::github("imposter-project", "imposter-go");
        assert_eq!(
            config.url_for("1.2.3", "imposter-go_linux_amd64.tar.gz"),
            "https://github.com/imposter-project/imposter-go/releases/download/v1.2.3/imposter-go_linux_amd64.tar.gz"
        );
    }

    #[test]
    fn trailing_slashes_are_trimmed() {
        let config = DownloadConfig::new("http://host/latest/", "http://host/v{version}/");
        assert_eq!(config.url_for(LATEST, "a.zip"), "http://host/latest/a.zip");
        assert_eq!(config.url_for("2.0", "a.zip"), "http://host/v2.0/a.zip");
    }

    #[test]
    fn extracting_sets_format() {
        let config = DownloadConfig::new("a", "b").extracting(ArchiveFormat::Zip);
        assert_eq!(config.extract, Some(ArchiveFormat::Zip));
    }
}
