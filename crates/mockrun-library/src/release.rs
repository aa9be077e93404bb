use crate::{LibraryError, USER_AGENT};
use serde::Deserialize;
use tracing::debug;

/// Source of "latest release" metadata for an engine repository.
pub trait ReleaseSource: Send + Sync {
    /// Raw tag of the most recent release of `repo`, e.g. `v4.2.0`.
    fn latest_tag(&self, repo: &str) -> Result<String, LibraryError>;
}

#[derive(Debug, Deserialize)]
struct ReleaseInfo {
    tag_name: String,
}

/// GitHub REST client for `/repos/<owner>/<repo>/releases/latest`.
pub struct GithubReleases {
    agent: ureq::Agent,
    api_base: String,
    owner: String,
}

impl GithubReleases {
    pub const DEFAULT_API: &'static str = "https://api.github.com";

    pub fn new(owner: &str) -> Self {
        Self::with_api_base(Self::DEFAULT_API, owner)
    }

    pub fn with_api_base(api_base: &str, owner: &str) -> Self {
        Self {
            agent: ureq::Agent::new_with_defaults(),
            api_base: api_base.trim_end_matches('/').to_owned(),
            owner: owner.to_owned(),
        }
    }

    fn latest_url(&self, repo: &str) -> String {
        format!("{}/repos/{}/{repo}/releases/latest", self.api_base, self.owner)
    }
}

impl ReleaseSource for GithubReleases {
    fn latest_tag(&self, repo: &str) -> Result<String, LibraryError> {
        let url = self.latest_url(repo);
        debug!("GET {url}");
        let resp = match self
            .agent
            .get(&url)
            .header("User-Agent", USER_AGENT)
            .header("Accept", "application/vnd.github+json")
            .call()
        {
            Ok(r) => r,
            Err(ureq::Error::StatusCode(404)) => return Err(LibraryError::NotFound(url)),
            Err(ureq::Error::StatusCode(code)) => {
                return Err(LibraryError::Http(format!("HTTP {code} for {url}")));
            }
            Err(e) => return Err(LibraryError::Http(format!("{url}: {e}"))),
        };

        let reader = resp.into_body().into_reader();
        let info: ReleaseInfo = serde_json::from_reader(reader)
            .map_err(|e| LibraryError::Serialization(format!("release metadata from {url}: {e}")))?;
        Ok(info.tag_name)
    }
}
