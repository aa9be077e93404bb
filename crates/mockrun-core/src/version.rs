use crate::{BackendKind, CoreError, Prefs};
use mockrun_library::ReleaseSource;
use serde_json::Value;
use tracing::{debug, trace, warn};

/// Cached "latest" lookups younger than this are trusted without a network call.
pub const VERSION_CHECK_THRESHOLD_SECS: i64 = 86_400;

fn latest_key(kind: BackendKind) -> String {
    format!("{kind}.latest")
}

fn last_check_key(kind: BackendKind) -> String {
    format!("{kind}.last_version_check")
}

/// Strip the leading `v` from a release tag.
pub fn normalize_tag(tag: &str) -> String {
    let tag = tag.trim();
    tag.strip_prefix('v').unwrap_or(tag).to_owned()
}

/// Highest candidate by semantic version order. Unparsable candidates are
/// skipped; a leading `v` is tolerated.
pub fn highest_version<I, S>(candidates: I) -> Option<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    candidates
        .into_iter()
        .filter_map(|c| semver::Version::parse(&normalize_tag(c.as_ref())).ok())
        .max()
        .map(|v| v.to_string())
}

/// Resolves the symbolic version `latest` to a concrete release, caching the
/// answer per engine kind in the preference store.
pub struct VersionResolver {
    source: Box<dyn ReleaseSource>,
    prefs: Prefs,
}

impl VersionResolver {
    pub fn new(source: Box<dyn ReleaseSource>, prefs: Prefs) -> Self {
        Self { source, prefs }
    }

    pub fn resolve_latest(&self, kind: BackendKind, allow_cached: bool) -> Result<String, CoreError> {
        self.resolve_latest_at(kind, allow_cached, chrono::Utc::now().timestamp())
    }

    /// As [`resolve_latest`](Self::resolve_latest) with an explicit clock.
    pub fn resolve_latest_at(
        &self,
        kind: BackendKind,
        allow_cached: bool,
        now: i64,
    ) -> Result<String, CoreError> {
        trace!("resolving latest {kind} version (cache allowed: {allow_cached})");
        let cached = self.read_cache(kind);

        if allow_cached {
            if let Some((version, checked_at)) = &cached {
                if now - checked_at < VERSION_CHECK_THRESHOLD_SECS {
                    debug!("using cached latest {kind} version {version}");
                    return Ok(version.clone());
                }
            }
        }

        match self.source.latest_tag(kind.release_repo()) {
            Ok(tag) => {
                let version = normalize_tag(&tag);
                if let Err(e) = self.prefs.write_properties(vec![
                    (latest_key(kind), Value::from(version.clone())),
                    (last_check_key(kind), Value::from(now)),
                ]) {
                    warn!("failed to record latest {kind} version: {e}");
                }
                debug!("resolved latest {kind} version {version}");
                Ok(version)
            }
            Err(e) if allow_cached => match cached {
                Some((version, _)) => {
                    warn!("failed to fetch latest {kind} version ({e}), using cached {version}");
                    Ok(version)
                }
                None => Err(CoreError::VersionResolution(format!(
                    "failed to resolve latest {kind} version ({e}) and no cached version found"
                ))),
            },
            Err(e) => Err(CoreError::VersionResolution(format!(
                "failed to fetch latest {kind} version: {e}"
            ))),
        }
    }

    /// `requested` unless it is `latest`, in which case it is resolved.
    pub fn resolve(&self, kind: BackendKind, requested: &str) -> Result<String, CoreError> {
        if requested == mockrun_library::LATEST {
            self.resolve_latest(kind, true)
        } else {
            Ok(requested.to_owned())
        }
    }

    fn read_cache(&self, kind: BackendKind) -> Option<(String, i64)> {
        let read = || -> Result<Option<(String, i64)>, CoreError> {
            let version = self.prefs.read_string(&latest_key(kind))?;
            let checked_at = self.prefs.read_int(&last_check_key(kind))?.unwrap_or(0);
            Ok(version
                .filter(|v| !v.is_empty())
                .map(|v| (v, checked_at)))
        };
        read().unwrap_or_else(|e| {
            warn!("ignoring unreadable version cache: {e}");
            None
        })
    }
}
