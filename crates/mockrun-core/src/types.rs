use crate::CoreError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

pub const DEFAULT_PORT: u16 = 8080;
/// JDWP port exposed when debug mode is enabled.
pub const DEFAULT_DEBUG_PORT: u16 = 8000;

/// The hosting mechanism for a mock engine instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BackendKind {
    #[serde(rename = "docker")]
    Docker,
    #[serde(rename = "docker-all")]
    DockerAll,
    #[serde(rename = "docker-distroless")]
    DockerDistroless,
    #[serde(rename = "jvm")]
    Jvm,
    #[serde(rename = "jvm-distro")]
    JvmDistro,
    #[serde(rename = "golang")]
    Golang,
    #[serde(rename = "awslambda")]
    AwsLambda,
}

impl BackendKind {
    pub const ALL: [BackendKind; 7] = [
        BackendKind::Docker,
        BackendKind::DockerAll,
        BackendKind::DockerDistroless,
        BackendKind::Jvm,
        BackendKind::JvmDistro,
        BackendKind::Golang,
        BackendKind::AwsLambda,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            BackendKind::Docker => "docker",
            BackendKind::DockerAll => "docker-all",
            BackendKind::DockerDistroless => "docker-distroless",
            BackendKind::Jvm => "jvm",
            BackendKind::JvmDistro => "jvm-distro",
            BackendKind::Golang => "golang",
            BackendKind::AwsLambda => "awslambda",
        }
    }

    pub fn is_container(self) -> bool {
        matches!(
            self,
            BackendKind::Docker | BackendKind::DockerAll | BackendKind::DockerDistroless
        )
    }

    /// Release repository whose newest tag defines "latest" for this kind.
    pub fn release_repo(self) -> &'static str {
        match self {
            BackendKind::Golang => "imposter-go",
            _ => "imposter-jvm-engine",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        BackendKind::ALL
            .into_iter()
            .find(|k| k.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| CoreError::UnknownBackend(s.to_owned()))
    }
}

/// Whether and when an engine artifact is (re)fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PullPolicy {
    /// Trust that the artifact is already at its canonical location.
    Skip,
    #[default]
    IfNotPresent,
    Always,
}

impl fmt::Display for PullPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PullPolicy::Skip => write!(f, "skip"),
            PullPolicy::IfNotPresent => write!(f, "if-not-present"),
            PullPolicy::Always => write!(f, "always"),
        }
    }
}

impl FromStr for PullPolicy {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "skip" => Ok(PullPolicy::Skip),
            "if-not-present" | "ifnotpresent" => Ok(PullPolicy::IfNotPresent),
            "always" => Ok(PullPolicy::Always),
            _ => Err(CoreError::InvalidPullPolicy(s.to_owned())),
        }
    }
}

/// Options for one start cycle of a mock engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartOptions {
    pub port: u16,
    pub version: String,
    pub pull_policy: PullPolicy,
    pub debug: bool,
    /// Remove running instances with the same identity hash before starting.
    pub replace_running: bool,
    /// Overrides the identity hash, otherwise derived from config dir and port.
    pub deduplicate: Option<String>,
    pub enable_plugins: bool,
    pub enable_file_cache: bool,
    /// `host[:container]` directory mounts; container backends only.
    pub dir_mounts: Vec<String>,
    pub log_level: Option<String>,
    pub environment: Vec<(String, String)>,
}

impl Default for StartOptions {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            version: mockrun_library::LATEST.to_owned(),
            pull_policy: PullPolicy::default(),
            debug: false,
            replace_running: false,
            deduplicate: None,
            enable_plugins: false,
            enable_file_cache: false,
            dir_mounts: Vec::new(),
            log_level: None,
            environment: Vec::new(),
        }
    }
}

impl StartOptions {
    /// Options for the start half of a restart: never pull again.
    #[must_use]
    pub fn for_restart(&self) -> Self {
        Self {
            pull_policy: PullPolicy::Skip,
            ..self.clone()
        }
    }
}

/// A running instance this tool tagged at creation time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagedMock {
    pub id: String,
    pub name: String,
    pub port: u16,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

/// A locally available engine version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineMetadata {
    pub kind: BackendKind,
    pub version: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_names_roundtrip() {
        for kind in BackendKind::ALL {
            assert_eq!(kind.as_str().parse::<BackendKind>().unwrap(), kind);
            assert_eq!(
                serde_json::to_string(&kind).unwrap(),
                format!("\"{}\"", kind.as_str())
            );
        }
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let err = "kubernetes".parse::<BackendKind>().unwrap_err();
        assert!(matches!(err, CoreError::UnknownBackend(ref k) if k == "kubernetes"));
    }

    #[test]
    fn only_docker_variants_are_containers() {
        let containers: Vec<_> = BackendKind::ALL
            .into_iter()
            .filter(|k| k.is_container())
            .collect();
        assert_eq!(
            containers,
            vec![
                BackendKind::Docker,
                BackendKind::DockerAll,
                BackendKind::DockerDistroless
            ]
        );
    }

    #[test]
    fn release_repo_per_kind() {
        assert_eq!(BackendKind::Golang.release_repo(), "imposter-go");
        assert_eq!(BackendKind::Jvm.release_repo(), "imposter-jvm-engine");
        assert_eq!(BackendKind::Docker.release_repo(), "imposter-jvm-engine");
    }

    #[test]
    fn pull_policy_parse() {
        assert_eq!("skip".parse::<PullPolicy>().unwrap(), PullPolicy::Skip);
        assert_eq!(
            "if-not-present".parse::<PullPolicy>().unwrap(),
            PullPolicy::IfNotPresent
        );
        assert_eq!("Always".parse::<PullPolicy>().unwrap(), PullPolicy::Always);
        assert!("sometimes".parse::<PullPolicy>().is_err());
    }

    #[test]
    fn restart_options_force_skip() {
        let opts = StartOptions {
            pull_policy: PullPolicy::Always,
            port: 9000,
            ..StartOptions::default()
        };
        let restart = opts.for_restart();
        assert_eq!(restart.pull_policy, PullPolicy::Skip);
        assert_eq!(restart.port, 9000);
        assert_eq!(opts.pull_policy, PullPolicy::Always);
    }

    #[test]
    fn default_options() {
        let opts = StartOptions::default();
        assert_eq!(opts.port, 8080);
        assert_eq!(opts.version, "latest");
        assert_eq!(opts.pull_policy, PullPolicy::IfNotPresent);
    }
}
