use crate::{BackendKind, CoreError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

pub const ENV_CONFIG: &str = "MOCKRUN_CONFIG";
pub const ENV_HOME: &str = "MOCKRUN_HOME";
pub const ENV_ENGINE: &str = "MOCKRUN_ENGINE";
pub const ENV_VERSION: &str = "MOCKRUN_VERSION";
pub const ENV_REGISTRY: &str = "MOCKRUN_REGISTRY";
pub const ENV_DOCKER_BIN: &str = "MOCKRUN_DOCKER_BIN";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DockerConfig {
    pub binary: Option<String>,
    pub container_user: Option<String>,
    /// Appended to the config dir bind, e.g. `:z`.
    pub bind_flags: Option<String>,
    /// Image registry prefix, e.g. `registry.example.com/`.
    pub registry: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JvmConfig {
    pub jar_file: Option<PathBuf>,
    pub distro_dir: Option<PathBuf>,
    pub bin_cache: Option<PathBuf>,
    pub java_home: Option<PathBuf>,
}

/// Settings shared by the artifact-backed engines (native, serverless).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BinaryConfig {
    pub binary: Option<PathBuf>,
    pub bin_cache: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrefsConfig {
    pub dir: Option<PathBuf>,
}

/// User configuration, read from `~/.mockrun/config.toml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    pub engine: Option<String>,
    pub version: Option<String>,
    pub docker: DockerConfig,
    pub jvm: JvmConfig,
    pub native: BinaryConfig,
    pub lambda: BinaryConfig,
    pub prefs: PrefsConfig,
    /// Root for caches and prefs. Not read from the file.
    #[serde(skip)]
    pub home: PathBuf,
}

/// `$MOCKRUN_HOME`, else `~/.mockrun`.
pub fn mockrun_home() -> PathBuf {
    if let Some(dir) = std::env::var_os(ENV_HOME).filter(|v| !v.is_empty()) {
        return PathBuf::from(dir);
    }
    match std::env::var_os("HOME") {
        Some(home) => PathBuf::from(home).join(".mockrun"),
        None => std::env::temp_dir().join("mockrun"),
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_owned()).filter(|v| !v.is_empty())
}

impl CliConfig {
    /// Load from `$MOCKRUN_CONFIG` or `<home>/config.toml`; a missing file
    /// yields defaults.
    pub fn load_default() -> Result<Self, CoreError> {
        let home = mockrun_home();
        let path = std::env::var_os(ENV_CONFIG)
            .filter(|v| !v.is_empty())
            .map_or_else(|| home.join("config.toml"), PathBuf::from);
        let mut config = if path.exists() {
            Self::load(&path)?
        } else {
            debug!("no config at {}, using defaults", path.display());
            Self::default()
        };
        config.home = home;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let content = std::fs::read_to_string(path)?;
        let mut config: CliConfig = toml::from_str(&content)
            .map_err(|e| CoreError::Config(format!("invalid config {}: {e}", path.display())))?;
        config.home = mockrun_home();
        Ok(config)
    }

    /// Defaults rooted at `home`; used by tests and embedders.
    pub fn with_home(home: &Path) -> Self {
        Self {
            home: home.to_path_buf(),
            ..Self::default()
        }
    }

    pub fn prefs_dir(&self) -> PathBuf {
        self.prefs.dir.clone().unwrap_or_else(|| self.home.clone())
    }

    /// Cache directory for downloaded artifacts of `kind`.
    pub fn engine_cache_dir(&self, kind: BackendKind) -> PathBuf {
        let configured = match kind {
            BackendKind::Jvm | BackendKind::JvmDistro => self.jvm.bin_cache.clone(),
            BackendKind::Golang => self.native.bin_cache.clone(),
            BackendKind::AwsLambda => self.lambda.bin_cache.clone(),
            _ => None,
        };
        configured.unwrap_or_else(|| self.home.join("engines")).join(kind.as_str())
    }

    pub fn plugin_dir(&self, version: &str) -> PathBuf {
        self.home.join("plugins").join(version)
    }

    pub fn file_cache_dir(&self) -> PathBuf {
        self.home.join("cache")
    }

    pub fn docker_binary(&self) -> String {
        non_empty(std::env::var(ENV_DOCKER_BIN).ok())
            .or_else(|| non_empty(self.docker.binary.clone()))
            .unwrap_or_else(|| "docker".to_owned())
    }

    pub fn docker_registry(&self) -> String {
        non_empty(std::env::var(ENV_REGISTRY).ok())
            .or_else(|| non_empty(self.docker.registry.clone()))
            .unwrap_or_default()
    }

    /// Engine kind from flag, then `$MOCKRUN_ENGINE`, then config, else docker.
    pub fn resolve_configured_kind(&self, flag: Option<&str>) -> Result<BackendKind, CoreError> {
        self.resolve_kind_from(flag, std::env::var(ENV_ENGINE).ok())
    }

    pub fn resolve_kind_from(
        &self,
        flag: Option<&str>,
        env: Option<String>,
    ) -> Result<BackendKind, CoreError> {
        match non_empty(flag.map(str::to_owned))
            .or_else(|| non_empty(env))
            .or_else(|| non_empty(self.engine.clone()))
        {
            Some(name) => name.parse(),
            None => Ok(BackendKind::Docker),
        }
    }

    /// Version from flag, then `$MOCKRUN_VERSION`, then config, else `latest`.
    pub fn resolve_configured_version(&self, flag: Option<&str>) -> String {
        self.resolve_version_from(flag, std::env::var(ENV_VERSION).ok())
    }

    pub fn resolve_version_from(&self, flag: Option<&str>, env: Option<String>) -> String {
        non_empty(flag.map(str::to_owned))
            .or_else(|| non_empty(env))
            .or_else(|| non_empty(self.version.clone()))
            .unwrap_or_else(|| mockrun_library::LATEST.to_owned())
    }
}
