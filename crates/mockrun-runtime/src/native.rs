//! The native `imposter-go` engine binary.

use crate::backend::{apply_pull_policy, Provider};
use crate::process::{ProcessEngine, ProcessProvider};
use crate::registry::RuntimeContext;
use crate::RuntimeError;
use mockrun_core::{BackendKind, PullPolicy};
use mockrun_library::{ArchiveFormat, DownloadConfig, Downloader};
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, trace};

pub const BINARY_NAME: &str = "imposter-go";
const NATIVE_REPO: &str = "imposter-go";

pub type NativeEngine = ProcessEngine<NativeProvider>;

/// Release naming of an operating system.
pub fn release_os(os: &str) -> &str {
    match os {
        "macos" => "darwin",
        other => other,
    }
}

/// Release naming of a CPU architecture.
pub fn release_arch(arch: &str) -> &str {
    match arch {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        "x86" => "386",
        other => other,
    }
}

/// Release archive name for `os`/`arch` (Rust target names).
pub fn archive_name(os: &str, arch: &str) -> (String, ArchiveFormat) {
    let format = if os == "windows" {
        ArchiveFormat::Zip
    } else {
        ArchiveFormat::TarGz
    };
    let ext = match format {
        ArchiveFormat::Zip => "zip",
        ArchiveFormat::TarGz => "tar.gz",
    };
    (
        format!(
            "{BINARY_NAME}_{}_{}.{ext}",
            release_os(os),
            release_arch(arch)
        ),
        format,
    )
}

pub struct NativeProvider {
    version: String,
    cache_dir: PathBuf,
    binary_override: Option<PathBuf>,
    downloader: Downloader,
    download: DownloadConfig,
    binary: Option<PathBuf>,
}

impl NativeProvider {
    pub fn new(ctx: &RuntimeContext, version: &str) -> Self {
        Self {
            version: version.to_owned(),
            cache_dir: ctx.config.engine_cache_dir(BackendKind::Golang),
            binary_override: ctx
                .config
                .native
                .binary
                .clone()
                .filter(|p| !p.as_os_str().is_empty()),
            downloader: ctx.downloader.clone(),
            download: DownloadConfig::github(mockrun_library::RELEASE_OWNER, NATIVE_REPO),
            binary: None,
        }
    }

    #[must_use]
    pub fn with_download_config(mut self, download: DownloadConfig) -> Self {
        self.download = download;
        self
    }

    pub fn cached_binary(&self) -> PathBuf {
        self.cache_dir.join(&self.version).join(BINARY_NAME)
    }

    pub fn binary(&self) -> Option<&Path> {
        self.binary.as_deref()
    }

    fn binary_file_name(&self) -> String {
        self.binary_override
            .as_deref()
            .and_then(Path::file_name)
            .map_or_else(
                || BINARY_NAME.to_owned(),
                |n| n.to_string_lossy().into_owned(),
            )
    }
}

impl Provider for NativeProvider {
    fn kind(&self) -> BackendKind {
        BackendKind::Golang
    }

    fn version(&self) -> &str {
        &self.version
    }

    fn provide(&mut self, policy: PullPolicy) -> Result<(), RuntimeError> {
        if let Some(binary) = &self.binary_override {
            if !binary.is_file() {
                return Err(RuntimeError::Acquisition(format!(
                    "could not find engine binary {}",
                    binary.display()
                )));
            }
            debug!("using engine binary: {}", binary.display());
            self.binary = Some(binary.clone());
            return Ok(());
        }

        let binary = self.cached_binary();
        let dir = self.cache_dir.join(&self.version);
        let (archive, format) = archive_name(std::env::consts::OS, std::env::consts::ARCH);
        let download = self.download.clone().extracting(format);
        apply_pull_policy(policy, binary.is_file(), &archive, || {
            self.downloader
                .fetch_artifact(&download, &dir, &archive, &self.version, None)
        })?;
        if policy != PullPolicy::Skip && !binary.is_file() {
            return Err(RuntimeError::Acquisition(format!(
                "{archive} did not contain {BINARY_NAME}"
            )));
        }
        trace!("using {BINARY_NAME} at: {}", binary.display());
        self.binary = Some(binary);
        Ok(())
    }

    fn satisfied(&self) -> bool {
        self.binary.as_deref().is_some_and(Path::is_file)
    }
}

impl ProcessProvider for NativeProvider {
    fn command(&self, args: &[String]) -> Result<Command, RuntimeError> {
        let binary = self.binary.as_ref().ok_or_else(|| {
            RuntimeError::Launch("engine binary has not been provided".to_owned())
        })?;
        let mut cmd = Command::new(binary);
        cmd.args(args);
        Ok(cmd)
    }

    /// The binary itself, or a script run through an interpreter.
    fn matches(&self, cmdline: &[String]) -> bool {
        let name = self.binary_file_name();
        let is_engine = cmdline.iter().take(2).any(|arg| {
            Path::new(arg)
                .file_name()
                .is_some_and(|n| n.to_string_lossy() == name)
        });
        is_engine
            && cmdline
                .iter()
                .any(|a| a.starts_with(crate::procutil::CONFIG_DIR_FLAG))
    }

    fn inherit_host_env(&self) -> bool {
        true
    }
}
