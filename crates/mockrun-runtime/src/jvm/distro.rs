use super::{find_java, is_jvm_engine, JVM_REPO, LAUNCHER_CLASS};
use crate::backend::{apply_pull_policy, Provider};
use crate::process::ProcessProvider;
use crate::registry::RuntimeContext;
use crate::RuntimeError;
use mockrun_core::{BackendKind, PullPolicy};
use mockrun_library::{ArchiveFormat, DownloadConfig, Downloader};
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::debug;

const DISTRO_FILE: &str = "distro.zip";

/// Runs the engine from an unpacked distribution with `lib/*` on the
/// classpath.
pub struct DistroProvider {
    version: String,
    cache_dir: PathBuf,
    dir_override: Option<PathBuf>,
    java_home: Option<PathBuf>,
    downloader: Downloader,
    download: DownloadConfig,
    dir: Option<PathBuf>,
}

impl DistroProvider {
    pub fn new(ctx: &RuntimeContext, version: &str) -> Self {
        Self {
            version: version.to_owned(),
            cache_dir: ctx.config.engine_cache_dir(BackendKind::JvmDistro),
            dir_override: ctx
                .config
                .jvm
                .distro_dir
                .clone()
                .filter(|p| !p.as_os_str().is_empty()),
            java_home: ctx.config.jvm.java_home.clone(),
            downloader: ctx.downloader.clone(),
            download: DownloadConfig::github(mockrun_library::RELEASE_OWNER, JVM_REPO)
                .extracting(ArchiveFormat::Zip),
            dir: None,
        }
    }

    pub fn cached_dir(&self) -> PathBuf {
        self.cache_dir.join(&self.version)
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }
}

fn is_distribution(dir: &Path) -> bool {
    dir.join("lib").is_dir()
}

impl Provider for DistroProvider {
    fn kind(&self) -> BackendKind {
        BackendKind::JvmDistro
    }

    fn version(&self) -> &str {
        &self.version
    }

    fn provide(&mut self, policy: PullPolicy) -> Result<(), RuntimeError> {
        if let Some(dir) = &self.dir_override {
            if !is_distribution(dir) {
                return Err(RuntimeError::Acquisition(format!(
                    "{} is not an unpacked distribution (no lib directory)",
                    dir.display()
                )));
            }
            debug!("using distribution: {}", dir.display());
            self.dir = Some(dir.clone());
            return Ok(());
        }

        let dir = self.cached_dir();
        let fallback = format!("imposter-distro-{}.zip", self.version);
        apply_pull_policy(policy, is_distribution(&dir), DISTRO_FILE, || {
            self.downloader.fetch_artifact(
                &self.download,
                &dir,
                DISTRO_FILE,
                &self.version,
                Some(&fallback),
            )
        })?;
        if policy != PullPolicy::Skip && !is_distribution(&dir) {
            return Err(RuntimeError::Acquisition(format!(
                "distribution archive did not contain a lib directory: {}",
                dir.display()
            )));
        }
        self.dir = Some(dir);
        Ok(())
    }

    fn satisfied(&self) -> bool {
        self.dir.is_some()
    }
}

impl ProcessProvider for DistroProvider {
    fn command(&self, args: &[String]) -> Result<Command, RuntimeError> {
        let dir = self.dir.as_ref().ok_or_else(|| {
            RuntimeError::Launch("engine distribution has not been provided".to_owned())
        })?;
        let classpath = format!("{}/*", dir.join("lib").display());
        let mut cmd = Command::new(find_java(self.java_home.as_deref())?);
        cmd.arg("-classpath").arg(classpath).arg(LAUNCHER_CLASS).args(args);
        Ok(cmd)
    }

    fn matches(&self, cmdline: &[String]) -> bool {
        is_jvm_engine(cmdline)
    }
}
