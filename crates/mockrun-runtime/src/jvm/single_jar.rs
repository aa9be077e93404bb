use super::{find_java, is_jvm_engine, JVM_REPO};
use crate::backend::{apply_pull_policy, Provider};
use crate::registry::RuntimeContext;
use crate::RuntimeError;
use mockrun_core::{BackendKind, PullPolicy};
use mockrun_library::{DownloadConfig, Downloader};
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::debug;

const JAR_FILE: &str = "imposter.jar";

/// Runs the engine as `java -jar imposter.jar`.
pub struct SingleJarProvider {
    version: String,
    cache_dir: PathBuf,
    jar_override: Option<PathBuf>,
    java_home: Option<PathBuf>,
    downloader: Downloader,
    download: DownloadConfig,
    jar: Option<PathBuf>,
}

impl SingleJarProvider {
    pub fn new(ctx: &RuntimeContext, version: &str) -> Self {
        Self {
            version: version.to_owned(),
            cache_dir: ctx.config.engine_cache_dir(BackendKind::Jvm),
            jar_override: ctx
                .config
                .jvm
                .jar_file
                .clone()
                .filter(|p| !p.as_os_str().is_empty()),
            java_home: ctx.config.jvm.java_home.clone(),
            downloader: ctx.downloader.clone(),
            download: DownloadConfig::github(mockrun_library::RELEASE_OWNER, JVM_REPO),
            jar: None,
        }
    }

    #[must_use]
    pub fn with_download_config(mut self, download: DownloadConfig) -> Self {
        self.download = download;
        self
    }

    /// Where the jar for this version lives in the cache.
    pub fn cached_jar(&self) -> PathBuf {
        self.cache_dir.join(&self.version).join(JAR_FILE)
    }

    pub fn jar(&self) -> Option<&Path> {
        self.jar.as_deref()
    }
}

impl Provider for SingleJarProvider {
    fn kind(&self) -> BackendKind {
        BackendKind::Jvm
    }

    fn version(&self) -> &str {
        &self.version
    }

    fn provide(&mut self, policy: PullPolicy) -> Result<(), RuntimeError> {
        if let Some(jar) = &self.jar_override {
            std::fs::metadata(jar).map_err(|e| {
                RuntimeError::Acquisition(format!("could not stat JAR file {}: {e}", jar.display()))
            })?;
            debug!("using JAR file: {}", jar.display());
            self.jar = Some(jar.clone());
            return Ok(());
        }

        let path = self.cached_jar();
        let fallback = format!("imposter-{}.jar", self.version);
        apply_pull_policy(policy, path.is_file(), JAR_FILE, || {
            self.downloader.fetch_artifact(
                &self.download,
                &path,
                JAR_FILE,
                &self.version,
                Some(&fallback),
            )
        })?;
        self.jar = Some(path);
        Ok(())
    }

    fn satisfied(&self) -> bool {
        self.jar.is_some()
    }
}

impl crate::process::ProcessProvider for SingleJarProvider {
    fn command(&self, args: &[String]) -> Result<Command, RuntimeError> {
        let jar = self
            .jar
            .as_ref()
            .ok_or_else(|| RuntimeError::Launch("engine JAR has not been provided".to_owned()))?;
        let mut cmd = Command::new(find_java(self.java_home.as_deref())?);
        cmd.arg("-jar").arg(jar).args(args);
        Ok(cmd)
    }

    fn matches(&self, cmdline: &[String]) -> bool {
        is_jvm_engine(cmdline)
    }
}
