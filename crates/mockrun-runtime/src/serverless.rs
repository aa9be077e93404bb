//! The AWS Lambda bundle. It is deployed remotely, so this engine only
//! acquires the bundle; it never runs anything locally.

use crate::backend::{apply_pull_policy, MockEngine, Provider};
use crate::registry::RuntimeContext;
use crate::RuntimeError;
use mockrun_core::{
    shutdown_channel, BackendKind, Completion, EngineState, Event, ManagedMock, Notifier,
    PullPolicy, ShutdownHandle, StartOptions,
};
use mockrun_library::{DownloadConfig, Downloader};
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

const BUNDLE_FILE: &str = "imposter-awslambda.zip";
const LAMBDA_REPO: &str = "imposter-jvm-engine";

pub struct LambdaProvider {
    version: String,
    cache_dir: PathBuf,
    bundle_override: Option<PathBuf>,
    downloader: Downloader,
    download: DownloadConfig,
    bundle: Option<PathBuf>,
}

impl LambdaProvider {
    pub fn new(ctx: &RuntimeContext, version: &str) -> Self {
        Self {
            version: version.to_owned(),
            cache_dir: ctx.config.engine_cache_dir(BackendKind::AwsLambda),
            bundle_override: ctx
                .config
                .lambda
                .binary
                .clone()
                .filter(|p| !p.as_os_str().is_empty()),
            downloader: ctx.downloader.clone(),
            download: DownloadConfig::github(mockrun_library::RELEASE_OWNER, LAMBDA_REPO),
            bundle: None,
        }
    }

    pub fn cached_bundle(&self) -> PathBuf {
        self.cache_dir
            .join(format!("imposter-awslambda-{}.zip", self.version))
    }

    pub fn bundle(&self) -> Option<&Path> {
        self.bundle.as_deref()
    }
}

impl Provider for LambdaProvider {
    fn kind(&self) -> BackendKind {
        BackendKind::AwsLambda
    }

    fn version(&self) -> &str {
        &self.version
    }

    fn provide(&mut self, policy: PullPolicy) -> Result<(), RuntimeError> {
        if let Some(bundle) = &self.bundle_override {
            std::fs::metadata(bundle).map_err(|e| {
                RuntimeError::Acquisition(format!("could not stat bundle {}: {e}", bundle.display()))
            })?;
            self.bundle = Some(bundle.clone());
            return Ok(());
        }

        let path = self.cached_bundle();
        apply_pull_policy(policy, path.is_file(), BUNDLE_FILE, || {
            self.downloader
                .fetch_artifact(&self.download, &path, BUNDLE_FILE, &self.version, None)
        })?;
        debug!("using lambda bundle {}", path.display());
        self.bundle = Some(path);
        Ok(())
    }

    fn satisfied(&self) -> bool {
        self.bundle.is_some()
    }
}

pub struct LambdaEngine {
    options: StartOptions,
    provider: LambdaProvider,
    notifier: Notifier,
    shutdown: ShutdownHandle,
    state: EngineState,
}

impl LambdaEngine {
    pub fn new(ctx: &RuntimeContext, options: StartOptions) -> Self {
        let provider = LambdaProvider::new(ctx, &options.version);
        // nothing ever waits on the receiving half
        let (shutdown, _) = shutdown_channel();
        Self {
            options,
            provider,
            notifier: ctx.notifier.clone(),
            shutdown,
            state: EngineState::default(),
        }
    }

    fn refuse_start(&mut self, policy: PullPolicy) -> RuntimeError {
        if !self.provider.satisfied() {
            if let Err(e) = self.provider.provide(policy) {
                return e;
            }
        }
        let bundle = self
            .provider
            .bundle()
            .map(|b| b.display().to_string())
            .unwrap_or_default();
        RuntimeError::Unsupported(format!(
            "the awslambda engine runs in AWS Lambda and cannot be started locally; deploy the bundle at {bundle}"
        ))
    }
}

impl MockEngine for LambdaEngine {
    fn kind(&self) -> BackendKind {
        BackendKind::AwsLambda
    }

    fn state(&self) -> EngineState {
        self.state
    }

    fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    fn acquire(&mut self, policy: PullPolicy) -> Result<(), RuntimeError> {
        self.provider.provide(policy)
    }

    fn start(&mut self, completion: &Completion) -> Result<bool, RuntimeError> {
        let err = self.refuse_start(self.options.pull_policy);
        self.notifier
            .notify(completion, Event::launch_failed(err.to_string()));
        Err(err)
    }

    fn stop(&mut self, completion: &Completion) -> Result<(), RuntimeError> {
        trace!("no local instance to stop");
        self.notifier.notify(completion, Event::not_launched());
        Ok(())
    }

    fn restart(&mut self, completion: &Completion) -> Result<bool, RuntimeError> {
        completion.add(1);
        self.stop(completion)?;
        let err = self.refuse_start(PullPolicy::Skip);
        self.notifier
            .notify(completion, Event::launch_failed(err.to_string()));
        Err(err)
    }

    fn list_all_managed(&self) -> Result<Vec<ManagedMock>, RuntimeError> {
        Ok(Vec::new())
    }

    fn stop_all_managed(&self) -> Result<usize, RuntimeError> {
        Ok(0)
    }

    fn version_string(&mut self) -> Result<String, RuntimeError> {
        if !self.provider.satisfied() {
            self.provider.provide(PullPolicy::Skip)?;
        }
        Ok(self.provider.version().to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockrun_core::CliConfig;

    fn engine(home: &Path) -> (LambdaEngine, Notifier) {
        let notifier = Notifier::spawn();
        let ctx = RuntimeContext::new(CliConfig::with_home(home), notifier.clone());
        let options = StartOptions {
            version: "4.2.0".to_owned(),
            pull_policy: PullPolicy::Skip,
            ..StartOptions::default()
        };
        (LambdaEngine::new(&ctx, options), notifier)
    }

    #[test]
    fn start_is_unsupported_and_settles() {
        let home = tempfile::tempdir().unwrap();
        let (mut engine, notifier) = engine(home.path());
        let completion = Completion::new();
        completion.add(1);

        let err = engine.start(&completion).unwrap_err();
        assert!(matches!(err, RuntimeError::Unsupported(_)), "{err}");
        notifier.flush();
        assert_eq!(completion.pending(), 0);
    }

    #[test]
    fn stop_without_instance_settles_immediately() {
        let home = tempfile::tempdir().unwrap();
        let (mut engine, notifier) = engine(home.path());
        let completion = Completion::new();
        completion.add(1);
        engine.stop(&completion).unwrap();
        notifier.flush();
        assert_eq!(completion.pending(), 0);
    }

    #[test]
    fn discovery_is_empty() {
        let home = tempfile::tempdir().unwrap();
        let (mut engine, _) = engine(home.path());
        assert!(engine.list_all_managed().unwrap().is_empty());
        assert_eq!(engine.stop_all_managed().unwrap(), 0);
        assert_eq!(engine.version_string().unwrap(), "4.2.0");
    }

    #[test]
    fn bundle_path_carries_version() {
        let home = tempfile::tempdir().unwrap();
        let ctx = RuntimeContext::new(CliConfig::with_home(home.path()), Notifier::spawn());
        let provider = LambdaProvider::new(&ctx, "4.2.0");
        assert_eq!(
            provider.cached_bundle(),
            home.path().join("engines/awslambda/imposter-awslambda-4.2.0.zip")
        );
    }
}
