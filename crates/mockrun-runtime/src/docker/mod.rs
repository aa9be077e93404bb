//! Container engine driven through the `docker` command line client.
//!
//! Containers are created with labels identifying them as managed by
//! mockrun, so that `ps`/`down` and `--replace` can find them again from a
//! different process. Termination is observed by a `docker wait` watcher,
//! by the stop path, and by a fixed-delay removal supervisor that settles the
//! completion if neither reports within [`REMOVAL_TIMEOUT`].

pub mod cli;
pub mod image;

use crate::backend::{advance, EngineCatalog, MockEngine, Provider};
use crate::prereq::{check_docker_prereqs, MissingPrereq};
use crate::registry::RuntimeContext;
use crate::RuntimeError;
use cli::{
    ContainerSpec, DockerCli, LABEL_CONFIG_DIR, LABEL_HASH, LABEL_MANAGED, LABEL_PORT,
};
use image::{image_repository, ImageProvider};
use mockrun_core::{
    build_env, shutdown_channel, version_from_output, BackendKind, Completion,
    EngineMetadata, EngineState, EnvOptions, Event, ManagedMock, Notifier, PullPolicy,
    ReadinessProbe, ShutdownHandle, ShutdownSignal, StartOptions, DEFAULT_DEBUG_PORT,
};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, trace, warn};

pub const CONTAINER_CONFIG_DIR: &str = "/opt/imposter/config";
pub const CONTAINER_PLUGIN_DIR: &str = "/opt/imposter/plugins";
pub const CONTAINER_FILE_CACHE_DIR: &str = "/tmp/imposter-cache";
pub const REMOVAL_TIMEOUT: Duration = Duration::from_secs(5);

/// Absolute form of `dir` without requiring it to exist.
pub(crate) fn absolute_dir(dir: &Path) -> PathBuf {
    std::fs::canonicalize(dir).unwrap_or_else(|_| {
        if dir.is_absolute() {
            dir.to_path_buf()
        } else {
            std::env::current_dir()
                .map(|cwd| cwd.join(dir))
                .unwrap_or_else(|_| dir.to_path_buf())
        }
    })
}

/// Identity hash used to find duplicates of a mock: the deduplication key if
/// given, else the absolute config dir and port.
pub fn mock_hash(config_dir: &Path, options: &StartOptions) -> String {
    let key = match options.deduplicate.as_deref().filter(|k| !k.is_empty()) {
        Some(key) => key.to_owned(),
        None => format!("{}:{}", absolute_dir(config_dir).display(), options.port),
    };
    blake3::hash(key.as_bytes()).to_hex().to_string()
}

/// Resolve `host[:container]` mount specs, defaulting the container path to
/// `/opt/imposter/<last host dir component>`.
pub fn parse_dir_mounts(specs: &[String]) -> Result<Vec<String>, RuntimeError> {
    let mut binds = Vec::with_capacity(specs.len());
    for spec in specs {
        let (host, bind) = match spec.split_once(':') {
            Some((host, _)) => (host.to_owned(), spec.clone()),
            None => {
                let name = Path::new(spec)
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                (spec.clone(), format!("{spec}:/opt/imposter/{name}"))
            }
        };
        let meta = std::fs::metadata(&host)
            .map_err(|e| RuntimeError::Launch(format!("failed to stat host dir {host}: {e}")))?;
        if !meta.is_dir() {
            return Err(RuntimeError::Launch(format!(
                "host path {host} is not a directory"
            )));
        }
        binds.push(bind);
    }
    Ok(binds)
}

pub struct DockerEngine {
    kind: BackendKind,
    config_dir: PathBuf,
    options: StartOptions,
    provider: ImageProvider,
    docker: DockerCli,
    container_user: Option<String>,
    bind_flags: String,
    plugin_root: PathBuf,
    file_cache_dir: PathBuf,
    notifier: Notifier,
    probe: ReadinessProbe,
    shutdown: ShutdownHandle,
    cancel: ShutdownSignal,
    container_id: Option<String>,
    state: EngineState,
    removal_timeout: Duration,
}

impl DockerEngine {
    pub fn new(
        ctx: &RuntimeContext,
        kind: BackendKind,
        config_dir: &Path,
        options: StartOptions,
    ) -> Result<Self, RuntimeError> {
        let docker = DockerCli::new(ctx.config.docker_binary());
        let provider = ImageProvider::new(
            kind,
            &options.version,
            &ctx.config.docker_registry(),
            docker.clone(),
        )?;
        let (shutdown, cancel) = shutdown_channel();
        Ok(Self {
            kind,
            config_dir: config_dir.to_path_buf(),
            options,
            provider,
            docker,
            container_user: ctx.config.docker.container_user.clone(),
            bind_flags: ctx.config.docker.bind_flags.clone().unwrap_or_default(),
            plugin_root: ctx.config.home.join("plugins"),
            file_cache_dir: ctx.config.file_cache_dir(),
            notifier: ctx.notifier.clone(),
            probe: ReadinessProbe::default(),
            shutdown,
            cancel,
            container_id: None,
            state: EngineState::default(),
            removal_timeout: REMOVAL_TIMEOUT,
        })
    }

    #[must_use]
    pub fn with_probe(mut self, probe: ReadinessProbe) -> Self {
        self.probe = probe;
        self
    }

    #[must_use]
    pub fn with_removal_timeout(mut self, timeout: Duration) -> Self {
        self.removal_timeout = timeout;
        self
    }

    pub fn container_id(&self) -> Option<&str> {
        self.container_id.as_deref()
    }

    fn labels(&self, options: &StartOptions) -> (String, BTreeMap<String, String>) {
        let hash = mock_hash(&self.config_dir, options);
        let mut labels = BTreeMap::new();
        labels.insert(LABEL_MANAGED.to_owned(), "true".to_owned());
        labels.insert(
            LABEL_CONFIG_DIR.to_owned(),
            absolute_dir(&self.config_dir).display().to_string(),
        );
        labels.insert(LABEL_PORT.to_owned(), options.port.to_string());
        labels.insert(LABEL_HASH.to_owned(), hash.clone());
        (hash, labels)
    }

    fn binds(&self, options: &StartOptions) -> Result<Vec<String>, RuntimeError> {
        let mut binds = vec![format!(
            "{}:{CONTAINER_CONFIG_DIR}{}",
            absolute_dir(&self.config_dir).display(),
            self.bind_flags
        )];
        if options.enable_plugins {
            let plugin_dir = self.plugin_root.join(&options.version);
            std::fs::create_dir_all(&plugin_dir)?;
            binds.push(format!("{}:{CONTAINER_PLUGIN_DIR}", plugin_dir.display()));
        } else {
            trace!("plugins are disabled");
        }
        if options.enable_file_cache {
            std::fs::create_dir_all(&self.file_cache_dir)?;
            binds.push(format!(
                "{}:{CONTAINER_FILE_CACHE_DIR}",
                self.file_cache_dir.display()
            ));
        } else {
            trace!("file cache disabled");
        }
        binds.extend(parse_dir_mounts(&options.dir_mounts)?);
        trace!("using binds: {binds:?}");
        Ok(binds)
    }

    fn container_spec(&self, options: &StartOptions) -> Result<ContainerSpec, RuntimeError> {
        let image = self
            .provider
            .image()
            .ok_or_else(|| RuntimeError::Acquisition("engine image not provided".to_owned()))?
            .to_owned();
        let (_, labels) = self.labels(options);

        let mut env = build_env(std::env::vars(), options, EnvOptions::container());
        if options.enable_file_cache {
            env.push(("IMPOSTER_CACHE_DIR".to_owned(), CONTAINER_FILE_CACHE_DIR.to_owned()));
            env.push(("IMPOSTER_OPENAPI_REMOTE_FILE_CACHE".to_owned(), "true".to_owned()));
        }

        let mut ports = vec![(options.port, options.port)];
        if options.debug {
            ports.push((DEFAULT_DEBUG_PORT, DEFAULT_DEBUG_PORT));
        }

        Ok(ContainerSpec {
            image,
            args: vec![
                format!("--configDir={CONTAINER_CONFIG_DIR}"),
                format!("--listenPort={}", options.port),
            ],
            env,
            ports,
            binds: self.binds(options)?,
            labels,
            user: self.container_user.clone(),
        })
    }

    fn remove_duplicates(&self, hash: &str) {
        match self.docker.list_by_labels(&[(LABEL_HASH, hash)]) {
            Ok(existing) => {
                for container in existing {
                    info!("replacing running mock {}", container.name);
                    if let Err(e) = self.docker.remove_force(&container.id) {
                        warn!("failed to remove {}: {e}", container.name);
                    }
                }
            }
            Err(e) => warn!("could not look for duplicate mocks: {e}"),
        }
    }

    /// Acquire, create and start the container; nothing is registered yet.
    fn launch(&mut self, options: &StartOptions) -> Result<String, RuntimeError> {
        if !self.provider.satisfied() {
            self.provider.provide(options.pull_policy)?;
        }
        if options.replace_running {
            let (hash, _) = self.labels(options);
            self.remove_duplicates(&hash);
        }

        let spec = self.container_spec(options)?;
        let id = self.docker.create(&spec)?;
        if let Err(e) = self.docker.start(&id) {
            let _ = self.docker.remove_force(&id);
            return Err(e);
        }
        Ok(id)
    }

    fn start_with(
        &mut self,
        completion: &Completion,
        options: StartOptions,
    ) -> Result<bool, RuntimeError> {
        info!(
            "starting mock engine on port {} - press ctrl+c to stop",
            options.port
        );
        self.cancel.clear();
        let launched = advance(&mut self.state, EngineState::Starting)
            .and_then(|()| self.launch(&options));
        let id = match launched {
            Ok(id) => id,
            Err(e) => {
                if self.state == EngineState::Starting {
                    self.state = EngineState::Stopped;
                }
                self.notifier
                    .notify(completion, Event::launch_failed(e.to_string()));
                return Err(e);
            }
        };
        trace!("started container {id}");

        self.notifier.register(completion, &id);
        self.container_id = Some(id.clone());

        match self.docker.follow_logs(&id) {
            Ok(mut follower) => {
                let id = id.clone();
                std::thread::spawn(move || match follower.wait() {
                    Ok(status) => trace!("log follower for {id} exited: {status}"),
                    Err(e) => debug!("log follower for {id} failed: {e}"),
                });
            }
            Err(e) => warn!("{e}"),
        }

        // Scoped to this container, so a watcher outliving a stop cannot
        // cancel the wait of a later start.
        let (exit_handle, exited) = shutdown_channel();
        self.spawn_watcher(completion, id, exit_handle);

        let up = self
            .probe
            .wait_until_ready_any(options.port, &[&self.cancel, &exited]);
        if up {
            advance(&mut self.state, EngineState::Running)?;
        }
        Ok(up)
    }

    fn spawn_watcher(&self, completion: &Completion, id: String, exited: ShutdownHandle) {
        let docker = self.docker.clone();
        let notifier = self.notifier.clone();
        let completion = completion.clone();
        std::thread::spawn(move || {
            let event = match docker.wait(&id) {
                Ok(code) => {
                    debug!("container {id} exited with code {code}");
                    Event::exited(&id)
                }
                Err(e) => Event::failed(&id, e.to_string()),
            };
            // an instance that is gone can never become ready
            exited.signal();
            notifier.notify(&completion, event);
        });
    }
}

impl MockEngine for DockerEngine {
    fn kind(&self) -> BackendKind {
        self.kind
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
        self.start_with(completion, self.options.clone())
    }

    fn stop(&mut self, completion: &Completion) -> Result<(), RuntimeError> {
        let Some(id) = self.container_id.take() else {
            trace!("no container ID to remove");
            self.notifier.notify(completion, Event::not_launched());
            return Ok(());
        };
        info!("stopping mock engine");
        trace!("removing container {id}");
        advance(&mut self.state, EngineState::Stopping)?;

        // settles the completion if removal is never observed
        let notifier = self.notifier.clone();
        let supervised = completion.clone();
        let supervised_id = id.clone();
        let timeout = self.removal_timeout;
        std::thread::spawn(move || {
            std::thread::sleep(timeout);
            trace!("fired timeout supervisor for container {supervised_id} removal");
            notifier.notify(&supervised, Event::exited(supervised_id));
        });

        let removed = self.docker.remove_force(&id);
        self.state = EngineState::Stopped;
        removed
    }

    fn restart(&mut self, completion: &Completion) -> Result<bool, RuntimeError> {
        completion.add(1);
        self.stop(completion)?;
        self.start_with(completion, self.options.for_restart())
    }

    fn list_all_managed(&self) -> Result<Vec<ManagedMock>, RuntimeError> {
        let containers = self.docker.list_by_labels(&[(LABEL_MANAGED, "true")])?;
        Ok(containers
            .into_iter()
            .map(|c| {
                let mut metadata = BTreeMap::new();
                metadata.insert("configDir".to_owned(), c.config_dir);
                metadata.insert("hash".to_owned(), c.hash);
                ManagedMock {
                    id: c.id,
                    name: c.name,
                    port: c.port.unwrap_or(mockrun_core::DEFAULT_PORT),
                    metadata,
                }
            })
            .collect())
    }

    fn stop_all_managed(&self) -> Result<usize, RuntimeError> {
        let containers = self.docker.list_by_labels(&[(LABEL_MANAGED, "true")])?;
        let mut stopped = 0;
        for container in containers {
            debug!("removing managed container {}", container.id);
            match self.docker.remove_force(&container.id) {
                Ok(()) => stopped += 1,
                Err(e) => warn!("could not stop {}: {e}", container.name),
            }
        }
        Ok(stopped)
    }

    fn version_string(&mut self) -> Result<String, RuntimeError> {
        if !self.provider.satisfied() {
            self.provider.provide(PullPolicy::Skip)?;
        }
        let image = self.provider.image_ref();
        let output = self.docker.run_once(&image, &["--version"])?;
        if !output.status.success() {
            return Err(RuntimeError::Version(format!(
                "{image} --version exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        version_from_output(&output.stdout, &output.stderr)
            .ok_or_else(|| RuntimeError::Version(format!("{image} printed no version")))
    }
}

/// Engine images of one container kind in the local image store.
pub struct DockerCatalog {
    kind: BackendKind,
    docker: DockerCli,
    registry: String,
}

impl DockerCatalog {
    pub fn new(ctx: &RuntimeContext, kind: BackendKind) -> Self {
        Self {
            kind,
            docker: DockerCli::new(ctx.config.docker_binary()),
            registry: ctx.config.docker_registry(),
        }
    }
}

impl EngineCatalog for DockerCatalog {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn list(&self) -> Result<Vec<EngineMetadata>, RuntimeError> {
        let repository = image_repository(self.kind, &self.registry)?;
        Ok(self
            .docker
            .image_tags(&repository)?
            .into_iter()
            .map(|version| EngineMetadata {
                kind: self.kind,
                version,
            })
            .collect())
    }

    fn check_prereqs(&self) -> Vec<MissingPrereq> {
        check_docker_prereqs(self.docker.binary())
    }
}
