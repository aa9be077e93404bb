use crate::backend::{advance, MockEngine, Provider};
use crate::procutil::{self, CONFIG_DIR_FLAG, LISTEN_PORT_FLAG};
use crate::registry::RuntimeContext;
use crate::RuntimeError;
use crossbeam_channel::{Receiver, RecvTimeoutError, TryRecvError};
use mockrun_core::{
    build_env, shutdown_channel, version_from_output, BackendKind, Completion, EngineState,
    EnvOptions, Event, ManagedMock, Notifier, PullPolicy, ReadinessProbe, ShutdownHandle,
    ShutdownSignal, StartOptions,
};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// How long `stop` waits, by default, for the watcher to observe the killed
/// process.
pub const EXIT_WAIT: Duration = Duration::from_secs(10);

/// A provider whose artifact runs as a local child process.
pub trait ProcessProvider: Provider {
    /// Command running the engine with `args`. Only valid once satisfied.
    fn command(&self, args: &[String]) -> Result<Command, RuntimeError>;

    /// Whether a process command line belongs to this engine family.
    fn matches(&self, cmdline: &[String]) -> bool;

    /// Whether the child starts from the full host environment rather than
    /// only the variables `build_env` selects.
    fn inherit_host_env(&self) -> bool {
        false
    }
}

struct RunningProcess {
    pid: u32,
    /// Disconnects once the watcher has reaped the child.
    exited: Receiver<()>,
}

/// A mock engine running as a child process of this tool.
pub struct ProcessEngine<P: ProcessProvider> {
    config_dir: PathBuf,
    options: StartOptions,
    provider: P,
    notifier: Notifier,
    probe: ReadinessProbe,
    shutdown: ShutdownHandle,
    cancel: ShutdownSignal,
    running: Option<RunningProcess>,
    state: EngineState,
    exit_wait: Duration,
    plugin_root: PathBuf,
    file_cache_dir: PathBuf,
}

impl<P: ProcessProvider> ProcessEngine<P> {
    pub fn new(ctx: &RuntimeContext, provider: P, config_dir: &Path, options: StartOptions) -> Self {
        let (shutdown, cancel) = shutdown_channel();
        Self {
            config_dir: config_dir.to_path_buf(),
            options,
            provider,
            notifier: ctx.notifier.clone(),
            probe: ReadinessProbe::default(),
            shutdown,
            cancel,
            running: None,
            state: EngineState::default(),
            exit_wait: EXIT_WAIT,
            plugin_root: ctx.config.home.join("plugins"),
            file_cache_dir: ctx.config.file_cache_dir(),
        }
    }

    #[must_use]
    pub fn with_probe(mut self, probe: ReadinessProbe) -> Self {
        self.probe = probe;
        self
    }

    #[must_use]
    pub fn with_exit_wait(mut self, exit_wait: Duration) -> Self {
        self.exit_wait = exit_wait;
        self
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Process ID of the running instance, if any.
    pub fn pid(&self) -> Option<u32> {
        self.running.as_ref().map(|r| r.pid)
    }

    fn engine_env(&self, options: &StartOptions) -> Result<Vec<(String, String)>, RuntimeError> {
        let mut env = build_env(std::env::vars(), options, EnvOptions::process());
        if options.enable_plugins {
            let plugin_dir = self.plugin_root.join(&options.version);
            std::fs::create_dir_all(&plugin_dir)?;
            env.push((
                "IMPOSTER_PLUGIN_DIR".to_owned(),
                plugin_dir.display().to_string(),
            ));
        }
        if options.enable_file_cache {
            std::fs::create_dir_all(&self.file_cache_dir)?;
            env.push((
                "IMPOSTER_CACHE_DIR".to_owned(),
                self.file_cache_dir.display().to_string(),
            ));
            env.push((
                "IMPOSTER_OPENAPI_REMOTE_FILE_CACHE".to_owned(),
                "true".to_owned(),
            ));
        }
        trace!("engine environment: {env:?}");
        Ok(env)
    }

    fn launch(&mut self, options: &StartOptions) -> Result<std::process::Child, RuntimeError> {
        if !options.dir_mounts.is_empty() {
            warn!("directory mounts are only supported by container engines; ignoring");
        }
        if !self.provider.satisfied() {
            self.provider.provide(options.pull_policy)?;
        }

        let args = vec![
            format!("{CONFIG_DIR_FLAG}={}", self.config_dir.display()),
            format!("{LISTEN_PORT_FLAG}={}", options.port),
        ];
        let mut cmd = self.provider.command(&args)?;
        if !self.provider.inherit_host_env() {
            cmd.env_clear();
        }
        cmd.envs(self.engine_env(options)?)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());
        trace!("launching {cmd:?}");
        cmd.spawn()
            .map_err(|e| RuntimeError::Launch(format!("failed to spawn engine process: {e}")))
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
        let mut child = match launched {
            Ok(child) => child,
            Err(e) => {
                if self.state == EngineState::Starting {
                    self.state = EngineState::Stopped;
                }
                self.notifier
                    .notify(completion, Event::launch_failed(e.to_string()));
                return Err(e);
            }
        };

        let pid = child.id();
        self.notifier.register(completion, &pid.to_string());

        let (exit_tx, exit_rx) = crossbeam_channel::bounded::<()>(0);
        let notifier = self.notifier.clone();
        let watched = completion.clone();
        // Scoped to this child, so a watcher that outlives a timed-out stop
        // cannot cancel the wait of a later start.
        let (exit_handle, gone) = shutdown_channel();
        std::thread::spawn(move || {
            let event = match child.wait() {
                Ok(status) => {
                    debug!("engine process {pid} exited: {status}");
                    Event::exited(pid.to_string())
                }
                Err(e) => Event::failed(pid.to_string(), e.to_string()),
            };
            exit_handle.signal();
            notifier.notify(&watched, event);
            drop(exit_tx);
        });
        self.running = Some(RunningProcess {
            pid,
            exited: exit_rx,
        });

        let up = self
            .probe
            .wait_until_ready_any(options.port, &[&self.cancel, &gone]);
        if up {
            advance(&mut self.state, EngineState::Running)?;
        }
        Ok(up)
    }
}

impl<P: ProcessProvider> MockEngine for ProcessEngine<P> {
    fn kind(&self) -> BackendKind {
        self.provider.kind()
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
        let Some(process) = self.running.take() else {
            trace!("no process to stop");
            self.notifier.notify(completion, Event::not_launched());
            return Ok(());
        };
        info!("stopping mock engine");
        advance(&mut self.state, EngineState::Stopping)?;

        // a reaped pid may already name another process
        let killed = match process.exited.try_recv() {
            Err(TryRecvError::Disconnected) => {
                debug!("engine process {} already exited", process.pid);
                Ok(())
            }
            _ => procutil::kill(process.pid),
        };
        match process.exited.recv_timeout(self.exit_wait) {
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    "engine process {} did not exit within {:?}",
                    process.pid, self.exit_wait
                );
            }
            _ => trace!("engine process {} reaped", process.pid),
        }
        // the watcher normally got here first, in which case this is ignored
        self.notifier
            .notify(completion, Event::exited(process.pid.to_string()));
        self.state = EngineState::Stopped;
        killed
    }

    fn restart(&mut self, completion: &Completion) -> Result<bool, RuntimeError> {
        completion.add(1);
        self.stop(completion)?;
        self.start_with(completion, self.options.for_restart())
    }

    fn list_all_managed(&self) -> Result<Vec<ManagedMock>, RuntimeError> {
        procutil::find_managed(|cmdline| self.provider.matches(cmdline))
    }

    fn stop_all_managed(&self) -> Result<usize, RuntimeError> {
        procutil::stop_managed(|cmdline| self.provider.matches(cmdline))
    }

    fn version_string(&mut self) -> Result<String, RuntimeError> {
        if !self.provider.satisfied() {
            self.provider.provide(PullPolicy::Skip)?;
        }
        let mut cmd = self.provider.command(&["--version".to_owned()])?;
        let output = cmd
            .stdin(Stdio::null())
            .output()
            .map_err(|e| RuntimeError::Version(format!("failed to run engine: {e}")))?;
        if !output.status.success() {
            return Err(RuntimeError::Version(format!(
                "engine --version exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        version_from_output(&output.stdout, &output.stderr)
            .ok_or_else(|| RuntimeError::Version("engine printed no version".to_owned()))
    }
}
