use crate::RuntimeError;
use std::collections::BTreeMap;
use std::process::{Child, Command, Output, Stdio};
use tracing::{debug, trace};

pub const LABEL_MANAGED: &str = "io.mockrun.managed";
pub const LABEL_CONFIG_DIR: &str = "io.mockrun.dir";
pub const LABEL_PORT: &str = "io.mockrun.port";
pub const LABEL_HASH: &str = "io.mockrun.hash";

/// What to pass to `docker create`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerSpec {
    pub image: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    /// `(host, container)` TCP port pairs.
    pub ports: Vec<(u16, u16)>,
    /// `host:container[:flags]` bind specifications.
    pub binds: Vec<String>,
    pub labels: BTreeMap<String, String>,
    pub user: Option<String>,
}

impl ContainerSpec {
    pub fn create_args(&self) -> Vec<String> {
        let mut args = vec!["create".to_owned()];
        for (key, value) in &self.labels {
            args.push("--label".to_owned());
            args.push(format!("{key}={value}"));
        }
        for (key, value) in &self.env {
            args.push("--env".to_owned());
            args.push(format!("{key}={value}"));
        }
        for (host, container) in &self.ports {
            args.push("--publish".to_owned());
            args.push(format!("{host}:{container}/tcp"));
        }
        for bind in &self.binds {
            args.push("--volume".to_owned());
            args.push(bind.clone());
        }
        if let Some(user) = &self.user {
            args.push("--user".to_owned());
            args.push(user.clone());
        }
        args.push(self.image.clone());
        args.extend(self.args.iter().cloned());
        args
    }
}

/// A row of `docker ps` for a managed container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSummary {
    pub id: String,
    pub name: String,
    pub port: Option<u16>,
    pub config_dir: String,
    pub hash: String,
}

const PS_FORMAT: &str = concat!(
    "{{.ID}}\t{{.Names}}\t",
    "{{.Label \"io.mockrun.port\"}}\t",
    "{{.Label \"io.mockrun.dir\"}}\t",
    "{{.Label \"io.mockrun.hash\"}}"
);

pub(crate) fn parse_ps_output(stdout: &str) -> Vec<ContainerSummary> {
    stdout
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| {
            let mut fields = line.split('\t');
            let id = fields.next()?.trim().to_owned();
            if id.is_empty() {
                return None;
            }
            let name = fields.next().unwrap_or_default().trim().to_owned();
            let port = fields.next().and_then(|p| p.trim().parse().ok());
            let config_dir = fields.next().unwrap_or_default().trim().to_owned();
            let hash = fields.next().unwrap_or_default().trim().to_owned();
            Some(ContainerSummary {
                id,
                name,
                port,
                config_dir,
                hash,
            })
        })
        .collect()
}

fn stderr_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).trim().to_owned()
}

fn is_missing_image(stderr: &str) -> bool {
    let msg = stderr.to_lowercase();
    msg.contains("no such image") || msg.contains("not found") || msg.contains("no such object")
}

/// Thin wrapper over the `docker` command line client.
#[derive(Debug, Clone)]
pub struct DockerCli {
    binary: String,
}

impl DockerCli {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }

    fn command(&self) -> Command {
        Command::new(&self.binary)
    }

    fn output<I, S>(&self, args: I, kind: fn(String) -> RuntimeError) -> Result<Output, RuntimeError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<std::ffi::OsStr>,
    {
        let mut cmd = self.command();
        cmd.args(args).stdin(Stdio::null());
        trace!("running {cmd:?}");
        cmd.output()
            .map_err(|e| kind(format!("failed to run {}: {e}", self.binary)))
    }

    pub fn image_present(&self, image: &str) -> Result<bool, RuntimeError> {
        let output = self.output(
            ["image", "inspect", "--format", "{{.Id}}", image],
            RuntimeError::Acquisition,
        )?;
        if output.status.success() {
            return Ok(true);
        }
        let stderr = stderr_of(&output);
        if is_missing_image(&stderr) {
            Ok(false)
        } else {
            Err(RuntimeError::Acquisition(format!(
                "failed to inspect image {image}: {stderr}"
            )))
        }
    }

    /// Pull `image`, streaming progress to the terminal.
    pub fn pull(&self, image: &str) -> Result<(), RuntimeError> {
        debug!("pulling image {image}");
        let status = self
            .command()
            .args(["pull", image])
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .map_err(|e| RuntimeError::Acquisition(format!("failed to run {}: {e}", self.binary)))?;
        if status.success() {
            Ok(())
        } else {
            Err(RuntimeError::Acquisition(format!(
                "failed to pull image {image}: {status}"
            )))
        }
    }

    /// Create a container and return its id.
    pub fn create(&self, spec: &ContainerSpec) -> Result<String, RuntimeError> {
        let output = self.output(spec.create_args(), RuntimeError::Launch)?;
        if !output.status.success() {
            return Err(RuntimeError::Launch(format!(
                "failed to create container: {}",
                stderr_of(&output)
            )));
        }
        let id = String::from_utf8_lossy(&output.stdout)
            .lines()
            .last()
            .unwrap_or_default()
            .trim()
            .to_owned();
        if id.is_empty() {
            return Err(RuntimeError::Launch(
                "container create returned no id".to_owned(),
            ));
        }
        Ok(id)
    }

    pub fn start(&self, id: &str) -> Result<(), RuntimeError> {
        let output = self.output(["start", id], RuntimeError::Launch)?;
        if output.status.success() {
            Ok(())
        } else {
            Err(RuntimeError::Launch(format!(
                "failed to start container {id}: {}",
                stderr_of(&output)
            )))
        }
    }

    /// Follow container output on this terminal until the container goes.
    pub fn follow_logs(&self, id: &str) -> Result<Child, RuntimeError> {
        self.command()
            .args(["logs", "--follow", id])
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| RuntimeError::Launch(format!("failed to follow logs of {id}: {e}")))
    }

    /// Block until the container exits; returns its exit code.
    pub fn wait(&self, id: &str) -> Result<i64, RuntimeError> {
        let output = self.output(["wait", id], RuntimeError::Termination)?;
        if !output.status.success() {
            return Err(RuntimeError::Termination(format!(
                "failed waiting for container {id}: {}",
                stderr_of(&output)
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout)
            .trim()
            .parse()
            .unwrap_or(-1))
    }

    pub fn remove_force(&self, id: &str) -> Result<(), RuntimeError> {
        let output = self.output(["rm", "--force", id], RuntimeError::Termination)?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = stderr_of(&output);
        if stderr.to_lowercase().contains("no such container") {
            debug!("container {id} already removed");
            return Ok(());
        }
        Err(RuntimeError::Termination(format!(
            "failed to remove container {id}: {stderr}"
        )))
    }

    /// Running containers carrying every `key=value` label.
    pub fn list_by_labels(&self, labels: &[(&str, &str)]) -> Result<Vec<ContainerSummary>, RuntimeError> {
        let mut args = vec!["ps".to_owned(), "--no-trunc".to_owned()];
        for (key, value) in labels {
            args.push("--filter".to_owned());
            args.push(format!("label={key}={value}"));
        }
        args.push("--format".to_owned());
        args.push(PS_FORMAT.to_owned());

        let output = self.output(&args, RuntimeError::Discovery)?;
        if !output.status.success() {
            return Err(RuntimeError::Discovery(format!(
                "failed to list containers: {}",
                stderr_of(&output)
            )));
        }
        Ok(parse_ps_output(&String::from_utf8_lossy(&output.stdout)))
    }

    /// Run `image` once with `args` and capture its output.
    pub fn run_once(&self, image: &str, args: &[&str]) -> Result<Output, RuntimeError> {
        let mut full = vec!["run", "--rm", image];
        full.extend_from_slice(args);
        self.output(full, RuntimeError::Version)
    }

    /// Tags of locally stored images of `repository`.
    pub fn image_tags(&self, repository: &str) -> Result<Vec<String>, RuntimeError> {
        let output = self.output(
            ["image", "ls", repository, "--format", "{{.Tag}}"],
            RuntimeError::Discovery,
        )?;
        if !output.status.success() {
            return Err(RuntimeError::Discovery(format!(
                "failed to list images: {}",
                stderr_of(&output)
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .filter(|t| !t.is_empty() && *t != "<none>")
            .map(str::to_owned)
            .collect())
    }
}
