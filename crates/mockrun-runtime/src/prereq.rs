use std::fmt;
use std::path::Path;
use std::process::{Command, Stdio};

/// A missing prerequisite with actionable install instructions.
#[derive(Debug)]
pub struct MissingPrereq {
    pub name: &'static str,
    pub purpose: &'static str,
    pub install_hint: &'static str,
}

impl fmt::Display for MissingPrereq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "  - {}: {} (install: {})",
            self.name, self.purpose, self.install_hint
        )
    }
}

pub(crate) fn command_exists(name: &str) -> bool {
    if name.contains('/') {
        return Path::new(name).is_file();
    }
    Command::new("which")
        .arg(name)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

fn docker_daemon_reachable(binary: &str) -> bool {
    Command::new(binary)
        .args(["version", "--format", "{{.Server.Version}}"])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Check prerequisites for the container backends.
/// Returns a list of missing items. Empty list means all prerequisites are met.
pub fn check_docker_prereqs(binary: &str) -> Vec<MissingPrereq> {
    let mut missing = Vec::new();

    if !command_exists(binary) {
        missing.push(MissingPrereq {
            name: "docker",
            purpose: "running mock engine containers",
            install_hint: "https://docs.docker.com/engine/install/ or set docker.binary in config.toml",
        });
    } else if !docker_daemon_reachable(binary) {
        missing.push(MissingPrereq {
            name: "docker daemon",
            purpose: "creating and inspecting containers",
            install_hint: "start the daemon (systemctl start docker) and check socket permissions",
        });
    }

    missing
}

/// Check prerequisites for the JVM backends.
pub fn check_jvm_prereqs(java_home: Option<&Path>) -> Vec<MissingPrereq> {
    let mut missing = Vec::new();

    if crate::jvm::find_java(java_home).is_err() {
        missing.push(MissingPrereq {
            name: "java",
            purpose: "running the JVM mock engine",
            install_hint: "install a JDK 11+ and set JAVA_HOME, or set jvm.java_home in config.toml",
        });
    }

    missing
}

/// Format a list of missing prerequisites into a user-friendly error message.
pub fn format_missing(missing: &[MissingPrereq]) -> String {
    use std::fmt::Write as _;
    let mut msg = String::from("missing prerequisites:\n");
    for m in missing {
        let _ = writeln!(msg, "{m}");
    }
    msg.push_str("\nmockrun needs these to run the selected engine type.");
    msg
}
