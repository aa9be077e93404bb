//! JVM engine variants: a single runnable jar and an unpacked distribution.

mod distro;
mod single_jar;

pub use distro::DistroProvider;
pub use single_jar::SingleJarProvider;

use crate::process::ProcessEngine;
use crate::RuntimeError;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, trace, warn};

pub const LAUNCHER_CLASS: &str = "io.gatehill.imposter.cmd.ImposterLauncher";

pub type SingleJarEngine = ProcessEngine<SingleJarProvider>;
pub type DistroEngine = ProcessEngine<DistroProvider>;

pub(crate) const JVM_REPO: &str = "imposter-jvm-engine";

fn java_in(home: &Path) -> Option<PathBuf> {
    let bin = if cfg!(windows) { "java.exe" } else { "java" };
    let candidate = home.join("bin").join(bin);
    candidate.is_file().then_some(candidate)
}

fn macos_java_home() -> Option<PathBuf> {
    if !cfg!(target_os = "macos") {
        return None;
    }
    let output = Command::new("/usr/libexec/java_home").output().ok()?;
    if !output.status.success() {
        return None;
    }
    let home = String::from_utf8_lossy(&output.stdout).trim().to_owned();
    (!home.is_empty()).then(|| PathBuf::from(home))
}

fn java_on_path() -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join("java"))
        .find(|candidate| candidate.is_file())
}

/// Locate the `java` executable: configured home, `JAVA_HOME`, the macOS
/// `java_home` helper, then `PATH`.
pub fn find_java(configured_home: Option<&Path>) -> Result<PathBuf, RuntimeError> {
    if let Some(home) = configured_home.filter(|h| !h.as_os_str().is_empty()) {
        if let Some(java) = java_in(home) {
            trace!("using java from configured home: {}", java.display());
            return Ok(java);
        }
        warn!("no java executable under configured java_home {}", home.display());
    }
    if let Some(home) = std::env::var_os("JAVA_HOME").filter(|h| !h.is_empty()) {
        if let Some(java) = java_in(Path::new(&home)) {
            trace!("using java from JAVA_HOME: {}", java.display());
            return Ok(java);
        }
    }
    if let Some(java) = macos_java_home().as_deref().and_then(java_in) {
        return Ok(java);
    }
    if let Some(java) = java_on_path() {
        debug!("using java from PATH: {}", java.display());
        return Ok(java);
    }
    Err(RuntimeError::Launch(
        "could not find java; set JAVA_HOME or jvm.java_home".to_owned(),
    ))
}

/// Whether a command line is a JVM mock engine started by this tool.
pub fn is_jvm_engine(cmdline: &[String]) -> bool {
    if !cmdline.iter().any(|a| a.starts_with(crate::procutil::CONFIG_DIR_FLAG)) {
        return false;
    }
    let launcher = cmdline.iter().any(|a| a == LAUNCHER_CLASS);
    let jar = cmdline.windows(2).any(|w| {
        w[0] == "-jar"
            && Path::new(&w[1])
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("imposter") && n.ends_with(".jar"))
    });
    launcher || jar
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).to_owned()).collect()
    }

    #[test]
    fn configured_home_wins() {
        let home = tempfile::tempdir().unwrap();
        std::fs::create_dir(home.path().join("bin")).unwrap();
        std::fs::write(home.path().join("bin/java"), "#!/bin/sh\n").unwrap();
        assert_eq!(
            find_java(Some(home.path())).unwrap(),
            home.path().join("bin/java")
        );
    }

    #[test]
    fn single_jar_process_matches() {
        assert!(is_jvm_engine(&args(&[
            "/usr/bin/java",
            "-jar",
            "/home/u/.mockrun/engines/jvm/4.2.0/imposter.jar",
            "--configDir=/srv/mocks",
            "--listenPort=8080",
        ])));
        assert!(is_jvm_engine(&args(&[
            "java",
            "-jar",
            "imposter-4.2.0.jar",
            "--configDir=/srv/mocks",
        ])));
    }

    #[test]
    fn distro_process_matches() {
        assert!(is_jvm_engine(&args(&[
            "java",
            "-classpath",
            "/opt/distro/lib/*",
            LAUNCHER_CLASS,
            "--configDir=/srv/mocks",
        ])));
    }

    #[test]
    fn unrelated_java_does_not_match() {
        assert!(!is_jvm_engine(&args(&["java", "-jar", "app.jar", "--configDir=/x"])));
        assert!(!is_jvm_engine(&args(&["java", "-jar", "imposter.jar"])));
    }
}
