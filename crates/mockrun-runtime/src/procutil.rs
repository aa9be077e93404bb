use crate::RuntimeError;
use mockrun_core::{ManagedMock, DEFAULT_PORT};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, warn};

pub const LISTEN_PORT_FLAG: &str = "--listenPort";
pub const CONFIG_DIR_FLAG: &str = "--configDir";

/// A process on this host and its argument vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub pid: u32,
    pub cmdline: Vec<String>,
}

/// Value of `flag` in either `--flag=value` or `--flag value` form.
pub fn flag_value(cmdline: &[String], flag: &str) -> Option<String> {
    let prefix = format!("{flag}=");
    let mut args = cmdline.iter();
    while let Some(arg) = args.next() {
        if let Some(value) = arg.strip_prefix(&prefix) {
            return Some(value.to_owned());
        }
        if arg == flag {
            return args.next().cloned();
        }
    }
    None
}

fn parse_cmdline(raw: &[u8]) -> Vec<String> {
    raw.split(|b| *b == 0)
        .filter(|part| !part.is_empty())
        .map(|part| String::from_utf8_lossy(part).into_owned())
        .collect()
}

/// Every readable process in `/proc` except this one.
pub fn scan_processes() -> Result<Vec<ProcessInfo>, RuntimeError> {
    let own = std::process::id();
    let mut found = Vec::new();
    for entry in std::fs::read_dir("/proc")? {
        let Ok(entry) = entry else { continue };
        let Some(pid) = entry.file_name().to_str().and_then(|n| n.parse::<u32>().ok()) else {
            continue;
        };
        if pid == own {
            continue;
        }
        // processes may exit between listing and reading
        let Ok(raw) = std::fs::read(entry.path().join("cmdline")) else {
            continue;
        };
        let cmdline = parse_cmdline(&raw);
        if !cmdline.is_empty() {
            found.push(ProcessInfo { pid, cmdline });
        }
    }
    Ok(found)
}

/// Describe an engine process from its `--configDir`/`--listenPort` arguments.
pub fn managed_from_process(info: &ProcessInfo) -> ManagedMock {
    let config_dir = flag_value(&info.cmdline, CONFIG_DIR_FLAG);
    let port = flag_value(&info.cmdline, LISTEN_PORT_FLAG)
        .and_then(|p| p.parse().ok())
        .unwrap_or(DEFAULT_PORT);
    let name = config_dir
        .as_deref()
        .and_then(|d| Path::new(d).file_name())
        .map_or_else(
            || format!("pid-{}", info.pid),
            |n| n.to_string_lossy().into_owned(),
        );

    let mut metadata = BTreeMap::new();
    metadata.insert("pid".to_owned(), info.pid.to_string());
    if let Some(dir) = config_dir {
        metadata.insert("configDir".to_owned(), dir);
    }

    ManagedMock {
        id: info.pid.to_string(),
        name,
        port,
        metadata,
    }
}

/// Managed engine processes whose command line satisfies `matcher`.
pub fn find_managed<F>(matcher: F) -> Result<Vec<ManagedMock>, RuntimeError>
where
    F: Fn(&[String]) -> bool,
{
    let processes = scan_processes()
        .map_err(|e| RuntimeError::Discovery(format!("failed to scan processes: {e}")))?;
    Ok(processes
        .iter()
        .filter(|p| matcher(&p.cmdline))
        .map(managed_from_process)
        .collect())
}

/// Send SIGKILL to `pid`. A process that has already gone is not an error.
pub fn kill(pid: u32) -> Result<(), RuntimeError> {
    let pid_i32 = i32::try_from(pid)
        .map_err(|_| RuntimeError::Termination(format!("invalid pid {pid}: exceeds i32 range")))?;
    debug!("sending SIGKILL to pid {pid}");
    // SAFETY: kill() with a valid pid and signal is safe; pid validated via i32::try_from above.
    #[allow(unsafe_code)]
    let ret = unsafe { libc::kill(pid_i32, libc::SIGKILL) };
    if ret != 0 {
        let errno = std::io::Error::last_os_error();
        if errno.raw_os_error() == Some(libc::ESRCH) {
            debug!("pid {pid} already exited");
        } else {
            return Err(RuntimeError::Termination(format!(
                "failed to send SIGKILL to pid {pid}: {errno}"
            )));
        }
    }
    Ok(())
}

pub fn is_alive(pid: u32) -> bool {
    Path::new(&format!("/proc/{pid}")).exists()
}

/// Kill every process matched by `matcher`, continuing past failures.
pub fn stop_managed<F>(matcher: F) -> Result<usize, RuntimeError>
where
    F: Fn(&[String]) -> bool,
{
    let mut stopped = 0;
    for mock in find_managed(matcher)? {
        let Ok(pid) = mock.id.parse::<u32>() else {
            continue;
        };
        match kill(pid) {
            Ok(()) => stopped += 1,
            Err(e) => warn!("could not stop {}: {e}", mock.name),
        }
    }
    Ok(stopped)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).to_owned()).collect()
    }

    #[test]
    fn flag_value_both_forms() {
        let cmd = args(&["imposter-go", "--configDir=/srv/mocks", "--listenPort", "9090"]);
        assert_eq!(flag_value(&cmd, CONFIG_DIR_FLAG).as_deref(), Some("/srv/mocks"));
        assert_eq!(flag_value(&cmd, LISTEN_PORT_FLAG).as_deref(), Some("9090"));
        assert_eq!(flag_value(&cmd, "--plugin"), None);
    }

    #[test]
    fn cmdline_split_on_nul() {
        assert_eq!(
            parse_cmdline(b"java\0-jar\0imposter.jar\0"),
            args(&["java", "-jar", "imposter.jar"])
        );
        assert!(parse_cmdline(b"").is_empty());
    }

    #[test]
    fn managed_mock_from_args() {
        let info = ProcessInfo {
            pid: 4242,
            cmdline: args(&["java", "-jar", "imposter.jar", "--configDir=/srv/petstore", "--listenPort=8181"]),
        };
        let mock = managed_from_process(&info);
        assert_eq!(mock.id, "4242");
        assert_eq!(mock.name, "petstore");
        assert_eq!(mock.port, 8181);
        assert_eq!(mock.metadata["configDir"], "/srv/petstore");
    }

    #[test]
    fn managed_mock_defaults() {
        let info = ProcessInfo {
            pid: 7,
            cmdline: args(&["imposter-go"]),
        };
        let mock = managed_from_process(&info);
        assert_eq!(mock.name, "pid-7");
        assert_eq!(mock.port, DEFAULT_PORT);
    }

    #[test]
    fn scan_excludes_self() {
        let own = std::process::id();
        let all = scan_processes().unwrap();
        assert!(all.iter().all(|p| p.pid != own));
    }

    #[test]
    fn kill_terminates_child() {
        use std::os::unix::process::ExitStatusExt;

        let mut child = std::process::Command::new("sleep").arg("30").spawn().unwrap();
        assert!(is_alive(child.id()));
        kill(child.id()).unwrap();
        let status = child.wait().unwrap();
        assert_eq!(status.signal(), Some(libc::SIGKILL));
    }

    #[test]
    fn matcher_with_no_hits_stops_nothing() {
        assert_eq!(stop_managed(|_| false).unwrap(), 0);
    }
}
