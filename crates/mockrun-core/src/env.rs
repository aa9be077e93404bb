use crate::{StartOptions, DEFAULT_DEBUG_PORT};

/// Which host variables a backend needs in the engine environment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnvOptions {
    pub include_home: bool,
    pub include_path: bool,
}

impl EnvOptions {
    /// Local processes need `HOME` and `PATH`; containers bring their own.
    pub fn process() -> Self {
        Self {
            include_home: true,
            include_path: true,
        }
    }

    pub fn container() -> Self {
        Self::default()
    }
}

/// Environment for an engine instance, built from `host` variables and the
/// start options. Later entries win on duplicate keys when applied in order.
pub fn build_env<I>(host: I, options: &StartOptions, env_options: EnvOptions) -> Vec<(String, String)>
where
    I: IntoIterator<Item = (String, String)>,
{
    let mut env = Vec::new();
    for (key, value) in host {
        let wanted = key.starts_with("IMPOSTER_")
            || (env_options.include_home && key == "HOME")
            || (env_options.include_path && key == "PATH");
        if wanted {
            env.push((key, value));
        }
    }

    if let Some(level) = &options.log_level {
        env.push(("IMPOSTER_LOG_LEVEL".to_owned(), level.to_uppercase()));
    }
    if options.debug {
        env.push((
            "JAVA_TOOL_OPTIONS".to_owned(),
            format!(
                "-agentlib:jdwp=transport=dt_socket,server=y,suspend=n,address=*:{DEFAULT_DEBUG_PORT}"
            ),
        ));
    }
    env.extend(options.environment.iter().cloned());
    env
}

/// First meaningful line of an engine's `--version` output.
pub fn sanitise_version_output(raw: &str) -> String {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| !line.starts_with("Picked up "))
        .filter(|line| {
            let lower = line.to_ascii_lowercase();
            !lower.starts_with("warning") && !lower.starts_with("[warn")
        })
        .map(|line| {
            line.strip_prefix("Version:")
                .or_else(|| line.strip_prefix("version:"))
                .map_or(line, str::trim)
        })
        .next()
        .unwrap_or_default()
        .to_owned()
}

/// Version from an engine's `--version` run. Both streams are read, stdout
/// first; `None` when neither carries a meaningful line.
pub fn version_from_output(stdout: &[u8], stderr: &[u8]) -> Option<String> {
    let combined = format!(
        "{}\n{}",
        String::from_utf8_lossy(stdout),
        String::from_utf8_lossy(stderr)
    );
    Some(sanitise_version_output(&combined)).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host() -> Vec<(String, String)> {
        vec![
            ("HOME".to_owned(), "/home/u".to_owned()),
            ("PATH".to_owned(), "/usr/bin".to_owned()),
            ("IMPOSTER_FOO".to_owned(), "bar".to_owned()),
            ("SECRET_TOKEN".to_owned(), "x".to_owned()),
        ]
    }

    fn has(env: &[(String, String)], key: &str) -> bool {
        env.iter().any(|(k, _)| k == key)
    }

    #[test]
    fn process_env_includes_home_and_path() {
        let env = build_env(host(), &StartOptions::default(), EnvOptions::process());
        assert!(has(&env, "HOME"));
        assert!(has(&env, "PATH"));
        assert!(has(&env, "IMPOSTER_FOO"));
        assert!(!has(&env, "SECRET_TOKEN"));
    }

    #[test]
    fn container_env_excludes_host_paths() {
        let env = build_env(host(), &StartOptions::default(), EnvOptions::container());
        assert!(!has(&env, "HOME"));
        assert!(!has(&env, "PATH"));
        assert!(has(&env, "IMPOSTER_FOO"));
    }

    #[test]
    fn debug_and_log_level_and_extras() {
        let options = StartOptions {
            debug: true,
            log_level: Some("debug".to_owned()),
            environment: vec![("EXTRA".to_owned(), "1".to_owned())],
            ..StartOptions::default()
        };
        let env = build_env(Vec::new(), &options, EnvOptions::container());
        assert!(env.contains(&("IMPOSTER_LOG_LEVEL".to_owned(), "DEBUG".to_owned())));
        assert!(env
            .iter()
            .any(|(k, v)| k == "JAVA_TOOL_OPTIONS" && v.contains("address=*:8000")));
        assert_eq!(env.last(), Some(&("EXTRA".to_owned(), "1".to_owned())));
    }

    #[test]
    fn sanitise_skips_jvm_noise() {
        let raw = "\nPicked up JAVA_TOOL_OPTIONS: -Xmx1g\nWARNING: illegal access\nVersion: 4.2.0\nbuild abc\n";
        assert_eq!(sanitise_version_output(raw), "4.2.0");
    }

    #[test]
    fn sanitise_plain_output() {
        assert_eq!(sanitise_version_output("1.3.0\n"), "1.3.0");
        assert_eq!(sanitise_version_output("  \n\n"), "");
    }

    #[test]
    fn version_read_from_stderr_when_stdout_is_empty() {
        assert_eq!(
            version_from_output(b"", b"Picked up JAVA_TOOL_OPTIONS: -Xmx64m\nVersion: 4.2.0\n"),
            Some("4.2.0".to_owned())
        );
        assert_eq!(
            version_from_output(b"1.3.0\n", b"WARNING: noisy\n"),
            Some("1.3.0".to_owned())
        );
        assert_eq!(version_from_output(b" \n", b""), None);
    }
}
