use super::{Session, EXIT_SUCCESS};
use crate::UpArgs;
use crossbeam_channel::RecvTimeoutError;
use mockrun_core::{install_signal_handler, shutdown_requested, Completion, PullPolicy, StartOptions};
use mockrun_runtime::format_missing;
use std::time::Duration;
use tracing::{debug, warn};

const POLL: Duration = Duration::from_millis(250);
/// Bound on waiting for the engine to report termination after a stop.
const STOP_WAIT: Duration = Duration::from_secs(30);

fn parse_env(entries: &[String]) -> Result<Vec<(String, String)>, String> {
    entries
        .iter()
        .map(|entry| match entry.split_once('=') {
            Some((key, value)) if !key.is_empty() => Ok((key.to_owned(), value.to_owned())),
            _ => Err(format!("invalid environment entry '{entry}', expected KEY=VALUE")),
        })
        .collect()
}

fn start_options(args: &UpArgs, version: String) -> Result<StartOptions, String> {
    let pull_policy = args
        .pull_policy
        .parse::<PullPolicy>()
        .map_err(|e| e.to_string())?;
    Ok(StartOptions {
        port: args.port,
        version,
        pull_policy,
        debug: args.debug,
        replace_running: args.replace,
        deduplicate: args.deduplicate.clone(),
        enable_plugins: args.enable_plugins,
        enable_file_cache: args.enable_file_cache,
        dir_mounts: args.mounts.clone(),
        log_level: args.log_level.clone(),
        environment: parse_env(&args.env)?,
    })
}

pub fn run(session: &Session, args: &UpArgs) -> Result<u8, String> {
    let kind = session.kind(args.engine_type.as_deref())?;
    if !args.config_dir.is_dir() {
        return Err(format!(
            "config error: config dir {} does not exist",
            args.config_dir.display()
        ));
    }

    if std::env::var("MOCKRUN_SKIP_PREREQS").as_deref() != Ok("1") {
        let catalog = session.registry.catalog(kind).map_err(|e| e.to_string())?;
        let missing = catalog.check_prereqs();
        if !missing.is_empty() {
            return Err(format_missing(&missing));
        }
    }

    let version = session.version(kind, args.version.as_deref())?;
    let options = start_options(args, version)?;
    let port = options.port;
    let mut engine = session.engine(kind, &args.config_dir, options)?;

    let interrupted = install_signal_handler(Some(engine.shutdown_handle()));
    let completion = Completion::new();
    completion.add(1);
    let ready = engine.start(&completion).map_err(|e| e.to_string())?;

    if ready {
        println!("mock engine up and running at http://localhost:{port}");
        loop {
            match interrupted.recv_timeout(POLL) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {}
            }
            if completion.pending() == 0 {
                warn!("mock engine exited");
                return Ok(EXIT_SUCCESS);
            }
        }
    } else if !shutdown_requested() && completion.pending() > 0 {
        warn!("mock engine did not become ready on port {port}");
    }

    debug!("stopping {kind} engine");
    engine
        .stop_immediately(&completion)
        .map_err(|e| e.to_string())?;
    if !completion.wait_timeout(STOP_WAIT) {
        warn!("timed out waiting for the mock engine to stop");
    }

    if ready || shutdown_requested() {
        Ok(EXIT_SUCCESS)
    } else {
        Err(format!(
            "failed to launch mock engine: not ready on port {port}"
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        up: UpArgs,
    }

    fn args(extra: &[&str]) -> UpArgs {
        let mut argv = vec!["up"];
        argv.extend_from_slice(extra);
        Harness::parse_from(argv).up
    }

    #[test]
    fn env_entries_split_on_first_equals() {
        assert_eq!(
            parse_env(&["A=1".to_owned(), "B=x=y".to_owned()]).unwrap(),
            vec![
                ("A".to_owned(), "1".to_owned()),
                ("B".to_owned(), "x=y".to_owned())
            ]
        );
        assert!(parse_env(&["=1".to_owned()]).is_err());
        assert!(parse_env(&["NOVALUE".to_owned()]).is_err());
    }

    #[test]
    fn options_from_flags() {
        let up = args(&[
            "--pull-policy",
            "always",
            "--debug",
            "--enable-plugins",
            "--log-level",
            "DEBUG",
        ]);
        let options = start_options(&up, "4.2.0".to_owned()).unwrap();
        assert_eq!(options.pull_policy, PullPolicy::Always);
        assert!(options.debug);
        assert!(options.enable_plugins);
        assert_eq!(options.log_level.as_deref(), Some("DEBUG"));
        assert_eq!(options.version, "4.2.0");
        assert_eq!(options.port, mockrun_core::DEFAULT_PORT);
    }

    #[test]
    fn invalid_pull_policy_is_rejected() {
        let up = args(&["--pull-policy", "sometimes"]);
        let err = start_options(&up, "4.2.0".to_owned()).unwrap_err();
        assert!(err.starts_with("invalid pull policy"), "{err}");
    }
}
