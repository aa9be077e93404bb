mod commands;

use clap::{Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use commands::{Session, EXIT_CONFIG_ERROR, EXIT_FAILURE, EXIT_LAUNCH_ERROR};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "mockrun",
    version,
    about = "Start, stop and inspect mock API engines on container, JVM, native and serverless backends"
)]
struct Cli {
    /// Output results as structured JSON.
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    /// Enable verbose (debug) logging output.
    #[arg(long, default_value_t = false, global = true)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Plain,
    Json,
}

#[derive(Debug, clap::Args)]
pub struct UpArgs {
    /// Directory holding the mock configuration.
    #[arg(default_value = ".")]
    pub config_dir: PathBuf,
    /// Engine type (docker, docker-all, docker-distroless, jvm, jvm-distro, golang, awslambda).
    #[arg(short = 't', long)]
    pub engine_type: Option<String>,
    /// Engine version, or "latest".
    #[arg(short = 'v', long)]
    pub version: Option<String>,
    /// Port the engine listens on.
    #[arg(short, long, default_value_t = mockrun_core::DEFAULT_PORT)]
    pub port: u16,
    /// When to fetch the engine artifact (skip, if-not-present, always).
    #[arg(long, default_value = "if-not-present")]
    pub pull_policy: String,
    /// Expose the JVM debugger on port 8000.
    #[arg(long, default_value_t = false)]
    pub debug: bool,
    /// Replace running mocks serving the same configuration and port.
    #[arg(long, default_value_t = false)]
    pub replace: bool,
    /// Identity key used by --replace instead of the config dir and port.
    #[arg(long)]
    pub deduplicate: Option<String>,
    #[arg(long, default_value_t = false)]
    pub enable_plugins: bool,
    /// Cache remote files such as OpenAPI specs between runs.
    #[arg(long, default_value_t = false)]
    pub enable_file_cache: bool,
    /// Extra `host[:container]` directory mounts (container engines only).
    #[arg(long = "mount")]
    pub mounts: Vec<String>,
    /// Engine log level, e.g. DEBUG.
    #[arg(long)]
    pub log_level: Option<String>,
    /// Extra engine environment entries as KEY=VALUE.
    #[arg(short = 'e', long = "env")]
    pub env: Vec<String>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Start a mock engine for a configuration directory and wait for ctrl+c.
    Up(UpArgs),
    /// Stop every mock engine of a type started by mockrun.
    Down {
        #[arg(short = 't', long)]
        engine_type: Option<String>,
    },
    /// List running mock engines started by mockrun.
    Ps {
        #[arg(short = 't', long)]
        engine_type: Option<String>,
    },
    /// Manage locally cached engine versions.
    #[command(subcommand)]
    Engine(EngineCommand),
    /// Check that the container and JVM backends can run on this host.
    Doctor,
    /// Show the CLI version and the version of the configured engine.
    Version {
        #[arg(short = 't', long)]
        engine_type: Option<String>,
        /// Only print the CLI version.
        #[arg(long, default_value_t = false)]
        cli: bool,
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Plain)]
        output: OutputFormat,
    },
    /// Generate shell completions for bash, zsh, fish, elvish, or powershell.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

#[derive(Debug, Subcommand)]
enum EngineCommand {
    /// List engine versions available locally.
    List {
        #[arg(short = 't', long)]
        engine_type: Option<String>,
    },
    /// Fetch an engine artifact without starting it.
    Pull {
        #[arg(short = 't', long)]
        engine_type: Option<String>,
        #[arg(short = 'v', long)]
        version: Option<String>,
        /// Fetch even if the artifact is already present.
        #[arg(long, default_value_t = false)]
        force: bool,
    },
}

fn main() -> ExitCode {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe")
            || msg.contains("broken pipe")
            || msg.contains("os error 32")
            || msg.contains("failed printing to stdout")
        {
            std::process::exit(0);
        }
        default_hook(info);
    }));

    let cli = Cli::parse();

    let default_level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("MOCKRUN_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();

    let json_output = cli.json;

    let result = match cli.command {
        Commands::Completions { shell } => commands::completions::run::<Cli>(shell),
        command => Session::load().and_then(|session| dispatch(&session, command, json_output)),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(msg) => {
            eprintln!("error: {msg}");
            ExitCode::from(exit_code_for(&msg))
        }
    }
}

fn dispatch(session: &Session, command: Commands, json_output: bool) -> Result<u8, String> {
    match command {
        Commands::Up(args) => commands::up::run(session, &args),
        Commands::Down { engine_type } => commands::down::run(session, engine_type.as_deref()),
        Commands::Ps { engine_type } => {
            commands::ps::run(session, engine_type.as_deref(), json_output)
        }
        Commands::Engine(EngineCommand::List { engine_type }) => {
            commands::engine::list(session, engine_type.as_deref(), json_output)
        }
        Commands::Engine(EngineCommand::Pull {
            engine_type,
            version,
            force,
        }) => commands::engine::pull(
            session,
            engine_type.as_deref(),
            version.as_deref(),
            force,
        ),
        Commands::Doctor => commands::doctor::run(session, json_output),
        Commands::Version {
            engine_type,
            cli,
            output,
        } => {
            let format = if json_output {
                OutputFormat::Json
            } else {
                output
            };
            commands::version::run(session, engine_type.as_deref(), cli, format)
        }
        Commands::Completions { shell } => commands::completions::run::<Cli>(shell),
    }
}

fn exit_code_for(msg: &str) -> u8 {
    if msg.starts_with("config error:")
        || msg.starts_with("unknown engine type:")
        || msg.starts_with("invalid pull policy:")
        || msg.starts_with("invalid environment entry")
    {
        EXIT_CONFIG_ERROR
    } else if msg.starts_with("failed to launch mock engine:")
        || msg.starts_with("failed to acquire engine artifact:")
        || msg.starts_with("unsupported operation:")
    {
        EXIT_LAUNCH_ERROR
    } else {
        EXIT_FAILURE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn exit_codes_by_error_kind() {
        assert_eq!(exit_code_for("unknown engine type: k8s"), EXIT_CONFIG_ERROR);
        assert_eq!(exit_code_for("config error: no such directory"), EXIT_CONFIG_ERROR);
        assert_eq!(
            exit_code_for("failed to launch mock engine: port in use"),
            EXIT_LAUNCH_ERROR
        );
        assert_eq!(
            exit_code_for("failed to discover managed mocks: denied"),
            EXIT_FAILURE
        );
    }

    #[test]
    fn up_flags_parse() {
        let cli = Cli::parse_from([
            "mockrun", "up", "mocks", "-t", "golang", "-v", "1.2.0", "-p", "9090", "--mount",
            "/data", "-e", "A=1", "--replace",
        ]);
        let Commands::Up(args) = cli.command else {
            panic!("expected up");
        };
        assert_eq!(args.config_dir, PathBuf::from("mocks"));
        assert_eq!(args.engine_type.as_deref(), Some("golang"));
        assert_eq!(args.version.as_deref(), Some("1.2.0"));
        assert_eq!(args.port, 9090);
        assert_eq!(args.mounts, vec!["/data"]);
        assert_eq!(args.env, vec!["A=1"]);
        assert!(args.replace);
    }
}
