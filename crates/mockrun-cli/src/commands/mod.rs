pub mod completions;
pub mod doctor;
pub mod down;
pub mod engine;
pub mod ps;
pub mod up;
pub mod version;

use indicatif::{ProgressBar, ProgressStyle};
use mockrun_core::{BackendKind, CliConfig, Notifier, Prefs, StartOptions, VersionResolver};
use mockrun_library::{GithubReleases, LATEST, RELEASE_OWNER};
use mockrun_runtime::{EngineRegistry, MockEngine, RuntimeContext};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_CONFIG_ERROR: u8 = 2;
pub const EXIT_LAUNCH_ERROR: u8 = 3;

pub const CLI_VERSION: &str = env!("CARGO_PKG_VERSION");

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON serialization failed: {e}"))
}

pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .expect("valid template")
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    pb.set_message(msg.to_owned());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

pub fn spin_ok(pb: &ProgressBar, msg: &str) {
    pb.set_style(ProgressStyle::with_template("{msg}").expect("valid template"));
    pb.finish_with_message(format!("✓ {msg}"));
}

pub fn spin_fail(pb: &ProgressBar, msg: &str) {
    pb.set_style(ProgressStyle::with_template("{msg}").expect("valid template"));
    pb.finish_with_message(format!("✗ {msg}"));
}

pub fn colorize_kind(kind: BackendKind) -> String {
    use console::Style;
    let name = kind.as_str();
    if kind.is_container() {
        Style::new().cyan().apply_to(name).to_string()
    } else if kind == BackendKind::AwsLambda {
        Style::new().yellow().apply_to(name).to_string()
    } else {
        Style::new().green().apply_to(name).to_string()
    }
}

/// Loaded configuration and the engine registry built from it.
pub struct Session {
    pub ctx: Arc<RuntimeContext>,
    pub registry: EngineRegistry,
}

impl Session {
    pub fn load() -> Result<Self, String> {
        let config = CliConfig::load_default().map_err(|e| e.to_string())?;
        Ok(Self::with_config(config))
    }

    pub fn with_config(config: CliConfig) -> Self {
        let ctx = Arc::new(RuntimeContext::new(config, Notifier::spawn()));
        let registry = EngineRegistry::with_defaults(&ctx);
        Self { ctx, registry }
    }

    pub fn config(&self) -> &CliConfig {
        &self.ctx.config
    }

    pub fn kind(&self, flag: Option<&str>) -> Result<BackendKind, String> {
        self.config()
            .resolve_configured_kind(flag)
            .map_err(|e| e.to_string())
    }

    /// The configured version for `kind`, with `latest` resolved to a
    /// concrete release. Container images also carry a `latest` tag, so
    /// they fall back to it when no release can be resolved.
    pub fn version(&self, kind: BackendKind, flag: Option<&str>) -> Result<String, String> {
        let requested = self.config().resolve_configured_version(flag);
        if requested != LATEST {
            return Ok(requested);
        }
        let resolver = VersionResolver::new(
            Box::new(GithubReleases::new(RELEASE_OWNER)),
            Prefs::new(&self.config().prefs_dir()),
        );
        match resolver.resolve(kind, &requested) {
            Ok(version) => Ok(version),
            Err(e) if kind.is_container() => {
                warn!("{e}; using the '{LATEST}' image tag");
                Ok(LATEST.to_owned())
            }
            Err(e) => Err(e.to_string()),
        }
    }

    pub fn engine(
        &self,
        kind: BackendKind,
        config_dir: &Path,
        options: StartOptions,
    ) -> Result<Box<dyn MockEngine>, String> {
        self.registry
            .build(kind, config_dir, options)
            .map_err(|e| e.to_string())
    }

    /// An engine used only for discovery and version queries.
    pub fn discovery_engine(&self, kind: BackendKind, version: &str) -> Result<Box<dyn MockEngine>, String> {
        let options = StartOptions {
            version: version.to_owned(),
            ..StartOptions::default()
        };
        self.engine(kind, Path::new("."), options)
    }
}
