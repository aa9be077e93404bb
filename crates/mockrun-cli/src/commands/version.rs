use super::{Session, CLI_VERSION, EXIT_SUCCESS};
use crate::OutputFormat;
use tracing::warn;

pub fn run(
    session: &Session,
    engine_type: Option<&str>,
    cli_only: bool,
    format: OutputFormat,
) -> Result<u8, String> {
    let engine_version = if cli_only {
        None
    } else {
        Some(engine_version(session, engine_type)?)
    };

    match format {
        OutputFormat::Json => {
            let mut json = serde_json::json!({ "mockrun": CLI_VERSION });
            if let Some(version) = &engine_version {
                json["engine"] = serde_json::Value::from(version.clone());
            }
            println!(
                "{}",
                serde_json::to_string_pretty(&json).map_err(|e| e.to_string())?
            );
        }
        OutputFormat::Plain => {
            println!("mockrun version: {CLI_VERSION}");
            if let Some(version) = &engine_version {
                println!("engine version: {version}");
            }
        }
    }
    Ok(EXIT_SUCCESS)
}

/// Version reported by the configured engine artifact, or `unknown` when
/// the artifact cannot be run.
fn engine_version(session: &Session, engine_type: Option<&str>) -> Result<String, String> {
    let kind = session.kind(engine_type)?;
    let version = session.version(kind, None)?;
    let mut engine = session.discovery_engine(kind, &version)?;
    Ok(engine.version_string().unwrap_or_else(|e| {
        warn!("could not determine {kind} engine version: {e}");
        "unknown".to_owned()
    }))
}
