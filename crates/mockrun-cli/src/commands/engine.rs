use super::{colorize_kind, json_pretty, spin_fail, spin_ok, spinner, Session, EXIT_SUCCESS};
use mockrun_core::{EngineMetadata, PullPolicy};
use tracing::warn;

/// Cached versions of one kind, or of every registered kind.
pub fn list(session: &Session, engine_type: Option<&str>, json: bool) -> Result<u8, String> {
    let kinds = match engine_type {
        Some(flag) => vec![session.kind(Some(flag))?],
        None => session.registry.kinds(),
    };

    let mut found: Vec<EngineMetadata> = Vec::new();
    for kind in kinds {
        let catalog = session.registry.catalog(kind).map_err(|e| e.to_string())?;
        match catalog.list() {
            Ok(versions) => found.extend(versions),
            Err(e) => warn!("could not list {kind} engines: {e}"),
        }
    }

    if json {
        println!("{}", json_pretty(&found)?);
    } else if found.is_empty() {
        println!("no engines found");
    } else {
        println!("{:<20} VERSION", "TYPE");
        for engine in &found {
            println!("{:<20} {}", colorize_kind(engine.kind), engine.version);
        }
    }
    Ok(EXIT_SUCCESS)
}

pub fn pull(
    session: &Session,
    engine_type: Option<&str>,
    version: Option<&str>,
    force: bool,
) -> Result<u8, String> {
    let kind = session.kind(engine_type)?;
    let version = session.version(kind, version)?;
    let policy = if force {
        PullPolicy::Always
    } else {
        PullPolicy::IfNotPresent
    };
    let mut engine = session.discovery_engine(kind, &version)?;

    // docker prints its own pull progress
    if kind.is_container() {
        println!("pulling {kind} engine {version}");
        engine.acquire(policy).map_err(|e| e.to_string())?;
        println!("✓ {kind} engine {version} available");
        return Ok(EXIT_SUCCESS);
    }

    let pb = spinner(&format!("fetching {kind} engine {version}"));
    match engine.acquire(policy) {
        Ok(()) => {
            spin_ok(&pb, &format!("{kind} engine {version} available"));
            Ok(EXIT_SUCCESS)
        }
        Err(e) => {
            spin_fail(&pb, &format!("failed to fetch {kind} engine {version}"));
            Err(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockrun_core::{BackendKind, CliConfig};

    #[test]
    fn list_reads_the_cache() {
        let home = tempfile::tempdir().unwrap();
        let session = Session::with_config(CliConfig::with_home(home.path()));
        let dir = session.config().engine_cache_dir(BackendKind::Golang).join("1.2.0");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("imposter-go"), b"").unwrap();
        assert_eq!(list(&session, Some("golang"), true).unwrap(), EXIT_SUCCESS);
    }
}
