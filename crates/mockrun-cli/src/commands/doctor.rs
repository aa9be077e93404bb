use super::{Session, EXIT_FAILURE, EXIT_SUCCESS};
use mockrun_core::BackendKind;
use mockrun_runtime::format_missing;

/// Backend families whose host requirements are checked, by representative kind.
const CHECKED: [(BackendKind, &str, &str); 2] = [
    (BackendKind::Docker, "container_backend", "Container engines"),
    (BackendKind::Jvm, "jvm_backend", "JVM engines"),
];

pub fn run(session: &Session, json_output: bool) -> Result<u8, String> {
    let mut checks: Vec<Check> = Vec::new();
    let mut usable = 0;

    for (kind, name, label) in CHECKED {
        let catalog = session.registry.catalog(kind).map_err(|e| e.to_string())?;
        let missing = catalog.check_prereqs();
        if missing.is_empty() {
            usable += 1;
            checks.push(Check::pass(name, &format!("{label} can run on this host")));
        } else {
            checks.push(Check::fail(
                name,
                &format!("{label} unavailable: {}", format_missing(&missing)),
            ));
        }
    }

    check_cache(session, &mut checks);

    let healthy = usable > 0;
    print_results(&checks, healthy, json_output)
}

fn check_cache(session: &Session, checks: &mut Vec<Check>) {
    let mut cached = 0;
    for kind in BackendKind::ALL.into_iter().filter(|k| !k.is_container()) {
        let Ok(catalog) = session.registry.catalog(kind) else {
            continue;
        };
        match catalog.list() {
            Ok(versions) => cached += versions.len(),
            Err(e) => checks.push(Check::warn(
                "engine_cache",
                &format!("Cannot read {kind} engine cache: {e}"),
            )),
        }
    }
    checks.push(Check::info(
        "engine_cache",
        &format!(
            "{cached} cached engine versions under {}",
            session.config().home.display()
        ),
    ));
}

fn print_results(checks: &[Check], healthy: bool, json_output: bool) -> Result<u8, String> {
    if json_output {
        let json = serde_json::json!({
            "healthy": healthy,
            "checks": checks.iter().map(|c| serde_json::json!({
                "name": c.name,
                "status": c.status,
                "message": c.message,
            })).collect::<Vec<_>>(),
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&json).map_err(|e| e.to_string())?
        );
    } else {
        println!("mockrun doctor\n");
        for check in checks {
            let icon = match check.status {
                "pass" => "✓",
                "fail" => "✗",
                "warn" => "⚠",
                _ => "ℹ",
            };
            println!("  {icon} {}", check.message);
        }
        println!();
        if healthy {
            println!("At least one engine backend is usable.");
        } else {
            println!("No engine backend can run on this host. See above for details.");
        }
    }
    Ok(if healthy { EXIT_SUCCESS } else { EXIT_FAILURE })
}

struct Check {
    name: &'static str,
    status: &'static str,
    message: String,
}

impl Check {
    fn new(name: &'static str, status: &'static str, message: &str) -> Self {
        Self {
            name,
            status,
            message: message.to_owned(),
        }
    }

    fn pass(name: &'static str, message: &str) -> Self {
        Self::new(name, "pass", message)
    }

    fn fail(name: &'static str, message: &str) -> Self {
        Self::new(name, "fail", message)
    }

    fn warn(name: &'static str, message: &str) -> Self {
        Self::new(name, "warn", message)
    }

    fn info(name: &'static str, message: &str) -> Self {
        Self::new(name, "info", message)
    }
}
