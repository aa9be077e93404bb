use super::{colorize_kind, json_pretty, Session, EXIT_SUCCESS};
use mockrun_core::ManagedMock;
use mockrun_library::LATEST;

fn short_id(id: &str) -> &str {
    id.get(..12).unwrap_or(id)
}

pub fn run(session: &Session, engine_type: Option<&str>, json: bool) -> Result<u8, String> {
    let kind = session.kind(engine_type)?;
    let engine = session.discovery_engine(kind, LATEST)?;
    let mocks: Vec<ManagedMock> = engine.list_all_managed().map_err(|e| e.to_string())?;
    if json {
        println!("{}", json_pretty(&mocks)?);
    } else if mocks.is_empty() {
        println!("no running {kind} mocks");
    } else {
        println!("{:<14} {:<20} {:<18} URL", "ID", "NAME", "TYPE");
        for mock in &mocks {
            println!(
                "{:<14} {:<20} {:<18} http://localhost:{}",
                short_id(&mock.id),
                mock.name,
                colorize_kind(kind),
                mock.port
            );
        }
    }
    Ok(EXIT_SUCCESS)
}
