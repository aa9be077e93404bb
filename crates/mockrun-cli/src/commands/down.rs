use super::{Session, EXIT_SUCCESS};
use mockrun_library::LATEST;

pub fn run(session: &Session, engine_type: Option<&str>) -> Result<u8, String> {
    let kind = session.kind(engine_type)?;
    let engine = session.discovery_engine(kind, LATEST)?;
    let stopped = engine.stop_all_managed().map_err(|e| e.to_string())?;
    match stopped {
        0 => println!("no running {kind} mocks"),
        1 => println!("stopped 1 {kind} mock"),
        n => println!("stopped {n} {kind} mocks"),
    }
    Ok(EXIT_SUCCESS)
}
