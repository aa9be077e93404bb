use crate::ShutdownHandle;
use crossbeam_channel::{Receiver, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;

static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

/// Install the Ctrl-C handler.
///
/// The first interrupt cancels any readiness wait through `cancel` and is
/// reported on the returned channel so the caller can stop its engine. A
/// second interrupt exits immediately.
pub fn install_signal_handler(cancel: Option<ShutdownHandle>) -> Receiver<()> {
    let (tx, rx) = crossbeam_channel::bounded(1);
    let _ = ctrlc::set_handler(move || {
        if !request_shutdown(&SHUTDOWN_REQUESTED, cancel.as_ref(), &tx) {
            std::process::exit(130);
        }
    });
    rx
}

/// Record an interrupt. Returns false when one was already recorded.
fn request_shutdown(
    requested: &AtomicBool,
    cancel: Option<&ShutdownHandle>,
    interrupted: &Sender<()>,
) -> bool {
    if requested.swap(true, Ordering::SeqCst) {
        return false;
    }
    info!("shutdown requested, stopping mock engine");
    if let Some(handle) = cancel {
        handle.signal();
    }
    let _ = interrupted.try_send(());
    true
}

pub fn shutdown_requested() -> bool {
    SHUTDOWN_REQUESTED.load(Ordering::SeqCst)
}
