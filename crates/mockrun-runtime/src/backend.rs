use crate::prereq::MissingPrereq;
use crate::RuntimeError;
use mockrun_core::{
    BackendKind, Completion, EngineMetadata, EngineState, ManagedMock, PullPolicy, ShutdownHandle,
};

/// Makes an engine artifact (image, jar, distribution, binary, bundle)
/// available locally.
pub trait Provider: Send {
    fn kind(&self) -> BackendKind;

    fn version(&self) -> &str;

    /// Acquire the artifact according to `policy`. `Skip` trusts the
    /// canonical location without touching the network or the daemon.
    fn provide(&mut self, policy: PullPolicy) -> Result<(), RuntimeError>;

    /// Whether `provide` has already located the artifact in this process.
    fn satisfied(&self) -> bool;
}

/// Lifecycle of a single mock engine instance.
///
/// The completion counter passed to `start`, `stop` and `restart` is the
/// caller's: the caller adds one before `start` and waits on it after
/// `stop`. The engine settles exactly one unit per instance through the
/// shared `Notifier`, whichever of the exit watcher, the removal supervisor
/// or the stop path observes termination first.
pub trait MockEngine: Send {
    fn kind(&self) -> BackendKind;

    fn state(&self) -> EngineState;

    /// Cancels a readiness probe in progress.
    fn shutdown_handle(&self) -> ShutdownHandle;

    /// Acquire the engine artifact without starting anything.
    fn acquire(&mut self, policy: PullPolicy) -> Result<(), RuntimeError>;

    /// Launch the engine and block until it accepts TCP connections.
    ///
    /// Returns `Ok(false)` when the probe timed out or was cancelled; the
    /// instance is still launched and must be stopped. On `Err` nothing is
    /// running and the caller's unit has already been settled.
    fn start(&mut self, completion: &Completion) -> Result<bool, RuntimeError>;

    /// Terminate the instance started by this engine, if any. With no
    /// instance recorded the caller's unit is settled immediately.
    fn stop(&mut self, completion: &Completion) -> Result<(), RuntimeError>;

    /// Cancel a pending readiness probe, then stop.
    fn stop_immediately(&mut self, completion: &Completion) -> Result<(), RuntimeError> {
        self.shutdown_handle().signal();
        self.stop(completion)
    }

    /// Stop and start again with the same options, never re-acquiring the
    /// artifact. Adds one unit for the new instance before stopping.
    fn restart(&mut self, completion: &Completion) -> Result<bool, RuntimeError>;

    /// Every instance of this backend family tagged as managed by mockrun.
    fn list_all_managed(&self) -> Result<Vec<ManagedMock>, RuntimeError>;

    /// Terminate every managed instance; returns how many were stopped.
    fn stop_all_managed(&self) -> Result<usize, RuntimeError>;

    /// Version string reported by the engine artifact itself.
    fn version_string(&mut self) -> Result<String, RuntimeError>;
}

/// Locally cached engine versions and host requirements for one kind.
pub trait EngineCatalog: Send + Sync {
    fn kind(&self) -> BackendKind;

    fn list(&self) -> Result<Vec<EngineMetadata>, RuntimeError>;

    fn check_prereqs(&self) -> Vec<MissingPrereq>;
}

/// Move `state` to `to` if the lifecycle allows it.
pub(crate) fn advance(state: &mut EngineState, to: EngineState) -> Result<(), RuntimeError> {
    mockrun_core::validate_transition(*state, to)?;
    *state = to;
    Ok(())
}

/// Run `fetch` as `policy` requires: never for `Skip`, when `present` is
/// false for `IfNotPresent`, always for `Always`.
pub(crate) fn apply_pull_policy<F>(
    policy: PullPolicy,
    present: bool,
    artifact: &str,
    fetch: F,
) -> Result<(), RuntimeError>
where
    F: FnOnce() -> Result<(), mockrun_library::LibraryError>,
{
    let wanted = match policy {
        PullPolicy::Skip => false,
        PullPolicy::IfNotPresent => !present,
        PullPolicy::Always => true,
    };
    if !wanted {
        tracing::debug!("engine artifact '{artifact}' not fetched under {policy} policy");
        return Ok(());
    }
    fetch().map_err(|e| RuntimeError::Acquisition(format!("failed to fetch {artifact}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn run(policy: PullPolicy, present: bool) -> usize {
        let calls = Cell::new(0);
        apply_pull_policy(policy, present, "imposter.jar", || {
            calls.set(calls.get() + 1);
            Ok(())
        })
        .unwrap();
        calls.get()
    }

    #[test]
    fn policy_decides_fetch() {
        assert_eq!(run(PullPolicy::Skip, false), 0);
        assert_eq!(run(PullPolicy::IfNotPresent, true), 0);
        assert_eq!(run(PullPolicy::IfNotPresent, false), 1);
        assert_eq!(run(PullPolicy::Always, true), 1);
    }

    #[test]
    fn fetch_failure_is_acquisition_error() {
        let err = apply_pull_policy(PullPolicy::Always, false, "imposter.jar", || {
            Err(mockrun_library::LibraryError::NotFound("x".to_owned()))
        })
        .unwrap_err();
        assert!(matches!(err, RuntimeError::Acquisition(_)));
    }

    #[test]
    fn transitions_are_checked() {
        let mut state = EngineState::Running;
        assert!(advance(&mut state, EngineState::Starting).is_err());
        assert_eq!(state, EngineState::Running);
        advance(&mut state, EngineState::Stopping).unwrap();
        assert_eq!(state, EngineState::Stopping);
    }
}
