//! Core building blocks for the mockrun engine lifecycle.
//!
//! This crate holds everything the backends share but that does not depend on
//! a particular backend: the data model (`BackendKind`, `StartOptions`,
//! `ManagedMock`), the completion counter and the at-most-once `Notifier`,
//! the TCP readiness probe with its cancellation channel, lifecycle state
//! validation, the JSON preference store, CLI configuration, the engine
//! environment builder and the cached "latest version" resolver.

pub mod completion;
pub mod concurrency;
pub mod config;
pub mod env;
pub mod lifecycle;
pub mod notifier;
pub mod prefs;
pub mod readiness;
pub mod types;
pub mod version;

pub use completion::Completion;
pub use concurrency::{install_signal_handler, shutdown_requested};
pub use config::CliConfig;
pub use env::{build_env, sanitise_version_output, version_from_output, EnvOptions};
pub use lifecycle::{validate_transition, EngineState};
pub use notifier::{Event, InstanceRef, Notifier};
pub use prefs::Prefs;
pub use readiness::{shutdown_channel, ReadinessProbe, ShutdownHandle, ShutdownSignal};
pub use types::{
    BackendKind, EngineMetadata, ManagedMock, PullPolicy, StartOptions, DEFAULT_DEBUG_PORT,
    DEFAULT_PORT,
};
pub use version::{highest_version, normalize_tag, VersionResolver};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("config error: {0}")]
    Config(String),
    #[error("unknown engine type: {0}")]
    UnknownBackend(String),
    #[error("invalid pull policy: {0}")]
    InvalidPullPolicy(String),
    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },
    #[error("invalid completion state: {0}")]
    InvalidCompletion(String),
    #[error("version resolution failed: {0}")]
    VersionResolution(String),
    #[error("library error: {0}")]
    Library(#[from] mockrun_library::LibraryError),
}
