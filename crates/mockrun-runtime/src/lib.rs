//! Mock engine backends for mockrun.
//!
//! This crate implements the `MockEngine` lifecycle once per backend family:
//! a container engine driven through the `docker` CLI (three image variants),
//! a process engine for the JVM single-jar and unpacked-distribution
//! launchers and the native `imposter-go` binary, and a serverless engine
//! that only acquires its deployment bundle. Each backend pairs a `Provider`
//! (artifact acquisition under a pull policy) with the shared completion,
//! readiness and notifier primitives from `mockrun-core`. The
//! `EngineRegistry` maps each `BackendKind` to its engine and catalog
//! constructors.

pub mod backend;
pub mod catalog;
pub mod docker;
pub mod jvm;
pub mod native;
pub mod prereq;
pub mod process;
pub mod procutil;
pub mod registry;
pub mod serverless;

pub use backend::{EngineCatalog, MockEngine, Provider};
pub use prereq::{check_docker_prereqs, check_jvm_prereqs, format_missing, MissingPrereq};
pub use registry::{EngineRegistry, RuntimeContext};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("failed to acquire engine artifact: {0}")]
    Acquisition(String),
    #[error("failed to launch mock engine: {0}")]
    Launch(String),
    #[error("failed to stop mock engine: {0}")]
    Termination(String),
    #[error("failed to determine engine version: {0}")]
    Version(String),
    #[error("failed to discover managed mocks: {0}")]
    Discovery(String),
    #[error("unsupported operation: {0}")]
    Unsupported(String),
    #[error("unknown engine type: {0}")]
    UnknownBackend(String),
    #[error("runtime I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Core(#[from] mockrun_core::CoreError),
}
