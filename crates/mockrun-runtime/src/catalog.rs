use crate::backend::EngineCatalog;
use crate::prereq::{check_jvm_prereqs, MissingPrereq};
use crate::RuntimeError;
use mockrun_core::{BackendKind, EngineMetadata};
use std::path::{Path, PathBuf};

/// How cached versions of an artifact are laid out on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheLayout {
    /// `<cache>/<version>/<marker>` must exist.
    VersionDir { marker: &'static str },
    /// `<cache>/<prefix><version><suffix>` files.
    VersionedFile {
        prefix: &'static str,
        suffix: &'static str,
    },
}

impl CacheLayout {
    pub fn for_kind(kind: BackendKind) -> Option<Self> {
        match kind {
            BackendKind::Jvm => Some(CacheLayout::VersionDir {
                marker: "imposter.jar",
            }),
            BackendKind::JvmDistro => Some(CacheLayout::VersionDir { marker: "lib" }),
            BackendKind::Golang => Some(CacheLayout::VersionDir {
                marker: crate::native::BINARY_NAME,
            }),
            BackendKind::AwsLambda => Some(CacheLayout::VersionedFile {
                prefix: "imposter-awslambda-",
                suffix: ".zip",
            }),
            BackendKind::Docker | BackendKind::DockerAll | BackendKind::DockerDistroless => None,
        }
    }

    fn version_of(&self, dir: &Path, name: &str) -> Option<String> {
        match self {
            CacheLayout::VersionDir { marker } => dir
                .join(name)
                .join(marker)
                .exists()
                .then(|| name.to_owned()),
            CacheLayout::VersionedFile { prefix, suffix } => name
                .strip_prefix(prefix)
                .and_then(|rest| rest.strip_suffix(suffix))
                .filter(|v| !v.is_empty())
                .map(str::to_owned),
        }
    }
}

/// Engine versions present in a local artifact cache.
pub struct CacheCatalog {
    kind: BackendKind,
    cache_dir: PathBuf,
    layout: CacheLayout,
    java_home: Option<PathBuf>,
}

impl CacheCatalog {
    pub fn new(kind: BackendKind, cache_dir: PathBuf, layout: CacheLayout) -> Self {
        Self {
            kind,
            cache_dir,
            layout,
            java_home: None,
        }
    }

    #[must_use]
    pub fn with_java_home(mut self, java_home: Option<PathBuf>) -> Self {
        self.java_home = java_home;
        self
    }
}

impl EngineCatalog for CacheCatalog {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn list(&self) -> Result<Vec<EngineMetadata>, RuntimeError> {
        if !self.cache_dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut found = Vec::new();
        for entry in std::fs::read_dir(&self.cache_dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                continue;
            }
            if let Some(version) = self.layout.version_of(&self.cache_dir, &name) {
                found.push(EngineMetadata {
                    kind: self.kind,
                    version,
                });
            }
        }
        found.sort_by(|a, b| a.version.cmp(&b.version));
        Ok(found)
    }

    fn check_prereqs(&self) -> Vec<MissingPrereq> {
        match self.kind {
            BackendKind::Jvm | BackendKind::JvmDistro => {
                check_jvm_prereqs(self.java_home.as_deref())
            }
            _ => Vec::new(),
        }
    }
}
