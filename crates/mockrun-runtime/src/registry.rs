use crate::backend::{EngineCatalog, MockEngine};
use crate::catalog::{CacheCatalog, CacheLayout};
use crate::docker::{DockerCatalog, DockerEngine};
use crate::jvm::{DistroEngine, DistroProvider, SingleJarEngine, SingleJarProvider};
use crate::native::{NativeEngine, NativeProvider};
use crate::serverless::LambdaEngine;
use crate::RuntimeError;
use mockrun_core::{BackendKind, CliConfig, Notifier, StartOptions};
use mockrun_library::Downloader;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Shared services handed to every engine the registry builds.
pub struct RuntimeContext {
    pub config: CliConfig,
    pub notifier: Notifier,
    pub downloader: Downloader,
}

impl RuntimeContext {
    pub fn new(config: CliConfig, notifier: Notifier) -> Self {
        Self {
            config,
            notifier,
            downloader: Downloader::new(),
        }
    }
}

pub type EngineFactory =
    Box<dyn Fn(&Path, StartOptions) -> Result<Box<dyn MockEngine>, RuntimeError> + Send + Sync>;
pub type CatalogFactory = Box<dyn Fn() -> Box<dyn EngineCatalog> + Send + Sync>;

struct Registration {
    engine: EngineFactory,
    catalog: CatalogFactory,
}

/// Maps each backend kind to its engine and catalog constructors.
#[derive(Default)]
pub struct EngineRegistry {
    entries: BTreeMap<BackendKind, Registration>,
}

impl EngineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register constructors for `kind`. The first registration wins; returns
    /// whether this one was recorded.
    pub fn register(
        &mut self,
        kind: BackendKind,
        engine: EngineFactory,
        catalog: CatalogFactory,
    ) -> bool {
        if self.entries.contains_key(&kind) {
            debug!("{kind} engine already registered, keeping the first registration");
            return false;
        }
        self.entries.insert(kind, Registration { engine, catalog });
        true
    }

    /// A registry holding the built-in backend for every kind.
    pub fn with_defaults(ctx: &Arc<RuntimeContext>) -> Self {
        let mut registry = Self::new();
        for kind in BackendKind::ALL {
            let (engine, catalog) = default_factories(kind, ctx);
            registry.register(kind, engine, catalog);
        }
        registry
    }

    pub fn kinds(&self) -> Vec<BackendKind> {
        self.entries.keys().copied().collect()
    }

    pub fn build(
        &self,
        kind: BackendKind,
        config_dir: &Path,
        options: StartOptions,
    ) -> Result<Box<dyn MockEngine>, RuntimeError> {
        let entry = self
            .entries
            .get(&kind)
            .ok_or_else(|| RuntimeError::UnknownBackend(kind.to_string()))?;
        (entry.engine)(config_dir, options)
    }

    pub fn catalog(&self, kind: BackendKind) -> Result<Box<dyn EngineCatalog>, RuntimeError> {
        let entry = self
            .entries
            .get(&kind)
            .ok_or_else(|| RuntimeError::UnknownBackend(kind.to_string()))?;
        Ok((entry.catalog)())
    }
}

fn cache_catalog(ctx: &Arc<RuntimeContext>, kind: BackendKind, layout: CacheLayout) -> CatalogFactory {
    let ctx = Arc::clone(ctx);
    Box::new(move || {
        let catalog = CacheCatalog::new(kind, ctx.config.engine_cache_dir(kind), layout)
            .with_java_home(ctx.config.jvm.java_home.clone());
        Box::new(catalog) as Box<dyn EngineCatalog>
    })
}

fn default_factories(kind: BackendKind, ctx: &Arc<RuntimeContext>) -> (EngineFactory, CatalogFactory) {
    let catalog = match CacheLayout::for_kind(kind) {
        Some(layout) => cache_catalog(ctx, kind, layout),
        None => {
            let catalog_ctx = Arc::clone(ctx);
            let catalog: CatalogFactory = Box::new(move || {
                Box::new(DockerCatalog::new(&catalog_ctx, kind)) as Box<dyn EngineCatalog>
            });
            catalog
        }
    };

    let ctx = Arc::clone(ctx);
    let engine: EngineFactory = match kind {
        BackendKind::Docker | BackendKind::DockerAll | BackendKind::DockerDistroless => {
            Box::new(move |dir: &Path, options: StartOptions| {
                let engine = DockerEngine::new(&ctx, kind, dir, options)?;
                Ok(Box::new(engine) as Box<dyn MockEngine>)
            })
        }
        BackendKind::Jvm => Box::new(move |dir: &Path, options: StartOptions| {
            let provider = SingleJarProvider::new(&ctx, &options.version);
            let engine = SingleJarEngine::new(&ctx, provider, dir, options);
            Ok(Box::new(engine) as Box<dyn MockEngine>)
        }),
        BackendKind::JvmDistro => Box::new(move |dir: &Path, options: StartOptions| {
            let provider = DistroProvider::new(&ctx, &options.version);
            let engine = DistroEngine::new(&ctx, provider, dir, options);
            Ok(Box::new(engine) as Box<dyn MockEngine>)
        }),
        BackendKind::Golang => Box::new(move |dir: &Path, options: StartOptions| {
            let provider = NativeProvider::new(&ctx, &options.version);
            let engine = NativeEngine::new(&ctx, provider, dir, options);
            Ok(Box::new(engine) as Box<dyn MockEngine>)
        }),
        BackendKind::AwsLambda => Box::new(move |_dir: &Path, options: StartOptions| {
            Ok(Box::new(LambdaEngine::new(&ctx, options)) as Box<dyn MockEngine>)
        }),
    };
    (engine, catalog)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(home: &Path) -> Arc<RuntimeContext> {
        Arc::new(RuntimeContext::new(
            CliConfig::with_home(home),
            Notifier::spawn(),
        ))
    }

    fn failing_engine(marker: &'static str) -> EngineFactory {
        Box::new(move |_: &Path, _: StartOptions| Err(RuntimeError::Launch(marker.to_owned())))
    }

    fn empty_catalog(ctx: &Arc<RuntimeContext>) -> CatalogFactory {
        cache_catalog(ctx, BackendKind::Golang, CacheLayout::VersionDir { marker: "x" })
    }

    #[test]
    fn defaults_cover_every_kind() {
        let home = tempfile::tempdir().unwrap();
        let registry = EngineRegistry::with_defaults(&context(home.path()));
        assert_eq!(registry.kinds().len(), BackendKind::ALL.len());
        for kind in BackendKind::ALL {
            let engine = registry
                .build(kind, home.path(), StartOptions::default())
                .unwrap();
            assert_eq!(engine.kind(), kind);
            assert_eq!(registry.catalog(kind).unwrap().kind(), kind);
        }
    }

    #[test]
    fn first_registration_wins() {
        let home = tempfile::tempdir().unwrap();
        let ctx = context(home.path());
        let mut registry = EngineRegistry::new();
        assert!(registry.register(BackendKind::Golang, failing_engine("first"), empty_catalog(&ctx)));
        assert!(!registry.register(BackendKind::Golang, failing_engine("second"), empty_catalog(&ctx)));

        let err = registry
            .build(BackendKind::Golang, home.path(), StartOptions::default())
            .err()
            .unwrap();
        assert!(matches!(err, RuntimeError::Launch(ref m) if m == "first"));
    }

    #[test]
    fn unregistered_kind_is_unknown_backend() {
        let registry = EngineRegistry::new();
        assert!(matches!(
            registry.build(BackendKind::Jvm, Path::new("."), StartOptions::default()),
            Err(RuntimeError::UnknownBackend(_))
        ));
        assert!(matches!(
            registry.catalog(BackendKind::Docker),
            Err(RuntimeError::UnknownBackend(_))
        ));
    }
}
