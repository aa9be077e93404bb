use super::cli::DockerCli;
use crate::backend::Provider;
use crate::RuntimeError;
use mockrun_core::{BackendKind, PullPolicy};
use tracing::{debug, info};

/// Image repository for a container kind, prefixed with `registry`.
pub fn image_repository(kind: BackendKind, registry: &str) -> Result<String, RuntimeError> {
    let repo = match kind {
        BackendKind::Docker => "outofcoffee/imposter",
        BackendKind::DockerAll => "outofcoffee/imposter-all",
        BackendKind::DockerDistroless => "outofcoffee/imposter-distroless",
        other => {
            return Err(RuntimeError::UnknownBackend(format!(
                "{other} is not a container engine"
            )))
        }
    };
    Ok(format!("{registry}{repo}"))
}

/// Ensures the engine image is present in the local docker image store.
pub struct ImageProvider {
    kind: BackendKind,
    version: String,
    registry: String,
    repository: String,
    docker: DockerCli,
    image: Option<String>,
}

impl ImageProvider {
    pub fn new(
        kind: BackendKind,
        version: &str,
        registry: &str,
        docker: DockerCli,
    ) -> Result<Self, RuntimeError> {
        Ok(Self {
            kind,
            version: version.to_owned(),
            registry: registry.to_owned(),
            repository: image_repository(kind, registry)?,
            docker,
            image: None,
        })
    }

    pub fn image_ref(&self) -> String {
        format!("{}:{}", self.repository, self.version)
    }

    /// The image reference located by the last successful `provide`.
    pub fn image(&self) -> Option<&str> {
        self.image.as_deref()
    }

    fn pull(&self, image: &str) -> Result<(), RuntimeError> {
        info!("pulling '{}' engine image", self.version);
        // bare repositories are pulled from Docker Hub explicitly
        let source = if self.registry.is_empty() {
            format!("docker.io/{image}")
        } else {
            image.to_owned()
        };
        self.docker.pull(&source)
    }
}

impl Provider for ImageProvider {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn version(&self) -> &str {
        &self.version
    }

    fn provide(&mut self, policy: PullPolicy) -> Result<(), RuntimeError> {
        let image = self.image_ref();
        match policy {
            PullPolicy::Skip => {}
            PullPolicy::IfNotPresent => {
                if self.docker.image_present(&image)? {
                    debug!("engine image '{image}' already present");
                } else {
                    self.pull(&image)?;
                }
            }
            PullPolicy::Always => self.pull(&image)?,
        }
        self.image = Some(image);
        Ok(())
    }

    fn satisfied(&self) -> bool {
        self.image.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repositories_per_kind() {
        assert_eq!(
            image_repository(BackendKind::Docker, "").unwrap(),
            "outofcoffee/imposter"
        );
        assert_eq!(
            image_repository(BackendKind::DockerAll, "registry.example.com/").unwrap(),
            "registry.example.com/outofcoffee/imposter-all"
        );
        assert_eq!(
            image_repository(BackendKind::DockerDistroless, "").unwrap(),
            "outofcoffee/imposter-distroless"
        );
        assert!(image_repository(BackendKind::Jvm, "").is_err());
    }

    #[test]
    fn skip_policy_never_touches_docker() {
        let mut provider = ImageProvider::new(
            BackendKind::Docker,
            "4.2.0",
            "",
            DockerCli::new("/nonexistent/docker"),
        )
        .unwrap();
        assert!(!provider.satisfied());
        provider.provide(PullPolicy::Skip).unwrap();
        assert!(provider.satisfied());
        assert_eq!(provider.image(), Some("outofcoffee/imposter:4.2.0"));
    }

    #[test]
    fn if_not_present_surfaces_daemon_failure() {
        let mut provider = ImageProvider::new(
            BackendKind::DockerAll,
            "latest",
            "",
            DockerCli::new("/nonexistent/docker"),
        )
        .unwrap();
        assert!(matches!(
            provider.provide(PullPolicy::IfNotPresent),
            Err(RuntimeError::Acquisition(_))
        ));
        assert!(!provider.satisfied());
    }
}
