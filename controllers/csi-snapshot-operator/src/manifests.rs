//! Desired-object manifests.
//!
//! The snapshot CRDs and the operand Deployment ship as YAML assets compiled
//! into the binary. Placeholders are substituted from `OperatorConfig` and the
//! result is parsed once at startup, so a broken asset fails the process
//! before any worker starts.

use crate::config::OperatorConfig;
use crate::error::ControllerError;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use serde::de::DeserializeOwned;

/// Names of the CRDs installed by the operator.
pub const MANAGED_CRD_NAMES: [&str; 3] = [
    "volumesnapshots.snapshot.storage.k8s.io",
    "volumesnapshotcontents.snapshot.storage.k8s.io",
    "volumesnapshotclasses.snapshot.storage.k8s.io",
];

const CRD_ASSETS: [(&str, &str); 3] = [
    (
        "volumesnapshots.yaml",
        include_str!("../assets/volumesnapshots.yaml"),
    ),
    (
        "volumesnapshotcontents.yaml",
        include_str!("../assets/volumesnapshotcontents.yaml"),
    ),
    (
        "volumesnapshotclasses.yaml",
        include_str!("../assets/volumesnapshotclasses.yaml"),
    ),
];

const DEPLOYMENT_ASSET: (&str, &str) = ("deployment.yaml", include_str!("../assets/deployment.yaml"));

/// Source of the desired objects.
pub trait ManifestSource: Send + Sync {
    /// CRDs to install, in apply order.
    fn crds(&self) -> &[CustomResourceDefinition];

    /// The operand Deployment.
    fn deployment(&self) -> &Deployment;
}

/// Manifests rendered from the embedded assets.
#[derive(Debug, Clone)]
pub struct EmbeddedManifests {
    crds: Vec<CustomResourceDefinition>,
    deployment: Deployment,
}

impl EmbeddedManifests {
    /// Renders and parses every embedded asset.
    pub fn load(config: &OperatorConfig) -> Result<Self, ControllerError> {
        let crds = CRD_ASSETS
            .iter()
            .map(|(name, raw)| parse(name, raw))
            .collect::<Result<Vec<CustomResourceDefinition>, _>>()?;

        let (name, raw) = DEPLOYMENT_ASSET;
        let deployment = parse(name, &render(raw, config))?;

        Ok(Self { crds, deployment })
    }
}

impl ManifestSource for EmbeddedManifests {
    fn crds(&self) -> &[CustomResourceDefinition] {
        &self.crds
    }

    fn deployment(&self) -> &Deployment {
        &self.deployment
    }
}

/// Substitutes the `${...}` placeholders of an asset.
fn render(raw: &str, config: &OperatorConfig) -> String {
    raw.replace("${CONTROLLER_IMAGE}", &config.operand_image)
        .replace("${TARGET_NAMESPACE}", &config.target_namespace)
        .replace("${OPERAND_VERSION}", &config.operand_version)
}

fn parse<T: DeserializeOwned>(name: &str, raw: &str) -> Result<T, ControllerError> {
    serde_yaml::from_str(raw).map_err(|source| ControllerError::Manifest {
        name: name.to_string(),
        source,
    })
}
