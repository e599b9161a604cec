//! Test utilities for unit testing the operator
//!
//! This module provides helpers for creating test objects and setting up test scenarios.

#[cfg(test)]
use crds::{CSISnapshotController, CSISnapshotControllerSpec, ManagementState};
#[cfg(test)]
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
#[cfg(test)]
use k8s_openapi::api::core::v1::{Container, PodSpec, PodTemplateSpec};
#[cfg(test)]
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::{
    CustomResourceDefinition, CustomResourceDefinitionNames, CustomResourceDefinitionSpec,
    CustomResourceDefinitionVersion,
};
#[cfg(test)]
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
#[cfg(test)]
use std::collections::BTreeMap;

/// Helper to create a test CRD named `<plural>.<group>`
#[cfg(test)]
pub fn create_test_crd(name: &str) -> CustomResourceDefinition {
    let (plural, group) = name.split_once('.').unwrap_or((name, "example.com"));
    CustomResourceDefinition {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        spec: CustomResourceDefinitionSpec {
            group: group.to_string(),
            names: CustomResourceDefinitionNames {
                kind: "Test".to_string(),
                plural: plural.to_string(),
                short_names: Some(vec!["t".to_string()]),
                ..Default::default()
            },
            scope: "Namespaced".to_string(),
            versions: vec![CustomResourceDefinitionVersion {
                name: "v1".to_string(),
                served: true,
                storage: true,
                ..Default::default()
            }],
            ..Default::default()
        },
        status: None,
    }
}

/// Helper to create a test Deployment running `image`
#[cfg(test)]
pub fn create_test_deployment(namespace: &str, name: &str, image: &str) -> Deployment {
    let labels = BTreeMap::from([("app".to_string(), name.to_string())]);
    Deployment {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(labels.clone()),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: "snapshot-controller".to_string(),
                        image: Some(image.to_string()),
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        status: None,
    }
}

/// Helper to create a test operator config object
#[cfg(test)]
pub fn create_test_config(name: &str, state: ManagementState) -> CSISnapshotController {
    let mut config = CSISnapshotController::new(
        name,
        CSISnapshotControllerSpec {
            management_state: state,
            ..Default::default()
        },
    );
    config.metadata.generation = Some(1);
    config
}
