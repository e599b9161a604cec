//! Object synchronizer.
//!
//! Idempotent create-or-update routines for the managed CRDs and the operand
//! Deployment. Each routine reads the live object, creates it when missing and
//! otherwise writes only when it has drifted from the desired manifest.
//! Store errors are returned as-is; callers add context.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use cluster_client::{ClientError, ObjectClient};
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Annotation carrying the hash of the Deployment spec last written by the operator.
pub const DEPLOYMENT_HASH_ANNOTATION: &str = "operator.openshift.io/rvs-hash";

/// What an apply call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The object did not exist and was created
    Created,
    /// The live object had drifted and was rewritten
    Updated,
    /// The live object already matched
    Unchanged,
}

impl ApplyOutcome {
    /// Whether the call wrote to the object store.
    pub fn changed(self) -> bool {
        !matches!(self, Self::Unchanged)
    }
}

fn required_name(meta: &ObjectMeta) -> Result<&str, ClientError> {
    meta.name
        .as_deref()
        .ok_or_else(|| ClientError::InvalidRequest("manifest has no metadata.name".to_string()))
}

/// Copies `required` entries into `existing`. Returns true if anything changed.
fn merge_map(
    existing: &mut Option<BTreeMap<String, String>>,
    required: Option<&BTreeMap<String, String>>,
) -> bool {
    let Some(required) = required.filter(|r| !r.is_empty()) else {
        return false;
    };
    let existing = existing.get_or_insert_with(BTreeMap::new);
    let mut modified = false;
    for (key, value) in required {
        if existing.get(key) != Some(value) {
            existing.insert(key.clone(), value.clone());
            modified = true;
        }
    }
    modified
}

/// Merges the operator-owned labels and annotations onto live metadata.
/// Keys set by other writers are left alone.
fn merge_object_meta(existing: &mut ObjectMeta, required: &ObjectMeta) -> bool {
    let labels = merge_map(&mut existing.labels, required.labels.as_ref());
    let annotations = merge_map(&mut existing.annotations, required.annotations.as_ref());
    labels || annotations
}

/// Ensures `required` exists and its spec matches.
pub async fn apply_crd<C>(
    client: &C,
    required: &CustomResourceDefinition,
) -> Result<ApplyOutcome, ClientError>
where
    C: ObjectClient<CustomResourceDefinition> + ?Sized,
{
    let name = required_name(&required.metadata)?;

    let existing = match client.get(None, name).await {
        Ok(existing) => existing,
        Err(e) if e.is_not_found() => {
            client.create(required).await?;
            info!("Created CRD {}", name);
            return Ok(ApplyOutcome::Created);
        }
        Err(e) => return Err(e),
    };

    let mut updated = existing.clone();
    let meta_modified = merge_object_meta(&mut updated.metadata, &required.metadata);
    if !meta_modified && existing.spec == required.spec {
        debug!("CRD {} is up to date", name);
        return Ok(ApplyOutcome::Unchanged);
    }

    updated.spec = required.spec.clone();
    client.update(&updated).await?;
    info!("Updated CRD {}", name);
    Ok(ApplyOutcome::Updated)
}

/// Content hash of a Deployment spec: SHA-256 over its JSON form, base64
/// URL-safe without padding.
pub fn deployment_spec_hash(spec: Option<&DeploymentSpec>) -> Result<String, ClientError> {
    // serde_json::Value keeps object keys sorted, so the bytes are stable
    let canonical = serde_json::to_value(spec)
        .and_then(|value| serde_json::to_vec(&value))
        .map_err(|e| ClientError::InvalidRequest(format!("failed to encode Deployment spec: {e}")))?;
    Ok(URL_SAFE_NO_PAD.encode(Sha256::digest(&canonical)))
}

/// Ensures `required` exists and matches.
///
/// The live object is left alone only when its hash annotation matches the
/// desired spec and its generation is the one observed after our last write.
/// `expected_generation` is `None` until the first write of this process,
/// which forces one update. Returns the outcome and the generation to expect
/// next time.
pub async fn apply_deployment<C>(
    client: &C,
    required: &Deployment,
    expected_generation: Option<i64>,
) -> Result<(ApplyOutcome, Option<i64>), ClientError>
where
    C: ObjectClient<Deployment> + ?Sized,
{
    let name = required_name(&required.metadata)?;
    let namespace = required.metadata.namespace.as_deref();

    let hash = deployment_spec_hash(required.spec.as_ref())?;
    let mut desired = required.clone();
    desired
        .metadata
        .annotations
        .get_or_insert_with(BTreeMap::new)
        .insert(DEPLOYMENT_HASH_ANNOTATION.to_string(), hash.clone());

    let existing = match client.get(namespace, name).await {
        Ok(existing) => existing,
        Err(e) if e.is_not_found() => {
            let created = client.create(&desired).await?;
            info!("Created Deployment {}/{}", namespace.unwrap_or_default(), name);
            return Ok((ApplyOutcome::Created, created.metadata.generation));
        }
        Err(e) => return Err(e),
    };

    let live_hash = existing
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(DEPLOYMENT_HASH_ANNOTATION))
        .cloned();
    let live_generation = existing.metadata.generation;
    let hash_matches = live_hash.as_deref() == Some(hash.as_str());

    if hash_matches && expected_generation.is_some() {
        if live_generation == expected_generation {
            debug!("Deployment {} is up to date (hash {})", name, hash);
            return Ok((ApplyOutcome::Unchanged, live_generation));
        }
        info!(
            "Deployment {}/{} was modified externally (generation {:?}, expected {:?})",
            namespace.unwrap_or_default(),
            name,
            live_generation,
            expected_generation
        );
    }

    let mut updated = existing;
    merge_object_meta(&mut updated.metadata, &desired.metadata);
    updated.spec = desired.spec;
    let written = client.update(&updated).await?;
    info!(
        "Updated Deployment {}/{} (hash {} -> {})",
        namespace.unwrap_or_default(),
        name,
        live_hash.as_deref().unwrap_or("<none>"),
        hash
    );
    Ok((ApplyOutcome::Updated, written.metadata.generation))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{create_test_crd, create_test_deployment};
    use cluster_client::{MockClusterClient, ObjectKind, Verb};

    #[tokio::test]
    async fn test_apply_crd_creates_when_missing() {
        let client = MockClusterClient::new();
        let crd = create_test_crd("volumesnapshots.snapshot.storage.k8s.io");

        let outcome = apply_crd(&client, &crd).await.unwrap();

        assert_eq!(outcome, ApplyOutcome::Created);
        assert!(client.crd("volumesnapshots.snapshot.storage.k8s.io").is_some());
        assert_eq!(client.write_count(), 1);
    }

    #[tokio::test]
    async fn test_apply_crd_unchanged_when_spec_matches() {
        let client = MockClusterClient::new();
        let crd = create_test_crd("volumesnapshots.snapshot.storage.k8s.io");
        client.add_crd(crd.clone());

        let outcome = apply_crd(&client, &crd).await.unwrap();

        assert_eq!(outcome, ApplyOutcome::Unchanged);
        assert_eq!(client.write_count(), 0);
    }

    #[tokio::test]
    async fn test_apply_crd_updates_drifted_spec_keeping_foreign_labels() {
        let client = MockClusterClient::new();
        let name = "volumesnapshots.snapshot.storage.k8s.io";
        let mut live = create_test_crd(name);
        live.spec.names.short_names = None;
        live.metadata.labels = Some(BTreeMap::from([("owner".to_string(), "admin".to_string())]));
        client.add_crd(live);

        let required = create_test_crd(name);
        let outcome = apply_crd(&client, &required).await.unwrap();

        assert_eq!(outcome, ApplyOutcome::Updated);
        let stored = client.crd(name).unwrap();
        assert_eq!(stored.spec, required.spec);
        assert_eq!(
            stored.metadata.labels.unwrap().get("owner").map(String::as_str),
            Some("admin")
        );
    }

    #[tokio::test]
    async fn test_apply_crd_propagates_store_errors() {
        let client = MockClusterClient::new();
        client.fail_on(
            ObjectKind::CustomResourceDefinition,
            Verb::Get,
            ClientError::Transport("connection refused".to_string()),
        );

        let err = apply_crd(&client, &create_test_crd("a.example.com")).await.unwrap_err();

        assert_eq!(err, ClientError::Transport("connection refused".to_string()));
        assert_eq!(client.write_count(), 0);
    }

    #[tokio::test]
    async fn test_apply_deployment_creates_with_hash_annotation() {
        let client = MockClusterClient::new();
        let deployment = create_test_deployment("snap-ns", "csi-snapshot-controller", "img:1");

        let (outcome, generation) = apply_deployment(&client, &deployment, None).await.unwrap();

        assert_eq!(outcome, ApplyOutcome::Created);
        assert_eq!(generation, Some(1));
        let stored = client.deployment("snap-ns", "csi-snapshot-controller").unwrap();
        let expected = deployment_spec_hash(deployment.spec.as_ref()).unwrap();
        assert_eq!(
            stored.metadata.annotations.unwrap().get(DEPLOYMENT_HASH_ANNOTATION),
            Some(&expected)
        );
    }

    #[tokio::test]
    async fn test_apply_deployment_is_idempotent() {
        let client = MockClusterClient::new();
        let deployment = create_test_deployment("snap-ns", "csi-snapshot-controller", "img:1");

        let (_, generation) = apply_deployment(&client, &deployment, None).await.unwrap();
        client.reset_writes();
        let (outcome, next) = apply_deployment(&client, &deployment, generation).await.unwrap();

        assert_eq!(outcome, ApplyOutcome::Unchanged);
        assert_eq!(next, generation);
        assert_eq!(client.write_count(), 0);
    }

    #[tokio::test]
    async fn test_apply_deployment_reverts_external_spec_edit() {
        let client = MockClusterClient::new();
        let required = create_test_deployment("snap-ns", "csi-snapshot-controller", "img:1");
        let (_, generation) = apply_deployment(&client, &required, None).await.unwrap();

        // Scale down and swap the image, leaving the hash annotation in place
        let mut edited = client.deployment("snap-ns", "csi-snapshot-controller").unwrap();
        if let Some(spec) = edited.spec.as_mut() {
            spec.replicas = Some(0);
            if let Some(pod) = spec.template.spec.as_mut() {
                pod.containers[0].image = Some("other:latest".to_string());
            }
        }
        client.add_deployment(edited);
        client.reset_writes();

        let (outcome, next) = apply_deployment(&client, &required, generation).await.unwrap();

        assert_eq!(outcome, ApplyOutcome::Updated);
        assert_eq!(client.write_count(), 1);
        let stored = client.deployment("snap-ns", "csi-snapshot-controller").unwrap();
        assert_eq!(stored.spec, required.spec);
        assert_eq!(next, stored.metadata.generation);
        assert_eq!(next, Some(3));
    }

    #[tokio::test]
    async fn test_apply_deployment_without_expected_generation_updates_once() {
        let client = MockClusterClient::new();
        let required = create_test_deployment("snap-ns", "csi-snapshot-controller", "img:1");
        apply_deployment(&client, &required, None).await.unwrap();
        client.reset_writes();

        let (outcome, generation) = apply_deployment(&client, &required, None).await.unwrap();
        assert_eq!(outcome, ApplyOutcome::Updated);
        // Same spec, so the generation does not move
        assert_eq!(generation, Some(1));

        let (outcome, _) = apply_deployment(&client, &required, generation).await.unwrap();
        assert_eq!(outcome, ApplyOutcome::Unchanged);
        assert_eq!(client.write_count(), 1);
    }

    #[tokio::test]
    async fn test_apply_deployment_updates_on_image_change() {
        let client = MockClusterClient::new();
        let (_, generation) = apply_deployment(
            &client,
            &create_test_deployment("snap-ns", "csi-snapshot-controller", "img:1"),
            None,
        )
        .await
        .unwrap();

        let required = create_test_deployment("snap-ns", "csi-snapshot-controller", "img:2");
        let (outcome, next) = apply_deployment(&client, &required, generation).await.unwrap();

        assert_eq!(outcome, ApplyOutcome::Updated);
        assert_eq!(next, Some(2));
        let stored = client.deployment("snap-ns", "csi-snapshot-controller").unwrap();
        assert_eq!(stored.spec, required.spec);
        assert_eq!(
            stored
                .metadata
                .annotations
                .unwrap()
                .get(DEPLOYMENT_HASH_ANNOTATION)
                .cloned(),
            Some(deployment_spec_hash(required.spec.as_ref()).unwrap())
        );
    }

    #[tokio::test]
    async fn test_apply_deployment_create_failure_is_unwrapped() {
        let client = MockClusterClient::new();
        client.fail_on(
            ObjectKind::Deployment,
            Verb::Create,
            ClientError::Api {
                code: 403,
                message: "forbidden".to_string(),
            },
        );

        let err = apply_deployment(
            &client,
            &create_test_deployment("snap-ns", "csi-snapshot-controller", "img:1"),
            None,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, ClientError::Api { code: 403, .. }));
    }

    #[test]
    fn test_spec_hash_is_stable_and_sensitive() {
        let a = create_test_deployment("ns", "d", "img:1");
        let b = create_test_deployment("ns", "d", "img:2");

        let hash_a = deployment_spec_hash(a.spec.as_ref()).unwrap();
        assert_eq!(hash_a, deployment_spec_hash(a.spec.as_ref()).unwrap());
        assert_ne!(hash_a, deployment_spec_hash(b.spec.as_ref()).unwrap());
        assert!(!hash_a.contains('='));
    }
}
