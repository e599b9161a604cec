//! Object store client for the CSI snapshot operator
//!
//! Narrow, per-capability traits over the cluster API (get / create / update
//! per resource kind, plus status updates for the operator config object),
//! a kube-rs implementation and, behind the `test-util` feature, an in-memory
//! mock.
//!
//! # Example
//!
//! ```no_run
//! use cluster_client::{KubeClusterClient, ObjectGetter};
//! use k8s_openapi::api::apps::v1::Deployment;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = KubeClusterClient::new(kube::Client::try_default().await?);
//! let deployment: Deployment = client
//!     .get(Some("openshift-csi-snapshot-controller"), "csi-snapshot-controller")
//!     .await?;
//! # Ok(())
//! # }
//! ```

/// kube-rs backed client
pub mod client;
/// Client errors
pub mod error;
/// Per-capability client traits
#[path = "trait.rs"]
pub mod cluster_trait;
/// In-memory object store for tests
#[cfg(feature = "test-util")]
pub mod mock;

pub use client::KubeClusterClient;
pub use cluster_trait::{ObjectClient, ObjectCreator, ObjectGetter, ObjectUpdater, StatusUpdater};
pub use error::ClientError;
#[cfg(feature = "test-util")]
pub use mock::{MockClusterClient, ObjectKind, Verb, WriteRecord};
