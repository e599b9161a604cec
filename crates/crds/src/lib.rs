//! CSI Snapshot Operator CRD Definitions
//!
//! Kubernetes Custom Resource Definitions and status types for the
//! CSI snapshot controller operator.

/// The operator config resource
pub mod csi_snapshot_controller;
/// Status conditions
pub mod operator_status;

pub use csi_snapshot_controller::*;
pub use operator_status::*;
