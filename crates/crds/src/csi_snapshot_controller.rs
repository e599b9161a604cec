//! CSISnapshotController CRD
//!
//! The single cluster-scoped configuration object describing the
//! administrator's intent for the CSI snapshot feature. Only one instance
//! (named `cluster`) is ever reconciled.

use crate::operator_status::OperatorCondition;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[kube(
    group = "operator.openshift.io",
    version = "v1",
    kind = "CSISnapshotController",
    plural = "csisnapshotcontrollers",
    status = "CSISnapshotControllerStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct CSISnapshotControllerSpec {
    /// Whether and how the operator should manage the component
    #[serde(default)]
    pub management_state: ManagementState,

    /// Log level for the operand
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<LogLevel>,

    /// Log level for the operator itself
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator_log_level: Option<LogLevel>,
}

/// Management state of the operand.
///
/// Serializes as PascalCase ("Managed", "Unmanaged", "Removed").
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub enum ManagementState {
    /// The operator reconciles the operand
    #[default]
    Managed,

    /// The operator leaves the operand alone
    Unmanaged,

    /// The operand should be removed (not implemented, treated as a no-op)
    Removed,
}

/// Verbosity requested for a component.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub enum LogLevel {
    /// Default verbosity
    #[default]
    Normal,
    /// Debug output
    Debug,
    /// Trace output
    Trace,
    /// Everything, including request bodies
    TraceAll,
}

/// Observed state published by the operator.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CSISnapshotControllerStatus {
    /// Generation of the spec last fully reconciled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Status conditions, at most one per type
    #[serde(default)]
    pub conditions: Vec<OperatorCondition>,

    /// Operator version advertised to observers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl CSISnapshotController {
    /// Management state from the spec.
    pub fn management_state(&self) -> ManagementState {
        self.spec.management_state
    }

    /// Conditions currently published in status (empty when status is unset).
    pub fn conditions(&self) -> &[OperatorCondition] {
        self.status
            .as_ref()
            .map(|s| s.conditions.as_slice())
            .unwrap_or_default()
    }
}
