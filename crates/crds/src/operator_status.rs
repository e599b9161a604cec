//! Operator status condition types.
//!
//! Conditions are the externally observable health contract of the operator:
//! dashboards and tooling watch these to decide whether the component is
//! available, progressing or degraded.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Condition type.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "PascalCase")]
pub enum ConditionType {
    /// The last sync failed
    Degraded,
    /// The operand is rolling out
    Progressing,
    /// The operand is installed
    Available,
    /// The operator may be upgraded
    Upgradeable,
    /// Prerequisites of the operand are met
    PrereqsSatisfied,
}

impl fmt::Display for ConditionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Degraded => "Degraded",
            Self::Progressing => "Progressing",
            Self::Available => "Available",
            Self::Upgradeable => "Upgradeable",
            Self::PrereqsSatisfied => "PrereqsSatisfied",
        };
        f.write_str(s)
    }
}

/// Condition status (True, False, Unknown).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub enum ConditionStatus {
    /// The condition holds
    True,
    /// The condition does not hold
    False,
    /// Not determined yet
    #[default]
    Unknown,
}

impl From<bool> for ConditionStatus {
    fn from(value: bool) -> Self {
        if value { Self::True } else { Self::False }
    }
}

/// A single status condition.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OperatorCondition {
    /// Type of condition
    #[serde(rename = "type")]
    pub type_: ConditionType,

    /// Status of the condition
    pub status: ConditionStatus,

    /// Short machine-readable reason
    #[serde(default)]
    pub reason: String,

    /// Human-readable message
    #[serde(default)]
    pub message: String,

    /// Last time the status changed
    #[serde(default)]
    pub last_transition_time: DateTime<Utc>,
}

impl OperatorCondition {
    /// Builds a condition with an unset (epoch) transition time.
    ///
    /// The transition time is assigned when the condition is merged into a
    /// condition list.
    pub fn new(
        type_: ConditionType,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            type_,
            status,
            reason: reason.into(),
            message: message.into(),
            last_transition_time: DateTime::<Utc>::default(),
        }
    }
}
