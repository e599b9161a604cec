//! Status condition store.
//!
//! Pure merge logic over an ordered list of `OperatorCondition`s. At most one
//! condition per type is kept, and `lastTransitionTime` only moves when the
//! status value changes.

use chrono::{DateTime, Utc};
use crds::{ConditionStatus, ConditionType, OperatorCondition};

/// Reason used when everything is fine.
pub const REASON_AS_EXPECTED: &str = "AsExpected";

/// Reason used for the Degraded condition when synchronization failed.
pub const REASON_OPERATOR_SYNC: &str = "OperatorSync";

/// Merges `new` into `conditions`.
///
/// - no condition of that type yet: append it, stamped with `now`
/// - status differs: replace status, reason and message, stamp `now`
/// - status unchanged: update reason and message, keep the old timestamp
pub fn set_condition(
    conditions: &mut Vec<OperatorCondition>,
    new: OperatorCondition,
    now: DateTime<Utc>,
) {
    match conditions.iter_mut().find(|c| c.type_ == new.type_) {
        None => conditions.push(OperatorCondition {
            last_transition_time: now,
            ..new
        }),
        Some(existing) if existing.status != new.status => {
            existing.status = new.status;
            existing.reason = new.reason;
            existing.message = new.message;
            existing.last_transition_time = now;
        }
        Some(existing) => {
            existing.reason = new.reason;
            existing.message = new.message;
        }
    }
}

/// Finds the condition of the given type.
pub fn find_condition(
    conditions: &[OperatorCondition],
    type_: ConditionType,
) -> Option<&OperatorCondition> {
    conditions.iter().find(|c| c.type_ == type_)
}

/// True when a condition of the given type exists with status True.
pub fn is_condition_true(conditions: &[OperatorCondition], type_: ConditionType) -> bool {
    find_condition(conditions, type_).is_some_and(|c| c.status == ConditionStatus::True)
}

/// Conditions describing the outcome of one sync pass.
///
/// `PrereqsSatisfied` and `Upgradeable` are always True. On a clean pass
/// `Available` is True and `Progressing` False; on failure those two are left
/// out so whatever was published before stays. `Degraded` carries the error.
///
/// Replica counts and rollout progress are not inspected: a clean pass is
/// reported as available even while the Deployment is still rolling out.
pub fn compute_conditions(sync_error: Option<&str>) -> Vec<OperatorCondition> {
    let mut conditions = vec![
        OperatorCondition::new(
            ConditionType::PrereqsSatisfied,
            ConditionStatus::True,
            REASON_AS_EXPECTED,
            "",
        ),
        OperatorCondition::new(
            ConditionType::Upgradeable,
            ConditionStatus::True,
            REASON_AS_EXPECTED,
            "",
        ),
    ];

    match sync_error {
        Some(message) => conditions.push(OperatorCondition::new(
            ConditionType::Degraded,
            ConditionStatus::True,
            REASON_OPERATOR_SYNC,
            message,
        )),
        None => {
            conditions.push(OperatorCondition::new(
                ConditionType::Available,
                ConditionStatus::True,
                REASON_AS_EXPECTED,
                "",
            ));
            conditions.push(OperatorCondition::new(
                ConditionType::Progressing,
                ConditionStatus::False,
                REASON_AS_EXPECTED,
                "",
            ));
            conditions.push(OperatorCondition::new(
                ConditionType::Degraded,
                ConditionStatus::False,
                REASON_AS_EXPECTED,
                "",
            ));
        }
    }

    conditions
}

/// Three-way merge of freshly computed conditions onto the published ones.
///
/// The published list stays the source of truth for transition times; each
/// fresh condition is folded in with `set_condition`. Types that are not
/// recomputed are kept untouched.
pub fn merge_conditions(
    original: &[OperatorCondition],
    fresh: Vec<OperatorCondition>,
    now: DateTime<Utc>,
) -> Vec<OperatorCondition> {
    let mut merged = original.to_vec();
    for condition in fresh {
        set_condition(&mut merged, condition, now);
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn degraded(status: ConditionStatus, reason: &str, message: &str) -> OperatorCondition {
        OperatorCondition::new(ConditionType::Degraded, status, reason, message)
    }

    #[test]
    fn test_set_condition_appends_new_type() {
        let mut conditions = Vec::new();
        set_condition(&mut conditions, degraded(ConditionStatus::False, "AsExpected", ""), at(10));

        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].last_transition_time, at(10));
    }

    #[test]
    fn test_unchanged_status_keeps_transition_time() {
        let mut conditions = Vec::new();
        set_condition(&mut conditions, degraded(ConditionStatus::False, "A", "first"), at(10));
        set_condition(&mut conditions, degraded(ConditionStatus::False, "B", "second"), at(20));

        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].last_transition_time, at(10));
        assert_eq!(conditions[0].reason, "B");
        assert_eq!(conditions[0].message, "second");
    }

    #[test]
    fn test_changed_status_moves_transition_time_then_idempotent() {
        let mut conditions = Vec::new();
        set_condition(&mut conditions, degraded(ConditionStatus::False, "AsExpected", ""), at(10));
        set_condition(&mut conditions, degraded(ConditionStatus::True, "OperatorSync", "boom"), at(20));

        assert_eq!(conditions[0].status, ConditionStatus::True);
        assert_eq!(conditions[0].last_transition_time, at(20));

        set_condition(&mut conditions, degraded(ConditionStatus::True, "OperatorSync", "boom"), at(30));
        assert_eq!(conditions[0].last_transition_time, at(20));
        assert_eq!(conditions.len(), 1);
    }

    #[test]
    fn test_at_most_one_condition_per_type() {
        let mut conditions = Vec::new();
        for (i, status) in [ConditionStatus::True, ConditionStatus::False, ConditionStatus::Unknown]
            .into_iter()
            .enumerate()
        {
            set_condition(&mut conditions, degraded(status, "r", "m"), at(i as i64));
        }
        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].status, ConditionStatus::Unknown);
    }

    #[test]
    fn test_find_and_is_true() {
        let conditions = compute_conditions(Some("boom"));
        assert!(is_condition_true(&conditions, ConditionType::Degraded));
        assert!(!is_condition_true(&conditions, ConditionType::Available));
        assert!(find_condition(&conditions, ConditionType::Available).is_none());
        assert!(find_condition(&conditions, ConditionType::Upgradeable).is_some());
    }

    #[test]
    fn test_compute_conditions_clean_pass() {
        let conditions = compute_conditions(None);
        let status = |t| find_condition(&conditions, t).map(|c| c.status);

        assert_eq!(status(ConditionType::PrereqsSatisfied), Some(ConditionStatus::True));
        assert_eq!(status(ConditionType::Upgradeable), Some(ConditionStatus::True));
        assert_eq!(status(ConditionType::Available), Some(ConditionStatus::True));
        assert_eq!(status(ConditionType::Progressing), Some(ConditionStatus::False));
        assert_eq!(status(ConditionType::Degraded), Some(ConditionStatus::False));
    }

    #[test]
    fn test_compute_conditions_failed_pass() {
        let conditions = compute_conditions(Some("failed to sync CRDs: boom"));
        let degraded = find_condition(&conditions, ConditionType::Degraded).unwrap();

        assert_eq!(degraded.status, ConditionStatus::True);
        assert_eq!(degraded.reason, REASON_OPERATOR_SYNC);
        assert_eq!(degraded.message, "failed to sync CRDs: boom");
        assert!(find_condition(&conditions, ConditionType::Available).is_none());
        assert!(find_condition(&conditions, ConditionType::Progressing).is_none());
    }

    #[test]
    fn test_merge_preserves_original_transition_times() {
        let original = merge_conditions(&[], compute_conditions(None), at(100));
        let merged = merge_conditions(&original, compute_conditions(None), at(200));

        assert_eq!(merged, original);
        assert!(merged.iter().all(|c| c.last_transition_time == at(100)));
    }

    #[test]
    fn test_merge_failure_keeps_available_and_flips_degraded() {
        let original = merge_conditions(&[], compute_conditions(None), at(100));
        let merged = merge_conditions(&original, compute_conditions(Some("boom")), at(200));

        let available = find_condition(&merged, ConditionType::Available).unwrap();
        assert_eq!(available.status, ConditionStatus::True);
        assert_eq!(available.last_transition_time, at(100));

        let degraded = find_condition(&merged, ConditionType::Degraded).unwrap();
        assert_eq!(degraded.status, ConditionStatus::True);
        assert_eq!(degraded.last_transition_time, at(200));
        assert_eq!(merged.len(), original.len());
    }
}
